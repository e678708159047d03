//! Per-tool interaction state machines.
//!
//! A [`Locator`] binds one tracked tool to one analysis behavior. The set of
//! behaviors is closed, so the locator is an enum and every callback is a
//! `match`. All callbacks run on the interaction thread; background work only
//! happens inside an extractor's [`ExtractionDriver`](crate::extraction::ExtractionDriver).

use crate::dataset::{DataSet, VariableManager};
use crate::element::Element;
use crate::geom::{Plane, Point3, Transform, Vec3};
use crate::pool::CuttingPlanePool;

mod evaluation;
mod extractor;
mod plane;

pub use evaluation::{EvaluatedValue, EvaluationKind, EvaluationLocator};
pub use extractor::ExtractorLocator;
pub use plane::PlaneLocator;

/// Session state a locator callback may touch.
pub struct LocatorContext<'a> {
    pub cutting_planes: &'a mut CuttingPlanePool,
    pub data_set: &'a DataSet,
    pub variables: &'a mut VariableManager,
    /// Elements finished during this callback, to be registered by the caller.
    pub finished: &'a mut Vec<Element>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPass {
    Highlight,
    Opaque,
    Transparent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    /// Tool glyph at the device position.
    Marker { position: Point3 },
    CuttingPlane { plane: Plane, center: Point3 },
    ScalarValue {
        position: Point3,
        value: Option<f64>,
    },
    VectorValue {
        position: Point3,
        vector: Option<Vec3>,
        scale: f64,
        scalar: Option<f64>,
    },
    Progress { position: Point3, percent: f32 },
}

/// Render requests collected from locators; drawing them is up to the
/// renderer.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DrawList {
    commands: Vec<(RenderPass, DrawCommand)>,
}

impl DrawList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pass: RenderPass, command: DrawCommand) {
        self.commands.push((pass, command));
    }

    pub fn pass(&self, pass: RenderPass) -> impl Iterator<Item = &DrawCommand> {
        self.commands
            .iter()
            .filter(move |(p, _)| *p == pass)
            .map(|(_, command)| command)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

/// One locator per tracked tool.
pub enum Locator {
    Plane(PlaneLocator),
    Evaluation(EvaluationLocator),
    Extractor(ExtractorLocator),
}

impl Locator {
    /// Device moved; `device` maps tool coordinates into world space.
    pub fn on_motion(&mut self, device: &Transform, ctx: &mut LocatorContext<'_>) {
        match self {
            Self::Plane(locator) => locator.on_motion(device, ctx),
            Self::Evaluation(locator) => locator.on_motion(device, ctx),
            Self::Extractor(locator) => locator.on_motion(device, ctx),
        }
    }

    pub fn on_press(&mut self, ctx: &mut LocatorContext<'_>) {
        match self {
            Self::Plane(locator) => locator.on_press(ctx),
            Self::Evaluation(locator) => locator.on_press(ctx),
            Self::Extractor(locator) => locator.on_press(ctx),
        }
    }

    pub fn on_release(&mut self, ctx: &mut LocatorContext<'_>) {
        match self {
            Self::Plane(locator) => locator.on_release(ctx),
            Self::Evaluation(locator) => locator.on_release(),
            Self::Extractor(locator) => locator.on_release(),
        }
    }

    /// Per-frame hook; collects results of background extractions.
    pub fn update(&mut self, ctx: &mut LocatorContext<'_>) {
        if let Self::Extractor(locator) = self {
            locator.update(ctx);
        }
    }

    pub fn highlight(&self, list: &mut DrawList) {
        match self {
            Self::Plane(_) => {}
            Self::Evaluation(locator) => locator.render(RenderPass::Highlight, list),
            Self::Extractor(locator) => locator.render(RenderPass::Highlight, list),
        }
    }

    /// `cutting_planes` is only read, for the plane a plane locator holds.
    pub fn render_opaque(&self, cutting_planes: &CuttingPlanePool, list: &mut DrawList) {
        match self {
            Self::Plane(locator) => locator.render(cutting_planes, list),
            Self::Evaluation(locator) => locator.render(RenderPass::Opaque, list),
            Self::Extractor(locator) => locator.render(RenderPass::Opaque, list),
        }
    }

    pub fn render_transparent(&self, _list: &mut DrawList) {}

    /// Releases the pool slot or cancels the extraction the locator holds.
    pub fn teardown(self, ctx: &mut LocatorContext<'_>) {
        match self {
            Self::Plane(locator) => locator.teardown(ctx),
            Self::Evaluation(_) => {}
            Self::Extractor(locator) => locator.teardown(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::algorithm::{ArrowRake, Isosurface};
    use crate::dataset::tests::linear_data_set;
    use crate::extraction::SessionState;

    struct Fixture {
        pool: CuttingPlanePool,
        data_set: Arc<DataSet>,
        variables: VariableManager,
        finished: Vec<Element>,
    }

    impl Fixture {
        fn new(capacity: usize) -> Self {
            let data_set = Arc::new(linear_data_set(Transform::identity()));
            let variables = VariableManager::new(&data_set);
            Self {
                pool: CuttingPlanePool::with_capacity(capacity),
                data_set,
                variables,
                finished: Vec::new(),
            }
        }

        fn ctx(&mut self) -> LocatorContext<'_> {
            LocatorContext {
                cutting_planes: &mut self.pool,
                data_set: &self.data_set,
                variables: &mut self.variables,
                finished: &mut self.finished,
            }
        }
    }

    fn device_at(x: f64, y: f64, z: f64) -> Transform {
        Transform::translate(Vec3::new(x, y, z))
    }

    #[test]
    fn plane_locator_moves_its_slot_only_while_pressed() {
        let mut fx = Fixture::new(6);
        let mut locator = Locator::Plane(PlaneLocator::new(&mut fx.pool));
        let tilted = Transform::translate(Vec3::new(0.0, 0.0, 2.0)) * Transform::rotate_x(std::f64::consts::FRAC_PI_2);

        locator.on_motion(&tilted, &mut fx.ctx());
        assert_eq!(fx.pool.active().count(), 0);

        locator.on_press(&mut fx.ctx());
        locator.on_motion(&tilted, &mut fx.ctx());
        let plane = fx.pool.active().next().expect("active plane").plane;
        assert!((plane.normal() - Vec3::Z).length() < 1e-12);
        assert!((plane.offset() - 2.0).abs() < 1e-12);

        locator.on_release(&mut fx.ctx());
        assert_eq!(fx.pool.active().count(), 0);
        assert_eq!(fx.pool.allocated_count(), 1);

        locator.teardown(&mut fx.ctx());
        assert_eq!(fx.pool.allocated_count(), 0);
    }

    #[test]
    fn exhausted_pool_gives_an_inert_plane_locator() {
        let mut fx = Fixture::new(1);
        let first = PlaneLocator::new(&mut fx.pool);
        let mut second = Locator::Plane(PlaneLocator::new(&mut fx.pool));
        assert!(first.has_slot());
        assert!(matches!(&second, Locator::Plane(l) if !l.has_slot()));

        second.on_press(&mut fx.ctx());
        second.on_motion(&device_at(1.0, 1.0, 1.0), &mut fx.ctx());
        assert_eq!(fx.pool.active().count(), 0);
        second.teardown(&mut fx.ctx());
        assert_eq!(fx.pool.allocated_count(), 1);
    }

    #[test]
    fn evaluation_marks_value_invalid_outside_the_data() {
        let mut fx = Fixture::new(0);
        let mut locator = EvaluationLocator::new(EvaluationKind::Scalar);
        locator.on_motion(&device_at(1.0, 1.0, 1.0), &mut fx.ctx());
        assert_eq!(locator.value(), None);

        locator.on_press(&mut fx.ctx());
        assert_eq!(locator.value(), Some(EvaluatedValue::Scalar(6.0)));

        locator.on_motion(&device_at(9.0, 1.0, 1.0), &mut fx.ctx());
        assert_eq!(locator.value(), Some(EvaluatedValue::Invalid));
        assert!(!locator.insert_control_point(&mut fx.variables));

        locator.on_motion(&device_at(0.5, 0.0, 0.0), &mut fx.ctx());
        assert!(locator.insert_control_point(&mut fx.variables));
        let palette = fx.variables.current_palette().expect("palette");
        assert!(palette.control_points().iter().any(|p| (p.value - 0.5).abs() < 1e-12));
    }

    #[test]
    fn vector_evaluation_carries_scale_and_scalar() {
        let mut fx = Fixture::new(0);
        let mut locator = EvaluationLocator::new(EvaluationKind::Vector);
        locator.set_arrow_scale(-1.0);
        locator.set_arrow_scale(2.5);
        locator.on_motion(&device_at(1.0, 0.0, 0.0), &mut fx.ctx());
        locator.on_press(&mut fx.ctx());

        let mut list = DrawList::new();
        Locator::Evaluation(locator).render_opaque(&fx.pool, &mut list);
        let commands: Vec<_> = list.pass(RenderPass::Opaque).collect();
        assert_eq!(
            commands,
            vec![&DrawCommand::VectorValue {
                position: Point3::new(1.0, 0.0, 0.0),
                vector: Some(Vec3::X),
                scale: 2.5,
                scalar: Some(1.0),
            }]
        );
    }

    #[test]
    fn non_incremental_extractor_publishes_on_press() {
        let mut fx = Fixture::new(0);
        let mut locator = Locator::Extractor(ExtractorLocator::new(
            Arc::new(ArrowRake::new(0)),
            Arc::clone(&fx.data_set),
        ));
        locator.on_press(&mut fx.ctx());
        assert!(fx.finished.is_empty(), "no point yet");
        locator.on_release(&mut fx.ctx());

        locator.on_motion(&device_at(1.0, 1.0, 1.0), &mut fx.ctx());
        locator.on_press(&mut fx.ctx());
        assert_eq!(fx.finished.len(), 1);
        assert_eq!(fx.finished[0].name(), "Arrow Rake");
    }

    #[test]
    fn mirrored_extractor_tracks_the_tool_without_extracting() {
        let mut fx = Fixture::new(0);
        let mut locator = Locator::Extractor(ExtractorLocator::mirrored(
            Arc::new(ArrowRake::new(0)),
            Arc::clone(&fx.data_set),
        ));
        locator.on_motion(&device_at(1.0, 1.0, 1.0), &mut fx.ctx());
        locator.on_press(&mut fx.ctx());
        locator.update(&mut fx.ctx());
        locator.on_release(&mut fx.ctx());
        assert!(fx.finished.is_empty());

        let mut list = DrawList::new();
        locator.highlight(&mut list);
        assert_eq!(
            list.pass(RenderPass::Highlight).collect::<Vec<_>>(),
            vec![&DrawCommand::Marker {
                position: Point3::new(1.0, 1.0, 1.0)
            }]
        );
        let Locator::Extractor(extractor) = &locator else {
            panic!("not an extractor");
        };
        assert!(!extractor.runs_locally());
        assert_eq!(extractor.state(), SessionState::Idle);
    }

    #[test]
    fn incremental_extractor_restarts_while_dragging() {
        let mut fx = Fixture::new(0);
        let mut locator = ExtractorLocator::new(Arc::new(Isosurface::new(0)), Arc::clone(&fx.data_set));
        locator.on_motion(&device_at(0.5, 0.5, 0.5), &mut fx.ctx());
        locator.on_press(&mut fx.ctx());
        locator.on_motion(&device_at(1.0, 1.0, 1.0), &mut fx.ctx());
        assert_eq!(locator.state(), SessionState::Dragging);
        let session = locator.driver().session().expect("session");
        assert_eq!(session.request_id(), 2);

        locator.on_release();
        let mut tries = 0;
        while fx.finished.is_empty() && tries < 500 {
            locator.update(&mut fx.ctx());
            std::thread::sleep(std::time::Duration::from_millis(2));
            tries += 1;
        }
        assert_eq!(fx.finished.len(), 1);
        assert_eq!(locator.state(), SessionState::Done);
    }

    #[test]
    fn teardown_cancels_running_extraction() {
        let mut fx = Fixture::new(0);
        let mut locator = Locator::Extractor(ExtractorLocator::new(
            Arc::new(Isosurface::new(0)),
            Arc::clone(&fx.data_set),
        ));
        locator.on_motion(&device_at(1.0, 1.0, 1.0), &mut fx.ctx());
        locator.on_press(&mut fx.ctx());
        locator.teardown(&mut fx.ctx());
        assert!(fx.finished.is_empty());
    }
}
