use std::sync::Arc;

use super::{DrawCommand, DrawList, LocatorContext, RenderPass};
use crate::algorithm::{Algorithm, ExtractionError};
use crate::dataset::DataSet;
use crate::extraction::{ExtractionDriver, Launch, SessionState};
use crate::geom::{Point3, Transform};

/// Runs one extraction algorithm seeded at the tool position.
///
/// Pressing starts a run. While the button is held, incremental algorithms
/// restart at every motion; releasing lets the last run finish early and
/// keeps its partial result.
pub struct ExtractorLocator {
    driver: ExtractionDriver,
    point: Point3,
    has_point: bool,
    dragging: bool,
    runs_locally: bool,
}

impl ExtractorLocator {
    #[must_use]
    pub fn new(algorithm: Arc<dyn Algorithm>, data_set: Arc<DataSet>) -> Self {
        Self {
            driver: ExtractionDriver::new(algorithm, data_set),
            point: Point3::ORIGIN,
            has_point: false,
            dragging: false,
            runs_locally: true,
        }
    }

    /// Locator of a cluster slave. It follows the tool and draws it, but
    /// never starts the algorithm: the master's elements arrive through the
    /// cluster pipe.
    #[must_use]
    pub fn mirrored(algorithm: Arc<dyn Algorithm>, data_set: Arc<DataSet>) -> Self {
        Self {
            runs_locally: false,
            ..Self::new(algorithm, data_set)
        }
    }

    #[must_use]
    pub const fn runs_locally(&self) -> bool {
        self.runs_locally
    }

    #[must_use]
    pub fn algorithm_name(&self) -> &'static str {
        self.driver.algorithm().name()
    }

    #[must_use]
    pub const fn driver(&self) -> &ExtractionDriver {
        &self.driver
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.driver.state()
    }

    #[must_use]
    pub const fn is_dragging(&self) -> bool {
        self.dragging
    }

    pub(crate) fn on_motion(&mut self, device: &Transform, ctx: &mut LocatorContext<'_>) {
        self.point = device.origin();
        self.has_point = true;
        if self.dragging && self.driver.algorithm().is_incremental() {
            self.start(ctx);
            self.driver.mark_dragging();
        }
    }

    pub(crate) fn on_press(&mut self, ctx: &mut LocatorContext<'_>) {
        self.dragging = true;
        if self.has_point {
            self.start(ctx);
        }
    }

    pub(crate) fn on_release(&mut self) {
        self.dragging = false;
        self.driver.finish();
    }

    pub(crate) fn update(&mut self, ctx: &mut LocatorContext<'_>) {
        if let Some(element) = self.driver.poll() {
            ctx.finished.push(element);
        }
    }

    fn start(&mut self, ctx: &mut LocatorContext<'_>) {
        if !self.runs_locally {
            crate::debug_log!("{}: left to the master at {:?}", self.algorithm_name(), self.point);
            return;
        }
        match self.driver.begin(self.point) {
            Ok(Launch::Finished(element)) => ctx.finished.push(element),
            Ok(Launch::Started { .. }) => {}
            Err(ExtractionError::SeedOutsideDomain { seed }) => {
                log::debug!("{}: seed {seed:?} is outside the data set", self.algorithm_name());
            }
            Err(err) => log::warn!("{}: {err}", self.algorithm_name()),
        }
    }

    pub(crate) fn render(&self, pass: RenderPass, list: &mut DrawList) {
        if !self.has_point {
            return;
        }
        match pass {
            RenderPass::Highlight => list.push(pass, DrawCommand::Marker { position: self.point }),
            RenderPass::Opaque => {
                if let Some(session) = self.driver.session().filter(|_| self.driver.is_running()) {
                    list.push(
                        pass,
                        DrawCommand::Progress {
                            position: self.point,
                            percent: session.completion(),
                        },
                    );
                }
            }
            RenderPass::Transparent => {}
        }
    }

    pub(crate) fn teardown(mut self) {
        self.driver.cancel();
    }
}
