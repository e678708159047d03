use super::{DrawCommand, DrawList, LocatorContext, RenderPass};
use crate::dataset::{DataSet, VariableManager};
use crate::geom::{Point3, Transform, Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum EvaluationKind {
    Scalar,
    Vector,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EvaluatedValue {
    /// The probe is outside the data set or the value is not finite.
    Invalid,
    Scalar(f64),
    Vector {
        vector: Vec3,
        /// Current scalar variable at the same point, for coloring.
        scalar: Option<f64>,
    },
}

/// Reads the current scalar or vector variable at the tool while the button
/// is held.
#[derive(Debug, Clone)]
pub struct EvaluationLocator {
    kind: EvaluationKind,
    point: Point3,
    has_point: bool,
    dragging: bool,
    value: Option<EvaluatedValue>,
    arrow_scale: f64,
}

impl EvaluationLocator {
    #[must_use]
    pub const fn new(kind: EvaluationKind) -> Self {
        Self {
            kind,
            point: Point3::ORIGIN,
            has_point: false,
            dragging: false,
            value: None,
            arrow_scale: 1.0,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> EvaluationKind {
        self.kind
    }

    #[must_use]
    pub fn point(&self) -> Option<Point3> {
        self.has_point.then_some(self.point)
    }

    #[must_use]
    pub const fn is_dragging(&self) -> bool {
        self.dragging
    }

    /// Last evaluation; `None` before the first press.
    #[must_use]
    pub const fn value(&self) -> Option<EvaluatedValue> {
        self.value
    }

    #[must_use]
    pub const fn arrow_scale(&self) -> f64 {
        self.arrow_scale
    }

    /// Non-positive or non-finite scales are ignored.
    pub fn set_arrow_scale(&mut self, scale: f64) {
        if scale.is_finite() && scale > 0.0 {
            self.arrow_scale = scale;
        }
    }

    /// Adds the evaluated scalar as a control point of the current palette.
    /// Returns `false` when there is no valid scalar value.
    pub fn insert_control_point(&self, variables: &mut VariableManager) -> bool {
        match self.value {
            Some(EvaluatedValue::Scalar(value)) if self.kind == EvaluationKind::Scalar => {
                variables.insert_palette_control_point(value);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn on_motion(&mut self, device: &Transform, ctx: &mut LocatorContext<'_>) {
        self.point = device.origin();
        self.has_point = true;
        if self.dragging {
            self.value = Some(self.evaluate(ctx.data_set, ctx.variables));
        }
    }

    pub(crate) fn on_press(&mut self, ctx: &mut LocatorContext<'_>) {
        self.dragging = true;
        if self.has_point {
            self.value = Some(self.evaluate(ctx.data_set, ctx.variables));
        }
    }

    pub(crate) fn on_release(&mut self) {
        self.dragging = false;
    }

    fn evaluate(&self, data_set: &DataSet, variables: &VariableManager) -> EvaluatedValue {
        let Some(sample) = data_set.locate(self.point) else {
            return EvaluatedValue::Invalid;
        };
        let scalar = data_set.scalar(variables.current_scalar_variable(), &sample);
        match self.kind {
            EvaluationKind::Scalar => scalar.map_or(EvaluatedValue::Invalid, EvaluatedValue::Scalar),
            EvaluationKind::Vector => data_set
                .vector(variables.current_vector_variable(), &sample)
                .map_or(EvaluatedValue::Invalid, |vector| EvaluatedValue::Vector {
                    vector,
                    scalar,
                }),
        }
    }

    pub(crate) fn render(&self, pass: RenderPass, list: &mut DrawList) {
        if !self.has_point {
            return;
        }
        let position = self.point;
        match pass {
            RenderPass::Highlight => list.push(pass, DrawCommand::Marker { position }),
            RenderPass::Opaque => {
                let Some(value) = self.value else {
                    return;
                };
                let command = match (self.kind, value) {
                    (EvaluationKind::Scalar, EvaluatedValue::Scalar(v)) => DrawCommand::ScalarValue {
                        position,
                        value: Some(v),
                    },
                    (EvaluationKind::Scalar, _) => DrawCommand::ScalarValue {
                        position,
                        value: None,
                    },
                    (EvaluationKind::Vector, EvaluatedValue::Vector { vector, scalar }) => {
                        DrawCommand::VectorValue {
                            position,
                            vector: Some(vector),
                            scale: self.arrow_scale,
                            scalar,
                        }
                    }
                    (EvaluationKind::Vector, _) => DrawCommand::VectorValue {
                        position,
                        vector: None,
                        scale: self.arrow_scale,
                        scalar: None,
                    },
                };
                list.push(pass, command);
            }
            RenderPass::Transparent => {}
        }
    }
}
