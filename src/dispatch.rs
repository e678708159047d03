//! Binding new tools to locators.
//!
//! The algorithm menu is one flat list: the cutting plane, the scalar
//! evaluator, the module's scalar algorithms, the vector evaluator and the
//! module's vector algorithms. [`AlgorithmPartition`] holds the boundaries of
//! that list and decides which kind of locator a selected index creates.

use std::sync::Arc;

use serde::Serialize;

use crate::algorithm::AlgorithmKind;
use crate::cluster::Role;
use crate::dataset::{DataSet, VariableManager};
use crate::locator::{
    EvaluationKind, EvaluationLocator, ExtractorLocator, Locator, LocatorContext, PlaneLocator,
};
use crate::module::DataModule;
use crate::pool::CuttingPlanePool;

pub const CUTTING_PLANE_LABEL: &str = "Cutting Plane";
pub const EVALUATE_SCALARS_LABEL: &str = "Evaluate Scalars";
pub const EVALUATE_VECTORS_LABEL: &str = "Evaluate Vectors";

/// What a tool created with a given menu index turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LocatorKind {
    CuttingPlane,
    Evaluation(EvaluationKind),
    Extractor { kind: AlgorithmKind, index: usize },
}

/// Boundaries of the flat algorithm index space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlgorithmPartition {
    first_scalar: usize,
    num_scalar: usize,
    first_vector: usize,
    num_vector: usize,
    labels: Vec<String>,
}

impl AlgorithmPartition {
    /// Builds the menu for a module and data set.
    ///
    /// The scalar section only exists when the data set has scalar
    /// variables, the vector section only when it has vector variables.
    /// A missing section leaves its boundary at 0 and contributes no
    /// algorithms.
    #[must_use]
    pub fn from_menu(
        variables: &VariableManager,
        scalar_algorithms: &[&str],
        vector_algorithms: &[&str],
    ) -> Self {
        let mut labels = vec![CUTTING_PLANE_LABEL.to_string()];
        let (mut first_scalar, mut num_scalar) = (0, 0);
        let (mut first_vector, mut num_vector) = (0, 0);

        if variables.num_scalar_variables() > 0 {
            labels.push(EVALUATE_SCALARS_LABEL.to_string());
            first_scalar = labels.len();
            num_scalar = scalar_algorithms.len();
            labels.extend(scalar_algorithms.iter().map(ToString::to_string));
        }
        if variables.num_vector_variables() > 0 {
            labels.push(EVALUATE_VECTORS_LABEL.to_string());
            first_vector = labels.len();
            num_vector = vector_algorithms.len();
            labels.extend(vector_algorithms.iter().map(ToString::to_string));
        }

        Self {
            first_scalar,
            num_scalar,
            first_vector,
            num_vector,
            labels,
        }
    }

    /// Partition from explicit boundaries, with placeholder labels.
    #[must_use]
    pub fn from_boundaries(
        first_scalar: usize,
        num_scalar: usize,
        first_vector: usize,
        num_vector: usize,
    ) -> Self {
        let mut partition = Self {
            first_scalar,
            num_scalar,
            first_vector,
            num_vector,
            labels: Vec::new(),
        };
        let len = (first_scalar + num_scalar).max(first_vector + num_vector).max(1);
        partition.labels = (0..len)
            .map(|index| match partition.classify(index) {
                LocatorKind::CuttingPlane => CUTTING_PLANE_LABEL.to_string(),
                LocatorKind::Evaluation(EvaluationKind::Scalar) => EVALUATE_SCALARS_LABEL.to_string(),
                LocatorKind::Evaluation(EvaluationKind::Vector) => EVALUATE_VECTORS_LABEL.to_string(),
                LocatorKind::Extractor { kind, index } => format!("{kind:?} algorithm {index}"),
            })
            .collect();
        partition
    }

    /// Applies the dispatch rules in order.
    #[must_use]
    pub fn classify(&self, index: usize) -> LocatorKind {
        let scalar_end = self.first_scalar + self.num_scalar;
        if index == 0 {
            LocatorKind::CuttingPlane
        } else if index < self.first_scalar {
            LocatorKind::Evaluation(EvaluationKind::Scalar)
        } else if index < scalar_end {
            LocatorKind::Extractor {
                kind: AlgorithmKind::Scalar,
                index: index - self.first_scalar,
            }
        } else if index < self.first_vector {
            LocatorKind::Evaluation(EvaluationKind::Vector)
        } else {
            LocatorKind::Extractor {
                kind: AlgorithmKind::Vector,
                index: index - self.first_vector,
            }
        }
    }

    #[must_use]
    pub const fn first_scalar_algorithm_index(&self) -> usize {
        self.first_scalar
    }

    #[must_use]
    pub const fn first_vector_algorithm_index(&self) -> usize {
        self.first_vector
    }

    #[must_use]
    pub const fn num_scalar_algorithms(&self) -> usize {
        self.num_scalar
    }

    #[must_use]
    pub const fn num_vector_algorithms(&self) -> usize {
        self.num_vector
    }

    /// Index of the "Evaluate Vectors" entry, if the menu has one.
    #[must_use]
    pub fn vector_evaluate_index(&self) -> Option<usize> {
        let scalar_end = (self.first_scalar + self.num_scalar).max(1);
        (self.first_vector > scalar_end).then(|| self.first_vector - 1)
    }

    /// Menu labels in index order.
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Whether `index` names a menu entry.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        index < self.labels.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────────────────────────────────────

pub type ToolId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Tracks a 6-DOF device and has a button.
    Locator,
    /// Any other tool; ignored by the dispatcher.
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tool {
    pub id: ToolId,
    pub kind: ToolKind,
}

/// Everything needed to build a locator.
pub struct DispatchContext<'a> {
    pub cutting_planes: &'a mut CuttingPlanePool,
    pub module: &'a dyn DataModule,
    pub variables: &'a VariableManager,
    pub data_set: &'a Arc<DataSet>,
    /// Slaves get extractors that leave the work to the master.
    pub role: Role,
}

/// Owns the locators of all live tools.
///
/// Plane locators hold cutting plane slots of a pool the dispatcher does not
/// own. Call [`ToolDispatcher::clear`] before dropping it, or the slots stay
/// allocated for as long as the pool lives. [`crate::Session`] does this on
/// drop.
#[derive(Default)]
pub struct ToolDispatcher {
    locators: Vec<(ToolId, Locator)>,
}

impl ToolDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the locator for a new tool. Returns the kind that was created,
    /// or `None` when the tool does not take part or the module cannot
    /// provide the selected algorithm.
    pub fn on_tool_created(
        &mut self,
        tool: Tool,
        selected: usize,
        partition: &AlgorithmPartition,
        ctx: &mut DispatchContext<'_>,
    ) -> Option<LocatorKind> {
        if tool.kind != ToolKind::Locator {
            return None;
        }
        let kind = partition.classify(selected);
        log::debug!("tool {}: algorithm {selected} -> {kind:?}", tool.id);
        let locator = match kind {
            LocatorKind::CuttingPlane => Locator::Plane(PlaneLocator::new(ctx.cutting_planes)),
            LocatorKind::Evaluation(kind) => Locator::Evaluation(EvaluationLocator::new(kind)),
            LocatorKind::Extractor { kind, index } => {
                let algorithm = match kind {
                    AlgorithmKind::Scalar => ctx.module.create_scalar_algorithm(index, ctx.variables),
                    AlgorithmKind::Vector => ctx.module.create_vector_algorithm(index, ctx.variables),
                };
                let Some(algorithm) = algorithm else {
                    log::warn!("{} has no {kind:?} algorithm {index}", ctx.module.class_name());
                    return None;
                };
                let data_set = Arc::clone(ctx.data_set);
                Locator::Extractor(match ctx.role {
                    Role::Master => ExtractorLocator::new(algorithm, data_set),
                    Role::Slave => ExtractorLocator::mirrored(algorithm, data_set),
                })
            }
        };
        self.locators.push((tool.id, locator));
        Some(kind)
    }

    /// Removes and tears down the locator of `tool`. Returns `false` when the
    /// tool has no locator.
    pub fn on_tool_destroyed(&mut self, tool: Tool, ctx: &mut LocatorContext<'_>) -> bool {
        let Some(position) = self.locators.iter().position(|(id, _)| *id == tool.id) else {
            return false;
        };
        let (_, locator) = self.locators.remove(position);
        locator.teardown(ctx);
        true
    }

    #[must_use]
    pub fn locator(&self, tool: ToolId) -> Option<&Locator> {
        self.locators
            .iter()
            .find(|(id, _)| *id == tool)
            .map(|(_, locator)| locator)
    }

    pub fn locator_mut(&mut self, tool: ToolId) -> Option<&mut Locator> {
        self.locators
            .iter_mut()
            .find(|(id, _)| *id == tool)
            .map(|(_, locator)| locator)
    }

    pub fn locators(&self) -> impl Iterator<Item = &Locator> {
        self.locators.iter().map(|(_, locator)| locator)
    }

    pub fn locators_mut(&mut self) -> impl Iterator<Item = &mut Locator> {
        self.locators.iter_mut().map(|(_, locator)| locator)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.locators.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locators.is_empty()
    }

    /// Cutting plane slots held by plane locators.
    #[must_use]
    pub fn held_cutting_planes(&self) -> usize {
        self.locators
            .iter()
            .filter(|(_, locator)| matches!(locator, Locator::Plane(plane) if plane.slot_index().is_some()))
            .count()
    }

    /// Tears down every locator, as on shutdown.
    pub fn clear(&mut self, ctx: &mut LocatorContext<'_>) {
        for (_, locator) in self.locators.drain(..) {
            locator.teardown(ctx);
        }
    }
}

impl Drop for ToolDispatcher {
    fn drop(&mut self) {
        let held = self.held_cutting_planes();
        if held > 0 {
            log::warn!("tool dispatcher dropped without clear: {held} cutting plane slot(s) stay allocated");
        }
    }
}
