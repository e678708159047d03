//! Data modules: loaders for one kind of data set plus the extraction
//! algorithms that work on it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::algorithm::{Algorithm, AlgorithmKind, ArrowRake, Isosurface, OrthogonalSlice, Streamline};
use crate::codec::CodecError;
use crate::dataset::{DataSet, DataSetError, VariableManager};

mod analytic;
mod simple_mcnp;

pub use analytic::AnalyticField;
pub use simple_mcnp::SimpleMcnp;

#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("unknown module class `{name}`{}", did_you_mean(.suggestion))]
    UnknownClass {
        name: String,
        suggestion: Option<String>,
    },
    #[error("{class} expects {expected}")]
    MissingArguments {
        class: &'static str,
        expected: &'static str,
    },
    #[error("{class}: invalid argument `{argument}`: {reason}")]
    InvalidArgument {
        class: &'static str,
        argument: String,
        reason: &'static str,
    },
    #[error("cannot open data file {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed data file: {0}")]
    Format(#[from] CodecError),
    #[error("vertex {vertex:?} does not lie on a rectilinear grid")]
    NotRectilinear { vertex: [usize; 3] },
    #[error(transparent)]
    DataSet(#[from] DataSetError),
}

fn did_you_mean(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|s| format!(" (did you mean `{s}`?)"))
        .unwrap_or_default()
}

pub trait DataModule: Send + Sync {
    fn class_name(&self) -> &'static str;

    /// Loads a data set from the module's command-line arguments.
    fn load(&self, args: &[String]) -> Result<DataSet, ModuleError>;

    fn scalar_algorithm_names(&self) -> &[&'static str];
    fn vector_algorithm_names(&self) -> &[&'static str];

    /// Algorithm bound to the current scalar variable.
    fn create_scalar_algorithm(
        &self,
        index: usize,
        variables: &VariableManager,
    ) -> Option<Arc<dyn Algorithm>>;

    /// Algorithm bound to the current vector variable.
    fn create_vector_algorithm(
        &self,
        index: usize,
        variables: &VariableManager,
    ) -> Option<Arc<dyn Algorithm>>;

    fn num_scalar_algorithms(&self) -> usize {
        self.scalar_algorithm_names().len()
    }

    fn num_vector_algorithms(&self) -> usize {
        self.vector_algorithm_names().len()
    }

    /// Looks `name` up among the scalar algorithms, then the vector
    /// algorithms. On a name present in both lists the scalar one wins.
    fn find_algorithm(
        &self,
        name: &str,
        variables: &VariableManager,
    ) -> Option<(AlgorithmKind, Arc<dyn Algorithm>)> {
        let scalar = self.scalar_algorithm_names().iter().position(|n| *n == name);
        let vector = self.vector_algorithm_names().iter().position(|n| *n == name);
        match (scalar, vector) {
            (Some(index), other) => {
                if other.is_some() {
                    log::warn!(
                        "{}: `{name}` is both a scalar and a vector algorithm, using the scalar one",
                        self.class_name()
                    );
                }
                self.create_scalar_algorithm(index, variables)
                    .map(|algorithm| (AlgorithmKind::Scalar, algorithm))
            }
            (None, Some(index)) => self
                .create_vector_algorithm(index, variables)
                .map(|algorithm| (AlgorithmKind::Vector, algorithm)),
            (None, None) => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Algorithms shared by the grid modules
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) const GRID_SCALAR_ALGORITHMS: &[&str] = &["Isosurface", "Orthogonal Slice"];
pub(crate) const GRID_VECTOR_ALGORITHMS: &[&str] = &["Streamline", "Arrow Rake"];

pub(crate) fn grid_scalar_algorithm(
    index: usize,
    variables: &VariableManager,
) -> Option<Arc<dyn Algorithm>> {
    if variables.num_scalar_variables() == 0 {
        return None;
    }
    let variable = variables.current_scalar_variable();
    match index {
        0 => Some(Arc::new(Isosurface::new(variable))),
        1 => Some(Arc::new(OrthogonalSlice::new(variable, 2))),
        _ => None,
    }
}

pub(crate) fn grid_vector_algorithm(
    index: usize,
    variables: &VariableManager,
) -> Option<Arc<dyn Algorithm>> {
    if variables.num_vector_variables() == 0 {
        return None;
    }
    let variable = variables.current_vector_variable();
    match index {
        0 => Some(Arc::new(Streamline::new(variable))),
        1 => Some(Arc::new(ArrowRake::new(variable))),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Registration entry of a module class.
#[derive(Clone, Copy)]
pub struct ModuleRegistration {
    pub names: &'static [&'static str],
    pub create: fn() -> Box<dyn DataModule>,
}

/// Every built-in module.
pub const REGISTRATIONS: &[ModuleRegistration] = &[
    ModuleRegistration {
        names: &["SimpleMCNP"],
        create: || Box::new(SimpleMcnp::new(false)),
    },
    ModuleRegistration {
        names: &["SimpleMCNPFluxOnly"],
        create: || Box::new(SimpleMcnp::new(true)),
    },
    ModuleRegistration {
        names: &["AnalyticField"],
        create: || Box::new(AnalyticField),
    },
];

/// Resolves module class names, ignoring case and surrounding whitespace.
pub struct ModuleRegistry {
    by_name: HashMap<String, fn() -> Box<dyn DataModule>>,
    class_names: Vec<&'static str>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        for registration in REGISTRATIONS {
            registry.register(*registration);
        }
        registry
    }
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            class_names: Vec::new(),
        }
    }

    pub fn register(&mut self, registration: ModuleRegistration) {
        for &name in registration.names {
            self.by_name.insert(normalize_name(name), registration.create);
            self.class_names.push(name);
        }
    }

    /// Registered class names in registration order.
    #[must_use]
    pub fn class_names(&self) -> &[&'static str] {
        &self.class_names
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn DataModule>, ModuleError> {
        if let Some(create) = self.by_name.get(&normalize_name(name)) {
            return Ok(create());
        }
        Err(ModuleError::UnknownClass {
            name: name.to_string(),
            suggestion: self.closest(name),
        })
    }

    fn closest(&self, name: &str) -> Option<String> {
        let wanted = normalize_name(name);
        self.class_names
            .iter()
            .map(|candidate| {
                (
                    levenshtein::levenshtein(&wanted, &normalize_name(candidate)),
                    candidate,
                )
            })
            .filter(|(distance, _)| *distance <= wanted.len().max(3) / 2)
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, candidate)| (*candidate).to_string())
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}
