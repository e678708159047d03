use std::f64::consts::FRAC_PI_4;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use super::{
    grid_scalar_algorithm, grid_vector_algorithm, DataModule, ModuleError, GRID_SCALAR_ALGORITHMS,
    GRID_VECTOR_ALGORITHMS,
};
use crate::algorithm::Algorithm;
use crate::codec::TokenReader;
use crate::dataset::{DataSet, DataSetError, RectilinearGrid, VariableManager};
use crate::geom::{Point3, Transform};

/// Relative tolerance when checking that vertices form a tensor-product grid.
const GRID_TOLERANCE: f64 = 1e-6;
const MAX_VERTICES: usize = 1 << 26;

/// MCNP tally output in plain text.
///
/// The first line holds the vertex counts `nx ny nz`. Every following line
/// is one vertex, `x y z flux relErr`, with I varying slowest and K fastest.
/// The flux-only variant drops the error column. Positions are placed in the
/// world rotated by 45 degrees around Z and scaled by 0.01.
#[derive(Debug, Clone, Copy)]
pub struct SimpleMcnp {
    flux_only: bool,
}

impl SimpleMcnp {
    #[must_use]
    pub const fn new(flux_only: bool) -> Self {
        Self { flux_only }
    }

    #[must_use]
    pub fn placement() -> Transform {
        Transform::uniform_scale(0.01) * Transform::rotate_z(FRAC_PI_4)
    }

    /// Parses MCNP text from any reader.
    pub fn read(&self, input: impl BufRead) -> Result<DataSet, ModuleError> {
        let mut reader = TokenReader::new(input);
        let dims: [usize; 3] = [
            reader.parse("vertex count along x")?,
            reader.parse("vertex count along y")?,
            reader.parse("vertex count along z")?,
        ];
        if let Some(axis) = dims.iter().position(|&n| n < 2) {
            return Err(DataSetError::DegenerateAxis {
                axis,
                len: dims[axis],
            }
            .into());
        }
        let count = dims
            .iter()
            .try_fold(1usize, |acc, &n| acc.checked_mul(n))
            .filter(|&n| n <= MAX_VERTICES)
            .ok_or_else(|| ModuleError::InvalidArgument {
                class: self.class_name(),
                argument: format!("{} {} {}", dims[0], dims[1], dims[2]),
                reason: "grid has too many vertices",
            })?;

        let mut positions = Vec::with_capacity(count);
        let mut flux = Vec::with_capacity(count);
        let mut errors = Vec::with_capacity(if self.flux_only { 0 } else { count });
        for _ in 0..count {
            positions.push(reader.parse_point()?);
            flux.push(reader.parse("flux")?);
            if !self.flux_only {
                errors.push(reader.parse("relative error")?);
            }
        }

        let grid = rectilinear_grid(dims, &positions)?;
        let mut data_set = DataSet::new(grid, Self::placement())?;
        data_set.add_scalar_variable("Flux", flux)?;
        if !self.flux_only {
            data_set.add_scalar_variable("Relative Error", errors)?;
        }
        Ok(data_set)
    }
}

/// Extracts the axis coordinates and checks every vertex against them.
fn rectilinear_grid(dims: [usize; 3], positions: &[Point3]) -> Result<RectilinearGrid, ModuleError> {
    let [nx, ny, nz] = dims;
    let at = |i: usize, j: usize, k: usize| positions[(i * ny + j) * nz + k];
    let xs: Vec<f64> = (0..nx).map(|i| at(i, 0, 0).x).collect();
    let ys: Vec<f64> = (0..ny).map(|j| at(0, j, 0).y).collect();
    let zs: Vec<f64> = (0..nz).map(|k| at(0, 0, k).z).collect();
    let grid = RectilinearGrid::new(xs, ys, zs)?;

    let scale = grid.bounds().diagonal().max(1.0);
    for i in 0..nx {
        for j in 0..ny {
            for k in 0..nz {
                if at(i, j, k).distance_to(grid.vertex([i, j, k])) > GRID_TOLERANCE * scale {
                    return Err(ModuleError::NotRectilinear { vertex: [i, j, k] });
                }
            }
        }
    }
    Ok(grid)
}

impl DataModule for SimpleMcnp {
    fn class_name(&self) -> &'static str {
        if self.flux_only {
            "SimpleMCNPFluxOnly"
        } else {
            "SimpleMCNP"
        }
    }

    fn load(&self, args: &[String]) -> Result<DataSet, ModuleError> {
        let Some(path) = args.first() else {
            return Err(ModuleError::MissingArguments {
                class: self.class_name(),
                expected: "the name of an MCNP output file",
            });
        };
        let file = File::open(Path::new(path)).map_err(|source| ModuleError::Open {
            path: path.clone(),
            source,
        })?;
        self.read(BufReader::new(file))
    }

    fn scalar_algorithm_names(&self) -> &[&'static str] {
        GRID_SCALAR_ALGORITHMS
    }

    fn vector_algorithm_names(&self) -> &[&'static str] {
        GRID_VECTOR_ALGORITHMS
    }

    fn create_scalar_algorithm(
        &self,
        index: usize,
        variables: &VariableManager,
    ) -> Option<Arc<dyn Algorithm>> {
        grid_scalar_algorithm(index, variables)
    }

    fn create_vector_algorithm(
        &self,
        index: usize,
        variables: &VariableManager,
    ) -> Option<Arc<dyn Algorithm>> {
        grid_vector_algorithm(index, variables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mcnp_text(flux_only: bool) -> String {
        let mut text = String::from("2 2 3\n");
        for x in [0.0, 10.0] {
            for y in [0.0, 5.0] {
                for z in [-1.0, 0.0, 1.0] {
                    let flux = x + y + z;
                    if flux_only {
                        text.push_str(&format!("{x} {y} {z} {flux}\n"));
                    } else {
                        text.push_str(&format!("{x} {y} {z} {flux} 0.05\n"));
                    }
                }
            }
        }
        text
    }

    #[test]
    fn reads_flux_and_error_variables() {
        let ds = SimpleMcnp::new(false).read(mcnp_text(false).as_bytes()).expect("load");
        assert_eq!(ds.grid().dims(), [2, 2, 3]);
        let names: Vec<_> = ds.scalar_variables().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["Flux", "Relative Error"]);
        assert_eq!(ds.scalar_variables()[0].values()[5], 5.0 + 1.0);
        assert!(ds.vector_variables().is_empty());
    }

    #[test]
    fn vertices_are_rotated_and_scaled_into_the_world() {
        let ds = SimpleMcnp::new(true).read(mcnp_text(true).as_bytes()).expect("load");
        assert_eq!(ds.scalar_variables().len(), 1);
        let p = ds.vertex_position([1, 0, 2]);
        let s = FRAC_PI_4.sin();
        assert!((p.x - 0.1 * s).abs() < 1e-12);
        assert!((p.y - 0.1 * s).abs() < 1e-12);
        assert!((p.z - 0.01).abs() < 1e-12);
    }

    #[test]
    fn truncated_file_is_a_format_error() {
        let text = "2 2 2\n0 0 0 1.0 0.1\n";
        match SimpleMcnp::new(false).read(text.as_bytes()) {
            Err(ModuleError::Format(_)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn scattered_vertices_are_rejected() {
        let text = mcnp_text(true).replacen("10 5 1 16", "10 5.5 1 16", 1);
        match SimpleMcnp::new(true).read(text.as_bytes()) {
            Err(ModuleError::NotRectilinear { vertex: [1, 1, 2] }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn load_without_arguments_fails() {
        match SimpleMcnp::new(false).load(&[]) {
            Err(ModuleError::MissingArguments { class: "SimpleMCNP", .. }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
