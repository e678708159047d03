use std::sync::Arc;

use super::{
    grid_scalar_algorithm, grid_vector_algorithm, DataModule, ModuleError, GRID_SCALAR_ALGORITHMS,
    GRID_VECTOR_ALGORITHMS,
};
use crate::algorithm::Algorithm;
use crate::dataset::{DataSet, RectilinearGrid, VariableManager};
use crate::geom::{BBox, Point3, Transform, Vec3};

const DEFAULT_VERTICES: usize = 16;
const MAX_VERTICES_PER_AXIS: usize = 512;
const DEFAULT_EXTENT: f64 = 1.0;

/// Synthetic field sampled on a uniform grid over `[-extent, extent]³`.
///
/// Arguments: `[vertices [extent]]`. The scalar variable `Radius` is the
/// distance to the origin; the vector variable `Swirl` rotates around Z and
/// climbs slowly. Handy for trying the tools without a data file.
#[derive(Debug, Clone, Copy)]
pub struct AnalyticField;

impl AnalyticField {
    /// Builds the field directly.
    pub fn generate(vertices: usize, extent: f64) -> Result<DataSet, ModuleError> {
        let bounds = BBox::new(
            Point3::new(-extent, -extent, -extent),
            Point3::new(extent, extent, extent),
        );
        let grid = RectilinearGrid::uniform([vertices; 3], bounds)?;
        let [nx, ny, nz] = grid.dims();

        let mut radius = Vec::with_capacity(grid.num_vertices());
        let mut swirl = Vec::with_capacity(grid.num_vertices());
        for i in 0..nx {
            for j in 0..ny {
                for k in 0..nz {
                    let p = grid.vertex([i, j, k]);
                    radius.push(p.to_vec3().length());
                    swirl.push(Vec3::new(-p.y, p.x, 0.2));
                }
            }
        }

        let mut data_set = DataSet::new(grid, Transform::identity())?;
        data_set.add_scalar_variable("Radius", radius)?;
        data_set.add_vector_variable("Swirl", swirl)?;
        Ok(data_set)
    }
}

impl DataModule for AnalyticField {
    fn class_name(&self) -> &'static str {
        "AnalyticField"
    }

    fn load(&self, args: &[String]) -> Result<DataSet, ModuleError> {
        let invalid = |argument: &String, reason| ModuleError::InvalidArgument {
            class: self.class_name(),
            argument: argument.clone(),
            reason,
        };

        let vertices = match args.first() {
            None => DEFAULT_VERTICES,
            Some(arg) => match arg.parse::<usize>() {
                Ok(n) if (2..=MAX_VERTICES_PER_AXIS).contains(&n) => n,
                Ok(_) => return Err(invalid(arg, "vertex count must be between 2 and 512")),
                Err(_) => return Err(invalid(arg, "expected a vertex count")),
            },
        };
        let extent = match args.get(1) {
            None => DEFAULT_EXTENT,
            Some(arg) => match arg.parse::<f64>() {
                Ok(e) if e.is_finite() && e > 0.0 => e,
                _ => return Err(invalid(arg, "expected a positive extent")),
            },
        };
        if args.len() > 2 {
            log::warn!("{}: ignoring {} extra arguments", self.class_name(), args.len() - 2);
        }

        Self::generate(vertices, extent)
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
