//! Volumetric data sets: a rectilinear grid placed in world space plus named
//! scalar and vector variables sampled at its vertices.

use std::io::{Read, Write};

use serde::Serialize;

use crate::codec::{self, CodecResult};
use crate::geom::{BBox, Point3, Transform, Vec3};

mod grid;
mod variables;

pub use grid::{CellSample, RectilinearGrid};
pub use variables::{ControlPoint, Palette, PaletteError, VariableManager};

#[derive(Debug, thiserror::Error)]
pub enum DataSetError {
    #[error("grid axis {axis} needs at least two vertices, found {len}")]
    DegenerateAxis { axis: usize, len: usize },
    #[error("grid axis {axis} is not strictly increasing")]
    NonMonotonicAxis { axis: usize },
    #[error("variable `{name}` has {found} values, grid has {expected} vertices")]
    VariableSize {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("data set placement transform is not invertible")]
    SingularTransform,
    #[error("malformed data set stream: {0}")]
    Codec(#[from] codec::CodecError),
}

#[derive(Debug, Clone, Serialize)]
pub struct ScalarVariable {
    pub name: String,
    values: Vec<f64>,
    range: (f64, f64),
}

impl ScalarVariable {
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// `(min, max)` over all finite vertex values.
    #[must_use]
    pub const fn range(&self) -> (f64, f64) {
        self.range
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VectorVariable {
    pub name: String,
    values: Vec<Vec3>,
}

impl VectorVariable {
    #[must_use]
    pub fn values(&self) -> &[Vec3] {
        &self.values
    }
}

/// A located world-space point, reusable for several variables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub position: Point3,
    cell: CellSample,
}

#[derive(Debug, Clone)]
pub struct DataSet {
    grid: RectilinearGrid,
    to_world: Transform,
    to_data: Transform,
    scalars: Vec<ScalarVariable>,
    vectors: Vec<VectorVariable>,
}

impl DataSet {
    pub fn new(grid: RectilinearGrid, to_world: Transform) -> Result<Self, DataSetError> {
        let to_data = to_world.inverse().ok_or(DataSetError::SingularTransform)?;
        Ok(Self {
            grid,
            to_world,
            to_data,
            scalars: Vec::new(),
            vectors: Vec::new(),
        })
    }

    pub fn add_scalar_variable(
        &mut self,
        name: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<usize, DataSetError> {
        let name = name.into();
        self.check_size(&name, values.len())?;
        let range = values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc: Option<(f64, f64)>, v| {
                Some(acc.map_or((v, v), |(lo, hi)| (lo.min(v), hi.max(v))))
            })
            .unwrap_or((0.0, 0.0));
        self.scalars.push(ScalarVariable {
            name,
            values,
            range,
        });
        Ok(self.scalars.len() - 1)
    }

    pub fn add_vector_variable(
        &mut self,
        name: impl Into<String>,
        values: Vec<Vec3>,
    ) -> Result<usize, DataSetError> {
        let name = name.into();
        self.check_size(&name, values.len())?;
        self.vectors.push(VectorVariable { name, values });
        Ok(self.vectors.len() - 1)
    }

    fn check_size(&self, name: &str, found: usize) -> Result<(), DataSetError> {
        let expected = self.grid.num_vertices();
        if found == expected {
            Ok(())
        } else {
            Err(DataSetError::VariableSize {
                name: name.to_string(),
                expected,
                found,
            })
        }
    }

    #[must_use]
    pub const fn grid(&self) -> &RectilinearGrid {
        &self.grid
    }

    #[must_use]
    pub const fn to_world(&self) -> Transform {
        self.to_world
    }

    #[must_use]
    pub fn scalar_variables(&self) -> &[ScalarVariable] {
        &self.scalars
    }

    #[must_use]
    pub fn vector_variables(&self) -> &[VectorVariable] {
        &self.vectors
    }

    /// Maps a world-space point into grid coordinates.
    #[must_use]
    pub fn world_to_data(&self, p: Point3) -> Point3 {
        self.to_data.apply_point(p)
    }

    /// World-space position of a grid vertex.
    #[must_use]
    pub fn vertex_position(&self, ijk: [usize; 3]) -> Point3 {
        self.to_world.apply_point(self.grid.vertex(ijk))
    }

    /// World-space bounding box of the grid's corners.
    #[must_use]
    pub fn world_bounds(&self) -> BBox {
        let b = self.grid.bounds();
        let mut min = Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
        let mut max = Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for n in 0..8 {
            let corner = Point3::new(
                if n & 4 == 0 { b.min.x } else { b.max.x },
                if n & 2 == 0 { b.min.y } else { b.max.y },
                if n & 1 == 0 { b.min.z } else { b.max.z },
            );
            let p = self.to_world.apply_point(corner);
            min = Point3::new(min.x.min(p.x), min.y.min(p.y), min.z.min(p.z));
            max = Point3::new(max.x.max(p.x), max.y.max(p.y), max.z.max(p.z));
        }
        BBox::new(min, max)
    }

    /// Locates a world-space point; `None` outside the grid.
    #[must_use]
    pub fn locate(&self, position: Point3) -> Option<Sample> {
        let cell = self.grid.locate(self.to_data.apply_point(position))?;
        Some(Sample { position, cell })
    }

    #[must_use]
    pub fn scalar(&self, variable: usize, sample: &Sample) -> Option<f64> {
        let values = &self.scalars.get(variable)?.values;
        let value = self
            .grid
            .corner_weights(&sample.cell)
            .iter()
            .map(|&(index, weight)| values[index] * weight)
            .sum::<f64>();
        value.is_finite().then_some(value)
    }

    /// Interpolated vector in world space.
    #[must_use]
    pub fn vector(&self, variable: usize, sample: &Sample) -> Option<Vec3> {
        let values = &self.vectors.get(variable)?.values;
        let value = self
            .grid
            .corner_weights(&sample.cell)
            .iter()
            .fold(Vec3::ZERO, |acc, &(index, weight)| acc + values[index] * weight);
        let world = self.to_world.apply_vec(value);
        world.is_finite().then_some(world)
    }

    /// Serializes the complete data set for broadcasting to cluster slaves.
    pub fn write_binary<W: Write + ?Sized>(&self, out: &mut W) -> std::io::Result<()> {
        for axis in 0..3 {
            let coords = self.grid.axis(axis);
            codec::write_len(out, coords.len())?;
            for &c in coords {
                codec::write_f64(out, c)?;
            }
        }
        for row in self.to_world.rows() {
            for &c in row {
                codec::write_f64(out, c)?;
            }
        }
        codec::write_len(out, self.scalars.len())?;
        for variable in &self.scalars {
            codec::write_string(out, &variable.name)?;
            for &v in &variable.values {
                codec::write_f64(out, v)?;
            }
        }
        codec::write_len(out, self.vectors.len())?;
        for variable in &self.vectors {
            codec::write_string(out, &variable.name)?;
            for &v in &variable.values {
                codec::write_vec(out, v)?;
            }
        }
        Ok(())
    }

    pub fn read_binary<R: Read + ?Sized>(input: &mut R) -> Result<Self, DataSetError> {
        const MAX_AXIS: usize = 1 << 20;
        const MAX_VARIABLES: usize = 1 << 10;

        let mut axes: [Vec<f64>; 3] = Default::default();
        for axis in &mut axes {
            let len = codec::read_len(input, "grid axis", MAX_AXIS)?;
            *axis = (0..len)
                .map(|_| codec::read_f64(input))
                .collect::<CodecResult<_>>()?;
        }
        let [xs, ys, zs] = axes;
        let grid = RectilinearGrid::new(xs, ys, zs)?;

        let mut rows = [[0.0; 4]; 3];
        for row in &mut rows {
            for c in row.iter_mut() {
                *c = codec::read_f64(input)?;
            }
        }
        let mut data_set = Self::new(grid, Transform::from_rows(rows))?;
        let count = data_set.grid.num_vertices();

        let num_scalars = codec::read_len(input, "scalar variables", MAX_VARIABLES)?;
        for _ in 0..num_scalars {
            let name = codec::read_string(input, "variable name")?;
            let values = (0..count)
                .map(|_| codec::read_f64(input))
                .collect::<CodecResult<_>>()?;
            data_set.add_scalar_variable(name, values)?;
        }
        let num_vectors = codec::read_len(input, "vector variables", MAX_VARIABLES)?;
        for _ in 0..num_vectors {
            let name = codec::read_string(input, "variable name")?;
            let values = (0..count)
                .map(|_| codec::read_vec(input))
                .collect::<CodecResult<_>>()?;
            data_set.add_vector_variable(name, values)?;
        }
        Ok(data_set)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;

    use super::*;

    /// 3x3x3 unit-spaced grid with `f = x + 2y + 3z` and a constant +X vector field.
    pub(crate) fn linear_data_set(to_world: Transform) -> DataSet {
        let grid = RectilinearGrid::uniform(
            [3, 3, 3],
            BBox::new(Point3::ORIGIN, Point3::new(2.0, 2.0, 2.0)),
        )
        .expect("grid");
        let mut scalars = Vec::new();
        let mut vectors = Vec::new();
        for i in 0..3 {
            for j in 0..3 {
                for k in 0..3 {
                    let p = grid.vertex([i, j, k]);
                    scalars.push(p.x + 2.0 * p.y + 3.0 * p.z);
                    vectors.push(Vec3::X);
                }
            }
        }
        let mut data_set = DataSet::new(grid, to_world).expect("data set");
        data_set.add_scalar_variable("Linear", scalars).expect("scalar");
        data_set.add_vector_variable("Drift", vectors).expect("vector");
        data_set
    }

    #[test]
    fn trilinear_interpolation_is_exact_for_linear_fields() {
        let ds = linear_data_set(Transform::identity());
        let sample = ds.locate(Point3::new(0.5, 1.25, 1.75)).expect("inside");
        let value = ds.scalar(0, &sample).expect("value");
        assert!((value - (0.5 + 2.5 + 5.25)).abs() < 1e-12);
        assert_eq!(ds.scalar_variables()[0].range(), (0.0, 12.0));
    }

    #[test]
    fn placement_transform_maps_world_points_and_vectors() {
        let to_world = Transform::uniform_scale(0.01) * Transform::rotate_z(std::f64::consts::FRAC_PI_4);
        let ds = linear_data_set(to_world);
        let world = ds.vertex_position([1, 1, 1]);
        let sample = ds.locate(world).expect("inside");
        let value = ds.scalar(0, &sample).expect("value");
        assert!((value - 6.0).abs() < 1e-9);

        let v = ds.vector(0, &sample).expect("vector");
        let expected = to_world.apply_vec(Vec3::X);
        assert!((v - expected).length() < 1e-12);
        assert!(ds.world_bounds().contains_point(world));
    }

    #[test]
    fn outside_points_have_no_sample() {
        let ds = linear_data_set(Transform::identity());
        assert!(ds.locate(Point3::new(-0.1, 0.0, 0.0)).is_none());
    }

    #[test]
    fn rejects_variable_of_wrong_size() {
        let mut ds = linear_data_set(Transform::identity());
        match ds.add_scalar_variable("Short", vec![1.0; 3]) {
            Err(DataSetError::VariableSize { expected: 27, found: 3, .. }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn binary_stream_reproduces_data_set() {
        let ds = linear_data_set(Transform::translate(Vec3::new(1.0, 2.0, 3.0)));
        let mut bytes = Vec::new();
        ds.write_binary(&mut bytes).expect("write");
        let copy = DataSet::read_binary(&mut Cursor::new(bytes)).expect("read");
        assert_eq!(copy.grid(), ds.grid());
        assert_eq!(copy.to_world(), ds.to_world());
        assert_eq!(copy.scalar_variables()[0].values(), ds.scalar_variables()[0].values());
        assert_eq!(copy.vector_variables()[0].name, "Drift");
    }
}
