use std::any::Any;
use std::io::{self, Read, Write};

use super::{
    downcast, read_index, read_point_line, read_scalar_variable, write_index, write_point_line,
    write_scalar_variable, Algorithm, ExtractionError, Parameters, ProgressSink,
};
use crate::codec::{self, CodecError, CodecResult, TokenReader};
use crate::dataset::{DataSet, VariableManager};
use crate::element::Geometry;
use crate::geom::Point3;

const NAME: &str = "Orthogonal Slice";

#[derive(Debug, Clone, PartialEq)]
pub struct SliceParameters {
    pub variable: usize,
    /// Grid axis the slice is perpendicular to (0 = I, 1 = J, 2 = K).
    pub axis: usize,
    /// Data-space coordinate along `axis`.
    pub position: f64,
    pub seed: Point3,
}

impl Parameters for SliceParameters {
    fn write_ascii(&self, out: &mut dyn Write, variables: &VariableManager) -> io::Result<()> {
        write_scalar_variable(out, variables, self.variable)?;
        writeln!(out, "sliceAxis {}", self.axis)?;
        writeln!(out, "slicePosition {}", self.position)?;
        write_point_line(out, "seedPoint", self.seed)
    }

    fn read_ascii(
        &mut self,
        input: &mut TokenReader<'_>,
        variables: &VariableManager,
    ) -> CodecResult<()> {
        self.variable = read_scalar_variable(input, variables)?;
        input.expect_keyword("sliceAxis")?;
        let axis: usize = input.parse("slice axis")?;
        if axis > 2 {
            return Err(CodecError::Unexpected {
                line: input.line(),
                expected: "slice axis 0, 1 or 2".to_string(),
                found: axis.to_string(),
            });
        }
        self.axis = axis;
        input.expect_keyword("slicePosition")?;
        self.position = input.parse("slice position")?;
        self.seed = read_point_line(input, "seedPoint")?;
        Ok(())
    }

    fn write_binary(&self, out: &mut dyn Write) -> io::Result<()> {
        write_index(out, self.variable)?;
        write_index(out, self.axis)?;
        codec::write_f64(out, self.position)?;
        codec::write_point(out, self.seed)
    }

    fn read_binary(&mut self, input: &mut dyn Read) -> CodecResult<()> {
        self.variable = read_index(input)?;
        self.axis = read_index(input)?.min(2);
        self.position = codec::read_f64(input)?;
        self.seed = codec::read_point(input)?;
        Ok(())
    }

    fn seed(&self) -> Point3 {
        self.seed
    }

    fn clone_box(&self) -> Box<dyn Parameters> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Axis-aligned slice of the grid through the seed point.
#[derive(Debug, Clone, Copy)]
pub struct OrthogonalSlice {
    variable: usize,
    axis: usize,
}

impl OrthogonalSlice {
    #[must_use]
    pub const fn new(variable: usize, axis: usize) -> Self {
        Self { variable, axis }
    }
}

impl Algorithm for OrthogonalSlice {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_incremental(&self) -> bool {
        false
    }

    fn default_parameters(&self) -> Box<dyn Parameters> {
        Box::new(SliceParameters {
            variable: self.variable,
            axis: self.axis,
            position: 0.0,
            seed: Point3::ORIGIN,
        })
    }

    fn seed_parameters(&self, data_set: &DataSet, seed: Point3) -> Option<Box<dyn Parameters>> {
        data_set.locate(seed)?;
        let local = data_set.world_to_data(seed);
        Some(Box::new(SliceParameters {
            variable: self.variable,
            axis: self.axis,
            position: local.to_array()[self.axis],
            seed,
        }))
    }

    fn extract(
        &self,
        data_set: &DataSet,
        parameters: &dyn Parameters,
        progress: &mut dyn ProgressSink,
    ) -> Result<Geometry, ExtractionError> {
        let params = downcast::<SliceParameters>(parameters, NAME)?;
        if data_set.scalar_variables().get(params.variable).is_none() {
            return Err(ExtractionError::UnknownVariable {
                algorithm: NAME,
                index: params.variable,
            });
        }
        let grid = data_set.grid();
        let axis_coords = grid.axis(params.axis);
        let (lo, hi) = (axis_coords[0], axis_coords[axis_coords.len() - 1]);
        if !(lo..=hi).contains(&params.position) {
            return Err(ExtractionError::SeedOutsideDomain { seed: params.seed });
        }

        let (u_axis, v_axis) = match params.axis {
            0 => (1, 2),
            1 => (0, 2),
            _ => (0, 1),
        };
        let us = grid.axis(u_axis);
        let vs = grid.axis(v_axis);
        let mut vertices = Vec::with_capacity(us.len() * vs.len());
        for &u in us {
            for &v in vs {
                let mut local = [0.0; 3];
                local[params.axis] = params.position;
                local[u_axis] = u;
                local[v_axis] = v;
                vertices.push(data_set.to_world().apply_point(Point3::from_array(local)));
            }
        }

        let row = vs.len() as u32;
        let mut triangles = Vec::with_capacity(2 * (us.len() - 1) * (vs.len() - 1));
        for a in 0..(us.len() - 1) as u32 {
            for b in 0..row - 1 {
                let p00 = a * row + b;
                let p01 = p00 + 1;
                let p10 = p00 + row;
                let p11 = p10 + 1;
                triangles.push([p00, p10, p11]);
                triangles.push([p00, p11, p01]);
            }
        }
        progress.report(100.0);
        Ok(Geometry::Triangles {
            vertices,
            triangles,
        })
    }
}
