use std::any::Any;
use std::io::{self, Read, Write};

use super::{
    downcast, read_index, read_point_line, read_vector_variable, write_index, write_point_line,
    write_vector_variable, Algorithm, ExtractionError, Parameters, ProgressSink,
};
use crate::codec::{self, CodecResult, TokenReader};
use crate::dataset::{DataSet, VariableManager};
use crate::element::{Arrow, Geometry};
use crate::geom::{Point3, Vec3};

const NAME: &str = "Arrow Rake";

#[derive(Debug, Clone, PartialEq)]
pub struct ArrowRakeParameters {
    pub variable: usize,
    /// Rake center.
    pub seed: Point3,
    /// Number of rake points along world X and Y.
    pub size: [usize; 2],
    pub spacing: f64,
}

impl Parameters for ArrowRakeParameters {
    fn write_ascii(&self, out: &mut dyn Write, variables: &VariableManager) -> io::Result<()> {
        write_vector_variable(out, variables, self.variable)?;
        write_point_line(out, "seedPoint", self.seed)?;
        writeln!(out, "rakeSize {} {}", self.size[0], self.size[1])?;
        writeln!(out, "cellSize {}", self.spacing)
    }

    fn read_ascii(
        &mut self,
        input: &mut TokenReader<'_>,
        variables: &VariableManager,
    ) -> CodecResult<()> {
        self.variable = read_vector_variable(input, variables)?;
        self.seed = read_point_line(input, "seedPoint")?;
        input.expect_keyword("rakeSize")?;
        self.size = [input.parse("rake width")?, input.parse("rake height")?];
        input.expect_keyword("cellSize")?;
        self.spacing = input.parse("rake cell size")?;
        Ok(())
    }

    fn write_binary(&self, out: &mut dyn Write) -> io::Result<()> {
        write_index(out, self.variable)?;
        codec::write_point(out, self.seed)?;
        write_index(out, self.size[0])?;
        write_index(out, self.size[1])?;
        codec::write_f64(out, self.spacing)
    }

    fn read_binary(&mut self, input: &mut dyn Read) -> CodecResult<()> {
        self.variable = read_index(input)?;
        self.seed = codec::read_point(input)?;
        self.size = [read_index(input)?, read_index(input)?];
        self.spacing = codec::read_f64(input)?;
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

/// Regular grid of arrows in the world XY plane, centered on the seed.
#[derive(Debug, Clone, Copy)]
pub struct ArrowRake {
    variable: usize,
    size: [usize; 2],
}

impl ArrowRake {
    #[must_use]
    pub const fn new(variable: usize) -> Self {
        Self {
            variable,
            size: [5, 5],
        }
    }
}

impl Algorithm for ArrowRake {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_incremental(&self) -> bool {
        false
    }

    fn default_parameters(&self) -> Box<dyn Parameters> {
        Box::new(ArrowRakeParameters {
            variable: self.variable,
            seed: Point3::ORIGIN,
            size: self.size,
            spacing: 1.0,
        })
    }

    fn seed_parameters(&self, data_set: &DataSet, seed: Point3) -> Option<Box<dyn Parameters>> {
        data_set.locate(seed)?;
        let spacing = data_set.world_bounds().diagonal() / 20.0;
        Some(Box::new(ArrowRakeParameters {
            variable: self.variable,
            seed,
            size: self.size,
            spacing,
        }))
    }

    fn extract(
        &self,
        data_set: &DataSet,
        parameters: &dyn Parameters,
        progress: &mut dyn ProgressSink,
    ) -> Result<Geometry, ExtractionError> {
        let params = downcast::<ArrowRakeParameters>(parameters, NAME)?;
        if data_set.vector_variables().get(params.variable).is_none() {
            return Err(ExtractionError::UnknownVariable {
                algorithm: NAME,
                index: params.variable,
            });
        }

        let [nu, nv] = params.size;
        let half = |n: usize| (n.saturating_sub(1)) as f64 * 0.5;
        let mut arrows = Vec::with_capacity(nu * nv);
        for u in 0..nu {
            for v in 0..nv {
                let offset = Vec3::new(
                    (u as f64 - half(nu)) * params.spacing,
                    (v as f64 - half(nv)) * params.spacing,
                    0.0,
                );
                let base = params.seed + offset;
                let Some(sample) = data_set.locate(base) else {
                    continue;
                };
                if let Some(direction) = data_set.vector(params.variable, &sample) {
                    arrows.push(Arrow { base, direction });
                }
            }
        }
        progress.report(100.0);
        Ok(Geometry::Arrows { arrows })
    }
}
