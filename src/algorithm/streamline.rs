use std::any::Any;
use std::io::{self, Read, Write};

use super::{
    downcast, read_index, read_point_line, read_vector_variable, write_index, write_point_line,
    write_vector_variable, Algorithm, ExtractionError, Parameters, ProgressSink,
};
use crate::codec::{self, CodecResult, TokenReader};
use crate::dataset::{DataSet, VariableManager};
use crate::element::Geometry;
use crate::geom::Point3;

const NAME: &str = "Streamline";
const REPORT_INTERVAL: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct StreamlineParameters {
    pub variable: usize,
    pub seed: Point3,
    /// World-space arc length per integration step.
    pub step_size: f64,
    pub max_steps: usize,
}

impl Parameters for StreamlineParameters {
    fn write_ascii(&self, out: &mut dyn Write, variables: &VariableManager) -> io::Result<()> {
        write_vector_variable(out, variables, self.variable)?;
        write_point_line(out, "seedPoint", self.seed)?;
        writeln!(out, "stepSize {}", self.step_size)?;
        writeln!(out, "maxNumSteps {}", self.max_steps)
    }

    fn read_ascii(
        &mut self,
        input: &mut TokenReader<'_>,
        variables: &VariableManager,
    ) -> CodecResult<()> {
        self.variable = read_vector_variable(input, variables)?;
        self.seed = read_point_line(input, "seedPoint")?;
        input.expect_keyword("stepSize")?;
        self.step_size = input.parse("step size")?;
        input.expect_keyword("maxNumSteps")?;
        self.max_steps = input.parse("maximum number of steps")?;
        Ok(())
    }

    fn write_binary(&self, out: &mut dyn Write) -> io::Result<()> {
        write_index(out, self.variable)?;
        codec::write_point(out, self.seed)?;
        codec::write_f64(out, self.step_size)?;
        write_index(out, self.max_steps)
    }

    fn read_binary(&mut self, input: &mut dyn Read) -> CodecResult<()> {
        self.variable = read_index(input)?;
        self.seed = codec::read_point(input)?;
        self.step_size = codec::read_f64(input)?;
        self.max_steps = read_index(input)?;
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

/// Streamline traced downstream from the seed with midpoint (RK2) steps of
/// constant arc length.
#[derive(Debug, Clone, Copy)]
pub struct Streamline {
    variable: usize,
    max_steps: usize,
}

impl Streamline {
    #[must_use]
    pub const fn new(variable: usize) -> Self {
        Self {
            variable,
            max_steps: 2000,
        }
    }

    /// A quarter of the smallest world-space cell edge.
    fn default_step(data_set: &DataSet) -> f64 {
        let origin = data_set.vertex_position([0, 0, 0]);
        let edges = [
            data_set.vertex_position([1, 0, 0]),
            data_set.vertex_position([0, 1, 0]),
            data_set.vertex_position([0, 0, 1]),
        ];
        let smallest = edges
            .iter()
            .map(|p| p.distance_to(origin))
            .fold(f64::INFINITY, f64::min);
        if smallest.is_finite() && smallest > 0.0 {
            smallest * 0.25
        } else {
            1e-3
        }
    }
}

impl Algorithm for Streamline {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_incremental(&self) -> bool {
        true
    }

    fn default_parameters(&self) -> Box<dyn Parameters> {
        Box::new(StreamlineParameters {
            variable: self.variable,
            seed: Point3::ORIGIN,
            step_size: 1e-3,
            max_steps: self.max_steps,
        })
    }

    fn seed_parameters(&self, data_set: &DataSet, seed: Point3) -> Option<Box<dyn Parameters>> {
        let sample = data_set.locate(seed)?;
        data_set.vector(self.variable, &sample)?;
        Some(Box::new(StreamlineParameters {
            variable: self.variable,
            seed,
            step_size: Self::default_step(data_set),
            max_steps: self.max_steps,
        }))
    }

    fn extract(
        &self,
        data_set: &DataSet,
        parameters: &dyn Parameters,
        progress: &mut dyn ProgressSink,
    ) -> Result<Geometry, ExtractionError> {
        let params = downcast::<StreamlineParameters>(parameters, NAME)?;
        if data_set.vector_variables().get(params.variable).is_none() {
            return Err(ExtractionError::UnknownVariable {
                algorithm: NAME,
                index: params.variable,
            });
        }
        if data_set.locate(params.seed).is_none() {
            return Err(ExtractionError::SeedOutsideDomain { seed: params.seed });
        }

        let direction_at = |p: Point3| {
            let sample = data_set.locate(p)?;
            data_set.vector(params.variable, &sample)?.normalized()
        };

        let mut points = vec![params.seed];
        let mut current = params.seed;
        for step in 1..=params.max_steps {
            let Some(d0) = direction_at(current) else {
                break;
            };
            let Some(d1) = direction_at(current + d0 * (0.5 * params.step_size)) else {
                break;
            };
            current = current + d1 * params.step_size;
            if data_set.locate(current).is_none() {
                break;
            }
            points.push(current);

            if step % REPORT_INTERVAL == 0 {
                progress.report(100.0 * step as f32 / params.max_steps as f32);
                if progress.should_stop() {
                    log::debug!("{NAME}: stopped after {step} steps");
                    break;
                }
            }
        }
        Ok(Geometry::Polyline { points })
    }
}
