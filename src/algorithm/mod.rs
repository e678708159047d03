//! Extraction algorithms and their parameter blocks.
//!
//! An [`Algorithm`] turns a seed point into [`Parameters`] and parameters into
//! [`Geometry`]. Parameters travel through element files and the cluster pipe,
//! so every parameter type knows its ASCII and binary forms.

use std::any::Any;
use std::fmt;
use std::io::{self, Read, Write};

use crate::codec::{self, CodecError, CodecResult, TokenReader};
use crate::dataset::{DataSet, VariableManager};
use crate::element::{Element, Geometry};
use crate::geom::Point3;

mod arrow_rake;
mod isosurface;
mod slice;
mod streamline;

pub use arrow_rake::{ArrowRake, ArrowRakeParameters};
pub use isosurface::{Isosurface, IsosurfaceParameters};
pub use slice::{OrthogonalSlice, SliceParameters};
pub use streamline::{Streamline, StreamlineParameters};

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("seed point {seed:?} lies outside the data set")]
    SeedOutsideDomain { seed: Point3 },
    #[error("{algorithm} received parameters of another algorithm")]
    ParameterMismatch { algorithm: &'static str },
    #[error("{algorithm} refers to missing variable {index}")]
    UnknownVariable {
        algorithm: &'static str,
        index: usize,
    },
    #[error("no worker thread available for {algorithm}")]
    WorkerUnavailable { algorithm: &'static str },
}

/// Extraction parameters of one algorithm.
pub trait Parameters: Any + Send + Sync + fmt::Debug {
    fn write_ascii(&self, out: &mut dyn Write, variables: &VariableManager) -> io::Result<()>;
    fn read_ascii(
        &mut self,
        input: &mut TokenReader<'_>,
        variables: &VariableManager,
    ) -> CodecResult<()>;
    fn write_binary(&self, out: &mut dyn Write) -> io::Result<()>;
    fn read_binary(&mut self, input: &mut dyn Read) -> CodecResult<()>;
    fn seed(&self) -> Point3;
    fn clone_box(&self) -> Box<dyn Parameters>;
    fn as_any(&self) -> &dyn Any;
}

impl Clone for Box<dyn Parameters> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Receives completion percentages from a running extraction.
pub trait ProgressSink {
    fn report(&mut self, percent: f32);

    /// Incremental algorithms poll this and return what they have so far
    /// once it turns true.
    fn should_stop(&self) -> bool {
        false
    }
}

/// Sink for synchronous runs that nobody watches.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _percent: f32) {}
}

pub trait Algorithm: Send + Sync {
    fn name(&self) -> &'static str;

    /// Incremental algorithms run in the background and report progress.
    fn is_incremental(&self) -> bool;

    /// Blank parameters to deserialize into.
    fn default_parameters(&self) -> Box<dyn Parameters>;

    /// Parameters seeded at a world-space point, `None` outside the domain.
    fn seed_parameters(&self, data_set: &DataSet, seed: Point3) -> Option<Box<dyn Parameters>>;

    fn extract(
        &self,
        data_set: &DataSet,
        parameters: &dyn Parameters,
        progress: &mut dyn ProgressSink,
    ) -> Result<Geometry, ExtractionError>;

    fn create_element(
        &self,
        data_set: &DataSet,
        parameters: Box<dyn Parameters>,
        progress: &mut dyn ProgressSink,
    ) -> Result<Element, ExtractionError> {
        let geometry = self.extract(data_set, parameters.as_ref(), progress)?;
        Ok(Element::new(self.name(), parameters, geometry))
    }

    /// Element shell a slave fills from the master's stream.
    fn start_slave_element(&self, parameters: Box<dyn Parameters>) -> Element {
        Element::new(self.name(), parameters, Geometry::Empty)
    }

    fn continue_slave_element(&self, element: &mut Element, input: &mut dyn Read) -> CodecResult<()> {
        element.set_geometry(Geometry::read_binary(input)?);
        Ok(())
    }
}

/// Which module list an algorithm comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum AlgorithmKind {
    Scalar,
    Vector,
}

pub(crate) fn downcast<'a, P: Parameters>(
    parameters: &'a dyn Parameters,
    algorithm: &'static str,
) -> Result<&'a P, ExtractionError> {
    parameters
        .as_any()
        .downcast_ref::<P>()
        .ok_or(ExtractionError::ParameterMismatch { algorithm })
}

pub(crate) fn write_scalar_variable(
    out: &mut dyn Write,
    variables: &VariableManager,
    index: usize,
) -> io::Result<()> {
    out.write_all(b"scalarVariable ")?;
    codec::write_token(out, variables.scalar_variable_name(index).unwrap_or_default())?;
    out.write_all(b"\n")
}

pub(crate) fn write_vector_variable(
    out: &mut dyn Write,
    variables: &VariableManager,
    index: usize,
) -> io::Result<()> {
    out.write_all(b"vectorVariable ")?;
    codec::write_token(out, variables.vector_variable_name(index).unwrap_or_default())?;
    out.write_all(b"\n")
}

pub(crate) fn read_scalar_variable(
    input: &mut TokenReader<'_>,
    variables: &VariableManager,
) -> CodecResult<usize> {
    input.expect_keyword("scalarVariable")?;
    let name = input.expect_token("scalar variable name")?;
    variables
        .scalar_variable_index(&name)
        .ok_or_else(|| CodecError::Unexpected {
            line: input.line(),
            expected: "a scalar variable of the data set".to_string(),
            found: name,
        })
}

pub(crate) fn read_vector_variable(
    input: &mut TokenReader<'_>,
    variables: &VariableManager,
) -> CodecResult<usize> {
    input.expect_keyword("vectorVariable")?;
    let name = input.expect_token("vector variable name")?;
    variables
        .vector_variable_index(&name)
        .ok_or_else(|| CodecError::Unexpected {
            line: input.line(),
            expected: "a vector variable of the data set".to_string(),
            found: name,
        })
}

pub(crate) fn write_point_line(out: &mut dyn Write, key: &str, p: Point3) -> io::Result<()> {
    writeln!(out, "{key} {} {} {}", p.x, p.y, p.z)
}

pub(crate) fn read_point_line(input: &mut TokenReader<'_>, key: &'static str) -> CodecResult<Point3> {
    input.expect_keyword(key)?;
    input.parse_point()
}

pub(crate) fn read_index<R: Read + ?Sized>(input: &mut R) -> CodecResult<usize> {
    Ok(codec::read_u32(input)? as usize)
}

pub(crate) fn write_index<W: Write + ?Sized>(out: &mut W, index: usize) -> io::Result<()> {
    codec::write_len(out, index)
}
