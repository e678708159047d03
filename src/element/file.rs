use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use crate::algorithm::Parameters;
use crate::codec::{self, CodecError, TokenReader};
use crate::dataset::VariableManager;

#[derive(Debug, thiserror::Error)]
pub enum ElementFileError {
    #[error("cannot open element file {path}: {source}")]
    Open { path: String, source: io::Error },
    #[error("{path} is neither an .asciielem nor a .binelem file")]
    UnknownFormat { path: String },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed element file: {0}")]
    Format(#[from] CodecError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ElementFileFormat {
    Ascii,
    Binary,
}

impl ElementFileFormat {
    /// Picks the format from a `.asciielem`/`.binelem` extension, ignoring case.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "asciielem" => Some(Self::Ascii),
            "binelem" => Some(Self::Binary),
            _ => None,
        }
    }

    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Ascii => "asciielem",
            Self::Binary => "binelem",
        }
    }
}

/// A stream of `(algorithm name, parameters)` entries read on the master.
pub trait ElementSource {
    /// Next algorithm name, or `None` once the stream is exhausted.
    fn next_name(&mut self) -> Result<Option<String>, ElementFileError>;

    /// Reads the parameters that follow the last name into `parameters`.
    fn read_parameters(
        &mut self,
        parameters: &mut dyn Parameters,
        variables: &VariableManager,
    ) -> Result<(), ElementFileError>;
}

enum Input<'a> {
    Ascii(TokenReader<'a>),
    Binary(Box<dyn BufRead + 'a>),
}

/// Reads saved element files in either format.
pub struct ElementFileReader<'a> {
    input: Input<'a>,
    finished: bool,
}

impl ElementFileReader<'static> {
    pub fn open(path: &Path) -> Result<Self, ElementFileError> {
        let format = ElementFileFormat::from_path(path).ok_or_else(|| ElementFileError::UnknownFormat {
            path: path.display().to_string(),
        })?;
        let file = File::open(path).map_err(|source| ElementFileError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::new(BufReader::new(file), format))
    }
}

impl<'a> ElementFileReader<'a> {
    pub fn new(reader: impl BufRead + 'a, format: ElementFileFormat) -> Self {
        let input = match format {
            ElementFileFormat::Ascii => Input::Ascii(TokenReader::new(reader)),
            ElementFileFormat::Binary => Input::Binary(Box::new(reader)),
        };
        Self {
            input,
            finished: false,
        }
    }

    #[must_use]
    pub const fn format(&self) -> ElementFileFormat {
        match self.input {
            Input::Ascii(_) => ElementFileFormat::Ascii,
            Input::Binary(_) => ElementFileFormat::Binary,
        }
    }
}

impl ElementSource for ElementFileReader<'_> {
    fn next_name(&mut self) -> Result<Option<String>, ElementFileError> {
        if self.finished {
            return Ok(None);
        }
        let name = match &mut self.input {
            // A name cut off by end of file counts as end of file.
            Input::Ascii(reader) => reader.read_line()?.filter(|name| !name.is_empty()),
            Input::Binary(reader) => {
                if reader.fill_buf()?.is_empty() {
                    None
                } else {
                    let length = codec::read_len(reader, "element name", codec::MAX_STRING_LENGTH)?;
                    if length == 0 {
                        None
                    } else {
                        Some(codec::read_bytes_as_string(reader, length, "element name")?)
                    }
                }
            }
        };
        self.finished = name.is_none();
        Ok(name)
    }

    fn read_parameters(
        &mut self,
        parameters: &mut dyn Parameters,
        variables: &VariableManager,
    ) -> Result<(), ElementFileError> {
        match &mut self.input {
            Input::Ascii(reader) => parameters.read_ascii(reader, variables)?,
            Input::Binary(reader) => parameters.read_binary(reader)?,
        }
        Ok(())
    }
}
