//! Low-level readers and writers shared by element files, meta-input files
//! and the cluster pipe.
//!
//! Text input is tokenized by [`TokenReader`]: whitespace separates tokens and
//! a double-quoted token may contain whitespace. Binary values are
//! little-endian.

use std::io::{self, BufRead, Read, Write};
use std::str::FromStr;

use crate::geom::{Point3, Vec3};

pub type CodecResult<T> = Result<T, CodecError>;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("unterminated quoted token in input file (line {line})")]
    UnterminatedQuote { line: usize },
    #[error("unexpected end of input while reading {expected}")]
    UnexpectedEof { expected: &'static str },
    #[error("line {line}: expected {expected}, found `{found}`")]
    Unexpected {
        line: usize,
        expected: String,
        found: String,
    },
    #[error("invalid UTF-8 in {what}")]
    InvalidUtf8 { what: &'static str },
    #[error("{what} length {length} exceeds the limit of {limit}")]
    TooLong {
        what: &'static str,
        length: usize,
        limit: usize,
    },
}

/// Upper bound for length-prefixed strings read from untrusted input.
pub const MAX_STRING_LENGTH: usize = 1 << 16;

/// Byte-level tokenizer over a buffered reader.
pub struct TokenReader<'a> {
    inner: Box<dyn BufRead + 'a>,
    line: usize,
}

impl<'a> TokenReader<'a> {
    pub fn new(inner: impl BufRead + 'a) -> Self {
        Self {
            inner: Box::new(inner),
            line: 1,
        }
    }

    /// Current 1-based line number, for diagnostics.
    #[must_use]
    pub const fn line(&self) -> usize {
        self.line
    }

    fn peek(&mut self) -> CodecResult<Option<u8>> {
        Ok(self.inner.fill_buf()?.first().copied())
    }

    fn bump(&mut self) -> CodecResult<Option<u8>> {
        let byte = self.peek()?;
        if let Some(byte) = byte {
            self.inner.consume(1);
            if byte == b'\n' {
                self.line += 1;
            }
        }
        Ok(byte)
    }

    pub fn skip_whitespace(&mut self) -> CodecResult<()> {
        while let Some(byte) = self.peek()? {
            if !byte.is_ascii_whitespace() {
                break;
            }
            self.bump()?;
        }
        Ok(())
    }

    /// Next token, or `None` at end of input. A quoted token may be empty.
    pub fn read_token(&mut self) -> CodecResult<Option<String>> {
        self.skip_whitespace()?;
        let Some(first) = self.peek()? else {
            return Ok(None);
        };

        let mut bytes = Vec::new();
        if first == b'"' {
            let start_line = self.line;
            self.bump()?;
            loop {
                match self.bump()? {
                    Some(b'"') => break,
                    Some(byte) => bytes.push(byte),
                    None => return Err(CodecError::UnterminatedQuote { line: start_line }),
                }
            }
        } else {
            while let Some(byte) = self.peek()? {
                if byte.is_ascii_whitespace() {
                    break;
                }
                bytes.push(byte);
                self.bump()?;
            }
        }

        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| CodecError::InvalidUtf8 { what: "token" })
    }

    /// Next token; end of input is an error.
    pub fn expect_token(&mut self, expected: &'static str) -> CodecResult<String> {
        self.read_token()?
            .ok_or(CodecError::UnexpectedEof { expected })
    }

    /// Consumes a token that must equal `keyword` (ASCII case-insensitive).
    pub fn expect_keyword(&mut self, keyword: &'static str) -> CodecResult<()> {
        let token = self.expect_token(keyword)?;
        if token.eq_ignore_ascii_case(keyword) {
            Ok(())
        } else {
            Err(CodecError::Unexpected {
                line: self.line,
                expected: format!("`{keyword}`"),
                found: token,
            })
        }
    }

    pub fn parse<T: FromStr>(&mut self, expected: &'static str) -> CodecResult<T> {
        let token = self.expect_token(expected)?;
        token.parse().map_err(|_| CodecError::Unexpected {
            line: self.line,
            expected: expected.to_string(),
            found: token,
        })
    }

    pub fn parse_point(&mut self) -> CodecResult<Point3> {
        Ok(Point3::new(
            self.parse("x coordinate")?,
            self.parse("y coordinate")?,
            self.parse("z coordinate")?,
        ))
    }

    /// Skips leading whitespace, then reads up to the end of the line and
    /// strips trailing whitespace.
    ///
    /// Returns `None` when end of input is reached before a line terminator,
    /// so a final unterminated line counts as end of input.
    pub fn read_line(&mut self) -> CodecResult<Option<String>> {
        self.skip_whitespace()?;
        let mut bytes = Vec::new();
        loop {
            match self.bump()? {
                Some(b'\n') => break,
                Some(byte) => bytes.push(byte),
                None => {
                    if !bytes.is_empty() {
                        log::debug!(
                            "ignoring unterminated trailing line {:?}",
                            String::from_utf8_lossy(&bytes)
                        );
                    }
                    return Ok(None);
                }
            }
        }
        while bytes.last().is_some_and(u8::is_ascii_whitespace) {
            bytes.pop();
        }
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| CodecError::InvalidUtf8 { what: "line" })
    }
}

/// Writes a token, quoting it when it is empty or contains whitespace.
pub fn write_token<W: Write + ?Sized>(out: &mut W, token: &str) -> io::Result<()> {
    if token.is_empty() || token.bytes().any(|b| b.is_ascii_whitespace()) {
        write!(out, "\"{token}\"")
    } else {
        out.write_all(token.as_bytes())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Binary helpers
// ─────────────────────────────────────────────────────────────────────────────

pub fn write_u8<W: Write + ?Sized>(out: &mut W, value: u8) -> io::Result<()> {
    out.write_all(&[value])
}

pub fn write_u32<W: Write + ?Sized>(out: &mut W, value: u32) -> io::Result<()> {
    out.write_all(&value.to_le_bytes())
}

pub fn write_f64<W: Write + ?Sized>(out: &mut W, value: f64) -> io::Result<()> {
    out.write_all(&value.to_le_bytes())
}

pub fn write_len<W: Write + ?Sized>(out: &mut W, len: usize) -> io::Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length exceeds u32"))?;
    write_u32(out, len)
}

pub fn write_point<W: Write + ?Sized>(out: &mut W, p: Point3) -> io::Result<()> {
    for c in p.to_array() {
        write_f64(out, c)?;
    }
    Ok(())
}

pub fn write_vec<W: Write + ?Sized>(out: &mut W, v: Vec3) -> io::Result<()> {
    for c in v.to_array() {
        write_f64(out, c)?;
    }
    Ok(())
}

/// `u32` length followed by the raw bytes, without a terminator.
pub fn write_string<W: Write + ?Sized>(out: &mut W, value: &str) -> io::Result<()> {
    write_len(out, value.len())?;
    out.write_all(value.as_bytes())
}

fn read_array<R: Read + ?Sized, const N: usize>(
    input: &mut R,
    expected: &'static str,
) -> CodecResult<[u8; N]> {
    let mut buf = [0u8; N];
    input.read_exact(&mut buf).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => CodecError::UnexpectedEof { expected },
        _ => CodecError::Io(err),
    })?;
    Ok(buf)
}

pub fn read_u8<R: Read + ?Sized>(input: &mut R) -> CodecResult<u8> {
    Ok(read_array::<R, 1>(input, "u8")?[0])
}

pub fn read_u32<R: Read + ?Sized>(input: &mut R) -> CodecResult<u32> {
    read_array(input, "u32").map(u32::from_le_bytes)
}

pub fn read_f64<R: Read + ?Sized>(input: &mut R) -> CodecResult<f64> {
    read_array(input, "f64").map(f64::from_le_bytes)
}

/// Reads a `u32` length and checks it against `limit`.
pub fn read_len<R: Read + ?Sized>(
    input: &mut R,
    what: &'static str,
    limit: usize,
) -> CodecResult<usize> {
    let length = read_u32(input)? as usize;
    if length > limit {
        return Err(CodecError::TooLong {
            what,
            length,
            limit,
        });
    }
    Ok(length)
}

pub fn read_point<R: Read + ?Sized>(input: &mut R) -> CodecResult<Point3> {
    Ok(Point3::new(read_f64(input)?, read_f64(input)?, read_f64(input)?))
}

pub fn read_vec<R: Read + ?Sized>(input: &mut R) -> CodecResult<Vec3> {
    Ok(Vec3::new(read_f64(input)?, read_f64(input)?, read_f64(input)?))
}

/// Reads exactly `length` bytes as UTF-8.
pub fn read_bytes_as_string<R: Read + ?Sized>(
    input: &mut R,
    length: usize,
    what: &'static str,
) -> CodecResult<String> {
    let mut bytes = vec![0u8; length];
    input.read_exact(&mut bytes).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => CodecError::UnexpectedEof { expected: what },
        _ => CodecError::Io(err),
    })?;
    String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8 { what })
}

pub fn read_string<R: Read + ?Sized>(input: &mut R, what: &'static str) -> CodecResult<String> {
    let length = read_len(input, what, MAX_STRING_LENGTH)?;
    read_bytes_as_string(input, length, what)
}
