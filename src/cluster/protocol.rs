//! Wire format of one replication round.
//!
//! Per element the master sends a name frame (`u32` length, then the bytes),
//! the parameters in their binary form, a status byte and, when the status is
//! [`GEOMETRY_FOLLOWS`], the finished geometry. A zero-length name frame ends
//! the round. Unknown names are sent as a bare name frame.

use std::io::{Read, Write};

use serde::Serialize;

use crate::codec::{self, CodecResult, MAX_STRING_LENGTH};

pub const GEOMETRY_FOLLOWS: u8 = 1;
pub const EXTRACTION_FAILED: u8 = 0;

/// Where a participant is within the current element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProtocolState {
    AwaitingName,
    AwaitingParameters,
    Executing,
    Publishing,
    Finished,
}

impl ProtocolState {
    /// Whether `next` may follow `self` within a round.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::AwaitingName, Self::AwaitingParameters | Self::AwaitingName | Self::Finished)
                | (Self::AwaitingParameters, Self::Executing)
                | (Self::Executing, Self::Publishing | Self::AwaitingName)
                | (Self::Publishing, Self::AwaitingName)
                | (Self::Finished, Self::AwaitingName)
        )
    }
}

pub fn write_name<W: Write + ?Sized>(out: &mut W, name: &str) -> std::io::Result<()> {
    debug_assert!(!name.is_empty(), "an empty name is the end marker");
    codec::write_string(out, name)
}

pub fn write_end<W: Write + ?Sized>(out: &mut W) -> std::io::Result<()> {
    codec::write_u32(out, 0)
}

/// Next name frame; `None` on the end marker.
pub fn read_name<R: Read + ?Sized>(input: &mut R) -> CodecResult<Option<String>> {
    let length = codec::read_len(input, "element name", MAX_STRING_LENGTH)?;
    if length == 0 {
        return Ok(None);
    }
    codec::read_bytes_as_string(input, length, "element name").map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecError;

    #[test]
    fn name_frames_end_at_zero_length() {
        let mut bytes = Vec::new();
        write_name(&mut bytes, "MyAlgo").expect("write");
        write_end(&mut bytes).expect("write");
        assert_eq!(&bytes[..4], &6u32.to_le_bytes());

        let mut input = bytes.as_slice();
        assert_eq!(read_name(&mut input).expect("name").as_deref(), Some("MyAlgo"));
        assert_eq!(read_name(&mut input).expect("end"), None);
        assert!(input.is_empty());
    }

    #[test]
    fn oversized_name_is_rejected() {
        let bytes = u32::MAX.to_le_bytes();
        match read_name(&mut bytes.as_slice()) {
            Err(CodecError::TooLong { .. }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn states_follow_the_round() {
        use ProtocolState::*;
        assert!(AwaitingName.can_advance_to(AwaitingParameters));
        assert!(Executing.can_advance_to(AwaitingName));
        assert!(!AwaitingName.can_advance_to(Publishing));
        assert!(!Publishing.can_advance_to(Finished));
    }
}
