//! Whole-frame encoder and streaming decoder.
//!
//! Nodes parse the bus one byte at a time (see [`Slave`](crate::Slave)); this
//! module is for the other side of the fence: hosts that build complete frames
//! in memory, bus monitors and test harnesses.

use nom::bytes::streaming::take;
use nom::combinator::consumed;
use nom::number::streaming::{be_u16, u8};
use nom::sequence::tuple;
use nom::IResult;
use snafu::Snafu;

use crate::crc::{crc16, Crc16};
use crate::types::{Flags, Header, Length, SOM};

type Buf = [u8];

/// Reasons a frame is dropped.
#[derive(Debug, Snafu, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A single 0xFF wasn't followed by a second one.
    #[snafu(display("Malformed start marker"))]
    BadStartMarker,
    /// The trailing check bytes don't match the frame contents.
    #[snafu(display("CRC mismatch, expected {expected:#06x}, found {found:#06x}"))]
    CrcMismatch { expected: u16, found: u16 },
}

/// A message with its payload borrowed from elsewhere.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    pub header: Header,
    pub data: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn new(header: Header, data: &'a [u8]) -> Self {
        Self { header, data }
    }

    /// Number of bytes [`encode()`](Self::encode) produces.
    pub fn encoded_len(&self) -> usize {
        let len_bytes = match self.header.length {
            Length::Single(_) => 1,
            Length::Batch { .. } => 2,
        };
        2 + 3 + len_bytes + self.data.len() + 2
    }

    /// Append the on-wire representation, start marker to CRC, to `out`.
    pub fn encode<E: Extend<u8>>(&self, out: &mut E) {
        let mut crc = Crc16::new();
        let mut body = |b: u8, out: &mut E| {
            crc.update(b);
            out.extend(Some(b));
        };
        out.extend([SOM, SOM]);
        body(self.header.flags.bits(), out);
        body(*self.header.destination, out);
        body(self.header.command, out);
        match self.header.length {
            Length::Single(len) => body(len, out),
            Length::Batch { nodes, per_node } => {
                body(nodes, out);
                body(per_node, out);
            }
        }
        for b in self.data {
            body(*b, out);
        }
        out.extend(crc.to_be_bytes());
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameToken<'a> {
    NeedData,
    Frame(Frame<'a>),
    Invalid(Error),
}

/// Parse the next frame in `buf`.
///
/// Returns the number of bytes consumed together with the result. Bytes in
/// front of the start marker are skipped. On `NeedData` the consumed count
/// only covers such skipped bytes; keep the rest and retry with more data.
pub fn decode(buf: &Buf) -> (usize, FrameToken<'_>) {
    let skipped = match buf.iter().position(|b| *b == SOM) {
        Some(pos) => pos,
        None => return (buf.len(), FrameToken::NeedData),
    };
    let input = &buf[skipped..];
    match frame(input) {
        Ok((rest, token)) => (buf.len() - rest.len(), token),
        // Every parser below is streaming and infallible, so only
        // Incomplete can show up here.
        Err(_) => (skipped, FrameToken::NeedData),
    }
}

fn frame(buf: &Buf) -> IResult<&Buf, FrameToken<'_>> {
    let (buf, (_som1, som2)) = tuple((u8, u8))(buf)?;
    if som2 != SOM {
        return Ok((buf, FrameToken::Invalid(Error::BadStartMarker)));
    }
    let (buf, (checked, (header, data))) = consumed(header_and_data)(buf)?;
    let (buf, found) = be_u16(buf)?;
    let expected = crc16(checked);
    if expected != found {
        return Ok((buf, FrameToken::Invalid(Error::CrcMismatch { expected, found })));
    }
    Ok((buf, FrameToken::Frame(Frame { header, data })))
}

fn header_and_data(buf: &Buf) -> IResult<&Buf, (Header, &Buf)> {
    let (buf, header) = header(buf)?;
    let (buf, data) = take(header.length.data_len())(buf)?;
    Ok((buf, (header, data)))
}

fn header(buf: &Buf) -> IResult<&Buf, Header> {
    let (buf, (flags, destination, command, len1)) = tuple((u8, u8, u8, u8))(buf)?;
    let flags = Flags::from_bits(flags);
    let (buf, length) = if flags.is_batch() {
        let (buf, per_node) = u8(buf)?;
        (
            buf,
            Length::Batch {
                nodes: len1,
                per_node,
            },
        )
    } else {
        (buf, Length::Single(len1))
    };
    Ok((
        buf,
        Header {
            flags,
            destination: destination.into(),
            command,
            length,
        },
    ))
}
