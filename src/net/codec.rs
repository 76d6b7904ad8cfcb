//! Byte-level encoding of request and reply frames.
//!
//! Frame bodies are a sequence of `bincode` items written with big-endian, fixed-width
//! integers. Strings and sequences carry a u64 length prefix. On the socket every body is
//! wrapped by [`LengthDelimitedCodec`] with a 4-byte big-endian length.

use super::{Reply, Request};
use crate::{error::ErrorDescriptor, types::TypeMismatch, types::Value};
use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio_util::codec::LengthDelimitedCodec;

/// Smallest maximum frame length an endpoint may be configured with.
pub const MIN_FRAME_LENGTH: usize = 4 * 1024 * 1024;
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

const STATUS_OK: &str = "OK";
const STATUS_ERR: &str = "ERR";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed item: {0}")]
    Malformed(#[from] bincode::Error),

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("{0} trailing bytes after the last item")]
    TrailingBytes(usize),

    #[error("unknown reply status {0:?}")]
    UnknownStatus(String),

    #[error("expected {expected} arguments, got {found}")]
    Arity { expected: usize, found: usize },

    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatch),

    #[error("{0}")]
    Invalid(String),
}

fn wire(limit: usize) -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(limit as u64)
        .with_big_endian()
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

pub(crate) fn frame_codec(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(max_frame_length)
        .new_codec()
}

/// Encodes a single standalone item, such as the payload of a custom value.
pub(crate) fn encode_item<T: Serialize>(item: &T) -> Result<Vec<u8>, CodecError> {
    Ok(wire(DEFAULT_MAX_FRAME_LENGTH).serialize(item)?)
}

pub(crate) fn decode_item<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    let mut reader = FrameReader::new(bytes, DEFAULT_MAX_FRAME_LENGTH);
    let item = reader.read()?;
    reader.finish()?;
    Ok(item)
}

struct FrameWriter {
    buf: Vec<u8>,
    max: usize,
}

impl FrameWriter {
    fn new(max: usize) -> Self {
        Self {
            buf: Vec::new(),
            max,
        }
    }

    fn write<T: Serialize>(&mut self, item: &T) -> Result<(), CodecError> {
        let len = self.buf.len() + wire(usize::MAX).serialized_size(item)? as usize;
        if len > self.max {
            return Err(CodecError::FrameTooLarge { len, max: self.max });
        }
        Ok(wire(self.max).serialize_into(&mut self.buf, item)?)
    }

    fn finish(self) -> Result<Vec<u8>, CodecError> {
        if self.buf.len() > self.max {
            return Err(CodecError::FrameTooLarge {
                len: self.buf.len(),
                max: self.max,
            });
        }
        Ok(self.buf)
    }
}

struct FrameReader<'a> {
    rest: &'a [u8],
    max: usize,
}

impl<'a> FrameReader<'a> {
    fn new(bytes: &'a [u8], max: usize) -> Self {
        Self { rest: bytes, max }
    }

    fn read<T: DeserializeOwned>(&mut self) -> Result<T, CodecError> {
        Ok(wire(self.max).deserialize_from(&mut self.rest)?)
    }

    fn is_empty(&self) -> bool {
        self.rest.is_empty()
    }

    fn finish(self) -> Result<(), CodecError> {
        match self.rest.len() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}

pub fn encode_request(req: &Request, max_frame_length: usize) -> Result<Vec<u8>, CodecError> {
    let mut w = FrameWriter::new(max_frame_length);
    w.write(&req.selector)?;
    w.write(&req.param_types)?;
    w.write(&req.args)?;
    w.finish()
}

pub fn decode_request(bytes: &[u8], max_frame_length: usize) -> Result<Request, CodecError> {
    if bytes.len() > max_frame_length {
        return Err(CodecError::FrameTooLarge {
            len: bytes.len(),
            max: max_frame_length,
        });
    }
    let mut r = FrameReader::new(bytes, max_frame_length);
    let req = Request {
        selector: r.read()?,
        param_types: r.read()?,
        args: r.read()?,
    };
    r.finish()?;
    Ok(req)
}

pub fn encode_reply(reply: &Reply, max_frame_length: usize) -> Result<Vec<u8>, CodecError> {
    let mut w = FrameWriter::new(max_frame_length);
    match reply {
        Reply::Ok(Value::Unit) => w.write(&STATUS_OK)?,
        Reply::Ok(value) => {
            w.write(&STATUS_OK)?;
            w.write(value)?;
        }
        Reply::Err(descriptor) => {
            w.write(&STATUS_ERR)?;
            w.write(descriptor)?;
        }
    }
    w.finish()
}

pub fn decode_reply(bytes: &[u8], max_frame_length: usize) -> Result<Reply, CodecError> {
    if bytes.len() > max_frame_length {
        return Err(CodecError::FrameTooLarge {
            len: bytes.len(),
            max: max_frame_length,
        });
    }
    let mut r = FrameReader::new(bytes, max_frame_length);
    let status: String = r.read()?;
    let reply = match status.as_str() {
        STATUS_OK if r.is_empty() => Reply::Ok(Value::Unit),
        STATUS_OK => match r.read()? {
            // A unit result never carries a payload.
            Value::Unit => return Err(CodecError::Invalid("explicit unit payload".into())),
            value => Reply::Ok(value),
        },
        STATUS_ERR => Reply::Err(r.read::<ErrorDescriptor>()?),
        _ => return Err(CodecError::UnknownStatus(status)),
    };
    r.finish()?;
    Ok(reply)
}
