//! Binary frame codec.
//!
//! Layout: 4-byte magic `b"VSTM"`, u16 little-endian version, bincode
//! body (standard config). Decode rejects bad magic, unknown versions,
//! and frames with trailing bytes.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::VisMessage;

const MAGIC: [u8; 4] = *b"VSTM";
const VERSION: u16 = 1;
const HEADER_LEN: usize = 6;

#[derive(Debug)]
pub enum CodecError {
    UnexpectedEof,
    InvalidMagic,
    UnsupportedVersion { found: u16 },
    Body(String),
    TrailingBytes { extra: usize },
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::UnexpectedEof => write!(f, "frame shorter than header"),
            CodecError::InvalidMagic => write!(f, "invalid frame magic"),
            CodecError::UnsupportedVersion { found } => {
                write!(f, "unsupported frame version: {found}")
            }
            CodecError::Body(msg) => write!(f, "frame body error: {msg}"),
            CodecError::TrailingBytes { extra } => {
                write!(f, "{extra} trailing bytes after frame body")
            }
        }
    }
}

impl std::error::Error for CodecError {}

pub fn encode_frame(message: &VisMessage) -> Result<Vec<u8>, CodecError> {
    encode(message)
}

pub fn decode_frame(bytes: &[u8]) -> Result<VisMessage, CodecError> {
    decode(bytes)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let body = bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| CodecError::Body(e.to_string()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::UnexpectedEof);
    }
    if bytes[..4] != MAGIC {
        return Err(CodecError::InvalidMagic);
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != VERSION {
        return Err(CodecError::UnsupportedVersion { found: version });
    }

    let body = &bytes[HEADER_LEN..];
    let (value, consumed) = bincode::serde::decode_from_slice(body, bincode::config::standard())
        .map_err(|e| CodecError::Body(e.to_string()))?;
    if consumed != body.len() {
        return Err(CodecError::TrailingBytes {
            extra: body.len() - consumed,
        });
    }
    Ok(value)
}
