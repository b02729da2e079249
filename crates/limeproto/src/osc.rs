//! Minimal OSC 1.0 codec
//!
//! Limelight's network trigger producers speak plain OSC messages. This codec
//! covers exactly what the control plane needs: single messages (no bundles),
//! `i`/`f`/`s`/`b` argument types, and exact-match addressing. Strings are
//! NUL-terminated and padded to 4-byte boundaries; numerics are big-endian.
//!
//! ```text
//! /trigger/play\0\0\0 ,if\0 00 00 00 01 3F 80 00 00
//! └─ padded address ┘ └tags┘ └─ int 1 ─┘ └─ f32 1.0 ─┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// Errors during OSC decoding
#[derive(Debug, thiserror::Error)]
pub enum OscError {
    #[error("message truncated")]
    Truncated,

    #[error("address must start with '/'")]
    BadAddress,

    #[error("missing type tag string")]
    MissingTypeTags,

    #[error("unsupported type tag '{0}'")]
    UnsupportedTag(char),

    #[error("string is not valid UTF-8")]
    BadString,
}

/// One OSC argument
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Int(i32),
    Float(f32),
    Str(String),
    Blob(Vec<u8>),
}

impl OscArg {
    fn type_tag(&self) -> u8 {
        match self {
            OscArg::Int(_) => b'i',
            OscArg::Float(_) => b'f',
            OscArg::Str(_) => b's',
            OscArg::Blob(_) => b'b',
        }
    }

    /// JSON view of the argument, for event payloads
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            OscArg::Int(v) => serde_json::Value::from(*v),
            OscArg::Float(v) => serde_json::Value::from(*v),
            OscArg::Str(v) => serde_json::Value::from(v.clone()),
            OscArg::Blob(v) => {
                serde_json::Value::from(v.iter().map(|&b| b as i64).collect::<Vec<_>>())
            }
        }
    }
}

/// A single OSC message: address pattern plus ordered arguments
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub address: String,
    pub args: Vec<OscArg>,
}

impl OscMessage {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(address: impl Into<String>, args: Vec<OscArg>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64 + self.args.len() * 8);
        put_padded_str(&mut buf, &self.address);

        let mut tags = Vec::with_capacity(self.args.len() + 1);
        tags.push(b',');
        tags.extend(self.args.iter().map(OscArg::type_tag));
        put_padded_bytes(&mut buf, &tags);

        for arg in &self.args {
            match arg {
                OscArg::Int(v) => buf.put_i32(*v),
                OscArg::Float(v) => buf.put_f32(*v),
                OscArg::Str(v) => put_padded_str(&mut buf, v),
                OscArg::Blob(v) => {
                    buf.put_i32(v.len() as i32);
                    buf.put_slice(v);
                    let pad = (4 - v.len() % 4) % 4;
                    buf.put_bytes(0, pad);
                }
            }
        }
        buf.freeze()
    }

    /// Decode from wire bytes
    pub fn decode(data: &[u8]) -> Result<Self, OscError> {
        let mut cursor = data;
        let address = read_padded_str(&mut cursor)?;
        if !address.starts_with('/') {
            return Err(OscError::BadAddress);
        }

        let tags = read_padded_str(&mut cursor).map_err(|_| OscError::MissingTypeTags)?;
        let Some(tags) = tags.strip_prefix(',') else {
            return Err(OscError::MissingTypeTags);
        };

        let mut args = Vec::with_capacity(tags.len());
        for tag in tags.chars() {
            let arg = match tag {
                'i' => OscArg::Int(read_i32(&mut cursor)?),
                'f' => OscArg::Float(f32::from_bits(read_i32(&mut cursor)? as u32)),
                's' => OscArg::Str(read_padded_str(&mut cursor)?),
                'b' => {
                    let len = read_i32(&mut cursor)?;
                    if len < 0 {
                        return Err(OscError::Truncated);
                    }
                    let len = len as usize;
                    let padded = len + (4 - len % 4) % 4;
                    if cursor.len() < padded {
                        return Err(OscError::Truncated);
                    }
                    let blob = cursor[..len].to_vec();
                    cursor = &cursor[padded..];
                    OscArg::Blob(blob)
                }
                other => return Err(OscError::UnsupportedTag(other)),
            };
            args.push(arg);
        }

        Ok(Self { address, args })
    }
}

/// Append string bytes, NUL-terminated, padded to a 4-byte boundary
fn put_padded_str(buf: &mut BytesMut, s: &str) {
    put_padded_bytes(buf, s.as_bytes());
}

fn put_padded_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_slice(bytes);
    // at least one NUL, then pad to the boundary
    let pad = 4 - bytes.len() % 4;
    buf.put_bytes(0, pad);
}

fn read_padded_str(cursor: &mut &[u8]) -> Result<String, OscError> {
    let nul = cursor
        .iter()
        .position(|&b| b == 0)
        .ok_or(OscError::Truncated)?;
    let s = std::str::from_utf8(&cursor[..nul])
        .map_err(|_| OscError::BadString)?
        .to_string();
    let consumed = nul + 1 + (4 - (nul + 1) % 4) % 4;
    if cursor.len() < consumed {
        return Err(OscError::Truncated);
    }
    *cursor = &cursor[consumed..];
    Ok(s)
}

fn read_i32(cursor: &mut &[u8]) -> Result<i32, OscError> {
    if cursor.len() < 4 {
        return Err(OscError::Truncated);
    }
    let value = i32::from_be_bytes([cursor[0], cursor[1], cursor[2], cursor[3]]);
    *cursor = &cursor[4..];
    Ok(value)
}
