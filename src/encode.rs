use bytes::Bytes;

use crate::{util::fits_f32, CborValue};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("{0}")]
    Unsupported(String),
    #[cfg(feature = "json")]
    #[error("{0}")]
    Json(String),
}

impl EncodeError {
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Unsupported(message) => message,
            #[cfg(feature = "json")]
            Self::Json(message) => message,
        }
    }
}

/// Byte sink writing the canonical (shortest form, definite length) CBOR
/// encoding.
#[derive(Debug, Default)]
pub struct Encoder {
    bytes: Vec<u8>,
}

impl Encoder {
    #[must_use]
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Writes an initial byte and its argument in the shortest form.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write_head(&mut self, major: u8, argument: u64) {
        let major = major << 5;
        match argument {
            0..=23 => self.bytes.push(major | argument as u8),
            24..=0xff => self.bytes.extend_from_slice(&[major | 24, argument as u8]),
            0x100..=0xffff => {
                self.bytes.push(major | 25);
                self.bytes
                    .extend_from_slice(&(argument as u16).to_be_bytes());
            }
            0x1_0000..=0xffff_ffff => {
                self.bytes.push(major | 26);
                self.bytes
                    .extend_from_slice(&(argument as u32).to_be_bytes());
            }
            _ => {
                self.bytes.push(major | 27);
                self.bytes.extend_from_slice(&argument.to_be_bytes());
            }
        }
    }

    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }
}

impl From<Encoder> for Vec<u8> {
    fn from(val: Encoder) -> Self {
        val.bytes
    }
}

impl From<Encoder> for Bytes {
    fn from(val: Encoder) -> Self {
        val.bytes.into()
    }
}

pub trait Encode {
    fn encode(&self, output: &mut Encoder) -> Result<(), EncodeError>;

    fn encode_to_vec(&self) -> Result<Vec<u8>, EncodeError> {
        let mut encoder = Encoder::new();
        self.encode(&mut encoder)?;
        Ok(encoder.into())
    }
}

impl Encode for u64 {
    fn encode(&self, output: &mut Encoder) -> Result<(), EncodeError> {
        output.write_head(0, *self);
        Ok(())
    }
}

impl Encode for i64 {
    fn encode(&self, output: &mut Encoder) -> Result<(), EncodeError> {
        match u64::try_from(*self) {
            Ok(unsigned) => output.write_head(0, unsigned),
            // -1 - n for negative n never overflows and is non negative
            Err(_) => output.write_head(1, (-1 - *self).unsigned_abs()),
        }
        Ok(())
    }
}

impl Encode for bool {
    fn encode(&self, output: &mut Encoder) -> Result<(), EncodeError> {
        output.write_head(7, if *self { 21 } else { 20 });
        Ok(())
    }
}

impl Encode for [u8] {
    fn encode(&self, output: &mut Encoder) -> Result<(), EncodeError> {
        output.write_head(2, self.len() as u64);
        output.write_raw(self);
        Ok(())
    }
}

impl Encode for str {
    fn encode(&self, output: &mut Encoder) -> Result<(), EncodeError> {
        output.write_head(3, self.len() as u64);
        output.write_raw(self.as_bytes());
        Ok(())
    }
}

impl Encode for f64 {
    #[allow(clippy::cast_possible_truncation)]
    fn encode(&self, output: &mut Encoder) -> Result<(), EncodeError> {
        if fits_f32(*self) {
            output.write_raw(&[0xfa]);
            output.write_raw(&(*self as f32).to_be_bytes());
        } else {
            output.write_raw(&[0xfb]);
            output.write_raw(&self.to_be_bytes());
        }
        Ok(())
    }
}

impl Encode for CborValue {
    fn encode(&self, output: &mut Encoder) -> Result<(), EncodeError> {
        match self {
            CborValue::Unsigned(n) => output.write_head(0, *n),
            CborValue::Negative(n) => output.write_head(1, *n),
            CborValue::ByteString(b) => b[..].encode(output)?,
            CborValue::TextString(t) => t.as_str().encode(output)?,
            CborValue::Array(items) => {
                output.write_head(4, items.len() as u64);
                for item in items {
                    item.encode(output)?;
                }
            }
            CborValue::Map(entries) => {
                output.write_head(5, entries.len() as u64);
                for (key, value) in entries {
                    key.encode(output)?;
                    value.encode(output)?;
                }
            }
            CborValue::Tag(tag, inner) => {
                output.write_head(6, *tag);
                inner.encode(output)?;
            }
            CborValue::Bool(b) => b.encode(output)?,
            CborValue::Null => output.write_head(7, 22),
            CborValue::Undefined => output.write_head(7, 23),
            CborValue::Simple(v @ (0..=19 | 32..)) => output.write_head(7, u64::from(*v)),
            CborValue::Simple(v) => {
                return Err(EncodeError::Unsupported(format!(
                    "simple value {v} has no standalone encoding"
                )))
            }
            CborValue::Float(f) => f.encode(output)?,
        }
        Ok(())
    }
}
