use bytes::Bytes;
use nom::{
    bytes::streaming::take,
    error::{ErrorKind, FromExternalError, ParseError},
    number::streaming::{be_u16, be_u32, be_u64, be_u8},
    Needed,
};

use crate::{util::half_to_f64, CborValue};

/// Nesting bound applied when no explicit limit is given.
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 32;

/// Returns the value of a decoding attempt
#[derive(Debug, PartialEq)]
pub struct Decoded<T: core::fmt::Debug + PartialEq> {
    /// indicates the number of bytes that were consumed by the decoder
    pub bytes_consumed: usize,
    /// the decoded return value
    pub decoded: T,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CborError {
    #[error("{0}")]
    UnexpectedEnd(String),
    #[error("{trailing} trailing bytes after a complete item of {consumed} bytes")]
    TrailingData { consumed: usize, trailing: usize },
    #[error("unsupported CBOR encoding: {0}")]
    UnsupportedEncoding(String),
    #[error("nesting exceeds the limit of {limit} levels")]
    NestingTooDeep { limit: usize },
    #[error("malformed CBOR: {0}")]
    Malformed(String),
    #[error("text string is not valid UTF-8")]
    InvalidUtf8,
    #[error("parser error: {0:?}")]
    Nom(ErrorKind),
}

impl From<nom::Err<CborError>> for CborError {
    fn from(value: nom::Err<CborError>) -> Self {
        match value {
            nom::Err::Incomplete(Needed::Size(n)) => CborError::UnexpectedEnd(format!(
                "Unexpected end of input: Needs at least other {n} bytes!"
            )),
            nom::Err::Incomplete(_) => CborError::UnexpectedEnd("Unexpected end of input!".into()),
            nom::Err::Error(e) | nom::Err::Failure(e) => e,
        }
    }
}

impl<I> ParseError<I> for CborError {
    fn from_error_kind(_: I, kind: ErrorKind) -> Self {
        CborError::Nom(kind)
    }

    fn append(_: I, _: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<I, E> FromExternalError<I, E> for CborError {
    fn from_external_error(_: I, kind: ErrorKind, _: E) -> Self {
        CborError::Nom(kind)
    }
}

pub type IResult<I, T> = nom::IResult<I, T, CborError>;

fn fail<T>(error: CborError) -> Result<T, nom::Err<CborError>> {
    Err(nom::Err::Failure(error))
}

/// Argument of an initial byte: either the value carried by the additional
/// information bits or the indefinite length marker.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Argument {
    Value(u64),
    Indefinite,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Head {
    major: u8,
    info: u8,
    argument: Argument,
}

fn read_head(input: &[u8]) -> IResult<&[u8], Head> {
    let (input, initial) = be_u8(input)?;
    let major = initial >> 5;
    let info = initial & 0b0001_1111;
    let (input, argument) = match info {
        0..=23 => (input, Argument::Value(u64::from(info))),
        24 => be_u8(input).map(|(rem, v)| (rem, Argument::Value(u64::from(v))))?,
        25 => be_u16(input).map(|(rem, v)| (rem, Argument::Value(u64::from(v))))?,
        26 => be_u32(input).map(|(rem, v)| (rem, Argument::Value(u64::from(v))))?,
        27 => be_u64(input).map(|(rem, v)| (rem, Argument::Value(v)))?,
        28..=30 => {
            return fail(CborError::Malformed(format!(
                "reserved additional information {info} in initial byte {initial:#04x}"
            )))
        }
        _ => (input, Argument::Indefinite),
    };
    Ok((
        input,
        Head {
            major,
            info,
            argument,
        },
    ))
}

fn definite_length(head: Head, what: &str) -> Result<usize, nom::Err<CborError>> {
    match head.argument {
        Argument::Value(len) => usize::try_from(len).or_else(|_| {
            fail(CborError::UnexpectedEnd(format!(
                "{what} length {len} exceeds addressable memory"
            )))
        }),
        Argument::Indefinite => fail(CborError::UnsupportedEncoding(format!(
            "indefinite-length {what}"
        ))),
    }
}

/// Decoder over a shared input buffer. Byte strings in the produced tree are
/// slices of `source` rather than copies.
struct Reader<'s> {
    source: &'s Bytes,
    max_depth: usize,
}

impl<'s> Reader<'s> {
    fn item(&self, input: &'s [u8], depth: usize) -> IResult<&'s [u8], CborValue> {
        let (input, head) = read_head(input)?;
        match head.major {
            0 => match head.argument {
                Argument::Value(v) => Ok((input, CborValue::Unsigned(v))),
                Argument::Indefinite => fail(CborError::Malformed(
                    "indefinite length marker on an unsigned integer".into(),
                )),
            },
            1 => match head.argument {
                Argument::Value(v) => Ok((input, CborValue::Negative(v))),
                Argument::Indefinite => fail(CborError::Malformed(
                    "indefinite length marker on a negative integer".into(),
                )),
            },
            2 => {
                let len = definite_length(head, "byte string")?;
                let (input, bytes) = take(len)(input)?;
                Ok((input, CborValue::ByteString(self.source.slice_ref(bytes))))
            }
            3 => {
                let len = definite_length(head, "text string")?;
                let (input, bytes) = take(len)(input)?;
                let text = core::str::from_utf8(bytes)
                    .map_err(|_| nom::Err::Failure(CborError::InvalidUtf8))?;
                Ok((input, CborValue::TextString(text.to_owned())))
            }
            4 => {
                let count = definite_length(head, "array")?;
                let depth = self.enter(depth)?;
                // Every item takes at least one byte, so the remaining input
                // bounds the preallocation regardless of the declared count.
                let mut items = Vec::with_capacity(count.min(input.len()));
                let mut input = input;
                for _ in 0..count {
                    let (rem, item) = self.item(input, depth)?;
                    items.push(item);
                    input = rem;
                }
                Ok((input, CborValue::Array(items)))
            }
            5 => {
                let count = definite_length(head, "map")?;
                let depth = self.enter(depth)?;
                let mut entries = Vec::with_capacity(count.min(input.len() / 2));
                let mut input = input;
                for _ in 0..count {
                    let (rem, key) = self.item(input, depth)?;
                    let (rem, value) = self.item(rem, depth)?;
                    entries.push((key, value));
                    input = rem;
                }
                Ok((input, CborValue::Map(entries)))
            }
            6 => {
                let Argument::Value(tag) = head.argument else {
                    return fail(CborError::Malformed(
                        "indefinite length marker on a tag".into(),
                    ));
                };
                let depth = self.enter(depth)?;
                let (input, inner) = self.item(input, depth)?;
                Ok((input, CborValue::Tag(tag, Box::new(inner))))
            }
            _ => simple_or_float(input, head),
        }
    }

    fn enter(&self, depth: usize) -> Result<usize, nom::Err<CborError>> {
        let depth = depth + 1;
        if depth > self.max_depth {
            return fail(CborError::NestingTooDeep {
                limit: self.max_depth,
            });
        }
        Ok(depth)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn simple_or_float(input: &[u8], head: Head) -> IResult<&[u8], CborValue> {
    let value = match (head.info, head.argument) {
        (20, _) => CborValue::Bool(false),
        (21, _) => CborValue::Bool(true),
        (22, _) => CborValue::Null,
        (23, _) => CborValue::Undefined,
        (0..=19, Argument::Value(v)) => CborValue::Simple(v as u8),
        (24, Argument::Value(v)) if v < 32 => {
            return fail(CborError::Malformed(format!(
                "simple value {v} must use the one byte encoding"
            )))
        }
        (24, Argument::Value(v)) => CborValue::Simple(v as u8),
        (25, Argument::Value(v)) => CborValue::Float(half_to_f64(v as u16)),
        (26, Argument::Value(v)) => CborValue::Float(f64::from(f32::from_bits(v as u32))),
        (27, Argument::Value(v)) => CborValue::Float(f64::from_bits(v)),
        _ => {
            return fail(CborError::Malformed(
                "break code outside of an indefinite-length item".into(),
            ))
        }
    };
    Ok((input, value))
}

/// Decodes the first complete CBOR item of `source`, reporting how many bytes
/// it occupied. Bytes after the item are left untouched.
pub fn decode_prefix(source: &Bytes, max_depth: usize) -> Result<Decoded<CborValue>, CborError> {
    let reader = Reader { source, max_depth };
    let input: &[u8] = source;
    let (remaining, decoded) = reader.item(input, 0)?;
    Ok(Decoded {
        bytes_consumed: input.len() - remaining.len(),
        decoded,
    })
}

impl CborValue {
    /// Decodes exactly one CBOR item spanning the entire input.
    /// ### Usage
    /// ```rust
    /// # use dcc_decode::*;
    /// let value = CborValue::decode(vec![0x83, 0x01, 0x02, 0x03]).unwrap();
    /// assert_eq!(
    ///     value,
    ///     CborValue::Array(vec![1u64.into(), 2u64.into(), 3u64.into()])
    /// );
    /// ```
    pub fn decode<I: Into<Bytes>>(input: I) -> Result<Self, CborError> {
        Self::decode_with_depth(input, DEFAULT_MAX_NESTING_DEPTH)
    }

    /// Same as [`CborValue::decode`] with an explicit nesting bound.
    pub fn decode_with_depth<I: Into<Bytes>>(input: I, max_depth: usize) -> Result<Self, CborError> {
        let source = input.into();
        let Decoded {
            bytes_consumed,
            decoded,
        } = decode_prefix(&source, max_depth)?;
        if bytes_consumed != source.len() {
            return Err(CborError::TrailingData {
                consumed: bytes_consumed,
                trailing: source.len() - bytes_consumed,
            });
        }
        Ok(decoded)
    }
}
