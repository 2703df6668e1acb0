use bytes::Bytes;

use crate::{
    decode::DEFAULT_MAX_NESTING_DEPTH, encode::Encoder, Algorithm, CborError, CborValue,
    CoseSign1, HeaderMap, ValueKind,
};

/// CBOR tag identifying a COSE_Sign1 structure
pub const COSE_SIGN1_TAG: u64 = 18;
/// CBOR tag identifying a CBOR Web Token
pub const CWT_TAG: u64 = 61;

const HEADER_ALG: i64 = 1;
const HEADER_KID: i64 = 4;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("COSE_Sign1 must be an array, found {0}")]
    NotAnArray(ValueKind),
    #[error("COSE_Sign1 must have 4 elements, found {0}")]
    WrongArity(usize),
    #[error("unexpected CBOR tag {0} around COSE_Sign1")]
    UnexpectedTag(u64),
    #[error("COSE_Sign1 element {index} must be {expected}, found {found}")]
    ElementType {
        index: usize,
        expected: &'static str,
        found: ValueKind,
    },
    #[error("protected header is not valid CBOR: {0}")]
    ProtectedHeader(CborError),
    #[error("protected header must be a map, found {0}")]
    ProtectedHeaderNotMap(ValueKind),
    #[error("header label {label} must be {expected}, found {found}")]
    HeaderType {
        label: i64,
        expected: &'static str,
        found: ValueKind,
    },
    #[error("payload is detached")]
    DetachedPayload,
}

fn header_value(header: &[(CborValue, CborValue)], label: i64) -> Option<&CborValue> {
    let label = CborValue::from(label);
    header.iter().find_map(|(k, v)| (*k == label).then_some(v))
}

/// Builds the `Signature1` structure over which a COSE_Sign1 signature is
/// computed. External AAD is always empty.
#[must_use]
pub fn sig_structure(protected: &[u8], payload: &[u8]) -> Vec<u8> {
    const CONTEXT: &str = "Signature1";
    let mut encoder = Encoder::new();
    encoder.write_head(4, 4);
    encoder.write_head(3, CONTEXT.len() as u64);
    encoder.write_raw(CONTEXT.as_bytes());
    encoder.write_head(2, protected.len() as u64);
    encoder.write_raw(protected);
    encoder.write_head(2, 0);
    encoder.write_head(2, payload.len() as u64);
    encoder.write_raw(payload);
    encoder.into()
}

impl CoseSign1 {
    /// Interprets a decoded CBOR item as a COSE_Sign1 envelope.
    pub fn parse(value: CborValue) -> Result<Self, EnvelopeError> {
        Self::parse_with_depth(value, DEFAULT_MAX_NESTING_DEPTH)
    }

    /// Same as [`CoseSign1::parse`], bounding the nesting of the protected
    /// header by `max_depth`.
    pub fn parse_with_depth(value: CborValue, max_depth: usize) -> Result<Self, EnvelopeError> {
        let elements = match untag(value)? {
            CborValue::Array(elements) => elements,
            other => return Err(EnvelopeError::NotAnArray(other.kind())),
        };
        let [protected, unprotected, payload, signature]: [CborValue; 4] = elements
            .try_into()
            .map_err(|elements: Vec<CborValue>| EnvelopeError::WrongArity(elements.len()))?;

        let protected = match protected {
            CborValue::ByteString(bytes) => bytes,
            other => return Err(element_type(0, "a byte string", &other)),
        };
        let unprotected = match unprotected {
            CborValue::Map(entries) => entries,
            other => return Err(element_type(1, "a map", &other)),
        };
        let payload = match payload {
            CborValue::ByteString(bytes) => Some(bytes),
            CborValue::Null => None,
            other => return Err(element_type(2, "a byte string or null", &other)),
        };
        let signature = match signature {
            CborValue::ByteString(bytes) => bytes,
            other => return Err(element_type(3, "a byte string", &other)),
        };
        let protected_header = decode_protected(&protected, max_depth)?;

        Ok(CoseSign1 {
            protected,
            protected_header,
            unprotected,
            payload,
            signature,
        })
    }

    /// Key identifier (label 4), looked up in the protected header first and
    /// in the unprotected header second.
    #[must_use]
    pub fn key_id(&self) -> Option<&Bytes> {
        header_value(&self.protected_header, HEADER_KID)
            .or_else(|| header_value(&self.unprotected, HEADER_KID))
            .and_then(CborValue::as_bytes)
    }

    /// Signature algorithm (label 1). Only the protected header is trusted.
    /// A label 1 that is present but not an integer is an error.
    pub fn algorithm(&self) -> Result<Option<Algorithm>, EnvelopeError> {
        let Some(value) = header_value(&self.protected_header, HEADER_ALG) else {
            return Ok(None);
        };
        value
            .as_i64()
            .map(|id| Some(Algorithm::from_cose_id(id)))
            .ok_or(EnvelopeError::HeaderType {
                label: HEADER_ALG,
                expected: "an integer",
                found: value.kind(),
            })
    }

    /// Returns the bytes that were signed, or `None` for a detached payload.
    #[must_use]
    pub fn sig_structure(&self) -> Option<Vec<u8>> {
        self.payload
            .as_ref()
            .map(|payload| sig_structure(&self.protected, payload))
    }
}

fn untag(value: CborValue) -> Result<CborValue, EnvelopeError> {
    match value {
        CborValue::Tag(CWT_TAG, inner) => match *inner {
            CborValue::Tag(COSE_SIGN1_TAG, inner) => Ok(*inner),
            CborValue::Tag(other, _) => Err(EnvelopeError::UnexpectedTag(other)),
            inner => Ok(inner),
        },
        CborValue::Tag(COSE_SIGN1_TAG, inner) => Ok(*inner),
        CborValue::Tag(other, _) => Err(EnvelopeError::UnexpectedTag(other)),
        other => Ok(other),
    }
}

fn element_type(index: usize, expected: &'static str, found: &CborValue) -> EnvelopeError {
    EnvelopeError::ElementType {
        index,
        expected,
        found: found.kind(),
    }
}

fn decode_protected(protected: &Bytes, max_depth: usize) -> Result<HeaderMap, EnvelopeError> {
    if protected.is_empty() {
        return Ok(HeaderMap::new());
    }
    match CborValue::decode_with_depth(protected.clone(), max_depth)
        .map_err(EnvelopeError::ProtectedHeader)?
    {
        CborValue::Map(entries) => Ok(entries),
        other => Err(EnvelopeError::ProtectedHeaderNotMap(other.kind())),
    }
}
