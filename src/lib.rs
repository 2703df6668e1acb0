#![doc = include_str!("../README.md")]
#![cfg(not(doctest))]
use bytes::Bytes;
use num_traits::ToPrimitive;

pub mod base45;
mod cose;
mod decode;
mod encode;
pub mod inflate;
mod pipeline;
mod schema;
#[cfg(test)]
mod test_util;
#[cfg(feature = "validate")]
mod trust;
pub(crate) mod util;
#[cfg(feature = "validate")]
mod validate;

pub use base45::Base45Error;
pub use cose::{sig_structure, EnvelopeError, COSE_SIGN1_TAG, CWT_TAG};
pub use decode::{decode_prefix, CborError, Decoded, DEFAULT_MAX_NESTING_DEPTH};
pub use encode::{Encode, EncodeError, Encoder};
pub use inflate::InflateError;
pub use pipeline::{
    decode, DecodeError, EncodingError, Layer, Limits, Pipeline, SchemeError, SCHEME_PREFIX,
};
pub use schema::{map_payload, SchemaError};
#[cfg(feature = "validate")]
pub use trust::{PublicKey, TrustStore, TrustedCert};
#[cfg(all(feature = "validate", feature = "json"))]
pub use trust::TrustListError;
#[cfg(feature = "validate")]
pub use validate::verify;

#[cfg(feature = "json")]
use serde::{Deserialize, Serialize, Serializer};

/// Generic CBOR data item as produced by [`CborValue::decode`].
#[derive(Debug, Clone, PartialEq)]
pub enum CborValue {
    Unsigned(u64),
    /// Encodes the integer `-1 - n`
    Negative(u64),
    ByteString(Bytes),
    TextString(String),
    Array(Vec<CborValue>),
    /// Entries in encoding order. Duplicate keys are not merged.
    Map(Vec<(CborValue, CborValue)>),
    Tag(u64, Box<CborValue>),
    Bool(bool),
    Null,
    Undefined,
    Float(f64),
    /// Unassigned simple value
    Simple(u8),
}

/// Coarse classification of a [`CborValue`], used in error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub enum ValueKind {
    Integer,
    ByteString,
    TextString,
    Array,
    Map,
    Tag,
    Bool,
    Null,
    Undefined,
    Float,
    Simple,
}

impl core::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            ValueKind::Integer => "integer",
            ValueKind::ByteString => "byte string",
            ValueKind::TextString => "text string",
            ValueKind::Array => "array",
            ValueKind::Map => "map",
            ValueKind::Tag => "tag",
            ValueKind::Bool => "bool",
            ValueKind::Null => "null",
            ValueKind::Undefined => "undefined",
            ValueKind::Float => "float",
            ValueKind::Simple => "simple value",
        };
        f.write_str(name)
    }
}

impl CborValue {
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            CborValue::Unsigned(_) | CborValue::Negative(_) => ValueKind::Integer,
            CborValue::ByteString(_) => ValueKind::ByteString,
            CborValue::TextString(_) => ValueKind::TextString,
            CborValue::Array(_) => ValueKind::Array,
            CborValue::Map(_) => ValueKind::Map,
            CborValue::Tag(..) => ValueKind::Tag,
            CborValue::Bool(_) => ValueKind::Bool,
            CborValue::Null => ValueKind::Null,
            CborValue::Undefined => ValueKind::Undefined,
            CborValue::Float(_) => ValueKind::Float,
            CborValue::Simple(_) => ValueKind::Simple,
        }
    }

    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            CborValue::Unsigned(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the integer value if it fits into an `i64`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CborValue::Unsigned(n) => n.to_i64(),
            CborValue::Negative(n) => n.to_i64().map(|n| -1 - n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CborValue::TextString(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            CborValue::ByteString(bytes) => Some(bytes),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[CborValue]> {
        match self {
            CborValue::Array(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&[(CborValue, CborValue)]> {
        match self {
            CborValue::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Looks up the first entry of a map whose key equals `key`.
    #[must_use]
    pub fn get(&self, key: &CborValue) -> Option<&CborValue> {
        self.as_map()?
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }
}

impl From<u64> for CborValue {
    fn from(value: u64) -> Self {
        CborValue::Unsigned(value)
    }
}

impl From<i64> for CborValue {
    fn from(value: i64) -> Self {
        match u64::try_from(value) {
            Ok(unsigned) => CborValue::Unsigned(unsigned),
            Err(_) => CborValue::Negative((-1 - value).unsigned_abs()),
        }
    }
}

impl From<&str> for CborValue {
    fn from(value: &str) -> Self {
        CborValue::TextString(value.to_owned())
    }
}

impl From<String> for CborValue {
    fn from(value: String) -> Self {
        CborValue::TextString(value)
    }
}

impl From<bool> for CborValue {
    fn from(value: bool) -> Self {
        CborValue::Bool(value)
    }
}

impl From<Bytes> for CborValue {
    fn from(value: Bytes) -> Self {
        CborValue::ByteString(value)
    }
}

impl From<Vec<CborValue>> for CborValue {
    fn from(value: Vec<CborValue>) -> Self {
        CborValue::Array(value)
    }
}

#[cfg(feature = "json")]
impl Serialize for CborValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeMap;

        match self {
            CborValue::Unsigned(n) => serializer.serialize_u64(*n),
            CborValue::Negative(n) => serializer.serialize_i128(-1 - i128::from(*n)),
            CborValue::ByteString(bytes) => serializer.serialize_bytes(bytes),
            CborValue::TextString(text) => serializer.serialize_str(text),
            CborValue::Array(items) => serializer.collect_seq(items),
            CborValue::Map(entries) => {
                serializer.collect_map(entries.iter().map(|(k, v)| (k, v)))
            }
            CborValue::Tag(tag, inner) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("tag", tag)?;
                map.serialize_entry("value", inner)?;
                map.end()
            }
            CborValue::Bool(b) => serializer.serialize_bool(*b),
            CborValue::Null | CborValue::Undefined => serializer.serialize_unit(),
            CborValue::Float(f) => serializer.serialize_f64(*f),
            CborValue::Simple(v) => serializer.serialize_u8(*v),
        }
    }
}

/// Header map of a COSE structure, in encoding order.
pub type HeaderMap = Vec<(CborValue, CborValue)>;

/// COSE algorithm identifiers accepted in the `alg` header (label 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub enum Algorithm {
    /// ECDSA w/ SHA-256 on P-256
    ES256,
    /// ECDSA w/ SHA-384 on P-384
    ES384,
    /// ECDSA w/ SHA-512 on P-521
    ES512,
    /// RSASSA-PSS w/ SHA-256
    PS256,
    /// RSASSA-PSS w/ SHA-384
    PS384,
    /// RSASSA-PSS w/ SHA-512
    PS512,
    Other(i64),
}

impl Algorithm {
    #[must_use]
    pub fn from_cose_id(id: i64) -> Self {
        match id {
            -7 => Algorithm::ES256,
            -35 => Algorithm::ES384,
            -36 => Algorithm::ES512,
            -37 => Algorithm::PS256,
            -38 => Algorithm::PS384,
            -39 => Algorithm::PS512,
            other => Algorithm::Other(other),
        }
    }

    #[must_use]
    pub fn cose_id(&self) -> i64 {
        match self {
            Algorithm::ES256 => -7,
            Algorithm::ES384 => -35,
            Algorithm::ES512 => -36,
            Algorithm::PS256 => -37,
            Algorithm::PS384 => -38,
            Algorithm::PS512 => -39,
            Algorithm::Other(id) => *id,
        }
    }
}

/// A parsed COSE_Sign1 envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct CoseSign1 {
    /// Serialized protected header exactly as it was signed
    pub protected: Bytes,
    /// Decoded form of `protected`
    pub protected_header: HeaderMap,
    pub unprotected: HeaderMap,
    /// `None` for a detached payload
    pub payload: Option<Bytes>,
    pub signature: Bytes,
}

/// Seconds since the Unix epoch, UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "json", derive(Deserialize, Serialize))]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Returns `None` when the value lies outside of the range chrono supports.
    #[must_use]
    pub fn to_datetime(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp(self.0, 0)
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub struct DccRecord {
    /// Issuing country (CWT claim 1)
    pub issuer: String,
    /// CWT claim 6
    pub issued_at: Timestamp,
    /// CWT claim 4
    pub expires_at: Timestamp,
    /// Schema version (`ver`)
    pub version: String,
    pub subject: Subject,
    pub statements: Vec<Statement>,
}

impl DccRecord {
    /// A certificate normally carries at least one statement. An empty list
    /// is still decoded and has to be judged by the caller.
    #[must_use]
    pub fn has_statements(&self) -> bool {
        !self.statements.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub struct Subject {
    pub name: Name,
    /// `dob`, as written by the issuer (ISO 8601, possibly truncated)
    pub date_of_birth: String,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub struct Name {
    /// `fn`
    pub family_name: Option<String>,
    /// `fnt`, ICAO 9303 transliteration
    pub family_name_standardised: String,
    /// `gn`
    pub given_name: Option<String>,
    /// `gnt`
    pub given_name_standardised: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub enum Statement {
    Vaccination(Vaccination),
    Test(Test),
    Recovery(Recovery),
    /// Entry under a key this decoder does not know. Key and value are kept
    /// verbatim, whatever their CBOR type.
    Unknown { kind: CborValue, value: CborValue },
}

/// Vaccination entry (`v`)
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub struct Vaccination {
    /// `tg`
    pub disease_targeted: String,
    /// `vp`
    pub vaccine: String,
    /// `mp`
    pub medicinal_product: String,
    /// `ma`
    pub manufacturer: String,
    /// `dn`
    pub dose_number: u64,
    /// `sd`
    pub total_doses: u64,
    /// `dt`
    pub date: String,
    /// `co`
    pub country: String,
    /// `is`
    pub certificate_issuer: String,
    /// `ci`
    pub certificate_id: String,
}

/// Test entry (`t`)
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub struct Test {
    pub disease_targeted: String,
    pub test_type: String,
    pub test_name: Option<String>,
    pub test_device: Option<String>,
    /// Sample collection time (`sc`)
    pub sample_collected_at: String,
    pub result: String,
    pub test_centre: Option<String>,
    pub country: String,
    pub certificate_issuer: String,
    pub certificate_id: String,
}

/// Recovery entry (`r`)
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub struct Recovery {
    pub disease_targeted: String,
    /// Date of the first positive test (`fr`)
    pub first_positive_test: String,
    pub country: String,
    pub certificate_issuer: String,
    /// `df`
    pub valid_from: String,
    /// `du`
    pub valid_until: String,
    pub certificate_id: String,
}

/// Reason why a signature could not be confirmed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub enum CryptoError {
    #[error("unsupported signature algorithm {0:?}")]
    UnsupportedAlgorithm(Algorithm),
    #[error("header announces {header:?} but the trusted certificate uses {certificate:?}")]
    AlgorithmMismatch {
        header: Algorithm,
        certificate: Algorithm,
    },
    #[error("the trusted key cannot be used with {0:?}")]
    KeyMismatch(Algorithm),
    #[error("malformed public key: {0}")]
    MalformedKey(String),
    #[error("malformed signature: {0}")]
    MalformedSignature(String),
    #[error("malformed protected header: {0}")]
    MalformedHeader(String),
    #[error("envelope carries no key identifier")]
    MissingKeyId,
    #[error("payload is detached")]
    DetachedPayload,
    #[error("signature does not match")]
    SignatureMismatch,
    #[error("crypto backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub enum VerificationOutcome {
    /// No trust store was supplied
    NotAttempted,
    Valid,
    Invalid(CryptoError),
    /// No trusted certificate is registered under this key id
    KeyUnknown(Bytes),
}

impl VerificationOutcome {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, VerificationOutcome::Valid)
    }
}

/// Result of running a token through the [`Pipeline`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub struct DecodedCertificate {
    pub record: DccRecord,
    pub key_id: Option<Bytes>,
    pub algorithm: Option<Algorithm>,
    pub verification: VerificationOutcome,
}
