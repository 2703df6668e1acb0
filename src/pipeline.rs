#[cfg(not(feature = "validate"))]
use core::marker::PhantomData;

use bytes::Bytes;
#[cfg(feature = "json")]
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

#[cfg(feature = "validate")]
use crate::TrustStore;
use crate::{
    base45, inflate, schema::map_payload, Base45Error, CborError, CborValue, CoseSign1,
    DecodedCertificate, EncodeError, EnvelopeError, InflateError, SchemaError,
    VerificationOutcome,
};

/// Prefix announcing a version 1 health certificate.
pub const SCHEME_PREFIX: &str = "HC1:";

/// Resource bounds applied while decoding a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "json", serde(default))]
pub struct Limits {
    /// Ceiling for the decompressed COSE structure in bytes
    pub max_inflated_bytes: usize,
    /// Ceiling for nested arrays, maps and tags in any CBOR item
    pub max_nesting_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_inflated_bytes: 64 * 1024,
            max_nesting_depth: crate::DEFAULT_MAX_NESTING_DEPTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemeError {
    #[error("expected a token starting with {SCHEME_PREFIX:?}")]
    UnrecognizedScheme,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    #[error(transparent)]
    Base45(#[from] Base45Error),
    #[error(transparent)]
    Inflate(#[from] InflateError),
    #[error(transparent)]
    Cbor(#[from] CborError),
}

/// The single error reported for a token that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error(transparent)]
    Scheme(#[from] SchemeError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Stage of the pipeline at which decoding stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Serialize))]
pub enum Layer {
    Scheme,
    Base45,
    Inflate,
    Cbor,
    Envelope,
    Schema,
}

impl DecodeError {
    #[must_use]
    pub fn layer(&self) -> Layer {
        match self {
            DecodeError::Scheme(_) => Layer::Scheme,
            DecodeError::Encoding(EncodingError::Base45(_)) => Layer::Base45,
            DecodeError::Encoding(EncodingError::Inflate(_)) => Layer::Inflate,
            DecodeError::Encoding(EncodingError::Cbor(_)) => Layer::Cbor,
            DecodeError::Envelope(_) => Layer::Envelope,
            DecodeError::Schema(_) => Layer::Schema,
        }
    }
}

impl From<Base45Error> for DecodeError {
    fn from(value: Base45Error) -> Self {
        DecodeError::Encoding(value.into())
    }
}

impl From<InflateError> for DecodeError {
    fn from(value: InflateError) -> Self {
        DecodeError::Encoding(value.into())
    }
}

impl From<CborError> for DecodeError {
    fn from(value: CborError) -> Self {
        DecodeError::Encoding(value.into())
    }
}

/// Decodes `HC1:` tokens and, given a [`TrustStore`], verifies their
/// signatures. A pipeline holds no mutable state and can be shared between
/// threads.
/// ### Usage
/// ```rust
/// # use dcc_decode::*;
/// let trust = TrustStore::new([]);
/// let pipeline = Pipeline::new().with_trust_store(&trust);
/// match pipeline.decode("HC1:...") {
///     Ok(certificate) => println!("{:?}", certificate.verification),
///     Err(e) => println!("rejected at {:?}: {e}", e.layer()),
/// }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Pipeline<'t> {
    limits: Limits,
    #[cfg(feature = "validate")]
    trust: Option<&'t TrustStore>,
    #[cfg(not(feature = "validate"))]
    trust: PhantomData<&'t ()>,
}

impl<'t> Pipeline<'t> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    #[cfg(feature = "validate")]
    #[must_use]
    pub fn with_trust_store(mut self, trust: &'t TrustStore) -> Self {
        self.trust = Some(trust);
        self
    }

    /// Runs the decoding stages up to and including the COSE envelope.
    pub fn envelope(&self, token: &str) -> Result<CoseSign1, DecodeError> {
        let text = strip_scheme(token)?;
        let compressed = base45::decode(text)?;
        trace!(bytes = compressed.len(), "base45 decoded");
        let cose = Bytes::from(inflate::inflate(
            &compressed,
            self.limits.max_inflated_bytes,
        )?);
        trace!(bytes = cose.len(), "inflated");
        let value = CborValue::decode_with_depth(cose, self.limits.max_nesting_depth)?;
        let envelope = CoseSign1::parse_with_depth(value, self.limits.max_nesting_depth)?;
        debug!(
            key_id = ?envelope.key_id(),
            algorithm = ?envelope.algorithm(),
            "parsed COSE_Sign1 envelope"
        );
        Ok(envelope)
    }

    /// Decodes a token into its certificate record. Verification never
    /// prevents a record from being returned; its result is attached as
    /// [`DecodedCertificate::verification`].
    pub fn decode(&self, token: &str) -> Result<DecodedCertificate, DecodeError> {
        let envelope = self.envelope(token)?;
        let payload = envelope
            .payload
            .clone()
            .ok_or(EnvelopeError::DetachedPayload)?;
        let claims = CborValue::decode_with_depth(payload, self.limits.max_nesting_depth)?;
        let record = map_payload(&claims)?;
        let verification = self.verify(&envelope);
        debug!(issuer = %record.issuer, ?verification, "decoded certificate");

        Ok(DecodedCertificate {
            record,
            key_id: envelope.key_id().cloned(),
            algorithm: envelope.algorithm().ok().flatten(),
            verification,
        })
    }

    #[cfg(feature = "validate")]
    fn verify(&self, envelope: &CoseSign1) -> VerificationOutcome {
        self.trust.map_or(VerificationOutcome::NotAttempted, |trust| {
            envelope.verify(trust)
        })
    }

    #[cfg(not(feature = "validate"))]
    fn verify(&self, _: &CoseSign1) -> VerificationOutcome {
        VerificationOutcome::NotAttempted
    }
}

fn strip_scheme(token: &str) -> Result<&str, SchemeError> {
    token
        .trim_end_matches(['\r', '\n'])
        .strip_prefix(SCHEME_PREFIX)
        .ok_or(SchemeError::UnrecognizedScheme)
}

/// Decodes a token with default limits and without signature verification.
pub fn decode(token: &str) -> Result<DecodedCertificate, DecodeError> {
    Pipeline::new().decode(token)
}

impl DecodedCertificate {
    #[cfg(feature = "json")]
    pub fn to_json(&self) -> Result<String, EncodeError> {
        serde_json::to_string(self)
            .map_err(|e| EncodeError::Json(format!("Error encoding JSON: {e:?}")))
    }

    #[cfg(not(feature = "json"))]
    pub fn to_json(&self) -> Result<String, EncodeError> {
        Err(EncodeError::Unsupported(
            "JSON output requires the \"json\" feature".into(),
        ))
    }
}
