use std::collections::HashMap;

use bytes::Bytes;
use openssl::{
    bn::BigNumContext,
    ec::PointConversionForm,
    nid::Nid,
    pkey::{Id, PKey, Public},
    x509::X509,
};
use tracing::{debug, warn};

use crate::{Algorithm, CryptoError};

/// Verification key of a trusted issuer.
#[derive(Debug, Clone)]
pub enum PublicKey {
    EcP256(p256::ecdsa::VerifyingKey),
    EcP384(p384::ecdsa::VerifyingKey),
    Rsa(PKey<Public>),
}

/// A document signer certificate the caller chose to trust.
#[derive(Debug, Clone)]
pub struct TrustedCert {
    pub key_id: Bytes,
    pub algorithm: Algorithm,
    pub key: PublicKey,
    pub country: Option<String>,
}

impl TrustedCert {
    /// Extracts the public key of a DER encoded X.509 certificate.
    /// EC keys on P-256 and P-384 map to ES256 and ES384, RSA keys to PS256.
    /// An envelope may still select PS384 or PS512 for an RSA key.
    pub fn from_x509_der(
        key_id: impl Into<Bytes>,
        der: &[u8],
        country: Option<String>,
    ) -> Result<Self, CryptoError> {
        let certificate = X509::from_der(der)
            .map_err(|e| CryptoError::MalformedKey(format!("invalid X.509 certificate: {e}")))?;
        let key = certificate.public_key()?;
        Self::from_pkey(key_id.into(), &key, country)
    }

    /// Same as [`TrustedCert::from_x509_der`] for a DER encoded
    /// SubjectPublicKeyInfo.
    pub fn from_spki_der(
        key_id: impl Into<Bytes>,
        der: &[u8],
        country: Option<String>,
    ) -> Result<Self, CryptoError> {
        let key = PKey::public_key_from_der(der)
            .map_err(|e| CryptoError::MalformedKey(format!("invalid public key: {e}")))?;
        Self::from_pkey(key_id.into(), &key, country)
    }

    fn from_pkey(
        key_id: Bytes,
        key: &PKey<Public>,
        country: Option<String>,
    ) -> Result<Self, CryptoError> {
        let (algorithm, key) = match key.id() {
            Id::EC => {
                let ec = key.ec_key()?;
                let group = ec.group();
                let mut ctx = BigNumContext::new()?;
                let point =
                    ec.public_key()
                        .to_bytes(group, PointConversionForm::UNCOMPRESSED, &mut ctx)?;
                match group.curve_name() {
                    Some(Nid::X9_62_PRIME256V1) => (
                        Algorithm::ES256,
                        PublicKey::EcP256(
                            p256::ecdsa::VerifyingKey::from_sec1_bytes(&point)
                                .map_err(|e| CryptoError::MalformedKey(format!("{e:?}")))?,
                        ),
                    ),
                    Some(Nid::SECP384R1) => (
                        Algorithm::ES384,
                        PublicKey::EcP384(
                            p384::ecdsa::VerifyingKey::from_sec1_bytes(&point)
                                .map_err(|e| CryptoError::MalformedKey(format!("{e:?}")))?,
                        ),
                    ),
                    other => {
                        return Err(CryptoError::MalformedKey(format!(
                            "unsupported elliptic curve {other:?}"
                        )))
                    }
                }
            }
            Id::RSA => (Algorithm::PS256, PublicKey::Rsa(key.clone())),
            other => {
                return Err(CryptoError::MalformedKey(format!(
                    "unsupported key type {other:?}"
                )))
            }
        };
        Ok(TrustedCert {
            key_id,
            algorithm,
            key,
            country,
        })
    }
}

/// Immutable lookup table from key identifier to trusted certificate.
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    certificates: HashMap<Bytes, TrustedCert>,
}

impl TrustStore {
    /// Builds the store. When several certificates share a key identifier the
    /// first one is kept.
    pub fn new(certificates: impl IntoIterator<Item = TrustedCert>) -> Self {
        let mut map = HashMap::new();
        for cert in certificates {
            if map.contains_key(&cert.key_id) {
                warn!(key_id = ?cert.key_id, "duplicate key identifier in trust list, keeping the first");
                continue;
            }
            map.insert(cert.key_id.clone(), cert);
        }
        debug!(certificates = map.len(), "trust store ready");
        TrustStore { certificates: map }
    }

    #[must_use]
    pub fn resolve(&self, key_id: &[u8]) -> Option<&TrustedCert> {
        self.certificates.get(key_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}

#[cfg(feature = "json")]
mod trust_list {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::Deserialize;
    use tracing::warn;

    use super::{TrustStore, TrustedCert};

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    pub enum TrustListError {
        #[error("invalid trust list document: {0}")]
        Json(String),
    }

    #[derive(Debug, Deserialize, PartialEq, Eq)]
    enum CertificateType {
        #[serde(rename = "DCC")]
        Dcc,
        #[serde(other)]
        Other,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Entry {
        certificate_type: CertificateType,
        country: Option<String>,
        kid: String,
        raw_data: String,
    }

    #[derive(Debug, Deserialize)]
    struct Document {
        certificates: Vec<Entry>,
    }

    impl TrustStore {
        /// Builds a store from a trust list document of the shape
        /// `{"certificates": [{"certificateType": "DCC", "country": .., "kid": .., "rawData": ..}]}`
        /// where `kid` and `rawData` (X.509 DER) are base64 encoded.
        /// Entries that are not DCC signers or that cannot be used are skipped.
        pub fn from_json(document: &str) -> Result<Self, TrustListError> {
            let document: Document = serde_json::from_str(document)
                .map_err(|e| TrustListError::Json(e.to_string()))?;
            let certificates = document
                .certificates
                .into_iter()
                .filter(|entry| entry.certificate_type == CertificateType::Dcc)
                .filter_map(|entry| match load(&entry) {
                    Ok(cert) => Some(cert),
                    Err(reason) => {
                        warn!(kid = %entry.kid, country = ?entry.country, %reason, "skipping trust list entry");
                        None
                    }
                });
            Ok(TrustStore::new(certificates))
        }
    }

    fn load(entry: &Entry) -> Result<TrustedCert, String> {
        let kid = STANDARD
            .decode(&entry.kid)
            .map_err(|e| format!("kid is not base64: {e}"))?;
        let der = STANDARD
            .decode(&entry.raw_data)
            .map_err(|e| format!("rawData is not base64: {e}"))?;
        TrustedCert::from_x509_der(kid, &der, entry.country.clone()).map_err(|e| e.to_string())
    }
}

#[cfg(feature = "json")]
pub use trust_list::TrustListError;
