use ecdsa::signature::hazmat::PrehashVerifier;
use openssl::{
    error::ErrorStack,
    hash::MessageDigest,
    pkey::{PKey, Public},
    rsa::Padding,
    sign::{RsaPssSaltlen, Verifier},
};
use p256::NistP256;
use p384::NistP384;
use sha2::{Digest, Sha256, Sha384};
use tracing::{debug, info};

use crate::{
    trust::{PublicKey, TrustStore, TrustedCert},
    Algorithm, CoseSign1, CryptoError, VerificationOutcome,
};

impl From<ErrorStack> for CryptoError {
    fn from(value: ErrorStack) -> Self {
        CryptoError::Backend(value.to_string())
    }
}

/// Checks `signature` over `sig_structure` with the key of `cert`.
/// #### Returns
/// - `Ok(true)` if the signature matches
/// - `Ok(false)` if it does not
/// - `Err(CryptoError)` if the algorithm is not supported, does not fit the
///   key, or the signature or key cannot be parsed
pub fn verify(
    sig_structure: &[u8],
    signature: &[u8],
    cert: &TrustedCert,
) -> Result<bool, CryptoError> {
    verify_with(cert.algorithm, &cert.key, sig_structure, signature)
}

fn verify_with(
    algorithm: Algorithm,
    key: &PublicKey,
    sig_structure: &[u8],
    signature: &[u8],
) -> Result<bool, CryptoError> {
    match (algorithm, key) {
        (Algorithm::ES256, PublicKey::EcP256(key)) => {
            let signature = ecdsa::Signature::<NistP256>::from_slice(signature)
                .map_err(|e| CryptoError::MalformedSignature(format!("{e:?}")))?;
            Ok(key
                .verify_prehash(&sha256(sig_structure), &signature)
                .is_ok())
        }
        (Algorithm::ES384, PublicKey::EcP384(key)) => {
            let signature = ecdsa::Signature::<NistP384>::from_slice(signature)
                .map_err(|e| CryptoError::MalformedSignature(format!("{e:?}")))?;
            Ok(key
                .verify_prehash(&sha384(sig_structure), &signature)
                .is_ok())
        }
        (Algorithm::PS256, PublicKey::Rsa(key)) => {
            rsa_pss(MessageDigest::sha256(), key, sig_structure, signature)
        }
        (Algorithm::PS384, PublicKey::Rsa(key)) => {
            rsa_pss(MessageDigest::sha384(), key, sig_structure, signature)
        }
        (Algorithm::PS512, PublicKey::Rsa(key)) => {
            rsa_pss(MessageDigest::sha512(), key, sig_structure, signature)
        }
        (algorithm @ (Algorithm::ES512 | Algorithm::Other(_)), _) => {
            Err(CryptoError::UnsupportedAlgorithm(algorithm))
        }
        (algorithm, _) => Err(CryptoError::KeyMismatch(algorithm)),
    }
}

fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().as_slice().to_vec()
}

fn sha384(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha384::new();
    hasher.update(data);
    hasher.finalize().as_slice().to_vec()
}

fn rsa_pss(
    digest: MessageDigest,
    key: &PKey<Public>,
    msg: &[u8],
    signature: &[u8],
) -> Result<bool, CryptoError> {
    let mut verifier = Verifier::new(digest, key)?;
    verifier.set_rsa_padding(Padding::PKCS1_PSS)?;
    verifier.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)?;
    verifier.set_rsa_mgf1_md(digest)?;
    verifier.update(msg)?;
    Ok(verifier.verify(signature)?)
}

impl CoseSign1 {
    /// Verifies the envelope against the certificate registered for its key
    /// identifier. Every failure is folded into the returned outcome.
    #[must_use]
    pub fn verify(&self, trust: &TrustStore) -> VerificationOutcome {
        let Some(key_id) = self.key_id() else {
            return VerificationOutcome::Invalid(CryptoError::MissingKeyId);
        };
        let Some(cert) = trust.resolve(key_id) else {
            info!(?key_id, "no trusted certificate for key identifier");
            return VerificationOutcome::KeyUnknown(key_id.clone());
        };
        let header = match self.algorithm() {
            Ok(header) => header,
            Err(e) => {
                return VerificationOutcome::Invalid(CryptoError::MalformedHeader(e.to_string()))
            }
        };
        // An RSA key serves every PSS digest, so the header picks the variant.
        let algorithm = match (header, &cert.key) {
            (Some(algorithm @ (Algorithm::ES512 | Algorithm::Other(_))), _) => {
                return VerificationOutcome::Invalid(CryptoError::UnsupportedAlgorithm(algorithm))
            }
            (
                Some(algorithm @ (Algorithm::PS256 | Algorithm::PS384 | Algorithm::PS512)),
                PublicKey::Rsa(_),
            ) => algorithm,
            (Some(header), _) if header != cert.algorithm => {
                return VerificationOutcome::Invalid(CryptoError::AlgorithmMismatch {
                    header,
                    certificate: cert.algorithm,
                })
            }
            (header, _) => header.unwrap_or(cert.algorithm),
        };
        let Some(sig_structure) = self.sig_structure() else {
            return VerificationOutcome::Invalid(CryptoError::DetachedPayload);
        };

        let outcome = match verify_with(algorithm, &cert.key, &sig_structure, &self.signature) {
            Ok(true) => VerificationOutcome::Valid,
            Ok(false) => VerificationOutcome::Invalid(CryptoError::SignatureMismatch),
            Err(e) => VerificationOutcome::Invalid(e),
        };
        debug!(?key_id, ?algorithm, ?outcome, "signature checked");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::{
        cose::sig_structure,
        test_util::{p256_signing_key, rsa_key, sign_es256, sign_ps256, sign_pss},
        CborValue,
    };

    fn es256_cert(seed: u8) -> TrustedCert {
        TrustedCert {
            key_id: Bytes::from_static(b"kid"),
            algorithm: Algorithm::ES256,
            key: PublicKey::EcP256(p256::ecdsa::VerifyingKey::from(&p256_signing_key(seed))),
            country: None,
        }
    }

    fn envelope(protected: &[u8], unprotected: Vec<(CborValue, CborValue)>, seed: u8) -> CoseSign1 {
        signed_envelope(protected, unprotected, |tbs| {
            sign_es256(&p256_signing_key(seed), tbs)
        })
    }

    fn signed_envelope(
        protected: &[u8],
        unprotected: Vec<(CborValue, CborValue)>,
        sign: impl FnOnce(&[u8]) -> Vec<u8>,
    ) -> CoseSign1 {
        let payload = Bytes::from_static(b"payload");
        let tbs = sig_structure(protected, &payload);
        let protected = Bytes::copy_from_slice(protected);
        let protected_header = match CborValue::decode(protected.clone()).unwrap() {
            CborValue::Map(entries) => entries,
            _ => unreachable!(),
        };
        CoseSign1 {
            protected,
            protected_header,
            unprotected,
            payload: Some(payload),
            signature: sign(&tbs).into(),
        }
    }

    // {1: -7, 4: h'6b6964'}
    const ES256_KID: [u8; 8] = [0xa2, 0x01, 0x26, 0x04, 0x43, 0x6b, 0x69, 0x64];

    #[test]
    fn verifies_es256() {
        let tbs = sig_structure(&[0xa1, 0x01, 0x26], b"content");
        let signature = sign_es256(&p256_signing_key(7), &tbs);
        assert_eq!(verify(&tbs, &signature, &es256_cert(7)), Ok(true));
        assert_eq!(verify(&tbs, &signature, &es256_cert(8)), Ok(false));
        assert_eq!(verify(b"other", &signature, &es256_cert(7)), Ok(false));
        assert!(matches!(
            verify(&tbs, &signature[..63], &es256_cert(7)),
            Err(CryptoError::MalformedSignature(_))
        ));
    }

    #[test]
    fn verifies_ps256() {
        let key = rsa_key();
        let cert = TrustedCert {
            key_id: Bytes::from_static(b"rsa"),
            algorithm: Algorithm::PS256,
            key: PublicKey::Rsa(
                PKey::public_key_from_der(&key.public_key_to_der().unwrap()).unwrap(),
            ),
            country: None,
        };
        let tbs = sig_structure(&[0xa1, 0x01, 0x38, 0x24], b"content");
        let signature = sign_ps256(&key, &tbs);
        assert_eq!(verify(&tbs, &signature, &cert), Ok(true));
        assert_eq!(verify(b"tampered", &signature, &cert), Ok(false));
    }

    #[test]
    fn rejects_unsupported_algorithms_and_mismatched_keys() {
        let mut cert = es256_cert(1);
        cert.algorithm = Algorithm::ES512;
        assert_eq!(
            verify(b"msg", &[0; 132], &cert),
            Err(CryptoError::UnsupportedAlgorithm(Algorithm::ES512))
        );
        cert.algorithm = Algorithm::Other(-8);
        assert_eq!(
            verify(b"msg", &[0; 64], &cert),
            Err(CryptoError::UnsupportedAlgorithm(Algorithm::Other(-8)))
        );
        cert.algorithm = Algorithm::PS256;
        assert_eq!(
            verify(b"msg", &[0; 64], &cert),
            Err(CryptoError::KeyMismatch(Algorithm::PS256))
        );
    }

    #[test]
    fn verifies_envelopes_against_trust_store() {
        let store = TrustStore::new([es256_cert(3)]);
        assert_eq!(
            envelope(&ES256_KID, vec![], 3).verify(&store),
            VerificationOutcome::Valid
        );
        assert_eq!(
            envelope(&ES256_KID, vec![], 4).verify(&store),
            VerificationOutcome::Invalid(CryptoError::SignatureMismatch)
        );

        let unprotected_kid = vec![(4u64.into(), Bytes::from_static(b"kid").into())];
        assert_eq!(
            envelope(&[0xa1, 0x01, 0x26], unprotected_kid, 3).verify(&store),
            VerificationOutcome::Valid
        );
    }

    #[test]
    fn takes_pss_digest_from_header() {
        let key = rsa_key();
        let cert =
            TrustedCert::from_spki_der(&b"rsa"[..], &key.public_key_to_der().unwrap(), None)
                .unwrap();
        assert_eq!(cert.algorithm, Algorithm::PS256);
        let store = TrustStore::new([cert]);

        // {1: alg, 4: h'727361'} for PS256 (-37), PS384 (-38), PS512 (-39)
        for (alg, digest) in [
            (0x24, MessageDigest::sha256()),
            (0x25, MessageDigest::sha384()),
            (0x26, MessageDigest::sha512()),
        ] {
            let protected = [0xa2, 0x01, 0x38, alg, 0x04, 0x43, b'r', b's', b'a'];
            let cose = signed_envelope(&protected, vec![], |tbs| sign_pss(&key, digest, tbs));
            assert_eq!(cose.verify(&store), VerificationOutcome::Valid);
        }

        let ps384 = [0xa2, 0x01, 0x38, 0x25, 0x04, 0x43, b'r', b's', b'a'];
        let cose = signed_envelope(&ps384, vec![], |tbs| sign_ps256(&key, tbs));
        assert_eq!(
            cose.verify(&store),
            VerificationOutcome::Invalid(CryptoError::SignatureMismatch)
        );

        let es256 = [0xa2, 0x01, 0x26, 0x04, 0x43, b'r', b's', b'a'];
        let cose = signed_envelope(&es256, vec![], |tbs| sign_ps256(&key, tbs));
        assert_eq!(
            cose.verify(&store),
            VerificationOutcome::Invalid(CryptoError::AlgorithmMismatch {
                header: Algorithm::ES256,
                certificate: Algorithm::PS256
            })
        );
    }

    #[test]
    fn rejects_non_integer_algorithm_header() {
        let store = TrustStore::new([es256_cert(3)]);
        // {1: "ES256", 4: h'6b6964'}
        let protected = [
            0xa2, 0x01, 0x65, b'E', b'S', b'2', b'5', b'6', 0x04, 0x43, 0x6b, 0x69, 0x64,
        ];
        assert!(matches!(
            envelope(&protected, vec![], 3).verify(&store),
            VerificationOutcome::Invalid(CryptoError::MalformedHeader(_))
        ));
    }

    #[test]
    fn reports_key_and_header_problems() {
        let store = TrustStore::new([es256_cert(3)]);
        // {1: -7, 4: h'6f74686572'}
        let other_kid = [0xa2, 0x01, 0x26, 0x04, 0x45, b'o', b't', b'h', b'e', b'r'];
        assert_eq!(
            envelope(&other_kid, vec![], 3).verify(&store),
            VerificationOutcome::KeyUnknown(Bytes::from_static(b"other"))
        );
        assert_eq!(
            envelope(&[0xa1, 0x01, 0x26], vec![], 3).verify(&store),
            VerificationOutcome::Invalid(CryptoError::MissingKeyId)
        );
        // {1: -37, 4: h'6b6964'}
        let ps256_kid = [0xa2, 0x01, 0x38, 0x24, 0x04, 0x43, 0x6b, 0x69, 0x64];
        assert_eq!(
            envelope(&ps256_kid, vec![], 3).verify(&store),
            VerificationOutcome::Invalid(CryptoError::AlgorithmMismatch {
                header: Algorithm::PS256,
                certificate: Algorithm::ES256
            })
        );
        // {1: -8, 4: h'6b6964'}
        let eddsa_kid = [0xa2, 0x01, 0x27, 0x04, 0x43, 0x6b, 0x69, 0x64];
        assert_eq!(
            envelope(&eddsa_kid, vec![], 3).verify(&store),
            VerificationOutcome::Invalid(CryptoError::UnsupportedAlgorithm(Algorithm::Other(-8)))
        );

        let mut detached = envelope(&ES256_KID, vec![], 3);
        detached.payload = None;
        assert_eq!(
            detached.verify(&store),
            VerificationOutcome::Invalid(CryptoError::DetachedPayload)
        );
    }
}
