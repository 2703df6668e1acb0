//! Fixture builders shared by the unit tests.

use std::io::Write;

use bytes::Bytes;
use flate2::{write::ZlibEncoder, Compression};

use crate::{base45, CborValue, Encode, COSE_SIGN1_TAG};

pub(crate) const ISSUED_AT: i64 = 1_624_000_000;
pub(crate) const EXPIRES_AT: i64 = 1_655_536_000;

pub(crate) fn vaccination() -> CborValue {
    CborValue::Array(vec![CborValue::Map(vec![
        ("tg".into(), "840539006".into()),
        ("vp".into(), "1119349007".into()),
        ("mp".into(), "EU/1/20/1528".into()),
        ("ma".into(), "ORG-100030215".into()),
        ("dn".into(), 1u64.into()),
        ("sd".into(), 2u64.into()),
        ("dt".into(), "2021-02-18".into()),
        ("co".into(), "AT".into()),
        ("is".into(), "Ministry of Health, Austria".into()),
        ("ci".into(), "URN:UVCI:01:AT:10807843F94AEE0EE5093FBC254BD813#B".into()),
    ])])
}

/// Certificate map with subject data and the given statement entries.
pub(crate) fn dgc(statements: Vec<(&str, CborValue)>) -> CborValue {
    let mut entries = vec![
        (
            "nam".into(),
            CborValue::Map(vec![
                ("fn".into(), "Musterfrau-Gößinger".into()),
                ("fnt".into(), "MUSTERFRAU<GOESSINGER".into()),
                ("gn".into(), "Gabriele".into()),
                ("gnt".into(), "GABRIELE".into()),
            ]),
        ),
        ("dob".into(), "1998-02-26".into()),
    ];
    entries.extend(statements.into_iter().map(|(k, v)| (k.into(), v)));
    entries.push(("ver".into(), "1.3.0".into()));
    CborValue::Map(entries)
}

/// CWT claims set wrapping a certificate map.
pub(crate) fn claims(dgc: CborValue) -> CborValue {
    CborValue::Map(vec![
        (1i64.into(), "AT".into()),
        (4i64.into(), EXPIRES_AT.into()),
        (6i64.into(), ISSUED_AT.into()),
        (
            (-260i64).into(),
            CborValue::Map(vec![(1i64.into(), dgc)]),
        ),
    ])
}

/// Serialized protected header `{1: alg, 4: kid}`.
pub(crate) fn protected_header(alg: i64, kid: &[u8]) -> Vec<u8> {
    CborValue::Map(vec![
        (1i64.into(), alg.into()),
        (4i64.into(), Bytes::copy_from_slice(kid).into()),
    ])
    .encode_to_vec()
    .unwrap()
}

/// Builds a complete `HC1:` token. `sign` receives the Sig_structure.
pub(crate) fn token(
    protected: &[u8],
    payload: &CborValue,
    sign: impl FnOnce(&[u8]) -> Vec<u8>,
) -> String {
    let payload = payload.encode_to_vec().unwrap();
    let signature = sign(&crate::sig_structure(protected, &payload));
    let envelope = CborValue::Tag(
        COSE_SIGN1_TAG,
        Box::new(CborValue::Array(vec![
            Bytes::copy_from_slice(protected).into(),
            CborValue::Map(vec![]),
            Bytes::from(payload).into(),
            Bytes::from(signature).into(),
        ])),
    );
    token_from_cose(&envelope.encode_to_vec().unwrap())
}

pub(crate) fn token_from_cose(cose: &[u8]) -> String {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(cose).unwrap();
    format!("HC1:{}", base45::encode(&encoder.finish().unwrap()))
}

#[cfg(feature = "validate")]
pub(crate) use crypto::*;

#[cfg(feature = "validate")]
mod crypto {
    use openssl::{
        asn1::Asn1Time,
        bn::BigNum,
        ec::{EcGroup, EcKey},
        ecdsa::EcdsaSig,
        hash::MessageDigest,
        nid::Nid,
        pkey::{PKey, Private},
        rsa::{Padding, Rsa},
        sign::{RsaPssSaltlen, Signer},
        x509::{X509NameBuilder, X509},
    };
    use p256::ecdsa::{signature::Signer as _, Signature, SigningKey};
    use sha2::{Digest, Sha256};

    /// Deterministic P-256 key, distinct per seed.
    pub(crate) fn p256_signing_key(seed: u8) -> SigningKey {
        SigningKey::from_slice(&[seed.max(1); 32]).unwrap()
    }

    pub(crate) fn sign_es256(key: &SigningKey, msg: &[u8]) -> Vec<u8> {
        let signature: Signature = key.sign(msg);
        signature.to_bytes().to_vec()
    }

    pub(crate) fn rsa_key() -> PKey<Private> {
        PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
    }

    pub(crate) fn sign_ps256(key: &PKey<Private>, msg: &[u8]) -> Vec<u8> {
        sign_pss(key, MessageDigest::sha256(), msg)
    }

    /// RSA-PSS with MGF1 over `digest` and a salt as long as the digest.
    pub(crate) fn sign_pss(key: &PKey<Private>, digest: MessageDigest, msg: &[u8]) -> Vec<u8> {
        let mut signer = Signer::new(digest, key).unwrap();
        signer.set_rsa_padding(Padding::PKCS1_PSS).unwrap();
        signer
            .set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)
            .unwrap();
        signer.set_rsa_mgf1_md(digest).unwrap();
        signer.update(msg).unwrap();
        signer.sign_to_vec().unwrap()
    }

    /// Produces a COSE style `r || s` ES256 signature with an OpenSSL key.
    pub(crate) fn sign_es256_openssl(key: &EcKey<Private>, msg: &[u8]) -> Vec<u8> {
        let digest = Sha256::digest(msg);
        let signature = EcdsaSig::sign(&digest, key).unwrap();
        [
            signature.r().to_vec_padded(32).unwrap(),
            signature.s().to_vec_padded(32).unwrap(),
        ]
        .concat()
    }

    /// Self signed document signer certificate on the given curve, returned
    /// with its private key as DER.
    pub(crate) fn self_signed_ec_certificate(curve: Nid) -> (EcKey<Private>, Vec<u8>) {
        let group = EcGroup::from_curve_name(curve).unwrap();
        let ec_key = EcKey::generate(&group).unwrap();
        let pkey = PKey::from_ec_key(ec_key.clone()).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::COUNTRYNAME, "AT").unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, "DSC test").unwrap();
        let name = name.build();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&pkey).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(365).unwrap())
            .unwrap();
        builder.sign(&pkey, MessageDigest::sha256()).unwrap();
        (ec_key, builder.build().to_der().unwrap())
    }
}
