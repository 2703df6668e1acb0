//! Mapping of the CWT claims set into a [`DccRecord`].
//!
//! The claims map uses integer keys (`1` issuer, `4` expiry, `6` issued at,
//! `-260` health certificate). The certificate itself sits under key `1` of
//! the health certificate container and uses short text keys.

use tracing::{debug, warn};

use crate::{
    CborValue, DccRecord, Name, Recovery, Statement, Subject, Test, Timestamp, Vaccination,
    ValueKind,
};

const CLAIM_ISSUER: i64 = 1;
const CLAIM_EXPIRES_AT: i64 = 4;
const CLAIM_ISSUED_AT: i64 = 6;
const CLAIM_HCERT: i64 = -260;
const HCERT_EU_DGC_V1: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("missing required field {0:?}")]
    MissingField(String),
    #[error("field {key:?} must be {expected}, found {found}")]
    SchemaTypeMismatch {
        key: String,
        expected: ValueKind,
        found: ValueKind,
    },
}

fn mismatch(key: &str, expected: ValueKind, found: &CborValue) -> SchemaError {
    SchemaError::SchemaTypeMismatch {
        key: key.to_owned(),
        expected,
        found: found.kind(),
    }
}

/// Typed access to the entries of a CBOR map, reporting errors under a
/// human readable field name.
struct Fields<'a> {
    entries: &'a [(CborValue, CborValue)],
}

impl<'a> Fields<'a> {
    fn of(value: &'a CborValue, name: &str) -> Result<Self, SchemaError> {
        value
            .as_map()
            .map(|entries| Fields { entries })
            .ok_or_else(|| mismatch(name, ValueKind::Map, value))
    }

    fn lookup(&self, key: &CborValue) -> Option<&'a CborValue> {
        self.entries
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    fn required(&self, key: &CborValue, name: &str) -> Result<&'a CborValue, SchemaError> {
        self.lookup(key)
            .ok_or_else(|| SchemaError::MissingField(name.to_owned()))
    }

    fn text(&self, key: &str) -> Result<String, SchemaError> {
        let value = self.required(&key.into(), key)?;
        as_text(value, key)
    }

    fn optional_text(&self, key: &str) -> Result<Option<String>, SchemaError> {
        match self.lookup(&key.into()) {
            None | Some(CborValue::Null) => Ok(None),
            Some(value) => as_text(value, key).map(Some),
        }
    }

    fn unsigned(&self, key: &str) -> Result<u64, SchemaError> {
        let value = self.required(&key.into(), key)?;
        value
            .as_u64()
            .ok_or_else(|| mismatch(key, ValueKind::Integer, value))
    }
}

fn as_text(value: &CborValue, key: &str) -> Result<String, SchemaError> {
    value
        .as_text()
        .map(str::to_owned)
        .ok_or_else(|| mismatch(key, ValueKind::TextString, value))
}

fn timestamp(value: &CborValue, name: &str) -> Result<Timestamp, SchemaError> {
    value
        .as_i64()
        .map(Timestamp)
        .ok_or_else(|| mismatch(name, ValueKind::Integer, value))
}

/// Maps a decoded CWT claims set into a [`DccRecord`].
pub fn map_payload(payload: &CborValue) -> Result<DccRecord, SchemaError> {
    let claims = Fields::of(payload, "payload")?;
    for (key, _) in claims.entries {
        match key.as_i64() {
            Some(CLAIM_ISSUER | CLAIM_EXPIRES_AT | CLAIM_ISSUED_AT | CLAIM_HCERT) => {}
            _ => debug!(?key, "ignoring unknown claim"),
        }
    }

    let issuer = as_text(
        claims.required(&CLAIM_ISSUER.into(), "issuer")?,
        "issuer",
    )?;
    let expires_at = timestamp(
        claims.required(&CLAIM_EXPIRES_AT.into(), "expires_at")?,
        "expires_at",
    )?;
    let issued_at = timestamp(
        claims.required(&CLAIM_ISSUED_AT.into(), "issued_at")?,
        "issued_at",
    )?;
    let hcert = Fields::of(claims.required(&CLAIM_HCERT.into(), "hcert")?, "hcert")?;
    let dgc = Fields::of(
        hcert.required(&HCERT_EU_DGC_V1.into(), "eu_dgc_v1")?,
        "eu_dgc_v1",
    )?;

    let version = dgc.text("ver")?;
    let subject = Subject {
        name: map_name(dgc.required(&"nam".into(), "nam")?)?,
        date_of_birth: dgc.text("dob")?,
    };
    let statements = map_statements(&dgc)?;
    if statements.is_empty() {
        warn!(%issuer, "certificate carries no statements");
    }
    debug!(%issuer, statements = statements.len(), "mapped certificate payload");

    Ok(DccRecord {
        issuer,
        issued_at,
        expires_at,
        version,
        subject,
        statements,
    })
}

fn map_name(value: &CborValue) -> Result<Name, SchemaError> {
    let name = Fields::of(value, "nam")?;
    Ok(Name {
        family_name: name.optional_text("fn")?,
        family_name_standardised: name.text("fnt")?,
        given_name: name.optional_text("gn")?,
        given_name_standardised: name.optional_text("gnt")?,
    })
}

fn map_statements(dgc: &Fields<'_>) -> Result<Vec<Statement>, SchemaError> {
    let mut statements = Vec::new();
    for (index, (key, value)) in dgc.entries.iter().enumerate() {
        if dgc.entries[..index].iter().any(|(seen, _)| seen == key) {
            debug!(?key, "ignoring repeated key in certificate");
            continue;
        }
        let (kind, map_one): (&str, fn(&CborValue) -> Result<Statement, SchemaError>) =
            match key.as_text() {
                Some("ver" | "nam" | "dob") => continue,
                Some(kind @ "v") => (kind, |v| map_vaccination(v).map(Statement::Vaccination)),
                Some(kind @ "t") => (kind, |v| map_test(v).map(Statement::Test)),
                Some(kind @ "r") => (kind, |v| map_recovery(v).map(Statement::Recovery)),
                _ => {
                    debug!(?key, "keeping statement of unknown kind");
                    let unknown = |value: &CborValue| Statement::Unknown {
                        kind: key.clone(),
                        value: value.clone(),
                    };
                    match value {
                        CborValue::Array(items) => statements.extend(items.iter().map(unknown)),
                        other => statements.push(unknown(other)),
                    }
                    continue;
                }
            };
        let items = value
            .as_array()
            .ok_or_else(|| mismatch(kind, ValueKind::Array, value))?;
        for item in items {
            statements.push(map_one(item)?);
        }
    }
    Ok(statements)
}

fn map_vaccination(value: &CborValue) -> Result<Vaccination, SchemaError> {
    let v = Fields::of(value, "v")?;
    Ok(Vaccination {
        disease_targeted: v.text("tg")?,
        vaccine: v.text("vp")?,
        medicinal_product: v.text("mp")?,
        manufacturer: v.text("ma")?,
        dose_number: v.unsigned("dn")?,
        total_doses: v.unsigned("sd")?,
        date: v.text("dt")?,
        country: v.text("co")?,
        certificate_issuer: v.text("is")?,
        certificate_id: v.text("ci")?,
    })
}

fn map_test(value: &CborValue) -> Result<Test, SchemaError> {
    let t = Fields::of(value, "t")?;
    Ok(Test {
        disease_targeted: t.text("tg")?,
        test_type: t.text("tt")?,
        test_name: t.optional_text("nm")?,
        test_device: t.optional_text("ma")?,
        sample_collected_at: t.text("sc")?,
        result: t.text("tr")?,
        test_centre: t.optional_text("tc")?,
        country: t.text("co")?,
        certificate_issuer: t.text("is")?,
        certificate_id: t.text("ci")?,
    })
}

fn map_recovery(value: &CborValue) -> Result<Recovery, SchemaError> {
    let r = Fields::of(value, "r")?;
    Ok(Recovery {
        disease_targeted: r.text("tg")?,
        first_positive_test: r.text("fr")?,
        country: r.text("co")?,
        certificate_issuer: r.text("is")?,
        valid_from: r.text("df")?,
        valid_until: r.text("du")?,
        certificate_id: r.text("ci")?,
    })
}
