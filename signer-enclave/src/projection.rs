//! Projection of verified attestation documents into EIP-712 messages.
//!
//! Field names come from a fixed vocabulary: `pcr0` through `pcr31`,
//! `public_key`, `user_data`, `nonce`, `timestamp`, `module_id` and `digest`.
//! The message members follow the requested order, with repeated names
//! collapsed to their first occurrence.

use std::{fmt, str::FromStr};

use attestation_verifier::{constants::PCR_COUNT, AttestationDocument};
use thiserror::Error;

use crate::eip712::{TypedField, TypedMessage, TypedValue, DOMAIN_TYPE};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("Unknown field to sign: {0}")]
    InvalidField(String),

    #[error("Field {0} is not present in the attestation document")]
    FieldAbsent(String),

    #[error("Invalid primary type: {0}")]
    InvalidPrimaryType(String),
}

/// A signable attestation document field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Pcr(u8),
    PublicKey,
    UserData,
    Nonce,
    Timestamp,
    ModuleId,
    Digest,
}

impl FromStr for FieldKind {
    type Err = ProjectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public_key" => Ok(Self::PublicKey),
            "user_data" => Ok(Self::UserData),
            "nonce" => Ok(Self::Nonce),
            "timestamp" => Ok(Self::Timestamp),
            "module_id" => Ok(Self::ModuleId),
            "digest" => Ok(Self::Digest),
            _ => parse_pcr(s)
                .map(Self::Pcr)
                .ok_or_else(|| ProjectionError::InvalidField(s.to_string())),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pcr(index) => write!(f, "pcr{index}"),
            Self::PublicKey => f.write_str("public_key"),
            Self::UserData => f.write_str("user_data"),
            Self::Nonce => f.write_str("nonce"),
            Self::Timestamp => f.write_str("timestamp"),
            Self::ModuleId => f.write_str("module_id"),
            Self::Digest => f.write_str("digest"),
        }
    }
}

impl FieldKind {
    /// Reads the field from `document`
    ///
    /// # Errors
    /// Returns `FieldAbsent` if the document does not carry the field.
    pub fn resolve(self, document: &AttestationDocument) -> Result<TypedValue, ProjectionError> {
        let bytes = |value: Option<&[u8]>| {
            value
                .map(|value| TypedValue::Bytes(value.to_vec()))
                .ok_or_else(|| ProjectionError::FieldAbsent(self.to_string()))
        };

        match self {
            Self::Pcr(index) => bytes(document.pcr(usize::from(index))),
            Self::PublicKey => bytes(document.public_key()),
            Self::UserData => bytes(document.user_data()),
            Self::Nonce => bytes(document.nonce()),
            Self::Timestamp => Ok(TypedValue::Uint64(document.timestamp_secs())),
            Self::ModuleId => Ok(TypedValue::String(document.module_id().to_string())),
            Self::Digest => Ok(TypedValue::String(document.digest().to_string())),
        }
    }
}

/// Unsigned decimal index below [`PCR_COUNT`]. Leading zeros are allowed, so
/// `pcr01` names PCR 1, while signs and other characters are rejected.
fn parse_pcr(name: &str) -> Option<u8> {
    let digits = name.strip_prefix("pcr")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    digits
        .parse::<u8>()
        .ok()
        .filter(|index| usize::from(*index) < PCR_COUNT)
}

/// Parses field names, keeping the first occurrence of each
///
/// # Errors
/// Returns `InvalidField` for the first name outside the vocabulary.
pub fn parse_fields<S: AsRef<str>>(names: &[S]) -> Result<Vec<FieldKind>, ProjectionError> {
    let mut fields = Vec::with_capacity(names.len());
    for name in names {
        let field = name.as_ref().parse::<FieldKind>()?;
        if !fields.contains(&field) {
            fields.push(field);
        }
    }
    Ok(fields)
}

/// Checks that `name` can be used as an EIP-712 struct name
///
/// # Errors
/// Returns `InvalidPrimaryType` for names that are not identifiers or that name the domain struct.
pub fn validate_primary_type(name: &str) -> Result<(), ProjectionError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        && name != DOMAIN_TYPE;

    if valid {
        Ok(())
    } else {
        Err(ProjectionError::InvalidPrimaryType(name.to_string()))
    }
}

/// Builds the `primary_type` message holding the requested fields of `document`
///
/// # Errors
/// Returns an error if the primary type is invalid, a field name is unknown or a
/// requested field is missing from the document.
pub fn project<S: AsRef<str>>(
    document: &AttestationDocument,
    primary_type: &str,
    field_names: &[S],
) -> Result<TypedMessage, ProjectionError> {
    validate_primary_type(primary_type)?;

    let fields = parse_fields(field_names)?
        .into_iter()
        .map(|field| Ok(TypedField::new(field.to_string(), field.resolve(document)?)))
        .collect::<Result<Vec<_>, ProjectionError>>()?;

    Ok(TypedMessage::new(primary_type, fields))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use attestation_verifier::{
        testing::{pcr_value, AttestationClaims, TestAttestationAuthority},
        AttestationVerifier,
    };
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::eip712::AbiType;

    fn document(claims: AttestationClaims) -> AttestationDocument {
        let authority = TestAttestationAuthority::new();
        let raw = authority.issue(claims);
        authority.verifier().verify(&raw).unwrap()
    }

    fn register_document() -> AttestationDocument {
        document(AttestationClaims {
            pcrs: BTreeMap::from([(0, pcr_value(0xaa)), (1, pcr_value(0x01))]),
            public_key: Some([vec![0x04], vec![0xbb; 64]].concat()),
            timestamp: Some(1_700_000_000_123),
            ..Default::default()
        })
    }

    #[test]
    fn test_parse_field_names() {
        assert_eq!("pcr0".parse(), Ok(FieldKind::Pcr(0)));
        assert_eq!("pcr31".parse(), Ok(FieldKind::Pcr(31)));
        assert_eq!("pcr01".parse(), Ok(FieldKind::Pcr(1)));
        assert_eq!("pcr00".parse(), Ok(FieldKind::Pcr(0)));
        assert_eq!("pcr031".parse(), Ok(FieldKind::Pcr(31)));
        assert_eq!("module_id".parse(), Ok(FieldKind::ModuleId));

        for name in ["pcr32", "pcr", "pcr032", "pcr-1", "pcr+1", "PCR0", "pcr1a", "address", ""] {
            assert_eq!(
                name.parse::<FieldKind>(),
                Err(ProjectionError::InvalidField(name.to_string())),
                "{name}"
            );
        }
    }

    #[test]
    fn test_duplicates_keep_first_occurrence() {
        assert_eq!(
            parse_fields(&["public_key", "pcr0", "public_key", "pcr0", "nonce"]).unwrap(),
            vec![FieldKind::PublicKey, FieldKind::Pcr(0), FieldKind::Nonce]
        );
    }

    #[test]
    fn test_leading_zero_alias_signs_under_canonical_name() {
        assert_eq!(
            parse_fields(&["pcr01", "pcr1", "pcr001"]).unwrap(),
            vec![FieldKind::Pcr(1)]
        );

        let message = project(&register_document(), "Register", &["pcr00"]).unwrap();
        assert_eq!(message.encode_type(), "Register(bytes pcr0)");
    }

    #[test]
    fn test_register_projection() {
        let message = project(&register_document(), "Register", &["pcr0", "public_key"]).unwrap();

        assert_eq!(message.primary_type(), "Register");
        assert_eq!(message.encode_type(), "Register(bytes pcr0,bytes public_key)");
        assert_eq!(message.fields()[0].value, TypedValue::Bytes(vec![0xaa; 48]));
        assert_eq!(message.fields()[1].value.abi_type(), AbiType::Bytes);
        assert_eq!(
            message.fields()[1].value,
            TypedValue::Bytes([vec![0x04], vec![0xbb; 64]].concat())
        );
    }

    #[test]
    fn test_projection_is_deterministic() {
        let document = register_document();
        let fields = ["digest", "pcr1", "timestamp", "module_id"];

        let first = project(&document, "Measurement", &fields).unwrap();
        let second = project(&document, "Measurement", &fields).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first.encode_type(),
            "Measurement(string digest,bytes pcr1,uint64 timestamp,string module_id)"
        );
        assert_eq!(first.fields()[0].value, TypedValue::String("SHA384".to_string()));
        assert_eq!(first.fields()[2].value, TypedValue::Uint64(1_700_000_000));
    }

    #[test]
    fn test_absent_fields_are_rejected() {
        let document = register_document();

        assert_eq!(
            project(&document, "Register", &["nonce"]),
            Err(ProjectionError::FieldAbsent("nonce".to_string()))
        );
        assert_eq!(
            project(&document, "Register", &["pcr0", "pcr8"]),
            Err(ProjectionError::FieldAbsent("pcr8".to_string()))
        );
    }

    #[test]
    fn test_empty_values_are_present() {
        let document = document(AttestationClaims {
            pcrs: BTreeMap::from([(0, pcr_value(0xaa))]),
            nonce: Some(Vec::new()),
            ..Default::default()
        });

        let message = project(&document, "Register", &["nonce"]).unwrap();
        assert_eq!(message.fields()[0].value, TypedValue::Bytes(Vec::new()));
    }

    #[test]
    fn test_primary_type_validation() {
        for name in ["Register", "_x", "$Attest2"] {
            assert_eq!(validate_primary_type(name), Ok(()), "{name}");
        }
        for name in ["", "1Register", "Reg ister", "Reg(ister)", "EIP712Domain"] {
            assert!(
                matches!(
                    validate_primary_type(name),
                    Err(ProjectionError::InvalidPrimaryType(_))
                ),
                "{name}"
            );
        }
    }
}
