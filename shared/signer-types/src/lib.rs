//! Request and response types of the attestation signer HTTP API.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Struct name used when the request does not name one
pub const DEFAULT_PRIMARY_TYPE: &str = "Register";

/// Fields signed when the request does not list any
pub const DEFAULT_FIELDS_TO_SIGN: [&str; 2] = ["pcr0", "public_key"];

/// EIP-712 domain as supplied by a client.
///
/// Follows the JSON shape of an `eth_signTypedData_v4` domain. Empty strings and
/// `null` are treated as absent. When `fields` is set it is an ERC-5267 presence
/// bitmask (bit 0 `name`, 1 `version`, 2 `chainId`, 3 `verifyingContract`,
/// 4 `salt`) and decides which members are part of the domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TypedDataDomain {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<ChainId>,
    /// `0x`-prefixed 20 byte address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifying_contract: Option<String>,
    /// `0x`-prefixed 32 byte salt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<u8>,
}

/// Chain id as a JSON number, or a decimal or `0x`-prefixed hex string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ChainId {
    Number(u64),
    Text(String),
}

/// Request to sign a subset of an attestation document's fields
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SignAttestationRequest {
    /// Base64 encoded COSE Sign1 attestation document
    pub attestation: String,
    /// Domain the signature is bound to
    #[serde(default)]
    pub domain: TypedDataDomain,
    /// EIP-712 primary type name, defaults to `Register`
    #[serde(default)]
    pub primary_type: Option<String>,
    /// Ordered document fields to sign, defaults to `["pcr0", "public_key"]`
    #[serde(default)]
    pub fields_to_sign: Vec<String>,
}

impl SignAttestationRequest {
    /// Primary type with the default applied
    #[must_use]
    pub fn primary_type(&self) -> &str {
        effective_primary_type(self.primary_type.as_deref())
    }

    /// Fields to sign with the default applied
    #[must_use]
    pub fn fields_to_sign(&self) -> Vec<&str> {
        effective_fields(&self.fields_to_sign)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SignAttestationResponse {
    /// Base64 encoded 65 byte `r || s || v` signature, `v` in {27, 28}
    pub signature: String,
}

/// Request to check a signature produced for an attestation document
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VerifyAttestationRequest {
    /// Base64 encoded COSE Sign1 attestation document
    pub attestation: String,
    #[serde(default)]
    pub domain: TypedDataDomain,
    #[serde(default)]
    pub primary_type: Option<String>,
    #[serde(default)]
    pub fields_to_sign: Vec<String>,
    /// Base64 encoded 65 byte signature, `v` in {0, 1} or {27, 28}
    pub signature: String,
    /// Expected signer, defaults to this enclave's address
    #[serde(default)]
    pub address: Option<String>,
}

impl VerifyAttestationRequest {
    /// Primary type with the default applied
    #[must_use]
    pub fn primary_type(&self) -> &str {
        effective_primary_type(self.primary_type.as_deref())
    }

    /// Fields to sign with the default applied
    #[must_use]
    pub fn fields_to_sign(&self) -> Vec<&str> {
        effective_fields(&self.fields_to_sign)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VerifyAttestationResponse {
    /// Address the signature was checked against
    pub address: String,
    /// `0x`-prefixed EIP-712 signing hash
    pub hash: String,
}

/// The enclave's signing identity
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SignerIdentityResponse {
    /// EIP-55 checksummed address
    pub address: String,
    /// `0x`-prefixed uncompressed secp256k1 public key
    pub public_key: String,
    /// Base64 encoded self-issued attestation document binding the public key to PCR0
    pub attestation: String,
}

fn effective_primary_type(primary_type: Option<&str>) -> &str {
    match primary_type {
        Some(primary_type) if !primary_type.is_empty() => primary_type,
        _ => DEFAULT_PRIMARY_TYPE,
    }
}

fn effective_fields(fields: &[String]) -> Vec<&str> {
    if fields.is_empty() {
        DEFAULT_FIELDS_TO_SIGN.to_vec()
    } else {
        fields.iter().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_defaults_apply_to_minimal_request() {
        let request: SignAttestationRequest =
            serde_json::from_str(r#"{"attestation":"AAAA"}"#).unwrap();

        assert_eq!(request.primary_type(), "Register");
        assert_eq!(request.fields_to_sign(), vec!["pcr0", "public_key"]);
        assert_eq!(request.domain, TypedDataDomain::default());
    }

    #[test]
    fn test_empty_primary_type_falls_back_to_default() {
        let request: SignAttestationRequest = serde_json::from_str(
            r#"{"attestation":"AAAA","primary_type":"","fields_to_sign":[]}"#,
        )
        .unwrap();

        assert_eq!(request.primary_type(), "Register");
        assert_eq!(request.fields_to_sign(), vec!["pcr0", "public_key"]);
    }

    #[test]
    fn test_explicit_values_are_kept() {
        let request: SignAttestationRequest = serde_json::from_str(
            r#"{
                "attestation": "AAAA",
                "primary_type": "Node",
                "fields_to_sign": ["user_data", "pcr8", "user_data"],
                "domain": {"name": "Registry", "chainId": "0x1", "fields": 5}
            }"#,
        )
        .unwrap();

        assert_eq!(request.primary_type(), "Node");
        assert_eq!(
            request.fields_to_sign(),
            vec!["user_data", "pcr8", "user_data"]
        );
        assert_eq!(request.domain.name.as_deref(), Some("Registry"));
        assert_eq!(
            request.domain.chain_id,
            Some(ChainId::Text("0x1".to_string()))
        );
        assert_eq!(request.domain.fields, Some(5));
    }

    #[test]
    fn test_numeric_chain_id() {
        let domain: TypedDataDomain = serde_json::from_str(r#"{"chainId": 11155111}"#).unwrap();
        assert_eq!(domain.chain_id, Some(ChainId::Number(11_155_111)));
    }
}
