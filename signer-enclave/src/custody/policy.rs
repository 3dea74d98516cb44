//! KMS key policy binding key usage to enclave measurements.

use serde_json::{json, Map, Value};

use crate::identity::CallerIdentity;

const POLICY_VERSION: &str = "2012-10-17";

/// Key administration without any cryptographic use
const ADMIN_ACTIONS: [&str; 14] = [
    "kms:Create*",
    "kms:Describe*",
    "kms:Enable*",
    "kms:List*",
    "kms:Put*",
    "kms:Update*",
    "kms:Revoke*",
    "kms:Disable*",
    "kms:Get*",
    "kms:Delete*",
    "kms:TagResource",
    "kms:UntagResource",
    "kms:ScheduleKeyDeletion",
    "kms:CancelKeyDeletion",
];

const ENCLAVE_ACTIONS: [&str; 2] = ["kms:Decrypt", "kms:GenerateDataKeyPair"];

/// Builds the policy for a custody key.
///
/// The account root may administer the key. The enclave principal may decrypt
/// and generate data keys only when the request carries an attestation whose
/// PCRs equal `pcrs`.
#[must_use]
pub fn key_policy(identity: &CallerIdentity, pcrs: &[(u16, &[u8])]) -> String {
    let conditions = pcrs
        .iter()
        .map(|(index, value)| {
            (
                format!("kms:RecipientAttestation:PCR{index}"),
                Value::String(hex::encode(value)),
            )
        })
        .collect::<Map<_, _>>();

    json!({
        "Version": POLICY_VERSION,
        "Statement": [
            {
                "Sid": "Allow key administration by the account root",
                "Effect": "Allow",
                "Principal": { "AWS": identity.root_arn },
                "Action": ADMIN_ACTIONS,
                "Resource": "*",
            },
            {
                "Sid": "Allow use by the attested enclave",
                "Effect": "Allow",
                "Principal": { "AWS": identity.principal_arn },
                "Action": ENCLAVE_ACTIONS,
                "Resource": "*",
                "Condition": {
                    "StringEqualsIgnoreCase": conditions,
                },
            },
        ],
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn identity() -> CallerIdentity {
        CallerIdentity {
            root_arn: "arn:aws:iam::123456789012:root".to_string(),
            principal_arn: "arn:aws:iam::123456789012:role/enclave-signer".to_string(),
        }
    }

    #[test]
    fn test_policy_binds_enclave_use_to_pcr0() {
        let pcr0 = [0xabu8; 48];
        let policy: Value = serde_json::from_str(&key_policy(&identity(), &[(0, pcr0.as_slice())])).unwrap();

        assert_eq!(policy["Version"], "2012-10-17");

        let enclave = &policy["Statement"][1];
        assert_eq!(
            enclave["Principal"]["AWS"],
            "arn:aws:iam::123456789012:role/enclave-signer"
        );
        assert_eq!(
            enclave["Action"],
            json!(["kms:Decrypt", "kms:GenerateDataKeyPair"])
        );
        assert_eq!(
            enclave["Condition"]["StringEqualsIgnoreCase"],
            json!({ "kms:RecipientAttestation:PCR0": "ab".repeat(48) })
        );
    }

    #[test]
    fn test_root_cannot_use_the_key() {
        let policy: Value = serde_json::from_str(&key_policy(&identity(), &[(0, [0u8; 48].as_slice())])).unwrap();

        let root = &policy["Statement"][0];
        assert_eq!(root["Principal"]["AWS"], "arn:aws:iam::123456789012:root");

        let actions = root["Action"].as_array().unwrap();
        for action in ["kms:Decrypt", "kms:Encrypt", "kms:GenerateDataKeyPair", "kms:*"] {
            assert!(!actions.contains(&json!(action)), "{action}");
        }
    }

    #[test]
    fn test_every_pcr_is_a_condition() {
        let pcr0 = [0x01u8; 48];
        let pcr8 = [0x08u8; 48];
        let policy: Value =
            serde_json::from_str(&key_policy(&identity(), &[(0, pcr0.as_slice()), (8, pcr8.as_slice())])).unwrap();

        let conditions = policy["Statement"][1]["Condition"]["StringEqualsIgnoreCase"]
            .as_object()
            .unwrap();
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions["kms:RecipientAttestation:PCR8"], "08".repeat(48));
    }
}
