use async_trait::async_trait;
use aws_sdk_kms::{
    error::DisplayErrorContext,
    primitives::Blob,
    types::{DataKeyPairSpec, KeyEncryptionMechanism, RecipientInfo},
    Client as KmsClient,
};
use rsa::{pkcs8::EncodePublicKey, RsaPrivateKey};

use super::{open_enveloped_data, DataKeyPair, KeyManagement, KmsError};
use crate::nsm::SecureModule;

const TRANSPORT_KEY_BITS: usize = 4096;
const KEY_DESCRIPTION: &str = "Nitro Enclave Key";

/// KMS client whose responses can only be read by this enclave image.
///
/// Secrets are requested with a `Recipient` carrying an attestation document
/// that embeds an ephemeral RSA public key. KMS evaluates the key policy's
/// `kms:RecipientAttestation:*` conditions against that document and encrypts
/// the response to the embedded key.
pub struct AttestedKmsClient {
    client: KmsClient,
    transport_key: RsaPrivateKey,
    recipient_attestation: Vec<u8>,
}

impl AttestedKmsClient {
    /// Generates the transport key and has the secure module attest to it
    ///
    /// # Errors
    /// Returns `TransportKey` if key generation or attestation fails.
    pub fn new(client: KmsClient, secure_module: &dyn SecureModule) -> Result<Self, KmsError> {
        let transport_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, TRANSPORT_KEY_BITS)
            .map_err(|e| KmsError::TransportKey(e.to_string()))?;

        let public_key_der = transport_key
            .to_public_key()
            .to_public_key_der()
            .map_err(|e| KmsError::TransportKey(e.to_string()))?;

        let recipient_attestation = secure_module
            .attest(None, None, Some(public_key_der.as_bytes()))
            .map_err(|e| KmsError::TransportKey(e.to_string()))?;

        Ok(Self {
            client,
            transport_key,
            recipient_attestation,
        })
    }

    fn recipient(&self) -> RecipientInfo {
        RecipientInfo::builder()
            .key_encryption_algorithm(KeyEncryptionMechanism::RsaesOaepSha256)
            .attestation_document(Blob::new(self.recipient_attestation.clone()))
            .build()
    }
}

#[async_trait]
impl KeyManagement for AttestedKmsClient {
    async fn create_key(&self, policy: &str) -> Result<String, KmsError> {
        let output = self
            .client
            .create_key()
            .policy(policy)
            .description(KEY_DESCRIPTION)
            // Root only administers the key, which trips the KMS lockout check
            .bypass_policy_lockout_safety_check(true)
            .send()
            .await
            .map_err(|e| KmsError::Request {
                operation: "CreateKey",
                message: DisplayErrorContext(&e).to_string(),
            })?;

        output
            .key_metadata()
            .map(|metadata| metadata.key_id().to_string())
            .ok_or(KmsError::MissingField {
                operation: "CreateKey",
                field: "KeyMetadata",
            })
    }

    async fn generate_data_key_pair(&self, key_id: &str) -> Result<DataKeyPair, KmsError> {
        const OPERATION: &str = "GenerateDataKeyPair";

        let output = self
            .client
            .generate_data_key_pair()
            .key_id(key_id)
            .key_pair_spec(DataKeyPairSpec::EccSecgP256K1)
            .recipient(self.recipient())
            .send()
            .await
            .map_err(|e| KmsError::Request {
                operation: OPERATION,
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let ciphertext_for_recipient =
            output
                .ciphertext_for_recipient()
                .ok_or(KmsError::MissingField {
                    operation: OPERATION,
                    field: "CiphertextForRecipient",
                })?;
        let private_key_ciphertext =
            output
                .private_key_ciphertext_blob()
                .ok_or(KmsError::MissingField {
                    operation: OPERATION,
                    field: "PrivateKeyCiphertextBlob",
                })?;
        let public_key = output.public_key().ok_or(KmsError::MissingField {
            operation: OPERATION,
            field: "PublicKey",
        })?;

        Ok(DataKeyPair {
            private_key_plaintext: open_enveloped_data(
                ciphertext_for_recipient.as_ref(),
                &self.transport_key,
            )?,
            private_key_ciphertext: private_key_ciphertext.as_ref().to_vec(),
            public_key: public_key.as_ref().to_vec(),
        })
    }

    async fn decrypt(&self, key_id: &str, ciphertext: &[u8]) -> Result<Vec<u8>, KmsError> {
        let output = self
            .client
            .decrypt()
            .key_id(key_id)
            .ciphertext_blob(Blob::new(ciphertext))
            .recipient(self.recipient())
            .send()
            .await
            .map_err(|e| KmsError::Request {
                operation: "Decrypt",
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let ciphertext_for_recipient =
            output
                .ciphertext_for_recipient()
                .ok_or(KmsError::MissingField {
                    operation: "Decrypt",
                    field: "CiphertextForRecipient",
                })?;

        open_enveloped_data(ciphertext_for_recipient.as_ref(), &self.transport_key)
    }
}
