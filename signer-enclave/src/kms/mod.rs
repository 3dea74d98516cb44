//! Key management backend used to provision the custody key.

mod attested;
mod ber;
mod envelope;

use async_trait::async_trait;
use thiserror::Error;

pub use attested::AttestedKmsClient;
pub use envelope::open_enveloped_data;

/// Errors returned by the key management backend
#[derive(Debug, Error)]
pub enum KmsError {
    /// The KMS API call failed
    #[error("KMS {operation} failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },

    /// A field required by the protocol was missing from the KMS response
    #[error("KMS {operation} response is missing {field}")]
    MissingField {
        operation: &'static str,
        field: &'static str,
    },

    /// The ciphertext addressed to the enclave could not be opened
    #[error("Failed to open KMS recipient ciphertext: {0}")]
    Envelope(String),

    /// The ephemeral transport key could not be set up
    #[error("Failed to set up KMS transport key: {0}")]
    TransportKey(String),
}

/// Output of a data key pair generation
#[derive(Clone)]
pub struct DataKeyPair {
    /// PKCS#8 DER private key, only ever held in memory
    pub private_key_plaintext: Vec<u8>,
    /// Private key encrypted under the KMS key
    pub private_key_ciphertext: Vec<u8>,
    /// DER SubjectPublicKeyInfo
    pub public_key: Vec<u8>,
}

impl std::fmt::Debug for DataKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKeyPair")
            .field("private_key_plaintext", &"<redacted>")
            .field("private_key_ciphertext_len", &self.private_key_ciphertext.len())
            .field("public_key", &hex::encode(&self.public_key))
            .finish()
    }
}

/// Measurement-bound key management channel
#[async_trait]
pub trait KeyManagement: Send + Sync {
    /// Creates a symmetric KMS key governed by `policy`, returning its id
    async fn create_key(&self, policy: &str) -> Result<String, KmsError>;

    /// Generates a secp256k1 data key pair under `key_id`
    async fn generate_data_key_pair(&self, key_id: &str) -> Result<DataKeyPair, KmsError>;

    /// Decrypts `ciphertext` previously produced under `key_id`
    async fn decrypt(&self, key_id: &str, ciphertext: &[u8]) -> Result<Vec<u8>, KmsError>;
}
