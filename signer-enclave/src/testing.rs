//! In-memory collaborators for exercising custody and the HTTP API without
//! Nitro hardware or AWS.

use std::{
    collections::{BTreeMap, HashMap},
    io,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use async_trait::async_trait;
use attestation_verifier::{
    testing::{pcr_value, AttestationClaims, TestAttestationAuthority},
    AttestationVerifier,
};
use k256::{ecdsa::SigningKey, pkcs8::EncodePrivateKey};

use crate::{
    custody::{
        ArtifactKind, ArtifactStore, AttestedArtifacts, KeyCustodian, MemoryArtifactStore,
        StoreError,
    },
    identity::{CallerIdentity, IdentityError, IdentityResolver},
    kms::{DataKeyPair, KeyManagement, KmsError},
    nsm::{NsmError, PcrDescription, SecureModule},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Secure module issuing documents signed by a [`TestAttestationAuthority`]
pub struct MockSecureModule {
    authority: TestAttestationAuthority,
    pcrs: Mutex<BTreeMap<usize, Vec<u8>>>,
    attestations: AtomicUsize,
}

impl MockSecureModule {
    /// Starts with PCR0 set to `pcr_value(0xaa)`
    #[must_use]
    pub fn new(authority: TestAttestationAuthority) -> Self {
        Self {
            authority,
            pcrs: Mutex::new(BTreeMap::from([(0, pcr_value(0xaa))])),
            attestations: AtomicUsize::new(0),
        }
    }

    /// Simulates booting a different enclave image
    pub fn set_pcr(&self, index: usize, value: Vec<u8>) {
        lock(&self.pcrs).insert(index, value);
    }

    #[must_use]
    pub const fn authority(&self) -> &TestAttestationAuthority {
        &self.authority
    }

    /// Number of documents issued so far
    #[must_use]
    pub fn attestations(&self) -> usize {
        self.attestations.load(Ordering::SeqCst)
    }
}

impl SecureModule for MockSecureModule {
    fn describe_pcr(&self, index: u16) -> Result<PcrDescription, NsmError> {
        let value = lock(&self.pcrs)
            .get(&usize::from(index))
            .cloned()
            .unwrap_or_else(|| pcr_value(0));

        Ok(PcrDescription {
            locked: true,
            value,
        })
    }

    fn attest(
        &self,
        nonce: Option<&[u8]>,
        user_data: Option<&[u8]>,
        public_key: Option<&[u8]>,
    ) -> Result<Vec<u8>, NsmError> {
        self.attestations.fetch_add(1, Ordering::SeqCst);

        Ok(self.authority.issue(AttestationClaims {
            pcrs: lock(&self.pcrs).clone(),
            public_key: public_key.map(<[u8]>::to_vec),
            user_data: user_data.map(<[u8]>::to_vec),
            nonce: nonce.map(<[u8]>::to_vec),
            timestamp: None,
        }))
    }
}

/// KMS stand-in that keeps generated keys in memory.
///
/// Ciphertexts are opaque handles that only decrypt under the key id they
/// were generated for.
#[derive(Default)]
pub struct InMemoryKms {
    keys: Mutex<Vec<String>>,
    ciphertexts: Mutex<HashMap<Vec<u8>, (String, Vec<u8>)>>,
    policies: Mutex<Vec<String>>,
    next_private_key: Mutex<Option<Vec<u8>>>,
    fail_decrypt: AtomicBool,
    create_key_calls: AtomicUsize,
    generate_calls: AtomicUsize,
    decrypt_calls: AtomicUsize,
}

impl InMemoryKms {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next generated data key pair return `der` as its private key
    pub fn return_private_key(&self, der: Vec<u8>) {
        *lock(&self.next_private_key) = Some(der);
    }

    /// Makes every `Decrypt` call fail as if KMS were unreachable
    pub fn fail_decrypt(&self) {
        self.fail_decrypt.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn create_key_calls(&self) -> usize {
        self.create_key_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn decrypt_calls(&self) -> usize {
        self.decrypt_calls.load(Ordering::SeqCst)
    }

    /// Policies passed to `CreateKey`, in call order
    #[must_use]
    pub fn policies(&self) -> Vec<String> {
        lock(&self.policies).clone()
    }
}

#[async_trait]
impl KeyManagement for InMemoryKms {
    async fn create_key(&self, policy: &str) -> Result<String, KmsError> {
        let calls = self.create_key_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.policies).push(policy.to_string());

        let key_id = format!("00000000-0000-4000-8000-{:012}", calls + 1);
        lock(&self.keys).push(key_id.clone());
        Ok(key_id)
    }

    async fn generate_data_key_pair(&self, key_id: &str) -> Result<DataKeyPair, KmsError> {
        let calls = self.generate_calls.fetch_add(1, Ordering::SeqCst);

        if !lock(&self.keys).iter().any(|key| key == key_id) {
            return Err(KmsError::Request {
                operation: "GenerateDataKeyPair",
                message: format!("NotFoundException: key {key_id} does not exist"),
            });
        }

        let private_key_plaintext = match lock(&self.next_private_key).take() {
            Some(der) => der,
            None => SigningKey::random(&mut rand::rngs::OsRng)
                .to_pkcs8_der()
                .map_err(|e| KmsError::Request {
                    operation: "GenerateDataKeyPair",
                    message: e.to_string(),
                })?
                .as_bytes()
                .to_vec(),
        };

        let private_key_ciphertext = format!("ciphertext/{key_id}/{calls}").into_bytes();
        lock(&self.ciphertexts).insert(
            private_key_ciphertext.clone(),
            (key_id.to_string(), private_key_plaintext.clone()),
        );

        Ok(DataKeyPair {
            private_key_plaintext,
            private_key_ciphertext,
            public_key: Vec::new(),
        })
    }

    async fn decrypt(&self, key_id: &str, ciphertext: &[u8]) -> Result<Vec<u8>, KmsError> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_decrypt.load(Ordering::SeqCst) {
            return Err(KmsError::Request {
                operation: "Decrypt",
                message: "dispatch failure: connection refused".to_string(),
            });
        }

        match lock(&self.ciphertexts).get(ciphertext) {
            Some((owner, plaintext)) if owner == key_id => Ok(plaintext.clone()),
            _ => Err(KmsError::Request {
                operation: "Decrypt",
                message: "InvalidCiphertextException".to_string(),
            }),
        }
    }
}

/// Identity resolver returning a fixed principal
pub struct StaticIdentity {
    identity: CallerIdentity,
    calls: AtomicUsize,
}

impl StaticIdentity {
    #[must_use]
    pub const fn new(identity: CallerIdentity) -> Self {
        Self {
            identity,
            calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for StaticIdentity {
    fn default() -> Self {
        Self::new(CallerIdentity {
            root_arn: "arn:aws:iam::123456789012:root".to_string(),
            principal_arn: "arn:aws:iam::123456789012:role/enclave-signer".to_string(),
        })
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentity {
    async fn caller_identity(&self) -> Result<CallerIdentity, IdentityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.identity.clone())
    }
}

/// In-memory store whose writes can be made to fail
#[derive(Default)]
pub struct FlakyArtifactStore {
    inner: MemoryArtifactStore,
    fail_writes: AtomicBool,
}

impl FlakyArtifactStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ArtifactStore for FlakyArtifactStore {
    async fn get(&self, kind: ArtifactKind) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(kind).await
    }

    async fn put(&self, kind: ArtifactKind, bytes: &[u8]) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Write {
                kind,
                source: io::Error::other("No space left on device"),
            });
        }
        self.inner.put(kind, bytes).await
    }
}

/// A complete set of enclave collaborators sharing one attestation authority
pub struct TestEnclave {
    pub secure_module: Arc<MockSecureModule>,
    pub kms: Arc<InMemoryKms>,
    pub identity: Arc<StaticIdentity>,
    pub store: Arc<dyn ArtifactStore>,
}

impl TestEnclave {
    #[must_use]
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            secure_module: Arc::new(MockSecureModule::new(TestAttestationAuthority::new())),
            kms: Arc::new(InMemoryKms::new()),
            identity: Arc::new(StaticIdentity::default()),
            store,
        }
    }

    /// Verifier accepting documents issued by this enclave's secure module
    #[must_use]
    pub fn verifier(&self) -> Arc<dyn AttestationVerifier> {
        Arc::new(self.secure_module.authority().verifier())
    }

    /// A custodian over this enclave's collaborators
    #[must_use]
    pub fn custodian(&self) -> KeyCustodian {
        KeyCustodian::new(
            AttestedArtifacts::new(
                self.store.clone(),
                self.secure_module.clone(),
                self.verifier(),
            ),
            self.kms.clone(),
            self.identity.clone(),
        )
    }
}

/// PKCS#8 DER of a secp256k1 key derived from `seed`
///
/// # Panics
/// Panics if `seed` is zero.
#[must_use]
pub fn secp256k1_private_key_der(seed: u8) -> Vec<u8> {
    SigningKey::from_slice(&[seed; 32])
        .expect("seed should be a valid secp256k1 scalar")
        .to_pkcs8_der()
        .expect("secp256k1 key should encode as PKCS#8")
        .as_bytes()
        .to_vec()
}

/// PKCS#8 DER of a small RSA key, a key type custody must refuse
///
/// # Panics
/// Panics if key generation fails.
#[must_use]
pub fn rsa_private_key_der() -> Vec<u8> {
    use rsa::pkcs8::EncodePrivateKey as _;

    rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024)
        .expect("RSA key generation should succeed")
        .to_pkcs8_der()
        .expect("RSA key should encode as PKCS#8")
        .as_bytes()
        .to_vec()
}
