//! EIP-712 structured data hashing, signing and verification.
//!
//! Only flat structs over a fixed set of atomic types are supported. The type
//! table of every struct is derived from its values, so a type can never be
//! hashed without its value or the other way around.
//!
//! <https://eips.ethereum.org/EIPS/eip-712>

mod domain;
mod message;

use alloy_primitives::{keccak256, Address, B256, U256};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use thiserror::Error;

pub use domain::{Domain, DomainField};
pub use message::TypedMessage;

use crate::signer::{Signer, SignerError, SIGNATURE_LENGTH};

/// Name of the domain struct
pub const DOMAIN_TYPE: &str = "EIP712Domain";

/// Offset added to the recovery id of produced signatures
const RECOVERY_ID_OFFSET: u8 = 27;

/// Errors building a domain from client supplied values
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypedDataError {
    #[error("Invalid domain chainId: {0}")]
    InvalidChainId(String),

    #[error("Invalid domain verifyingContract: {0}")]
    InvalidVerifyingContract(String),

    #[error("Invalid domain salt: {0}")]
    InvalidSalt(String),

    #[error("Domain fields mask 0x{0:02x} has bits outside name, version, chainId, verifyingContract, salt")]
    InvalidFieldsMask(u8),

    #[error("Domain fields mask includes {0} but no value was supplied")]
    MissingDomainField(&'static str),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("Signature must be {SIGNATURE_LENGTH} bytes, got {0}")]
    BadSignatureLength(usize),

    #[error("Failed to recover signer: {0}")]
    RecoveryFailed(String),

    #[error("Recovered signer {recovered} does not match expected {expected}")]
    AddressMismatch { expected: Address, recovered: Address },
}

/// EIP-712 atomic types used by this service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiType {
    Bytes,
    String,
    Uint64,
    Uint256,
    Address,
    Bytes32,
}

impl AbiType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bytes => "bytes",
            Self::String => "string",
            Self::Uint64 => "uint64",
            Self::Uint256 => "uint256",
            Self::Address => "address",
            Self::Bytes32 => "bytes32",
        }
    }
}

/// A value together with its EIP-712 type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedValue {
    Bytes(Vec<u8>),
    String(String),
    Uint64(u64),
    Uint256(U256),
    Address(Address),
    Bytes32(B256),
}

impl TypedValue {
    #[must_use]
    pub const fn abi_type(&self) -> AbiType {
        match self {
            Self::Bytes(_) => AbiType::Bytes,
            Self::String(_) => AbiType::String,
            Self::Uint64(_) => AbiType::Uint64,
            Self::Uint256(_) => AbiType::Uint256,
            Self::Address(_) => AbiType::Address,
            Self::Bytes32(_) => AbiType::Bytes32,
        }
    }

    /// `encodeData` word of the value
    fn encode(&self) -> B256 {
        match self {
            Self::Bytes(bytes) => keccak256(bytes),
            Self::String(string) => keccak256(string.as_bytes()),
            Self::Uint64(value) => B256::from(U256::from(*value).to_be_bytes::<32>()),
            Self::Uint256(value) => B256::from(value.to_be_bytes::<32>()),
            Self::Address(address) => address.into_word(),
            Self::Bytes32(word) => *word,
        }
    }
}

/// A named member of a struct
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedField {
    pub name: String,
    pub value: TypedValue,
}

impl TypedField {
    pub fn new(name: impl Into<String>, value: TypedValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// `encodeType` of a flat struct, e.g. `Mail(string contents,address to)`
#[must_use]
pub fn encode_type(name: &str, fields: &[TypedField]) -> String {
    let members = fields
        .iter()
        .map(|field| format!("{} {}", field.value.abi_type().as_str(), field.name))
        .collect::<Vec<_>>()
        .join(",");
    format!("{name}({members})")
}

/// `hashStruct` of a flat struct
#[must_use]
pub fn hash_struct(name: &str, fields: &[TypedField]) -> B256 {
    let mut encoded = Vec::with_capacity(32 * (fields.len() + 1));
    encoded.extend_from_slice(keccak256(encode_type(name, fields)).as_slice());
    for field in fields {
        encoded.extend_from_slice(field.value.encode().as_slice());
    }
    keccak256(encoded)
}

/// Digest signed for `message` under `domain`
#[must_use]
pub fn signing_hash(domain: &Domain, message: &TypedMessage) -> B256 {
    let mut payload = [0u8; 66];
    payload[0] = 0x19;
    payload[1] = 0x01;
    payload[2..34].copy_from_slice(domain.separator().as_slice());
    payload[34..].copy_from_slice(message.hash_struct().as_slice());
    keccak256(payload)
}

/// Signs `message` under `domain`, returning the signature (`v` in {27, 28}) and the digest
///
/// # Errors
/// Returns an error if the signer fails.
pub fn sign_typed_data(
    domain: &Domain,
    message: &TypedMessage,
    signer: &Signer,
) -> Result<([u8; SIGNATURE_LENGTH], B256), SignerError> {
    let hash = signing_hash(domain, message);
    let mut signature = signer.sign(&hash)?;
    signature[64] += RECOVERY_ID_OFFSET;
    Ok((signature, hash))
}

/// Checks that `signature` over `message` under `domain` was produced by `expected`
///
/// # Errors
/// Returns an error if the signature is malformed or was produced by another key.
pub fn verify_typed_data(
    domain: &Domain,
    message: &TypedMessage,
    signature: &[u8],
    expected: Address,
) -> Result<B256, VerifyError> {
    let hash = signing_hash(domain, message);
    let recovered = recover_address(&hash, signature)?;
    if recovered != expected {
        return Err(VerifyError::AddressMismatch {
            expected,
            recovered,
        });
    }
    Ok(hash)
}

/// Recovers the address that produced `signature` over `hash`.
///
/// Accepts recovery ids in both the raw {0, 1} and the {27, 28} convention.
///
/// # Errors
/// Returns an error if the signature is not 65 bytes or no key can be recovered.
pub fn recover_address(hash: &B256, signature: &[u8]) -> Result<Address, VerifyError> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(VerifyError::BadSignatureLength(signature.len()));
    }

    let v = match signature[64] {
        v @ (0 | 1) => v,
        v => v.wrapping_sub(RECOVERY_ID_OFFSET),
    };
    let recovery_id = RecoveryId::from_byte(v)
        .filter(|id| !id.is_x_reduced())
        .ok_or_else(|| VerifyError::RecoveryFailed(format!("invalid recovery id {}", signature[64])))?;

    let signature = Signature::from_slice(&signature[..64])
        .map_err(|e| VerifyError::RecoveryFailed(e.to_string()))?;

    let verifying_key = VerifyingKey::recover_from_prehash(hash.as_slice(), &signature, recovery_id)
        .map_err(|e| VerifyError::RecoveryFailed(e.to_string()))?;

    Ok(Address::from_public_key(&verifying_key))
}
