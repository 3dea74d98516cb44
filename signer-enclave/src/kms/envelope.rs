//! Opening of `CiphertextForRecipient` payloads.
//!
//! KMS returns secrets addressed to an attested enclave as a CMS `EnvelopedData`
//! structure: the content key is wrapped with RSAES-OAEP-SHA256 under the
//! recipient's public key, and the content is encrypted with AES-256-CBC.
//! The structure arrives BER encoded with indefinite lengths and is normalized
//! to DER before decoding.

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use cms::content_info::ContentInfo;
use cms::enveloped_data::{EnvelopedData, RecipientInfo};
use der::asn1::{ObjectIdentifier, OctetString, SetOfVec};
use der::{Decode, Encode};
use rsa::{Oaep, RsaPrivateKey};
use sha2::Sha256;

use super::{ber, KmsError};

const ID_ENVELOPED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.3");
const ID_AES256_CBC: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.1.42");

/// Decrypts a BER or DER encoded CMS `EnvelopedData` with the recipient's RSA key.
///
/// # Errors
/// Returns `Envelope` if the structure is malformed, uses an unexpected
/// algorithm, or does not decrypt under `recipient_key`.
pub fn open_enveloped_data(
    ciphertext: &[u8],
    recipient_key: &RsaPrivateKey,
) -> Result<Vec<u8>, KmsError> {
    let der = ber::to_der(ciphertext)?;
    let content_info = ContentInfo::from_der(&der).map_err(envelope_error)?;
    if content_info.content_type != ID_ENVELOPED_DATA {
        return Err(KmsError::Envelope(format!(
            "unexpected content type {}",
            content_info.content_type
        )));
    }

    let enveloped = content_info
        .content
        .to_der()
        .and_then(|der| EnvelopedData::from_der(&der))
        .map_err(envelope_error)?;

    let content_key = unwrap_content_key(&enveloped, recipient_key)?;

    let content_alg = &enveloped.encrypted_content.content_enc_alg;
    if content_alg.oid != ID_AES256_CBC {
        return Err(KmsError::Envelope(format!(
            "unsupported content encryption algorithm {}",
            content_alg.oid
        )));
    }

    let iv = content_alg
        .parameters
        .as_ref()
        .ok_or_else(|| KmsError::Envelope("missing AES-CBC IV".to_string()))?
        .to_der()
        .and_then(|der| OctetString::from_der(&der))
        .map_err(envelope_error)?;

    let encrypted = enveloped
        .encrypted_content
        .encrypted_content
        .as_ref()
        .ok_or_else(|| KmsError::Envelope("missing encrypted content".to_string()))?;

    cbc::Decryptor::<Aes256>::new_from_slices(&content_key, iv.as_bytes())
        .map_err(|_| KmsError::Envelope("invalid AES-256-CBC key or IV length".to_string()))?
        .decrypt_padded_vec_mut::<Pkcs7>(encrypted.as_bytes())
        .map_err(|_| KmsError::Envelope("invalid content padding".to_string()))
}

fn unwrap_content_key(
    enveloped: &EnvelopedData,
    recipient_key: &RsaPrivateKey,
) -> Result<Vec<u8>, KmsError> {
    let recipients = enveloped
        .recip_infos
        .to_der()
        .and_then(|der| SetOfVec::<RecipientInfo>::from_der(&der))
        .map_err(envelope_error)?;

    for recipient in recipients.iter() {
        if let RecipientInfo::Ktri(ktri) = recipient {
            return recipient_key
                .decrypt(Oaep::new::<Sha256>(), ktri.enc_key.as_bytes())
                .map_err(|e| KmsError::Envelope(format!("failed to unwrap content key: {e}")));
        }
    }

    Err(KmsError::Envelope(
        "no key transport recipient found".to_string(),
    ))
}

fn envelope_error(err: der::Error) -> KmsError {
    KmsError::Envelope(err.to_string())
}
