use aws_nitro_enclaves_nsm_api::api::Digest;

/// AWS Nitro Enclaves Root-G1 certificate (DER)
/// Source: <https://aws-nitro-enclaves.amazonaws.com/AWS_NitroEnclaves_Root-G1.zip>
/// SHA-256 fingerprint `641a0321a3e244efe456463195d606317ed7cdcc3c1756e09893f3c68f79bb5b`
pub const AWS_NITRO_ROOT_CERT: &[u8] = include_bytes!("aws_nitro_root_g1.der");

/// Number of PCR slots exposed by the Nitro Secure Module
pub const PCR_COUNT: usize = 32;

/// Nitro signs attestation documents with ECDSA P-384 (ES384), raw `r || s`
pub const ES384_SIGNATURE_LENGTH: usize = 96;

/// Get the expected PCR length depending on the hashing algorithm used
/// As of right now, only SHA-384 is used
/// More info: <https://docs.aws.amazon.com/enclaves/latest/user/set-up-attestation.html>
#[must_use]
pub const fn get_expected_pcr_length(digest: Digest) -> usize {
    match digest {
        Digest::SHA384 => 48,
        Digest::SHA256 => 32,
        Digest::SHA512 => 64,
    }
}

/// Canonical name of the digest algorithm, as it appears in the document
#[must_use]
pub const fn digest_name(digest: Digest) -> &'static str {
    match digest {
        Digest::SHA256 => "SHA256",
        Digest::SHA384 => "SHA384",
        Digest::SHA512 => "SHA512",
    }
}
