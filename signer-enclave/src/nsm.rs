//! Access to the Nitro Secure Module.
//!
//! The module reports the enclave's code measurements and issues attestation
//! documents signed by the Nitro hypervisor.

use aws_nitro_enclaves_nsm_api::api::{Request, Response};
use aws_nitro_enclaves_nsm_api::driver as nsm_driver;
use serde_bytes::ByteBuf;
use thiserror::Error;

/// Errors returned by the secure module
#[derive(Debug, Error)]
pub enum NsmError {
    /// `/dev/nsm` could not be opened
    #[error("Secure module device is not available")]
    DeviceUnavailable,

    /// The device answered with an error code
    #[error("Secure module rejected {request}: {code}")]
    Device { request: &'static str, code: String },

    /// The device answered with a response of the wrong kind
    #[error("Unexpected secure module response to {0}")]
    UnexpectedResponse(&'static str),
}

/// State and value of a single PCR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcrDescription {
    pub locked: bool,
    pub value: Vec<u8>,
}

/// Measurement reporting and attestation issuing primitives
pub trait SecureModule: Send + Sync {
    /// Reads the PCR at `index`
    ///
    /// # Errors
    /// Returns an error if the device rejects the request.
    fn describe_pcr(&self, index: u16) -> Result<PcrDescription, NsmError>;

    /// Issues an attestation document embedding the given optional fields
    ///
    /// # Errors
    /// Returns an error if the device rejects the request.
    fn attest(
        &self,
        nonce: Option<&[u8]>,
        user_data: Option<&[u8]>,
        public_key: Option<&[u8]>,
    ) -> Result<Vec<u8>, NsmError>;
}

/// [`SecureModule`] backed by the `/dev/nsm` driver
#[derive(Debug)]
pub struct NitroSecureModule {
    fd: i32,
}

impl NitroSecureModule {
    /// Opens a session with the secure module
    ///
    /// # Errors
    /// Returns `DeviceUnavailable` when not running inside a Nitro Enclave.
    pub fn open() -> Result<Self, NsmError> {
        let fd = nsm_driver::nsm_init();
        if fd < 0 {
            return Err(NsmError::DeviceUnavailable);
        }
        Ok(Self { fd })
    }

    fn process(&self, request: Request) -> Response {
        nsm_driver::nsm_process_request(self.fd, request)
    }
}

impl Drop for NitroSecureModule {
    fn drop(&mut self) {
        nsm_driver::nsm_exit(self.fd);
    }
}

impl SecureModule for NitroSecureModule {
    fn describe_pcr(&self, index: u16) -> Result<PcrDescription, NsmError> {
        match self.process(Request::DescribePCR { index }) {
            Response::DescribePCR { lock, data } => Ok(PcrDescription {
                locked: lock,
                value: data,
            }),
            Response::Error(code) => Err(NsmError::Device {
                request: "DescribePCR",
                code: format!("{code:?}"),
            }),
            _ => Err(NsmError::UnexpectedResponse("DescribePCR")),
        }
    }

    fn attest(
        &self,
        nonce: Option<&[u8]>,
        user_data: Option<&[u8]>,
        public_key: Option<&[u8]>,
    ) -> Result<Vec<u8>, NsmError> {
        let request = Request::Attestation {
            user_data: user_data.map(|data| ByteBuf::from(data.to_vec())),
            nonce: nonce.map(|data| ByteBuf::from(data.to_vec())),
            public_key: public_key.map(|data| ByteBuf::from(data.to_vec())),
        };

        match self.process(request) {
            Response::Attestation { document } => Ok(document),
            Response::Error(code) => Err(NsmError::Device {
                request: "Attestation",
                code: format!("{code:?}"),
            }),
            _ => Err(NsmError::UnexpectedResponse("Attestation")),
        }
    }
}
