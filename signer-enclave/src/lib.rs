#![deny(clippy::all, clippy::pedantic, clippy::nursery, dead_code)]

pub mod custody;
pub mod eip712;
pub mod identity;
pub mod kms;
pub mod nsm;
pub mod projection;
pub mod routes;
pub mod server;
pub mod signer;
pub mod types;

#[cfg(feature = "test-utils")]
pub mod testing;
