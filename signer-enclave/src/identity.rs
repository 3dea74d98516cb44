//! Resolution of the AWS principal the enclave runs as.

use async_trait::async_trait;
use aws_sdk_sts::{error::DisplayErrorContext, Client as StsClient};
use thiserror::Error;

const IAM_SERVICE: &str = "iam";
const STS_SERVICE: &str = "sts";
const ASSUMED_ROLE_PREFIX: &str = "assumed-role/";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("STS GetCallerIdentity failed: {0}")]
    Request(String),

    #[error("STS GetCallerIdentity returned no ARN")]
    MissingArn,

    #[error("Invalid ARN: {0}")]
    InvalidArn(String),

    #[error("Unsupported principal ARN {0}, only IAM and STS assumed-role ARNs can be used")]
    UnsupportedPrincipal(String),
}

/// The principal KMS policies are written for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    /// `arn:<partition>:iam::<account>:root`
    pub root_arn: String,
    /// IAM ARN of the calling principal
    pub principal_arn: String,
}

impl CallerIdentity {
    /// Builds the identity from the ARN reported by STS
    ///
    /// # Errors
    /// Returns an error if the ARN is malformed or cannot be expressed as an IAM principal.
    pub fn from_caller_arn(arn: &str) -> Result<Self, IdentityError> {
        let principal_arn = ensure_iam_arn(arn)?;
        let root_arn = root_arn(&principal_arn)?;
        Ok(Self {
            root_arn,
            principal_arn,
        })
    }
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn caller_identity(&self) -> Result<CallerIdentity, IdentityError>;
}

/// Resolves the caller through STS `GetCallerIdentity`
#[derive(Debug, Clone)]
pub struct StsIdentityResolver {
    client: StsClient,
}

impl StsIdentityResolver {
    #[must_use]
    pub const fn new(client: StsClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IdentityResolver for StsIdentityResolver {
    async fn caller_identity(&self) -> Result<CallerIdentity, IdentityError> {
        let output = self
            .client
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| IdentityError::Request(DisplayErrorContext(&e).to_string()))?;

        let arn = output.arn().ok_or(IdentityError::MissingArn)?;
        CallerIdentity::from_caller_arn(arn)
    }
}

struct Arn<'a> {
    partition: &'a str,
    service: &'a str,
    region: &'a str,
    account: &'a str,
    resource: &'a str,
}

impl<'a> Arn<'a> {
    fn parse(value: &'a str) -> Result<Self, IdentityError> {
        let mut parts = value.splitn(6, ':');
        let (Some("arn"), Some(partition), Some(service), Some(region), Some(account), Some(resource)) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(IdentityError::InvalidArn(value.to_string()));
        };

        if partition.is_empty() || service.is_empty() || resource.is_empty() {
            return Err(IdentityError::InvalidArn(value.to_string()));
        }

        Ok(Self {
            partition,
            service,
            region,
            account,
            resource,
        })
    }

    fn render(&self, service: &str, resource: &str) -> String {
        format!(
            "arn:{}:{service}:{}:{}:{resource}",
            self.partition, self.region, self.account
        )
    }
}

/// Normalizes a principal ARN to its IAM form.
///
/// IAM ARNs are returned unchanged. An STS `assumed-role/<role>/<session>` ARN
/// becomes `arn:<partition>:iam::<account>:role/<role>`.
///
/// # Errors
/// Returns an error for malformed ARNs and any other STS resource.
pub fn ensure_iam_arn(value: &str) -> Result<String, IdentityError> {
    let arn = Arn::parse(value)?;

    if arn.service == IAM_SERVICE {
        return Ok(value.to_string());
    }

    let role = arn
        .resource
        .strip_prefix(ASSUMED_ROLE_PREFIX)
        .filter(|_| arn.service == STS_SERVICE)
        .and_then(|rest| rest.split('/').next())
        .filter(|role| !role.is_empty())
        .ok_or_else(|| IdentityError::UnsupportedPrincipal(value.to_string()))?;

    Ok(arn.render(IAM_SERVICE, &format!("role/{role}")))
}

/// Account root ARN of the account owning `value`
///
/// # Errors
/// Returns an error if `value` is not an ARN.
pub fn root_arn(value: &str) -> Result<String, IdentityError> {
    let arn = Arn::parse(value)?;
    Ok(arn.render(IAM_SERVICE, "root"))
}
