//! Typed errors for conditions that callers branch on.
//!
//! Everything else is propagated as `anyhow::Error` with context attached.

use std::time::Duration;

use aws_sdk_iam::error::ProvideErrorMetadata;
use thiserror::Error;

/// Service error codes AWS returns when the caller lacks permissions or the service is not
/// available to the account
const ACCESS_DENIED_CODES: [&str; 4] = [
  "AccessDenied",
  "AccessDeniedException",
  "UnauthorizedOperation",
  "UnrecognizedClientException",
];

#[derive(Error, Debug)]
pub enum EksctlError {
  #[error("no eksctl-managed CloudFormation stack found for cluster {cluster:?}")]
  StackNotFound { cluster: String },

  #[error("cluster {0:?} not found")]
  ClusterNotFound(String),

  #[error("timed out waiting for {operation} after {timeout:?}")]
  Timeout { operation: String, timeout: Duration },

  #[error("OIDC is not supported for cluster {0:?}")]
  UnsupportedOidc(String),

  #[error("access denied: {0}")]
  AccessDenied(String),
}

impl EksctlError {
  /// Returns true if the error (or any error in its chain) is the given variant
  pub fn is_stack_not_found(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<EksctlError>(), Some(EksctlError::StackNotFound { .. }))
  }

  pub fn is_cluster_not_found(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<EksctlError>(), Some(EksctlError::ClusterNotFound(_)))
  }

  pub fn is_unsupported_oidc(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<EksctlError>(), Some(EksctlError::UnsupportedOidc(_)))
  }

  pub fn is_access_denied(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<EksctlError>(), Some(EksctlError::AccessDenied(_)))
  }

  pub fn is_timeout(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<EksctlError>(), Some(EksctlError::Timeout { .. }))
  }
}

/// Converts an SDK error, attaching `AccessDenied` as context when the service refused the call
/// for lack of permissions
pub(crate) fn classify_aws_error<E>(err: E) -> anyhow::Error
where
  E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
  match err.code() {
    Some(code) if ACCESS_DENIED_CODES.contains(&code) => {
      let message = err.message().unwrap_or(code).to_string();
      anyhow::Error::new(err).context(EksctlError::AccessDenied(message))
    }
    _ => anyhow::Error::new(err),
  }
}
