use anyhow::Result;
use aws_sdk_eks::types::Cluster;
use tracing::{debug, info};

use crate::{clients::AwsClients, error::EksctlError};

/// Manages the IAM OIDC provider associated with a cluster's issuer
#[derive(Clone)]
pub struct OidcManager<A> {
  aws: A,
  /// Issuer URL without the scheme, which is how IAM names the provider
  issuer_path: String,
}

impl<A: AwsClients> OidcManager<A> {
  /// Fails with `UnsupportedOidc` when the cluster has no OIDC issuer
  pub fn new(aws: A, cluster: &Cluster) -> Result<Self> {
    let issuer = cluster
      .identity()
      .and_then(|identity| identity.oidc())
      .and_then(|oidc| oidc.issuer())
      .filter(|issuer| !issuer.is_empty());

    match issuer {
      Some(issuer) => Ok(Self {
        aws,
        issuer_path: issuer.trim_start_matches("https://").to_string(),
      }),
      None => Err(EksctlError::UnsupportedOidc(cluster.name().unwrap_or_default().to_string()).into()),
    }
  }

  pub fn issuer_path(&self) -> &str {
    &self.issuer_path
  }

  async fn provider_arn(&self) -> Result<Option<String>> {
    let suffix = format!(":oidc-provider/{}", self.issuer_path);
    let providers = self.aws.list_oidc_providers().await?;
    Ok(providers.into_iter().find(|arn| arn.ends_with(&suffix)))
  }

  pub async fn check_provider_exists(&self) -> Result<bool> {
    let exists = self.provider_arn().await?.is_some();
    debug!("OIDC provider for {} exists: {exists}", self.issuer_path);
    Ok(exists)
  }

  pub async fn delete_provider(&self) -> Result<()> {
    match self.provider_arn().await? {
      Some(arn) => {
        self.aws.delete_oidc_provider(&arn).await?;
        info!("Deleted IAM OIDC provider {arn}");
      }
      None => debug!("IAM OIDC provider for {} already deleted", self.issuer_path),
    }
    Ok(())
  }
}
