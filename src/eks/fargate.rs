use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::{clients::AwsClients, waiter::Waiter};

/// Fargate profile operations for a single cluster
pub struct FargateManager<A> {
  aws: A,
  cluster_name: String,
  timeout: Duration,
  interval: Duration,
}

impl<A: AwsClients> FargateManager<A> {
  pub fn new(aws: A, cluster_name: impl Into<String>, timeout: Duration, interval: Duration) -> Self {
    Self {
      aws,
      cluster_name: cluster_name.into(),
      timeout,
      interval,
    }
  }

  pub async fn list_profiles(&self) -> Result<Vec<String>> {
    self.aws.list_fargate_profiles(&self.cluster_name).await
  }

  /// Deletes a profile, optionally waiting until it no longer appears in the listing
  pub async fn delete_profile(&self, name: &str, wait: bool) -> Result<()> {
    if name.is_empty() {
      bail!("invalid Fargate profile name: empty");
    }

    self
      .aws
      .delete_fargate_profile(&self.cluster_name, name)
      .await
      .with_context(|| format!("failed to delete Fargate profile {name:?} from cluster {:?}", self.cluster_name))?;

    if wait {
      self.wait_for_deletion(name).await?;
    }
    Ok(())
  }

  async fn wait_for_deletion(&self, name: &str) -> Result<()> {
    let waiter = Waiter::fixed(format!("deletion of Fargate profile {name:?}"), self.timeout, self.interval);
    waiter
      .wait(|| async {
        let names = self.list_profiles().await?;
        debug!("Fargate profiles remaining: {names:?}");
        Ok(!names.iter().any(|n| n == name))
      })
      .await
  }
}
