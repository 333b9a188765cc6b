mod fargate;
mod oidc;
pub mod resources;
pub(crate) mod version;

use std::time::Duration;

use anyhow::{Result, bail};
use aws_sdk_eks::types::{Cluster, ClusterStatus, UpdateStatus};
use tracing::{debug, info};

pub use fargate::FargateManager;
pub use oidc::OidcManager;

use crate::{
  cfn::{CLUSTER_OIDC_ENABLED_TAG, Stack},
  clients::AwsClients,
  waiter::Waiter,
};

/// Output of the cluster stack holding the VPC ID
const VPC_OUTPUT: &str = "VPC";

/// Returns an error explaining why the Kubernetes API of the cluster cannot be used, if it cannot
pub fn can_operate(cluster: &Cluster, region: &str) -> Result<()> {
  match cluster.status() {
    Some(status @ (ClusterStatus::Creating | ClusterStatus::Deleting | ClusterStatus::Failed)) => bail!(
      "cannot perform Kubernetes API operations on cluster {:?} in {region:?} region due to status {:?}",
      cluster.name().unwrap_or_default(),
      status.as_str()
    ),
    _ => Ok(()),
  }
}

/// Only active clusters can be upgraded
pub fn can_update(cluster: &Cluster, region: &str) -> Result<()> {
  match cluster.status() {
    Some(ClusterStatus::Active) => Ok(()),
    status => bail!(
      "cannot update cluster {:?} in {region:?} region due to status {:?}",
      cluster.name().unwrap_or_default(),
      status.map(|s| s.as_str()).unwrap_or_default()
    ),
  }
}

/// Whether the cluster was tagged as having an OIDC provider; `None` when the tag is absent
pub fn cluster_has_oidc_provider(cluster: &Cluster) -> Option<bool> {
  cluster
    .tags()
    .and_then(|tags| tags.get(CLUSTER_OIDC_ENABLED_TAG))
    .map(|value| value == "true")
}

/// Polls an EKS update until it succeeds; failed or cancelled updates are errors
pub async fn wait_for_update<A: AwsClients>(
  aws: &A,
  cluster_name: &str,
  update_id: &str,
  nodegroup_name: Option<&str>,
  timeout: Duration,
  interval: Duration,
) -> Result<()> {
  let waiter = Waiter::fixed(format!("update {update_id}"), timeout, interval);
  waiter
    .wait(|| async {
      let update = aws
        .describe_update(cluster_name, update_id, nodegroup_name.map(str::to_string))
        .await?;

      match update.status() {
        Some(UpdateStatus::Successful) => Ok(true),
        Some(status @ (UpdateStatus::Failed | UpdateStatus::Cancelled)) => {
          let errors: Vec<String> = update
            .errors()
            .iter()
            .filter_map(|e| e.error_message().map(str::to_string))
            .collect();
          bail!("update {update_id} finished with status {:?}: {}", status.as_str(), errors.join("; "))
        }
        status => {
          debug!("Update {update_id} status: {status:?}");
          Ok(false)
        }
      }
    })
    .await
}

/// Deletes the SSH key pairs eksctl imported for the cluster's nodegroups
///
/// Failures are only logged; stale key pairs do not block cluster deletion
pub async fn delete_keys<A: AwsClients>(aws: &A, cluster_name: &str) {
  let prefix = format!("eksctl-{cluster_name}");
  let existing = match aws.list_key_pairs(&prefix).await {
    Ok(existing) => existing,
    Err(err) => {
      debug!("Cannot describe keys: {err:#}");
      return;
    }
  };

  for key in existing.iter().filter(|k| k.name.starts_with(&prefix)) {
    debug!("Existing key {:?} matches prefix", key.name);
    if key.name.rsplit('-').next() != Some(key.fingerprint.as_str()) {
      continue;
    }

    debug!("Deleting key {:?}", key.name);
    if let Err(err) = aws.delete_key_pair(&key.name).await {
      debug!("Key pair couldn't be deleted: {err:#}");
    }
  }
}

/// VPC of the cluster, from the control plane or else from the cluster stack outputs
pub fn cluster_vpc_id(cluster: &Cluster, cluster_stack: &Stack) -> Option<String> {
  cluster
    .resources_vpc_config()
    .and_then(|config| config.vpc_id())
    .map(str::to_string)
    .or_else(|| cluster_stack.outputs.get(VPC_OUTPUT).cloned())
    .filter(|id| !id.is_empty())
}

/// Deletes the detached network interfaces left in the VPC, which block deleting its subnets
/// and security groups
pub async fn cleanup_network_interfaces<A: AwsClients>(aws: &A, vpc_id: &str) -> Result<()> {
  let interfaces = aws.list_available_network_interfaces(vpc_id).await?;
  if interfaces.is_empty() {
    debug!("no dangling network interfaces in VPC {vpc_id}");
    return Ok(());
  }

  for id in &interfaces {
    debug!("deleting dangling network interface {id}");
    aws.delete_network_interface(id).await?;
  }
  info!("deleted {} dangling network interface(s) in VPC {vpc_id}", interfaces.len());
  Ok(())
}
