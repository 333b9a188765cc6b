//! Cluster lifecycle
//!
//! A cluster is *owned* when eksctl created it, which is recorded by a tagged
//! `eksctl-<name>-cluster` CloudFormation stack. Owned clusters are torn down through
//! their stacks; unowned clusters through the EKS API, with whatever stacks eksctl
//! added to them (nodegroups, IAM service accounts, addons) deleted along the way.

mod delete;
mod owned;
mod unowned;
mod upgrade;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tabled::Tabled;
use tracing::debug;

pub use owned::OwnedCluster;
pub use unowned::UnownedCluster;
pub(crate) use upgrade::log_plan_mode_warning;

use crate::{
  cfn::StackCollection,
  clients::{AwsClients, K8sClients},
};

/// Creates the Kubernetes client on demand; clusters that cannot serve API calls never need one
pub type K8sFactory<K> = Arc<dyn Fn() -> BoxFuture<'static, Result<K>> + Send + Sync>;

/// Options for `delete cluster`
#[derive(Clone, Debug)]
pub struct DeleteOptions {
  pub wait: bool,
  pub force: bool,
  pub disable_nodegroup_eviction: bool,
  pub parallel: usize,
  pub pod_eviction_wait_period: Duration,
}

impl Default for DeleteOptions {
  fn default() -> Self {
    Self {
      wait: false,
      force: false,
      disable_nodegroup_eviction: false,
      parallel: 1,
      pod_eviction_wait_period: Duration::from_secs(10),
    }
  }
}

/// A row of `get cluster`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Tabled)]
#[tabled(rename_all = "UpperCase")]
pub struct Description {
  pub name: String,
  pub region: String,
  #[tabled(rename = "EKSCTL CREATED")]
  pub owned: String,
}

/// Lists the clusters of the region and whether eksctl created each of them
///
/// A cluster whose stack lookup fails is reported as `Unknown` rather than failing the listing
pub async fn get_clusters<A: AwsClients>(stacks: &StackCollection<A>, chunk_size: i32) -> Result<Vec<Description>> {
  let region = stacks.region();

  let cluster_stacks = stacks
    .list_cluster_stack_names()
    .await
    .with_context(|| format!("failed to list cluster stacks in region {region:?}"))?;

  let names = stacks
    .aws()
    .list_clusters(chunk_size)
    .await
    .with_context(|| format!("failed to list clusters in region {region:?}"))?;

  let mut clusters = Vec::with_capacity(names.len());
  for name in names {
    let owned = match stacks.has_cluster_stack_from_list(&cluster_stacks, &name).await {
      Ok(true) => "True",
      Ok(false) => "False",
      Err(err) => {
        debug!("Error getting cluster stacks for {name:?}: {err:#}");
        "Unknown"
      }
    };

    clusters.push(Description {
      name,
      region: region.to_string(),
      owned: owned.to_string(),
    });
  }

  Ok(clusters)
}

/// A cluster resolved to whichever lifecycle applies to it
pub enum Cluster<A, K> {
  Owned(OwnedCluster<A, K>),
  Unowned(UnownedCluster<A, K>),
}

impl<A: AwsClients, K: K8sClients> Cluster<A, K> {
  /// Resolves ownership from the cluster stack. An owned cluster is returned even when the
  /// EKS cluster itself is gone, so that its remaining stacks can still be deleted
  pub async fn new(stacks: StackCollection<A>, new_k8s: K8sFactory<K>) -> Result<Self> {
    let name = stacks.cluster_name().to_string();
    let eks_cluster = stacks.aws().describe_cluster(&name).await?;

    if let Some(cluster_stack) = stacks.get_cluster_stack_if_exists().await? {
      debug!("cluster {name:?} was created by eksctl");
      return Ok(Cluster::Owned(OwnedCluster::new(stacks, cluster_stack, eks_cluster, new_k8s)));
    }

    let Some(eks_cluster) = eks_cluster else {
      bail!("cluster {name:?} does not exist");
    };

    debug!("cluster {name:?} was not created by eksctl");
    Ok(Cluster::Unowned(UnownedCluster::new(stacks, eks_cluster, new_k8s)))
  }

  pub fn is_owned(&self) -> bool {
    matches!(self, Cluster::Owned(_))
  }

  /// Upgrades the control plane by one minor version, or to `version` when given
  pub async fn upgrade(&self, version: Option<&str>, dry_run: bool) -> Result<()> {
    match self {
      Cluster::Owned(c) => c.upgrade(version, dry_run).await,
      Cluster::Unowned(c) => c.upgrade(version, dry_run).await,
    }
  }

  pub async fn delete(&self, options: &DeleteOptions) -> Result<()> {
    match self {
      Cluster::Owned(c) => c.delete(options).await,
      Cluster::Unowned(c) => c.delete(options).await,
    }
  }
}
