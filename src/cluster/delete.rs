use std::time::Duration;

use anyhow::{Result, bail};
use tracing::{debug, info, warn};

use super::DeleteOptions;
use crate::{
  cfn::{NodeGroupStack, NodeGroupType, StackCollection, StackStatus},
  clients::{AwsClients, K8sClients},
  eks::{self, FargateManager},
  elb,
  error::EksctlError,
  k8s::DrainOptions,
  kubeconfig,
  nodegroup::{self, DrainInput},
  tasks::{Task, handle_errors},
};

const VPC_CNI_ADDON: &str = "vpc-cni";

/// Resources shared by owned and unowned clusters: Fargate profiles, deprecated stacks,
/// SSH keys, the local kubeconfig entry and the load balancers of `LoadBalancer` services
///
/// `k8s` is only given when the cluster is operable
pub(super) async fn delete_shared_resources<A: AwsClients, K: K8sClients>(
  stacks: &StackCollection<A>,
  k8s: Option<&K>,
) -> Result<()> {
  if k8s.is_some() {
    delete_fargate_profiles(stacks).await?;
  }

  let (has_deprecated_stacks, result) = delete_deprecated_stacks(stacks).await;
  if has_deprecated_stacks {
    return result;
  }

  eks::delete_keys(stacks.aws(), stacks.cluster_name()).await;

  kubeconfig::maybe_delete_config(stacks.cluster_name(), stacks.region());

  if let Some(k8s) = k8s {
    info!("cleaning up AWS load balancers created by Kubernetes objects of Kind Service or Ingress");
    elb::cleanup(stacks.aws(), k8s, stacks.cluster_name()).await?;
  }
  Ok(())
}

async fn delete_fargate_profiles<A: AwsClients>(stacks: &StackCollection<A>) -> Result<()> {
  let manager = FargateManager::new(
    stacks.aws().clone(),
    stacks.cluster_name(),
    stacks.wait_timeout(),
    stacks.poll_interval(),
  );

  let profile_names = match manager.list_profiles().await {
    Ok(names) => names,
    Err(err) if EksctlError::is_access_denied(&err) => {
      debug!("Fargate: unauthorized error: {err:#}");
      info!(
        "either account is not authorized to use Fargate or region {} is not supported. Ignoring error",
        stacks.region()
      );
      return Ok(());
    }
    Err(err) => return Err(err),
  };

  // The API refuses to delete a profile while another one is still deleting
  for name in &profile_names {
    info!("deleting Fargate profile {name:?}");
    manager.delete_profile(name, true).await?;
    info!("deleted Fargate profile {name:?}");
  }
  info!("deleted {} Fargate profile(s)", profile_names.len());

  if let Some(stack) = stacks.get_fargate_stack().await? {
    stacks.delete_stack_by_spec(&stack).await?;
  }
  Ok(())
}

/// Returns whether any stacks from the pre-eksctl naming scheme were found, along with the
/// outcome of deleting them
async fn delete_deprecated_stacks<A: AwsClients>(stacks: &StackCollection<A>) -> (bool, Result<()>) {
  let tasks = match stacks.delete_tasks_for_deprecated_stacks().await {
    Ok(tasks) => tasks,
    Err(err) => return (true, Err(err)),
  };

  if tasks.is_empty() {
    return (false, Ok(()));
  }

  info!("{}", tasks.describe());
  let errs = tasks.do_all_sync().await;
  if !errs.is_empty() {
    return (true, Err(handle_errors(errs, "deprecated stacks")));
  }

  info!("deleted all {} deprecated stacks", tasks.len());
  (true, Ok(()))
}

/// Fails if any stack of the cluster is left that is not already being deleted
pub(super) async fn check_for_undeleted_stacks<A: AwsClients>(stacks: &StackCollection<A>) -> Result<()> {
  let undeleted: Vec<String> = stacks
    .describe_stacks()
    .await?
    .into_iter()
    .filter(|s| s.status != StackStatus::DeleteInProgress)
    .map(|s| s.name)
    .collect();

  if !undeleted.is_empty() {
    warn!("found the following undeleted stacks: {}", undeleted.join(","));
    bail!("failed to delete all resources");
  }
  Ok(())
}

/// Drains the unmanaged nodegroups so that workloads shut down cleanly before their nodes go away
pub(super) async fn drain_all_nodegroups<A: AwsClients, K: K8sClients>(
  stacks: &StackCollection<A>,
  k8s: &K,
  nodegroup_stacks: &[NodeGroupStack],
  options: &DeleteOptions,
) -> Result<()> {
  if nodegroup_stacks.is_empty() {
    return Ok(());
  }

  let nodegroups: Vec<(String, NodeGroupType)> = nodegroup_stacks
    .iter()
    .filter(|s| s.kind == NodeGroupType::Unmanaged)
    .map(|s| (s.nodegroup_name.clone(), s.kind))
    .collect();

  info!(
    "will drain {} unmanaged nodegroup(s) in cluster {:?}",
    nodegroups.len(),
    stacks.cluster_name()
  );

  let input = DrainInput {
    nodegroups,
    options: DrainOptions {
      max_grace_period: stacks.wait_timeout(),
      pod_eviction_wait_period: options.pod_eviction_wait_period,
      disable_eviction: options.disable_nodegroup_eviction,
      node_drain_wait_period: Duration::ZERO,
      undo: false,
      timeout: stacks.wait_timeout(),
    },
    parallel: options.parallel,
    plan: false,
  };
  nodegroup::drain(k8s, &input).await?;

  attempt_vpc_cni_deletion(stacks, k8s).await;
  Ok(())
}

/// Removes the VPC CNI ahead of the nodes so it cannot race with ENI cleanup; failures are ignored
async fn attempt_vpc_cni_deletion<A: AwsClients, K: K8sClients>(stacks: &StackCollection<A>, k8s: &K) {
  debug!("deleting EKS addon {VPC_CNI_ADDON:?} if it exists");
  match stacks.aws().delete_addon(stacks.cluster_name(), VPC_CNI_ADDON).await {
    Ok(true) => {}
    Ok(false) => debug!("EKS addon {VPC_CNI_ADDON:?} does not exist"),
    Err(err) => debug!("failed to delete addon {VPC_CNI_ADDON:?}: {err:#}"),
  }

  debug!("deleting kube-system/aws-node DaemonSet");
  if let Err(err) = k8s.delete_daemonset("kube-system", "aws-node").await {
    debug!("failed to delete kube-system/aws-node DaemonSet: {err:#}");
  }
}

/// Drain failures abort the deletion unless it is forced
pub(super) fn tolerate_drain_error(err: anyhow::Error, force: bool) -> Result<()> {
  if !force {
    return Err(err);
  }
  warn!(
    "an error occurred during nodegroups draining, force=true so proceeding with deletion: {:?}",
    format!("{err:#}")
  );
  Ok(())
}
