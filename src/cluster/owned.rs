use std::sync::Arc;

use anyhow::{Result, bail};
use aws_sdk_eks::types::Cluster as EksCluster;
use futures::FutureExt;
use tracing::{debug, info, warn};

use super::{
  DeleteOptions, K8sFactory,
  delete::{check_for_undeleted_stacks, delete_shared_resources, drain_all_nodegroups, tolerate_drain_error},
  upgrade::{log_plan_mode_warning, upgrade_control_plane},
};
use crate::{
  cfn::{Cleanup, Stack, StackCollection, stack_status_is_not_transitional},
  clients::{AwsClients, K8sClients},
  eks::{self, OidcManager},
  error::EksctlError,
  tasks::{Task, handle_errors},
};

/// A cluster created by eksctl, deleted through its CloudFormation stacks
pub struct OwnedCluster<A, K> {
  stacks: StackCollection<A>,
  cluster_stack: Stack,
  /// `None` when the control plane is already gone but stacks remain
  eks_cluster: Option<EksCluster>,
  new_k8s: K8sFactory<K>,
}

impl<A: AwsClients, K: K8sClients> OwnedCluster<A, K> {
  pub fn new(
    stacks: StackCollection<A>,
    cluster_stack: Stack,
    eks_cluster: Option<EksCluster>,
    new_k8s: K8sFactory<K>,
  ) -> Self {
    Self {
      stacks,
      cluster_stack,
      eks_cluster,
      new_k8s,
    }
  }

  pub async fn upgrade(&self, version: Option<&str>, dry_run: bool) -> Result<()> {
    let name = self.stacks.cluster_name();
    let Some(cluster) = &self.eks_cluster else {
      return Err(EksctlError::ClusterNotFound(name.to_string()).into());
    };

    let stack = self.stacks.describe_cluster_stack().await?;
    if !stack_status_is_not_transitional(&stack) {
      bail!(
        "cluster stack {:?} is in status {:?}; retry once the stack operation has completed",
        stack.name,
        stack.status.as_str()
      );
    }

    let version_update_required = upgrade_control_plane(&self.stacks, cluster, version, dry_run).await?;
    log_plan_mode_warning(dry_run && version_update_required);
    Ok(())
  }

  pub async fn delete(&self, options: &DeleteOptions) -> Result<()> {
    let name = self.stacks.cluster_name();

    let eks_cluster = self.stacks.aws().describe_cluster(name).await?;
    let cluster_operable = match &eks_cluster {
      Some(cluster) => match eks::can_operate(cluster, self.stacks.region()) {
        Ok(()) => true,
        Err(err) => {
          debug!("failed to check if cluster is operable: {err:#}");
          false
        }
      },
      None => false,
    };

    let k8s = if cluster_operable {
      Some((self.new_k8s)().await?)
    } else {
      None
    };

    let nodegroup_stacks = self.stacks.list_nodegroup_stacks_with_statuses().await?;

    if let Some(k8s) = &k8s {
      if let Err(err) = drain_all_nodegroups(&self.stacks, k8s, &nodegroup_stacks, options).await {
        tolerate_drain_error(err, options.force)?;
      }
    }

    delete_shared_resources(&self.stacks, k8s.as_ref()).await?;
    self.delete_karpenter_stack_if_exists().await?;

    let cluster = eks_cluster
      .or_else(|| self.eks_cluster.clone())
      .unwrap_or_else(|| EksCluster::builder().name(name).build());
    let aws = self.stacks.aws().clone();

    let tasks = self
      .stacks
      .new_tasks_to_delete_cluster_with_nodegroups(
        Some(&self.cluster_stack),
        &nodegroup_stacks,
        cluster_operable,
        || OidcManager::new(aws, &cluster),
        &cluster,
        k8s,
        options.wait,
        options.force,
        self.network_interface_cleanup(&cluster),
      )
      .await?;

    if tasks.is_empty() {
      warn!("no cluster resources were found for {name:?}");
      return Ok(());
    }

    info!("{}", tasks.describe());
    let errs = tasks.do_all_sync().await;
    if !errs.is_empty() {
      return Err(handle_errors(errs, "cluster with nodegroup(s)"));
    }

    info!("all cluster resources were deleted");

    if options.wait {
      check_for_undeleted_stacks(&self.stacks).await?;
    }
    Ok(())
  }

  /// Hook run before retrying a nodegroup stack stuck in DELETE_FAILED, which is usually caused by
  /// network interfaces that outlived their instances
  fn network_interface_cleanup(&self, cluster: &EksCluster) -> Option<Cleanup> {
    let Some(vpc_id) = eks::cluster_vpc_id(cluster, &self.cluster_stack) else {
      debug!("no VPC found for cluster {:?}; skipping network interface cleanup", self.stacks.cluster_name());
      return None;
    };
    let aws = self.stacks.aws().clone();

    Some(Arc::new(move |nodegroup: String| {
      let aws = aws.clone();
      let vpc_id = vpc_id.clone();
      async move {
        info!("trying to cleanup dangling network interfaces before deleting nodegroup {nodegroup:?}");
        eks::cleanup_network_interfaces(&aws, &vpc_id).await
      }
      .boxed()
    }))
  }

  async fn delete_karpenter_stack_if_exists(&self) -> Result<()> {
    match self.stacks.get_karpenter_stack().await? {
      Some(stack) => {
        info!("deleting karpenter stack {:?}", stack.name);
        self.stacks.delete_stack_by_spec_sync(&stack).await
      }
      None => {
        debug!("no karpenter stack found");
        Ok(())
      }
    }
  }
}
