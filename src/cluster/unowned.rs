use anyhow::{Context, Result};
use aws_sdk_eks::types::Cluster as EksCluster;
use tracing::{debug, info, warn};

use super::{
  DeleteOptions, K8sFactory,
  delete::{check_for_undeleted_stacks, delete_shared_resources, drain_all_nodegroups, tolerate_drain_error},
  upgrade::{log_plan_mode_warning, upgrade_control_plane},
};
use crate::{
  cfn::{DeleteWaitCondition, NodeGroupStack, StackCollection},
  clients::{AwsClients, K8sClients},
  eks::{self, OidcManager},
  error::EksctlError,
  tasks::{Task, TaskTree, handle_errors},
  waiter::Waiter,
};

/// A cluster created by other tooling, deleted through the EKS API
pub struct UnownedCluster<A, K> {
  stacks: StackCollection<A>,
  eks_cluster: EksCluster,
  new_k8s: K8sFactory<K>,
}

impl<A: AwsClients, K: K8sClients> UnownedCluster<A, K> {
  pub fn new(stacks: StackCollection<A>, eks_cluster: EksCluster, new_k8s: K8sFactory<K>) -> Self {
    Self {
      stacks,
      eks_cluster,
      new_k8s,
    }
  }

  fn name(&self) -> &str {
    self.stacks.cluster_name()
  }

  pub async fn upgrade(&self, version: Option<&str>, dry_run: bool) -> Result<()> {
    let version_update_required = upgrade_control_plane(&self.stacks, &self.eks_cluster, version, dry_run).await?;
    // nothing to approve when the cluster is already on the requested version
    log_plan_mode_warning(dry_run && version_update_required);
    Ok(())
  }

  pub async fn delete(&self, options: &DeleteOptions) -> Result<()> {
    let cluster = self.check_cluster_exists().await?;

    let cluster_operable = match eks::can_operate(&cluster, self.stacks.region()) {
      Ok(()) => true,
      Err(err) => {
        debug!("failed to check if cluster is operable: {err:#}");
        false
      }
    };

    let nodegroup_stacks = self.stacks.list_nodegroup_stacks_with_statuses().await?;

    let k8s = if cluster_operable {
      let k8s = (self.new_k8s)().await?;
      if let Err(err) = drain_all_nodegroups(&self.stacks, &k8s, &nodegroup_stacks, options).await {
        tolerate_drain_error(err, options.force)?;
      }
      Some(k8s)
    } else {
      None
    };

    if let Err(err) = delete_shared_resources(&self.stacks, k8s.as_ref()).await {
      if !options.force {
        return Err(err);
      }
      warn!("error occurred during deletion: {err:#}");
    }

    self.delete_fargate_role_if_exists().await?;

    // the control plane cannot be deleted while nodegroups remain, so this always waits
    self.delete_and_wait_for_nodegroups_deletion(&nodegroup_stacks).await?;

    if let Err(err) = self.delete_iam_and_oidc(&cluster, options.wait, k8s, options.force).await {
      if !options.force {
        return Err(err);
      }
      warn!("error occurred during deletion: {err:#}");
    }

    self.delete_cluster(options.wait).await?;
    check_for_undeleted_stacks(&self.stacks).await?;

    info!("all cluster resources were deleted");
    Ok(())
  }

  async fn check_cluster_exists(&self) -> Result<EksCluster> {
    let name = self.name();
    self
      .stacks
      .aws()
      .describe_cluster(name)
      .await
      .with_context(|| format!("error describing cluster {name:?}"))?
      .ok_or_else(|| EksctlError::ClusterNotFound(name.to_string()).into())
  }

  async fn delete_fargate_role_if_exists(&self) -> Result<()> {
    match self.stacks.get_fargate_stack().await? {
      Some(stack) => {
        info!("deleting fargate role");
        self.stacks.delete_stack_by_spec(&stack).await
      }
      None => {
        debug!("no fargate role found");
        Ok(())
      }
    }
  }

  async fn delete_and_wait_for_nodegroups_deletion(&self, nodegroup_stacks: &[NodeGroupStack]) -> Result<()> {
    let name = self.name();
    let nodegroups = self.stacks.aws().list_nodegroups(name).await?;

    if nodegroup_stacks.is_empty() && nodegroups.is_empty() {
      warn!("no nodegroups found for {name}");
      return Ok(());
    }

    let mut tasks = self.stacks.new_tasks_to_delete_nodegroups(nodegroup_stacks, |_| true, true, None);

    for nodegroup in nodegroups
      .iter()
      .filter(|ng| !nodegroup_stacks.iter().any(|s| &s.nodegroup_name == *ng))
    {
      tasks.append(self.stacks.new_task_to_delete_unowned_nodegroup(
        name,
        nodegroup,
        Some(self.wait_for_unowned_nodegroups_deletion()),
      ));
    }

    tasks.plan_mode = false;
    info!("{}", tasks.describe());
    let errs = tasks.do_all_sync().await;
    if !errs.is_empty() {
      return Err(handle_errors(errs, "nodegroup(s)"));
    }
    Ok(())
  }

  fn wait_for_unowned_nodegroups_deletion(&self) -> DeleteWaitCondition {
    let aws = self.stacks.aws().clone();
    let name = self.name().to_string();

    DeleteWaitCondition::new(
      move || {
        let aws = aws.clone();
        let name = name.clone();
        async move {
          if aws.list_nodegroups(&name).await?.is_empty() {
            return Ok(true);
          }
          info!("waiting for all non eksctl-owned nodegroups to be deleted");
          Ok(false)
        }
      },
      self.stacks.wait_timeout(),
      self.stacks.poll_interval(),
    )
  }

  async fn delete_iam_and_oidc(&self, cluster: &EksCluster, wait: bool, k8s: Option<K>, force: bool) -> Result<()> {
    let mut tree = TaskTree::sequential();

    if let Some(k8s) = k8s {
      let aws = self.stacks.aws().clone();
      let oidc_tasks = self
        .stacks
        .new_tasks_to_delete_oidc_provider_with_iam_service_accounts(
          || OidcManager::new(aws, cluster),
          cluster,
          k8s,
          force,
        )
        .await?;
      if !oidc_tasks.is_empty() {
        tree.append(oidc_tasks.into_sub_task());
      }
    }

    let addon_tasks = self.stacks.new_tasks_to_delete_addon_iam(wait).await?;
    if !addon_tasks.is_empty() {
      tree.append(addon_tasks.into_sub_task());
    }

    if tree.is_empty() {
      warn!("no IAM and OIDC resources were found for {:?}", self.name());
      return Ok(());
    }

    info!("{}", tree.describe());
    let errs = tree.do_all_sync().await;
    if !errs.is_empty() {
      return Err(handle_errors(errs, "cluster IAM and OIDC"));
    }

    info!("all IAM and OIDC resources were deleted");
    Ok(())
  }

  async fn delete_cluster(&self, wait: bool) -> Result<()> {
    let name = self.name();
    self.stacks.aws().delete_cluster(name).await?;
    info!("initiated deletion of cluster {name:?}");

    if !wait {
      info!(
        "to see the status of the deletion run `eksctl get cluster --name {name} --region {}`",
        self.stacks.region()
      );
      return Ok(());
    }

    info!("waiting for cluster {name:?} to be deleted");
    // back off to at most three poll intervals
    let interval = self.stacks.poll_interval();
    let waiter = Waiter::exponential(
      format!("cluster {name:?} deletion"),
      self.stacks.wait_timeout(),
      interval,
      interval * 3,
    );
    let aws = self.stacks.aws();
    waiter
      .wait(|| async move { Ok(aws.describe_cluster(name).await?.is_none()) })
      .await
  }
}
