use std::{future::Future, sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use aws_sdk_eks::types::Cluster;
use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use super::{NodeGroupStack, Stack, StackCollection, StackStatus, get_iam_service_account_name};
use crate::{
  clients::{AwsClients, K8sClients},
  eks::{OidcManager, cluster_has_oidc_provider},
  error::EksctlError,
  tasks::{GenericTask, Task, TaskTree},
  waiter::Waiter,
};

/// Runs before re-deleting a nodegroup stack that previously failed to delete
pub type Cleanup = Arc<dyn Fn(String) -> BoxFuture<'static, Result<()>> + Send + Sync>;

type ConditionFn = Arc<dyn Fn() -> BoxFuture<'static, Result<bool>> + Send + Sync>;

/// Condition polled after deleting a nodegroup through the EKS API
#[derive(Clone)]
pub struct DeleteWaitCondition {
  condition: ConditionFn,
  pub timeout: Duration,
  pub interval: Duration,
}

impl DeleteWaitCondition {
  pub fn new<F, Fut>(condition: F, timeout: Duration, interval: Duration) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool>> + Send + 'static,
  {
    Self {
      condition: Arc::new(move || Box::pin(condition())),
      timeout,
      interval,
    }
  }
}

const OIDC_ACCESS_DENIED: &str = "IAM permissions are required to delete OIDC provider";

impl<A: AwsClients> StackCollection<A> {
  /// Deletes the nodegroups, the service accounts and OIDC provider, the addon IAM stacks and
  /// finally the cluster stack itself, in that order
  #[allow(clippy::too_many_arguments)]
  pub async fn new_tasks_to_delete_cluster_with_nodegroups<K, F>(
    &self,
    cluster_stack: Option<&Stack>,
    nodegroup_stacks: &[NodeGroupStack],
    cluster_operable: bool,
    new_oidc_manager: F,
    cluster: &Cluster,
    k8s: Option<K>,
    wait: bool,
    force: bool,
    cleanup: Option<Cleanup>,
  ) -> Result<TaskTree>
  where
    K: K8sClients,
    F: FnOnce() -> Result<OidcManager<A>>,
  {
    let mut tree = TaskTree::sequential();

    let nodegroup_tasks = self.new_tasks_to_delete_nodegroups(nodegroup_stacks, |_| true, true, cleanup);
    if !nodegroup_tasks.is_empty() {
      tree.append(nodegroup_tasks.into_sub_task());
    }

    if cluster_operable {
      let k8s = k8s.ok_or_else(|| anyhow!("a Kubernetes client is required to delete IAM service accounts"))?;
      let oidc_tasks = self
        .new_tasks_to_delete_oidc_provider_with_iam_service_accounts(new_oidc_manager, cluster, k8s, force)
        .await?;
      if !oidc_tasks.is_empty() {
        tree.append(oidc_tasks.into_sub_task());
      }
    }

    let addon_tasks = self.new_tasks_to_delete_addon_iam(wait).await?;
    if !addon_tasks.is_empty() {
      tree.append(addon_tasks.into_sub_task());
    }

    let Some(cluster_stack) = cluster_stack else {
      return Err(
        EksctlError::StackNotFound {
          cluster: self.cluster_name().to_string(),
        }
        .into(),
      );
    };

    tree.append(self.delete_stack_task(
      format!("delete cluster control plane {:?}", self.cluster_name()),
      cluster_stack.clone(),
      wait,
    ));

    Ok(tree)
  }

  /// Parallel tree deleting every nodegroup stack selected by `should_delete`
  pub fn new_tasks_to_delete_nodegroups(
    &self,
    nodegroup_stacks: &[NodeGroupStack],
    should_delete: impl Fn(&str) -> bool,
    wait: bool,
    cleanup: Option<Cleanup>,
  ) -> TaskTree {
    let mut tree = TaskTree::parallel();

    for ng in nodegroup_stacks.iter().filter(|ng| should_delete(&ng.nodegroup_name)) {
      if ng.stack.status == StackStatus::DeleteFailed {
        if let Some(cleanup) = &cleanup {
          let cleanup = cleanup.clone();
          let name = ng.nodegroup_name.clone();
          tree.append(GenericTask::new(format!("cleanup for nodegroup {name:?}"), move || {
            cleanup(name.clone())
          }));
        }
      }

      tree.append(self.delete_stack_task(
        format!("delete nodegroup {:?}", ng.nodegroup_name),
        ng.stack.clone(),
        wait,
      ));
    }

    tree
  }

  /// Deletes a managed nodegroup that has no stack through the EKS API
  pub fn new_task_to_delete_unowned_nodegroup(
    &self,
    cluster_name: &str,
    nodegroup_name: &str,
    wait_condition: Option<DeleteWaitCondition>,
  ) -> impl Task + 'static {
    let aws = self.aws().clone();
    let cluster_name = cluster_name.to_string();
    let nodegroup_name = nodegroup_name.to_string();

    GenericTask::new(format!("delete unowned nodegroup {nodegroup_name}"), move || {
      let aws = aws.clone();
      let cluster_name = cluster_name.clone();
      let nodegroup_name = nodegroup_name.clone();
      let wait_condition = wait_condition.clone();

      async move {
        aws.delete_nodegroup(&cluster_name, &nodegroup_name).await?;
        debug!("Initiated deletion of nodegroup {nodegroup_name:?}");

        if let Some(wait) = wait_condition {
          let waiter = Waiter::fixed("nodegroup deletion", wait.timeout, wait.interval);
          waiter.wait(|| (wait.condition)()).await?;
        }
        Ok(())
      }
    })
  }

  /// Sequential tree deleting every IAM service account and then the OIDC provider
  ///
  /// Clusters without OIDC support produce an empty tree
  pub async fn new_tasks_to_delete_oidc_provider_with_iam_service_accounts<K, F>(
    &self,
    new_oidc_manager: F,
    cluster: &Cluster,
    k8s: K,
    force: bool,
  ) -> Result<TaskTree>
  where
    K: K8sClients,
    F: FnOnce() -> Result<OidcManager<A>>,
  {
    let mut tree = TaskTree::sequential();

    let oidc = match new_oidc_manager() {
      Ok(oidc) => oidc,
      Err(err) if EksctlError::is_unsupported_oidc(&err) => {
        debug!("OIDC is not supported for this cluster");
        return Ok(tree);
      }
      Err(err) => return Err(err.context("error creating OIDC manager")),
    };

    let service_accounts = self.all_service_accounts().await?;
    if !service_accounts.is_empty() {
      let sa_tasks = self.new_tasks_to_delete_iam_service_accounts(&service_accounts, k8s, true).await?;
      if !sa_tasks.is_empty() {
        tree.append(sa_tasks.into_sub_task());
      }
    }

    let provider_exists = match oidc.check_provider_exists().await {
      Ok(exists) => exists,
      Err(err) if EksctlError::is_access_denied(&err) => {
        match cluster_has_oidc_provider(cluster) {
          Some(true) => return Err(err.context(OIDC_ACCESS_DENIED)),
          Some(false) => {
            if !service_accounts.is_empty() {
              warn!(
                "expected an OIDC provider to be associated with the cluster; found {} service account(s)",
                service_accounts.len()
              );
            }
          }
          None if !service_accounts.is_empty() => {
            if !force {
              return Err(err.context(format!(
                "found {} IAM service account(s); {OIDC_ACCESS_DENIED}",
                service_accounts.len()
              )));
            }
          }
          None => info!(
            "could not determine if cluster has an OIDC provider because of missing IAM permissions; \
            if an OIDC provider was associated with the cluster, \
            run `aws iam delete-open-id-connect-provider` from an authorized IAM entity to delete it"
          ),
        }
        return Ok(tree);
      }
      Err(err) => return Err(err),
    };

    if provider_exists {
      tree.append(GenericTask::new("delete IAM OIDC provider", move || {
        let oidc = oidc.clone();
        async move { oidc.delete_provider().await }
      }));
    }

    Ok(tree)
  }

  async fn all_service_accounts(&self) -> Result<Vec<String>> {
    let stacks = self.describe_iam_service_account_stacks().await?;
    Ok(stacks.iter().filter_map(get_iam_service_account_name).collect())
  }

  /// Parallel tree with one sequential sub-tree per service account: the IAM role stack
  /// (when present) and then the Kubernetes service account
  pub async fn new_tasks_to_delete_iam_service_accounts<K: K8sClients>(
    &self,
    service_accounts: &[String],
    k8s: K,
    wait: bool,
  ) -> Result<TaskTree> {
    let stacks = self.describe_iam_service_account_stacks().await?;
    let mut tree = TaskTree::parallel();

    for service_account in service_accounts {
      let mut sa_tasks = TaskTree::sequential().into_sub_task();

      if let Some(stack) = stacks
        .iter()
        .find(|s| get_iam_service_account_name(s).as_deref() == Some(service_account.as_str()))
      {
        sa_tasks.append(self.delete_stack_task(
          format!("delete IAM role for serviceaccount {service_account:?}"),
          stack.clone(),
          wait,
        ));
      }

      let (namespace, name) = split_service_account_name(service_account)?;
      let k8s = k8s.clone();
      sa_tasks.append(GenericTask::new(format!("delete serviceaccount {service_account:?}"), move || {
        let k8s = k8s.clone();
        let namespace = namespace.clone();
        let name = name.clone();
        async move {
          if k8s.delete_service_account(&namespace, &name).await? {
            info!("Deleted serviceaccount \"{namespace}/{name}\"");
          } else {
            debug!("Serviceaccount \"{namespace}/{name}\" already deleted");
          }
          Ok(())
        }
      }));

      tree.append(sa_tasks);
    }

    Ok(tree)
  }

  /// Parallel tree deleting the IAM stacks created for addons
  pub async fn new_tasks_to_delete_addon_iam(&self, wait: bool) -> Result<TaskTree> {
    let stacks = self.get_iam_addons_stacks().await?;
    let mut tree = TaskTree::parallel();

    for stack in stacks {
      let mut stack_tasks = TaskTree::sequential().into_sub_task();
      stack_tasks.append(self.delete_stack_task(format!("delete addon IAM {:?}", stack.name), stack, wait));
      tree.append(stack_tasks);
    }

    Ok(tree)
  }
}

/// Splits `namespace/name`
fn split_service_account_name(value: &str) -> Result<(String, String)> {
  match value.split_once('/') {
    Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() && !name.contains('/') => {
      Ok((namespace.to_string(), name.to_string()))
    }
    _ => Err(anyhow!("unexpected serviceaccount name format {value:?}")),
  }
}
