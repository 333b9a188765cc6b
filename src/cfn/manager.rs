use std::time::Duration;

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::{debug, info};

use super::{
  CLUSTER_STACK_REGEX, KARPENTER_NAME_TAG, NODEGROUP_TYPE_TAG, NodeGroupStack, NodeGroupType, Stack, StackStatus,
  all_non_deleted_stack_statuses, get_iam_addon_name, get_iam_service_account_name, get_nodegroup_name,
  make_cluster_stack_name, matches_cluster, stacks_regex_for_cluster,
};
use crate::{
  clients::AwsClients,
  error::EksctlError,
  tasks::{GenericTask, TaskTree},
  waiter::Waiter,
};

/// Stacks which predate the `eksctl-` prefix, in the order they must be deleted
const DEPRECATED_STACK_SUFFIXES: [&str; 4] = ["DefaultNodeGroup", "ControlPlane", "ServiceRole", "VPC"];

/// Manages the CloudFormation stacks of a single cluster
#[derive(Clone)]
pub struct StackCollection<A> {
  aws: A,
  cluster_name: String,
  region: String,
  role_arn: Option<String>,
  wait_timeout: Duration,
  poll_interval: Duration,
}

impl<A: AwsClients> StackCollection<A> {
  pub fn new(aws: A, cluster_name: impl Into<String>, region: impl Into<String>) -> Self {
    Self {
      aws,
      cluster_name: cluster_name.into(),
      region: region.into(),
      role_arn: None,
      wait_timeout: Duration::from_secs(25 * 60),
      poll_interval: Duration::from_secs(20),
    }
  }

  /// Service role CloudFormation assumes when deleting stacks
  pub fn with_role_arn(mut self, role_arn: Option<String>) -> Self {
    self.role_arn = role_arn;
    self
  }

  pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
    self.wait_timeout = timeout;
    self
  }

  pub fn with_poll_interval(mut self, interval: Duration) -> Self {
    self.poll_interval = interval;
    self
  }

  pub fn cluster_name(&self) -> &str {
    &self.cluster_name
  }

  pub fn region(&self) -> &str {
    &self.region
  }

  pub fn wait_timeout(&self) -> Duration {
    self.wait_timeout
  }

  pub fn poll_interval(&self) -> Duration {
    self.poll_interval
  }

  pub fn aws(&self) -> &A {
    &self.aws
  }

  /// Describes every stack whose name matches `pattern` and whose status is in `statuses`
  ///
  /// A failure describing a stack ends the scan; the stacks gathered so far are returned
  pub async fn list_stacks_matching(&self, pattern: &str, statuses: Vec<StackStatus>) -> Result<Vec<Stack>> {
    let re = Regex::new(pattern)?;
    let summaries = self.aws.list_stack_summaries(statuses).await?;

    let mut stacks = Vec::new();
    for summary in summaries.iter().filter(|s| re.is_match(&s.name)) {
      let name_or_id = summary.id.as_deref().unwrap_or(&summary.name);
      match self.aws.describe_stack(name_or_id).await {
        Ok(Some(stack)) => stacks.push(stack),
        Ok(None) => debug!("Stack {} disappeared while listing", summary.name),
        Err(err) => {
          debug!("Stopping stack scan after describe failure: {err:#}");
          break;
        }
      }
    }

    Ok(stacks)
  }

  /// All live stacks belonging to this cluster
  pub async fn list_stacks(&self) -> Result<Vec<Stack>> {
    self
      .list_stacks_matching(&stacks_regex_for_cluster(&self.cluster_name), all_non_deleted_stack_statuses())
      .await
  }

  /// All stacks belonging to this cluster, including those that are already deleting
  pub async fn describe_stacks(&self) -> Result<Vec<Stack>> {
    let stacks = self
      .list_stacks()
      .await
      .with_context(|| format!("describing CloudFormation stacks for {:?}", self.cluster_name))?;
    if stacks.is_empty() {
      debug!("No stacks found for cluster {}", self.cluster_name);
    }
    Ok(stacks)
  }

  /// Names of every cluster stack in the region, regardless of which cluster owns it
  pub async fn list_cluster_stack_names(&self) -> Result<Vec<String>> {
    let re = Regex::new(CLUSTER_STACK_REGEX)?;
    let summaries = self.aws.list_stack_summaries(all_non_deleted_stack_statuses()).await?;

    Ok(
      summaries
        .into_iter()
        .filter(|s| re.is_match(&s.name))
        .map(|s| s.name)
        .collect(),
    )
  }

  /// Checks a previously fetched list of cluster stack names for a stack tagged for `cluster_name`
  pub async fn has_cluster_stack_from_list(&self, stack_names: &[String], cluster_name: &str) -> Result<bool> {
    Ok(self.cluster_stack_from_list(stack_names, cluster_name).await?.is_some())
  }

  async fn cluster_stack_from_list(&self, stack_names: &[String], cluster_name: &str) -> Result<Option<Stack>> {
    let expected = make_cluster_stack_name(cluster_name);
    for name in stack_names.iter().filter(|n| **n == expected) {
      if let Some(stack) = self.aws.describe_stack(name).await? {
        if matches_cluster(cluster_name, &stack.tags) {
          return Ok(Some(stack));
        }
      }
    }
    Ok(None)
  }

  /// The cluster stack, if one tagged for this cluster exists
  pub async fn get_cluster_stack_if_exists(&self) -> Result<Option<Stack>> {
    let names = self.list_cluster_stack_names().await?;
    self.cluster_stack_from_list(&names, &self.cluster_name).await
  }

  /// The cluster stack, found by describing it directly
  pub async fn describe_cluster_stack_if_exists(&self) -> Result<Option<Stack>> {
    let name = make_cluster_stack_name(&self.cluster_name);
    let stack = self.aws.describe_stack(&name).await?;

    Ok(stack.filter(|s| s.status != StackStatus::DeleteComplete && matches_cluster(&self.cluster_name, &s.tags)))
  }

  pub async fn describe_cluster_stack(&self) -> Result<Stack> {
    match self.describe_cluster_stack_if_exists().await? {
      Some(stack) => Ok(stack),
      None => Err(
        EksctlError::StackNotFound {
          cluster: self.cluster_name.clone(),
        }
        .into(),
      ),
    }
  }

  /// Stacks tagged with a nodegroup name, typed by their nodegroup-type tag
  pub async fn list_nodegroup_stacks_with_statuses(&self) -> Result<Vec<NodeGroupStack>> {
    let stacks = self.list_stacks().await?;

    Ok(
      stacks
        .into_iter()
        .filter_map(|stack| {
          let nodegroup_name = get_nodegroup_name(&stack)?;
          let kind = NodeGroupType::from_tag(stack.tag(NODEGROUP_TYPE_TAG));
          Some(NodeGroupStack {
            nodegroup_name,
            kind,
            stack,
          })
        })
        .collect(),
    )
  }

  pub async fn get_fargate_stack(&self) -> Result<Option<Stack>> {
    let name = format!("eksctl-{}-fargate", self.cluster_name);
    let stacks = self.list_stacks().await?;
    Ok(stacks.into_iter().find(|s| s.name == name))
  }

  pub async fn get_karpenter_stack(&self) -> Result<Option<Stack>> {
    let stacks = self.list_stacks().await?;
    Ok(stacks.into_iter().find(|s| s.tag(KARPENTER_NAME_TAG).is_some()))
  }

  pub async fn describe_iam_service_account_stacks(&self) -> Result<Vec<Stack>> {
    let stacks = self.list_stacks().await?;
    Ok(
      stacks
        .into_iter()
        .filter(|s| s.status != StackStatus::DeleteComplete && get_iam_service_account_name(s).is_some())
        .collect(),
    )
  }

  pub async fn get_iam_addons_stacks(&self) -> Result<Vec<Stack>> {
    let stacks = self.list_stacks().await?;
    Ok(stacks.into_iter().filter(|s| get_iam_addon_name(s).is_some()).collect())
  }

  /// Builds a sequential tree deleting the legacy `EKS-<cluster>-*` stacks
  pub async fn delete_tasks_for_deprecated_stacks(&self) -> Result<TaskTree> {
    let pattern = format!(
      "^EKS-{}-({})$",
      regex::escape(&self.cluster_name),
      DEPRECATED_STACK_SUFFIXES.join("|")
    );
    let stacks = self.list_stacks_matching(&pattern, all_non_deleted_stack_statuses()).await?;

    let mut tree = TaskTree::sequential();
    for suffix in DEPRECATED_STACK_SUFFIXES {
      let name = format!("EKS-{}-{suffix}", self.cluster_name);
      for stack in stacks.iter().filter(|s| s.name == name) {
        tree.append(self.delete_stack_task(format!("delete {name}"), stack.clone(), true));
      }
    }

    Ok(tree)
  }

  /// Initiates deletion of a stack this cluster owns
  pub async fn delete_stack_by_spec(&self, stack: &Stack) -> Result<()> {
    if !matches_cluster(&self.cluster_name, &stack.tags) {
      bail!(
        "cannot delete stack {:?} as it doesn't bear our {:?}, {:?} tags",
        stack.name,
        format!("{}:{}", super::OLD_CLUSTER_NAME_TAG, self.cluster_name),
        format!("{}:{}", super::CLUSTER_NAME_TAG, self.cluster_name)
      );
    }

    self
      .aws
      .delete_stack(stack.name_or_id(), self.role_arn.clone())
      .await
      .with_context(|| format!("not able to delete stack {:?}", stack.name))?;
    info!("Will delete stack {:?}", stack.name);
    Ok(())
  }

  /// Deletes a stack this cluster owns and waits for the deletion to complete
  pub async fn delete_stack_by_spec_sync(&self, stack: &Stack) -> Result<()> {
    self.delete_stack_by_spec(stack).await?;
    info!("Waiting for stack {:?} to get deleted", stack.name);
    self.wait_until_stack_is_deleted(stack).await
  }

  /// Deletes a stack found by name and waits for the deletion to complete
  pub async fn delete_stack_sync(&self, name: &str) -> Result<()> {
    match self.aws.describe_stack(name).await? {
      Some(stack) => self.delete_stack_by_spec_sync(&stack).await,
      None => bail!("stack {name:?} not found"),
    }
  }

  pub async fn wait_until_stack_is_deleted(&self, stack: &Stack) -> Result<()> {
    let waiter = Waiter::fixed(
      format!("stack {:?} deletion", stack.name),
      self.wait_timeout,
      self.poll_interval,
    );
    let aws = &self.aws;
    let name_or_id = stack.name_or_id().to_string();
    let name = stack.name.clone();

    waiter
      .wait(|| {
        let name_or_id = name_or_id.clone();
        let name = name.clone();
        async move {
          match aws.describe_stack(&name_or_id).await? {
            None => Ok(true),
            Some(current) => match current.status {
              StackStatus::DeleteComplete => Ok(true),
              StackStatus::DeleteFailed => bail!("failed to delete stack {name:?}: DELETE_FAILED"),
              status => {
                debug!("Stack {name} is {}", status.as_str());
                Ok(false)
              }
            },
          }
        }
      })
      .await
  }

  /// A task deleting `stack`, optionally waiting for the deletion to complete
  pub(crate) fn delete_stack_task(&self, description: String, stack: Stack, wait: bool) -> GenericTask {
    let manager = self.clone();
    GenericTask::new(description, move || {
      let manager = manager.clone();
      let stack = stack.clone();
      async move {
        if wait {
          manager.delete_stack_by_spec_sync(&stack).await
        } else {
          manager.delete_stack_by_spec(&stack).await
        }
      }
    })
  }
}
