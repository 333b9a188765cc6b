//! Nodegroup lifecycle: delete, upgrade and drain
//!
//! Nodegroups backed by a CloudFormation stack go through the stack manager; managed
//! nodegroups created by other tooling go straight through the EKS API.

use anyhow::{Context, Result, anyhow, bail};
use aws_sdk_eks::types::{AmiTypes, Nodegroup, NodegroupStatus};
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::{
  cfn::{DeleteWaitCondition, NodeGroupStack, NodeGroupType, StackCollection, stack_status_is_not_transitional},
  clients::{AwsClients, K8sClients},
  cluster::K8sFactory,
  eks::{self, resources::NodegroupVersionUpdate, version},
  k8s::{DrainOptions, NodeGroupDrainer},
  tasks::{Task, handle_errors},
};

/// Options for `upgrade nodegroup`
#[derive(Clone, Debug, Default)]
pub struct UpgradeOptions {
  pub nodegroup_name: String,
  pub kubernetes_version: Option<String>,
  /// Only valid for nodegroups created with a launch template
  pub launch_template_version: Option<String>,
  pub release_version: Option<String>,
  pub force_upgrade: bool,
  pub wait: bool,
}

/// Nodegroups to drain and how
#[derive(Clone, Debug)]
pub struct DrainInput {
  pub nodegroups: Vec<(String, NodeGroupType)>,
  pub options: DrainOptions,
  pub parallel: usize,
  pub plan: bool,
}

pub struct NodeGroupManager<A> {
  stacks: StackCollection<A>,
}

impl<A: AwsClients> NodeGroupManager<A> {
  pub fn new(stacks: StackCollection<A>) -> Self {
    Self { stacks }
  }

  fn cluster_name(&self) -> &str {
    self.stacks.cluster_name()
  }

  /// Deletes the named nodegroups in parallel: stack-backed nodegroups through their stacks,
  /// the rest through the EKS API
  pub async fn delete(&self, names: &[String], wait: bool, plan: bool) -> Result<()> {
    let stacks = self.stacks.list_nodegroup_stacks_with_statuses().await?;

    let (with_stacks, without_stacks): (Vec<&String>, Vec<&String>) = names
      .iter()
      .partition(|name| find_stack(&stacks, name).is_some());

    let mut tree = self.stacks.new_tasks_to_delete_nodegroups(
      &stacks,
      |name| with_stacks.iter().any(|n| n.as_str() == name),
      wait,
      None,
    );
    tree.plan_mode = plan;

    for name in without_stacks {
      let condition = wait.then(|| self.nodegroup_deleted_condition(name));
      tree.append(
        self
          .stacks
          .new_task_to_delete_unowned_nodegroup(self.cluster_name(), name, condition),
      );
    }

    info!("{}", tree.describe());
    let errs = tree.do_all_sync().await;
    if !errs.is_empty() {
      return Err(handle_errors(errs, "nodegroup(s)"));
    }
    Ok(())
  }

  /// Pairs each name with its nodegroup type; stack-less nodegroups must exist as managed nodegroups
  pub async fn resolve_types(&self, names: &[String]) -> Result<Vec<(String, NodeGroupType)>> {
    let stacks = self.stacks.list_nodegroup_stacks_with_statuses().await?;

    let mut nodegroups = Vec::with_capacity(names.len());
    for name in names {
      let kind = match find_stack(&stacks, name) {
        Some(stack) => stack.kind,
        None => {
          if self.stacks.aws().describe_nodegroup(self.cluster_name(), name).await?.is_none() {
            bail!("nodegroup {name:?} not found in cluster {:?}", self.cluster_name());
          }
          NodeGroupType::Managed
        }
      };
      nodegroups.push((name.clone(), kind));
    }
    Ok(nodegroups)
  }

  fn nodegroup_deleted_condition(&self, nodegroup_name: &str) -> DeleteWaitCondition {
    let aws = self.stacks.aws().clone();
    let cluster_name = self.cluster_name().to_string();
    let nodegroup_name = nodegroup_name.to_string();

    DeleteWaitCondition::new(
      move || {
        let aws = aws.clone();
        let cluster_name = cluster_name.clone();
        let nodegroup_name = nodegroup_name.clone();
        async move { Ok(aws.describe_nodegroup(&cluster_name, &nodegroup_name).await?.is_none()) }
      },
      self.stacks.wait_timeout(),
      self.stacks.poll_interval(),
    )
  }

  /// Rolls a managed nodegroup to a new Kubernetes version, AMI release or launch template version
  pub async fn upgrade(&self, options: &UpgradeOptions) -> Result<()> {
    let stacks = self.stacks.list_nodegroup_stacks_with_statuses().await?;

    if let Some(kubernetes_version) = &options.kubernetes_version {
      version::parse_minor(kubernetes_version).context("invalid Kubernetes version")?;
    }

    let nodegroup = self
      .stacks
      .aws()
      .describe_nodegroup(self.cluster_name(), &options.nodegroup_name)
      .await?
      .ok_or_else(|| {
        anyhow!(
          "upgrade is only supported for managed nodegroups; could not find one with name {:?}",
          options.nodegroup_name
        )
      })?;

    match nodegroup.status() {
      Some(NodegroupStatus::Active) => {}
      Some(NodegroupStatus::Updating) => {
        bail!("nodegroup is currently being updated, please retry the command after the existing update is complete")
      }
      status => bail!(
        "nodegroup must be in \"ACTIVE\" state when upgrading a nodegroup; got state {:?}",
        status.map(|s| s.as_str()).unwrap_or_default()
      ),
    }

    if let Some(stack) = find_stack(&stacks, &options.nodegroup_name) {
      validate_stack_upgrade(stack, options)?;
    }

    self.upgrade_using_api(options, &nodegroup).await
  }

  async fn upgrade_using_api(&self, options: &UpgradeOptions, nodegroup: &Nodegroup) -> Result<()> {
    let mut request = NodegroupVersionUpdate {
      cluster_name: self.cluster_name().to_string(),
      nodegroup_name: options.nodegroup_name.clone(),
      force: options.force_upgrade,
      ..Default::default()
    };

    if let Some(launch_template_version) = &options.launch_template_version {
      let id = nodegroup
        .launch_template()
        .and_then(|lt| lt.id())
        .context("cannot update launch template version because the nodegroup is not configured to use one")?;
      request.launch_template = Some((id.to_string(), launch_template_version.clone()));
    }

    let uses_custom_ami = nodegroup.ami_type() == Some(&AmiTypes::Custom);
    if uses_custom_ami && (options.kubernetes_version.is_some() || options.release_version.is_some()) {
      bail!("cannot specify kubernetes-version or release-version when using a custom AMI");
    }

    if !uses_custom_ami {
      request.release_version = options.release_version.clone();
      request.kubernetes_version = match &options.kubernetes_version {
        Some(v) => Some(v.clone()),
        None => {
          let current = nodegroup.version().unwrap_or_default();
          Some(
            version::major_minor(current)
              .with_context(|| format!("unexpected error parsing Kubernetes version {current:?}"))?,
          )
        }
      };
    }

    let update_id = self.stacks.aws().update_nodegroup_version(request).await?;
    info!("upgrade of nodegroup {:?} in progress", options.nodegroup_name);

    if options.wait {
      info!("waiting for upgrade of nodegroup {:?} to complete", options.nodegroup_name);
      eks::wait_for_update(
        self.stacks.aws(),
        self.cluster_name(),
        &update_id,
        Some(&options.nodegroup_name),
        self.stacks.wait_timeout(),
        self.stacks.poll_interval(),
      )
      .await?;
      info!("nodegroup successfully upgraded");
    }
    Ok(())
  }
}

fn find_stack<'a>(stacks: &'a [NodeGroupStack], nodegroup_name: &str) -> Option<&'a NodeGroupStack> {
  stacks.iter().find(|s| s.nodegroup_name == nodegroup_name)
}

/// Stack-backed nodegroups are upgraded through the EKS API once their stack has settled
fn validate_stack_upgrade(stack: &NodeGroupStack, options: &UpgradeOptions) -> Result<()> {
  if options.kubernetes_version.is_some() && options.release_version.is_some() {
    bail!("only one of kubernetes-version or release-version can be specified");
  }
  if !stack_status_is_not_transitional(&stack.stack) {
    bail!(
      "nodegroup stack {:?} is in status {:?}; retry once the stack operation has completed",
      stack.stack.name,
      stack.stack.status.as_str()
    );
  }
  debug!("Nodegroup {:?} is backed by stack {:?}", stack.nodegroup_name, stack.stack.name);
  Ok(())
}

/// Drains every nodegroup of the input concurrently, sharing one limit on nodes in flight
pub async fn drain<K: K8sClients>(k8s: &K, input: &DrainInput) -> Result<()> {
  if input.plan {
    log_drain_plan(input);
    return Ok(());
  }

  if !(1..=25).contains(&input.parallel) {
    bail!("--parallel value must be of range 1-25");
  }

  let semaphore = Semaphore::new(input.parallel);
  info!("starting parallel draining, max in-flight of {}", input.parallel);

  let results = join_all(input.nodegroups.iter().map(|(name, kind)| {
    let semaphore = &semaphore;
    async move {
      let drainer = NodeGroupDrainer::new(k8s.clone(), name, *kind, input.options.clone());
      drainer.drain(semaphore).await
    }
  }))
  .await;

  results.into_iter().collect::<Result<Vec<()>>>().map(|_| ())
}

/// Like [`drain`], but only connects to the cluster when the drain is applied
pub async fn connect_and_drain<K: K8sClients>(new_k8s: &K8sFactory<K>, input: &DrainInput) -> Result<()> {
  if input.plan {
    log_drain_plan(input);
    return Ok(());
  }
  let k8s = new_k8s().await?;
  drain(&k8s, input).await
}

fn log_drain_plan(input: &DrainInput) {
  for (name, kind) in &input.nodegroups {
    info!("(plan) would drain {kind} nodegroup {name:?}");
  }
}
