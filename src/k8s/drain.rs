use std::{
  collections::{BTreeMap, BTreeSet},
  time::Duration,
};

use anyhow::{Context, Result, bail};
use futures::future::join_all;
use tokio::{sync::Semaphore, time::sleep};
use tracing::{debug, info, warn};

use crate::{
  cfn::NodeGroupType,
  clients::K8sClients,
  k8s::resources::{EvictError, NodeInfo, PodInfo},
};

/// Pause after a node fails to drain before the error is reported
const RETRY_DELAY: Duration = Duration::from_secs(5);

const NODEGROUP_NAME_LABEL: &str = "alpha.eksctl.io/nodegroup-name";
const MANAGED_NODEGROUP_LABEL: &str = "eks.amazonaws.com/nodegroup";

const DAEMONSET_WARNING: &str = "ignoring DaemonSet-managed Pods";
const LOCAL_STORAGE_WARNING: &str = "deleting Pods with local storage";
const UNMANAGED_WARNING: &str =
  "deleting Pods not managed by ReplicationController, ReplicaSet, Job, DaemonSet or StatefulSet";

#[derive(Clone, Debug)]
pub struct DrainOptions {
  /// Upper bound on the grace period given to evicted pods
  pub max_grace_period: Duration,
  /// Pause after each drained node
  pub node_drain_wait_period: Duration,
  /// Pause before retrying pods whose eviction was refused
  pub pod_eviction_wait_period: Duration,
  /// Uncordon the nodes instead of draining them
  pub undo: bool,
  /// Delete pods directly instead of using the eviction API
  pub disable_eviction: bool,
  pub timeout: Duration,
}

impl Default for DrainOptions {
  fn default() -> Self {
    Self {
      max_grace_period: Duration::from_secs(10 * 60),
      node_drain_wait_period: Duration::ZERO,
      pod_eviction_wait_period: Duration::from_secs(10),
      undo: false,
      disable_eviction: false,
      timeout: Duration::from_secs(25 * 60),
    }
  }
}

/// What to do with a single pod found on a node being drained
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PodDeleteStatus {
  Okay,
  Skip,
  Warning { delete: bool, message: String },
  Error(String),
}

impl PodDeleteStatus {
  pub fn delete(&self) -> bool {
    match self {
      PodDeleteStatus::Okay => true,
      PodDeleteStatus::Warning { delete, .. } => *delete,
      PodDeleteStatus::Skip | PodDeleteStatus::Error(_) => false,
    }
  }

  fn warning(delete: bool, message: impl Into<String>) -> Self {
    PodDeleteStatus::Warning {
      delete,
      message: message.into(),
    }
  }
}

fn annotation_filter(pod: &PodInfo) -> PodDeleteStatus {
  let Some(value) = pod.drain_annotation.as_deref() else {
    return PodDeleteStatus::Okay;
  };

  let annotation = format!("due to annotation {}={value}", crate::k8s::resources::DRAIN_ANNOTATION);
  match value {
    "force" => PodDeleteStatus::warning(true, format!("forced {annotation}")),
    "ignore" => PodDeleteStatus::warning(false, format!("ignored {annotation}")),
    "never" => PodDeleteStatus::Error(format!("cannot be drained {annotation}")),
    _ => PodDeleteStatus::Okay,
  }
}

/// DaemonSet pods would be recreated on the node straight away, so they are never removed
fn daemonset_filter(pod: &PodInfo) -> PodDeleteStatus {
  let Some((kind, name)) = pod.controller.as_ref() else {
    return PodDeleteStatus::Okay;
  };
  if kind != "DaemonSet" || pod.finished {
    return PodDeleteStatus::Okay;
  }
  debug!("Pod {}/{} is managed by DaemonSet {name}", pod.namespace, pod.name);
  PodDeleteStatus::warning(false, DAEMONSET_WARNING)
}

fn mirror_pod_filter(pod: &PodInfo) -> PodDeleteStatus {
  if pod.is_mirror {
    PodDeleteStatus::Skip
  } else {
    PodDeleteStatus::Okay
  }
}

fn local_storage_filter(pod: &PodInfo) -> PodDeleteStatus {
  if !pod.has_local_storage || pod.finished {
    return PodDeleteStatus::Okay;
  }
  PodDeleteStatus::warning(true, LOCAL_STORAGE_WARNING)
}

fn unreplicated_filter(pod: &PodInfo) -> PodDeleteStatus {
  if pod.finished || pod.controller.is_some() {
    return PodDeleteStatus::Okay;
  }
  PodDeleteStatus::warning(true, UNMANAGED_WARNING)
}

/// Runs the pod through each filter in turn, stopping at the first one that keeps it on the node
pub fn pod_delete_status(pod: &PodInfo) -> PodDeleteStatus {
  let filters: [fn(&PodInfo) -> PodDeleteStatus; 5] = [
    annotation_filter,
    daemonset_filter,
    mirror_pod_filter,
    local_storage_filter,
    unreplicated_filter,
  ];

  let mut status = PodDeleteStatus::Okay;
  for filter in filters {
    status = filter(pod);
    if !status.delete() {
      break;
    }
  }
  status
}

/// Pods found on a node, each with its verdict
struct PodDeleteList {
  items: Vec<(PodInfo, PodDeleteStatus)>,
}

impl PodDeleteList {
  fn new(pods: Vec<PodInfo>) -> Self {
    let items = pods
      .into_iter()
      .map(|pod| {
        let status = pod_delete_status(&pod);
        (pod, status)
      })
      .collect();
    Self { items }
  }

  fn pods(&self) -> Vec<&PodInfo> {
    self.items.iter().filter(|(_, s)| s.delete()).map(|(p, _)| p).collect()
  }

  fn grouped(&self, select: impl Fn(&PodDeleteStatus) -> Option<&str>) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (pod, status) in &self.items {
      if let Some(message) = select(status) {
        grouped
          .entry(message.to_string())
          .or_default()
          .push(format!("{}/{}", pod.namespace, pod.name));
      }
    }
    grouped
  }

  fn warnings(&self) -> String {
    self
      .grouped(|s| match s {
        PodDeleteStatus::Warning { message, .. } => Some(message.as_str()),
        _ => None,
      })
      .iter()
      .map(|(message, pods)| format!("{message}: {}", pods.join(", ")))
      .collect::<Vec<_>>()
      .join("; ")
  }

  fn errors(&self) -> Vec<String> {
    self
      .grouped(|s| match s {
        PodDeleteStatus::Error(message) => Some(message.as_str()),
        _ => None,
      })
      .iter()
      .map(|(message, pods)| format!("cannot delete {message}: {}", pods.join(", ")))
      .collect()
  }
}

/// Drains every node of a single nodegroup
pub struct NodeGroupDrainer<K> {
  k8s: K,
  nodegroup: String,
  label_selector: String,
  options: DrainOptions,
}

impl<K: K8sClients> NodeGroupDrainer<K> {
  pub fn new(k8s: K, nodegroup: &str, kind: NodeGroupType, options: DrainOptions) -> Self {
    let label = match kind {
      NodeGroupType::Managed => MANAGED_NODEGROUP_LABEL,
      NodeGroupType::Unmanaged => NODEGROUP_NAME_LABEL,
    };

    Self {
      k8s,
      nodegroup: nodegroup.to_string(),
      label_selector: format!("{label}={nodegroup}"),
      options,
    }
  }

  pub fn label_selector(&self) -> &str {
    &self.label_selector
  }

  /// Cordons the nodegroup's nodes and evicts their pods, with at most as many nodes in flight
  /// as the semaphore has permits
  ///
  /// Nodes are listed again after each round so that nodes added by a scale-up are drained too
  pub async fn drain(&self, semaphore: &Semaphore) -> Result<()> {
    let nodes = self.k8s.list_nodes(&self.label_selector).await?;
    if nodes.is_empty() {
      warn!(
        "no nodes found in nodegroup {:?} (label selector: {:?})",
        self.nodegroup, self.label_selector
      );
      return Ok(());
    }

    if self.options.undo {
      self.toggle_cordon(false, &nodes).await;
      return Ok(());
    }

    match tokio::time::timeout(self.options.timeout, self.drain_all(semaphore)).await {
      Ok(result) => result,
      Err(_) => bail!("timed out waiting for nodegroup {:?} to be drained", self.nodegroup),
    }
  }

  async fn drain_all(&self, semaphore: &Semaphore) -> Result<()> {
    let mut drained = BTreeSet::new();

    loop {
      let nodes = self.k8s.list_nodes(&self.label_selector).await?;
      self.toggle_cordon(true, &nodes).await;

      let pending: Vec<String> = nodes
        .into_iter()
        .map(|node| node.name)
        .filter(|name| !drained.contains(name))
        .collect();

      if pending.is_empty() {
        info!("drained all nodes: {:?}", drained);
        return Ok(());
      }

      debug!("already drained: {:?}", drained);
      debug!("will drain: {:?}", pending);
      drained.extend(pending.iter().cloned());

      let results = join_all(pending.iter().map(|node| self.drain_node(semaphore, node))).await;
      if let Some(err) = results.into_iter().find_map(Result::err) {
        return Err(err);
      }
    }
  }

  async fn drain_node(&self, semaphore: &Semaphore, node: &str) -> Result<()> {
    let _permit = semaphore.acquire().await.context("failed to acquire semaphore")?;

    debug!("starting drain of node {node}");
    if let Err(err) = self.evict_pods(node).await {
      warn!("pod eviction error ({:?}) on node {node}", format!("{err:#}"));
      sleep(RETRY_DELAY).await;
      return Err(err);
    }

    if !self.options.node_drain_wait_period.is_zero() {
      debug!(
        "waiting for {} seconds before draining next node",
        self.options.node_drain_wait_period.as_secs()
      );
      sleep(self.options.node_drain_wait_period).await;
    }
    Ok(())
  }

  /// Keeps removing pods from the node until none that should go are left
  async fn evict_pods(&self, node: &str) -> Result<()> {
    loop {
      let list = PodDeleteList::new(self.k8s.list_pods_on_node(node).await?);
      let errors = list.errors();
      if !errors.is_empty() {
        bail!("{}", errors.join("; "));
      }

      let pods = list.pods();
      if pods.is_empty() {
        return Ok(());
      }

      let warnings = list.warnings();
      if !warnings.is_empty() {
        warn!("{warnings}");
      }
      debug!("{} pods to be evicted from {node}", pods.len());

      let mut failed_evictions = false;
      for pod in pods {
        match self.evict_or_delete(pod).await {
          Ok(()) => {}
          Err(err) if err.is_recoverable() => {
            debug!("recoverable pod eviction failure: {err}");
            failed_evictions = true;
          }
          Err(err) => {
            return Err(anyhow::Error::new(err))
              .with_context(|| format!("unrecoverable error evicting pod: {}/{}", pod.namespace, pod.name));
          }
        }
      }

      if failed_evictions {
        sleep(self.options.pod_eviction_wait_period).await;
      }
    }
  }

  async fn evict_or_delete(&self, pod: &PodInfo) -> Result<(), EvictError> {
    let grace_period = grace_period_seconds(pod, self.options.max_grace_period);
    if self.options.disable_eviction {
      return self.k8s.delete_pod(&pod.namespace, &pod.name, grace_period).await;
    }
    self.k8s.evict_pod(&pod.namespace, &pod.name, grace_period).await
  }

  async fn toggle_cordon(&self, cordon: bool, nodes: &[NodeInfo]) {
    let action = if cordon { "cordon" } else { "uncordon" };

    for node in nodes {
      if node.unschedulable == cordon {
        debug!("no need to {action} node {:?}", node.name);
        continue;
      }

      if let Err(err) = self.k8s.set_unschedulable(&node.name, cordon).await {
        warn!("failed to {action} node {:?}: {err:#}", node.name);
        continue;
      }
      info!("{action} node {:?}", node.name);
    }
  }
}

/// Pods keep their own grace period unless it exceeds the maximum
fn grace_period_seconds(pod: &PodInfo, max_grace_period: Duration) -> Option<u32> {
  let max = u32::try_from(max_grace_period.as_secs()).unwrap_or(u32::MAX);
  if max == 0 {
    return None;
  }
  match pod.termination_grace_period_seconds {
    Some(seconds) if seconds > i64::from(max) => Some(max),
    _ => None,
  }
}
