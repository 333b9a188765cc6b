use std::{
  collections::HashMap,
  sync::{Arc, Mutex, MutexGuard},
};

use anyhow::{Result, anyhow};

use eksctl::clients::K8sClients;
use eksctl::k8s::{EvictError, NodeInfo, PodInfo, ServiceInfo};

/// Cluster state served by the mock. Evicted and deleted pods disappear immediately.
#[derive(Debug, Default)]
pub struct K8sState {
  /// Nodes keyed by the label selector that lists them
  pub nodes: HashMap<String, Vec<NodeInfo>>,
  /// Pods keyed by node name
  pub pods: HashMap<String, Vec<PodInfo>>,
  /// Number of times eviction of a pod (by name) is refused with a recoverable error
  pub recoverable_failures: HashMap<String, u32>,
  /// Pods (by name) whose eviction always fails with an unrecoverable error
  pub unrecoverable: Vec<String>,
  pub service_accounts: Vec<String>,
  pub services: Vec<ServiceInfo>,

  pub cordoned: Vec<(String, bool)>,
  pub evicted: Vec<String>,
  pub deleted_pods: Vec<String>,
  pub deleted_service_accounts: Vec<String>,
  pub deleted_daemonsets: Vec<String>,
  pub deleted_services: Vec<String>,
  /// Grace period sent with every eviction or deletion, keyed by `namespace/name`
  pub grace_periods: Vec<(String, Option<u32>)>,
}

/// Mock Kubernetes client for testing; clones share the same state
#[derive(Clone, Default)]
pub struct MockK8sClients {
  state: Arc<Mutex<K8sState>>,
}

impl MockK8sClients {
  pub fn new(state: K8sState) -> Self {
    Self {
      state: Arc::new(Mutex::new(state)),
    }
  }

  pub fn state(&self) -> MutexGuard<'_, K8sState> {
    self.state.lock().unwrap()
  }

  fn remove_pod(&self, namespace: &str, name: &str, grace_period_seconds: Option<u32>) -> Result<(), EvictError> {
    let mut state = self.state();
    state.grace_periods.push((format!("{namespace}/{name}"), grace_period_seconds));
    if state.unrecoverable.iter().any(|p| p == name) {
      return Err(EvictError::Other(anyhow!("admission webhook denied the request")));
    }
    if let Some(remaining) = state.recoverable_failures.get_mut(name) {
      if *remaining > 0 {
        *remaining -= 1;
        return Err(EvictError::Recoverable("Too many requests".to_string()));
      }
    }
    for pods in state.pods.values_mut() {
      pods.retain(|p| !(p.namespace == namespace && p.name == name));
    }
    Ok(())
  }
}

impl K8sClients for MockK8sClients {
  async fn list_nodes(&self, label_selector: &str) -> Result<Vec<NodeInfo>> {
    Ok(self.state().nodes.get(label_selector).cloned().unwrap_or_default())
  }

  async fn set_unschedulable(&self, node_name: &str, unschedulable: bool) -> Result<()> {
    let mut state = self.state();
    for node in state.nodes.values_mut().flatten().filter(|n| n.name == node_name) {
      node.unschedulable = unschedulable;
    }
    state.cordoned.push((node_name.to_string(), unschedulable));
    Ok(())
  }

  async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<PodInfo>> {
    Ok(self.state().pods.get(node_name).cloned().unwrap_or_default())
  }

  async fn evict_pod(&self, namespace: &str, name: &str, grace_period_seconds: Option<u32>) -> Result<(), EvictError> {
    self.remove_pod(namespace, name, grace_period_seconds)?;
    self.state().evicted.push(format!("{namespace}/{name}"));
    Ok(())
  }

  async fn delete_pod(&self, namespace: &str, name: &str, grace_period_seconds: Option<u32>) -> Result<(), EvictError> {
    self.remove_pod(namespace, name, grace_period_seconds)?;
    self.state().deleted_pods.push(format!("{namespace}/{name}"));
    Ok(())
  }

  async fn delete_service_account(&self, namespace: &str, name: &str) -> Result<bool> {
    let mut state = self.state();
    let key = format!("{namespace}/{name}");
    let existed = state.service_accounts.contains(&key);
    state.service_accounts.retain(|sa| *sa != key);
    if existed {
      state.deleted_service_accounts.push(key);
    }
    Ok(existed)
  }

  async fn delete_daemonset(&self, namespace: &str, name: &str) -> Result<()> {
    self.state().deleted_daemonsets.push(format!("{namespace}/{name}"));
    Ok(())
  }

  async fn list_services(&self) -> Result<Vec<ServiceInfo>> {
    Ok(self.state().services.clone())
  }

  async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
    let mut state = self.state();
    state.services.retain(|s| !(s.namespace == namespace && s.name == name));
    state.deleted_services.push(format!("{namespace}/{name}"));
    Ok(())
  }
}
