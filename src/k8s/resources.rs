use anyhow::Result;
use k8s_openapi::api::{
  apps::v1::DaemonSet,
  core::v1::{Node, Pod, Service, ServiceAccount},
};
use kube::{
  Client,
  api::{Api, DeleteParams, EvictParams, ListParams},
};
use thiserror::Error;
use tracing::debug;

use crate::elb::LOAD_BALANCER_TYPE_ANNOTATION;

/// Annotation set on static pods mirrored by the kubelet
pub const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";
/// Per-pod override of the drain behavior (`force`, `ignore` or `never`)
pub const DRAIN_ANNOTATION: &str = "pod.alpha.kubernetes.io/drain";

/// The parts of a node the drainer acts on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeInfo {
  pub name: String,
  pub unschedulable: bool,
}

/// The parts of a pod needed to decide whether and how it is removed from a node
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodInfo {
  pub namespace: String,
  pub name: String,
  /// Kind and name of the controlling owner reference
  pub controller: Option<(String, String)>,
  pub is_mirror: bool,
  /// Pod phase is `Succeeded` or `Failed`
  pub finished: bool,
  pub drain_annotation: Option<String>,
  /// Mounts an `emptyDir` volume that is not backed by memory
  pub has_local_storage: bool,
  pub termination_grace_period_seconds: Option<i64>,
}

impl PodInfo {
  pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      namespace: namespace.into(),
      name: name.into(),
      ..Default::default()
    }
  }

  pub fn with_controller(mut self, kind: &str, name: &str) -> Self {
    self.controller = Some((kind.to_string(), name.to_string()));
    self
  }
}

/// A Kubernetes service, reduced to what is needed to find the load balancer behind it
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceInfo {
  pub namespace: String,
  pub name: String,
  pub uid: String,
  /// `spec.type` is `LoadBalancer`
  pub is_load_balancer: bool,
  /// Value of the load balancer type annotation, `nlb` for network load balancers
  pub load_balancer_type: Option<String>,
}

/// Failure to remove a pod from a node
#[derive(Error, Debug)]
pub enum EvictError {
  /// The API server asked to retry later, or the pod is already gone
  #[error("{0}")]
  Recoverable(String),
  #[error(transparent)]
  Other(#[from] anyhow::Error),
}

impl EvictError {
  pub fn is_recoverable(&self) -> bool {
    matches!(self, Self::Recoverable(_))
  }
}

/// Classify an API error the way `kubectl drain` does: not found, gone, too many requests,
/// server timeouts and unavailability are worth retrying
fn classify(err: kube::Error) -> EvictError {
  match &err {
    kube::Error::Api(ae) if is_recoverable_status(ae.code, &ae.reason) => EvictError::Recoverable(err.to_string()),
    _ => EvictError::Other(err.into()),
  }
}

pub(crate) fn is_recoverable_status(code: u16, reason: &str) -> bool {
  match code {
    404 | 410 | 429 | 503 | 504 => true,
    500 => reason == "ServerTimeout",
    _ => false,
  }
}

pub async fn list_nodes(client: &Client, label_selector: &str) -> Result<Vec<NodeInfo>> {
  let api: Api<Node> = Api::all(client.clone());
  let node_list = api.list(&ListParams::default().labels(label_selector)).await?;

  let nodes = node_list
    .items
    .iter()
    .map(|node| NodeInfo {
      name: node.metadata.name.clone().unwrap_or_default(),
      unschedulable: node.spec.as_ref().and_then(|s| s.unschedulable).unwrap_or(false),
    })
    .collect();

  Ok(nodes)
}

pub async fn set_unschedulable(client: &Client, node_name: &str, unschedulable: bool) -> Result<()> {
  let api: Api<Node> = Api::all(client.clone());
  if unschedulable {
    api.cordon(node_name).await?;
  } else {
    api.uncordon(node_name).await?;
  }

  Ok(())
}

fn to_pod_info(pod: &Pod) -> PodInfo {
  let meta = &pod.metadata;
  let annotations = meta.annotations.as_ref();
  let controller = meta
    .owner_references
    .as_ref()
    .and_then(|refs| refs.iter().find(|r| r.controller == Some(true)))
    .map(|r| (r.kind.clone(), r.name.clone()));
  let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
  let spec = pod.spec.as_ref();
  let has_local_storage = spec.is_some_and(|s| {
    s.volumes
      .iter()
      .flatten()
      .any(|v| v.empty_dir.as_ref().is_some_and(|e| e.medium.as_deref() != Some("Memory")))
  });

  PodInfo {
    namespace: meta.namespace.clone().unwrap_or_default(),
    name: meta.name.clone().unwrap_or_default(),
    controller,
    is_mirror: annotations.is_some_and(|a| a.contains_key(MIRROR_POD_ANNOTATION)),
    finished: matches!(phase, Some("Succeeded" | "Failed")),
    drain_annotation: annotations.and_then(|a| a.get(DRAIN_ANNOTATION)).cloned(),
    has_local_storage,
    termination_grace_period_seconds: spec.and_then(|s| s.termination_grace_period_seconds),
  }
}

/// All pods scheduled on the node, across namespaces
pub async fn list_pods_on_node(client: &Client, node_name: &str) -> Result<Vec<PodInfo>> {
  let api: Api<Pod> = Api::all(client.clone());
  let params = ListParams::default().fields(&format!("spec.nodeName={node_name}"));
  let pod_list = api.list(&params).await?;

  Ok(pod_list.items.iter().map(to_pod_info).collect())
}

pub async fn evict_pod(
  client: &Client,
  namespace: &str,
  name: &str,
  grace_period_seconds: Option<u32>,
) -> Result<(), EvictError> {
  let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
  let params = EvictParams {
    delete_options: Some(DeleteParams {
      grace_period_seconds,
      ..DeleteParams::default()
    }),
    ..EvictParams::default()
  };

  api.evict(name, &params).await.map_err(classify)?;
  debug!("Evicted pod {namespace}/{name}");
  Ok(())
}

pub async fn delete_pod(
  client: &Client,
  namespace: &str,
  name: &str,
  grace_period_seconds: Option<u32>,
) -> Result<(), EvictError> {
  let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
  let params = DeleteParams {
    grace_period_seconds,
    ..DeleteParams::default()
  };
  api.delete(name, &params).await.map_err(classify)?;
  debug!("Deleted pod {namespace}/{name}");
  Ok(())
}

/// Returns `false` when the service account was already gone
pub async fn delete_service_account(client: &Client, namespace: &str, name: &str) -> Result<bool> {
  let api: Api<ServiceAccount> = Api::namespaced(client.clone(), namespace);
  match api.delete(name, &DeleteParams::default()).await {
    Ok(_) => Ok(true),
    Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
    Err(err) => Err(err.into()),
  }
}

fn to_service_info(service: &Service) -> ServiceInfo {
  let meta = &service.metadata;
  ServiceInfo {
    namespace: meta.namespace.clone().unwrap_or_default(),
    name: meta.name.clone().unwrap_or_default(),
    uid: meta.uid.clone().unwrap_or_default(),
    is_load_balancer: service
      .spec
      .as_ref()
      .and_then(|s| s.type_.as_deref())
      .is_some_and(|t| t == "LoadBalancer"),
    load_balancer_type: meta
      .annotations
      .as_ref()
      .and_then(|a| a.get(LOAD_BALANCER_TYPE_ANNOTATION))
      .cloned(),
  }
}

/// Services in every namespace
pub async fn list_services(client: &Client) -> Result<Vec<ServiceInfo>> {
  let api: Api<Service> = Api::all(client.clone());
  match api.list(&ListParams::default()).await {
    Ok(list) => Ok(list.items.iter().map(to_service_info).collect()),
    Err(kube::Error::Api(ae)) if ae.code == 403 => Err(anyhow::anyhow!(
      "{} (deleting a cluster requires permission to list Kubernetes services)",
      ae.message
    )),
    Err(err) => Err(err.into()),
  }
}

pub async fn delete_service(client: &Client, namespace: &str, name: &str) -> Result<()> {
  let api: Api<Service> = Api::namespaced(client.clone(), namespace);
  match api.delete(name, &DeleteParams::default()).await {
    Ok(_) => Ok(()),
    Err(kube::Error::Api(ae)) if ae.code == 403 => Err(anyhow::anyhow!(
      "{} (deleting a cluster requires permission to delete Kubernetes services)",
      ae.message
    )),
    Err(err) => Err(err.into()),
  }
}

pub async fn delete_daemonset(client: &Client, namespace: &str, name: &str) -> Result<()> {
  let api: Api<DaemonSet> = Api::namespaced(client.clone(), namespace);
  api.delete(name, &DeleteParams::default()).await?;
  Ok(())
}
