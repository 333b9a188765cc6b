//! Removal of the AWS load balancers that Kubernetes created for `LoadBalancer` services.
//!
//! Left in place they keep security groups and network interfaces alive in the VPC, and the
//! stack owning the VPC then fails to delete.

pub mod resources;

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

pub use resources::SecurityGroup;

use crate::{clients::AwsClients, clients::K8sClients, k8s::ServiceInfo, waiter::Waiter};

/// Tag key prefix the Kubernetes cloud provider puts on the resources it creates for a cluster
pub const CLUSTER_TAG_PREFIX: &str = "kubernetes.io/cluster/";
/// Service annotation selecting a network load balancer instead of a classic one
pub const LOAD_BALANCER_TYPE_ANNOTATION: &str = "service.beta.kubernetes.io/aws-load-balancer-type";

const ORPHAN_SECURITY_GROUP_PREFIX: &str = "k8s-elb-";
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadBalancerKind {
  Classic,
  Network,
}

/// A load balancer backing a service, with the security groups that go away along with it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadBalancer {
  pub name: String,
  pub kind: LoadBalancerKind,
  pub owned_security_groups: Vec<String>,
}

/// Name the AWS cloud provider gives the load balancer of a service: `a` followed by the
/// service UID without dashes, truncated to 32 characters
pub fn default_load_balancer_name(service_uid: &str) -> String {
  let mut name: String = format!("a{service_uid}").chars().filter(|c| *c != '-').collect();
  name.truncate(32);
  name
}

pub fn load_balancer_kind(service: &ServiceInfo) -> LoadBalancerKind {
  match service.load_balancer_type.as_deref() {
    Some("nlb") => LoadBalancerKind::Network,
    _ => LoadBalancerKind::Classic,
  }
}

/// Deletes every `LoadBalancer` service, waits for the cloud provider to remove the load
/// balancers behind them and then deletes the security groups it left orphaned
pub async fn cleanup<A: AwsClients, K: K8sClients>(aws: &A, k8s: &K, cluster_name: &str) -> Result<()> {
  let services = k8s.list_services().await.context("cannot list Kubernetes Services")?;

  let mut load_balancers = Vec::new();
  for service in services.iter().filter(|s| s.is_load_balancer) {
    let name = default_load_balancer_name(&service.uid);
    let lb = service_load_balancer(aws, cluster_name, service).await.with_context(|| {
      format!(
        "cannot obtain information for ELB {name} from LoadBalancer service {}/{}",
        service.namespace, service.name
      )
    })?;
    debug!(
      "tracking deletion of load balancer {} of kind {:?} with security groups {:?}",
      lb.name, lb.kind, lb.owned_security_groups
    );
    load_balancers.push(lb);

    debug!("deleting 'type: LoadBalancer' service {}/{}", service.namespace, service.name);
    k8s
      .delete_service(&service.namespace, &service.name)
      .await
      .with_context(|| format!("cannot delete Kubernetes Service {}/{}", service.namespace, service.name))?;
  }

  if !load_balancers.is_empty() {
    info!("waiting for {} load balancer(s) to be deleted", load_balancers.len());
    let waiter = Waiter::fixed("load balancers to be deleted", CLEANUP_TIMEOUT, POLL_INTERVAL);
    waiter
      .wait(|| async {
        let mut remaining = 0;
        for lb in &load_balancers {
          match load_balancer_exists(aws, lb).await {
            Ok(true) => remaining += 1,
            Ok(false) => debug!("load balancer {} and its security groups were deleted", lb.name),
            Err(err) => warn!("error when checking existence of load balancer {}: {err:#}", lb.name),
          }
        }
        Ok(remaining == 0)
      })
      .await?;
  }

  debug!("deleting load balancer security group orphans");
  delete_orphan_security_groups(aws, cluster_name)
    .await
    .context("cannot delete orphan ELB Security Groups")
}

async fn service_load_balancer<A: AwsClients>(aws: &A, cluster_name: &str, service: &ServiceInfo) -> Result<LoadBalancer> {
  let name = default_load_balancer_name(&service.uid);
  let kind = load_balancer_kind(service);

  // Network load balancers use the security groups of the instances
  let owned_security_groups = match kind {
    LoadBalancerKind::Network => Vec::new(),
    LoadBalancerKind::Classic => match aws.describe_classic_load_balancer(&name).await? {
      None => Vec::new(),
      Some(ids) => {
        let cluster_tag = format!("{CLUSTER_TAG_PREFIX}{cluster_name}");
        aws
          .describe_security_groups(ids)
          .await?
          .into_iter()
          .filter(|sg| !sg.id.is_empty() && sg.tag_keys.contains(&cluster_tag))
          .map(|sg| sg.id)
          .collect()
      }
    },
  };

  Ok(LoadBalancer {
    name,
    kind,
    owned_security_groups,
  })
}

/// A load balancer counts as deleted once its security groups are gone too
async fn load_balancer_exists<A: AwsClients>(aws: &A, lb: &LoadBalancer) -> Result<bool> {
  let exists = match lb.kind {
    LoadBalancerKind::Network => aws.network_load_balancer_exists(&lb.name).await?,
    LoadBalancerKind::Classic => aws.describe_classic_load_balancer(&lb.name).await?.is_some(),
  };
  if exists {
    return Ok(true);
  }

  let remaining = aws.describe_security_groups(lb.owned_security_groups.clone()).await?;
  Ok(!remaining.is_empty())
}

async fn delete_orphan_security_groups<A: AwsClients>(aws: &A, cluster_name: &str) -> Result<()> {
  let groups = aws
    .list_tagged_security_groups(&format!("{CLUSTER_TAG_PREFIX}{cluster_name}"))
    .await?;

  for sg in groups.iter().filter(|sg| sg.name.starts_with(ORPHAN_SECURITY_GROUP_PREFIX)) {
    debug!("deleting orphan load balancer security group {} ({})", sg.id, sg.name);
    aws.delete_security_group(&sg.id).await?;
  }
  Ok(())
}
