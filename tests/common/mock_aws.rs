use std::{
  collections::HashMap,
  sync::{Arc, Mutex, MutexGuard},
};

use anyhow::{Result, bail};
use aws_sdk_eks::types::{Cluster, Nodegroup, Update, UpdateStatus};

use eksctl::cfn::{Stack, StackStatus, StackSummary};
use eksctl::clients::AwsClients;
use eksctl::eks::resources::{KeyPair, NodegroupVersionUpdate};
use eksctl::elb::SecurityGroup;
use eksctl::error::EksctlError;

/// A load balancer that disappears, along with its security groups, once it has been described
/// `describes_left` more times
#[derive(Debug, Default, Clone)]
pub struct MockLoadBalancer {
  pub security_groups: Vec<String>,
  pub describes_left: u32,
}

/// Account state served by the mock. Deletions take effect immediately, so waits on
/// deletion complete on the first poll, except for stacks listed in `stuck_stacks`.
#[derive(Debug, Default)]
pub struct AwsState {
  pub stacks: Vec<Stack>,
  pub clusters: Vec<Cluster>,
  pub nodegroups: Vec<Nodegroup>,
  pub fargate_profiles: Vec<String>,
  pub addons: Vec<String>,
  pub key_pairs: Vec<KeyPair>,
  pub oidc_providers: Vec<String>,
  /// Status every update reports; `Successful` when unset
  pub update_status: Option<UpdateStatus>,
  /// Load balancers by name, classic and network alike
  pub load_balancers: HashMap<String, MockLoadBalancer>,
  pub security_groups: Vec<SecurityGroup>,
  /// Detached network interfaces as (VPC ID, interface ID)
  pub network_interfaces: Vec<(String, String)>,

  pub fail_list_stacks: bool,
  pub fail_list_clusters: bool,
  /// Stack names whose describe call fails
  pub fail_describe_stack: Vec<String>,
  /// Stack names that go to DELETE_FAILED instead of disappearing when deleted
  pub stuck_stacks: Vec<String>,
  pub deny_oidc_listing: bool,
  pub deny_fargate_listing: bool,

  pub deleted_stacks: Vec<String>,
  pub deleted_clusters: Vec<String>,
  pub deleted_nodegroups: Vec<String>,
  pub deleted_fargate_profiles: Vec<String>,
  pub deleted_addons: Vec<String>,
  pub deleted_key_pairs: Vec<String>,
  pub deleted_oidc_providers: Vec<String>,
  pub deleted_security_groups: Vec<String>,
  pub deleted_network_interfaces: Vec<String>,
  pub cluster_version_updates: Vec<(String, String)>,
  pub nodegroup_updates: Vec<NodegroupVersionUpdate>,
}

/// Mock AWS client for testing. Clones share the same state so that the calls made by
/// tasks running on their own clone can be inspected afterwards.
#[derive(Clone, Default)]
pub struct MockAwsClients {
  state: Arc<Mutex<AwsState>>,
}

impl MockAwsClients {
  pub fn new(state: AwsState) -> Self {
    Self {
      state: Arc::new(Mutex::new(state)),
    }
  }

  pub fn state(&self) -> MutexGuard<'_, AwsState> {
    self.state.lock().unwrap()
  }

  fn describe_load_balancer(&self, name: &str) -> Option<Vec<String>> {
    let mut state = self.state();
    let lb = state.load_balancers.get_mut(name)?;
    if lb.describes_left > 0 {
      lb.describes_left -= 1;
      return Some(lb.security_groups.clone());
    }

    let lb = state.load_balancers.remove(name)?;
    state.security_groups.retain(|sg| !lb.security_groups.contains(&sg.id));
    None
  }
}

impl AwsClients for MockAwsClients {
  async fn list_stack_summaries(&self, statuses: Vec<StackStatus>) -> Result<Vec<StackSummary>> {
    let state = self.state();
    if state.fail_list_stacks {
      bail!("ListStacks: throttled");
    }
    Ok(
      state
        .stacks
        .iter()
        .filter(|s| statuses.is_empty() || statuses.contains(&s.status))
        .map(|s| StackSummary {
          name: s.name.clone(),
          id: s.id.clone(),
          status: s.status.clone(),
        })
        .collect(),
    )
  }

  async fn describe_stack(&self, name_or_id: &str) -> Result<Option<Stack>> {
    let state = self.state();
    let stack = state
      .stacks
      .iter()
      .find(|s| s.name == name_or_id || s.id.as_deref() == Some(name_or_id));

    if let Some(stack) = stack {
      if state.fail_describe_stack.contains(&stack.name) {
        bail!("DescribeStacks: access denied for {}", stack.name);
      }
    }
    Ok(stack.cloned())
  }

  async fn delete_stack(&self, name_or_id: &str, _role_arn: Option<String>) -> Result<()> {
    let mut state = self.state();
    if let Some(pos) = state
      .stacks
      .iter()
      .position(|s| s.name == name_or_id || s.id.as_deref() == Some(name_or_id))
    {
      let name = state.stacks[pos].name.clone();
      if state.stuck_stacks.contains(&name) {
        state.stacks[pos].status = StackStatus::DeleteFailed;
      } else {
        state.stacks.remove(pos);
      }
      state.deleted_stacks.push(name);
    }
    Ok(())
  }

  async fn describe_cluster(&self, name: &str) -> Result<Option<Cluster>> {
    Ok(self.state().clusters.iter().find(|c| c.name() == Some(name)).cloned())
  }

  async fn list_clusters(&self, _chunk_size: i32) -> Result<Vec<String>> {
    let state = self.state();
    if state.fail_list_clusters {
      bail!("ListClusters: throttled");
    }
    Ok(state.clusters.iter().filter_map(|c| c.name().map(str::to_string)).collect())
  }

  async fn delete_cluster(&self, name: &str) -> Result<()> {
    let mut state = self.state();
    state.clusters.retain(|c| c.name() != Some(name));
    state.deleted_clusters.push(name.to_string());
    Ok(())
  }

  async fn update_cluster_version(&self, name: &str, version: &str) -> Result<String> {
    self
      .state()
      .cluster_version_updates
      .push((name.to_string(), version.to_string()));
    Ok("cluster-update-1".to_string())
  }

  async fn describe_update(&self, _cluster_name: &str, update_id: &str, _nodegroup_name: Option<String>) -> Result<Update> {
    let status = self.state().update_status.clone().unwrap_or(UpdateStatus::Successful);
    Ok(Update::builder().id(update_id).status(status).build())
  }

  async fn list_nodegroups(&self, cluster_name: &str) -> Result<Vec<String>> {
    Ok(
      self
        .state()
        .nodegroups
        .iter()
        .filter(|ng| ng.cluster_name() == Some(cluster_name))
        .filter_map(|ng| ng.nodegroup_name().map(str::to_string))
        .collect(),
    )
  }

  async fn describe_nodegroup(&self, cluster_name: &str, nodegroup_name: &str) -> Result<Option<Nodegroup>> {
    Ok(
      self
        .state()
        .nodegroups
        .iter()
        .find(|ng| ng.cluster_name() == Some(cluster_name) && ng.nodegroup_name() == Some(nodegroup_name))
        .cloned(),
    )
  }

  async fn delete_nodegroup(&self, cluster_name: &str, nodegroup_name: &str) -> Result<()> {
    let mut state = self.state();
    state
      .nodegroups
      .retain(|ng| !(ng.cluster_name() == Some(cluster_name) && ng.nodegroup_name() == Some(nodegroup_name)));
    state.deleted_nodegroups.push(nodegroup_name.to_string());
    Ok(())
  }

  async fn update_nodegroup_version(&self, request: NodegroupVersionUpdate) -> Result<String> {
    self.state().nodegroup_updates.push(request);
    Ok("nodegroup-update-1".to_string())
  }

  async fn list_fargate_profiles(&self, _cluster_name: &str) -> Result<Vec<String>> {
    let state = self.state();
    if state.deny_fargate_listing {
      return Err(EksctlError::AccessDenied("Account is not authorized to use this service".into()).into());
    }
    Ok(state.fargate_profiles.clone())
  }

  async fn delete_fargate_profile(&self, _cluster_name: &str, profile_name: &str) -> Result<()> {
    let mut state = self.state();
    state.fargate_profiles.retain(|p| p != profile_name);
    state.deleted_fargate_profiles.push(profile_name.to_string());
    Ok(())
  }

  async fn delete_addon(&self, _cluster_name: &str, addon_name: &str) -> Result<bool> {
    let mut state = self.state();
    state.deleted_addons.push(addon_name.to_string());
    let before = state.addons.len();
    state.addons.retain(|a| a != addon_name);
    Ok(state.addons.len() != before)
  }

  async fn list_key_pairs(&self, name_prefix: &str) -> Result<Vec<KeyPair>> {
    Ok(
      self
        .state()
        .key_pairs
        .iter()
        .filter(|k| k.name.starts_with(name_prefix))
        .cloned()
        .collect(),
    )
  }

  async fn delete_key_pair(&self, name: &str) -> Result<()> {
    let mut state = self.state();
    state.key_pairs.retain(|k| k.name != name);
    state.deleted_key_pairs.push(name.to_string());
    Ok(())
  }

  async fn list_available_network_interfaces(&self, vpc_id: &str) -> Result<Vec<String>> {
    Ok(
      self
        .state()
        .network_interfaces
        .iter()
        .filter(|(vpc, _)| vpc == vpc_id)
        .map(|(_, id)| id.clone())
        .collect(),
    )
  }

  async fn delete_network_interface(&self, id: &str) -> Result<()> {
    let mut state = self.state();
    state.network_interfaces.retain(|(_, eni)| eni != id);
    state.deleted_network_interfaces.push(id.to_string());
    Ok(())
  }

  async fn describe_security_groups(&self, ids: Vec<String>) -> Result<Vec<SecurityGroup>> {
    Ok(
      self
        .state()
        .security_groups
        .iter()
        .filter(|sg| ids.contains(&sg.id))
        .cloned()
        .collect(),
    )
  }

  async fn list_tagged_security_groups(&self, tag_key: &str) -> Result<Vec<SecurityGroup>> {
    Ok(
      self
        .state()
        .security_groups
        .iter()
        .filter(|sg| sg.tag_keys.iter().any(|k| k == tag_key))
        .cloned()
        .collect(),
    )
  }

  async fn delete_security_group(&self, id: &str) -> Result<()> {
    let mut state = self.state();
    state.security_groups.retain(|sg| sg.id != id);
    state.deleted_security_groups.push(id.to_string());
    Ok(())
  }

  async fn describe_classic_load_balancer(&self, name: &str) -> Result<Option<Vec<String>>> {
    Ok(self.describe_load_balancer(name))
  }

  async fn network_load_balancer_exists(&self, name: &str) -> Result<bool> {
    Ok(self.describe_load_balancer(name).is_some())
  }

  async fn list_oidc_providers(&self) -> Result<Vec<String>> {
    let state = self.state();
    if state.deny_oidc_listing {
      return Err(EksctlError::AccessDenied("not authorized to perform iam:ListOpenIDConnectProviders".into()).into());
    }
    Ok(state.oidc_providers.clone())
  }

  async fn delete_oidc_provider(&self, arn: &str) -> Result<()> {
    let mut state = self.state();
    state.oidc_providers.retain(|p| p != arn);
    state.deleted_oidc_providers.push(arn.to_string());
    Ok(())
  }
}
