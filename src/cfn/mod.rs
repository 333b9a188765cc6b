mod delete_tasks;
mod manager;
pub mod resources;

use std::collections::HashMap;

pub use aws_sdk_cloudformation::types::StackStatus;
use serde::{Deserialize, Serialize};

pub use delete_tasks::{Cleanup, DeleteWaitCondition};
pub use manager::StackCollection;

pub const CLUSTER_NAME_TAG: &str = "alpha.eksctl.io/cluster-name";
pub const OLD_CLUSTER_NAME_TAG: &str = "eksctl.cluster.k8s.io/v1alpha1/cluster-name";
pub const EKSCTL_VERSION_TAG: &str = "alpha.eksctl.io/eksctl-version";
pub const CLUSTER_OIDC_ENABLED_TAG: &str = "alpha.eksctl.io/cluster-oidc-enabled";
pub const NODEGROUP_NAME_TAG: &str = "alpha.eksctl.io/nodegroup-name";
pub const NODEGROUP_TYPE_TAG: &str = "alpha.eksctl.io/nodegroup-type";
pub const OLD_NODEGROUP_NAME_TAG: &str = "eksctl.io/v1alpha2/nodegroup-name";
pub const IAM_SERVICE_ACCOUNT_NAME_TAG: &str = "alpha.eksctl.io/iamserviceaccount-name";
pub const ADDON_NAME_TAG: &str = "alpha.eksctl.io/addon-name";
pub const KARPENTER_NAME_TAG: &str = "alpha.eksctl.io/karpenter-name";

/// Every stack this tool creates for a cluster matches this pattern
const OUR_STACK_REGEX_FMT: &str = "^(eksctl|EKS)-{}-((cluster|nodegroup-.+|addon-.+|fargate|karpenter)|(VPC|ServiceRole|ControlPlane|DefaultNodeGroup))$";
pub(crate) const CLUSTER_STACK_REGEX: &str = "eksctl-.*-cluster";

/// A CloudFormation stack, reduced to the fields used to track ownership
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stack {
  pub name: String,
  pub id: Option<String>,
  #[serde(with = "status_serde")]
  pub status: StackStatus,
  pub tags: HashMap<String, String>,
  pub outputs: HashMap<String, String>,
}

impl Stack {
  pub fn new(name: impl Into<String>, status: StackStatus) -> Self {
    Self {
      name: name.into(),
      id: None,
      status,
      tags: HashMap::new(),
      outputs: HashMap::new(),
    }
  }

  pub fn with_tag(mut self, key: &str, value: &str) -> Self {
    self.tags.insert(key.to_string(), value.to_string());
    self
  }

  pub fn with_output(mut self, key: &str, value: &str) -> Self {
    self.outputs.insert(key.to_string(), value.to_string());
    self
  }

  pub fn with_id(mut self, id: &str) -> Self {
    self.id = Some(id.to_string());
    self
  }

  pub fn tag(&self, key: &str) -> Option<&str> {
    self.tags.get(key).map(String::as_str)
  }

  /// Prefer the stack ID when present since names are reused after deletion
  pub fn name_or_id(&self) -> &str {
    self.id.as_deref().filter(|id| !id.is_empty()).unwrap_or(&self.name)
  }
}

mod status_serde {
  use aws_sdk_cloudformation::types::StackStatus;
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(status: &StackStatus, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(status.as_str())
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<StackStatus, D::Error> {
    let s = String::deserialize(deserializer)?;
    Ok(StackStatus::from(s.as_str()))
  }
}

/// Minimal view of a stack as returned by the list operation
#[derive(Clone, Debug, PartialEq)]
pub struct StackSummary {
  pub name: String,
  pub id: Option<String>,
  pub status: StackStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeGroupType {
  Managed,
  Unmanaged,
}

impl NodeGroupType {
  pub fn from_tag(value: Option<&str>) -> Self {
    match value {
      Some("managed") => NodeGroupType::Managed,
      _ => NodeGroupType::Unmanaged,
    }
  }
}

impl std::fmt::Display for NodeGroupType {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    match *self {
      NodeGroupType::Managed => write!(f, "managed"),
      NodeGroupType::Unmanaged => write!(f, "unmanaged"),
    }
  }
}

/// A nodegroup backed by a CloudFormation stack
#[derive(Clone, Debug, PartialEq)]
pub struct NodeGroupStack {
  pub nodegroup_name: String,
  pub kind: NodeGroupType,
  pub stack: Stack,
}

pub fn make_cluster_stack_name(cluster_name: &str) -> String {
  format!("eksctl-{cluster_name}-cluster")
}

pub(crate) fn stacks_regex_for_cluster(cluster_name: &str) -> String {
  OUR_STACK_REGEX_FMT.replace("{}", &regex::escape(cluster_name))
}

/// Returns true if the tags identify the stack as belonging to the given cluster
pub fn matches_cluster(cluster_name: &str, tags: &HashMap<String, String>) -> bool {
  [CLUSTER_NAME_TAG, OLD_CLUSTER_NAME_TAG]
    .iter()
    .any(|key| tags.get(*key).is_some_and(|v| v == cluster_name))
}

/// Name of the nodegroup a stack was created for, if it is a nodegroup stack
pub fn get_nodegroup_name(stack: &Stack) -> Option<String> {
  stack
    .tag(NODEGROUP_NAME_TAG)
    .or_else(|| stack.tag(OLD_NODEGROUP_NAME_TAG))
    .map(str::to_string)
}

pub fn get_iam_service_account_name(stack: &Stack) -> Option<String> {
  stack.tag(IAM_SERVICE_ACCOUNT_NAME_TAG).map(str::to_string)
}

pub fn get_iam_addon_name(stack: &Stack) -> Option<String> {
  stack.tag(ADDON_NAME_TAG).map(str::to_string)
}

pub fn non_transitional_ready_stack_statuses() -> Vec<StackStatus> {
  vec![
    StackStatus::CreateComplete,
    StackStatus::UpdateComplete,
    StackStatus::RollbackComplete,
    StackStatus::UpdateRollbackComplete,
  ]
}

pub fn non_ready_stack_statuses() -> Vec<StackStatus> {
  vec![
    StackStatus::CreateInProgress,
    StackStatus::CreateFailed,
    StackStatus::RollbackInProgress,
    StackStatus::RollbackFailed,
    StackStatus::DeleteInProgress,
    StackStatus::DeleteFailed,
    StackStatus::UpdateInProgress,
    StackStatus::UpdateCompleteCleanupInProgress,
    StackStatus::UpdateRollbackInProgress,
    StackStatus::UpdateRollbackFailed,
    StackStatus::UpdateRollbackCompleteCleanupInProgress,
    StackStatus::ReviewInProgress,
  ]
}

/// Every status except DELETE_COMPLETE
pub fn all_non_deleted_stack_statuses() -> Vec<StackStatus> {
  vec![
    StackStatus::CreateInProgress,
    StackStatus::CreateFailed,
    StackStatus::CreateComplete,
    StackStatus::RollbackInProgress,
    StackStatus::RollbackFailed,
    StackStatus::RollbackComplete,
    StackStatus::DeleteInProgress,
    StackStatus::DeleteFailed,
    StackStatus::UpdateInProgress,
    StackStatus::UpdateCompleteCleanupInProgress,
    StackStatus::UpdateComplete,
    StackStatus::UpdateRollbackInProgress,
    StackStatus::UpdateRollbackFailed,
    StackStatus::UpdateRollbackCompleteCleanupInProgress,
    StackStatus::UpdateRollbackComplete,
    StackStatus::ReviewInProgress,
  ]
}

pub fn stack_status_is_not_transitional(stack: &Stack) -> bool {
  non_transitional_ready_stack_statuses().contains(&stack.status)
}

pub fn stack_status_is_not_ready(stack: &Stack) -> bool {
  non_ready_stack_statuses().contains(&stack.status)
}

#[cfg(test)]
mod tests {
  use regex::Regex;

  use super::*;

  #[test]
  fn cluster_stack_name() {
    assert_eq!(make_cluster_stack_name("dev"), "eksctl-dev-cluster");
  }

  #[test]
  fn cluster_regex_matches_our_stacks_only() {
    let re = Regex::new(&stacks_regex_for_cluster("dev")).unwrap();
    for name in [
      "eksctl-dev-cluster",
      "eksctl-dev-nodegroup-ng-1",
      "eksctl-dev-addon-vpc-cni",
      "eksctl-dev-addon-iamserviceaccount-kube-system-aws-node",
      "eksctl-dev-fargate",
      "eksctl-dev-karpenter",
      "EKS-dev-VPC",
      "EKS-dev-DefaultNodeGroup",
    ] {
      assert!(re.is_match(name), "{name} should match");
    }

    for name in ["eksctl-dev2-cluster", "eksctl-dev-something", "other-dev-cluster", "eksctl-prod-cluster"] {
      assert!(!re.is_match(name), "{name} should not match");
    }
  }

  #[test]
  fn cluster_regex_escapes_name() {
    let re = Regex::new(&stacks_regex_for_cluster("a.b")).unwrap();
    assert!(re.is_match("eksctl-a.b-cluster"));
    assert!(!re.is_match("eksctl-axb-cluster"));
  }

  #[test]
  fn matches_cluster_by_either_tag() {
    let current = Stack::new("s", StackStatus::CreateComplete).with_tag(CLUSTER_NAME_TAG, "dev");
    let legacy = Stack::new("s", StackStatus::CreateComplete).with_tag(OLD_CLUSTER_NAME_TAG, "dev");
    let other = Stack::new("s", StackStatus::CreateComplete).with_tag(CLUSTER_NAME_TAG, "prod");
    let untagged = Stack::new("s", StackStatus::CreateComplete);

    assert!(matches_cluster("dev", &current.tags));
    assert!(matches_cluster("dev", &legacy.tags));
    assert!(!matches_cluster("dev", &other.tags));
    assert!(!matches_cluster("dev", &untagged.tags));
  }

  #[test]
  fn nodegroup_name_prefers_current_tag() {
    let stack = Stack::new("s", StackStatus::CreateComplete)
      .with_tag(NODEGROUP_NAME_TAG, "ng-1")
      .with_tag(OLD_NODEGROUP_NAME_TAG, "old");
    assert_eq!(get_nodegroup_name(&stack).as_deref(), Some("ng-1"));

    let legacy = Stack::new("s", StackStatus::CreateComplete).with_tag(OLD_NODEGROUP_NAME_TAG, "old");
    assert_eq!(get_nodegroup_name(&legacy).as_deref(), Some("old"));
  }

  #[test]
  fn nodegroup_type_defaults_to_unmanaged() {
    assert_eq!(NodeGroupType::from_tag(Some("managed")), NodeGroupType::Managed);
    assert_eq!(NodeGroupType::from_tag(Some("unmanaged")), NodeGroupType::Unmanaged);
    assert_eq!(NodeGroupType::from_tag(None), NodeGroupType::Unmanaged);
  }

  #[test]
  fn status_classes() {
    let ready = Stack::new("s", StackStatus::UpdateRollbackComplete);
    assert!(stack_status_is_not_transitional(&ready));
    assert!(!stack_status_is_not_ready(&ready));

    let busy = Stack::new("s", StackStatus::UpdateInProgress);
    assert!(!stack_status_is_not_transitional(&busy));
    assert!(stack_status_is_not_ready(&busy));

    assert!(!all_non_deleted_stack_statuses().contains(&StackStatus::DeleteComplete));
    assert_eq!(all_non_deleted_stack_statuses().len(), 16);
  }

  #[test]
  fn name_or_id_prefers_id() {
    let stack = Stack::new("eksctl-dev-cluster", StackStatus::CreateComplete);
    assert_eq!(stack.name_or_id(), "eksctl-dev-cluster");
    let stack = stack.with_id("arn:aws:cloudformation:us-west-2:1:stack/eksctl-dev-cluster/abc");
    assert!(stack.name_or_id().starts_with("arn:"));
  }
}
