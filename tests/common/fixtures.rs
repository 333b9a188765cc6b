use std::{collections::HashMap, sync::Arc, time::Duration};

use aws_sdk_eks::types::{AmiTypes, Cluster, ClusterStatus, Identity, Nodegroup, NodegroupStatus, Oidc};
use futures::FutureExt;

use eksctl::cfn::{
  CLUSTER_NAME_TAG, EKSCTL_VERSION_TAG, IAM_SERVICE_ACCOUNT_NAME_TAG, KARPENTER_NAME_TAG, NODEGROUP_NAME_TAG,
  NODEGROUP_TYPE_TAG, Stack, StackCollection, StackStatus,
};
use eksctl::cluster::K8sFactory;
use eksctl::elb::{CLUSTER_TAG_PREFIX, SecurityGroup};
use eksctl::k8s::{NodeInfo, PodInfo, ServiceInfo};

use super::mock_aws::{AwsState, MockAwsClients};
use super::mock_k8s::{K8sState, MockK8sClients};

pub const REGION: &str = "us-west-2";
pub const ISSUER: &str = "https://oidc.eks.us-west-2.amazonaws.com/id/EXAMPLED539D4633E53DE1B71EXAMPLE";
pub const OIDC_PROVIDER_ARN: &str =
  "arn:aws:iam::111122223333:oidc-provider/oidc.eks.us-west-2.amazonaws.com/id/EXAMPLED539D4633E53DE1B71EXAMPLE";

pub fn cluster(name: &str, status: ClusterStatus, version: &str) -> Cluster {
  Cluster::builder()
    .name(name)
    .status(status)
    .version(version)
    .identity(Identity::builder().oidc(Oidc::builder().issuer(ISSUER).build()).build())
    .build()
}

pub fn cluster_stack(cluster_name: &str) -> Stack {
  Stack::new(format!("eksctl-{cluster_name}-cluster"), StackStatus::CreateComplete)
    .with_id(&format!("arn:aws:cloudformation:us-west-2:111122223333:stack/eksctl-{cluster_name}-cluster/1"))
    .with_tag(CLUSTER_NAME_TAG, cluster_name)
    .with_tag(EKSCTL_VERSION_TAG, "0.190.0")
}

pub fn nodegroup_stack(cluster_name: &str, nodegroup_name: &str, kind: &str) -> Stack {
  Stack::new(
    format!("eksctl-{cluster_name}-nodegroup-{nodegroup_name}"),
    StackStatus::CreateComplete,
  )
  .with_tag(CLUSTER_NAME_TAG, cluster_name)
  .with_tag(NODEGROUP_NAME_TAG, nodegroup_name)
  .with_tag(NODEGROUP_TYPE_TAG, kind)
}

/// Stack of the IAM role for `namespace/name`
pub fn iam_service_account_stack(cluster_name: &str, namespace: &str, name: &str) -> Stack {
  Stack::new(
    format!("eksctl-{cluster_name}-addon-iamserviceaccount-{namespace}-{name}"),
    StackStatus::CreateComplete,
  )
  .with_tag(CLUSTER_NAME_TAG, cluster_name)
  .with_tag(IAM_SERVICE_ACCOUNT_NAME_TAG, &format!("{namespace}/{name}"))
}

pub fn karpenter_stack(cluster_name: &str) -> Stack {
  Stack::new(format!("eksctl-{cluster_name}-karpenter"), StackStatus::CreateComplete)
    .with_tag(CLUSTER_NAME_TAG, cluster_name)
    .with_tag(KARPENTER_NAME_TAG, cluster_name)
}

pub fn load_balancer_service(namespace: &str, name: &str, uid: &str, load_balancer_type: Option<&str>) -> ServiceInfo {
  ServiceInfo {
    namespace: namespace.into(),
    name: name.into(),
    uid: uid.into(),
    is_load_balancer: true,
    load_balancer_type: load_balancer_type.map(str::to_string),
  }
}

/// A security group tagged by the Kubernetes cloud provider as belonging to the cluster
pub fn cluster_security_group(cluster_name: &str, id: &str, name: &str) -> SecurityGroup {
  SecurityGroup {
    id: id.into(),
    name: name.into(),
    tag_keys: vec![format!("{CLUSTER_TAG_PREFIX}{cluster_name}")],
  }
}

pub fn managed_nodegroup(cluster_name: &str, nodegroup_name: &str, status: NodegroupStatus) -> Nodegroup {
  Nodegroup::builder()
    .cluster_name(cluster_name)
    .nodegroup_name(nodegroup_name)
    .status(status)
    .version("1.29")
    .ami_type(AmiTypes::Al2X8664)
    .build()
}

/// Stack collection with short waits so paused-clock tests advance quickly
pub fn stacks(aws: &MockAwsClients, cluster_name: &str) -> StackCollection<MockAwsClients> {
  StackCollection::new(aws.clone(), cluster_name, REGION)
    .with_wait_timeout(Duration::from_secs(300))
    .with_poll_interval(Duration::from_secs(5))
}

pub fn k8s_factory(k8s: &MockK8sClients) -> K8sFactory<MockK8sClients> {
  let k8s = k8s.clone();
  Arc::new(move || {
    let k8s = k8s.clone();
    async move { Ok(k8s) }.boxed()
  })
}

/// An active 1.29 cluster created by eksctl, with an unmanaged nodegroup `ng-1` and an OIDC provider
pub fn owned_cluster_aws(cluster_name: &str) -> MockAwsClients {
  MockAwsClients::new(AwsState {
    clusters: vec![cluster(cluster_name, ClusterStatus::Active, "1.29")],
    stacks: vec![
      cluster_stack(cluster_name),
      nodegroup_stack(cluster_name, "ng-1", "unmanaged"),
    ],
    oidc_providers: vec![OIDC_PROVIDER_ARN.to_string()],
    addons: vec!["vpc-cni".to_string()],
    ..Default::default()
  })
}

/// An active 1.29 cluster created by other tooling, with a managed nodegroup `ng-a`
pub fn unowned_cluster_aws(cluster_name: &str) -> MockAwsClients {
  MockAwsClients::new(AwsState {
    clusters: vec![cluster(cluster_name, ClusterStatus::Active, "1.29")],
    nodegroups: vec![managed_nodegroup(cluster_name, "ng-a", NodegroupStatus::Active)],
    oidc_providers: vec![OIDC_PROVIDER_ARN.to_string()],
    ..Default::default()
  })
}

pub fn replicated_pod(name: &str) -> PodInfo {
  PodInfo::new("default", name).with_controller("ReplicaSet", "web-5d4b9c")
}

pub fn daemonset_pod(name: &str) -> PodInfo {
  PodInfo::new("kube-system", name).with_controller("DaemonSet", "aws-node")
}

/// Two nodes behind `selector`, each running one replicated pod and an aws-node pod
pub fn nodegroup_k8s(selector: &str) -> MockK8sClients {
  let nodes = vec![
    NodeInfo {
      name: "node-1".into(),
      unschedulable: false,
    },
    NodeInfo {
      name: "node-2".into(),
      unschedulable: false,
    },
  ];

  let pods = HashMap::from([
    (
      "node-1".to_string(),
      vec![replicated_pod("web-1"), daemonset_pod("aws-node-1")],
    ),
    (
      "node-2".to_string(),
      vec![replicated_pod("web-2"), daemonset_pod("aws-node-2")],
    ),
  ]);

  MockK8sClients::new(K8sState {
    nodes: HashMap::from([(selector.to_string(), nodes)]),
    pods,
    ..Default::default()
  })
}
