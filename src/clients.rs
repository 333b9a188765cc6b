use anyhow::Result;
use aws_sdk_cloudformation::types::StackStatus;
use aws_sdk_eks::types::{Cluster, Nodegroup, Update};

use crate::{
  cfn::{self, Stack, StackSummary},
  eks::resources::{self as eks_resources, KeyPair, NodegroupVersionUpdate},
  elb::resources::{self as elb_resources, SecurityGroup},
  k8s::resources::{self as k8s_resources, EvictError, NodeInfo, PodInfo, ServiceInfo},
};

/// Trait abstracting all AWS API operations used by eksctl
///
/// Implementations are cloned into tasks that run concurrently, hence the bounds
pub trait AwsClients: Clone + Send + Sync + 'static {
  // CloudFormation
  fn list_stack_summaries(
    &self,
    statuses: Vec<StackStatus>,
  ) -> impl std::future::Future<Output = Result<Vec<StackSummary>>> + Send;
  fn describe_stack(&self, name_or_id: &str) -> impl std::future::Future<Output = Result<Option<Stack>>> + Send;
  fn delete_stack(
    &self,
    name_or_id: &str,
    role_arn: Option<String>,
  ) -> impl std::future::Future<Output = Result<()>> + Send;

  // EKS
  fn describe_cluster(&self, name: &str) -> impl std::future::Future<Output = Result<Option<Cluster>>> + Send;
  fn list_clusters(&self, chunk_size: i32) -> impl std::future::Future<Output = Result<Vec<String>>> + Send;
  fn delete_cluster(&self, name: &str) -> impl std::future::Future<Output = Result<()>> + Send;
  fn update_cluster_version(
    &self,
    name: &str,
    version: &str,
  ) -> impl std::future::Future<Output = Result<String>> + Send;
  fn describe_update(
    &self,
    cluster_name: &str,
    update_id: &str,
    nodegroup_name: Option<String>,
  ) -> impl std::future::Future<Output = Result<Update>> + Send;
  fn list_nodegroups(&self, cluster_name: &str) -> impl std::future::Future<Output = Result<Vec<String>>> + Send;
  fn describe_nodegroup(
    &self,
    cluster_name: &str,
    nodegroup_name: &str,
  ) -> impl std::future::Future<Output = Result<Option<Nodegroup>>> + Send;
  fn delete_nodegroup(
    &self,
    cluster_name: &str,
    nodegroup_name: &str,
  ) -> impl std::future::Future<Output = Result<()>> + Send;
  fn update_nodegroup_version(
    &self,
    request: NodegroupVersionUpdate,
  ) -> impl std::future::Future<Output = Result<String>> + Send;
  fn list_fargate_profiles(&self, cluster_name: &str) -> impl std::future::Future<Output = Result<Vec<String>>> + Send;
  fn delete_fargate_profile(
    &self,
    cluster_name: &str,
    profile_name: &str,
  ) -> impl std::future::Future<Output = Result<()>> + Send;
  /// Returns false when the addon does not exist
  fn delete_addon(&self, cluster_name: &str, addon_name: &str) -> impl std::future::Future<Output = Result<bool>> + Send;

  // EC2
  fn list_key_pairs(&self, name_prefix: &str) -> impl std::future::Future<Output = Result<Vec<KeyPair>>> + Send;
  fn delete_key_pair(&self, name: &str) -> impl std::future::Future<Output = Result<()>> + Send;
  /// Detached network interfaces in the VPC
  fn list_available_network_interfaces(
    &self,
    vpc_id: &str,
  ) -> impl std::future::Future<Output = Result<Vec<String>>> + Send;
  fn delete_network_interface(&self, id: &str) -> impl std::future::Future<Output = Result<()>> + Send;
  /// An empty list of IDs describes nothing
  fn describe_security_groups(
    &self,
    ids: Vec<String>,
  ) -> impl std::future::Future<Output = Result<Vec<SecurityGroup>>> + Send;
  fn list_tagged_security_groups(
    &self,
    tag_key: &str,
  ) -> impl std::future::Future<Output = Result<Vec<SecurityGroup>>> + Send;
  fn delete_security_group(&self, id: &str) -> impl std::future::Future<Output = Result<()>> + Send;

  // ELB
  /// Security groups of the classic load balancer, `None` when it does not exist
  fn describe_classic_load_balancer(
    &self,
    name: &str,
  ) -> impl std::future::Future<Output = Result<Option<Vec<String>>>> + Send;
  fn network_load_balancer_exists(&self, name: &str) -> impl std::future::Future<Output = Result<bool>> + Send;

  // IAM
  fn list_oidc_providers(&self) -> impl std::future::Future<Output = Result<Vec<String>>> + Send;
  fn delete_oidc_provider(&self, arn: &str) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Trait abstracting all Kubernetes API operations used by eksctl
pub trait K8sClients: Clone + Send + Sync + 'static {
  fn list_nodes(&self, label_selector: &str) -> impl std::future::Future<Output = Result<Vec<NodeInfo>>> + Send;
  fn set_unschedulable(&self, node_name: &str, unschedulable: bool) -> impl std::future::Future<Output = Result<()>> + Send;
  fn list_pods_on_node(&self, node_name: &str) -> impl std::future::Future<Output = Result<Vec<PodInfo>>> + Send;
  fn evict_pod(
    &self,
    namespace: &str,
    name: &str,
    grace_period_seconds: Option<u32>,
  ) -> impl std::future::Future<Output = Result<(), EvictError>> + Send;
  fn delete_pod(
    &self,
    namespace: &str,
    name: &str,
    grace_period_seconds: Option<u32>,
  ) -> impl std::future::Future<Output = Result<(), EvictError>> + Send;
  /// Deletes the service account if present; returns false when it did not exist
  fn delete_service_account(&self, namespace: &str, name: &str) -> impl std::future::Future<Output = Result<bool>> + Send;
  fn delete_daemonset(&self, namespace: &str, name: &str) -> impl std::future::Future<Output = Result<()>> + Send;
  fn list_services(&self) -> impl std::future::Future<Output = Result<Vec<ServiceInfo>>> + Send;
  fn delete_service(&self, namespace: &str, name: &str) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Real AWS client implementation wrapping the SDK clients
#[derive(Clone)]
pub struct RealAwsClients {
  cfn: aws_sdk_cloudformation::Client,
  eks: aws_sdk_eks::Client,
  ec2: aws_sdk_ec2::Client,
  iam: aws_sdk_iam::Client,
  elb: aws_sdk_elasticloadbalancing::Client,
  elbv2: aws_sdk_elasticloadbalancingv2::Client,
}

impl RealAwsClients {
  pub fn new(config: &aws_config::SdkConfig) -> Self {
    Self {
      cfn: aws_sdk_cloudformation::Client::new(config),
      eks: aws_sdk_eks::Client::new(config),
      ec2: aws_sdk_ec2::Client::new(config),
      iam: aws_sdk_iam::Client::new(config),
      elb: aws_sdk_elasticloadbalancing::Client::new(config),
      elbv2: aws_sdk_elasticloadbalancingv2::Client::new(config),
    }
  }
}

impl AwsClients for RealAwsClients {
  async fn list_stack_summaries(&self, statuses: Vec<StackStatus>) -> Result<Vec<StackSummary>> {
    cfn::resources::list_stack_summaries(&self.cfn, statuses).await
  }

  async fn describe_stack(&self, name_or_id: &str) -> Result<Option<Stack>> {
    cfn::resources::describe_stack(&self.cfn, name_or_id).await
  }

  async fn delete_stack(&self, name_or_id: &str, role_arn: Option<String>) -> Result<()> {
    cfn::resources::delete_stack(&self.cfn, name_or_id, role_arn).await
  }

  async fn describe_cluster(&self, name: &str) -> Result<Option<Cluster>> {
    eks_resources::describe_cluster(&self.eks, name).await
  }

  async fn list_clusters(&self, chunk_size: i32) -> Result<Vec<String>> {
    eks_resources::list_clusters(&self.eks, chunk_size).await
  }

  async fn delete_cluster(&self, name: &str) -> Result<()> {
    eks_resources::delete_cluster(&self.eks, name).await
  }

  async fn update_cluster_version(&self, name: &str, version: &str) -> Result<String> {
    eks_resources::update_cluster_version(&self.eks, name, version).await
  }

  async fn describe_update(&self, cluster_name: &str, update_id: &str, nodegroup_name: Option<String>) -> Result<Update> {
    eks_resources::describe_update(&self.eks, cluster_name, update_id, nodegroup_name).await
  }

  async fn list_nodegroups(&self, cluster_name: &str) -> Result<Vec<String>> {
    eks_resources::list_nodegroups(&self.eks, cluster_name).await
  }

  async fn describe_nodegroup(&self, cluster_name: &str, nodegroup_name: &str) -> Result<Option<Nodegroup>> {
    eks_resources::describe_nodegroup(&self.eks, cluster_name, nodegroup_name).await
  }

  async fn delete_nodegroup(&self, cluster_name: &str, nodegroup_name: &str) -> Result<()> {
    eks_resources::delete_nodegroup(&self.eks, cluster_name, nodegroup_name).await
  }

  async fn update_nodegroup_version(&self, request: NodegroupVersionUpdate) -> Result<String> {
    eks_resources::update_nodegroup_version(&self.eks, request).await
  }

  async fn list_fargate_profiles(&self, cluster_name: &str) -> Result<Vec<String>> {
    eks_resources::list_fargate_profiles(&self.eks, cluster_name).await
  }

  async fn delete_fargate_profile(&self, cluster_name: &str, profile_name: &str) -> Result<()> {
    eks_resources::delete_fargate_profile(&self.eks, cluster_name, profile_name).await
  }

  async fn delete_addon(&self, cluster_name: &str, addon_name: &str) -> Result<bool> {
    eks_resources::delete_addon(&self.eks, cluster_name, addon_name).await
  }

  async fn list_key_pairs(&self, name_prefix: &str) -> Result<Vec<KeyPair>> {
    eks_resources::list_key_pairs(&self.ec2, name_prefix).await
  }

  async fn delete_key_pair(&self, name: &str) -> Result<()> {
    eks_resources::delete_key_pair(&self.ec2, name).await
  }

  async fn list_available_network_interfaces(&self, vpc_id: &str) -> Result<Vec<String>> {
    eks_resources::list_available_network_interfaces(&self.ec2, vpc_id).await
  }

  async fn delete_network_interface(&self, id: &str) -> Result<()> {
    eks_resources::delete_network_interface(&self.ec2, id).await
  }

  async fn describe_security_groups(&self, ids: Vec<String>) -> Result<Vec<SecurityGroup>> {
    elb_resources::describe_security_groups(&self.ec2, ids).await
  }

  async fn list_tagged_security_groups(&self, tag_key: &str) -> Result<Vec<SecurityGroup>> {
    elb_resources::list_tagged_security_groups(&self.ec2, tag_key).await
  }

  async fn delete_security_group(&self, id: &str) -> Result<()> {
    elb_resources::delete_security_group(&self.ec2, id).await
  }

  async fn describe_classic_load_balancer(&self, name: &str) -> Result<Option<Vec<String>>> {
    elb_resources::describe_classic_load_balancer(&self.elb, name).await
  }

  async fn network_load_balancer_exists(&self, name: &str) -> Result<bool> {
    elb_resources::network_load_balancer_exists(&self.elbv2, name).await
  }

  async fn list_oidc_providers(&self) -> Result<Vec<String>> {
    eks_resources::list_oidc_providers(&self.iam).await
  }

  async fn delete_oidc_provider(&self, arn: &str) -> Result<()> {
    eks_resources::delete_oidc_provider(&self.iam, arn).await
  }
}

/// Real Kubernetes client implementation wrapping kube-rs
#[derive(Clone)]
pub struct RealK8sClients {
  client: kube::Client,
}

impl RealK8sClients {
  pub async fn new(cluster_name: &str) -> Result<Self> {
    match kube::Client::try_default().await {
      Ok(client) => Ok(Self { client }),
      Err(e) => {
        anyhow::bail!(
          "Unable to connect to cluster: {e}\n\n\
          Ensure kubeconfig file is present and updated to connect to the cluster.\n\
          Try: aws eks update-kubeconfig --name {cluster_name}"
        );
      }
    }
  }
}

impl K8sClients for RealK8sClients {
  async fn list_nodes(&self, label_selector: &str) -> Result<Vec<NodeInfo>> {
    k8s_resources::list_nodes(&self.client, label_selector).await
  }

  async fn set_unschedulable(&self, node_name: &str, unschedulable: bool) -> Result<()> {
    k8s_resources::set_unschedulable(&self.client, node_name, unschedulable).await
  }

  async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<PodInfo>> {
    k8s_resources::list_pods_on_node(&self.client, node_name).await
  }

  async fn evict_pod(&self, namespace: &str, name: &str, grace_period_seconds: Option<u32>) -> Result<(), EvictError> {
    k8s_resources::evict_pod(&self.client, namespace, name, grace_period_seconds).await
  }

  async fn delete_pod(&self, namespace: &str, name: &str, grace_period_seconds: Option<u32>) -> Result<(), EvictError> {
    k8s_resources::delete_pod(&self.client, namespace, name, grace_period_seconds).await
  }

  async fn delete_service_account(&self, namespace: &str, name: &str) -> Result<bool> {
    k8s_resources::delete_service_account(&self.client, namespace, name).await
  }

  async fn delete_daemonset(&self, namespace: &str, name: &str) -> Result<()> {
    k8s_resources::delete_daemonset(&self.client, namespace, name).await
  }

  async fn list_services(&self) -> Result<Vec<ServiceInfo>> {
    k8s_resources::list_services(&self.client).await
  }

  async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
    k8s_resources::delete_service(&self.client, namespace, name).await
  }
}
