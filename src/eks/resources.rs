use anyhow::{Context, Result};
use aws_sdk_ec2::{Client as Ec2Client, types::Filter};
use aws_sdk_eks::{
  Client as EksClient,
  types::{Cluster, LaunchTemplateSpecification, Nodegroup, Update},
};
use aws_sdk_iam::Client as IamClient;
use tracing::debug;

use crate::error::classify_aws_error;

/// Describe the cluster to get its full details; a cluster that does not exist is `None`
pub async fn describe_cluster(client: &EksClient, name: &str) -> Result<Option<Cluster>> {
  match client.describe_cluster().name(name).send().await {
    Ok(response) => Ok(response.cluster),
    Err(err) if err.as_service_error().is_some_and(|e| e.is_resource_not_found_exception()) => Ok(None),
    Err(err) => Err(err).with_context(|| format!("error describing cluster {name:?}")),
  }
}

/// Names of every cluster in the region, fetched `chunk_size` at a time
pub async fn list_clusters(client: &EksClient, chunk_size: i32) -> Result<Vec<String>> {
  let mut clusters = Vec::new();
  let mut next_token = None;

  loop {
    let response = client
      .list_clusters()
      .max_results(chunk_size)
      .set_next_token(next_token)
      .send()
      .await?;

    clusters.extend(response.clusters().iter().cloned());

    next_token = response.next_token;
    if next_token.is_none() {
      break;
    }
  }

  Ok(clusters)
}

pub async fn delete_cluster(client: &EksClient, name: &str) -> Result<()> {
  let response = client.delete_cluster().name(name).send().await?;
  debug!("Delete cluster response: {:?}", response.cluster);
  Ok(())
}

/// Starts a control plane version update, returning the update ID
pub async fn update_cluster_version(client: &EksClient, name: &str, version: &str) -> Result<String> {
  let response = client
    .update_cluster_version()
    .name(name)
    .version(version)
    .send()
    .await
    .with_context(|| format!("failed to update cluster {name:?} to version {version}"))?;

  response
    .update()
    .and_then(|u| u.id())
    .map(str::to_string)
    .context("update response did not include an update ID")
}

pub async fn describe_update(
  client: &EksClient,
  cluster_name: &str,
  update_id: &str,
  nodegroup_name: Option<String>,
) -> Result<Update> {
  client
    .describe_update()
    .name(cluster_name)
    .update_id(update_id)
    .set_nodegroup_name(nodegroup_name)
    .send()
    .await?
    .update
    .with_context(|| format!("update {update_id} not found"))
}

pub async fn list_nodegroups(client: &EksClient, cluster_name: &str) -> Result<Vec<String>> {
  let mut nodegroups = Vec::new();
  let mut next_token = None;

  loop {
    let response = client
      .list_nodegroups()
      .cluster_name(cluster_name)
      .set_next_token(next_token)
      .send()
      .await?;

    nodegroups.extend(response.nodegroups().iter().cloned());

    next_token = response.next_token;
    if next_token.is_none() {
      break;
    }
  }

  Ok(nodegroups)
}

pub async fn describe_nodegroup(client: &EksClient, cluster_name: &str, nodegroup_name: &str) -> Result<Option<Nodegroup>> {
  let request = client
    .describe_nodegroup()
    .cluster_name(cluster_name)
    .nodegroup_name(nodegroup_name);

  match request.send().await {
    Ok(response) => Ok(response.nodegroup),
    Err(err) if err.as_service_error().is_some_and(|e| e.is_resource_not_found_exception()) => Ok(None),
    Err(err) => Err(err).with_context(|| format!("error describing nodegroup {nodegroup_name:?}")),
  }
}

pub async fn delete_nodegroup(client: &EksClient, cluster_name: &str, nodegroup_name: &str) -> Result<()> {
  let response = client
    .delete_nodegroup()
    .cluster_name(cluster_name)
    .nodegroup_name(nodegroup_name)
    .send()
    .await?;

  debug!("Delete nodegroup {nodegroup_name:?} output: {:?}", response.nodegroup);
  Ok(())
}

/// Parameters of an UpdateNodegroupVersion call
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodegroupVersionUpdate {
  pub cluster_name: String,
  pub nodegroup_name: String,
  pub kubernetes_version: Option<String>,
  pub release_version: Option<String>,
  /// ID and version of the launch template to roll to
  pub launch_template: Option<(String, String)>,
  pub force: bool,
}

/// Starts a nodegroup version update, returning the update ID
pub async fn update_nodegroup_version(client: &EksClient, request: NodegroupVersionUpdate) -> Result<String> {
  let launch_template = request.launch_template.map(|(id, version)| {
    LaunchTemplateSpecification::builder()
      .id(id)
      .version(version)
      .build()
  });

  let response = client
    .update_nodegroup_version()
    .cluster_name(&request.cluster_name)
    .nodegroup_name(&request.nodegroup_name)
    .set_version(request.kubernetes_version)
    .set_release_version(request.release_version)
    .set_launch_template(launch_template)
    .force(request.force)
    .send()
    .await
    .with_context(|| format!("failed to upgrade nodegroup {:?}", request.nodegroup_name))?;

  debug!("Upgrade response for {:?}: {:?}", request.nodegroup_name, response.update);

  response
    .update()
    .and_then(|u| u.id())
    .map(str::to_string)
    .context("update response did not include an update ID")
}

pub async fn list_fargate_profiles(client: &EksClient, cluster_name: &str) -> Result<Vec<String>> {
  let mut profiles = Vec::new();
  let mut next_token = None;

  loop {
    let response = client
      .list_fargate_profiles()
      .cluster_name(cluster_name)
      .set_next_token(next_token)
      .send()
      .await
      .map_err(classify_aws_error)?;

    profiles.extend(response.fargate_profile_names().iter().cloned());

    next_token = response.next_token;
    if next_token.is_none() {
      break;
    }
  }

  Ok(profiles)
}

pub async fn delete_fargate_profile(client: &EksClient, cluster_name: &str, profile_name: &str) -> Result<()> {
  client
    .delete_fargate_profile()
    .cluster_name(cluster_name)
    .fargate_profile_name(profile_name)
    .send()
    .await
    .map_err(classify_aws_error)?;

  Ok(())
}

pub async fn delete_addon(client: &EksClient, cluster_name: &str, addon_name: &str) -> Result<bool> {
  let request = client.delete_addon().cluster_name(cluster_name).addon_name(addon_name);

  match request.send().await {
    Ok(_) => Ok(true),
    Err(err) if err.as_service_error().is_some_and(|e| e.is_resource_not_found_exception()) => Ok(false),
    Err(err) => Err(err).with_context(|| format!("failed to delete addon {addon_name:?}")),
  }
}

/// An EC2 key pair, with the fingerprint used to confirm eksctl created it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPair {
  pub name: String,
  pub fingerprint: String,
}

pub async fn list_key_pairs(client: &Ec2Client, name_prefix: &str) -> Result<Vec<KeyPair>> {
  let response = client
    .describe_key_pairs()
    .filters(Filter::builder().name("key-name").values(format!("{name_prefix}*")).build())
    .send()
    .await?;

  Ok(
    response
      .key_pairs()
      .iter()
      .filter_map(|kp| {
        Some(KeyPair {
          name: kp.key_name()?.to_string(),
          fingerprint: kp.key_fingerprint().unwrap_or_default().to_string(),
        })
      })
      .collect(),
  )
}

pub async fn delete_key_pair(client: &Ec2Client, name: &str) -> Result<()> {
  client.delete_key_pair().key_name(name).send().await?;
  Ok(())
}

/// Network interfaces in the VPC that are no longer attached to anything
pub async fn list_available_network_interfaces(client: &Ec2Client, vpc_id: &str) -> Result<Vec<String>> {
  let mut interfaces = Vec::new();
  let mut next_token = None;

  loop {
    let response = client
      .describe_network_interfaces()
      .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
      .filters(Filter::builder().name("status").values("available").build())
      .set_next_token(next_token)
      .send()
      .await
      .map_err(classify_aws_error)
      .with_context(|| format!("cannot describe network interfaces of VPC {vpc_id}"))?;

    interfaces.extend(
      response
        .network_interfaces()
        .iter()
        .filter_map(|eni| eni.network_interface_id().map(str::to_string)),
    );

    next_token = response.next_token;
    if next_token.is_none() {
      break;
    }
  }

  Ok(interfaces)
}

pub async fn delete_network_interface(client: &Ec2Client, id: &str) -> Result<()> {
  client
    .delete_network_interface()
    .network_interface_id(id)
    .send()
    .await
    .map_err(classify_aws_error)
    .with_context(|| format!("cannot delete network interface {id}"))?;

  Ok(())
}

/// ARNs of every IAM OIDC provider in the account
pub async fn list_oidc_providers(client: &IamClient) -> Result<Vec<String>> {
  let response = client
    .list_open_id_connect_providers()
    .send()
    .await
    .map_err(classify_aws_error)?;

  Ok(
    response
      .open_id_connect_provider_list()
      .iter()
      .filter_map(|p| p.arn().map(str::to_string))
      .collect(),
  )
}

pub async fn delete_oidc_provider(client: &IamClient, arn: &str) -> Result<()> {
  client
    .delete_open_id_connect_provider()
    .open_id_connect_provider_arn(arn)
    .send()
    .await
    .map_err(classify_aws_error)
    .with_context(|| format!("deleting IAM OIDC provider {arn}"))?;

  Ok(())
}
