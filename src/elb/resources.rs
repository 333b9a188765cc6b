use anyhow::{Context, Result};
use aws_sdk_ec2::{Client as Ec2Client, types::Filter};
use aws_sdk_elasticloadbalancing::Client as ElbClient;
use aws_sdk_elasticloadbalancingv2::Client as ElbV2Client;
use tracing::{debug, warn};

use crate::error::classify_aws_error;

/// An EC2 security group with the keys of its tags
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SecurityGroup {
  pub id: String,
  pub name: String,
  pub tag_keys: Vec<String>,
}

/// Security groups of a classic load balancer; `None` when it does not exist
pub async fn describe_classic_load_balancer(client: &ElbClient, name: &str) -> Result<Option<Vec<String>>> {
  let response = match client.describe_load_balancers().load_balancer_names(name).send().await {
    Ok(response) => response,
    Err(err) if err.as_service_error().is_some_and(|e| e.is_access_point_not_found_exception()) => return Ok(None),
    Err(err) => return Err(classify_aws_error(err)).with_context(|| format!("cannot describe ELB {name}")),
  };

  let descriptions = response.load_balancer_descriptions();
  if descriptions.len() > 1 {
    warn!("found multiple load balancers with name: {name}");
  }

  Ok(descriptions.first().map(|lb| lb.security_groups().to_vec()))
}

pub async fn network_load_balancer_exists(client: &ElbV2Client, name: &str) -> Result<bool> {
  match client.describe_load_balancers().names(name).send().await {
    Ok(_) => Ok(true),
    Err(err) if err.as_service_error().is_some_and(|e| e.is_load_balancer_not_found_exception()) => Ok(false),
    Err(err) => Err(classify_aws_error(err)).with_context(|| format!("cannot describe load balancer {name}")),
  }
}

fn to_security_group(sg: &aws_sdk_ec2::types::SecurityGroup) -> SecurityGroup {
  SecurityGroup {
    id: sg.group_id().unwrap_or_default().to_string(),
    name: sg.group_name().unwrap_or_default().to_string(),
    tag_keys: sg.tags().iter().filter_map(|t| t.key().map(str::to_string)).collect(),
  }
}

async fn describe_security_groups_by_filter(client: &Ec2Client, filter: Filter) -> Result<Vec<SecurityGroup>> {
  let mut groups = Vec::new();
  let mut next_token = None;

  loop {
    let response = client
      .describe_security_groups()
      .filters(filter.clone())
      .set_next_token(next_token)
      .send()
      .await
      .map_err(classify_aws_error)
      .context("cannot describe security groups")?;

    groups.extend(response.security_groups().iter().map(to_security_group));

    next_token = response.next_token;
    if next_token.is_none() {
      break;
    }
  }

  Ok(groups)
}

pub async fn describe_security_groups(client: &Ec2Client, ids: Vec<String>) -> Result<Vec<SecurityGroup>> {
  if ids.is_empty() {
    return Ok(Vec::new());
  }
  let filter = Filter::builder().name("group-id").set_values(Some(ids)).build();
  describe_security_groups_by_filter(client, filter).await
}

/// Security groups carrying the given tag key, whatever its value
pub async fn list_tagged_security_groups(client: &Ec2Client, tag_key: &str) -> Result<Vec<SecurityGroup>> {
  let filter = Filter::builder().name("tag-key").values(tag_key).build();
  describe_security_groups_by_filter(client, filter).await
}

pub async fn delete_security_group(client: &Ec2Client, id: &str) -> Result<()> {
  client
    .delete_security_group()
    .group_id(id)
    .send()
    .await
    .map_err(classify_aws_error)
    .with_context(|| format!("cannot delete security group {id}"))?;

  debug!("Deleted security group {id}");
  Ok(())
}
