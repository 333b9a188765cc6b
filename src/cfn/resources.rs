use std::collections::HashMap;

use anyhow::{Context, Result};
use aws_sdk_cloudformation::{
  Client as CfnClient,
  error::{ProvideErrorMetadata, SdkError},
  operation::describe_stacks::DescribeStacksError,
  types::{self as cfn_types, StackStatus},
};
use tracing::debug;

use super::{Stack, StackSummary};

/// Lists every stack in the region whose status is one of `statuses`
pub async fn list_stack_summaries(client: &CfnClient, statuses: Vec<StackStatus>) -> Result<Vec<StackSummary>> {
  let mut summaries = Vec::new();
  let mut next_token = None;

  loop {
    let response = client
      .list_stacks()
      .set_stack_status_filter(Some(statuses.clone()))
      .set_next_token(next_token)
      .send()
      .await
      .context("Failed to list CloudFormation stacks")?;

    for summary in response.stack_summaries() {
      summaries.push(to_stack_summary(summary));
    }

    next_token = response.next_token;
    if next_token.is_none() {
      break;
    }
  }

  Ok(summaries)
}

/// Describes a single stack; a stack that does not exist is `None`
pub async fn describe_stack(client: &CfnClient, name_or_id: &str) -> Result<Option<Stack>> {
  let response = match client.describe_stacks().stack_name(name_or_id).send().await {
    Ok(response) => response,
    Err(err) if is_does_not_exist(&err) => {
      debug!("Stack {name_or_id} does not exist");
      return Ok(None);
    }
    Err(err) => return Err(err).with_context(|| format!("Failed to describe stack {name_or_id}")),
  };

  Ok(response.stacks().first().map(to_stack))
}

pub async fn delete_stack(client: &CfnClient, name_or_id: &str, role_arn: Option<String>) -> Result<()> {
  client
    .delete_stack()
    .stack_name(name_or_id)
    .set_role_arn(role_arn)
    .send()
    .await
    .with_context(|| format!("Failed to delete stack {name_or_id}"))?;

  Ok(())
}

fn is_does_not_exist(err: &SdkError<DescribeStacksError>) -> bool {
  err.code() == Some("ValidationError") && err.message().is_some_and(|m| m.contains("does not exist"))
}

// The `into` calls accept both the optional and required accessor shapes of the SDK
fn to_stack_summary(summary: &cfn_types::StackSummary) -> StackSummary {
  let name: Option<&str> = summary.stack_name().into();
  let status: Option<&StackStatus> = summary.stack_status().into();
  let id: Option<&str> = summary.stack_id().into();

  StackSummary {
    name: name.unwrap_or_default().to_string(),
    id: id.map(str::to_string),
    status: status.cloned().unwrap_or_else(|| StackStatus::from("")),
  }
}

fn to_stack(stack: &cfn_types::Stack) -> Stack {
  let name: Option<&str> = stack.stack_name().into();
  let status: Option<&StackStatus> = stack.stack_status().into();
  let id: Option<&str> = stack.stack_id().into();

  let tags: HashMap<String, String> = stack
    .tags()
    .iter()
    .filter_map(|tag| {
      let key: Option<&str> = tag.key().into();
      let value: Option<&str> = tag.value().into();
      Some((key?.to_string(), value?.to_string()))
    })
    .collect();

  let outputs: HashMap<String, String> = stack
    .outputs()
    .iter()
    .filter_map(|output| Some((output.output_key()?.to_string(), output.output_value()?.to_string())))
    .collect();

  Stack {
    name: name.unwrap_or_default().to_string(),
    id: id.map(str::to_string),
    status: status.cloned().unwrap_or_else(|| StackStatus::from("")),
    tags,
    outputs,
  }
}
