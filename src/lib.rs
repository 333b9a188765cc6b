pub mod cfn;
pub mod clients;
pub mod cluster;
pub mod config;
pub mod eks;
pub mod elb;
pub mod error;
pub mod k8s;
mod kubeconfig;
pub mod nodegroup;
pub mod output;
pub mod tasks;
pub mod waiter;

use std::{env, sync::Arc, time::Duration};

use anstyle::{AnsiColor, Effects, Style};
use anyhow::{Context, Result};
use aws_config::meta::region::RegionProviderChain;
use aws_types::region::Region;
use clap::{Args, Parser, Subcommand, builder::Styles};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
  cfn::StackCollection,
  clients::{RealAwsClients, RealK8sClients},
  cluster::{Cluster, DeleteOptions, K8sFactory},
  config::Config,
  error::EksctlError,
  k8s::DrainOptions,
  nodegroup::{DrainInput, NodeGroupManager, UpgradeOptions},
};

const STYLES: Styles = Styles::styled()
  .header(Style::new().fg_color(Some(anstyle::Color::Ansi(AnsiColor::Green))).effects(Effects::BOLD))
  .usage(Style::new().fg_color(Some(anstyle::Color::Ansi(AnsiColor::Green))).effects(Effects::BOLD))
  .literal(Style::new().fg_color(Some(anstyle::Color::Ansi(AnsiColor::Cyan))).effects(Effects::BOLD))
  .placeholder(Style::new().fg_color(Some(anstyle::Color::Ansi(AnsiColor::Cyan))));

#[derive(Parser, Debug)]
#[command(author, about, version)]
#[command(propagate_version = true)]
#[command(styles = STYLES)]
pub struct Cli {
  #[command(subcommand)]
  pub commands: Commands,

  /// Cluster config file; `.eksctl.yaml` in the current directory is used when present
  #[arg(short = 'f', long, global = true)]
  pub config_file: Option<String>,

  #[clap(flatten)]
  pub verbose: Verbosity<InfoLevel>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
  /// Get resource(s)
  #[command(subcommand)]
  Get(GetCommands),
  /// Delete resource(s)
  #[command(subcommand)]
  Delete(DeleteCommands),
  /// Upgrade resource(s)
  #[command(subcommand)]
  Upgrade(UpgradeCommands),
  /// Drain resource(s)
  #[command(subcommand)]
  Drain(DrainCommands),
}

#[derive(Debug, Subcommand)]
pub enum GetCommands {
  #[command(alias = "clusters")]
  Cluster(GetCluster),
}

#[derive(Debug, Subcommand)]
pub enum DeleteCommands {
  #[command(arg_required_else_help = true)]
  Cluster(DeleteCluster),
  #[command(arg_required_else_help = true, alias = "ng")]
  Nodegroup(DeleteNodegroup),
}

#[derive(Debug, Subcommand)]
pub enum UpgradeCommands {
  Cluster(UpgradeCluster),
  #[command(arg_required_else_help = true, alias = "ng")]
  Nodegroup(UpgradeNodegroup),
}

#[derive(Debug, Subcommand)]
pub enum DrainCommands {
  #[command(arg_required_else_help = true, alias = "ng")]
  Nodegroup(DrainNodegroup),
}

/// Flags locating the cluster
#[derive(Args, Debug, Default, Serialize, Deserialize)]
pub struct ClusterTarget {
  /// The name of the cluster
  #[arg(short, long)]
  pub name: Option<String>,

  /// The AWS region where the cluster is provisioned
  #[arg(short, long)]
  pub region: Option<String>,
}

/// Flags locating the nodegroup(s) of a cluster
#[derive(Args, Debug, Default, Serialize, Deserialize)]
pub struct NodegroupTarget {
  /// The name of the cluster
  #[arg(short, long)]
  pub cluster: Option<String>,

  /// The AWS region where the cluster is provisioned
  #[arg(short, long)]
  pub region: Option<String>,
}

/// Flags controlling how nodes are drained
#[derive(Args, Debug, Serialize, Deserialize)]
pub struct DrainFlags {
  /// Number of nodes drained in parallel (1-25)
  #[arg(long)]
  pub parallel: Option<usize>,

  /// Delete pods instead of evicting them, bypassing PodDisruptionBudgets
  #[arg(long)]
  pub disable_eviction: bool,

  /// Seconds to wait before retrying a pod eviction that was refused
  #[arg(long, value_name = "SECONDS")]
  pub pod_eviction_wait_period: Option<u64>,
}

/// List the clusters of a region and whether eksctl created them
#[derive(Args, Debug, Serialize, Deserialize)]
pub struct GetCluster {
  #[clap(flatten)]
  pub target: ClusterTarget,

  /// Number of clusters requested per page
  #[arg(long, default_value_t = 100)]
  pub chunk_size: i32,

  #[arg(short, long, value_enum, default_value_t)]
  pub output: output::Format,

  /// Write to file instead of stdout
  #[arg(long)]
  pub filename: Option<String>,
}

/// Delete a cluster and every resource eksctl created for it
#[derive(Args, Debug, Serialize, Deserialize)]
pub struct DeleteCluster {
  #[clap(flatten)]
  pub target: ClusterTarget,

  /// Wait for the deletion of all resources before exiting
  #[arg(short, long)]
  pub wait: bool,

  /// Continue the deletion when draining nodegroups or deleting IAM resources fails
  #[arg(long)]
  pub force: bool,

  #[clap(flatten)]
  pub drain: DrainFlags,
}

/// Delete nodegroup(s), draining them first
#[derive(Args, Debug, Serialize, Deserialize)]
pub struct DeleteNodegroup {
  #[clap(flatten)]
  pub target: NodegroupTarget,

  /// Name(s) of the nodegroup(s) to delete
  #[arg(short, long, required = true, num_args = 1..)]
  pub name: Vec<String>,

  /// Wait for the deletion to complete before exiting
  #[arg(short, long)]
  pub wait: bool,

  /// Drain the nodegroup(s) before deleting them
  #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
  pub drain: bool,

  #[clap(flatten)]
  pub drain_flags: DrainFlags,

  /// Apply the changes; without it the command only describes what it would do
  #[arg(long)]
  pub approve: bool,
}

/// Upgrade the control plane of a cluster to the next Kubernetes version
#[derive(Args, Debug, Serialize, Deserialize)]
pub struct UpgradeCluster {
  #[clap(flatten)]
  pub target: ClusterTarget,

  /// Target Kubernetes version; defaults to the next minor version
  #[arg(long)]
  pub version: Option<String>,

  /// Apply the changes; without it the command only describes what it would do
  #[arg(long)]
  pub approve: bool,
}

/// Upgrade a managed nodegroup
#[derive(Args, Debug, Serialize, Deserialize)]
pub struct UpgradeNodegroup {
  #[clap(flatten)]
  pub target: NodegroupTarget,

  /// Name of the nodegroup to upgrade
  #[arg(short, long)]
  pub name: String,

  /// Kubernetes version; defaults to the version of the control plane
  #[arg(long)]
  pub kubernetes_version: Option<String>,

  /// Launch template version to roll out
  #[arg(long)]
  pub launch_template_version: Option<String>,

  /// AMI release version to roll out
  #[arg(long)]
  pub release_version: Option<String>,

  /// Replace nodes even when their pods cannot be drained
  #[arg(long)]
  pub force_upgrade: bool,

  /// Wait for the upgrade to complete before exiting
  #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
  pub wait: bool,
}

/// Cordon the nodes of nodegroup(s) and evict their pods
#[derive(Args, Debug, Serialize, Deserialize)]
pub struct DrainNodegroup {
  #[clap(flatten)]
  pub target: NodegroupTarget,

  /// Name(s) of the nodegroup(s) to drain
  #[arg(short, long, required = true, num_args = 1..)]
  pub name: Vec<String>,

  /// Uncordon the nodes instead
  #[arg(long)]
  pub undo: bool,

  #[clap(flatten)]
  pub drain_flags: DrainFlags,

  /// Upper bound on the grace period given to evicted pods, in seconds
  #[arg(long, value_name = "SECONDS")]
  pub max_grace_period: Option<u64>,

  /// Seconds to wait after draining each node
  #[arg(long, value_name = "SECONDS", default_value_t = 0)]
  pub node_drain_wait_period: u64,

  /// Seconds allowed for draining all nodes
  #[arg(long, value_name = "SECONDS")]
  pub timeout: Option<u64>,

  /// Apply the changes; without it the command only describes what it would do
  #[arg(long)]
  pub approve: bool,
}

/// Get the configuration to authn/authz with AWS that will be used across AWS clients
async fn get_config(region: Option<String>) -> Result<aws_config::SdkConfig> {
  let aws_region = match region {
    Some(region) => Some(Region::new(region)),
    None => env::var("AWS_REGION").ok().map(Region::new),
  };

  let region_provider = RegionProviderChain::first_try(aws_region).or_default_provider();

  Ok(aws_config::from_env().region(region_provider).load().await)
}

/// Builds the stack manager every command works through
async fn stack_collection(config: &Config, cluster_name: &str, region: Option<&str>) -> Result<StackCollection<RealAwsClients>> {
  let aws_config = get_config(config.region(region)).await?;
  let region = aws_config
    .region()
    .map(|r| r.to_string())
    .context("unable to determine the AWS region; set --region or AWS_REGION")?;

  Ok(
    StackCollection::new(RealAwsClients::new(&aws_config), cluster_name, region)
      .with_role_arn(config.cfn_role_arn.clone())
      .with_wait_timeout(config.timeouts.wait())
      .with_poll_interval(config.timeouts.poll()),
  )
}

/// Connecting to the cluster is deferred until an operable cluster needs it
fn k8s_factory(cluster_name: &str) -> K8sFactory<RealK8sClients> {
  let cluster_name = cluster_name.to_string();
  Arc::new(move || {
    let cluster_name = cluster_name.clone();
    async move { RealK8sClients::new(&cluster_name).await }.boxed()
  })
}

fn drain_options(config: &Config, flags: &DrainFlags, wait_timeout: Duration) -> (DrainOptions, usize) {
  let options = DrainOptions {
    max_grace_period: wait_timeout,
    pod_eviction_wait_period: Duration::from_secs(
      flags
        .pod_eviction_wait_period
        .unwrap_or(config.drain.pod_eviction_wait_seconds),
    ),
    disable_eviction: flags.disable_eviction || config.drain.disable_eviction,
    timeout: wait_timeout,
    ..Default::default()
  };
  (options, flags.parallel.unwrap_or(config.drain.parallel))
}

/// List clusters as a table, JSON or YAML
pub async fn get_cluster(args: &GetCluster, config: &Config) -> Result<()> {
  let stacks = stack_collection(config, "", args.target.region.as_deref()).await?;
  let mut clusters = cluster::get_clusters(&stacks, args.chunk_size).await?;

  if let Some(name) = &args.target.name {
    clusters.retain(|c| &c.name == name);
    if clusters.is_empty() {
      return Err(EksctlError::ClusterNotFound(name.clone()).into());
    }
  }

  output::output(&clusters, args.output, &args.filename)
}

/// Delete a cluster, owned or not
pub async fn delete_cluster(args: &DeleteCluster, config: &Config) -> Result<()> {
  let name = config.cluster_name(args.target.name.as_deref())?;
  let stacks = stack_collection(config, &name, args.target.region.as_deref()).await?;
  info!("deleting EKS cluster {name:?}");

  let (drain, parallel) = drain_options(config, &args.drain, stacks.wait_timeout());
  let options = DeleteOptions {
    wait: args.wait,
    force: args.force,
    disable_nodegroup_eviction: drain.disable_eviction,
    parallel,
    pod_eviction_wait_period: drain.pod_eviction_wait_period,
  };

  let cluster = Cluster::new(stacks, k8s_factory(&name)).await?;
  cluster.delete(&options).await
}

/// Drain then delete nodegroups
pub async fn delete_nodegroup(args: &DeleteNodegroup, config: &Config) -> Result<()> {
  let name = config.cluster_name(args.target.cluster.as_deref())?;
  let stacks = stack_collection(config, &name, args.target.region.as_deref()).await?;
  let plan = !args.approve;

  let (options, parallel) = drain_options(config, &args.drain_flags, stacks.wait_timeout());
  let manager = NodeGroupManager::new(stacks);

  if args.drain {
    let nodegroups = manager.resolve_types(&args.name).await?;
    let input = DrainInput {
      nodegroups,
      options,
      parallel,
      plan,
    };
    nodegroup::connect_and_drain(&k8s_factory(&name), &input).await?;
  }

  manager.delete(&args.name, args.wait, plan).await?;
  cluster::log_plan_mode_warning(plan);
  Ok(())
}

/// Upgrade the control plane of a cluster
pub async fn upgrade_cluster(args: &UpgradeCluster, config: &Config) -> Result<()> {
  let name = config.cluster_name(args.target.name.as_deref())?;
  let stacks = stack_collection(config, &name, args.target.region.as_deref()).await?;

  let cluster = Cluster::new(stacks, k8s_factory(&name)).await?;
  cluster.upgrade(args.version.as_deref(), !args.approve).await
}

/// Upgrade a managed nodegroup
pub async fn upgrade_nodegroup(args: &UpgradeNodegroup, config: &Config) -> Result<()> {
  let name = config.cluster_name(args.target.cluster.as_deref())?;
  let stacks = stack_collection(config, &name, args.target.region.as_deref()).await?;

  let options = UpgradeOptions {
    nodegroup_name: args.name.clone(),
    kubernetes_version: args.kubernetes_version.clone(),
    launch_template_version: args.launch_template_version.clone(),
    release_version: args.release_version.clone(),
    force_upgrade: args.force_upgrade,
    wait: args.wait,
  };
  NodeGroupManager::new(stacks).upgrade(&options).await
}

/// Cordon and drain (or uncordon) nodegroups
pub async fn drain_nodegroup(args: &DrainNodegroup, config: &Config) -> Result<()> {
  let name = config.cluster_name(args.target.cluster.as_deref())?;
  let stacks = stack_collection(config, &name, args.target.region.as_deref()).await?;
  let plan = !args.approve;

  let (mut options, parallel) = drain_options(config, &args.drain_flags, stacks.wait_timeout());
  options.undo = args.undo;
  options.node_drain_wait_period = Duration::from_secs(args.node_drain_wait_period);
  if let Some(max_grace_period) = args.max_grace_period {
    options.max_grace_period = Duration::from_secs(max_grace_period);
  }
  if let Some(timeout) = args.timeout {
    options.timeout = Duration::from_secs(timeout);
  }

  let nodegroups = NodeGroupManager::new(stacks).resolve_types(&args.name).await?;
  let input = DrainInput {
    nodegroups,
    options,
    parallel,
    plan,
  };
  nodegroup::connect_and_drain(&k8s_factory(&name), &input).await?;
  cluster::log_plan_mode_warning(plan);
  Ok(())
}
