use anyhow::{Context, Result};
use aws_sdk_eks::types::Cluster as EksCluster;
use tracing::{info, warn};

use crate::{
  cfn::StackCollection,
  clients::AwsClients,
  eks::{self, version},
};

/// Upgrades the control plane, returning whether a version change was (or in plan mode,
/// would have been) required
pub(super) async fn upgrade_control_plane<A: AwsClients>(
  stacks: &StackCollection<A>,
  cluster: &EksCluster,
  requested: Option<&str>,
  dry_run: bool,
) -> Result<bool> {
  let name = stacks.cluster_name();
  eks::can_update(cluster, stacks.region())?;

  let current = cluster
    .version()
    .with_context(|| format!("cluster {name:?} does not report a Kubernetes version"))?;

  let Some(target) = version::get_target_version(current, requested)? else {
    info!("no cluster version update required");
    return Ok(false);
  };

  if dry_run {
    warn!("(plan) would upgrade cluster {name:?} control plane from current version {current:?} to {target:?}");
    return Ok(true);
  }

  info!("upgrading cluster {name:?} control plane from current version {current:?} to {target:?}");
  let update_id = stacks.aws().update_cluster_version(name, &target).await?;
  eks::wait_for_update(
    stacks.aws(),
    name,
    &update_id,
    None,
    stacks.wait_timeout(),
    stacks.poll_interval(),
  )
  .await?;

  info!("cluster {name:?} control plane has been upgraded to version {target:?}");
  info!("you will need to follow the upgrade procedure for all of nodegroups and add-ons");
  Ok(true)
}

pub(crate) fn log_plan_mode_warning(plan: bool) {
  if plan {
    warn!("no changes were applied, run again with '--approve' to apply the changes");
  }
}
