use std::{
  fs,
  path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde_yaml::Value;
use tracing::{debug, info};

/// Name eksctl gives the cluster entry it writes to the kubeconfig
pub fn cluster_entry_name(cluster_name: &str, region: &str) -> String {
  format!("{cluster_name}.{region}.eksctl.io")
}

fn home_dir() -> Option<PathBuf> {
  std::env::var_os("HOME").map(PathBuf::from)
}

/// `$KUBECONFIG` (first entry) or `~/.kube/config`
fn default_path() -> Option<PathBuf> {
  if let Some(env) = std::env::var_os("KUBECONFIG").filter(|v| !v.is_empty()) {
    return std::env::split_paths(&env).next();
  }
  home_dir().map(|home| home.join(".kube").join("config"))
}

/// Per-cluster file written when the kubeconfig was generated with `--auto-kubeconfig`
fn auto_path(cluster_name: &str) -> Option<PathBuf> {
  home_dir().map(|home| home.join(".kube").join("eksctl").join("clusters").join(cluster_name))
}

/// Removes the kubeconfig entries eksctl wrote for the cluster, if any
///
/// Failures are only logged; a stale kubeconfig never blocks cluster deletion
pub fn maybe_delete_config(cluster_name: &str, region: &str) {
  let entry = cluster_entry_name(cluster_name, region);

  if let Some(path) = auto_path(cluster_name).filter(|p| p.exists()) {
    match owns_config(&path, &entry) {
      Ok(true) => {
        if let Err(err) = fs::remove_file(&path) {
          debug!("ignoring error while removing auto-generated config file {path:?}: {err}");
        }
      }
      Ok(false) => debug!("unable to verify ownership of config {path:?}"),
      Err(err) => debug!("{err:#}"),
    }
    return;
  }

  let Some(path) = default_path().filter(|p| p.exists()) else {
    return;
  };

  match delete_cluster_info(&path, &entry) {
    Ok(true) => info!("kubeconfig has been updated"),
    Ok(false) => {}
    Err(err) => debug!("ignoring error while updating config file {path:?}: {err:#}"),
  }
}

fn load(path: &Path) -> Result<Value> {
  let contents = fs::read_to_string(path).with_context(|| format!("unable to load config {path:?}"))?;
  serde_yaml::from_str(&contents).with_context(|| format!("unable to parse config {path:?}"))
}

/// An auto-generated file is only removed when its current context points at the cluster
fn owns_config(path: &Path, entry: &str) -> Result<bool> {
  let config = load(path)?;
  let current = config.get("current-context").and_then(Value::as_str).unwrap_or_default();
  Ok(current.split_once('@').is_some_and(|(_, cluster)| cluster == entry))
}

fn named_entries(config: &mut Value, key: &str) -> Option<&mut Vec<Value>> {
  config.get_mut(key).and_then(Value::as_sequence_mut)
}

fn entry_name(entry: &Value) -> Option<&str> {
  entry.get("name").and_then(Value::as_str)
}

/// Drops the cluster, its context and that context's user; returns whether the file changed
pub(crate) fn delete_cluster_info(path: &Path, entry: &str) -> Result<bool> {
  let mut config = load(path)?;
  let mut changed = false;

  if let Some(clusters) = named_entries(&mut config, "clusters") {
    let before = clusters.len();
    clusters.retain(|c| entry_name(c) != Some(entry));
    if clusters.len() != before {
      debug!("removed cluster {entry:?} from kubeconfig");
      changed = true;
    }
  }

  let mut removed_context = None;
  if let Some(contexts) = named_entries(&mut config, "contexts") {
    let position = contexts
      .iter()
      .position(|c| c.get("context").and_then(|ctx| ctx.get("cluster")).and_then(Value::as_str) == Some(entry));
    if let Some(position) = position {
      let context = contexts.remove(position);
      removed_context = entry_name(&context).map(str::to_string);
      debug!("removed context for {removed_context:?} from kubeconfig");
      changed = true;
    }
  }

  if let Some(context_name) = &removed_context {
    if let Some(users) = named_entries(&mut config, "users") {
      users.retain(|u| entry_name(u) != Some(context_name.as_str()));
    }

    let current = config.get("current-context").and_then(Value::as_str);
    if current == Some(context_name.as_str()) {
      if let Some(mapping) = config.as_mapping_mut() {
        mapping.insert(Value::from("current-context"), Value::from(""));
      }
      debug!("reset current-context in kubeconfig");
    }
  }

  if changed {
    fs::write(path, serde_yaml::to_string(&config)?).with_context(|| format!("unable to write config {path:?}"))?;
  }
  Ok(changed)
}
