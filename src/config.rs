use std::{path::Path, time::Duration};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from `.eksctl.yaml` or an explicit path.
///
/// Every value can be overridden from the command line
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub metadata: Metadata,

  /// Service role CloudFormation assumes when deleting stacks
  #[serde(default)]
  pub cfn_role_arn: Option<String>,

  #[serde(default)]
  pub timeouts: Timeouts,

  #[serde(default)]
  pub drain: DrainConfig,
}

/// Identifies the cluster the commands operate on
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Metadata {
  pub name: Option<String>,
  pub region: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Timeouts {
  /// How long to wait for stacks, updates and deletions (default 25 minutes)
  #[serde(default = "default_wait_seconds")]
  pub wait_seconds: u64,

  #[serde(default = "default_poll_seconds")]
  pub poll_seconds: u64,
}

fn default_wait_seconds() -> u64 {
  25 * 60
}

fn default_poll_seconds() -> u64 {
  20
}

impl Default for Timeouts {
  fn default() -> Self {
    Self {
      wait_seconds: default_wait_seconds(),
      poll_seconds: default_poll_seconds(),
    }
  }
}

impl Timeouts {
  pub fn wait(&self) -> Duration {
    Duration::from_secs(self.wait_seconds)
  }

  pub fn poll(&self) -> Duration {
    Duration::from_secs(self.poll_seconds)
  }
}

/// Defaults for draining nodegroups
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DrainConfig {
  /// Number of nodes drained at the same time
  #[serde(default = "default_parallel")]
  pub parallel: usize,

  #[serde(default = "default_pod_eviction_wait_seconds")]
  pub pod_eviction_wait_seconds: u64,

  /// Delete pods instead of evicting them
  #[serde(default)]
  pub disable_eviction: bool,
}

fn default_parallel() -> usize {
  1
}

fn default_pod_eviction_wait_seconds() -> u64 {
  10
}

impl Default for DrainConfig {
  fn default() -> Self {
    Self {
      parallel: default_parallel(),
      pod_eviction_wait_seconds: default_pod_eviction_wait_seconds(),
      disable_eviction: false,
    }
  }
}

impl Config {
  /// The cluster named on the command line wins over the one in the file
  pub fn cluster_name(&self, flag: Option<&str>) -> Result<String> {
    match flag.or(self.metadata.name.as_deref()) {
      Some(name) if !name.is_empty() => Ok(name.to_string()),
      _ => bail!("--cluster must be set"),
    }
  }

  pub fn region(&self, flag: Option<&str>) -> Option<String> {
    flag.or(self.metadata.region.as_deref()).map(str::to_string)
  }
}

const DEFAULT_CONFIG_FILE: &str = ".eksctl.yaml";

/// Load configuration from an explicit path, the default `.eksctl.yaml` in the
/// current working directory, or fall back to `Config::default()`.
pub fn load(path: Option<&str>) -> Result<Config> {
  load_from(path, std::env::current_dir().ok().as_deref())
}

fn load_from(path: Option<&str>, base_dir: Option<&Path>) -> Result<Config> {
  if let Some(p) = path {
    return read(Path::new(p));
  }

  if let Some(dir) = base_dir {
    let default_path = dir.join(DEFAULT_CONFIG_FILE);
    if default_path.exists() {
      return read(&default_path);
    }
  }

  Ok(Config::default())
}

fn read(path: &Path) -> Result<Config> {
  let contents =
    std::fs::read_to_string(path).with_context(|| format!("Failed to read config file: {}", path.display()))?;
  serde_yaml::from_str(&contents).with_context(|| format!("Failed to parse config file: {}", path.display()))
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use super::*;

  #[test]
  fn config_default() {
    let cfg = Config::default();
    assert_eq!(cfg.timeouts.wait(), Duration::from_secs(1500));
    assert_eq!(cfg.timeouts.poll(), Duration::from_secs(20));
    assert_eq!(cfg.drain.parallel, 1);
    assert_eq!(cfg.drain.pod_eviction_wait_seconds, 10);
    assert!(cfg.cfn_role_arn.is_none());
  }

  #[test]
  fn deserialize_partial_yaml() {
    let yaml = r#"
metadata:
  name: dev
timeouts:
  wait_seconds: 600
"#;
    let cfg: Config = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(cfg.metadata.name.as_deref(), Some("dev"));
    assert!(cfg.metadata.region.is_none());
    assert_eq!(cfg.timeouts.wait_seconds, 600);
    assert_eq!(cfg.timeouts.poll_seconds, 20);
  }

  #[test]
  fn flags_override_file() {
    let cfg = Config {
      metadata: Metadata {
        name: Some("dev".into()),
        region: Some("us-west-2".into()),
      },
      ..Default::default()
    };
    assert_eq!(cfg.cluster_name(None).unwrap(), "dev");
    assert_eq!(cfg.cluster_name(Some("prod")).unwrap(), "prod");
    assert_eq!(cfg.region(None).as_deref(), Some("us-west-2"));
    assert_eq!(cfg.region(Some("eu-west-1")).as_deref(), Some("eu-west-1"));
  }

  #[test]
  fn cluster_name_required() {
    let err = Config::default().cluster_name(None).unwrap_err();
    assert_eq!(err.to_string(), "--cluster must be set");
  }

  #[test]
  fn load_no_path_no_default_file() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = load_from(None, Some(tmp.path())).unwrap();
    assert!(cfg.metadata.name.is_none());
  }

  #[test]
  fn load_explicit_path() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("cluster.yaml");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "metadata:\n  name: dev\n  region: us-east-1\ncfn_role_arn: arn:aws:iam::111122223333:role/cfn").unwrap();

    let cfg = load_from(Some(path.to_str().unwrap()), None).unwrap();
    assert_eq!(cfg.metadata.region.as_deref(), Some("us-east-1"));
    assert_eq!(cfg.cfn_role_arn.as_deref(), Some("arn:aws:iam::111122223333:role/cfn"));
  }

  #[test]
  fn load_explicit_path_not_found() {
    assert!(load_from(Some("/tmp/does-not-exist-eksctl-test.yaml"), None).is_err());
  }

  #[test]
  fn load_default_file_in_base_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let mut f = std::fs::File::create(tmp.path().join(".eksctl.yaml")).unwrap();
    writeln!(f, "drain:\n  parallel: 4").unwrap();

    let cfg = load_from(None, Some(tmp.path())).unwrap();
    assert_eq!(cfg.drain.parallel, 4);
    assert!(!cfg.drain.disable_eviction);
  }
}
