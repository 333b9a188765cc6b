use anyhow::{Context, Result, bail};

/// Latest supported minor version
pub const LATEST: i32 = 35;

/// Format a minor version number as a full version string (e.g. 30 → "1.30")
pub(crate) fn format_version(minor: i32) -> String {
  format!("1.{minor}")
}

/// Given a version, parse the minor version
///
/// For example, the format Amazon EKS of v1.20.7-eks-123456 returns 20
/// Or the format of v1.22.7 returns 22
pub(crate) fn parse_minor(version: &str) -> Result<i32> {
  let parts: Vec<&str> = version.trim_start_matches('v').split('.').collect();
  if parts.first() != Some(&"1") {
    bail!("Invalid version format '{version}', expected '1.Y[.Z]'");
  }
  let minor_str = parts
    .get(1)
    .context(format!("Invalid version format '{version}', expected '1.Y[.Z]'"))?;
  let minor = minor_str
    .split('-')
    .next()
    .unwrap_or_default()
    .parse::<i32>()
    .with_context(|| format!("Invalid version format '{version}', expected '1.Y[.Z]'"))?;

  Ok(minor)
}

/// Truncate a version to `1.Y`, e.g. the version reported by a nodegroup
pub(crate) fn major_minor(version: &str) -> Result<String> {
  Ok(format_version(parse_minor(version)?))
}

/// Resolve the version the control plane should be upgraded to
///
/// Kubernetes only allows upgrading one minor version at a time; without an explicit
/// target the next minor version is chosen. Returns `None` when no upgrade is needed
pub(crate) fn get_target_version(current_version: &str, requested: Option<&str>) -> Result<Option<String>> {
  let current = parse_minor(current_version)?;

  let Some(requested) = requested.filter(|r| !r.is_empty()) else {
    if current >= LATEST {
      return Ok(None);
    }
    return Ok(Some(format_version(current + 1)));
  };

  let target = parse_minor(requested)?;
  if target == current {
    return Ok(None);
  }
  if target < current {
    bail!(
      "cannot upgrade to a lower version. Found given target version {:?}, current cluster version {:?}",
      format_version(target),
      format_version(current)
    );
  }
  if target > current + 1 {
    bail!(
      "upgrading more than one version at a time is not supported. Found upgrade from {:?} to {:?}. \
      Please upgrade to {:?} first",
      format_version(current),
      format_version(target),
      format_version(current + 1)
    );
  }
  if target > LATEST {
    bail!(
      "version {:?} is not supported; the latest supported version is {:?}",
      format_version(target),
      format_version(LATEST)
    );
  }

  Ok(Some(format_version(target)))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_minor_valid_versions() {
    let cases = vec![
      ("v1.20.7-eks-123456", 20),
      ("1.30", 30),
      ("v1.30", 30),
      ("v1.30.0-eks-12345", 30),
      ("1.25.3", 25),
      ("1.29-eks", 29),
    ];

    for (input, expected) in cases {
      let result = parse_minor(input).unwrap();
      assert_eq!(result, expected, "parse_minor({input})");
    }
  }

  #[test]
  fn parse_minor_invalid_versions() {
    assert!(parse_minor("125").is_err(), "should fail on '125' (no dot)");
    assert!(parse_minor("").is_err(), "should fail on empty string");
    assert!(parse_minor("2.30").is_err(), "should fail on major version 2");
    assert!(parse_minor("1.x").is_err(), "should fail on non-numeric minor");
  }

  #[test]
  fn format_version_formats_correctly() {
    assert_eq!(format_version(30), "1.30");
    assert_eq!(format_version(LATEST), format!("1.{LATEST}"));
  }

  #[test]
  fn major_minor_truncates_patch() {
    assert_eq!(major_minor("1.29.3-20240110").unwrap(), "1.29");
    assert_eq!(major_minor("v1.30").unwrap(), "1.30");
  }

  #[test]
  fn next_minor_when_no_target() {
    assert_eq!(get_target_version("1.30", None).unwrap().as_deref(), Some("1.31"));
    assert_eq!(get_target_version("1.30", Some("")).unwrap().as_deref(), Some("1.31"));
  }

  #[test]
  fn no_upgrade_on_latest() {
    assert_eq!(get_target_version(&format_version(LATEST), None).unwrap(), None);
  }

  #[test]
  fn same_version_is_no_upgrade() {
    assert_eq!(get_target_version("1.30", Some("1.30")).unwrap(), None);
  }

  #[test]
  fn explicit_next_minor() {
    assert_eq!(get_target_version("1.30", Some("1.31")).unwrap().as_deref(), Some("1.31"));
  }

  #[test]
  fn lower_version_is_rejected() {
    let msg = get_target_version("1.30", Some("1.29")).unwrap_err().to_string();
    assert!(msg.contains("cannot upgrade to a lower version"), "error message: {msg}");
  }

  #[test]
  fn skipping_minor_versions_is_rejected() {
    let msg = get_target_version("1.30", Some("1.32")).unwrap_err().to_string();
    assert!(msg.contains("more than one version"), "error message: {msg}");
  }

  #[test]
  fn beyond_latest_is_rejected() {
    let current = format_version(LATEST);
    let target = format_version(LATEST + 1);
    let msg = get_target_version(&current, Some(&target)).unwrap_err().to_string();
    assert!(msg.contains("not supported"), "error message: {msg}");
  }
}
