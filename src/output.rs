use std::{fs::File, io::prelude::*};

use anyhow::Result;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tabled::{Table, settings::Style};

use crate::cluster::Description;

#[derive(Clone, Copy, Debug, Default, ValueEnum, Serialize, Deserialize)]
pub enum Format {
  /// Table format used for writing to stdout
  #[default]
  Table,
  /// JSON format used for logging or writing to a *.json file
  Json,
  /// YAML format used for writing to a *.yaml file
  Yaml,
}

/// Renders the `get cluster` listing
pub fn render(clusters: &[Description], format: Format) -> Result<String> {
  let output = match format {
    Format::Table => {
      let mut table = Table::new(clusters);
      table.with(Style::blank());
      table.to_string()
    }
    Format::Json => serde_json::to_string_pretty(clusters)?,
    Format::Yaml => serde_yaml::to_string(clusters)?,
  };
  Ok(output)
}

pub(crate) fn output(clusters: &[Description], format: Format, filename: &Option<String>) -> Result<()> {
  let output = render(clusters, format)?;

  match filename {
    Some(filename) => {
      let mut file = File::create(filename)?;
      file.write_all(output.as_bytes())?;
    }
    None => {
      println!("{output}");
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn clusters() -> Vec<Description> {
    vec![
      Description {
        name: "dev".into(),
        region: "us-west-2".into(),
        owned: "True".into(),
      },
      Description {
        name: "legacy".into(),
        region: "us-west-2".into(),
        owned: "False".into(),
      },
    ]
  }

  #[test]
  fn table_has_headers_and_rows() {
    let output = render(&clusters(), Format::Table).unwrap();
    let header = output.lines().next().unwrap();
    assert!(header.contains("NAME"));
    assert!(header.contains("REGION"));
    assert!(header.contains("EKSCTL CREATED"));
    assert!(output.lines().any(|l| l.contains("legacy") && l.contains("False")));
  }

  #[test]
  fn json_is_a_list() {
    let output = render(&clusters(), Format::Json).unwrap();
    let parsed: Vec<Description> = serde_json::from_str(&output).unwrap();
    assert_eq!(parsed, clusters());
  }

  #[test]
  fn write_to_file() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("clusters.yaml");
    output(&clusters(), Format::Yaml, &Some(path.to_string_lossy().to_string())).unwrap();

    let parsed: Vec<Description> = serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(parsed[0].name, "dev");
  }
}
