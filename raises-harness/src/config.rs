use anyhow::{anyhow, Context, Result};
use raises::{MarkerRegistry, RaisesPlugin};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "raises.toml";

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
  /// Reject marks that no plugin or `markers` line registered.
  #[serde(default)]
  pub strict_markers: bool,
  /// Extra `name: description` marker registrations.
  #[serde(default)]
  pub markers: Vec<String>,
  /// Paths searched when none are given on the command line.
  #[serde(default)]
  pub testpaths: Vec<PathBuf>,
}

impl HarnessConfig {
  pub fn from_path(path: &Path) -> Result<Self> {
    let raw =
      std::fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    raw
      .parse::<Self>()
      .map_err(|err| anyhow!("{}: {err}", path.display()))
  }

  /// Loads `explicit` if given, else `raises.toml` from `dir` if present, else defaults.
  pub fn load(explicit: Option<&Path>, dir: &Path) -> Result<Self> {
    if let Some(path) = explicit {
      return Self::from_path(path);
    }
    let implicit = dir.join(DEFAULT_CONFIG_FILE);
    if implicit.is_file() {
      tracing::debug!(path = %implicit.display(), "using implicit config");
      return Self::from_path(&implicit);
    }
    Ok(Self::default())
  }

  /// Builds the run's marker registry: plugin markers first, then configured lines.
  pub fn marker_registry(&self, plugin: &RaisesPlugin) -> MarkerRegistry {
    let mut registry = MarkerRegistry::new(self.strict_markers);
    plugin.configure(&mut registry);
    for line in &self.markers {
      registry.add_line(line);
    }
    registry
  }
}

impl FromStr for HarnessConfig {
  type Err = anyhow::Error;

  fn from_str(raw: &str) -> Result<Self> {
    toml::from_str(raw).map_err(|err| anyhow!("failed to parse config as TOML ({err})"))
  }
}
