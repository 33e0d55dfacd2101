//! The surface a host runner drives: phase hooks and marker registration.

use crate::item::TestItem;
use crate::marker::{RAISES, RELAY_MARKER, SETUP_RAISES};
use crate::outcome::PhaseOutcome;
use crate::signal::Failed;
use crate::validate::{validate, Phase};
use std::collections::BTreeMap;

/// Callbacks invoked by the host after each phase of a test has run.
///
/// Returning `Err` asks the host to fail the test immediately with the given message.
pub trait PhaseHooks: Send + Sync {
  fn after_setup(&self, _item: &mut TestItem, _outcome: &mut PhaseOutcome) -> Result<(), Failed> {
    Ok(())
  }

  fn after_call(&self, _item: &mut TestItem, _outcome: &mut PhaseOutcome) -> Result<(), Failed> {
    Ok(())
  }
}

/// Validates `raises` and `setup_raises` markers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RaisesPlugin;

impl RaisesPlugin {
  /// Declares this plugin's markers. Call once per run, before collection.
  pub fn configure(&self, registry: &mut MarkerRegistry) {
    registry.add_line(&format!("{SETUP_RAISES}: expect the setup phase to raise."));
    registry.add_line(&format!("{RAISES}: expect the call phase to raise."));
  }
}

impl PhaseHooks for RaisesPlugin {
  fn after_setup(&self, item: &mut TestItem, outcome: &mut PhaseOutcome) -> Result<(), Failed> {
    validate(item, outcome, Phase::Setup)
  }

  fn after_call(&self, item: &mut TestItem, outcome: &mut PhaseOutcome) -> Result<(), Failed> {
    validate(item, outcome, Phase::Call)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarkerError {
  #[error("'{0}' not found in `markers` configuration option")]
  Unregistered(String),
  #[error("marker '{0}' is reserved for internal use")]
  Reserved(String),
}

/// Known marker names and their one-line descriptions.
#[derive(Debug, Clone, Default)]
pub struct MarkerRegistry {
  markers: BTreeMap<String, String>,
  strict: bool,
}

impl MarkerRegistry {
  pub fn new(strict: bool) -> Self {
    Self {
      markers: BTreeMap::new(),
      strict,
    }
  }

  pub fn set_strict(&mut self, strict: bool) {
    self.strict = strict;
  }

  pub fn is_strict(&self) -> bool {
    self.strict
  }

  /// Registers a `name: description` line. A line without `:` registers a bare name.
  pub fn add_line(&mut self, line: &str) {
    let (name, description) = match line.split_once(':') {
      Some((name, description)) => (name.trim(), description.trim()),
      None => (line.trim(), ""),
    };
    // Markers may take arguments in their documented form, e.g. `raises(exception): ...`.
    let name = name.split('(').next().unwrap_or(name).trim();
    if name.is_empty() {
      return;
    }
    self
      .markers
      .insert(name.to_string(), description.to_string());
  }

  pub fn is_registered(&self, name: &str) -> bool {
    self.markers.contains_key(name)
  }

  pub fn description(&self, name: &str) -> Option<&str> {
    self.markers.get(name).map(String::as_str)
  }

  /// Checks that a test may declare `name`.
  pub fn check(&self, name: &str) -> Result<(), MarkerError> {
    if name == RELAY_MARKER {
      return Err(MarkerError::Reserved(name.to_string()));
    }
    if self.strict && !self.is_registered(name) {
      return Err(MarkerError::Unregistered(name.to_string()));
    }
    Ok(())
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self
      .markers
      .iter()
      .map(|(name, description)| (name.as_str(), description.as_str()))
  }
}
