//! The expectation validator, run once after each phase of a test.
//!
//! # Setup-to-call handshake
//!
//! The call phase reports a failed expectation directly: usage errors fail the test with a plain
//! message, and every other verdict replaces the phase's exception with a signal exception so the
//! host reports it like any other test failure.
//!
//! The setup phase cannot do that. A failure reported from setup is classified by the host as an
//! *error* in the test's fixtures, not as a failure of the test. So the setup phase records the
//! verdict in the item's relay slot and completes normally. The next validation of the same item
//! (its call phase) finds the relay before doing anything else and fails with the recorded message.
//!
//! Because the relay is checked first, a test marked with both `setup_raises` and `raises` cannot be
//! supported. Such a test is rejected with a usage error instead.

use crate::exception::{ExcInfo, Traceback};
use crate::item::TestItem;
use crate::marker::{ExpectationSpec, Marker, RAISES, SETUP_RAISES};
use crate::outcome::PhaseOutcome;
use crate::signal::{Failed, Verdict, VerdictKind};
use std::fmt;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
  Setup,
  Call,
}

impl Phase {
  /// The marker that declares an expectation for this phase.
  pub fn marker_name(self) -> &'static str {
    match self {
      Phase::Setup => SETUP_RAISES,
      Phase::Call => RAISES,
    }
  }

  fn other(self) -> Phase {
    match self {
      Phase::Setup => Phase::Call,
      Phase::Call => Phase::Setup,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Phase::Setup => "setup",
      Phase::Call => "call",
    }
  }
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A verdict plus the traceback of the exception that caused it, if one was raised.
struct Rejection {
  verdict: Verdict,
  traceback: Option<Traceback>,
}

impl From<Verdict> for Rejection {
  fn from(verdict: Verdict) -> Self {
    Self {
      verdict,
      traceback: None,
    }
  }
}

/// Validates `outcome` against the marker `item` declares for `phase`.
///
/// Returns `Err` only when the host should fail the test right away; every other verdict is
/// communicated by mutating `outcome` or `item`.
pub fn validate(
  item: &mut TestItem,
  outcome: &mut PhaseOutcome,
  phase: Phase,
) -> Result<(), Failed> {
  if let Some(relay) = item.take_relay() {
    debug!(nodeid = item.nodeid(), %phase, "failing from relayed setup verdict");
    // The current call stack has nothing to do with the setup failure.
    return Err(Failed::without_trace(relay.message));
  }

  let rejection = match item.get_closest_marker(phase.marker_name()) {
    None => {
      trace!(nodeid = item.nodeid(), %phase, "no expectation declared");
      return Ok(());
    }
    Some(marker) => evaluate(item, marker, outcome, phase),
  };

  match rejection {
    Ok(()) => {
      debug!(nodeid = item.nodeid(), %phase, "expected exception raised");
      Ok(())
    }
    Err(rejection) => {
      debug!(
        nodeid = item.nodeid(),
        %phase,
        kind = ?rejection.verdict.kind,
        message = %rejection.verdict.message,
        "expectation failed"
      );
      fail_or_relay(item, outcome, phase, rejection)
    }
  }
}

fn evaluate(
  item: &TestItem,
  marker: &Marker,
  outcome: &mut PhaseOutcome,
  phase: Phase,
) -> Result<(), Rejection> {
  let other = phase.other().marker_name();
  if item.get_closest_marker(other).is_some() {
    return Err(
      Verdict::usage(format!(
        "@{}: cannot be combined with @{other} on the same test.",
        marker.name()
      ))
      .into(),
    );
  }

  let spec = ExpectationSpec::from_marker(marker)?;

  let excinfo = outcome.excinfo().cloned();
  // Nothing the phase produced may reach the host's default handling from here on.
  outcome.force_result(None);

  match excinfo {
    Some(info) if info.exception.is_instance_of(&spec.exception) => spec
      .check_message(&info.exception)
      .map_err(|verdict| Rejection {
        verdict,
        traceback: info.traceback,
      }),
    Some(info) => Err(Rejection {
      verdict: Verdict::new(
        VerdictKind::ExceptionTypeMismatch,
        format!(
          "Expected exception of type {}, but got exception of type {} with message: {}",
          spec.exception,
          info.exception.class(),
          info.exception,
        ),
      ),
      traceback: info.traceback,
    }),
    None => Err(
      Verdict::new(
        VerdictKind::NoExceptionRaised,
        format!("Expected exception {}, but it did not raise", spec.exception),
      )
      .into(),
    ),
  }
}

fn fail_or_relay(
  item: &mut TestItem,
  outcome: &mut PhaseOutcome,
  phase: Phase,
  rejection: Rejection,
) -> Result<(), Failed> {
  let Rejection { verdict, traceback } = rejection;
  match phase {
    Phase::Setup => {
      // Setup must complete cleanly so that call runs and consumes the relay.
      outcome.force_result(None);
      item.attach_relay(verdict.to_string());
      Ok(())
    }
    Phase::Call if verdict.kind == VerdictKind::UsageError => {
      Err(Failed::without_trace(verdict.to_string()))
    }
    Phase::Call => {
      let mut excinfo = ExcInfo::new(verdict.to_exception());
      excinfo.traceback = traceback;
      outcome.set_excinfo(excinfo);
      Ok(())
    }
  }
}
