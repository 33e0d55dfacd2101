//! Internal signal types and the verdicts they carry.
//!
//! Signals are never meant to be caught by test code. They only give a failure verdict a class name
//! so the host runner can report it through its ordinary exception path.

use crate::exception::{Class, Exception};
use once_cell::sync::Lazy;
use std::fmt;

static EXPECTED_EXCEPTION: Lazy<Class> =
  Lazy::new(|| Class::new("ExpectedException", &Class::exception()));
static EXPECTED_MESSAGE: Lazy<Class> =
  Lazy::new(|| Class::new("ExpectedMessage", &Class::exception()));
static RAISES_USAGE_ERROR: Lazy<Class> =
  Lazy::new(|| Class::new("RaisesUsageError", &Class::exception()));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
  /// The wrong exception was raised, or none at all.
  ExpectedException,
  /// The right exception was raised but its message did not satisfy `message`/`match`.
  ExpectedMessage,
  /// The marker itself is malformed.
  RaisesUsageError,
}

impl Signal {
  pub fn name(self) -> &'static str {
    match self {
      Signal::ExpectedException => "ExpectedException",
      Signal::ExpectedMessage => "ExpectedMessage",
      Signal::RaisesUsageError => "RaisesUsageError",
    }
  }

  pub fn class(self) -> Class {
    match self {
      Signal::ExpectedException => Class::clone(&EXPECTED_EXCEPTION),
      Signal::ExpectedMessage => Class::clone(&EXPECTED_MESSAGE),
      Signal::RaisesUsageError => Class::clone(&RAISES_USAGE_ERROR),
    }
  }
}

impl fmt::Display for Signal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerdictKind {
  ExceptionTypeMismatch,
  MessageMismatch,
  NoExceptionRaised,
  UsageError,
}

impl VerdictKind {
  pub fn signal(self) -> Signal {
    match self {
      VerdictKind::ExceptionTypeMismatch | VerdictKind::NoExceptionRaised => {
        Signal::ExpectedException
      }
      VerdictKind::MessageMismatch => Signal::ExpectedMessage,
      VerdictKind::UsageError => Signal::RaisesUsageError,
    }
  }
}

/// Why a marked test should fail. Displays as `"{signal}: {message}"`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}: {message}", .kind.signal())]
pub struct Verdict {
  pub kind: VerdictKind,
  pub message: String,
}

impl Verdict {
  pub fn new(kind: VerdictKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
    }
  }

  pub fn usage(message: impl Into<String>) -> Self {
    Self::new(VerdictKind::UsageError, message)
  }

  pub fn signal(&self) -> Signal {
    self.kind.signal()
  }

  /// The signal instance used to report this verdict through the exception path.
  pub fn to_exception(&self) -> Exception {
    self.signal().class().instantiate(self.message.clone())
  }
}

/// The host runner's generic failure signal, returned as `Err` from a phase hook.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct Failed {
  pub message: String,
  /// Whether the host should print the current call stack alongside the message.
  pub show_trace: bool,
}

impl Failed {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      show_trace: true,
    }
  }

  pub fn without_trace(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      show_trace: false,
    }
  }
}
