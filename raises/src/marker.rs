//! Marker declarations and their resolution into an [`ExpectationSpec`].

use crate::exception::{Class, Exception};
use crate::signal::{Verdict, VerdictKind};
use regex::bytes::{Regex, RegexBuilder};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::BitOr;

/// Expect the call (execution) phase to raise.
pub const RAISES: &str = "raises";
/// Expect the setup phase to raise.
pub const SETUP_RAISES: &str = "setup_raises";
/// Reserved for the setup-to-call relay; never declarable by a test.
pub const RELAY_MARKER: &str = "setup_raises_expected_exc_or_message_not_found";

/// A single marker argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerValue {
  Class(Class),
  Instance(Exception),
  Str(String),
  Int(i64),
  Bool(bool),
  None,
}

impl MarkerValue {
  fn is_truthy(&self) -> bool {
    match self {
      MarkerValue::Class(_) | MarkerValue::Instance(_) => true,
      MarkerValue::Str(s) => !s.is_empty(),
      MarkerValue::Int(v) => *v != 0,
      MarkerValue::Bool(v) => *v,
      MarkerValue::None => false,
    }
  }
}

impl fmt::Display for MarkerValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      MarkerValue::Class(class) => write!(f, "{class}"),
      MarkerValue::Instance(exc) => write!(f, "{}({:?})", exc.class(), exc.message()),
      MarkerValue::Str(s) => write!(f, "{s:?}"),
      MarkerValue::Int(v) => write!(f, "{v}"),
      MarkerValue::Bool(v) => write!(f, "{v}"),
      MarkerValue::None => f.write_str("None"),
    }
  }
}

impl From<Class> for MarkerValue {
  fn from(value: Class) -> Self {
    MarkerValue::Class(value)
  }
}

impl From<Exception> for MarkerValue {
  fn from(value: Exception) -> Self {
    MarkerValue::Instance(value)
  }
}

impl From<&str> for MarkerValue {
  fn from(value: &str) -> Self {
    MarkerValue::Str(value.to_string())
  }
}

impl From<String> for MarkerValue {
  fn from(value: String) -> Self {
    MarkerValue::Str(value)
  }
}

impl From<i64> for MarkerValue {
  fn from(value: i64) -> Self {
    MarkerValue::Int(value)
  }
}

impl From<bool> for MarkerValue {
  fn from(value: bool) -> Self {
    MarkerValue::Bool(value)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
  name: String,
  args: Vec<MarkerValue>,
  kwargs: BTreeMap<String, MarkerValue>,
}

impl Marker {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      args: Vec::new(),
      kwargs: BTreeMap::new(),
    }
  }

  pub fn raises() -> Self {
    Self::new(RAISES)
  }

  pub fn setup_raises() -> Self {
    Self::new(SETUP_RAISES)
  }

  pub fn with_arg(mut self, value: impl Into<MarkerValue>) -> Self {
    self.args.push(value.into());
    self
  }

  pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<MarkerValue>) -> Self {
    self.kwargs.insert(key.into(), value.into());
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn args(&self) -> &[MarkerValue] {
    &self.args
  }

  pub fn kwargs(&self) -> &BTreeMap<String, MarkerValue> {
    &self.kwargs
  }

  pub fn kwarg(&self, key: &str) -> Option<&MarkerValue> {
    self.kwargs.get(key)
  }
}

/// Regex flag bits accepted by `match_flags`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MatchFlags(u32);

impl MatchFlags {
  pub const NONE: MatchFlags = MatchFlags(0);
  pub const IGNORECASE: MatchFlags = MatchFlags(2);
  pub const MULTILINE: MatchFlags = MatchFlags(8);
  pub const DOTALL: MatchFlags = MatchFlags(16);
  pub const UNICODE: MatchFlags = MatchFlags(32);
  pub const VERBOSE: MatchFlags = MatchFlags(64);
  pub const ASCII: MatchFlags = MatchFlags(256);

  const SUPPORTED: u32 = 2 | 8 | 16 | 32 | 64 | 256;

  /// Returns `None` for unknown bits or for `ASCII` combined with `UNICODE`.
  pub fn from_bits(bits: i64) -> Option<Self> {
    let bits = u32::try_from(bits).ok()?;
    if bits & !Self::SUPPORTED != 0 {
      return None;
    }
    let flags = MatchFlags(bits);
    if flags.contains(Self::ASCII) && flags.contains(Self::UNICODE) {
      return None;
    }
    Some(flags)
  }

  pub fn bits(self) -> u32 {
    self.0
  }

  pub fn contains(self, other: MatchFlags) -> bool {
    self.0 & other.0 == other.0
  }

  /// Compiles `pattern` as written. `ASCII` disables Unicode classes, so the regex runs over bytes.
  fn build(self, pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
      .case_insensitive(self.contains(Self::IGNORECASE))
      .multi_line(self.contains(Self::MULTILINE))
      .dot_matches_new_line(self.contains(Self::DOTALL))
      .ignore_whitespace(self.contains(Self::VERBOSE))
      .unicode(!self.contains(Self::ASCII))
      .build()
  }
}

impl BitOr for MatchFlags {
  type Output = MatchFlags;

  fn bitor(self, rhs: MatchFlags) -> MatchFlags {
    MatchFlags(self.0 | rhs.0)
  }
}

#[derive(Debug, Clone)]
pub enum MessageConstraint {
  Any,
  Contains(String),
  Matches { pattern: String, regex: Regex },
}

/// A validated `raises`/`setup_raises` marker.
#[derive(Debug, Clone)]
pub struct ExpectationSpec {
  pub exception: Class,
  pub constraint: MessageConstraint,
}

impl ExpectationSpec {
  /// Resolves the marker's options, producing a usage-error verdict for malformed declarations.
  pub fn from_marker(marker: &Marker) -> Result<Self, Verdict> {
    let name = marker.name();
    let exception = match marker.kwarg("exception") {
      None => Class::exception(),
      Some(MarkerValue::Class(class)) => {
        if !class.is_exception_class() {
          return Err(Verdict::usage(format!(
            "@{name}: supplied `exception={class}` is not a subclass of `BaseException`."
          )));
        }
        class.clone()
      }
      Some(_) => {
        return Err(Verdict::usage(format!(
          "@{name}: supplied `exception` argument must be a class, e.g. `exception=RuntimeError`."
        )));
      }
    };

    let message = marker.kwarg("message").unwrap_or(&MarkerValue::None);
    let pattern = marker.kwarg("match").unwrap_or(&MarkerValue::None);
    if message.is_truthy() && pattern.is_truthy() {
      return Err(Verdict::usage(format!(
        "@{name}: only `message=\"{}\"` *OR* `match=\"{}\"` allowed, not both.",
        plain(message),
        plain(pattern),
      )));
    }

    let message = optional_str(name, "message", message)?;
    let pattern = optional_str(name, "match", pattern)?;
    let flags = match marker.kwarg("match_flags") {
      None | Some(MarkerValue::None) => MatchFlags::NONE,
      Some(MarkerValue::Int(bits)) => MatchFlags::from_bits(*bits).ok_or_else(|| {
        Verdict::usage(format!(
          "@{name}: supplied `match_flags={bits}` contains unsupported or conflicting flags."
        ))
      })?,
      Some(other) => {
        return Err(Verdict::usage(format!(
          "@{name}: supplied `match_flags={other}` must be an integer."
        )));
      }
    };

    let constraint = match (message, pattern) {
      (Some(message), _) => MessageConstraint::Contains(message),
      (None, Some(pattern)) => {
        let regex = flags.build(&pattern).map_err(|err| {
          Verdict::usage(format!(
            "@{name}: supplied `match=\"{pattern}\"` is not a valid pattern: {err}"
          ))
        })?;
        MessageConstraint::Matches { pattern, regex }
      }
      (None, None) => MessageConstraint::Any,
    };

    Ok(Self {
      exception,
      constraint,
    })
  }

  /// Checks the string form of an exception already known to be of the expected class.
  pub fn check_message(&self, raised: &Exception) -> Result<(), Verdict> {
    let raised_message = raised.to_string();
    match &self.constraint {
      MessageConstraint::Any => Ok(()),
      MessageConstraint::Contains(message) => {
        if raised_message.contains(message.as_str()) {
          Ok(())
        } else {
          Err(Verdict::new(
            VerdictKind::MessageMismatch,
            format!("\"{message}\" not in \"{raised_message}\""),
          ))
        }
      }
      MessageConstraint::Matches { pattern, regex } => {
        // Leftmost-first search: a match anchored at the start exists iff the first one starts there.
        let at_start = regex
          .find(raised_message.as_bytes())
          .is_some_and(|m| m.start() == 0);
        if at_start {
          Ok(())
        } else {
          Err(Verdict::new(
            VerdictKind::MessageMismatch,
            format!("\"{pattern}\" does not match raised message \"{raised_message}\""),
          ))
        }
      }
    }
  }
}

fn plain(value: &MarkerValue) -> String {
  match value {
    MarkerValue::Str(s) => s.clone(),
    other => other.to_string(),
  }
}

fn optional_str(marker: &str, key: &str, value: &MarkerValue) -> Result<Option<String>, Verdict> {
  match value {
    MarkerValue::None => Ok(None),
    MarkerValue::Str(s) => Ok(Some(s.clone())),
    other => Err(Verdict::usage(format!(
      "@{marker}: supplied `{key}={other}` must be a string."
    ))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn value_error() -> Class {
    Class::builtin("ValueError").unwrap()
  }

  #[test]
  fn defaults_to_the_universal_exception() {
    let spec = ExpectationSpec::from_marker(&Marker::raises()).unwrap();
    assert_eq!(spec.exception, Class::exception());
    assert!(matches!(spec.constraint, MessageConstraint::Any));
  }

  #[test]
  fn instance_is_not_a_class() {
    let marker = Marker::raises().with_kwarg("exception", value_error().instantiate("x"));
    let verdict = ExpectationSpec::from_marker(&marker).unwrap_err();
    assert_eq!(verdict.kind, VerdictKind::UsageError);
    assert!(verdict.message.contains("must be a class"));
  }

  #[test]
  fn non_exception_class_is_rejected() {
    let marker = Marker::setup_raises().with_kwarg("exception", Class::object());
    let verdict = ExpectationSpec::from_marker(&marker).unwrap_err();
    assert_eq!(verdict.kind, VerdictKind::UsageError);
    assert_eq!(
      verdict.message,
      "@setup_raises: supplied `exception=object` is not a subclass of `BaseException`."
    );
  }

  #[test]
  fn message_and_match_are_exclusive() {
    let marker = Marker::raises()
      .with_kwarg("message", "a")
      .with_kwarg("match", "b");
    let verdict = ExpectationSpec::from_marker(&marker).unwrap_err();
    assert_eq!(verdict.kind, VerdictKind::UsageError);
    assert!(verdict.message.contains("message=\"a\""));
    assert!(verdict.message.contains("match=\"b\""));
  }

  #[test]
  fn empty_message_does_not_conflict_with_match() {
    let marker = Marker::raises()
      .with_kwarg("message", "")
      .with_kwarg("match", "b");
    let spec = ExpectationSpec::from_marker(&marker).unwrap();
    assert!(matches!(spec.constraint, MessageConstraint::Contains(ref m) if m.is_empty()));
  }

  #[test]
  fn match_is_anchored_at_the_start_only() {
    let marker = Marker::raises().with_kwarg("match", r"bad \w+");
    let spec = ExpectationSpec::from_marker(&marker).unwrap();
    assert!(spec
      .check_message(&value_error().instantiate("bad input, really"))
      .is_ok());
    let verdict = spec
      .check_message(&value_error().instantiate("really bad input"))
      .unwrap_err();
    assert_eq!(verdict.kind, VerdictKind::MessageMismatch);
    assert_eq!(
      verdict.message,
      "\"bad \\w+\" does not match raised message \"really bad input\""
    );
  }

  #[test]
  fn match_flags_are_applied() {
    let marker = Marker::raises()
      .with_kwarg("match", "BAD")
      .with_kwarg("match_flags", i64::from(MatchFlags::IGNORECASE.bits()));
    let spec = ExpectationSpec::from_marker(&marker).unwrap();
    assert!(spec.check_message(&value_error().instantiate("bad")).is_ok());

    let verbose = Marker::raises()
      .with_kwarg("match", "bad \\s+  # the word\n  input")
      .with_kwarg(
        "match_flags",
        i64::from((MatchFlags::VERBOSE | MatchFlags::IGNORECASE).bits()),
      );
    let spec = ExpectationSpec::from_marker(&verbose).unwrap();
    assert!(spec
      .check_message(&value_error().instantiate("Bad Input"))
      .is_ok());
  }

  #[test]
  fn unknown_flags_and_bad_patterns_are_usage_errors() {
    let marker = Marker::raises()
      .with_kwarg("match", "x")
      .with_kwarg("match_flags", 1_i64);
    assert_eq!(
      ExpectationSpec::from_marker(&marker).unwrap_err().kind,
      VerdictKind::UsageError
    );

    let marker = Marker::raises().with_kwarg("match", "(unclosed");
    let verdict = ExpectationSpec::from_marker(&marker).unwrap_err();
    assert_eq!(verdict.kind, VerdictKind::UsageError);
    assert!(verdict.message.contains("not a valid pattern"));
  }

  #[test]
  fn ascii_flag_accepts_any_pattern() {
    let marker = Marker::raises()
      .with_kwarg("match", "bad.*")
      .with_kwarg("match_flags", i64::from(MatchFlags::ASCII.bits()));
    let spec = ExpectationSpec::from_marker(&marker).unwrap();
    assert!(spec
      .check_message(&value_error().instantiate("bad input"))
      .is_ok());

    let word = Marker::raises()
      .with_kwarg("match", r"\w+$")
      .with_kwarg("match_flags", i64::from(MatchFlags::ASCII.bits()));
    let spec = ExpectationSpec::from_marker(&word).unwrap();
    assert!(spec.check_message(&value_error().instantiate("plain")).is_ok());
    assert!(spec.check_message(&value_error().instantiate("caf\u{e9}")).is_err());
  }

  #[test]
  fn unbalanced_parentheses_cannot_escape_the_start_anchor() {
    let marker = Marker::raises().with_kwarg("match", "a)|(b");
    let verdict = ExpectationSpec::from_marker(&marker).unwrap_err();
    assert_eq!(verdict.kind, VerdictKind::UsageError);
    assert!(verdict.message.contains("not a valid pattern"));

    let marker = Marker::raises().with_kwarg("match", "a|b");
    let spec = ExpectationSpec::from_marker(&marker).unwrap();
    assert!(spec.check_message(&value_error().instantiate("b later")).is_ok());
    assert!(spec.check_message(&value_error().instantiate("zzz b")).is_err());
  }

  #[test]
  fn verbose_pattern_may_end_in_a_comment() {
    let marker = Marker::raises()
      .with_kwarg("match", "bad  # trailing comment")
      .with_kwarg("match_flags", i64::from(MatchFlags::VERBOSE.bits()));
    let spec = ExpectationSpec::from_marker(&marker).unwrap();
    assert!(spec.check_message(&value_error().instantiate("bad input")).is_ok());
  }

  #[test]
  fn substring_mismatch_reports_both_messages() {
    let marker = Marker::raises().with_kwarg("message", "the message");
    let spec = ExpectationSpec::from_marker(&marker).unwrap();
    let verdict = spec
      .check_message(&value_error().instantiate("a different message"))
      .unwrap_err();
    assert_eq!(
      verdict.message,
      "\"the message\" not in \"a different message\""
    );
  }
}
