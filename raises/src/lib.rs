//! Declarative exception expectations for test runners.
//!
//! A test marked `raises` is expected to raise during its call phase, and a test marked
//! `setup_raises` during its setup phase. Both markers accept:
//!
//! - `exception`: the expected class (default `Exception`); subclasses match too
//! - `message`: a substring the exception's message must contain
//! - `match`: a pattern the message must match from its start
//! - `match_flags`: [`MatchFlags`] bits applied to `match`
//!
//! `message` and `match` are mutually exclusive.
//!
//! A host runner calls [`validate()`] (or drives [`RaisesPlugin`] through [`PhaseHooks`]) after each
//! phase. The [`validate`](mod@crate::validate) module documents the setup-to-call relay.

pub mod exception;
pub mod item;
pub mod marker;
pub mod outcome;
pub mod plugin;
pub mod signal;
pub mod validate;

pub use exception::{Class, ClassRegistry, ExcInfo, Exception, Frame, RegistryError, Traceback};
pub use item::{Relay, TestItem};
pub use marker::{
  ExpectationSpec, MatchFlags, Marker, MarkerValue, MessageConstraint, RAISES, RELAY_MARKER,
  SETUP_RAISES,
};
pub use outcome::PhaseOutcome;
pub use plugin::{MarkerError, MarkerRegistry, PhaseHooks, RaisesPlugin};
pub use signal::{Failed, Signal, Verdict, VerdictKind};
pub use validate::{validate, Phase};
