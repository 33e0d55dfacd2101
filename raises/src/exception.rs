//! The exception model the validator reasons about.
//!
//! A [`Class`] is a named type with at most one base class. Exception classes are the classes that
//! descend from [`Class::base_exception`]; everything else (e.g. `object` itself) is still a class
//! but cannot be raised or expected.

use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

static OBJECT: Lazy<Class> = Lazy::new(|| Class::root("object"));
static BASE_EXCEPTION: Lazy<Class> = Lazy::new(|| Class::new("BaseException", &OBJECT));
static EXCEPTION: Lazy<Class> = Lazy::new(|| Class::new("Exception", &BASE_EXCEPTION));
static BUILTINS: Lazy<ClassRegistry> = Lazy::new(ClassRegistry::build_builtins);

/// `(name, base)` pairs for the built-in classes below `Exception`/`BaseException`, ordered so
/// every base is defined before its subclasses.
const BUILTIN_HIERARCHY: &[(&str, &str)] = &[
  ("KeyboardInterrupt", "BaseException"),
  ("SystemExit", "BaseException"),
  ("ArithmeticError", "Exception"),
  ("ZeroDivisionError", "ArithmeticError"),
  ("AssertionError", "Exception"),
  ("LookupError", "Exception"),
  ("IndexError", "LookupError"),
  ("KeyError", "LookupError"),
  ("OSError", "Exception"),
  ("RuntimeError", "Exception"),
  ("NotImplementedError", "RuntimeError"),
  ("TypeError", "Exception"),
  ("ValueError", "Exception"),
];

/// Classes compare by identity: two separately defined classes are distinct even when their names
/// and bases agree.
#[derive(Clone)]
pub struct Class(Arc<ClassInner>);

struct ClassInner {
  name: String,
  base: Option<Class>,
}

impl Class {
  pub fn new(name: impl Into<String>, base: &Class) -> Self {
    Self(Arc::new(ClassInner {
      name: name.into(),
      base: Some(base.clone()),
    }))
  }

  fn root(name: &str) -> Self {
    Self(Arc::new(ClassInner {
      name: name.to_string(),
      base: None,
    }))
  }

  /// The root of every class hierarchy.
  pub fn object() -> Self {
    Class::clone(&OBJECT)
  }

  /// The base exception concept; only its subclasses may be expected by a marker.
  pub fn base_exception() -> Self {
    Class::clone(&BASE_EXCEPTION)
  }

  /// The universal exception type, used when a marker does not name one.
  pub fn exception() -> Self {
    Class::clone(&EXCEPTION)
  }

  /// Looks up one of the built-in classes by name.
  pub fn builtin(name: &str) -> Option<Self> {
    BUILTINS.get(name).cloned()
  }

  pub fn name(&self) -> &str {
    &self.0.name
  }

  pub fn base(&self) -> Option<&Class> {
    self.0.base.as_ref()
  }

  /// Iterates `self` followed by each base class up to the root.
  pub fn ancestors(&self) -> Ancestors<'_> {
    Ancestors { next: Some(self) }
  }

  /// Reflexive: a class is a subclass of itself.
  pub fn is_subclass_of(&self, other: &Class) -> bool {
    self.ancestors().any(|class| class == other)
  }

  pub fn is_exception_class(&self) -> bool {
    self.is_subclass_of(&BASE_EXCEPTION)
  }

  pub fn instantiate(&self, message: impl Into<String>) -> Exception {
    Exception::new(self.clone(), message)
  }
}

impl PartialEq for Class {
  fn eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.0, &other.0)
  }
}

impl Eq for Class {}

impl Hash for Class {
  fn hash<H: Hasher>(&self, state: &mut H) {
    Arc::as_ptr(&self.0).hash(state);
  }
}

impl fmt::Debug for Class {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Class({})", self.name())
  }
}

impl fmt::Display for Class {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

pub struct Ancestors<'a> {
  next: Option<&'a Class>,
}

impl<'a> Iterator for Ancestors<'a> {
  type Item = &'a Class;

  fn next(&mut self) -> Option<&'a Class> {
    let current = self.next?;
    self.next = current.base();
    Some(current)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
  #[error("cannot define class `{name}`: unknown base class `{base}`")]
  UnknownBase { name: String, base: String },
  #[error("class `{0}` is already defined")]
  Duplicate(String),
}

/// Name-indexed set of classes, seeded with the built-ins.
#[derive(Debug, Clone, Default)]
pub struct ClassRegistry {
  classes: BTreeMap<String, Class>,
}

impl ClassRegistry {
  pub fn with_builtins() -> Self {
    ClassRegistry::clone(&BUILTINS)
  }

  fn build_builtins() -> Self {
    let mut registry = Self::default();
    for class in [Class::object(), Class::base_exception(), Class::exception()] {
      registry.classes.insert(class.name().to_string(), class);
    }
    for (name, base) in BUILTIN_HIERARCHY {
      // The table is ordered so every base exists before it is referenced.
      if let Err(err) = registry.define(name, base) {
        unreachable!("built-in class table is inconsistent: {err}");
      }
    }
    registry
  }

  pub fn get(&self, name: &str) -> Option<&Class> {
    self.classes.get(name)
  }

  pub fn define(&mut self, name: &str, base: &str) -> Result<Class, RegistryError> {
    if self.classes.contains_key(name) {
      return Err(RegistryError::Duplicate(name.to_string()));
    }
    let Some(base_class) = self.classes.get(base) else {
      return Err(RegistryError::UnknownBase {
        name: name.to_string(),
        base: base.to_string(),
      });
    };
    let class = Class::new(name, base_class);
    self.classes.insert(name.to_string(), class.clone());
    Ok(class)
  }

  pub fn iter(&self) -> impl Iterator<Item = &Class> {
    self.classes.values()
  }
}

/// A raised (or declared) exception instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
  class: Class,
  message: String,
}

impl Exception {
  pub fn new(class: Class, message: impl Into<String>) -> Self {
    Self {
      class,
      message: message.into(),
    }
  }

  pub fn class(&self) -> &Class {
    &self.class
  }

  pub fn message(&self) -> &str {
    &self.message
  }

  pub fn is_instance_of(&self, class: &Class) -> bool {
    self.class.is_subclass_of(class)
  }
}

/// The string form of an exception is its message, without the class name.
impl fmt::Display for Exception {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.message)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
  pub location: String,
  pub function: String,
}

impl Frame {
  pub fn new(location: impl Into<String>, function: impl Into<String>) -> Self {
    Self {
      location: location.into(),
      function: function.into(),
    }
  }
}

/// Innermost frame last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Traceback {
  frames: Vec<Frame>,
}

impl Traceback {
  pub fn new(frames: Vec<Frame>) -> Self {
    Self { frames }
  }

  pub fn push(&mut self, frame: Frame) {
    self.frames.push(frame);
  }

  pub fn frames(&self) -> &[Frame] {
    &self.frames
  }

  pub fn is_empty(&self) -> bool {
    self.frames.is_empty()
  }
}

impl fmt::Display for Traceback {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for frame in &self.frames {
      writeln!(f, "  at {} ({})", frame.function, frame.location)?;
    }
    Ok(())
  }
}

/// An exception together with where it was raised, if known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcInfo {
  pub exception: Exception,
  pub traceback: Option<Traceback>,
}

impl ExcInfo {
  pub fn new(exception: Exception) -> Self {
    Self {
      exception,
      traceback: None,
    }
  }

  pub fn with_traceback(mut self, traceback: Traceback) -> Self {
    self.traceback = Some(traceback);
    self
  }

  /// Renders `Class: message` followed by the traceback frames, if any.
  pub fn render(&self) -> String {
    let mut out = format!("{}: {}", self.exception.class(), self.exception);
    if let Some(traceback) = self.traceback.as_ref().filter(|tb| !tb.is_empty()) {
      out.push('\n');
      out.push_str(traceback.to_string().trim_end());
    }
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builtin_hierarchy_is_connected() {
    let zero = Class::builtin("ZeroDivisionError").unwrap();
    assert!(zero.is_subclass_of(&Class::builtin("ArithmeticError").unwrap()));
    assert!(zero.is_subclass_of(&Class::exception()));
    assert!(zero.is_exception_class());
    assert!(!Class::exception().is_subclass_of(&zero));

    let interrupt = Class::builtin("KeyboardInterrupt").unwrap();
    assert!(interrupt.is_exception_class());
    assert!(!interrupt.is_subclass_of(&Class::exception()));

    assert!(!Class::object().is_exception_class());
  }

  #[test]
  fn ancestors_walk_to_the_root() {
    let key = Class::builtin("KeyError").unwrap();
    let names: Vec<_> = key.ancestors().map(|c| c.name().to_string()).collect();
    assert_eq!(
      names,
      vec!["KeyError", "LookupError", "Exception", "BaseException", "object"]
    );
  }

  #[test]
  fn registry_defines_user_classes() {
    let mut registry = ClassRegistry::with_builtins();
    let some = registry.define("SomeException", "Exception").unwrap();
    assert!(some.is_exception_class());
    assert_eq!(registry.get("SomeException"), Some(&some));

    let widget = registry.define("Widget", "object").unwrap();
    assert!(!widget.is_exception_class());

    assert_eq!(
      registry.define("SomeException", "Exception").unwrap_err(),
      RegistryError::Duplicate("SomeException".to_string())
    );
    assert!(matches!(
      registry.define("Orphan", "Missing"),
      Err(RegistryError::UnknownBase { .. })
    ));
  }

  #[test]
  fn classes_compare_by_identity() {
    let mut first = ClassRegistry::with_builtins();
    let mut second = ClassRegistry::with_builtins();
    let a = first.define("SomeException", "Exception").unwrap();
    let b = second.define("SomeException", "Exception").unwrap();
    assert_ne!(a, b);
    assert!(!a.instantiate("x").is_instance_of(&b));
    assert_eq!(a, a.clone());
    assert_eq!(first.get("ValueError"), second.get("ValueError"));
  }

  #[test]
  fn exception_string_form_is_the_message() {
    let err = Class::builtin("ValueError").unwrap().instantiate("bad input");
    assert_eq!(err.to_string(), "bad input");
    assert!(err.is_instance_of(&Class::exception()));

    let info = ExcInfo::new(err).with_traceback(Traceback::new(vec![Frame::new(
      "suite.yaml::test_parse",
      "call",
    )]));
    assert_eq!(
      info.render(),
      "ValueError: bad input\n  at call (suite.yaml::test_parse)"
    );
  }
}
