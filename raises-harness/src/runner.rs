use crate::declaration::{new_exception, parse_test_file, BodyDecl, MarkDecl, TestDecl};
use crate::discover::{read_utf8_file, DiscoveredFile};
use crate::report::{TestOutcome, TestResult};
use crate::select::{Filter, Shard};
use anyhow::{anyhow, bail, Context, Result};
use raises::{
  ClassRegistry, ExcInfo, Exception, Frame, Marker, MarkerRegistry, Phase, PhaseHooks,
  PhaseOutcome, TestItem, Traceback,
};
use std::collections::HashSet;
use tracing::{debug, info};

/// What one phase of a collected test does when run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
  Return(Option<String>),
  Raise(Exception),
}

impl Default for Body {
  fn default() -> Self {
    Body::Return(None)
  }
}

impl Body {
  fn run(&self, nodeid: &str, phase: Phase) -> PhaseOutcome {
    match self {
      Body::Return(value) => PhaseOutcome::success(value.clone()),
      Body::Raise(exception) => PhaseOutcome::raised_with(
        ExcInfo::new(exception.clone())
          .with_traceback(Traceback::new(vec![Frame::new(nodeid, phase.as_str())])),
      ),
    }
  }
}

#[derive(Debug, Clone)]
pub struct TestCase {
  pub item: TestItem,
  pub skip: Option<String>,
  pub setup: Body,
  pub call: Body,
}

/// Parses every file and expands tests (and their parametrized cases) into items.
pub fn collect_cases(files: &[DiscoveredFile], markers: &MarkerRegistry) -> Result<Vec<TestCase>> {
  let mut cases = Vec::new();
  for file in files {
    let raw = read_utf8_file(&file.path)?;
    let collected =
      collect_file(&file.id, &raw, markers).with_context(|| format!("collect {}", file.id))?;
    cases.extend(collected);
  }
  info!(items = cases.len(), files = files.len(), "collected");
  Ok(cases)
}

pub fn collect_file(file_id: &str, raw: &str, markers: &MarkerRegistry) -> Result<Vec<TestCase>> {
  let file = parse_test_file(raw)?;
  let classes = file.class_registry()?;
  let file_marks = to_markers(&file.marks, &classes, markers)?;

  let mut cases = Vec::new();
  for test in &file.tests {
    cases.extend(
      expand_test(file_id, test, &file_marks, &classes, markers)
        .with_context(|| format!("test `{}`", test.name))?,
    );
  }

  let mut seen = HashSet::new();
  for case in &cases {
    if !seen.insert(case.item.nodeid()) {
      bail!("duplicate test id `{}`", case.item.nodeid());
    }
  }
  Ok(cases)
}

fn expand_test(
  file_id: &str,
  test: &TestDecl,
  file_marks: &[Marker],
  classes: &ClassRegistry,
  markers: &MarkerRegistry,
) -> Result<Vec<TestCase>> {
  let test_marks = to_markers(&test.marks, classes, markers)?;
  let setup = to_body(test.setup.as_ref(), classes).context("setup")?;
  let call = to_body(test.call.as_ref(), classes).context("call")?;

  let base_id = format!("{file_id}::{}", test.name);
  let build = |nodeid: String, case_marks: Vec<Marker>, setup: Body, call: Body| {
    let mut item = TestItem::new(nodeid);
    // Per-case marks are the closest declarations, then the test's, then the file's.
    for marker in case_marks.into_iter().chain(test_marks.iter().cloned()) {
      item.add_marker(marker);
    }
    for marker in file_marks {
      item.inherit_marker(marker.clone());
    }
    TestCase {
      item,
      skip: test.skip.clone(),
      setup,
      call,
    }
  };

  if test.params.is_empty() {
    return Ok(vec![build(base_id, Vec::new(), setup, call)]);
  }

  let mut cases = Vec::with_capacity(test.params.len());
  for param in &test.params {
    let context = || format!("param `{}`", param.id);
    let case_marks = to_markers(&param.marks, classes, markers).with_context(context)?;
    let case_setup = match &param.setup {
      Some(decl) => to_body(Some(decl), classes).with_context(context)?,
      None => setup.clone(),
    };
    let case_call = match &param.call {
      Some(decl) => to_body(Some(decl), classes).with_context(context)?,
      None => call.clone(),
    };
    cases.push(build(
      format!("{base_id}[{}]", param.id),
      case_marks,
      case_setup,
      case_call,
    ));
  }
  Ok(cases)
}

fn to_markers(
  decls: &[MarkDecl],
  classes: &ClassRegistry,
  markers: &MarkerRegistry,
) -> Result<Vec<Marker>> {
  decls
    .iter()
    .map(|decl| {
      markers.check(decl.name()?)?;
      decl.to_marker(classes)
    })
    .collect()
}

fn to_body(decl: Option<&BodyDecl>, classes: &ClassRegistry) -> Result<Body> {
  let Some(decl) = decl else {
    return Ok(Body::default());
  };
  match (&decl.raise, &decl.returns) {
    (Some(_), Some(_)) => Err(anyhow!("a phase may `raise` or `return`, not both")),
    (Some(class), None) => Ok(Body::Raise(new_exception(classes, class, &decl.message)?)),
    (None, returns) => Ok(Body::Return(returns.clone())),
  }
}

pub fn select_cases(
  cases: Vec<TestCase>,
  filter: &Filter,
  shard: Option<Shard>,
) -> Result<Vec<TestCase>> {
  let total = cases.len();
  let filtered: Vec<_> = cases
    .into_iter()
    .filter(|case| filter.matches(case.item.nodeid()))
    .collect();
  let selected = match shard {
    Some(shard) => shard.apply(filtered),
    None => filtered,
  };
  if selected.is_empty() {
    bail!("no tests selected out of {total} collected");
  }
  Ok(selected)
}

/// Runs the cases in order. Each item gets exactly one setup and (if setup succeeded) one call.
pub fn run_cases(cases: Vec<TestCase>, hooks: &[Box<dyn PhaseHooks>]) -> Vec<TestResult> {
  cases
    .into_iter()
    .map(|mut case| {
      let result = run_case(&mut case, hooks);
      debug!(nodeid = %result.nodeid, outcome = %result.outcome, "finished");
      result
    })
    .collect()
}

pub fn run_case(case: &mut TestCase, hooks: &[Box<dyn PhaseHooks>]) -> TestResult {
  let nodeid = case.item.nodeid().to_string();
  let finish = |outcome: TestOutcome, message: Option<String>| TestResult {
    nodeid: nodeid.clone(),
    outcome,
    message,
  };

  if let Some(reason) = &case.skip {
    return finish(TestOutcome::Skipped, Some(reason.clone()));
  }

  // Anything that goes wrong during setup is an error in the test's fixtures, not a failure.
  let mut setup = case.setup.run(&nodeid, Phase::Setup);
  for hook in hooks {
    if let Err(failed) = hook.after_setup(&mut case.item, &mut setup) {
      return finish(TestOutcome::Error, Some(failed.message));
    }
  }
  if let Some(excinfo) = setup.excinfo() {
    return finish(TestOutcome::Error, Some(excinfo.render()));
  }

  let mut call = case.call.run(&nodeid, Phase::Call);
  for hook in hooks {
    if let Err(failed) = hook.after_call(&mut case.item, &mut call) {
      return finish(TestOutcome::Failed, Some(failed.message));
    }
  }
  match call.excinfo() {
    Some(excinfo) => finish(TestOutcome::Failed, Some(excinfo.render())),
    None => finish(TestOutcome::Passed, None),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::select::build_filter;
  use raises::RaisesPlugin;

  fn registry() -> MarkerRegistry {
    let mut registry = MarkerRegistry::new(true);
    RaisesPlugin.configure(&mut registry);
    registry
  }

  fn hooks() -> Vec<Box<dyn PhaseHooks>> {
    vec![Box::new(RaisesPlugin)]
  }

  fn run_file(raw: &str) -> Vec<TestResult> {
    let cases = collect_file("suite.yaml", raw, &registry()).unwrap();
    run_cases(cases, &hooks())
  }

  fn outcomes(results: &[TestResult]) -> Vec<(&str, TestOutcome)> {
    results
      .iter()
      .map(|r| (r.nodeid.as_str(), r.outcome))
      .collect()
  }

  #[test]
  fn mark_raises_named_general_and_unmarked() {
    let results = run_file(
      r#"
classes: { SomeException: Exception, AnotherException: Exception }
tests:
  - name: test_mark_raises_named
    marks: [{ raises: { exception: SomeException } }]
    call: { raise: SomeException, message: the message }
  - name: test_mark_raises_general
    marks: [raises]
    call: { raise: AnotherException, message: the message }
  - name: test_exception
    call: { raise: SomeException, message: the message }
"#,
    );
    assert_eq!(
      outcomes(&results),
      vec![
        ("suite.yaml::test_mark_raises_named", TestOutcome::Passed),
        ("suite.yaml::test_mark_raises_general", TestOutcome::Passed),
        ("suite.yaml::test_exception", TestOutcome::Failed),
      ]
    );
    assert_eq!(
      results[2].message.as_deref(),
      Some("SomeException: the message\n  at call (suite.yaml::test_exception)")
    );
  }

  #[test]
  fn parametrized_cases_carry_their_own_marks() {
    let results = run_file(
      r#"
classes: { SomeException: Exception, AnotherException: Exception }
tests:
  - name: test_mark_raises
    params:
      - id: none
      - id: error1
        marks: [{ raises: { exception: SomeException } }]
        call: { raise: SomeException, message: the message }
      - id: error2
        marks: [raises]
        call: { raise: Exception, message: the message }
      - id: error3
        marks: [{ raises: { exception: SomeException } }]
        call: { raise: AnotherException, message: the message }
      - id: error4
        call: { raise: SomeException, message: the message }
"#,
    );
    assert_eq!(
      outcomes(&results),
      vec![
        ("suite.yaml::test_mark_raises[none]", TestOutcome::Passed),
        ("suite.yaml::test_mark_raises[error1]", TestOutcome::Passed),
        ("suite.yaml::test_mark_raises[error2]", TestOutcome::Passed),
        ("suite.yaml::test_mark_raises[error3]", TestOutcome::Failed),
        ("suite.yaml::test_mark_raises[error4]", TestOutcome::Failed),
      ]
    );
    let mismatch = results[3].message.as_deref().unwrap();
    assert!(mismatch.starts_with(
      "ExpectedException: Expected exception of type SomeException, but got exception of type AnotherException with message: the message"
    ));
    // The signal keeps the traceback of the exception that was actually raised.
    assert!(mismatch.ends_with("at call (suite.yaml::test_mark_raises[error3])"));
  }

  #[test]
  fn setup_raises_relays_into_the_call_phase() {
    let results = run_file(
      r#"
tests:
  - name: test_setup_ok
    marks: [{ setup_raises: { exception: ValueError } }]
    setup: { raise: ValueError, message: fixture broke }
  - name: test_setup_silent
    marks: [setup_raises]
  - name: test_setup_unmarked
    setup: { raise: ValueError, message: fixture broke }
"#,
    );
    assert_eq!(
      outcomes(&results),
      vec![
        ("suite.yaml::test_setup_ok", TestOutcome::Passed),
        ("suite.yaml::test_setup_silent", TestOutcome::Failed),
        ("suite.yaml::test_setup_unmarked", TestOutcome::Error),
      ]
    );
    assert_eq!(
      results[1].message.as_deref(),
      Some("ExpectedException: Expected exception Exception, but it did not raise")
    );
  }

  #[test]
  fn setup_usage_errors_surface_as_call_failures() {
    let results = run_file(
      r#"
tests:
  - name: test_both_markers
    marks: [{ setup_raises: { exception: ValueError } }, raises]
    setup: { raise: ValueError, message: fixture broke }
  - name: test_message_and_match
    marks: [{ setup_raises: { message: a, match: b } }]
    setup: { raise: ValueError, message: a b }
"#,
    );
    assert_eq!(
      outcomes(&results),
      vec![
        ("suite.yaml::test_both_markers", TestOutcome::Failed),
        ("suite.yaml::test_message_and_match", TestOutcome::Failed),
      ]
    );
    assert_eq!(
      results[0].message.as_deref(),
      Some("RaisesUsageError: @setup_raises: cannot be combined with @raises on the same test.")
    );
    assert_eq!(
      results[1].message.as_deref(),
      Some("RaisesUsageError: @setup_raises: only `message=\"a\"` *OR* `match=\"b\"` allowed, not both.")
    );
  }

  #[test]
  fn file_marks_are_inherited_and_shadowed() {
    let results = run_file(
      r#"
marks: [{ raises: { exception: KeyError } }]
tests:
  - name: test_inherits
    call: { raise: KeyError, message: k }
  - name: test_shadows
    marks: [{ raises: { exception: ValueError } }]
    call: { raise: ValueError, message: v }
"#,
    );
    assert!(results.iter().all(|r| r.outcome == TestOutcome::Passed));
  }

  #[test]
  fn skipped_tests_never_run_their_phases() {
    let results = run_file(
      "tests:\n  - name: t\n    skip: not today\n    marks: [raises]\n",
    );
    assert_eq!(results[0].outcome, TestOutcome::Skipped);
    assert_eq!(results[0].message.as_deref(), Some("not today"));
  }

  #[test]
  fn collection_errors() {
    let registry = registry();
    let err = collect_file("s.yaml", "tests:\n  - name: t\n    marks: [rasies]\n", &registry)
      .unwrap_err();
    assert!(format!("{err:#}").contains("'rasies' not found"));

    let err = collect_file(
      "s.yaml",
      "tests:\n  - name: t\n    marks: [setup_raises_expected_exc_or_message_not_found]\n",
      &registry,
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains("reserved"));

    let err = collect_file(
      "s.yaml",
      "tests:\n  - name: t\n  - name: t\n",
      &registry,
    )
    .unwrap_err();
    assert!(err.to_string().contains("duplicate test id"));

    let err = collect_file(
      "s.yaml",
      "tests:\n  - name: t\n    call: { raise: ValueError, return: x }\n",
      &registry,
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains("not both"));
  }

  #[test]
  fn selection_filters_then_shards() {
    let raw = "tests:\n  - name: a\n  - name: b\n  - name: c\n";
    let cases = collect_file("s.yaml", raw, &registry()).unwrap();

    let filter = build_filter(Some("s.yaml::[ab]")).unwrap();
    let shard = Some(Shard { index: 1, total: 2 });
    let selected = select_cases(cases.clone(), &filter, shard).unwrap();
    let ids: Vec<_> = selected.iter().map(|c| c.item.nodeid()).collect();
    assert_eq!(ids, vec!["s.yaml::b"]);

    let none = build_filter(Some("zzz")).unwrap();
    assert!(select_cases(cases, &none, None).is_err());
  }
}
