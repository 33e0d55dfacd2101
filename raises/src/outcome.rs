use crate::exception::{ExcInfo, Exception, Traceback};

/// The result of running one phase of a test.
///
/// A finalized outcome is either successful (no exception) or carries exactly one
/// exception/traceback pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseOutcome {
  excinfo: Option<ExcInfo>,
  result: Option<String>,
}

impl PhaseOutcome {
  pub fn success(result: Option<String>) -> Self {
    Self {
      excinfo: None,
      result,
    }
  }

  pub fn raised_with(excinfo: ExcInfo) -> Self {
    Self {
      excinfo: Some(excinfo),
      result: None,
    }
  }

  pub fn excinfo(&self) -> Option<&ExcInfo> {
    self.excinfo.as_ref()
  }

  pub fn raised(&self) -> Option<&Exception> {
    self.excinfo.as_ref().map(|info| &info.exception)
  }

  pub fn traceback(&self) -> Option<&Traceback> {
    self.excinfo.as_ref().and_then(|info| info.traceback.as_ref())
  }

  pub fn result(&self) -> Option<&str> {
    self.result.as_deref()
  }

  /// Overrides the phase's result, discarding any raised exception.
  pub fn force_result(&mut self, result: Option<String>) {
    self.excinfo = None;
    self.result = result;
  }

  /// Replaces whatever the phase produced with a single raised exception.
  pub fn set_excinfo(&mut self, excinfo: ExcInfo) {
    self.result = None;
    self.excinfo = Some(excinfo);
  }

  pub fn is_success(&self) -> bool {
    self.excinfo.is_none()
  }
}
