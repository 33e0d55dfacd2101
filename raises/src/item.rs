use crate::marker::Marker;

/// The deferred failure recorded by the setup phase for the call phase of the same item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relay {
  pub message: String,
}

/// A collected test (or one parametrized case of a test).
#[derive(Debug, Clone, Default)]
pub struct TestItem {
  nodeid: String,
  own_markers: Vec<Marker>,
  inherited_markers: Vec<Marker>,
  relay: Option<Relay>,
}

impl TestItem {
  pub fn new(nodeid: impl Into<String>) -> Self {
    Self {
      nodeid: nodeid.into(),
      ..Self::default()
    }
  }

  pub fn nodeid(&self) -> &str {
    &self.nodeid
  }

  pub fn add_marker(&mut self, marker: Marker) {
    self.own_markers.push(marker);
  }

  /// Markers declared on an enclosing scope (file, group); consulted after the item's own.
  pub fn inherit_marker(&mut self, marker: Marker) {
    self.inherited_markers.push(marker);
  }

  pub fn own_markers(&self) -> &[Marker] {
    &self.own_markers
  }

  /// The nearest declaration of `name`: the item's own markers first, then enclosing scopes.
  pub fn get_closest_marker(&self, name: &str) -> Option<&Marker> {
    self
      .own_markers
      .iter()
      .chain(self.inherited_markers.iter())
      .find(|marker| marker.name() == name)
  }

  pub fn has_relay(&self) -> bool {
    self.relay.is_some()
  }

  /// Records a deferred failure. Only the first relay per item is kept.
  pub fn attach_relay(&mut self, message: impl Into<String>) {
    if self.relay.is_none() {
      self.relay = Some(Relay {
        message: message.into(),
      });
    }
  }

  /// Consumes the relay, leaving the slot empty.
  pub fn take_relay(&mut self) -> Option<Relay> {
    self.relay.take()
  }
}
