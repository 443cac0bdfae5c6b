//! Location string protocol for the Focus/Navigation Binder.
//!
//! The navigable location is a plain string of the form `{base}`,
//! `{base}/create`, or `{base}/{id}`. Parsing and formatting live here;
//! the one-way-sync rule that prevents feedback loops lives in the
//! coordinator.

use std::sync::{Arc, Mutex};

/// What a location string asks the coordinator to show.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocationAction {
    /// The order list with nothing focused.
    Base,
    /// The create-new-draft view.
    Create,
    /// A specific persisted order.
    View(String),
}

/// Parse a location against the configured base path. Locations outside the
/// base path are not ours and yield `None`.
pub fn parse_location(location: &str, base_path: &str) -> Option<LocationAction> {
    let location = location.trim_end_matches('/');
    let base = base_path.trim_end_matches('/');

    if location == base {
        return Some(LocationAction::Base);
    }
    let rest = location.strip_prefix(base)?.strip_prefix('/')?;
    if rest.is_empty() || rest.contains('/') {
        return None;
    }
    if rest == "create" {
        return Some(LocationAction::Create);
    }
    Some(LocationAction::View(rest.to_owned()))
}

pub fn format_location(action: &LocationAction, base_path: &str) -> String {
    let base = base_path.trim_end_matches('/');
    match action {
        LocationAction::Base => base.to_owned(),
        LocationAction::Create => format!("{base}/create"),
        LocationAction::View(id) => format!("{base}/{id}"),
    }
}

/// The navigable-location collaborator. The coordinator only ever pushes
/// change requests through it; location changes coming from the outside are
/// delivered to `Coordinator::on_location_changed` by the host.
pub trait LocationProvider: Send + Sync {
    fn request_change(&self, location: &str);
}

/// Test/demo provider that records every requested change.
#[derive(Clone, Default)]
pub struct RecordingLocationProvider {
    requests: Arc<Mutex<Vec<String>>>,
}

impl RecordingLocationProvider {
    pub fn requests(&self) -> Vec<String> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn last(&self) -> Option<String> {
        self.requests().last().cloned()
    }
}

impl LocationProvider for RecordingLocationProvider {
    fn request_change(&self, location: &str) {
        match self.requests.lock() {
            Ok(mut requests) => requests.push(location.to_owned()),
            Err(poisoned) => poisoned.into_inner().push(location.to_owned()),
        }
    }
}
