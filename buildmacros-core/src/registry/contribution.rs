//! Immutable configuration contributions.

use serde_json::Value;

use crate::package::PackageIdentity;

/// "`origin` configured `target` with `payload`."
///
/// Created at registration and never mutated afterwards. The sequence number
/// records registration order, which is the fold order used by mergers.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigContribution {
    target: PackageIdentity,
    origin: PackageIdentity,
    payload: Value,
    sequence: usize,
}

impl ConfigContribution {
    pub(crate) fn new(
        origin: PackageIdentity,
        target: PackageIdentity,
        payload: Value,
        sequence: usize,
    ) -> Self {
        Self {
            target,
            origin,
            payload,
            sequence,
        }
    }

    pub fn target(&self) -> &PackageIdentity {
        &self.target
    }

    pub fn origin(&self) -> &PackageIdentity {
        &self.origin
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn sequence(&self) -> usize {
        self.sequence
    }

    /// Config a package declared for its own consumption.
    pub fn is_self_declared(&self) -> bool {
        self.origin == self.target
    }
}

/// Short description of a JSON value's shape, for error messages.
pub(crate) fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
