//! Folding contributions for one target into a single payload.
//!
//! [`ShallowMerger`] is the default policy; [`DeepMerger`] is the built-in
//! alternative. Hosts can plug in their own [`Merger`] either for the whole
//! registry or for a single target package.

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::contribution::{describe, ConfigContribution};
use crate::error::{MacroError, MacroResult};
use crate::package::PackageIdentity;

/// Reducer over the contributions registered for one target.
///
/// Contributions arrive in registration order. Implementations must be pure:
/// the same input sequence always produces the same payload.
pub trait Merger: Send + Sync {
    fn merge(
        &self,
        target: &PackageIdentity,
        contributions: &[&ConfigContribution],
    ) -> MacroResult<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Object,
    Array,
    Scalar,
}

impl Shape {
    fn of(value: &Value) -> Self {
        match value {
            Value::Object(_) => Shape::Object,
            Value::Array(_) => Shape::Array,
            _ => Shape::Scalar,
        }
    }
}

fn payload_object<'a>(
    target: &PackageIdentity,
    contribution: &'a ConfigContribution,
) -> MacroResult<&'a Map<String, Value>> {
    contribution
        .payload()
        .as_object()
        .ok_or_else(|| MacroError::InvalidPayload {
            origin: contribution.origin().to_string(),
            target: target.to_string(),
            found: describe(contribution.payload()).to_string(),
        })
}

fn conflict(
    target: &PackageIdentity,
    key: &str,
    first: &PackageIdentity,
    second: &PackageIdentity,
) -> MacroError {
    MacroError::MergeConflict {
        target: target.to_string(),
        key: key.to_string(),
        first_origin: first.to_string(),
        second_origin: second.to_string(),
    }
}

/// Shallow merge, last write wins.
///
/// A key may change value freely but not shape: object, array and scalar are
/// three distinct shapes and switching between them is a `MergeConflict`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShallowMerger;

impl Merger for ShallowMerger {
    fn merge(
        &self,
        target: &PackageIdentity,
        contributions: &[&ConfigContribution],
    ) -> MacroResult<Value> {
        let mut acc = Map::new();
        let mut writers: HashMap<&str, &PackageIdentity> = HashMap::new();

        for contribution in contributions {
            for (key, value) in payload_object(target, contribution)? {
                if let Some(existing) = acc.get(key) {
                    if Shape::of(existing) != Shape::of(value) {
                        let first = writers.get(key.as_str()).copied().unwrap_or(target);
                        return Err(conflict(target, key, first, contribution.origin()));
                    }
                }
                acc.insert(key.clone(), value.clone());
                writers.insert(key.as_str(), contribution.origin());
            }
        }

        Ok(Value::Object(acc))
    }
}

/// Recursive merge: nested objects combine key by key, arrays and scalars
/// are replaced. Shape changes are conflicts, reported with a dotted key path.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeepMerger;

impl DeepMerger {
    fn merge_into<'a>(
        target: &PackageIdentity,
        acc: &mut Map<String, Value>,
        incoming: &Map<String, Value>,
        origin: &'a PackageIdentity,
        prefix: &str,
        writers: &mut HashMap<String, &'a PackageIdentity>,
    ) -> MacroResult<()> {
        for (key, value) in incoming {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };

            match (acc.get_mut(key), value) {
                (Some(Value::Object(existing)), Value::Object(nested)) => {
                    Self::merge_into(target, existing, nested, origin, &path, writers)?;
                }
                (Some(existing), _) if Shape::of(existing) != Shape::of(value) => {
                    let first = writers.get(&path).copied().unwrap_or(target);
                    return Err(conflict(target, &path, first, origin));
                }
                _ => {
                    acc.insert(key.clone(), value.clone());
                }
            }
            writers.insert(path, origin);
        }
        Ok(())
    }
}

impl Merger for DeepMerger {
    fn merge(
        &self,
        target: &PackageIdentity,
        contributions: &[&ConfigContribution],
    ) -> MacroResult<Value> {
        let mut acc = Map::new();
        let mut writers = HashMap::new();

        for contribution in contributions {
            let incoming = payload_object(target, contribution)?;
            Self::merge_into(
                target,
                &mut acc,
                incoming,
                contribution.origin(),
                "",
                &mut writers,
            )?;
        }

        Ok(Value::Object(acc))
    }
}
