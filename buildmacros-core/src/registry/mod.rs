//! Per-package configuration registry.
//!
//! The registry has two phases. During setup, config producers call
//! [`ConfigRegistry::register`]. The first read (or an explicit
//! [`ConfigRegistry::seal`]) ends that phase for good: later registrations
//! fail with `LateRegistration`, which keeps every merged result a pure
//! function of a fixed set of contributions. The sealed flag lives under the
//! same lock as the contributions, so a registration racing a first read
//! either lands before the merge or is rejected.
//!
//! # Exposure rule
//!
//! A package only ever sees contributions it declared for itself
//! (`origin == target`). [`ConfigRegistry::get_config`] returns exactly what
//! [`ConfigRegistry::get_own_config`] returns for the target, after checking
//! that the requester depends on it. Contributions aimed at a package by some
//! other origin are kept for inspection but never merged.
//!
//! ```text
//! register(origin, target, payload) ──► contributions (append-only)
//!                                            │  seal on first read
//!                                            ▼
//!          get_own_config(pkg) ◄── merge(self-declared for pkg) ── memo
//!          get_config(req, pkg) ── authorise(req → pkg) ──┘
//! ```

mod contribution;
mod merger;

pub use contribution::ConfigContribution;
pub use merger::{DeepMerger, Merger, ShallowMerger};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tracing::debug;

use crate::error::{MacroError, MacroResult};
use crate::package::PackageIdentity;
use crate::resolver::DependencyResolver;
pub(crate) use contribution::describe;

#[derive(Default)]
struct RegistryState {
    sealed: bool,
    contributions: Vec<ConfigContribution>,
    mergers: HashMap<PackageIdentity, Arc<dyn Merger>>,
}

/// Shared store of configuration contributions for one build.
pub struct ConfigRegistry {
    default_merger: Arc<dyn Merger>,
    state: RwLock<RegistryState>,
    merged: Mutex<HashMap<PackageIdentity, MacroResult<Arc<Value>>>>,
}

impl Default for ConfigRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConfigRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigRegistry")
            .field("contributions", &self.len())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

impl ConfigRegistry {
    /// Registry using the default [`ShallowMerger`].
    pub fn new() -> Self {
        Self::with_merger(ShallowMerger)
    }

    /// Registry using `merger` for every target without an override.
    pub fn with_merger(merger: impl Merger + 'static) -> Self {
        Self {
            default_merger: Arc::new(merger),
            state: RwLock::new(RegistryState::default()),
            merged: Mutex::new(HashMap::new()),
        }
    }

    /// Append a contribution: `origin` configures `target` with `payload`.
    pub fn register(
        &self,
        origin: PackageIdentity,
        target: PackageIdentity,
        payload: Value,
    ) -> MacroResult<()> {
        if !payload.is_object() {
            return Err(MacroError::InvalidPayload {
                origin: origin.to_string(),
                target: target.to_string(),
                found: describe(&payload).to_string(),
            });
        }

        let mut state = self.write_state();
        if state.sealed {
            return Err(MacroError::LateRegistration {
                origin: origin.to_string(),
                target: target.to_string(),
            });
        }
        let sequence = state.contributions.len();
        debug!(origin = %origin, target = %target, sequence, "config registered");
        state
            .contributions
            .push(ConfigContribution::new(origin, target, payload, sequence));
        Ok(())
    }

    /// Use `merger` instead of the default when merging config for `target`.
    pub fn use_merger(
        &self,
        target: PackageIdentity,
        merger: impl Merger + 'static,
    ) -> MacroResult<()> {
        let mut state = self.write_state();
        if state.sealed {
            return Err(MacroError::LateRegistration {
                origin: target.to_string(),
                target: target.to_string(),
            });
        }
        state.mergers.insert(target, Arc::new(merger));
        Ok(())
    }

    /// End the registration phase.
    pub fn seal(&self) {
        self.write_state().sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.read_state().sealed
    }

    pub fn len(&self) -> usize {
        self.read_state().contributions.len()
    }

    fn read_state(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every contribution aimed at `target`, in registration order.
    pub fn contributions_for(&self, target: &PackageIdentity) -> Vec<ConfigContribution> {
        self.read_state()
            .contributions
            .iter()
            .filter(|c| c.target() == target)
            .cloned()
            .collect()
    }

    /// Contributions aimed at `target` by some other package.
    ///
    /// These never reach either accessor.
    pub fn foreign_contributions(&self, target: &PackageIdentity) -> Vec<ConfigContribution> {
        self.contributions_for(target)
            .into_iter()
            .filter(|c| !c.is_self_declared())
            .collect()
    }

    /// Merged self-declared config of `pkg`; `{}` when there is none.
    pub fn get_own_config(&self, pkg: &PackageIdentity) -> MacroResult<Arc<Value>> {
        if !self.is_sealed() {
            self.seal();
        }

        let mut merged = self.merged.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(result) = merged.get(pkg) {
            return result.clone();
        }

        let result = self.compute(pkg);
        merged.insert(pkg.clone(), result.clone());
        result
    }

    /// Config of `for_package` as seen by `requester`.
    ///
    /// `requester` must be `for_package` itself or declare it as a
    /// dependency; the payload is the same one `get_own_config(for_package)`
    /// returns.
    pub fn get_config(
        &self,
        requester: &PackageIdentity,
        for_package: &PackageIdentity,
        resolver: &DependencyResolver,
    ) -> MacroResult<Arc<Value>> {
        if requester != for_package
            && !resolver.declares_dependency(requester, &for_package.name)?
        {
            return Err(MacroError::UnauthorizedConfigAccess {
                requester: requester.to_string(),
                target: for_package.to_string(),
            });
        }
        self.get_own_config(for_package)
    }

    fn compute(&self, pkg: &PackageIdentity) -> MacroResult<Arc<Value>> {
        let state = self.read_state();

        let own: Vec<&ConfigContribution> = state
            .contributions
            .iter()
            .filter(|c| c.target() == pkg && c.is_self_declared())
            .collect();

        let foreign = state
            .contributions
            .iter()
            .filter(|c| c.target() == pkg && !c.is_self_declared())
            .count();
        if foreign > 0 {
            debug!(package = %pkg, foreign, "ignoring config contributed by other packages");
        }

        let merger = state
            .mergers
            .get(pkg)
            .unwrap_or(&self.default_merger);
        let value = merger.merge(pkg, &own)?;
        debug!(package = %pkg, contributions = own.len(), "merged config");
        Ok(Arc::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pkg(name: &str) -> PackageIdentity {
        PackageIdentity::new(name, format!("/virtual/{name}"))
    }

    #[test]
    fn test_own_config_only_counts_self_origin() {
        let registry = ConfigRegistry::new();
        registry.register(pkg("a"), pkg("a"), json!({"mode": "dev"})).unwrap();
        registry
            .register(pkg("b"), pkg("a"), json!({"mode": "prod", "extra": 1}))
            .unwrap();

        let own = registry.get_own_config(&pkg("a")).unwrap();
        assert_eq!(*own, json!({"mode": "dev"}));
        assert_eq!(registry.foreign_contributions(&pkg("a")).len(), 1);
    }

    #[test]
    fn test_missing_config_is_empty_object() {
        let registry = ConfigRegistry::new();
        assert_eq!(*registry.get_own_config(&pkg("nobody")).unwrap(), json!({}));
    }

    #[test]
    fn test_order_independent_across_packages() {
        let first = ConfigRegistry::new();
        first.register(pkg("a"), pkg("a"), json!({"x": 1})).unwrap();
        first.register(pkg("b"), pkg("b"), json!({"y": 2})).unwrap();
        first.register(pkg("a"), pkg("a"), json!({"x": 3})).unwrap();

        let second = ConfigRegistry::new();
        second.register(pkg("b"), pkg("b"), json!({"y": 2})).unwrap();
        second.register(pkg("a"), pkg("a"), json!({"x": 1})).unwrap();
        second.register(pkg("a"), pkg("a"), json!({"x": 3})).unwrap();

        assert_eq!(
            first.get_own_config(&pkg("a")).unwrap(),
            second.get_own_config(&pkg("a")).unwrap()
        );
        assert_eq!(*first.get_own_config(&pkg("a")).unwrap(), json!({"x": 3}));
    }

    #[test]
    fn test_registration_after_read_is_rejected() {
        let registry = ConfigRegistry::new();
        registry.register(pkg("a"), pkg("a"), json!({})).unwrap();
        let _ = registry.get_own_config(&pkg("a")).unwrap();

        let err = registry
            .register(pkg("a"), pkg("a"), json!({"late": true}))
            .unwrap_err();
        assert_eq!(err.kind(), "late-registration");
        assert!(registry.use_merger(pkg("a"), DeepMerger).is_err());
    }

    #[test]
    fn test_registration_racing_first_read_is_merged_or_rejected() {
        for _ in 0..20 {
            let registry = ConfigRegistry::new();
            let accepted: Vec<String> = std::thread::scope(|scope| {
                let writers: Vec<_> = (0..4)
                    .map(|t| {
                        let registry = &registry;
                        scope.spawn(move || {
                            let mut accepted = Vec::new();
                            for i in 0..50 {
                                let key = format!("k{t}_{i}");
                                let mut payload = serde_json::Map::new();
                                payload.insert(key.clone(), json!(i));
                                let payload = Value::Object(payload);
                                match registry.register(pkg("a"), pkg("a"), payload) {
                                    Ok(()) => accepted.push(key),
                                    Err(e) => assert_eq!(e.kind(), "late-registration"),
                                }
                            }
                            accepted
                        })
                    })
                    .collect();
                let _ = registry.get_own_config(&pkg("a")).unwrap();
                writers
                    .into_iter()
                    .flat_map(|w| w.join().unwrap())
                    .collect()
            });

            let merged = registry.get_own_config(&pkg("a")).unwrap();
            let object = merged.as_object().unwrap();
            assert_eq!(object.len(), accepted.len());
            for key in &accepted {
                assert!(object.contains_key(key), "{key} accepted but not merged");
            }
        }
    }

    #[test]
    fn test_merged_result_is_memoised() {
        let registry = ConfigRegistry::new();
        registry.register(pkg("a"), pkg("a"), json!({"k": 1})).unwrap();
        let first = registry.get_own_config(&pkg("a")).unwrap();
        let second = registry.get_own_config(&pkg("a")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_per_target_merger_override() {
        let registry = ConfigRegistry::new();
        registry.use_merger(pkg("a"), DeepMerger).unwrap();
        registry
            .register(pkg("a"), pkg("a"), json!({"f": {"x": 1}}))
            .unwrap();
        registry
            .register(pkg("a"), pkg("a"), json!({"f": {"y": 2}}))
            .unwrap();
        registry
            .register(pkg("b"), pkg("b"), json!({"f": {"x": 1}}))
            .unwrap();
        registry
            .register(pkg("b"), pkg("b"), json!({"f": {"y": 2}}))
            .unwrap();

        assert_eq!(*registry.get_own_config(&pkg("a")).unwrap(), json!({"f": {"x": 1, "y": 2}}));
        assert_eq!(*registry.get_own_config(&pkg("b")).unwrap(), json!({"f": {"y": 2}}));
    }

    #[test]
    fn test_non_object_payload_rejected_at_registration() {
        let registry = ConfigRegistry::new();
        let err = registry.register(pkg("a"), pkg("a"), json!("dev")).unwrap_err();
        assert_eq!(err.kind(), "invalid-payload");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_conflict_is_memoised_as_error() {
        let registry = ConfigRegistry::new();
        registry.register(pkg("a"), pkg("a"), json!({"k": [1]})).unwrap();
        registry.register(pkg("a"), pkg("a"), json!({"k": 1})).unwrap();
        assert_eq!(registry.get_own_config(&pkg("a")).unwrap_err().kind(), "merge-conflict");
        assert_eq!(registry.get_own_config(&pkg("a")).unwrap_err().kind(), "merge-conflict");
    }
}
