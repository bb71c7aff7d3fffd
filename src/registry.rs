//! Name → effect resolution.
//!
//! The registry maps effect names to factories and lazily instantiates each
//! effect the first time it is requested. The instance is cached, so every
//! later [`EffectRegistry::get`] for the same name returns the same
//! `Arc` until the entry is re-registered.
//!
//! Entries come from three places:
//! - the built-in catalog ([`crate::effects::BUILTIN_EFFECTS`]),
//! - plugin manifests discovered in a directory ([`EffectRegistry::discover`]),
//! - explicit [`EffectRegistry::register`] calls.
//!
//! Factories receive the effect's settings table from the config's
//! `[effects.<name>]` section, or an empty table when there is none.
//!
//! Registration takes `&mut self`; lookups take `&self`. A registry shared
//! across batch workers is therefore read-only once it is wrapped in an
//! `Arc`.

use crate::config::StyleConfig;
use crate::effect::{Effect, EffectError};
use crate::effects::BUILTIN_EFFECTS;
use crate::plugin::{DiscoveryReport, PluginError, scan_plugins};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Builds an effect from its settings table.
pub type EffectFactory =
    Arc<dyn Fn(&toml::Table) -> Result<Box<dyn Effect>, EffectError> + Send + Sync>;

/// Where a registry entry came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectOrigin {
    Builtin,
    Plugin(PathBuf),
    Registered,
}

struct Entry {
    factory: EffectFactory,
    origin: EffectOrigin,
    description: Option<String>,
    instance: Mutex<Option<Arc<dyn Effect>>>,
}

impl Entry {
    fn new(factory: EffectFactory, origin: EffectOrigin, description: Option<String>) -> Self {
        Self {
            factory,
            origin,
            description,
            instance: Mutex::new(None),
        }
    }
}

/// Summary of one entry, for listings.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectInfo {
    pub name: String,
    pub origin: EffectOrigin,
    pub description: Option<String>,
}

#[derive(Default)]
pub struct EffectRegistry {
    entries: BTreeMap<String, Entry>,
    settings: BTreeMap<String, toml::Table>,
}

impl EffectRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in catalog with no settings overrides.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for entry in BUILTIN_EFFECTS {
            let build = entry.build;
            registry.entries.insert(
                entry.name.to_string(),
                Entry::new(
                    Arc::new(move |settings: &toml::Table| build(settings)),
                    EffectOrigin::Builtin,
                    Some(entry.description.to_string()),
                ),
            );
        }
        registry
    }

    /// Built-ins plus the config's effect settings and plugin directory.
    ///
    /// A missing or unreadable plugin directory is logged and skipped.
    pub fn from_config(config: &StyleConfig) -> (Self, Option<DiscoveryReport>) {
        let mut registry = Self::builtin().with_settings(config.effects.clone());
        let report = config.plugins.dir.as_deref().and_then(|dir| {
            registry
                .discover(dir)
                .inspect_err(|e| warn!(error = %e, "plugin discovery failed"))
                .ok()
        });
        (registry, report)
    }

    /// Replace the per-effect settings tables. Clears cached instances.
    pub fn with_settings(mut self, settings: BTreeMap<String, toml::Table>) -> Self {
        self.settings = settings;
        for entry in self.entries.values_mut() {
            *entry.instance.get_mut().unwrap_or_else(PoisonError::into_inner) = None;
        }
        self
    }

    /// Add or replace a factory. Nothing is instantiated until [`get`](Self::get).
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&toml::Table) -> Result<Box<dyn Effect>, EffectError> + Send + Sync + 'static,
    {
        self.insert(name.into(), Arc::new(factory), EffectOrigin::Registered, None);
    }

    fn insert(
        &mut self,
        name: String,
        factory: EffectFactory,
        origin: EffectOrigin,
        description: Option<String>,
    ) {
        if let Some(previous) = self.entries.get(&name) {
            debug!(effect = %name, previous = ?previous.origin, "replacing effect");
        }
        self.entries
            .insert(name, Entry::new(factory, origin, description));
    }

    /// Resolve `name` to its cached instance, instantiating on first use.
    ///
    /// Returns `None` for unknown names and for effects whose factory fails
    /// (the failure is logged); callers decide the fallback.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Effect>> {
        let entry = self.entries.get(name)?;
        let mut slot = entry
            .instance
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(instance) = slot.as_ref() {
            return Some(Arc::clone(instance));
        }

        let empty = toml::Table::new();
        let settings = self.settings.get(name).unwrap_or(&empty);
        match (entry.factory)(settings) {
            Ok(effect) => {
                let instance: Arc<dyn Effect> = Arc::from(effect);
                *slot = Some(Arc::clone(&instance));
                Some(instance)
            }
            Err(e) => {
                warn!(effect = name, error = %e, "effect factory failed");
                None
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Listing of every entry, sorted by name.
    pub fn describe(&self) -> Vec<EffectInfo> {
        self.entries
            .iter()
            .map(|(name, entry)| EffectInfo {
                name: name.clone(),
                origin: entry.origin.clone(),
                description: entry.description.clone(),
            })
            .collect()
    }

    /// Register every valid plugin manifest in `dir` under its file stem.
    ///
    /// Invalid manifests are skipped with a warning and listed in the report.
    pub fn discover(&mut self, dir: &Path) -> Result<DiscoveryReport, PluginError> {
        let (effects, report) = scan_plugins(dir)?;
        for effect in effects {
            let name = effect.name().to_string();
            let origin = EffectOrigin::Plugin(effect.source().to_path_buf());
            let description = effect.description().map(str::to_string);
            let template = Arc::new(effect);
            let factory: EffectFactory = Arc::new(
                move |_settings: &toml::Table| -> Result<Box<dyn Effect>, EffectError> {
                    Ok(Box::new((*template).clone()))
                },
            );
            self.insert(name, factory, origin, description);
        }
        info!(
            dir = %dir.display(),
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            "plugin discovery finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::FromSettings;
    use crate::effects::{DEFAULT_EFFECT, Posterize};
    use crate::test_helpers::{FailingEffect, write_plugin};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[test]
    fn builtin_contains_catalog() {
        let registry = EffectRegistry::builtin();
        assert_eq!(registry.len(), BUILTIN_EFFECTS.len());
        assert!(registry.contains(DEFAULT_EFFECT));
        assert!(registry.contains("spectral_shift"));
    }

    #[test]
    fn get_is_idempotent() {
        let registry = EffectRegistry::builtin();
        let a = registry.get("oil_paint").unwrap();
        let b = registry.get("oil_paint").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn get_unknown_returns_none() {
        let registry = EffectRegistry::builtin();
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn register_is_lazy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut registry = EffectRegistry::new();
        registry.register("counted", move |settings: &toml::Table| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Posterize::from_settings(settings)?) as Box<dyn Effect>)
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        registry.get("counted").unwrap();
        registry.get("counted").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn register_replaces_entry_and_cache() {
        let mut registry = EffectRegistry::builtin();
        let before = registry.get("posterize").unwrap();
        registry.register("posterize", |_: &toml::Table| {
            Ok(Box::new(FailingEffect) as Box<dyn Effect>)
        });
        let after = registry.get("posterize").unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.name(), "failing");
        assert_eq!(
            registry.describe().iter().find(|i| i.name == "posterize").unwrap().origin,
            EffectOrigin::Registered
        );
    }

    #[test]
    fn settings_reach_factory() {
        let mut settings = BTreeMap::new();
        settings.insert(
            "posterize".to_string(),
            toml::from_str::<toml::Table>("levels = 100").unwrap(),
        );
        let registry = EffectRegistry::builtin().with_settings(settings);
        // levels out of range → factory error → not found
        assert!(registry.get("posterize").is_none());
        assert!(registry.get("oil_paint").is_some());
    }

    #[test]
    fn discover_registers_plugins_and_skips_broken() {
        let tmp = TempDir::new().unwrap();
        write_plugin(tmp.path(), "negative", "[[ops]]\nkind = \"invert\"\n");
        write_plugin(tmp.path(), "broken", "[[ops]]\nkind = \"contrast\"\n");

        let mut registry = EffectRegistry::builtin();
        let report = registry.discover(tmp.path()).unwrap();

        assert_eq!(report.loaded, vec!["negative"]);
        assert_eq!(report.skipped.len(), 1);
        assert!(registry.contains("negative"));
        assert!(!registry.contains("broken"));
        let a = registry.get("negative").unwrap();
        let b = registry.get("negative").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(matches!(
            registry.describe().iter().find(|i| i.name == "negative").unwrap().origin,
            EffectOrigin::Plugin(_)
        ));
    }

    #[test]
    fn from_config_tolerates_missing_plugin_dir() {
        let mut config = StyleConfig::default();
        config.plugins.dir = Some(PathBuf::from("/definitely/not/here"));
        let (registry, report) = EffectRegistry::from_config(&config);
        assert!(report.is_none());
        assert!(registry.contains(DEFAULT_EFFECT));
    }

    #[test]
    fn names_are_sorted() {
        let registry = EffectRegistry::builtin();
        let names = registry.names();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
