//! Keyed collection of self-refreshing entries
//!
//! A [`Registry`] is one cache namespace. It creates an [`Entry`] per key on
//! first access, binding the key into the registry's regeneration function.

use crate::cache::{
    center::{Center, Recycle},
    config::RefreshConfig,
    entry::{Entry, Lookup},
    regenerate::{bind_key, keyed_regenerator, KeyedRegenerator, RefreshCause, Regenerator},
    snapshot::SnapshotRecord,
    types::RegistryStats,
};
use crate::error::{CacheError, Result};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Exported registry contents: serialized key -> snapshot record
pub type RegistryExport<T> = BTreeMap<String, SnapshotRecord<T>>;

/// Lazily populated map from key to [`Entry`]
pub struct Registry<K, T> {
    id: Uuid,
    name: String,
    config: RefreshConfig,
    entries: DashMap<K, Arc<Entry<T>>>,
    create_lock: Mutex<()>,
    regenerate: Option<KeyedRegenerator<K, T>>,
    center: Option<Arc<Center>>,
}

impl<K, T> std::fmt::Debug for Registry<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("has_regenerator", &self.regenerate.is_some())
            .finish()
    }
}

impl<K, T> Registry<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    /// Start building a registry for the namespace `name`
    pub fn builder(name: impl Into<String>, config: RefreshConfig) -> RegistryBuilder<K, T> {
        RegistryBuilder {
            name: name.into(),
            config,
            regenerate: None,
            center: None,
        }
    }

    /// The entry for `key`, created on first access.
    ///
    /// Returns `None` for an unknown key when the registry has no
    /// regeneration function to give a new entry.
    pub fn get(&self, key: &K) -> Option<Arc<Entry<T>>> {
        if let Some(entry) = self.entries.get(key) {
            return Some(Arc::clone(entry.value()));
        }
        let regenerate = self.regenerate.as_ref()?;

        let _creating = self.create_lock.lock();
        if let Some(entry) = self.entries.get(key) {
            return Some(Arc::clone(entry.value()));
        }

        let entry = match self.new_entry(Some(bind_key(regenerate, key.clone()))) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(registry = %self.name, "failed to create entry: {}", e);
                return None;
            }
        };
        self.entries.insert(key.clone(), Arc::clone(&entry));
        debug!(registry = %self.name, entry = %entry.id(), "created entry");
        self.entries.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Read the data for `key`, creating and populating its entry as needed
    pub async fn fetch(&self, key: &K) -> Result<Lookup<T>> {
        match self.get(key) {
            Some(entry) => entry.get().await,
            None => Ok(Lookup::empty()),
        }
    }

    /// Drop the entry for `key`
    pub fn remove(&self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    pub fn has_regenerator(&self) -> bool {
        self.regenerate.is_some()
    }

    /// Drop every idle entry; returns how many were removed
    pub fn recycle(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_idle(now));
        let recycled = before.saturating_sub(self.entries.len());

        if recycled > 0 {
            info!(registry = %self.name, "Recycled {} idle entries", recycled);
        }
        recycled
    }

    /// Aggregate statistics over the live entries
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for entry in self.entries.iter() {
            stats.entries += 1;
            stats.totals.merge(&entry.value().stats());
        }
        stats
    }

    /// Entry without a regeneration function, for imported data
    fn insert_bare(&self, key: K) -> Result<Arc<Entry<T>>> {
        let _creating = self.create_lock.lock();
        let existing = self.entries.get(&key).map(|e| Arc::clone(e.value()));
        if let Some(entry) = existing {
            return Ok(entry);
        }

        let entry = self.new_entry(None)?;
        self.entries.insert(key, Arc::clone(&entry));
        Ok(entry)
    }

    fn new_entry(&self, regenerate: Option<Regenerator<T>>) -> Result<Arc<Entry<T>>> {
        let mut builder = Entry::builder(self.config.clone());
        if let Some(regenerate) = regenerate {
            builder = builder.regenerator(regenerate);
        }
        if let Some(center) = &self.center {
            builder = builder.center(center);
        }
        builder.build()
    }
}

/// Export/import of registry contents
impl<K, T> Registry<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    T: Send + Sync + 'static,
{
    /// Export every live snapshot keyed by its JSON-encoded key.
    ///
    /// Entries without a regeneration function, without data, or past hard
    /// expiry are skipped. Fails if a key is not a string, integer or struct.
    pub fn export(&self) -> Result<RegistryExport<T>>
    where
        T: Clone,
    {
        let now = Utc::now();
        let mut exported = RegistryExport::new();

        for item in self.entries.iter() {
            let entry = item.value();
            if !entry.has_regenerator() {
                continue;
            }
            let Some(record) = entry.export() else {
                continue;
            };
            if record.is_expired(now) {
                continue;
            }
            exported.insert(encode_key(item.key())?, record);
        }

        debug!(registry = %self.name, exported = exported.len(), "exported registry");
        Ok(exported)
    }

    /// Install exported records, creating entries as needed.
    /// Returns how many records were imported.
    pub fn import(&self, records: RegistryExport<T>) -> Result<usize> {
        let mut imported = 0;

        for (raw_key, record) in records {
            let key: K = decode_key(&raw_key)?;
            let entry = match self.get(&key) {
                Some(entry) => entry,
                None => self.insert_bare(key)?,
            };
            entry.import(record);
            imported += 1;
        }

        debug!(registry = %self.name, imported, "imported registry");
        Ok(imported)
    }

    /// [`Registry::export`] encoded as a JSON object
    pub fn to_json(&self) -> Result<String>
    where
        T: Clone + Serialize,
    {
        Ok(serde_json::to_string(&self.export()?)?)
    }

    /// [`Registry::import`] from a JSON object
    pub fn from_json(&self, json: &str) -> Result<usize>
    where
        T: DeserializeOwned,
    {
        let records: RegistryExport<T> = serde_json::from_str(json)?;
        self.import(records)
    }
}

impl<K, T> Recycle for Registry<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    fn recycle(&self) -> usize {
        Registry::recycle(self)
    }
}

/// Only strings, integers and structs survive the trip through a JSON object key
fn check_key_shape(value: &Value) -> Result<()> {
    match value {
        Value::String(_) | Value::Object(_) => Ok(()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(()),
        Value::Number(_) => Err(CacheError::UnsupportedKeyType("float".to_string())),
        Value::Bool(_) => Err(CacheError::UnsupportedKeyType("bool".to_string())),
        Value::Null => Err(CacheError::UnsupportedKeyType("null".to_string())),
        Value::Array(_) => Err(CacheError::UnsupportedKeyType("array".to_string())),
    }
}

fn encode_key<K: Serialize>(key: &K) -> Result<String> {
    let value = serde_json::to_value(key)?;
    check_key_shape(&value)?;
    Ok(serde_json::to_string(&value)?)
}

fn decode_key<K: DeserializeOwned>(raw: &str) -> Result<K> {
    let value: Value = serde_json::from_str(raw)?;
    check_key_shape(&value)?;
    Ok(serde_json::from_value(value)?)
}

/// Builder for [`Registry`]
pub struct RegistryBuilder<K, T> {
    name: String,
    config: RefreshConfig,
    regenerate: Option<KeyedRegenerator<K, T>>,
    center: Option<Arc<Center>>,
}

impl<K, T> RegistryBuilder<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    /// Set the keyed regeneration function
    pub fn regenerate<F, Fut>(self, f: F) -> Self
    where
        F: Fn(K, RefreshCause) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.regenerator(keyed_regenerator(f))
    }

    /// Set an already wrapped keyed regeneration function
    pub fn regenerator(mut self, regenerate: KeyedRegenerator<K, T>) -> Self {
        self.regenerate = Some(regenerate);
        self
    }

    /// Register the registry and its entries with a keep-warm center
    pub fn center(mut self, center: &Arc<Center>) -> Self {
        self.center = Some(Arc::clone(center));
        self
    }

    /// Build the registry
    pub fn build(self) -> Result<Arc<Registry<K, T>>> {
        self.config.validate()?;

        let registry = Arc::new(Registry {
            id: Uuid::new_v4(),
            name: self.name,
            config: self.config,
            entries: DashMap::new(),
            create_lock: Mutex::new(()),
            regenerate: self.regenerate,
            center: self.center,
        });

        if let Some(center) = &registry.center {
            let weak: Weak<dyn Recycle> = Arc::downgrade(&registry) as Weak<dyn Recycle>;
            center.register_registry(registry.id, &registry.name, weak);
        }

        Ok(registry)
    }
}
