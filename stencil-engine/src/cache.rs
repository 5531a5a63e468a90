//! Precompilation cache.
//!
//! One live [`PrecompiledTemplate`] per template name. A hit touches the
//! entry; a miss or an expired entry triggers a fresh backend load. Loads run
//! on the blocking pool and concurrent cold `get`s of one name wait on a
//! per-name build lock, so only one load happens.
//!
//! Eviction happens before insertion once the map is full: the oldest quarter
//! of the entries is dropped, expired entries first, then by least recent
//! access.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

use stencil_core::{DescriptorSource, GenerationError, ResolvedDescriptor, TemplateLister, TemplateName};
use stencil_renderer::{BackendHandle, GenerationBackend};

use crate::config::EngineConfig;
use crate::lock;

/// Share of the entries dropped when the cache is full.
const EVICTION_FRACTION: f64 = 0.25;
/// Share of the available templates precompiled by a default warm-up.
const WARMUP_FRACTION: f64 = 0.7;
const WARMUP_MINIMUM: usize = 3;
/// Upper bound on the number of template names tracked in access statistics.
const STATS_CAPACITY: usize = 1024;

/// Drop a cached entry so the next `get` reloads it.
pub trait CacheInvalidator: Send + Sync {
    /// Returns `true` if an entry was removed.
    fn invalidate(&self, name: &TemplateName) -> bool;
}

/// A loaded template plus what the engine needs to drive a generation.
#[derive(Debug, Clone)]
pub struct PrecompiledTemplate {
    pub name: TemplateName,
    pub handle: BackendHandle,
    pub metadata: std::collections::BTreeMap<String, String>,
    pub declared_variables: Vec<String>,
    pub descriptor: Arc<ResolvedDescriptor>,
    pub compiled_at: Instant,
    pub last_accessed_at: Instant,
    /// Monotonic access counter; breaks ties between equal timestamps.
    access_seq: u64,
}

impl PrecompiledTemplate {
    pub fn is_expired(&self, ttl: Duration) -> bool {
        Instant::now().saturating_duration_since(self.compiled_at) > ttl
    }
}

/// Per-template counters. Reset only by [`CacheManager::clear`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheAccessStats {
    pub hits: u64,
    pub misses: u64,
    pub precompiles: u64,
}

impl CacheAccessStats {
    pub fn frequency(&self) -> u64 {
        self.hits + self.misses + self.precompiles
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryStats {
    pub name: TemplateName,
    pub cached: bool,
    pub expired: bool,
    pub age_secs: Option<u64>,
    #[serde(flatten)]
    pub access: CacheAccessStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
    pub precompiles: u64,
    pub hit_rate: f64,
    pub expired: usize,
    pub entries: Vec<CacheEntryStats>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmupReport {
    pub warmed: Vec<TemplateName>,
    pub failed: Vec<(TemplateName, String)>,
}

#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    pub max_size: usize,
    pub ttl: Duration,
}

impl From<&EngineConfig> for CacheSettings {
    fn from(config: &EngineConfig) -> Self {
        CacheSettings {
            max_size: config.max_cache_size.max(1),
            ttl: config.cache_ttl(),
        }
    }
}

pub struct CacheManager {
    backend: Arc<dyn GenerationBackend>,
    descriptors: Arc<dyn DescriptorSource>,
    lister: Arc<dyn TemplateLister>,
    settings: CacheSettings,
    entries: Mutex<HashMap<TemplateName, PrecompiledTemplate>>,
    building: Mutex<HashMap<TemplateName, Arc<tokio::sync::Mutex<()>>>>,
    stats: Mutex<HashMap<TemplateName, CacheAccessStats>>,
    seq: AtomicU64,
}

impl CacheManager {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        descriptors: Arc<dyn DescriptorSource>,
        lister: Arc<dyn TemplateLister>,
        settings: CacheSettings,
    ) -> Self {
        CacheManager {
            backend,
            descriptors,
            lister,
            settings,
            entries: Mutex::new(HashMap::new()),
            building: Mutex::new(HashMap::new()),
            stats: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> CacheSettings {
        self.settings
    }

    pub fn backend(&self) -> &Arc<dyn GenerationBackend> {
        &self.backend
    }

    /// Return the cached entry for `name`, loading it on a miss or expiry.
    pub async fn get(&self, name: &TemplateName) -> Result<PrecompiledTemplate, GenerationError> {
        if let Some(hit) = self.lookup(name) {
            return Ok(hit);
        }

        let build_lock = self.build_lock(name);
        let guard = build_lock.lock().await;
        // Someone else may have finished the build while we waited.
        if let Some(hit) = self.lookup(name) {
            drop(guard);
            self.release_build_lock(name, build_lock);
            return Ok(hit);
        }

        self.record(name, |s| s.misses += 1);
        debug!(template = %name, "cache miss");
        let built = self.build(name).await;
        drop(guard);
        self.release_build_lock(name, build_lock);
        built
    }

    /// Load `name` unconditionally and replace any cached entry.
    pub async fn precompile(
        &self,
        name: &TemplateName,
    ) -> Result<PrecompiledTemplate, GenerationError> {
        let build_lock = self.build_lock(name);
        let guard = build_lock.lock().await;
        self.record(name, |s| s.precompiles += 1);
        let built = self.build(name).await;
        drop(guard);
        self.release_build_lock(name, build_lock);
        built
    }

    /// Precompile `names`, or the most frequently used available templates.
    ///
    /// The default set is the top 70% of available templates by
    /// `hits + misses + precompiles` (at least three, when that many exist).
    /// Individual failures are reported, not propagated.
    pub async fn warm_up(
        &self,
        names: Option<Vec<TemplateName>>,
    ) -> Result<WarmupReport, GenerationError> {
        let targets = match names {
            Some(names) => names,
            None => {
                let available = self.lister.available_templates()?;
                self.rank_for_warmup(available)
            }
        };

        let mut report = WarmupReport::default();
        for name in targets {
            match self.precompile(&name).await {
                Ok(_) => report.warmed.push(name),
                Err(err) => report.failed.push((name, err.to_string())),
            }
        }
        info!(
            warmed = report.warmed.len(),
            failed = report.failed.len(),
            "cache warm-up finished"
        );
        Ok(report)
    }

    /// Drop every entry and reset statistics.
    pub fn clear(&self) {
        lock(&self.entries).clear();
        lock(&self.stats).clear();
        debug!("cache cleared");
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, name: &TemplateName) -> bool {
        lock(&self.entries).contains_key(name)
    }

    pub fn access_stats(&self, name: &TemplateName) -> CacheAccessStats {
        lock(&self.stats).get(name).copied().unwrap_or_default()
    }

    pub fn stats(&self) -> CacheStats {
        let ttl = self.settings.ttl;
        let now = Instant::now();
        // (expired, age) per cached name; taken before the stats lock so the
        // two locks are never held in entries-then-stats order.
        let cached: HashMap<TemplateName, (bool, u64)> = lock(&self.entries)
            .values()
            .map(|e| {
                let age = now.saturating_duration_since(e.compiled_at).as_secs();
                (e.name.clone(), (e.is_expired(ttl), age))
            })
            .collect();
        let stats = lock(&self.stats);

        let mut names: Vec<&TemplateName> = stats.keys().chain(cached.keys()).collect();
        names.sort();
        names.dedup();

        let per_entry: Vec<CacheEntryStats> = names
            .into_iter()
            .map(|name| {
                let entry = cached.get(name);
                CacheEntryStats {
                    name: name.clone(),
                    cached: entry.is_some(),
                    expired: entry.map(|(expired, _)| *expired).unwrap_or(false),
                    age_secs: entry.map(|(_, age)| *age),
                    access: stats.get(name).copied().unwrap_or_default(),
                }
            })
            .collect();

        let hits: u64 = stats.values().map(|s| s.hits).sum();
        let misses: u64 = stats.values().map(|s| s.misses).sum();
        let precompiles: u64 = stats.values().map(|s| s.precompiles).sum();
        let lookups = hits + misses;

        CacheStats {
            size: cached.len(),
            max_size: self.settings.max_size,
            ttl_secs: ttl.as_secs(),
            hits,
            misses,
            precompiles,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            expired: cached.values().filter(|(expired, _)| *expired).count(),
            entries: per_entry,
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn lookup(&self, name: &TemplateName) -> Option<PrecompiledTemplate> {
        let hit = {
            let mut entries = lock(&self.entries);
            let entry = entries.get_mut(name)?;
            if entry.is_expired(self.settings.ttl) {
                debug!(template = %name, "cache entry expired");
                return None;
            }
            entry.last_accessed_at = Instant::now();
            entry.access_seq = self.next_seq();
            entry.clone()
        };
        self.record(name, |s| s.hits += 1);
        debug!(template = %name, "cache hit");
        Some(hit)
    }

    async fn build(&self, name: &TemplateName) -> Result<PrecompiledTemplate, GenerationError> {
        let backend = Arc::clone(&self.backend);
        let descriptors = Arc::clone(&self.descriptors);
        let target = name.clone();

        let (loaded, descriptor) = tokio::task::spawn_blocking(move || {
            let descriptor = descriptors.load_descriptor(&target)?;
            let loaded = backend.load(&target)?;
            Ok::<_, GenerationError>((loaded, descriptor))
        })
        .await
        .map_err(|e| GenerationError::Backend {
            template: name.to_string(),
            message: format!("template load task failed: {e}"),
        })??;

        let now = Instant::now();
        let entry = PrecompiledTemplate {
            name: name.clone(),
            handle: loaded.handle,
            metadata: loaded.metadata,
            declared_variables: loaded.declared_variables,
            descriptor: Arc::new(descriptor),
            compiled_at: now,
            last_accessed_at: now,
            access_seq: self.next_seq(),
        };
        self.insert(entry.clone());
        debug!(template = %name, backend = self.backend.name(), "template precompiled");
        Ok(entry)
    }

    fn insert(&self, entry: PrecompiledTemplate) {
        let mut entries = lock(&self.entries);
        if !entries.contains_key(&entry.name) && entries.len() >= self.settings.max_size {
            evict(&mut entries, self.settings.ttl);
        }
        entries.insert(entry.name.clone(), entry);
    }

    fn rank_for_warmup(&self, available: Vec<TemplateName>) -> Vec<TemplateName> {
        let stats = lock(&self.stats);
        let mut ranked: Vec<(u64, TemplateName)> = available
            .into_iter()
            .map(|name| (stats.get(&name).map(|s| s.frequency()).unwrap_or(0), name))
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let total = ranked.len();
        let count = ((total as f64 * WARMUP_FRACTION).ceil() as usize)
            .max(WARMUP_MINIMUM)
            .min(total);
        ranked.into_iter().take(count).map(|(_, name)| name).collect()
    }

    fn record(&self, name: &TemplateName, update: impl FnOnce(&mut CacheAccessStats)) {
        let mut stats = lock(&self.stats);
        if !stats.contains_key(name) && stats.len() >= STATS_CAPACITY {
            let cached = lock(&self.entries);
            let coldest = stats
                .iter()
                .filter(|(n, _)| !cached.contains_key(*n))
                .min_by_key(|(_, s)| s.frequency())
                .map(|(n, _)| n.clone());
            if let Some(coldest) = coldest {
                stats.remove(&coldest);
            }
        }
        update(stats.entry(name.clone()).or_default());
    }

    fn build_lock(&self, name: &TemplateName) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(lock(&self.building).entry(name.clone()).or_default())
    }

    /// Give back `held`. The map's entry goes only when no other caller
    /// holds or waits on it; clones are taken under the same lock.
    fn release_build_lock(&self, name: &TemplateName, held: Arc<tokio::sync::Mutex<()>>) {
        let mut building = lock(&self.building);
        drop(held);
        if building.get(name).is_some_and(|current| Arc::strong_count(current) == 1) {
            building.remove(name);
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}

impl CacheInvalidator for CacheManager {
    fn invalidate(&self, name: &TemplateName) -> bool {
        let removed = lock(&self.entries).remove(name).is_some();
        if removed {
            debug!(template = %name, "cache entry invalidated");
        }
        removed
    }
}

/// Remove the oldest quarter (at least one) of `entries`.
fn evict(entries: &mut HashMap<TemplateName, PrecompiledTemplate>, ttl: Duration) {
    let count = ((entries.len() as f64 * EVICTION_FRACTION).ceil() as usize).max(1);
    let mut ranked: Vec<(bool, Instant, u64, TemplateName)> = entries
        .values()
        .map(|e| (e.is_expired(ttl), e.last_accessed_at, e.access_seq, e.name.clone()))
        .collect();
    // Expired first, then least recently accessed.
    ranked.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then_with(|| a.1.cmp(&b.1))
            .then_with(|| a.2.cmp(&b.2))
    });
    for (_, _, _, name) in ranked.into_iter().take(count) {
        debug!(template = %name, "evicting cache entry");
        entries.remove(&name);
    }
}
