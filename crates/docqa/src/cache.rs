//! Content-hash embedding cache with single-flight computation.
//!
//! Fragments are keyed by `model_version` + SHA-256 of their text, so
//! identical content is embedded exactly once per model regardless of
//! how many documents (or concurrent ingests) contain it. Concurrent
//! callers for the *same* key rendezvous on a per-key watch channel —
//! one computes, the rest wait; distinct keys never contend beyond a
//! short map lock.
//!
//! The cache is bounded: when it exceeds `max_entries`, the least
//! recently used completed entries are evicted. Eviction only costs a
//! recomputation on the next miss — retrieval never dereferences the
//! cache, so an evicted entry can never surface as a dangling result.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::debug;

use docqa_core::error::Result;
use docqa_core::models::{EmbeddingVector, Fragment};
use docqa_core::provider::Embedder;

/// Hex SHA-256 of a fragment's text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

enum SlotState {
    /// Computation finished; vector is shareable.
    Ready(Vec<f32>),
    /// Computation in flight; waiters subscribe to the channel and are
    /// woken when the sender is replaced or dropped.
    Pending(watch::Sender<()>),
}

struct Slot {
    state: SlotState,
    last_used: u64,
}

struct CacheInner {
    entries: HashMap<String, Slot>,
    tick: u64,
}

/// Bounded, single-flight embedding cache.
pub struct ContentCache {
    max_entries: usize,
    inner: Mutex<CacheInner>,
    computations: AtomicU64,
    hits: AtomicU64,
}

/// Outcome of classifying one key under the map lock.
enum Claim {
    Hit(Vec<f32>),
    /// This caller owns the computation for the key.
    Owned,
    /// Another caller is computing; wait on the receiver and re-check.
    Wait(watch::Receiver<()>),
}

impl ContentCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                tick: 0,
            }),
            computations: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    /// Number of embedder invocations for unique content (misses).
    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::Relaxed)
    }

    /// Number of lookups served from a completed entry.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Completed entries currently held.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("cache lock poisoned");
        inner
            .entries
            .values()
            .filter(|s| matches!(s.state, SlotState::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Export all completed entries for persistence. In-flight
    /// computations are skipped.
    pub fn export(&self) -> Vec<(String, Vec<f32>)> {
        let inner = self.inner.lock().expect("cache lock poisoned");
        inner
            .entries
            .iter()
            .filter_map(|(key, slot)| match &slot.state {
                SlotState::Ready(values) => Some((key.clone(), values.clone())),
                SlotState::Pending(_) => None,
            })
            .collect()
    }

    /// Seed the cache with previously exported entries. Existing slots
    /// win; capacity is enforced after seeding.
    pub fn seed(&self, entries: Vec<(String, Vec<f32>)>) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.tick += 1;
        let tick = inner.tick;
        for (key, values) in entries {
            inner.entries.entry(key).or_insert(Slot {
                state: SlotState::Ready(values),
                last_used: tick,
            });
        }
        Self::evict_over_capacity(&mut inner, self.max_entries);
    }

    /// Fetch or compute the embedding for one fragment.
    pub async fn get_or_compute(
        &self,
        fragment: &Fragment,
        embedder: &dyn Embedder,
    ) -> Result<EmbeddingVector> {
        let mut vectors = self
            .embed_fragments(std::slice::from_ref(fragment), embedder, 1)
            .await?;
        Ok(vectors.remove(0))
    }

    /// Fetch or compute embeddings for a fragment set, batching misses.
    ///
    /// Returns one [`EmbeddingVector`] per input fragment, in order.
    /// Unique missing contents are embedded in batches of `batch_size`
    /// per external call; at most one computation runs per unique
    /// content across all concurrent callers.
    pub async fn embed_fragments(
        &self,
        fragments: &[Fragment],
        embedder: &dyn Embedder,
        batch_size: usize,
    ) -> Result<Vec<EmbeddingVector>> {
        let model = embedder.model_version().to_string();
        let keys: Vec<String> = fragments
            .iter()
            .map(|f| format!("{model}:{}", content_hash(&f.text)))
            .collect();

        let mut resolved: HashMap<String, Vec<f32>> = HashMap::new();
        let mut first_pass = true;

        while resolved.len() < unique_count(&keys) {
            let mut owned: Vec<(String, String)> = Vec::new(); // (key, text)
            let mut waiting: Vec<watch::Receiver<()>> = Vec::new();

            {
                let mut inner = self.inner.lock().expect("cache lock poisoned");
                inner.tick += 1;
                let tick = inner.tick;
                for (key, fragment) in keys.iter().zip(fragments.iter()) {
                    if resolved.contains_key(key) || owned.iter().any(|(k, _)| k == key) {
                        continue;
                    }
                    match Self::claim(&mut inner, key, tick) {
                        Claim::Hit(values) => {
                            if first_pass {
                                self.hits.fetch_add(1, Ordering::Relaxed);
                            }
                            resolved.insert(key.clone(), values);
                        }
                        Claim::Owned => owned.push((key.clone(), fragment.text.clone())),
                        Claim::Wait(rx) => waiting.push(rx),
                    }
                }
            }
            first_pass = false;

            if !owned.is_empty() {
                match self.compute_owned(&owned, embedder, batch_size).await {
                    Ok(computed) => {
                        for (key, values) in computed {
                            resolved.insert(key, values);
                        }
                    }
                    Err(e) => {
                        // Drop our pending slots so waiters (and future
                        // callers) can retry the computation themselves.
                        self.abandon(owned.iter().map(|(k, _)| k.as_str()));
                        return Err(e);
                    }
                }
            }

            for mut rx in waiting {
                // A closed channel means the computing task finished
                // (or abandoned); either way, re-check the map.
                let _ = rx.changed().await;
            }
        }

        Ok(fragments
            .iter()
            .zip(keys.iter())
            .map(|(fragment, key)| EmbeddingVector {
                fragment_id: fragment.id.clone(),
                values: resolved[key].clone(),
                model_version: model.clone(),
            })
            .collect())
    }

    fn claim(inner: &mut CacheInner, key: &str, tick: u64) -> Claim {
        match inner.entries.get_mut(key) {
            Some(slot) => {
                slot.last_used = tick;
                match &slot.state {
                    SlotState::Ready(values) => Claim::Hit(values.clone()),
                    SlotState::Pending(tx) => Claim::Wait(tx.subscribe()),
                }
            }
            None => {
                let (tx, _rx) = watch::channel(());
                inner.entries.insert(
                    key.to_string(),
                    Slot {
                        state: SlotState::Pending(tx),
                        last_used: tick,
                    },
                );
                Claim::Owned
            }
        }
    }

    async fn compute_owned(
        &self,
        owned: &[(String, String)],
        embedder: &dyn Embedder,
        batch_size: usize,
    ) -> Result<Vec<(String, Vec<f32>)>> {
        let batch_size = batch_size.max(1);
        let mut computed = Vec::with_capacity(owned.len());

        for batch in owned.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
            let vectors = embedder.embed(&texts).await?;
            debug!(batch = texts.len(), "embedded cache misses");
            for ((key, _), values) in batch.iter().zip(vectors.into_iter()) {
                computed.push((key.clone(), values));
            }
        }

        let mut inner = self.inner.lock().expect("cache lock poisoned");
        for (key, values) in &computed {
            if let Some(slot) = inner.entries.get_mut(key) {
                // Replacing Pending drops the sender and wakes waiters.
                slot.state = SlotState::Ready(values.clone());
            }
            self.computations.fetch_add(1, Ordering::Relaxed);
        }
        Self::evict_over_capacity(&mut inner, self.max_entries);
        Ok(computed)
    }

    fn abandon<'a>(&self, keys: impl Iterator<Item = &'a str>) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        for key in keys {
            if matches!(
                inner.entries.get(key).map(|s| &s.state),
                Some(SlotState::Pending(_))
            ) {
                // Removing the slot drops the sender and wakes waiters,
                // who will re-claim and retry.
                inner.entries.remove(key);
            }
        }
    }

    fn evict_over_capacity(inner: &mut CacheInner, max_entries: usize) {
        let ready_count = inner
            .entries
            .values()
            .filter(|s| matches!(s.state, SlotState::Ready(_)))
            .count();
        if ready_count <= max_entries {
            return;
        }
        let mut victims: Vec<(String, u64)> = inner
            .entries
            .iter()
            .filter(|(_, s)| matches!(s.state, SlotState::Ready(_)))
            .map(|(k, s)| (k.clone(), s.last_used))
            .collect();
        victims.sort_by_key(|(_, last_used)| *last_used);
        let excess = ready_count - max_entries;
        for (key, _) in victims.into_iter().take(excess) {
            inner.entries.remove(&key);
        }
        debug!(evicted = excess, "cache over capacity");
    }
}

fn unique_count(keys: &[String]) -> usize {
    let mut seen = std::collections::HashSet::new();
    keys.iter().filter(|k| seen.insert(k.as_str())).count()
}
