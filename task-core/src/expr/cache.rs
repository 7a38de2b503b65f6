//! Process-wide, concurrency-safe program cache, bounded by an approximate
//! cost ceiling rather than by entry count.

use std::collections::HashMap;
use std::sync::Mutex;

struct Entry<P> {
    program: P,
    cost: u64,
    last_used: u64,
}

/// An approximate-LRU cache: eviction picks the least-recently-used entry
/// whenever inserting would push total tracked cost over `max_cost`. "Approximate"
/// because recency is a logical tick counter, not wall-clock (wall-clock reads
/// are avoided outside the state factory).
pub struct ProgramCache<P> {
    inner: Mutex<Inner<P>>,
    max_cost: u64,
}

struct Inner<P> {
    entries: HashMap<String, Entry<P>>,
    total_cost: u64,
    tick: u64,
}

impl<P: Clone> ProgramCache<P> {
    pub fn new(max_cost: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                total_cost: 0,
                tick: 0,
            }),
            max_cost,
        }
    }

    pub fn get(&self, key: &str) -> Option<P> {
        let mut inner = self.inner.lock().expect("program cache lock poisoned");
        inner.tick += 1;
        let tick = inner.tick;
        if let Some(entry) = inner.entries.get_mut(key) {
            entry.last_used = tick;
            tracing::debug!(expr = key, "expression cache hit");
            Some(entry.program.clone())
        } else {
            tracing::debug!(expr = key, "expression cache miss");
            None
        }
    }

    pub fn insert(&self, key: String, program: P, cost: u64) {
        let mut inner = self.inner.lock().expect("program cache lock poisoned");
        inner.tick += 1;
        let tick = inner.tick;
        while inner.total_cost + cost > self.max_cost && !inner.entries.is_empty() {
            let evict_key = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            if let Some(k) = evict_key {
                if let Some(evicted) = inner.entries.remove(&k) {
                    inner.total_cost = inner.total_cost.saturating_sub(evicted.cost);
                    tracing::debug!(expr = k.as_str(), "expression cache evicted");
                }
            } else {
                break;
            }
        }
        inner.total_cost += cost;
        inner.entries.insert(
            key,
            Entry {
                program,
                cost,
                last_used: tick,
            },
        );
    }
}
