// src/tasks/store.rs
//! Generic record store boundary plus the in-memory implementation.
//!
//! Any persistence technology satisfying `RecordStore` will do; the
//! orchestrator only needs keyed records, a field compare-and-set and
//! bounded append-only lists.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default cap for append-only lists.
pub const DEFAULT_LIST_CAP: usize = 5_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub collection: String,
    pub kind: String,
    pub created_at: DateTime<Utc>,
    pub body: Value,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace.
    async fn put(&self, record: Record) -> Result<()>;

    /// Replace only if the stored body's `field` equals `expected`.
    /// Returns whether the write happened. Missing record -> `false`.
    async fn put_if(&self, record: Record, field: &str, expected: &Value) -> Result<bool>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>>;

    async fn append_to_list(&self, key: &str, value: Value) -> Result<()>;

    /// Newest first; `kind = None` means any kind.
    async fn query_recent(
        &self,
        collection: &str,
        kind: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Record>>;
}

#[derive(Default)]
struct Inner {
    seq: u64,
    records: HashMap<(String, String), (u64, Record)>,
    lists: HashMap<String, VecDeque<Value>>,
}

/// Mutex-guarded maps; lists drop their oldest entries past `list_cap`.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    list_cap: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_list_cap(DEFAULT_LIST_CAP)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_list_cap(list_cap: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            list_cap: list_cap.max(1),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("record store lock poisoned"))
    }

    /// Snapshot of a list, oldest first.
    pub fn list(&self, key: &str) -> Result<Vec<Value>> {
        let g = self.lock()?;
        Ok(g.lists
            .get(key)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn insert(g: &mut Inner, record: Record) {
        let key = (record.collection.clone(), record.id.clone());
        // Replacing keeps the original insertion order.
        let seq = match g.records.get(&key) {
            Some((seq, _)) => *seq,
            None => {
                g.seq += 1;
                g.seq
            }
        };
        g.records.insert(key, (seq, record));
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn put(&self, record: Record) -> Result<()> {
        let mut g = self.lock()?;
        Self::insert(&mut g, record);
        Ok(())
    }

    async fn put_if(&self, record: Record, field: &str, expected: &Value) -> Result<bool> {
        let mut g = self.lock()?;
        let key = (record.collection.clone(), record.id.clone());
        let matches = g
            .records
            .get(&key)
            .map(|(_, r)| r.body.get(field) == Some(expected))
            .unwrap_or(false);
        if matches {
            Self::insert(&mut g, record);
        }
        Ok(matches)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>> {
        let g = self.lock()?;
        Ok(g.records
            .get(&(collection.to_string(), id.to_string()))
            .map(|(_, r)| r.clone()))
    }

    async fn append_to_list(&self, key: &str, value: Value) -> Result<()> {
        let cap = self.list_cap;
        let mut g = self.lock()?;
        let list = g.lists.entry(key.to_string()).or_default();
        list.push_back(value);
        while list.len() > cap {
            list.pop_front();
        }
        Ok(())
    }

    async fn query_recent(
        &self,
        collection: &str,
        kind: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Record>> {
        let g = self.lock()?;
        let mut hits: Vec<&(u64, Record)> = g
            .records
            .values()
            .filter(|(_, r)| r.collection == collection)
            .filter(|(_, r)| kind.map_or(true, |k| r.kind == k))
            .collect();
        hits.sort_by(|a, b| {
            b.1.created_at
                .cmp(&a.1.created_at)
                .then_with(|| b.0.cmp(&a.0))
        });
        Ok(hits
            .into_iter()
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect())
    }
}
