//! In-memory [`IndexStore`] for tests and ephemeral runs.
//!
//! Namespaces live in a `HashMap` behind `std::sync::RwLock`; entries are
//! keyed by collection id so upserts replace rather than append.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;

use super::{rank_hits, IndexEntry, IndexHit, IndexStore, NamespaceInfo};

struct Namespace {
    catalog_url: String,
    entries: BTreeMap<String, IndexEntry>,
}

#[derive(Default)]
pub struct InMemoryIndexStore {
    namespaces: RwLock<HashMap<String, Namespace>>,
}

impl InMemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory index lock poisoned")
}

#[async_trait]
impl IndexStore for InMemoryIndexStore {
    async fn put_namespace(
        &self,
        namespace: &str,
        catalog_url: &str,
        entries: &[IndexEntry],
    ) -> Result<()> {
        let mut namespaces = self.namespaces.write().map_err(poisoned)?;
        let ns = namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| Namespace {
                catalog_url: catalog_url.to_string(),
                entries: BTreeMap::new(),
            });
        ns.catalog_url = catalog_url.to_string();
        for entry in entries {
            ns.entries.insert(entry.collection_id.clone(), entry.clone());
        }
        Ok(())
    }

    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        let namespaces = self.namespaces.read().map_err(poisoned)?;
        Ok(namespaces.contains_key(namespace))
    }

    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>> {
        let namespaces = self.namespaces.read().map_err(poisoned)?;
        let mut listed: Vec<NamespaceInfo> = namespaces
            .iter()
            .map(|(name, ns)| NamespaceInfo {
                name: name.clone(),
                catalog_url: ns.catalog_url.clone(),
                collections: ns.entries.len(),
            })
            .collect();
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listed)
    }

    async fn drop_namespace(&self, namespace: &str) -> Result<bool> {
        let mut namespaces = self.namespaces.write().map_err(poisoned)?;
        Ok(namespaces.remove(namespace).is_some())
    }

    async fn query(
        &self,
        namespace: &str,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<IndexHit>> {
        let namespaces = self.namespaces.read().map_err(poisoned)?;
        let Some(ns) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let hits = ns
            .entries
            .values()
            .map(|entry| IndexHit {
                collection_id: entry.collection_id.clone(),
                title: entry.title.clone(),
                description: entry.description.clone(),
                score: cosine_similarity(query_vec, &entry.embedding),
            })
            .collect();

        Ok(rank_hits(hits, limit))
    }
}
