//! Single-flight TTL caches for external calls.
//!
//! Every expensive, externally-bound call (LLM extraction, re-ranking,
//! geocoding, query embeddings) is routed through [`CallCache::cached_call`].
//!
//! # Keys
//!
//! Arguments are reduced to a canonical [`KeyPart`] tree through the
//! [`CacheKey`] trait:
//!
//! - maps are sorted by key, so insertion order never matters
//! - sets are sorted and de-duplicated
//! - sequences keep their order
//! - whole floats collapse onto integers (`1.0` and `1` are the same key,
//!   as are `1e16` and `10_000_000_000_000_000`)
//!
//! The tree is hashed with SHA-256 together with the function identity, so
//! two functions with identical arguments never share an entry.
//!
//! # Concurrency
//!
//! Entries live in a [`moka::future::Cache`]. On a miss exactly one caller
//! runs the computation for a given key; concurrent callers for the same key
//! wait and receive the same value. Different keys never wait on each other.
//! Failures are returned to every waiter and are not stored.

use moka::future::Cache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::config::CacheConfig;
use crate::{Error, Result};

// ============ Canonical keys ============

/// Canonical, totally ordered form of a cache argument.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeyPart {
    Null,
    Bool(bool),
    Int(i128),
    /// Bit pattern of a non-integral float.
    Float(u64),
    Str(String),
    Seq(Vec<KeyPart>),
    Set(Vec<KeyPart>),
    Map(Vec<(KeyPart, KeyPart)>),
}

impl KeyPart {
    /// Whole floats are exact integers, so every one inside the `i128` range
    /// maps onto `Int`.
    fn number(n: f64) -> KeyPart {
        if n.fract() == 0.0 && n.abs() < i128::MAX as f64 {
            KeyPart::Int(n as i128)
        } else if n.is_nan() {
            KeyPart::Float(f64::NAN.to_bits())
        } else {
            KeyPart::Float(n.to_bits())
        }
    }

    fn set(mut parts: Vec<KeyPart>) -> KeyPart {
        parts.sort();
        parts.dedup();
        KeyPart::Set(parts)
    }

    fn map(mut entries: Vec<(KeyPart, KeyPart)>) -> KeyPart {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        KeyPart::Map(entries)
    }

    fn feed(&self, hasher: &mut Sha256) {
        match self {
            KeyPart::Null => hasher.update([0u8]),
            KeyPart::Bool(b) => hasher.update([1u8, *b as u8]),
            KeyPart::Int(i) => {
                hasher.update([2u8]);
                hasher.update(i.to_le_bytes());
            }
            KeyPart::Float(bits) => {
                hasher.update([3u8]);
                hasher.update(bits.to_le_bytes());
            }
            KeyPart::Str(s) => {
                hasher.update([4u8]);
                hasher.update((s.len() as u64).to_le_bytes());
                hasher.update(s.as_bytes());
            }
            KeyPart::Seq(items) | KeyPart::Set(items) => {
                hasher.update([if matches!(self, KeyPart::Seq(_)) { 5u8 } else { 6u8 }]);
                hasher.update((items.len() as u64).to_le_bytes());
                for item in items {
                    item.feed(hasher);
                }
            }
            KeyPart::Map(entries) => {
                hasher.update([7u8]);
                hasher.update((entries.len() as u64).to_le_bytes());
                for (k, v) in entries {
                    k.feed(hasher);
                    v.feed(hasher);
                }
            }
        }
    }
}

/// Types usable as cache arguments.
pub trait CacheKey {
    fn key_part(&self) -> KeyPart;
}

/// Hex SHA-256 over the function identity and the canonical argument tree.
pub fn cache_key<A: CacheKey + ?Sized>(fn_id: &str, args: &A) -> String {
    let mut hasher = Sha256::new();
    hasher.update((fn_id.len() as u64).to_le_bytes());
    hasher.update(fn_id.as_bytes());
    args.key_part().feed(&mut hasher);
    hex::encode(hasher.finalize())
}

impl<T: CacheKey + ?Sized> CacheKey for &T {
    fn key_part(&self) -> KeyPart {
        (**self).key_part()
    }
}

impl CacheKey for str {
    fn key_part(&self) -> KeyPart {
        KeyPart::Str(self.to_string())
    }
}

impl CacheKey for String {
    fn key_part(&self) -> KeyPart {
        KeyPart::Str(self.clone())
    }
}

impl CacheKey for bool {
    fn key_part(&self) -> KeyPart {
        KeyPart::Bool(*self)
    }
}

macro_rules! int_key {
    ($($t:ty),*) => {
        $(impl CacheKey for $t {
            fn key_part(&self) -> KeyPart {
                KeyPart::Int(*self as i128)
            }
        })*
    };
}

int_key!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);

impl CacheKey for f64 {
    fn key_part(&self) -> KeyPart {
        KeyPart::number(*self)
    }
}

impl CacheKey for f32 {
    fn key_part(&self) -> KeyPart {
        KeyPart::number(*self as f64)
    }
}

impl<T: CacheKey> CacheKey for Option<T> {
    fn key_part(&self) -> KeyPart {
        match self {
            Some(v) => v.key_part(),
            None => KeyPart::Null,
        }
    }
}

impl<T: CacheKey> CacheKey for [T] {
    fn key_part(&self) -> KeyPart {
        KeyPart::Seq(self.iter().map(CacheKey::key_part).collect())
    }
}

impl<T: CacheKey> CacheKey for Vec<T> {
    fn key_part(&self) -> KeyPart {
        self.as_slice().key_part()
    }
}

impl<T: CacheKey, S> CacheKey for HashSet<T, S> {
    fn key_part(&self) -> KeyPart {
        KeyPart::set(self.iter().map(CacheKey::key_part).collect())
    }
}

impl<T: CacheKey> CacheKey for BTreeSet<T> {
    fn key_part(&self) -> KeyPart {
        KeyPart::set(self.iter().map(CacheKey::key_part).collect())
    }
}

impl<K: CacheKey, V: CacheKey, S> CacheKey for HashMap<K, V, S> {
    fn key_part(&self) -> KeyPart {
        KeyPart::map(self.iter().map(|(k, v)| (k.key_part(), v.key_part())).collect())
    }
}

impl<K: CacheKey, V: CacheKey> CacheKey for BTreeMap<K, V> {
    fn key_part(&self) -> KeyPart {
        KeyPart::map(self.iter().map(|(k, v)| (k.key_part(), v.key_part())).collect())
    }
}

impl CacheKey for Value {
    fn key_part(&self) -> KeyPart {
        match self {
            Value::Null => KeyPart::Null,
            Value::Bool(b) => KeyPart::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    KeyPart::Int(i as i128)
                } else if let Some(u) = n.as_u64() {
                    KeyPart::Int(u as i128)
                } else {
                    KeyPart::number(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => KeyPart::Str(s.clone()),
            Value::Array(items) => KeyPart::Seq(items.iter().map(CacheKey::key_part).collect()),
            Value::Object(map) => KeyPart::map(
                map.iter()
                    .map(|(k, v)| (KeyPart::Str(k.clone()), v.key_part()))
                    .collect(),
            ),
        }
    }
}

macro_rules! tuple_key {
    ($($name:ident),+) => {
        impl<$($name: CacheKey),+> CacheKey for ($($name,)+) {
            #[allow(non_snake_case)]
            fn key_part(&self) -> KeyPart {
                let ($($name,)+) = self;
                KeyPart::Seq(vec![$($name.key_part()),+])
            }
        }
    };
}

tuple_key!(A);
tuple_key!(A, B);
tuple_key!(A, B, C);
tuple_key!(A, B, C, D);

// ============ Call cache ============

/// A named TTL cache wrapping one kind of external call.
pub struct CallCache {
    name: &'static str,
    entries: Cache<String, Value>,
}

impl CallCache {
    pub fn new(name: &'static str, ttl: Duration, max_entries: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self { name, entries }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the cached result of `compute` for `(fn_id, args)`, running it
    /// at most once per key among concurrent callers.
    pub async fn cached_call<A, T, F, Fut>(&self, fn_id: &str, args: &A, compute: F) -> Result<T>
    where
        A: CacheKey + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let key = cache_key(fn_id, args);

        if let Some(hit) = self.entries.get(&key).await {
            debug!(cache = self.name, fn_id, "cache hit");
            return self.decode(hit);
        }

        debug!(cache = self.name, fn_id, "cache miss");
        let name = self.name;
        let value = self
            .entries
            .try_get_with(key, async move {
                let result = compute().await?;
                serde_json::to_value(&result)
                    .map_err(|e| Error::storage(format!("cache {}: encode failed: {}", name, e)))
            })
            .await
            .map_err(|e| (*e).clone())?;

        self.decode(value)
    }

    fn decode<T: DeserializeOwned>(&self, value: Value) -> Result<T> {
        serde_json::from_value(value)
            .map_err(|e| Error::storage(format!("cache {}: decode failed: {}", self.name, e)))
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
    }
}

/// The three cache instances shared by the pipeline.
pub struct CacheSet {
    /// Location phrases and geocoded polygons.
    pub geocoding: CallCache,
    /// Query embeddings.
    pub embedding: CallCache,
    /// LLM framing, re-ranking and sub-extractions.
    pub extraction: CallCache,
}

impl CacheSet {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            geocoding: CallCache::new(
                "geocoding",
                Duration::from_secs(config.geocoding_ttl_secs),
                config.max_entries,
            ),
            embedding: CallCache::new(
                "embedding",
                Duration::from_secs(config.embedding_ttl_secs),
                config.max_entries,
            ),
            extraction: CallCache::new(
                "extraction",
                Duration::from_secs(config.extraction_ttl_secs),
                config.max_entries,
            ),
        }
    }

    pub fn clear_all(&self) {
        self.geocoding.clear();
        self.embedding.clear();
        self.extraction.clear();
        debug!("all caches cleared");
    }
}

impl Default for CacheSet {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
