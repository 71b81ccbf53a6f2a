//! Tracked-product repository over a single persisted document.
//!
//! The whole product map lives under [`PRODUCTS_KEY`]. Each mutation reads
//! the full map, changes it and writes it back; concurrent writers resolve
//! as last-writer-wins.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::storage::KeyValueStore;
use crate::types::TrackedProduct;

/// Store key holding the `{ id: TrackedProduct }` map.
pub const PRODUCTS_KEY: &str = "trackedProducts";

/// Read/modify/write access to tracked products.
#[derive(Clone)]
pub struct ProductRepository {
    store: Arc<dyn KeyValueStore>,
}

impl ProductRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The underlying store, shared with settings persistence.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// The persisted map as stored, unreadable records included.
    async fn read_raw(&self) -> Result<Map<String, Value>> {
        match self.store.get(PRODUCTS_KEY).await? {
            Some(Value::Object(map)) => Ok(map),
            Some(Value::Null) | None => Ok(Map::new()),
            Some(_) => {
                tracing::warn!("{PRODUCTS_KEY} is not an object; treating as empty");
                Ok(Map::new())
            }
        }
    }

    /// All tracked products, ordered by id.
    ///
    /// Records that no longer deserialize are skipped with a warning rather
    /// than failing the whole read. They stay on disk untouched.
    pub async fn get_all(&self) -> Result<BTreeMap<String, TrackedProduct>> {
        let mut products = BTreeMap::new();
        for (id, record) in self.read_raw().await? {
            if let Some(product) = parse_record(&id, record) {
                products.insert(id, product);
            }
        }
        Ok(products)
    }

    pub async fn get(&self, id: &str) -> Result<Option<TrackedProduct>> {
        let mut raw = self.read_raw().await?;
        Ok(raw.remove(id).and_then(|record| parse_record(id, record)))
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.get_all().await?.len())
    }

    /// Insert or replace a product, enforcing record invariants.
    ///
    /// An `initial_price` already on disk always wins over the incoming one;
    /// a missing one is backfilled; history is capped. Only the product's own
    /// key is rewritten.
    pub async fn upsert(&self, mut product: TrackedProduct) -> Result<TrackedProduct> {
        let mut raw = self.read_raw().await?;
        let stored_initial = raw
            .get(&product.id)
            .and_then(|record| record.get("initialPrice"))
            .and_then(Value::as_u64)
            .filter(|p| *p > 0);
        if let Some(initial) = stored_initial {
            product.initial_price = Some(initial);
        }
        product.ensure_initial_price();
        product.cap_history();
        raw.insert(product.id.clone(), serde_json::to_value(&product)?);
        self.store.set(PRODUCTS_KEY, Value::Object(raw)).await?;
        Ok(product)
    }

    /// Delete a product. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let mut raw = self.read_raw().await?;
        if raw.remove(id).is_none() {
            return Ok(false);
        }
        self.store.set(PRODUCTS_KEY, Value::Object(raw)).await?;
        Ok(true)
    }
}

fn parse_record(id: &str, record: Value) -> Option<TrackedProduct> {
    match serde_json::from_value::<TrackedProduct>(record) {
        Ok(mut product) => {
            if product.id.is_empty() {
                product.id = id.to_string();
            }
            Some(product)
        }
        Err(e) => {
            tracing::warn!("skipping unreadable product record {id}: {e}");
            None
        }
    }
}
