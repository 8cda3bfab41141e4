//! Shared fixtures for cache integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use refstage_cache::storage::{RemoteStore, StoreError, StoreResult};
use refstage_cache::transfer::TransferPolicy;
use refstage_cache::{
    CacheCoordinator, Catalog, CoordinatorOptions, ResourceSources, TransferEngine,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory remote store that counts copies and can damage them
#[derive(Default)]
pub struct FakeStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    /// Remaining downloads to truncate, per URI
    corrupt: Mutex<HashMap<String, u32>>,
    copies: Mutex<HashMap<String, u32>>,
    total_copies: AtomicU32,
    length_calls: AtomicU32,
    unreachable: AtomicBool,
    /// Drop connections on copies only; metadata calls still answer
    copies_unreachable: AtomicBool,
    copy_attempts: AtomicU32,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, uri: &str, len: usize) {
        self.objects
            .lock()
            .unwrap()
            .insert(uri.to_string(), vec![b'N'; len]);
    }

    pub fn remove(&self, uri: &str) {
        self.objects.lock().unwrap().remove(uri);
    }

    /// Truncate the next `times` downloads of `uri`
    pub fn corrupt_next(&self, uri: &str, times: u32) {
        self.corrupt.lock().unwrap().insert(uri.to_string(), times);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_copies_unreachable(&self, unreachable: bool) {
        self.copies_unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Every `copy_to_local` call, including refused ones
    pub fn copy_attempts(&self) -> u32 {
        self.copy_attempts.load(Ordering::SeqCst)
    }

    pub fn copies_of(&self, uri: &str) -> u32 {
        self.copies.lock().unwrap().get(uri).copied().unwrap_or(0)
    }

    pub fn total_copies(&self) -> u32 {
        self.total_copies.load(Ordering::SeqCst)
    }

    /// Remote metadata lookups, a proxy for "touched the store at all"
    pub fn length_calls(&self) -> u32 {
        self.length_calls.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> StoreResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(StoreError::Unreachable("fake store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteStore for FakeStore {
    fn describe(&self) -> String {
        "fake".to_string()
    }

    async fn exists(&self, uri: &str) -> StoreResult<bool> {
        self.check_reachable()?;
        Ok(self.objects.lock().unwrap().contains_key(uri))
    }

    async fn length(&self, uri: &str) -> StoreResult<u64> {
        self.check_reachable()?;
        self.length_calls.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .unwrap()
            .get(uri)
            .map(|data| data.len() as u64)
            .ok_or_else(|| StoreError::NotFound(uri.to_string()))
    }

    async fn copy_to_local(&self, uri: &str, local: &Path) -> StoreResult<()> {
        self.copy_attempts.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        if self.copies_unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Unreachable("connection refused".to_string()));
        }
        let mut data = self
            .objects
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(uri.to_string()))?;

        *self.copies.lock().unwrap().entry(uri.to_string()).or_default() += 1;
        self.total_copies.fetch_add(1, Ordering::SeqCst);

        {
            let mut corrupt = self.corrupt.lock().unwrap();
            if let Some(remaining) = corrupt.get_mut(uri) {
                if *remaining > 0 {
                    *remaining -= 1;
                    data.truncate(data.len() / 2);
                }
            }
        }

        // Yield so concurrent callers interleave
        tokio::time::sleep(Duration::from_millis(2)).await;
        tokio::fs::write(local, data).await?;
        Ok(())
    }

    async fn copy_from_local(&self, local: &Path, uri: &str) -> StoreResult<()> {
        self.check_reachable()?;
        let data = tokio::fs::read(local).await?;
        self.objects.lock().unwrap().insert(uri.to_string(), data);
        Ok(())
    }

    async fn delete(&self, uri: &str) -> StoreResult<()> {
        self.check_reachable()?;
        self.objects.lock().unwrap().remove(uri);
        Ok(())
    }
}

/// Transfer policy with millisecond back-off
pub fn fast_policy() -> TransferPolicy {
    TransferPolicy {
        max_attempts: 3,
        retry_delay: Duration::from_millis(1),
    }
}

pub fn coordinator(store: Arc<FakeStore>, sources: ResourceSources) -> CacheCoordinator {
    let engine = TransferEngine::new(store).with_policy(fast_policy());
    CacheCoordinator::new(Arc::new(Catalog::standard()), sources, engine).with_options(
        CoordinatorOptions {
            heartbeat_interval: Duration::ZERO,
            reference_is_local: false,
        },
    )
}

/// Seed the three variant-dictionary files used throughout the tests
pub fn seed_variant_dict(store: &FakeStore) {
    store.put("s3://refs/hg38.fa", 100);
    store.put("s3://refs/hg38.fa.fai", 10);
    store.put("s3://refs/hg38.dict", 20);
}
