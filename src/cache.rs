// cache.rs
//! Short-lived, poll-scoped cache of results snapshots.
//!
//! The cache is advisory: dropping any entry only costs one recomputation.
//! Writers call [`ResultsCache::invalidate`] after every committed vote change.
//! Readers that recompute a snapshot take a [`FillToken`] *before* reading the
//! ledger and fill through [`ResultsCache::set_unless_invalidated`], so a
//! snapshot computed before a concurrent invalidation never lands in the cache.
//!
//! Fills and invalidations both go through moka's per-key compute, which runs
//! serially for one key: a fill either lands before the removal or sees the
//! bumped epoch.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use moka::Expiry;
use tracing::debug;
use uuid::Uuid;

use crate::models::ResultsSnapshot;

#[derive(Clone)]
struct CachedResults {
    snapshot: Arc<ResultsSnapshot>,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<Uuid, CachedResults> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _poll_id: &Uuid,
        value: &CachedResults,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _poll_id: &Uuid,
        value: &CachedResults,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Invalidation epoch observed before a recomputation started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillToken(u64);

pub struct ResultsCache {
    entries: Cache<Uuid, CachedResults>,
    epoch: AtomicU64,
    ttl: Duration,
}

impl ResultsCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(capacity)
                .expire_after(PerEntryTtl)
                .build(),
            epoch: AtomicU64::new(0),
            ttl,
        }
    }

    /// Default lifetime for entries filled by the aggregator.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, poll_id: Uuid) -> Option<Arc<ResultsSnapshot>> {
        let hit = self.entries.get(&poll_id).await.map(|cached| cached.snapshot);
        debug!(%poll_id, hit = hit.is_some(), "results cache lookup");
        hit
    }

    pub async fn set(&self, poll_id: Uuid, snapshot: Arc<ResultsSnapshot>, ttl: Duration) {
        self.entries
            .insert(poll_id, CachedResults { snapshot, ttl })
            .await;
    }

    pub fn fill_token(&self) -> FillToken {
        FillToken(self.epoch.load(Ordering::SeqCst))
    }

    /// Stores `snapshot` only if no invalidation happened since `token` was taken.
    /// Returns whether the entry was kept.
    pub async fn set_unless_invalidated(
        &self,
        token: FillToken,
        poll_id: Uuid,
        snapshot: Arc<ResultsSnapshot>,
        ttl: Duration,
    ) -> bool {
        let cached = CachedResults { snapshot, ttl };
        let outcome = self
            .entries
            .entry(poll_id)
            .and_compute_with(|_current| {
                let op = if self.fill_token() == token {
                    Op::Put(cached)
                } else {
                    Op::Nop
                };
                std::future::ready(op)
            })
            .await;

        let kept = matches!(outcome, CompResult::Inserted(_) | CompResult::ReplacedWith(_));
        if !kept {
            debug!(%poll_id, "skipping results cache fill after invalidation");
        }
        kept
    }

    pub async fn invalidate(&self, poll_id: Uuid) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.entries
            .entry(poll_id)
            .and_compute_with(|_current| std::future::ready(Op::Remove))
            .await;
        debug!(%poll_id, "results cache invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(poll_id: Uuid, total_votes: i64) -> Arc<ResultsSnapshot> {
        Arc::new(ResultsSnapshot {
            poll_id,
            question: "Q?".into(),
            options: Vec::new(),
            total_votes,
        })
    }

    #[tokio::test]
    async fn set_then_get_returns_snapshot() {
        let cache = ResultsCache::new(100, Duration::from_secs(5));
        let poll_id = Uuid::new_v4();

        cache.set(poll_id, snapshot(poll_id, 3), cache.ttl()).await;

        assert_eq!(cache.get(poll_id).await.unwrap().total_votes, 3);
        assert!(cache.get(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn entries_expire_after_their_ttl() {
        let cache = ResultsCache::new(100, Duration::from_secs(5));
        let poll_id = Uuid::new_v4();

        cache
            .set(poll_id, snapshot(poll_id, 1), Duration::from_millis(50))
            .await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(cache.get(poll_id).await.is_none());
    }

    #[tokio::test]
    async fn invalidation_is_poll_scoped() {
        let cache = ResultsCache::new(100, Duration::from_secs(5));
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
        cache.set(first, snapshot(first, 1), cache.ttl()).await;
        cache.set(second, snapshot(second, 2), cache.ttl()).await;

        cache.invalidate(first).await;

        assert!(cache.get(first).await.is_none());
        assert!(cache.get(second).await.is_some());
    }

    #[tokio::test]
    async fn fill_after_invalidation_is_discarded() {
        let cache = ResultsCache::new(100, Duration::from_secs(5));
        let poll_id = Uuid::new_v4();

        let token = cache.fill_token();
        cache.invalidate(poll_id).await;
        let kept = cache
            .set_unless_invalidated(token, poll_id, snapshot(poll_id, 0), cache.ttl())
            .await;

        assert!(!kept);
        assert!(cache.get(poll_id).await.is_none());

        let token = cache.fill_token();
        let kept = cache
            .set_unless_invalidated(token, poll_id, snapshot(poll_id, 1), cache.ttl())
            .await;
        assert!(kept);
        assert_eq!(cache.get(poll_id).await.unwrap().total_votes, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn no_stale_fill_is_visible_once_invalidate_returns() {
        let cache = Arc::new(ResultsCache::new(100, Duration::from_secs(5)));
        let poll_id = Uuid::new_v4();

        for _ in 0..200 {
            let token = cache.fill_token();
            let filler = {
                let cache = cache.clone();
                tokio::spawn(async move {
                    cache
                        .set_unless_invalidated(token, poll_id, snapshot(poll_id, 0), cache.ttl())
                        .await
                })
            };

            cache.invalidate(poll_id).await;
            let seen = cache.get(poll_id).await;
            filler.await.unwrap();

            assert!(seen.is_none());
            assert!(cache.get(poll_id).await.is_none());
        }
    }
}
