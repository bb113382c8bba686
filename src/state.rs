// src/state.rs
use std::sync::Arc;

use crate::cache::ResultsCache;
use crate::config::Config;
use crate::poll::PollService;
use crate::results::ResultsService;
use crate::store::Store;
use crate::vote::VoteService;

pub struct AppState {
    pub polls: PollService,
    pub votes: VoteService,
    pub results: ResultsService,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: &Config) -> Arc<Self> {
        let cache = Arc::new(ResultsCache::new(
            config.results_cache_capacity,
            config.results_cache_ttl,
        ));

        Arc::new(Self {
            polls: PollService::new(store.clone(), cache.clone()),
            votes: VoteService::new(store.clone(), cache.clone()),
            results: ResultsService::new(store, cache),
        })
    }
}
