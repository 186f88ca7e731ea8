//! Result paging and page caching for zoekt searches.
//!
//! - `chunks` turns a file's raw line matches into context-padded,
//!   highlighted chunks
//! - `pager` slices the backend's file stream into pages of rendered results
//! - `cache` stores a window of those pages per query so paging forward does
//!   not hit the backend again
//! - `store` holds the redis and in-memory backends the cache writes to

pub mod cache;
pub mod chunks;
mod config;
pub mod error;
pub mod highlight;
pub mod pager;
pub mod store;
pub mod test_utils;
pub mod types;

pub use cache::{cache_key, query_fingerprint, CachedPage, FeatureToggle, PageCache, QueryContext};
pub use chunks::{extract_chunks, ChunkExtractor, ExtractedChunks};
pub use config::{load_config, ChunkConfig, Config, MergeOpts, PageCacheConfig, DEFAULT_NAMESPACE};
pub use error::StoreError;
pub use highlight::highlight;
pub use pager::ResultPager;
pub use store::{InMemoryPageStore, PageStore, RedisPageStore};
pub use types::{
    Chunk, ChunkLine, FileMatch, FileResult, PageMap, ProducedPages, RawLineMatch, SearchResponse,
};

use std::sync::Arc;

/// Pick the store the way the binaries do: redis when `REDIS_URL` is set,
/// otherwise a process-local map.
pub fn default_store() -> Arc<dyn PageStore> {
    match RedisPageStore::from_env() {
        Some(store) => {
            tracing::info!("page cache using redis");
            Arc::new(store)
        }
        None => {
            tracing::info!("REDIS_URL not set; page cache using in-memory store");
            Arc::new(InMemoryPageStore::new())
        }
    }
}
