// Copyright 2025 HyperZoekt Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Fingerprinted, multi-page, TTL-bound cache in front of a page producer.
//!
//! A miss asks the producer for a window of pages (at least `max_pages`) and
//! writes each non-empty page in `0..max_pages` under its own key in a single
//! atomic batch, so paging forward through results is served from the store.
//! Entries are never invalidated here; they simply expire.
//!
//! Keys look like
//! `cache:<namespace>:{<actor_id_or_0>}/<sha256(query|scope)>/<page_size>/<page_index>`.
//! The braces pin all of an actor's pages to one hash slot on clustered redis.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::PageCacheConfig;
use crate::error::StoreError;
use crate::store::PageStore;
use crate::types::{FileResult, ProducedPages};

pub const MAX_PAGES: usize = 10;
pub const EXPIRES_IN: Duration = Duration::from_secs(5 * 60);
pub const ANONYMOUS_ACTOR: &str = "0";
pub const PAYLOAD_VERSION: u32 = 1;

/// Everything about a search request that affects which page is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContext {
    pub query: String,
    pub actor_id: Option<u64>,
    /// Searchable units (projects) in the caller's order.
    pub scope: Vec<u64>,
    pub page_size: usize,
    /// 1-based page number as requested by the client.
    pub page: usize,
    /// Largest page size the backend accepts.
    pub max_page_size: usize,
}

impl QueryContext {
    /// Page number, treating 0 as the first page.
    pub fn page_number(&self) -> usize {
        self.page.max(1)
    }

    /// 0-based index of the requested page.
    pub fn page_index(&self) -> usize {
        self.page_number() - 1
    }

    /// A request is cacheable only with a non-empty scope of unique ids and a
    /// page size within bounds.
    pub fn is_cacheable(&self) -> bool {
        if self.scope.is_empty() || self.page_size == 0 || self.page_size > self.max_page_size {
            return false;
        }
        let unique: HashSet<&u64> = self.scope.iter().collect();
        unique.len() == self.scope.len()
    }
}

/// Hex SHA-256 of the query and its sorted scope ids.
pub fn query_fingerprint(query: &str, scope: &[u64]) -> String {
    let mut ids = scope.to_vec();
    ids.sort_unstable();
    let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();

    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher.update(b"|");
    hasher.update(ids.join(",").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Derive the store key for one page of one request.
pub fn cache_key(
    namespace: &str,
    actor_id: Option<u64>,
    query: &str,
    scope: &[u64],
    page_size: usize,
    page_index: usize,
) -> String {
    let actor = actor_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| ANONYMOUS_ACTOR.to_string());
    format!(
        "cache:{}:{{{}}}/{}/{}/{}",
        namespace,
        actor,
        query_fingerprint(query, scope),
        page_size,
        page_index
    )
}

/// One page as held in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPage {
    pub page_index: usize,
    pub files: Vec<FileResult>,
    pub total_count: usize,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    v: u32,
    pages: BTreeMap<usize, Vec<FileResult>>,
    total_count: usize,
}

impl CachedPage {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let mut pages = BTreeMap::new();
        pages.insert(self.page_index, self.files.clone());
        serde_json::to_string(&Envelope {
            v: PAYLOAD_VERSION,
            pages,
            total_count: self.total_count,
        })
    }

    /// `None` for payloads from another format version or for another page.
    pub fn decode(raw: &str, page_index: usize) -> Result<Option<Self>, serde_json::Error> {
        let mut envelope: Envelope = serde_json::from_str(raw)?;
        if envelope.v != PAYLOAD_VERSION {
            return Ok(None);
        }
        Ok(envelope.pages.remove(&page_index).map(|files| CachedPage {
            page_index,
            files,
            total_count: envelope.total_count,
        }))
    }
}

/// Boolean switch for the whole cache, read on every request.
pub trait FeatureToggle: Send + Sync {
    fn is_enabled(&self) -> bool;
}

impl FeatureToggle for AtomicBool {
    fn is_enabled(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

impl FeatureToggle for bool {
    fn is_enabled(&self) -> bool {
        *self
    }
}

pub struct PageCache {
    store: Arc<dyn PageStore>,
    config: PageCacheConfig,
    toggle: Arc<dyn FeatureToggle>,
}

impl PageCache {
    /// The toggle starts from `config.enabled`.
    pub fn new(store: Arc<dyn PageStore>, config: PageCacheConfig) -> Self {
        let toggle = Arc::new(AtomicBool::new(config.enabled));
        Self {
            store,
            config,
            toggle,
        }
    }

    pub fn with_toggle(mut self, toggle: Arc<dyn FeatureToggle>) -> Self {
        self.toggle = toggle;
        self
    }

    pub fn config(&self) -> &PageCacheConfig {
        &self.config
    }

    pub fn enabled(&self, ctx: &QueryContext) -> bool {
        self.toggle.is_enabled() && ctx.is_cacheable()
    }

    pub fn key_for(&self, ctx: &QueryContext, page_index: usize) -> String {
        cache_key(
            &self.config.namespace,
            ctx.actor_id,
            &ctx.query,
            &ctx.scope,
            ctx.page_size,
            page_index,
        )
    }

    /// Return the requested page's files and the total match count.
    ///
    /// `produce` receives a page limit and must return pages `0..limit`.
    /// Producer and store errors are returned unchanged.
    pub async fn fetch<F, Fut>(
        &self,
        ctx: &QueryContext,
        produce: F,
    ) -> anyhow::Result<(Vec<FileResult>, usize)>
    where
        F: FnOnce(usize) -> Fut,
        Fut: Future<Output = anyhow::Result<ProducedPages>>,
    {
        let page_index = ctx.page_index();

        if !self.enabled(ctx) {
            tracing::debug!(page = ctx.page_number(), "page cache bypassed");
            let produced = produce(ctx.page_number()).await?;
            return Ok(take_page(produced, page_index));
        }

        let key = self.key_for(ctx, page_index);
        if let Some(hit) = self.read(&key, page_index).await? {
            tracing::debug!(%key, "page cache hit");
            return Ok((hit.files, hit.total_count));
        }

        let page_limit = ctx.page_number().max(self.config.max_pages);
        tracing::debug!(%key, page_limit, "page cache miss");
        let produced = produce(page_limit).await?;
        self.write(ctx, &produced).await?;
        Ok(take_page(produced, page_index))
    }

    async fn read(&self, key: &str, page_index: usize) -> anyhow::Result<Option<CachedPage>> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        match CachedPage::decode(&raw, page_index) {
            Ok(Some(page)) => Ok(Some(page)),
            Ok(None) => {
                tracing::warn!(%key, "cached page has another format version; ignoring");
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(%key, error = %e, "undecodable cached page; ignoring");
                Ok(None)
            }
        }
    }

    async fn write(&self, ctx: &QueryContext, produced: &ProducedPages) -> anyhow::Result<()> {
        if produced.is_empty() || produced.total_count == 0 {
            tracing::debug!("producer returned nothing; not caching");
            return Ok(());
        }

        let mut entries = Vec::new();
        for (&page_index, files) in produced.pages.range(0..self.config.max_pages) {
            if files.is_empty() {
                continue;
            }
            let page = CachedPage {
                page_index,
                files: files.clone(),
                total_count: produced.total_count,
            };
            entries.push((
                self.key_for(ctx, page_index),
                page.encode().map_err(StoreError::from)?,
            ));
        }
        if entries.is_empty() {
            return Ok(());
        }

        self.store
            .set_many_ex(&entries, self.config.expires_in)
            .await?;
        tracing::info!(
            pages = entries.len(),
            total_count = produced.total_count,
            ttl_secs = self.config.expires_in.as_secs(),
            "cached result pages"
        );
        Ok(())
    }
}

fn take_page(mut produced: ProducedPages, page_index: usize) -> (Vec<FileResult>, usize) {
    (
        produced.pages.remove(&page_index).unwrap_or_default(),
        produced.total_count,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> QueryContext {
        QueryContext {
            query: "needle".into(),
            actor_id: Some(7),
            scope: vec![3, 1, 2],
            page_size: 20,
            page: 1,
            max_page_size: 100,
        }
    }

    #[test]
    fn key_has_expected_shape() {
        let key = cache_key("ns", Some(7), "needle", &[3, 1, 2], 20, 4);
        let parts: Vec<&str> = key.split('/').collect();
        assert_eq!(parts[0], "cache:ns:{7}");
        assert_eq!(parts[1].len(), 64);
        assert!(parts[1].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(parts[2], "20");
        assert_eq!(parts[3], "4");
    }

    #[test]
    fn anonymous_actor_uses_sentinel() {
        let key = cache_key("ns", None, "q", &[1], 20, 0);
        assert!(key.starts_with("cache:ns:{0}/"));
    }

    #[test]
    fn fingerprint_ignores_scope_order() {
        assert_eq!(query_fingerprint("q", &[3, 1, 2]), query_fingerprint("q", &[1, 2, 3]));
        assert_ne!(query_fingerprint("q", &[1, 2]), query_fingerprint("q", &[1, 3]));
        assert_ne!(query_fingerprint("q1", &[2]), query_fingerprint("q", &[12]));
    }

    #[test]
    fn cacheability_rules() {
        assert!(ctx().is_cacheable());

        let mut c = ctx();
        c.scope.clear();
        assert!(!c.is_cacheable());

        let mut c = ctx();
        c.scope = vec![1, 1];
        assert!(!c.is_cacheable());

        let mut c = ctx();
        c.page_size = 101;
        assert!(!c.is_cacheable());
    }

    #[test]
    fn page_zero_is_first_page() {
        let mut c = ctx();
        c.page = 0;
        assert_eq!(c.page_number(), 1);
        assert_eq!(c.page_index(), 0);
    }

    #[test]
    fn payload_round_trips_and_checks_version() {
        let page = CachedPage {
            page_index: 2,
            files: vec![],
            total_count: 9,
        };
        let raw = page.encode().unwrap();
        assert_eq!(CachedPage::decode(&raw, 2).unwrap(), Some(page));
        assert_eq!(CachedPage::decode(&raw, 3).unwrap(), None);

        let future = raw.replace("\"v\":1", "\"v\":2");
        assert_eq!(CachedPage::decode(&future, 2).unwrap(), None);

        let extra = raw.replace("\"v\":1", "\"v\":1,\"producer\":\"other\"");
        assert!(CachedPage::decode(&extra, 2).unwrap().is_some());
    }

    #[test]
    fn toggle_impls() {
        assert!(true.is_enabled());
        let flag = AtomicBool::new(false);
        assert!(!flag.is_enabled());
        flag.store(true, Ordering::SeqCst);
        assert!(flag.is_enabled());
    }
}
