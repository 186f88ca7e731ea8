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

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;
use zoekt_page_cache::{
    ChunkExtractor, Config, MergeOpts, PageCache, QueryContext, ResultPager, SearchResponse,
};

/// Render a zoekt JSON search response into paged, chunked results.
#[derive(Parser)]
struct Opts {
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// zoekt response to read; stdin when omitted
    input: Option<PathBuf>,
    #[arg(long, default_value_t = 20)]
    page_size: usize,
    /// Number of pages to render
    #[arg(long, default_value_t = 10)]
    page_limit: usize,
    /// Chunks per file (clamped to the configured maximum)
    #[arg(long)]
    chunks: Option<usize>,
    #[arg(long)]
    context_lines: Option<u32>,
    /// Matches at most this many lines apart share a chunk
    #[arg(long)]
    new_chunk_threshold: Option<u32>,
    /// Cache key namespace (env: ZOEKT_PAGE_CACHE_NAMESPACE)
    #[arg(long)]
    namespace: Option<String>,
    /// Pages written per cache miss
    #[arg(long)]
    max_pages: Option<usize>,
    #[arg(long)]
    expires_in_seconds: Option<u64>,
    /// Turn the page cache on or off (env: ZOEKT_PAGE_CACHE_ENABLED)
    #[arg(long)]
    cache_enabled: Option<bool>,
    /// Serve a single page through the page cache for this query instead of
    /// printing every page
    #[arg(long)]
    query: Option<String>,
    /// Comma separated scope ids used with --query
    #[arg(long, value_delimiter = ',')]
    scope: Vec<u64>,
    /// 1-based page used with --query
    #[arg(long, default_value_t = 1)]
    page: usize,
    #[arg(long)]
    actor_id: Option<u64>,
}

fn merge_opts(opts: &Opts) -> MergeOpts {
    MergeOpts {
        config_path: opts.config.clone(),
        cli_namespace: opts.namespace.clone(),
        cli_max_pages: opts.max_pages,
        cli_expires_in_seconds: opts.expires_in_seconds,
        cli_enabled: opts.cache_enabled,
        cli_context_lines: opts.context_lines,
        cli_new_chunk_threshold: opts.new_chunk_threshold,
    }
}

async fn read_input(path: Option<&PathBuf>) -> Result<String> {
    let mut buf = String::new();
    match path {
        Some(p) => {
            buf = tokio::fs::read_to_string(p)
                .await
                .with_context(|| format!("reading {}", p.display()))?;
        }
        None => {
            tokio::io::stdin().read_to_string(&mut buf).await?;
        }
    }
    Ok(buf)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing using the RUST_LOG env var when present, default to `info`
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let opts = Opts::parse();

    let cfg = zoekt_page_cache::load_config(Config::default(), merge_opts(&opts))?;

    let raw = read_input(opts.input.as_ref()).await?;
    let response: SearchResponse =
        serde_json::from_str(&raw).context("parsing zoekt search response")?;
    let pager = ResultPager::new(ChunkExtractor::from_config(&cfg.chunks, opts.chunks));
    tracing::info!(
        files = response.result.files.len(),
        page_size = opts.page_size,
        max_chunks = pager.extractor().max_chunks(),
        "rendering search response"
    );

    let out = match opts.query {
        None => {
            let produced = pager.produce(response.files(), opts.page_size, opts.page_limit);
            json!({ "pages": produced.pages, "total_count": produced.total_count })
        }
        Some(query) => {
            let cache = PageCache::new(zoekt_page_cache::default_store(), cfg.cache.clone());
            let ctx = QueryContext {
                query,
                actor_id: opts.actor_id,
                scope: opts.scope,
                page_size: opts.page_size,
                page: opts.page,
                max_page_size: opts.page_size.max(1),
            };
            let files = response.into_files();
            let page_size = ctx.page_size;
            let (results, total_count) = cache
                .fetch(&ctx, |page_limit| async move {
                    Ok(pager.produce(&files, page_size, page_limit))
                })
                .await?;
            json!({ "page": ctx.page_number(), "results": results, "total_count": total_count })
        }
    };

    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
