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

//! Test utilities shared by unit and integration tests.
//!
//! Environment variable management, zoekt response builders and stores that
//! count or fail on demand.

use async_trait::async_trait;
use base64::Engine;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::store::{InMemoryPageStore, PageStore};
use crate::types::{FileMatch, LineFragment, RawLineMatch};

/// Test helper to manage environment variables and ensure proper cleanup
pub struct EnvGuard {
    original_values: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            original_values: HashMap::new(),
        }
    }

    pub fn save_and_clear(&mut self, vars: &[&str]) {
        for &var in vars {
            let original = std::env::var(var).ok();
            self.original_values
                .entry(var.to_string())
                .or_insert(original);
            std::env::remove_var(var);
        }
    }

    /// Set a variable, remembering its prior value if not already saved.
    pub fn set(&mut self, var: &str, value: &str) {
        self.original_values
            .entry(var.to_string())
            .or_insert_with(|| std::env::var(var).ok());
        std::env::set_var(var, value);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (var, original_value) in &self.original_values {
            match original_value {
                Some(value) => std::env::set_var(var, value),
                None => std::env::remove_var(var),
            }
        }
    }
}

impl Default for EnvGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize tracing only once for tests so logs are visible when running
/// `cargo test -- --nocapture`. Respects RUST_LOG when set.
pub fn init_test_logging() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Base64 the way zoekt ships line content.
pub fn encode(text: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(text.as_bytes())
}

/// Build a content match at `line_number`. `fragments` are
/// `(offset, length)` byte pairs; context lines are joined with `\n`.
pub fn line_match(
    line_number: u32,
    text: &str,
    fragments: &[(u32, u32)],
    before: &[String],
    after: &[String],
) -> RawLineMatch {
    let block = |lines: &[String]| {
        if lines.is_empty() {
            String::new()
        } else {
            encode(&lines.join("\n"))
        }
    };
    RawLineMatch {
        line_number,
        line: encode(text),
        fragments: fragments
            .iter()
            .map(|&(line_offset, match_length)| LineFragment {
                line_offset,
                match_length,
            })
            .collect(),
        before: block(before),
        after: block(after),
        file_name: false,
    }
}

/// A match against the file name rather than its content.
pub fn filename_match(name: &str, fragments: &[(u32, u32)]) -> RawLineMatch {
    RawLineMatch {
        file_name: true,
        ..line_match(0, name, fragments, &[], &[])
    }
}

pub fn file_match(name: &str, repository: &str, matches: Vec<RawLineMatch>) -> FileMatch {
    FileMatch {
        file_name: name.to_string(),
        repository: repository.to_string(),
        line_matches: matches,
    }
}

/// In-memory store that counts reads and can be told to fail.
#[derive(Default)]
pub struct CountingStore {
    pub inner: InMemoryPageStore,
    pub gets: AtomicUsize,
    pub fail_reads: bool,
    pub fail_writes: bool,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_reads() -> Self {
        Self {
            fail_reads: true,
            ..Self::default()
        }
    }

    pub fn failing_writes() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageStore for CountingStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads {
            anyhow::bail!("store unavailable");
        }
        self.inner.get(key).await
    }

    async fn set_many_ex(
        &self,
        entries: &[(String, String)],
        ttl: Duration,
    ) -> anyhow::Result<()> {
        if self.fail_writes {
            anyhow::bail!("store unavailable");
        }
        self.inner.set_many_ex(entries, ttl).await
    }
}
