use anyhow::Result;
use std::fs;
use std::time::Duration;

use crate::cache::{EXPIRES_IN, MAX_PAGES};
use crate::chunks::{
    CONTEXT_LINES_COUNT, DEFAULT_REQUESTED_CHUNK_SIZE, MAX_CHUNKS_PER_FILE, NEW_CHUNK_THRESHOLD,
};

pub const DEFAULT_NAMESPACE: &str = "zoekt_search_results";

/// Page cache knobs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageCacheConfig {
    /// Second segment of every cache key.
    pub namespace: String,
    /// Number of pages written on a miss.
    pub max_pages: usize,
    pub expires_in: Duration,
    /// Operational toggle; off means every request goes to the producer.
    pub enabled: bool,
}

impl Default for PageCacheConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            max_pages: MAX_PAGES,
            expires_in: EXPIRES_IN,
            enabled: true,
        }
    }
}

/// Chunking knobs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkConfig {
    pub max_chunks_per_file: usize,
    pub default_requested_chunk_size: usize,
    /// Matches at most this many lines apart share a chunk.
    pub new_chunk_threshold: u32,
    /// Lines of before/after context the backend is asked for.
    pub context_lines: u32,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chunks_per_file: MAX_CHUNKS_PER_FILE,
            default_requested_chunk_size: DEFAULT_REQUESTED_CHUNK_SIZE,
            new_chunk_threshold: NEW_CHUNK_THRESHOLD,
            context_lines: CONTEXT_LINES_COUNT,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    pub cache: PageCacheConfig,
    pub chunks: ChunkConfig,
}

/// CLI-level options that binaries pass to `load_config`.
#[derive(Clone, Debug, Default)]
pub struct MergeOpts {
    pub config_path: Option<std::path::PathBuf>,
    pub cli_namespace: Option<String>,
    pub cli_max_pages: Option<usize>,
    pub cli_expires_in_seconds: Option<u64>,
    pub cli_enabled: Option<bool>,
    pub cli_context_lines: Option<u32>,
    pub cli_new_chunk_threshold: Option<u32>,
}

/// Load and merge Config from: defaults <- config file <- env vars <- CLI
pub fn load_config(mut base: Config, opts: MergeOpts) -> Result<Config> {
    if let Some(path) = opts.config_path.as_ref() {
        if path.exists() {
            let s = fs::read_to_string(path)?;
            let v: toml::Value = toml::from_str(&s)?;
            if let Some(ns) = v.get("namespace").and_then(|x| x.as_str()) {
                base.cache.namespace = ns.to_string();
            }
            if let Some(p) = toml_int::<usize>(&v, "max_pages") {
                base.cache.max_pages = p;
            }
            if let Some(t) = toml_int::<u64>(&v, "expires_in_seconds") {
                base.cache.expires_in = Duration::from_secs(t);
            }
            if let Some(e) = v.get("enabled").and_then(|x| x.as_bool()) {
                base.cache.enabled = e;
            }
            if let Some(c) = toml_int::<u32>(&v, "context_lines") {
                base.chunks.context_lines = c;
            }
            if let Some(t) = toml_int::<u32>(&v, "new_chunk_threshold") {
                base.chunks.new_chunk_threshold = t;
            }
            if let Some(m) = toml_int::<usize>(&v, "max_chunks_per_file") {
                base.chunks.max_chunks_per_file = m;
            }
            if let Some(d) = toml_int::<usize>(&v, "default_requested_chunk_size") {
                base.chunks.default_requested_chunk_size = d;
            }
        }
    }

    // env vars override file
    if let Ok(ns) = std::env::var("ZOEKT_PAGE_CACHE_NAMESPACE") {
        base.cache.namespace = ns;
    }
    if let Some(v) = env_parse::<usize>("ZOEKT_PAGE_CACHE_MAX_PAGES") {
        base.cache.max_pages = v;
    }
    if let Some(v) = env_parse::<u64>("ZOEKT_PAGE_CACHE_EXPIRES_IN_SECONDS") {
        base.cache.expires_in = Duration::from_secs(v);
    }
    if let Some(v) = std::env::var("ZOEKT_PAGE_CACHE_ENABLED")
        .ok()
        .and_then(|s| parse_bool(&s))
    {
        base.cache.enabled = v;
    }
    if let Some(v) = env_parse::<u32>("ZOEKT_PAGE_CACHE_CONTEXT_LINES") {
        base.chunks.context_lines = v;
    }
    if let Some(v) = env_parse::<u32>("ZOEKT_PAGE_CACHE_NEW_CHUNK_THRESHOLD") {
        base.chunks.new_chunk_threshold = v;
    }

    // CLI overrides everything
    if let Some(ns) = opts.cli_namespace {
        base.cache.namespace = ns;
    }
    if let Some(p) = opts.cli_max_pages {
        base.cache.max_pages = p;
    }
    if let Some(t) = opts.cli_expires_in_seconds {
        base.cache.expires_in = Duration::from_secs(t);
    }
    if let Some(e) = opts.cli_enabled {
        base.cache.enabled = e;
    }
    if let Some(c) = opts.cli_context_lines {
        base.chunks.context_lines = c;
    }
    if let Some(t) = opts.cli_new_chunk_threshold {
        base.chunks.new_chunk_threshold = t;
    }

    if base.chunks.new_chunk_threshold > base.chunks.context_lines {
        tracing::warn!(
            new_chunk_threshold = base.chunks.new_chunk_threshold,
            context_lines = base.chunks.context_lines,
            "new_chunk_threshold exceeds context_lines; merged chunks may skip lines"
        );
    }

    Ok(base)
}

/// Integer key from the config file. Negative or out-of-range values are
/// ignored like invalid env values.
fn toml_int<T: TryFrom<i64>>(v: &toml::Value, key: &str) -> Option<T> {
    let raw = v.get(key)?.as_integer()?;
    match T::try_from(raw) {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(key, value = raw, "config value out of range; ignoring");
            None
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, EnvGuard};

    const VARS: &[&str] = &[
        "ZOEKT_PAGE_CACHE_NAMESPACE",
        "ZOEKT_PAGE_CACHE_MAX_PAGES",
        "ZOEKT_PAGE_CACHE_EXPIRES_IN_SECONDS",
        "ZOEKT_PAGE_CACHE_ENABLED",
        "ZOEKT_PAGE_CACHE_CONTEXT_LINES",
        "ZOEKT_PAGE_CACHE_NEW_CHUNK_THRESHOLD",
    ];

    #[test]
    #[serial_test::serial]
    fn test_defaults_without_sources() {
        init_test_logging();
        let mut env = EnvGuard::new();
        env.save_and_clear(VARS);

        let got = load_config(Config::default(), MergeOpts::default()).expect("load");
        assert_eq!(got.cache.namespace, DEFAULT_NAMESPACE);
        assert_eq!(got.cache.max_pages, 10);
        assert_eq!(got.cache.expires_in, Duration::from_secs(300));
        assert!(got.cache.enabled);
        assert_eq!(got.chunks.max_chunks_per_file, 50);
        assert_eq!(got.chunks.default_requested_chunk_size, 3);
        assert_eq!(got.chunks.new_chunk_threshold, 2);
        assert_eq!(got.chunks.context_lines, 3);
    }

    #[test]
    #[serial_test::serial]
    fn test_merge_file_env_cli_precedence() {
        init_test_logging();
        tracing::info!("TEST START: config::tests::test_merge_file_env_cli_precedence");
        let mut env = EnvGuard::new();
        env.save_and_clear(VARS);

        let tmp = tempfile::NamedTempFile::new().expect("tempfile");
        let toml = r#"
namespace = "from_file"
max_pages = 4
expires_in_seconds = 60
context_lines = 5
"#;
        fs::write(tmp.path(), toml).unwrap();

        env.set("ZOEKT_PAGE_CACHE_NAMESPACE", "from_env");
        env.set("ZOEKT_PAGE_CACHE_MAX_PAGES", "6");

        let opts = MergeOpts {
            config_path: Some(tmp.path().to_path_buf()),
            cli_namespace: Some("from_cli".into()),
            ..Default::default()
        };

        let got = load_config(Config::default(), opts).expect("load");
        assert_eq!(got.cache.namespace, "from_cli");
        assert_eq!(got.cache.max_pages, 6);
        assert_eq!(got.cache.expires_in.as_secs(), 60);
        assert_eq!(got.chunks.context_lines, 5);
        tracing::info!("TEST END: config::tests::test_merge_file_env_cli_precedence");
    }

    #[test]
    #[serial_test::serial]
    fn test_invalid_env_is_ignored() {
        init_test_logging();
        let mut env = EnvGuard::new();
        env.save_and_clear(VARS);

        let tmp = tempfile::NamedTempFile::new().expect("tempfile");
        fs::write(tmp.path(), "max_pages = 7\nenabled = false\n").unwrap();

        env.set("ZOEKT_PAGE_CACHE_MAX_PAGES", "not-a-number");
        env.set("ZOEKT_PAGE_CACHE_ENABLED", "maybe");

        let opts = MergeOpts {
            config_path: Some(tmp.path().to_path_buf()),
            ..Default::default()
        };
        let got = load_config(Config::default(), opts).expect("load");
        assert_eq!(got.cache.max_pages, 7);
        assert!(!got.cache.enabled);
    }

    #[test]
    #[serial_test::serial]
    fn test_env_toggle_and_cli_toggle() {
        init_test_logging();
        let mut env = EnvGuard::new();
        env.save_and_clear(VARS);
        env.set("ZOEKT_PAGE_CACHE_ENABLED", "off");

        let got = load_config(Config::default(), MergeOpts::default()).expect("load");
        assert!(!got.cache.enabled);

        let opts = MergeOpts {
            cli_enabled: Some(true),
            ..Default::default()
        };
        let got = load_config(Config::default(), opts).expect("load");
        assert!(got.cache.enabled);
    }

    #[test]
    #[serial_test::serial]
    fn test_missing_file_keeps_base() {
        init_test_logging();
        let mut env = EnvGuard::new();
        env.save_and_clear(VARS);

        let opts = MergeOpts {
            config_path: Some("/nonexistent/zoekt-page-cache.toml".into()),
            cli_new_chunk_threshold: Some(9),
            ..Default::default()
        };
        // threshold above the context window is allowed, only warned about
        let got = load_config(Config::default(), opts).expect("load");
        assert_eq!(got.chunks.new_chunk_threshold, 9);
        assert_eq!(got.cache, PageCacheConfig::default());
    }

    #[test]
    #[serial_test::serial]
    fn test_out_of_range_file_values_are_ignored() {
        init_test_logging();
        let mut env = EnvGuard::new();
        env.save_and_clear(VARS);

        let tmp = tempfile::NamedTempFile::new().expect("tempfile");
        let toml = r#"
context_lines = 4294967297
new_chunk_threshold = -1
max_pages = -3
expires_in_seconds = 90
"#;
        fs::write(tmp.path(), toml).unwrap();
        let opts = MergeOpts {
            config_path: Some(tmp.path().to_path_buf()),
            ..Default::default()
        };
        let got = load_config(Config::default(), opts).expect("load");
        assert_eq!(got.chunks.context_lines, 3);
        assert_eq!(got.chunks.new_chunk_threshold, 2);
        assert_eq!(got.cache.max_pages, 10);
        assert_eq!(got.cache.expires_in.as_secs(), 90);
    }

    #[test]
    #[serial_test::serial]
    fn test_malformed_file_is_an_error() {
        init_test_logging();
        let mut env = EnvGuard::new();
        env.save_and_clear(VARS);

        let tmp = tempfile::NamedTempFile::new().expect("tempfile");
        fs::write(tmp.path(), "max_pages = [").unwrap();
        let opts = MergeOpts {
            config_path: Some(tmp.path().to_path_buf()),
            ..Default::default()
        };
        assert!(load_config(Config::default(), opts).is_err());
    }
}
