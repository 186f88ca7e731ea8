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

//! Wire shapes consumed from the zoekt backend and the rendered values
//! produced for the web client.
//!
//! The backend side mirrors zoekt's JSON field names (`FileName`,
//! `LineMatches`, ...). Every field is defaulted so partial or older
//! responses still deserialize; malformed match data degrades to empty values
//! instead of failing the request.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level body returned by zoekt's `/api/search`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(rename = "Result", default)]
    pub result: SearchResult,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(rename = "Files", default, deserialize_with = "null_as_default")]
    pub files: Vec<FileMatch>,
}

impl SearchResponse {
    /// Files in the order the backend ranked them.
    pub fn files(&self) -> impl Iterator<Item = &FileMatch> {
        self.result.files.iter()
    }

    pub fn into_files(self) -> Vec<FileMatch> {
        self.result.files
    }
}

/// One file with its per-line matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileMatch {
    #[serde(rename = "FileName", default)]
    pub file_name: String,
    #[serde(rename = "Repository", default)]
    pub repository: String,
    #[serde(rename = "LineMatches", default, deserialize_with = "null_as_default")]
    pub line_matches: Vec<RawLineMatch>,
}

impl FileMatch {
    /// Numeric id of the searchable unit (project) owning this file.
    /// Zoekt reports repositories by name; the indexer names them by id, so a
    /// leading run of digits is taken and anything else maps to 0.
    pub fn scope_unit_id(&self) -> u64 {
        let digits: String = self
            .repository
            .trim()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().unwrap_or(0)
    }

    /// Sum of fragment counts across every raw match, ignoring any cap.
    pub fn match_count_total(&self) -> usize {
        self.line_matches.iter().map(|m| m.fragments.len()).sum()
    }
}

/// A single matched line as produced by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLineMatch {
    /// 1-based line number.
    #[serde(rename = "LineNumber", default)]
    pub line_number: u32,
    /// Base64 encoded line body.
    #[serde(rename = "Line", default)]
    pub line: String,
    #[serde(rename = "LineFragments", default, deserialize_with = "null_as_default")]
    pub fragments: Vec<LineFragment>,
    /// Base64 encoded block of lines preceding the match.
    #[serde(rename = "Before", default, deserialize_with = "null_as_default")]
    pub before: String,
    /// Base64 encoded block of lines following the match.
    #[serde(rename = "After", default, deserialize_with = "null_as_default")]
    pub after: String,
    /// Set when zoekt matched the file name rather than a line body.
    #[serde(rename = "FileName", default)]
    pub file_name: bool,
}

impl RawLineMatch {
    pub fn is_filename_match(&self) -> bool {
        self.file_name
    }

    /// Decoded line body. Invalid base64 yields an empty line.
    pub fn decoded_line(&self) -> Vec<u8> {
        decode_block(&self.line)
    }

    /// Fragment ranges as `(byte offset, byte length)` pairs.
    pub fn ranges(&self) -> Vec<(usize, usize)> {
        self.fragments
            .iter()
            .map(|f| (f.line_offset as usize, f.match_length as usize))
            .collect()
    }
}

/// Byte range of one match within a line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineFragment {
    #[serde(rename = "LineOffset", default)]
    pub line_offset: u32,
    #[serde(rename = "MatchLength", default)]
    pub match_length: u32,
}

/// Decode a base64 block, falling back to empty bytes.
pub(crate) fn decode_block(encoded: &str) -> Vec<u8> {
    if encoded.is_empty() {
        return Vec::new();
    }
    match base64::engine::general_purpose::STANDARD.decode(encoded.trim()) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(error = %e, "undecodable base64 block; treating as empty");
            Vec::new()
        }
    }
}

fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

/// One rendered line inside a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLine {
    pub line_number: u32,
    /// Plain decoded text.
    pub text: String,
    /// HTML-safe text with matches wrapped in `<b>` tags. Context lines are
    /// not highlighted.
    pub rich_text: String,
}

/// A contiguous, context-padded group of lines shown together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub match_count_in_chunk: usize,
    /// Strictly increasing by `line_number`.
    pub lines: Vec<ChunkLine>,
}

/// A file's rendered matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileResult {
    pub path: String,
    pub project_id: u64,
    pub chunks: Vec<Chunk>,
    /// Every fragment the backend reported for the file.
    pub match_count_total: usize,
    /// Fragments represented in `chunks`.
    pub match_count: usize,
}

/// Page index (0-based) to the files on that page.
pub type PageMap = BTreeMap<usize, Vec<FileResult>>;

/// What a page producer hands back to the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducedPages {
    pub pages: PageMap,
    pub total_count: usize,
}

impl ProducedPages {
    pub fn new(pages: PageMap, total_count: usize) -> Self {
        Self { pages, total_count }
    }

    pub fn is_empty(&self) -> bool {
        self.pages.values().all(|files| files.is_empty())
    }
}
