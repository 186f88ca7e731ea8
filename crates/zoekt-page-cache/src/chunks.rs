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

//! Grouping of a file's line matches into context-padded chunks.
//!
//! Matches are walked once in line order. A chunk is opened at a match, padded
//! with the match's before-context when the previous match is far enough
//! away, extended with after-context, and closed as soon as the next match is
//! more than `merge_threshold` lines further down. Scanning stops once the
//! chunk cap is reached; the uncapped match total is computed separately from
//! the raw matches so callers can tell how much was left out.

use std::collections::BTreeMap;

use crate::config::ChunkConfig;
use crate::highlight::highlight;
use crate::types::{decode_block, Chunk, ChunkLine, FileMatch, FileResult, RawLineMatch};

pub const MAX_CHUNKS_PER_FILE: usize = 50;
pub const DEFAULT_REQUESTED_CHUNK_SIZE: usize = 3;
pub const NEW_CHUNK_THRESHOLD: u32 = 2;
pub const CONTEXT_LINES_COUNT: u32 = 3;

/// Chunks for one file plus the number of matches they contain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedChunks {
    pub chunks: Vec<Chunk>,
    pub match_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkExtractor {
    max_chunks: usize,
    context_lines: u32,
    merge_threshold: u32,
}

impl Default for ChunkExtractor {
    fn default() -> Self {
        Self::from_config(&ChunkConfig::default(), None)
    }
}

impl ChunkExtractor {
    pub fn new(max_chunks: usize, context_lines: u32, merge_threshold: u32) -> Self {
        Self {
            max_chunks,
            context_lines,
            merge_threshold,
        }
    }

    /// Build an extractor for a caller-requested chunk count. `None` falls
    /// back to the configured default; the result is clamped to
    /// `0..=max_chunks_per_file`.
    pub fn from_config(cfg: &ChunkConfig, requested_chunk_size: Option<usize>) -> Self {
        let requested = requested_chunk_size.unwrap_or(cfg.default_requested_chunk_size);
        Self::new(
            requested.clamp(0, cfg.max_chunks_per_file),
            cfg.context_lines,
            cfg.new_chunk_threshold,
        )
    }

    pub fn max_chunks(&self) -> usize {
        self.max_chunks
    }

    pub fn context_lines(&self) -> u32 {
        self.context_lines
    }

    pub fn merge_threshold(&self) -> u32 {
        self.merge_threshold
    }

    pub fn extract(&self, matches: &[RawLineMatch]) -> ExtractedChunks {
        let (chunks, match_count) = extract_chunks(
            matches,
            self.max_chunks,
            self.context_lines,
            self.merge_threshold,
        );
        ExtractedChunks {
            chunks,
            match_count,
        }
    }

    /// Render a backend file entry. Files without any line match yield `None`.
    pub fn file_result(&self, file: &FileMatch) -> Option<FileResult> {
        if file.line_matches.is_empty() {
            return None;
        }
        let extracted = self.extract(&file.line_matches);
        Some(FileResult {
            path: file.file_name.clone(),
            project_id: file.scope_unit_id(),
            chunks: extracted.chunks,
            match_count_total: file.match_count_total(),
            match_count: extracted.match_count,
        })
    }
}

/// Group `matches` (ascending by line number) into at most `max_chunks`
/// chunks. Returns the chunks and the number of fragments they hold.
pub fn extract_chunks(
    matches: &[RawLineMatch],
    max_chunks: usize,
    context_lines: u32,
    merge_threshold: u32,
) -> (Vec<Chunk>, usize) {
    if max_chunks == 0 {
        return (Vec::new(), 0);
    }

    let line_matches: Vec<&RawLineMatch> =
        matches.iter().filter(|m| !m.is_filename_match()).collect();

    let mut chunks = Vec::new();
    let mut capped_match_count = 0;
    let mut start_new_chunk = true;
    let mut chunk = ChunkBuilder::default();

    for (idx, m) in line_matches.iter().enumerate() {
        if start_new_chunk {
            let show_before = match idx.checked_sub(1) {
                None => true,
                Some(prev) => {
                    m.line_number.abs_diff(line_matches[prev].line_number) > context_lines
                }
            };
            if show_before {
                chunk.add_before_context(m);
            }
        }

        chunk.add_match(m);
        chunk.add_after_context(m);

        start_new_chunk = match line_matches.get(idx + 1) {
            None => true,
            Some(next) => next.line_number.abs_diff(m.line_number) > merge_threshold,
        };

        if start_new_chunk {
            capped_match_count += chunk.match_count;
            chunks.push(std::mem::take(&mut chunk).build());
            if chunks.len() >= max_chunks {
                break;
            }
        }
    }

    (chunks, capped_match_count)
}

#[derive(Default)]
struct ChunkBuilder {
    lines: BTreeMap<u32, ChunkLine>,
    match_count: usize,
}

impl ChunkBuilder {
    fn add_match(&mut self, m: &RawLineMatch) {
        let raw = m.decoded_line();
        let line = ChunkLine {
            line_number: m.line_number,
            text: String::from_utf8_lossy(&raw).into_owned(),
            rich_text: highlight(&raw, &m.ranges()),
        };
        // A match always wins over context synthesized for the same line.
        self.lines.insert(m.line_number, line);
        self.match_count += m.fragments.len();
    }

    fn add_before_context(&mut self, m: &RawLineMatch) {
        for (i, text) in context_lines(&m.before).into_iter().rev().enumerate() {
            let Some(line_number) = m.line_number.checked_sub(i as u32 + 1) else {
                break;
            };
            if line_number == 0 {
                break;
            }
            self.add_context(line_number, text);
        }
    }

    fn add_after_context(&mut self, m: &RawLineMatch) {
        for (i, text) in context_lines(&m.after).into_iter().enumerate() {
            let line_number = m.line_number.saturating_add(i as u32 + 1);
            self.add_context(line_number, text);
        }
    }

    fn add_context(&mut self, line_number: u32, text: String) {
        self.lines.entry(line_number).or_insert_with(|| ChunkLine {
            line_number,
            rich_text: htmlescape::encode_minimal(&text),
            text,
        });
    }

    fn build(self) -> Chunk {
        Chunk {
            match_count_in_chunk: self.match_count,
            lines: self.lines.into_values().collect(),
        }
    }
}

/// Split a base64 context block into lines. One trailing newline is not
/// treated as an extra empty line.
fn context_lines(encoded: &str) -> Vec<String> {
    let decoded = decode_block(encoded);
    if decoded.is_empty() {
        return Vec::new();
    }
    let body = decoded.strip_suffix(b"\n").unwrap_or(&decoded[..]);
    body.split(|b| *b == b'\n')
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{file_match, filename_match, line_match};

    fn numbers(chunk: &Chunk) -> Vec<u32> {
        chunk.lines.iter().map(|l| l.line_number).collect()
    }

    fn block(first: u32, count: u32) -> Vec<String> {
        (first..first + count).map(|n| format!("line {n}")).collect()
    }

    /// A match at `n` with three lines of context each side.
    fn padded(n: u32, fragments: &[(u32, u32)]) -> RawLineMatch {
        let before = block(n.saturating_sub(3).max(1), n.saturating_sub(1).min(3));
        let after = block(n + 1, 3);
        line_match(n, &format!("match {n}"), fragments, &before, &after)
    }

    #[test]
    fn adjacent_matches_share_one_padded_chunk() {
        let matches = vec![padded(10, &[(0, 5)]), padded(11, &[(0, 5), (6, 2)])];
        let (chunks, count) = extract_chunks(&matches, 3, 3, 2);

        assert_eq!(chunks.len(), 1);
        assert_eq!(numbers(&chunks[0]), (7..=14).collect::<Vec<_>>());
        assert_eq!(chunks[0].match_count_in_chunk, 3);
        assert_eq!(count, 3);

        let line_11 = &chunks[0].lines[4];
        assert_eq!(line_11.text, "match 11");
        assert_eq!(line_11.rich_text, "<b>match</b> <b>11</b>");
        // context is escaped but never highlighted
        assert_eq!(chunks[0].lines[0].rich_text, "line 7");
    }

    #[test]
    fn distant_matches_get_separate_chunks() {
        let matches = vec![padded(5, &[(0, 5)]), padded(50, &[(0, 5)])];
        let (chunks, count) = extract_chunks(&matches, 3, 3, 2);

        assert_eq!(chunks.len(), 2);
        assert_eq!(numbers(&chunks[0]), (2..=8).collect::<Vec<_>>());
        assert_eq!(numbers(&chunks[1]), (47..=53).collect::<Vec<_>>());
        assert_eq!(count, 2);
    }

    #[test]
    fn near_but_unmerged_match_skips_before_context() {
        // gap 3: too far to merge (> 2) but inside the context window (<= 3)
        let matches = vec![padded(10, &[(0, 1)]), padded(13, &[(0, 1)])];
        let (chunks, _) = extract_chunks(&matches, 3, 3, 2);

        assert_eq!(chunks.len(), 2);
        assert_eq!(numbers(&chunks[0]), (7..=13).collect::<Vec<_>>());
        assert_eq!(numbers(&chunks[1]), (13..=16).collect::<Vec<_>>());
    }

    #[test]
    fn cap_stops_scan_and_limits_count() {
        let matches: Vec<_> = (0..10).map(|i| padded(10 + i * 20, &[(0, 1)])).collect();
        let file = file_match("a.rs", "1", matches);
        let result = ChunkExtractor::new(3, 3, 2).file_result(&file).unwrap();

        assert_eq!(result.chunks.len(), 3);
        assert_eq!(result.match_count, 3);
        assert_eq!(result.match_count_total, 10);
    }

    #[test]
    fn zero_cap_yields_nothing() {
        let matches = vec![padded(10, &[(0, 1)])];
        assert_eq!(extract_chunks(&matches, 0, 3, 2), (Vec::new(), 0));
    }

    #[test]
    fn requested_size_is_clamped() {
        let cfg = ChunkConfig::default();
        assert_eq!(ChunkExtractor::from_config(&cfg, None).max_chunks(), 3);
        assert_eq!(ChunkExtractor::from_config(&cfg, Some(500)).max_chunks(), 50);
        assert_eq!(ChunkExtractor::from_config(&cfg, Some(0)).max_chunks(), 0);
    }

    #[test]
    fn filename_matches_are_ignored() {
        let matches = vec![filename_match("a.rs", &[(0, 1)]), padded(4, &[(0, 1)])];
        let (chunks, count) = extract_chunks(&matches, 3, 3, 2);

        assert_eq!(chunks.len(), 1);
        assert_eq!(count, 1);
        assert!(chunks[0].lines.iter().all(|l| l.line_number > 0));
    }

    #[test]
    fn before_context_never_goes_below_line_one() {
        let before = block(1, 3);
        let matches = vec![line_match(2, "x", &[(0, 1)], &before, &[])];
        let (chunks, _) = extract_chunks(&matches, 3, 3, 2);
        assert_eq!(numbers(&chunks[0]), vec![1, 2]);
        assert_eq!(chunks[0].lines[0].text, "line 3");
    }

    #[test]
    fn missing_context_blocks_are_tolerated() {
        let mut m = line_match(8, "only", &[(0, 4)], &[], &[]);
        m.before = "%%%".into();
        let (chunks, count) = extract_chunks(&[m], 3, 3, 2);
        assert_eq!(numbers(&chunks[0]), vec![8]);
        assert_eq!(count, 1);
    }

    #[test]
    fn blank_context_lines_are_kept() {
        let m = line_match(5, "x", &[(0, 1)], &[], &["".to_string(), "y".to_string()]);
        let (chunks, _) = extract_chunks(&[m], 3, 3, 2);
        assert_eq!(numbers(&chunks[0]), vec![5, 6, 7]);
        assert_eq!(chunks[0].lines[1].text, "");
    }

    #[test]
    fn merge_threshold_wider_than_context_leaves_gaps() {
        // With merge_threshold > context_lines two matches merge even though
        // their context windows don't meet; line 12 is missing.
        let m1 = line_match(10, "a", &[(0, 1)], &block(9, 1), &block(11, 1));
        let m2 = line_match(14, "b", &[(0, 1)], &block(13, 1), &block(15, 1));
        let (chunks, _) = extract_chunks(&[m1, m2], 3, 1, 5);

        assert_eq!(chunks.len(), 1);
        assert_eq!(numbers(&chunks[0]), vec![9, 10, 11, 14, 15]);
    }

    #[test]
    fn context_lines_are_html_escaped() {
        let m = line_match(3, "x", &[(0, 1)], &["a < b".to_string()], &[]);
        let (chunks, _) = extract_chunks(&[m], 3, 3, 2);
        assert_eq!(chunks[0].lines[0].text, "a < b");
        assert_eq!(chunks[0].lines[0].rich_text, "a &lt; b");
    }

    #[test]
    fn file_without_line_matches_has_no_result() {
        let file = file_match("empty.rs", "3", vec![]);
        assert!(ChunkExtractor::default().file_result(&file).is_none());
    }
}
