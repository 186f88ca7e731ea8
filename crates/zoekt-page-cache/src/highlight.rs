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

//! Byte-range highlighting of a single source line.
//!
//! Matched spans are first wrapped in sentinel markers, the whole line is
//! HTML-escaped once, and only then are the markers swapped for `<b>`/`</b>`.
//! That ordering escapes `<` and `&` in the source while leaving the emphasis
//! tags intact.

use std::borrow::Cow;

pub const HIGHLIGHT_START_TAG: &str = "zoektpagecache→";
pub const HIGHLIGHT_END_TAG: &str = "←zoektpagecache";

const EMPHASIS_OPEN: &str = "<b>";
const EMPHASIS_CLOSE: &str = "</b>";

/// Render `line` as HTML with every `(offset, length)` byte range emphasised.
///
/// Ranges are clamped to the line, widened to UTF-8 character boundaries and
/// merged when they overlap, so the markup is always balanced.
pub fn highlight(line: &[u8], ranges: &[(usize, usize)]) -> String {
    let spans = normalize_ranges(line, ranges);

    // An arrow in the source can pair with the word half of a neighbouring
    // marker, so such lines never go through marker substitution.
    let decoded = String::from_utf8_lossy(line);
    if decoded.contains(|c| c == '→' || c == '←') {
        return render_segments(line, &spans);
    }

    let mut marked = String::with_capacity(line.len() + spans.len() * 32);
    let mut cursor = 0;
    for &(start, end) in &spans {
        marked.push_str(&lossy(&line[cursor..start]));
        marked.push_str(HIGHLIGHT_START_TAG);
        marked.push_str(&lossy(&line[start..end]));
        marked.push_str(HIGHLIGHT_END_TAG);
        cursor = end;
    }
    marked.push_str(&lossy(&line[cursor..]));

    htmlescape::encode_minimal(&marked)
        .replace(HIGHLIGHT_START_TAG, EMPHASIS_OPEN)
        .replace(HIGHLIGHT_END_TAG, EMPHASIS_CLOSE)
}

/// Escape each segment on its own and join with literal tags. Sentinel text
/// coming from the source has its arrow written as a numeric entity so it
/// renders the same but never appears verbatim in the output.
fn render_segments(line: &[u8], spans: &[(usize, usize)]) -> String {
    let escape = |bytes: &[u8]| {
        htmlescape::encode_minimal(&lossy(bytes))
            .replace(HIGHLIGHT_START_TAG, "zoektpagecache&#8594;")
            .replace(HIGHLIGHT_END_TAG, "&#8592;zoektpagecache")
    };
    let mut out = String::with_capacity(line.len() + spans.len() * 7);
    let mut cursor = 0;
    for &(start, end) in spans {
        out.push_str(&escape(&line[cursor..start]));
        out.push_str(EMPHASIS_OPEN);
        out.push_str(&escape(&line[start..end]));
        out.push_str(EMPHASIS_CLOSE);
        cursor = end;
    }
    out.push_str(&escape(&line[cursor..]));
    out
}

fn lossy(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

/// Sorted, clamped, non-overlapping `[start, end)` byte spans.
pub(crate) fn normalize_ranges(line: &[u8], ranges: &[(usize, usize)]) -> Vec<(usize, usize)> {
    let len = line.len();
    let mut spans: Vec<(usize, usize)> = ranges
        .iter()
        .map(|&(offset, length)| {
            let start = floor_boundary(line, offset.min(len));
            let end = ceil_boundary(line, offset.saturating_add(length).min(len));
            (start, end.max(start))
        })
        .collect();
    spans.sort_unstable();

    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match merged.last_mut() {
            Some(last) if start < last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

fn is_continuation(b: u8) -> bool {
    b & 0b1100_0000 == 0b1000_0000
}

fn floor_boundary(line: &[u8], mut idx: usize) -> usize {
    while idx > 0 && idx < line.len() && is_continuation(line[idx]) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(line: &[u8], mut idx: usize) -> usize {
    while idx < line.len() && is_continuation(line[idx]) {
        idx += 1;
    }
    idx
}
