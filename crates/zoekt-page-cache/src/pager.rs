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

use std::borrow::Borrow;

use crate::chunks::ChunkExtractor;
use crate::types::{FileMatch, PageMap, ProducedPages};

/// Page a file at consumption index `i` lands on.
pub fn page_index(i: usize, page_size: usize) -> usize {
    i / page_size
}

/// Slices backend files into pages of rendered results.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultPager {
    extractor: ChunkExtractor,
}

impl ResultPager {
    pub fn new(extractor: ChunkExtractor) -> Self {
        Self { extractor }
    }

    pub fn extractor(&self) -> &ChunkExtractor {
        &self.extractor
    }

    /// Consume `files` in backend order into at most `page_limit` pages of
    /// `page_size` files. Iteration stops at the first file that would land
    /// on page `page_limit`, so the rest of the stream is never pulled.
    pub fn paginate<I>(&self, files: I, page_size: usize, page_limit: usize) -> PageMap
    where
        I: IntoIterator,
        I::Item: Borrow<FileMatch>,
    {
        let mut pages = PageMap::new();
        if page_size == 0 {
            tracing::warn!("page_size of 0 requested; returning no pages");
            return pages;
        }

        let mut i = 0;
        for file in files {
            let current_page = page_index(i, page_size);
            if current_page >= page_limit {
                break;
            }
            let Some(result) = self.extractor.file_result(file.borrow()) else {
                continue;
            };
            pages.entry(current_page).or_default().push(result);
            i += 1;
        }
        pages
    }

    /// Paginate and total up the capped match counts, ready to hand to the
    /// page cache.
    pub fn produce<I>(&self, files: I, page_size: usize, page_limit: usize) -> ProducedPages
    where
        I: IntoIterator,
        I::Item: Borrow<FileMatch>,
    {
        let pages = self.paginate(files, page_size, page_limit);
        let total_count = pages
            .values()
            .flat_map(|files| files.iter())
            .map(|f| f.match_count)
            .sum();
        ProducedPages::new(pages, total_count)
    }
}
