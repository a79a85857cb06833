use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;

use crate::geometry::Rect;
use crate::{new_document_id, DocumentInfo, PageSize, PageSource, RasterImage, WordBox};

pub const PAGE_WIDTH: f32 = 100.0;
pub const PAGE_HEIGHT: f32 = 200.0;

pub struct FakeSource {
    info: DocumentInfo,
    failing: HashSet<usize>,
    truncated: HashSet<usize>,
    flaky_words: Mutex<HashSet<usize>>,
    pub render_calls: Mutex<Vec<(usize, f32)>>,
    pub word_calls: Mutex<HashMap<usize, usize>>,
}

impl FakeSource {
    pub fn new(page_count: usize) -> Self {
        Self {
            info: DocumentInfo {
                id: new_document_id(),
                path: PathBuf::from("/tmp/fake.pdf"),
                page_count,
            },
            failing: HashSet::new(),
            truncated: HashSet::new(),
            flaky_words: Mutex::new(HashSet::new()),
            render_calls: Mutex::new(Vec::new()),
            word_calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn failing_on(mut self, page: usize) -> Self {
        self.failing.insert(page);
        self
    }

    pub fn truncated_on(mut self, page: usize) -> Self {
        self.truncated.insert(page);
        self
    }

    pub fn words_fail_once_on(self, page: usize) -> Self {
        self.flaky_words.lock().insert(page);
        self
    }

    pub fn renders_of(&self, page: usize) -> usize {
        self.render_calls
            .lock()
            .iter()
            .filter(|(p, _)| *p == page)
            .count()
    }

    pub fn word_fetches_of(&self, page: usize) -> usize {
        self.word_calls.lock().get(&page).copied().unwrap_or(0)
    }
}

impl PageSource for FakeSource {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    fn intrinsic_size(&self, _page_index: usize) -> Result<PageSize> {
        Ok(PageSize {
            width: PAGE_WIDTH,
            height: PAGE_HEIGHT,
        })
    }

    fn render(&self, page_index: usize, scale: f32) -> Result<RasterImage> {
        self.render_calls.lock().push((page_index, scale));
        if self.failing.contains(&page_index) {
            return Err(anyhow!("corrupt content stream on page {page_index}"));
        }
        let width = (PAGE_WIDTH * scale).round().max(1.0) as u32;
        let height = (PAGE_HEIGHT * scale).round().max(1.0) as u32;
        let shade = (page_index % 200) as u8 + 20;
        let mut image = RasterImage::filled(width, height, [shade, shade, shade]);
        if self.truncated.contains(&page_index) {
            image.pixels.truncate(30);
        }
        Ok(image)
    }

    fn word_boxes(&self, page_index: usize) -> Result<Vec<WordBox>> {
        *self.word_calls.lock().entry(page_index).or_insert(0) += 1;
        if self.flaky_words.lock().remove(&page_index) {
            return Err(anyhow!("text layer unavailable on page {page_index}"));
        }
        let mut words = Vec::new();
        for line in 0..2 {
            let y0 = 10.0 + line as f32 * 20.0;
            for column in 0..3 {
                let x0 = 10.0 + column as f32 * 30.0;
                words.push(WordBox::new(
                    Rect::new(x0, y0, x0 + 20.0, y0 + 10.0),
                    format!("p{page_index}l{line}w{column}"),
                ));
            }
        }
        Ok(words)
    }
}
