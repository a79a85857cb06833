use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod annotation;
pub mod cache;
pub mod config;
pub mod error;
pub mod geometry;
pub mod paint;
pub mod session;
pub mod transform;
pub mod viewport;

#[cfg(test)]
pub(crate) mod testing;

pub use annotation::{Annotation, AnnotationId, AnnotationStore, Region, Rgb};
pub use cache::{
    CacheEvent, EventQueue, PageListener, PageSlot, ReconcileReport, WindowedPageCache,
};
pub use config::{ConfigError, HighlightGranularity, ViewerConfig};
pub use error::ViewerError;
pub use geometry::{join_words, words_intersecting, CoordinateMapper, Rect, Selection};
pub use paint::paint_annotations;
pub use session::{Viewer, ViewerCommand};
pub use transform::{apply_transform, DisplayMode};
pub use viewport::{ScrollDebouncer, ScrollPosition, ViewportController};

pub type DocumentId = Uuid;

pub fn new_document_id() -> DocumentId {
    Uuid::new_v4()
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub path: PathBuf,
    pub page_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RasterImage {
    pub const CHANNELS: usize = 3;

    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * Self::CHANNELS);
        for _ in 0..(width as usize * height as usize) {
            pixels.extend_from_slice(&rgb);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn stride(&self) -> usize {
        self.width as usize * Self::CHANNELS
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = y as usize * self.stride() + x as usize * Self::CHANNELS;
        Some([self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]])
    }
}

/// A word as reported by the rendering collaborator, in document units with a
/// top-left origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordBox {
    pub rect: geometry::Rect,
    pub text: String,
}

impl WordBox {
    pub fn new(rect: geometry::Rect, text: impl Into<String>) -> Self {
        Self {
            rect,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

/// The rendering collaborator. Implementations must be idempotent for a given
/// `(page_index, scale)` and return stable word boxes for the lifetime of the
/// document.
pub trait PageSource: Send + Sync {
    fn info(&self) -> &DocumentInfo;

    fn page_count(&self) -> usize {
        self.info().page_count
    }

    fn intrinsic_size(&self, page_index: usize) -> Result<PageSize>;

    fn render(&self, page_index: usize, scale: f32) -> Result<RasterImage>;

    fn word_boxes(&self, page_index: usize) -> Result<Vec<WordBox>>;
}

#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Arc<dyn PageSource>>;
}
