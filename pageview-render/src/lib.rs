use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use pageview_core::{
    new_document_id, DocumentInfo, DocumentProvider, PageSize, PageSource, RasterImage, Rect,
    WordBox,
};
use pdfium_render::prelude::*;
use tracing::{instrument, warn};

const LIBRARY_PATH_ENV: &str = "PAGEVIEW_PDFIUM_LIBRARY_PATH";

pub struct PdfiumProvider {
    pdfium: Arc<Pdfium>,
}

impl PdfiumProvider {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_env() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentProvider for PdfiumProvider {
    async fn open(&self, path: &Path) -> Result<Arc<dyn PageSource>> {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("failed to resolve path for {:?}", path))?;
        let document = PdfiumPageSource::open(Arc::clone(&self.pdfium), absolute)?;
        Ok(Arc::new(document))
    }
}

pub struct PdfiumPageSource {
    info: DocumentInfo,
    sizes: Vec<PageSize>,
    // declared before `_pdfium` so it is dropped first
    document: Mutex<PdfDocument<'static>>,
    _pdfium: Arc<Pdfium>,
}

impl PdfiumPageSource {
    fn open(pdfium: Arc<Pdfium>, path: PathBuf) -> Result<Self> {
        let document = pdfium
            .load_pdf_from_file(&path, None)
            .with_context(|| format!("failed to open {:?}", path))?;
        // SAFETY: the document borrows the bindings behind the `pdfium` Arc. The
        // Arc is stored next to the document and dropped after it, so the
        // borrow never outlives the bindings.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };

        let sizes = document
            .pages()
            .iter()
            .map(|page| PageSize {
                width: page.width().value,
                height: page.height().value,
            })
            .collect::<Vec<_>>();
        let info = DocumentInfo {
            id: new_document_id(),
            path,
            page_count: sizes.len(),
        };

        Ok(Self {
            info,
            sizes,
            document: Mutex::new(document),
            _pdfium: pdfium,
        })
    }

    fn with_page<R, F>(&self, page_index: usize, f: F) -> Result<R>
    where
        F: FnOnce(&PdfPage<'_>) -> Result<R>,
    {
        let index: PdfPageIndex = page_index
            .try_into()
            .map_err(|_| anyhow!("page {} is out of supported range", page_index))?;
        let document = self.document.lock();
        let page = document
            .pages()
            .get(index)
            .with_context(|| format!("page {} out of range", page_index))?;
        f(&page)
    }
}

impl PageSource for PdfiumPageSource {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    fn intrinsic_size(&self, page_index: usize) -> Result<PageSize> {
        self.sizes
            .get(page_index)
            .copied()
            .ok_or_else(|| anyhow!("page {} out of range", page_index))
    }

    #[instrument(skip(self))]
    fn render(&self, page_index: usize, scale: f32) -> Result<RasterImage> {
        self.with_page(page_index, |page| {
            let config = PdfRenderConfig::new().scale_page_by_factor(scale.max(0.01));
            let bitmap = page
                .render_with_config(&config)
                .with_context(|| format!("failed to render page {}", page_index))?;
            let image = bitmap.as_image().to_rgb8();
            Ok(RasterImage {
                width: image.width(),
                height: image.height(),
                pixels: image.into_raw(),
            })
        })
    }

    fn word_boxes(&self, page_index: usize) -> Result<Vec<WordBox>> {
        self.with_page(page_index, |page| {
            let page_height = page.height().value;
            let text = page
                .text()
                .with_context(|| format!("failed to extract text for page {}", page_index))?;

            let mut words = Vec::new();
            let mut current = WordBuilder::default();
            for glyph in text.chars().iter() {
                let Some(ch) = glyph.unicode_char() else {
                    continue;
                };
                if ch.is_whitespace() || ch.is_control() {
                    current.finish(&mut words);
                    continue;
                }
                let bounds = match glyph.loose_bounds() {
                    Ok(bounds) => bounds,
                    Err(err) => {
                        warn!(?err, page = page_index, "failed to resolve glyph bounds");
                        continue;
                    }
                };
                // PDF user space has a bottom-left origin; word boxes use top-left.
                let rect = Rect::new(
                    bounds.left().value,
                    page_height - bounds.top().value,
                    bounds.right().value,
                    page_height - bounds.bottom().value,
                );
                current.push(ch, rect);
            }
            current.finish(&mut words);
            Ok(words)
        })
    }
}

#[derive(Default)]
struct WordBuilder {
    text: String,
    rect: Option<Rect>,
}

impl WordBuilder {
    fn push(&mut self, ch: char, glyph: Rect) {
        self.text.push(ch);
        self.rect = Some(match self.rect {
            Some(rect) => Rect::new(
                rect.x0.min(glyph.x0),
                rect.y0.min(glyph.y0),
                rect.x1.max(glyph.x1),
                rect.y1.max(glyph.y1),
            ),
            None => glyph,
        });
    }

    fn finish(&mut self, words: &mut Vec<WordBox>) {
        let text = mem::take(&mut self.text);
        if let Some(rect) = self.rect.take() {
            if !text.is_empty() {
                words.push(WordBox::new(rect, text));
            }
        }
    }
}

fn bind_pdfium_from_env() -> Option<Pdfium> {
    match std::env::var(LIBRARY_PATH_ENV) {
        Ok(path) if !path.is_empty() => match Pdfium::bind_to_library(&path) {
            Ok(bindings) => Some(Pdfium::new(bindings)),
            Err(err) => {
                warn!("failed to load Pdfium from {}={}: {}", LIBRARY_PATH_ENV, path, err);
                None
            }
        },
        _ => None,
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => errors.push(format!("{}: {}", cwd_path.display(), err)),
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; set {} or install it ({})",
                LIBRARY_PATH_ENV,
                errors.join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glyph(x0: f32, y0: f32, x1: f32, y1: f32) -> Rect {
        Rect::new(x0, y0, x1, y1)
    }

    #[test]
    fn word_builder_unions_glyph_boxes() {
        let mut words = Vec::new();
        let mut builder = WordBuilder::default();
        builder.push('h', glyph(10.0, 5.0, 15.0, 15.0));
        builder.push('i', glyph(15.0, 4.0, 18.0, 16.0));
        builder.finish(&mut words);
        builder.push('x', glyph(30.0, 5.0, 35.0, 15.0));
        builder.finish(&mut words);

        assert_eq!(words.len(), 2);
        assert_eq!(words[0].text, "hi");
        assert_eq!(words[0].rect, glyph(10.0, 4.0, 18.0, 16.0));
        assert_eq!(words[1].text, "x");
    }

    #[test]
    fn finishing_an_empty_word_is_a_no_op() {
        let mut words = Vec::new();
        let mut builder = WordBuilder::default();
        builder.finish(&mut words);
        builder.finish(&mut words);
        assert!(words.is_empty());
    }
}
