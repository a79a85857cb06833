use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::annotation::{Annotation, AnnotationId, Region, Rgb};
use crate::cache::{CacheEvent, EventQueue, PageListener, ReconcileReport, WindowedPageCache};
use crate::config::{HighlightGranularity, ViewerConfig};
use crate::error::ViewerError;
use crate::geometry::{join_words, words_intersecting, Rect, Selection};
use crate::paint::paint_annotations;
use crate::transform::DisplayMode;
use crate::viewport::{ScrollDebouncer, ScrollPosition, ViewportController};
use crate::{DocumentId, DocumentProvider, PageSource, RasterImage};

#[derive(Debug, Clone, PartialEq)]
pub enum ViewerCommand {
    Scroll { position: ScrollPosition },
    Resize { width: f32, height: f32 },
    ZoomIn { anchor: Option<(f32, f32)> },
    ZoomOut { anchor: Option<(f32, f32)> },
    ResetZoom,
    SetDisplayMode(DisplayMode),
    GotoPage { page: usize },
}

pub struct Viewer {
    config: ViewerConfig,
    controller: ViewportController,
    cache: WindowedPageCache,
    debouncer: ScrollDebouncer,
    events: Option<EventQueue>,
}

impl Viewer {
    pub fn new(config: ViewerConfig) -> Self {
        let events = EventQueue::new();
        let mut viewer = Self::with_listener(config, Arc::new(events.clone()));
        viewer.events = Some(events);
        viewer
    }

    pub fn with_listener(config: ViewerConfig, listener: Arc<dyn PageListener>) -> Self {
        if let Err(err) = config.validate() {
            warn!(error = %err, "viewer config is invalid; out-of-range settings fall back");
        }
        Self {
            controller: ViewportController::new(&config),
            cache: WindowedPageCache::new(&config, listener),
            debouncer: ScrollDebouncer::new(config.scroll_debounce),
            events: None,
            config,
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn controller(&self) -> &ViewportController {
        &self.controller
    }

    pub fn cache(&self) -> &WindowedPageCache {
        &self.cache
    }

    pub fn document_id(&self) -> Option<DocumentId> {
        self.cache.document_id()
    }

    pub fn drain_events(&self) -> Vec<CacheEvent> {
        self.events
            .as_ref()
            .map(EventQueue::drain)
            .unwrap_or_default()
    }

    #[instrument(skip(self, provider))]
    pub async fn open_with<P: DocumentProvider>(&mut self, provider: &P, path: &Path) -> Result<()> {
        let source = provider.open(path).await?;
        self.open_source(source)?;
        Ok(())
    }

    pub fn open_source(&mut self, source: Arc<dyn PageSource>) -> Result<()> {
        let page_count = source.page_count();
        let first_page = if page_count > 0 {
            Some(source.intrinsic_size(0)?)
        } else {
            None
        };
        info!(path = %source.info().path.display(), page_count, "opened document");
        self.cache.replace_document(source);
        self.controller.set_document(page_count, first_page);
        self.debouncer.flush();
        self.refresh()?;
        Ok(())
    }

    pub fn apply(&mut self, command: ViewerCommand) -> Result<(), ViewerError> {
        self.apply_at(command, Instant::now())
    }

    pub fn apply_at(&mut self, command: ViewerCommand, now: Instant) -> Result<(), ViewerError> {
        match command {
            ViewerCommand::Scroll { position } => {
                self.debouncer.push(position, now);
                return Ok(());
            }
            ViewerCommand::Resize { width, height } => {
                self.controller.resize(width, height);
            }
            ViewerCommand::ZoomIn { anchor } => {
                self.settle_scroll();
                if !self.controller.zoom_in(anchor) {
                    return Ok(());
                }
            }
            ViewerCommand::ZoomOut { anchor } => {
                self.settle_scroll();
                if !self.controller.zoom_out(anchor) {
                    return Ok(());
                }
            }
            ViewerCommand::ResetZoom => {
                if !self.controller.reset_zoom() {
                    return Ok(());
                }
            }
            ViewerCommand::SetDisplayMode(mode) => {
                self.cache.set_display_mode(mode);
                return Ok(());
            }
            ViewerCommand::GotoPage { page } => {
                ViewerError::check_page(page, self.cache.page_count())?;
                self.debouncer.flush();
                let y = self.controller.page_offset(page);
                let x = self.controller.scroll().x;
                self.controller.scroll_to(ScrollPosition { x, y });
            }
        }
        self.refresh().map(|_| ())
    }

    pub fn tick(&mut self, now: Instant) -> Result<bool, ViewerError> {
        match self.debouncer.poll(now) {
            Some(position) => {
                self.controller.scroll_to(position);
                self.refresh()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // A pending scroll is applied before zooming so the anchor is computed
    // against the position the user actually sees.
    fn settle_scroll(&mut self) {
        if let Some(position) = self.debouncer.flush() {
            self.controller.scroll_to(position);
        }
    }

    fn refresh(&mut self) -> Result<Option<ReconcileReport>, ViewerError> {
        let Some(range) = self.controller.visible_range() else {
            return Ok(None);
        };
        let report = self.cache.reconcile(range, self.controller.zoom())?;
        if let Some(slot) = self.cache.slot(0) {
            if let Some(raster) = slot.raster() {
                self.controller.observe_first_page(raster.height, slot.scale());
            }
        }
        debug!(?report, "reconciled");
        Ok(Some(report))
    }

    fn document_rect(&self, selection: &Selection) -> Result<Option<Rect>, ViewerError> {
        let Some(mapper) = self.cache.mapper(selection.page)? else {
            return Ok(None);
        };
        Ok(mapper.selection_to_document(selection, self.config.min_selection_px))
    }

    pub fn request_annotation(
        &mut self,
        selection: &Selection,
        color: Rgb,
        note: Option<String>,
    ) -> Result<Option<AnnotationId>, ViewerError> {
        let page = selection.page;
        ViewerError::check_page(page, self.cache.page_count())?;
        let Some(rect) = self.document_rect(selection)? else {
            debug!(page, "selection below minimum size, ignoring");
            return Ok(None);
        };
        let region = match self.config.highlight {
            HighlightGranularity::Words => {
                let words = self.cache.words(page)?;
                let hits = words_intersecting(&rect, &words);
                if hits.is_empty() {
                    debug!(page, "selection covers no words, ignoring");
                    return Ok(None);
                }
                Region::WordSet(hits)
            }
            HighlightGranularity::Rect => Region::RawRect(rect),
        };
        self.cache
            .add_annotation(page, Annotation::new(region, color, note))
            .map(Some)
    }

    pub fn extract_text(&mut self, selection: &Selection) -> Result<String, ViewerError> {
        ViewerError::check_page(selection.page, self.cache.page_count())?;
        let Some(rect) = self.document_rect(selection)? else {
            return Ok(String::new());
        };
        let words = self.cache.words(selection.page)?;
        Ok(join_words(&words_intersecting(&rect, &words)))
    }

    pub fn annotations(&self, page: usize) -> &[Annotation] {
        self.cache.annotations(page)
    }

    pub fn recolor_annotation(
        &mut self,
        page: usize,
        id: AnnotationId,
        color: Rgb,
    ) -> Result<bool, ViewerError> {
        self.cache
            .update_annotation(page, id, |annotation| annotation.color = color)
    }

    pub fn set_annotation_note(
        &mut self,
        page: usize,
        id: AnnotationId,
        note: Option<String>,
    ) -> Result<bool, ViewerError> {
        self.cache
            .update_annotation(page, id, |annotation| annotation.note = note)
    }

    pub fn delete_annotation(&mut self, page: usize, id: AnnotationId) -> Result<bool, ViewerError> {
        self.cache.remove_annotation(page, id)
    }

    pub fn import_annotations(
        &mut self,
        page: usize,
        annotations: Vec<Annotation>,
    ) -> Result<(), ViewerError> {
        self.cache.import_annotations(page, annotations)
    }

    pub fn retry_page(&mut self, page: usize) -> Result<bool, ViewerError> {
        ViewerError::check_page(page, self.cache.page_count())?;
        if !self.cache.retry(page) {
            return Ok(false);
        }
        self.refresh()?;
        Ok(true)
    }

    pub fn composited(&self, page: usize) -> Result<Option<RasterImage>, ViewerError> {
        let Some(raster) = self.cache.slot(page).and_then(|slot| slot.raster()) else {
            return Ok(None);
        };
        let Some(mapper) = self.cache.mapper(page)? else {
            return Ok(None);
        };
        Ok(Some(paint_annotations(
            raster,
            &mapper,
            self.cache.annotations(page),
        )))
    }
}
