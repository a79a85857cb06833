use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::RangeInclusive;
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, instrument, warn};

use crate::annotation::{Annotation, AnnotationId, AnnotationStore};
use crate::config::ViewerConfig;
use crate::error::ViewerError;
use crate::geometry::CoordinateMapper;
use crate::transform::{apply_transform, DisplayMode};
use crate::{DocumentId, PageSource, RasterImage, WordBox};

const SCALE_EPSILON: f32 = 1e-4;

fn same_scale(a: f32, b: f32) -> bool {
    (a - b).abs() <= SCALE_EPSILON
}

#[derive(Debug, Clone)]
enum SlotContent {
    Ready {
        source: Arc<RasterImage>,
        raster: Arc<RasterImage>,
    },
    Failed(ViewerError),
}

#[derive(Debug, Clone)]
pub struct PageSlot {
    page: usize,
    scale: f32,
    mode: DisplayMode,
    content: SlotContent,
    words: Arc<[WordBox]>,
    annotations: Vec<Annotation>,
}

impl PageSlot {
    fn ready(
        page: usize,
        scale: f32,
        mode: DisplayMode,
        image: RasterImage,
        words: Arc<[WordBox]>,
        annotations: Vec<Annotation>,
    ) -> Self {
        let source = Arc::new(image);
        let raster = tinted(&source, mode);
        Self {
            page,
            scale,
            mode,
            content: SlotContent::Ready { source, raster },
            words,
            annotations,
        }
    }

    fn failed(
        page: usize,
        scale: f32,
        mode: DisplayMode,
        error: ViewerError,
        annotations: Vec<Annotation>,
    ) -> Self {
        Self {
            page,
            scale,
            mode,
            content: SlotContent::Failed(error),
            words: Arc::from(Vec::new()),
            annotations,
        }
    }

    fn set_raster(&mut self, image: RasterImage, scale: f32) {
        let source = Arc::new(image);
        let raster = tinted(&source, self.mode);
        self.scale = scale;
        self.content = SlotContent::Ready { source, raster };
    }

    fn set_mode(&mut self, mode: DisplayMode) -> bool {
        self.mode = mode;
        match &mut self.content {
            SlotContent::Ready { source, raster } => {
                *raster = tinted(source, mode);
                true
            }
            SlotContent::Failed(_) => false,
        }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn raster(&self) -> Option<&RasterImage> {
        match &self.content {
            SlotContent::Ready { raster, .. } => Some(raster),
            SlotContent::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ViewerError> {
        match &self.content {
            SlotContent::Ready { .. } => None,
            SlotContent::Failed(err) => Some(err),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error().is_some()
    }

    pub fn words(&self) -> &Arc<[WordBox]> {
        &self.words
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }
}

fn tinted(source: &Arc<RasterImage>, mode: DisplayMode) -> Arc<RasterImage> {
    match mode {
        DisplayMode::Default => Arc::clone(source),
        DisplayMode::NightInverted | DisplayMode::EyeCare => {
            Arc::new(apply_transform(source, mode))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    PageReady { page: usize, scale: f32 },
    PageEvicted { page: usize },
    PageFailed { page: usize, message: String },
}

pub trait PageListener: Send + Sync {
    fn page_ready(&self, page: usize, slot: &PageSlot);
    fn page_evicted(&self, page: usize);
    fn page_failed(&self, page: usize, error: &ViewerError);
}

#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    events: Arc<Mutex<Vec<CacheEvent>>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<CacheEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl PageListener for EventQueue {
    fn page_ready(&self, page: usize, slot: &PageSlot) {
        self.events.lock().push(CacheEvent::PageReady {
            page,
            scale: slot.scale(),
        });
    }

    fn page_evicted(&self, page: usize) {
        self.events.lock().push(CacheEvent::PageEvicted { page });
    }

    fn page_failed(&self, page: usize, error: &ViewerError) {
        self.events.lock().push(CacheEvent::PageFailed {
            page,
            message: error.to_string(),
        });
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub padded: Option<(usize, usize)>,
    pub materialized: Vec<usize>,
    pub rerendered: Vec<usize>,
    pub evicted: Vec<usize>,
    pub failed: Vec<usize>,
}

struct RenderOutcome {
    page: usize,
    generation: u64,
    scale: f32,
    result: Result<RasterImage, ViewerError>,
}

enum Installed {
    Materialized,
    Rerendered,
    Failed,
    Discarded,
}

pub struct WindowedPageCache {
    source: Option<Arc<dyn PageSource>>,
    generation: u64,
    max_resident: usize,
    pad: usize,
    zoom: f32,
    mode: DisplayMode,
    window: BTreeSet<usize>,
    slots: BTreeMap<usize, PageSlot>,
    store: AnnotationStore,
    words: HashMap<usize, Arc<[WordBox]>>,
    failed: HashMap<usize, ViewerError>,
    listener: Arc<dyn PageListener>,
}

impl WindowedPageCache {
    pub fn new(config: &ViewerConfig, listener: Arc<dyn PageListener>) -> Self {
        Self {
            source: None,
            generation: 0,
            max_resident: config.max_resident_pages.max(1),
            pad: config.pad,
            zoom: 1.0,
            mode: config.display_mode,
            window: BTreeSet::new(),
            slots: BTreeMap::new(),
            store: AnnotationStore::new(),
            words: HashMap::new(),
            failed: HashMap::new(),
            listener,
        }
    }

    pub fn source(&self) -> Option<&Arc<dyn PageSource>> {
        self.source.as_ref()
    }

    pub fn document_id(&self) -> Option<DocumentId> {
        self.source.as_ref().map(|source| source.info().id)
    }

    pub fn page_count(&self) -> usize {
        self.source
            .as_ref()
            .map(|source| source.page_count())
            .unwrap_or(0)
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn max_resident(&self) -> usize {
        self.max_resident
    }

    pub fn resident_count(&self) -> usize {
        self.slots.len()
    }

    pub fn resident_pages(&self) -> Vec<usize> {
        self.slots.keys().copied().collect()
    }

    pub fn slot(&self, page: usize) -> Option<&PageSlot> {
        self.slots.get(&page)
    }

    pub fn slots(&self) -> impl Iterator<Item = &PageSlot> {
        self.slots.values()
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    #[instrument(skip(self, source), fields(pages = source.page_count()))]
    pub fn replace_document(&mut self, source: Arc<dyn PageSource>) {
        self.drop_document_state();
        self.source = Some(source);
    }

    pub fn close_document(&mut self) {
        self.drop_document_state();
        self.source = None;
    }

    fn drop_document_state(&mut self) {
        let pages: Vec<usize> = self.slots.keys().copied().collect();
        for page in pages {
            self.slots.remove(&page);
            self.listener.page_evicted(page);
        }
        self.generation += 1;
        self.window.clear();
        self.store.clear();
        self.words.clear();
        self.failed.clear();
    }

    #[instrument(skip(self))]
    pub fn reconcile(
        &mut self,
        visible: RangeInclusive<usize>,
        zoom: f32,
    ) -> Result<ReconcileReport, ViewerError> {
        let source = self.source.clone().ok_or(ViewerError::NoDocument)?;
        let (lo, hi) = (*visible.start(), *visible.end());
        if lo > hi {
            return Err(ViewerError::InvalidRange { lo, hi });
        }
        ViewerError::check_page(hi, source.page_count())?;
        if !(zoom.is_finite() && zoom > 0.0) {
            return Err(ViewerError::InvalidZoom(zoom));
        }

        let padded_lo = lo.saturating_sub(self.pad);
        let padded_hi = (hi + self.pad).min(source.page_count() - 1);
        let mut report = ReconcileReport {
            padded: Some((padded_lo, padded_hi)),
            ..ReconcileReport::default()
        };

        self.window = select_window(padded_lo, padded_hi, self.max_resident);
        let outside: Vec<usize> = self
            .slots
            .keys()
            .copied()
            .filter(|page| !self.window.contains(page))
            .collect();
        for page in outside {
            if self.evict(page) {
                report.evicted.push(page);
            }
        }

        if !same_scale(self.zoom, zoom) {
            debug!(from = self.zoom, to = zoom, "zoom changed");
            self.zoom = zoom;
        }

        let mut jobs = Vec::new();
        let mut outcomes = Vec::new();
        for &page in &self.window {
            match self.slots.get_mut(&page) {
                Some(slot) if same_scale(slot.scale, zoom) => {}
                Some(slot) if slot.is_failed() => slot.scale = zoom,
                Some(_) => jobs.push(page),
                None => match self.failed.get(&page) {
                    Some(err) => outcomes.push(RenderOutcome {
                        page,
                        generation: self.generation,
                        scale: zoom,
                        result: Err(err.clone()),
                    }),
                    None => jobs.push(page),
                },
            }
        }

        let generation = self.generation;
        outcomes.extend(
            jobs.par_iter()
                .map(|&page| render_page(source.as_ref(), page, zoom, generation))
                .collect::<Vec<_>>(),
        );

        for outcome in outcomes {
            let page = outcome.page;
            match self.install(outcome) {
                Installed::Materialized => report.materialized.push(page),
                Installed::Rerendered => report.rerendered.push(page),
                Installed::Failed => report.failed.push(page),
                Installed::Discarded => {}
            }
        }

        debug_assert!(self.slots.len() <= self.max_resident);
        Ok(report)
    }

    fn install(&mut self, outcome: RenderOutcome) -> Installed {
        let RenderOutcome {
            page,
            generation,
            scale,
            result,
        } = outcome;
        if generation != self.generation {
            debug!(page, "discarding render for a replaced document");
            return Installed::Discarded;
        }
        if !same_scale(scale, self.zoom) {
            debug!(page, scale, zoom = self.zoom, "discarding render at stale zoom");
            return Installed::Discarded;
        }

        if let Some(mut slot) = self.slots.remove(&page) {
            let installed = match result {
                Ok(image) => {
                    slot.set_raster(image, scale);
                    // picks up a word list that failed to load at materialize
                    slot.words = self.words_or_empty(page);
                    self.listener.page_ready(page, &slot);
                    Installed::Rerendered
                }
                Err(err) => {
                    warn!(page, error = %err, "page render failed");
                    slot.content = SlotContent::Failed(err.clone());
                    slot.scale = scale;
                    self.listener.page_failed(page, &err);
                    self.failed.insert(page, err);
                    Installed::Failed
                }
            };
            self.slots.insert(page, slot);
            return installed;
        }

        if !self.window.contains(&page) {
            debug!(page, "discarding render for a page outside the window");
            return Installed::Discarded;
        }
        debug_assert!(self.slots.len() < self.max_resident);

        let annotations = self.store.take(page);
        match result {
            Ok(image) => {
                let words = self.words_or_empty(page);
                let slot = PageSlot::ready(page, scale, self.mode, image, words, annotations);
                self.listener.page_ready(page, &slot);
                self.slots.insert(page, slot);
                Installed::Materialized
            }
            Err(err) => {
                if !self.failed.contains_key(&page) {
                    warn!(page, error = %err, "page render failed");
                    self.failed.insert(page, err.clone());
                }
                let slot = PageSlot::failed(page, scale, self.mode, err.clone(), annotations);
                self.listener.page_failed(page, &err);
                self.slots.insert(page, slot);
                Installed::Failed
            }
        }
    }

    fn evict(&mut self, page: usize) -> bool {
        let Some(slot) = self.slots.remove(&page) else {
            return false;
        };
        self.store.put(page, slot.annotations);
        self.listener.page_evicted(page);
        debug!(page, "evicted page");
        true
    }

    fn words_or_empty(&mut self, page: usize) -> Arc<[WordBox]> {
        match self.words(page) {
            Ok(words) => words,
            Err(err) => {
                warn!(page, error = %err, "failed to fetch word boxes");
                Arc::from(Vec::new())
            }
        }
    }

    pub fn words(&mut self, page: usize) -> Result<Arc<[WordBox]>, ViewerError> {
        let source = self.source.clone().ok_or(ViewerError::NoDocument)?;
        ViewerError::check_page(page, source.page_count())?;
        if let Some(words) = self.words.get(&page) {
            return Ok(Arc::clone(words));
        }
        let words: Arc<[WordBox]> = source
            .word_boxes(page)
            .map_err(|err| ViewerError::Source {
                page,
                message: format!("{err:#}"),
            })?
            .into();
        self.words.insert(page, Arc::clone(&words));
        if let Some(slot) = self.slots.get_mut(&page) {
            slot.words = Arc::clone(&words);
        }
        Ok(words)
    }

    #[instrument(skip(self))]
    pub fn set_display_mode(&mut self, mode: DisplayMode) {
        if self.mode == mode {
            return;
        }
        self.mode = mode;
        for (page, slot) in self.slots.iter_mut() {
            if slot.set_mode(mode) {
                self.listener.page_ready(*page, slot);
            }
        }
    }

    pub fn retry(&mut self, page: usize) -> bool {
        if self.failed.remove(&page).is_none() {
            return false;
        }
        if self.slots.get(&page).is_some_and(PageSlot::is_failed) {
            self.evict(page);
        }
        true
    }

    pub fn mapper(&self, page: usize) -> Result<Option<CoordinateMapper>, ViewerError> {
        let source = self.source.as_ref().ok_or(ViewerError::NoDocument)?;
        ViewerError::check_page(page, source.page_count())?;
        let size = source
            .intrinsic_size(page)
            .map_err(|err| ViewerError::Source {
                page,
                message: format!("{err:#}"),
            })?;
        let (width, height) = match self.slots.get(&page).and_then(PageSlot::raster) {
            Some(raster) => (raster.width, raster.height),
            None => (
                (size.width * self.zoom).round().max(1.0) as u32,
                (size.height * self.zoom).round().max(1.0) as u32,
            ),
        };
        Ok(CoordinateMapper::new(width, height, size.width, size.height))
    }

    pub fn annotations(&self, page: usize) -> &[Annotation] {
        match self.slots.get(&page) {
            Some(slot) => &slot.annotations,
            None => self.store.get(page),
        }
    }

    fn annotations_mut(&mut self, page: usize) -> Option<&mut Vec<Annotation>> {
        match self.slots.get_mut(&page) {
            Some(slot) => Some(&mut slot.annotations),
            None => self.store.get_mut(page),
        }
    }

    pub fn add_annotation(
        &mut self,
        page: usize,
        annotation: Annotation,
    ) -> Result<AnnotationId, ViewerError> {
        ViewerError::check_page(page, self.page_count())?;
        let id = annotation.id;
        match self.slots.get_mut(&page) {
            Some(slot) => slot.annotations.push(annotation),
            None => {
                let mut list = self.store.take(page);
                list.push(annotation);
                self.store.put(page, list);
            }
        }
        Ok(id)
    }

    pub fn update_annotation<F>(
        &mut self,
        page: usize,
        id: AnnotationId,
        update: F,
    ) -> Result<bool, ViewerError>
    where
        F: FnOnce(&mut Annotation),
    {
        ViewerError::check_page(page, self.page_count())?;
        let found = self
            .annotations_mut(page)
            .and_then(|list| list.iter_mut().find(|annotation| annotation.id == id));
        match found {
            Some(annotation) => {
                update(annotation);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn remove_annotation(&mut self, page: usize, id: AnnotationId) -> Result<bool, ViewerError> {
        ViewerError::check_page(page, self.page_count())?;
        let resident = self.slots.contains_key(&page);
        let Some(list) = self.annotations_mut(page) else {
            return Ok(false);
        };
        let before = list.len();
        list.retain(|annotation| annotation.id != id);
        let removed = list.len() != before;
        if removed && !resident && list.is_empty() {
            self.store.put(page, Vec::new());
        }
        Ok(removed)
    }

    pub fn export_annotations(&self) -> BTreeMap<usize, Vec<Annotation>> {
        let mut pages: BTreeMap<usize, Vec<Annotation>> = self
            .store
            .iter()
            .map(|(page, list)| (page, list.to_vec()))
            .collect();
        for (page, slot) in &self.slots {
            if !slot.annotations.is_empty() {
                pages.insert(*page, slot.annotations.clone());
            }
        }
        pages
    }

    pub fn import_annotations(
        &mut self,
        page: usize,
        annotations: Vec<Annotation>,
    ) -> Result<(), ViewerError> {
        ViewerError::check_page(page, self.page_count())?;
        match self.slots.get_mut(&page) {
            Some(slot) => slot.annotations = annotations,
            None => self.store.put(page, annotations),
        }
        Ok(())
    }
}

fn render_page(source: &dyn PageSource, page: usize, scale: f32, generation: u64) -> RenderOutcome {
    let result = source
        .render(page, scale)
        .map_err(|err| ViewerError::Render {
            page,
            message: format!("{err:#}"),
        })
        .and_then(|image| check_raster(page, image));
    RenderOutcome {
        page,
        generation,
        scale,
        result,
    }
}

fn check_raster(page: usize, image: RasterImage) -> Result<RasterImage, ViewerError> {
    let expected = image.width as usize * image.height as usize * RasterImage::CHANNELS;
    if image.pixels.len() != expected {
        return Err(ViewerError::Render {
            page,
            message: format!(
                "{}x{} raster holds {} bytes, expected {}",
                image.width,
                image.height,
                image.pixels.len(),
                expected
            ),
        });
    }
    Ok(image)
}

/// Pages of `lo..=hi` to keep resident. When the range exceeds `budget`, pages
/// farthest from the midpoint are dropped first, the lower index first on a
/// tie.
fn select_window(lo: usize, hi: usize, budget: usize) -> BTreeSet<usize> {
    let mut pages: Vec<usize> = (lo..=hi).collect();
    if pages.len() > budget {
        let twice_mid = lo + hi;
        pages.sort_by_key(|&page| ((2 * page).abs_diff(twice_mid), Reverse(page)));
        pages.truncate(budget);
    }
    pages.into_iter().collect()
}
