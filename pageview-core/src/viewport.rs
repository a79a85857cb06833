use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

use crate::config::ViewerConfig;
use crate::PageSize;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScrollPosition {
    pub x: f32,
    pub y: f32,
}

pub fn compute_visible_range(
    scroll_offset: f32,
    viewport_height: f32,
    page_height_hint: f32,
    page_count: usize,
) -> Option<RangeInclusive<usize>> {
    if page_count == 0 {
        return None;
    }
    let last = page_count - 1;
    if !(page_height_hint.is_finite() && page_height_hint > 0.0) {
        return Some(0..=0);
    }
    let top = scroll_offset.max(0.0);
    let bottom = top + viewport_height.max(0.0);
    let lo = ((top / page_height_hint).floor() as usize).min(last);
    let hi = ((bottom / page_height_hint).ceil() as usize)
        .saturating_sub(1)
        .clamp(lo, last);
    Some(lo..=hi)
}

pub fn compute_zoom(viewport_width: f32, page_width: f32, multiplier: f32, fit_margin: f32) -> f32 {
    if !(page_width.is_finite() && page_width > 0.0 && viewport_width > 0.0) {
        return multiplier;
    }
    viewport_width / page_width * fit_margin * multiplier
}

#[derive(Debug, Clone)]
pub struct ViewportController {
    zoom_step: f32,
    min_multiplier: f32,
    max_multiplier: f32,
    fit_margin: f32,
    page_spacing: f32,
    multiplier: f32,
    viewport_width: f32,
    viewport_height: f32,
    scroll: ScrollPosition,
    page_count: usize,
    first_page: Option<PageSize>,
    // first page raster height divided by its render scale
    measured_unit_height: Option<f32>,
}

impl ViewportController {
    pub fn new(config: &ViewerConfig) -> Self {
        let defaults = ViewerConfig::default();
        let positive_or = |value: f32, fallback: f32| {
            if value.is_finite() && value > 0.0 {
                value
            } else {
                fallback
            }
        };
        let lower = positive_or(config.min_zoom_multiplier, defaults.min_zoom_multiplier);
        let upper = positive_or(config.max_zoom_multiplier, defaults.max_zoom_multiplier);
        let zoom_step = if config.zoom_step.is_finite() && config.zoom_step > 1.0 {
            config.zoom_step
        } else {
            defaults.zoom_step
        };
        Self {
            zoom_step,
            // f32::clamp panics on an inverted range
            min_multiplier: lower.min(upper),
            max_multiplier: lower.max(upper),
            fit_margin: config.fit_margin,
            page_spacing: config.page_spacing,
            multiplier: 1.0,
            viewport_width: 0.0,
            viewport_height: 0.0,
            scroll: ScrollPosition::default(),
            page_count: 0,
            first_page: None,
            measured_unit_height: None,
        }
    }

    pub fn set_document(&mut self, page_count: usize, first_page: Option<PageSize>) {
        self.page_count = page_count;
        self.first_page = first_page;
        self.measured_unit_height = None;
        self.scroll = ScrollPosition::default();
    }

    pub fn observe_first_page(&mut self, raster_height: u32, scale: f32) {
        if scale > 0.0 && raster_height > 0 {
            self.measured_unit_height = Some(raster_height as f32 / scale);
        }
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        self.viewport_width = width.max(0.0);
        self.viewport_height = height.max(0.0);
        self.scroll = self.clamp_scroll(self.scroll);
    }

    pub fn viewport_size(&self) -> (f32, f32) {
        (self.viewport_width, self.viewport_height)
    }

    pub fn scroll(&self) -> ScrollPosition {
        self.scroll
    }

    pub fn scroll_to(&mut self, position: ScrollPosition) {
        self.scroll = self.clamp_scroll(position);
    }

    pub fn multiplier(&self) -> f32 {
        self.multiplier
    }

    pub fn zoom(&self) -> f32 {
        self.zoom_for(self.multiplier)
    }

    fn zoom_for(&self, multiplier: f32) -> f32 {
        let page_width = self.first_page.map(|size| size.width).unwrap_or(0.0);
        compute_zoom(self.viewport_width, page_width, multiplier, self.fit_margin)
    }

    pub fn page_height_hint(&self) -> f32 {
        self.hint_for(self.zoom())
    }

    fn hint_for(&self, zoom: f32) -> f32 {
        let unit = self
            .measured_unit_height
            .or(self.first_page.map(|size| size.height))
            .unwrap_or(0.0);
        unit * zoom + self.page_spacing
    }

    pub fn visible_range(&self) -> Option<RangeInclusive<usize>> {
        compute_visible_range(
            self.scroll.y,
            self.viewport_height,
            self.page_height_hint(),
            self.page_count,
        )
    }

    pub fn page_offset(&self, page: usize) -> f32 {
        page as f32 * self.page_height_hint()
    }

    pub fn zoom_in(&mut self, anchor: Option<(f32, f32)>) -> bool {
        self.set_multiplier(self.multiplier * self.zoom_step, anchor)
    }

    pub fn zoom_out(&mut self, anchor: Option<(f32, f32)>) -> bool {
        self.set_multiplier(self.multiplier / self.zoom_step, anchor)
    }

    pub fn reset_zoom(&mut self) -> bool {
        self.set_multiplier(1.0, None)
    }

    /// Changes the zoom multiplier, clamped to the configured bounds, and
    /// moves the scroll position so the document point under `anchor` (viewport
    /// pixels; the viewport centre when `None`) stays where it is on screen.
    /// Returns false if the multiplier did not change.
    pub fn set_multiplier(&mut self, multiplier: f32, anchor: Option<(f32, f32)>) -> bool {
        let next = multiplier.clamp(self.min_multiplier, self.max_multiplier);
        if (next - self.multiplier).abs() <= f32::EPSILON {
            return false;
        }
        let (ax, ay) =
            anchor.unwrap_or((self.viewport_width / 2.0, self.viewport_height / 2.0));
        let old_zoom = self.zoom();
        let old_hint = self.page_height_hint();
        self.multiplier = next;
        let new_zoom = self.zoom();
        let new_hint = self.page_height_hint();

        let mut target = self.scroll;
        if old_hint > 0.0 {
            let content_y = self.scroll.y + ay;
            let page = (content_y / old_hint).floor();
            let fraction = (content_y - page * old_hint) / old_hint;
            target.y = (page + fraction) * new_hint - ay;
        }
        if old_zoom > 0.0 {
            target.x = (self.scroll.x + ax) * (new_zoom / old_zoom) - ax;
        }
        self.scroll = self.clamp_scroll(target);
        true
    }

    fn clamp_scroll(&self, position: ScrollPosition) -> ScrollPosition {
        let content_height = self.page_height_hint() * self.page_count as f32;
        let content_width = self
            .first_page
            .map(|size| size.width * self.zoom())
            .unwrap_or(0.0);
        ScrollPosition {
            x: position
                .x
                .clamp(0.0, (content_width - self.viewport_width).max(0.0)),
            y: position
                .y
                .clamp(0.0, (content_height - self.viewport_height).max(0.0)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScrollDebouncer {
    delay: Duration,
    pending: Option<(ScrollPosition, Instant)>,
}

impl ScrollDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn push(&mut self, position: ScrollPosition, now: Instant) {
        self.pending = Some((position, now));
    }

    pub fn poll(&mut self, now: Instant) -> Option<ScrollPosition> {
        match self.pending {
            Some((position, at)) if now.saturating_duration_since(at) >= self.delay => {
                self.pending = None;
                Some(position)
            }
            _ => None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|(_, at)| at + self.delay)
    }

    pub fn flush(&mut self) -> Option<ScrollPosition> {
        self.pending.take().map(|(position, _)| position)
    }
}
