use serde::{Deserialize, Serialize};

use crate::annotation::Region;
use crate::WordBox;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn from_xywh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    /// True when the two rectangles share a region of positive area. Rectangles
    /// that only touch along an edge or a corner do not intersect.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x0 < other.x1 && other.x0 < self.x1 && self.y0 < other.y1 && other.y0 < self.y1
    }

    fn scaled(&self, sx: f32, sy: f32) -> Rect {
        Rect::new(self.x0 * sx, self.y0 * sy, self.x1 * sx, self.y1 * sy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    pub page: usize,
    pub rect: Rect,
}

impl Selection {
    pub fn from_drag(page: usize, start: (f32, f32), end: (f32, f32)) -> Self {
        Self {
            page,
            rect: Rect::new(start.0, start.1, end.0, end.1),
        }
    }

    pub fn is_degenerate(&self, min_px: f32) -> bool {
        self.rect.width() < min_px || self.rect.height() < min_px
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapper {
    scale_x: f32,
    scale_y: f32,
}

impl CoordinateMapper {
    pub fn new(raster_width: u32, raster_height: u32, doc_width: f32, doc_height: f32) -> Option<Self> {
        let valid = |v: f32| v.is_finite() && v > 0.0;
        if raster_width == 0 || raster_height == 0 || !valid(doc_width) || !valid(doc_height) {
            return None;
        }
        Some(Self {
            scale_x: doc_width / raster_width as f32,
            scale_y: doc_height / raster_height as f32,
        })
    }

    pub fn to_document_space(&self, pixel_rect: Rect) -> Rect {
        pixel_rect.scaled(self.scale_x, self.scale_y)
    }

    pub fn to_screen_space(&self, document_rect: Rect) -> Rect {
        document_rect.scaled(1.0 / self.scale_x, 1.0 / self.scale_y)
    }

    pub fn selection_to_document(&self, selection: &Selection, min_px: f32) -> Option<Rect> {
        if selection.is_degenerate(min_px) {
            return None;
        }
        Some(self.to_document_space(selection.rect))
    }

    pub fn region_to_screen(&self, region: &Region) -> Vec<Rect> {
        region
            .document_rects()
            .into_iter()
            .map(|rect| self.to_screen_space(rect))
            .collect()
    }
}

pub fn words_intersecting(rect: &Rect, words: &[WordBox]) -> Vec<WordBox> {
    words
        .iter()
        .filter(|word| word.rect.intersects(rect))
        .cloned()
        .collect()
}

pub fn join_words(words: &[WordBox]) -> String {
    let mut text = String::new();
    let mut previous: Option<&Rect> = None;
    for word in words {
        if let Some(prev) = previous {
            if word.rect.y0 >= prev.y1 {
                text.push('\n');
            } else {
                text.push(' ');
            }
        }
        text.push_str(&word.text);
        previous = Some(&word.rect);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(x0: f32, y0: f32, x1: f32, y1: f32, text: &str) -> WordBox {
        WordBox::new(Rect::new(x0, y0, x1, y1), text)
    }

    #[test]
    fn rect_normalises_reversed_corners() {
        let rect = Rect::new(10.0, 20.0, 2.0, 4.0);
        assert_eq!(rect, Rect::new(2.0, 4.0, 10.0, 20.0));
        assert_eq!(rect.width(), 8.0);
        assert_eq!(rect.height(), 16.0);
    }

    #[test]
    fn touching_rectangles_do_not_intersect() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let right = Rect::new(10.0, 0.0, 20.0, 10.0);
        let corner = Rect::new(10.0, 10.0, 20.0, 20.0);
        let overlapping = Rect::new(9.5, 9.5, 20.0, 20.0);
        assert!(!a.intersects(&right));
        assert!(!a.intersects(&corner));
        assert!(a.intersects(&overlapping));
        assert!(overlapping.intersects(&a));
    }

    #[test]
    fn mapper_scales_each_axis_independently() {
        let mapper = CoordinateMapper::new(1200, 1600, 600.0, 800.0).unwrap();
        let doc = mapper.to_document_space(Rect::new(100.0, 200.0, 300.0, 400.0));
        assert_eq!(doc, Rect::new(50.0, 100.0, 150.0, 200.0));

        let wide = CoordinateMapper::new(600, 400, 600.0, 800.0).unwrap();
        let doc = wide.to_document_space(Rect::new(10.0, 10.0, 20.0, 20.0));
        assert_eq!(doc, Rect::new(10.0, 20.0, 20.0, 40.0));
    }

    #[test]
    fn screen_space_inverts_document_space() {
        let mapper = CoordinateMapper::new(918, 1188, 612.0, 792.0).unwrap();
        let original = Rect::new(33.0, 66.0, 330.0, 660.0);
        let back = mapper.to_screen_space(mapper.to_document_space(original));
        assert!((back.x0 - original.x0).abs() < 1e-3);
        assert!((back.y0 - original.y0).abs() < 1e-3);
        assert!((back.x1 - original.x1).abs() < 1e-3);
        assert!((back.y1 - original.y1).abs() < 1e-3);
    }

    #[test]
    fn mapper_rejects_empty_dimensions() {
        assert!(CoordinateMapper::new(0, 100, 10.0, 10.0).is_none());
        assert!(CoordinateMapper::new(100, 100, 0.0, 10.0).is_none());
        assert!(CoordinateMapper::new(100, 100, 10.0, f32::NAN).is_none());
    }

    #[test]
    fn narrow_selection_is_treated_as_none() {
        let mapper = CoordinateMapper::new(100, 100, 100.0, 100.0).unwrap();
        let narrow = Selection::from_drag(0, (10.0, 10.0), (13.0, 80.0));
        assert!(mapper.selection_to_document(&narrow, 5.0).is_none());
        let flat = Selection::from_drag(0, (10.0, 10.0), (80.0, 14.9));
        assert!(mapper.selection_to_document(&flat, 5.0).is_none());
        let exact = Selection::from_drag(0, (10.0, 10.0), (15.0, 15.0));
        assert!(mapper.selection_to_document(&exact, 5.0).is_some());
    }

    #[test]
    fn words_intersecting_keeps_order_and_skips_touching() {
        let words = vec![
            word(0.0, 0.0, 10.0, 10.0, "alpha"),
            word(12.0, 0.0, 20.0, 10.0, "beta"),
            word(30.0, 0.0, 40.0, 10.0, "gamma"),
        ];
        let hits = words_intersecting(&Rect::new(5.0, 2.0, 30.0, 8.0), &words);
        let texts: Vec<_> = hits.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, vec!["alpha", "beta"]);
    }

    #[test]
    fn words_intersecting_is_idempotent() {
        let words = vec![
            word(0.0, 0.0, 10.0, 10.0, "one"),
            word(0.0, 12.0, 10.0, 22.0, "two"),
        ];
        let rect = Rect::new(1.0, 1.0, 9.0, 15.0);
        assert_eq!(
            words_intersecting(&rect, &words),
            words_intersecting(&rect, &words)
        );
    }

    #[test]
    fn join_words_breaks_lines_on_vertical_gap() {
        let words = vec![
            word(0.0, 0.0, 10.0, 10.0, "first"),
            word(12.0, 1.0, 20.0, 10.0, "line"),
            word(0.0, 12.0, 10.0, 22.0, "second"),
        ];
        assert_eq!(join_words(&words), "first line\nsecond");
        assert_eq!(join_words(&[]), "");
    }

    #[test]
    fn region_to_screen_handles_both_shapes() {
        let mapper = CoordinateMapper::new(200, 200, 100.0, 100.0).unwrap();
        let raw = Region::RawRect(Rect::new(10.0, 10.0, 20.0, 20.0));
        assert_eq!(
            mapper.region_to_screen(&raw),
            vec![Rect::new(20.0, 20.0, 40.0, 40.0)]
        );
        let words = Region::WordSet(vec![
            word(0.0, 0.0, 5.0, 5.0, "a"),
            word(6.0, 0.0, 9.0, 5.0, "b"),
        ]);
        assert_eq!(mapper.region_to_screen(&words).len(), 2);
    }
}
