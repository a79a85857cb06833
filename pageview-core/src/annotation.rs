use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::Rect;
use crate::WordBox;

pub type AnnotationId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const YELLOW: Rgb = Rgb(255, 235, 0);

    pub fn channels(self) -> [u8; 3] {
        [self.0, self.1, self.2]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Region {
    WordSet(Vec<WordBox>),
    RawRect(Rect),
}

impl Region {
    pub fn document_rects(&self) -> Vec<Rect> {
        match self {
            Region::WordSet(words) => words.iter().map(|word| word.rect).collect(),
            Region::RawRect(rect) => vec![*rect],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    pub region: Region,
    pub color: Rgb,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Annotation {
    pub fn new(region: Region, color: Rgb, note: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            region,
            color,
            note,
        }
    }
}

#[derive(Debug, Default)]
pub struct AnnotationStore {
    pages: BTreeMap<usize, Vec<Annotation>>,
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, page: usize, annotations: Vec<Annotation>) {
        if annotations.is_empty() {
            self.pages.remove(&page);
        } else {
            self.pages.insert(page, annotations);
        }
    }

    pub fn get(&self, page: usize) -> &[Annotation] {
        self.pages.get(&page).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get_mut(&mut self, page: usize) -> Option<&mut Vec<Annotation>> {
        self.pages.get_mut(&page)
    }

    pub fn take(&mut self, page: usize) -> Vec<Annotation> {
        self.pages.remove(&page).unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &[Annotation])> {
        self.pages.iter().map(|(page, list)| (*page, list.as_slice()))
    }
}
