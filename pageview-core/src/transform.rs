use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::RasterImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    #[default]
    Default,
    NightInverted,
    EyeCare,
}

// Warm tint: a plain per-channel gain, not a perceptual colour-temperature model.
const EYE_CARE_GAIN: [f32; 3] = [0.90, 1.13, 0.92];

pub fn apply_transform(image: &RasterImage, mode: DisplayMode) -> RasterImage {
    let mut pixels = image.pixels.clone();
    match mode {
        DisplayMode::Default => {}
        DisplayMode::NightInverted => for_each_row(image, &mut pixels, invert_pixels),
        DisplayMode::EyeCare => for_each_row(image, &mut pixels, eye_care_pixels),
    }
    RasterImage {
        width: image.width,
        height: image.height,
        pixels,
    }
}

fn for_each_row(image: &RasterImage, pixels: &mut [u8], f: fn(&mut [u8])) {
    let stride = image.stride();
    if stride == 0 {
        return;
    }
    pixels.par_chunks_mut(stride).for_each(f);
}

fn invert_pixels(pixels: &mut [u8]) {
    for value in pixels.iter_mut() {
        *value = 255 - *value;
    }
}

fn eye_care_pixels(pixels: &mut [u8]) {
    for chunk in pixels.chunks_exact_mut(RasterImage::CHANNELS) {
        for (value, gain) in chunk.iter_mut().zip(EYE_CARE_GAIN) {
            *value = (f32::from(*value) * gain).clamp(0.0, 255.0) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RasterImage {
        RasterImage {
            width: 2,
            height: 2,
            pixels: vec![0, 10, 20, 200, 200, 200, 255, 255, 255, 30, 128, 250],
        }
    }

    #[test]
    fn default_is_identity() {
        let image = sample();
        assert_eq!(apply_transform(&image, DisplayMode::Default), image);
    }

    #[test]
    fn default_then_night_equals_night() {
        let image = sample();
        let composed = apply_transform(
            &apply_transform(&image, DisplayMode::Default),
            DisplayMode::NightInverted,
        );
        assert_eq!(composed, apply_transform(&image, DisplayMode::NightInverted));
    }

    #[test]
    fn night_complements_every_channel() {
        let night = apply_transform(&sample(), DisplayMode::NightInverted);
        assert_eq!(night.pixel(0, 0), Some([255, 245, 235]));
        assert_eq!(night.pixel(0, 1), Some([0, 0, 0]));
        assert_eq!(night.pixel(1, 1), Some([225, 127, 5]));
    }

    #[test]
    fn eye_care_scales_and_clamps() {
        let eye = apply_transform(&sample(), DisplayMode::EyeCare);
        assert_eq!(eye.pixel(1, 0), Some([180, 226, 184]));
        // green saturates at 255
        assert_eq!(eye.pixel(0, 1), Some([229, 255, 234]));
    }

    #[test]
    fn transform_leaves_input_untouched() {
        let image = sample();
        let before = image.clone();
        let _ = apply_transform(&image, DisplayMode::EyeCare);
        let _ = apply_transform(&image, DisplayMode::NightInverted);
        assert_eq!(image, before);
    }

    #[test]
    fn empty_raster_is_supported() {
        let empty = RasterImage {
            width: 0,
            height: 0,
            pixels: Vec::new(),
        };
        assert_eq!(apply_transform(&empty, DisplayMode::EyeCare), empty);
    }
}
