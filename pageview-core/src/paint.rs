use crate::annotation::Annotation;
use crate::geometry::{CoordinateMapper, Rect};
use crate::RasterImage;

pub const HIGHLIGHT_ALPHA: f32 = 0.35;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PixelRect {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

pub fn paint_annotations(
    raster: &RasterImage,
    mapper: &CoordinateMapper,
    annotations: &[Annotation],
) -> RasterImage {
    let mut image = raster.clone();
    for annotation in annotations {
        for rect in mapper.region_to_screen(&annotation.region) {
            if let Some(rect) = to_pixel_rect(rect, image.width, image.height) {
                fill_rect(&mut image, rect, annotation.color.channels(), HIGHLIGHT_ALPHA);
            }
        }
    }
    image
}

fn to_pixel_rect(rect: Rect, width: u32, height: u32) -> Option<PixelRect> {
    let x0 = (rect.x0.floor().max(0.0) as u32).min(width);
    let y0 = (rect.y0.floor().max(0.0) as u32).min(height);
    let x1 = (rect.x1.ceil().max(0.0) as u32).min(width);
    let y1 = (rect.y1.ceil().max(0.0) as u32).min(height);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(PixelRect { x0, y0, x1, y1 })
}

fn fill_rect(image: &mut RasterImage, rect: PixelRect, color: [u8; 3], alpha: f32) {
    let stride = image.stride();
    for y in rect.y0..rect.y1 {
        let row_start = y as usize * stride;
        for x in rect.x0..rect.x1 {
            let idx = row_start + x as usize * RasterImage::CHANNELS;
            blend_pixel(&mut image.pixels[idx..idx + RasterImage::CHANNELS], color, alpha);
        }
    }
}

fn blend_pixel(pixel: &mut [u8], color: [u8; 3], alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    let inv = 1.0 - alpha;
    for (channel, tint) in pixel.iter_mut().zip(color) {
        *channel = (f32::from(*channel) * inv + f32::from(tint) * alpha)
            .round()
            .clamp(0.0, 255.0) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{Region, Rgb};

    #[test]
    fn paints_only_inside_the_mapped_rectangle() {
        let raster = RasterImage::filled(20, 20, [255, 255, 255]);
        let mapper = CoordinateMapper::new(20, 20, 10.0, 10.0).unwrap();
        let annotation = Annotation::new(
            Region::RawRect(Rect::new(1.0, 1.0, 3.0, 2.0)),
            Rgb(0, 0, 0),
            None,
        );

        let painted = paint_annotations(&raster, &mapper, &[annotation]);
        let shaded = (255.0 * (1.0 - HIGHLIGHT_ALPHA)).round() as u8;
        assert_eq!(painted.pixel(2, 2), Some([shaded; 3]));
        assert_eq!(painted.pixel(5, 3), Some([shaded; 3]));
        assert_eq!(painted.pixel(6, 2), Some([255; 3]));
        assert_eq!(painted.pixel(2, 4), Some([255; 3]));
        assert_eq!(raster.pixel(2, 2), Some([255; 3]));
    }

    #[test]
    fn rectangles_outside_the_raster_are_ignored() {
        let raster = RasterImage::filled(4, 4, [10, 10, 10]);
        let mapper = CoordinateMapper::new(4, 4, 4.0, 4.0).unwrap();
        let annotation = Annotation::new(
            Region::RawRect(Rect::new(10.0, 10.0, 20.0, 20.0)),
            Rgb::YELLOW,
            None,
        );
        assert_eq!(paint_annotations(&raster, &mapper, &[annotation]), raster);
    }
}
