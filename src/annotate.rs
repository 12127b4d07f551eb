use crate::config::AnnotationConfig;
use crate::frame::{AnnotatedFrame, Detection, Frame, PixelRect};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-class box colours, indexed by `class_id % 20`
const PALETTE: [[u8; 3]; 20] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [146, 204, 23],
    [61, 219, 134],
    [26, 147, 52],
    [0, 212, 187],
    [44, 153, 168],
    [0, 194, 255],
    [52, 69, 147],
    [100, 115, 255],
    [0, 24, 236],
    [132, 56, 255],
    [82, 0, 133],
    [203, 56, 255],
    [255, 149, 200],
    [255, 55, 199],
];

pub fn class_colour(class_id: u32) -> Rgb<u8> {
    Rgb(PALETTE[class_id as usize % PALETTE.len()])
}

/// Draws boxes and captions onto copies of captured frames
pub struct Annotator {
    line_width: u32,
    font: Option<Font<'static>>,
    scale: Scale,
}

impl Annotator {
    pub fn new(line_width: u32, font: Option<Font<'static>>, font_size: f32) -> Self {
        Self {
            line_width: line_width.max(1),
            font,
            scale: Scale::uniform(font_size),
        }
    }

    /// Build from configuration; a missing or unreadable font disables captions
    pub fn from_config(config: &AnnotationConfig) -> Self {
        let font = match std::fs::read(&config.font_path) {
            Ok(data) => match Font::try_from_vec(data) {
                Some(font) => Some(font),
                None => {
                    warn!(
                        "Failed to parse font file '{}'; boxes will be drawn without captions",
                        config.font_path
                    );
                    None
                }
            },
            Err(e) => {
                warn!(
                    "Failed to read font file '{}': {}; boxes will be drawn without captions",
                    config.font_path, e
                );
                None
            }
        };
        Self::new(config.line_width, font, config.font_size)
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw `detections` in list order onto a copy of the frame.
    ///
    /// Boxes are clamped to the frame; boxes entirely outside it are not drawn
    /// and are left out of the returned frame's detection list.
    pub fn annotate(&self, frame: &Frame, detections: Vec<Detection>) -> AnnotatedFrame {
        if detections.is_empty() {
            return AnnotatedFrame {
                index: frame.index,
                captured_at: frame.captured_at,
                image: Arc::clone(&frame.image),
                detections,
            };
        }

        let mut image = frame.image.as_ref().clone();
        let (width, height) = image.dimensions();
        let mut drawn = Vec::with_capacity(detections.len());

        for detection in detections {
            let Some(rect) = detection.bbox.clamp_to(width, height) else {
                debug!(
                    "Skipping {} on frame {}: box lies outside {}x{}",
                    detection.label, frame.index, width, height
                );
                continue;
            };
            let colour = class_colour(detection.class_id);
            self.draw_box(&mut image, rect, colour);
            self.draw_caption(&mut image, rect, colour, &detection.caption());
            drawn.push(detection);
        }

        AnnotatedFrame {
            index: frame.index,
            captured_at: frame.captured_at,
            image: Arc::new(image),
            detections: drawn,
        }
    }

    fn draw_box(&self, image: &mut RgbImage, rect: PixelRect, colour: Rgb<u8>) {
        // Thicken inwards so the outline never leaves the clamped area
        for inset in 0..self.line_width {
            if rect.width() <= inset * 2 || rect.height() <= inset * 2 {
                break;
            }
            let r = Rect::at((rect.x0 + inset) as i32, (rect.y0 + inset) as i32)
                .of_size(rect.width() - inset * 2, rect.height() - inset * 2);
            draw_hollow_rect_mut(image, r, colour);
        }
    }

    fn draw_caption(&self, image: &mut RgbImage, rect: PixelRect, colour: Rgb<u8>, text: &str) {
        let Some(font) = self.font.as_ref() else {
            return;
        };

        let (text_width, text_height) = text_size(self.scale, font, text);
        let label_w = (text_width.max(1) as u32 + 4).min(image.width());
        let label_h = (text_height.max(1) as u32 + 4).min(image.height());

        // Above the box when there is room, otherwise inside its top edge
        let x = rect.x0.min(image.width() - label_w);
        let y = if rect.y0 >= label_h {
            rect.y0 - label_h
        } else {
            rect.y0.min(image.height() - label_h)
        };

        draw_filled_rect_mut(
            image,
            Rect::at(x as i32, y as i32).of_size(label_w, label_h),
            colour,
        );
        draw_text_mut(
            image,
            contrast_text(colour),
            x as i32 + 2,
            y as i32 + 2,
            self.scale,
            font,
            text,
        );
    }
}

fn contrast_text(background: Rgb<u8>) -> Rgb<u8> {
    let [r, g, b] = background.0;
    let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    if luma > 150.0 {
        Rgb([0, 0, 0])
    } else {
        Rgb([255, 255, 255])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::BoundingBox;
    use chrono::Utc;

    fn black_frame(width: u32, height: u32) -> Frame {
        Frame::new(3, Utc::now(), RgbImage::new(width, height))
    }

    #[test]
    fn test_palette_wraps() {
        assert_eq!(class_colour(0), class_colour(20));
        assert_ne!(class_colour(0), class_colour(1));
    }

    #[test]
    fn test_no_detections_shares_pixels() {
        let annotator = Annotator::new(2, None, 16.0);
        let frame = black_frame(32, 32);
        let annotated = annotator.annotate(&frame, Vec::new());
        assert!(Arc::ptr_eq(&annotated.image, &frame.image));
        assert_eq!(annotated.index, 3);
    }

    #[test]
    fn test_box_drawn_without_touching_source() {
        let annotator = Annotator::new(2, None, 16.0);
        let frame = black_frame(64, 48);
        let det = Detection::new(0, "box", 0.9, BoundingBox::new(10.0, 10.0, 30.0, 30.0));

        let annotated = annotator.annotate(&frame, vec![det]);

        assert_eq!(annotated.detections.len(), 1);
        assert_eq!(*annotated.image.get_pixel(10, 10), class_colour(0));
        assert_eq!(*annotated.image.get_pixel(11, 20), class_colour(0));
        assert_eq!(*annotated.image.get_pixel(20, 20), Rgb([0, 0, 0]));
        assert_eq!(*frame.image.get_pixel(10, 10), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_out_of_frame_boxes() {
        let annotator = Annotator::new(2, None, 16.0);
        let frame = black_frame(64, 48);
        let outside = Detection::new(1, "far", 0.8, BoundingBox::new(100.0, 100.0, 120.0, 120.0));
        let partial = Detection::new(2, "edge", 0.7, BoundingBox::new(50.0, 40.0, 90.0, 90.0));

        let annotated = annotator.annotate(&frame, vec![outside, partial]);

        assert_eq!(annotated.detections.len(), 1);
        assert_eq!(annotated.detections[0].label, "edge");
        assert_eq!(*annotated.image.get_pixel(63, 47), class_colour(2));
    }

    #[test]
    fn test_later_boxes_drawn_over_earlier() {
        let annotator = Annotator::new(1, None, 16.0);
        let frame = black_frame(32, 32);
        let first = Detection::new(0, "a", 0.9, BoundingBox::new(5.0, 5.0, 20.0, 20.0));
        let second = Detection::new(5, "b", 0.9, BoundingBox::new(5.0, 5.0, 25.0, 25.0));

        let annotated = annotator.annotate(&frame, vec![first, second]);
        assert_eq!(*annotated.image.get_pixel(5, 5), class_colour(5));
    }

    #[test]
    fn test_missing_font_disables_captions() {
        let config = AnnotationConfig {
            line_width: 2,
            font_path: "/nonexistent/font.ttf".to_string(),
            font_size: 16.0,
        };
        let annotator = Annotator::from_config(&config);
        assert!(!annotator.has_font());
    }
}
