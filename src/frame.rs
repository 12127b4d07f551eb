use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Captured frame: an immutable RGB pixel buffer plus capture metadata
#[derive(Debug, Clone)]
pub struct Frame {
    /// Position of the frame within its session, starting at 0
    pub index: u64,
    /// When the frame was captured
    pub captured_at: DateTime<Utc>,
    /// Pixel data (shared ownership, never mutated)
    pub image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(index: u64, captured_at: DateTime<Utc>, image: RgbImage) -> Self {
        Self {
            index,
            captured_at,
            image: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Axis-aligned box in source-frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Corners ordered so that (x0, y0) is the top-left one
    pub fn normalized(&self) -> Self {
        Self {
            x0: self.x0.min(self.x1),
            y0: self.y0.min(self.y1),
            x1: self.x0.max(self.x1),
            y1: self.y0.max(self.y1),
        }
    }

    /// Clamp the box to a `width` x `height` frame.
    ///
    /// Returns `None` when the box lies entirely outside the frame or
    /// collapses to nothing after clamping.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<PixelRect> {
        let b = self.normalized();
        if !(b.x0.is_finite() && b.y0.is_finite() && b.x1.is_finite() && b.y1.is_finite()) {
            return None;
        }
        if width == 0 || height == 0 {
            return None;
        }

        let max_x = (width - 1) as f32;
        let max_y = (height - 1) as f32;
        if b.x1 < 0.0 || b.y1 < 0.0 || b.x0 > max_x || b.y0 > max_y {
            return None;
        }

        let x0 = b.x0.max(0.0).round() as u32;
        let y0 = b.y0.max(0.0).round() as u32;
        let x1 = b.x1.min(max_x).round() as u32;
        let y1 = b.y1.min(max_y).round() as u32;

        if x1 < x0 || y1 < y0 {
            return None;
        }

        Some(PixelRect { x0, y0, x1, y1 })
    }
}

/// Inclusive integer rectangle that fits inside a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl PixelRect {
    pub fn width(&self) -> u32 {
        self.x1 - self.x0 + 1
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0 + 1
    }
}

/// One object reported by the detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    pub label: String,
    /// Model confidence in [0, 1]
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new<S: Into<String>>(class_id: u32, label: S, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            label: label.into(),
            confidence,
            bbox,
        }
    }

    /// Text drawn next to the box and written to the event log
    pub fn caption(&self) -> String {
        format!("{} {:.2}", self.label, self.confidence)
    }
}

/// A frame with its detections drawn on; consumed by the recorder and the live view
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub index: u64,
    pub captured_at: DateTime<Utc>,
    pub image: Arc<RgbImage>,
    /// Detections that were drawn, in drawing order
    pub detections: Vec<Detection>,
}

impl AnnotatedFrame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Encode the annotated image as a baseline JPEG
    pub fn to_jpeg(&self, quality: u8) -> crate::error::Result<Vec<u8>> {
        encode_jpeg(&self.image, quality)
    }
}

pub(crate) fn encode_jpeg(image: &RgbImage, quality: u8) -> crate::error::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(image.as_raw().len() / 8);
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder
        .encode_image(image)
        .map_err(|e| crate::error::LiveDetectError::recorder(format!("JPEG encoding failed: {}", e)))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_dimensions() {
        let frame = Frame::new(0, Utc::now(), RgbImage::new(64, 48));
        assert_eq!(frame.width(), 64);
        assert_eq!(frame.height(), 48);
        assert_eq!(frame.dimensions(), (64, 48));
    }

    #[test]
    fn test_bbox_clamp_inside() {
        let rect = BoundingBox::new(10.0, 5.0, 20.0, 15.0).clamp_to(64, 48).unwrap();
        assert_eq!(rect, PixelRect { x0: 10, y0: 5, x1: 20, y1: 15 });
        assert_eq!(rect.width(), 11);
        assert_eq!(rect.height(), 11);
    }

    #[test]
    fn test_bbox_clamp_partially_outside() {
        let rect = BoundingBox::new(-10.0, 40.0, 30.0, 100.0).clamp_to(64, 48).unwrap();
        assert_eq!(rect, PixelRect { x0: 0, y0: 40, x1: 30, y1: 47 });
    }

    #[test]
    fn test_bbox_entirely_outside() {
        assert!(BoundingBox::new(70.0, 0.0, 90.0, 10.0).clamp_to(64, 48).is_none());
        assert!(BoundingBox::new(-20.0, -20.0, -1.0, -1.0).clamp_to(64, 48).is_none());
        assert!(BoundingBox::new(f32::NAN, 0.0, 1.0, 1.0).clamp_to(64, 48).is_none());
    }

    #[test]
    fn test_bbox_swapped_corners() {
        let rect = BoundingBox::new(20.0, 15.0, 10.0, 5.0).clamp_to(64, 48).unwrap();
        assert_eq!(rect, PixelRect { x0: 10, y0: 5, x1: 20, y1: 15 });
    }

    #[test]
    fn test_detection_caption() {
        let det = Detection::new(0, "box", 0.9, BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        assert_eq!(det.caption(), "box 0.90");
    }

    #[test]
    fn test_annotated_frame_jpeg() {
        let annotated = AnnotatedFrame {
            index: 0,
            captured_at: Utc::now(),
            image: Arc::new(RgbImage::new(16, 16)),
            detections: Vec::new(),
        };
        let jpeg = annotated.to_jpeg(80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}
