//! Detection overlay.
//!
//! Draws face boxes with a name/confidence label, and optionally a REC
//! marker with wall-clock time, onto a copy of a captured frame. The
//! captured frame itself is never modified.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::frame::Frame;
use crate::matcher::{BoundingBox, Detection, Identity};

const KNOWN_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const REC_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;

/// Label drawn under a face box, e.g. `ALICE (92%)` or `UNKNOWN`.
pub fn label_for(detection: &Detection) -> String {
    let mut label = match &detection.identity {
        Identity::Unknown => "UNKNOWN".to_string(),
        Identity::Known(name) => name.to_uppercase(),
    };
    if let Some(confidence) = detection.confidence.filter(|c| *c > 0.0) {
        label.push_str(&format!(" ({:.0}%)", confidence));
    }
    label
}

/// True when `annotate` would draw anything.
pub fn has_marks(detections: &[Detection], recording_marker: bool) -> bool {
    recording_marker || detections.iter().any(|d| drawable(&d.bounding_box))
}

/// Copy `frame` and draw `detections` on it. `recording_marker` carries the
/// clock text (e.g. `14:03:27`): a REC dot goes in the top-right corner and
/// the clock in the bottom-left.
pub fn annotate(
    frame: &Frame,
    detections: &[Detection],
    recording_marker: Option<&str>,
) -> Result<Frame> {
    let mut canvas = RgbImage::from_raw(frame.width, frame.height, frame.pixels().to_vec())
        .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
    let scale = text_scale(frame.height);

    for detection in detections {
        draw_face_box(&mut canvas, detection, scale);
    }
    if let Some(clock) = recording_marker {
        draw_recording_marker(&mut canvas, clock, scale);
    }

    Frame::new(
        canvas.into_raw(),
        frame.width,
        frame.height,
        frame.captured_at,
        frame.sequence,
    )
}

fn drawable(bbox: &BoundingBox) -> bool {
    bbox.width() > 0 && bbox.height() > 0
}

fn text_scale(height: u32) -> u32 {
    (height / 240).max(1)
}

fn draw_face_box(canvas: &mut RgbImage, detection: &Detection, scale: u32) {
    let Some(bbox) = clip_to(canvas, &detection.bounding_box) else {
        return;
    };
    let color = match detection.identity {
        Identity::Unknown => UNKNOWN_COLOR,
        Identity::Known(_) => KNOWN_COLOR,
    };

    // Two-pixel outline.
    draw_hollow_rect_mut(canvas, rect(bbox.left, bbox.top, bbox.width(), bbox.height()), color);
    if bbox.width() > 2 && bbox.height() > 2 {
        draw_hollow_rect_mut(
            canvas,
            rect(bbox.left + 1, bbox.top + 1, bbox.width() - 2, bbox.height() - 2),
            color,
        );
    }

    let band = (GLYPH_HEIGHT * scale + 6).min(bbox.height());
    draw_filled_rect_mut(
        canvas,
        rect(bbox.left, bbox.bottom - band, bbox.width(), band),
        color,
    );
    let text_top = (bbox.bottom - band) + band.saturating_sub(GLYPH_HEIGHT * scale) / 2;
    draw_text(canvas, &label_for(detection), bbox.left + 3, text_top, scale, TEXT_COLOR);
}

fn draw_recording_marker(canvas: &mut RgbImage, clock: &str, scale: u32) {
    let (width, height) = canvas.dimensions();
    let radius = 4 * scale;
    let margin = 6 * scale;
    let center_x = width.saturating_sub(margin + radius);
    let center_y = margin + radius;
    draw_filled_circle_mut(canvas, (center_x as i32, center_y as i32), radius as i32, REC_COLOR);

    let rec_width = text_width("REC", scale);
    let rec_left = center_x.saturating_sub(radius + 4 * scale + rec_width);
    let rec_top = center_y.saturating_sub(GLYPH_HEIGHT * scale / 2);
    draw_text(canvas, "REC", rec_left, rec_top, scale, REC_COLOR);

    let clock_top = height.saturating_sub(margin + GLYPH_HEIGHT * scale);
    draw_text(canvas, clock, margin, clock_top, scale, TEXT_COLOR);
}

/// Clamp `bbox` to the canvas; `None` when nothing of it is visible.
fn clip_to(canvas: &RgbImage, bbox: &BoundingBox) -> Option<BoundingBox> {
    let (width, height) = canvas.dimensions();
    let clipped = BoundingBox {
        top: bbox.top.min(height),
        right: bbox.right.min(width),
        bottom: bbox.bottom.min(height),
        left: bbox.left.min(width),
    };
    drawable(&clipped).then_some(clipped)
}

fn rect(left: u32, top: u32, width: u32, height: u32) -> Rect {
    Rect::at(left as i32, top as i32).of_size(width.max(1), height.max(1))
}

fn text_width(text: &str, scale: u32) -> u32 {
    text.chars().count() as u32 * (GLYPH_WIDTH + 1) * scale
}

fn draw_text(canvas: &mut RgbImage, text: &str, left: u32, top: u32, scale: u32, color: Rgb<u8>) {
    let (width, height) = canvas.dimensions();
    for (index, ch) in text.chars().enumerate() {
        let origin_x = left + index as u32 * (GLYPH_WIDTH + 1) * scale;
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let x = origin_x + col * scale + dx;
                        let y = top + row as u32 * scale + dy;
                        if x < width && y < height {
                            canvas.put_pixel(x, y, color);
                        }
                    }
                }
            }
        }
    }
}

/// 5x7 bitmap glyphs, one byte per row, most significant of the low five
/// bits on the left. Lowercase maps to uppercase; anything else is `?`.
fn glyph(ch: char) -> [u8; 7] {
    match ch.to_ascii_uppercase() {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ' ' => [0x00; 7],
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        '%' => [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        _ => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn face(identity: Identity, confidence: Option<f32>, bbox: BoundingBox) -> Detection {
        Detection::new(identity, confidence, bbox)
    }

    fn pixel(frame: &Frame, x: u32, y: u32) -> [u8; 3] {
        let offset = ((y * frame.width + x) * 3) as usize;
        let p = &frame.pixels()[offset..offset + 3];
        [p[0], p[1], p[2]]
    }

    #[test]
    fn labels_follow_identity_and_confidence() {
        let bbox = BoundingBox::default();
        assert_eq!(label_for(&face(Identity::Unknown, None, bbox)), "UNKNOWN");
        assert_eq!(
            label_for(&face(Identity::known("alice"), Some(91.6), bbox)),
            "ALICE (92%)"
        );
        assert_eq!(label_for(&face(Identity::known("bob"), Some(0.0), bbox)), "BOB");
    }

    #[test]
    fn draws_box_on_a_copy_and_keeps_the_original() {
        let frame = Frame::solid(64, 64, [0, 0, 0], Instant::now(), 9);
        let bbox = BoundingBox {
            top: 10,
            right: 50,
            bottom: 50,
            left: 10,
        };
        let annotated = annotate(&frame, &[face(Identity::Unknown, None, bbox)], None).unwrap();

        assert_eq!(annotated.sequence, 9);
        assert_eq!(annotated.captured_at, frame.captured_at);
        assert_eq!(pixel(&annotated, 10, 20), [255, 0, 0]);
        assert_eq!(pixel(&annotated, 30, 11), [255, 0, 0]);
        // Inside the box, above the label band.
        assert_eq!(pixel(&annotated, 30, 25), [0, 0, 0]);
        assert!(frame.pixels().iter().all(|b| *b == 0));
    }

    #[test]
    fn known_faces_are_green() {
        let frame = Frame::solid(32, 32, [0, 0, 0], Instant::now(), 1);
        let bbox = BoundingBox {
            top: 2,
            right: 30,
            bottom: 30,
            left: 2,
        };
        let annotated =
            annotate(&frame, &[face(Identity::known("alice"), Some(80.0), bbox)], None).unwrap();
        assert_eq!(pixel(&annotated, 2, 5), [0, 255, 0]);
    }

    #[test]
    fn boxes_outside_the_frame_are_clipped_or_skipped() {
        let frame = Frame::solid(16, 16, [7, 7, 7], Instant::now(), 1);
        let partial = BoundingBox {
            top: 4,
            right: 400,
            bottom: 400,
            left: 4,
        };
        let outside = BoundingBox {
            top: 100,
            right: 200,
            bottom: 200,
            left: 100,
        };
        let detections = [
            face(Identity::Unknown, None, partial),
            face(Identity::Unknown, None, outside),
        ];
        let annotated = annotate(&frame, &detections, None).unwrap();
        assert_eq!(pixel(&annotated, 4, 4), [255, 0, 0]);
        assert!(!has_marks(&[face(Identity::Unknown, None, BoundingBox::default())], false));
        assert!(has_marks(&[], true));
    }

    #[test]
    fn recording_marker_lights_the_top_right_corner() {
        let frame = Frame::solid(320, 240, [0, 0, 0], Instant::now(), 1);
        let annotated = annotate(&frame, &[], Some("12:34:56")).unwrap();
        // Dot centre: margin 6 + radius 4 from the top-right corner.
        assert_eq!(pixel(&annotated, 320 - 10, 10), [255, 0, 0]);
        let lit = annotated
            .pixels()
            .chunks(3)
            .filter(|p| *p == [255u8, 255, 255])
            .count();
        assert!(lit > 0, "clock text drawn");
    }
}
