//! Preview-frame annotation: detection boxes, per-track trails, and a
//! privacy blur band across the middle of the frame. Operates directly
//! on the rgb24 buffers fed to the preview encoder.

use std::collections::HashMap;

use crate::types::Detection;

const BOX_COLOR: [u8; 3] = [196, 255, 77];
const TRAIL_COLOR: [u8; 3] = [230, 230, 230];
const LINE_THICKNESS: i32 = 2;
const BLUR_RADIUS: usize = 10;

/// Stateful annotator; trail history persists across the frames of one
/// clip and is reset between clips.
pub struct Annotator {
    trail_length: usize,
    history: HashMap<i64, Vec<(f32, f32)>>,
}

impl Annotator {
    pub fn new(trail_length: usize) -> Self {
        Self {
            trail_length,
            history: HashMap::new(),
        }
    }

    /// Track ids restart per clip, so the history must not leak across.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn annotate(
        &mut self,
        rgb: &mut [u8],
        width: usize,
        height: usize,
        detections: &[Detection],
    ) {
        for det in detections {
            let x1 = (det.xc - det.w / 2.0) as i32;
            let y1 = (det.yc - det.h / 2.0) as i32;
            let x2 = (det.xc + det.w / 2.0) as i32;
            let y2 = (det.yc + det.h / 2.0) as i32;
            draw_rect(rgb, width, height, x1, y1, x2, y2, BOX_COLOR);

            if det.track_id >= 0 {
                let trail = self.history.entry(det.track_id).or_default();
                trail.push((det.xc, det.yc));
                let start = trail.len().saturating_sub(self.trail_length);
                let recent = &trail[start..];
                for pair in recent.windows(2) {
                    draw_line(
                        rgb,
                        width,
                        height,
                        pair[0].0 as i32,
                        pair[0].1 as i32,
                        pair[1].0 as i32,
                        pair[1].1 as i32,
                        TRAIL_COLOR,
                    );
                }
            }
        }
        blur_privacy_band(rgb, width, height);
    }
}

fn put_pixel(rgb: &mut [u8], width: usize, height: usize, x: i32, y: i32, color: [u8; 3]) {
    if x < 0 || y < 0 || x as usize >= width || y as usize >= height {
        return;
    }
    let idx = (y as usize * width + x as usize) * 3;
    rgb[idx..idx + 3].copy_from_slice(&color);
}

fn draw_rect(
    rgb: &mut [u8],
    width: usize,
    height: usize,
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
    color: [u8; 3],
) {
    for t in 0..LINE_THICKNESS {
        for x in x1..=x2 {
            put_pixel(rgb, width, height, x, y1 + t, color);
            put_pixel(rgb, width, height, x, y2 - t, color);
        }
        for y in y1..=y2 {
            put_pixel(rgb, width, height, x1 + t, y, color);
            put_pixel(rgb, width, height, x2 - t, y, color);
        }
    }
}

/// Bresenham with a square brush for thickness.
fn draw_line(
    rgb: &mut [u8],
    width: usize,
    height: usize,
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
    color: [u8; 3],
) {
    let dx = (x2 - x1).abs();
    let dy = -(y2 - y1).abs();
    let sx = if x1 < x2 { 1 } else { -1 };
    let sy = if y1 < y2 { 1 } else { -1 };
    let mut err = dx + dy;
    let (mut x, mut y) = (x1, y1);
    loop {
        for ox in 0..LINE_THICKNESS {
            for oy in 0..LINE_THICKNESS {
                put_pixel(rgb, width, height, x + ox, y + oy, color);
            }
        }
        if x == x2 && y == y2 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

/// Horizontal box blur over the 20%..80% vertical band. A single
/// separable pass is enough to make the region unrecoverable at preview
/// resolution.
pub fn blur_privacy_band(rgb: &mut [u8], width: usize, height: usize) {
    if width == 0 || height == 0 {
        return;
    }
    let top = height * 2 / 10;
    let bottom = height * 8 / 10;
    let mut row = vec![0u8; width * 3];
    for y in top..bottom {
        let offset = y * width * 3;
        row.copy_from_slice(&rgb[offset..offset + width * 3]);
        for x in 0..width {
            let lo = x.saturating_sub(BLUR_RADIUS);
            let hi = (x + BLUR_RADIUS + 1).min(width);
            let n = (hi - lo) as u32;
            for c in 0..3 {
                let sum: u32 = (lo..hi).map(|i| u32::from(row[i * 3 + c])).sum();
                rgb[offset + x * 3 + c] = (sum / n) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectClass;

    fn det(track_id: i64, xc: f32, yc: f32) -> Detection {
        Detection {
            clip_id: "c".to_string(),
            class: ObjectClass::Car,
            track_id,
            t: 0.0,
            xc,
            yc,
            w: 20.0,
            h: 12.0,
            conf: 0.9,
            area: 240.0,
            area_ratio: 0.01,
        }
    }

    #[test]
    fn privacy_band_flattens_high_contrast_detail() {
        let (w, h) = (64, 40);
        let mut rgb = vec![0u8; w * h * 3];
        // Vertical stripes inside the band.
        for y in 0..h {
            for x in 0..w {
                let v = if x % 2 == 0 { 255 } else { 0 };
                let idx = (y * w + x) * 3;
                rgb[idx..idx + 3].copy_from_slice(&[v, v, v]);
            }
        }
        blur_privacy_band(&mut rgb, w, h);

        let mid = (h / 2) * w * 3 + (w / 2) * 3;
        let v = rgb[mid];
        // Stripes average out to mid-gray.
        assert!((100..=160).contains(&v), "band pixel {v} not blurred");
        // Rows outside the band are untouched.
        let top = (w / 2) * 3;
        assert!(rgb[top] == 0 || rgb[top] == 255);
    }

    #[test]
    fn boxes_touch_the_frame_and_clipping_is_safe() {
        let (w, h) = (32, 32);
        let mut rgb = vec![0u8; w * h * 3];
        let mut annotator = Annotator::new(20);
        // Partially off-frame detection; must not panic.
        annotator.annotate(&mut rgb, w, h, &[det(1, 2.0, 2.0)]);
        assert!(rgb.iter().any(|&b| b != 0));
    }

    #[test]
    fn trails_reset_between_clips() {
        let mut annotator = Annotator::new(20);
        let mut rgb = vec![0u8; 32 * 32 * 3];
        annotator.annotate(&mut rgb, 32, 32, &[det(1, 5.0, 5.0)]);
        annotator.annotate(&mut rgb, 32, 32, &[det(1, 10.0, 5.0)]);
        assert_eq!(annotator.history[&1].len(), 2);
        annotator.reset();
        assert!(annotator.history.is_empty());
    }
}
