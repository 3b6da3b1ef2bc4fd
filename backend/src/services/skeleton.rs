use image::{Pixel, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_polygon_mut};
use imageproc::point::Point;

use crate::models::perception::{KeypointIndex, KeypointSet};
use crate::services::perception::SkeletonRenderer;

use KeypointIndex::*;

/// Limb connections in OpenPose drawing order.
pub const LIMBS: [(KeypointIndex, KeypointIndex); 17] = [
    (Neck, RightShoulder),
    (Neck, LeftShoulder),
    (RightShoulder, RightElbow),
    (RightElbow, RightWrist),
    (LeftShoulder, LeftElbow),
    (LeftElbow, LeftWrist),
    (Neck, RightHip),
    (RightHip, RightKnee),
    (RightKnee, RightAnkle),
    (Neck, LeftHip),
    (LeftHip, LeftKnee),
    (LeftKnee, LeftAnkle),
    (Neck, Nose),
    (Nose, RightEye),
    (RightEye, RightEar),
    (Nose, LeftEye),
    (LeftEye, LeftEar),
];

/// One colour per keypoint; limb `i` reuses colour `i`.
pub const COLORS: [[u8; 3]; KeypointIndex::COUNT] = [
    [255, 0, 0],
    [255, 85, 0],
    [255, 170, 0],
    [255, 255, 0],
    [170, 255, 0],
    [85, 255, 0],
    [0, 255, 0],
    [0, 255, 85],
    [0, 255, 170],
    [0, 255, 255],
    [0, 170, 255],
    [0, 85, 255],
    [0, 0, 255],
    [85, 0, 255],
    [170, 0, 255],
    [255, 0, 255],
    [255, 0, 170],
    [255, 0, 85],
];

/// Draws the pose as coloured sticks on a black canvas.
#[derive(Debug, Clone)]
pub struct StickFigureRenderer {
    pub confidence_threshold: f32,
    pub stick_width: f32,
    pub joint_radius: i32,
}

impl Default for StickFigureRenderer {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.3,
            stick_width: 4.0,
            joint_radius: 4,
        }
    }
}

impl StickFigureRenderer {
    pub fn draw(&self, keypoints: &KeypointSet) -> RgbImage {
        let mut canvas = RgbImage::new(keypoints.width, keypoints.height);

        for (i, (a, b)) in LIMBS.iter().enumerate() {
            let (Some(pa), Some(pb)) = (
                keypoints.valid(*a, self.confidence_threshold),
                keypoints.valid(*b, self.confidence_threshold),
            ) else {
                continue;
            };
            let color = Rgb(COLORS[i]).map(|c| (c as f32 * 0.6) as u8);
            self.draw_stick(&mut canvas, (pa.x, pa.y), (pb.x, pb.y), color);
        }

        for (i, kp) in keypoints.points.iter().enumerate() {
            if kp.is_valid(self.confidence_threshold) {
                draw_filled_circle_mut(
                    &mut canvas,
                    (kp.x.round() as i32, kp.y.round() as i32),
                    self.joint_radius,
                    Rgb(COLORS[i]),
                );
            }
        }

        canvas
    }

    fn draw_stick(&self, canvas: &mut RgbImage, a: (f32, f32), b: (f32, f32), color: Rgb<u8>) {
        if let Some(corners) = stick_corners(a, b, self.stick_width) {
            draw_polygon_mut(canvas, &corners, color);
        }
    }
}

/// Corners of a `width`-thick bar from `a` to `b`, or `None` when the bar
/// degenerates to a point after rounding.
pub fn stick_corners(a: (f32, f32), b: (f32, f32), width: f32) -> Option<[Point<i32>; 4]> {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len = (dx * dx + dy * dy).sqrt();
    if len < 1.0 {
        return None;
    }
    let half = width / 2.0;
    let (nx, ny) = (-dy / len * half, dx / len * half);
    let corners = [
        Point::new((a.0 + nx).round() as i32, (a.1 + ny).round() as i32),
        Point::new((b.0 + nx).round() as i32, (b.1 + ny).round() as i32),
        Point::new((b.0 - nx).round() as i32, (b.1 - ny).round() as i32),
        Point::new((a.0 - nx).round() as i32, (a.1 - ny).round() as i32),
    ];
    (corners[0] != corners[3]).then_some(corners)
}

impl SkeletonRenderer for StickFigureRenderer {
    fn render(&self, keypoints: &KeypointSet) -> anyhow::Result<RgbImage> {
        if keypoints.width == 0 || keypoints.height == 0 {
            anyhow::bail!("keypoint frame has zero area");
        }
        Ok(self.draw(keypoints))
    }
}
