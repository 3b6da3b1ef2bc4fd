//! Inpainting mask construction and sleeve resolution.
//!
//! Everything here is a pure function of the perception bundle, the garment
//! category and the caller's sleeve hint, so it is tested without any model.

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::drawing::{draw_filled_circle_mut, draw_polygon_mut};
use imageproc::morphology;
use imageproc::point::Point;

use crate::models::imaging::{InpaintMask, MaskConfidence};
use crate::models::perception::{labels, KeypointIndex, KeypointSet, LabelMap, PerceptionBundle};
use crate::models::tryon::{GarmentCategory, SleeveState};
use crate::services::skeleton::stick_corners;

const ON: Luma<u8> = Luma([255]);
const OFF: Luma<u8> = Luma([0]);

/// Labels that count as clothing over the arm when measuring sleeves.
const SLEEVE_LABELS: [u8; 2] = [labels::UPPER_CLOTHES, labels::DRESS];
const ARM_SKIN_LABELS: [u8; 2] = [labels::LEFT_ARM, labels::RIGHT_ARM];

// ---------------------------------------------------------------------------
// Sleeve policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SleevePolicy {
    pub keypoint_threshold: f32,
    /// Sleeve coverage at or above this resolves to present.
    pub present_ratio: f32,
    /// Sleeve coverage at or below this resolves to absent.
    pub absent_ratio: f32,
    /// Fewer labelled arm pixels than this and the arm is not measured.
    pub min_arm_pixels: usize,
    /// Corridor half-width as a fraction of the upper-arm length.
    pub corridor_ratio: f32,
    /// Part of the upper arm next to the shoulder that is not sampled.
    pub shoulder_skip: f32,
}

impl SleevePolicy {
    /// Resolution for an ambiguous or unmeasurable signal. Absent is the
    /// conservative choice: it keeps the person's own arms instead of
    /// inventing sleeves.
    pub const TIE_BREAK: SleeveState = SleeveState::Absent;
}

impl Default for SleevePolicy {
    fn default() -> Self {
        Self {
            keypoint_threshold: 0.3,
            present_ratio: 0.5,
            absent_ratio: 0.2,
            min_arm_pixels: 20,
            corridor_ratio: 0.12,
            shoulder_skip: 0.2,
        }
    }
}

const ARMS: [(KeypointIndex, KeypointIndex, KeypointIndex); 2] = [
    (
        KeypointIndex::RightShoulder,
        KeypointIndex::RightElbow,
        KeypointIndex::RightWrist,
    ),
    (
        KeypointIndex::LeftShoulder,
        KeypointIndex::LeftElbow,
        KeypointIndex::LeftWrist,
    ),
];

impl SleevePolicy {
    /// Resolve an unknown sleeve state from the person's arm geometry.
    /// Known states pass through untouched.
    pub fn resolve(&self, bundle: &PerceptionBundle, sleeves: SleeveState) -> SleeveState {
        if sleeves != SleeveState::Unknown {
            return sleeves;
        }
        let resolved = match self.coverage(&bundle.keypoints, &bundle.labels) {
            Some(ratio) if ratio >= self.present_ratio => SleeveState::Present,
            Some(ratio) if ratio <= self.absent_ratio => SleeveState::Absent,
            _ => Self::TIE_BREAK,
        };
        tracing::debug!(resolved = ?resolved, "sleeve state inferred");
        resolved
    }

    /// Mean fraction of sampled upper-arm pixels that are clothing, over the
    /// arms that could be measured.
    pub fn coverage(&self, keypoints: &KeypointSet, label_map: &LabelMap) -> Option<f32> {
        let ratios: Vec<f32> = ARMS
            .iter()
            .filter_map(|&(s, e, w)| self.arm_coverage(keypoints, label_map, s, e, w))
            .collect();
        if ratios.is_empty() {
            return None;
        }
        Some(ratios.iter().sum::<f32>() / ratios.len() as f32)
    }

    fn arm_coverage(
        &self,
        keypoints: &KeypointSet,
        label_map: &LabelMap,
        shoulder: KeypointIndex,
        elbow: KeypointIndex,
        wrist: KeypointIndex,
    ) -> Option<f32> {
        let t = self.keypoint_threshold;
        let s = keypoints.valid(shoulder, t)?;
        // Without a confident elbow, the midpoint of shoulder→wrist stands in.
        let e = match (keypoints.valid(elbow, t), keypoints.valid(wrist, t)) {
            (Some(e), _) => (e.x, e.y),
            (None, Some(w)) => ((s.x + w.x) / 2.0, (s.y + w.y) / 2.0),
            (None, None) => return None,
        };
        let a = (s.x, s.y);
        let len = distance(a, e);
        if len < 2.0 {
            return None;
        }
        let half_width = (len * self.corridor_ratio).max(1.5);

        let (mut cloth, mut skin) = (0usize, 0usize);
        let (x0, x1) = span(a.0.min(e.0) - half_width, a.0.max(e.0) + half_width, label_map.width);
        let (y0, y1) = span(a.1.min(e.1) - half_width, a.1.max(e.1) + half_width, label_map.height);
        for y in y0..y1 {
            for x in x0..x1 {
                let p = (x as f32 + 0.5, y as f32 + 0.5);
                let (along, dist) = project(p, a, e);
                if along < self.shoulder_skip || along > 1.0 || dist > half_width {
                    continue;
                }
                let label = label_map.get(x, y);
                if SLEEVE_LABELS.contains(&label) {
                    cloth += 1;
                } else if ARM_SKIN_LABELS.contains(&label) {
                    skin += 1;
                }
            }
        }

        let total = cloth + skin;
        (total >= self.min_arm_pixels).then(|| cloth as f32 / total as f32)
    }
}

// ---------------------------------------------------------------------------
// Mask policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MaskPolicy {
    pub sleeves: SleevePolicy,
    pub keypoint_threshold: f32,
    /// Chebyshev dilation radius in pixels.
    pub dilation: u8,
    /// Masks covering less than this fraction of the canvas are replaced by
    /// the geometric fallback.
    pub min_coverage: f32,
}

impl Default for MaskPolicy {
    fn default() -> Self {
        Self {
            sleeves: SleevePolicy::default(),
            keypoint_threshold: 0.3,
            dilation: 9,
            min_coverage: 0.01,
        }
    }
}

impl MaskPolicy {
    pub fn new(dilation: u8) -> Self {
        Self {
            dilation,
            ..Self::default()
        }
    }

    /// Build the inpainting mask for a garment category, resolving the
    /// sleeve state first when the caller did not supply one.
    pub fn build_mask(
        &self,
        bundle: &PerceptionBundle,
        category: GarmentCategory,
        sleeves: SleeveState,
    ) -> (InpaintMask, SleeveState) {
        let sleeves = self.sleeves.resolve(bundle, sleeves);
        let with_sleeves = sleeves == SleeveState::Present;

        let (w, h) = bundle.dimensions();
        let label_map = &bundle.labels;
        let kps = &bundle.keypoints;
        let mut mask = GrayImage::new(w, h);

        let structural = match category {
            GarmentCategory::UpperBody => {
                paint_labels(&mut mask, label_map, &[labels::UPPER_CLOTHES]);
                let torso = self.paint_torso(&mut mask, kps);
                if with_sleeves {
                    paint_labels(&mut mask, label_map, &ARM_SKIN_LABELS);
                    self.paint_arms(&mut mask, kps);
                } else {
                    self.paint_shoulder_caps(&mut mask, kps);
                }
                torso
            }
            GarmentCategory::Dresses => {
                paint_labels(
                    &mut mask,
                    label_map,
                    &[
                        labels::UPPER_CLOTHES,
                        labels::DRESS,
                        labels::SKIRT,
                        labels::PANTS,
                        labels::BELT,
                    ],
                );
                let torso = self.paint_torso(&mut mask, kps);
                let thighs = self.paint_legs(&mut mask, kps, false);
                // A dress spans the shoulders whatever its sleeves.
                self.paint_shoulder_caps(&mut mask, kps);
                if with_sleeves {
                    paint_labels(&mut mask, label_map, &ARM_SKIN_LABELS);
                    self.paint_arms(&mut mask, kps);
                }
                torso && thighs
            }
            GarmentCategory::LowerBody => {
                paint_labels(
                    &mut mask,
                    label_map,
                    &[
                        labels::SKIRT,
                        labels::PANTS,
                        labels::BELT,
                        labels::LEFT_LEG,
                        labels::RIGHT_LEG,
                    ],
                );
                self.paint_legs(&mut mask, kps, true)
            }
        };

        let mut mask = morphology::dilate(&mask, Norm::LInf, self.dilation);
        clear_labels(&mut mask, label_map, protected_labels(category));

        let mut confidence = if structural && has_body_parts(label_map, category) {
            MaskConfidence::Full
        } else {
            MaskConfidence::Reduced
        };

        let covered = mask.pixels().filter(|p| p[0] > 0).count();
        if (covered as f32) < self.min_coverage * (w * h) as f32 {
            mask = fallback_band(w, h, category);
            clear_labels(&mut mask, label_map, &[labels::FACE, labels::HAIR, labels::HAT]);
            confidence = MaskConfidence::Reduced;
        }

        if confidence == MaskConfidence::Reduced {
            tracing::warn!(
                category = %category,
                covered,
                "garment category does not match detected body parts; using degraded mask"
            );
        }

        (
            InpaintMask {
                pixels: mask,
                confidence,
            },
            sleeves,
        )
    }

    fn point(&self, kps: &KeypointSet, index: KeypointIndex) -> Option<(f32, f32)> {
        kps.valid(index, self.keypoint_threshold).map(|k| (k.x, k.y))
    }

    fn paint_torso(&self, mask: &mut GrayImage, kps: &KeypointSet) -> bool {
        use KeypointIndex::*;
        let corners = [RightShoulder, LeftShoulder, LeftHip, RightHip]
            .map(|i| self.point(kps, i));
        match corners {
            [Some(rs), Some(ls), Some(lh), Some(rh)] => {
                fill_polygon(mask, &[rs, ls, lh, rh]);
                true
            }
            _ => false,
        }
    }

    fn paint_arms(&self, mask: &mut GrayImage, kps: &KeypointSet) {
        let width = self.limb_width(kps);
        for (shoulder, elbow, wrist) in ARMS {
            let joints = [shoulder, elbow, wrist].map(|i| self.point(kps, i));
            for pair in joints.windows(2) {
                if let (Some(a), Some(b)) = (pair[0], pair[1]) {
                    if let Some(corners) = stick_corners(a, b, width) {
                        draw_polygon_mut(mask, &corners, ON);
                    }
                }
            }
        }
    }

    fn paint_shoulder_caps(&self, mask: &mut GrayImage, kps: &KeypointSet) {
        let radius = (self.limb_width(kps) / 2.0).round().max(1.0) as i32;
        for index in [KeypointIndex::RightShoulder, KeypointIndex::LeftShoulder] {
            if let Some((x, y)) = self.point(kps, index) {
                draw_filled_circle_mut(mask, (x.round() as i32, y.round() as i32), radius, ON);
            }
        }
    }

    /// Hip→knee band, extended to the ankles when `full_length` is set.
    /// Returns false when the hips or knees are missing.
    fn paint_legs(&self, mask: &mut GrayImage, kps: &KeypointSet, full_length: bool) -> bool {
        use KeypointIndex::*;
        let (Some(rh), Some(lh), Some(rk), Some(lk)) = (
            self.point(kps, RightHip),
            self.point(kps, LeftHip),
            self.point(kps, RightKnee),
            self.point(kps, LeftKnee),
        ) else {
            return false;
        };
        fill_polygon(mask, &[rh, lh, lk, rk]);

        if full_length {
            let width = self.limb_width(kps) * 1.5;
            for (knee, ankle) in [(rk, self.point(kps, RightAnkle)), (lk, self.point(kps, LeftAnkle))] {
                if let Some(ankle) = ankle {
                    if let Some(corners) = stick_corners(knee, ankle, width) {
                        draw_polygon_mut(mask, &corners, ON);
                    }
                }
            }
        }
        true
    }

    /// Limb thickness derived from the shoulder span, with a floor for
    /// poses where the shoulders are missing.
    fn limb_width(&self, kps: &KeypointSet) -> f32 {
        let floor = kps.width.min(kps.height) as f32 * 0.04;
        let width = match (
            self.point(kps, KeypointIndex::RightShoulder),
            self.point(kps, KeypointIndex::LeftShoulder),
        ) {
            (Some(r), Some(l)) => (distance(r, l) * 0.3).max(floor),
            _ => floor,
        };
        width.max(2.0)
    }
}

fn protected_labels(category: GarmentCategory) -> &'static [u8] {
    match category {
        GarmentCategory::UpperBody => &[
            labels::FACE,
            labels::HAIR,
            labels::HAT,
            labels::SUNGLASSES,
            labels::PANTS,
            labels::SKIRT,
            labels::LEFT_LEG,
            labels::RIGHT_LEG,
            labels::LEFT_SHOE,
            labels::RIGHT_SHOE,
        ],
        GarmentCategory::Dresses => &[
            labels::FACE,
            labels::HAIR,
            labels::HAT,
            labels::SUNGLASSES,
            labels::LEFT_SHOE,
            labels::RIGHT_SHOE,
        ],
        GarmentCategory::LowerBody => &[
            labels::FACE,
            labels::HAIR,
            labels::HAT,
            labels::SUNGLASSES,
            labels::UPPER_CLOTHES,
            labels::LEFT_ARM,
            labels::RIGHT_ARM,
            labels::LEFT_SHOE,
            labels::RIGHT_SHOE,
        ],
    }
}

/// Whether the parser saw any of the regions the category replaces.
fn has_body_parts(label_map: &LabelMap, category: GarmentCategory) -> bool {
    match category {
        GarmentCategory::UpperBody => label_map.contains_any(&[
            labels::UPPER_CLOTHES,
            labels::DRESS,
            labels::LEFT_ARM,
            labels::RIGHT_ARM,
        ]),
        GarmentCategory::LowerBody => label_map.contains_any(&[
            labels::PANTS,
            labels::SKIRT,
            labels::LEFT_LEG,
            labels::RIGHT_LEG,
        ]),
        GarmentCategory::Dresses => label_map.contains_any(&[
            labels::UPPER_CLOTHES,
            labels::DRESS,
            labels::SKIRT,
            labels::PANTS,
        ]),
    }
}

/// Fixed band over the region a garment of this category usually occupies.
fn fallback_band(w: u32, h: u32, category: GarmentCategory) -> GrayImage {
    let (top, bottom) = match category {
        GarmentCategory::UpperBody => (0.15, 0.6),
        GarmentCategory::LowerBody => (0.45, 0.95),
        GarmentCategory::Dresses => (0.15, 0.95),
    };
    let (x0, x1) = ((w as f32 * 0.15) as u32, (w as f32 * 0.85).ceil() as u32);
    let (y0, y1) = ((h as f32 * top) as u32, (h as f32 * bottom).ceil() as u32);
    GrayImage::from_fn(w, h, |x, y| {
        if (x0..x1.min(w)).contains(&x) && (y0..y1.min(h)).contains(&y) {
            ON
        } else {
            OFF
        }
    })
}

fn paint_labels(mask: &mut GrayImage, label_map: &LabelMap, wanted: &[u8]) {
    for (px, &label) in mask.pixels_mut().zip(label_map.data.iter()) {
        if wanted.contains(&label) {
            *px = ON;
        }
    }
}

fn clear_labels(mask: &mut GrayImage, label_map: &LabelMap, protected: &[u8]) {
    for (px, &label) in mask.pixels_mut().zip(label_map.data.iter()) {
        if protected.contains(&label) {
            *px = OFF;
        }
    }
}

fn fill_polygon(mask: &mut GrayImage, points: &[(f32, f32)]) {
    let mut poly: Vec<Point<i32>> = Vec::with_capacity(points.len());
    for &(x, y) in points {
        let p = Point::new(x.round() as i32, y.round() as i32);
        if poly.last() != Some(&p) {
            poly.push(p);
        }
    }
    while poly.len() > 1 && poly.first() == poly.last() {
        poly.pop();
    }
    if poly.len() >= 3 {
        draw_polygon_mut(mask, &poly, ON);
    }
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt()
}

/// Position of `p` along segment `a→b` (0 at `a`, 1 at `b`) and its
/// perpendicular distance from the segment's line.
fn project(p: (f32, f32), a: (f32, f32), b: (f32, f32)) -> (f32, f32) {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len2 = dx * dx + dy * dy;
    let along = ((p.0 - a.0) * dx + (p.1 - a.1) * dy) / len2;
    let cross = ((p.0 - a.0) * dy - (p.1 - a.1) * dx).abs() / len2.sqrt();
    (along, cross)
}

fn span(lo: f32, hi: f32, limit: u32) -> (u32, u32) {
    let lo = lo.floor().max(0.0) as u32;
    let hi = (hi.ceil().max(0.0) as u32 + 1).min(limit);
    (lo.min(hi), hi)
}
