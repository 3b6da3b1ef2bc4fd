//! In-process stand-ins for the model collaborators, used by unit and
//! handler tests. The synthetic person is laid out in canvas fractions so it
//! scales to any canvas size.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};

use crate::models::config::AppConfig;
use crate::models::perception::{
    labels, Keypoint, KeypointIndex, KeypointSet, LabelMap, PerceptionBundle,
};
use crate::models::tryon::GarmentCategory;
use crate::services::codec;
use crate::services::conditioning::ConditioningBundle;
use crate::services::generation::InpaintGenerator;
use crate::services::perception::{
    DensePoseEstimator, HumanParser, KeypointDetector, PerceptionModels, SkeletonRenderer,
};
use crate::services::pipeline::TryOnPipeline;
use crate::services::skeleton::StickFigureRenderer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sleeves {
    /// Upper arms labelled as clothing.
    Long,
    /// Arms labelled as skin.
    Bare,
    /// Clothing over the half of the upper arm next to the shoulder.
    Half,
}

const POSE: [(KeypointIndex, f32, f32); KeypointIndex::COUNT] = [
    (KeypointIndex::Nose, 0.5, 0.12),
    (KeypointIndex::Neck, 0.5, 0.2),
    (KeypointIndex::RightShoulder, 0.35, 0.22),
    (KeypointIndex::RightElbow, 0.28, 0.38),
    (KeypointIndex::RightWrist, 0.25, 0.52),
    (KeypointIndex::LeftShoulder, 0.65, 0.22),
    (KeypointIndex::LeftElbow, 0.72, 0.38),
    (KeypointIndex::LeftWrist, 0.75, 0.52),
    (KeypointIndex::RightHip, 0.42, 0.55),
    (KeypointIndex::RightKnee, 0.42, 0.75),
    (KeypointIndex::RightAnkle, 0.42, 0.93),
    (KeypointIndex::LeftHip, 0.58, 0.55),
    (KeypointIndex::LeftKnee, 0.58, 0.75),
    (KeypointIndex::LeftAnkle, 0.58, 0.93),
    (KeypointIndex::RightEye, 0.47, 0.1),
    (KeypointIndex::LeftEye, 0.53, 0.1),
    (KeypointIndex::RightEar, 0.44, 0.11),
    (KeypointIndex::LeftEar, 0.56, 0.11),
];

pub fn synthetic_keypoints(w: u32, h: u32) -> KeypointSet {
    let mut set = KeypointSet::empty(w, h);
    for (index, fx, fy) in POSE {
        set.set(index, Keypoint::new(fx * w as f32, fy * h as f32, 0.9));
    }
    set
}

pub fn synthetic_labels(w: u32, h: u32, sleeves: Sleeves) -> LabelMap {
    let mut map = LabelMap::new(w, h);
    let frac = |x: u32, y: u32| ((x as f32 + 0.5) / w as f32, (y as f32 + 0.5) / h as f32);
    let inside = |v: f32, lo: f32, hi: f32| v >= lo && v < hi;

    for y in 0..h {
        for x in 0..w {
            let (fx, fy) = frac(x, y);
            let label = if inside(fx, 0.40, 0.60) && inside(fy, 0.02, 0.06) {
                labels::HAIR
            } else if inside(fx, 0.42, 0.58) && inside(fy, 0.06, 0.17) {
                labels::FACE
            } else if inside(fx, 0.37, 0.63) && inside(fy, 0.2, 0.55) {
                labels::UPPER_CLOTHES
            } else if inside(fx, 0.38, 0.62) && inside(fy, 0.55, 0.9) {
                labels::PANTS
            } else if inside(fx, 0.38, 0.5) && inside(fy, 0.9, 0.95) {
                labels::RIGHT_SHOE
            } else if inside(fx, 0.5, 0.62) && inside(fy, 0.9, 0.95) {
                labels::LEFT_SHOE
            } else {
                labels::BACKGROUND
            };
            map.set(x, y, label);
        }
    }

    let kps = synthetic_keypoints(w, h);
    let half_width = 0.03 * w as f32;
    let arms = [
        (KeypointIndex::RightShoulder, KeypointIndex::RightElbow, KeypointIndex::RightWrist, labels::RIGHT_ARM),
        (KeypointIndex::LeftShoulder, KeypointIndex::LeftElbow, KeypointIndex::LeftWrist, labels::LEFT_ARM),
    ];
    for (s, e, wr, skin) in arms {
        let (s, e, wr) = (kps.get(s), kps.get(e), kps.get(wr));
        let (s, e, wr) = ((s.x, s.y), (e.x, e.y), (wr.x, wr.y));
        paint_capsule(&mut map, e, wr, half_width, |_| skin);
        paint_capsule(&mut map, s, e, half_width, |t| match sleeves {
            Sleeves::Long => labels::UPPER_CLOTHES,
            Sleeves::Bare => skin,
            Sleeves::Half if t < 0.5 => labels::UPPER_CLOTHES,
            Sleeves::Half => skin,
        });
    }
    map
}

/// Label every pixel whose centre lies within `half_width` of segment a→b.
/// `label` receives the position along the segment.
fn paint_capsule(
    map: &mut LabelMap,
    a: (f32, f32),
    b: (f32, f32),
    half_width: f32,
    label: impl Fn(f32) -> u8,
) {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len2 = dx * dx + dy * dy;
    for y in 0..map.height {
        for x in 0..map.width {
            let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
            let t = ((px - a.0) * dx + (py - a.1) * dy) / len2;
            let c = t.clamp(0.0, 1.0);
            let (qx, qy) = (a.0 + c * dx, a.1 + c * dy);
            if (px - qx).powi(2) + (py - qy).powi(2) <= half_width * half_width {
                map.set(x, y, label(t));
            }
        }
    }
}

fn synthetic_densepose(w: u32, h: u32) -> RgbImage {
    RgbImage::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 24]))
}

pub fn synthetic_bundle(w: u32, h: u32, sleeves: Sleeves) -> PerceptionBundle {
    let keypoints = synthetic_keypoints(w, h);
    PerceptionBundle {
        densepose: synthetic_densepose(w, h),
        labels: synthetic_labels(w, h, sleeves),
        skeleton: StickFigureRenderer::default().draw(&keypoints),
        keypoints,
    }
}

// ---------------------------------------------------------------------------
// Perception fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct SyntheticPose {
    pub calls: Arc<AtomicUsize>,
}

impl DensePoseEstimator for SyntheticPose {
    fn estimate(&self, person: &RgbImage) -> anyhow::Result<RgbImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(synthetic_densepose(person.width(), person.height()))
    }
}

pub struct SyntheticParser {
    pub sleeves: Sleeves,
    pub calls: Arc<AtomicUsize>,
}

impl HumanParser for SyntheticParser {
    fn parse(&self, person: &RgbImage) -> anyhow::Result<LabelMap> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(synthetic_labels(person.width(), person.height(), self.sleeves))
    }
}

#[derive(Default)]
pub struct SyntheticKeypoints {
    pub calls: Arc<AtomicUsize>,
}

impl KeypointDetector for SyntheticKeypoints {
    fn detect(&self, person: &RgbImage) -> anyhow::Result<KeypointSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(synthetic_keypoints(person.width(), person.height()))
    }
}

#[derive(Default)]
pub struct CountingSkeleton {
    pub inner: StickFigureRenderer,
    pub calls: Arc<AtomicUsize>,
}

impl SkeletonRenderer for CountingSkeleton {
    fn render(&self, keypoints: &KeypointSet) -> anyhow::Result<RgbImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.render(keypoints)
    }
}

/// Synthetic perception stack plus one call counter per collaborator
/// (keypoints, skeleton, densepose, parser).
pub fn perception(long_sleeves: bool) -> (PerceptionModels, [Arc<AtomicUsize>; 4]) {
    let sleeves = if long_sleeves { Sleeves::Long } else { Sleeves::Bare };
    let keypoints = SyntheticKeypoints::default();
    let skeleton = CountingSkeleton::default();
    let densepose = SyntheticPose::default();
    let parser = SyntheticParser {
        sleeves,
        calls: Arc::default(),
    };
    let counters = [
        keypoints.calls.clone(),
        skeleton.calls.clone(),
        densepose.calls.clone(),
        parser.calls.clone(),
    ];
    let models = PerceptionModels {
        densepose: Arc::new(densepose),
        parser: Arc::new(parser),
        keypoints: Arc::new(keypoints),
        skeleton: Arc::new(skeleton),
    };
    (models, counters)
}

/// Dense pose estimator that ignores the canvas size.
pub struct FixedSizePose {
    pub size: (u32, u32),
}

impl DensePoseEstimator for FixedSizePose {
    fn estimate(&self, _person: &RgbImage) -> anyhow::Result<RgbImage> {
        Ok(RgbImage::new(self.size.0, self.size.1))
    }
}

#[derive(Default)]
pub struct FailingParser {
    pub calls: AtomicUsize,
}

impl HumanParser for FailingParser {
    fn parse(&self, _person: &RgbImage) -> anyhow::Result<LabelMap> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("parsing weights corrupt")
    }
}

// ---------------------------------------------------------------------------
// Generator fakes
// ---------------------------------------------------------------------------

/// Paints the garment into the masked region of the person. `size`
/// overrides the output resolution.
#[derive(Default)]
pub struct EchoGenerator {
    pub calls: AtomicUsize,
    pub size: Option<(u32, u32)>,
}

impl InpaintGenerator for EchoGenerator {
    fn generate(&self, bundle: &ConditioningBundle) -> anyhow::Result<RgbImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((w, h)) = self.size {
            return Ok(RgbImage::new(w, h));
        }
        let mut out = bundle.person.clone();
        for ((px, g), m) in out
            .pixels_mut()
            .zip(bundle.garment.pixels())
            .zip(bundle.mask.pixels())
        {
            if m[0] > 0 {
                *px = *g;
            }
        }
        Ok(out)
    }
}

#[derive(Default)]
pub struct FailingGenerator {
    pub calls: AtomicUsize,
    pub panic: bool,
}

impl InpaintGenerator for FailingGenerator {
    fn generate(&self, _bundle: &ConditioningBundle) -> anyhow::Result<RgbImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panic {
            panic!("generator crashed");
        }
        anyhow::bail!("session run failed")
    }
}

/// Sleeps, then echoes the person. Tracks peak concurrency.
pub struct SlowGenerator {
    pub delay: Duration,
    pub calls: AtomicUsize,
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
}

impl SlowGenerator {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

impl InpaintGenerator for SlowGenerator {
    fn generate(&self, bundle: &ConditioningBundle) -> anyhow::Result<RgbImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(bundle.person.clone())
    }
}

/// Plain conditioning bundle with the left half of the canvas masked.
pub fn conditioning(w: u32, h: u32) -> ConditioningBundle {
    let keypoints = synthetic_keypoints(w, h);
    ConditioningBundle {
        person: RgbImage::from_pixel(w, h, Rgb([180, 150, 130])),
        garment: RgbImage::from_pixel(w, h, Rgb([20, 40, 200])),
        masked_person: RgbImage::from_pixel(w, h, Rgb([128, 128, 128])),
        mask: GrayImage::from_fn(w, h, |x, _| Luma([if x < w / 2 { 255 } else { 0 }])),
        densepose: synthetic_densepose(w, h),
        skeleton: StickFigureRenderer::default().draw(&keypoints),
        category: GarmentCategory::UpperBody,
        seed: 42,
        steps: 4,
        guidance_scale: 2.0,
    }
}

// ---------------------------------------------------------------------------
// Pipeline harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub pipeline: Arc<TryOnPipeline>,
    /// keypoints, skeleton, densepose, parser.
    pub perception_calls: [Arc<AtomicUsize>; 4],
    pub generator: Arc<EchoGenerator>,
}

impl Harness {
    pub fn total_model_calls(&self) -> usize {
        self.perception_calls
            .iter()
            .map(|c| c.load(Ordering::SeqCst))
            .sum::<usize>()
            + self.generator.calls.load(Ordering::SeqCst)
    }
}

pub fn harness(config: &AppConfig) -> Harness {
    let (perception, perception_calls) = perception(true);
    let generator = Arc::new(EchoGenerator::default());
    let pipeline = Arc::new(TryOnPipeline::new(config, perception, generator.clone()));
    Harness {
        pipeline,
        perception_calls,
        generator,
    }
}

/// A PNG data URI of a `w`x`h` photo with a horizontal gradient.
pub fn photo_b64(w: u32, h: u32) -> String {
    let img = RgbImage::from_fn(w, h, |x, y| {
        Rgb([(x * 255 / w.max(1)) as u8, (y * 255 / h.max(1)) as u8, 140])
    });
    codec::image_to_base64_png(&DynamicImage::ImageRgb8(img)).unwrap_or_default()
}
