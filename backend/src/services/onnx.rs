//! ONNX Runtime implementations of the model collaborators.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use image::{imageops, imageops::FilterType, Rgb, RgbImage};
use ndarray::{Array1, Array4};
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;

use crate::models::perception::{labels, Keypoint, KeypointIndex, KeypointSet, LabelMap};
use crate::services::conditioning::ConditioningBundle;
use crate::services::generation::InpaintGenerator;
use crate::services::perception::{
    DensePoseEstimator, HumanParser, KeypointDetector, PerceptionModels,
};
use crate::services::skeleton::StickFigureRenderer;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Pixel scaling applied before a model sees the canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputNorm {
    /// ImageNet mean/std over [0, 1].
    ImageNet,
    /// [0, 1] → [-1, 1].
    Symmetric,
    /// Centred on 0.5, range [-0.5, 0.5] (OpenPose).
    Centred,
}

impl InputNorm {
    fn apply(self, c: usize, v: u8) -> f32 {
        let v = v as f32 / 255.0;
        match self {
            InputNorm::ImageNet => (v - IMAGENET_MEAN[c]) / IMAGENET_STD[c],
            InputNorm::Symmetric => v * 2.0 - 1.0,
            InputNorm::Centred => v - 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    DensePose,
    HumanParsing,
    Keypoints,
    TryOn,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::DensePose,
        ModelKind::HumanParsing,
        ModelKind::Keypoints,
        ModelKind::TryOn,
    ];

    pub fn filename(&self) -> &'static str {
        match self {
            ModelKind::DensePose => "densepose.onnx",
            ModelKind::HumanParsing => "human_parsing_atr.onnx",
            ModelKind::Keypoints => "openpose_body.onnx",
            ModelKind::TryOn => "tryon_inpaint.onnx",
        }
    }

    /// Square proxy resolution; `None` runs at canvas resolution.
    pub fn input_size(&self) -> Option<u32> {
        match self {
            ModelKind::DensePose => Some(512),
            ModelKind::HumanParsing => Some(512),
            ModelKind::Keypoints => Some(368),
            ModelKind::TryOn => None,
        }
    }

    pub fn path(&self, models_dir: &Path) -> PathBuf {
        models_dir.join(self.filename())
    }
}

fn load_session(kind: ModelKind, models_dir: &Path, intra_threads: usize) -> anyhow::Result<Session> {
    let path = kind.path(models_dir);
    if !path.exists() {
        anyhow::bail!("model file '{}' not found", path.display());
    }
    let session = Session::builder()
        .and_then(|b| b.with_intra_threads(intra_threads))
        .and_then(|b| b.commit_from_file(&path))
        .with_context(|| format!("failed to load ONNX session {}", path.display()))?;
    tracing::info!(model = kind.filename(), "ONNX session loaded");
    Ok(session)
}

/// Load every collaborator from `models_dir`. Any missing or unloadable
/// model fails the whole set.
pub fn load_models(
    models_dir: &Path,
    intra_threads: usize,
) -> anyhow::Result<(PerceptionModels, Arc<dyn InpaintGenerator>)> {
    let threads = intra_threads.max(1);
    let perception = PerceptionModels {
        densepose: Arc::new(OnnxPoseEstimator {
            session: Mutex::new(load_session(ModelKind::DensePose, models_dir, threads)?),
        }),
        parser: Arc::new(OnnxHumanParser {
            session: Mutex::new(load_session(ModelKind::HumanParsing, models_dir, threads)?),
        }),
        keypoints: Arc::new(OnnxKeypointDetector {
            session: Mutex::new(load_session(ModelKind::Keypoints, models_dir, threads)?),
            peak_threshold: 0.1,
        }),
        skeleton: Arc::new(StickFigureRenderer::default()),
    };
    let generator: Arc<dyn InpaintGenerator> = Arc::new(OnnxInpaintGenerator {
        session: Mutex::new(load_session(ModelKind::TryOn, models_dir, threads)?),
    });
    Ok((perception, generator))
}

// ---------------------------------------------------------------------------
// Tensor helpers
// ---------------------------------------------------------------------------

/// RGB image → `(1, 3, H, W)` tensor, resized to `size` first when given.
pub fn rgb_to_nchw(img: &RgbImage, size: Option<(u32, u32)>, norm: InputNorm) -> Array4<f32> {
    let resized;
    let rgb = match size {
        Some((w, h)) if (w, h) != img.dimensions() => {
            resized = imageops::resize(img, w, h, FilterType::Triangle);
            &resized
        }
        _ => img,
    };
    let (w, h) = (rgb.width() as usize, rgb.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, p) in rgb.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = norm.apply(c, p[c]);
        }
    }
    tensor
}

/// Single-channel mask → `(1, 1, H, W)` in [0, 1].
fn mask_to_nchw(mask: &image::GrayImage) -> Array4<f32> {
    let (w, h) = (mask.width() as usize, mask.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 1, h, w));
    for (x, y, p) in mask.enumerate_pixels() {
        tensor[[0, 0, y as usize, x as usize]] = if p[0] > 0 { 1.0 } else { 0.0 };
    }
    tensor
}

/// Planar `(3, H, W)` data → RGB. `lo..hi` is the value range mapped to 0..255.
pub fn nchw_to_rgb(data: &[f32], w: u32, h: u32, lo: f32, hi: f32) -> anyhow::Result<RgbImage> {
    let plane = (w * h) as usize;
    if data.len() < 3 * plane {
        anyhow::bail!("output holds {} values, need {} for 3x{}x{}", data.len(), 3 * plane, h, w);
    }
    let scale = 255.0 / (hi - lo);
    Ok(RgbImage::from_fn(w, h, |x, y| {
        let i = (y * w + x) as usize;
        let px = |c: usize| ((data[c * plane + i] - lo) * scale).round().clamp(0.0, 255.0) as u8;
        Rgb([px(0), px(1), px(2)])
    }))
}

/// Per-pixel argmax over `(classes, H, W)` logits.
pub fn argmax_labels(logits: &[f32], classes: usize, w: usize, h: usize) -> anyhow::Result<Vec<u8>> {
    let plane = w * h;
    if classes == 0 || logits.len() < classes * plane {
        anyhow::bail!("logits hold {} values, need {}x{}x{}", logits.len(), classes, h, w);
    }
    Ok((0..plane)
        .map(|i| {
            let mut best = 0usize;
            for c in 1..classes {
                if logits[c * plane + i] > logits[best * plane + i] {
                    best = c;
                }
            }
            best as u8
        })
        .collect())
}

/// Nearest-neighbour label resize; labels are categorical so no blending.
pub fn resize_labels(data: &[u8], w: u32, h: u32, ow: u32, oh: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity((ow * oh) as usize);
    for y in 0..oh {
        let sy = ((y as u64 * h as u64) / oh as u64).min(h as u64 - 1) as u32;
        for x in 0..ow {
            let sx = ((x as u64 * w as u64) / ow as u64).min(w as u64 - 1) as u32;
            out.push(data[(sy * w + sx) as usize]);
        }
    }
    out
}

/// Strongest response per heatmap channel, mapped into a `frame`-sized
/// coordinate system. Peaks below `threshold` come back with zero confidence.
pub fn heatmap_peaks(
    heatmaps: &[f32],
    channels: usize,
    w: usize,
    h: usize,
    frame: (u32, u32),
    threshold: f32,
) -> anyhow::Result<KeypointSet> {
    let plane = w * h;
    if heatmaps.len() < channels * plane || channels < KeypointIndex::COUNT {
        anyhow::bail!(
            "heatmaps hold {} values in {} channels, need {} channels of {}x{}",
            heatmaps.len(),
            channels,
            KeypointIndex::COUNT,
            w,
            h
        );
    }
    let (sx, sy) = (frame.0 as f32 / w as f32, frame.1 as f32 / h as f32);
    let mut set = KeypointSet::empty(frame.0, frame.1);
    for (k, point) in set.points.iter_mut().enumerate() {
        let channel = &heatmaps[k * plane..(k + 1) * plane];
        let (idx, &score) = channel
            .iter()
            .enumerate()
            .fold((0, &f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });
        if score >= threshold {
            let (x, y) = ((idx % w) as f32 + 0.5, (idx / w) as f32 + 0.5);
            *point = Keypoint::new(x * sx, y * sy, score.min(1.0));
        }
    }
    Ok(set)
}

fn proxy(kind: ModelKind) -> Option<(u32, u32)> {
    kind.input_size().map(|s| (s, s))
}

/// Output tensor dimensions as `usize`, rejecting unexpected ranks.
fn dims(shape: &[i64], rank: usize) -> anyhow::Result<Vec<usize>> {
    if shape.len() != rank || shape.iter().any(|d| *d <= 0) {
        anyhow::bail!("unexpected output shape {:?}", shape);
    }
    Ok(shape.iter().map(|d| *d as usize).collect())
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

pub struct OnnxPoseEstimator {
    session: Mutex<Session>,
}

impl DensePoseEstimator for OnnxPoseEstimator {
    fn estimate(&self, person: &RgbImage) -> anyhow::Result<RgbImage> {
        let input = Tensor::from_array(rgb_to_nchw(
            person,
            proxy(ModelKind::DensePose),
            InputNorm::ImageNet,
        ))?;
        let map = {
            let mut session = self.session.lock();
            let outputs = session.run(ort::inputs![input]).context("densepose inference")?;
            let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
            let d = dims(shape, 4)?;
            nchw_to_rgb(data, d[3] as u32, d[2] as u32, 0.0, 1.0)?
        };
        let (w, h) = person.dimensions();
        Ok(imageops::resize(&map, w, h, FilterType::Nearest))
    }
}

pub struct OnnxHumanParser {
    session: Mutex<Session>,
}

impl HumanParser for OnnxHumanParser {
    fn parse(&self, person: &RgbImage) -> anyhow::Result<LabelMap> {
        let input = Tensor::from_array(rgb_to_nchw(
            person,
            proxy(ModelKind::HumanParsing),
            InputNorm::ImageNet,
        ))?;
        let (classes, pw, ph) = {
            let mut session = self.session.lock();
            let outputs = session.run(ort::inputs![input]).context("parsing inference")?;
            let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
            let d = dims(shape, 4)?;
            if d[1] != labels::COUNT {
                anyhow::bail!("parser produced {} classes, expected {}", d[1], labels::COUNT);
            }
            (argmax_labels(data, d[1], d[3], d[2])?, d[3] as u32, d[2] as u32)
        };
        let (w, h) = person.dimensions();
        Ok(LabelMap {
            width: w,
            height: h,
            data: resize_labels(&classes, pw, ph, w, h),
        })
    }
}

pub struct OnnxKeypointDetector {
    session: Mutex<Session>,
    peak_threshold: f32,
}

impl KeypointDetector for OnnxKeypointDetector {
    fn detect(&self, person: &RgbImage) -> anyhow::Result<KeypointSet> {
        let input = Tensor::from_array(rgb_to_nchw(
            person,
            proxy(ModelKind::Keypoints),
            InputNorm::Centred,
        ))?;
        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![input]).context("keypoint inference")?;
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let d = dims(shape, 4)?;
        heatmap_peaks(data, d[1], d[3], d[2], person.dimensions(), self.peak_threshold)
    }
}

pub struct OnnxInpaintGenerator {
    session: Mutex<Session>,
}

impl InpaintGenerator for OnnxInpaintGenerator {
    fn generate(&self, bundle: &ConditioningBundle) -> anyhow::Result<RgbImage> {
        let (w, h) = bundle.dimensions();
        let norm = InputNorm::Symmetric;
        let person = Tensor::from_array(rgb_to_nchw(&bundle.person, None, norm))?;
        let masked = Tensor::from_array(rgb_to_nchw(&bundle.masked_person, None, norm))?;
        let garment = Tensor::from_array(rgb_to_nchw(&bundle.garment, None, norm))?;
        let mask = Tensor::from_array(mask_to_nchw(&bundle.mask))?;
        let densepose = Tensor::from_array(rgb_to_nchw(&bundle.densepose, None, norm))?;
        let skeleton = Tensor::from_array(rgb_to_nchw(&bundle.skeleton, None, norm))?;
        let noise = Tensor::from_array(bundle.initial_noise())?;
        let steps = Tensor::from_array(Array1::from_elem(1, bundle.steps as i64))?;
        let guidance = Tensor::from_array(Array1::from_elem(1, bundle.guidance_scale))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![
                "person" => person,
                "masked_person" => masked,
                "garment" => garment,
                "mask" => mask,
                "densepose" => densepose,
                "skeleton" => skeleton,
                "noise" => noise,
                "num_steps" => steps,
                "guidance_scale" => guidance
            ])
            .context("try-on inference")?;
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let d = dims(shape, 4)?;
        if (d[3] as u32, d[2] as u32) != (w, h) {
            anyhow::bail!("generator produced {}x{}, expected {}x{}", d[3], d[2], w, h);
        }
        nchw_to_rgb(data, w, h, -1.0, 1.0)
    }
}
