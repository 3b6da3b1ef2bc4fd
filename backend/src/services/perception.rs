use std::sync::Arc;

use image::RgbImage;

use crate::models::error::AppError;
use crate::models::imaging::NormalizedImage;
use crate::models::perception::{KeypointSet, LabelMap, PerceptionBundle};

pub const DENSEPOSE: &str = "densepose";
pub const HUMAN_PARSER: &str = "human_parser";
pub const KEYPOINT_DETECTOR: &str = "keypoint_detector";
pub const SKELETON_RENDERER: &str = "skeleton_renderer";

// ---------------------------------------------------------------------------
// Collaborator contracts
// ---------------------------------------------------------------------------

/// Person canvas → dense pose map at canvas resolution.
pub trait DensePoseEstimator: Send + Sync {
    fn estimate(&self, person: &RgbImage) -> anyhow::Result<RgbImage>;
}

/// Person canvas → per-pixel body-part labels.
pub trait HumanParser: Send + Sync {
    fn parse(&self, person: &RgbImage) -> anyhow::Result<LabelMap>;
}

/// Person canvas → body keypoints in canvas pixel coordinates.
pub trait KeypointDetector: Send + Sync {
    fn detect(&self, person: &RgbImage) -> anyhow::Result<KeypointSet>;
}

/// Keypoints → skeleton rendering at the keypoints' frame size.
pub trait SkeletonRenderer: Send + Sync {
    fn render(&self, keypoints: &KeypointSet) -> anyhow::Result<RgbImage>;
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PerceptionModels {
    pub densepose: Arc<dyn DensePoseEstimator>,
    pub parser: Arc<dyn HumanParser>,
    pub keypoints: Arc<dyn KeypointDetector>,
    pub skeleton: Arc<dyn SkeletonRenderer>,
}

impl PerceptionModels {
    /// Run every perception collaborator once on the person canvas.
    ///
    /// Failures are not retried: the models are deterministic, so a second
    /// attempt on the same canvas cannot succeed where the first failed.
    pub fn perceive(&self, person: &NormalizedImage) -> Result<PerceptionBundle, AppError> {
        let expected = person.dimensions();

        let keypoints = self
            .keypoints
            .detect(&person.pixels)
            .map_err(|e| failure(KEYPOINT_DETECTOR, e))?;
        check_size(KEYPOINT_DETECTOR, expected, keypoints.dimensions())?;

        let skeleton = self
            .skeleton
            .render(&keypoints)
            .map_err(|e| failure(SKELETON_RENDERER, e))?;
        check_size(SKELETON_RENDERER, expected, skeleton.dimensions())?;

        let densepose = self
            .densepose
            .estimate(&person.pixels)
            .map_err(|e| failure(DENSEPOSE, e))?;
        check_size(DENSEPOSE, expected, densepose.dimensions())?;

        let labels = self
            .parser
            .parse(&person.pixels)
            .map_err(|e| failure(HUMAN_PARSER, e))?;
        check_size(HUMAN_PARSER, expected, labels.dimensions())?;
        if labels.data.len() != (labels.width * labels.height) as usize {
            return Err(AppError::PerceptionFailure {
                collaborator: HUMAN_PARSER,
                detail: format!(
                    "label buffer holds {} entries for {}x{}",
                    labels.data.len(),
                    labels.width,
                    labels.height
                ),
            });
        }

        tracing::debug!(
            width = expected.0,
            height = expected.1,
            "perception complete"
        );

        Ok(PerceptionBundle {
            densepose,
            labels,
            keypoints,
            skeleton,
        })
    }
}

fn failure(collaborator: &'static str, e: anyhow::Error) -> AppError {
    tracing::warn!(collaborator, error = %e, "perception collaborator failed");
    AppError::PerceptionFailure {
        collaborator,
        detail: format!("{:#}", e),
    }
}

fn check_size(
    collaborator: &'static str,
    expected: (u32, u32),
    actual: (u32, u32),
) -> Result<(), AppError> {
    if actual.0 == 0 || actual.1 == 0 {
        return Err(AppError::PerceptionFailure {
            collaborator,
            detail: "empty output".to_string(),
        });
    }
    if actual != expected {
        tracing::warn!(
            collaborator,
            expected = ?expected,
            actual = ?actual,
            "perception output not aligned to canvas"
        );
        return Err(AppError::PerceptionMismatch {
            collaborator,
            expected,
            actual,
        });
    }
    Ok(())
}
