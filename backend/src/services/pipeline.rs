use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use image::{imageops::FilterType, GrayImage};

use crate::models::config::AppConfig;
use crate::models::error::AppError;
use crate::models::imaging::{FinalImage, InpaintMask, MaskConfidence, NormalizedImage, RawImage};
use crate::models::tryon::{GarmentCategory, PersonSource, SleeveState, TryOnJob};
use crate::services::codec;
use crate::services::composite::Compositor;
use crate::services::conditioning::{self, ConditioningBundle, GenerationSettings};
use crate::services::generation::{GenerationGate, InpaintGenerator};
use crate::services::mask_policy::MaskPolicy;
use crate::services::normalize::{restore, Normalizer};
use crate::services::onnx;
use crate::services::perception::PerceptionModels;

/// Whether the service can take requests. Built once at startup and shared
/// through application state.
pub enum Readiness {
    Ready {
        pipeline: Arc<TryOnPipeline>,
        since: DateTime<Utc>,
    },
    NotReady {
        reason: String,
    },
}

impl Readiness {
    pub fn ready(pipeline: TryOnPipeline) -> Self {
        Readiness::Ready {
            pipeline: Arc::new(pipeline),
            since: Utc::now(),
        }
    }

    pub fn pipeline(&self) -> Result<Arc<TryOnPipeline>, AppError> {
        match self {
            Readiness::Ready { pipeline, .. } => Ok(pipeline.clone()),
            Readiness::NotReady { .. } => Err(AppError::ServiceNotReady),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }
}

/// Load all collaborators from the configured model directory. Failure is
/// not fatal to the process: the service starts and reports not-ready.
pub fn init_models(config: &AppConfig) -> Readiness {
    let models_dir = Path::new(&config.models_dir);
    let missing: Vec<&str> = onnx::ModelKind::ALL
        .iter()
        .filter(|k| !k.path(models_dir).exists())
        .map(|k| k.filename())
        .collect();
    if !missing.is_empty() {
        let reason = format!("missing model files in {}: {}", config.models_dir, missing.join(", "));
        tracing::error!(%reason, "models not loaded");
        return Readiness::NotReady { reason };
    }

    match onnx::load_models(models_dir, config.ort_intra_threads) {
        Ok((perception, generator)) => {
            tracing::info!(models_dir = %config.models_dir, "all models loaded");
            Readiness::ready(TryOnPipeline::new(config, perception, generator))
        }
        Err(e) => {
            let reason = format!("{:#}", e);
            tracing::error!(%reason, "models not loaded");
            Readiness::NotReady { reason }
        }
    }
}

/// What a successful run hands back to the request boundary.
#[derive(Debug, Clone)]
pub struct TryOnOutcome {
    pub image: FinalImage,
    pub category: GarmentCategory,
    pub sleeves: SleeveState,
    pub confidence: MaskConfidence,
    /// Inpainting mask at the caller's resolution, when requested.
    pub mask: Option<GrayImage>,
}

pub struct TryOnPipeline {
    normalizer: Normalizer,
    perception: PerceptionModels,
    masks: MaskPolicy,
    gate: GenerationGate,
    compositor: Compositor,
    settings: GenerationSettings,
    default_seed: u64,
    assets_dir: PathBuf,
}

impl TryOnPipeline {
    pub fn new(
        config: &AppConfig,
        perception: PerceptionModels,
        generator: Arc<dyn InpaintGenerator>,
    ) -> Self {
        Self {
            normalizer: Normalizer::new(config.max_edge),
            perception,
            masks: MaskPolicy::new(config.mask_dilation),
            gate: GenerationGate::new(
                generator,
                config.max_parallel_generations,
                Duration::from_secs(config.generation_timeout_secs),
            ),
            compositor: Compositor::new(config.feather_sigma),
            settings: GenerationSettings {
                steps: config.generation_steps,
                guidance_scale: config.guidance_scale,
            },
            default_seed: config.default_seed,
            assets_dir: PathBuf::from(&config.assets_dir),
        }
    }

    pub fn max_parallel_generations(&self) -> usize {
        self.gate.max_parallel()
    }

    /// Normalize → perceive → mask → condition → generate → composite.
    pub async fn run(self: Arc<Self>, job: TryOnJob) -> Result<TryOnOutcome, AppError> {
        let started = Instant::now();
        let person = self.load_person(&job.person).await?;
        let garment_b64 = job.garment;
        let garment = blocking(move || codec::base64_to_image(&garment_b64)).await?;

        let seed = job.seed.unwrap_or(self.default_seed);
        let category = job.category;
        let sleeves_hint = job.sleeves;

        let this = self.clone();
        let (bundle, staged) =
            blocking(move || this.prepare(person, garment, category, sleeves_hint, seed)).await?;
        tracing::info!(
            category = %category,
            sleeves = ?staged.sleeves,
            canvas = ?staged.canvas.dimensions(),
            mask_pixels = staged.mask.coverage(),
            digest = %staged.digest,
            seed,
            "conditioning assembled"
        );

        let result = self.gate.generate(bundle).await?;

        let this = self.clone();
        let Staged {
            canvas,
            person,
            mask,
            sleeves,
            ..
        } = staged;
        let include_mask = job.include_mask;
        let outcome = blocking(move || {
            let image = this
                .compositor
                .composite(&result, &person.pixels, &canvas.offsets, &mask)?;
            let restored_mask = if include_mask {
                Some(restore(&mask.pixels, &canvas.offsets, canvas.original, FilterType::Nearest)?)
            } else {
                None
            };
            Ok(TryOnOutcome {
                image,
                category,
                sleeves,
                confidence: mask.confidence,
                mask: restored_mask,
            })
        })
        .await?;

        tracing::info!(
            category = %category,
            latency_ms = started.elapsed().as_millis() as u64,
            reduced_confidence = outcome.confidence == MaskConfidence::Reduced,
            "try-on complete"
        );
        Ok(outcome)
    }

    fn prepare(
        &self,
        person: RawImage,
        garment: RawImage,
        category: GarmentCategory,
        sleeves: SleeveState,
        seed: u64,
    ) -> Result<(ConditioningBundle, Staged), AppError> {
        let canvas = self.normalizer.normalize(&person)?;
        let garment = self.normalizer.normalize_to(&garment, canvas.dimensions())?;
        let perception = self.perception.perceive(&canvas)?;
        let (mask, sleeves) = self.masks.build_mask(&perception, category, sleeves);
        let bundle = conditioning::assemble(
            &canvas,
            &garment,
            &mask,
            &perception,
            category,
            seed,
            &self.settings,
        )?;
        let staged = Staged {
            digest: bundle.digest(),
            canvas,
            person,
            mask,
            sleeves,
        };
        Ok((bundle, staged))
    }

    async fn load_person(&self, source: &PersonSource) -> Result<RawImage, AppError> {
        match source {
            PersonSource::Uploaded(b64) => {
                tracing::debug!(payload_len = b64.len(), "decoding uploaded person image");
                let b64 = b64.clone();
                blocking(move || codec::base64_to_image(&b64)).await
            }
            PersonSource::StoredAsset(rel) => {
                let path = resolve_asset(&self.assets_dir, rel)?;
                let bytes = tokio::fs::read(&path).await.map_err(|e| {
                    AppError::InvalidInput(format!("Model asset not found: {} ({})", rel.display(), e))
                })?;
                blocking(move || codec::load_image(&bytes)).await
            }
        }
    }
}

/// Per-request state carried across the generation await.
struct Staged {
    canvas: NormalizedImage,
    person: RawImage,
    mask: InpaintMask,
    sleeves: SleeveState,
    digest: String,
}

/// Join a caller-supplied relative path onto the assets directory, refusing
/// anything that could escape it.
pub fn resolve_asset(assets_dir: &Path, rel: &Path) -> Result<PathBuf, AppError> {
    let clean = rel.components().all(|c| matches!(c, Component::Normal(_)));
    if rel.as_os_str().is_empty() || !clean {
        return Err(AppError::InvalidInput(format!(
            "Invalid model asset path: {}",
            rel.display()
        )));
    }
    Ok(assets_dir.join(rel))
}

async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("Task panicked: {}", e)))?
}
