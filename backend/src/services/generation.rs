use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbImage;
use tokio::sync::Semaphore;

use crate::models::error::AppError;
use crate::models::imaging::ResultImage;
use crate::services::conditioning::ConditioningBundle;

/// The generative inpainting model. Synchronous and CPU/accelerator bound;
/// callers run it on the blocking pool.
pub trait InpaintGenerator: Send + Sync {
    fn generate(&self, bundle: &ConditioningBundle) -> anyhow::Result<RgbImage>;
}

/// Bounds how many generations run at once and how long a request may wait
/// for one.
pub struct GenerationGate {
    generator: Arc<dyn InpaintGenerator>,
    permits: Arc<Semaphore>,
    max_parallel: usize,
    timeout: Duration,
}

impl GenerationGate {
    pub fn new(generator: Arc<dyn InpaintGenerator>, max_parallel: usize, timeout: Duration) -> Self {
        let max_parallel = max_parallel.max(1);
        Self {
            generator,
            permits: Arc::new(Semaphore::new(max_parallel)),
            max_parallel,
            timeout,
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Run the generator once. Never retried: a fault, a panic or an output
    /// at the wrong resolution is a generation failure.
    pub async fn generate(&self, bundle: ConditioningBundle) -> Result<ResultImage, AppError> {
        let started = Instant::now();
        match tokio::time::timeout(self.timeout, self.run(bundle)).await {
            Ok(result) => {
                tracing::info!(
                    latency_ms = started.elapsed().as_millis() as u64,
                    ok = result.is_ok(),
                    "generation finished"
                );
                result
            }
            Err(_) => {
                tracing::error!(timeout_secs = self.timeout.as_secs(), "generation timed out");
                Err(AppError::GenerationTimeout(self.timeout.as_secs()))
            }
        }
    }

    async fn run(&self, bundle: ConditioningBundle) -> Result<ResultImage, AppError> {
        // The permit travels with the blocking task, so a timed-out request
        // keeps its slot until the model actually returns.
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::Internal("Generation semaphore closed".to_string()))?;

        let generator = self.generator.clone();
        let expected = bundle.dimensions();
        let output = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            generator.generate(&bundle)
        })
        .await
        .map_err(|e| AppError::GenerationFailure(format!("Task panicked: {}", e)))?
        .map_err(|e| AppError::GenerationFailure(format!("{:#}", e)))?;

        if output.dimensions() != expected {
            return Err(AppError::GenerationFailure(format!(
                "generator returned {:?}, expected {:?}",
                output.dimensions(),
                expected
            )));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fakes::{self, EchoGenerator, FailingGenerator, SlowGenerator};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn echo_generation_returns_canvas_sized_result() {
        let generator = Arc::new(EchoGenerator::default());
        let gate = GenerationGate::new(generator.clone(), 1, Duration::from_secs(5));
        let out = gate.generate(fakes::conditioning(64, 96)).await.unwrap();
        assert_eq!(out.dimensions(), (64, 96));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wrong_resolution_is_a_failure() {
        let generator = Arc::new(EchoGenerator {
            size: Some((32, 32)),
            ..Default::default()
        });
        let gate = GenerationGate::new(generator, 1, Duration::from_secs(5));
        let err = gate.generate(fakes::conditioning(64, 96)).await.unwrap_err();
        assert!(matches!(err, AppError::GenerationFailure(_)));
    }

    #[tokio::test]
    async fn faults_and_panics_are_not_retried() {
        let failing = Arc::new(FailingGenerator::default());
        let gate = GenerationGate::new(failing.clone(), 1, Duration::from_secs(5));
        assert!(matches!(
            gate.generate(fakes::conditioning(16, 16)).await,
            Err(AppError::GenerationFailure(_))
        ));
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);

        let panicking = Arc::new(FailingGenerator {
            panic: true,
            ..Default::default()
        });
        let gate = GenerationGate::new(panicking.clone(), 1, Duration::from_secs(5));
        match gate.generate(fakes::conditioning(16, 16)).await {
            Err(AppError::GenerationFailure(msg)) => assert!(msg.contains("panicked")),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        assert_eq!(panicking.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_generation_times_out() {
        let gate = GenerationGate::new(
            Arc::new(SlowGenerator::new(Duration::from_millis(500))),
            1,
            Duration::from_millis(50),
        );
        let err = gate.generate(fakes::conditioning(16, 16)).await.unwrap_err();
        assert!(matches!(err, AppError::GenerationTimeout(_)));
        assert_eq!(err.status(), axum::http::StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallelism_is_bounded() {
        let slow = Arc::new(SlowGenerator::new(Duration::from_millis(40)));
        let gate = Arc::new(GenerationGate::new(slow.clone(), 2, Duration::from_secs(10)));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                gate.generate(fakes::conditioning(16, 16)).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(slow.calls.load(Ordering::SeqCst), 6);
        assert!(slow.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(gate.max_parallel(), 2);
    }
}
