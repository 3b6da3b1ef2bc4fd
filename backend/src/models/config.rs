use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: String,
    pub allowed_origins: Vec<String>,
    pub log_level: String,
    pub models_dir: String,
    pub assets_dir: String,
    pub max_body_bytes: u64,
    pub max_edge: u32,
    pub mask_dilation: u8,
    pub feather_sigma: f32,
    pub default_seed: u64,
    pub generation_steps: u32,
    pub guidance_scale: f32,
    pub max_parallel_generations: usize,
    pub generation_timeout_secs: u64,
    pub ort_intra_threads: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            allowed_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
            ],
            log_level: "info".to_string(),
            models_dir: "./models".to_string(),
            assets_dir: "./assets".to_string(),
            max_body_bytes: 104_857_600,
            max_edge: 1024,
            mask_dilation: 9,
            feather_sigma: 3.0,
            default_seed: 42,
            generation_steps: 30,
            guidance_scale: 2.0,
            max_parallel_generations: 1,
            generation_timeout_secs: 300,
            ort_intra_threads: 2,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            listen_addr: lookup("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            allowed_origins: lookup("ALLOWED_ORIGINS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.allowed_origins),
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            models_dir: lookup("MODELS_DIR").unwrap_or(defaults.models_dir),
            assets_dir: lookup("ASSETS_DIR").unwrap_or(defaults.assets_dir),
            max_body_bytes: parsed(lookup("MAX_BODY_BYTES")).unwrap_or(defaults.max_body_bytes),
            max_edge: parsed::<u32>(lookup("MAX_EDGE"))
                .filter(|v| *v >= 8)
                .unwrap_or(defaults.max_edge),
            mask_dilation: parsed(lookup("MASK_DILATION")).unwrap_or(defaults.mask_dilation),
            feather_sigma: parsed::<f32>(lookup("FEATHER_SIGMA"))
                .filter(|v| v.is_finite() && *v >= 0.0)
                .unwrap_or(defaults.feather_sigma),
            default_seed: parsed(lookup("DEFAULT_SEED")).unwrap_or(defaults.default_seed),
            generation_steps: parsed(lookup("GENERATION_STEPS"))
                .unwrap_or(defaults.generation_steps),
            guidance_scale: parsed::<f32>(lookup("GUIDANCE_SCALE"))
                .filter(|v| v.is_finite())
                .unwrap_or(defaults.guidance_scale),
            max_parallel_generations: parsed::<usize>(lookup("MAX_PARALLEL_GENERATIONS"))
                .filter(|v| *v > 0)
                .unwrap_or(defaults.max_parallel_generations),
            generation_timeout_secs: parsed(lookup("GENERATION_TIMEOUT_SECS"))
                .unwrap_or(defaults.generation_timeout_secs),
            ort_intra_threads: parsed(lookup("ORT_INTRA_THREADS"))
                .unwrap_or(defaults.ort_intra_threads),
        }
    }
}

fn parsed<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}
