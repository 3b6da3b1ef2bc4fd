use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::error::AppError;

pub const INVALID_FORMAT_MESSAGE: &str =
    "Invalid input format. Expected user_image+garment_image or model_image+garment_image";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GarmentCategory {
    UpperBody,
    LowerBody,
    Dresses,
}

impl GarmentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            GarmentCategory::UpperBody => "upper_body",
            GarmentCategory::LowerBody => "lower_body",
            GarmentCategory::Dresses => "dresses",
        }
    }
}

impl Default for GarmentCategory {
    fn default() -> Self {
        GarmentCategory::UpperBody
    }
}

impl fmt::Display for GarmentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GarmentCategory {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upper_body" => Ok(GarmentCategory::UpperBody),
            "lower_body" => Ok(GarmentCategory::LowerBody),
            "dresses" => Ok(GarmentCategory::Dresses),
            other => Err(AppError::InvalidInput(format!("Invalid category: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleeveState {
    Present,
    Absent,
    Unknown,
}

impl SleeveState {
    /// `None` while unresolved.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SleeveState::Present => Some(true),
            SleeveState::Absent => Some(false),
            SleeveState::Unknown => None,
        }
    }
}

impl From<Option<bool>> for SleeveState {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => SleeveState::Present,
            Some(false) => SleeveState::Absent,
            None => SleeveState::Unknown,
        }
    }
}

/// Where the person photograph comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum PersonSource {
    /// Base64 payload sent by the caller.
    Uploaded(String),
    /// Stored model photo, relative to the configured assets directory.
    StoredAsset(PathBuf),
}

/// Request body accepted by the scoring endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TryOnRequest {
    pub user_image: Option<String>,
    pub person_image: Option<String>,
    pub model_image: Option<String>,
    pub model_asset: Option<String>,
    pub garment_image: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub has_sleeves: Option<bool>,
    pub seed: Option<u64>,
    #[serde(default)]
    pub include_mask: bool,
}

/// A request that passed boundary validation.
#[derive(Debug, Clone)]
pub struct TryOnJob {
    pub person: PersonSource,
    pub garment: String,
    pub category: GarmentCategory,
    pub sleeves: SleeveState,
    pub seed: Option<u64>,
    pub include_mask: bool,
}

impl TryOnRequest {
    pub fn validate(self) -> Result<TryOnJob, AppError> {
        let garment = self
            .garment_image
            .filter(|g| !g.is_empty())
            .ok_or_else(|| AppError::InvalidInput(INVALID_FORMAT_MESSAGE.to_string()))?;

        let person = if let Some(b64) = self.user_image.or(self.person_image) {
            PersonSource::Uploaded(b64)
        } else if let Some(b64) = self.model_image {
            PersonSource::Uploaded(b64)
        } else if let Some(asset) = self.model_asset {
            PersonSource::StoredAsset(PathBuf::from(asset))
        } else {
            return Err(AppError::InvalidInput(INVALID_FORMAT_MESSAGE.to_string()));
        };

        let category = match self.category.as_deref() {
            None => GarmentCategory::default(),
            Some(c) => c.parse()?,
        };

        Ok(TryOnJob {
            person,
            garment,
            category,
            sleeves: SleeveState::from(self.has_sleeves),
            seed: self.seed,
            include_mask: self.include_mask,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TryOnResponse {
    pub success: bool,
    pub result_image: String,
    pub detected_sleeves: bool,
    pub category: GarmentCategory,
    pub reduced_confidence: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_image: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<TryOnJob, AppError> {
        serde_json::from_str::<TryOnRequest>(json).unwrap().validate()
    }

    #[test]
    fn defaults_to_upper_body_with_unknown_sleeves() {
        let job = parse(r#"{"user_image": "aaaa", "garment_image": "bbbb"}"#).unwrap();
        assert_eq!(job.category, GarmentCategory::UpperBody);
        assert_eq!(job.sleeves, SleeveState::Unknown);
        assert_eq!(job.person, PersonSource::Uploaded("aaaa".to_string()));
    }

    #[test]
    fn null_sleeves_is_unknown() {
        let job = parse(r#"{"user_image": "a", "garment_image": "b", "has_sleeves": null}"#).unwrap();
        assert_eq!(job.sleeves, SleeveState::Unknown);
        let job = parse(r#"{"user_image": "a", "garment_image": "b", "has_sleeves": false}"#).unwrap();
        assert_eq!(job.sleeves, SleeveState::Absent);
    }

    #[test]
    fn model_image_is_an_alias_for_the_person() {
        let job = parse(r#"{"model_image": "m", "garment_image": "g", "category": "dresses"}"#).unwrap();
        assert_eq!(job.person, PersonSource::Uploaded("m".to_string()));
        assert_eq!(job.category, GarmentCategory::Dresses);
    }

    #[test]
    fn stored_asset_source() {
        let job = parse(r#"{"model_asset": "models/anna.jpg", "garment_image": "g"}"#).unwrap();
        assert_eq!(job.person, PersonSource::StoredAsset(PathBuf::from("models/anna.jpg")));
    }

    #[test]
    fn unknown_category_is_rejected_by_name() {
        for bad in ["pants", "shoes", "UPPER_BODY", ""] {
            let json = format!(r#"{{"user_image": "a", "garment_image": "b", "category": "{}"}}"#, bad);
            let err = parse(&json).unwrap_err();
            assert_eq!(err.to_string(), format!("Invalid category: {}", bad));
        }
    }

    #[test]
    fn missing_images_is_invalid_format() {
        let err = parse(r#"{"garment_image": "b"}"#).unwrap_err();
        assert_eq!(err.to_string(), INVALID_FORMAT_MESSAGE);
        let err = parse(r#"{"user_image": "a"}"#).unwrap_err();
        assert_eq!(err.to_string(), INVALID_FORMAT_MESSAGE);
    }

    #[test]
    fn category_serializes_snake_case() {
        let v = serde_json::to_value(GarmentCategory::LowerBody).unwrap();
        assert_eq!(v, serde_json::json!("lower_body"));
    }
}
