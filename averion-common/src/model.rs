//! Analysis model identifiers

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Screening model an image is analyzed with
///
/// Serialized in the backend's snake_case form (`pneumonia`, `skin_cancer`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// Chest X-ray pneumonia detection
    Pneumonia,
    /// Multi-class skin lesion screening
    SkinCancer,
}

impl ModelType {
    /// All models offered by the backend
    pub const ALL: [ModelType; 2] = [ModelType::Pneumonia, ModelType::SkinCancer];

    /// Wire identifier used in query strings and form fields
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Pneumonia => "pneumonia",
            ModelType::SkinCancer => "skin_cancer",
        }
    }

    /// Human-readable model name
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::Pneumonia => "Pneumonia Detection",
            ModelType::SkinCancer => "Skin Cancer Screening",
        }
    }

    /// Whether DICOM images are accepted in addition to JPEG/PNG/WebP
    pub fn accepts_dicom(&self) -> bool {
        matches!(self, ModelType::Pneumonia)
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pneumonia" => Ok(ModelType::Pneumonia),
            "skin_cancer" | "skin-cancer" | "skincancer" => Ok(ModelType::SkinCancer),
            other => Err(Error::InvalidInput(format!(
                "unknown model type '{}' (expected 'pneumonia' or 'skin_cancer')",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&ModelType::SkinCancer).unwrap(),
            "\"skin_cancer\""
        );
        let parsed: ModelType = serde_json::from_str("\"pneumonia\"").unwrap();
        assert_eq!(parsed, ModelType::Pneumonia);
    }

    #[test]
    fn test_model_type_from_str() {
        assert_eq!("skin-cancer".parse::<ModelType>().unwrap(), ModelType::SkinCancer);
        assert_eq!(" Pneumonia ".parse::<ModelType>().unwrap(), ModelType::Pneumonia);
        assert!("melanoma".parse::<ModelType>().is_err());
    }

    #[test]
    fn test_dicom_only_for_pneumonia() {
        assert!(ModelType::Pneumonia.accepts_dicom());
        assert!(!ModelType::SkinCancer.accepts_dicom());
    }
}
