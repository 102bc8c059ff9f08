use serde::{Deserialize, Serialize};
use std::fmt;

/// ESA WorldCover land cover class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LandCoverClass {
    TreeCover,
    Shrubland,
    Grassland,
    Cropland,
    BuiltUp,
    BareSparseVegetation,
    SnowAndIce,
    PermanentWaterBodies,
    HerbaceousWetland,
    Mangroves,
    MossAndLichen,
    /// A code outside the WorldCover legend
    Other(u8),
}

impl LandCoverClass {
    /// Map a raster cell value to a class
    pub fn from_code(code: u8) -> Self {
        match code {
            10 => LandCoverClass::TreeCover,
            20 => LandCoverClass::Shrubland,
            30 => LandCoverClass::Grassland,
            40 => LandCoverClass::Cropland,
            50 => LandCoverClass::BuiltUp,
            60 => LandCoverClass::BareSparseVegetation,
            70 => LandCoverClass::SnowAndIce,
            80 => LandCoverClass::PermanentWaterBodies,
            90 => LandCoverClass::HerbaceousWetland,
            95 => LandCoverClass::Mangroves,
            100 => LandCoverClass::MossAndLichen,
            other => LandCoverClass::Other(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            LandCoverClass::TreeCover => 10,
            LandCoverClass::Shrubland => 20,
            LandCoverClass::Grassland => 30,
            LandCoverClass::Cropland => 40,
            LandCoverClass::BuiltUp => 50,
            LandCoverClass::BareSparseVegetation => 60,
            LandCoverClass::SnowAndIce => 70,
            LandCoverClass::PermanentWaterBodies => 80,
            LandCoverClass::HerbaceousWetland => 90,
            LandCoverClass::Mangroves => 95,
            LandCoverClass::MossAndLichen => 100,
            LandCoverClass::Other(code) => *code,
        }
    }

    /// Natural or vegetated surroundings that make a built-up footprint acceptable
    pub fn is_natural(&self) -> bool {
        matches!(
            self,
            LandCoverClass::TreeCover
                | LandCoverClass::Shrubland
                | LandCoverClass::Grassland
                | LandCoverClass::Cropland
                | LandCoverClass::BareSparseVegetation
                | LandCoverClass::HerbaceousWetland
                | LandCoverClass::Mangroves
                | LandCoverClass::MossAndLichen
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            LandCoverClass::TreeCover => "Tree cover",
            LandCoverClass::Shrubland => "Shrubland",
            LandCoverClass::Grassland => "Grassland",
            LandCoverClass::Cropland => "Cropland",
            LandCoverClass::BuiltUp => "Built-up",
            LandCoverClass::BareSparseVegetation => "Bare / sparse vegetation",
            LandCoverClass::SnowAndIce => "Snow and ice",
            LandCoverClass::PermanentWaterBodies => "Permanent water bodies",
            LandCoverClass::HerbaceousWetland => "Herbaceous wetland",
            LandCoverClass::Mangroves => "Mangroves",
            LandCoverClass::MossAndLichen => "Moss and lichen",
            LandCoverClass::Other(_) => "Unknown",
        }
    }
}

impl fmt::Display for LandCoverClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.code())
    }
}

// Serialized as the raw WorldCover code so that reports stay comparable with the rasters.
impl Serialize for LandCoverClass {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for LandCoverClass {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u8::deserialize(deserializer).map(LandCoverClass::from_code)
    }
}

/// Outcome of the majority-vote land cover check for one geometry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LandCoverVerdict {
    pub index: usize,
    pub majority_inside: Option<LandCoverClass>,
    pub majority_outside: Option<LandCoverClass>,
    /// Class the site is attributed to; absent when the computation failed
    pub effective_class: Option<LandCoverClass>,
    pub valid: bool,
}

impl LandCoverVerdict {
    /// Verdict for a geometry whose raster could not be read or clipped
    pub fn failed(index: usize) -> Self {
        Self {
            index,
            majority_inside: None,
            majority_outside: None,
            effective_class: None,
            valid: false,
        }
    }

    /// No class could be determined on either side of the footprint
    pub fn is_failed(&self) -> bool {
        !self.valid
            && self.majority_inside.is_none()
            && self.majority_outside.is_none()
            && self.effective_class.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping_is_symmetric() {
        for code in [10u8, 20, 30, 40, 50, 60, 70, 80, 90, 95, 100, 0, 255] {
            assert_eq!(LandCoverClass::from_code(code).code(), code);
        }
        assert_eq!(LandCoverClass::from_code(42), LandCoverClass::Other(42));
    }

    #[test]
    fn test_natural_classes() {
        assert!(LandCoverClass::Cropland.is_natural());
        assert!(LandCoverClass::MossAndLichen.is_natural());
        assert!(!LandCoverClass::BuiltUp.is_natural());
        assert!(!LandCoverClass::PermanentWaterBodies.is_natural());
        assert!(!LandCoverClass::SnowAndIce.is_natural());
        assert!(!LandCoverClass::Other(0).is_natural());
    }

    #[test]
    fn test_class_serializes_as_code() {
        let verdict = LandCoverVerdict {
            index: 7,
            majority_inside: Some(LandCoverClass::BuiltUp),
            majority_outside: Some(LandCoverClass::Cropland),
            effective_class: Some(LandCoverClass::Cropland),
            valid: true,
        };
        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["majority_inside"], 50);
        assert_eq!(json["effective_class"], 40);

        let failed = serde_json::to_value(LandCoverVerdict::failed(3)).unwrap();
        assert!(failed["effective_class"].is_null());
        assert_eq!(failed["valid"], false);
    }
}
