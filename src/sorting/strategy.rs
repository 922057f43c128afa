use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::target::SortTarget;
use super::zones::ZoneManager;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    ClassBased,
    SizeBased,
    ConfidenceBased,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::ClassBased => "class_based",
            StrategyKind::SizeBased => "size_based",
            StrategyKind::ConfidenceBased => "confidence_based",
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "class_based" => Ok(StrategyKind::ClassBased),
            "size_based" => Ok(StrategyKind::SizeBased),
            "confidence_based" => Ok(StrategyKind::ConfidenceBased),
            other => Err(anyhow!(
                "unknown sorting strategy '{}' (expected class_based, size_based or confidence_based)",
                other
            )),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Objects with bbox area `<= max_area` (pixels²) go to `zone`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SizeBand {
    pub max_area: f32,
    pub zone: String,
}

/// Objects with confidence `>= min_confidence` go to `zone`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBand {
    pub min_confidence: f32,
    pub zone: String,
}

/// Maps an object to a zone name.
///
/// Every variant carries a default zone, so `determine_zone` always returns
/// a name. `validate` checks those names against a `ZoneManager`.
#[derive(Clone, Debug, PartialEq)]
pub enum SortingStrategy {
    ClassBased {
        class_zones: BTreeMap<String, String>,
        default_zone: String,
    },
    /// Bands ascending by `max_area`; first band that fits wins.
    SizeBased {
        bands: Vec<SizeBand>,
        default_zone: String,
    },
    /// Bands descending by `min_confidence`; first band reached wins.
    ConfidenceBased {
        bands: Vec<ConfidenceBand>,
        default_zone: String,
    },
}

impl SortingStrategy {
    pub fn class_based(class_zones: BTreeMap<String, String>, default_zone: &str) -> Self {
        SortingStrategy::ClassBased {
            class_zones,
            default_zone: default_zone.to_string(),
        }
    }

    pub fn size_based(mut bands: Vec<SizeBand>, default_zone: &str) -> Self {
        bands.sort_by(|a, b| a.max_area.total_cmp(&b.max_area));
        SortingStrategy::SizeBased {
            bands,
            default_zone: default_zone.to_string(),
        }
    }

    pub fn confidence_based(mut bands: Vec<ConfidenceBand>, default_zone: &str) -> Self {
        bands.sort_by(|a, b| b.min_confidence.total_cmp(&a.min_confidence));
        SortingStrategy::ConfidenceBased {
            bands,
            default_zone: default_zone.to_string(),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            SortingStrategy::ClassBased { .. } => StrategyKind::ClassBased,
            SortingStrategy::SizeBased { .. } => StrategyKind::SizeBased,
            SortingStrategy::ConfidenceBased { .. } => StrategyKind::ConfidenceBased,
        }
    }

    pub fn default_zone(&self) -> &str {
        match self {
            SortingStrategy::ClassBased { default_zone, .. }
            | SortingStrategy::SizeBased { default_zone, .. }
            | SortingStrategy::ConfidenceBased { default_zone, .. } => default_zone,
        }
    }

    pub fn determine_zone(&self, target: &SortTarget) -> &str {
        match self {
            SortingStrategy::ClassBased {
                class_zones,
                default_zone,
            } => class_zones
                .get(&target.class_name)
                .map(String::as_str)
                .unwrap_or(default_zone),
            SortingStrategy::SizeBased {
                bands,
                default_zone,
            } => {
                let area = target.area();
                bands
                    .iter()
                    .find(|band| area <= band.max_area)
                    .map(|band| band.zone.as_str())
                    .unwrap_or(default_zone)
            }
            SortingStrategy::ConfidenceBased {
                bands,
                default_zone,
            } => bands
                .iter()
                .find(|band| target.confidence >= band.min_confidence)
                .map(|band| band.zone.as_str())
                .unwrap_or(default_zone),
        }
    }

    /// Every zone name this strategy can return.
    pub fn referenced_zones(&self) -> Vec<&str> {
        let mut zones: Vec<&str> = match self {
            SortingStrategy::ClassBased { class_zones, .. } => {
                class_zones.values().map(String::as_str).collect()
            }
            SortingStrategy::SizeBased { bands, .. } => {
                bands.iter().map(|b| b.zone.as_str()).collect()
            }
            SortingStrategy::ConfidenceBased { bands, .. } => {
                bands.iter().map(|b| b.zone.as_str()).collect()
            }
        };
        zones.push(self.default_zone());
        zones.sort_unstable();
        zones.dedup();
        zones
    }

    /// Reject strategies that could name a missing zone or carry bad bands.
    pub fn validate(&self, zones: &ZoneManager) -> Result<()> {
        match self {
            SortingStrategy::ClassBased { .. } => {}
            SortingStrategy::SizeBased { bands, .. } => {
                if bands.is_empty() {
                    return Err(anyhow!("size_based strategy needs at least one band"));
                }
                if let Some(band) = bands
                    .iter()
                    .find(|b| !b.max_area.is_finite() || b.max_area <= 0.0)
                {
                    return Err(anyhow!(
                        "size band for zone '{}' has invalid max_area {}",
                        band.zone,
                        band.max_area
                    ));
                }
            }
            SortingStrategy::ConfidenceBased { bands, .. } => {
                if bands.is_empty() {
                    return Err(anyhow!(
                        "confidence_based strategy needs at least one band"
                    ));
                }
                if let Some(band) = bands
                    .iter()
                    .find(|b| !(0.0..=1.0).contains(&b.min_confidence))
                {
                    return Err(anyhow!(
                        "confidence band for zone '{}' has min_confidence {} outside [0, 1]",
                        band.zone,
                        band.min_confidence
                    ));
                }
            }
        }
        for zone in self.referenced_zones() {
            if !zones.contains(zone) {
                return Err(anyhow!(
                    "{} strategy refers to unknown zone '{}'",
                    self.kind(),
                    zone
                ));
            }
        }
        Ok(())
    }
}
