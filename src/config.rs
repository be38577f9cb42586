//! Declarative strategy configuration.
//!
//! The JSON layout mirrors the simulation's input files: a `strategy_db` map
//! keyed by strategy id, the id of the initial treatment strategy, and a few
//! engine-wide settings.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::context::DistrictId;
use crate::distribution::{Distribution, DEFAULT_FAILURE_RATE_FLOOR};
use crate::error::{StrategyResult, ValidationError};
use crate::strategy::{StrategyId, StrategyKind};
use crate::therapy::TherapyId;
use crate::time::Day;

/// Default annual inflation used by `peak_after: -1` ramps.
pub const DEFAULT_INFLATION_FACTOR: f64 = 0.01;

/// Days that must pass before a novel drug may be introduced.
pub const DEFAULT_NOVEL_DRUG_WARMUP_DAYS: Day = 3000;

/// Years the run is kept going after a novel drug introduction.
pub const DEFAULT_NOVEL_DRUG_FOLLOW_UP_YEARS: u32 = 10;

/// `recurrent_therapy_id` value meaning "no override".
pub const NO_RECURRENT_THERAPY: i64 = -1;

/// Known district id range, supplied by the spatial model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistrictBoundary {
    /// Smallest valid district id (0 or 1 depending on the raster).
    pub min_unit_id: DistrictId,
    /// Largest valid district id.
    pub max_unit_id: DistrictId,
    /// Number of districts that must receive a policy.
    pub unit_count: usize,
}

/// Engine-wide runtime settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Number of locations for location-keyed strategies.
    pub number_of_locations: usize,

    /// Annual inflation applied monthly by inflation-mode ramps.
    pub inflation_factor: f64,

    /// Failure rates below this value count as this value when rebalancing.
    pub failure_rate_floor: f64,

    /// A novel drug is only introduced after this day.
    pub novel_drug_warmup_days: Day,

    /// Calendar years of follow-up guaranteed around a novel drug introduction.
    pub novel_drug_follow_up_years: u32,

    /// District range; required when a District MFT strategy is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub district_boundary: Option<DistrictBoundary>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            number_of_locations: 1,
            inflation_factor: DEFAULT_INFLATION_FACTOR,
            failure_rate_floor: DEFAULT_FAILURE_RATE_FLOOR,
            novel_drug_warmup_days: DEFAULT_NOVEL_DRUG_WARMUP_DAYS,
            novel_drug_follow_up_years: DEFAULT_NOVEL_DRUG_FOLLOW_UP_YEARS,
            district_boundary: None,
        }
    }
}

impl EngineSettings {
    /// Check every setting.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: String| Err(ValidationError::InvalidSettings { reason });

        if self.number_of_locations == 0 {
            return invalid("number_of_locations must be at least 1".to_string());
        }
        if !self.inflation_factor.is_finite() || self.inflation_factor < 0.0 {
            return invalid(format!(
                "inflation_factor must be a non-negative number, got {}",
                self.inflation_factor
            ));
        }
        if !(self.failure_rate_floor > 0.0 && self.failure_rate_floor <= 1.0) {
            return invalid(format!(
                "failure_rate_floor must be in (0, 1], got {}",
                self.failure_rate_floor
            ));
        }
        if self.novel_drug_warmup_days < 0 {
            return invalid(format!(
                "novel_drug_warmup_days cannot be negative, got {}",
                self.novel_drug_warmup_days
            ));
        }
        if let Some(boundary) = self.district_boundary {
            if boundary.min_unit_id > boundary.max_unit_id {
                return invalid(format!(
                    "district min_unit_id {} is greater than max_unit_id {}",
                    boundary.min_unit_id, boundary.max_unit_id
                ));
            }
            let span = i64::from(boundary.max_unit_id) - i64::from(boundary.min_unit_id) + 1;
            if i64::try_from(boundary.unit_count).map_or(true, |count| count > span) {
                return invalid(format!(
                    "district unit_count {} does not fit in [{}, {}]",
                    boundary.unit_count, boundary.min_unit_id, boundary.max_unit_id
                ));
            }
        }
        Ok(())
    }
}

/// A distribution as written in configuration: one row, or one row per location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DistributionSpec {
    /// `[w0, w1, ...]`
    Flat(Vec<f64>),
    /// `[[w0, w1, ...], ...]`, one row per location.
    ByLocation(Vec<Vec<f64>>),
}

impl DistributionSpec {
    /// Interpret as a single distribution.
    ///
    /// # Errors
    /// Invalid weights, or more than one row.
    pub fn flat(&self, field: &str) -> Result<Distribution, ValidationError> {
        match self {
            Self::Flat(weights) => Distribution::new(field, weights.clone()),
            Self::ByLocation(rows) if rows.len() == 1 => Distribution::new(field, rows[0].clone()),
            Self::ByLocation(rows) => Err(ValidationError::InvalidDistribution {
                field: field.to_string(),
                reason: format!("expected a single row, got {} rows", rows.len()),
            }),
        }
    }

    /// Interpret as per-location rows. A flat list is a single row.
    ///
    /// # Errors
    /// Invalid weights in any row.
    pub fn rows(&self, field: &str) -> Result<Vec<Distribution>, ValidationError> {
        match self {
            Self::Flat(weights) => Ok(vec![Distribution::new(field, weights.clone())?]),
            Self::ByLocation(rows) => rows
                .iter()
                .enumerate()
                .map(|(loc, row)| Distribution::new(&format!("{field}[{loc}]"), row.clone()))
                .collect(),
        }
    }
}

/// One District MFT sub-policy and the districts it covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistrictDefinition {
    /// Therapies of the sub-policy.
    pub therapy_ids: Vec<TherapyId>,
    /// Strictly positive weights, index-aligned with `therapy_ids`.
    pub distribution: Vec<f64>,
    /// Districts using this sub-policy.
    pub district_ids: Vec<DistrictId>,
}

/// District definitions, as a list or as a map keyed `"0"`, `"1"`, ...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DistrictDefinitions {
    /// Plain array.
    List(Vec<DistrictDefinition>),
    /// Object keyed by definition index.
    Keyed(BTreeMap<String, DistrictDefinition>),
}

impl DistrictDefinitions {
    /// Definitions in order. Keyed definitions sort numerically by key.
    #[must_use]
    pub fn ordered(&self) -> Vec<&DistrictDefinition> {
        match self {
            Self::List(list) => list.iter().collect(),
            Self::Keyed(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                let numeric = |key: &str| key.parse::<u64>().unwrap_or(u64::MAX);
                entries.sort_by(|(a, _), (b, _)| numeric(a).cmp(&numeric(b)).then_with(|| a.cmp(b)));
                entries.into_iter().map(|(_, definition)| definition).collect()
            }
        }
    }
}

/// Configuration of one strategy.
///
/// All fields are optional at the parsing level; the builder reports the
/// ones required by the resolved type as missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyInfo {
    /// Human-readable name used in logs and display strings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Strategy type tag, e.g. `"NestedMFT"`.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub strategy_type: Option<String>,

    /// Therapies of leaf types, index-aligned with the distribution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub therapy_ids: Option<Vec<TherapyId>>,

    /// Days between switches of a cycling strategy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycling_time: Option<Day>,

    /// Failure rate above which adaptive cycling schedules a switch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_value: Option<f64>,

    /// Days between a trigger and the change taking effect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_until_actual_trigger: Option<Day>,

    /// Cooldown after a switch before adaptive cycling re-triggers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_off_days: Option<Day>,

    /// Fixed distribution of MFT types.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distribution: Option<DistributionSpec>,

    /// Distribution at the start of a ramp, flat or one row per location.
    #[serde(
        alias = "start_distribution_by_location",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_distribution: Option<DistributionSpec>,

    /// Distribution at the end of a ramp, flat or one row per location.
    #[serde(
        alias = "peak_distribution_by_location",
        skip_serializing_if = "Option::is_none"
    )]
    pub peak_distribution: Option<DistributionSpec>,

    /// Days to reach the peak, or `-1` for inflation mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_after: Option<i64>,

    /// Days between rebalancing recomputations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_duration_after_rebalancing: Option<Day>,

    /// Child strategies of composite types.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy_ids: Option<Vec<StrategyId>>,

    /// Per-district MFTs of a District MFT.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definitions: Option<DistrictDefinitions>,

    /// Upper age bounds, in years, of every bracket but the last.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_boundaries: Option<Vec<f64>>,

    /// Strategy phased into the public sector by a novel drug introduction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newly_introduced_strategy_id: Option<StrategyId>,

    /// Public failure rate that triggers the novel drug introduction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tf_threshold: Option<f64>,

    /// Share of the novel drug once the replacement ramp ends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement_fraction: Option<f64>,

    /// Length of the replacement ramp in days.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement_duration: Option<Day>,
}

impl StrategyInfo {
    /// Resolve the `type` tag.
    ///
    /// # Errors
    /// Missing or unknown tag.
    pub fn kind(&self) -> Result<StrategyKind, ValidationError> {
        self.strategy_type
            .as_deref()
            .ok_or_else(|| ValidationError::missing("type"))?
            .parse()
    }

    /// Display name, empty when not configured.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    /// Strategy ids this entry refers to, including the novel drug target.
    #[must_use]
    pub fn referenced_strategies(&self) -> Vec<StrategyId> {
        let mut ids = self.strategy_ids.clone().unwrap_or_default();
        ids.extend(self.newly_introduced_strategy_id);
        ids
    }
}

/// Full treatment strategy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParameters {
    /// Strategies keyed by id. Ids must be contiguous from 0.
    pub strategy_db: BTreeMap<StrategyId, StrategyInfo>,

    /// Strategy in effect from day 0.
    pub initial_strategy_id: StrategyId,

    /// Therapy given to recurrent cases, or `-1` to use the active strategy.
    #[serde(default = "no_recurrent_therapy")]
    pub recurrent_therapy_id: i64,

    /// Engine-wide settings.
    #[serde(default)]
    pub settings: EngineSettings,
}

fn no_recurrent_therapy() -> i64 {
    NO_RECURRENT_THERAPY
}

impl StrategyParameters {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> StrategyResult<Self> {
        let params: Self = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> StrategyResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Structural checks that do not need the therapy catalog.
    ///
    /// # Errors
    /// - invalid settings
    /// - strategy ids not contiguous from 0
    /// - `initial_strategy_id` or a referenced strategy not configured
    /// - `recurrent_therapy_id` below `-1`
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.settings.validate()?;

        for (expected, found) in (0..).zip(self.strategy_db.keys()) {
            if *found != expected {
                return Err(ValidationError::NonContiguousStrategyIds {
                    expected,
                    found: *found,
                });
            }
        }

        if !self.strategy_db.contains_key(&self.initial_strategy_id) {
            return Err(ValidationError::UnknownStrategy {
                strategy_id: self.initial_strategy_id,
            });
        }

        for (id, info) in &self.strategy_db {
            for referenced in info.referenced_strategies() {
                if !self.strategy_db.contains_key(&referenced) {
                    return Err(ValidationError::UnknownStrategy {
                        strategy_id: referenced,
                    }
                    .in_strategy(*id, info.display_name()));
                }
            }
        }

        if self.recurrent_therapy_id < NO_RECURRENT_THERAPY {
            return Err(ValidationError::InvalidValue {
                field: "recurrent_therapy_id".to_string(),
                reason: format!(
                    "expected a therapy id or -1, got {}",
                    self.recurrent_therapy_id
                ),
            });
        }
        Ok(())
    }

    /// The recurrent-therapy override, if configured.
    #[must_use]
    pub fn recurrent_therapy(&self) -> Option<TherapyId> {
        TherapyId::try_from(self.recurrent_therapy_id).ok()
    }
}
