//! Builds typed strategies from [`StrategyInfo`] entries.
//!
//! Every therapy id is resolved against the catalog, every distribution is
//! validated, and the finished graph is checked for cycles before the
//! registry is handed out. Nothing is built lazily.

use std::collections::BTreeMap;

use tracing::{error, info};

use crate::config::{EngineSettings, StrategyInfo};
use crate::error::ValidationError;
use crate::registry::StrategyRegistry;
use crate::strategy::{
    AdaptiveCyclingPolicy, AgeBasedMftPolicy, ChildRef, CyclingPolicy, DistrictMft,
    DistrictMftPolicy, LocationRows, MftPolicy, MultiLocationMftPolicy, NestedMftPolicy,
    NestedMultiLocationPolicy, NovelDrugPolicy, PeakAfter, Policy, RebalancingPolicy, Ramp,
    SftPolicy, SlotId, Strategy, StrategyId, StrategyKind,
};
use crate::therapy::{TherapyCatalog, TherapyRef};

fn required<T>(value: Option<T>, field: &str) -> Result<T, ValidationError> {
    value.ok_or_else(|| ValidationError::missing(field))
}

/// Turns configuration entries into strategies.
pub struct StrategyBuilder<'a> {
    catalog: &'a dyn TherapyCatalog,
    settings: &'a EngineSettings,
    slot_targets: Vec<StrategyId>,
}

impl<'a> StrategyBuilder<'a> {
    /// Create a builder resolving therapies through `catalog`.
    #[must_use]
    pub fn new(catalog: &'a dyn TherapyCatalog, settings: &'a EngineSettings) -> Self {
        Self {
            catalog,
            settings,
            slot_targets: Vec::new(),
        }
    }

    /// Build every entry of `strategy_db` into a registry.
    ///
    /// # Errors
    /// The first invalid strategy, wrapped with its id and name, or a cycle
    /// in the finished graph.
    pub fn build_registry(
        mut self,
        strategy_db: &BTreeMap<StrategyId, StrategyInfo>,
    ) -> Result<StrategyRegistry, ValidationError> {
        let mut registry = StrategyRegistry::new();
        for (&id, info) in strategy_db {
            let strategy = self.build(id, info).map_err(|e| {
                error!(strategy_id = id, error = %e, "Failed to build strategy");
                e.in_strategy(id, info.display_name())
            })?;
            info!(strategy_id = id, kind = %strategy.kind(), "Strategy {}", strategy);
            registry.insert(strategy)?;
        }

        for (expected, target) in self.slot_targets.iter().copied().enumerate() {
            let slot = registry
                .create_slot(target, None)
                .map_err(|_| ValidationError::UnknownStrategy {
                    strategy_id: target,
                })?;
            debug_assert_eq!(slot, expected);
        }

        registry.ensure_acyclic()?;
        Ok(registry)
    }

    /// Build a single strategy.
    ///
    /// Slots needed by novel drug strategies are reserved here and created
    /// by [`Self::build_registry`].
    ///
    /// # Errors
    /// Any configuration problem of this entry.
    pub fn build(&mut self, id: StrategyId, info: &StrategyInfo) -> Result<Strategy, ValidationError> {
        let policy = match info.kind()? {
            StrategyKind::Sft => self.sft(info)?,
            StrategyKind::Cycling => Policy::Cycling(CyclingPolicy::new(
                self.therapies(info)?,
                required(info.cycling_time, "cycling_time")?,
            )?),
            StrategyKind::AdaptiveCycling => Policy::AdaptiveCycling(AdaptiveCyclingPolicy::new(
                self.therapies(info)?,
                required(info.trigger_value, "trigger_value")?,
                required(info.delay_until_actual_trigger, "delay_until_actual_trigger")?,
                required(info.turn_off_days, "turn_off_days")?,
            )?),
            StrategyKind::Mft => Policy::Mft(MftPolicy::new(
                self.therapies(info)?,
                required(info.distribution.as_ref(), "distribution")?.flat("distribution")?,
            )?),
            StrategyKind::MftRebalancing => Policy::MftRebalancing(RebalancingPolicy::new(
                self.therapies(info)?,
                required(info.distribution.as_ref(), "distribution")?.flat("distribution")?,
                required(
                    info.update_duration_after_rebalancing,
                    "update_duration_after_rebalancing",
                )?,
                required(info.delay_until_actual_trigger, "delay_until_actual_trigger")?,
            )?),
            StrategyKind::NestedMft => {
                let children = Self::children(info)?;
                Policy::NestedMft(NestedMftPolicy::new(children, Self::ramp(info)?)?)
            }
            StrategyKind::MftMultiLocation => {
                let therapies = self.therapies(info)?;
                let rows = self.location_rows(info, therapies.len())?;
                Policy::MftMultiLocation(MultiLocationMftPolicy::new(therapies, rows)?)
            }
            StrategyKind::NestedMftMultiLocation => {
                let children = Self::children(info)?;
                let rows = self.location_rows(info, children.len())?;
                Policy::NestedMftMultiLocation(NestedMultiLocationPolicy::new(children, rows)?)
            }
            StrategyKind::NovelDrugIntroduction => self.novel_drug(info)?,
            StrategyKind::DistrictMft => self.district(info)?,
            StrategyKind::MftAgeBased => Policy::MftAgeBased(AgeBasedMftPolicy::new(
                self.therapies(info)?,
                required(info.age_boundaries.clone(), "age_boundaries")?,
            )?),
        };
        Ok(Strategy::new(id, info.display_name(), policy))
    }

    fn therapies(&self, info: &StrategyInfo) -> Result<Vec<TherapyRef>, ValidationError> {
        let ids = required(info.therapy_ids.as_ref(), "therapy_ids")?;
        if ids.is_empty() {
            return Err(ValidationError::missing("therapy_ids"));
        }
        ids.iter().map(|id| self.catalog.resolve(*id)).collect()
    }

    fn children(info: &StrategyInfo) -> Result<Vec<ChildRef>, ValidationError> {
        let ids = required(info.strategy_ids.as_ref(), "strategy_ids")?;
        Ok(ids.iter().copied().map(ChildRef::Strategy).collect())
    }

    fn peak_after(info: &StrategyInfo) -> Result<PeakAfter, ValidationError> {
        PeakAfter::from_config(required(info.peak_after, "peak_after")?)
    }

    fn ramp(info: &StrategyInfo) -> Result<Ramp, ValidationError> {
        let start = required(info.start_distribution.as_ref(), "start_distribution")?
            .flat("start_distribution")?;
        let peak = required(info.peak_distribution.as_ref(), "peak_distribution")?
            .flat("peak_distribution")?;
        Ramp::new(start, peak, Self::peak_after(info)?)
    }

    fn location_rows(
        &self,
        info: &StrategyInfo,
        width: usize,
    ) -> Result<LocationRows, ValidationError> {
        let start = required(info.start_distribution.as_ref(), "start_distribution")?
            .rows("start_distribution")?;
        let peak = required(info.peak_distribution.as_ref(), "peak_distribution")?
            .rows("peak_distribution")?;
        LocationRows::new(
            start,
            peak,
            Self::peak_after(info)?,
            self.settings.number_of_locations,
            width,
        )
    }

    fn sft(&self, info: &StrategyInfo) -> Result<Policy, ValidationError> {
        let mut therapies = self.therapies(info)?;
        if therapies.len() != 1 {
            return Err(ValidationError::LengthMismatch {
                field: "therapy_ids".to_string(),
                expected: 1,
                actual: therapies.len(),
            });
        }
        Ok(Policy::Sft(SftPolicy::new(therapies.remove(0))))
    }

    fn reserve_slot(&mut self, target: StrategyId) -> SlotId {
        self.slot_targets.push(target);
        self.slot_targets.len() - 1
    }

    fn novel_drug(&mut self, info: &StrategyInfo) -> Result<Policy, ValidationError> {
        let mut children = Self::children(info)?;
        let Some(ChildRef::Strategy(public)) = children.first().copied() else {
            return Err(ValidationError::missing("strategy_ids"));
        };
        children[0] = ChildRef::Slot(self.reserve_slot(public));

        let nested = NestedMftPolicy::new(children, Self::ramp(info)?)?;
        let policy = NovelDrugPolicy::new(
            nested,
            required(info.newly_introduced_strategy_id, "newly_introduced_strategy_id")?,
            required(info.tf_threshold, "tf_threshold")?,
            required(info.replacement_fraction, "replacement_fraction")?,
            required(info.replacement_duration, "replacement_duration")?,
        )?;
        Ok(Policy::NovelDrugIntroduction(policy))
    }

    fn district(&self, info: &StrategyInfo) -> Result<Policy, ValidationError> {
        let boundary =
            self.settings
                .district_boundary
                .ok_or_else(|| ValidationError::InvalidSettings {
                    reason: "district_boundary is required by District MFT strategies".to_string(),
                })?;
        let definitions = required(info.definitions.as_ref(), "definitions")?;

        let mut builder = DistrictMftPolicy::builder(boundary);
        for definition in definitions.ordered() {
            let therapies = definition
                .therapy_ids
                .iter()
                .map(|id| self.catalog.resolve(*id))
                .collect::<Result<Vec<_>, _>>()?;
            let mft = DistrictMft::new(therapies, definition.distribution.clone())?;
            builder = builder.definition(mft, definition.district_ids.clone());
        }
        Ok(Policy::DistrictMft(builder.build()?))
    }
}
