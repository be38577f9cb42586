//! Treatment engine: the facade the simulation talks to.
//!
//! The engine owns the strategy registry and the slot holding the active
//! treatment strategy. The host calls [`TreatmentEngine::select_therapy`] for
//! every clinical case, [`TreatmentEngine::update_end_of_time_step`] once per
//! simulated day and [`TreatmentEngine::monthly_update`] on the first day of
//! each month.

use tracing::info;

use crate::builder::StrategyBuilder;
use crate::config::{EngineSettings, StrategyParameters};
use crate::context::{Patient, UpdateContext};
use crate::error::{ExecutionError, StrategyResult};
use crate::random::RandomSource;
use crate::registry::StrategyRegistry;
use crate::strategy::{Policy, SlotId, Strategy, StrategyId};
use crate::therapy::{TherapyCatalog, TherapyRef};
use crate::time::Day;

/// A therapy together with the sector that prescribed it.
#[derive(Debug, Clone, PartialEq)]
pub struct TherapyChoice {
    /// Therapy to give.
    pub therapy: TherapyRef,
    /// True when the therapy came from the public sector.
    pub is_public_sector: bool,
}

/// Runtime owner of every strategy of one simulation replicate.
#[derive(Debug, Clone)]
pub struct TreatmentEngine {
    registry: StrategyRegistry,
    settings: EngineSettings,
    active_slot: SlotId,
    recurrent_therapy: Option<TherapyRef>,
}

impl TreatmentEngine {
    /// Build every configured strategy and activate `initial_strategy_id`.
    ///
    /// # Errors
    /// Any configuration problem; nothing is built partially.
    pub fn from_parameters(
        params: &StrategyParameters,
        catalog: &dyn TherapyCatalog,
    ) -> StrategyResult<Self> {
        params.validate()?;
        let mut registry =
            StrategyBuilder::new(catalog, &params.settings).build_registry(&params.strategy_db)?;

        let recurrent_therapy = params
            .recurrent_therapy()
            .map(|id| catalog.resolve(id))
            .transpose()?;

        let active_slot = registry.create_slot(params.initial_strategy_id, Some(0))?;
        let engine = Self {
            registry,
            settings: params.settings.clone(),
            active_slot,
            recurrent_therapy,
        };
        info!(
            strategies = engine.registry.len(),
            initial_strategy_id = params.initial_strategy_id,
            recurrent_therapy_id = params.recurrent_therapy_id,
            "Treatment strategies loaded"
        );
        Ok(engine)
    }

    /// Therapy for a new clinical case.
    ///
    /// # Errors
    /// The person's location or district cannot be served.
    pub fn select_therapy(
        &self,
        person: &dyn Patient,
        rng: &mut dyn RandomSource,
    ) -> Result<TherapyRef, ExecutionError> {
        self.registry
            .select_therapy(self.active_strategy_id()?, person, rng)
    }

    /// Therapy for a clinical case, with the sector that provides it.
    ///
    /// When the active strategy is a nested MFT its first child is the
    /// public sector. A recurrent case drawn into the public sector gets the
    /// configured recurrent therapy instead of the public policy's choice.
    /// Under any other strategy a recurrent case gets the override whenever
    /// one is configured.
    ///
    /// # Errors
    /// Same as [`Self::select_therapy`].
    pub fn select_treatment(
        &self,
        person: &dyn Patient,
        is_recurrence: bool,
        rng: &mut dyn RandomSource,
    ) -> Result<TherapyChoice, ExecutionError> {
        let recurrent = self.recurrent_therapy.as_ref().filter(|_| is_recurrence);
        let active = self.active_strategy()?;
        let (index, children) = match &active.policy {
            Policy::NestedMft(p) => (p.select_index(rng), p.children()),
            Policy::NovelDrugIntroduction(p) => (p.select_index(rng), p.children()),
            _ => {
                return Ok(match recurrent {
                    Some(therapy) => TherapyChoice {
                        therapy: therapy.clone(),
                        is_public_sector: false,
                    },
                    None => TherapyChoice {
                        therapy: self.registry.select_therapy(active.id, person, rng)?,
                        is_public_sector: true,
                    },
                });
            }
        };

        let is_public_sector = index == 0;
        if let (true, Some(therapy)) = (is_public_sector, recurrent) {
            return Ok(TherapyChoice {
                therapy: therapy.clone(),
                is_public_sector: false,
            });
        }
        let child = self.registry.resolve(children[index])?;
        Ok(TherapyChoice {
            therapy: self.registry.select_therapy(child, person, rng)?,
            is_public_sector,
        })
    }

    /// Therapy for a recurrent case. See [`Self::select_treatment`].
    ///
    /// # Errors
    /// Same as [`Self::select_therapy`].
    pub fn select_recurrent_therapy(
        &self,
        person: &dyn Patient,
        rng: &mut dyn RandomSource,
    ) -> Result<TherapyChoice, ExecutionError> {
        self.select_treatment(person, true, rng)
    }

    /// Daily hook for every strategy reachable from the active one.
    ///
    /// # Errors
    /// A broken strategy graph.
    pub fn update_end_of_time_step(&mut self, ctx: &mut UpdateContext<'_>) -> StrategyResult<()> {
        let root = self.active_strategy_id()?;
        self.registry
            .update_end_of_time_step(root, ctx, &self.settings)?;
        Ok(())
    }

    /// Monthly hook for every strategy reachable from the active one.
    ///
    /// # Errors
    /// A broken strategy graph.
    pub fn monthly_update(&mut self, ctx: &mut UpdateContext<'_>) -> StrategyResult<()> {
        let root = self.active_strategy_id()?;
        self.registry.monthly_update(root, ctx, &self.settings)
    }

    /// Switch the active treatment strategy on `day`.
    ///
    /// The new strategy and everything below it are re-anchored at `day`.
    ///
    /// # Errors
    /// `strategy_id` does not exist.
    pub fn set_treatment_strategy(
        &mut self,
        strategy_id: StrategyId,
        day: Day,
    ) -> Result<(), ExecutionError> {
        let previous = self
            .registry
            .replace_mapping(self.active_slot, strategy_id, day)?;
        self.registry.adjust_started_time_point(strategy_id, day)?;
        info!(
            previous_strategy_id = previous,
            strategy_id,
            day,
            "Treatment strategy changed to {}",
            self.registry.strategy(strategy_id)?
        );
        Ok(())
    }

    /// Replace the public-sector child (child 0) of the active nested MFT
    /// with `strategy_id` on `day`, re-anchoring it.
    ///
    /// # Errors
    /// - the active strategy is not a NestedMFT or NestedMFTMultiLocation
    /// - `strategy_id` does not exist, or already contains the active strategy
    pub fn modify_nested_mft(
        &mut self,
        strategy_id: StrategyId,
        day: Day,
    ) -> Result<(), ExecutionError> {
        let parent = self.active_strategy_id()?;
        let previous = self.registry.replace_first_child(parent, strategy_id, day)?;
        info!(
            parent_strategy_id = parent,
            previous_strategy_id = previous,
            strategy_id,
            day,
            "Public sector of nested MFT changed to {}",
            self.registry.strategy(strategy_id)?
        );
        Ok(())
    }

    /// Re-anchor every strategy reachable from the active one at `day`.
    ///
    /// # Errors
    /// A broken strategy graph.
    pub fn adjust_started_time_point(&mut self, day: Day) -> Result<(), ExecutionError> {
        let root = self.active_strategy_id()?;
        self.registry.adjust_started_time_point(root, day)
    }

    /// Id of the active treatment strategy.
    pub fn active_strategy_id(&self) -> Result<StrategyId, ExecutionError> {
        self.registry.active(self.active_slot)
    }

    /// The active treatment strategy.
    pub fn active_strategy(&self) -> Result<&Strategy, ExecutionError> {
        self.registry.strategy(self.active_strategy_id()?)
    }

    /// Look up any strategy, including ones created at runtime.
    pub fn strategy(&self, strategy_id: StrategyId) -> Result<&Strategy, ExecutionError> {
        self.registry.strategy(strategy_id)
    }

    /// Slot holding the active treatment strategy.
    #[must_use]
    pub const fn active_slot(&self) -> SlotId {
        self.active_slot
    }

    /// Every strategy of the run.
    #[must_use]
    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Engine-wide settings in effect.
    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Recurrent-case override, if configured.
    #[must_use]
    pub fn recurrent_therapy(&self) -> Option<&TherapyRef> {
        self.recurrent_therapy.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{InMemoryFeedback, PatientSnapshot};
    use crate::random::ScriptedRandom;
    use crate::therapy::InMemoryTherapyCatalog;
    use crate::time::{Clock, SimulationClock};
    use chrono::NaiveDate;

    const CONFIG: &str = r#"{
        "initial_strategy_id": 0,
        "strategy_db": {
            "0": {"name": "AL-SFT", "type": "SFT", "therapy_ids": [0]},
            "1": {"name": "cycle", "type": "Cycling", "therapy_ids": [1, 2], "cycling_time": 10}
        }
    }"#;

    fn engine(config: &str) -> TreatmentEngine {
        let params = StrategyParameters::from_json_str(config).unwrap();
        TreatmentEngine::from_parameters(&params, &InMemoryTherapyCatalog::with_ids(0..4)).unwrap()
    }

    #[test]
    fn initial_strategy_is_active() {
        let engine = engine(CONFIG);
        assert_eq!(engine.active_strategy_id().unwrap(), 0);
        let mut rng = ScriptedRandom::new(vec![0.5]);
        let therapy = engine
            .select_therapy(&PatientSnapshot::default(), &mut rng)
            .unwrap();
        assert_eq!(therapy.id(), 0);
        assert!(engine.recurrent_therapy().is_none());
    }

    #[test]
    fn switching_strategy_reanchors() {
        let mut engine = engine(CONFIG);
        engine.set_treatment_strategy(1, 100).unwrap();
        assert_eq!(engine.active_strategy_id().unwrap(), 1);
        assert_eq!(engine.registry().slot_history(engine.active_slot()).unwrap().len(), 2);

        let feedback = InMemoryFeedback::new();
        let mut clock = SimulationClock::new(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(), 1000);
        let mut rng = ScriptedRandom::new(vec![0.5]);
        let person = PatientSnapshot::default();

        clock.set_current_day(109);
        engine
            .update_end_of_time_step(&mut UpdateContext::new(&feedback, &mut clock))
            .unwrap();
        assert_eq!(engine.select_therapy(&person, &mut rng).unwrap().id(), 1);

        clock.set_current_day(110);
        engine
            .update_end_of_time_step(&mut UpdateContext::new(&feedback, &mut clock))
            .unwrap();
        assert_eq!(engine.select_therapy(&person, &mut rng).unwrap().id(), 2);
        assert_eq!(clock.current_day(), 110);

        assert!(engine.set_treatment_strategy(9, 200).is_err());
    }

    #[test]
    fn recurrent_override_outside_nested_strategies() {
        let config = CONFIG.replace(
            "\"initial_strategy_id\": 0,",
            "\"initial_strategy_id\": 0, \"recurrent_therapy_id\": 3,",
        );
        let engine = engine(&config);
        let mut rng = ScriptedRandom::new(vec![0.5]);
        let person = PatientSnapshot::default();

        let recurrent = engine.select_recurrent_therapy(&person, &mut rng).unwrap();
        assert_eq!(recurrent.therapy.id(), 3);
        assert!(!recurrent.is_public_sector);

        let first = engine.select_treatment(&person, false, &mut rng).unwrap();
        assert_eq!(first.therapy.id(), 0);
        assert!(first.is_public_sector);
    }

    const PUBLIC_PRIVATE: &str = r#"{
        "initial_strategy_id": 2,
        "recurrent_therapy_id": 3,
        "strategy_db": {
            "0": {"name": "public", "type": "SFT", "therapy_ids": [0]},
            "1": {"name": "private", "type": "SFT", "therapy_ids": [1]},
            "2": {"name": "mix", "type": "NestedMFT", "strategy_ids": [0, 1],
                  "start_distribution": [0.6, 0.4], "peak_distribution": [0.6, 0.4],
                  "peak_after": 0}
        }
    }"#;

    #[test]
    fn recurrent_override_only_in_public_sector() {
        let engine = engine(PUBLIC_PRIVATE);
        let person = PatientSnapshot::default();

        // Drawn into the public sector: the override replaces the public choice.
        let mut rng = ScriptedRandom::new(vec![0.3]);
        let choice = engine.select_recurrent_therapy(&person, &mut rng).unwrap();
        assert_eq!(choice.therapy.id(), 3);
        assert!(!choice.is_public_sector);

        // Drawn into the private sector: no override.
        let mut rng = ScriptedRandom::new(vec![0.9]);
        let choice = engine.select_recurrent_therapy(&person, &mut rng).unwrap();
        assert_eq!(choice.therapy.id(), 1);
        assert!(!choice.is_public_sector);

        // New cases follow the nested draw and report the sector.
        let mut rng = ScriptedRandom::new(vec![0.3]);
        let choice = engine.select_treatment(&person, false, &mut rng).unwrap();
        assert_eq!(choice.therapy.id(), 0);
        assert!(choice.is_public_sector);
    }

    #[test]
    fn public_sector_without_override() {
        let config = PUBLIC_PRIVATE.replace("\"recurrent_therapy_id\": 3,", "");
        let engine = engine(&config);
        let mut rng = ScriptedRandom::new(vec![0.3, 0.9]);
        let person = PatientSnapshot::default();

        let public = engine.select_recurrent_therapy(&person, &mut rng).unwrap();
        assert_eq!(public.therapy.id(), 0);
        assert!(public.is_public_sector);
        let private = engine.select_recurrent_therapy(&person, &mut rng).unwrap();
        assert_eq!(private.therapy.id(), 1);
        assert!(!private.is_public_sector);
    }

    #[test]
    fn unknown_recurrent_therapy_rejected() {
        let config = CONFIG.replace(
            "\"initial_strategy_id\": 0,",
            "\"initial_strategy_id\": 0, \"recurrent_therapy_id\": 30,",
        );
        let params = StrategyParameters::from_json_str(&config).unwrap();
        let err = TreatmentEngine::from_parameters(&params, &InMemoryTherapyCatalog::with_ids(0..4))
            .unwrap_err();
        assert!(err.is_validation());
    }
}
