//! Strategy registry: an id-indexed arena plus versioned slots.
//!
//! Strategies are never removed. A slot is an "active policy pointer" whose
//! binding can be replaced; the full binding history is kept so earlier
//! strategies stay reachable for audit.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::EngineSettings;
use crate::context::{Patient, UpdateContext};
use crate::error::{ExecutionError, StrategyResult, ValidationError};
use crate::random::RandomSource;
use crate::strategy::{ChildRef, Dominant, Policy, Selection, SlotId, Strategy, StrategyId};
use crate::therapy::TherapyRef;
use crate::time::{days_to_next_n_years, Day};

/// One binding of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotBinding {
    /// Strategy the slot pointed at.
    pub strategy_id: StrategyId,
    /// Day the binding was made; `None` for bindings made at build time.
    pub bound_on: Option<Day>,
}

/// Arena of every strategy of a run.
#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    strategies: Vec<Strategy>,
    slots: Vec<Vec<SlotBinding>>,
}

impl StrategyRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a configured strategy. Ids must arrive in order from 0.
    ///
    /// # Errors
    /// The strategy id is not the next free id.
    pub fn insert(&mut self, strategy: Strategy) -> Result<StrategyId, ValidationError> {
        let expected = self.next_id();
        if strategy.id != expected {
            return Err(ValidationError::NonContiguousStrategyIds {
                expected,
                found: strategy.id,
            });
        }
        self.strategies.push(strategy);
        Ok(expected)
    }

    /// Append a strategy created at runtime and return its id.
    pub fn push_policy(&mut self, name: impl Into<String>, policy: Policy) -> StrategyId {
        let id = self.next_id();
        self.strategies.push(Strategy::new(id, name, policy));
        id
    }

    fn next_id(&self) -> StrategyId {
        StrategyId::try_from(self.strategies.len()).unwrap_or(StrategyId::MAX)
    }

    /// Number of strategies, including runtime-created ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Returns true when no strategy is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Look up a strategy.
    #[must_use]
    pub fn get(&self, id: StrategyId) -> Option<&Strategy> {
        self.strategies.get(id as usize)
    }

    /// Look up a strategy, failing when it does not exist.
    pub fn strategy(&self, id: StrategyId) -> Result<&Strategy, ExecutionError> {
        self.get(id)
            .ok_or(ExecutionError::StrategyNotFound { strategy_id: id })
    }

    /// Mutable lookup.
    pub fn strategy_mut(&mut self, id: StrategyId) -> Result<&mut Strategy, ExecutionError> {
        self.strategies
            .get_mut(id as usize)
            .ok_or(ExecutionError::StrategyNotFound { strategy_id: id })
    }

    /// All strategies in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Strategy> {
        self.strategies.iter()
    }

    /// Create a slot bound to `strategy_id`.
    ///
    /// # Errors
    /// The strategy does not exist.
    pub fn create_slot(
        &mut self,
        strategy_id: StrategyId,
        bound_on: Option<Day>,
    ) -> Result<SlotId, ExecutionError> {
        self.strategy(strategy_id)?;
        self.slots.push(vec![SlotBinding {
            strategy_id,
            bound_on,
        }]);
        Ok(self.slots.len() - 1)
    }

    /// Number of slots.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Strategy a slot is currently bound to.
    pub fn active(&self, slot: SlotId) -> Result<StrategyId, ExecutionError> {
        self.slot_history(slot)?
            .last()
            .map(|binding| binding.strategy_id)
            .ok_or(ExecutionError::SlotNotFound { slot })
    }

    /// Every binding a slot has had, oldest first.
    pub fn slot_history(&self, slot: SlotId) -> Result<&[SlotBinding], ExecutionError> {
        self.slots
            .get(slot)
            .map(Vec::as_slice)
            .ok_or(ExecutionError::SlotNotFound { slot })
    }

    /// Re-bind `slot` to `strategy_id`. Returns the previous binding.
    ///
    /// The previously bound strategy stays in the arena.
    pub fn replace_mapping(
        &mut self,
        slot: SlotId,
        strategy_id: StrategyId,
        day: Day,
    ) -> Result<StrategyId, ExecutionError> {
        self.strategy(strategy_id)?;
        let previous = self.active(slot)?;
        self.slots[slot].push(SlotBinding {
            strategy_id,
            bound_on: Some(day),
        });
        Ok(previous)
    }

    /// Re-bind the first child of `parent` to `strategy_id` on `day` and
    /// re-anchor the new child's subtree. Returns the strategy previously in
    /// that position.
    ///
    /// A first child held directly is moved into a new slot first, so the
    /// change shows up in slot history like every other re-binding.
    ///
    /// # Errors
    /// - either strategy does not exist
    /// - `parent` is not a plain nested MFT
    /// - `parent` is reachable from `strategy_id`
    pub fn replace_first_child(
        &mut self,
        parent: StrategyId,
        strategy_id: StrategyId,
        day: Day,
    ) -> Result<StrategyId, ExecutionError> {
        self.strategy(strategy_id)?;
        let parent_strategy = self.strategy(parent)?;
        let kind = parent_strategy.kind();
        if !matches!(
            parent_strategy.policy,
            Policy::NestedMft(_) | Policy::NestedMftMultiLocation(_)
        ) {
            return Err(ExecutionError::NotNestedMft {
                strategy_id: parent,
                kind,
            });
        }
        if self.reaches(strategy_id, parent)? {
            return Err(ExecutionError::WouldCreateCycle {
                strategy_id,
                parent_id: parent,
            });
        }

        let first = parent_strategy.policy.children()[0];
        let slot = match first {
            ChildRef::Slot(slot) => slot,
            ChildRef::Strategy(current) => {
                let slot = self.create_slot(current, None)?;
                if let Some(child) = self.strategy_mut(parent)?.policy.first_child_mut() {
                    *child = ChildRef::Slot(slot);
                }
                slot
            }
        };
        let previous = self.replace_mapping(slot, strategy_id, day)?;
        self.adjust_started_time_point(strategy_id, day)?;
        Ok(previous)
    }

    /// True when `target` is reachable from `from`, novel drug edges
    /// included.
    fn reaches(&self, from: StrategyId, target: StrategyId) -> Result<bool, ExecutionError> {
        let mut seen = vec![false; self.strategies.len()];
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if id == target {
                return Ok(true);
            }
            let strategy = self.strategy(id)?;
            if std::mem::replace(&mut seen[id as usize], true) {
                continue;
            }
            stack.extend(self.edges(strategy)?);
        }
        Ok(false)
    }

    /// Strategy a child edge currently points at.
    pub fn resolve(&self, child: ChildRef) -> Result<StrategyId, ExecutionError> {
        match child {
            ChildRef::Strategy(id) => self.strategy(id).map(|s| s.id),
            ChildRef::Slot(slot) => self.active(slot),
        }
    }

    /// Select a therapy starting at `root`, following delegations.
    ///
    /// # Errors
    /// The person cannot be served, or the graph is broken.
    pub fn select_therapy(
        &self,
        root: StrategyId,
        person: &dyn Patient,
        rng: &mut dyn RandomSource,
    ) -> Result<TherapyRef, ExecutionError> {
        let mut current = root;
        for _ in 0..=self.strategies.len() {
            match self.strategy(current)?.policy.select(person, rng)? {
                Selection::Therapy(therapy) => return Ok(therapy),
                Selection::Delegate(child) => current = self.resolve(child)?,
            }
        }
        Err(ExecutionError::SelectionDidNotTerminate {
            visited: self.strategies.len() + 1,
        })
    }

    /// Dominant therapy of `root`, following first children.
    ///
    /// `None` when the chain ends in a strategy without a dominant therapy.
    pub fn dominant_therapy(&self, root: StrategyId) -> Result<Option<TherapyRef>, ExecutionError> {
        let mut current = root;
        for _ in 0..=self.strategies.len() {
            match self.strategy(current)?.policy.dominant() {
                Dominant::Therapy(therapy) => return Ok(Some(therapy)),
                Dominant::Child(child) => current = self.resolve(child)?,
                Dominant::Unavailable => return Ok(None),
            }
        }
        Err(ExecutionError::SelectionDidNotTerminate {
            visited: self.strategies.len() + 1,
        })
    }

    /// Strategies reachable from `root`, each once, parents before children.
    pub fn reachable_from(&self, root: StrategyId) -> Result<Vec<StrategyId>, ExecutionError> {
        let mut visited = vec![false; self.strategies.len()];
        let mut order = Vec::new();
        self.post_order(root, &mut visited, &mut order)?;
        order.reverse();
        Ok(order)
    }

    fn post_order(
        &self,
        id: StrategyId,
        visited: &mut [bool],
        order: &mut Vec<StrategyId>,
    ) -> Result<(), ExecutionError> {
        let strategy = self.strategy(id)?;
        if visited[id as usize] {
            return Ok(());
        }
        visited[id as usize] = true;
        for child in strategy.policy.children().iter().rev() {
            let child = self.resolve(*child)?;
            self.post_order(child, visited, order)?;
        }
        order.push(id);
        Ok(())
    }

    /// Outgoing edges used for cycle detection.
    fn edges(&self, strategy: &Strategy) -> Result<Vec<StrategyId>, ExecutionError> {
        let mut edges = strategy
            .policy
            .children()
            .iter()
            .map(|child| self.resolve(*child))
            .collect::<Result<Vec<_>, _>>()?;
        if let Policy::NovelDrugIntroduction(p) = &strategy.policy {
            edges.push(p.newly_introduced_strategy_id());
        }
        Ok(edges)
    }

    /// Verify that the strategy graph has no cycle.
    ///
    /// # Errors
    /// - a cycle, reported at a strategy on it
    /// - a dangling child reference
    pub fn ensure_acyclic(&self) -> Result<(), ValidationError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Open,
            Done,
        }

        fn visit(
            registry: &StrategyRegistry,
            id: StrategyId,
            marks: &mut [Mark],
        ) -> Result<(), ValidationError> {
            match marks.get(id as usize) {
                None => return Err(ValidationError::UnknownStrategy { strategy_id: id }),
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Open) => return Err(ValidationError::StrategyCycle { strategy_id: id }),
                Some(Mark::New) => {}
            }
            marks[id as usize] = Mark::Open;
            let strategy = &registry.strategies[id as usize];
            let edges = registry.edges(strategy).map_err(|_| {
                ValidationError::UnknownStrategy { strategy_id: id }
            })?;
            for next in edges {
                visit(registry, next, marks)?;
            }
            marks[id as usize] = Mark::Done;
            Ok(())
        }

        let mut marks = vec![Mark::New; self.strategies.len()];
        for strategy in &self.strategies {
            visit(self, strategy.id, &mut marks)?;
        }
        Ok(())
    }

    /// Daily hook for every strategy reachable from `root`.
    pub fn update_end_of_time_step(
        &mut self,
        root: StrategyId,
        ctx: &UpdateContext<'_>,
        settings: &EngineSettings,
    ) -> Result<(), ExecutionError> {
        for id in self.reachable_from(root)? {
            self.strategy_mut(id)?
                .policy
                .update_end_of_time_step(id, ctx, settings);
        }
        Ok(())
    }

    /// Monthly hook for every strategy reachable from `root`, including the
    /// novel drug introduction check.
    pub fn monthly_update(
        &mut self,
        root: StrategyId,
        ctx: &mut UpdateContext<'_>,
        settings: &EngineSettings,
    ) -> StrategyResult<()> {
        let day = ctx.day();
        for id in self.reachable_from(root)? {
            let strategy = self.strategy_mut(id)?;
            strategy.policy.monthly_update(id, day, settings);
            if matches!(strategy.policy, Policy::NovelDrugIntroduction(_)) {
                self.check_novel_drug(id, ctx, settings)?;
            }
        }
        Ok(())
    }

    /// Re-anchor every strategy reachable from `root` at `day`.
    pub fn adjust_started_time_point(
        &mut self,
        root: StrategyId,
        day: Day,
    ) -> Result<(), ExecutionError> {
        for id in self.reachable_from(root)? {
            self.strategy_mut(id)?.policy.adjust_started_time_point(day);
        }
        Ok(())
    }

    /// Run the one-shot novel drug introduction for strategy `id`.
    fn check_novel_drug(
        &mut self,
        id: StrategyId,
        ctx: &mut UpdateContext<'_>,
        settings: &EngineSettings,
    ) -> StrategyResult<()> {
        let day = ctx.day();
        let Policy::NovelDrugIntroduction(policy) = &self.strategy(id)?.policy else {
            return Ok(());
        };
        if policy.is_switched() {
            return Ok(());
        }
        let slot = policy.public_slot();

        let public = self.active(slot)?;
        let dominant = self.dominant_therapy(public)?;
        let failure_rate = dominant
            .as_ref()
            .map(|therapy| ctx.feedback.failure_rate(therapy.id()));

        let strategy = self.strategy_mut(id)?;
        let Policy::NovelDrugIntroduction(policy) = &mut strategy.policy else {
            return Ok(());
        };
        if dominant.is_none()
            && day > settings.novel_drug_warmup_days
            && policy.note_trigger_unavailable()
        {
            warn!(
                strategy_id = id,
                public_strategy_id = public,
                "Public policy has no dominant therapy; novel drug trigger cannot be evaluated"
            );
        }
        let strategy = &*strategy;
        let Policy::NovelDrugIntroduction(policy) = &strategy.policy else {
            return Ok(());
        };

        let follow_up =
            days_to_next_n_years(ctx.clock.current_date(), settings.novel_drug_follow_up_years);

        if !policy.should_introduce(day, settings.novel_drug_warmup_days, failure_rate) {
            let horizon = day + follow_up;
            if horizon > ctx.clock.total_days() {
                ctx.clock.extend_total_time(horizon);
                info!(
                    strategy_id = id,
                    total_days = horizon,
                    "{}: Extended simulation to keep the follow-up window",
                    ctx.date_string()
                );
            }
            return Ok(());
        }

        let composite = policy.replacement_policy(public, day)?;
        let newly_introduced = policy.newly_introduced_strategy_id();
        let replacement_duration = policy.replacement_duration();
        let name = format!("{}-novel-drug-{}", strategy.name, newly_introduced);

        let new_id = self.push_policy(name, Policy::NestedMft(composite));
        self.replace_mapping(slot, new_id, day)?;
        if let Policy::NovelDrugIntroduction(policy) = &mut self.strategy_mut(id)?.policy {
            policy.mark_switched(day);
        }

        ctx.clock.set_start_of_comparison_period(day);
        let new_total = day + replacement_duration + follow_up;
        if new_total > ctx.clock.total_days() {
            ctx.clock.extend_total_time(new_total);
        }

        info!(
            strategy_id = id,
            newly_introduced_strategy_id = newly_introduced,
            replaced_strategy_id = public,
            replacement_strategy_id = new_id,
            failure_rate = failure_rate.unwrap_or_default(),
            total_days = ctx.clock.total_days(),
            "{}: Switched to novel drug",
            ctx.date_string()
        );
        Ok(())
    }
}
