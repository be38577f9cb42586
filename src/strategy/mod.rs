//! Treatment strategies: the policies deciding which therapy a person gets.
//!
//! The set of policies is closed: [`Policy`] is an enum decided once, at build
//! time, from the configuration's `type` tag. Composite policies never own
//! their children. They hold [`ChildRef`]s resolved through the
//! [`StrategyRegistry`](crate::registry::StrategyRegistry).

mod adaptive_cycling;
mod age_based;
mod cycling;
mod district;
mod mft;
mod multi_location;
mod nested;
mod novel_drug;
mod rebalancing;
mod sft;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::EngineSettings;
use crate::context::{Patient, UpdateContext};
use crate::error::{ExecutionError, ValidationError};
use crate::random::RandomSource;
use crate::therapy::TherapyRef;
use crate::time::Day;

pub use adaptive_cycling::AdaptiveCyclingPolicy;
pub use age_based::AgeBasedMftPolicy;
pub use cycling::CyclingPolicy;
pub use district::{DistrictMft, DistrictMftBuilder, DistrictMftPolicy};
pub use mft::MftPolicy;
pub use multi_location::{LocationRows, MultiLocationMftPolicy, NestedMultiLocationPolicy};
pub use nested::{NestedMftPolicy, PeakAfter, Ramp};
pub use novel_drug::NovelDrugPolicy;
pub use rebalancing::RebalancingPolicy;
pub use sft::SftPolicy;

/// Stable strategy identifier, unique for the run.
pub type StrategyId = u32;

/// Index of a versioned registry slot.
pub type SlotId = usize;

/// Strategy type tag as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    #[serde(rename = "SFT")]
    Sft,
    #[serde(rename = "Cycling")]
    Cycling,
    #[serde(rename = "AdaptiveCycling")]
    AdaptiveCycling,
    #[serde(rename = "MFT")]
    Mft,
    #[serde(rename = "MFTRebalancing")]
    MftRebalancing,
    #[serde(rename = "NestedMFT")]
    NestedMft,
    #[serde(rename = "MFTMultiLocation")]
    MftMultiLocation,
    #[serde(rename = "NestedMFTMultiLocation")]
    NestedMftMultiLocation,
    #[serde(rename = "NovelDrugIntroduction")]
    NovelDrugIntroduction,
    #[serde(rename = "DistrictMFT")]
    DistrictMft,
    #[serde(rename = "MFTAgeBased")]
    MftAgeBased,
}

impl StrategyKind {
    /// Every kind, in configuration order.
    pub const ALL: [Self; 11] = [
        Self::Sft,
        Self::Cycling,
        Self::AdaptiveCycling,
        Self::Mft,
        Self::MftRebalancing,
        Self::NestedMft,
        Self::MftMultiLocation,
        Self::NestedMftMultiLocation,
        Self::NovelDrugIntroduction,
        Self::DistrictMft,
        Self::MftAgeBased,
    ];

    /// The configuration tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sft => "SFT",
            Self::Cycling => "Cycling",
            Self::AdaptiveCycling => "AdaptiveCycling",
            Self::Mft => "MFT",
            Self::MftRebalancing => "MFTRebalancing",
            Self::NestedMft => "NestedMFT",
            Self::MftMultiLocation => "MFTMultiLocation",
            Self::NestedMftMultiLocation => "NestedMFTMultiLocation",
            Self::NovelDrugIntroduction => "NovelDrugIntroduction",
            Self::DistrictMft => "DistrictMFT",
            Self::MftAgeBased => "MFTAgeBased",
        }
    }

    /// Returns true for kinds that delegate to child strategies.
    #[must_use]
    pub const fn is_composite(self) -> bool {
        matches!(
            self,
            Self::NestedMft | Self::NestedMftMultiLocation | Self::NovelDrugIntroduction
        )
    }
}

impl FromStr for StrategyKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownStrategyType {
                type_tag: s.to_string(),
            })
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edge from a composite strategy to one of its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildRef {
    /// A fixed strategy.
    Strategy(StrategyId),
    /// Whatever strategy a registry slot is currently bound to.
    Slot(SlotId),
}

impl fmt::Display for ChildRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strategy(id) => write!(f, "strategy {id}"),
            Self::Slot(slot) => write!(f, "slot {slot}"),
        }
    }
}

/// Outcome of one selection step.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Final answer.
    Therapy(TherapyRef),
    /// Continue the selection in a child strategy.
    Delegate(ChildRef),
}

/// Where the dominant therapy of a strategy comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum Dominant {
    /// The strategy names it directly.
    Therapy(TherapyRef),
    /// Ask the first child.
    Child(ChildRef),
    /// The strategy has no single dominant therapy.
    Unavailable,
}

/// Kind-specific state of a strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum Policy {
    /// Single first-line therapy.
    Sft(SftPolicy),
    /// Fixed-period rotation through therapies.
    Cycling(CyclingPolicy),
    /// Rotation triggered by the current therapy's failure rate.
    AdaptiveCycling(AdaptiveCyclingPolicy),
    /// Fixed weighted mix of therapies.
    Mft(MftPolicy),
    /// Weighted mix periodically rebalanced from failure rates.
    MftRebalancing(RebalancingPolicy),
    /// Ramping mix of child strategies.
    NestedMft(NestedMftPolicy),
    /// Ramping mix of therapies, one row per location.
    MftMultiLocation(MultiLocationMftPolicy),
    /// Ramping mix of child strategies, one row per location.
    NestedMftMultiLocation(NestedMultiLocationPolicy),
    /// Nested MFT that phases in a novel drug once.
    NovelDrugIntroduction(NovelDrugPolicy),
    /// One MFT per administrative district.
    DistrictMft(DistrictMftPolicy),
    /// Therapy chosen by the person's age bracket.
    MftAgeBased(AgeBasedMftPolicy),
}

impl Policy {
    /// Kind tag of this policy.
    #[must_use]
    pub const fn kind(&self) -> StrategyKind {
        match self {
            Self::Sft(_) => StrategyKind::Sft,
            Self::Cycling(_) => StrategyKind::Cycling,
            Self::AdaptiveCycling(_) => StrategyKind::AdaptiveCycling,
            Self::Mft(_) => StrategyKind::Mft,
            Self::MftRebalancing(_) => StrategyKind::MftRebalancing,
            Self::NestedMft(_) => StrategyKind::NestedMft,
            Self::MftMultiLocation(_) => StrategyKind::MftMultiLocation,
            Self::NestedMftMultiLocation(_) => StrategyKind::NestedMftMultiLocation,
            Self::NovelDrugIntroduction(_) => StrategyKind::NovelDrugIntroduction,
            Self::DistrictMft(_) => StrategyKind::DistrictMft,
            Self::MftAgeBased(_) => StrategyKind::MftAgeBased,
        }
    }

    /// One selection step for `person`.
    ///
    /// # Errors
    /// The person's location or district cannot be served.
    pub fn select(
        &self,
        person: &dyn Patient,
        rng: &mut dyn RandomSource,
    ) -> Result<Selection, ExecutionError> {
        let selection = match self {
            Self::Sft(p) => Selection::Therapy(p.therapy().clone()),
            Self::Cycling(p) => Selection::Therapy(p.current_therapy().clone()),
            Self::AdaptiveCycling(p) => Selection::Therapy(p.current_therapy().clone()),
            Self::Mft(p) => Selection::Therapy(p.select(rng).clone()),
            Self::MftRebalancing(p) => Selection::Therapy(p.select(rng).clone()),
            Self::MftMultiLocation(p) => {
                Selection::Therapy(p.select(person.location(), rng)?.clone())
            }
            Self::DistrictMft(p) => Selection::Therapy(p.select(person.district(), rng)?.clone()),
            Self::MftAgeBased(p) => Selection::Therapy(p.select(person.age_in_years()).clone()),
            Self::NestedMft(p) => Selection::Delegate(p.select(rng)),
            Self::NestedMftMultiLocation(p) => {
                Selection::Delegate(p.select(person.location(), rng)?)
            }
            Self::NovelDrugIntroduction(p) => Selection::Delegate(p.select(rng)),
        };
        Ok(selection)
    }

    /// Child edges; empty for leaf policies.
    #[must_use]
    pub fn children(&self) -> &[ChildRef] {
        match self {
            Self::NestedMft(p) => p.children(),
            Self::NestedMftMultiLocation(p) => p.children(),
            Self::NovelDrugIntroduction(p) => p.children(),
            _ => &[],
        }
    }

    /// First child of the plain nested kinds, the one a modification
    /// re-binds.
    pub(crate) fn first_child_mut(&mut self) -> Option<&mut ChildRef> {
        match self {
            Self::NestedMft(p) => Some(p.first_child_mut()),
            Self::NestedMftMultiLocation(p) => Some(p.first_child_mut()),
            _ => None,
        }
    }

    /// Therapies named directly by this policy.
    #[must_use]
    pub fn therapies(&self) -> Vec<TherapyRef> {
        match self {
            Self::Sft(p) => vec![p.therapy().clone()],
            Self::Cycling(p) => p.therapies().to_vec(),
            Self::AdaptiveCycling(p) => p.therapies().to_vec(),
            Self::Mft(p) => p.therapies().to_vec(),
            Self::MftRebalancing(p) => p.therapies().to_vec(),
            Self::MftMultiLocation(p) => p.therapies().to_vec(),
            Self::MftAgeBased(p) => p.therapies().to_vec(),
            Self::DistrictMft(p) => p
                .definitions()
                .iter()
                .flat_map(|mft| mft.therapies().iter().cloned())
                .collect(),
            Self::NestedMft(_) | Self::NestedMftMultiLocation(_) | Self::NovelDrugIntroduction(_) => {
                Vec::new()
            }
        }
    }

    /// The therapy that best represents this policy today.
    #[must_use]
    pub fn dominant(&self) -> Dominant {
        match self {
            Self::Sft(p) => Dominant::Therapy(p.therapy().clone()),
            Self::Cycling(p) => Dominant::Therapy(p.current_therapy().clone()),
            Self::AdaptiveCycling(p) => Dominant::Therapy(p.current_therapy().clone()),
            Self::Mft(p) => Dominant::Therapy(p.therapies()[0].clone()),
            Self::MftRebalancing(p) => Dominant::Therapy(p.therapies()[0].clone()),
            Self::MftMultiLocation(p) => Dominant::Therapy(p.therapies()[0].clone()),
            Self::MftAgeBased(p) => Dominant::Therapy(p.therapies()[0].clone()),
            Self::NestedMft(_) | Self::NestedMftMultiLocation(_) | Self::NovelDrugIntroduction(_) => {
                self.children()
                    .first()
                    .map_or(Dominant::Unavailable, |child| Dominant::Child(*child))
            }
            Self::DistrictMft(_) => Dominant::Unavailable,
        }
    }

    /// Daily hook.
    pub fn update_end_of_time_step(
        &mut self,
        id: StrategyId,
        ctx: &UpdateContext<'_>,
        settings: &EngineSettings,
    ) {
        let day = ctx.day();
        match self {
            Self::Cycling(p) => {
                p.update_end_of_time_step(id, day, &ctx.date_string());
            }
            Self::AdaptiveCycling(p) => {
                p.update_end_of_time_step(id, day, ctx.feedback, &ctx.date_string());
            }
            Self::MftRebalancing(p) => p.update_end_of_time_step(
                id,
                day,
                ctx.feedback,
                settings.failure_rate_floor,
                &ctx.date_string(),
            ),
            _ => {}
        }
    }

    /// Monthly hook. Novel drug introduction itself is driven by the registry;
    /// this only advances ramps.
    pub fn monthly_update(&mut self, id: StrategyId, day: Day, settings: &EngineSettings) {
        let inflation = settings.inflation_factor;
        match self {
            Self::NestedMft(p) => p.monthly_update(id, day, inflation),
            Self::MftMultiLocation(p) => p.monthly_update(id, day, inflation),
            Self::NestedMftMultiLocation(p) => p.monthly_update(id, day, inflation),
            Self::NovelDrugIntroduction(p) => p.monthly_update(id, day, inflation),
            _ => {}
        }
    }

    /// Re-anchor time-relative state at `day`.
    pub fn adjust_started_time_point(&mut self, day: Day) {
        match self {
            Self::Cycling(p) => p.adjust_started_time_point(day),
            Self::AdaptiveCycling(p) => p.adjust_started_time_point(),
            Self::MftRebalancing(p) => p.adjust_started_time_point(day),
            Self::NestedMft(p) => p.adjust_started_time_point(day),
            Self::MftMultiLocation(p) => p.adjust_started_time_point(day),
            Self::NestedMftMultiLocation(p) => p.adjust_started_time_point(day),
            Self::NovelDrugIntroduction(p) => p.adjust_started_time_point(day),
            Self::Sft(_) | Self::Mft(_) | Self::DistrictMft(_) | Self::MftAgeBased(_) => {}
        }
    }
}

/// A configured strategy: identity plus policy state.
#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    /// Registry id.
    pub id: StrategyId,
    /// Configured name; runtime-created strategies get a derived one.
    pub name: String,
    /// Policy and its runtime state.
    pub policy: Policy,
}

impl Strategy {
    /// Creates a strategy.
    #[must_use]
    pub fn new(id: StrategyId, name: impl Into<String>, policy: Policy) -> Self {
        Self {
            id,
            name: name.into(),
            policy,
        }
    }

    /// Kind tag of the policy.
    #[must_use]
    pub const fn kind(&self) -> StrategyKind {
        self.policy.kind()
    }
}

fn join<T: fmt::Display>(items: impl IntoIterator<Item = T>, sep: &str) -> String {
    items
        .into_iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(sep)
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.id, self.name)?;
        match &self.policy {
            Policy::Sft(p) => write!(f, "-{}", p.therapy()),
            Policy::Cycling(p) => write!(f, "-{}", join(p.therapies(), ",")),
            Policy::AdaptiveCycling(p) => write!(f, "-{}", join(p.therapies(), ",")),
            Policy::Mft(p) => write!(
                f,
                "-{}-{}",
                join(p.therapies(), ","),
                join(p.distribution().weights(), ",")
            ),
            Policy::MftRebalancing(p) => write!(
                f,
                "-{}-{}-{}",
                join(p.therapies(), ","),
                join(p.distribution().weights(), ","),
                p.update_duration_after_rebalancing()
            ),
            Policy::MftMultiLocation(p) => write!(f, "-{}", join(p.therapies(), "::")),
            Policy::MftAgeBased(p) => write!(
                f,
                "-{}-{}",
                join(p.therapies(), ","),
                join(p.age_boundaries(), ",")
            ),
            Policy::NestedMft(_)
            | Policy::NestedMftMultiLocation(_)
            | Policy::NovelDrugIntroduction(_)
            | Policy::DistrictMft(_) => Ok(()),
        }
    }
}
