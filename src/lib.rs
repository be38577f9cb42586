//! # malasim-strategy - Treatment strategies for malaria simulations
//!
//! This crate decides which antimalarial therapy each clinical case receives
//! in an individual-based malaria simulation, and how that decision evolves
//! over simulated time.
//!
//! ## Core Concepts
//!
//! - **Therapy**: A drug regimen from the host's catalog, referenced by id
//! - **Strategy**: A configured policy (SFT, cycling, MFT, nested, ...) with its runtime state
//! - **Registry**: Arena of every strategy, plus slots whose binding can be replaced at runtime
//! - **TreatmentEngine**: The facade the scheduler calls for selections and daily/monthly hooks
//!
//! ## Usage
//!
//! ```rust,ignore
//! use malasim_strategy::{
//!     InMemoryFeedback, InMemoryTherapyCatalog, PatientSnapshot, SimRandom, SimulationClock,
//!     StrategyParameters, TreatmentEngine, UpdateContext,
//! };
//!
//! let catalog = InMemoryTherapyCatalog::from_path("therapies.json")?;
//! let params = StrategyParameters::from_path("strategies.json")?;
//! let mut engine = TreatmentEngine::from_parameters(&params, &catalog)?;
//!
//! let mut rng = SimRandom::from_seed(42);
//! let therapy = engine.select_therapy(&PatientSnapshot::at_location(3), &mut rng)?;
//!
//! // End of each simulated day
//! let feedback = InMemoryFeedback::new().with_failure_rate(therapy.id(), 0.08);
//! engine.update_end_of_time_step(&mut UpdateContext::new(&feedback, &mut clock))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod context;
pub mod distribution;
pub mod error;
pub mod random;
pub mod therapy;
pub mod time;

// Strategies and their configuration
pub mod config;
pub mod strategy;

// Runtime
pub mod builder;
pub mod engine;
pub mod registry;

// Re-export primary types at crate root for convenience
pub use builder::StrategyBuilder;
pub use config::{
    DistributionSpec, DistrictBoundary, DistrictDefinition, DistrictDefinitions, EngineSettings,
    StrategyInfo, StrategyParameters,
};
pub use context::{
    DistrictId, FeedbackSource, InMemoryFeedback, LocationIndex, Patient, PatientSnapshot,
    UpdateContext,
};
pub use distribution::Distribution;
pub use engine::{TherapyChoice, TreatmentEngine};
pub use error::{ExecutionError, StrategyError, StrategyResult, ValidationError};
pub use random::{RandomSource, ScriptedRandom, SimRandom};
pub use registry::{SlotBinding, StrategyRegistry};
pub use strategy::{
    ChildRef, Dominant, Policy, Selection, SlotId, Strategy, StrategyId, StrategyKind,
};
pub use therapy::{InMemoryTherapyCatalog, Therapy, TherapyCatalog, TherapyId, TherapyRef};
pub use time::{Clock, Day, SimulationClock};
