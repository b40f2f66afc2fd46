//! Ditto core library.
//!
//! Imitation-learning dataset generation and behaviour-cloning rollouts on
//! top of a traffic-simulation engine seam. The binary (`src/main.rs`) is a
//! thin CLI around these components.

pub mod batch;
pub mod config;
pub mod episode;
pub mod logging;
pub mod rl;
pub mod sim;

// --- Re-exports for ergonomic external use ---------------------------------

pub use batch::{BatchRunner, BatchSummary, DatasetMetadata, ScenarioOutcome, ScenarioReport};

pub use config::{Config, ScenarioConfig, ViewMode};

pub use episode::{episode_path, EpisodeError, EpisodeRecord, EpisodeWriter, RolloutRecord};

pub use logging::{init_tracing, JsonlSink, NoopSink, StepRecord, StepSink};

pub use rl::{
    ActionDiscretizer, BehavioralCloningPolicy, DatasetGenerator, DatasetOutcome, Policy,
    PolicyRollout, StateStack,
};

pub use sim::trace::{TraceLoader, TraceSimulation};
pub use sim::{ExpertAction, Scenario, SimError, Simulation, SimulationLoader, VehicleId};
