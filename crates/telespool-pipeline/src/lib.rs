// ABOUTME: Store-and-forward pipeline: fill a persistent log, wait for the session, drain in order.
// ABOUTME: Hosts configuration, the phase controller, and the concrete session adapters.

pub mod config;
pub mod controller;
pub mod drain;
pub mod fill;
pub mod session;
pub mod testing;

pub use config::{ConfigError, DrainMode, PipelineConfig};
pub use controller::{Outcome, Phase, PipelineController, PipelineError, RunReport};
pub use drain::{DrainError, DrainOptions, DrainPipeline, DrainReport};
pub use fill::{FillError, FillOptions, FillReport, SyntheticSource, run_fill};
pub use session::HttpSession;
