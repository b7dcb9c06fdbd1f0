#![deny(clippy::all)]

mod config;
mod error;
mod input_gate;
mod intervention;
mod layout;
mod session;
mod signal_handler;
mod status;
mod supervisor;
pub mod test_support;
mod watchdog;

pub use config::RunnerConfig;
pub use error::RunnerError;
pub use input_gate::InputGate;
pub use intervention::CliIntervention;
pub use intervention::InterventionService;
pub use intervention::JobInfo;
pub use intervention::register_job;
pub use layout::RunnerLayout;
pub use session::SessionState;
pub use signal_handler::SignalHandler;
pub use status::RunnerState;
pub use status::StatusFile;
pub use status::StatusRecord;
pub use supervisor::Supervisor;
pub use watchdog::Anomaly;
pub use watchdog::Watchdog;

pub type Result<T> = std::result::Result<T, RunnerError>;
