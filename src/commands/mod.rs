// Command implementations split by subcommand.
pub mod aggregate;
pub mod oneshot;
pub mod run;

pub use aggregate::run_aggregate;
pub use oneshot::{run_dial, run_read};
pub use run::run_service;
