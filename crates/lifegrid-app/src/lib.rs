//! Shared application plumbing for the LifeGrid headless runner.

pub mod command;
pub mod recorder;
pub mod runner;

pub use command::{
    CommandDrain, CommandLine, CommandParseError, CommandReceiver, CommandSender, CommandSubmit,
    DrainReport, PumpOutcome, Submission, create_command_bus, drain_pending_commands,
    make_command_drain, make_command_submit, parse_command, pump_commands,
};
pub use recorder::{JsonlRecorder, RecorderError};
pub use runner::{Cli, RunSummary, load_config, run};
