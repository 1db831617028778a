use crossfire::mpmc;
use crossfire::{MAsyncTx, MRx, TryRecvError, TrySendError, detect_backoff_cfg};
use lifegrid_core::{AgentId, ControlCommand, Simulation, apply_control_command};
use std::io::BufRead;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub type CommandSender = MAsyncTx<ControlCommand>;
pub type CommandReceiver = MRx<ControlCommand>;
pub type CommandDrain = Arc<dyn Fn(&mut Simulation) -> DrainReport + Send + Sync>;
pub type CommandSubmit = Arc<dyn Fn(ControlCommand) -> Submission + Send + Sync>;

/// Errors raised while parsing a textual control command.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("invalid argument `{value}` for `{command}`")]
    InvalidArgument {
        command: &'static str,
        value: String,
    },
}

/// Line-oriented request read from a command source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandLine {
    Control(ControlCommand),
    Quit,
}

/// Fate of a submitted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Queued,
    /// The queue was full; the command was discarded.
    Dropped,
    /// The simulation side has gone away.
    Closed,
}

/// How a command pump finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    Quit,
    EndOfInput,
    BusClosed,
}

/// Result of applying queued commands at a tick boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    /// Every submitter has been dropped, so no further commands can arrive.
    pub disconnected: bool,
}

/// Bounded queue between command sources and the simulation loop. Capacity is at least one.
pub fn create_command_bus(capacity: usize) -> (CommandSender, CommandReceiver) {
    detect_backoff_cfg();
    mpmc::bounded_tx_async_rx_blocking(capacity.max(1))
}

/// Apply every queued command to `sim` in arrival order.
pub fn drain_pending_commands(receiver: &CommandReceiver, sim: &mut Simulation) -> DrainReport {
    let mut report = DrainReport::default();
    loop {
        match receiver.try_recv() {
            Ok(command) => {
                apply_control_command(sim, command);
                report.applied += 1;
            }
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => {
                report.disconnected = true;
                break;
            }
        }
    }
    if report.applied > 0 {
        debug!(
            applied = report.applied,
            tick = sim.tick(),
            running = sim.is_running(),
            "control commands applied"
        );
    }
    report
}

pub fn make_command_drain(receiver: CommandReceiver) -> CommandDrain {
    Arc::new(move |sim: &mut Simulation| drain_pending_commands(&receiver, sim))
}

pub fn make_command_submit(sender: CommandSender) -> CommandSubmit {
    Arc::new(move |command: ControlCommand| match sender.try_send(command) {
        Ok(()) => Submission::Queued,
        Err(TrySendError::Full(command)) => {
            warn!(?command, "command queue full; dropping");
            Submission::Dropped
        }
        Err(TrySendError::Disconnected(command)) => {
            debug!(?command, "command bus closed");
            Submission::Closed
        }
    })
}

/// Parse `start`, `stop`, `step [n]`, `select <id>|none`, `evolve`, `reset`, or `quit`.
pub fn parse_command(line: &str) -> Result<CommandLine, CommandParseError> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err(CommandParseError::Empty);
    };
    let arg = words.next();
    let command = match head.to_ascii_lowercase().as_str() {
        "start" | "run" => ControlCommand::Start,
        "stop" | "pause" => ControlCommand::Stop,
        "step" => {
            let count = match arg {
                None => 1,
                Some(value) => value.parse::<u32>().map_err(|_| {
                    CommandParseError::InvalidArgument {
                        command: "step",
                        value: value.to_owned(),
                    }
                })?,
            };
            ControlCommand::Step(count)
        }
        "select" => match arg {
            None | Some("none") => ControlCommand::Select(None),
            Some(value) => {
                let id = value.parse::<u64>().map_err(|_| CommandParseError::InvalidArgument {
                    command: "select",
                    value: value.to_owned(),
                })?;
                ControlCommand::Select(Some(AgentId(id)))
            }
        },
        "evolve" | "force-evolution" => ControlCommand::ForceEvolution,
        "reset" => ControlCommand::Reset,
        "quit" | "exit" => return Ok(CommandLine::Quit),
        other => return Err(CommandParseError::Unknown(other.to_owned())),
    };
    Ok(CommandLine::Control(command))
}

/// Read commands line by line from `reader` and submit them until `quit`, end of input, or
/// the bus closing. Unparseable lines are logged and skipped.
pub fn pump_commands<R: BufRead>(reader: R, submit: &CommandSubmit) -> PumpOutcome {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "failed to read command input");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_command(&line) {
            Ok(CommandLine::Control(command)) => {
                if submit(command) == Submission::Closed {
                    return PumpOutcome::BusClosed;
                }
            }
            Ok(CommandLine::Quit) => return PumpOutcome::Quit,
            Err(err) => warn!(input = line.trim(), error = %err, "ignoring command"),
        }
    }
    PumpOutcome::EndOfInput
}
