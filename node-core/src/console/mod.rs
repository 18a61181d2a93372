//! Technician console grammar.
//!
//! Line-oriented commands used by the host emulator (and any wired debug
//! console). The parser composes `winnow` combinators directly over the
//! input line; commands are short and bounded so no token buffer is
//! needed. Configuration mutations are expressed in the same canonical
//! name strings the wireless configuration boundary accepts, and the
//! dispatcher routes them through that boundary so both channels share one
//! validation path.

use core::fmt;

use winnow::ascii::{Caseless, digit1, space1};
use winnow::combinator::{alt, preceded};
use winnow::prelude::*;
use winnow::token::take_while;

use crate::config::{SensorKind, SensorSlot, SupplyVoltage};
use crate::configlink::ModeRequest;

/// Parsed console command.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Print the node status summary.
    Status,
    /// Print the recorded event ring.
    Events,
    /// Print the command summary.
    Help,
    /// Request an operating mode change.
    Mode(ModeRequest),
    /// Enable or disable a sensor slot.
    SensorEnable { slot: SensorSlot, enabled: bool },
    /// Set a slot's sensor kind by canonical name.
    SensorType { slot: SensorSlot, kind: SensorKind },
    /// Set a slot's supply level by canonical name.
    SensorVoltage {
        slot: SensorSlot,
        supply: SupplyVoltage,
    },
    /// Set a slot's sample period in minutes.
    SensorPeriod { slot: SensorSlot, minutes: u16 },
    /// Enable or disable the radio.
    RadioEnable(bool),
    /// Set the radio report period in minutes.
    RadioPeriod { minutes: u16 },
    /// Advance simulated time (emulator only).
    Advance { seconds: u32 },
}

/// Command summary shown by `help`.
pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("status", "status                         - node mode, sensors, radio"),
    ("events", "events                         - recorded event ring"),
    ("mode", "mode <configuration|running>   - request a mode change"),
    (
        "sensor",
        "sensor <1|2> <enable|disable|type NAME|voltage NAME|period MIN>",
    ),
    ("radio", "radio <enable|disable|period MIN>"),
    ("advance", "advance <seconds>              - advance simulated time"),
    ("help", "help                           - this summary"),
];

/// Parse failure with the byte offset the parser gave up at.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ConsoleParseError {
    pub offset: usize,
}

impl fmt::Display for ConsoleParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized command (at column {})", self.offset)
    }
}

fn slot(input: &mut &str) -> ModalResult<SensorSlot> {
    digit1
        .parse_to::<usize>()
        .verify_map(|n| match n {
            1 => Some(SensorSlot::One),
            2 => Some(SensorSlot::Two),
            _ => None,
        })
        .parse_next(input)
}

fn name_token<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    take_while(1.., |c: char| {
        c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'
    })
    .parse_next(input)
}

fn sensor_kind(input: &mut &str) -> ModalResult<SensorKind> {
    name_token.verify_map(SensorKind::from_name).parse_next(input)
}

fn supply_level(input: &mut &str) -> ModalResult<SupplyVoltage> {
    name_token
        .verify_map(SupplyVoltage::from_name)
        .parse_next(input)
}

fn minutes(input: &mut &str) -> ModalResult<u16> {
    digit1.parse_to::<u16>().parse_next(input)
}

fn mode_command(input: &mut &str) -> ModalResult<ConsoleCommand> {
    preceded(
        (Caseless("mode"), space1),
        alt((
            Caseless("configuration").value(ModeRequest::Configuration),
            Caseless("config").value(ModeRequest::Configuration),
            Caseless("running").value(ModeRequest::Running),
        )),
    )
    .map(ConsoleCommand::Mode)
    .parse_next(input)
}

fn sensor_command(input: &mut &str) -> ModalResult<ConsoleCommand> {
    let slot = preceded((Caseless("sensor"), space1), slot).parse_next(input)?;
    let _ = space1.parse_next(input)?;
    alt((
        Caseless("enable").map(move |_| ConsoleCommand::SensorEnable {
            slot,
            enabled: true,
        }),
        Caseless("disable").map(move |_| ConsoleCommand::SensorEnable {
            slot,
            enabled: false,
        }),
        preceded((Caseless("type"), space1), sensor_kind)
            .map(move |kind| ConsoleCommand::SensorType { slot, kind }),
        preceded((Caseless("voltage"), space1), supply_level)
            .map(move |supply| ConsoleCommand::SensorVoltage { slot, supply }),
        preceded((Caseless("period"), space1), minutes)
            .map(move |minutes| ConsoleCommand::SensorPeriod { slot, minutes }),
    ))
    .parse_next(input)
}

fn radio_command(input: &mut &str) -> ModalResult<ConsoleCommand> {
    preceded(
        (Caseless("radio"), space1),
        alt((
            Caseless("enable").value(ConsoleCommand::RadioEnable(true)),
            Caseless("disable").value(ConsoleCommand::RadioEnable(false)),
            preceded((Caseless("period"), space1), minutes)
                .map(|minutes| ConsoleCommand::RadioPeriod { minutes }),
        )),
    )
    .parse_next(input)
}

fn advance_command(input: &mut &str) -> ModalResult<ConsoleCommand> {
    preceded(
        (Caseless("advance"), space1),
        digit1.parse_to::<u32>(),
    )
    .map(|seconds| ConsoleCommand::Advance { seconds })
    .parse_next(input)
}

fn command(input: &mut &str) -> ModalResult<ConsoleCommand> {
    alt((
        Caseless("status").value(ConsoleCommand::Status),
        Caseless("events").value(ConsoleCommand::Events),
        Caseless("help").value(ConsoleCommand::Help),
        mode_command,
        sensor_command,
        radio_command,
        advance_command,
    ))
    .parse_next(input)
}

/// Parses one console line into a command.
pub fn parse_line(line: &str) -> Result<ConsoleCommand, ConsoleParseError> {
    command
        .parse(line.trim())
        .map_err(|error| ConsoleParseError {
            offset: error.offset(),
        })
}
