// Operator commands
//
// Discrete events from the operator (zenoh topic or keyboard). Dispatch is a
// single exhaustive match in `host::machine`.

use crossterm::event::KeyCode;
use serde::{Deserialize, Serialize};

use crate::context::{GainChannel, GainTerm};
use crate::state::SystemState;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    EnableAmplifier,
    DisableAmplifier,
    StartLimitCapture,
    SetLimits,
    ClearLimits,
    MeasureCurrent,
    ZeroEncoder,
    SelectState { state: SystemState },
    ToggleTensionOnly,
    SelectGain { channel: GainChannel, term: GainTerm },
    IncrementGain,
    DecrementGain,
    SetSending { enabled: bool },
    SetReceiving { enabled: bool },
}

/// What a key press means to the host loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyAction {
    Command(Command),
    Quit,
}

/// Map a key to an operator action.
///
/// Gain selection keys change one half of `selected` and keep the other:
/// 1-4 pick the channel, p/i/d pick the term.
pub fn key_to_action(code: KeyCode, selected: (GainChannel, GainTerm)) -> Option<KeyAction> {
    let (channel, term) = selected;
    let select = |channel, term| Some(KeyAction::Command(Command::SelectGain { channel, term }));

    let command = match code {
        KeyCode::Char('q') | KeyCode::Esc => return Some(KeyAction::Quit),

        KeyCode::Char('e') => Command::EnableAmplifier,
        KeyCode::Char(' ') | KeyCode::Char('x') => Command::DisableAmplifier,
        KeyCode::Char('l') => Command::StartLimitCapture,
        KeyCode::Char('s') => Command::SetLimits,
        KeyCode::Char('k') => Command::ClearLimits,
        KeyCode::Char('c') => Command::MeasureCurrent,
        KeyCode::Char('z') => Command::ZeroEncoder,
        KeyCode::Char('t') => Command::ToggleTensionOnly,

        KeyCode::Char('1') => return select(GainChannel::Abduction, term),
        KeyCode::Char('2') => return select(GainChannel::Adduction, term),
        KeyCode::Char('3') => return select(GainChannel::Flexion, term),
        KeyCode::Char('4') => return select(GainChannel::Extension, term),
        KeyCode::Char('p') => return select(channel, GainTerm::Kp),
        KeyCode::Char('i') => return select(channel, GainTerm::Ki),
        KeyCode::Char('d') => return select(channel, GainTerm::Kd),

        KeyCode::Char('+') | KeyCode::Char('=') | KeyCode::Up => Command::IncrementGain,
        KeyCode::Char('-') | KeyCode::Down => Command::DecrementGain,

        _ => return None,
    };
    Some(KeyAction::Command(command))
}
