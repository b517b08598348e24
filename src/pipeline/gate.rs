//! Admission rules for user-initiated actions.
//!
//! There is no barge-in: while the assistant is generating or speaking the
//! microphone stays closed.

use crate::pipeline::messages::TurnState;

/// Whether a mic-activate request may start listening.
pub fn can_activate_mic(state: TurnState, has_context: bool) -> bool {
    has_context && state == TurnState::Idle
}

/// Whether typed text may start a turn directly.
pub fn can_submit_text(state: TurnState, has_context: bool) -> bool {
    has_context && state == TurnState::Idle
}

/// Whether a stop-generation request has anything to stop.
pub fn can_stop_generation(state: TurnState) -> bool {
    state == TurnState::Generating
}
