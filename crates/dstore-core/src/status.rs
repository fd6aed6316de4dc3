//! Command status lifecycle.
//!
//! A status node's value moves `start -> working -> almost done -> done`.
//! Completion takes two round trips: the first incoming `done` only brings
//! a status to `almost done`, and a further `done` completes it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// State of a command status node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusState {
    Start,
    Working,
    AlmostDone,
    Done,
    Cancelled,
    /// Set locally when a wait gives up.
    Timeout,
}

impl StatusState {
    pub const fn as_str(self) -> &'static str {
        match self {
            StatusState::Start => "start",
            StatusState::Working => "working",
            StatusState::AlmostDone => "almost done",
            StatusState::Done => "done",
            StatusState::Cancelled => "cancelled",
            StatusState::Timeout => "timeout",
        }
    }

    /// Whether no further transition is expected.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StatusState::Done | StatusState::Cancelled | StatusState::Timeout
        )
    }

    /// State after an incoming record reports `incoming` for a status whose
    /// local state is `self`.
    pub fn reconcile(self, incoming: StatusState) -> StatusState {
        match (self, incoming) {
            (StatusState::AlmostDone | StatusState::Done, StatusState::Done) => StatusState::Done,
            (_, StatusState::Done) => StatusState::AlmostDone,
            (_, other) => other,
        }
    }
}

impl fmt::Display for StatusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(StatusState::Start),
            "working" => Ok(StatusState::Working),
            "almost done" => Ok(StatusState::AlmostDone),
            "done" => Ok(StatusState::Done),
            "cancelled" => Ok(StatusState::Cancelled),
            "timeout" => Ok(StatusState::Timeout),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}
