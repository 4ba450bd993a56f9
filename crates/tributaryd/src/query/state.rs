//! Request lifecycle states.

use serde::Serialize;
use strum::{Display, IntoStaticStr};

/// Where a request is in its lifecycle.
///
/// Transitions only move forward: once a terminal state is recorded it
/// never changes for the rest of the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum State {
    /// Accepted by the transport, not yet picked up by a servicer.
    #[default]
    Submitted,
    /// Handed to the executor.
    Running,
    /// The executor finished producing rows.
    Completed,
    /// An unrecoverable error ended the request.
    Fatal,
    /// The deadline passed.
    Timeout,
    /// Cancelled administratively.
    Stopped,
    /// The client went away.
    Closed,
}

impl State {
    /// True for states that end a request.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Submitted | Self::Running)
    }

    /// Label rendered in the `status` field. Completed requests report
    /// `success` or `errors` depending on whether any error was recorded.
    #[must_use]
    pub fn label(self, has_errors: bool) -> &'static str {
        match self {
            Self::Completed if has_errors => "errors",
            Self::Completed => "success",
            other => other.into(),
        }
    }
}
