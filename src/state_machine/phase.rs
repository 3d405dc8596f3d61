use std::fmt;

use serde::{Deserialize, Serialize};

/// The four phases of the node lifecycle.
///
/// A node flows through: NETWORK_CONNECT → OTA_CHECK → BROKER_CONNECT → PUBLISH,
/// then stays in PUBLISH until a link drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    NetworkConnect,
    OtaCheck,
    BrokerConnect,
    Publish,
}

impl Phase {
    /// Every run starts here; the cursor is never persisted.
    pub const INITIAL: Phase = Phase::NetworkConnect;

    pub const ALL: [Phase; 4] = [
        Phase::NetworkConnect,
        Phase::OtaCheck,
        Phase::BrokerConnect,
        Phase::Publish,
    ];

    /// The closed set of outcomes this phase's handler can return.
    pub fn outcomes(self) -> &'static [Outcome] {
        match self {
            Phase::NetworkConnect => &[
                Outcome::Success,
                Outcome::Timeout,
                Outcome::Retry,
                Outcome::Failure,
            ],
            Phase::OtaCheck => &[
                Outcome::Success,
                Outcome::Timeout,
                Outcome::Failure,
                Outcome::UpdateApplied,
            ],
            Phase::BrokerConnect => &[
                Outcome::Success,
                Outcome::Timeout,
                Outcome::Retry,
                Outcome::Failure,
            ],
            Phase::Publish => &[Outcome::Success, Outcome::LinkLost, Outcome::Failure],
        }
    }

    pub fn can_produce(self, outcome: Outcome) -> bool {
        self.outcomes().contains(&outcome)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::NetworkConnect => write!(f, "NETWORK_CONNECT"),
            Phase::OtaCheck => write!(f, "OTA_CHECK"),
            Phase::BrokerConnect => write!(f, "BROKER_CONNECT"),
            Phase::Publish => write!(f, "PUBLISH"),
        }
    }
}

/// Result code returned by a phase handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Outcome {
    /// The phase did its work; advance.
    Success,
    /// The phase ran out of its time budget.
    Timeout,
    /// Transient condition; the phase may be re-entered.
    Retry,
    /// Not recoverable within this phase.
    Failure,
    /// The broker session dropped while publishing.
    LinkLost,
    /// A firmware image was staged; the node must stop so the runtime can restart it.
    UpdateApplied,
}

impl Outcome {
    /// Terminal outcomes end the driver loop instead of selecting a transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, Outcome::UpdateApplied)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "SUCCESS"),
            Outcome::Timeout => write!(f, "TIMEOUT"),
            Outcome::Retry => write!(f, "RETRY"),
            Outcome::Failure => write!(f, "FAILURE"),
            Outcome::LinkLost => write!(f, "LINK_LOST"),
            Outcome::UpdateApplied => write!(f, "UPDATE_APPLIED"),
        }
    }
}
