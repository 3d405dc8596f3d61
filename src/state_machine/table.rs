use std::fmt;

use serde::Serialize;
use thiserror::Error;

use super::phase::{Outcome, Phase};

/// One edge of the state machine graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: Phase,
    pub outcome: Outcome,
    pub to: Phase,
}

impl Transition {
    pub const fn new(from: Phase, outcome: Outcome, to: Phase) -> Self {
        Self { from, outcome, to }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} --{}--> {}", self.from, self.outcome, self.to)
    }
}

use Outcome::*;
use Phase::*;

/// The node's transition graph.
///
/// `Publish × Failure` covers the Wi-Fi link dropping while publishing, which
/// cannot be recovered by reconnecting to the broker alone.
pub const DEFAULT_TRANSITIONS: &[Transition] = &[
    Transition::new(NetworkConnect, Success, OtaCheck),
    Transition::new(NetworkConnect, Timeout, NetworkConnect),
    Transition::new(NetworkConnect, Retry, NetworkConnect),
    Transition::new(NetworkConnect, Failure, NetworkConnect),
    Transition::new(OtaCheck, Success, BrokerConnect),
    Transition::new(OtaCheck, Timeout, BrokerConnect),
    Transition::new(OtaCheck, Failure, BrokerConnect),
    Transition::new(BrokerConnect, Success, Publish),
    Transition::new(BrokerConnect, Timeout, BrokerConnect),
    Transition::new(BrokerConnect, Retry, BrokerConnect),
    Transition::new(BrokerConnect, Failure, NetworkConnect),
    Transition::new(Publish, Success, Publish),
    Transition::new(Publish, LinkLost, BrokerConnect),
    Transition::new(Publish, Failure, NetworkConnect),
];

/// A table defect found while validating transitions at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("duplicate edge for {phase} on {outcome}")]
    Duplicate { phase: Phase, outcome: Outcome },

    #[error("no edge for {phase} on {outcome}")]
    Missing { phase: Phase, outcome: Outcome },

    #[error("{phase} never returns {outcome}, edge is unreachable")]
    Unproducible { phase: Phase, outcome: Outcome },

    #[error("{outcome} ends the run and cannot be routed from {phase}")]
    TerminalEdge { phase: Phase, outcome: Outcome },
}

/// Validated, immutable lookup from `(phase, outcome)` to the next phase.
#[derive(Debug, Clone)]
pub struct TransitionTable {
    edges: Vec<Transition>,
}

impl TransitionTable {
    /// Validate `edges` and build the table.
    ///
    /// Every non-terminal outcome a phase can produce needs exactly one edge.
    pub fn new(edges: &[Transition]) -> Result<Self, TableError> {
        for (i, edge) in edges.iter().enumerate() {
            if edge.outcome.is_terminal() {
                return Err(TableError::TerminalEdge {
                    phase: edge.from,
                    outcome: edge.outcome,
                });
            }
            if !edge.from.can_produce(edge.outcome) {
                return Err(TableError::Unproducible {
                    phase: edge.from,
                    outcome: edge.outcome,
                });
            }
            let duplicate = edges[..i]
                .iter()
                .any(|e| e.from == edge.from && e.outcome == edge.outcome);
            if duplicate {
                return Err(TableError::Duplicate {
                    phase: edge.from,
                    outcome: edge.outcome,
                });
            }
        }

        for phase in Phase::ALL {
            for &outcome in phase.outcomes() {
                if outcome.is_terminal() {
                    continue;
                }
                if !edges.iter().any(|e| e.from == phase && e.outcome == outcome) {
                    return Err(TableError::Missing { phase, outcome });
                }
            }
        }

        Ok(Self {
            edges: edges.to_vec(),
        })
    }

    /// Destination for `(phase, outcome)`; the first-defined edge wins.
    pub fn lookup(&self, phase: Phase, outcome: Outcome) -> Option<Phase> {
        self.edges
            .iter()
            .find(|e| e.from == phase && e.outcome == outcome)
            .map(|e| e.to)
    }

    pub fn edges(&self) -> &[Transition] {
        &self.edges
    }
}

impl fmt::Display for TransitionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<16} {:<15} {}", "SOURCE", "OUTCOME", "DESTINATION")?;
        for edge in &self.edges {
            writeln!(
                f,
                "{:<16} {:<15} {}",
                edge.from.to_string(),
                edge.outcome.to_string(),
                edge.to
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn without(phase: Phase, outcome: Outcome) -> Vec<Transition> {
        DEFAULT_TRANSITIONS
            .iter()
            .copied()
            .filter(|e| !(e.from == phase && e.outcome == outcome))
            .collect()
    }

    #[test]
    fn default_table_is_valid() {
        let table = TransitionTable::new(DEFAULT_TRANSITIONS).unwrap();
        assert_eq!(table.edges().len(), DEFAULT_TRANSITIONS.len());
    }

    #[test]
    fn every_producible_pair_has_exactly_one_edge() {
        for phase in Phase::ALL {
            for &outcome in phase.outcomes() {
                let count = DEFAULT_TRANSITIONS
                    .iter()
                    .filter(|e| e.from == phase && e.outcome == outcome)
                    .count();
                let expected = if outcome.is_terminal() { 0 } else { 1 };
                assert_eq!(count, expected, "{phase} on {outcome}");
            }
        }
    }

    #[test]
    fn network_success_leads_to_ota_check() {
        let table = TransitionTable::new(DEFAULT_TRANSITIONS).unwrap();
        assert_eq!(
            table.lookup(Phase::NetworkConnect, Outcome::Success),
            Some(Phase::OtaCheck)
        );
    }

    #[test]
    fn broker_failure_falls_back_to_network() {
        let table = TransitionTable::new(DEFAULT_TRANSITIONS).unwrap();
        assert_eq!(
            table.lookup(Phase::BrokerConnect, Outcome::Failure),
            Some(Phase::NetworkConnect)
        );
    }

    #[test]
    fn ota_problems_skip_to_broker() {
        let table = TransitionTable::new(DEFAULT_TRANSITIONS).unwrap();
        for outcome in [Outcome::Timeout, Outcome::Failure] {
            assert_eq!(
                table.lookup(Phase::OtaCheck, outcome),
                Some(Phase::BrokerConnect)
            );
        }
    }

    #[test]
    fn publish_steady_state_and_fallbacks() {
        let table = TransitionTable::new(DEFAULT_TRANSITIONS).unwrap();
        assert_eq!(table.lookup(Phase::Publish, Outcome::Success), Some(Phase::Publish));
        assert_eq!(
            table.lookup(Phase::Publish, Outcome::LinkLost),
            Some(Phase::BrokerConnect)
        );
        assert_eq!(
            table.lookup(Phase::Publish, Outcome::Failure),
            Some(Phase::NetworkConnect)
        );
    }

    #[test]
    fn rejects_table_missing_ota_failure() {
        let edges = without(Phase::OtaCheck, Outcome::Failure);
        let err = TransitionTable::new(&edges).unwrap_err();
        assert_eq!(
            err,
            TableError::Missing {
                phase: Phase::OtaCheck,
                outcome: Outcome::Failure
            }
        );
        assert_eq!(err.to_string(), "no edge for OTA_CHECK on FAILURE");
    }

    #[test]
    fn rejects_duplicate_edges() {
        let mut edges = DEFAULT_TRANSITIONS.to_vec();
        edges.push(Transition::new(
            Phase::BrokerConnect,
            Outcome::Failure,
            Phase::BrokerConnect,
        ));
        let err = TransitionTable::new(&edges).unwrap_err();
        assert_eq!(
            err,
            TableError::Duplicate {
                phase: Phase::BrokerConnect,
                outcome: Outcome::Failure
            }
        );
    }

    #[test]
    fn rejects_edge_on_terminal_outcome() {
        let mut edges = DEFAULT_TRANSITIONS.to_vec();
        edges.push(Transition::new(
            Phase::OtaCheck,
            Outcome::UpdateApplied,
            Phase::NetworkConnect,
        ));
        assert!(matches!(
            TransitionTable::new(&edges),
            Err(TableError::TerminalEdge { .. })
        ));
    }

    #[test]
    fn rejects_unproducible_edge() {
        let mut edges = DEFAULT_TRANSITIONS.to_vec();
        edges.push(Transition::new(
            Phase::OtaCheck,
            Outcome::LinkLost,
            Phase::NetworkConnect,
        ));
        assert_eq!(
            TransitionTable::new(&edges).unwrap_err(),
            TableError::Unproducible {
                phase: Phase::OtaCheck,
                outcome: Outcome::LinkLost
            }
        );
    }

    #[test]
    fn rejects_empty_table() {
        assert!(matches!(
            TransitionTable::new(&[]),
            Err(TableError::Missing {
                phase: Phase::NetworkConnect,
                outcome: Outcome::Success
            })
        ));
    }

    #[test]
    fn display_lists_every_edge() {
        let table = TransitionTable::new(DEFAULT_TRANSITIONS).unwrap();
        let rendered = table.to_string();
        assert_eq!(rendered.lines().count(), DEFAULT_TRANSITIONS.len() + 1);
        assert!(rendered.contains("BROKER_CONNECT"));
        assert_eq!(
            DEFAULT_TRANSITIONS[0].to_string(),
            "NETWORK_CONNECT --SUCCESS--> OTA_CHECK"
        );
    }
}
