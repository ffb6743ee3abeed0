//! Bridge error taxonomy.
//!
//! Only `ContractViolation` is fatal: it means a programming-contract
//! invariant no longer holds and the process must not continue past it.
//! Every other kind is contained within the tick and reported through
//! notification channels rather than interrupting other extensions.

use crate::resolve::RejectReason;
use crate::subject::SubjectRef;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// A tick-ordering or phase invariant was violated. Fatal.
    #[error("tick contract violated: {0}")]
    ContractViolation(String),

    /// Registration rejected: the identity already exists.
    #[error("extension identity '{0}' is already registered")]
    DuplicateIdentity(String),

    /// A listener callback failed or timed out; isolated to that extension.
    #[error("listener fault in '{identity}': {detail}")]
    ListenerFault { identity: String, detail: String },

    /// A proposed mutation was not applied; reported to its origin.
    #[error("mutation on {subject} rejected: {reason}")]
    MutationRejected {
        subject: SubjectRef,
        reason: RejectReason,
    },

    /// An external collaborator did not answer in time; the bridge degrades
    /// to in-memory/deferred behaviour.
    #[error("collaborator '{collaborator}' unavailable: {detail}")]
    CollaboratorUnavailable {
        collaborator: &'static str,
        detail: String,
    },
}

impl BridgeError {
    /// Whether the error invalidates bridge invariants and must abort the
    /// process rather than be contained.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ContractViolation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_contract_violations_are_fatal() {
        assert!(BridgeError::ContractViolation("seq regressed".into()).is_fatal());
        assert!(!BridgeError::DuplicateIdentity("x".into()).is_fatal());
        assert!(!BridgeError::CollaboratorUnavailable {
            collaborator: "persistence",
            detail: "timed out".into(),
        }
        .is_fatal());
    }
}
