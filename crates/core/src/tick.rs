//! Per-tick lifecycle: the tick phase state machine and the tick-scoped
//! context object.

use crate::error::BridgeError;
use crate::event::CanonicalEvent;
use crate::proposal::{MutationProposal, ProposalQueue};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Phase of one tick's lifecycle.
///
/// A tick moves strictly `Collecting` -> `Reconciling` -> `Applied`; a new tick
/// cannot begin collecting until the previous one reached `Applied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPhase {
    /// Events are being generated and dispatched; proposals accumulate.
    Collecting,
    /// The conflict resolver is reconciling collected proposals.
    Reconciling,
    /// Accepted proposals have been applied to the world state. Terminal.
    Applied,
}

impl TickPhase {
    /// The phases reachable from the current one.
    pub fn valid_transitions(self) -> &'static [TickPhase] {
        match self {
            Self::Collecting => &[Self::Reconciling],
            Self::Reconciling => &[Self::Applied],
            Self::Applied => &[],
        }
    }

    pub fn can_transition_to(self, target: TickPhase) -> bool {
        self.valid_transitions().contains(&target)
    }
}

impl fmt::Display for TickPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collecting => f.write_str("collecting"),
            Self::Reconciling => f.write_str("reconciling"),
            Self::Applied => f.write_str("applied"),
        }
    }
}

/// Scope object for one tick: the ordered canonical events produced and the
/// proposals collected while dispatching them.
///
/// Created at tick start, discarded at tick end; nothing in it survives into
/// the next tick.
pub struct TickContext {
    tick: u64,
    phase: TickPhase,
    events: Vec<CanonicalEvent>,
    proposals: Arc<ProposalQueue>,
    started_at: Instant,
}

impl TickContext {
    pub fn new(tick: u64) -> Self {
        Self {
            tick,
            phase: TickPhase::Collecting,
            events: Vec::new(),
            proposals: Arc::new(ProposalQueue::new()),
            started_at: Instant::now(),
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn phase(&self) -> TickPhase {
        self.phase
    }

    /// The tick's events in generation (sequence) order.
    pub fn events(&self) -> &[CanonicalEvent] {
        &self.events
    }

    /// The shared proposal collection for this tick.
    pub fn proposal_queue(&self) -> Arc<ProposalQueue> {
        self.proposals.clone()
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Append an event during the collecting phase. Sequence numbers must be
    /// strictly increasing within the tick.
    pub(crate) fn push_event(&mut self, event: CanonicalEvent) -> Result<(), BridgeError> {
        if self.phase != TickPhase::Collecting {
            return Err(BridgeError::ContractViolation(format!(
                "event {} pushed during {} phase of tick {}",
                event.seq, self.phase, self.tick
            )));
        }
        if let Some(last) = self.events.last() {
            if event.seq <= last.seq {
                return Err(BridgeError::ContractViolation(format!(
                    "sequence regression within tick {}: {} after {}",
                    self.tick, event.seq, last.seq
                )));
            }
        }
        self.events.push(event);
        Ok(())
    }

    /// Move from `Collecting` to `Reconciling`.
    pub fn begin_reconcile(&mut self) -> Result<(), BridgeError> {
        self.transition(TickPhase::Reconciling)
    }

    /// Move from `Reconciling` to the terminal `Applied` phase.
    pub fn mark_applied(&mut self) -> Result<(), BridgeError> {
        self.transition(TickPhase::Applied)
    }

    /// Drain the collected proposals, in submission order. Only meaningful
    /// during reconciliation; each tick's proposals are consumed exactly once.
    pub fn take_proposals(&mut self) -> Result<Vec<MutationProposal>, BridgeError> {
        if self.phase != TickPhase::Reconciling {
            return Err(BridgeError::ContractViolation(format!(
                "proposals drained during {} phase of tick {}",
                self.phase, self.tick
            )));
        }
        Ok(self.proposals.drain())
    }

    fn transition(&mut self, target: TickPhase) -> Result<(), BridgeError> {
        if !self.phase.can_transition_to(target) {
            return Err(BridgeError::ContractViolation(format!(
                "tick {} cannot move from {} to {}",
                self.tick, self.phase, target
            )));
        }
        tracing::trace!(tick = self.tick, from = %self.phase, to = %target, "tick phase change");
        self.phase = target;
        Ok(())
    }
}

impl fmt::Debug for TickContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickContext")
            .field("tick", &self.tick)
            .field("phase", &self.phase)
            .field("events", &self.events.len())
            .field("proposals", &self.proposals.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{CanonicalEvent, EventPayload};
    use crate::subject::{BlockPos, BlockState, SubjectRef};

    fn event(seq: u64) -> CanonicalEvent {
        CanonicalEvent::new(
            seq,
            SubjectRef::Block(BlockPos::new(0, 0, 0)),
            EventPayload::BlockChange {
                from: BlockState::new("stone"),
                to: BlockState::air(),
            },
        )
    }

    #[test]
    fn phases_advance_in_order() {
        let mut ctx = TickContext::new(1);
        assert_eq!(ctx.phase(), TickPhase::Collecting);

        ctx.begin_reconcile().unwrap();
        assert_eq!(ctx.phase(), TickPhase::Reconciling);

        ctx.mark_applied().unwrap();
        assert_eq!(ctx.phase(), TickPhase::Applied);
    }

    #[test]
    fn applied_is_terminal() {
        let mut ctx = TickContext::new(1);
        ctx.begin_reconcile().unwrap();
        ctx.mark_applied().unwrap();

        let err = ctx.begin_reconcile().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn sequence_regression_is_a_contract_violation() {
        let mut ctx = TickContext::new(1);
        ctx.push_event(event(5)).unwrap();

        let err = ctx.push_event(event(5)).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn events_cannot_be_pushed_after_collecting() {
        let mut ctx = TickContext::new(1);
        ctx.begin_reconcile().unwrap();
        assert!(ctx.push_event(event(1)).is_err());
    }

    #[test]
    fn proposals_drain_only_during_reconcile() {
        let mut ctx = TickContext::new(1);
        assert!(ctx.take_proposals().is_err());

        ctx.begin_reconcile().unwrap();
        assert!(ctx.take_proposals().unwrap().is_empty());
    }
}
