//! Typed domain events.
//!
//! Mutating operations emit exactly one event per committed state
//! transition, after the owning transaction commits. Delivery to in-process
//! subscribers is at-least-once (a lagging broadcast receiver can observe a
//! resend window); every event carries a unique `event_id` so consumers can
//! deduplicate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::money::Amount;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEventKind {
    ContributionConfirmed {
        contribution_id: i64,
        group_id: i64,
        member_id: i64,
        amount: Amount,
        new_balance: Amount,
    },
    ContributionReversed {
        contribution_id: i64,
        group_id: i64,
        member_id: i64,
        amount: Amount,
        new_balance: Amount,
    },
    ApprovalReachedQuorum {
        approval_id: i64,
        group_id: i64,
        approvals_count: u32,
    },
    ApprovalRejected {
        approval_id: i64,
        group_id: i64,
    },
    LoanDisbursed {
        loan_id: i64,
        group_id: i64,
        amount: Amount,
        new_balance: Amount,
    },
    LoanCompleted {
        loan_id: i64,
        group_id: i64,
    },
    LoanDefaulted {
        loan_id: i64,
        group_id: i64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Unique per emission; consumers dedup on this.
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: DomainEventKind,
}

impl DomainEvent {
    pub fn new(kind: DomainEventKind) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            kind,
        }
    }
}

/// Broadcast fan-out for domain events. Cloneable handle; subscribers that
/// fall behind see `Lagged` and must treat the stream as at-least-once.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. No subscribers is fine; emission never fails the
    /// operation that produced it.
    pub fn emit(&self, kind: DomainEventKind) {
        let event = DomainEvent::new(kind);
        debug!(event_id = %event.event_id, "domain event: {:?}", event.kind);
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
