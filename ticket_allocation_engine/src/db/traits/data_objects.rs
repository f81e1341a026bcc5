use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    db_types::Ticket,
    reclaim::RankChange,
};

/// A ticket row the coordinator wants written. One per ticket unit: an order for n tickets
/// produces n of these, so reserve ranks are already dense across the whole batch.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub order_id: i64,
    pub user_id: i64,
    /// 0 for allocated tickets, 1..K for reserves.
    pub reserve_rank: i64,
    pub paid_deadline: Option<DateTime<Utc>>,
    pub qr: String,
}

impl NewTicket {
    pub fn is_reserve(&self) -> bool {
        self.reserve_rank > 0
    }
}

/// An order turned away by the policy. The order is marked handled with this memo and no ticket
/// is created.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub order_id: i64,
    pub reason: String,
}

/// What one allocation run produced, reported back to the caller of the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub allocated_count: usize,
    pub reserve_count: usize,
    pub rejected_count: usize,
}

/// The committed result of `insert_tickets_and_handle`: the inserted rows, in insertion order,
/// for post-commit notification.
#[derive(Debug, Clone)]
pub struct AllocationOutcome {
    pub tickets: Vec<Ticket>,
    pub rejected_orders: usize,
}

impl AllocationOutcome {
    pub fn summary(&self) -> Summary {
        Summary {
            allocated_count: self.tickets.iter().filter(|t| !t.is_reserve).count(),
            reserve_count: self.tickets.iter().filter(|t| t.is_reserve).count(),
            rejected_count: self.rejected_orders,
        }
    }
}

/// The committed result of one reclaim pass over one release.
#[derive(Debug, Clone, Default)]
pub struct ReclaimOutcome {
    pub expired: Vec<Ticket>,
    pub promoted: Vec<Ticket>,
    pub rank_changes: Vec<RankChange>,
}

impl ReclaimOutcome {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.promoted.is_empty() && self.rank_changes.is_empty()
    }
}

/// Counters for a whole reclaim tick across releases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSummary {
    pub expired: usize,
    pub promoted: usize,
    pub renumbered: usize,
    /// Releases skipped this tick because of a transient database error.
    pub skipped: usize,
    /// Releases halted because an invariant violation was found. These never auto-correct.
    pub invariant_failures: usize,
}

impl TickSummary {
    pub fn absorb(&mut self, outcome: &ReclaimOutcome) {
        self.expired += outcome.expired.len();
        self.promoted += outcome.promoted.len();
        self.renumbered += outcome.rank_changes.len();
    }
}
