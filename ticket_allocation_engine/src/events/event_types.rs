use serde::{Deserialize, Serialize};

use crate::db_types::Ticket;

/// A ticket came out of allocation at rank 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketAllocatedEvent {
    pub ticket: Ticket,
}

impl TicketAllocatedEvent {
    pub fn new(ticket: Ticket) -> Self {
        Self { ticket }
    }
}

/// A ticket joined the reserve queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveCreatedEvent {
    pub ticket: Ticket,
    pub rank: i64,
}

impl ReserveCreatedEvent {
    pub fn new(ticket: Ticket) -> Self {
        let rank = ticket.reserve_rank;
        Self { ticket, rank }
    }
}

/// A reserve ticket was promoted to allocated by the reclaim loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservePromotedEvent {
    pub ticket: Ticket,
}

impl ReservePromotedEvent {
    pub fn new(ticket: Ticket) -> Self {
        Self { ticket }
    }
}

/// A reserve moved up the queue without being promoted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveRankChangedEvent {
    pub ticket_id: i64,
    pub release_id: i64,
    pub old_rank: i64,
    pub new_rank: i64,
}

/// An allocated ticket was reclaimed because its payment deadline passed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketExpiredEvent {
    pub ticket: Ticket,
    pub reason: String,
}

#[cfg(test)]
mod test {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn ticket() -> Ticket {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        Ticket {
            id: 11,
            order_id: 5,
            release_id: 3,
            user_id: 42,
            is_reserve: true,
            reserve_rank: 2,
            paid: false,
            payment_ref: None,
            paid_deadline: None,
            qr: "ABCDEFGH12345678".to_string(),
            deleted: false,
            deleted_reason: None,
            created_at: t0,
            updated_at: t0,
        }
    }

    #[test]
    fn payloads_serialize_for_downstream_consumers() {
        let event = ReserveCreatedEvent::new(ticket());
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"rank\":2"));
        assert!(json.contains("\"user_id\":42"));
        let back: ReserveCreatedEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);

        let event = TicketExpiredEvent { ticket: ticket(), reason: "unpaid".to_string() };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"reason\":\"unpaid\""));
    }
}
