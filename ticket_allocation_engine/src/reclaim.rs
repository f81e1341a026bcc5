//! Planning for the reclaim & promotion loop. The planner is pure: it looks at the allocated and
//! reserve tickets of one release plus "now" and decides what to expire, what to promote and how
//! to renumber the remaining reserves. Applying the plan atomically is the storage layer's job.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    db_types::{PaymentDeadline, Ticket, TicketRelease},
    timekeeper::Timekeeper,
};

/// Reason string stamped on tickets reclaimed for non-payment.
pub const EXPIRY_REASON_UNPAID: &str = "unpaid";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invariant violation on release {release_id}: {message}")]
pub struct InvariantViolation {
    pub release_id: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    pub ticket_id: i64,
    pub new_deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankChange {
    pub ticket_id: i64,
    pub old_rank: i64,
    pub new_rank: i64,
}

/// What one reclaim pass over a release should do. Empty on a release with nothing past its
/// deadline and no reserves, which makes a repeated tick a fixed point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimPlan {
    pub expire: Vec<i64>,
    pub promote: Vec<Promotion>,
    pub renumber: Vec<RankChange>,
}

impl ReclaimPlan {
    pub fn is_empty(&self) -> bool {
        self.expire.is_empty() && self.promote.is_empty() && self.renumber.is_empty()
    }
}

/// Builds the reclaim plan for one release.
///
/// `allocated` must be the non-deleted rank-0 tickets, `reserves` the non-deleted reserves in
/// ascending rank order. Paid tickets are never expired. Promotions consume the freed slots in
/// rank order and the survivors are renumbered back to a dense 1..K.
pub fn plan(
    release: &TicketRelease,
    allocated: &[Ticket],
    reserves: &[Ticket],
    now: DateTime<Utc>,
    tk: &Timekeeper,
) -> Result<ReclaimPlan, InvariantViolation> {
    check_invariants(release, allocated, reserves)?;

    let mut plan = ReclaimPlan::default();
    for ticket in allocated {
        if ticket.paid {
            continue;
        }
        match effective_deadline(ticket, release.payment_deadline.as_ref(), tk) {
            Some(deadline) if now > deadline => plan.expire.push(ticket.id),
            _ => {},
        }
    }

    let freed = plan.expire.len();
    if freed == 0 && reserves.is_empty() {
        return Ok(plan);
    }

    let promoted = freed.min(reserves.len());
    for ticket in &reserves[..promoted] {
        plan.promote.push(Promotion { ticket_id: ticket.id, new_deadline: promotion_deadline(release, now, tk) });
    }
    for (j, ticket) in reserves[promoted..].iter().enumerate() {
        let new_rank = j as i64 + 1;
        if new_rank != ticket.reserve_rank {
            plan.renumber.push(RankChange { ticket_id: ticket.id, old_rank: ticket.reserve_rank, new_rank });
        }
    }
    Ok(plan)
}

/// The instant after which an allocated ticket is reclaimable. The coordinator stamps a deadline
/// on the ticket at allocation and promotion time; older rows without one fall back to the
/// timekeeper computation from the last state change, then to the release's absolute deadline.
fn effective_deadline(
    ticket: &Ticket,
    deadline: Option<&PaymentDeadline>,
    tk: &Timekeeper,
) -> Option<DateTime<Utc>> {
    if let Some(d) = ticket.paid_deadline {
        return Some(d);
    }
    let deadline = deadline?;
    match deadline.reserve_payment_duration {
        Some(pay_within) => Some(tk.must_pay_before(ticket.updated_at, pay_within)),
        None => Some(deadline.absolute_deadline),
    }
}

fn promotion_deadline(release: &TicketRelease, now: DateTime<Utc>, tk: &Timekeeper) -> Option<DateTime<Utc>> {
    let deadline = release.payment_deadline.as_ref()?;
    match deadline.reserve_payment_duration {
        Some(pay_within) => Some(tk.must_pay_before(now, pay_within)),
        None => Some(deadline.absolute_deadline),
    }
}

fn check_invariants(
    release: &TicketRelease,
    allocated: &[Ticket],
    reserves: &[Ticket],
) -> Result<(), InvariantViolation> {
    let fail = |message: String| {
        Err(InvariantViolation { release_id: release.id, message })
    };
    if allocated.len() as i64 > release.capacity {
        return fail(format!("{} allocated tickets exceed capacity {}", allocated.len(), release.capacity));
    }
    for (i, ticket) in reserves.iter().enumerate() {
        let expected = i as i64 + 1;
        if ticket.reserve_rank != expected {
            return fail(format!("reserve rank sequence has a gap: expected {expected}, found {}", ticket.reserve_rank));
        }
        if ticket.paid {
            return fail(format!("reserve ticket {} is marked paid", ticket.id));
        }
    }
    for ticket in allocated.iter().chain(reserves) {
        if ticket.deleted && ticket.paid {
            return fail(format!("ticket {} is both paid and deleted", ticket.id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::db_types::ReleaseMethod;

    fn release(capacity: i64) -> TicketRelease {
        let opens_at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        TicketRelease {
            id: 7,
            event_id: 1,
            name: "Reclaim test".to_string(),
            opens_at,
            closes_at: opens_at + Duration::days(7),
            capacity,
            method: ReleaseMethod::FcfsLottery { open_window: Duration::seconds(60) },
            max_per_user: 10,
            allocated: true,
            reserved: false,
            is_private: false,
            promo_code_digest: None,
            lottery_nonce: 1,
            payment_deadline: Some(PaymentDeadline {
                absolute_deadline: opens_at + Duration::hours(4),
                reserve_payment_duration: Some(Duration::hours(1)),
            }),
            created_at: opens_at,
            updated_at: opens_at,
        }
    }

    fn ticket(id: i64, rank: i64, paid: bool, paid_deadline: Option<DateTime<Utc>>) -> Ticket {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        Ticket {
            id,
            order_id: id,
            release_id: 7,
            user_id: id,
            is_reserve: rank > 0,
            reserve_rank: rank,
            paid,
            payment_ref: None,
            paid_deadline,
            qr: "ABCDEFGH12345678".to_string(),
            deleted: false,
            deleted_reason: None,
            created_at: t0,
            updated_at: t0,
        }
    }

    #[test]
    fn expired_tickets_free_slots_for_reserves() {
        let rel = release(2);
        let deadline = Utc.with_ymd_and_hms(2024, 6, 1, 14, 0, 0).unwrap();
        let allocated = vec![ticket(1, 0, false, Some(deadline)), ticket(2, 0, false, Some(deadline))];
        let reserves = vec![ticket(3, 1, false, None), ticket(4, 2, false, None)];
        let now = deadline + Duration::minutes(5);
        let plan = plan(&rel, &allocated, &reserves, now, &Timekeeper::default()).unwrap();
        assert_eq!(plan.expire, vec![1, 2]);
        assert_eq!(plan.promote.len(), 2);
        assert_eq!(plan.promote[0].ticket_id, 3);
        assert_eq!(plan.promote[1].ticket_id, 4);
        // Both reserves were promoted, so nothing is left to renumber.
        assert!(plan.renumber.is_empty());
        // Promotion deadlines are hour-rounded from "now".
        let expected = Timekeeper::default().must_pay_before(now, Duration::hours(1));
        assert_eq!(plan.promote[0].new_deadline, Some(expected));
    }

    #[test]
    fn paid_tickets_are_never_reclaimed() {
        let rel = release(2);
        let deadline = Utc.with_ymd_and_hms(2024, 6, 1, 14, 0, 0).unwrap();
        let allocated = vec![ticket(1, 0, true, Some(deadline)), ticket(2, 0, false, Some(deadline))];
        let reserves = vec![ticket(3, 1, false, None)];
        let now = deadline + Duration::minutes(5);
        let plan = plan(&rel, &allocated, &reserves, now, &Timekeeper::default()).unwrap();
        assert_eq!(plan.expire, vec![2]);
        assert_eq!(plan.promote.len(), 1);
    }

    #[test]
    fn survivors_are_renumbered_densely() {
        let rel = release(3);
        let deadline = Utc.with_ymd_and_hms(2024, 6, 1, 14, 0, 0).unwrap();
        let allocated = vec![ticket(1, 0, false, Some(deadline))];
        let reserves = vec![ticket(3, 1, false, None), ticket(4, 2, false, None), ticket(5, 3, false, None)];
        let now = deadline + Duration::minutes(5);
        let plan = plan(&rel, &allocated, &reserves, now, &Timekeeper::default()).unwrap();
        assert_eq!(plan.expire, vec![1]);
        assert_eq!(plan.promote.len(), 1);
        assert_eq!(plan.renumber, vec![
            RankChange { ticket_id: 4, old_rank: 2, new_rank: 1 },
            RankChange { ticket_id: 5, old_rank: 3, new_rank: 2 },
        ]);
    }

    #[test]
    fn quiescent_release_is_a_fixed_point() {
        let rel = release(2);
        let future = Utc.with_ymd_and_hms(2024, 6, 2, 12, 0, 0).unwrap();
        let allocated = vec![ticket(1, 0, false, Some(future))];
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 15, 0, 0).unwrap();
        let plan = plan(&rel, &allocated, &[], now, &Timekeeper::default()).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn rank_gaps_are_fatal() {
        let rel = release(2);
        let reserves = vec![ticket(3, 1, false, None), ticket(4, 3, false, None)];
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 15, 0, 0).unwrap();
        let err = plan(&rel, &[], &reserves, now, &Timekeeper::default()).unwrap_err();
        assert!(err.message.contains("gap"));
    }

    #[test]
    fn over_capacity_is_fatal() {
        let rel = release(1);
        let deadline = Utc.with_ymd_and_hms(2024, 6, 1, 14, 0, 0).unwrap();
        let allocated = vec![ticket(1, 0, false, Some(deadline)), ticket(2, 0, false, Some(deadline))];
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 15, 0, 0).unwrap();
        assert!(plan(&rel, &allocated, &[], now, &Timekeeper::default()).is_err());
    }
}
