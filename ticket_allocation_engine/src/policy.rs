//! Release policies: pure functions from an ordered queue of candidate orders to an assignment
//! vector. Policies never touch the database; they see only the inputs the allocation coordinator
//! hands them, which makes every policy decision reproducible after the fact.

use std::fmt::Display;

use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::db_types::{ReleaseMethod, TicketOrder, TicketRelease};

/// The policy's verdict for a single order. Orders are never split: an order either gets all its
/// tickets, joins the reserve queue whole, or is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    Allocate,
    /// Position in the promotion queue, order-level. Rank 1 is promoted first.
    Reserve { rank: i64 },
    Reject { reason: RejectReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    CapacityExhausted,
}

impl Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::CapacityExhausted => write!(f, "capacity exhausted"),
        }
    }
}

/// Computes the assignment vector for a release. `orders` must be the candidate queue in
/// `created_at` ascending order with ties broken by id, which is exactly what
/// [`crate::db::traits::OrderStore::fetch_candidate_orders`] yields.
///
/// `_now` is unused by the current methods but is part of the policy contract so that
/// time-dependent variants can be added without changing call sites.
pub fn allocate(orders: &[TicketOrder], release: &TicketRelease, _now: DateTime<Utc>) -> Vec<Assignment> {
    match release.method {
        ReleaseMethod::FcfsLottery { .. } => fcfs_lottery(orders, release),
        ReleaseMethod::ReservedDirect => reserved_direct(orders, release.capacity),
    }
}

/// FCFS with a lottery for the open window. Orders created within the window are all equal: if
/// their combined quantity fits, everyone wins; otherwise a shuffle seeded from the release nonce
/// picks the winners and the rest become ranked reserves. Orders arriving after the window are
/// plain first-come-first-served against whatever capacity is left.
fn fcfs_lottery(orders: &[TicketOrder], release: &TicketRelease) -> Vec<Assignment> {
    let window_end = release
        .open_window_end()
        .unwrap_or(release.opens_at);
    let mut result = vec![Assignment::Allocate; orders.len()];
    let mut cap = release.capacity;
    let mut next_rank = 1i64;

    let (eligible, late): (Vec<usize>, Vec<usize>) =
        (0..orders.len()).partition(|&i| orders[i].created_at <= window_end);

    let eligible_total: i64 = eligible.iter().map(|&i| orders[i].quantity).sum();
    if eligible_total <= cap {
        // Everyone inside the window wins. No shuffle needed.
        cap -= eligible_total;
    } else {
        let mut shuffled = eligible;
        let mut rng = StdRng::seed_from_u64(release.lottery_nonce as u64);
        shuffled.shuffle(&mut rng);
        // Winners are a strict prefix of the shuffled queue; the first order that does not fit
        // whole ends the prefix, even if a later, smaller order would still have fit.
        let mut allocating = true;
        for &i in &shuffled {
            if allocating && orders[i].quantity <= cap {
                cap -= orders[i].quantity;
            } else {
                allocating = false;
                result[i] = Assignment::Reserve { rank: next_rank };
                next_rank += 1;
            }
        }
    }

    for &i in &late {
        if orders[i].quantity <= cap {
            cap -= orders[i].quantity;
        } else {
            result[i] = Assignment::Reserve { rank: next_rank };
            next_rank += 1;
        }
    }
    result
}

/// Straight FCFS in arrival order. Overflow is rejected on a per-order basis; a later, smaller
/// order may still be allocated from the remaining capacity.
fn reserved_direct(orders: &[TicketOrder], capacity: i64) -> Vec<Assignment> {
    let mut used = 0i64;
    orders
        .iter()
        .map(|order| {
            if used + order.quantity <= capacity {
                used += order.quantity;
                Assignment::Allocate
            } else {
                Assignment::Reject { reason: RejectReason::CapacityExhausted }
            }
        })
        .collect()
}
