use std::fmt::Debug;

use chrono::{DateTime, Duration, Utc};
use log::*;

use crate::{
    db::traits::{NewTicket, OrderStore, Rejection, StoreError, Summary, TickSummary},
    db_types::{AllocationTrigger, Ticket, TicketOrder, TicketRelease},
    events::{
        EventProducers,
        ReserveCreatedEvent,
        ReservePromotedEvent,
        ReserveRankChangedEvent,
        TicketAllocatedEvent,
        TicketExpiredEvent,
    },
    helpers::new_qr_code,
    policy::{self, Assignment},
    reclaim::EXPIRY_REASON_UNPAID,
    tae_api::AllocationError,
    timekeeper::Timekeeper,
};

/// The allocation coordinator and the reclaim & promotion loop.
///
/// Both entry points serialize per release on the release row: the coordinator through the
/// one-way `allocated` latch, the reclaim pass through its single transaction. Notification
/// intents are published strictly after commit and never fail the operation.
pub struct AllocationApi<B> {
    db: B,
    tk: Timekeeper,
    producers: EventProducers,
}

impl<B> Debug for AllocationApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AllocationApi")
    }
}

impl<B> AllocationApi<B> {
    pub fn new(db: B, tk: Timekeeper, producers: EventProducers) -> Self {
        Self { db, tk, producers }
    }
}

impl<B> AllocationApi<B>
where B: OrderStore
{
    /// Runs allocation for a release: load the candidate queue, ask the release's policy for an
    /// assignment, write tickets and handled-markers in one transaction. Idempotent on the
    /// release's `allocated` latch — the second call returns `AlreadyAllocated` cleanly.
    pub async fn allocate(&self, release_id: i64, trigger: AllocationTrigger) -> Result<Summary, AllocationError> {
        let release = self.db.fetch_release(release_id).await?;
        if release.allocated {
            // Advisory early exit; the latch update inside the transaction is the authority.
            return Err(AllocationError::AlreadyAllocated(release_id));
        }
        let orders = self.db.fetch_candidate_orders(release_id).await?;
        let now = self.tk.now();
        let assignments = policy::allocate(&orders, &release, now);
        let (new_tickets, rejections) = expand_assignments(&release, &orders, &assignments);
        let outcome = self.db.insert_tickets_and_handle(release_id, &new_tickets, &rejections, now).await?;
        let summary = outcome.summary();
        info!(
            "⚖️ Release {release_id} allocated ({trigger}): {} allocated, {} reserves, {} rejected",
            summary.allocated_count, summary.reserve_count, summary.rejected_count
        );
        self.publish_allocation_events(&outcome.tickets).await;
        Ok(summary)
    }

    /// One pass of the reclaim & promotion loop over every open, allocated release. Per-release
    /// failures never abort the tick: database errors are transient (the release is retried next
    /// tick), invariant violations are fatal for that release and surfaced in the summary.
    pub async fn tick(&self, now: DateTime<Utc>, grace: Duration) -> TickSummary {
        let mut summary = TickSummary::default();
        let releases = match self.db.open_allocated_releases(now, grace).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("⏲️ Could not list open releases, skipping this tick: {e}");
                return summary;
            },
        };
        trace!("⏲️ Reclaim tick over {} releases", releases.len());
        for release_id in releases {
            match self.db.reclaim_and_promote(release_id, now, &self.tk).await {
                Ok(outcome) => {
                    summary.absorb(&outcome);
                    self.publish_reclaim_events(release_id, &outcome).await;
                },
                Err(StoreError::InvariantViolation(v)) => {
                    error!("⏲️🛑 Halting reclaim on release {release_id}: {v}");
                    summary.invariant_failures += 1;
                },
                Err(e) => {
                    warn!("⏲️ Skipping release {release_id} this tick: {e}");
                    summary.skipped += 1;
                },
            }
        }
        if summary != TickSummary::default() {
            info!(
                "⏲️ Reclaim tick done: {} expired, {} promoted, {} renumbered",
                summary.expired, summary.promoted, summary.renumbered
            );
        }
        summary
    }

    /// Allocates every release whose window has closed without an allocation run. The
    /// `auto_on_close` trigger of the coordinator.
    pub async fn sweep_closed_releases(&self, now: DateTime<Utc>) -> usize {
        let releases = match self.db.closed_unallocated_releases(now).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("⚖️ Could not list closed releases: {e}");
                return 0;
            },
        };
        let mut count = 0;
        for release_id in releases {
            match self.allocate(release_id, AllocationTrigger::AutoOnClose).await {
                Ok(_) => count += 1,
                // Another worker beat us to it; nothing to do.
                Err(AllocationError::AlreadyAllocated(_)) => {},
                Err(e) => warn!("⚖️ Auto-allocation of release {release_id} failed: {e}"),
            }
        }
        count
    }

    async fn publish_allocation_events(&self, tickets: &[Ticket]) {
        for ticket in tickets {
            if ticket.is_reserve {
                for producer in &self.producers.reserve_created_producer {
                    producer.publish_event(ReserveCreatedEvent::new(ticket.clone())).await;
                }
            } else {
                for producer in &self.producers.ticket_allocated_producer {
                    producer.publish_event(TicketAllocatedEvent::new(ticket.clone())).await;
                }
            }
        }
    }

    async fn publish_reclaim_events(&self, release_id: i64, outcome: &crate::db::traits::ReclaimOutcome) {
        for ticket in &outcome.expired {
            for producer in &self.producers.ticket_expired_producer {
                producer
                    .publish_event(TicketExpiredEvent {
                        ticket: ticket.clone(),
                        reason: EXPIRY_REASON_UNPAID.to_string(),
                    })
                    .await;
            }
        }
        for ticket in &outcome.promoted {
            for producer in &self.producers.reserve_promoted_producer {
                producer.publish_event(ReservePromotedEvent::new(ticket.clone())).await;
            }
        }
        for change in &outcome.rank_changes {
            for producer in &self.producers.reserve_rank_changed_producer {
                producer
                    .publish_event(ReserveRankChangedEvent {
                        ticket_id: change.ticket_id,
                        release_id,
                        old_rank: change.old_rank,
                        new_rank: change.new_rank,
                    })
                    .await;
            }
        }
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

/// Expands order-level policy assignments into per-ticket rows. An order for n tickets produces
/// n rows; reserve orders are laid out in policy rank order so the per-ticket ranks come out as a
/// dense 1..K across the whole release.
fn expand_assignments(
    release: &TicketRelease,
    orders: &[TicketOrder],
    assignments: &[Assignment],
) -> (Vec<NewTicket>, Vec<Rejection>) {
    let absolute_deadline = release.payment_deadline.map(|d| d.absolute_deadline);
    let mut tickets = Vec::new();
    let mut rejections = Vec::new();
    let mut reserve_orders: Vec<(i64, usize)> = Vec::new();

    for (i, assignment) in assignments.iter().enumerate() {
        match assignment {
            Assignment::Allocate => {
                for _ in 0..orders[i].quantity {
                    tickets.push(NewTicket {
                        order_id: orders[i].id,
                        user_id: orders[i].user_id,
                        reserve_rank: 0,
                        paid_deadline: absolute_deadline,
                        qr: new_qr_code(),
                    });
                }
            },
            Assignment::Reserve { rank } => reserve_orders.push((*rank, i)),
            Assignment::Reject { reason } => {
                rejections.push(Rejection { order_id: orders[i].id, reason: reason.to_string() });
            },
        }
    }

    reserve_orders.sort_unstable();
    let mut next_rank = 1i64;
    for (_, i) in reserve_orders {
        for _ in 0..orders[i].quantity {
            tickets.push(NewTicket {
                order_id: orders[i].id,
                user_id: orders[i].user_id,
                reserve_rank: next_rank,
                paid_deadline: None,
                qr: new_qr_code(),
            });
            next_rank += 1;
        }
    }
    (tickets, rejections)
}
