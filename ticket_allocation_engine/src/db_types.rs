use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tas_common::{Money, Secret};
use thiserror::Error;

//--------------------------------------   ReleaseMethod    ----------------------------------------------------------
/// The policy used to convert the order queue of a release into tickets. Adding a release method
/// means adding a variant here and an arm in [`crate::policy::allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseMethod {
    /// First-come-first-served while the open window lasts, with a seeded lottery when the window
    /// is oversubscribed. Overflow becomes ranked reserves.
    FcfsLottery {
        /// How long after `opens_at` an order still takes part in the lottery.
        open_window: Duration,
    },
    /// Straight first-come-first-served. Overflow is rejected, never reserved.
    ReservedDirect,
}

impl ReleaseMethod {
    pub fn name(&self) -> &'static str {
        match self {
            ReleaseMethod::FcfsLottery { .. } => "FcfsLottery",
            ReleaseMethod::ReservedDirect => "ReservedDirect",
        }
    }

    pub fn open_window_seconds(&self) -> Option<i64> {
        match self {
            ReleaseMethod::FcfsLottery { open_window } => Some(open_window.num_seconds()),
            ReleaseMethod::ReservedDirect => None,
        }
    }

    /// Reassembles a method from its stored representation (method name + optional window).
    pub fn from_parts(name: &str, open_window_secs: Option<i64>) -> Result<Self, ConversionError> {
        match name {
            "FcfsLottery" => {
                let secs = open_window_secs
                    .ok_or_else(|| ConversionError("FcfsLottery release has no open window".to_string()))?;
                Ok(ReleaseMethod::FcfsLottery { open_window: Duration::seconds(secs) })
            },
            "ReservedDirect" => Ok(ReleaseMethod::ReservedDirect),
            s => Err(ConversionError(format!("Unknown release method: {s}"))),
        }
    }
}

impl Display for ReleaseMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Error)]
#[error("Invalid stored value: {0}")]
pub struct ConversionError(pub String);

//--------------------------------------  PaymentDeadline   ----------------------------------------------------------
/// Per-release policy for converting allocation instants into payment deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDeadline {
    /// Tickets allocated at allocation time must be paid before this instant.
    pub absolute_deadline: DateTime<Utc>,
    /// Pay-within window for promoted reserves, counted from the promotion instant. When absent,
    /// promoted reserves inherit the absolute deadline.
    pub reserve_payment_duration: Option<Duration>,
}

//--------------------------------------   TicketRelease    ----------------------------------------------------------
/// A capacity-bounded sale window for an event.
#[derive(Debug, Clone)]
pub struct TicketRelease {
    pub id: i64,
    pub event_id: i64,
    pub name: String,
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    /// Total allocatable tickets across all types in this release.
    pub capacity: i64,
    pub method: ReleaseMethod,
    /// Upper bound on the sum of order quantities per user across the release's event.
    pub max_per_user: i64,
    /// One-way latch: set when the allocation coordinator has run for this release.
    pub allocated: bool,
    /// Promo-code gating flag. Orthogonal to `method`.
    pub reserved: bool,
    pub is_private: bool,
    pub promo_code_digest: Option<String>,
    /// Seeds the lottery shuffle so an allocation re-run is reproducible.
    pub lottery_nonce: i64,
    pub payment_deadline: Option<PaymentDeadline>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TicketRelease {
    /// End of the FCFS open window, when the method has one.
    pub fn open_window_end(&self) -> Option<DateTime<Utc>> {
        match self.method {
            ReleaseMethod::FcfsLottery { open_window } => Some(self.opens_at + open_window),
            ReleaseMethod::ReservedDirect => None,
        }
    }

    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.opens_at <= now && now <= self.closes_at
    }
}

//--------------------------------------  NewTicketRelease  ----------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewTicketRelease {
    pub event_id: i64,
    pub name: String,
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    pub capacity: i64,
    pub method: ReleaseMethod,
    pub max_per_user: i64,
    pub reserved: bool,
    pub is_private: bool,
    pub promo_code_digest: Option<String>,
    pub payment_deadline: Option<PaymentDeadline>,
}

impl NewTicketRelease {
    pub fn new(
        event_id: i64,
        name: impl Into<String>,
        opens_at: DateTime<Utc>,
        closes_at: DateTime<Utc>,
        capacity: i64,
        method: ReleaseMethod,
        max_per_user: i64,
    ) -> Self {
        Self {
            event_id,
            name: name.into(),
            opens_at,
            closes_at,
            capacity,
            method,
            max_per_user,
            reserved: false,
            is_private: false,
            promo_code_digest: None,
            payment_deadline: None,
        }
    }

    pub fn with_payment_deadline(mut self, deadline: PaymentDeadline) -> Self {
        self.payment_deadline = Some(deadline);
        self
    }

    pub fn with_promo_code_digest(mut self, digest: String) -> Self {
        self.reserved = true;
        self.promo_code_digest = Some(digest);
        self
    }
}

//--------------------------------------    TicketType      ----------------------------------------------------------
/// A priceable sub-category of a release.
#[derive(Debug, Clone, FromRow)]
pub struct TicketType {
    pub id: i64,
    pub release_id: i64,
    pub name: String,
    pub price: Money,
}

//--------------------------------------    TicketOrder     ----------------------------------------------------------
/// A user's request for `quantity` tickets of one type in one release, prior to allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TicketOrder {
    pub id: i64,
    pub user_id: i64,
    pub release_id: i64,
    pub ticket_type_id: i64,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
    /// Set exactly once, when the policy first assigns or rejects the order.
    pub handled_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub deleted: bool,
    pub deleted_reason: Option<String>,
}

impl TicketOrder {
    pub fn is_handled(&self) -> bool {
        self.handled_at.is_some()
    }
}

//--------------------------------------      NewOrder      ----------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: i64,
    pub release_id: i64,
    pub ticket_type_id: i64,
    pub quantity: i64,
    /// Unlock code for promo-gated releases. Compared against the release's stored digest.
    pub promo_code: Option<Secret<String>>,
}

impl NewOrder {
    pub fn new(user_id: i64, release_id: i64, ticket_type_id: i64, quantity: i64) -> Self {
        Self { user_id, release_id, ticket_type_id, quantity, promo_code: None }
    }

    pub fn with_promo_code(mut self, code: Secret<String>) -> Self {
        self.promo_code = Some(code);
        self
    }
}

//--------------------------------------       Ticket       ----------------------------------------------------------
/// A post-allocation artifact: either allocated (rank 0) or a reserve (rank >= 1). One row per
/// ticket unit, so an order for n tickets produces n rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub id: i64,
    pub order_id: i64,
    pub release_id: i64,
    pub user_id: i64,
    pub is_reserve: bool,
    /// 0 for allocated tickets; reserves form a dense 1..K sequence per release.
    pub reserve_rank: i64,
    pub paid: bool,
    pub payment_ref: Option<String>,
    pub paid_deadline: Option<DateTime<Utc>>,
    /// Opaque 16-character entry token.
    pub qr: String,
    pub deleted: bool,
    pub deleted_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn is_allocated(&self) -> bool {
        !self.is_reserve && !self.deleted
    }
}

//--------------------------------------  AllocationTrigger  ---------------------------------------------------------
/// What caused the allocation coordinator to run. Recorded in logs only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationTrigger {
    /// An event manager invoked allocation by hand.
    Manual,
    /// The release's close instant passed.
    AutoOnClose,
    /// A periodic sweep picked the release up.
    AutoPeriodic,
}

impl Display for AllocationTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocationTrigger::Manual => write!(f, "manual"),
            AllocationTrigger::AutoOnClose => write!(f, "auto_on_close"),
            AllocationTrigger::AutoPeriodic => write!(f, "auto_periodic"),
        }
    }
}
