use thiserror::Error;

use crate::{db::traits::StoreError, reclaim::InvariantViolation};

/// Errors from the allocation coordinator. `AlreadyAllocated` is the clean answer for the loser
/// of an allocation race; `Invariant` halts work on the affected release and needs an operator.
#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("Release {0} has already been allocated")]
    AlreadyAllocated(i64),
    #[error(transparent)]
    Invariant(InvariantViolation),
    #[error("Storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for AllocationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyAllocated(id) => AllocationError::AlreadyAllocated(id),
            StoreError::InvariantViolation(v) => AllocationError::Invariant(v),
            other => AllocationError::Store(other),
        }
    }
}
