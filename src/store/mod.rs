//! Transactional persistence for students, votes, device usage and the
//! election config.
//!
//! Every read-check-write sequence in the core runs inside one
//! [`Transaction`]. A transaction that is dropped without being committed is
//! aborted and leaves no trace.

use std::{future::Future, sync::Arc};

use log::debug;
use thiserror::Error;

use crate::model::{
    device::DeviceHash,
    election::{Candidate, Position},
    ids::{CandidateId, PositionId, StudentId},
    schedule::ElectionConfig,
    student::Student,
    vote::{DeviceUsage, Vote},
};

mod memory;
mod mongodb;

pub use self::memory::MemoryStore;
pub use self::mongodb::MongoStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or refused the operation. Nothing was committed.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// Another transaction touched the same data first. The whole attempt may be retried.
    #[error("transaction conflict: {0}")]
    Conflict(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The store as held in rocket managed state.
pub type SharedStore = Arc<dyn Store>;

#[rocket::async_trait]
pub trait Store: Send + Sync {
    /// Open a new transaction.
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>>;
}

/// A unit of work against the store. Reads observe this transaction's own writes.
#[rocket::async_trait]
pub trait Transaction: Send {
    async fn student(&mut self, id: &StudentId) -> StoreResult<Option<Student>>;

    async fn device_usage(
        &mut self,
        device: &DeviceHash,
        student: &StudentId,
    ) -> StoreResult<Option<DeviceUsage>>;

    async fn election_config(&mut self) -> StoreResult<Option<ElectionConfig>>;

    async fn position(&mut self, id: &PositionId) -> StoreResult<Option<Position>>;

    async fn candidate(&mut self, id: &CandidateId) -> StoreResult<Option<Candidate>>;

    async fn positions(&mut self) -> StoreResult<Vec<Position>>;

    async fn candidates(&mut self) -> StoreResult<Vec<Candidate>>;

    async fn votes(&mut self) -> StoreResult<Vec<Vote>>;

    async fn students(&mut self) -> StoreResult<Vec<Student>>;

    /// Insert a new student. Returns false if the ID is already taken.
    async fn insert_student(&mut self, student: &Student) -> StoreResult<bool>;

    /// Overwrite a student previously read in this transaction.
    ///
    /// Fails with [`StoreError::Conflict`] if the stored revision no longer
    /// matches `student.revision`.
    async fn update_student(&mut self, student: &Student) -> StoreResult<()>;

    async fn insert_votes(&mut self, votes: &[Vote]) -> StoreResult<()>;

    /// Upsert a device usage record.
    async fn mark_device_used(&mut self, usage: &DeviceUsage) -> StoreResult<()>;

    /// Delete every vote cast by the student, returning how many there were.
    async fn delete_votes_by(&mut self, student: &StudentId) -> StoreResult<u64>;

    /// Delete every device usage record for the student, returning how many there were.
    async fn delete_device_usage_by(&mut self, student: &StudentId) -> StoreResult<u64>;

    /// Delete every vote, returning how many there were.
    async fn delete_all_votes(&mut self) -> StoreResult<u64>;

    /// Delete every device usage record, returning how many there were.
    async fn delete_all_device_usage(&mut self) -> StoreResult<u64>;

    /// Replace the config singleton.
    async fn put_election_config(&mut self, config: &ElectionConfig) -> StoreResult<()>;

    async fn insert_position(&mut self, position: &Position) -> StoreResult<()>;

    async fn insert_candidate(&mut self, candidate: &Candidate) -> StoreResult<()>;

    /// Atomically apply every write made in this transaction.
    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// Errors that may be caused by a lost race rather than by the request itself.
pub trait Retryable {
    fn is_conflict(&self) -> bool;
}

impl Retryable for StoreError {
    fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Run `attempt` until it succeeds, fails for a reason other than a conflict,
/// or has been retried `retries` times.
///
/// Each attempt must open its own transaction, so that the retry re-reads
/// whatever the winning transaction committed.
pub async fn with_retries<T, E, F, Fut>(retries: u32, mut attempt: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut retried = 0;
    loop {
        match attempt().await {
            Err(err) if err.is_conflict() && retried < retries => {
                retried += 1;
                debug!("Retrying transaction after conflict ({retried}/{retries}): {err}");
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[backend_test]
    async fn conflicts_are_retried_until_the_limit() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), StoreError> = with_retries(3, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Conflict("write conflict".to_string()))
        })
        .await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[backend_test]
    async fn other_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), StoreError> = with_retries(3, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("timeout".to_string()))
        })
        .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[backend_test]
    async fn retry_stops_at_first_success() {
        let calls = &AtomicU32::new(0);
        let result = with_retries(3, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(StoreError::Conflict("write conflict".to_string()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
