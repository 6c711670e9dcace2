//! The voting-eligibility and ballot-casting core.
//!
//! Each service owns a handle on the shared store and re-reads everything it
//! needs inside the transaction that acts on it. Nothing is cached between
//! calls.

use thiserror::Error;

use crate::model::{
    ids::{CandidateId, PositionId, StudentId},
    schedule::InactiveReason,
};
use crate::store::{Retryable, StoreError};

mod admin;
mod engine;
mod gate;
mod schedule;

pub use admin::{
    AdminConsole, CandidateTally, CreatedStudent, IssuedCredential, PositionTally, Tally, VotesReset,
};
pub use engine::BallotEngine;
pub use gate::{EligibilityGate, Session};
pub use schedule::ElectionSchedule;

/// Why a login was refused.
#[derive(Debug, Error)]
pub enum EligibilityError {
    #[error("student not found")]
    NotFound,
    #[error("incorrect student ID or credential")]
    InvalidCredential,
    #[error("student has already voted")]
    AlreadyVoted,
    #[error("student is already logged in on another device")]
    SessionConflict,
    #[error("this device has already been used to vote by this student")]
    DeviceExhausted,
    #[error("no device token supplied")]
    MissingDevice,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EligibilityError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::InvalidCredential => "InvalidCredential",
            Self::AlreadyVoted => "AlreadyVoted",
            Self::SessionConflict => "SessionConflict",
            Self::DeviceExhausted => "DeviceExhausted",
            Self::MissingDevice => "MissingDevice",
            Self::Store(_) => "StoreUnavailable",
        }
    }
}

impl Retryable for EligibilityError {
    fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_conflict())
    }
}

/// Why a ballot was refused.
#[derive(Debug, Error)]
pub enum CastError {
    #[error("student not found")]
    NotFound,
    #[error("student has already voted")]
    AlreadyVoted,
    #[error("student has no active session")]
    NoActiveSession,
    #[error("voting is not active: {0}")]
    VotingNotActive(#[from] InactiveReason),
    #[error("malformed ballot: {0}")]
    MalformedBallot(String),
    #[error("unknown position {0}")]
    UnknownPosition(PositionId),
    #[error("candidate {0} is not standing for the selected position")]
    UnknownCandidate(CandidateId),
    #[error("candidate {0} is from another department")]
    CrossDepartmentForbidden(CandidateId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CastError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::AlreadyVoted => "AlreadyVoted",
            Self::NoActiveSession => "NoActiveSession",
            Self::VotingNotActive(_) => "VotingNotActive",
            Self::MalformedBallot(_) => "MalformedBallot",
            Self::UnknownPosition(_) => "UnknownPosition",
            Self::UnknownCandidate(_) => "UnknownCandidate",
            Self::CrossDepartmentForbidden(_) => "CrossDepartmentForbidden",
            Self::Store(_) => "StoreUnavailable",
        }
    }
}

impl Retryable for CastError {
    fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_conflict())
    }
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("voting must start before it ends")]
    InvalidWindow,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ScheduleError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidWindow => "InvalidWindow",
            Self::Store(_) => "StoreUnavailable",
        }
    }
}

impl Retryable for ScheduleError {
    fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_conflict())
    }
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("student {0} not found")]
    NotFound(StudentId),
    #[error("student {0} already exists")]
    AlreadyExists(StudentId),
    #[error("unknown position {0}")]
    UnknownPosition(PositionId),
    #[error("failed to hash credential: {0}")]
    Credential(#[from] argon2::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AdminError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::AlreadyExists(_) => "AlreadyExists",
            Self::UnknownPosition(_) => "UnknownPosition",
            Self::Credential(_) => "Internal",
            Self::Store(_) => "StoreUnavailable",
        }
    }
}

impl Retryable for AdminError {
    fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_conflict())
    }
}

#[cfg(test)]
mod test_utils {
    use std::sync::Arc;

    use crate::store::{MemoryStore, SharedStore};

    pub fn shared(store: &MemoryStore) -> SharedStore {
        Arc::new(store.clone())
    }
}
