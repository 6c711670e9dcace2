use chrono::{DateTime, Utc};
use mongodb::bson::{oid::ObjectId, serde_helpers::chrono_datetime_as_bson_datetime};
use serde::{Deserialize, Serialize};

use crate::model::{
    device::DeviceHash,
    ids::{CandidateId, PositionId, StudentId},
};

/// One choice on a ballot: a candidate for a position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub position_id: PositionId,
    pub candidate_id: CandidateId,
}

impl Selection {
    pub fn new(position_id: impl Into<PositionId>, candidate_id: impl Into<CandidateId>) -> Self {
        Self {
            position_id: position_id.into(),
            candidate_id: candidate_id.into(),
        }
    }
}

/// A single recorded selection. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub position_id: PositionId,
    pub candidate_id: CandidateId,
    pub voter_id: StudentId,
    pub device_id: DeviceHash,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
}

impl Vote {
    pub fn new(
        selection: Selection,
        voter_id: StudentId,
        device_id: DeviceHash,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ObjectId::new(),
            position_id: selection.position_id,
            candidate_id: selection.candidate_id,
            voter_id,
            device_id,
            timestamp,
        }
    }
}

/// Records that a student completed a ballot from a device.
///
/// Keyed by device and student together: the same device may still serve
/// other students.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceUsage {
    #[serde(rename = "_id")]
    pub key: String,
    pub device_id: DeviceHash,
    pub used_by: StudentId,
    pub used: bool,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
}

impl DeviceUsage {
    /// The record key for a device and student pair.
    pub fn key(device_id: &DeviceHash, student_id: &StudentId) -> String {
        format!("{device_id}_{student_id}")
    }

    /// A record marking the pair as used.
    pub fn used(device_id: DeviceHash, student_id: StudentId, timestamp: DateTime<Utc>) -> Self {
        Self {
            key: Self::key(&device_id, &student_id),
            device_id,
            used_by: student_id,
            used: true,
            timestamp,
        }
    }
}

/// Confirmation handed back after a ballot has been committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub student_id: StudentId,
    pub cast_at: DateTime<Utc>,
    pub selections: usize,
}
