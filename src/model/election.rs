use serde::{Deserialize, Serialize};

use crate::model::ids::{CandidateId, PositionId};

/// An elected position, e.g. "President".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    #[serde(rename = "_id")]
    pub id: PositionId,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A candidate standing for exactly one position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: CandidateId,
    pub name: String,
    pub position_id: PositionId,
    /// The program the candidate represents, for departmental voting.
    pub department: String,
    #[serde(default)]
    pub bio: String,
}

/// A position as submitted by an administrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPosition {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl From<NewPosition> for Position {
    fn from(new: NewPosition) -> Self {
        Self {
            id: PositionId::generate(),
            name: new.name,
            description: new.description,
        }
    }
}

/// A candidate as submitted by an administrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCandidate {
    pub name: String,
    pub position_id: PositionId,
    pub department: String,
    #[serde(default)]
    pub bio: String,
}

impl From<NewCandidate> for Candidate {
    fn from(new: NewCandidate) -> Self {
        Self {
            id: CandidateId::generate(),
            name: new.name,
            position_id: new.position_id,
            department: new.department,
            bio: new.bio,
        }
    }
}

/// A position together with everyone standing for it, as shown on a ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotPosition {
    #[serde(flatten)]
    pub position: Position,
    pub candidates: Vec<Candidate>,
}
