use std::collections::{BTreeMap, BTreeSet};

use log::{info, warn};
use serde::Serialize;

use crate::config::Config;
use crate::logging::AUDIT;
use crate::model::{
    election::{Candidate, NewCandidate, NewPosition, Position},
    ids::{AdminId, CandidateId, PositionId, StudentId},
    student::{generate_credential, hash_credential, NewStudent, StudentProfile},
};
use crate::store::{with_retries, SharedStore, StoreError};

use super::AdminError;

/// A newly registered student, with their credential if one was generated.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedStudent {
    pub student: StudentProfile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_credential: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateTally {
    pub candidate_id: CandidateId,
    pub name: String,
    pub votes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionTally {
    pub position_id: PositionId,
    pub name: String,
    pub candidates: Vec<CandidateTally>,
}

/// A credential issued by a bulk reset, shown to the administrator once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedCredential {
    pub student_id: StudentId,
    pub name: String,
    pub credential: String,
}

/// What a bulk vote reset removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VotesReset {
    pub votes: u64,
    pub devices: u64,
    /// Students whose voting or session state was reset.
    pub students: usize,
}

/// Vote counts per position and candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tally {
    /// Distinct students with at least one recorded vote.
    pub voters: usize,
    pub positions: Vec<PositionTally>,
}

/// Privileged maintenance: registration, credentials, repairs and reference data.
pub struct AdminConsole {
    store: SharedStore,
    retries: u32,
}

impl AdminConsole {
    pub fn new(store: SharedStore, config: &Config) -> Self {
        Self {
            store,
            retries: config.txn_retries(),
        }
    }

    pub async fn create_student(
        &self,
        admin: &AdminId,
        new_student: NewStudent,
    ) -> Result<CreatedStudent, AdminError> {
        // Hash outside the transaction.
        let (student, generated_credential) = new_student.into_student()?;
        let student = &student;

        let inserted = with_retries(self.retries, move || async move {
            let mut txn = self.store.begin().await?;
            let inserted = txn.insert_student(student).await?;
            if inserted {
                txn.commit().await?;
            }
            Ok::<_, StoreError>(inserted)
        })
        .await?;
        if !inserted {
            return Err(AdminError::AlreadyExists(student.id.clone()));
        }

        warn!(target: AUDIT, "Admin {admin} registered student {}", student.id);
        Ok(CreatedStudent {
            student: student.into(),
            generated_credential,
        })
    }

    /// Replace the student's credential with a random one, returned in plaintext exactly once.
    pub async fn reset_credential(
        &self,
        admin: &AdminId,
        student_id: &StudentId,
    ) -> Result<String, AdminError> {
        let credential = generate_credential();
        let credential_hash = &hash_credential(&credential)?;

        with_retries(self.retries, move || async move {
            let mut txn = self.store.begin().await?;
            let mut student = txn
                .student(student_id)
                .await?
                .ok_or_else(|| AdminError::NotFound(student_id.clone()))?;
            student.credential_hash = credential_hash.clone();
            txn.update_student(&student).await?;
            txn.commit().await?;
            Ok::<_, AdminError>(())
        })
        .await?;

        warn!(target: AUDIT, "Admin {admin} reset the credential of student {student_id}");
        Ok(credential)
    }

    /// Repair: forget a student's ballot so they can vote again.
    ///
    /// Deletes their votes and device usage and resets their voting and
    /// session state, all in one transaction. Returns how many votes were deleted.
    pub async fn clear_student_votes(
        &self,
        admin: &AdminId,
        student_id: &StudentId,
    ) -> Result<u64, AdminError> {
        let (votes, devices) = with_retries(self.retries, move || async move {
            let mut txn = self.store.begin().await?;
            let mut student = txn
                .student(student_id)
                .await?
                .ok_or_else(|| AdminError::NotFound(student_id.clone()))?;
            let votes = txn.delete_votes_by(student_id).await?;
            let devices = txn.delete_device_usage_by(student_id).await?;
            student.clear_vote();
            txn.update_student(&student).await?;
            txn.commit().await?;
            Ok::<_, AdminError>((votes, devices))
        })
        .await?;

        warn!(
            target: AUDIT,
            "Admin {admin} cleared {votes} vote(s) and {devices} device record(s) of student {student_id}"
        );
        Ok(votes)
    }

    /// Repair: forget every ballot, as before the election started.
    ///
    /// Deletes all votes and device usage, and resets the voting and session
    /// state of every student, all in one transaction.
    pub async fn clear_all_votes(&self, admin: &AdminId) -> Result<VotesReset, AdminError> {
        let reset = with_retries(self.retries, move || async move {
            let mut txn = self.store.begin().await?;
            let votes = txn.delete_all_votes().await?;
            let devices = txn.delete_all_device_usage().await?;
            let mut students = 0;
            for mut student in txn.students().await? {
                if student.has_voted || student.is_logged_in {
                    student.clear_vote();
                    txn.update_student(&student).await?;
                    students += 1;
                }
            }
            txn.commit().await?;
            Ok::<_, AdminError>(VotesReset {
                votes,
                devices,
                students,
            })
        })
        .await?;

        warn!(
            target: AUDIT,
            "Admin {admin} cleared all {} vote(s) and {} device record(s), resetting {} student(s)",
            reset.votes, reset.devices, reset.students
        );
        Ok(reset)
    }

    /// Give every registered student a fresh random credential.
    ///
    /// Returns the new credentials in plaintext, ordered by student ID. Open
    /// sessions are left alone.
    pub async fn reset_all_credentials(
        &self,
        admin: &AdminId,
    ) -> Result<Vec<IssuedCredential>, AdminError> {
        // Hash outside the transaction that applies them.
        let mut students = {
            let mut txn = self.store.begin().await?;
            txn.students().await?
        };
        students.sort_by(|a, b| a.id.cmp(&b.id));
        let mut issued = Vec::with_capacity(students.len());
        let mut hashes = BTreeMap::new();
        for student in &students {
            let credential = generate_credential();
            hashes.insert(student.id.clone(), hash_credential(&credential)?);
            issued.push(IssuedCredential {
                student_id: student.id.clone(),
                name: student.name.clone(),
                credential,
            });
        }
        let hashes = &hashes;

        with_retries(self.retries, move || async move {
            let mut txn = self.store.begin().await?;
            for mut student in txn.students().await? {
                // Students registered since the hashes were prepared keep their credential.
                if let Some(hash) = hashes.get(&student.id) {
                    student.credential_hash = hash.clone();
                    txn.update_student(&student).await?;
                }
            }
            txn.commit().await?;
            Ok::<_, AdminError>(())
        })
        .await?;

        warn!(
            target: AUDIT,
            "Admin {admin} reset the credentials of all {} student(s)",
            issued.len()
        );
        Ok(issued)
    }

    pub async fn create_position(
        &self,
        admin: &AdminId,
        new_position: NewPosition,
    ) -> Result<Position, AdminError> {
        let position = &Position::from(new_position);
        with_retries(self.retries, move || async move {
            let mut txn = self.store.begin().await?;
            txn.insert_position(position).await?;
            txn.commit().await
        })
        .await?;

        info!("Admin {admin} created position {} ({})", position.id, position.name);
        Ok(position.clone())
    }

    pub async fn create_candidate(
        &self,
        admin: &AdminId,
        new_candidate: NewCandidate,
    ) -> Result<Candidate, AdminError> {
        let candidate = &Candidate::from(new_candidate);
        with_retries(self.retries, move || async move {
            let mut txn = self.store.begin().await?;
            if txn.position(&candidate.position_id).await?.is_none() {
                return Err(AdminError::UnknownPosition(candidate.position_id.clone()));
            }
            txn.insert_candidate(candidate).await?;
            txn.commit().await?;
            Ok::<_, AdminError>(())
        })
        .await?;

        info!(
            "Admin {admin} created candidate {} ({}) for position {}",
            candidate.id, candidate.name, candidate.position_id
        );
        Ok(candidate.clone())
    }

    /// Count the votes, with positions ordered by name. Positions and
    /// candidates with no votes are included with zero.
    pub async fn tally(&self) -> Result<Tally, StoreError> {
        let mut txn = self.store.begin().await?;
        let mut positions = txn.positions().await?;
        positions.sort_by(|a, b| a.name.cmp(&b.name));
        let candidates = txn.candidates().await?;
        let votes = txn.votes().await?;

        let mut counts: BTreeMap<(&PositionId, &CandidateId), u64> = BTreeMap::new();
        let mut voters = BTreeSet::new();
        for vote in &votes {
            *counts
                .entry((&vote.position_id, &vote.candidate_id))
                .or_default() += 1;
            voters.insert(&vote.voter_id);
        }

        let positions = positions
            .iter()
            .map(|position| PositionTally {
                position_id: position.id.clone(),
                name: position.name.clone(),
                candidates: candidates
                    .iter()
                    .filter(|candidate| candidate.position_id == position.id)
                    .map(|candidate| CandidateTally {
                        candidate_id: candidate.id.clone(),
                        name: candidate.name.clone(),
                        votes: counts
                            .get(&(&position.id, &candidate.id))
                            .copied()
                            .unwrap_or(0),
                    })
                    .collect(),
            })
            .collect();

        Ok(Tally {
            voters: voters.len(),
            positions,
        })
    }
}
