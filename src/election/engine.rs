use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::config::Config;
use crate::model::{
    election::{BallotPosition, Candidate},
    ids::{PositionId, StudentId},
    schedule::{InactiveReason, WindowState},
    student::SessionKey,
    vote::{DeviceUsage, Receipt, Selection, Vote},
};
use crate::store::{with_retries, SharedStore, StoreError};

use super::CastError;

/// Validates and records ballots.
pub struct BallotEngine {
    store: SharedStore,
    retries: u32,
}

impl BallotEngine {
    pub fn new(store: SharedStore, config: &Config) -> Self {
        Self {
            store,
            retries: config.txn_retries(),
        }
    }

    /// Cast a ballot from the given session of a student, at the current time.
    pub async fn cast_ballot(
        &self,
        student_id: &StudentId,
        session: &SessionKey,
        selections: &[Selection],
    ) -> Result<Receipt, CastError> {
        self.cast_ballot_at(student_id, session, selections, Utc::now())
            .await
    }

    /// Cast a ballot as if at `now`.
    ///
    /// Every precondition is checked against committed state inside the same
    /// transaction that records the votes, including that `session` is still
    /// the student's open session. On success the student is marked as voted,
    /// logged out, and their device is burned for them.
    pub async fn cast_ballot_at(
        &self,
        student_id: &StudentId,
        session: &SessionKey,
        selections: &[Selection],
        now: DateTime<Utc>,
    ) -> Result<Receipt, CastError> {
        let result = with_retries(self.retries, move || {
            self.try_cast_ballot(student_id, session, selections, now)
        })
        .await;

        match &result {
            Ok(receipt) => info!(
                "Student {student_id} cast a ballot with {} selection(s)",
                receipt.selections
            ),
            Err(CastError::Store(err)) => warn!("Ballot of student {student_id} not recorded: {err}"),
            Err(err) => info!("Rejected ballot of student {student_id}: {err}"),
        }
        result
    }

    async fn try_cast_ballot(
        &self,
        student_id: &StudentId,
        session: &SessionKey,
        selections: &[Selection],
        now: DateTime<Utc>,
    ) -> Result<Receipt, CastError> {
        let mut txn = self.store.begin().await?;

        // The voter, as committed right now.
        let mut student = txn
            .student(student_id)
            .await?
            .ok_or(CastError::NotFound)?;
        if student.has_voted {
            return Err(CastError::AlreadyVoted);
        }
        // A stale cookie from an evicted or ended session must not vote.
        let device = match &student.bound_device {
            Some(device) if student.holds_session(session) => device.clone(),
            _ => return Err(CastError::NoActiveSession),
        };

        // The window.
        let Some(config) = txn.election_config().await? else {
            return Err(InactiveReason::NotScheduled.into());
        };
        WindowState::at(Some(&config), now).check_open()?;

        // The ballot itself.
        check_shape(selections)?;
        let mut candidates = Vec::with_capacity(selections.len());
        for selection in selections {
            if txn.position(&selection.position_id).await?.is_none() {
                return Err(CastError::UnknownPosition(selection.position_id.clone()));
            }
            let candidate = txn
                .candidate(&selection.candidate_id)
                .await?
                .filter(|candidate| candidate.position_id == selection.position_id)
                .ok_or_else(|| CastError::UnknownCandidate(selection.candidate_id.clone()))?;
            candidates.push(candidate);
        }
        if config.restricts_departments() {
            if let Some(outsider) = candidates
                .iter()
                .find(|candidate| candidate.department != student.program)
            {
                return Err(CastError::CrossDepartmentForbidden(outsider.id.clone()));
            }
        }

        // Record everything at once.
        let votes: Vec<Vote> = selections
            .iter()
            .map(|selection| Vote::new(selection.clone(), student_id.clone(), device.clone(), now))
            .collect();
        txn.insert_votes(&votes).await?;
        student.record_vote(now);
        txn.update_student(&student).await?;
        txn.mark_device_used(&DeviceUsage::used(device, student_id.clone(), now))
            .await?;
        txn.commit().await?;

        Ok(Receipt {
            student_id: student_id.clone(),
            cast_at: now,
            selections: votes.len(),
        })
    }

    /// Every position ordered by name, with the candidates standing for it.
    pub async fn ballot_options(&self) -> Result<Vec<BallotPosition>, StoreError> {
        let mut txn = self.store.begin().await?;
        let mut positions = txn.positions().await?;
        positions.sort_by(|a, b| a.name.cmp(&b.name));
        let mut by_position: BTreeMap<PositionId, Vec<Candidate>> = BTreeMap::new();
        for candidate in txn.candidates().await? {
            by_position
                .entry(candidate.position_id.clone())
                .or_default()
                .push(candidate);
        }

        Ok(positions
            .into_iter()
            .map(|position| BallotPosition {
                candidates: by_position.remove(&position.id).unwrap_or_default(),
                position,
            })
            .collect())
    }
}

/// A ballot must select someone, and at most one candidate per position.
fn check_shape(selections: &[Selection]) -> Result<(), CastError> {
    if selections.is_empty() {
        return Err(CastError::MalformedBallot("no selections".to_string()));
    }
    let mut seen = HashSet::new();
    for selection in selections {
        if !seen.insert(&selection.position_id) {
            return Err(CastError::MalformedBallot(format!(
                "more than one selection for position {}",
                selection.position_id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::election::{test_utils::shared, EligibilityGate};
    use crate::model::{
        device::{DeviceHash, DeviceToken},
        ids::AdminId,
        schedule::ElectionConfig,
        student::{examples::EXAMPLE_CREDENTIAL, Student},
    };
    use crate::store::MemoryStore;

    fn engine(store: &MemoryStore) -> BallotEngine {
        BallotEngine::new(shared(store), &Config::example())
    }

    fn gate(store: &MemoryStore) -> EligibilityGate {
        EligibilityGate::new(shared(store), &Config::example())
    }

    fn s1() -> StudentId {
        StudentId::new("S1")
    }

    fn president(candidate: &str) -> Selection {
        Selection::new("pos1", candidate)
    }

    /// S1 logged in on `dev1` during an open window, with the example reference data.
    async fn logged_in(store: &MemoryStore) -> (DateTime<Utc>, SessionKey) {
        let now = Utc::now();
        store.put_student(Student::example()).await;
        store.put_config(ElectionConfig::open_at(now)).await;
        store.put_reference_data().await;
        let session = gate(store)
            .authenticate(&s1(), EXAMPLE_CREDENTIAL, &DeviceToken::new("dev1"))
            .await
            .unwrap();
        (now, session.key)
    }

    #[backend_test]
    async fn ballot_is_recorded_once(store: MemoryStore) {
        let (_, key) = logged_in(&store).await;
        let engine = engine(&store);
        let selections = [president("candA"), Selection::new("pos2", "candC")];

        let receipt = engine.cast_ballot(&s1(), &key, &selections).await.unwrap();
        assert_eq!(receipt.student_id, s1());
        assert_eq!(receipt.selections, 2);

        let student = store.get_student("S1").await.unwrap();
        assert!(student.has_voted);
        assert!(!student.is_logged_in);
        assert_eq!(student.bound_device, None);
        assert_eq!(student.vote_timestamp, Some(receipt.cast_at));

        let votes = store.all_votes().await;
        assert_eq!(votes.len(), 2);
        let device = Config::example()
            .device_hasher()
            .digest(&DeviceToken::new("dev1"));
        assert!(votes.iter().all(|vote| vote.voter_id == s1() && vote.device_id == device));
        let usage = store.all_device_usage().await;
        assert_eq!(usage.len(), 1);
        assert!(usage[0].used);
        assert_eq!(usage[0].key, DeviceUsage::key(&device, &s1()));

        let result = engine.cast_ballot(&s1(), &key, &[president("candA")]).await;
        assert!(matches!(result, Err(CastError::AlreadyVoted)));
        assert_eq!(store.all_votes().await.len(), 2);
    }

    #[backend_test]
    async fn concurrent_ballots_record_exactly_one(store: MemoryStore) {
        let (_, key) = logged_in(&store).await;
        let engine = std::sync::Arc::new(engine(&store));

        let tasks: Vec<_> = ["candA", "candB"]
            .into_iter()
            .map(|candidate| {
                let engine = engine.clone();
                let key = key.clone();
                rocket::tokio::spawn(async move {
                    engine.cast_ballot(&s1(), &key, &[president(candidate)]).await
                })
            })
            .collect();
        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap());
        }

        assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|result| matches!(result, Err(CastError::AlreadyVoted))));
        assert_eq!(store.all_votes().await.len(), 1);
    }

    #[backend_test]
    async fn voted_student_cannot_return_on_the_same_device(store: MemoryStore) {
        let (_, key) = logged_in(&store).await;
        engine(&store)
            .cast_ballot(&s1(), &key, &[president("candA")])
            .await
            .unwrap();

        let result = gate(&store)
            .authenticate(&s1(), EXAMPLE_CREDENTIAL, &DeviceToken::new("dev1"))
            .await;
        assert!(matches!(
            result,
            Err(crate::election::EligibilityError::AlreadyVoted)
        ));
    }

    #[backend_test]
    async fn ballot_needs_a_session(store: MemoryStore) {
        let now = Utc::now();
        store.put_student(Student::example()).await;
        store.put_config(ElectionConfig::open_at(now)).await;
        store.put_reference_data().await;
        let key = SessionKey::generate();

        let result = engine(&store).cast_ballot(&s1(), &key, &[president("candA")]).await;
        assert!(matches!(result, Err(CastError::NoActiveSession)));

        let result = engine(&store)
            .cast_ballot(&StudentId::new("nobody"), &key, &[president("candA")])
            .await;
        assert!(matches!(result, Err(CastError::NotFound)));
    }

    #[backend_test]
    async fn evicted_session_cannot_vote(store: MemoryStore) {
        let (_, old) = logged_in(&store).await;
        let new = gate(&store)
            .force_authenticate(
                &AdminId::new("admin"),
                &s1(),
                EXAMPLE_CREDENTIAL,
                &DeviceToken::new("dev2"),
            )
            .await
            .unwrap()
            .key;
        let engine = engine(&store);

        let result = engine.cast_ballot(&s1(), &old, &[president("candA")]).await;
        assert!(matches!(result, Err(CastError::NoActiveSession)));
        assert!(store.all_votes().await.is_empty());
        assert!(store.get_student("S1").await.unwrap().holds_session(&new));

        // The votes go against the device of the session that cast them.
        engine.cast_ballot(&s1(), &new, &[president("candA")]).await.unwrap();
        let device = Config::example()
            .device_hasher()
            .digest(&DeviceToken::new("dev2"));
        assert_eq!(store.all_votes().await[0].device_id, device);
    }

    #[backend_test]
    async fn window_is_checked_at_cast_time(store: MemoryStore) {
        let (now, key) = logged_in(&store).await;
        let engine = engine(&store);
        let config = ElectionConfig::open_at(now);

        let result = engine
            .cast_ballot_at(&s1(), &key, &[president("candA")], config.voting_end + Duration::seconds(1))
            .await;
        assert!(matches!(
            result,
            Err(CastError::VotingNotActive(InactiveReason::Ended { .. }))
        ));

        let result = engine
            .cast_ballot_at(&s1(), &key, &[president("candA")], config.voting_start - Duration::seconds(1))
            .await;
        assert!(matches!(
            result,
            Err(CastError::VotingNotActive(InactiveReason::NotStarted { .. }))
        ));

        // Both bounds are inclusive.
        engine
            .cast_ballot_at(&s1(), &key, &[president("candA")], config.voting_end)
            .await
            .unwrap();
    }

    #[backend_test]
    async fn disabling_after_login_blocks_the_ballot(store: MemoryStore) {
        let (now, key) = logged_in(&store).await;
        let mut config = ElectionConfig::open_at(now);
        config.is_active = false;
        store.put_config(config).await;

        let result = engine(&store).cast_ballot(&s1(), &key, &[president("candA")]).await;
        assert!(matches!(
            result,
            Err(CastError::VotingNotActive(InactiveReason::Disabled))
        ));
        let student = store.get_student("S1").await.unwrap();
        assert!(!student.has_voted);
        assert!(student.is_logged_in);
        assert!(store.all_votes().await.is_empty());
    }

    #[backend_test]
    async fn unscheduled_election_rejects_ballots(store: MemoryStore) {
        let mut student = Student::example();
        let key = student.open_session(DeviceHash::example(), Utc::now());
        store.put_student(student).await;
        store.put_reference_data().await;

        let result = engine(&store).cast_ballot(&s1(), &key, &[president("candA")]).await;
        assert!(matches!(
            result,
            Err(CastError::VotingNotActive(InactiveReason::NotScheduled))
        ));
    }

    #[backend_test]
    async fn malformed_ballots_are_rejected(store: MemoryStore) {
        let (_, key) = logged_in(&store).await;
        let engine = engine(&store);

        let result = engine.cast_ballot(&s1(), &key, &[]).await;
        assert!(matches!(result, Err(CastError::MalformedBallot(_))));

        let result = engine
            .cast_ballot(&s1(), &key, &[president("candA"), president("candB")])
            .await;
        assert!(matches!(result, Err(CastError::MalformedBallot(_))));

        assert!(!store.get_student("S1").await.unwrap().has_voted);
    }

    #[backend_test]
    async fn unknown_selections_are_rejected(store: MemoryStore) {
        let (_, key) = logged_in(&store).await;
        let engine = engine(&store);

        let result = engine
            .cast_ballot(&s1(), &key, &[Selection::new("pos9", "candA")])
            .await;
        assert!(matches!(result, Err(CastError::UnknownPosition(_))));

        let result = engine.cast_ballot(&s1(), &key, &[president("candZ")]).await;
        assert!(matches!(result, Err(CastError::UnknownCandidate(_))));

        // candC exists, but stands for pos2.
        let result = engine.cast_ballot(&s1(), &key, &[president("candC")]).await;
        assert!(matches!(result, Err(CastError::UnknownCandidate(_))));

        assert!(store.all_votes().await.is_empty());
    }

    #[backend_test]
    async fn departmental_voting_restricts_candidates(store: MemoryStore) {
        let (now, key) = logged_in(&store).await;
        let mut config = ElectionConfig::open_at(now);
        config.enable_departmental_voting = true;
        config.allow_cross_department_voting = false;
        store.put_config(config).await;
        let engine = engine(&store);

        // S1 studies BBA; candB is from MBA.
        let result = engine.cast_ballot(&s1(), &key, &[president("candB")]).await;
        assert!(matches!(result, Err(CastError::CrossDepartmentForbidden(_))));

        engine.cast_ballot(&s1(), &key, &[president("candA")]).await.unwrap();
    }

    #[backend_test]
    async fn cross_department_voting_can_be_allowed(store: MemoryStore) {
        let (now, key) = logged_in(&store).await;
        let mut config = ElectionConfig::open_at(now);
        config.enable_departmental_voting = true;
        store.put_config(config).await;

        engine(&store)
            .cast_ballot(&s1(), &key, &[president("candB")])
            .await
            .unwrap();
    }

    #[backend_test]
    async fn failed_commit_records_nothing(store: MemoryStore) {
        let (_, key) = logged_in(&store).await;
        store.fail_next_commits(1);

        let result = engine(&store).cast_ballot(&s1(), &key, &[president("candA")]).await;
        assert!(matches!(result, Err(CastError::Store(StoreError::Unavailable(_)))));

        let student = store.get_student("S1").await.unwrap();
        assert!(!student.has_voted);
        assert!(student.is_logged_in);
        assert_eq!(student.vote_timestamp, None);
        assert!(store.all_votes().await.is_empty());
        assert!(store.all_device_usage().await.is_empty());

        // The ballot can simply be cast again.
        engine(&store)
            .cast_ballot(&s1(), &key, &[president("candA")])
            .await
            .unwrap();
    }

    #[backend_test]
    async fn options_group_candidates_by_position(store: MemoryStore) {
        store.put_reference_data().await;
        let options = engine(&store).ballot_options().await.unwrap();

        assert_eq!(options.len(), 2);
        assert_eq!(options[0].position.id, PositionId::new("pos1"));
        assert_eq!(options[0].candidates.len(), 2);
        assert_eq!(options[1].position.id, PositionId::new("pos2"));
        assert_eq!(options[1].candidates.len(), 1);
    }

    #[backend_test]
    async fn options_are_ordered_by_position_name(store: MemoryStore) {
        store.put_reference_data().await;
        let mut txn = crate::store::Store::begin(&store).await.unwrap();
        for (id, name) in [("pos0", "Vice President"), ("pos9", "Auditor")] {
            txn.insert_position(&crate::model::election::Position {
                id: PositionId::new(id),
                name: name.to_string(),
                description: String::new(),
            })
            .await
            .unwrap();
        }
        txn.commit().await.unwrap();

        let names: Vec<_> = engine(&store)
            .ballot_options()
            .await
            .unwrap()
            .into_iter()
            .map(|option| option.position.name)
            .collect();
        assert_eq!(names, ["Auditor", "President", "Treasurer", "Vice President"]);
    }
}
