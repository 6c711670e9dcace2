use std::collections::BTreeMap;
use std::sync::Arc;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};

use rocket::tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::{
    device::DeviceHash,
    election::{Candidate, Position},
    ids::{CandidateId, PositionId, StudentId},
    schedule::ElectionConfig,
    student::Student,
    vote::{DeviceUsage, Vote},
};

use super::{Store, StoreError, StoreResult, Transaction};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    students: BTreeMap<StudentId, Student>,
    votes: Vec<Vote>,
    device_usage: BTreeMap<String, DeviceUsage>,
    config: Option<ElectionConfig>,
    positions: BTreeMap<PositionId, Position>,
    candidates: BTreeMap<CandidateId, Candidate>,
}

/// An in-process store for tests and local development.
///
/// Transactions are serialised by a single lock held until commit or drop.
/// Writes are staged on a private copy of the state and only swapped in on
/// commit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    #[cfg(test)]
    failing_commits: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[rocket::async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        Ok(Box::new(MemoryTransaction {
            guard,
            staged: None,
            #[cfg(test)]
            failing_commits: Arc::clone(&self.failing_commits),
        }))
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    staged: Option<MemoryState>,
    #[cfg(test)]
    failing_commits: Arc<AtomicUsize>,
}

impl MemoryTransaction {
    fn read(&self) -> &MemoryState {
        self.staged.as_ref().unwrap_or(&*self.guard)
    }

    fn write(&mut self) -> &mut MemoryState {
        let committed: &MemoryState = &self.guard;
        self.staged
            .get_or_insert_with(|| MemoryState::clone(committed))
    }
}

#[rocket::async_trait]
impl Transaction for MemoryTransaction {
    async fn student(&mut self, id: &StudentId) -> StoreResult<Option<Student>> {
        Ok(self.read().students.get(id).cloned())
    }

    async fn device_usage(
        &mut self,
        device: &DeviceHash,
        student: &StudentId,
    ) -> StoreResult<Option<DeviceUsage>> {
        let key = DeviceUsage::key(device, student);
        Ok(self.read().device_usage.get(&key).cloned())
    }

    async fn election_config(&mut self) -> StoreResult<Option<ElectionConfig>> {
        Ok(self.read().config.clone())
    }

    async fn position(&mut self, id: &PositionId) -> StoreResult<Option<Position>> {
        Ok(self.read().positions.get(id).cloned())
    }

    async fn candidate(&mut self, id: &CandidateId) -> StoreResult<Option<Candidate>> {
        Ok(self.read().candidates.get(id).cloned())
    }

    async fn positions(&mut self) -> StoreResult<Vec<Position>> {
        Ok(self.read().positions.values().cloned().collect())
    }

    async fn candidates(&mut self) -> StoreResult<Vec<Candidate>> {
        Ok(self.read().candidates.values().cloned().collect())
    }

    async fn votes(&mut self) -> StoreResult<Vec<Vote>> {
        Ok(self.read().votes.clone())
    }

    async fn students(&mut self) -> StoreResult<Vec<Student>> {
        Ok(self.read().students.values().cloned().collect())
    }

    async fn insert_student(&mut self, student: &Student) -> StoreResult<bool> {
        if self.read().students.contains_key(&student.id) {
            return Ok(false);
        }
        self.write()
            .students
            .insert(student.id.clone(), student.clone());
        Ok(true)
    }

    async fn update_student(&mut self, student: &Student) -> StoreResult<()> {
        let stored = self.write().students.get_mut(&student.id);
        match stored {
            Some(stored) if stored.revision == student.revision => {
                *stored = Student {
                    revision: student.revision + 1,
                    ..student.clone()
                };
                Ok(())
            }
            _ => Err(StoreError::Conflict(format!(
                "student {} changed since it was read",
                student.id
            ))),
        }
    }

    async fn insert_votes(&mut self, votes: &[Vote]) -> StoreResult<()> {
        self.write().votes.extend_from_slice(votes);
        Ok(())
    }

    async fn mark_device_used(&mut self, usage: &DeviceUsage) -> StoreResult<()> {
        self.write()
            .device_usage
            .insert(usage.key.clone(), usage.clone());
        Ok(())
    }

    async fn delete_votes_by(&mut self, student: &StudentId) -> StoreResult<u64> {
        let votes = &mut self.write().votes;
        let before = votes.len();
        votes.retain(|vote| &vote.voter_id != student);
        Ok((before - votes.len()) as u64)
    }

    async fn delete_device_usage_by(&mut self, student: &StudentId) -> StoreResult<u64> {
        let usage = &mut self.write().device_usage;
        let before = usage.len();
        usage.retain(|_, record| &record.used_by != student);
        Ok((before - usage.len()) as u64)
    }

    async fn delete_all_votes(&mut self) -> StoreResult<u64> {
        let votes = std::mem::take(&mut self.write().votes);
        Ok(votes.len() as u64)
    }

    async fn delete_all_device_usage(&mut self) -> StoreResult<u64> {
        let usage = std::mem::take(&mut self.write().device_usage);
        Ok(usage.len() as u64)
    }

    async fn put_election_config(&mut self, config: &ElectionConfig) -> StoreResult<()> {
        self.write().config = Some(config.clone());
        Ok(())
    }

    async fn insert_position(&mut self, position: &Position) -> StoreResult<()> {
        self.write()
            .positions
            .insert(position.id.clone(), position.clone());
        Ok(())
    }

    async fn insert_candidate(&mut self, candidate: &Candidate) -> StoreResult<()> {
        self.write()
            .candidates
            .insert(candidate.id.clone(), candidate.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut txn = self;
        if txn.injected_failure() {
            return Err(StoreError::Unavailable(
                "injected commit failure".to_string(),
            ));
        }

        if let Some(staged) = txn.staged.take() {
            *txn.guard = staged;
        }
        Ok(())
    }
}

impl MemoryTransaction {
    #[cfg(test)]
    fn injected_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[cfg(not(test))]
    fn injected_failure(&self) -> bool {
        false
    }
}

/// Direct access for test setup and assertions, bypassing transactions.
#[cfg(test)]
impl MemoryStore {
    /// Make the next `n` commits fail as if the store were unreachable.
    pub fn fail_next_commits(&self, n: usize) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    pub async fn put_student(&self, student: Student) {
        self.state
            .lock()
            .await
            .students
            .insert(student.id.clone(), student);
    }

    pub async fn put_config(&self, config: ElectionConfig) {
        self.state.lock().await.config = Some(config);
    }

    /// Two positions and three candidates: `candA` and `candB` stand for
    /// `pos1`, `candC` for `pos2`.
    pub async fn put_reference_data(&self) {
        let mut state = self.state.lock().await;
        for position in [Position::example(), Position::example2()] {
            state.positions.insert(position.id.clone(), position);
        }
        for candidate in [
            Candidate::example_a(),
            Candidate::example_b(),
            Candidate::example_c(),
        ] {
            state.candidates.insert(candidate.id.clone(), candidate);
        }
    }

    pub async fn get_student(&self, id: &str) -> Option<Student> {
        self.state
            .lock()
            .await
            .students
            .get(&StudentId::new(id))
            .cloned()
    }

    pub async fn get_config(&self) -> Option<ElectionConfig> {
        self.state.lock().await.config.clone()
    }

    pub async fn all_votes(&self) -> Vec<Vote> {
        self.state.lock().await.votes.clone()
    }

    pub async fn all_device_usage(&self) -> Vec<DeviceUsage> {
        self.state
            .lock()
            .await
            .device_usage
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[backend_test]
    async fn uncommitted_writes_are_discarded(store: MemoryStore) {
        let mut txn = store.begin().await.unwrap();
        assert!(txn.insert_student(&Student::example()).await.unwrap());
        // Visible inside the transaction...
        assert!(txn
            .student(&StudentId::new("S1"))
            .await
            .unwrap()
            .is_some());
        drop(txn);
        // ...but gone once it is dropped.
        assert_eq!(store.get_student("S1").await, None);
    }

    #[backend_test]
    async fn committed_writes_are_visible(store: MemoryStore) {
        let mut txn = store.begin().await.unwrap();
        assert!(txn.insert_student(&Student::example()).await.unwrap());
        txn.commit().await.unwrap();

        let mut txn = store.begin().await.unwrap();
        assert!(!txn.insert_student(&Student::example()).await.unwrap());
        assert!(txn
            .student(&StudentId::new("S1"))
            .await
            .unwrap()
            .is_some());
    }

    #[backend_test]
    async fn updates_bump_and_check_the_revision(store: MemoryStore) {
        store.put_student(Student::example()).await;

        let mut txn = store.begin().await.unwrap();
        let mut student = txn.student(&StudentId::new("S1")).await.unwrap().unwrap();
        student.is_logged_in = true;
        txn.update_student(&student).await.unwrap();

        // The copy we hold is now stale.
        let result = txn.update_student(&student).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        txn.commit().await.unwrap();

        let stored = store.get_student("S1").await.unwrap();
        assert!(stored.is_logged_in);
        assert_eq!(stored.revision, 1);
    }

    #[backend_test]
    async fn failed_commit_leaves_state_untouched(store: MemoryStore) {
        store.put_student(Student::example()).await;
        store.fail_next_commits(1);

        let mut txn = store.begin().await.unwrap();
        let mut student = txn.student(&StudentId::new("S1")).await.unwrap().unwrap();
        student.record_vote(Utc::now());
        txn.update_student(&student).await.unwrap();
        let result = txn.commit().await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert!(!store.get_student("S1").await.unwrap().has_voted);

        // Only the requested number of commits fail.
        let mut txn = store.begin().await.unwrap();
        txn.update_student(&student).await.unwrap();
        txn.commit().await.unwrap();
        assert!(store.get_student("S1").await.unwrap().has_voted);
    }

    #[backend_test]
    async fn deletes_only_touch_the_given_student(store: MemoryStore) {
        let now = Utc::now();
        let device = DeviceHash::example();
        let mut txn = store.begin().await.unwrap();
        for (student, candidate) in [("S1", "candA"), ("S2", "candB")] {
            let selection = crate::model::vote::Selection::new("pos1", candidate);
            txn.insert_votes(&[Vote::new(
                selection,
                StudentId::new(student),
                device.clone(),
                now,
            )])
            .await
            .unwrap();
            txn.mark_device_used(&DeviceUsage::used(
                device.clone(),
                StudentId::new(student),
                now,
            ))
            .await
            .unwrap();
        }
        assert_eq!(txn.delete_votes_by(&StudentId::new("S1")).await.unwrap(), 1);
        assert_eq!(
            txn.delete_device_usage_by(&StudentId::new("S1"))
                .await
                .unwrap(),
            1
        );
        txn.commit().await.unwrap();

        let votes = store.all_votes().await;
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].voter_id, StudentId::new("S2"));
        let usage = store.all_device_usage().await;
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].used_by, StudentId::new("S2"));
    }

    #[backend_test]
    async fn bulk_deletes_apply_on_commit(store: MemoryStore) {
        let now = Utc::now();
        let device = DeviceHash::example();
        let mut txn = store.begin().await.unwrap();
        for student in ["S1", "S2"] {
            let selection = crate::model::vote::Selection::new("pos1", "candA");
            txn.insert_votes(&[Vote::new(selection, StudentId::new(student), device.clone(), now)])
                .await
                .unwrap();
            txn.mark_device_used(&DeviceUsage::used(device.clone(), StudentId::new(student), now))
                .await
                .unwrap();
        }
        txn.commit().await.unwrap();

        let mut txn = store.begin().await.unwrap();
        assert_eq!(txn.delete_all_votes().await.unwrap(), 2);
        assert_eq!(txn.delete_all_device_usage().await.unwrap(), 2);
        assert!(txn.votes().await.unwrap().is_empty());
        drop(txn);
        assert_eq!(store.all_votes().await.len(), 2);

        let mut txn = store.begin().await.unwrap();
        txn.delete_all_votes().await.unwrap();
        txn.delete_all_device_usage().await.unwrap();
        txn.commit().await.unwrap();
        assert!(store.all_votes().await.is_empty());
        assert!(store.all_device_usage().await.is_empty());
    }
}
