use log::{debug, error};
use mongodb::{
    bson::{doc, to_document, Document},
    error::Error as DbError,
    options::{Acknowledgment, ReadConcern, ReplaceOptions, TransactionOptions, WriteConcern},
    Client, ClientSession, Database,
};
use serde::de::DeserializeOwned;

use crate::model::{
    device::DeviceHash,
    election::{Candidate, Position},
    ids::{CandidateId, PositionId, StudentId},
    mongodb::{
        ensure_indexes_exist, is_duplicate_key_error, is_transient, retry_scope, Coll, RetryScope,
    },
    schedule::{ElectionConfig, CONFIG_ID},
    student::Student,
    vote::{DeviceUsage, Vote},
};

use super::{Store, StoreError, StoreResult, Transaction};

/// How often a commit with an unknown result is repeated before giving up.
const COMMIT_RETRIES: u32 = 3;

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        if is_transient(&err) {
            Self::Conflict(err.to_string())
        } else {
            error!("Database error: {err}");
            Self::Unavailable(err.to_string())
        }
    }
}

/// A store backed by a MongoDB replica set.
///
/// Transactions use snapshot reads and majority writes, so concurrent
/// writers to the same document fail with a transient error and are retried.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    /// Connect to the given database and ensure its indexes exist.
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self, DbError> {
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(db_name);
        ensure_indexes_exist(&db).await?;
        Ok(Self { client, db })
    }
}

/// Environment variable naming the replica set used by database tests.
#[cfg(test)]
pub const TEST_DB_URI: &str = "TEST_DB_URI";

#[cfg(test)]
impl MongoStore {
    /// A store over a fresh, uniquely named database, or `None` if no test
    /// replica set is configured.
    pub async fn for_tests() -> Option<Self> {
        let Ok(uri) = std::env::var(TEST_DB_URI) else {
            log::warn!("{TEST_DB_URI} not set, skipping database test");
            return None;
        };
        let db_name = format!("test_{}", mongodb::bson::oid::ObjectId::new().to_hex());
        Some(
            Self::connect(&uri, &db_name)
                .await
                .expect("Could not connect to the test database"),
        )
    }

    pub async fn drop_database(&self) {
        self.db.drop(None).await.unwrap();
    }
}

#[rocket::async_trait]
impl Store for MongoStore {
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        let mut session = self.client.start_session(None).await?;
        let options = TransactionOptions::builder()
            .read_concern(ReadConcern::snapshot())
            .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
            .build();
        session.start_transaction(options).await?;

        Ok(Box::new(MongoTransaction {
            session,
            students: Coll::from_db(&self.db),
            votes: Coll::from_db(&self.db),
            device_usage: Coll::from_db(&self.db),
            config: Coll::from_db(&self.db),
            positions: Coll::from_db(&self.db),
            candidates: Coll::from_db(&self.db),
        }))
    }
}

/// A transaction on a client session. Dropping the session aborts it.
pub struct MongoTransaction {
    session: ClientSession,
    students: Coll<Student>,
    votes: Coll<Vote>,
    device_usage: Coll<DeviceUsage>,
    config: Coll<ElectionConfig>,
    positions: Coll<Position>,
    candidates: Coll<Candidate>,
}

impl MongoTransaction {
    /// Collect every document in the collection.
    async fn all<T>(coll: &Coll<T>, session: &mut ClientSession) -> StoreResult<Vec<T>>
    where
        T: DeserializeOwned + Unpin + Send + Sync,
    {
        let mut cursor = coll.find_with_session(None, None, session).await?;
        let mut items = Vec::new();
        while let Some(item) = cursor.next(session).await {
            items.push(item?);
        }
        Ok(items)
    }
}

#[rocket::async_trait]
impl Transaction for MongoTransaction {
    async fn student(&mut self, id: &StudentId) -> StoreResult<Option<Student>> {
        let filter = doc! { "_id": id.clone() };
        Ok(self
            .students
            .find_one_with_session(filter, None, &mut self.session)
            .await?)
    }

    async fn device_usage(
        &mut self,
        device: &DeviceHash,
        student: &StudentId,
    ) -> StoreResult<Option<DeviceUsage>> {
        let filter = doc! { "_id": DeviceUsage::key(device, student) };
        Ok(self
            .device_usage
            .find_one_with_session(filter, None, &mut self.session)
            .await?)
    }

    async fn election_config(&mut self) -> StoreResult<Option<ElectionConfig>> {
        let filter = doc! { "_id": CONFIG_ID };
        Ok(self
            .config
            .find_one_with_session(filter, None, &mut self.session)
            .await?)
    }

    async fn position(&mut self, id: &PositionId) -> StoreResult<Option<Position>> {
        let filter = doc! { "_id": id.clone() };
        Ok(self
            .positions
            .find_one_with_session(filter, None, &mut self.session)
            .await?)
    }

    async fn candidate(&mut self, id: &CandidateId) -> StoreResult<Option<Candidate>> {
        let filter = doc! { "_id": id.clone() };
        Ok(self
            .candidates
            .find_one_with_session(filter, None, &mut self.session)
            .await?)
    }

    async fn positions(&mut self) -> StoreResult<Vec<Position>> {
        Self::all(&self.positions, &mut self.session).await
    }

    async fn candidates(&mut self) -> StoreResult<Vec<Candidate>> {
        Self::all(&self.candidates, &mut self.session).await
    }

    async fn votes(&mut self) -> StoreResult<Vec<Vote>> {
        Self::all(&self.votes, &mut self.session).await
    }

    async fn students(&mut self) -> StoreResult<Vec<Student>> {
        Self::all(&self.students, &mut self.session).await
    }

    async fn insert_student(&mut self, student: &Student) -> StoreResult<bool> {
        match self
            .students
            .insert_one_with_session(student, None, &mut self.session)
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_duplicate_key_error(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn update_student(&mut self, student: &Student) -> StoreResult<()> {
        let filter = doc! { "_id": student.id.clone(), "revision": student.revision };
        let updated = Student {
            revision: student.revision + 1,
            ..student.clone()
        };
        let result = self
            .students
            .replace_one_with_session(filter, &updated, None, &mut self.session)
            .await?;
        if result.matched_count == 0 {
            debug!("Stale write to student {} rejected", student.id);
            return Err(StoreError::Conflict(format!(
                "student {} changed since it was read",
                student.id
            )));
        }
        Ok(())
    }

    async fn insert_votes(&mut self, votes: &[Vote]) -> StoreResult<()> {
        if votes.is_empty() {
            return Ok(());
        }
        self.votes
            .insert_many_with_session(votes, None, &mut self.session)
            .await?;
        Ok(())
    }

    async fn mark_device_used(&mut self, usage: &DeviceUsage) -> StoreResult<()> {
        let filter = doc! { "_id": usage.key.as_str() };
        let options = ReplaceOptions::builder().upsert(true).build();
        self.device_usage
            .replace_one_with_session(filter, usage, options, &mut self.session)
            .await?;
        Ok(())
    }

    async fn delete_votes_by(&mut self, student: &StudentId) -> StoreResult<u64> {
        let filter = doc! { "voter_id": student.clone() };
        let result = self
            .votes
            .delete_many_with_session(filter, None, &mut self.session)
            .await?;
        Ok(result.deleted_count)
    }

    async fn delete_device_usage_by(&mut self, student: &StudentId) -> StoreResult<u64> {
        let filter = doc! { "used_by": student.clone() };
        let result = self
            .device_usage
            .delete_many_with_session(filter, None, &mut self.session)
            .await?;
        Ok(result.deleted_count)
    }

    async fn delete_all_votes(&mut self) -> StoreResult<u64> {
        let result = self
            .votes
            .delete_many_with_session(doc! {}, None, &mut self.session)
            .await?;
        Ok(result.deleted_count)
    }

    async fn delete_all_device_usage(&mut self) -> StoreResult<u64> {
        let result = self
            .device_usage
            .delete_many_with_session(doc! {}, None, &mut self.session)
            .await?;
        Ok(result.deleted_count)
    }

    async fn put_election_config(&mut self, config: &ElectionConfig) -> StoreResult<()> {
        // The singleton is stored under a fixed ID that the struct itself doesn't carry.
        let mut document = to_document(config)
            .map_err(|err| StoreError::Unavailable(format!("unserialisable config: {err}")))?;
        document.insert("_id", CONFIG_ID);
        let filter = doc! { "_id": CONFIG_ID };
        let options = ReplaceOptions::builder().upsert(true).build();
        self.config
            .clone_with_type::<Document>()
            .replace_one_with_session(filter, document, options, &mut self.session)
            .await?;
        Ok(())
    }

    async fn insert_position(&mut self, position: &Position) -> StoreResult<()> {
        self.positions
            .insert_one_with_session(position, None, &mut self.session)
            .await?;
        Ok(())
    }

    async fn insert_candidate(&mut self, candidate: &Candidate) -> StoreResult<()> {
        self.candidates
            .insert_one_with_session(candidate, None, &mut self.session)
            .await?;
        Ok(())
    }

    /// Commit, repeating only the commit itself while its outcome is unknown.
    ///
    /// Re-running the whole transaction instead could record a ballot twice if
    /// the first commit did land.
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut txn = self;
        let mut retried = 0;
        loop {
            match txn.session.commit_transaction().await {
                Ok(()) => return Ok(()),
                Err(err) if retry_scope(&err) == RetryScope::Commit && retried < COMMIT_RETRIES => {
                    retried += 1;
                    debug!("Repeating commit with unknown result ({retried}/{COMMIT_RETRIES}): {err}");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
