use std::ops::Deref;

use log::debug;
use mongodb::{bson::doc, error::Error as DbError, Collection, Database, IndexModel};

use crate::model::{
    election::{Candidate, Position},
    schedule::ElectionConfig,
    student::Student,
    vote::{DeviceUsage, Vote},
};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MongoCollection for Student {
    const NAME: &'static str = "students";
}

impl MongoCollection for Vote {
    const NAME: &'static str = "votes";
}

impl MongoCollection for DeviceUsage {
    const NAME: &'static str = "device_usage";
}

/// The config singleton lives in a settings collection under a fixed ID.
impl MongoCollection for ElectionConfig {
    const NAME: &'static str = "settings";
}

impl MongoCollection for Position {
    const NAME: &'static str = "positions";
}

impl MongoCollection for Candidate {
    const NAME: &'static str = "candidates";
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    // Votes are looked up by voter for repairs, and by position for tallies.
    let voter_index = IndexModel::builder().keys(doc! {"voter_id": 1}).build();
    let tally_index = IndexModel::builder()
        .keys(doc! {"position_id": 1, "candidate_id": 1})
        .build();
    Coll::<Vote>::from_db(db)
        .create_indexes([voter_index, tally_index], None)
        .await?;

    // Device usage records are cleared per student.
    let usage_index = IndexModel::builder().keys(doc! {"used_by": 1}).build();
    Coll::<DeviceUsage>::from_db(db)
        .create_index(usage_index, None)
        .await?;

    // Candidates are listed per position.
    let candidate_index = IndexModel::builder()
        .keys(doc! {"position_id": 1})
        .build();
    Coll::<Candidate>::from_db(db)
        .create_index(candidate_index, None)
        .await?;

    Ok(())
}
