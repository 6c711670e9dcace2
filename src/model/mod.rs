//! Domain types and their database representation.

pub mod auth;
pub mod device;
pub mod election;
pub mod ids;
pub mod mongodb;
pub mod schedule;
pub mod student;
pub mod vote;
