//! Session record storage
//!
//! Everything the engine knows about a session lives in one serialized
//! record. Records are versioned and written back with compare-and-swap,
//! so a mutation either lands completely or not at all.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use serde::Serialize;
use thiserror::Error;

use crate::id::Id;

/// Errors raised by a [`Store`]
#[derive(Error, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreError {
    /// The record was written by someone else since it was read
    #[error("conflict")]
    Conflict,
    /// The backing store could not be reached
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// A record could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// A stored session record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Activity the session belongs to
    pub activity: Id,
    /// Whether the session is still open
    pub open: bool,
    /// Serialized session state
    pub body: String,
}

/// A value together with the version it was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    /// Version, bumped on every write
    pub version: u64,
    /// The value
    pub value: T,
}

/// The storage collaborator
pub trait Store: Send + Sync {
    /// Reads a session record
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store cannot be read.
    fn load(&self, session: Id) -> Result<Option<Versioned<Record>>, StoreError>;

    /// Creates a session record at version 0
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the session exists or its activity
    /// already has an open session.
    fn create(&self, session: Id, record: Record) -> Result<(), StoreError>;

    /// Replaces a record if it is still at `expected`, returning the new
    /// version
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the record moved on or is missing.
    fn compare_and_swap(
        &self,
        session: Id,
        expected: u64,
        record: Record,
    ) -> Result<u64, StoreError>;

    /// Finds the open session of an activity
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store cannot be read.
    fn open_session(&self, activity: Id) -> Result<Option<Id>, StoreError>;
}

/// In-memory store holding serialized records
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    records: Arc<Mutex<HashMap<Id, Versioned<Record>>>>,
}

impl InMemoryStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for InMemoryStore {
    fn load(&self, session: Id) -> Result<Option<Versioned<Record>>, StoreError> {
        let guard = self
            .records
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(guard.get(&session).cloned())
    }

    fn create(&self, session: Id, record: Record) -> Result<(), StoreError> {
        let mut guard = self
            .records
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let taken = guard.contains_key(&session)
            || (record.open
                && guard
                    .values()
                    .any(|r| r.value.open && r.value.activity == record.activity));
        if taken {
            return Err(StoreError::Conflict);
        }
        guard.insert(
            session,
            Versioned {
                version: 0,
                value: record,
            },
        );
        Ok(())
    }

    fn compare_and_swap(
        &self,
        session: Id,
        expected: u64,
        record: Record,
    ) -> Result<u64, StoreError> {
        let mut guard = self
            .records
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let current = guard.get_mut(&session).ok_or(StoreError::Conflict)?;
        if current.version != expected {
            return Err(StoreError::Conflict);
        }
        current.version += 1;
        current.value = record;
        Ok(current.version)
    }

    fn open_session(&self, activity: Id) -> Result<Option<Id>, StoreError> {
        let guard = self
            .records
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(guard
            .iter()
            .find(|(_, r)| r.value.open && r.value.activity == activity)
            .map(|(id, _)| *id))
    }
}
