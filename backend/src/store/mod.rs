// Persistence seam shared by the MySQL and in-memory backends

pub mod memory;
pub mod mysql;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::{Ballot, SessionStatus, VoterCounts, VoterProfile, VotingSession};

pub use memory::MemoryStore;
pub use mysql::MysqlStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("unique constraint violated")]
    Duplicate,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("stored record is malformed: {0}")]
    Corrupt(String),
}

#[rocket::async_trait]
pub trait SessionStore: Send + Sync {
    /// Cheap round trip used by the health check.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Fails with [`StoreError::Duplicate`] when the session id is taken.
    async fn insert_session(&self, session: &VotingSession) -> Result<(), StoreError>;

    async fn find_session(&self, session_id: &str) -> Result<Option<VotingSession>, StoreError>;

    /// Newest first. `status` filters on the status computed at `now`.
    async fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        now: DateTime<Utc>,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<VotingSession>, i64), StoreError>;

    /// Writes the mutable fields of `session` (title, description, timing,
    /// public flag, settings). Returns `false` when no such session exists.
    async fn update_session(&self, session: &VotingSession) -> Result<bool, StoreError>;

    /// Caches a recomputed status. Never overwrites `cancelled`.
    async fn record_status(&self, session_id: &str, status: SessionStatus) -> Result<(), StoreError>;

    /// Returns `false` when no such session exists.
    async fn cancel_session(&self, session_id: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn session_titles(&self, session_ids: &[String]) -> Result<HashMap<String, String>, StoreError>;
}

#[rocket::async_trait]
pub trait BallotStore: Send + Sync {
    /// Atomic with respect to the `(voter, session)` key: concurrent inserts
    /// for the same key yield one success and [`StoreError::Duplicate`] for
    /// every other attempt.
    async fn insert_ballot(&self, ballot: &Ballot) -> Result<(), StoreError>;

    async fn find_ballot(&self, voter_id: &str, session_id: &str) -> Result<Option<Ballot>, StoreError>;

    /// `(candidate, count)` over verified ballots of the session.
    async fn verified_counts(&self, session_id: &str) -> Result<Vec<(String, i64)>, StoreError>;

    async fn verified_ballots(&self, session_id: &str) -> Result<Vec<Ballot>, StoreError>;

    async fn verified_cast_times_since(
        &self,
        session_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError>;

    /// Newest first, plus the voter's total ballot count.
    async fn voter_history(
        &self,
        voter_id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Ballot>, i64), StoreError>;
}

#[rocket::async_trait]
pub trait VoterDirectory: Send + Sync {
    async fn voters_by_ids(&self, voter_ids: &[String]) -> Result<Vec<VoterProfile>, StoreError>;

    async fn voter_counts(&self) -> Result<VoterCounts, StoreError>;
}

pub trait Store: SessionStore + BallotStore + VoterDirectory {}

impl<T: SessionStore + BallotStore + VoterDirectory> Store for T {}

pub type SharedStore = Arc<dyn Store>;
