//! In-process store for development and tests.
//!
//! Every operation runs inside one short critical section, so the
//! `(voter, session)` check and the insert that follows it cannot interleave
//! with another cast. Failure injection ([`MemoryStore::set_unavailable`])
//! makes every call fail the way a lost database connection would.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{BallotStore, SessionStore, StoreError, VoterDirectory};
use crate::lifecycle::compute_status;
use crate::models::{Ballot, Role, SessionStatus, VoterCounts, VoterProfile, VotingSession};

#[derive(Debug, Default)]
struct Inner {
    sessions: BTreeMap<String, VotingSession>,
    ballots: Vec<Ballot>,
    /// (voter_id, session_id) of every stored ballot.
    ballot_keys: HashSet<(String, String)>,
    voters: HashMap<String, VoterProfile>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a directory entry.
    pub fn register_voter(&self, profile: VoterProfile) {
        self.inner.lock().voters.insert(profile.id.clone(), profile);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn ballot_count(&self) -> usize {
        self.inner.lock().ballots.len()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

fn newest_first(a: &DateTime<Utc>, b: &DateTime<Utc>) -> std::cmp::Ordering {
    b.cmp(a)
}

fn window<T: Clone>(items: &[T], offset: i64, limit: i64) -> Vec<T> {
    let offset = usize::try_from(offset.max(0)).unwrap_or(usize::MAX);
    let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
    items.iter().skip(offset).take(limit).cloned().collect()
}

#[rocket::async_trait]
impl SessionStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }

    async fn insert_session(&self, session: &VotingSession) -> Result<(), StoreError> {
        self.check()?;
        let mut inner = self.inner.lock();
        if inner.sessions.contains_key(&session.session_id) {
            return Err(StoreError::Duplicate);
        }
        inner.sessions.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<VotingSession>, StoreError> {
        self.check()?;
        Ok(self.inner.lock().sessions.get(session_id).cloned())
    }

    async fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        now: DateTime<Utc>,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<VotingSession>, i64), StoreError> {
        self.check()?;
        let inner = self.inner.lock();
        let mut matching: Vec<VotingSession> = inner
            .sessions
            .values()
            .filter(|s| status.map_or(true, |wanted| compute_status(s, now) == wanted))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            newest_first(&a.created_at, &b.created_at).then_with(|| a.session_id.cmp(&b.session_id))
        });
        let total = matching.len() as i64;
        Ok((window(&matching, offset, limit), total))
    }

    async fn update_session(&self, session: &VotingSession) -> Result<bool, StoreError> {
        self.check()?;
        let mut inner = self.inner.lock();
        let Some(stored) = inner.sessions.get_mut(&session.session_id) else {
            return Ok(false);
        };
        stored.title = session.title.clone();
        stored.description = session.description.clone();
        stored.voting_start_time = session.voting_start_time;
        stored.voting_end_time = session.voting_end_time;
        stored.result_announcement_time = session.result_announcement_time;
        stored.is_results_public = session.is_results_public;
        stored.settings = session.settings;
        stored.updated_at = session.updated_at;
        Ok(true)
    }

    async fn record_status(&self, session_id: &str, status: SessionStatus) -> Result<(), StoreError> {
        self.check()?;
        let mut inner = self.inner.lock();
        if let Some(stored) = inner.sessions.get_mut(session_id) {
            if stored.status != SessionStatus::Cancelled {
                stored.status = status;
            }
        }
        Ok(())
    }

    async fn cancel_session(&self, session_id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        self.check()?;
        let mut inner = self.inner.lock();
        let Some(stored) = inner.sessions.get_mut(session_id) else {
            return Ok(false);
        };
        stored.status = SessionStatus::Cancelled;
        stored.updated_at = now;
        Ok(true)
    }

    async fn session_titles(&self, session_ids: &[String]) -> Result<HashMap<String, String>, StoreError> {
        self.check()?;
        let inner = self.inner.lock();
        Ok(session_ids
            .iter()
            .filter_map(|id| inner.sessions.get(id).map(|s| (id.clone(), s.title.clone())))
            .collect())
    }
}

#[rocket::async_trait]
impl BallotStore for MemoryStore {
    async fn insert_ballot(&self, ballot: &Ballot) -> Result<(), StoreError> {
        self.check()?;
        let mut inner = self.inner.lock();
        let key = (ballot.voter_id.clone(), ballot.voting_session.clone());
        if !inner.ballot_keys.insert(key) {
            return Err(StoreError::Duplicate);
        }
        inner.ballots.push(ballot.clone());
        Ok(())
    }

    async fn find_ballot(&self, voter_id: &str, session_id: &str) -> Result<Option<Ballot>, StoreError> {
        self.check()?;
        Ok(self
            .inner
            .lock()
            .ballots
            .iter()
            .find(|b| b.voter_id == voter_id && b.voting_session == session_id)
            .cloned())
    }

    async fn verified_counts(&self, session_id: &str) -> Result<Vec<(String, i64)>, StoreError> {
        self.check()?;
        let inner = self.inner.lock();
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for ballot in inner
            .ballots
            .iter()
            .filter(|b| b.is_verified && b.voting_session == session_id)
        {
            *counts.entry(ballot.candidate.clone()).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn verified_ballots(&self, session_id: &str) -> Result<Vec<Ballot>, StoreError> {
        self.check()?;
        Ok(self
            .inner
            .lock()
            .ballots
            .iter()
            .filter(|b| b.is_verified && b.voting_session == session_id)
            .cloned()
            .collect())
    }

    async fn verified_cast_times_since(
        &self,
        session_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError> {
        self.check()?;
        Ok(self
            .inner
            .lock()
            .ballots
            .iter()
            .filter(|b| b.is_verified && b.voting_session == session_id && b.created_at >= since)
            .map(|b| b.created_at)
            .collect())
    }

    async fn voter_history(
        &self,
        voter_id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Ballot>, i64), StoreError> {
        self.check()?;
        let inner = self.inner.lock();
        let mut own: Vec<Ballot> = inner
            .ballots
            .iter()
            .filter(|b| b.voter_id == voter_id)
            .cloned()
            .collect();
        own.sort_by(|a, b| newest_first(&a.created_at, &b.created_at).then_with(|| a.id.cmp(&b.id)));
        let total = own.len() as i64;
        Ok((window(&own, offset, limit), total))
    }
}

#[rocket::async_trait]
impl VoterDirectory for MemoryStore {
    async fn voters_by_ids(&self, voter_ids: &[String]) -> Result<Vec<VoterProfile>, StoreError> {
        self.check()?;
        let inner = self.inner.lock();
        Ok(voter_ids
            .iter()
            .filter_map(|id| inner.voters.get(id).cloned())
            .collect())
    }

    async fn voter_counts(&self) -> Result<VoterCounts, StoreError> {
        self.check()?;
        let inner = self.inner.lock();
        let voters = inner.voters.values().filter(|v| v.role == Role::Voter);
        let (total, verified) = voters.fold((0, 0), |(total, verified), v| {
            (total + 1, verified + i64::from(v.is_email_verified))
        });
        Ok(VoterCounts { total, verified })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::models::SessionSettings;

    fn ballot(voter: &str, session: &str, candidate: &str, at: DateTime<Utc>) -> Ballot {
        Ballot {
            id: format!("{voter}-{session}"),
            voter_id: voter.to_string(),
            voting_session: session.to_string(),
            candidate: candidate.to_string(),
            ip_address: "10.0.0.1".to_string(),
            user_agent: "test".to_string(),
            is_verified: true,
            created_at: at,
        }
    }

    fn session(id: &str, created_at: DateTime<Utc>) -> VotingSession {
        VotingSession {
            session_id: id.to_string(),
            title: format!("Session {id}"),
            description: String::new(),
            candidates: Vec::new(),
            status: SessionStatus::Upcoming,
            voting_start_time: created_at,
            voting_end_time: created_at + Duration::hours(1),
            result_announcement_time: created_at + Duration::hours(2),
            is_results_public: false,
            settings: SessionSettings::default(),
            created_by: "admin".to_string(),
            created_at,
            updated_at: created_at,
        }
    }

    #[tokio::test]
    async fn second_ballot_for_same_voter_and_session_is_rejected() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert_ballot(&ballot("v1", "s1", "a", now)).await.unwrap();
        let err = store.insert_ballot(&ballot("v1", "s1", "b", now)).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate));
        store.insert_ballot(&ballot("v1", "s2", "b", now)).await.unwrap();
        store.insert_ballot(&ballot("v2", "s1", "b", now)).await.unwrap();
        assert_eq!(store.ballot_count(), 3);
    }

    #[tokio::test]
    async fn duplicate_session_id_is_rejected() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert_session(&session("s1", now)).await.unwrap();
        let err = store.insert_session(&session("s1", now)).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate));
    }

    #[tokio::test]
    async fn cancelled_status_is_not_overwritten() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert_session(&session("s1", now)).await.unwrap();
        assert!(store.cancel_session("s1", now).await.unwrap());
        store.record_status("s1", SessionStatus::Active).await.unwrap();
        let stored = store.find_session("s1").await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Cancelled);
        assert!(!store.cancel_session("missing", now).await.unwrap());
    }

    #[tokio::test]
    async fn history_is_newest_first_and_paged() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        for i in 0..5 {
            let at = t0 + Duration::minutes(i);
            store
                .insert_ballot(&ballot("v1", &format!("s{i}"), "a", at))
                .await
                .unwrap();
        }
        store.insert_ballot(&ballot("v2", "s0", "a", t0)).await.unwrap();

        let (page, total) = store.voter_history("v1", 0, 2).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(
            page.iter().map(|b| b.voting_session.as_str()).collect::<Vec<_>>(),
            ["s4", "s3"]
        );
        let (page, _) = store.voter_history("v1", 4, 2).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].voting_session, "s0");
    }

    #[tokio::test]
    async fn counts_skip_unverified_ballots() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert_ballot(&ballot("v1", "s1", "a", now)).await.unwrap();
        let mut flagged = ballot("v2", "s1", "a", now);
        flagged.is_verified = false;
        store.insert_ballot(&flagged).await.unwrap();
        store.insert_ballot(&ballot("v3", "s2", "a", now)).await.unwrap();

        assert_eq!(store.verified_counts("s1").await.unwrap(), vec![("a".to_string(), 1)]);
        assert_eq!(store.verified_ballots("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(store.ping().await, Err(StoreError::Unavailable(_))));
        assert!(matches!(
            store.find_session("s1").await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_unavailable(false);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn voter_counts_only_include_voters() {
        let store = MemoryStore::new();
        for (id, role, verified) in [
            ("v1", Role::Voter, true),
            ("v2", Role::Voter, false),
            ("a1", Role::Admin, true),
        ] {
            store.register_voter(VoterProfile {
                id: id.to_string(),
                name: id.to_string(),
                email: format!("{id}@example.org"),
                role,
                is_email_verified: verified,
            });
        }
        assert_eq!(
            store.voter_counts().await.unwrap(),
            VoterCounts { total: 2, verified: 1 }
        );
    }
}
