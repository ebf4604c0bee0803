//! Cast-vote protocol.
//!
//! One ballot per `(voter, session)`. The store's unique key is what
//! enforces it: two concurrent casts both pass every check below and only
//! the insert decides which one wins. Nothing here retries a rejected insert.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{FieldError, VoteError};
use crate::identity::{Caller, ConnectionInfo};
use crate::lifecycle;
use crate::models::{
    page_bounds, Ballot, HistoryEntry, OwnVote, Pagination, SessionStatus, VoteHistoryResponse,
    VoteStatusResponse, ABSTAIN,
};
use crate::store::{SharedStore, StoreError};

const MAX_IP_LEN: usize = 45;
const MAX_USER_AGENT_LEN: usize = 512;

/// Validated connection provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub ip_address: String,
    pub user_agent: String,
}

impl Provenance {
    pub fn from_connection(conn: &ConnectionInfo) -> Result<Self, Vec<FieldError>> {
        let mut errors = Vec::new();
        let ip_address = match conn.ip_address.as_deref().map(str::trim) {
            Some(ip) if !ip.is_empty() && ip.len() <= MAX_IP_LEN => ip.to_string(),
            Some(ip) if !ip.is_empty() => {
                errors.push(FieldError::new("ipAddress", "is not a valid address"));
                String::new()
            }
            _ => {
                errors.push(FieldError::new("ipAddress", "is required"));
                String::new()
            }
        };
        let user_agent = match conn.user_agent.as_deref().map(str::trim) {
            Some(ua) if !ua.is_empty() => truncate(ua, MAX_USER_AGENT_LEN),
            _ => {
                errors.push(FieldError::new("userAgent", "is required"));
                String::new()
            }
        };
        if errors.is_empty() {
            Ok(Self { ip_address, user_agent })
        } else {
            Err(errors)
        }
    }
}

fn truncate(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Records `caller`'s ballot for `candidate` in `session_id`.
pub async fn cast(
    store: &SharedStore,
    caller: &Caller,
    session_id: &str,
    candidate: &str,
    connection: &ConnectionInfo,
    now: DateTime<Utc>,
) -> Result<Ballot, VoteError> {
    let candidate = candidate.trim();
    let provenance = match Provenance::from_connection(connection) {
        Ok(p) if !candidate.is_empty() => p,
        Ok(_) => return Err(VoteError::invalid("candidate", "is required")),
        Err(mut errors) => {
            if candidate.is_empty() {
                errors.insert(0, FieldError::new("candidate", "is required"));
            }
            return Err(VoteError::Validation(errors));
        }
    };

    let mut session = store
        .find_session(session_id)
        .await?
        .ok_or_else(|| VoteError::NotFound(session_id.to_string()))?;

    if session.settings.require_email_verification && !caller.email_verified {
        return Err(VoteError::EmailNotVerified);
    }

    let status = lifecycle::observe(store, &mut session, now);
    if status != SessionStatus::Active {
        return Err(VoteError::SessionNotActive {
            session_id: session.session_id,
            status,
        });
    }

    if !session.accepts_choice(candidate) {
        let message = if candidate == ABSTAIN {
            "abstaining is not allowed in this session".to_string()
        } else {
            format!("{candidate:?} is not a candidate in this session")
        };
        return Err(VoteError::invalid("candidate", message));
    }

    let ballot = Ballot {
        id: Uuid::new_v4().to_string(),
        voter_id: caller.voter_id.clone(),
        voting_session: session.session_id.clone(),
        candidate: candidate.to_string(),
        ip_address: provenance.ip_address,
        user_agent: provenance.user_agent,
        is_verified: true,
        created_at: now,
    };

    match store.insert_ballot(&ballot).await {
        Ok(()) => {
            tracing::info!(session_id = %ballot.voting_session, ballot_id = %ballot.id, "ballot cast");
            Ok(ballot)
        }
        Err(StoreError::Duplicate) => Err(VoteError::DuplicateVote {
            session_id: ballot.voting_session,
        }),
        Err(err) => Err(err.into()),
    }
}

/// Whether `caller` has voted in `session_id`.
pub async fn vote_status(
    store: &SharedStore,
    caller: &Caller,
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<VoteStatusResponse, VoteError> {
    let mut session = store
        .find_session(session_id)
        .await?
        .ok_or_else(|| VoteError::NotFound(session_id.to_string()))?;
    let session_status = lifecycle::observe(store, &mut session, now);
    let ballot = store.find_ballot(&caller.voter_id, session_id).await?;
    Ok(VoteStatusResponse {
        voting_session: session.session_id,
        session_status,
        has_voted: ballot.is_some(),
        vote: ballot.map(|b| OwnVote {
            candidate: b.candidate,
            timestamp: b.created_at,
        }),
    })
}

/// The caller's own ballots across sessions, newest first.
pub async fn history(
    store: &SharedStore,
    caller: &Caller,
    page: Option<i64>,
    limit: Option<i64>,
) -> Result<VoteHistoryResponse, VoteError> {
    let (page, limit) = page_bounds(page, limit);
    let offset = (page - 1).saturating_mul(limit);
    let (ballots, total) = store.voter_history(&caller.voter_id, offset, limit).await?;

    let mut session_ids: Vec<String> = ballots.iter().map(|b| b.voting_session.clone()).collect();
    session_ids.sort_unstable();
    session_ids.dedup();
    let titles = store.session_titles(&session_ids).await?;

    let votes = ballots
        .into_iter()
        .map(|b| HistoryEntry {
            session_title: titles
                .get(&b.voting_session)
                .cloned()
                .unwrap_or_else(|| "Unknown Session".to_string()),
            id: b.id,
            candidate: b.candidate,
            voting_session: b.voting_session,
            timestamp: b.created_at,
            is_verified: b.is_verified,
        })
        .collect();

    Ok(VoteHistoryResponse {
        votes,
        pagination: Pagination::new(page, limit, total),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::models::{Candidate, Role, SessionSettings, VotingSession};
    use crate::store::{BallotStore, MemoryStore, SessionStore};

    fn candidate(id: &str) -> Candidate {
        Candidate {
            id: id.into(),
            name: id.to_uppercase(),
            description: String::new(),
            image_url: String::new(),
        }
    }

    fn session(id: &str, now: DateTime<Utc>) -> VotingSession {
        VotingSession {
            session_id: id.into(),
            title: format!("Election {id}"),
            description: String::new(),
            candidates: vec![candidate("alice"), candidate("bob")],
            status: SessionStatus::Upcoming,
            voting_start_time: now - Duration::hours(1),
            voting_end_time: now + Duration::hours(1),
            result_announcement_time: now + Duration::hours(2),
            is_results_public: false,
            settings: SessionSettings::default(),
            created_by: "admin".into(),
            created_at: now,
            updated_at: now,
        }
    }

    fn voter(id: &str) -> Caller {
        Caller { voter_id: id.into(), role: Role::Voter, email_verified: true }
    }

    fn conn() -> ConnectionInfo {
        ConnectionInfo {
            ip_address: Some("198.51.100.4".into()),
            user_agent: Some("ballot-test/1.0".into()),
        }
    }

    async fn setup(sessions: &[VotingSession]) -> (Arc<MemoryStore>, SharedStore) {
        let memory = Arc::new(MemoryStore::new());
        for s in sessions {
            memory.insert_session(s).await.unwrap();
        }
        let store: SharedStore = memory.clone();
        (memory, store)
    }

    #[tokio::test]
    async fn casts_and_records_provenance() {
        let now = Utc::now();
        let (memory, store) = setup(&[session("s1", now)]).await;

        let ballot = cast(&store, &voter("v1"), "s1", "alice", &conn(), now).await.unwrap();
        assert_eq!(ballot.candidate, "alice");
        assert_eq!(ballot.ip_address, "198.51.100.4");
        assert_eq!(ballot.user_agent, "ballot-test/1.0");
        assert!(ballot.is_verified);
        assert_eq!(memory.find_ballot("v1", "s1").await.unwrap(), Some(ballot));
    }

    #[tokio::test]
    async fn second_cast_is_a_duplicate() {
        let now = Utc::now();
        let (memory, store) = setup(&[session("s1", now)]).await;

        cast(&store, &voter("v1"), "s1", "alice", &conn(), now).await.unwrap();
        let err = cast(&store, &voter("v1"), "s1", "bob", &conn(), now).await.unwrap_err();
        assert!(matches!(err, VoteError::DuplicateVote { .. }));
        assert_eq!(memory.ballot_count(), 1);
    }

    #[tokio::test]
    async fn unknown_candidate_creates_no_ballot() {
        let now = Utc::now();
        let (memory, store) = setup(&[session("s1", now)]).await;

        let err = cast(&store, &voter("v1"), "s1", "mallory", &conn(), now).await.unwrap_err();
        match err {
            VoteError::Validation(errors) => assert_eq!(errors[0].field, "candidate"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(memory.ballot_count(), 0);
    }

    #[tokio::test]
    async fn abstain_follows_the_session_setting() {
        let now = Utc::now();
        let mut strict = session("strict", now);
        strict.settings.allow_abstain = false;
        let (memory, store) = setup(&[session("open", now), strict]).await;

        cast(&store, &voter("v1"), "open", ABSTAIN, &conn(), now).await.unwrap();
        let err = cast(&store, &voter("v1"), "strict", ABSTAIN, &conn(), now).await.unwrap_err();
        assert!(matches!(err, VoteError::Validation(_)));
        assert_eq!(memory.ballot_count(), 1);
    }

    #[tokio::test]
    async fn missing_provenance_is_a_validation_error() {
        let now = Utc::now();
        let (memory, store) = setup(&[session("s1", now)]).await;

        let err = cast(&store, &voter("v1"), "s1", "alice", &ConnectionInfo::default(), now)
            .await
            .unwrap_err();
        match err {
            VoteError::Validation(errors) => {
                let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, ["ipAddress", "userAgent"]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(memory.ballot_count(), 0);
    }

    #[tokio::test]
    async fn ballots_outside_the_window_are_refused_with_status() {
        let now = Utc::now();
        let (_, store) = setup(&[session("s1", now)]).await;

        let before = now - Duration::hours(2);
        let err = cast(&store, &voter("v1"), "s1", "alice", &conn(), before).await.unwrap_err();
        assert!(matches!(
            err,
            VoteError::SessionNotActive { status: SessionStatus::Upcoming, .. }
        ));

        let after = now + Duration::hours(2);
        let err = cast(&store, &voter("v1"), "s1", "alice", &conn(), after).await.unwrap_err();
        assert!(matches!(
            err,
            VoteError::SessionNotActive { status: SessionStatus::Completed, .. }
        ));
    }

    #[tokio::test]
    async fn cancelled_session_refuses_ballots() {
        let now = Utc::now();
        let (memory, store) = setup(&[session("s1", now)]).await;
        memory.cancel_session("s1", now).await.unwrap();

        let err = cast(&store, &voter("v1"), "s1", "alice", &conn(), now).await.unwrap_err();
        assert!(matches!(
            err,
            VoteError::SessionNotActive { status: SessionStatus::Cancelled, .. }
        ));
    }

    #[tokio::test]
    async fn email_verification_gate() {
        let now = Utc::now();
        let mut relaxed = session("relaxed", now);
        relaxed.settings.require_email_verification = false;
        let (_, store) = setup(&[session("strict", now), relaxed]).await;
        let unverified = Caller { voter_id: "v1".into(), role: Role::Voter, email_verified: false };

        let err = cast(&store, &unverified, "strict", "alice", &conn(), now).await.unwrap_err();
        assert!(matches!(err, VoteError::EmailNotVerified));
        cast(&store, &unverified, "relaxed", "alice", &conn(), now).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_session_and_store_outage() {
        let now = Utc::now();
        let (memory, store) = setup(&[]).await;
        let err = cast(&store, &voter("v1"), "nope", "alice", &conn(), now).await.unwrap_err();
        assert!(matches!(err, VoteError::NotFound(_)));

        memory.set_unavailable(true);
        let err = cast(&store, &voter("v1"), "nope", "alice", &conn(), now).await.unwrap_err();
        assert!(matches!(err, VoteError::Infrastructure(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn status_reports_own_vote() {
        let now = Utc::now();
        let (_, store) = setup(&[session("s1", now)]).await;

        let before = vote_status(&store, &voter("v1"), "s1", now).await.unwrap();
        assert!(!before.has_voted);
        assert_eq!(before.session_status, SessionStatus::Active);

        cast(&store, &voter("v1"), "s1", "bob", &conn(), now).await.unwrap();
        let after = vote_status(&store, &voter("v1"), "s1", now).await.unwrap();
        assert!(after.has_voted);
        assert_eq!(after.vote.unwrap().candidate, "bob");
    }

    #[tokio::test]
    async fn history_lists_own_ballots_with_titles() {
        let now = Utc::now();
        let (memory, store) = setup(&[session("s1", now), session("s2", now)]).await;
        cast(&store, &voter("v1"), "s1", "alice", &conn(), now).await.unwrap();
        cast(&store, &voter("v1"), "s2", "bob", &conn(), now + Duration::seconds(1))
            .await
            .unwrap();
        cast(&store, &voter("v2"), "s1", "bob", &conn(), now).await.unwrap();
        // A ballot whose session record is gone still shows up.
        memory
            .insert_ballot(&Ballot {
                id: "orphan".into(),
                voter_id: "v1".into(),
                voting_session: "legacy".into(),
                candidate: "x".into(),
                ip_address: "127.0.0.1".into(),
                user_agent: "ua".into(),
                is_verified: true,
                created_at: now - Duration::days(1),
            })
            .await
            .unwrap();

        let page = history(&store, &voter("v1"), Some(1), Some(2)).await.unwrap();
        assert_eq!(page.pagination, Pagination::new(1, 2, 3));
        assert_eq!(page.votes[0].voting_session, "s2");
        assert_eq!(page.votes[0].session_title, "Election s2");

        let rest = history(&store, &voter("v1"), Some(2), Some(2)).await.unwrap();
        assert_eq!(rest.votes.len(), 1);
        assert_eq!(rest.votes[0].session_title, "Unknown Session");
    }

    #[test]
    fn long_user_agents_are_truncated_on_char_boundaries() {
        let ua = "é".repeat(400);
        let conn = ConnectionInfo {
            ip_address: Some("::1".into()),
            user_agent: Some(ua),
        };
        let p = Provenance::from_connection(&conn).unwrap();
        assert!(p.user_agent.len() <= MAX_USER_AGENT_LEN);
        assert!(p.user_agent.chars().all(|c| c == 'é'));
    }
}
