//! Session lifecycle.
//!
//! Status is a pure function of the stored timestamps, the sticky
//! `cancelled` flag and the current time. Nothing drives it from a timer;
//! every read recomputes it, and writing the recomputed value back is an
//! optional cache refresh that runs detached from the request.

use chrono::{DateTime, Utc};

use crate::models::{SessionStatus, VotingSession};
use crate::store::SharedStore;

/// Status of `session` at `now`.
///
/// `start` and `end` are both inclusive bounds of the active window.
pub fn compute_status(session: &VotingSession, now: DateTime<Utc>) -> SessionStatus {
    if session.status == SessionStatus::Cancelled {
        return SessionStatus::Cancelled;
    }
    if now < session.voting_start_time {
        SessionStatus::Upcoming
    } else if now <= session.voting_end_time {
        SessionStatus::Active
    } else {
        SessionStatus::Completed
    }
}

pub fn accepts_ballots(session: &VotingSession, now: DateTime<Utc>) -> bool {
    compute_status(session, now) == SessionStatus::Active
}

/// Recomputes `session.status` for `now` and returns it.
///
/// When the value differs from what the store holds, a background task
/// writes it back. The write never delays the caller and its failure is
/// only logged.
pub fn observe(store: &SharedStore, session: &mut VotingSession, now: DateTime<Utc>) -> SessionStatus {
    let computed = compute_status(session, now);
    if computed != session.status {
        let store = SharedStore::clone(store);
        let session_id = session.session_id.clone();
        rocket::tokio::spawn(async move {
            if let Err(err) = store.record_status(&session_id, computed).await {
                tracing::warn!(%session_id, status = %computed, error = %err, "status cache refresh failed");
            }
        });
        session.status = computed;
    }
    computed
}
