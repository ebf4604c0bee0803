//! Result disclosure gate.
//!
//! Admins always see results. Everyone else sees them once the session is
//! flagged public or its announcement time has passed. The gate is evaluated
//! per request; the answer changes as the clock moves, so it is never cached.

use chrono::{DateTime, Utc};

use crate::models::{Role, VotingSession};

/// Proof that the public disclosure check passed for one request.
///
/// Only [`public_disclosure`] can produce one; the public tally requires it.
#[derive(Debug)]
pub struct PublicClearance {
    _sealed: (),
}

#[derive(Debug)]
pub enum Disclosure {
    Reveal(PublicClearance),
    NotYetAnnounced { announcement_time: DateTime<Utc> },
}

fn public_may_see(session: &VotingSession, now: DateTime<Utc>) -> bool {
    session.is_results_public || now >= session.result_announcement_time
}

pub fn public_disclosure(session: &VotingSession, now: DateTime<Utc>) -> Disclosure {
    if public_may_see(session, now) {
        Disclosure::Reveal(PublicClearance { _sealed: () })
    } else {
        Disclosure::NotYetAnnounced {
            announcement_time: session.result_announcement_time,
        }
    }
}

/// Whether a caller of `role` may see the results of `session` at `now`.
/// `None` is an anonymous caller.
pub fn can_reveal(session: &VotingSession, role: Option<Role>, now: DateTime<Utc>) -> bool {
    match role {
        Some(Role::Admin) => true,
        Some(Role::Voter) | None => public_may_see(session, now),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::models::{SessionSettings, SessionStatus};

    fn session(announce: DateTime<Utc>, public: bool) -> VotingSession {
        let start = announce - Duration::hours(3);
        VotingSession {
            session_id: "s1".into(),
            title: "t".into(),
            description: String::new(),
            candidates: Vec::new(),
            status: SessionStatus::Completed,
            voting_start_time: start,
            voting_end_time: start + Duration::hours(1),
            result_announcement_time: announce,
            is_results_public: public,
            settings: SessionSettings::default(),
            created_by: "admin".into(),
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn future_announcement_hides_results_from_public_only() {
        let now = Utc::now();
        let announce = now + Duration::hours(1);
        let s = session(announce, false);

        match public_disclosure(&s, now) {
            Disclosure::NotYetAnnounced { announcement_time } => assert_eq!(announcement_time, announce),
            Disclosure::Reveal(_) => panic!("results leaked before announcement"),
        }
        assert!(!can_reveal(&s, None, now));
        assert!(!can_reveal(&s, Some(Role::Voter), now));
        assert!(can_reveal(&s, Some(Role::Admin), now));
    }

    #[test]
    fn announcement_time_opens_the_gate() {
        let now = Utc::now();
        let s = session(now, false);
        assert!(matches!(public_disclosure(&s, now), Disclosure::Reveal(_)));
        assert!(matches!(
            public_disclosure(&s, now - Duration::seconds(1)),
            Disclosure::NotYetAnnounced { .. }
        ));
        assert!(can_reveal(&s, None, now + Duration::days(1)));
    }

    #[test]
    fn public_flag_overrides_the_clock() {
        let now = Utc::now();
        let s = session(now + Duration::days(30), true);
        assert!(matches!(public_disclosure(&s, now), Disclosure::Reveal(_)));
        assert!(can_reveal(&s, Some(Role::Voter), now));
    }
}
