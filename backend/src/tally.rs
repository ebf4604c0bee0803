//! Tally engine.
//!
//! Public and admin results are separate entry points with separate result
//! types. They share [`aggregate`] and nothing else: the public one needs a
//! [`PublicClearance`] from the disclosure gate, the admin one an
//! [`AdminCaller`].

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Datelike, Duration, DurationRound, Timelike, Utc};
use serde::Serialize;

use crate::error::VoteError;
use crate::identity::AdminCaller;
use crate::lifecycle::compute_status;
use crate::models::{Role, SessionStatus, VotingSession, ABSTAIN};
use crate::store::SharedStore;
use crate::visibility::PublicClearance;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateTally {
    pub candidate: String,
    /// `None` for ballots naming a candidate no longer on the session.
    pub name: Option<String>,
    pub count: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicResults {
    pub session_id: String,
    pub title: String,
    pub status: SessionStatus,
    pub announcement_time: DateTime<Utc>,
    pub results: Vec<CandidateTally>,
    pub total_votes: i64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BallotAudit {
    pub voter_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub voted_at: DateTime<Utc>,
    pub ip_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminCandidateTally {
    #[serde(flatten)]
    pub tally: CandidateTally,
    pub voters: Vec<BallotAudit>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminResults {
    pub session_id: String,
    pub title: String,
    pub status: SessionStatus,
    pub announcement_time: DateTime<Utc>,
    pub is_results_public: bool,
    pub results: Vec<AdminCandidateTally>,
    pub total_votes: i64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyBucket {
    pub day: u32,
    pub hour: u32,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingStats {
    pub session_id: String,
    pub total_users: i64,
    pub verified_users: i64,
    pub total_votes: i64,
    pub voting_rate: f64,
    pub votes_by_hour: Vec<HourlyBucket>,
}

/// `part / whole * 100` rounded to two decimals; 0 when `whole` is 0.
pub fn percentage(part: i64, whole: i64) -> f64 {
    if whole <= 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 10_000.0).round() / 100.0
}

/// Turns raw `(candidate, count)` pairs into ordered tally rows.
///
/// Every session candidate gets a row. `abstain` gets one when the session
/// allows it or someone abstained anyway. Counts for ids not on the session
/// are kept under the raw id. Rows sort by count descending, then id.
pub fn aggregate(session: &VotingSession, counts: &[(String, i64)]) -> (Vec<CandidateTally>, i64) {
    let mut by_id: BTreeMap<&str, i64> = BTreeMap::new();
    for c in &session.candidates {
        by_id.insert(c.id.as_str(), 0);
    }
    if session.settings.allow_abstain {
        by_id.insert(ABSTAIN, 0);
    }
    for (candidate, count) in counts {
        *by_id.entry(candidate.as_str()).or_insert(0) += count;
    }

    let total: i64 = by_id.values().sum();
    let mut rows: Vec<CandidateTally> = by_id
        .into_iter()
        .map(|(id, count)| CandidateTally {
            candidate: id.to_string(),
            name: if id == ABSTAIN {
                Some("Abstain".to_string())
            } else {
                session.candidate(id).map(|c| c.name.clone())
            },
            count,
            percentage: percentage(count, total),
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.candidate.cmp(&b.candidate)));
    (rows, total)
}

pub async fn public_results(
    store: &SharedStore,
    session: &VotingSession,
    _clearance: PublicClearance,
    now: DateTime<Utc>,
) -> Result<PublicResults, VoteError> {
    let counts = store.verified_counts(&session.session_id).await?;
    let (results, total_votes) = aggregate(session, &counts);
    Ok(PublicResults {
        session_id: session.session_id.clone(),
        title: session.title.clone(),
        status: compute_status(session, now),
        announcement_time: session.result_announcement_time,
        results,
        total_votes,
        generated_at: now,
    })
}

pub async fn admin_results(
    store: &SharedStore,
    session: &VotingSession,
    _admin: &AdminCaller,
    now: DateTime<Utc>,
) -> Result<AdminResults, VoteError> {
    let ballots = store.verified_ballots(&session.session_id).await?;

    let mut voter_ids: Vec<String> = ballots.iter().map(|b| b.voter_id.clone()).collect();
    voter_ids.sort_unstable();
    voter_ids.dedup();
    let profiles: HashMap<String, _> = store
        .voters_by_ids(&voter_ids)
        .await?
        .into_iter()
        .map(|p| (p.id.clone(), p))
        .collect();

    let mut counts: BTreeMap<String, i64> = BTreeMap::new();
    let mut audits: HashMap<String, Vec<BallotAudit>> = HashMap::new();
    for ballot in ballots {
        *counts.entry(ballot.candidate.clone()).or_insert(0) += 1;
        let profile = profiles.get(&ballot.voter_id);
        audits.entry(ballot.candidate).or_default().push(BallotAudit {
            name: profile.map(|p| p.name.clone()),
            email: profile.map(|p| p.email.clone()),
            role: profile.map(|p| p.role),
            voter_id: ballot.voter_id,
            voted_at: ballot.created_at,
            ip_address: ballot.ip_address,
        });
    }
    let counts: Vec<(String, i64)> = counts.into_iter().collect();
    let (rows, total_votes) = aggregate(session, &counts);

    let results = rows
        .into_iter()
        .map(|tally| {
            let mut voters = audits.remove(&tally.candidate).unwrap_or_default();
            voters.sort_by(|a, b| a.voted_at.cmp(&b.voted_at).then_with(|| a.voter_id.cmp(&b.voter_id)));
            AdminCandidateTally { tally, voters }
        })
        .collect();

    Ok(AdminResults {
        session_id: session.session_id.clone(),
        title: session.title.clone(),
        status: compute_status(session, now),
        announcement_time: session.result_announcement_time,
        is_results_public: session.is_results_public,
        results,
        total_votes,
        generated_at: now,
    })
}

/// Groups cast times into hour buckets, oldest first. Empty hours are omitted.
pub fn votes_by_hour(times: &[DateTime<Utc>]) -> Vec<HourlyBucket> {
    let mut buckets: BTreeMap<DateTime<Utc>, i64> = BTreeMap::new();
    for t in times {
        // Only fails for timestamps near the representable range.
        let start = t.duration_trunc(Duration::hours(1)).unwrap_or(*t);
        *buckets.entry(start).or_insert(0) += 1;
    }
    buckets
        .into_iter()
        .map(|(start, count)| HourlyBucket {
            day: start.day(),
            hour: start.hour(),
            count,
        })
        .collect()
}

pub async fn voting_stats(
    store: &SharedStore,
    session: &VotingSession,
    _admin: &AdminCaller,
    now: DateTime<Utc>,
) -> Result<VotingStats, VoteError> {
    let voters = store.voter_counts().await?;
    let counts = store.verified_counts(&session.session_id).await?;
    let total_votes: i64 = counts.iter().map(|(_, n)| n).sum();
    let recent = store
        .verified_cast_times_since(&session.session_id, now - Duration::hours(24))
        .await?;

    Ok(VotingStats {
        session_id: session.session_id.clone(),
        total_users: voters.total,
        verified_users: voters.verified,
        total_votes,
        voting_rate: percentage(total_votes, voters.verified),
        votes_by_hour: votes_by_hour(&recent),
    })
}
