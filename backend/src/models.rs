use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Candidate id that records an explicit abstention.
pub const ABSTAIN: &str = "abstain";

pub type VoterId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Upcoming,
    Active,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upcoming => "upcoming",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upcoming" => Ok(Self::Upcoming),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!(
                "unknown status {other:?}; expected upcoming, active, completed or cancelled"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Voter,
    Admin,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Voter => "voter",
            Self::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "voter" => Ok(Self::Voter),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    pub show_real_time_results: bool,
    pub show_voter_count: bool,
    pub require_email_verification: bool,
    pub allow_abstain: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            show_real_time_results: false,
            show_voter_count: true,
            require_email_verification: true,
            allow_abstain: true,
        }
    }
}

/// A bounded election event with its own candidates, timing window and
/// disclosure policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingSession {
    pub session_id: String,
    pub title: String,
    pub description: String,
    pub candidates: Vec<Candidate>,
    /// Last status written to the store. Only `Cancelled` is authoritative;
    /// everything else is recomputed from the clock on read.
    pub status: SessionStatus,
    pub voting_start_time: DateTime<Utc>,
    pub voting_end_time: DateTime<Utc>,
    pub result_announcement_time: DateTime<Utc>,
    pub is_results_public: bool,
    pub settings: SessionSettings,
    pub created_by: VoterId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VotingSession {
    pub fn candidate(&self, id: &str) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.id == id)
    }

    /// Whether `choice` is a valid ballot for this session.
    pub fn accepts_choice(&self, choice: &str) -> bool {
        if choice == ABSTAIN {
            return self.settings.allow_abstain;
        }
        self.candidate(choice).is_some()
    }
}

/// One voter's immutable choice in one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ballot {
    pub id: String,
    pub voter_id: VoterId,
    pub voting_session: String,
    pub candidate: String,
    pub ip_address: String,
    pub user_agent: String,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

/// Directory entry owned by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterProfile {
    pub id: VoterId,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub is_email_verified: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoterCounts {
    pub total: i64,
    pub verified: i64,
}

// --- Requests ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastVoteRequest {
    pub candidate: String,
    #[serde(default)]
    pub voting_session: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub session_id: String,
    pub candidates: Vec<Candidate>,
    pub voting_start_time: DateTime<Utc>,
    pub voting_end_time: DateTime<Utc>,
    pub result_announcement_time: DateTime<Utc>,
    #[serde(default)]
    pub is_results_public: bool,
    #[serde(default)]
    pub settings: SessionSettings,
}

/// Admin update. Only the fields listed here can change after creation;
/// anything else in the request body is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSessionRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub voting_start_time: Option<DateTime<Utc>>,
    pub voting_end_time: Option<DateTime<Utc>>,
    pub result_announcement_time: Option<DateTime<Utc>>,
    pub is_results_public: Option<bool>,
    pub settings: Option<SettingsPatch>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub show_real_time_results: Option<bool>,
    pub show_voter_count: Option<bool>,
    pub require_email_verification: Option<bool>,
    pub allow_abstain: Option<bool>,
}

impl SettingsPatch {
    pub fn apply(self, settings: &mut SessionSettings) {
        if let Some(v) = self.show_real_time_results {
            settings.show_real_time_results = v;
        }
        if let Some(v) = self.show_voter_count {
            settings.show_voter_count = v;
        }
        if let Some(v) = self.require_email_verification {
            settings.require_email_verification = v;
        }
        if let Some(v) = self.allow_abstain {
            settings.allow_abstain = v;
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncementRequest {
    pub announcement_time: DateTime<Utc>,
    #[serde(default)]
    pub make_results_public: Option<bool>,
}

// --- Responses ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CastVoteResponse {
    pub id: String,
    pub candidate: String,
    pub voting_session: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&Ballot> for CastVoteResponse {
    fn from(ballot: &Ballot) -> Self {
        Self {
            id: ballot.id.clone(),
            candidate: ballot.candidate.clone(),
            voting_session: ballot.voting_session.clone(),
            timestamp: ballot.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnVote {
    pub candidate: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteStatusResponse {
    pub voting_session: String,
    pub session_status: SessionStatus,
    pub has_voted: bool,
    pub vote: Option<OwnVote>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub candidate: String,
    pub voting_session: String,
    pub session_title: String,
    pub timestamp: DateTime<Utc>,
    pub is_verified: bool,
}

pub const DEFAULT_PAGE_LIMIT: i64 = 10;
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Normalises 1-based paging input to `(page, limit)`.
pub fn page_bounds(page: Option<i64>, limit: Option<i64>) -> (i64, i64) {
    let page = page.filter(|p| *p >= 1).unwrap_or(1);
    let limit = limit
        .filter(|l| *l >= 1)
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .min(MAX_PAGE_LIMIT);
    (page, limit)
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: i64,
    pub total_pages: i64,
    pub total_items: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total_items: i64) -> Self {
        let total_pages = if limit > 0 { (total_items + limit - 1) / limit } else { 0 };
        Self {
            current_page: page,
            total_pages,
            total_items,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteHistoryResponse {
    pub votes: Vec<HistoryEntry>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionListResponse {
    pub sessions: Vec<VotingSession>,
    pub pagination: Pagination,
}

/// What anyone may see about a session.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicSessionView {
    pub session_id: String,
    pub title: String,
    pub description: String,
    pub candidates: Vec<Candidate>,
    pub status: SessionStatus,
    pub voting_start_time: DateTime<Utc>,
    pub voting_end_time: DateTime<Utc>,
    pub result_announcement_time: DateTime<Utc>,
    pub allow_abstain: bool,
    pub require_email_verification: bool,
    /// Whether the requesting caller may see results right now.
    pub results_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voter_count: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncementResponse {
    pub announcement_time: DateTime<Utc>,
    pub is_results_public: bool,
}
