// MySQL backend over the rocket_db_pools diesel-async pool

use std::collections::HashMap;
use std::fmt::Display;

use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::mysql::Mysql;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use rocket_db_pools::diesel::prelude::*;
use rocket_db_pools::diesel::MysqlPool;

use super::{BallotStore, SessionStore, StoreError, VoterDirectory};
use crate::models::{
    Ballot, Candidate, Role, SessionSettings, SessionStatus, VoterCounts, VoterProfile,
    VotingSession,
};
use crate::schema::{voters, votes, voting_sessions};

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = voting_sessions)]
struct SessionRow {
    session_id: String,
    title: String,
    description: String,
    candidates: String,
    status: String,
    voting_start_time: NaiveDateTime,
    voting_end_time: NaiveDateTime,
    result_announcement_time: NaiveDateTime,
    is_results_public: bool,
    show_real_time_results: bool,
    show_voter_count: bool,
    require_email_verification: bool,
    allow_abstain: bool,
    created_by: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

#[derive(AsChangeset)]
#[diesel(table_name = voting_sessions)]
struct SessionChanges<'a> {
    title: &'a str,
    description: &'a str,
    voting_start_time: NaiveDateTime,
    voting_end_time: NaiveDateTime,
    result_announcement_time: NaiveDateTime,
    is_results_public: bool,
    show_real_time_results: bool,
    show_voter_count: bool,
    require_email_verification: bool,
    allow_abstain: bool,
    updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = votes)]
struct VoteRow {
    id: String,
    voter_id: String,
    voting_session: String,
    candidate: String,
    ip_address: String,
    user_agent: String,
    is_verified: bool,
    created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = voters)]
struct VoterRow {
    id: String,
    name: String,
    email: String,
    role: String,
    is_email_verified: bool,
}

impl SessionRow {
    fn from_session(session: &VotingSession) -> Result<Self, StoreError> {
        let candidates = serde_json::to_string(&session.candidates)
            .map_err(|e| StoreError::Corrupt(format!("candidates: {e}")))?;
        Ok(Self {
            session_id: session.session_id.clone(),
            title: session.title.clone(),
            description: session.description.clone(),
            candidates,
            status: session.status.as_str().to_string(),
            voting_start_time: session.voting_start_time.naive_utc(),
            voting_end_time: session.voting_end_time.naive_utc(),
            result_announcement_time: session.result_announcement_time.naive_utc(),
            is_results_public: session.is_results_public,
            show_real_time_results: session.settings.show_real_time_results,
            show_voter_count: session.settings.show_voter_count,
            require_email_verification: session.settings.require_email_verification,
            allow_abstain: session.settings.allow_abstain,
            created_by: session.created_by.clone(),
            created_at: session.created_at.naive_utc(),
            updated_at: session.updated_at.naive_utc(),
        })
    }

    fn into_session(self) -> Result<VotingSession, StoreError> {
        let candidates: Vec<Candidate> = serde_json::from_str(&self.candidates)
            .map_err(|e| StoreError::Corrupt(format!("session {}: {e}", self.session_id)))?;
        let status = self.status.parse::<SessionStatus>().map_err(StoreError::Corrupt)?;
        Ok(VotingSession {
            session_id: self.session_id,
            title: self.title,
            description: self.description,
            candidates,
            status,
            voting_start_time: self.voting_start_time.and_utc(),
            voting_end_time: self.voting_end_time.and_utc(),
            result_announcement_time: self.result_announcement_time.and_utc(),
            is_results_public: self.is_results_public,
            settings: SessionSettings {
                show_real_time_results: self.show_real_time_results,
                show_voter_count: self.show_voter_count,
                require_email_verification: self.require_email_verification,
                allow_abstain: self.allow_abstain,
            },
            created_by: self.created_by,
            created_at: self.created_at.and_utc(),
            updated_at: self.updated_at.and_utc(),
        })
    }
}

impl From<&Ballot> for VoteRow {
    fn from(ballot: &Ballot) -> Self {
        Self {
            id: ballot.id.clone(),
            voter_id: ballot.voter_id.clone(),
            voting_session: ballot.voting_session.clone(),
            candidate: ballot.candidate.clone(),
            ip_address: ballot.ip_address.clone(),
            user_agent: ballot.user_agent.clone(),
            is_verified: ballot.is_verified,
            created_at: ballot.created_at.naive_utc(),
        }
    }
}

impl From<VoteRow> for Ballot {
    fn from(row: VoteRow) -> Self {
        Self {
            id: row.id,
            voter_id: row.voter_id,
            voting_session: row.voting_session,
            candidate: row.candidate,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            is_verified: row.is_verified,
            created_at: row.created_at.and_utc(),
        }
    }
}

impl TryFrom<VoterRow> for VoterProfile {
    type Error = StoreError;

    fn try_from(row: VoterRow) -> Result<Self, Self::Error> {
        Ok(Self {
            role: row.role.parse::<Role>().map_err(StoreError::Corrupt)?,
            id: row.id,
            name: row.name,
            email: row.email,
            is_email_verified: row.is_email_verified,
        })
    }
}

fn unavailable(err: impl Display) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn query_failed(err: DieselError) -> StoreError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => StoreError::Duplicate,
        err @ DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _) => {
            StoreError::Unavailable(err.to_string())
        }
        other => StoreError::Query(other.to_string()),
    }
}

/// Sessions whose status at `now` equals `status`, expressed in SQL so that
/// filtering and paging happen in the database.
fn sessions_with_status(
    status: Option<SessionStatus>,
    now: NaiveDateTime,
) -> voting_sessions::BoxedQuery<'static, Mysql> {
    use crate::schema::voting_sessions::dsl;

    let query = dsl::voting_sessions.into_boxed();
    let cancelled = SessionStatus::Cancelled.as_str();
    match status {
        None => query,
        Some(SessionStatus::Cancelled) => query.filter(dsl::status.eq(cancelled)),
        Some(SessionStatus::Upcoming) => query
            .filter(dsl::status.ne(cancelled))
            .filter(dsl::voting_start_time.gt(now)),
        Some(SessionStatus::Active) => query
            .filter(dsl::status.ne(cancelled))
            .filter(dsl::voting_start_time.le(now))
            .filter(dsl::voting_end_time.ge(now)),
        Some(SessionStatus::Completed) => query
            .filter(dsl::status.ne(cancelled))
            .filter(dsl::voting_end_time.lt(now)),
    }
}

#[derive(Clone)]
pub struct MysqlStore {
    pool: MysqlPool,
}

impl MysqlStore {
    pub fn new(pool: MysqlPool) -> Self {
        Self { pool }
    }
}

#[rocket::async_trait]
impl SessionStore for MysqlStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await.map_err(unavailable)?;
        diesel::sql_query("SELECT 1")
            .execute(&mut conn)
            .await
            .map_err(query_failed)?;
        Ok(())
    }

    async fn insert_session(&self, session: &VotingSession) -> Result<(), StoreError> {
        let row = SessionRow::from_session(session)?;
        let mut conn = self.pool.get().await.map_err(unavailable)?;
        diesel::insert_into(voting_sessions::table)
            .values(&row)
            .execute(&mut conn)
            .await
            .map_err(query_failed)?;
        Ok(())
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<VotingSession>, StoreError> {
        let mut conn = self.pool.get().await.map_err(unavailable)?;
        let row = voting_sessions::table
            .find(session_id)
            .select(SessionRow::as_select())
            .first::<SessionRow>(&mut conn)
            .await
            .optional()
            .map_err(query_failed)?;
        row.map(SessionRow::into_session).transpose()
    }

    async fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        now: DateTime<Utc>,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<VotingSession>, i64), StoreError> {
        let now = now.naive_utc();
        let mut conn = self.pool.get().await.map_err(unavailable)?;

        let total: i64 = sessions_with_status(status, now)
            .count()
            .get_result(&mut conn)
            .await
            .map_err(query_failed)?;

        let rows = sessions_with_status(status, now)
            .order((
                voting_sessions::created_at.desc(),
                voting_sessions::session_id.asc(),
            ))
            .offset(offset)
            .limit(limit)
            .load::<SessionRow>(&mut conn)
            .await
            .map_err(query_failed)?;

        let sessions = rows
            .into_iter()
            .map(SessionRow::into_session)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((sessions, total))
    }

    async fn update_session(&self, session: &VotingSession) -> Result<bool, StoreError> {
        let changes = SessionChanges {
            title: &session.title,
            description: &session.description,
            voting_start_time: session.voting_start_time.naive_utc(),
            voting_end_time: session.voting_end_time.naive_utc(),
            result_announcement_time: session.result_announcement_time.naive_utc(),
            is_results_public: session.is_results_public,
            show_real_time_results: session.settings.show_real_time_results,
            show_voter_count: session.settings.show_voter_count,
            require_email_verification: session.settings.require_email_verification,
            allow_abstain: session.settings.allow_abstain,
            updated_at: session.updated_at.naive_utc(),
        };
        let mut conn = self.pool.get().await.map_err(unavailable)?;
        // MySQL reports matched rows only when values change, so existence
        // is checked separately.
        let exists: i64 = voting_sessions::table
            .find(&session.session_id)
            .count()
            .get_result(&mut conn)
            .await
            .map_err(query_failed)?;
        if exists == 0 {
            return Ok(false);
        }
        diesel::update(voting_sessions::table.find(&session.session_id))
            .set(&changes)
            .execute(&mut conn)
            .await
            .map_err(query_failed)?;
        Ok(true)
    }

    async fn record_status(&self, session_id: &str, status: SessionStatus) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await.map_err(unavailable)?;
        diesel::update(
            voting_sessions::table
                .filter(voting_sessions::session_id.eq(session_id))
                .filter(voting_sessions::status.ne(SessionStatus::Cancelled.as_str())),
        )
        .set(voting_sessions::status.eq(status.as_str()))
        .execute(&mut conn)
        .await
        .map_err(query_failed)?;
        Ok(())
    }

    async fn cancel_session(&self, session_id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await.map_err(unavailable)?;
        let exists: i64 = voting_sessions::table
            .find(session_id)
            .count()
            .get_result(&mut conn)
            .await
            .map_err(query_failed)?;
        if exists == 0 {
            return Ok(false);
        }
        diesel::update(voting_sessions::table.find(session_id))
            .set((
                voting_sessions::status.eq(SessionStatus::Cancelled.as_str()),
                voting_sessions::updated_at.eq(now.naive_utc()),
            ))
            .execute(&mut conn)
            .await
            .map_err(query_failed)?;
        Ok(true)
    }

    async fn session_titles(&self, session_ids: &[String]) -> Result<HashMap<String, String>, StoreError> {
        if session_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.pool.get().await.map_err(unavailable)?;
        let pairs = voting_sessions::table
            .filter(voting_sessions::session_id.eq_any(session_ids))
            .select((voting_sessions::session_id, voting_sessions::title))
            .load::<(String, String)>(&mut conn)
            .await
            .map_err(query_failed)?;
        Ok(pairs.into_iter().collect())
    }
}

#[rocket::async_trait]
impl BallotStore for MysqlStore {
    async fn insert_ballot(&self, ballot: &Ballot) -> Result<(), StoreError> {
        let row = VoteRow::from(ballot);
        let mut conn = self.pool.get().await.map_err(unavailable)?;
        // uq_votes_voter_session decides the race; no pre-check.
        diesel::insert_into(votes::table)
            .values(&row)
            .execute(&mut conn)
            .await
            .map_err(query_failed)?;
        Ok(())
    }

    async fn find_ballot(&self, voter_id: &str, session_id: &str) -> Result<Option<Ballot>, StoreError> {
        let mut conn = self.pool.get().await.map_err(unavailable)?;
        let row = votes::table
            .filter(votes::voter_id.eq(voter_id))
            .filter(votes::voting_session.eq(session_id))
            .select(VoteRow::as_select())
            .first::<VoteRow>(&mut conn)
            .await
            .optional()
            .map_err(query_failed)?;
        Ok(row.map(Ballot::from))
    }

    async fn verified_counts(&self, session_id: &str) -> Result<Vec<(String, i64)>, StoreError> {
        use diesel::dsl::count;

        let mut conn = self.pool.get().await.map_err(unavailable)?;
        votes::table
            .filter(votes::voting_session.eq(session_id))
            .filter(votes::is_verified.eq(true))
            .group_by(votes::candidate)
            .select((votes::candidate, count(votes::id)))
            .load::<(String, i64)>(&mut conn)
            .await
            .map_err(query_failed)
    }

    async fn verified_ballots(&self, session_id: &str) -> Result<Vec<Ballot>, StoreError> {
        let mut conn = self.pool.get().await.map_err(unavailable)?;
        let rows = votes::table
            .filter(votes::voting_session.eq(session_id))
            .filter(votes::is_verified.eq(true))
            .order((votes::created_at.asc(), votes::id.asc()))
            .select(VoteRow::as_select())
            .load::<VoteRow>(&mut conn)
            .await
            .map_err(query_failed)?;
        Ok(rows.into_iter().map(Ballot::from).collect())
    }

    async fn verified_cast_times_since(
        &self,
        session_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError> {
        let mut conn = self.pool.get().await.map_err(unavailable)?;
        let times = votes::table
            .filter(votes::voting_session.eq(session_id))
            .filter(votes::is_verified.eq(true))
            .filter(votes::created_at.ge(since.naive_utc()))
            .select(votes::created_at)
            .load::<NaiveDateTime>(&mut conn)
            .await
            .map_err(query_failed)?;
        Ok(times.into_iter().map(|t| t.and_utc()).collect())
    }

    async fn voter_history(
        &self,
        voter_id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Ballot>, i64), StoreError> {
        let mut conn = self.pool.get().await.map_err(unavailable)?;
        let total: i64 = votes::table
            .filter(votes::voter_id.eq(voter_id))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(query_failed)?;
        let rows = votes::table
            .filter(votes::voter_id.eq(voter_id))
            .order((votes::created_at.desc(), votes::id.asc()))
            .offset(offset)
            .limit(limit)
            .select(VoteRow::as_select())
            .load::<VoteRow>(&mut conn)
            .await
            .map_err(query_failed)?;
        Ok((rows.into_iter().map(Ballot::from).collect(), total))
    }
}

#[rocket::async_trait]
impl VoterDirectory for MysqlStore {
    async fn voters_by_ids(&self, voter_ids: &[String]) -> Result<Vec<VoterProfile>, StoreError> {
        if voter_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await.map_err(unavailable)?;
        let rows = voters::table
            .filter(voters::id.eq_any(voter_ids))
            .select(VoterRow::as_select())
            .load::<VoterRow>(&mut conn)
            .await
            .map_err(query_failed)?;
        rows.into_iter().map(VoterProfile::try_from).collect()
    }

    async fn voter_counts(&self) -> Result<VoterCounts, StoreError> {
        let mut conn = self.pool.get().await.map_err(unavailable)?;
        let total: i64 = voters::table
            .filter(voters::role.eq(Role::Voter.as_str()))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(query_failed)?;
        let verified: i64 = voters::table
            .filter(voters::role.eq(Role::Voter.as_str()))
            .filter(voters::is_email_verified.eq(true))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(query_failed)?;
        Ok(VoterCounts { total, verified })
    }
}
