// Database bootstrap and startup seeding

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rocket::fairing;
use rocket::{Build, Rocket};
use rocket_db_pools::diesel::prelude::*;
use rocket_db_pools::diesel::MysqlPool;
use rocket_db_pools::Database;

use crate::config::AppConfig;
use crate::error::VoteError;
use crate::identity::Caller;
use crate::models::{
    Candidate, CreateSessionRequest, Role, SessionSettings, VotingSession, ABSTAIN,
};
use crate::sessions;
use crate::store::{MysqlStore, SharedStore, StoreError};

/// Database connection pool for voting
#[derive(Database)]
#[database("voting_db")]
pub struct VotingDB(MysqlPool);

/// Idempotent schema statements, applied in order at ignite.
const SCHEMA: [(&str, &str); 3] = [
    ("001_voting_sessions", include_str!("../migrations/001_voting_sessions.sql")),
    ("002_votes", include_str!("../migrations/002_votes.sql")),
    ("003_voters", include_str!("../migrations/003_voters.sql")),
];

async fn run_schema(pool: &MysqlPool) -> Result<(), StoreError> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
    for (name, sql) in SCHEMA {
        diesel::sql_query(sql)
            .execute(&mut conn)
            .await
            .map_err(|e| StoreError::Query(format!("{name}: {e}")))?;
        tracing::debug!(migration = name, "schema statement applied");
    }
    Ok(())
}

/// Applies the schema and manages a MySQL-backed [`SharedStore`].
pub async fn apply_schema(rocket: Rocket<Build>) -> fairing::Result {
    let Some(db) = VotingDB::fetch(&rocket) else {
        tracing::error!("voting_db pool is not initialised");
        return Err(rocket);
    };
    let pool = db.0.clone();

    match run_schema(&pool).await {
        Ok(()) => {
            tracing::info!(tables = SCHEMA.len(), "database schema is up to date");
            let store: SharedStore = Arc::new(MysqlStore::new(pool));
            Ok(rocket.manage(store))
        }
        Err(err) => {
            tracing::error!(error = %err, "database schema bootstrap failed");
            Err(rocket)
        }
    }
}

/// Lowercase ASCII id derived from a display name.
fn candidate_id(name: &str, index: usize) -> String {
    let mut id = String::new();
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            id.push(c.to_ascii_lowercase());
        } else if !id.is_empty() && !id.ends_with('-') {
            id.push('-');
        }
    }
    let id: String = id.trim_end_matches('-').chars().take(64).collect();
    if id.is_empty() {
        format!("candidate-{}", index + 1)
    } else {
        id
    }
}

/// Ids for each configured name. Slugs that collide, with each other or with
/// the abstain choice, get a numeric suffix (`bob`, `bob-2`).
fn candidate_ids(names: &[String]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::from([ABSTAIN.to_string()]);
    names
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let base = candidate_id(name, index);
            let mut id = base.clone();
            let mut n = 2;
            while taken.contains(&id) {
                let suffix = format!("-{n}");
                let stem: String = base.chars().take(64 - suffix.len()).collect();
                id = format!("{stem}{suffix}");
                n += 1;
            }
            taken.insert(id.clone());
            id
        })
        .collect()
}

/// Creates the default session from the configured candidate names unless
/// it already exists. Returns the session when one was created.
pub async fn seed_default_session(
    store: &SharedStore,
    config: &AppConfig,
    now: DateTime<Utc>,
) -> Result<Option<VotingSession>, VoteError> {
    let names = config.seed_candidates();
    if names.is_empty() || store.find_session(&config.default_session_id).await?.is_some() {
        return Ok(None);
    }

    let close = now + Duration::hours(config.seed_voting_hours);
    let request = CreateSessionRequest {
        title: "General Election".to_string(),
        description: String::new(),
        session_id: config.default_session_id.clone(),
        candidates: candidate_ids(&names)
            .into_iter()
            .zip(&names)
            .map(|(id, name)| Candidate {
                id,
                name: name.clone(),
                description: String::new(),
                image_url: String::new(),
            })
            .collect(),
        voting_start_time: now,
        voting_end_time: close,
        result_announcement_time: close,
        is_results_public: false,
        settings: SessionSettings::default(),
    };
    let system = Caller {
        voter_id: "system".to_string(),
        role: Role::Admin,
        email_verified: true,
    }
    .into_admin()?;

    match sessions::create(store, &system, request, now).await {
        Ok(session) => Ok(Some(session)),
        Err(VoteError::SessionExists(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

pub async fn run_seeding(rocket: Rocket<Build>) -> Rocket<Build> {
    let (Some(store), Some(config)) = (rocket.state::<SharedStore>(), rocket.state::<AppConfig>()) else {
        return rocket;
    };
    let (store, config) = (store.clone(), config.clone());

    match seed_default_session(&store, &config, Utc::now()).await {
        Ok(Some(session)) => tracing::info!(
            session_id = %session.session_id,
            candidates = session.candidates.len(),
            "seeded default voting session"
        ),
        Ok(None) => {}
        Err(err) => tracing::warn!(error = %err, "seeding the default session failed"),
    }
    rocket
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionStatus;
    use crate::store::MemoryStore;

    #[test]
    fn candidate_ids_are_slugs() {
        assert_eq!(candidate_id("Jane Q. Public", 0), "jane-q-public");
        assert_eq!(candidate_id("  --Bob--  ", 1), "bob");
        assert_eq!(candidate_id("???", 2), "candidate-3");
    }

    #[tokio::test]
    async fn seeding_creates_an_open_default_session_once() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let mut config = AppConfig::memory("0123456789abcdef");
        config.candidates = Some("Alice Smith, Bob".to_string());
        config.seed_voting_hours = 24;
        let now = Utc::now();

        let session = seed_default_session(&store, &config, now).await.unwrap().unwrap();
        assert_eq!(session.session_id, "general-election-2024");
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.candidates[0].id, "alice-smith");
        assert_eq!(session.result_announcement_time, now + Duration::hours(24));

        assert!(seed_default_session(&store, &config, now).await.unwrap().is_none());
    }

    #[test]
    fn colliding_slugs_get_a_suffix() {
        let names: Vec<String> = ["Bob", "bob", "B.O.B", "Abstain", "BOB"]
            .iter()
            .map(|n| n.to_string())
            .collect();
        assert_eq!(candidate_ids(&names), ["bob", "bob-2", "b-o-b", "abstain-2", "bob-3"]);

        let long = vec!["x".repeat(80), "X".repeat(70)];
        let ids = candidate_ids(&long);
        assert_eq!(ids[0], "x".repeat(64));
        assert_eq!(ids[1], format!("{}-2", "x".repeat(62)));
    }

    #[tokio::test]
    async fn seeding_survives_names_that_share_a_slug() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let mut config = AppConfig::memory("0123456789abcdef");
        config.candidates = Some("Bob, bob".to_string());

        let session = seed_default_session(&store, &config, Utc::now()).await.unwrap().unwrap();
        let ids: Vec<&str> = session.candidates.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["bob", "bob-2"]);
        assert_eq!(session.candidates[1].name, "bob");
    }

    #[tokio::test]
    async fn nothing_is_seeded_without_candidates() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let config = AppConfig::memory("0123456789abcdef");
        assert!(seed_default_session(&store, &config, Utc::now()).await.unwrap().is_none());
    }
}
