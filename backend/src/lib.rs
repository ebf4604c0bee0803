//! Voting backend: sessions with a time-driven lifecycle, exactly-once
//! ballots, an announcement-gated public tally and an admin tally.
//!
//! [`build`] assembles the Rocket instance for the configured store backend;
//! [`build_with_store`] takes an existing store, which is how the tests run
//! the HTTP surface over [`store::MemoryStore`].

#[macro_use]
extern crate rocket;

pub mod ballot;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod models;
pub mod routes;
pub mod schema;
pub mod sessions;
pub mod store;
pub mod tally;
pub mod visibility;

use std::sync::Arc;

use rocket::fairing::AdHoc;
use rocket::figment::Figment;
use rocket::{Build, Rocket};
use rocket_db_pools::Database;

use config::{AppConfig, ConfigError, StoreBackend};
use db::VotingDB;
use identity::TokenVerifier;
use store::{MemoryStore, SharedStore};

fn base(figment: Figment, config: AppConfig) -> Result<Rocket<Build>, ConfigError> {
    config.validate()?;
    let verifier = TokenVerifier::new(config.token_secret.as_bytes())?;

    Ok(rocket::custom(figment)
        .manage(verifier)
        .manage(config)
        .mount("/api", routes::routes())
        .mount("/api/vote", routes::voting::routes())
        .register("/", routes::catchers()))
}

/// Builds the service for `config.store_backend`.
pub fn build(config: AppConfig) -> Result<Rocket<Build>, ConfigError> {
    let figment = rocket::Config::figment();
    match config.store_backend {
        StoreBackend::Memory => build_with_store(figment, config, Arc::new(MemoryStore::new())),
        StoreBackend::Mysql => {
            let url = config
                .database_url
                .clone()
                .ok_or(ConfigError::MissingDatabaseUrl)?;
            let figment = figment.merge((
                "databases.voting_db",
                rocket_db_pools::Config {
                    url,
                    min_connections: None,
                    max_connections: config.max_connections,
                    connect_timeout: 3,
                    idle_timeout: None,
                    extensions: None,
                },
            ));

            Ok(base(figment, config)?
                .attach(VotingDB::init())
                .attach(AdHoc::try_on_ignite("Database Schema", db::apply_schema))
                .attach(AdHoc::on_ignite("Default Session Seeding", db::run_seeding)))
        }
    }
}

/// Builds the service over an existing store.
pub fn build_with_store(
    figment: Figment,
    config: AppConfig,
    store: SharedStore,
) -> Result<Rocket<Build>, ConfigError> {
    Ok(base(figment, config)?
        .manage(store)
        .attach(AdHoc::on_ignite("Default Session Seeding", db::run_seeding)))
}
