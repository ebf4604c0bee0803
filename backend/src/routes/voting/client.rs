use chrono::Utc;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::State;

use crate::ballot;
use crate::config::AppConfig;
use crate::error::VoteError;
use crate::identity::{Caller, ConnectionInfo};
use crate::models::{
    CastVoteRequest, CastVoteResponse, PublicSessionView, VoteHistoryResponse, VoteStatusResponse,
};
use crate::sessions;
use crate::store::SharedStore;
use crate::tally::{self, PublicResults};
use crate::visibility::{self, Disclosure};

// Route to cast a vote
#[post("/cast", format = "json", data = "<vote_request>")]
pub async fn cast_vote(
    store: &State<SharedStore>,
    config: &State<AppConfig>,
    caller: Caller,
    connection: ConnectionInfo,
    vote_request: Json<CastVoteRequest>,
) -> Result<Custom<Json<CastVoteResponse>>, VoteError> {
    let request = vote_request.into_inner();
    let session_id = request
        .voting_session
        .as_deref()
        .unwrap_or(&config.default_session_id);

    let ballot = ballot::cast(
        store.inner(),
        &caller,
        session_id,
        &request.candidate,
        &connection,
        Utc::now(),
    )
    .await?;

    Ok(Custom(Status::Created, Json(CastVoteResponse::from(&ballot))))
}

// Route to check whether the caller has voted
#[get("/status?<session>")]
pub async fn vote_status(
    store: &State<SharedStore>,
    config: &State<AppConfig>,
    caller: Caller,
    session: Option<&str>,
) -> Result<Json<VoteStatusResponse>, VoteError> {
    let session_id = session.unwrap_or(&config.default_session_id);
    ballot::vote_status(store.inner(), &caller, session_id, Utc::now())
        .await
        .map(Json)
}

#[get("/history?<page>&<limit>")]
pub async fn vote_history(
    store: &State<SharedStore>,
    caller: Caller,
    page: Option<i64>,
    limit: Option<i64>,
) -> Result<Json<VoteHistoryResponse>, VoteError> {
    ballot::history(store.inner(), &caller, page, limit).await.map(Json)
}

#[get("/sessions/<session_id>")]
pub async fn session_info(
    store: &State<SharedStore>,
    caller: Option<Caller>,
    session_id: &str,
) -> Result<Json<PublicSessionView>, VoteError> {
    let role = caller.map(|c| c.role);
    sessions::public_view(store.inner(), session_id, role, Utc::now())
        .await
        .map(Json)
}

async fn disclose(store: &SharedStore, session_id: &str) -> Result<Json<PublicResults>, VoteError> {
    let now = Utc::now();
    let session = sessions::get(store, session_id, now).await?;
    match visibility::public_disclosure(&session, now) {
        Disclosure::Reveal(clearance) => {
            let results = tally::public_results(store, &session, clearance, now).await?;
            Ok(Json(results))
        }
        Disclosure::NotYetAnnounced { announcement_time } => {
            Err(VoteError::NotYetAnnounced { announcement_time })
        }
    }
}

#[get("/results/public")]
pub async fn default_public_results(
    store: &State<SharedStore>,
    config: &State<AppConfig>,
) -> Result<Json<PublicResults>, VoteError> {
    disclose(store.inner(), &config.default_session_id).await
}

#[get("/results/public/<session_id>")]
pub async fn public_results(
    store: &State<SharedStore>,
    session_id: &str,
) -> Result<Json<PublicResults>, VoteError> {
    disclose(store.inner(), session_id).await
}
