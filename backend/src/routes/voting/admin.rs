use chrono::Utc;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::State;

use crate::config::AppConfig;
use crate::error::VoteError;
use crate::identity::AdminCaller;
use crate::models::{
    page_bounds, AnnouncementRequest, AnnouncementResponse, CreateSessionRequest,
    SessionListResponse, SessionStatus, UpdateSessionRequest, VotingSession,
};
use crate::sessions;
use crate::store::SharedStore;
use crate::tally::{self, AdminResults, VotingStats};

// Admin route to get full voting results, regardless of announcement time
#[get("/results?<session>")]
pub async fn admin_results(
    store: &State<SharedStore>,
    config: &State<AppConfig>,
    admin: AdminCaller,
    session: Option<&str>,
) -> Result<Json<AdminResults>, VoteError> {
    let now = Utc::now();
    let session_id = session.unwrap_or(&config.default_session_id);
    let session = sessions::get(store.inner(), session_id, now).await?;
    tally::admin_results(store.inner(), &session, &admin, now)
        .await
        .map(Json)
}

// Admin route to get participation stats
#[get("/stats?<session>")]
pub async fn voting_stats(
    store: &State<SharedStore>,
    config: &State<AppConfig>,
    admin: AdminCaller,
    session: Option<&str>,
) -> Result<Json<VotingStats>, VoteError> {
    let now = Utc::now();
    let session_id = session.unwrap_or(&config.default_session_id);
    let session = sessions::get(store.inner(), session_id, now).await?;
    tally::voting_stats(store.inner(), &session, &admin, now)
        .await
        .map(Json)
}

#[post("/sessions", format = "json", data = "<session_request>")]
pub async fn create_session(
    store: &State<SharedStore>,
    admin: AdminCaller,
    session_request: Json<CreateSessionRequest>,
) -> Result<Custom<Json<VotingSession>>, VoteError> {
    let session =
        sessions::create(store.inner(), &admin, session_request.into_inner(), Utc::now()).await?;
    Ok(Custom(Status::Created, Json(session)))
}

#[get("/sessions?<status>&<page>&<limit>")]
pub async fn list_sessions(
    store: &State<SharedStore>,
    _admin: AdminCaller,
    status: Option<&str>,
    page: Option<i64>,
    limit: Option<i64>,
) -> Result<Json<SessionListResponse>, VoteError> {
    let status = status
        .map(str::parse::<SessionStatus>)
        .transpose()
        .map_err(|msg| VoteError::invalid("status", msg))?;
    let (page, limit) = page_bounds(page, limit);
    sessions::list(store.inner(), status, page, limit, Utc::now())
        .await
        .map(Json)
}

#[put("/sessions/<session_id>", format = "json", data = "<update>")]
pub async fn update_session(
    store: &State<SharedStore>,
    admin: AdminCaller,
    session_id: &str,
    update: Json<UpdateSessionRequest>,
) -> Result<Json<VotingSession>, VoteError> {
    sessions::update(store.inner(), &admin, session_id, update.into_inner(), Utc::now())
        .await
        .map(Json)
}

#[put("/sessions/<session_id>/announcement-time", format = "json", data = "<announcement>")]
pub async fn set_announcement_time(
    store: &State<SharedStore>,
    admin: AdminCaller,
    session_id: &str,
    announcement: Json<AnnouncementRequest>,
) -> Result<Json<AnnouncementResponse>, VoteError> {
    sessions::set_announcement(
        store.inner(),
        &admin,
        session_id,
        announcement.into_inner(),
        Utc::now(),
    )
    .await
    .map(Json)
}

#[post("/sessions/<session_id>/cancel")]
pub async fn cancel_session(
    store: &State<SharedStore>,
    admin: AdminCaller,
    session_id: &str,
) -> Result<Json<VotingSession>, VoteError> {
    sessions::cancel(store.inner(), &admin, session_id, Utc::now())
        .await
        .map(Json)
}
