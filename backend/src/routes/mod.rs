// Routes module - organizes all HTTP route handlers

pub mod voting;

use chrono::{DateTime, Utc};
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::{Catcher, Request, Route, State};
use serde::Serialize;

use crate::error::ErrorBody;
use crate::store::SharedStore;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiIndex {
    pub name: &'static str,
    pub version: &'static str,
    pub endpoints: Vec<&'static str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub store: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[get("/")]
pub fn index() -> Json<ApiIndex> {
    Json(ApiIndex {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        endpoints: vec![
            "GET /api/health",
            "POST /api/vote/cast",
            "GET /api/vote/status",
            "GET /api/vote/history",
            "GET /api/vote/sessions/<id>",
            "GET /api/vote/results/public",
            "GET /api/vote/results/public/<id>",
            "GET /api/vote/results",
            "GET /api/vote/stats",
            "POST /api/vote/sessions",
            "GET /api/vote/sessions",
            "PUT /api/vote/sessions/<id>",
            "PUT /api/vote/sessions/<id>/announcement-time",
            "POST /api/vote/sessions/<id>/cancel",
        ],
    })
}

#[get("/health")]
pub async fn health(store: &State<SharedStore>) -> Custom<Json<Health>> {
    let timestamp = Utc::now();
    match store.ping().await {
        Ok(()) => Custom(
            Status::Ok,
            Json(Health { status: "ok", store: "up", timestamp }),
        ),
        Err(err) => {
            tracing::warn!(error = %err, "health check: store unreachable");
            Custom(
                Status::ServiceUnavailable,
                Json(Health { status: "degraded", store: "down", timestamp }),
            )
        }
    }
}

pub fn routes() -> Vec<Route> {
    routes![index, health]
}

#[catch(400)]
pub fn bad_request() -> Json<ErrorBody> {
    Json(ErrorBody::plain("VALIDATION_ERROR", "malformed request"))
}

#[catch(401)]
pub fn unauthorized() -> Json<ErrorBody> {
    Json(ErrorBody::plain("UNAUTHORIZED", "authentication required"))
}

#[catch(403)]
pub fn forbidden() -> Json<ErrorBody> {
    Json(ErrorBody::plain("FORBIDDEN", "admin access required"))
}

#[catch(404)]
pub fn not_found(req: &Request) -> Json<ErrorBody> {
    Json(ErrorBody::plain("NOT_FOUND", format!("no route for {}", req.uri())))
}

#[catch(422)]
pub fn unprocessable() -> Json<ErrorBody> {
    Json(ErrorBody::plain("VALIDATION_ERROR", "request body does not match the expected shape"))
}

#[catch(500)]
pub fn internal_error() -> Json<ErrorBody> {
    Json(ErrorBody::plain("INTERNAL_ERROR", "internal server error"))
}

pub fn catchers() -> Vec<Catcher> {
    catchers![bad_request, unauthorized, forbidden, not_found, unprocessable, internal_error]
}
