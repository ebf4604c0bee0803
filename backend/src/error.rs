// Domain errors and their HTTP rendering

use chrono::{DateTime, Utc};
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::Request;
use serde::Serialize;

use crate::models::SessionStatus;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VoteError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),

    #[error("a ballot has already been cast in session {session_id}")]
    DuplicateVote { session_id: String },

    #[error("session {session_id} is {status} and does not accept ballots")]
    SessionNotActive { session_id: String, status: SessionStatus },

    /// Results exist but may not be shown yet. A defined outcome, not a fault.
    #[error("results will be announced at {announcement_time}")]
    NotYetAnnounced { announcement_time: DateTime<Utc> },

    #[error("voting session {0} not found")]
    NotFound(String),

    #[error("voting session {0} already exists")]
    SessionExists(String),

    #[error("email verification required")]
    EmailNotVerified,

    #[error("authentication required")]
    Unauthorized,

    #[error("admin access required")]
    Forbidden,

    #[error(transparent)]
    Infrastructure(#[from] StoreError),
}

impl VoteError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::DuplicateVote { .. } => "DUPLICATE_VOTE",
            Self::SessionNotActive { .. } => "SESSION_NOT_ACTIVE",
            Self::NotYetAnnounced { .. } => "NOT_YET_ANNOUNCED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::SessionExists(_) => "SESSION_EXISTS",
            Self::EmailNotVerified => "EMAIL_NOT_VERIFIED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::Infrastructure(_) => "INFRASTRUCTURE_ERROR",
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Self::Validation(_) => Status::BadRequest,
            Self::DuplicateVote { .. } | Self::SessionExists(_) => Status::Conflict,
            Self::SessionNotActive { .. } => Status::PreconditionFailed,
            Self::NotYetAnnounced { .. } | Self::EmailNotVerified | Self::Forbidden => {
                Status::Forbidden
            }
            Self::NotFound(_) => Status::NotFound,
            Self::Unauthorized => Status::Unauthorized,
            Self::Infrastructure(_) => Status::ServiceUnavailable,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub announcement_time: Option<DateTime<Utc>>,
}

impl ErrorBody {
    pub fn plain(error: &'static str, message: impl Into<String>) -> Self {
        Self {
            error,
            message: message.into(),
            errors: None,
            status: None,
            announcement_time: None,
        }
    }
}

impl From<VoteError> for ErrorBody {
    fn from(err: VoteError) -> Self {
        let mut body = Self::plain(err.code(), err.to_string());
        match err {
            VoteError::Validation(errors) => body.errors = Some(errors),
            VoteError::SessionNotActive { status, .. } => body.status = Some(status),
            VoteError::NotYetAnnounced { announcement_time } => {
                body.announcement_time = Some(announcement_time)
            }
            VoteError::Infrastructure(_) => body.message = "storage unavailable".to_string(),
            _ => {}
        }
        body
    }
}

impl<'r> Responder<'r, 'static> for VoteError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        if let VoteError::Infrastructure(ref err) = self {
            tracing::error!(error = %err, uri = %req.uri(), "store failure");
        }
        Custom(status, Json(ErrorBody::from(self))).respond_to(req)
    }
}
