//! Session administration: create, list, read, update, announce, cancel.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::error::{FieldError, VoteError};
use crate::identity::AdminCaller;
use crate::lifecycle;
use crate::models::{
    AnnouncementRequest, AnnouncementResponse, Candidate, CreateSessionRequest, Pagination,
    PublicSessionView, Role, SessionListResponse, SessionStatus, UpdateSessionRequest,
    VotingSession, ABSTAIN,
};
use crate::store::{SharedStore, StoreError};
use crate::visibility;

const MAX_TITLE_LEN: usize = 100;
const MAX_DESCRIPTION_LEN: usize = 500;
const MAX_ID_LEN: usize = 64;

fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.chars().count() <= MAX_ID_LEN
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn check_title(title: &str, errors: &mut Vec<FieldError>) {
    let len = title.chars().count();
    if len == 0 {
        errors.push(FieldError::new("title", "is required"));
    } else if len > MAX_TITLE_LEN {
        errors.push(FieldError::new("title", format!("must be at most {MAX_TITLE_LEN} characters")));
    }
}

fn check_description(description: &str, errors: &mut Vec<FieldError>) {
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        errors.push(FieldError::new(
            "description",
            format!("must be at most {MAX_DESCRIPTION_LEN} characters"),
        ));
    }
}

fn check_window(start: DateTime<Utc>, end: DateTime<Utc>, errors: &mut Vec<FieldError>) {
    if start >= end {
        errors.push(FieldError::new("votingEndTime", "must be after votingStartTime"));
    }
}

fn check_candidates(candidates: &[Candidate], errors: &mut Vec<FieldError>) {
    if candidates.is_empty() {
        errors.push(FieldError::new("candidates", "at least one candidate is required"));
    }
    let mut seen = HashSet::new();
    for (i, c) in candidates.iter().enumerate() {
        let field = format!("candidates[{i}].id");
        if c.id.is_empty() || c.id.chars().count() > MAX_ID_LEN {
            errors.push(FieldError::new(&field, format!("must be 1 to {MAX_ID_LEN} characters")));
        } else if c.id == ABSTAIN {
            errors.push(FieldError::new(&field, "is reserved"));
        } else if !seen.insert(c.id.as_str()) {
            errors.push(FieldError::new(&field, "is duplicated"));
        }
        if c.name.is_empty() {
            errors.push(FieldError::new(format!("candidates[{i}].name"), "is required"));
        }
    }
}

fn trimmed(req: CreateSessionRequest) -> CreateSessionRequest {
    CreateSessionRequest {
        title: req.title.trim().to_string(),
        description: req.description.trim().to_string(),
        session_id: req.session_id.trim().to_string(),
        candidates: req
            .candidates
            .into_iter()
            .map(|c| Candidate {
                id: c.id.trim().to_string(),
                name: c.name.trim().to_string(),
                description: c.description.trim().to_string(),
                image_url: c.image_url.trim().to_string(),
            })
            .collect(),
        ..req
    }
}

/// Field errors of an already trimmed create request.
pub fn validate_new(req: &CreateSessionRequest) -> Vec<FieldError> {
    let mut errors = Vec::new();
    check_title(&req.title, &mut errors);
    check_description(&req.description, &mut errors);
    if !is_valid_session_id(&req.session_id) {
        errors.push(FieldError::new(
            "sessionId",
            format!("must be 1 to {MAX_ID_LEN} letters, digits, '_' or '-'"),
        ));
    }
    check_candidates(&req.candidates, &mut errors);
    check_window(req.voting_start_time, req.voting_end_time, &mut errors);
    errors
}

pub async fn create(
    store: &SharedStore,
    admin: &AdminCaller,
    req: CreateSessionRequest,
    now: DateTime<Utc>,
) -> Result<VotingSession, VoteError> {
    let req = trimmed(req);
    let errors = validate_new(&req);
    if !errors.is_empty() {
        return Err(VoteError::Validation(errors));
    }

    let mut session = VotingSession {
        session_id: req.session_id,
        title: req.title,
        description: req.description,
        candidates: req.candidates,
        status: SessionStatus::Upcoming,
        voting_start_time: req.voting_start_time,
        voting_end_time: req.voting_end_time,
        result_announcement_time: req.result_announcement_time,
        is_results_public: req.is_results_public,
        settings: req.settings,
        created_by: admin.voter_id().to_string(),
        created_at: now,
        updated_at: now,
    };
    session.status = lifecycle::compute_status(&session, now);

    match store.insert_session(&session).await {
        Ok(()) => {
            tracing::info!(session_id = %session.session_id, created_by = %session.created_by, "voting session created");
            Ok(session)
        }
        Err(StoreError::Duplicate) => Err(VoteError::SessionExists(session.session_id)),
        Err(err) => Err(err.into()),
    }
}

/// Loads a session with its status recomputed for `now`.
pub async fn get(store: &SharedStore, session_id: &str, now: DateTime<Utc>) -> Result<VotingSession, VoteError> {
    let mut session = store
        .find_session(session_id)
        .await?
        .ok_or_else(|| VoteError::NotFound(session_id.to_string()))?;
    lifecycle::observe(store, &mut session, now);
    Ok(session)
}

pub async fn list(
    store: &SharedStore,
    status: Option<SessionStatus>,
    page: i64,
    limit: i64,
    now: DateTime<Utc>,
) -> Result<SessionListResponse, VoteError> {
    let offset = (page - 1).saturating_mul(limit);
    let (mut sessions, total) = store.list_sessions(status, now, offset, limit).await?;
    for session in &mut sessions {
        lifecycle::observe(store, session, now);
    }
    Ok(SessionListResponse {
        sessions,
        pagination: Pagination::new(page, limit, total),
    })
}

/// What `role` (or an anonymous caller) may see about a session.
pub async fn public_view(
    store: &SharedStore,
    session_id: &str,
    role: Option<Role>,
    now: DateTime<Utc>,
) -> Result<PublicSessionView, VoteError> {
    let session = get(store, session_id, now).await?;
    let results_available = visibility::can_reveal(&session, role, now);
    let voter_count = if session.settings.show_voter_count {
        let counts = store.verified_counts(&session.session_id).await?;
        Some(counts.iter().map(|(_, n)| n).sum())
    } else {
        None
    };
    Ok(PublicSessionView {
        session_id: session.session_id,
        title: session.title,
        description: session.description,
        candidates: session.candidates,
        status: session.status,
        voting_start_time: session.voting_start_time,
        voting_end_time: session.voting_end_time,
        result_announcement_time: session.result_announcement_time,
        allow_abstain: session.settings.allow_abstain,
        require_email_verification: session.settings.require_email_verification,
        results_available,
        voter_count,
    })
}

async fn save(store: &SharedStore, mut session: VotingSession, now: DateTime<Utc>) -> Result<VotingSession, VoteError> {
    session.updated_at = now;
    if !store.update_session(&session).await? {
        return Err(VoteError::NotFound(session.session_id));
    }
    lifecycle::observe(store, &mut session, now);
    Ok(session)
}

/// Applies the allow-listed fields of `req`. Id, candidates and creator
/// never change.
pub async fn update(
    store: &SharedStore,
    _admin: &AdminCaller,
    session_id: &str,
    req: UpdateSessionRequest,
    now: DateTime<Utc>,
) -> Result<VotingSession, VoteError> {
    let mut session = get(store, session_id, now).await?;
    let mut errors = Vec::new();

    if let Some(title) = req.title {
        session.title = title.trim().to_string();
        check_title(&session.title, &mut errors);
    }
    if let Some(description) = req.description {
        session.description = description.trim().to_string();
        check_description(&session.description, &mut errors);
    }
    if let Some(start) = req.voting_start_time {
        session.voting_start_time = start;
    }
    if let Some(end) = req.voting_end_time {
        session.voting_end_time = end;
    }
    check_window(session.voting_start_time, session.voting_end_time, &mut errors);
    if let Some(at) = req.result_announcement_time {
        session.result_announcement_time = at;
    }
    if let Some(public) = req.is_results_public {
        session.is_results_public = public;
    }
    if let Some(patch) = req.settings {
        patch.apply(&mut session.settings);
    }

    if !errors.is_empty() {
        return Err(VoteError::Validation(errors));
    }
    let session = save(store, session, now).await?;
    tracing::info!(%session_id, "voting session updated");
    Ok(session)
}

pub async fn set_announcement(
    store: &SharedStore,
    _admin: &AdminCaller,
    session_id: &str,
    req: AnnouncementRequest,
    now: DateTime<Utc>,
) -> Result<AnnouncementResponse, VoteError> {
    let mut session = get(store, session_id, now).await?;
    session.result_announcement_time = req.announcement_time;
    if let Some(public) = req.make_results_public {
        session.is_results_public = public;
    }
    let session = save(store, session, now).await?;
    tracing::info!(
        %session_id,
        announcement_time = %session.result_announcement_time,
        is_results_public = session.is_results_public,
        "result announcement rescheduled"
    );
    Ok(AnnouncementResponse {
        announcement_time: session.result_announcement_time,
        is_results_public: session.is_results_public,
    })
}

pub async fn cancel(
    store: &SharedStore,
    admin: &AdminCaller,
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<VotingSession, VoteError> {
    if !store.cancel_session(session_id, now).await? {
        return Err(VoteError::NotFound(session_id.to_string()));
    }
    tracing::info!(%session_id, cancelled_by = %admin.voter_id(), "voting session cancelled");
    get(store, session_id, now).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::identity::Caller;
    use crate::models::{SessionSettings, SettingsPatch};
    use crate::store::MemoryStore;

    fn admin() -> AdminCaller {
        Caller { voter_id: "root".into(), role: Role::Admin, email_verified: true }
            .into_admin()
            .unwrap()
    }

    fn request(id: &str, now: DateTime<Utc>) -> CreateSessionRequest {
        CreateSessionRequest {
            title: "  Board election ".into(),
            description: String::new(),
            session_id: id.into(),
            candidates: vec![
                Candidate { id: "a".into(), name: "Alice".into(), description: String::new(), image_url: String::new() },
                Candidate { id: "b".into(), name: "Bob".into(), description: String::new(), image_url: String::new() },
            ],
            voting_start_time: now - Duration::hours(1),
            voting_end_time: now + Duration::hours(1),
            result_announcement_time: now + Duration::hours(2),
            is_results_public: false,
            settings: SessionSettings::default(),
        }
    }

    fn store() -> (Arc<MemoryStore>, SharedStore) {
        let memory = Arc::new(MemoryStore::new());
        let shared: SharedStore = memory.clone();
        (memory, shared)
    }

    fn fields(err: VoteError) -> Vec<String> {
        match err {
            VoteError::Validation(errors) => errors.into_iter().map(|e| e.field).collect(),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_trims_and_stamps_creator() {
        let (_, store) = store();
        let now = Utc::now();
        let session = create(&store, &admin(), request("board-2024", now), now).await.unwrap();
        assert_eq!(session.title, "Board election");
        assert_eq!(session.created_by, "root");
        assert_eq!(session.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn duplicate_session_id_conflicts() {
        let (_, store) = store();
        let now = Utc::now();
        create(&store, &admin(), request("s1", now), now).await.unwrap();
        let err = create(&store, &admin(), request("s1", now), now).await.unwrap_err();
        assert!(matches!(err, VoteError::SessionExists(id) if id == "s1"));
    }

    #[tokio::test]
    async fn invalid_requests_report_each_field() {
        let (_, store) = store();
        let now = Utc::now();
        let mut req = request("bad id!", now);
        req.title = " ".into();
        req.voting_end_time = req.voting_start_time;
        req.candidates[1].id = "a".into();
        req.candidates.push(Candidate {
            id: ABSTAIN.into(),
            name: String::new(),
            description: String::new(),
            image_url: String::new(),
        });

        let err = create(&store, &admin(), req, now).await.unwrap_err();
        assert_eq!(
            fields(err),
            [
                "title",
                "sessionId",
                "candidates[1].id",
                "candidates[2].id",
                "candidates[2].name",
                "votingEndTime"
            ]
        );
    }

    #[tokio::test]
    async fn update_only_touches_allowed_fields() {
        let (_, store) = store();
        let now = Utc::now();
        create(&store, &admin(), request("s1", now), now).await.unwrap();

        let req = UpdateSessionRequest {
            title: Some("Renamed".into()),
            is_results_public: Some(true),
            settings: Some(SettingsPatch { allow_abstain: Some(false), ..Default::default() }),
            ..Default::default()
        };
        let later = now + Duration::minutes(1);
        let updated = update(&store, &admin(), "s1", req, later).await.unwrap();
        assert_eq!(updated.title, "Renamed");
        assert!(updated.is_results_public);
        assert!(!updated.settings.allow_abstain);
        assert!(updated.settings.show_voter_count);
        assert_eq!(updated.candidates.len(), 2);
        assert_eq!(updated.updated_at, later);

        let stored = get(&store, "s1", later).await.unwrap();
        assert_eq!(stored.title, "Renamed");
    }

    #[tokio::test]
    async fn update_keeps_the_window_ordered() {
        let (_, store) = store();
        let now = Utc::now();
        create(&store, &admin(), request("s1", now), now).await.unwrap();

        let req = UpdateSessionRequest {
            voting_end_time: Some(now - Duration::hours(2)),
            ..Default::default()
        };
        let err = update(&store, &admin(), "s1", req, now).await.unwrap_err();
        assert_eq!(fields(err), ["votingEndTime"]);

        let err = update(&store, &admin(), "missing", UpdateSessionRequest::default(), now)
            .await
            .unwrap_err();
        assert!(matches!(err, VoteError::NotFound(_)));
    }

    #[tokio::test]
    async fn announcement_can_be_moved_and_published() {
        let (_, store) = store();
        let now = Utc::now();
        create(&store, &admin(), request("s1", now), now).await.unwrap();

        let at = now + Duration::days(3);
        let req = AnnouncementRequest { announcement_time: at, make_results_public: Some(true) };
        let res = set_announcement(&store, &admin(), "s1", req, now).await.unwrap();
        assert_eq!(res.announcement_time, at);
        assert!(res.is_results_public);
    }

    #[tokio::test]
    async fn cancel_is_sticky_and_filters_lists() {
        let (_, store) = store();
        let now = Utc::now();
        create(&store, &admin(), request("s1", now), now).await.unwrap();
        create(&store, &admin(), request("s2", now), now + Duration::seconds(1)).await.unwrap();

        let cancelled = cancel(&store, &admin(), "s1", now).await.unwrap();
        assert_eq!(cancelled.status, SessionStatus::Cancelled);

        let page = list(&store, Some(SessionStatus::Active), 1, 10, now).await.unwrap();
        assert_eq!(page.sessions.len(), 1);
        assert_eq!(page.sessions[0].session_id, "s2");

        let all = list(&store, None, 1, 10, now).await.unwrap();
        assert_eq!(all.pagination.total_items, 2);
        assert_eq!(all.sessions[0].session_id, "s2");

        assert!(matches!(
            cancel(&store, &admin(), "missing", now).await,
            Err(VoteError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn public_view_hides_voter_count_when_disabled() {
        let (_, store) = store();
        let now = Utc::now();
        create(&store, &admin(), request("shown", now), now).await.unwrap();
        let mut hidden = request("hidden", now);
        hidden.settings.show_voter_count = false;
        create(&store, &admin(), hidden, now).await.unwrap();

        assert_eq!(public_view(&store, "shown", None, now).await.unwrap().voter_count, Some(0));
        assert_eq!(public_view(&store, "hidden", None, now).await.unwrap().voter_count, None);
    }

    #[tokio::test]
    async fn public_view_reports_result_availability_per_role() {
        let (_, store) = store();
        let now = Utc::now();
        create(&store, &admin(), request("s1", now), now).await.unwrap();

        let anonymous = public_view(&store, "s1", None, now).await.unwrap();
        assert!(!anonymous.results_available);
        let as_admin = public_view(&store, "s1", Some(Role::Admin), now).await.unwrap();
        assert!(as_admin.results_available);
        let later = public_view(&store, "s1", Some(Role::Voter), now + Duration::hours(3))
            .await
            .unwrap();
        assert!(later.results_available);
    }
}
