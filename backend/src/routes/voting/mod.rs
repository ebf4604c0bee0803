pub mod admin;
pub mod client;

use rocket::Route;

/// Everything mounted under `/api/vote`.
pub fn routes() -> Vec<Route> {
    routes![
        client::cast_vote,
        client::vote_status,
        client::vote_history,
        client::session_info,
        client::default_public_results,
        client::public_results,
        admin::admin_results,
        admin::voting_stats,
        admin::create_session,
        admin::list_sessions,
        admin::update_session,
        admin::set_announcement_time,
        admin::cancel_session,
    ]
}
