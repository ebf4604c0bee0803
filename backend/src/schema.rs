// Diesel table definitions; must match migrations/*.sql

diesel::table! {
    voting_sessions (session_id) {
        #[max_length = 64]
        session_id -> Varchar,
        #[max_length = 100]
        title -> Varchar,
        #[max_length = 500]
        description -> Varchar,
        candidates -> Text,
        #[max_length = 16]
        status -> Varchar,
        voting_start_time -> Datetime,
        voting_end_time -> Datetime,
        result_announcement_time -> Datetime,
        is_results_public -> Bool,
        show_real_time_results -> Bool,
        show_voter_count -> Bool,
        require_email_verification -> Bool,
        allow_abstain -> Bool,
        #[max_length = 64]
        created_by -> Varchar,
        created_at -> Datetime,
        updated_at -> Datetime,
    }
}

diesel::table! {
    votes (id) {
        #[max_length = 36]
        id -> Varchar,
        #[max_length = 64]
        voter_id -> Varchar,
        #[max_length = 64]
        voting_session -> Varchar,
        #[max_length = 64]
        candidate -> Varchar,
        #[max_length = 45]
        ip_address -> Varchar,
        #[max_length = 512]
        user_agent -> Varchar,
        is_verified -> Bool,
        created_at -> Datetime,
    }
}

diesel::table! {
    voters (id) {
        #[max_length = 64]
        id -> Varchar,
        #[max_length = 100]
        name -> Varchar,
        #[max_length = 255]
        email -> Varchar,
        #[max_length = 16]
        role -> Varchar,
        is_email_verified -> Bool,
        created_at -> Datetime,
    }
}

diesel::joinable!(votes -> voting_sessions (voting_session));
diesel::joinable!(votes -> voters (voter_id));

diesel::allow_tables_to_appear_in_same_query!(voters, votes, voting_sessions,);
