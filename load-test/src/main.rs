use anyhow::{ensure, Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;
use voting_backend::identity::{Claims, TokenVerifier};
use voting_backend::models::Role;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Target URL (e.g., http://localhost:8000)
    #[arg(short, long, default_value = "http://localhost:8000")]
    url: String,

    /// Number of voters to simulate
    #[arg(short = 'n', long, default_value_t = 100)]
    users: usize,

    /// Concurrent cast attempts per voter; all but one must be rejected
    #[arg(short, long, default_value_t = 3)]
    attempts: usize,

    /// Number of voters in flight at once
    #[arg(short, long, default_value_t = 10)]
    concurrency: usize,

    /// Shared secret the backend verifies tokens with
    #[arg(short, long, env = "TOKEN_SECRET")]
    token_secret: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewCandidate {
    id: String,
    name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    title: String,
    session_id: String,
    candidates: Vec<NewCandidate>,
    voting_start_time: chrono::DateTime<Utc>,
    voting_end_time: chrono::DateTime<Utc>,
    result_announcement_time: chrono::DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CastVoteRequest<'a> {
    candidate: &'a str,
    voting_session: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdminResults {
    total_votes: i64,
}

#[derive(Default)]
struct Counters {
    created: AtomicUsize,
    conflicts: AtomicUsize,
    unexpected: AtomicUsize,
}

fn token(verifier: &TokenVerifier, subject: String, role: Role) -> String {
    verifier.issue(&Claims {
        sub: subject,
        role,
        email_verified: true,
        exp: (Utc::now() + Duration::hours(1)).timestamp(),
    })
}

/// Fires `attempts` casts for one voter at once and tallies the statuses.
async fn run_voter(
    client: &Client,
    base_url: &str,
    session_id: &str,
    bearer: &str,
    candidate: &str,
    attempts: usize,
    counters: &Counters,
) -> Result<()> {
    let url = format!("{}/api/vote/cast", base_url);
    let casts = (0..attempts).map(|_| {
        client
            .post(&url)
            .bearer_auth(bearer)
            .json(&CastVoteRequest { candidate, voting_session: session_id })
            .send()
    });

    for response in join_all(casts).await {
        let status = response.context("Failed to send vote request")?.status();
        let counter = match status {
            StatusCode::CREATED => &counters.created,
            StatusCode::CONFLICT => &counters.conflicts,
            _ => &counters.unexpected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    ensure!(args.attempts >= 1, "--attempts must be at least 1");

    println!("🚀 Starting load test against {}", args.url);
    println!("👥 Voters: {}", args.users);
    println!("🔁 Attempts per voter: {}", args.attempts);
    println!("⚡ Concurrency: {}", args.concurrency);

    let verifier = TokenVerifier::new(args.token_secret.as_bytes())
        .context("Token secret rejected")?;
    let client = Client::builder()
        .user_agent(concat!("voting-load-test/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;
    let admin_token = token(&verifier, "load-test-admin".to_string(), Role::Admin);

    // 0. Setup: an open session just for this run
    let session_id = format!("load-{}", Uuid::new_v4().simple());
    let candidates: Vec<String> = ["red", "green", "blue"].iter().map(|c| c.to_string()).collect();
    let now = Utc::now();
    client
        .post(format!("{}/api/vote/sessions", args.url))
        .bearer_auth(&admin_token)
        .json(&CreateSessionRequest {
            title: "Load test".to_string(),
            session_id: session_id.clone(),
            candidates: candidates
                .iter()
                .map(|id| NewCandidate { id: id.clone(), name: id.to_uppercase() })
                .collect(),
            voting_start_time: now - Duration::minutes(1),
            voting_end_time: now + Duration::hours(1),
            result_announcement_time: now + Duration::hours(1),
        })
        .send()
        .await
        .context("Failed to send session request")?
        .error_for_status()
        .context("Session creation failed")?;

    println!("🗳️  Created session {}", session_id);

    let counters = Arc::new(Counters::default());
    let failures = Arc::new(AtomicUsize::new(0));

    let pb = ProgressBar::new(args.users as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({eta}) {msg}")
            .context("Invalid progress template")?
            .progress_chars("=>-"),
    );

    let start_time = Instant::now();

    stream::iter(0..args.users)
        .map(|i| {
            let client = client.clone();
            let counters = counters.clone();
            let failures = failures.clone();
            let pb = pb.clone();
            let bearer = token(&verifier, format!("load-voter-{i}"), Role::Voter);
            let candidate = candidates
                .choose(&mut rand::thread_rng())
                .cloned()
                .unwrap_or_default();
            let base_url = args.url.as_str();
            let session_id = session_id.as_str();
            let attempts = args.attempts;

            async move {
                let outcome = run_voter(
                    &client, base_url, session_id, &bearer, &candidate, attempts, &counters,
                )
                .await;
                if outcome.is_err() {
                    failures.fetch_add(1, Ordering::Relaxed);
                }
                pb.set_message(format!(
                    "Created: {} Conflicts: {}",
                    counters.created.load(Ordering::Relaxed),
                    counters.conflicts.load(Ordering::Relaxed)
                ));
                pb.inc(1);
            }
        })
        .buffer_unordered(args.concurrency.max(1))
        .collect::<Vec<()>>()
        .await;

    pb.finish_with_message("Done");

    let duration = start_time.elapsed();
    let created = counters.created.load(Ordering::Relaxed);
    let conflicts = counters.conflicts.load(Ordering::Relaxed);
    let unexpected = counters.unexpected.load(Ordering::Relaxed);
    let failed = failures.load(Ordering::Relaxed);

    // 1. Read the admin tally back
    let results: AdminResults = client
        .get(format!("{}/api/vote/results", args.url))
        .query(&[("session", session_id.as_str())])
        .bearer_auth(&admin_token)
        .send()
        .await
        .context("Failed to fetch results")?
        .error_for_status()
        .context("Results request failed")?
        .json()
        .await
        .context("Failed to parse results")?;

    let total_requests = args.users * args.attempts;
    println!("\n📊 Results:");
    println!("   Time taken: {:?}", duration);
    println!("   Total requests: {}", total_requests);
    println!("   Ballots created: {}", created);
    println!("   Duplicates rejected: {}", conflicts);
    println!("   Unexpected statuses: {}", unexpected);
    println!("   Transport failures: {}", failed);
    println!("   Tallied votes: {}", results.total_votes);
    println!(
        "   Throughput: {:.2} req/sec",
        total_requests as f64 / duration.as_secs_f64()
    );

    ensure!(failed == 0 && unexpected == 0, "some requests did not complete cleanly");
    ensure!(created == args.users, "expected {} ballots, got {}", args.users, created);
    ensure!(
        conflicts == args.users * (args.attempts - 1),
        "expected {} duplicate rejections, got {}",
        args.users * (args.attempts - 1),
        conflicts
    );
    ensure!(
        results.total_votes == args.users as i64,
        "tally reports {} votes for {} voters",
        results.total_votes,
        args.users
    );

    println!("✅ Exactly one ballot per voter");
    Ok(())
}
