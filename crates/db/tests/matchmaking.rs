//! Integration tests for the matchmaking repositories.
//!
//! Exercises the repository layer against a real database:
//! - Request creation, resume lookup, and the waiting-uniqueness index
//! - Counterpart discovery (team opposition, self-exclusion, ordering)
//! - Compare-and-swap semantics of `mark_matched` and `cancel`
//! - Transactional pairing and its no-counterpart / stale-own outcomes
//! - Orphaned session detection

use rvb_core::team::Team;
use rvb_db::models::lab::CreateLab;
use rvb_db::models::match_request::{CreateMatchRequest, MatchRequest};
use rvb_db::models::status::{RequestStatus, SessionStatus};
use rvb_db::repositories::{LabRepo, LabSessionRepo, MatchRequestRepo, PairingRepo};
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn new_lab(pool: &PgPool, name: &str) -> i64 {
    LabRepo::create(
        pool,
        &CreateLab {
            name: name.to_string(),
            description: None,
            attacker_briefing: None,
            defender_briefing: None,
        },
    )
    .await
    .expect("lab insert should succeed")
    .id
}

async fn new_request(
    pool: &PgPool,
    lab_id: i64,
    team: Team,
    user_id: i64,
    username: &str,
) -> MatchRequest {
    MatchRequestRepo::create(
        pool,
        &CreateMatchRequest {
            lab_id,
            team,
            user_id,
            username: username.to_string(),
        },
    )
    .await
    .expect("request insert should succeed")
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn create_and_resume_request(pool: PgPool) {
    let lab_id = new_lab(&pool, "sql-injection-101").await;
    let created = new_request(&pool, lab_id, Team::Attacker, 7, "alice").await;

    assert!(created.is_waiting());
    assert!(created.session_id.is_none());

    let resumed = MatchRequestRepo::find_active(&pool, 7, lab_id, Team::Attacker)
        .await
        .unwrap()
        .expect("active request should be found");
    assert_eq!(resumed.id, created.id);

    // A different team or user resolves to nothing.
    assert!(MatchRequestRepo::find_active(&pool, 7, lab_id, Team::Defender)
        .await
        .unwrap()
        .is_none());
    assert!(MatchRequestRepo::find_active(&pool, 8, lab_id, Team::Attacker)
        .await
        .unwrap()
        .is_none());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn duplicate_waiting_request_rejected_by_store(pool: PgPool) {
    let lab_id = new_lab(&pool, "phishing-lab").await;
    new_request(&pool, lab_id, Team::Defender, 7, "alice").await;

    let duplicate = MatchRequestRepo::create(
        &pool,
        &CreateMatchRequest {
            lab_id,
            team: Team::Defender,
            user_id: 7,
            username: "alice".to_string(),
        },
    )
    .await;

    match duplicate {
        Err(sqlx::Error::Database(db_err)) => {
            assert_eq!(db_err.code().as_deref(), Some("23505"));
            assert_eq!(db_err.constraint(), Some("uq_match_requests_waiting"));
        }
        other => panic!("expected unique violation, got {other:?}"),
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn counterpart_search_filters_team_user_and_status(pool: PgPool) {
    let lab_id = new_lab(&pool, "priv-esc").await;
    let other_lab = new_lab(&pool, "other-lab").await;

    // Same team as the searcher: never a counterpart.
    new_request(&pool, lab_id, Team::Attacker, 2, "bob").await;
    // Right team, wrong lab.
    new_request(&pool, other_lab, Team::Defender, 3, "carol").await;
    // The searcher must never match their own other-side request.
    new_request(&pool, lab_id, Team::Defender, 1, "alice").await;

    assert!(
        MatchRequestRepo::find_waiting_counterpart(&pool, lab_id, Team::Attacker, 1)
            .await
            .unwrap()
            .is_none()
    );

    // Oldest waiting defender wins.
    let first = new_request(&pool, lab_id, Team::Defender, 4, "dave").await;
    new_request(&pool, lab_id, Team::Defender, 5, "erin").await;

    let found = MatchRequestRepo::find_waiting_counterpart(&pool, lab_id, Team::Attacker, 1)
        .await
        .unwrap()
        .expect("a defender should be found");
    assert_eq!(found.id, first.id);

    // A cancelled request disappears from the search.
    assert!(MatchRequestRepo::cancel(&pool, first.id).await.unwrap());
    let next = MatchRequestRepo::find_waiting_counterpart(&pool, lab_id, Team::Attacker, 1)
        .await
        .unwrap()
        .expect("the remaining defender should be found");
    assert_eq!(next.username, "erin");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn mark_matched_is_compare_and_swap(pool: PgPool) {
    let lab_id = new_lab(&pool, "xss-lab").await;
    let request = new_request(&pool, lab_id, Team::Attacker, 1, "alice").await;
    let other = new_request(&pool, lab_id, Team::Defender, 2, "bob").await;
    let session = LabSessionRepo::create(&pool, lab_id, 1, 2).await.unwrap();

    let won = MatchRequestRepo::mark_matched(&pool, request.id, 2, "bob", session.id)
        .await
        .unwrap();
    assert!(won);

    // Second writer observes zero rows affected.
    let second_session = LabSessionRepo::create(&pool, lab_id, 1, 3).await.unwrap();
    let lost = MatchRequestRepo::mark_matched(&pool, request.id, 3, "mallory", second_session.id)
        .await
        .unwrap();
    assert!(!lost);

    // The row kept the first writer's values.
    let row = MatchRequestRepo::find_by_id(&pool, request.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status_id, RequestStatus::Matched.id());
    assert_eq!(row.partner_id, Some(2));
    assert_eq!(row.partner_username.as_deref(), Some("bob"));
    assert_eq!(row.session_id, Some(session.id));

    // Cancel after match is a no-op.
    assert!(!MatchRequestRepo::cancel(&pool, request.id).await.unwrap());
    // Cancel of a waiting row works exactly once.
    assert!(MatchRequestRepo::cancel(&pool, other.id).await.unwrap());
    assert!(!MatchRequestRepo::cancel(&pool, other.id).await.unwrap());
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn session_lifecycle_and_distinct_sides(pool: PgPool) {
    let lab_id = new_lab(&pool, "forensics").await;

    let session = LabSessionRepo::create(&pool, lab_id, 1, 2).await.unwrap();
    assert!(session.is_active());

    assert!(LabSessionRepo::mark_abandoned(&pool, session.id).await.unwrap());
    // Abandon is terminal; a second attempt affects nothing.
    assert!(!LabSessionRepo::mark_abandoned(&pool, session.id).await.unwrap());

    let row = LabSessionRepo::find_by_id(&pool, session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status_id, SessionStatus::Abandoned.id());

    // A participant cannot play both sides.
    let same_sides = LabSessionRepo::create(&pool, lab_id, 9, 9).await;
    assert!(same_sides.is_err());
}

// ---------------------------------------------------------------------------
// Transactional pairing
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn pairing_updates_both_rows_and_session_atomically(pool: PgPool) {
    let lab_id = new_lab(&pool, "ransomware-response").await;
    let attacker = new_request(&pool, lab_id, Team::Attacker, 1, "alice").await;
    let defender = new_request(&pool, lab_id, Team::Defender, 2, "bob").await;

    let (session, counterpart) = PairingRepo::pair_with_counterpart(&pool, &defender)
        .await
        .unwrap()
        .expect("a counterpart should be available");

    assert_eq!(counterpart.id, attacker.id);
    assert_eq!(session.lab_id, lab_id);
    assert_eq!(session.attacker_user_id, 1);
    assert_eq!(session.defender_user_id, 2);

    for (id, partner, partner_name) in [(attacker.id, 2, "bob"), (defender.id, 1, "alice")] {
        let row = MatchRequestRepo::find_by_id(&pool, id).await.unwrap().unwrap();
        assert_eq!(row.status_id, RequestStatus::Matched.id());
        assert_eq!(row.session_id, Some(session.id));
        assert_eq!(row.partner_id, Some(partner));
        assert_eq!(row.partner_username.as_deref(), Some(partner_name));
    }

    assert_eq!(
        MatchRequestRepo::count_matched_for_session(&pool, session.id)
            .await
            .unwrap(),
        2
    );
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn pairing_without_counterpart_commits_nothing(pool: PgPool) {
    let lab_id = new_lab(&pool, "lonely-lab").await;
    let own = new_request(&pool, lab_id, Team::Attacker, 1, "alice").await;

    let outcome = PairingRepo::pair_with_counterpart(&pool, &own).await.unwrap();
    assert!(outcome.is_none());

    let row = MatchRequestRepo::find_by_id(&pool, own.id).await.unwrap().unwrap();
    assert!(row.is_waiting());
    assert_eq!(LabSessionRepo::find_orphaned(&pool, 0).await.unwrap().len(), 0);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn pairing_aborts_when_own_request_was_claimed(pool: PgPool) {
    let lab_id = new_lab(&pool, "race-lab").await;
    let own = new_request(&pool, lab_id, Team::Attacker, 1, "alice").await;
    new_request(&pool, lab_id, Team::Defender, 2, "bob").await;

    // A third party claims our row between our poll and our pairing attempt;
    // the stale snapshot still says `waiting`.
    let foreign_session = LabSessionRepo::create(&pool, lab_id, 1, 9).await.unwrap();
    assert!(
        MatchRequestRepo::mark_matched(&pool, own.id, 9, "mallory", foreign_session.id)
            .await
            .unwrap()
    );

    let outcome = PairingRepo::pair_with_counterpart(&pool, &own).await.unwrap();
    assert!(outcome.is_none(), "stale own row must abort the pairing");

    // Nothing of the aborted pairing survived: bob still waits and only the
    // third party's session exists.
    let bob = MatchRequestRepo::find_waiting_counterpart(&pool, lab_id, Team::Attacker, 1)
        .await
        .unwrap()
        .expect("bob should still be waiting");
    assert_eq!(bob.user_id, 2);
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM lab_sessions")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count.0, 1);
}

// ---------------------------------------------------------------------------
// Orphan detection
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn orphan_sweep_sees_half_paired_sessions_only(pool: PgPool) {
    let lab_id = new_lab(&pool, "sweep-lab").await;

    // Fully paired session: not an orphan.
    let a = new_request(&pool, lab_id, Team::Attacker, 1, "alice").await;
    let d = new_request(&pool, lab_id, Team::Defender, 2, "bob").await;
    let healthy = PairingRepo::pair_with_counterpart(&pool, &a)
        .await
        .unwrap()
        .unwrap()
        .0;
    assert_eq!(d.lab_id, lab_id);

    // Session with only one matched request: orphan.
    let half = LabSessionRepo::create(&pool, lab_id, 3, 4).await.unwrap();
    let r = new_request(&pool, lab_id, Team::Attacker, 3, "carol").await;
    assert!(MatchRequestRepo::mark_matched(&pool, r.id, 4, "dave", half.id)
        .await
        .unwrap());

    // Session nobody references at all: orphan.
    let stray = LabSessionRepo::create(&pool, lab_id, 5, 6).await.unwrap();

    // Negative grace pushes the cutoff into the future so freshly created
    // rows qualify without sleeping in the test.
    let orphans = LabSessionRepo::find_orphaned(&pool, -1).await.unwrap();
    let ids: Vec<i64> = orphans.iter().map(|s| s.id).collect();
    assert!(ids.contains(&half.id));
    assert!(ids.contains(&stray.id));
    assert!(!ids.contains(&healthy.id));
}
