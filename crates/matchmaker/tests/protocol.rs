//! End-to-end pairing protocol tests over the in-memory store.
//!
//! These drive real [`Coordinator`] tasks (and the default non-atomic
//! [`MatchStore::pair`] sequence) with aggressive poll intervals, including
//! the race paths that need a deliberately stale view to reproduce
//! deterministically.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use rvb_core::team::Team;
use rvb_core::types::DbId;
use rvb_db::models::lab_session::LabSession;
use rvb_db::models::match_request::{CreateMatchRequest, MatchRequest};
use rvb_matchmaker::{
    Coordinator, CoordinatorConfig, CoordinatorHandle, MatchParams, MatchStore, PairOutcome,
    Phase, Snapshot, StoreError,
};
use rvb_matchmaker::memory::MemoryStore;
use tokio::sync::{watch, Mutex};

const LAB: DbId = 1;

fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig {
        poll_interval: Duration::from_millis(10),
        redirect_delay: Duration::from_millis(20),
    }
}

fn params(team: Team, user_id: DbId) -> MatchParams {
    MatchParams {
        lab_id: LAB,
        team,
        user_id,
        username: format!("user-{user_id}"),
    }
}

fn request_input(team: Team, user_id: DbId) -> CreateMatchRequest {
    CreateMatchRequest {
        lab_id: LAB,
        team,
        user_id,
        username: format!("user-{user_id}"),
    }
}

async fn start(store: &Arc<MemoryStore>, team: Team, user_id: DbId) -> CoordinatorHandle {
    Coordinator::start(store.clone(), params(team, user_id), fast_config())
        .await
        .expect("coordinator entry failed")
}

async fn wait_for(
    rx: &mut watch::Receiver<Snapshot>,
    pred: impl FnMut(&Snapshot) -> bool,
) -> Snapshot {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("timed out waiting for coordinator state")
        .expect("coordinator state channel closed")
        .clone()
}

async fn wait_for_redirect(handle: &CoordinatorHandle) -> (DbId, DbId, Team) {
    let mut rx = handle.subscribe();
    let snapshot = wait_for(&mut rx, |s| matches!(s.phase, Phase::Redirected { .. })).await;
    match snapshot.phase {
        Phase::Redirected {
            lab_id,
            session_id,
            team,
        } => (lab_id, session_id, team),
        other => panic!("expected redirect, got {other:?}"),
    }
}

#[tokio::test]
async fn two_participants_pair_into_exactly_one_session() {
    let store = Arc::new(MemoryStore::new());

    let attacker = start(&store, Team::Attacker, 1).await;
    let defender = start(&store, Team::Defender, 2).await;

    let (lab_a, session_a, team_a) = wait_for_redirect(&attacker).await;
    let (lab_d, session_d, team_d) = wait_for_redirect(&defender).await;

    assert_eq!((lab_a, lab_d), (LAB, LAB));
    assert_eq!(session_a, session_d);
    assert_eq!(team_a, Team::Attacker);
    assert_eq!(team_d, Team::Defender);
    assert_eq!(store.active_session_count().await, 1);

    let snapshot = attacker.snapshot();
    assert_eq!(snapshot.partner_username.as_deref(), Some("user-2"));
    assert_eq!(snapshot.last_error, None);
}

#[tokio::test]
async fn solo_participant_waits_and_withdraws_on_shutdown() {
    let store = Arc::new(MemoryStore::new());
    let handle = start(&store, Team::Attacker, 1).await;
    let request_id = handle.request_id();

    // Several ticks with nobody on the other side.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.snapshot().phase, Phase::Waiting);
    assert!(!handle.is_finished());
    assert_eq!(store.session_count().await, 0);

    handle.shutdown_and_wait().await;

    let row = store.get_request(request_id).await.unwrap().unwrap();
    assert!(row.is_cancelled());
}

#[tokio::test]
async fn reentry_resumes_the_existing_waiting_request() {
    let store = Arc::new(MemoryStore::new());
    let existing = store
        .create_request(&request_input(Team::Defender, 5))
        .await
        .unwrap();

    // A reload must pick up the same row, not insert a second one.
    let handle = start(&store, Team::Defender, 5).await;
    assert_eq!(handle.request_id(), existing.id);

    let again = start(&store, Team::Defender, 5).await;
    assert_eq!(again.request_id(), existing.id);

    handle.shutdown_and_wait().await;
    again.shutdown_and_wait().await;
}

#[tokio::test]
async fn resume_after_match_redirects_without_a_new_session() {
    let store = Arc::new(MemoryStore::new());
    let attacker = store
        .create_request(&request_input(Team::Attacker, 1))
        .await
        .unwrap();
    store
        .create_request(&request_input(Team::Defender, 2))
        .await
        .unwrap();

    let PairOutcome::Paired { session, .. } = store.pair(&attacker).await.unwrap() else {
        panic!("expected a pairing");
    };

    // Reload after the match: straight to redirect, no polling, no extra
    // session.
    let handle = start(&store, Team::Attacker, 1).await;
    let (_, session_id, _) = wait_for_redirect(&handle).await;
    assert_eq!(session_id, session.id);
    assert_eq!(store.session_count().await, 1);
    assert_eq!(
        handle.snapshot().partner_username.as_deref(),
        Some("user-2")
    );
}

#[tokio::test]
async fn claimed_participant_adopts_the_initiators_session() {
    let store = Arc::new(MemoryStore::new());

    // The defender waits alone for a few ticks before the attacker shows
    // up; whichever side initiates, the pair must converge on one session.
    let defender = start(&store, Team::Defender, 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let attacker = start(&store, Team::Attacker, 1).await;

    let (_, session_a, _) = wait_for_redirect(&attacker).await;
    let (_, session_d, _) = wait_for_redirect(&defender).await;
    assert_eq!(session_a, session_d);
    assert_eq!(store.session_count().await, 1);
}

#[tokio::test]
async fn transient_store_errors_keep_the_poll_going() {
    let store = Arc::new(MemoryStore::new());
    let attacker = start(&store, Team::Attacker, 1).await;

    store.fail_next_ops(3);
    let mut rx = attacker.subscribe();
    let snapshot = wait_for(&mut rx, |s| s.last_error.is_some()).await;
    assert_eq!(snapshot.phase, Phase::Waiting);

    let defender = start(&store, Team::Defender, 2).await;
    let (_, session_a, _) = wait_for_redirect(&attacker).await;
    let (_, session_d, _) = wait_for_redirect(&defender).await;
    assert_eq!(session_a, session_d);

    // A successful tick clears the sticky error.
    assert_eq!(attacker.snapshot().last_error, None);
}

#[tokio::test]
async fn external_cancellation_ends_the_coordinator() {
    let store = Arc::new(MemoryStore::new());
    let handle = start(&store, Team::Defender, 3).await;

    assert!(store.cancel_request(handle.request_id()).await.unwrap());

    let mut rx = handle.subscribe();
    wait_for(&mut rx, |s| s.phase == Phase::Cancelled).await;
    handle.shutdown_and_wait().await;
}

#[tokio::test]
async fn flushed_request_is_recreated_on_the_next_tick() {
    let store = Arc::new(MemoryStore::new());
    let handle = start(&store, Team::Attacker, 1).await;
    let first_id = handle.request_id();

    // Simulate the administrative sweep deleting the row outright.
    store.remove_request(first_id).await;

    let mut rx = handle.subscribe();
    let snapshot = wait_for(&mut rx, |s| s.request_id != first_id).await;
    assert_eq!(snapshot.phase, Phase::Waiting);

    // The fresh request still pairs normally.
    let defender = start(&store, Team::Defender, 2).await;
    wait_for_redirect(&handle).await;
    wait_for_redirect(&defender).await;
    assert_eq!(store.active_session_count().await, 1);
}

/// Delegating store that serves one pre-captured (stale) counterpart row,
/// reproducing the window between a lookup and a claim.
struct StaleLookupStore {
    inner: Arc<MemoryStore>,
    stale: Mutex<Option<MatchRequest>>,
}

#[async_trait]
impl MatchStore for StaleLookupStore {
    async fn find_active_request(
        &self,
        user_id: DbId,
        lab_id: DbId,
        team: Team,
    ) -> Result<Option<MatchRequest>, StoreError> {
        self.inner.find_active_request(user_id, lab_id, team).await
    }

    async fn create_request(
        &self,
        input: &CreateMatchRequest,
    ) -> Result<MatchRequest, StoreError> {
        self.inner.create_request(input).await
    }

    async fn get_request(&self, id: DbId) -> Result<Option<MatchRequest>, StoreError> {
        self.inner.get_request(id).await
    }

    async fn find_waiting_counterpart(
        &self,
        lab_id: DbId,
        team: Team,
        exclude_user_id: DbId,
    ) -> Result<Option<MatchRequest>, StoreError> {
        if let Some(stale) = self.stale.lock().await.take() {
            return Ok(Some(stale));
        }
        self.inner
            .find_waiting_counterpart(lab_id, team, exclude_user_id)
            .await
    }

    async fn mark_matched(
        &self,
        id: DbId,
        partner_id: DbId,
        partner_username: &str,
        session_id: DbId,
    ) -> Result<bool, StoreError> {
        self.inner
            .mark_matched(id, partner_id, partner_username, session_id)
            .await
    }

    async fn cancel_request(&self, id: DbId) -> Result<bool, StoreError> {
        self.inner.cancel_request(id).await
    }

    async fn create_session(
        &self,
        lab_id: DbId,
        attacker_user_id: DbId,
        defender_user_id: DbId,
    ) -> Result<LabSession, StoreError> {
        self.inner
            .create_session(lab_id, attacker_user_id, defender_user_id)
            .await
    }

    async fn get_session(&self, id: DbId) -> Result<Option<LabSession>, StoreError> {
        self.inner.get_session(id).await
    }

    async fn abandon_session(&self, id: DbId) -> Result<bool, StoreError> {
        self.inner.abandon_session(id).await
    }
}

#[tokio::test]
async fn losing_the_counterpart_claim_rolls_back_the_session() {
    let inner = Arc::new(MemoryStore::new());

    // A defender who looks waiting in the stale view but was already
    // claimed by a faster initiator.
    let defender = inner
        .create_request(&request_input(Team::Defender, 2))
        .await
        .unwrap();
    let winner_session = inner.create_session(LAB, 9, 2).await.unwrap();
    assert!(inner
        .mark_matched(defender.id, 9, "user-9", winner_session.id)
        .await
        .unwrap());

    let own = inner
        .create_request(&request_input(Team::Attacker, 1))
        .await
        .unwrap();

    let store = StaleLookupStore {
        inner: inner.clone(),
        stale: Mutex::new(Some(defender)),
    };

    assert_matches!(store.pair(&own).await.unwrap(), PairOutcome::LostRace);

    // The loser's session was created and then rolled back; only the
    // winner's survives, and the loser keeps waiting.
    assert_eq!(inner.session_count().await, 2);
    assert_eq!(inner.active_session_count().await, 1);
    let own_row = inner.get_request(own.id).await.unwrap().unwrap();
    assert!(own_row.is_waiting());
}

#[tokio::test]
async fn losing_the_own_claim_discards_the_created_session() {
    let store = Arc::new(MemoryStore::new());

    let own = store
        .create_request(&request_input(Team::Attacker, 1))
        .await
        .unwrap();
    store
        .create_request(&request_input(Team::Defender, 2))
        .await
        .unwrap();

    // A third party claims our row while our stale copy still says waiting.
    let third_session = store.create_session(LAB, 1, 9).await.unwrap();
    assert!(store
        .mark_matched(own.id, 9, "user-9", third_session.id)
        .await
        .unwrap());

    assert_matches!(store.pair(&own).await.unwrap(), PairOutcome::LostRace);

    // The session created during the failed attempt must not stay active;
    // our row keeps the third party's session.
    assert_eq!(store.active_session_count().await, 1);
    let own_row = store.get_request(own.id).await.unwrap().unwrap();
    assert_eq!(own_row.session_id, Some(third_session.id));
}

#[tokio::test]
async fn participant_claimed_into_a_dead_session_reenters() {
    let store = Arc::new(MemoryStore::new());

    // A matched request whose session was rolled back (mutual-initiation
    // fallout): the coordinator must not redirect into it.
    let stale = store
        .create_request(&request_input(Team::Defender, 2))
        .await
        .unwrap();
    let dead = store.create_session(LAB, 9, 2).await.unwrap();
    assert!(store
        .mark_matched(stale.id, 9, "user-9", dead.id)
        .await
        .unwrap());
    assert!(store.abandon_session(dead.id).await.unwrap());

    let handle = start(&store, Team::Defender, 2).await;
    assert_ne!(handle.request_id(), stale.id);

    let attacker = start(&store, Team::Attacker, 1).await;
    let (_, session_id, _) = wait_for_redirect(&handle).await;
    assert_ne!(session_id, dead.id);
    wait_for_redirect(&attacker).await;
    assert_eq!(store.active_session_count().await, 1);
}
