use super::*;
use crate::store::{CredentialPair, MemoryStore};
use crate::test_support::{self, CountingObserver, MockTransport};
use crate::transport::TransportError;

fn setup(transport: MockTransport, store: MemoryStore) -> (Arc<MockTransport>, Arc<MemoryStore>, RefreshCoordinator, Arc<CountingObserver>) {
    let transport = Arc::new(transport);
    let store = Arc::new(store);
    let coordinator = RefreshCoordinator::new(transport.clone(), store.clone());
    let observer = Arc::new(CountingObserver::default());
    coordinator.set_observer(observer.clone());
    (transport, store, coordinator, observer)
}

fn signed_in() -> MemoryStore {
    MemoryStore::with_pair(CredentialPair::new("A1", "R1"))
}

// =============================================================================
// successful exchange
// =============================================================================

#[tokio::test]
async fn exchange_persists_new_access_and_keeps_refresh() {
    let transport = MockTransport::new(|_| test_support::json(200, &json!({ "access": "A2" })));
    let (transport, store, coordinator, observer) = setup(transport, signed_in());

    assert_eq!(coordinator.refresh(Some("A1")).await.unwrap(), "A2");
    assert_eq!(store.load().unwrap(), Some(CredentialPair::new("A2", "R1")));
    assert_eq!(observer.count(), 0);
    assert!(!coordinator.is_refreshing());

    let calls = transport.requests();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].path, REFRESH_PATH);
    assert_eq!(calls[0].body, Some(json!({ "refresh": "R1" })));
}

#[tokio::test]
async fn exchange_is_sent_unauthenticated() {
    let transport = MockTransport::new(|_| test_support::json(200, &json!({ "access": "A2" })));
    let (transport, _store, coordinator, _observer) = setup(transport, signed_in());

    coordinator.refresh(Some("A1")).await.unwrap();
    assert!(transport.requests()[0].header("Authorization").is_none());
}

#[tokio::test]
async fn rotated_refresh_token_is_stored() {
    let transport = MockTransport::new(|_| test_support::json(200, &json!({ "access": "A2", "refresh": "R2" })));
    let (_transport, store, coordinator, _observer) = setup(transport, signed_in());

    coordinator.refresh(Some("A1")).await.unwrap();
    assert_eq!(store.load().unwrap(), Some(CredentialPair::new("A2", "R2")));
}

#[tokio::test]
async fn stale_token_already_replaced_skips_exchange() {
    let transport = MockTransport::new(|_| panic!("no exchange expected"));
    let (transport, _store, coordinator, _observer) =
        setup(transport, MemoryStore::with_pair(CredentialPair::new("A2", "R1")));

    assert_eq!(coordinator.refresh(Some("A1")).await.unwrap(), "A2");
    assert_eq!(transport.refresh_calls(), 0);
}

#[tokio::test]
async fn sequential_refreshes_each_exchange() {
    let transport = MockTransport::new(|_| test_support::json(200, &json!({ "access": "A2" })));
    let (transport, _store, coordinator, _observer) = setup(transport, signed_in());

    coordinator.refresh(Some("A1")).await.unwrap();
    // The slot was cleared, so a 401 on the new token starts a new exchange.
    coordinator.refresh(Some("A2")).await.unwrap();
    assert_eq!(transport.refresh_calls(), 2);
}

// =============================================================================
// terminal failures
// =============================================================================

#[tokio::test]
async fn missing_refresh_token_expires_session() {
    let transport = MockTransport::new(|_| panic!("no exchange expected"));
    let (transport, _store, coordinator, observer) = setup(transport, MemoryStore::new());

    assert_eq!(coordinator.refresh(None).await, Err(RefreshError::MissingRefreshToken));
    assert_eq!(transport.refresh_calls(), 0);
    assert_eq!(observer.count(), 1);
}

#[tokio::test]
async fn rejected_exchange_clears_store_and_notifies_once() {
    let transport = MockTransport::new(|_| test_support::json(401, &json!({ "detail": "Token is blacklisted" })));
    let (_transport, store, coordinator, observer) = setup(transport, signed_in());

    assert_eq!(coordinator.refresh(Some("A1")).await, Err(RefreshError::Rejected(401)));
    assert!(store.load().unwrap().is_none());
    assert_eq!(observer.count(), 1);
    assert!(!coordinator.is_refreshing());
}

#[tokio::test]
async fn network_failure_during_exchange_is_terminal() {
    let transport = MockTransport::new(|_| Err(TransportError::Network("connection reset".into())));
    let (_transport, store, coordinator, observer) = setup(transport, signed_in());

    let err = coordinator.refresh(Some("A1")).await.unwrap_err();
    assert!(matches!(err, RefreshError::Network(_)));
    assert!(store.load().unwrap().is_none());
    assert_eq!(observer.count(), 1);
}

#[tokio::test]
async fn malformed_exchange_body_is_terminal() {
    let transport = MockTransport::new(|_| test_support::json(200, &json!({ "token": "A2" })));
    let (_transport, store, coordinator, _observer) = setup(transport, signed_in());

    assert!(matches!(coordinator.refresh(Some("A1")).await, Err(RefreshError::Decode(_))));
    assert!(store.load().unwrap().is_none());
}

#[tokio::test]
async fn failure_without_observer_still_clears() {
    let transport = Arc::new(MockTransport::new(|_| test_support::status(500)));
    let store = Arc::new(signed_in());
    let coordinator = RefreshCoordinator::new(transport, store.clone());

    assert_eq!(coordinator.refresh(Some("A1")).await, Err(RefreshError::Rejected(500)));
    assert!(store.load().unwrap().is_none());
}

// =============================================================================
// single flight
// =============================================================================

#[tokio::test]
async fn concurrent_refreshes_share_one_exchange() {
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let transport = MockTransport::new(|_| test_support::json(200, &json!({ "access": "A2" })))
        .gate_refresh(gate.clone());
    let (transport, _store, coordinator, _observer) = setup(transport, signed_in());

    // `join` polls in order: the first call starts the exchange and parks on
    // the gate, the second joins it, and only then is the gate opened.
    let (first, second, ()) = futures_util::future::join3(
        coordinator.refresh(Some("A1")),
        coordinator.refresh(Some("A1")),
        async {
            assert!(coordinator.is_refreshing());
            gate.add_permits(1);
        },
    )
    .await;

    assert_eq!(first.unwrap(), "A2");
    assert_eq!(second.unwrap(), "A2");
    assert_eq!(transport.refresh_calls(), 1);
    assert!(!coordinator.is_refreshing());
}

#[tokio::test]
async fn concurrent_waiters_share_one_failure() {
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let transport = MockTransport::new(|_| test_support::status(401)).gate_refresh(gate.clone());
    let (transport, store, coordinator, observer) = setup(transport, signed_in());

    let (first, second, ()) = futures_util::future::join3(
        coordinator.refresh(Some("A1")),
        coordinator.refresh(Some("A1")),
        async { gate.add_permits(1) },
    )
    .await;

    assert_eq!(first, Err(RefreshError::Rejected(401)));
    assert_eq!(second, Err(RefreshError::Rejected(401)));
    assert_eq!(transport.refresh_calls(), 1);
    assert_eq!(observer.count(), 1);
    assert!(store.load().unwrap().is_none());
}

// =============================================================================
// exchange outliving the session it started from
// =============================================================================

fn relogin(store: &MemoryStore) {
    store.clear().unwrap();
    store.save(&CredentialPair::new("B1", "S1")).unwrap();
}

#[tokio::test]
async fn failed_exchange_after_relogin_keeps_new_pair() {
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let transport = MockTransport::new(|_| test_support::status(401)).gate_refresh(gate.clone());
    let (_transport, store, coordinator, observer) = setup(transport, signed_in());

    let (result, ()) = futures_util::future::join(coordinator.refresh(Some("A1")), async {
        relogin(&store);
        gate.add_permits(1);
    })
    .await;

    assert_eq!(result, Err(RefreshError::Rejected(401)));
    assert_eq!(store.load().unwrap(), Some(CredentialPair::new("B1", "S1")));
    assert_eq!(observer.count(), 0);
}

#[tokio::test]
async fn successful_exchange_after_relogin_is_discarded() {
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let transport = MockTransport::new(|_| test_support::json(200, &json!({ "access": "A2" }))).gate_refresh(gate.clone());
    let (_transport, store, coordinator, observer) = setup(transport, signed_in());

    let (result, ()) = futures_util::future::join(coordinator.refresh(Some("A1")), async {
        relogin(&store);
        gate.add_permits(1);
    })
    .await;

    assert_eq!(result, Err(RefreshError::Superseded));
    assert_eq!(store.load().unwrap(), Some(CredentialPair::new("B1", "S1")));
    assert_eq!(observer.count(), 0);
    assert!(!coordinator.is_refreshing());
}

#[tokio::test]
async fn new_session_does_not_join_old_exchange() {
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let transport = MockTransport::new(|request| {
        let access = if request.body == Some(json!({ "refresh": "S1" })) { "B2" } else { "A2" };
        test_support::json(200, &json!({ "access": access }))
    })
    .gate_refresh(gate.clone());
    let (transport, store, coordinator, _observer) = setup(transport, signed_in());

    let (old, new, ()) = futures_util::future::join3(
        coordinator.refresh(Some("A1")),
        async {
            relogin(&store);
            coordinator.refresh(Some("B1")).await
        },
        async { gate.add_permits(2) },
    )
    .await;

    assert_eq!(old, Err(RefreshError::Superseded));
    assert_eq!(new.unwrap(), "B2");
    assert_eq!(transport.refresh_calls(), 2);
    assert_eq!(store.load().unwrap(), Some(CredentialPair::new("B2", "S1")));
}
