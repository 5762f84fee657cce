//! Integration tests for the session lifecycle against the in-memory store.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use docstore_sessions::{
    mocks::MockDocumentStore, Cookie, KeyPair, Session, SessionError, SessionId, SessionOptions,
    SessionRegistry, SessionStore, SessionValue, StoreConfig, StoreOperation, TtlIndexStatus,
};
use http::header::{COOKIE, SET_COOKIE};
use http::HeaderMap;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("docstore_sessions=debug")
        .with_test_writer()
        .try_init();
}

fn keys() -> Vec<KeyPair> {
    KeyPair::from_pairs([
        b"lifecycle-hash-key-0123456789abcdef".to_vec(),
        vec![7u8; 32],
    ])
}

fn store_with(documents: &MockDocumentStore, config: StoreConfig) -> SessionStore<MockDocumentStore> {
    SessionStore::new(documents.clone(), config, &keys()).expect("Failed to create store")
}

/// Request headers echoing every cookie set on `response`.
fn request_from(response: &HeaderMap) -> HeaderMap {
    let pairs: Vec<&str> = response
        .get_all(SET_COOKIE)
        .iter()
        .map(|value| value.to_str().unwrap().split(';').next().unwrap())
        .collect();
    let mut request = HeaderMap::new();
    if !pairs.is_empty() {
        request.insert(COOKIE, pairs.join("; ").parse().unwrap());
    }
    request
}

#[tokio::test]
async fn test_alice_session_round_trip() {
    init_tracing();
    let documents = MockDocumentStore::new();
    let config = StoreConfig::new(SessionOptions::default().with_max_age(86_400));
    let store = SessionStore::open(documents.clone(), config, &keys())
        .await
        .expect("Failed to open store")
        .into_result()
        .expect("Failed to create TTL index");

    // First request: no cookie, new session
    let mut session = store
        .new_session(&HeaderMap::new(), "app")
        .await
        .into_result()
        .expect("Fresh session should not fail");
    assert!(session.is_new);
    session.insert("user", "alice");

    let mut response = HeaderMap::new();
    store.save(&mut session, &mut response).await.expect("Failed to save");
    let set_cookie = response.get(SET_COOKIE).unwrap().to_str().unwrap();
    assert!(set_cookie.contains("Max-Age=86400"));
    assert!(set_cookie.contains("HttpOnly"));

    // Second request: cookie present, stored values come back
    let loaded = store
        .new_session(&request_from(&response), "app")
        .await
        .into_result()
        .expect("Failed to load session");
    assert!(!loaded.is_new);
    assert_eq!(loaded.id, session.id);
    assert_eq!(loaded.get("user").and_then(SessionValue::as_str), Some("alice"));
}

#[tokio::test]
async fn test_load_by_explicit_id() {
    let documents = MockDocumentStore::new();
    let store = store_with(&documents, StoreConfig::default());

    let mut session = Session::new("app", store.options().clone());
    session.insert("user", "alice");
    store.save(&mut session, &mut Vec::<Cookie<'static>>::new()).await.unwrap();

    let mut reloaded = Session::new("app", store.options().clone());
    reloaded.id = session.id.clone();
    assert!(store.load(&mut reloaded).await.unwrap());
    assert_eq!(reloaded.values, session.values);
}

#[tokio::test]
async fn test_random_id_not_found() {
    let documents = MockDocumentStore::new();
    let store = store_with(&documents, StoreConfig::default());

    let mut session = Session::new("app", store.options().clone());
    session.id = Some(SessionId::new().to_hex());

    assert!(!store.load(&mut session).await.expect("Missing record is not an error"));
    assert!(session.values.is_empty());
}

#[tokio::test]
async fn test_repeated_saves_keep_one_document() {
    let documents = MockDocumentStore::new();
    let store = store_with(&documents, StoreConfig::default());

    let mut session = Session::new("app", store.options().clone());
    for count in 0..3 {
        session.insert("count", count);
        store.save(&mut session, &mut Vec::<Cookie<'static>>::new()).await.unwrap();
    }

    assert_eq!(documents.document_count(), 1);
    assert_eq!(documents.calls(StoreOperation::Save), 3);

    let mut reloaded = Session::new("app", store.options().clone());
    reloaded.id = session.id.clone();
    store.load(&mut reloaded).await.unwrap();
    assert_eq!(reloaded.get("count").and_then(SessionValue::as_i64), Some(2));
}

#[tokio::test]
async fn test_expire_deletes_document_and_cookie() {
    let documents = MockDocumentStore::new();
    let store = store_with(&documents, StoreConfig::default());

    let mut session = Session::new("app", store.options().clone());
    session.insert("user", "alice");
    let mut response = HeaderMap::new();
    store.save(&mut session, &mut response).await.unwrap();
    assert_eq!(documents.document_count(), 1);

    let mut session = store
        .new_session(&request_from(&response), "app")
        .await
        .into_result()
        .unwrap();
    session.expire();

    let mut response = HeaderMap::new();
    store.save(&mut session, &mut response).await.unwrap();
    assert_eq!(documents.document_count(), 0);

    let set_cookie = response.get(SET_COOKIE).unwrap().to_str().unwrap();
    assert!(set_cookie.starts_with("app=;"));
    assert!(set_cookie.contains("Max-Age=0"));
    assert!(set_cookie.contains("Expires=Thu, 01 Jan 1970 00:00:01 GMT"));

    // The stale cookie now yields a new, empty session
    let after = store.new_session(&request_from(&response), "app").await;
    assert!(after.session.is_new);
}

#[tokio::test]
async fn test_deleted_record_starts_new_session() {
    let documents = MockDocumentStore::new();
    let store = store_with(&documents, StoreConfig::default());

    let mut session = Session::new("app", store.options().clone());
    session.insert("user", "alice");
    let mut response = HeaderMap::new();
    store.save(&mut session, &mut response).await.unwrap();

    // Simulate TTL expiry removing the record behind the cookie
    let mut doomed = session.clone();
    doomed.expire();
    store.save(&mut doomed, &mut Vec::<Cookie<'static>>::new()).await.unwrap();

    let loaded = store.new_session(&request_from(&response), "app").await;
    assert!(loaded.error.is_none());
    assert!(loaded.session.is_new);
    assert!(loaded.session.values.is_empty());
    assert_eq!(loaded.session.id, session.id);
}

#[tokio::test]
async fn test_concurrent_saves_last_write_wins() {
    let documents = MockDocumentStore::new();
    let store = Arc::new(store_with(&documents, StoreConfig::default()));

    let mut base = Session::new("app", store.options().clone());
    store.save(&mut base, &mut Vec::<Cookie<'static>>::new()).await.unwrap();

    let mut first = base.clone();
    first.insert("writer", "first");
    first.insert("only_first", true);
    let mut second = base.clone();
    second.insert("writer", "second");

    let (a, b) = tokio::join!(
        {
            let store = Arc::clone(&store);
            async move {
                let saved = store.save(&mut first, &mut Vec::<Cookie<'static>>::new()).await;
                saved.map(|()| first)
            }
        },
        {
            let store = Arc::clone(&store);
            async move {
                let saved = store.save(&mut second, &mut Vec::<Cookie<'static>>::new()).await;
                saved.map(|()| second)
            }
        }
    );
    let first = a.unwrap();
    let second = b.unwrap();

    let mut stored = Session::new("app", store.options().clone());
    stored.id = base.id.clone();
    store.load(&mut stored).await.unwrap();

    assert_eq!(documents.document_count(), 1);
    assert!(stored.values == first.values || stored.values == second.values);
}

#[tokio::test]
async fn test_registry_shares_session_across_gets() {
    let documents = MockDocumentStore::new();
    let store = store_with(&documents, StoreConfig::default());
    let request = HeaderMap::new();
    let mut registry = SessionRegistry::new();

    let (session, error) = store.get(&mut registry, &request, "app").await;
    assert!(error.is_none());
    session.insert("step", 1);

    let (session, _) = store.get(&mut registry, &request, "app").await;
    session.insert("step", 2);

    let mut response = HeaderMap::new();
    registry.save_all(&store, &mut response).await.unwrap();
    assert_eq!(documents.document_count(), 1);

    let loaded = store
        .new_session(&request_from(&response), "app")
        .await
        .into_result()
        .unwrap();
    assert_eq!(loaded.get("step").and_then(SessionValue::as_i64), Some(2));
}

#[tokio::test]
async fn test_store_failure_surfaces_before_cookie() {
    let documents = MockDocumentStore::new();
    let store = store_with(&documents, StoreConfig::default());
    documents.fail(StoreOperation::Save);

    let mut session = Session::new("app", store.options().clone());
    let mut response = HeaderMap::new();
    let err = store.save(&mut session, &mut response).await.unwrap_err();

    assert!(err.is_store_failure());
    assert!(err.to_string().starts_with("session save failed"));
    assert!(response.get(SET_COOKIE).is_none());

    documents.recover();
    store.save(&mut session, &mut response).await.unwrap();
    assert!(response.get(SET_COOKIE).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_store_times_out() {
    let documents = MockDocumentStore::new();
    let store = store_with(
        &documents,
        StoreConfig::default().with_operation_timeout(Some(Duration::from_secs(2))),
    );
    documents.set_latency(Some(Duration::from_secs(60)));

    let mut session = Session::new("app", store.options().clone());
    session.id = Some(SessionId::new().to_hex());
    let err = store.load(&mut session).await.unwrap_err();

    assert!(matches!(
        err,
        SessionError::Timeout {
            operation: StoreOperation::Load,
            ..
        }
    ));
}

#[tokio::test]
async fn test_open_default_creates_ttl_index() {
    let documents = MockDocumentStore::new();
    let init = SessionStore::open_default(documents.clone(), &keys()).await.unwrap();

    assert_eq!(init.index, Ok(TtlIndexStatus::Created));
    let store = init.into_store();
    assert_eq!(store.options().max_age, 30 * 24 * 60 * 60);
    assert!(store.options().http_only);
    assert_eq!(store.options().path, "/");

    // Reopening finds the index in place
    let again = SessionStore::open_default(documents.clone(), &keys()).await.unwrap();
    assert_eq!(again.index, Ok(TtlIndexStatus::Present));
    assert_eq!(documents.indexes().len(), 1);
}
