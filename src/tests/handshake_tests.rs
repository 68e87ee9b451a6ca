use super::*;
use crate::internal_log::DEFAULT_LOG_FILE_LIMIT;
use crate::test_support::{FakeCipher, FakeServer};
use std::time::Duration;
use tempfile::TempDir;

fn machine_with_config(
    dir: &TempDir,
    server: &FakeServer,
    config: &ClientConfig,
) -> HandshakeStateMachine {
    let paths = SessionPaths::new(dir.path().join("session"));
    paths.ensure_dirs().unwrap();
    let lock = LockManager::with_policy(paths.lock_path(), Duration::from_millis(10), 5);
    let identity = Identity::from_config(config, &paths);
    let log = InternalLog::new(paths.internal_log_path(), DEFAULT_LOG_FILE_LIMIT);
    let link = ServerLink::new(Box::new(FakeCipher), Box::new(server.clone()));
    HandshakeStateMachine::new(link, SessionStore::new(paths), lock, identity, log)
}

fn machine(dir: &TempDir, server: &FakeServer) -> HandshakeStateMachine {
    machine_with_config(dir, server, &ClientConfig::default())
}

#[test]
fn test_connect_runs_connect_then_ack() {
    let dir = TempDir::new().unwrap();
    let server = FakeServer::new();
    let mut hs = machine(&dir, &server);
    assert_eq!(hs.state(), HandshakeState::Uninitialized);

    hs.connect().unwrap();

    assert_eq!(server.control_types(), vec![1, 2]);
    assert_eq!(hs.state(), HandshakeState::Connected);
    let stored = hs.store().read().unwrap();
    assert!(stored.is_connected());
    assert_eq!(stored.client_id, "fake-client-0001");
    assert!(!hs.lock().is_locked());
}

#[test]
fn test_fresh_identity_generates_keys_and_sends_public_key() {
    let dir = TempDir::new().unwrap();
    let server = FakeServer::new();
    let mut hs = machine(&dir, &server);

    hs.connect().unwrap();

    let paths = hs.store().paths().clone();
    assert!(paths.private_key_path().exists());
    assert!(paths.public_key_path().exists());

    let connect = &server.received()[0];
    assert!(connect.body.get("client_id").is_none());
    assert!(connect.body["rsa_public_key"]
        .as_str()
        .unwrap()
        .contains("PUBLIC KEY"));
}

#[test]
fn test_persistent_identity_sends_client_id_and_copies_key() {
    let dir = TempDir::new().unwrap();
    let key_path = dir.path().join("client.priv.pem");
    std::fs::write(&key_path, "configured-private-key").unwrap();
    let config = ClientConfig {
        client_id: Some("muflihun00102030".to_string()),
        client_private_key: Some(key_path),
        ..ClientConfig::default()
    };
    let server = FakeServer::new();
    let mut hs = machine_with_config(&dir, &server, &config);

    hs.connect().unwrap();

    let connect = &server.received()[0];
    assert_eq!(connect.body["client_id"], "muflihun00102030");
    assert!(connect.body.get("rsa_public_key").is_none());
    let copied = std::fs::read_to_string(hs.store().paths().private_key_path()).unwrap();
    assert_eq!(copied, "configured-private-key");
}

#[test]
fn test_server_public_key_encrypts_connect() {
    let dir = TempDir::new().unwrap();
    let config = ClientConfig {
        server_public_key: Some(dir.path().join("server.pub.pem")),
        ..ClientConfig::default()
    };
    let server = FakeServer::new();
    let mut hs = machine_with_config(&dir, &server, &config);

    hs.connect().unwrap();

    // The fake server only understands the request after base64 decoding
    assert_eq!(server.control_types(), vec![1, 2]);
}

#[test]
fn test_error_envelope_fails_connect() {
    let dir = TempDir::new().unwrap();
    let server = FakeServer::new();
    server.configure(|script| script.connect_error = Some(("Invalid client".to_string(), 1)));
    let mut hs = machine(&dir, &server);

    let err = hs.connect().unwrap_err();

    assert!(matches!(err, ResidueError::Handshake(_)));
    assert!(err.to_string().contains("Invalid client, status: 1"));
    assert_eq!(hs.state(), HandshakeState::Failed);
    assert!(!hs.is_connected());
    // No ACK after a rejected CONNECT, and the lock is released
    assert_eq!(server.control_types(), vec![1]);
    assert!(!hs.lock().is_locked());
    assert!(hs.store().read().is_none());
}

#[test]
fn test_unacknowledged_session_is_not_connected() {
    let dir = TempDir::new().unwrap();
    let server = FakeServer::new();
    server.configure(|script| script.ack_status = 1);
    let mut hs = machine(&dir, &server);

    assert!(hs.connect().is_err());

    assert_eq!(hs.state(), HandshakeState::Failed);
    let stored = hs.store().read().unwrap();
    assert_eq!(stored.status, 1);
    assert!(!stored.is_connected());
}

#[test]
fn test_failed_state_recovers_on_next_connect() {
    let dir = TempDir::new().unwrap();
    let server = FakeServer::new();
    server.configure(|script| script.connect_error = Some(("Server busy".to_string(), 2)));
    let mut hs = machine(&dir, &server);
    assert!(hs.connect().is_err());

    server.configure(|script| script.connect_error = None);
    hs.connect().unwrap();

    assert_eq!(hs.state(), HandshakeState::Connected);
}

#[test]
fn test_touch_keeps_identity_and_clears_tokens() {
    let dir = TempDir::new().unwrap();
    let server = FakeServer::new();
    let mut hs = machine(&dir, &server);
    hs.connect().unwrap();
    let mut before = hs.session().unwrap().clone();
    before.date_created = now_epoch() - 3590;
    hs.store().write(&before).unwrap();
    let token_path = hs.store().paths().token_path("billing");
    std::fs::write(&token_path, "{}").unwrap();

    hs.touch().unwrap();

    assert_eq!(server.control_types(), vec![1, 2, 3]);
    let after = hs.session().unwrap();
    assert_eq!(after.client_id, before.client_id);
    assert_eq!(after.key, before.key);
    assert_eq!(after.flags, before.flags);
    assert!(after.date_created >= before.date_created);
    assert!(hs.is_connected());
    assert!(!token_path.exists());
    assert_eq!(hs.store().read().as_ref(), Some(after));
}

#[test]
fn test_touch_skipped_when_store_already_renewed() {
    let dir = TempDir::new().unwrap();
    let server = FakeServer::new();
    let mut hs = machine(&dir, &server);
    hs.connect().unwrap();
    let renewed = hs.store().read().unwrap();
    let token_path = hs.store().paths().token_path("billing");
    std::fs::write(&token_path, "{}").unwrap();

    // This process still holds the copy from before another process renewed
    let mut aging = renewed.clone();
    aging.date_created = now_epoch() - 3590;
    hs.session = Some(aging);

    hs.touch().unwrap();

    assert_eq!(server.control_types(), vec![1, 2]);
    assert_eq!(hs.session(), Some(&renewed));
    assert!(token_path.exists());
    assert!(hs.is_connected());
}

#[test]
fn test_reconnect_deletes_tokens_of_replaced_session() {
    let dir = TempDir::new().unwrap();
    let server = FakeServer::new();
    let mut hs = machine(&dir, &server);
    hs.connect().unwrap();
    let token_path = hs.store().paths().token_path("billing");
    std::fs::write(&token_path, "{}").unwrap();

    let mut expired = hs.session().unwrap().clone();
    expired.date_created = now_epoch() - 3605;
    hs.store().write(&expired).unwrap();
    hs.resume();
    hs.connect().unwrap();

    assert_eq!(server.control_types(), vec![1, 2, 1, 2]);
    assert!(!token_path.exists());
}

#[test]
fn test_adopting_stored_session_keeps_tokens() {
    let dir = TempDir::new().unwrap();
    let server = FakeServer::new();
    let mut first = machine(&dir, &server);
    first.connect().unwrap();
    let token_path = first.store().paths().token_path("billing");
    std::fs::write(&token_path, "{}").unwrap();

    machine(&dir, &FakeServer::new()).connect().unwrap();

    assert!(token_path.exists());
}

#[test]
fn test_touch_when_not_connected_connects() {
    let dir = TempDir::new().unwrap();
    let server = FakeServer::new();
    let mut hs = machine(&dir, &server);

    hs.touch().unwrap();

    assert_eq!(server.control_types(), vec![1, 2]);
    assert!(hs.is_connected());
}

#[test]
fn test_connect_adopts_session_finished_by_another_process() {
    let dir = TempDir::new().unwrap();
    let server = FakeServer::new();
    let mut first = machine(&dir, &server);
    first.connect().unwrap();

    let other_server = FakeServer::new();
    let mut second = machine(&dir, &other_server);
    second.connect().unwrap();

    assert!(other_server.received().is_empty());
    assert!(second.is_connected());
    assert_eq!(second.session(), first.session());
}

#[test]
fn test_resume_reads_shared_store() {
    let dir = TempDir::new().unwrap();
    let server = FakeServer::new();
    let mut first = machine(&dir, &server);
    first.connect().unwrap();

    let mut second = machine(&dir, &FakeServer::new());
    second.resume();

    assert_eq!(second.state(), HandshakeState::Connected);
    assert!(!second.needs_connect(now_epoch()));
}

#[test]
fn test_needs_connect_for_expired_session() {
    let dir = TempDir::new().unwrap();
    let server = FakeServer::new();
    let mut hs = machine(&dir, &server);
    hs.connect().unwrap();

    let mut expired = hs.session().unwrap().clone();
    expired.age = 3600;
    expired.date_created = now_epoch() - 3605;
    hs.store().write(&expired).unwrap();
    hs.resume();

    assert!(hs.needs_connect(now_epoch()));
    assert!(hs.renewal_due(now_epoch()));
}

#[test]
fn test_reset_wipes_store() {
    let dir = TempDir::new().unwrap();
    let server = FakeServer::new();
    let mut hs = machine(&dir, &server);
    hs.connect().unwrap();

    hs.reset().unwrap();

    assert!(hs.store().read().is_none());
    assert!(hs.session().is_none());
    assert_eq!(hs.state(), HandshakeState::Uninitialized);
}
