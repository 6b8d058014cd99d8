use std::path::Path;
use std::time::Duration;

use quarry_infra::{ApplicationId, LocalPeer, PeerRole};

#[tokio::test]
async fn second_claim_becomes_client_and_delivers_one_line() {
    let dir = tempfile::tempdir().unwrap();
    let id = ApplicationId::from_path_and_version(Path::new("/data/a"), "test");

    let PeerRole::Primary(mut server) = LocalPeer::claim(&id, dir.path()).await.unwrap() else {
        panic!("first claim should be primary");
    };
    let PeerRole::Secondary(client) = LocalPeer::claim(&id, dir.path()).await.unwrap() else {
        panic!("second claim should be a client");
    };

    client
        .send_message("launch-with-port alpha 25565", Duration::from_secs(2))
        .await
        .unwrap();

    let got = tokio::time::timeout(Duration::from_secs(2), server.recv())
        .await
        .unwrap();
    assert_eq!(got.as_deref(), Some("launch-with-port alpha 25565"));
}

#[tokio::test]
async fn different_ids_do_not_collide() {
    let dir = tempfile::tempdir().unwrap();
    let a = ApplicationId::from_path_and_version(Path::new("/data/a"), "test");
    let b = ApplicationId::from_path_and_version(Path::new("/data/b"), "test");

    let first = LocalPeer::claim(&a, dir.path()).await.unwrap();
    let second = LocalPeer::claim(&b, dir.path()).await.unwrap();
    assert!(matches!(first, PeerRole::Primary(_)));
    assert!(matches!(second, PeerRole::Primary(_)));
}

#[tokio::test]
async fn dropping_the_primary_releases_the_claim() {
    let dir = tempfile::tempdir().unwrap();
    let id = ApplicationId::from_path_and_version(Path::new("/data/c"), "test");

    let first = LocalPeer::claim(&id, dir.path()).await.unwrap();
    assert!(matches!(first, PeerRole::Primary(_)));
    drop(first);

    let again = LocalPeer::claim(&id, dir.path()).await.unwrap();
    assert!(matches!(again, PeerRole::Primary(_)));
}

#[tokio::test]
async fn multi_line_messages_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let id = ApplicationId::from_path_and_version(Path::new("/data/d"), "test");
    let _primary = LocalPeer::claim(&id, dir.path()).await.unwrap();
    let PeerRole::Secondary(client) = LocalPeer::claim(&id, dir.path()).await.unwrap() else {
        panic!("expected client");
    };
    assert!(client
        .send_message("activate\nlaunch x", Duration::from_millis(200))
        .await
        .is_err());
}

#[tokio::test]
async fn client_times_out_without_a_primary() {
    let dir = tempfile::tempdir().unwrap();
    let id = ApplicationId::from_path_and_version(Path::new("/data/e"), "test");
    let _primary = LocalPeer::claim(&id, dir.path()).await.unwrap();
    let PeerRole::Secondary(client) = LocalPeer::claim(&id, dir.path()).await.unwrap() else {
        panic!("expected client");
    };
    std::fs::remove_file(dir.path().join(format!("{id}.port"))).unwrap();

    let err = client
        .send_message("activate", Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, quarry_infra::PeerError::Timeout));
}
