use crate::*;

use std::time::Duration;

use parcel_core::FileIdentifier;
use parcel_services::{FsBackend, SqliteBackend};

/// Send the first half, restart the server on the same storage, send the rest.
async fn resume_across_restart(open: impl Fn() -> Arc<dyn ChunkBackend>) {
    let data = pattern(80_000, 4);
    let chunks: Vec<Vec<u8>> = data.chunks(10_000).map(<[u8]>::to_vec).collect();
    let total = chunks.len().to_string();

    let server = TestServer::start(open()).await.unwrap();
    for (i, c) in chunks.iter().enumerate().take(4) {
        post_chunk(&server.url, "docs/resume.bin", &i.to_string(), &total, c.clone())
            .await
            .unwrap();
    }
    server.stop().await.unwrap();

    let server = TestServer::start(open()).await.unwrap();
    let sessions = server.transport().list_sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].uploaded_chunks, 4);

    // A different total is still refused after the restart.
    let (status, _) = post_chunk(&server.url, "docs/resume.bin", "4", "9", chunks[4].clone())
        .await
        .unwrap();
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);

    let mut last = serde_json::Value::Null;
    for (i, c) in chunks.iter().enumerate().skip(4) {
        let (status, body) = post_chunk(&server.url, "docs/resume.bin", &i.to_string(), &total, c.clone())
            .await
            .unwrap();
        assert!(status.is_success(), "{body}");
        last = body;
    }
    assert_eq!(last["filePath"], "/uploads/docs/resume.bin");
    assert_eq!(last["digest"], parcel_core::digest(&data));

    let downloaded = server.transport().download("/uploads/docs/resume.bin").await.unwrap();
    assert_eq!(&downloaded[..], &data[..]);
    assert!(server.transport().list_sessions().await.unwrap().is_empty());
    server.stop().await.unwrap();
}

#[tokio::test]
async fn filesystem_sessions_survive_restart() {
    let root = temp_root("fs-restart");
    let open = {
        let root = root.clone();
        move || Arc::new(FsBackend::new(root.clone()).unwrap()) as Arc<dyn ChunkBackend>
    };
    resume_across_restart(open).await;

    // The artifact is visible to a fresh backend, chunk containers are gone.
    let reopened = FsBackend::new(root.clone()).unwrap();
    let resumed = FileIdentifier::parse("docs/resume.bin").unwrap();
    assert!(reopened.find_artifact(&resumed).unwrap().is_some());
    let leftovers = std::fs::read_dir(root.join(".chunks")).unwrap().count();
    assert_eq!(leftovers, 0);
    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn sqlite_sessions_survive_restart() {
    let root = temp_root("sqlite-restart");
    let db = root.join("parcel.db");
    let open = {
        let db = db.clone();
        move || Arc::new(SqliteBackend::open(&db).unwrap()) as Arc<dyn ChunkBackend>
    };
    resume_across_restart(open).await;
    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn janitor_sweeps_sessions_abandoned_before_restart() {
    let root = temp_root("janitor");
    let server = TestServer::start(Arc::new(FsBackend::new(root.clone()).unwrap()))
        .await
        .unwrap();
    post_chunk(&server.url, "abandoned.bin", "0", "5", b"only one".to_vec())
        .await
        .unwrap();
    post_chunk(&server.url, "kept.bin", "0", "1", b"done".to_vec())
        .await
        .unwrap();
    server.stop().await.unwrap();

    let server = TestServer::start(Arc::new(FsBackend::new(root.clone()).unwrap()))
        .await
        .unwrap();
    let (shutdown, rx) = tokio::sync::broadcast::channel(1);
    let janitor = tokio::spawn(parcel_services::janitor::run(
        server.store.clone(),
        Duration::from_millis(20),
        Duration::from_millis(50),
        rx,
    ));

    let transport = server.transport();
    tokio::time::timeout(Duration::from_secs(10), async {
        while !transport.list_sessions().await.unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("abandoned session was never expired");

    let files = transport.list_files().await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "kept.bin");
    assert!(server
        .store
        .find_artifact(&FileIdentifier::parse("abandoned.bin").unwrap())
        .await
        .unwrap()
        .is_none());

    let _ = shutdown.send(());
    janitor.await.unwrap();
    server.stop().await.unwrap();
    let _ = std::fs::remove_dir_all(&root);
}
