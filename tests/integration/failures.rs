use crate::*;

use std::time::Duration;

use parcel_core::{FileIdentifier, RetryPolicy};
use parcel_services::{ProgressEvent, StartOutcome, UploadSource, UploadStatus};

#[tokio::test]
async fn index_equal_to_total_is_rejected_without_state_change() {
    let server = TestServer::memory().await.unwrap();
    post_chunk(&server.url, "edge.bin", "0", "2", b"a".to_vec()).await.unwrap();

    let (status, body) = post_chunk(&server.url, "edge.bin", "2", "2", b"x".to_vec())
        .await
        .unwrap();
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("out of range"), "{body}");

    let sessions = server.transport().list_sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].uploaded_chunks, 1);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn malformed_requests_get_json_errors() {
    let server = TestServer::memory().await.unwrap();
    for (id, index, total) in [("ok.bin", "x", "1"), ("ok.bin", "0", "0"), ("/abs.bin", "0", "1")] {
        let (status, body) = post_chunk(&server.url, id, index, total, b"x".to_vec()).await.unwrap();
        assert_eq!(status, reqwest::StatusCode::BAD_REQUEST, "{id} {index} {total}");
        assert_eq!(body["success"], false);
    }
    assert!(server.transport().list_sessions().await.unwrap().is_empty());
    server.stop().await.unwrap();
}

#[tokio::test]
async fn concurrent_duplicate_final_chunks_yield_one_artifact() {
    let root = temp_root("race");
    let backend = Arc::new(parcel_services::FsBackend::new(root.clone()).unwrap());
    let server = TestServer::start(backend).await.unwrap();
    let data = pattern(40_000, 5);
    let chunks: Vec<Vec<u8>> = data.chunks(10_000).map(<[u8]>::to_vec).collect();

    for (i, c) in chunks.iter().enumerate().take(3) {
        post_chunk(&server.url, "race.bin", &i.to_string(), "4", c.clone()).await.unwrap();
    }

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let url = server.url.clone();
        let last = chunks[3].clone();
        tasks.push(tokio::spawn(async move {
            post_chunk(&url, "race.bin", "3", "4", last).await
        }));
    }
    for t in tasks {
        let (status, body) = t.await.unwrap().unwrap();
        assert!(status.is_success(), "{body}");
        assert_eq!(body["filePath"], "/uploads/race.bin");
    }

    let files = server.transport().list_files().await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].size, data.len() as u64);
    let downloaded = server.transport().download("/uploads/race.bin").await.unwrap();
    assert_eq!(&downloaded[..], &data[..]);

    server.stop().await.unwrap();
    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn producer_retries_until_server_comes_up() {
    // Reserve a port, then free it so the first attempts are refused.
    let addr = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().to_string()
    };

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let retry = RetryPolicy {
        max_attempts: 50,
        initial_backoff_ms: 20,
        max_backoff_ms: 100,
        jitter: false,
    };
    let producer = Arc::new(
        parcel_services::ChunkProducer::new(
            parcel_ctl::HttpTransport::new(&format!("http://{addr}")),
            1024,
            retry,
        )
        .with_events(tx),
    );
    let data = pattern(5000, 11);
    producer
        .add_file(UploadSource::from_bytes(
            FileIdentifier::parse("late.bin").unwrap(),
            data.clone(),
        ))
        .await
        .unwrap();

    let runner = {
        let producer = producer.clone();
        tokio::spawn(async move { producer.start_upload().await })
    };

    // Wait until at least one retry has been reported, then bring the server up.
    loop {
        match tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
            Ok(Some(ProgressEvent::Retrying { chunk_index, .. })) => {
                assert_eq!(chunk_index, 0);
                break;
            }
            Ok(Some(_)) => continue,
            other => panic!("no retry reported: {other:?}"),
        }
    }
    let server = TestServer::start_on(&addr, Arc::new(parcel_services::MemoryBackend::new()))
        .await
        .unwrap();

    let StartOutcome::Finished(summary) = runner.await.unwrap() else {
        panic!("producer was already running");
    };
    assert_eq!(summary.completed.len(), 1, "{summary:?}");
    let stored = server
        .store
        .read_artifact(&FileIdentifier::parse("late.bin").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&stored[..], &data[..]);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn oversized_chunks_fail_the_file_without_retrying() {
    let server = TestServer::memory().await.unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let producer = server
        .producer((MAX_CHUNK_BYTES * 2) as u64, RetryPolicy::immediate(5))
        .with_events(tx);
    producer
        .add_file(UploadSource::from_bytes(
            FileIdentifier::parse("huge.bin").unwrap(),
            pattern(MAX_CHUNK_BYTES + 10, 1),
        ))
        .await
        .unwrap();
    producer
        .add_file(UploadSource::from_bytes(
            FileIdentifier::parse("fine.bin").unwrap(),
            pattern(100, 2),
        ))
        .await
        .unwrap();

    let StartOutcome::Finished(summary) = producer.start_upload().await else {
        panic!("producer was already running");
    };
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0.as_str(), "huge.bin");
    assert_eq!(summary.completed.len(), 1);

    let snapshot = producer.snapshot().await;
    assert_eq!(snapshot[0].status, UploadStatus::Failed);
    assert_eq!(snapshot[1].status, UploadStatus::Completed);

    drop(producer);
    while let Some(event) = rx.recv().await {
        assert!(!matches!(event, ProgressEvent::Retrying { .. }), "{event:?}");
    }
    server.stop().await.unwrap();
}
