use crate::*;

use parcel_core::RetryPolicy;
use parcel_services::{StartOutcome, UploadSource, UploadStatus};

#[tokio::test]
async fn producer_uploads_several_files_over_http() {
    let server = TestServer::memory().await.unwrap();
    let producer = server.producer(64 * 1024, RetryPolicy::immediate(3));

    let inputs = [
        ("b-second.bin", pattern(300_000, 1)),
        ("a-first.bin", pattern(64 * 1024, 2)),
        ("c-empty.bin", Vec::new()),
        ("nested/d.txt", b"tiny".to_vec()),
    ];
    for (name, data) in &inputs {
        let id = parcel_core::FileIdentifier::parse(name).unwrap();
        assert!(producer
            .add_file(UploadSource::from_bytes(id, data.clone()))
            .await
            .unwrap());
    }

    let StartOutcome::Finished(summary) = producer.start_upload().await else {
        panic!("producer was already running");
    };
    assert_eq!(summary.completed.len(), inputs.len(), "{summary:?}");
    assert!(summary.failed.is_empty());
    // Registration order is upload order.
    assert_eq!(summary.completed[0].as_str(), "b-second.bin");

    let snapshot = producer.snapshot().await;
    assert!(snapshot.iter().all(|f| f.status == UploadStatus::Completed));
    assert_eq!(snapshot[0].total_chunks, 5);

    let transport = server.transport();
    let listed = transport.list_files().await.unwrap();
    let names: Vec<&str> = listed.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["a-first.bin", "b-second.bin", "c-empty.bin", "nested/d.txt"]);

    for (name, data) in &inputs {
        let info = listed.iter().find(|f| f.name == *name).unwrap();
        assert_eq!(info.size, data.len() as u64);
        let downloaded = transport.download(&info.path).await.unwrap();
        assert_eq!(&downloaded[..], &data[..], "{name}");
    }

    assert!(transport.list_sessions().await.unwrap().is_empty());
    server.stop().await.unwrap();
}

#[tokio::test]
async fn two_and_a_half_megabytes_in_one_megabyte_chunks() {
    const MB: usize = 1024 * 1024;
    let server = TestServer::memory().await.unwrap();
    let data = pattern(5 * MB / 2, 7);

    let (status, body) = post_chunk(&server.url, "big.bin", "0", "3", data[..MB].to_vec())
        .await
        .unwrap();
    assert!(status.is_success());
    assert_eq!(body["uploadedChunks"], 1);

    let (_, body) = post_chunk(&server.url, "big.bin", "1", "3", data[MB..2 * MB].to_vec())
        .await
        .unwrap();
    assert_eq!(body["uploadedChunks"], 2);
    assert_eq!(body["totalChunks"], 3);
    assert!(body.get("filePath").is_none());

    let (status, body) = post_chunk(&server.url, "big.bin", "2", "3", data[2 * MB..].to_vec())
        .await
        .unwrap();
    assert!(status.is_success());
    assert_eq!(body["success"], true);
    assert_eq!(body["filePath"], "/uploads/big.bin");
    assert_eq!(body["size"], (5 * MB / 2) as u64);

    let files = server.transport().list_files().await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].size, (5 * MB / 2) as u64);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn reverse_order_over_http_completes_on_index_zero() {
    let server = TestServer::memory().await.unwrap();
    let data = pattern(10_000, 3);
    let chunks: Vec<&[u8]> = data.chunks(1000).collect();
    let total = chunks.len().to_string();

    for index in (1..chunks.len()).rev() {
        let (status, body) = post_chunk(&server.url, "rev.bin", &index.to_string(), &total, chunks[index].to_vec())
            .await
            .unwrap();
        assert!(status.is_success());
        assert!(body.get("filePath").is_none(), "completed early at {index}");
    }
    let (_, body) = post_chunk(&server.url, "rev.bin", "0", &total, chunks[0].to_vec())
        .await
        .unwrap();
    assert_eq!(body["filePath"], "/uploads/rev.bin");

    let downloaded = server.transport().download("/uploads/rev.bin").await.unwrap();
    assert_eq!(&downloaded[..], &data[..]);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn uploads_file_from_disk_through_cli_transport() {
    let dir = temp_root("disk");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("photo.jpg");
    let data = pattern(200_000, 9);
    std::fs::write(&path, &data).unwrap();

    let server = TestServer::memory().await.unwrap();
    let producer = server.producer(32 * 1024, RetryPolicy::immediate(2));
    let id = parcel_core::FileIdentifier::parse("photo.jpg").unwrap();
    producer
        .add_file(UploadSource::from_path(&path, id).await.unwrap())
        .await
        .unwrap();
    producer.start_upload().await;

    let snapshot = producer.snapshot().await;
    assert_eq!(snapshot[0].status, UploadStatus::Completed);

    let resp = reqwest::get(format!("{}/uploads/photo.jpg", server.url)).await.unwrap();
    assert_eq!(resp.headers()["content-type"], "image/jpeg");
    assert_eq!(&resp.bytes().await.unwrap()[..], &data[..]);

    server.stop().await.unwrap();
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn uploading_a_name_again_replaces_the_artifact() {
    let server = TestServer::memory().await.unwrap();
    let id = parcel_core::FileIdentifier::parse("docs/report.txt").unwrap();

    for (chunk_size, data) in [(1024, pattern(3000, 11)), (1024, pattern(3000, 12)), (2048, pattern(9000, 13))] {
        let producer = server.producer(chunk_size, RetryPolicy::immediate(2));
        producer
            .add_file(UploadSource::from_bytes(id.clone(), data.clone()))
            .await
            .unwrap();
        let StartOutcome::Finished(summary) = producer.start_upload().await else {
            panic!("producer was already running");
        };
        assert_eq!(summary.completed, vec![id.clone()], "{summary:?}");

        let downloaded = server.transport().download("/uploads/docs/report.txt").await.unwrap();
        assert_eq!(&downloaded[..], &data[..]);
    }

    assert_eq!(server.transport().list_files().await.unwrap().len(), 1);
    server.stop().await.unwrap();
}
