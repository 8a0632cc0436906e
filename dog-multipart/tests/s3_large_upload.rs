//! Large upload against a real S3-compatible endpoint.
//!
//! Needs `S3_ENDPOINT_URL`, `S3_ACCESS_KEY_ID`, `S3_SECRET_ACCESS_KEY` and
//! `S3_BUCKET`. Run with `cargo test --test s3_large_upload -- --ignored`.
//! `S3_TEST_PARTS` overrides the part count (default 1560).

use bytes::Bytes;
use dog_multipart::{
    MultipartConfig, MultipartError, S3MultipartStore, UploadManager, UploadRequest,
    S3_MIN_PART_SIZE,
};

fn part_body(part_number: u32) -> Bytes {
    Bytes::from(vec![(part_number % 251) as u8; S3_MIN_PART_SIZE as usize])
}

#[tokio::test]
#[ignore = "requires an S3-compatible endpoint"]
async fn commit_after_more_than_one_listing_page() {
    let parts: u32 = std::env::var("S3_TEST_PARTS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1560);

    let store = S3MultipartStore::from_env().await.unwrap();
    let manager = UploadManager::new(store, MultipartConfig::default());
    let key = format!("dog-multipart-tests/{}.bin", uuid::Uuid::new_v4());
    let size = u64::from(parts) * S3_MIN_PART_SIZE;

    let metadata = manager
        .initialize_upload(UploadRequest::new(key.clone(), size).with_part_size(S3_MIN_PART_SIZE))
        .await
        .unwrap();
    assert_eq!(metadata.parts, parts);

    let links = manager.links(&metadata).await.unwrap();
    assert_eq!(links.len(), parts as usize);

    let session = manager.open(&metadata).unwrap();
    let uploaded = session
        .upload_parts((1..parts).map(|n| (n, part_body(n))), 16)
        .await
        .unwrap();
    assert_eq!(uploaded.len(), parts as usize - 1);

    // Last part still missing
    match manager.commit_upload(&metadata).await {
        Err(MultipartError::IncompleteUpload { missing, .. }) => assert_eq!(missing, vec![parts]),
        other => panic!("expected IncompleteUpload, got {other:?}"),
    }

    session.upload_part(parts, part_body(parts)).await.unwrap();
    assert_eq!(session.get_parts(None).await.unwrap().len(), parts as usize);

    let receipt = manager.commit_upload(&metadata).await.unwrap();
    assert_eq!(receipt.size_bytes, size);
    assert!(receipt.has_multipart_etag());

    let stored = manager.read_object(&key).await.unwrap();
    assert_eq!(stored.len() as u64, size);
}

#[tokio::test]
#[ignore = "requires an S3-compatible endpoint"]
async fn abort_with_zero_parts() {
    let store = S3MultipartStore::from_env().await.unwrap();
    let manager = UploadManager::new(store, MultipartConfig::default());

    let key = format!("dog-multipart-tests/{}.bin", uuid::Uuid::new_v4());
    let metadata = manager
        .initialize_upload(UploadRequest::new(key, 12 << 20).with_part_size(7 << 20))
        .await
        .unwrap();

    manager.abort_upload(&metadata).await.unwrap();
    assert!(matches!(
        manager.open(&metadata).unwrap().get_parts(None).await,
        Err(MultipartError::NotFound { .. })
    ));
}
