use bytes::Bytes;
use dog_multipart::prelude::*;
use dog_multipart::DEFAULT_LIST_PAGE_SIZE;
use tokio::task::JoinSet;
use tokio_test::{assert_err, assert_ok};

const MB: u64 = 1 << 20;

fn payload(len: u64) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn chunk(data: &[u8], metadata: &UploadMetadata, part_number: u32) -> Bytes {
    let range = metadata.plan().unwrap().part_range(part_number).unwrap();
    Bytes::copy_from_slice(&data[range.start as usize..range.end as usize])
}

#[tokio::test]
async fn twelve_megabytes_in_two_parts() {
    let store = MemoryMultipartStore::new("media").with_min_part_size(5 * MB);
    let manager = UploadManager::new(store.clone(), MultipartConfig::default());
    let data = payload(12 * MB);

    let metadata = manager
        .initialize_upload(UploadRequest::new("videos/clip.mp4", 12 * MB).with_part_size(7 * MB))
        .await
        .unwrap();
    assert_eq!(metadata.parts, 2);

    // Nothing uploaded yet
    let err = assert_err!(manager.commit_upload(&metadata).await);
    match &err {
        MultipartError::IncompleteUpload { confirmed, expected, missing, .. } => {
            assert_eq!(*confirmed, 0);
            assert_eq!(*expected, 2);
            assert_eq!(missing, &vec![1, 2]);
        }
        other => panic!("expected IncompleteUpload, got {other:?}"),
    }
    assert!(err.is_resumable());

    let session = manager.open(&metadata).unwrap();
    assert_ok!(session.upload_part(1, chunk(&data, &metadata, 1)).await);

    // One of two parts
    let err = assert_err!(manager.commit_upload(&metadata).await);
    assert!(matches!(err, MultipartError::IncompleteUpload { confirmed: 1, ref missing, .. } if missing == &vec![2]));
    assert_eq!(session.get_parts(None).await.unwrap().len(), 1);

    assert_ok!(session.upload_part(2, chunk(&data, &metadata, 2)).await);
    let parts = session.get_parts(Some(2)).await.unwrap();
    assert_eq!(parts.iter().map(|p| p.part_number).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(parts[1].size, Some(5 * MB));

    let receipt = assert_ok!(manager.commit_upload(&metadata).await);
    assert_eq!(receipt.size_bytes, 12 * MB);
    assert_eq!(receipt.parts, 2);
    assert!(receipt.has_multipart_etag());

    let stored = manager.read_object("videos/clip.mp4").await.unwrap();
    assert_eq!(stored.len(), data.len());
    assert_eq!(&stored[..], &data[..]);
    assert_eq!(store.open_uploads(), 0);
}

#[tokio::test]
async fn clients_upload_through_presigned_links() {
    let store = MemoryMultipartStore::new("media");
    let manager = UploadManager::new(store.clone(), MultipartConfig::default());
    let data = payload(12 * MB);

    let metadata = manager
        .initialize_upload(UploadRequest::new("clip.bin", 12 * MB).with_parts(2))
        .await
        .unwrap();

    let links = manager.links(&metadata).await.unwrap();
    assert_eq!(links.len(), 2);
    assert_eq!(links.iter().map(|l| l.part).collect::<Vec<_>>(), vec![1, 2]);
    assert!(links.iter().all(|l| !l.is_expired()));

    for link in &links {
        assert_ok!(store.put_presigned(&link.url, chunk(&data, &metadata, link.part)).await);
    }

    assert_ok!(manager.commit_upload(&metadata).await);
    assert_eq!(&manager.read_object("clip.bin").await.unwrap()[..], &data[..]);
}

#[tokio::test]
async fn metadata_survives_a_round_trip_through_clients() {
    let manager = UploadManager::new(MemoryMultipartStore::new("media"), MultipartConfig::default());
    let metadata = manager
        .initialize_upload(UploadRequest::new("doc.pdf", 9 * MB).with_part_size(5 * MB))
        .await
        .unwrap();

    let json = metadata.to_json().unwrap();
    assert!(json.contains("\"uploadId\""));
    assert!(json.contains("\"partSize\""));

    let restored = UploadMetadata::from_json(&json).unwrap();
    let session = manager.open(&restored).unwrap();
    assert_ok!(session.upload_part(1, Bytes::from(payload(5 * MB))).await);
    assert_ok!(session.upload_part(2, Bytes::from(payload(4 * MB))).await);
    assert_ok!(manager.commit_upload(&restored).await);
}

#[tokio::test]
async fn concurrent_part_uploads_all_land() {
    let store = MemoryMultipartStore::new("media");
    let config = MultipartConfig::default().with_min_part_size(1);
    let manager = UploadManager::new(store, config);
    let data = payload(64 * 1024);

    let metadata = manager
        .initialize_upload(UploadRequest::new("burst.bin", data.len() as u64).with_part_size(1024))
        .await
        .unwrap();
    assert_eq!(metadata.parts, 64);

    let mut tasks = JoinSet::new();
    for part_number in (1..=metadata.parts).rev() {
        let session = manager.open(&metadata).unwrap();
        let body = chunk(&data, &metadata, part_number);
        tasks.spawn(async move { session.upload_part(part_number, body).await });
    }
    while let Some(joined) = tasks.join_next().await {
        assert_ok!(joined.unwrap());
    }

    let parts = manager.open(&metadata).unwrap().get_parts(None).await.unwrap();
    assert_eq!(parts.len(), 64);
    assert!(parts.windows(2).all(|w| w[0].part_number < w[1].part_number));

    assert_ok!(manager.commit_upload(&metadata).await);
    assert_eq!(&manager.read_object("burst.bin").await.unwrap()[..], &data[..]);
}

#[tokio::test]
async fn commit_sees_parts_beyond_the_first_listing_page() {
    let store = MemoryMultipartStore::new("media");
    assert!(1560 > DEFAULT_LIST_PAGE_SIZE);
    let manager = UploadManager::new(store, MultipartConfig::default().with_min_part_size(1));
    let data = payload(1560);

    let metadata = manager
        .initialize_upload(UploadRequest::new("many.bin", 1560).with_part_size(1))
        .await
        .unwrap();
    assert_eq!(metadata.parts, 1560);

    let session = manager.open(&metadata).unwrap();
    let parts = (1..=1560u32).map(|n| (n, chunk(&data, &metadata, n)));
    let uploaded = session.upload_parts(parts, 32).await.unwrap();
    assert_eq!(uploaded.len(), 1560);

    // Listing crosses the page boundary
    let all = session.get_parts(None).await.unwrap();
    assert_eq!(all.len(), 1560);
    assert_eq!(all.last().map(|p| p.part_number), Some(1560));

    let receipt = assert_ok!(manager.commit_upload(&metadata).await);
    assert_eq!(receipt.parts, 1560);
    assert_eq!(&manager.read_object("many.bin").await.unwrap()[..], &data[..]);
}

#[tokio::test]
async fn missing_part_on_the_second_page_blocks_commit() {
    let store = MemoryMultipartStore::new("media");
    let manager = UploadManager::new(store, MultipartConfig::default().with_min_part_size(1));

    let metadata = manager
        .initialize_upload(UploadRequest::new("gap.bin", 1560).with_part_size(1))
        .await
        .unwrap();
    let session = manager.open(&metadata).unwrap();
    let parts = (1..=1560u32)
        .filter(|n| *n != 1500)
        .map(|n| (n, Bytes::from_static(b"x")));
    assert_ok!(session.upload_parts(parts, 32).await);

    let err = assert_err!(manager.commit_upload(&metadata).await);
    match err {
        MultipartError::IncompleteUpload { confirmed, missing, .. } => {
            assert_eq!(confirmed, 1559);
            assert_eq!(missing, vec![1500]);
        }
        other => panic!("expected IncompleteUpload, got {other:?}"),
    }

    // Still resumable
    assert_ok!(session.upload_part(1500, Bytes::from_static(b"x")).await);
    assert_ok!(manager.commit_upload(&metadata).await);
}

#[tokio::test]
async fn abort_without_parts_then_upload_is_gone() {
    let store = MemoryMultipartStore::new("media");
    let manager = UploadManager::new(store.clone(), MultipartConfig::default());

    let metadata = manager
        .initialize_upload(UploadRequest::new("aborted.bin", 12 * MB).with_part_size(7 * MB))
        .await
        .unwrap();
    assert_eq!(store.open_uploads(), 1);

    assert_ok!(manager.abort_upload(&metadata).await);
    assert_eq!(store.open_uploads(), 0);

    let session = manager.open(&metadata).unwrap();
    assert!(matches!(
        session.get_parts(None).await,
        Err(MultipartError::NotFound { .. })
    ));
    assert!(matches!(
        session.upload_part(2, Bytes::from(payload(5 * MB))).await,
        Err(MultipartError::NotFound { .. })
    ));
    assert!(matches!(
        manager.commit_upload(&metadata).await,
        Err(MultipartError::NotFound { .. })
    ));
    assert!(matches!(
        manager.abort_upload(&metadata).await,
        Err(MultipartError::NotFound { .. })
    ));
    assert!(matches!(
        manager.links(&metadata).await,
        Err(MultipartError::NotFound { .. })
    ));
}

#[tokio::test]
async fn committed_upload_cannot_be_reused() {
    let manager = UploadManager::new(MemoryMultipartStore::new("media"), MultipartConfig::default());
    let metadata = manager
        .initialize_upload(UploadRequest::new("once.txt", 5))
        .await
        .unwrap();

    let session = manager.open(&metadata).unwrap();
    assert_ok!(session.upload_part(1, Bytes::from_static(b"hello")).await);
    assert_ok!(session.commit().await);

    assert!(matches!(session.commit().await, Err(MultipartError::NotFound { .. })));
    assert!(matches!(session.abort().await, Err(MultipartError::NotFound { .. })));
    assert!(matches!(session.links().await, Err(MultipartError::NotFound { .. })));
}

#[tokio::test]
async fn whole_content_writes_are_refused() {
    let manager = UploadManager::new(MemoryMultipartStore::new("media"), MultipartConfig::default());
    let metadata = manager
        .initialize_upload(UploadRequest::new("doc.txt", 5))
        .await
        .unwrap();

    let session = manager.open(&metadata).unwrap();
    let err = assert_err!(session.set_content(Bytes::from_static(b"hello")).await);
    assert!(matches!(err, MultipartError::NotSupported { .. }));

    // Refusal leaves the upload untouched
    assert!(session.get_parts(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn planless_sessions_upload_but_cannot_commit() {
    let manager = UploadManager::new(MemoryMultipartStore::new("media"), MultipartConfig::default());
    let metadata = manager
        .initialize_upload(UploadRequest::new("raw.bin", 5))
        .await
        .unwrap();

    let session = manager.session("raw.bin", metadata.upload_id.clone());
    assert!(session.plan().is_none());
    assert_ok!(session.upload_part(1, Bytes::from_static(b"hello")).await);
    assert!(matches!(session.commit().await, Err(MultipartError::Validation { .. })));
    assert!(matches!(session.links().await, Err(MultipartError::Validation { .. })));

    assert_ok!(manager.commit_upload(&metadata).await);
}
