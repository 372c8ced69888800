//! E2E tests for the reel feed

mod common;

use common::TestServer;
use pixora::error::ClientError;
use pixora::service::ReelVideo;

const MP4: &[u8] = &[0, 0, 0, 0x18, b'f', b't', b'y', b'p'];

fn video() -> ReelVideo {
    ReelVideo {
        file_name: "clip.mp4".to_string(),
        content_type: "video/mp4".to_string(),
        bytes: MP4.to_vec(),
    }
}

async fn paged_client(server: &TestServer) -> pixora::Pixora {
    let mut config = server.config();
    config.pagination.default_limit = 2;
    server.signed_in_with(config).await
}

#[tokio::test]
async fn test_feed_loads_first_page() {
    let server = TestServer::new().await;
    let client = paged_client(&server).await;

    let reels = client.reels.fetch_feed(true).await.unwrap();

    let ids: Vec<&str> = reels.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["r1", "r2"]);
    assert!(client.reels.has_more().await);
}

#[tokio::test]
async fn test_load_more_appends_until_exhausted() {
    let server = TestServer::new().await;
    let client = paged_client(&server).await;
    client.reels.fetch_feed(true).await.unwrap();

    assert_eq!(client.reels.load_more().await.unwrap(), 1);
    assert!(!client.reels.has_more().await);
    assert_eq!(client.reels.reels().await.len(), 3);

    // Nothing left to ask for
    assert_eq!(client.reels.load_more().await.unwrap(), 0);
    assert_eq!(server.hits("GET", "/api/reels"), 2);
}

#[tokio::test]
async fn test_failed_feed_keeps_current_reels() {
    let server = TestServer::new().await;
    let client = paged_client(&server).await;
    client.reels.fetch_feed(true).await.unwrap();
    server.fail("GET", "/api/reels");

    assert!(client.reels.fetch_feed(true).await.is_err());
    assert!(client.reels.load_more().await.is_err());

    assert_eq!(client.reels.reels().await.len(), 2);
    assert!(client.reels.has_more().await);
}

#[tokio::test]
async fn test_reel_like_takes_server_count() {
    let server = TestServer::new().await;
    let client = server.signed_in().await;
    client.reels.fetch_feed(true).await.unwrap();

    assert!(client.reels.toggle_like("r1").await.unwrap());

    let reel = client.reels.reels().await.remove(0);
    assert!(reel.is_liked);
    assert_eq!(reel.likes_count, 4);
    assert_eq!(server.hits("POST", "/api/reels/r1/like"), 1);
}

#[tokio::test]
async fn test_failed_reel_like_rolls_back() {
    let server = TestServer::new().await;
    let client = server.signed_in().await;
    client.reels.fetch_feed(true).await.unwrap();
    server.fail("POST", "/api/reels/r1/like");

    assert!(client.reels.toggle_like("r1").await.is_err());

    let reel = client.reels.reels().await.remove(0);
    assert!(!reel.is_liked);
    assert_eq!(reel.likes_count, 3);
}

#[tokio::test]
async fn test_failed_reel_save_rolls_back() {
    let server = TestServer::new().await;
    let client = server.signed_in().await;
    client.reels.fetch_feed(true).await.unwrap();
    assert!(client.reels.toggle_save("r2").await.unwrap());
    server.fail("POST", "/api/reels/r2/save");

    assert!(client.reels.toggle_save("r2").await.is_err());

    let reel = client.reels.reels().await.remove(1);
    assert!(reel.is_saved);
    assert_eq!(reel.saves_count, 2);
    // The like counter is untouched
    assert_eq!(reel.likes_count, 3);
}

#[tokio::test]
async fn test_toggle_rejects_unsaved_reel() {
    let server = TestServer::new().await;
    let client = server.signed_in().await;

    let error = client.reels.toggle_like("temp-1").await.unwrap_err();

    assert!(matches!(error, ClientError::Validation(_)));
    assert_eq!(server.hits("POST", "/api/reels/temp-1/like"), 0);
}

#[tokio::test]
async fn test_uploaded_reel_goes_to_top() {
    let server = TestServer::new().await;
    let client = server.signed_in().await;
    client.reels.fetch_feed(true).await.unwrap();

    let reel = client.reels.upload_reel(video(), "Morning tide").await.unwrap();

    let reels = client.reels.reels().await;
    assert_eq!(reels.len(), 4);
    assert_eq!(reels[0].id, reel.id);
    assert_eq!(server.hits("POST", "/api/reels"), 1);
}

#[tokio::test]
async fn test_failed_reel_upload_leaves_feed() {
    let server = TestServer::new().await;
    let client = server.signed_in().await;
    client.reels.fetch_feed(true).await.unwrap();
    server.fail("POST", "/api/reels");

    assert!(client.reels.upload_reel(video(), "Morning tide").await.is_err());

    assert_eq!(client.reels.reels().await.len(), 3);
}

#[tokio::test]
async fn test_reel_upload_needs_a_video() {
    let server = TestServer::new().await;
    let client = server.signed_in().await;
    let mut image = video();
    image.content_type = "image/png".to_string();

    let error = client.reels.upload_reel(image, "").await.unwrap_err();

    assert!(matches!(error, ClientError::Validation(_)));
    assert_eq!(server.hits("POST", "/api/reels"), 0);
}

#[tokio::test]
async fn test_reel_upload_requires_session() {
    let server = TestServer::new().await;
    let client = server.client();

    assert!(client.reels.upload_reel(video(), "").await.is_err());
    assert_eq!(server.hits("POST", "/api/reels"), 0);
}
