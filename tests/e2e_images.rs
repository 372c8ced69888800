//! E2E tests for the image feed

mod common;

use common::TestServer;
use pixora::api::PageRequest;
use pixora::data::ImagePatch;

#[tokio::test]
async fn test_feed_first_page_replaces_local_list() {
    let server = TestServer::new().await;
    let client = server.signed_in().await;

    let page = client.images.feed(PageRequest::first(20)).await.unwrap();

    assert_eq!(page.items.len(), 2);
    let ids: Vec<String> = client.images.images().await.into_iter().map(|i| i.id).collect();
    assert_eq!(ids, vec!["img-a", "img-b"]);
    assert!(!client.images.has_more().await);
    assert!(client.images.load_more().await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_removes_image_locally() {
    let server = TestServer::new().await;
    let client = server.signed_in().await;
    client.images.feed(PageRequest::first(20)).await.unwrap();

    client.images.delete_image("img-a").await.unwrap();

    let ids: Vec<String> = client.images.images().await.into_iter().map(|i| i.id).collect();
    assert_eq!(ids, vec!["img-b"]);
}

#[tokio::test]
async fn test_failed_delete_restores_position() {
    let server = TestServer::new().await;
    let client = server.signed_in().await;
    client.images.feed(PageRequest::first(20)).await.unwrap();
    server.fail("DELETE", "/api/images/img-a");

    assert!(client.images.delete_image("img-a").await.is_err());

    let ids: Vec<String> = client.images.images().await.into_iter().map(|i| i.id).collect();
    assert_eq!(ids, vec!["img-a", "img-b"]);
}

#[tokio::test]
async fn test_update_replaces_local_copy() {
    let server = TestServer::new().await;
    let client = server.signed_in().await;
    client.images.feed(PageRequest::first(20)).await.unwrap();

    let patch = ImagePatch {
        title: Some("Harbor at dusk".to_string()),
        ..Default::default()
    };
    client.images.update_image("img-a", &patch).await.unwrap();

    let images = client.images.images().await;
    assert_eq!(images[0].title, "Harbor at dusk");
}

#[tokio::test]
async fn test_blank_title_is_rejected() {
    let server = TestServer::new().await;
    let client = server.signed_in().await;

    let patch = ImagePatch {
        title: Some("  ".to_string()),
        ..Default::default()
    };

    assert!(client.images.update_image("img-a", &patch).await.is_err());
    assert_eq!(server.hits("PUT", "/api/images/img-a"), 0);
}
