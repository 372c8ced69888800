//! E2E tests for likes and favorites

mod common;

use common::TestServer;
use pixora::error::ClientError;
use pixora::state::InteractionKind;

#[tokio::test]
async fn test_like_toggle_is_confirmed() {
    let server = TestServer::new().await;
    let client = server.signed_in().await;

    let liked = client.interactions.toggle_like("img1").await.unwrap();

    assert!(liked);
    assert_eq!(
        client.interactions.cached(InteractionKind::Like, "img1").await,
        Some(true)
    );
    assert_eq!(
        client
            .interactions
            .cached_count(InteractionKind::Like, "img1")
            .await,
        Some(1)
    );

    let liked = client.interactions.toggle_like("img1").await.unwrap();
    assert!(!liked);
    assert_eq!(
        client.interactions.cached(InteractionKind::Like, "img1").await,
        Some(false)
    );
}

#[tokio::test]
async fn test_failed_like_toggle_rolls_back() {
    let server = TestServer::new().await;
    let client = server.signed_in().await;
    server.fail("POST", "/api/likes/img1/toggle");

    let result = client.interactions.toggle_like("img1").await;

    assert!(result.is_err());
    assert_eq!(
        client.interactions.cached(InteractionKind::Like, "img1").await,
        None
    );
}

#[tokio::test]
async fn test_failed_toggle_restores_previous_value() {
    let server = TestServer::new().await;
    let client = server.signed_in().await;
    client.interactions.toggle_like("img1").await.unwrap();
    server.fail("POST", "/api/likes/img1/toggle");

    assert!(client.interactions.toggle_like("img1").await.is_err());

    assert_eq!(
        client.interactions.cached(InteractionKind::Like, "img1").await,
        Some(true)
    );
}

#[tokio::test]
async fn test_like_status_is_memoized() {
    let server = TestServer::new().await;
    let client = server.signed_in().await;

    assert!(!client.interactions.check_like_status("img2").await.unwrap());
    assert!(!client.interactions.check_like_status("img2").await.unwrap());

    assert_eq!(server.hits("GET", "/api/likes/img2/status"), 1);
}

#[tokio::test]
async fn test_toggle_answers_later_status_checks() {
    let server = TestServer::new().await;
    let client = server.signed_in().await;
    client.interactions.toggle_like("img3").await.unwrap();

    assert!(client.interactions.check_like_status("img3").await.unwrap());
    assert_eq!(server.hits("GET", "/api/likes/img3/status"), 0);
}

#[tokio::test]
async fn test_temp_image_ids_are_rejected() {
    let server = TestServer::new().await;
    let client = server.signed_in().await;

    let error = client
        .interactions
        .toggle_favorite("temp-01HX")
        .await
        .unwrap_err();

    assert!(matches!(error, ClientError::Validation(_)));
}

#[tokio::test]
async fn test_logout_forgets_interactions() {
    let server = TestServer::new().await;
    let client = server.signed_in().await;
    client.interactions.toggle_like("img1").await.unwrap();

    client.logout().await;

    assert_eq!(
        client.interactions.cached(InteractionKind::Like, "img1").await,
        None
    );
}

#[tokio::test]
async fn test_favorite_toggle_is_confirmed() {
    let server = TestServer::new().await;
    let client = server.signed_in().await;

    assert!(client.interactions.toggle_favorite("img1").await.unwrap());

    assert_eq!(
        client
            .interactions
            .cached(InteractionKind::Favorite, "img1")
            .await,
        Some(true)
    );
    assert_eq!(
        client
            .interactions
            .cached_count(InteractionKind::Favorite, "img1")
            .await,
        Some(1)
    );
    // Likes are tracked separately
    assert_eq!(
        client.interactions.cached(InteractionKind::Like, "img1").await,
        None
    );
}

#[tokio::test]
async fn test_failed_favorite_toggle_restores_previous_value() {
    let server = TestServer::new().await;
    let client = server.signed_in().await;
    client.interactions.toggle_favorite("img1").await.unwrap();
    server.fail("POST", "/api/favorites/img1/toggle");

    assert!(client.interactions.toggle_favorite("img1").await.is_err());

    assert_eq!(
        client
            .interactions
            .cached(InteractionKind::Favorite, "img1")
            .await,
        Some(true)
    );
}

#[tokio::test]
async fn test_favorite_status_is_memoized() {
    let server = TestServer::new().await;
    let client = server.signed_in().await;

    assert!(!client.interactions.check_favorite_status("img2").await.unwrap());
    assert!(!client.interactions.check_favorite_status("img2").await.unwrap());

    assert_eq!(server.hits("GET", "/api/favorites/img2/status"), 1);
}

#[tokio::test]
async fn test_failed_favorite_status_is_not_cached() {
    let server = TestServer::new().await;
    let client = server.signed_in().await;
    server.fail("GET", "/api/favorites/img2/status");

    assert!(client.interactions.check_favorite_status("img2").await.is_err());
    assert_eq!(
        client
            .interactions
            .cached(InteractionKind::Favorite, "img2")
            .await,
        None
    );

    server.recover("GET", "/api/favorites/img2/status");
    assert!(!client.interactions.check_favorite_status("img2").await.unwrap());
    assert_eq!(server.hits("GET", "/api/favorites/img2/status"), 2);
}
