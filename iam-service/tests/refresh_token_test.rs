mod common;

use chrono::Duration;
use common::{meta, TestApp};
use iam_service::services::AuthError;

#[tokio::test]
async fn refresh_rotates_and_keeps_the_session() {
    let app = TestApp::new().await;
    app.register("alice@example.com").await;
    let first = app.login("alice@example.com").await;

    app.advance(Duration::minutes(1));
    let second = app
        .core
        .auth
        .refresh(&first.refresh_token, &meta())
        .await
        .unwrap();

    assert_eq!(second.session_id, first.session_id);
    assert_ne!(second.refresh_token, first.refresh_token);
    assert_ne!(second.access_token, first.access_token);
    let principal = app.resolve(&second.access_token).await.unwrap();
    assert_eq!(principal.session_id, Some(first.session_id));

    // The rotated token is itself good for one more rotation.
    app.core
        .auth
        .refresh(&second.refresh_token, &meta())
        .await
        .unwrap();
}

#[tokio::test]
async fn reused_refresh_token_revokes_the_session() {
    let app = TestApp::new().await;
    app.register("alice@example.com").await;
    let (a1, r1) = {
        let pair = app.login("alice@example.com").await;
        (pair.access_token, pair.refresh_token)
    };

    let second = app.core.auth.refresh(&r1, &meta()).await.unwrap();
    let err = app.core.auth.refresh(&r1, &meta()).await.unwrap_err();
    assert!(matches!(err, AuthError::RefreshReused));
    assert_eq!(err.code(), "refresh_reused");

    assert!(matches!(
        app.resolve(&second.access_token).await,
        Err(AuthError::SessionRevoked)
    ));
    assert!(matches!(
        app.resolve(&a1).await,
        Err(AuthError::SessionRevoked)
    ));

    // The whole chain is dead, including the token minted by the legitimate rotation.
    assert!(app
        .core
        .auth
        .refresh(&second.refresh_token, &meta())
        .await
        .is_err());

    let session = app
        .core
        .sessions
        .get(app.tenant.tenant_id, second.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.revocation_reason_code.as_deref(), Some("refresh_reuse"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refresh_has_exactly_one_winner() {
    let app = TestApp::new().await;
    app.register("alice@example.com").await;
    let pair = app.login("alice@example.com").await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let auth = app.core.auth.clone();
        let token = pair.refresh_token.clone();
        handles.push(tokio::spawn(async move { auth.refresh(&token, &meta()).await }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(e) => assert!(matches!(e, AuthError::RefreshReused), "unexpected error: {e}"),
        }
    }
    assert_eq!(successes, 1);

    let session = app
        .core
        .sessions
        .get(app.tenant.tenant_id, pair.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.revocation_reason_code.as_deref(), Some("refresh_reuse"));
}

#[tokio::test]
async fn tampered_refresh_token_is_rejected_without_revoking() {
    let app = TestApp::new().await;
    app.register("alice@example.com").await;
    let pair = app.login("alice@example.com").await;

    let (head, _) = pair.refresh_token.rsplit_once('.').unwrap();
    let forged = format!("{}.{}", head, "A".repeat(43));
    assert!(app.core.auth.refresh(&forged, &meta()).await.is_err());
    assert!(app.core.auth.refresh("garbage", &meta()).await.is_err());

    app.resolve(&pair.access_token).await.unwrap();
    app.core
        .auth
        .refresh(&pair.refresh_token, &meta())
        .await
        .unwrap();
}

#[tokio::test]
async fn refresh_does_not_outlive_the_session() {
    let app = TestApp::new().await;
    app.register("alice@example.com").await;
    let pair = app.login("alice@example.com").await;

    app.advance(Duration::days(6));
    let rotated = app
        .core
        .auth
        .refresh(&pair.refresh_token, &meta())
        .await
        .unwrap();

    app.advance(Duration::days(1) + Duration::seconds(1));
    let err = app
        .core
        .auth
        .refresh(&rotated.refresh_token, &meta())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::TokenExpired | AuthError::SessionRevoked));
}

#[tokio::test]
async fn refresh_fails_for_deactivated_user() {
    let app = TestApp::new().await;
    app.register("admin@example.com").await;
    let bob = app.register("bob@example.com").await;
    let admin_pair = app.login("admin@example.com").await;
    let admin = app.resolve(&admin_pair.access_token).await.unwrap();
    let bob_pair = app.login("bob@example.com").await;

    app.core
        .auth
        .deactivate_user(&admin, bob.user_id, &meta())
        .await
        .unwrap();

    assert!(matches!(
        app.core.auth.refresh(&bob_pair.refresh_token, &meta()).await,
        Err(AuthError::SessionRevoked)
    ));
}
