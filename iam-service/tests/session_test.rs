mod common;

use chrono::Duration;
use common::{meta, TestApp};
use iam_service::models::RevocationReason;
use iam_service::services::AuthError;
use iam_service::store::RefreshTokenStore;
use uuid::Uuid;

#[tokio::test]
async fn list_marks_the_current_session() {
    let app = TestApp::new().await;
    app.register("alice@example.com").await;
    let laptop = app.login("alice@example.com").await;
    let phone = app.login("alice@example.com").await;
    let principal = app.resolve(&laptop.access_token).await.unwrap();

    let sessions = app.core.auth.list_sessions(&principal).await.unwrap();
    assert_eq!(sessions.len(), 2);
    let current: Vec<_> = sessions.iter().filter(|s| s.is_current).collect();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].session_id, laptop.session_id);
    assert!(sessions.iter().any(|s| s.session_id == phone.session_id));
    assert_eq!(current[0].ip_address.as_deref(), Some("10.0.0.7"));
}

#[tokio::test]
async fn revoke_all_except_current_keeps_the_caller() {
    let app = TestApp::new().await;
    app.register("alice@example.com").await;
    let keep = app.login("alice@example.com").await;
    let other_a = app.login("alice@example.com").await;
    let other_b = app.login("alice@example.com").await;
    let principal = app.resolve(&keep.access_token).await.unwrap();

    let revoked = app
        .core
        .auth
        .revoke_all_sessions(&principal, true, &meta())
        .await
        .unwrap();
    assert_eq!(revoked, 2);

    app.resolve(&keep.access_token).await.unwrap();
    assert!(app.resolve(&other_a.access_token).await.is_err());
    assert!(app.resolve(&other_b.access_token).await.is_err());

    let revoked = app
        .core
        .auth
        .revoke_all_sessions(&principal, false, &meta())
        .await
        .unwrap();
    assert_eq!(revoked, 1);
    assert!(matches!(
        app.resolve(&keep.access_token).await,
        Err(AuthError::SessionRevoked)
    ));
}

#[tokio::test]
async fn user_can_revoke_only_their_own_sessions() {
    let app = TestApp::new().await;
    app.register("alice@example.com").await;
    app.register("bob@example.com").await;
    let alice_pair = app.login("alice@example.com").await;
    let alice_phone = app.login("alice@example.com").await;
    let bob_pair = app.login("bob@example.com").await;
    let alice = app.resolve(&alice_pair.access_token).await.unwrap();
    let bob = app.resolve(&bob_pair.access_token).await.unwrap();

    assert!(matches!(
        app.core
            .auth
            .revoke_session(&bob, alice_phone.session_id, &meta())
            .await,
        Err(AuthError::NotFound(_))
    ));
    app.resolve(&alice_phone.access_token).await.unwrap();

    app.core
        .auth
        .revoke_session(&alice, alice_phone.session_id, &meta())
        .await
        .unwrap();
    assert!(app.resolve(&alice_phone.access_token).await.is_err());
    app.resolve(&alice_pair.access_token).await.unwrap();

    assert!(matches!(
        app.core
            .auth
            .revoke_session(&alice, Uuid::new_v4(), &meta())
            .await,
        Err(AuthError::NotFound(_))
    ));
}

#[tokio::test]
async fn admin_revoke_needs_permission() {
    let app = TestApp::new().await;
    app.register("admin@example.com").await;
    app.register("bob@example.com").await;
    let admin_pair = app.login("admin@example.com").await;
    let bob_pair = app.login("bob@example.com").await;
    let admin = app.resolve(&admin_pair.access_token).await.unwrap();
    let bob = app.resolve(&bob_pair.access_token).await.unwrap();

    assert!(matches!(
        app.core
            .auth
            .admin_revoke_session(&bob, admin_pair.session_id, &meta())
            .await,
        Err(AuthError::Forbidden)
    ));

    app.core
        .auth
        .admin_revoke_session(&admin, bob_pair.session_id, &meta())
        .await
        .unwrap();
    assert!(matches!(
        app.resolve(&bob_pair.access_token).await,
        Err(AuthError::SessionRevoked)
    ));
}

#[tokio::test]
async fn revoke_is_idempotent_and_keeps_the_first_reason() {
    let app = TestApp::new().await;
    app.register("alice@example.com").await;
    let pair = app.login("alice@example.com").await;
    let tenant = app.tenant.tenant_id;
    let sessions = &app.core.sessions;

    assert!(sessions
        .revoke(tenant, pair.session_id, RevocationReason::UserLogout)
        .await
        .unwrap());
    assert!(!sessions
        .revoke(tenant, pair.session_id, RevocationReason::AdminRevoked)
        .await
        .unwrap());

    let session = sessions.get(tenant, pair.session_id).await.unwrap().unwrap();
    assert_eq!(session.revocation_reason_code.as_deref(), Some("user_logout"));
}

#[tokio::test]
async fn sweep_moves_expired_sessions_to_revoked() {
    let app = TestApp::new().await;
    app.register("alice@example.com").await;
    let pair = app.login("alice@example.com").await;
    let tenant = app.tenant.tenant_id;

    assert_eq!(app.core.sessions.sweep_expired().await.unwrap(), 0);
    app.advance(Duration::days(7) + Duration::seconds(1));
    assert_eq!(app.core.sessions.sweep_expired().await.unwrap(), 1);

    let session = app
        .core
        .sessions
        .get(tenant, pair.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.revocation_reason_code.as_deref(), Some("expired"));
    assert!(!app.core.sessions.is_live(tenant, pair.session_id).await.unwrap());
}

#[tokio::test]
async fn purge_drops_expired_refresh_tokens() {
    let app = TestApp::new().await;
    app.register("alice@example.com").await;
    let pair = app.login("alice@example.com").await;

    app.advance(Duration::days(8));
    iam_service::tasks::purge_expired(&app.core).await.unwrap();

    let (tenant_part, rest) = pair.refresh_token.split_once('.').unwrap();
    let token_id: Uuid = rest.split('.').next().unwrap().parse().unwrap();
    let tenant_id: Uuid = tenant_part.parse().unwrap();
    let record = app
        .core
        .stores
        .refresh_tokens
        .get_refresh_token(tenant_id, token_id)
        .await
        .unwrap();
    assert!(record.is_none());
}
