mod common;

use chrono::Duration;
use common::{meta, TestApp, PASSWORD};
use iam_service::models::AuthType;
use iam_service::services::{AuthError, ProfileUpdate, RegisterInput};
use iam_service::utils::Password;

#[tokio::test]
async fn register_login_and_resolve() {
    let app = TestApp::new().await;
    let alice = app.register("alice@example.com").await;
    assert_eq!(alice.email, "alice@example.com");
    assert_eq!(alice.username, "alice");

    let pair = app.login("alice@example.com").await;
    assert_eq!(pair.token_type, "Bearer");
    assert!(pair.expires_in > 0);

    let principal = app.resolve(&pair.access_token).await.unwrap();
    assert_eq!(principal.user_id, alice.user_id);
    assert_eq!(principal.tenant_id, app.tenant.tenant_id);
    assert_eq!(principal.auth_type, AuthType::Access);
    assert_eq!(principal.session_id, Some(pair.session_id));
}

#[tokio::test]
async fn first_user_of_tenant_becomes_admin() {
    let app = TestApp::new().await;
    let first = app.register("first@example.com").await;
    let second = app.register("second@example.com").await;

    let rbac = &app.core.rbac;
    let tenant = app.tenant.tenant_id;
    assert_eq!(
        rbac.role_names(tenant, first.user_id).await.unwrap(),
        vec!["admin".to_string(), "member".to_string()]
    );
    assert_eq!(
        rbac.role_names(tenant, second.user_id).await.unwrap(),
        vec!["member".to_string()]
    );
}

#[tokio::test]
async fn email_is_normalized_and_unique_per_tenant() {
    let app = TestApp::new().await;
    app.register("Alice@Example.COM").await;
    app.login("alice@example.com").await;

    let err = app
        .core
        .auth
        .register(
            RegisterInput {
                tenant_id: app.tenant.tenant_id,
                email: "alice@example.com".into(),
                password: Password::new(PASSWORD.into()),
                username: None,
                display_name: None,
            },
            &meta(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::EmailInUse));
}

#[tokio::test]
async fn derived_username_collision_gets_a_suffix() {
    let app = TestApp::new().await;
    let a = app.register("sam@example.com").await;
    let b = app.register("sam@example.org").await;
    assert_eq!(a.username, "sam");
    assert!(b.username.starts_with("sam-"));
    assert_ne!(a.username, b.username);
}

#[tokio::test]
async fn weak_password_is_rejected() {
    let app = TestApp::new().await;
    let err = app
        .core
        .auth
        .register(
            RegisterInput {
                tenant_id: app.tenant.tenant_id,
                email: "weak@example.com".into(),
                password: Password::new("short".into()),
                username: None,
                display_name: None,
            },
            &meta(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::WeakPassword(_)));
    assert_eq!(err.code(), "weak_password");
}

#[tokio::test]
async fn login_failures_share_one_public_error() {
    let app = TestApp::new().await;
    app.register("alice@example.com").await;

    let wrong = app
        .login_in(&app.tenant, "alice@example.com", "Wrong!Password1")
        .await
        .unwrap_err();
    let unknown = app
        .login_in(&app.tenant, "nobody@example.com", PASSWORD)
        .await
        .unwrap_err();

    assert!(matches!(wrong, AuthError::InvalidCredentials));
    assert!(matches!(unknown, AuthError::InvalidCredentials));
    assert_eq!(wrong.code(), unknown.code());
    assert_eq!(wrong.public_message(), unknown.public_message());
}

#[tokio::test]
async fn lockout_after_repeated_failures_then_expires() {
    let app = TestApp::new().await;
    app.register("alice@example.com").await;

    for _ in 0..5 {
        app.advance(Duration::seconds(10));
        let err = app
            .login_in(&app.tenant, "alice@example.com", "Wrong!Password1")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    // Correct password is refused while locked, with the generic public error.
    let err = app
        .login_in(&app.tenant, "alice@example.com", PASSWORD)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::AccountLocked));
    assert_eq!(err.code(), "invalid_credentials");
    assert_eq!(err.public_message(), "invalid credentials");

    app.advance(Duration::minutes(14));
    assert!(app
        .login_in(&app.tenant, "alice@example.com", PASSWORD)
        .await
        .is_err());

    app.advance(Duration::minutes(2));
    app.login("alice@example.com").await;
}

#[tokio::test]
async fn successful_login_resets_failure_count() {
    let app = TestApp::new().await;
    app.register("alice@example.com").await;

    for _ in 0..4 {
        let _ = app
            .login_in(&app.tenant, "alice@example.com", "Wrong!Password1")
            .await;
    }
    app.login("alice@example.com").await;

    // Four more failures are again below the threshold.
    for _ in 0..4 {
        let _ = app
            .login_in(&app.tenant, "alice@example.com", "Wrong!Password1")
            .await;
    }
    app.login("alice@example.com").await;
}

#[tokio::test]
async fn same_email_in_two_tenants_stays_isolated() {
    let app = TestApp::new().await;
    let t1 = app.tenant.clone();
    let t2 = app.new_tenant("Globex").await;

    let alice = app.register_in(&t1, "alice@example.com", PASSWORD).await;
    let bob = app
        .register_in(&t2, "alice@example.com", "Bob!Secret#2026")
        .await;
    assert_ne!(alice.user_id, bob.user_id);

    app.login_in(&t1, "alice@example.com", PASSWORD).await.unwrap();
    assert!(matches!(
        app.login_in(&t1, "alice@example.com", "Bob!Secret#2026").await,
        Err(AuthError::InvalidCredentials)
    ));
    let pair = app
        .login_in(&t2, "alice@example.com", "Bob!Secret#2026")
        .await
        .unwrap();

    let principal = app.resolve(&pair.access_token).await.unwrap();
    assert_eq!(principal.tenant_id, t2.tenant_id);
    assert_eq!(principal.user_id, bob.user_id);

    // A tenant-1 principal cannot read a tenant-2 user.
    let alice_pair = app.login_in(&t1, "alice@example.com", PASSWORD).await.unwrap();
    let alice_principal = app.resolve(&alice_pair.access_token).await.unwrap();
    assert!(matches!(
        app.core.auth.get_user(&alice_principal, bob.user_id).await,
        Err(AuthError::NotFound(_))
    ));
}

#[tokio::test]
async fn access_token_must_match_the_tenant_hint() {
    use iam_service::services::Credential;

    let app = TestApp::new().await;
    app.register("alice@example.com").await;
    let pair = app.login("alice@example.com").await;
    let other = app.new_tenant("Globex").await;
    let credential = Credential::Access(pair.access_token.clone());

    assert!(matches!(
        app.core
            .principals
            .resolve(&credential, Some(other.tenant_id), None)
            .await,
        Err(AuthError::TenantMismatch(_))
    ));

    let principal = app
        .core
        .principals
        .resolve(&credential, Some(app.tenant.tenant_id), None)
        .await
        .unwrap();
    assert_eq!(principal.tenant_id, app.tenant.tenant_id);
}

#[tokio::test]
async fn suspended_tenant_blocks_login_and_resolution() {
    let app = TestApp::new().await;
    app.register("alice@example.com").await;
    let pair = app.login("alice@example.com").await;

    app.core
        .tenants
        .suspend_tenant(app.tenant.tenant_id)
        .await
        .unwrap();

    let err = app
        .login_in(&app.tenant, "alice@example.com", PASSWORD)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::TenantSuspended));
    assert_eq!(err.code(), "invalid_credentials");
    assert!(matches!(
        app.resolve(&pair.access_token).await,
        Err(AuthError::TenantSuspended)
    ));

    app.core
        .tenants
        .activate_tenant(app.tenant.tenant_id)
        .await
        .unwrap();
    app.resolve(&pair.access_token).await.unwrap();
}

#[tokio::test]
async fn logout_revokes_the_session_immediately() {
    let app = TestApp::new().await;
    app.register("alice@example.com").await;
    let pair = app.login("alice@example.com").await;
    let principal = app.resolve(&pair.access_token).await.unwrap();

    app.core.auth.logout(&principal, &meta()).await.unwrap();

    assert!(matches!(
        app.resolve(&pair.access_token).await,
        Err(AuthError::SessionRevoked)
    ));
    assert!(matches!(
        app.core.auth.refresh(&pair.refresh_token, &meta()).await,
        Err(AuthError::SessionRevoked)
    ));
}

#[tokio::test]
async fn access_token_expires_on_its_own_clock() {
    let app = TestApp::new().await;
    app.register("alice@example.com").await;
    let pair = app.login("alice@example.com").await;

    app.advance(Duration::minutes(16));
    assert!(matches!(
        app.resolve(&pair.access_token).await,
        Err(AuthError::TokenExpired)
    ));
}

#[tokio::test]
async fn change_password_revokes_every_session() {
    let app = TestApp::new().await;
    app.register("alice@example.com").await;
    let first = app.login("alice@example.com").await;
    let second = app.login("alice@example.com").await;
    let principal = app.resolve(&first.access_token).await.unwrap();

    let wrong = app
        .core
        .auth
        .change_password(
            &principal,
            &Password::new("not-the-password".into()),
            &Password::new("N3w!Password".into()),
            &meta(),
        )
        .await
        .unwrap_err();
    assert!(matches!(wrong, AuthError::InvalidCredentials));

    let revoked = app
        .core
        .auth
        .change_password(
            &principal,
            &Password::new(PASSWORD.into()),
            &Password::new("N3w!Password".into()),
            &meta(),
        )
        .await
        .unwrap();
    assert_eq!(revoked, 2);

    assert!(app.resolve(&first.access_token).await.is_err());
    assert!(app.resolve(&second.access_token).await.is_err());
    assert!(app
        .login_in(&app.tenant, "alice@example.com", PASSWORD)
        .await
        .is_err());
    app.login_in(&app.tenant, "alice@example.com", "N3w!Password")
        .await
        .unwrap();
}

#[tokio::test]
async fn profile_update_changes_display_name_and_username() {
    let app = TestApp::new().await;
    app.register("alice@example.com").await;
    let pair = app.login("alice@example.com").await;
    let principal = app.resolve(&pair.access_token).await.unwrap();

    let updated = app
        .core
        .auth
        .update_profile(
            &principal,
            ProfileUpdate {
                display_name: Some("  Alice Liddell ".into()),
                username: Some("Alice.L".into()),
            },
            &meta(),
        )
        .await
        .unwrap();
    assert_eq!(updated.display_name.as_deref(), Some("Alice Liddell"));
    assert_eq!(updated.username, "alice.l");

    let err = app
        .core
        .auth
        .update_profile(
            &principal,
            ProfileUpdate {
                username: Some("x".into()),
                ..Default::default()
            },
            &meta(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidInput(_)));
}

#[tokio::test]
async fn deactivated_user_loses_sessions_and_cannot_log_in() {
    let app = TestApp::new().await;
    app.register("admin@example.com").await;
    let bob = app.register("bob@example.com").await;

    let admin_pair = app.login("admin@example.com").await;
    let admin = app.resolve(&admin_pair.access_token).await.unwrap();
    let bob_pair = app.login("bob@example.com").await;
    let bob_principal = app.resolve(&bob_pair.access_token).await.unwrap();

    // A member may not deactivate anyone.
    assert!(matches!(
        app.core
            .auth
            .deactivate_user(&bob_principal, admin.user_id, &meta())
            .await,
        Err(AuthError::Forbidden)
    ));

    let revoked = app
        .core
        .auth
        .deactivate_user(&admin, bob.user_id, &meta())
        .await
        .unwrap();
    assert_eq!(revoked, 1);

    assert!(matches!(
        app.resolve(&bob_pair.access_token).await,
        Err(AuthError::SessionRevoked)
    ));
    assert!(matches!(
        app.login_in(&app.tenant, "bob@example.com", PASSWORD).await,
        Err(AuthError::UserInactive)
    ));

    // The email stays reserved.
    let err = app
        .core
        .auth
        .register(
            RegisterInput {
                tenant_id: app.tenant.tenant_id,
                email: "bob@example.com".into(),
                password: Password::new(PASSWORD.into()),
                username: Some("bob2".into()),
                display_name: None,
            },
            &meta(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::EmailInUse));
}

#[tokio::test]
async fn expired_deadline_aborts_before_work() {
    use iam_service::context::RequestMeta;
    use iam_service::utils::Deadline;

    let app = TestApp::new().await;
    app.register("alice@example.com").await;

    let expired = RequestMeta::new(Deadline::after(std::time::Duration::ZERO));
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let err = app
        .core
        .auth
        .login(
            app.tenant.tenant_id,
            "alice@example.com",
            &Password::new(PASSWORD.into()),
            &expired,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::DeadlineExceeded));
}
