mod common;

use chrono::Duration;
use common::{meta, TestApp, PASSWORD};
use iam_service::models::{MfaChallengeTicket, MfaEnrollment, Principal};
use iam_service::services::AuthError;
use iam_service::utils::Password;

/// Registers alice, enrolls and confirms a device. Returns her principal,
/// the enrollment and the recovery codes.
async fn enrolled_alice(app: &TestApp) -> (Principal, MfaEnrollment, Vec<String>) {
    app.register("alice@example.com").await;
    let pair = app.login("alice@example.com").await;
    let principal = app.resolve(&pair.access_token).await.unwrap();

    let enrollment = app.core.auth.enroll_mfa(&principal, &meta()).await.unwrap();
    assert!(enrollment.provisioning_uri.starts_with("otpauth://totp/"));

    let code = app.totp_code(&enrollment.secret_base32);
    let recovery = app
        .core
        .auth
        .confirm_mfa(&principal, enrollment.device_id, &code, &meta())
        .await
        .unwrap();
    assert_eq!(recovery.len(), 10);
    (principal, enrollment, recovery)
}

async fn password_step(app: &TestApp) -> MfaChallengeTicket {
    match app
        .login_in(&app.tenant, "alice@example.com", PASSWORD)
        .await
    {
        Err(AuthError::MfaRequired(ticket)) => ticket,
        other => panic!("expected mfa_required, got {:?}", other.map(|p| p.session_id)),
    }
}

#[tokio::test]
async fn login_right_after_confirming_accepts_the_current_code() {
    let app = TestApp::new().await;
    let (_, enrollment, _) = enrolled_alice(&app).await;
    app.advance(Duration::seconds(5));

    let ticket = password_step(&app).await;
    let code = app.totp_code(&enrollment.secret_base32);
    let pair = app
        .core
        .auth
        .verify_mfa(app.tenant.tenant_id, ticket.challenge_id, &code, &meta())
        .await
        .unwrap();
    app.resolve(&pair.access_token).await.unwrap();
}

#[tokio::test]
async fn login_requires_second_factor_and_rejects_replay() {
    let app = TestApp::new().await;
    let (_, enrollment, _) = enrolled_alice(&app).await;
    let tenant = app.tenant.tenant_id;

    let ticket = password_step(&app).await;
    let code = app.totp_code(&enrollment.secret_base32);
    let pair = app
        .core
        .auth
        .verify_mfa(tenant, ticket.challenge_id, &code, &meta())
        .await
        .unwrap();
    app.resolve(&pair.access_token).await.unwrap();

    // Same code, same step, new challenge.
    let ticket = password_step(&app).await;
    let err = app
        .core
        .auth
        .verify_mfa(tenant, ticket.challenge_id, &code, &meta())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MfaReplay));

    // The next step's code works.
    app.advance(Duration::seconds(30));
    let ticket = password_step(&app).await;
    let code = app.totp_code(&enrollment.secret_base32);
    app.core
        .auth
        .verify_mfa(tenant, ticket.challenge_id, &code, &meta())
        .await
        .unwrap();
}

#[tokio::test]
async fn challenge_is_single_use_even_after_a_wrong_code() {
    let app = TestApp::new().await;
    let (_, enrollment, _) = enrolled_alice(&app).await;
    let tenant = app.tenant.tenant_id;

    let ticket = password_step(&app).await;
    let err = app
        .core
        .auth
        .verify_mfa(tenant, ticket.challenge_id, "000000", &meta())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCode | AuthError::MfaReplay));

    let code = app.totp_code(&enrollment.secret_base32);
    assert!(matches!(
        app.core
            .auth
            .verify_mfa(tenant, ticket.challenge_id, &code, &meta())
            .await,
        Err(AuthError::ChallengeExpired)
    ));
}

#[tokio::test]
async fn challenge_expires() {
    let app = TestApp::new().await;
    let (_, enrollment, _) = enrolled_alice(&app).await;

    let ticket = password_step(&app).await;
    app.advance(Duration::minutes(6));
    let code = app.totp_code(&enrollment.secret_base32);
    assert!(matches!(
        app.core
            .auth
            .verify_mfa(app.tenant.tenant_id, ticket.challenge_id, &code, &meta())
            .await,
        Err(AuthError::ChallengeExpired)
    ));
}

#[tokio::test]
async fn recovery_code_works_once() {
    let app = TestApp::new().await;
    let (principal, _, recovery) = enrolled_alice(&app).await;
    let tenant = app.tenant.tenant_id;

    let ticket = password_step(&app).await;
    app.core
        .auth
        .verify_mfa(tenant, ticket.challenge_id, &recovery[0], &meta())
        .await
        .unwrap();
    assert_eq!(
        app.core
            .auth
            .recovery_codes_remaining(&principal)
            .await
            .unwrap(),
        9
    );

    let ticket = password_step(&app).await;
    assert!(matches!(
        app.core
            .auth
            .verify_mfa(tenant, ticket.challenge_id, &recovery[0], &meta())
            .await,
        Err(AuthError::InvalidCode)
    ));
}

#[tokio::test]
async fn regenerating_recovery_codes_invalidates_the_old_batch() {
    let app = TestApp::new().await;
    let (principal, enrollment, old_codes) = enrolled_alice(&app).await;

    let code = app.totp_code(&enrollment.secret_base32);
    let new_codes = app
        .core
        .auth
        .regenerate_recovery_codes(&principal, &code, &meta())
        .await
        .unwrap();
    assert_eq!(new_codes.len(), 10);
    app.advance(Duration::seconds(30));

    let ticket = password_step(&app).await;
    assert!(app
        .core
        .auth
        .verify_mfa(app.tenant.tenant_id, ticket.challenge_id, &old_codes[0], &meta())
        .await
        .is_err());

    let ticket = password_step(&app).await;
    app.core
        .auth
        .verify_mfa(app.tenant.tenant_id, ticket.challenge_id, &new_codes[0], &meta())
        .await
        .unwrap();
}

#[tokio::test]
async fn enrolling_twice_is_a_conflict() {
    let app = TestApp::new().await;
    let (principal, _, _) = enrolled_alice(&app).await;
    assert!(matches!(
        app.core.auth.enroll_mfa(&principal, &meta()).await,
        Err(AuthError::MfaAlreadyEnrolled)
    ));
}

#[tokio::test]
async fn confirm_with_wrong_code_leaves_mfa_off() {
    let app = TestApp::new().await;
    app.register("alice@example.com").await;
    let pair = app.login("alice@example.com").await;
    let principal = app.resolve(&pair.access_token).await.unwrap();

    let enrollment = app.core.auth.enroll_mfa(&principal, &meta()).await.unwrap();
    assert!(matches!(
        app.core
            .auth
            .confirm_mfa(&principal, enrollment.device_id, "123456x", &meta())
            .await,
        Err(AuthError::InvalidCode)
    ));

    // Unconfirmed devices do not gate login.
    app.login("alice@example.com").await;
}

#[tokio::test]
async fn disable_requires_password_and_turns_mfa_off() {
    let app = TestApp::new().await;
    let (principal, _, _) = enrolled_alice(&app).await;

    assert!(matches!(
        app.core
            .auth
            .disable_mfa(&principal, &Password::new("wrong-password".into()), &meta())
            .await,
        Err(AuthError::InvalidCredentials)
    ));

    app.core
        .auth
        .disable_mfa(&principal, &Password::new(PASSWORD.into()), &meta())
        .await
        .unwrap();
    let user = app
        .core
        .auth
        .get_user(&principal, principal.user_id)
        .await
        .unwrap();
    assert!(!user.mfa_required);

    app.login("alice@example.com").await;
    assert!(matches!(
        app.core
            .auth
            .disable_mfa(&principal, &Password::new(PASSWORD.into()), &meta())
            .await,
        Err(AuthError::MfaNotEnrolled)
    ));
}

#[tokio::test]
async fn repeated_wrong_codes_lock_the_account() {
    let app = TestApp::new().await;
    enrolled_alice(&app).await;
    let tenant = app.tenant.tenant_id;

    let mut last = None;
    for _ in 0..5 {
        let ticket = password_step(&app).await;
        last = Some(
            app.core
                .auth
                .verify_mfa(tenant, ticket.challenge_id, "999999", &meta())
                .await
                .unwrap_err(),
        );
    }
    assert!(matches!(last, Some(AuthError::AccountLocked)));
    assert!(matches!(
        app.login_in(&app.tenant, "alice@example.com", PASSWORD).await,
        Err(AuthError::AccountLocked)
    ));
}
