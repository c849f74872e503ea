mod common;

use actix_web::{http::StatusCode, test};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use common::{spawn_app, test_context, TestContext};
use taskdeck::auth::backup_codes::BackupCodeVault;

/// Registers a user over HTTP and burns every backup code, leaving the
/// account in the exhausted state the recovery flow exists for.
async fn seed_exhausted_user(
    ctx: &TestContext,
    app: &impl actix_web::dev::Service<
        actix_http::Request,
        Response = actix_web::dev::ServiceResponse<impl actix_web::body::MessageBody>,
        Error = actix_web::Error,
    >,
    email: &str,
) -> i32 {
    let req = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(json!({
            "username": "recovery_user",
            "email": email,
            "password": "Password123!"
        }))
        .to_request();
    let resp = test::call_service(app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    let codes: Vec<String> = serde_json::from_value(body["backupCodes"].clone()).unwrap();
    let user_id = body["user"]["id"].as_i64().unwrap() as i32;

    let vault = BackupCodeVault::new(ctx.store.as_ref());
    for code in &codes {
        assert!(vault.consume(user_id, code).await.unwrap());
    }
    user_id
}

#[actix_rt::test]
async fn test_full_recovery_round_trip() {
    let ctx = test_context();
    let app = spawn_app(ctx.state.clone()).await;
    seed_exhausted_user(&ctx, &app, "roundtrip@example.com").await;

    // Exhausted codes block ordinary login and point at recovery.
    let req = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({
            "email": "roundtrip@example.com",
            "password": "Password123!"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["requiresRecovery"], true);

    // Request a grant; dev mode echoes the token that would go out by email.
    let req = test::TestRequest::post()
        .uri("/api/auth/recovery/request")
        .set_json(json!({"email": "roundtrip@example.com"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    let token = body["devToken"].as_str().unwrap().to_string();
    assert_eq!(token.len(), 64);

    // Consume the grant for a fresh set.
    let req = test::TestRequest::post()
        .uri("/api/auth/recovery/verify")
        .set_json(json!({"token": token}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    let codes: Vec<String> = serde_json::from_value(body["codes"].clone()).unwrap();
    assert_eq!(codes.len(), 8);

    // The fresh codes restore ordinary login.
    let req = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({
            "email": "roundtrip@example.com",
            "password": "Password123!",
            "backupCode": codes[0]
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    // The grant was single-use.
    let req = test::TestRequest::post()
        .uri("/api/auth/recovery/verify")
        .set_json(json!({"token": token}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_rt::test]
async fn test_request_refused_while_codes_remain() {
    let ctx = test_context();
    let app = spawn_app(ctx.state.clone()).await;

    let req = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(json!({
            "username": "fresh_user",
            "email": "fresh@example.com",
            "password": "Password123!"
        }))
        .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::post()
        .uri("/api/auth/recovery/request")
        .set_json(json!({"email": "fresh@example.com"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[actix_rt::test]
async fn test_unknown_email_reply_does_not_enumerate() {
    let ctx = test_context();
    let app = spawn_app(ctx.state.clone()).await;

    let req = test::TestRequest::post()
        .uri("/api/auth/recovery/request")
        .set_json(json!({"email": "nobody@example.com"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    // Even in dev mode there is no token: no account, no grant.
    assert!(body.get("devToken").is_none());
}

#[actix_rt::test]
async fn test_emergency_session_is_gated_until_regeneration() {
    let ctx = test_context();
    let app = spawn_app(ctx.state.clone()).await;
    seed_exhausted_user(&ctx, &app, "emergency@example.com").await;

    let req = test::TestRequest::post()
        .uri("/api/auth/recovery/request")
        .set_json(json!({"email": "emergency@example.com"}))
        .to_request();
    let body: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let grant_token = body["devToken"].as_str().unwrap().to_string();

    // Trade the grant for a 30-minute emergency session.
    let req = test::TestRequest::post()
        .uri("/api/auth/recovery/emergency")
        .set_json(json!({"token": grant_token}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["expiresIn"], 1800);
    let session = body["token"].as_str().unwrap().to_string();

    // Feature routes reject the session with the regeneration flag.
    let req = test::TestRequest::get()
        .uri("/api/tasks")
        .insert_header(("Authorization", format!("Bearer {}", session)))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["requiresBackupCodeRegeneration"], true);

    // The regeneration endpoint stays reachable; the emergency session itself
    // is the override credential.
    let req = test::TestRequest::post()
        .uri("/api/auth/backup-codes/regenerate")
        .insert_header(("Authorization", format!("Bearer {}", session)))
        .set_json(json!({
            "method": "emergency_override",
            "verificationData": {}
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    let codes: Vec<String> = serde_json::from_value(body["codes"].clone()).unwrap();
    assert_eq!(codes.len(), 8);
    assert_eq!(body["method"], "emergency_override");

    // With codes regenerated, ordinary login works again.
    let req = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({
            "email": "emergency@example.com",
            "password": "Password123!",
            "backupCode": codes[0]
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert!(body.get("gracePeriod").is_none());
}

#[actix_rt::test]
async fn test_bad_recovery_token_fails_generically() {
    let ctx = test_context();
    let app = spawn_app(ctx.state.clone()).await;

    let req = test::TestRequest::post()
        .uri("/api/auth/recovery/verify")
        .set_json(json!({"token": "0".repeat(64)}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::post()
        .uri("/api/auth/recovery/emergency")
        .set_json(json!({"token": "0".repeat(64)}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_rt::test]
async fn test_self_service_requires_password_and_email_code() {
    let ctx = test_context();
    let app = spawn_app(ctx.state.clone()).await;
    seed_exhausted_user(&ctx, &app, "selfservice@example.com").await;

    // Issue the one-time email code.
    let req = test::TestRequest::post()
        .uri("/api/auth/recovery/self-service/challenge")
        .set_json(json!({"email": "selfservice@example.com"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    let code = body["devCode"].as_str().unwrap().to_string();
    assert_eq!(code.len(), 6);

    // Valid code but wrong password: refused, and the code is spent.
    let req = test::TestRequest::post()
        .uri("/api/auth/recovery/self-service")
        .set_json(json!({
            "email": "selfservice@example.com",
            "password": "WrongPassword1!",
            "emailCode": code
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // Fresh code plus the right password: a new set comes back.
    let req = test::TestRequest::post()
        .uri("/api/auth/recovery/self-service/challenge")
        .set_json(json!({"email": "selfservice@example.com"}))
        .to_request();
    let body: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let code = body["devCode"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri("/api/auth/recovery/self-service")
        .set_json(json!({
            "email": "selfservice@example.com",
            "password": "Password123!",
            "emailCode": code
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    let codes: Vec<String> = serde_json::from_value(body["codes"].clone()).unwrap();
    assert_eq!(codes.len(), 8);

    let req = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({
            "email": "selfservice@example.com",
            "password": "Password123!",
            "backupCode": codes[0]
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_rt::test]
async fn test_self_service_refused_while_codes_remain() {
    let ctx = test_context();
    let app = spawn_app(ctx.state.clone()).await;

    let req = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(json!({
            "username": "still_has_codes",
            "email": "hascodes@example.com",
            "password": "Password123!"
        }))
        .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::post()
        .uri("/api/auth/recovery/self-service")
        .set_json(json!({
            "email": "hascodes@example.com",
            "password": "Password123!",
            "emailCode": "123456"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}
