/// HTTP tests for tenant-bound tokens, field encryption and platform routes

mod common;

use axum::http::StatusCode;
use clinicore_shared::auth::jwt::TenantClaim;
use common::{bearer, get, post_json, TestContext, MAIN_DOMAIN};
use serde_json::json;

const CLINIC_A: &str = "clinica.mainapp.example.com";
const CLINIC_B: &str = "clinicb.mainapp.example.com";

#[tokio::test]
async fn test_missing_token_is_401() {
    let ctx = TestContext::new().await;

    let (status, body) = ctx
        .send(post_json(CLINIC_A, "/v1/crypto/encrypt", None, json!({"plaintext": "x"})))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn test_invalid_token_is_401() {
    let ctx = TestContext::new().await;

    let (status, _) = ctx
        .send(post_json(
            CLINIC_A,
            "/v1/crypto/encrypt",
            Some("Bearer not-a-jwt"),
            json!({"plaintext": "x"}),
        ))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_from_another_tenant_is_refused() {
    let ctx = TestContext::new().await;
    let clinic_b_admin = bearer(TenantClaim::Tenant(9), "clinic_admin");

    let (status, body) = ctx
        .send(post_json(
            CLINIC_A,
            "/v1/crypto/encrypt",
            Some(&clinic_b_admin),
            json!({"plaintext": "x"}),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    // A platform token is not a clinic token either
    let platform = bearer(TenantClaim::Public, "super_admin");
    let (status, _) = ctx
        .send(post_json(CLINIC_A, "/v1/crypto/encrypt", Some(&platform), json!({"plaintext": "x"})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_encrypt_then_decrypt_with_clinic_key() {
    let ctx = TestContext::new().await;
    let admin = bearer(TenantClaim::Tenant(7), "clinic_admin");

    let (status, body) = ctx
        .send(post_json(
            CLINIC_A,
            "/v1/crypto/encrypt",
            Some(&admin),
            json!({"plaintext": "blood type: O-"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let ciphertext = body["ciphertext"].as_str().unwrap().to_string();
    assert!(ciphertext.starts_with("vault:v1:"));
    assert!(!ciphertext.contains("blood"));

    let (status, body) = ctx
        .send(post_json(
            CLINIC_A,
            "/v1/crypto/decrypt",
            Some(&admin),
            json!({"ciphertext": ciphertext}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["plaintext"], "blood type: O-");
}

#[tokio::test]
async fn test_role_policy_governs_crypto() {
    let ctx = TestContext::new().await;
    let admin = bearer(TenantClaim::Tenant(7), "clinic_admin");
    let doctor = bearer(TenantClaim::Tenant(7), "doctor");

    let (status, body) = ctx
        .send(post_json(CLINIC_A, "/v1/crypto/encrypt", Some(&doctor), json!({"plaintext": "x"})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (_, body) = ctx
        .send(post_json(CLINIC_A, "/v1/crypto/encrypt", Some(&admin), json!({"plaintext": "note"})))
        .await;
    let ciphertext = body["ciphertext"].clone();

    let (status, body) = ctx
        .send(post_json(
            CLINIC_A,
            "/v1/crypto/decrypt",
            Some(&doctor),
            json!({"ciphertext": ciphertext}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["plaintext"], "note");
}

#[tokio::test]
async fn test_ciphertext_does_not_cross_tenants() {
    let ctx = TestContext::new().await;
    let admin_a = bearer(TenantClaim::Tenant(7), "clinic_admin");
    let admin_b = bearer(TenantClaim::Tenant(9), "clinic_admin");

    let (_, body) = ctx
        .send(post_json(CLINIC_A, "/v1/crypto/encrypt", Some(&admin_a), json!({"plaintext": "a"})))
        .await;

    let (status, _) = ctx
        .send(post_json(
            CLINIC_B,
            "/v1/crypto/decrypt",
            Some(&admin_b),
            json!({"ciphertext": body["ciphertext"]}),
        ))
        .await;
    assert!(status.is_client_error(), "got {status}");
}

#[tokio::test]
async fn test_secret_store_outage_is_503() {
    let ctx = TestContext::new().await;
    let admin = bearer(TenantClaim::Tenant(7), "clinic_admin");
    ctx.secrets.set_unavailable(true);

    let (status, body) = ctx
        .send(post_json(CLINIC_A, "/v1/crypto/encrypt", Some(&admin), json!({"plaintext": "x"})))
        .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "service_unavailable");
}

#[tokio::test]
async fn test_empty_plaintext_fails_validation() {
    let ctx = TestContext::new().await;
    let admin = bearer(TenantClaim::Tenant(7), "clinic_admin");

    let (status, body) = ctx
        .send(post_json(CLINIC_A, "/v1/crypto/encrypt", Some(&admin), json!({"plaintext": ""})))
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn test_platform_routes_require_super_admin() {
    let ctx = TestContext::new().await;

    let (status, _) = ctx
        .send(post_json(MAIN_DOMAIN, "/v1/tenants/7/deactivate", None, json!({})))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let staff = bearer(TenantClaim::Public, "staff");
    let (status, _) = ctx
        .send(post_json(MAIN_DOMAIN, "/v1/tenants/7/deactivate", Some(&staff), json!({})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Clinic tokens are bound to their clinic's host
    let clinic_admin = bearer(TenantClaim::Tenant(7), "super_admin");
    let (status, _) = ctx
        .send(post_json(MAIN_DOMAIN, "/v1/tenants/7/deactivate", Some(&clinic_admin), json!({})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_deactivation_stops_resolution_immediately() {
    let ctx = TestContext::new().await;
    let operator = bearer(TenantClaim::Public, "super_admin");

    // Warm the directory cache
    let (status, _) = ctx.send(get(CLINIC_A, "/v1/context")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = ctx
        .send(post_json(MAIN_DOMAIN, "/v1/tenants/7/deactivate", Some(&operator), json!({})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 7);
    assert_eq!(body["is_active"], false);

    let (status, _) = ctx.send(get(CLINIC_A, "/v1/context")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Other clinics are unaffected
    let (status, _) = ctx.send(get(CLINIC_B, "/v1/context")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = ctx
        .send(post_json(MAIN_DOMAIN, "/v1/tenants/7/activate", Some(&operator), json!({})))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = ctx.send(get(CLINIC_A, "/v1/context")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["schema"], "tenant_7");
}

#[tokio::test]
async fn test_unknown_tenant_administration_is_404() {
    let ctx = TestContext::new().await;
    let operator = bearer(TenantClaim::Public, "super_admin");

    let (status, _) = ctx
        .send(post_json(MAIN_DOMAIN, "/v1/tenants/404/deactivate", Some(&operator), json!({})))
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rotate_key_keeps_old_ciphertext_readable() {
    let ctx = TestContext::new().await;
    let operator = bearer(TenantClaim::Public, "super_admin");
    let admin = bearer(TenantClaim::Tenant(7), "clinic_admin");

    let (_, body) = ctx
        .send(post_json(CLINIC_A, "/v1/crypto/encrypt", Some(&admin), json!({"plaintext": "old"})))
        .await;
    let old = body["ciphertext"].clone();

    let (status, _) = ctx
        .send(post_json(MAIN_DOMAIN, "/v1/tenants/7/rotate-key", Some(&operator), json!({})))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(ctx.secrets.key_version(7).await, Some(2));

    let (_, body) = ctx
        .send(post_json(CLINIC_A, "/v1/crypto/encrypt", Some(&admin), json!({"plaintext": "new"})))
        .await;
    assert!(body["ciphertext"].as_str().unwrap().starts_with("vault:v2:"));

    let (status, body) = ctx
        .send(post_json(CLINIC_A, "/v1/crypto/decrypt", Some(&admin), json!({"ciphertext": old})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["plaintext"], "old");
}
