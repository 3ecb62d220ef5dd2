use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use glowlisting_server::{
    config::{Config, StorageBackend},
    create_app,
    errors::{AppError, Result as AppResult},
    handlers::AppState,
    services::{EnhanceOptions, ImageEnhancer, NoopGeoLocator},
    storage::ImageVault,
    store::{LedgerStore, MemoryLedgerStore},
};

/// Stub provider: appends a marker so tests can tell enhanced output from
/// the original, and can be flipped into a failure mode.
struct ToggleEnhancer {
    fail: Arc<AtomicBool>,
}

#[async_trait]
impl ImageEnhancer for ToggleEnhancer {
    async fn enhance(&self, image: &[u8], _options: &EnhanceOptions) -> AppResult<Vec<u8>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Enhancement("stub provider down".to_string()));
        }
        let mut out = image.to_vec();
        out.extend_from_slice(b"-enhanced");
        Ok(out)
    }
}

struct TestApp {
    app: Router,
    store: Arc<MemoryLedgerStore>,
    fail_enhancer: Arc<AtomicBool>,
    _vault_dir: TempDir,
}

fn spawn_app() -> TestApp {
    let vault_dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryLedgerStore::new());
    let fail_enhancer = Arc::new(AtomicBool::new(false));

    let config = Config {
        port: 0,
        database_url: None,
        storage_backend: StorageBackend::Memory,
        vault_dir: vault_dir.path().to_string_lossy().to_string(),
        jwt_secret: "test-secret".to_string(),
        max_file_size: 10 * 1024 * 1024,
        allowed_mime_types: vec!["image/jpeg".to_string(), "image/png".to_string()],
        max_image_dimension: 4096,
        starting_balance: 5,
        enhancer_url: None,
        enhancer_api_key: None,
        enhancer_timeout_secs: 5,
        geo_lookup_url: None,
    };

    let state = AppState {
        store: store.clone(),
        enhancer: Arc::new(ToggleEnhancer {
            fail: fail_enhancer.clone(),
        }),
        geo: Arc::new(NoopGeoLocator),
        vault: Arc::new(ImageVault::new(vault_dir.path()).unwrap()),
        config,
    };

    TestApp {
        app: create_app(state),
        store,
        fail_enhancer,
        _vault_dir: vault_dir,
    }
}

fn png_bytes(seed: u8) -> Vec<u8> {
    let mut img = image::RgbImage::new(4, 4);
    img.put_pixel(0, 0, image::Rgb([seed, 42, 7]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
        .unwrap();
    bytes
}

const BOUNDARY: &str = "glowlisting-test-boundary";

fn multipart_body(file: &[u8], fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; \
             filename=\"photo.png\"\r\nContent-Type: image/png\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(file);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn register(app: &Router, email: &str) -> (String, Uuid) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/register")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({
                        "name": "Jamie Ortega",
                        "email": email,
                        "password": "listing-photos-4ever"
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body_json(response).await;
    let token = body["data"]["access_token"].as_str().unwrap().to_string();
    let user_id = Uuid::parse_str(body["data"]["user"]["id"].as_str().unwrap()).unwrap();
    (token, user_id)
}

async fn upload(
    app: &Router,
    token: &str,
    file: &[u8],
    fields: &[(&str, &str)],
) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/images")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(Body::from(multipart_body(file, fields)))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn get_with_token(app: &Router, token: &str, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn health_check_works() {
    let harness = spawn_app();

    let response = harness
        .app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health/ready")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn registration_grants_starting_balance() {
    let harness = spawn_app();
    let (token, _) = register(&harness.app, "casey@glowlisting.test").await;

    let response = get_with_token(&harness.app, &token, "/api/v1/users/me").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["balance"], 5);
}

#[tokio::test]
async fn registration_rejects_weak_passwords_and_duplicates() {
    let harness = spawn_app();

    let weak = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/register")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"name": "A", "email": "a@b.c", "password": "short1"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(weak.status(), StatusCode::BAD_REQUEST);

    register(&harness.app, "dupe@glowlisting.test").await;
    let dupe = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/register")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({
                        "name": "B",
                        "email": "dupe@glowlisting.test",
                        "password": "listing-photos-4ever"
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(dupe.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn login_records_last_login_metadata() {
    let harness = spawn_app();
    let (_, user_id) = register(&harness.app, "login@glowlisting.test").await;

    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
                .body(Body::from(
                    json!({
                        "email": "login@glowlisting.test",
                        "password": "listing-photos-4ever"
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let user = harness
        .store
        .find_user_by_id(user_id)
        .await
        .unwrap()
        .unwrap();
    assert!(user.last_login_at.is_some());
    assert_eq!(user.last_login_ip.as_deref(), Some("203.0.113.9"));
}

#[tokio::test]
async fn requests_without_token_are_unauthorized() {
    let harness = spawn_app();

    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/users/me")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = upload(&harness.app, "not-a-token", &png_bytes(1), &[]).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn enhance_stores_record_and_serves_preview() {
    let harness = spawn_app();
    let (token, _) = register(&harness.app, "agent@glowlisting.test").await;
    let photo = png_bytes(1);

    let response = upload(
        &harness.app,
        &token,
        &photo,
        &[("style", "bright"), ("room_type", "kitchen")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["data"]["balance"], 5);
    assert_eq!(body["data"]["image"]["regenerate_count"], 0);
    assert_eq!(body["data"]["image"]["regenerates_remaining"], 3);
    let image_id = body["data"]["image"]["id"].as_str().unwrap().to_string();

    let preview = get_with_token(&harness.app, &token, &format!("/api/v1/images/{}", image_id)).await;
    assert_eq!(preview.status(), StatusCode::OK);
    let served = axum::body::to_bytes(preview.into_body(), usize::MAX)
        .await
        .unwrap();
    let mut expected = photo.clone();
    expected.extend_from_slice(b"-enhanced");
    assert_eq!(served.as_ref(), expected.as_slice());
}

#[tokio::test]
async fn duplicate_upload_is_deduplicated() {
    let harness = spawn_app();
    let (token, _) = register(&harness.app, "dedupe@glowlisting.test").await;
    let photo = png_bytes(2);

    let first = upload(&harness.app, &token, &photo, &[]).await;
    assert_eq!(first.status(), StatusCode::CREATED);
    let first_id = body_json(first).await["data"]["image"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let second = upload(&harness.app, &token, &photo, &[]).await;
    assert_eq!(second.status(), StatusCode::OK);
    let second_body = body_json(second).await;
    assert_eq!(second_body["data"]["image"]["id"].as_str().unwrap(), first_id);
}

#[tokio::test]
async fn regeneration_is_capped_at_three_per_original() {
    let harness = spawn_app();
    let (token, _) = register(&harness.app, "regen@glowlisting.test").await;
    let photo = png_bytes(3);

    let response = upload(&harness.app, &token, &photo, &[]).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    for expected_remaining in [2, 1, 0] {
        let response = upload(&harness.app, &token, &photo, &[("regenerate", "true")]).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(
            body["data"]["image"]["regenerates_remaining"], expected_remaining,
        );
    }

    let denied = upload(&harness.app, &token, &photo, &[("regenerate", "true")]).await;
    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn failed_regeneration_does_not_consume_a_slot() {
    let harness = spawn_app();
    let (token, _) = register(&harness.app, "rollback@glowlisting.test").await;
    let photo = png_bytes(4);

    let response = upload(&harness.app, &token, &photo, &[]).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    harness.fail_enhancer.store(true, Ordering::SeqCst);
    let failed = upload(&harness.app, &token, &photo, &[("regenerate", "true")]).await;
    assert_eq!(failed.status(), StatusCode::BAD_GATEWAY);

    harness.fail_enhancer.store(false, Ordering::SeqCst);
    let retry = upload(&harness.app, &token, &photo, &[("regenerate", "true")]).await;
    assert_eq!(retry.status(), StatusCode::OK);
    let body = body_json(retry).await;
    // Still two left: the failed attempt rolled its reservation back.
    assert_eq!(body["data"]["image"]["regenerates_remaining"], 2);
}

#[tokio::test]
async fn failed_first_enhancement_persists_nothing() {
    let harness = spawn_app();
    let (token, _) = register(&harness.app, "nothing@glowlisting.test").await;

    harness.fail_enhancer.store(true, Ordering::SeqCst);
    let response = upload(&harness.app, &token, &png_bytes(5), &[]).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let listing = get_with_token(&harness.app, &token, "/api/v1/images").await;
    let body = body_json(listing).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn hd_download_debits_one_token_until_balance_runs_out() {
    let harness = spawn_app();
    let (token, user_id) = register(&harness.app, "download@glowlisting.test").await;
    let photo = png_bytes(6);

    let response = upload(&harness.app, &token, &photo, &[]).await;
    let image_id = body_json(response).await["data"]["image"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    let hd_uri = format!("/api/v1/images/{}/hd", image_id);

    let response = get_with_token(&harness.app, &token, &hd_uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("x-token-balance")
            .and_then(|v| v.to_str().ok()),
        Some("4")
    );

    harness.store.set_balance(user_id, 0).await.unwrap();
    let denied = get_with_token(&harness.app, &token, &hd_uri).await;
    assert_eq!(denied.status(), StatusCode::PAYMENT_REQUIRED);

    let user = harness
        .store
        .find_user_by_id(user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.balance, 0);
}

#[tokio::test]
async fn other_users_images_are_off_limits() {
    let harness = spawn_app();
    let (owner_token, _) = register(&harness.app, "owner@glowlisting.test").await;
    let (intruder_token, _) = register(&harness.app, "intruder@glowlisting.test").await;

    let response = upload(&harness.app, &owner_token, &png_bytes(7), &[]).await;
    let image_id = body_json(response).await["data"]["image"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let preview = get_with_token(
        &harness.app,
        &intruder_token,
        &format!("/api/v1/images/{}", image_id),
    )
    .await;
    assert_eq!(preview.status(), StatusCode::FORBIDDEN);

    let hd = get_with_token(
        &harness.app,
        &intruder_token,
        &format!("/api/v1/images/{}/hd", image_id),
    )
    .await;
    assert_eq!(hd.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_routes_reject_regular_users() {
    let harness = spawn_app();
    let (token, _) = register(&harness.app, "plain@glowlisting.test").await;

    let response = get_with_token(&harness.app, &token, "/api/v1/admin/users").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_grant_updates_balance_and_audit_log() {
    let harness = spawn_app();
    let (admin_token, admin_id) = register(&harness.app, "admin@glowlisting.test").await;
    let (user_token, user_id) = register(&harness.app, "member@glowlisting.test").await;
    harness.store.set_admin(admin_id, true).await.unwrap();

    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/admin/users/{}/tokens", user_id))
                .header(header::AUTHORIZATION, format!("Bearer {}", admin_token))
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-forwarded-for", "198.51.100.7")
                .body(Body::from(json!({"amount": 50}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["balance"], 55);

    let me = get_with_token(&harness.app, &user_token, "/api/v1/users/me").await;
    assert_eq!(body_json(me).await["data"]["balance"], 55);

    let audit = get_with_token(&harness.app, &admin_token, "/api/v1/admin/audit").await;
    assert_eq!(audit.status(), StatusCode::OK);
    let body = body_json(audit).await;
    let entries = body["data"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["action"], "grant_tokens");
    assert_eq!(entries[0]["details"]["amount"], 50);
    assert_eq!(entries[0]["ip_address"], "198.51.100.7");
}

#[tokio::test]
async fn admin_grant_rejects_bad_amounts_and_unknown_targets() {
    let harness = spawn_app();
    let (admin_token, admin_id) = register(&harness.app, "admin2@glowlisting.test").await;
    harness.store.set_admin(admin_id, true).await.unwrap();

    let grant = |target: Uuid, amount: i64| {
        let app = harness.app.clone();
        let token = admin_token.clone();
        async move {
            app.oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/v1/admin/users/{}/tokens", target))
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(json!({ "amount": amount }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
        }
    };

    let negative = grant(admin_id, -5).await;
    assert_eq!(negative.status(), StatusCode::BAD_REQUEST);

    let ghost = grant(Uuid::new_v4(), 10).await;
    assert_eq!(ghost.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_usage_stats_reflect_activity() {
    let harness = spawn_app();
    let (admin_token, admin_id) = register(&harness.app, "stats-admin@glowlisting.test").await;
    let (user_token, _) = register(&harness.app, "stats-user@glowlisting.test").await;
    harness.store.set_admin(admin_id, true).await.unwrap();

    let photo = png_bytes(8);
    let response = upload(&harness.app, &user_token, &photo, &[]).await;
    let image_id = body_json(response).await["data"]["image"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    upload(&harness.app, &user_token, &photo, &[("regenerate", "true")]).await;
    get_with_token(
        &harness.app,
        &user_token,
        &format!("/api/v1/images/{}/hd", image_id),
    )
    .await;

    let stats = get_with_token(&harness.app, &admin_token, "/api/v1/admin/usage").await;
    assert_eq!(stats.status(), StatusCode::OK);
    let body = body_json(stats).await;
    assert_eq!(body["data"]["generates"], 1);
    assert_eq!(body["data"]["processes"], 1);
    assert_eq!(body["data"]["downloads"], 1);
    assert_eq!(body["data"]["unique_users"], 1);
}

#[tokio::test]
async fn upload_rejects_non_image_payloads() {
    let harness = spawn_app();
    let (token, _) = register(&harness.app, "garbage@glowlisting.test").await;

    let response = upload(&harness.app, &token, b"definitely not an image", &[]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
