mod common;

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use backend::auth::jwt::JwtService;
use backend::auth::middleware::AuthMiddleware;
use backend::auth::models::{find_demo_user, DEMO_ADMIN_ID, DEMO_USER_ID};
use backend::config::{
    AppConfig, DetectorConfig, LocalModelConfig, MlConfig, MlSettings, RepositoryBackend,
    RepositoryConfig, StorageBackend, StorageConfig,
};
use backend::db::memory_repository::MemoryRepository;
use backend::db::ImageRepository;
use backend::ml::orchestrator::ProcessingOrchestrator;
use backend::routes::configure_routes;
use backend::storage::memory_service::MemoryStorage;
use backend::storage::ObjectStorage;
use serde_json::{json, Value};
use shared::ModelConfig;
use std::sync::Arc;

const BASE_URL: &str = "http://localhost:8081";
const BOUNDARY: &str = "----binsight-test-boundary";

struct TestContext {
    repository: web::Data<dyn ImageRepository>,
    storage: web::Data<dyn ObjectStorage>,
    orchestrator: web::Data<ProcessingOrchestrator>,
    ml_settings: web::Data<MlSettings>,
    app_config: web::Data<AppConfig>,
    jwt: JwtService,
}

/// In-memory backends, no detection providers, inline processing.
fn test_context() -> TestContext {
    let repository: Arc<dyn ImageRepository> = Arc::new(MemoryRepository::new());
    let storage: Arc<dyn ObjectStorage> = Arc::new(MemoryStorage::new(BASE_URL.to_string()));
    let orchestrator = Arc::new(ProcessingOrchestrator::new(
        repository.clone(),
        storage.clone(),
        None,
        None,
    ));
    let app_config = AppConfig {
        port: 8081,
        base_url: BASE_URL.to_string(),
        jwt_secret: "test-secret".to_string(),
        detector: DetectorConfig {
            api_url: "https://serverless.roboflow.com".to_string(),
            api_key: None,
            model_id: None,
        },
        storage: StorageConfig {
            backend: StorageBackend::Memory,
            s3_bucket: None,
            aws_region: "us-east-1".to_string(),
        },
        repository: RepositoryConfig {
            backend: RepositoryBackend::Memory,
            images_table: None,
        },
        ml: MlConfig {
            defaults: ModelConfig::default(),
            async_processing: false,
            processing_timeout_secs: 10,
        },
        local_model: LocalModelConfig {
            model_path: None,
            labels_path: None,
        },
    };

    TestContext {
        repository: web::Data::from(repository),
        storage: web::Data::from(storage),
        orchestrator: web::Data::from(orchestrator),
        ml_settings: web::Data::new(MlSettings::new(ModelConfig::default())),
        app_config: web::Data::new(app_config),
        jwt: JwtService::new("test-secret"),
    }
}

macro_rules! test_app {
    ($ctx:expr) => {{
        let ctx = &$ctx;
        test::init_service(
            App::new()
                .app_data(ctx.repository.clone())
                .app_data(ctx.storage.clone())
                .app_data(ctx.orchestrator.clone())
                .app_data(ctx.ml_settings.clone())
                .app_data(ctx.app_config.clone())
                .app_data(web::Data::new(ctx.jwt.clone()))
                .configure(|cfg| configure_routes(cfg, AuthMiddleware::new(ctx.jwt.clone()))),
        )
        .await
    }};
}

fn admin_token(ctx: &TestContext) -> String {
    let admin = find_demo_user(DEMO_ADMIN_ID).unwrap();
    ctx.jwt.generate_token(&admin).unwrap()
}

fn user_token(ctx: &TestContext) -> String {
    let user = find_demo_user(DEMO_USER_ID).unwrap();
    ctx.jwt.generate_token(&user).unwrap()
}

fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", token))
}

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a str, &'a [u8]),
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, filename, content_type, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        name, filename
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(
                    format!("Content-Type: {}\r\n\r\n", content_type).as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}

macro_rules! upload {
    ($app:expr, $token:expr, $parts:expr) => {{
        let req = test::TestRequest::post()
            .uri("/api/images/upload")
            .insert_header(bearer($token))
            .insert_header(("Content-Type", multipart_content_type()))
            .set_payload(multipart_body($parts))
            .to_request();
        test::call_service($app, req).await
    }};
}

#[actix_web::test]
async fn health_endpoints_are_public() {
    let ctx = test_context();
    let app = test_app!(ctx);

    for path in ["/api/health", "/api/users/health", "/api/images/health"] {
        let req = test::TestRequest::get().uri(path).to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success(), "{} should be public", path);
    }
}

#[actix_web::test]
async fn protected_routes_reject_missing_token() {
    let ctx = test_context();
    let app = test_app!(ctx);

    for path in ["/api/images/list", "/api/admin/analytics", "/api/users/profile"] {
        let req = test::TestRequest::get().uri(path).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{}", path);
    }
}

#[actix_web::test]
async fn login_issues_usable_token() {
    let ctx = test_context();
    let app = test_app!(ctx);

    let req = test::TestRequest::post()
        .uri("/api/users/login")
        .set_json(json!({"username": "admin", "password": "admin123"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["user"]["username"], "admin");
    assert_eq!(body["user"]["role"], "admin");
    let token = body["token"].as_str().unwrap().to_string();

    let req = test::TestRequest::get()
        .uri("/api/users/profile")
        .insert_header(bearer(&token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let profile: Value = test::read_body_json(resp).await;
    assert_eq!(profile["email"], "admin@binsight.dev");
}

#[actix_web::test]
async fn login_rejects_bad_credentials() {
    let ctx = test_context();
    let app = test_app!(ctx);

    let req = test::TestRequest::post()
        .uri("/api/users/login")
        .set_json(json!({"username": "admin", "password": "wrong"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Invalid username or password");
}

#[actix_web::test]
async fn upload_requires_image_and_location() {
    let ctx = test_context();
    let app = test_app!(ctx);
    let token = user_token(&ctx);

    let resp = upload!(&app, &token, &[Part::Text("location", "park")]);
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "No image file provided");

    let png = common::test_png_bytes(32, 32);
    let resp = upload!(
        &app,
        &token,
        &[Part::File("image", "bin.png", "image/png", &png)]
    );
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Location is required");
}

#[actix_web::test]
async fn upload_with_skip_ml_completes_inline() {
    let ctx = test_context();
    let app = test_app!(ctx);
    let token = user_token(&ctx);
    let png = common::test_png_bytes(48, 48);

    let resp = upload!(
        &app,
        &token,
        &[
            Part::File("image", "bin.png", "image/png", &png),
            Part::Text("location", "harbor front"),
            Part::Text("latitude", "53.55"),
            Part::Text("longitude", "9.99"),
            Part::Text("skip_ml", "true"),
        ]
    );
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["location"], "harbor front");
    assert_eq!(body["latitude"], 53.55);
    assert_eq!(body["analysis_results"]["total_detections"], 0);
    assert!(body["image_url"].as_str().unwrap().contains("/media/images/"));
}

#[actix_web::test]
async fn upload_without_provider_is_ml_unavailable() {
    let ctx = test_context();
    let app = test_app!(ctx);
    let token = user_token(&ctx);
    let png = common::test_png_bytes(48, 48);

    let resp = upload!(
        &app,
        &token,
        &[
            Part::File("image", "bin.png", "image/png", &png),
            Part::Text("location", "bus stop"),
        ]
    );
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ml_unavailable");
    assert!(body["error_message"].is_null());
    assert!(body["analysis_results"]["summary"]
        .as_str()
        .unwrap()
        .contains("unavailable"));
}

#[actix_web::test]
async fn list_returns_only_own_images() {
    let ctx = test_context();
    let app = test_app!(ctx);
    let token = user_token(&ctx);
    let png = common::test_png_bytes(48, 48);

    let resp = upload!(
        &app,
        &token,
        &[
            Part::File("image", "bin.png", "image/png", &png),
            Part::Text("location", "park"),
            Part::Text("skip_ml", "true"),
        ]
    );
    assert_eq!(resp.status(), StatusCode::CREATED);

    let req = test::TestRequest::get()
        .uri("/api/images/list")
        .insert_header(bearer(&token))
        .to_request();
    let mine: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(mine.as_array().unwrap().len(), 1);

    let req = test::TestRequest::get()
        .uri("/api/images/list")
        .insert_header(bearer(&admin_token(&ctx)))
        .to_request();
    let admins: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(admins.as_array().unwrap().len(), 0);
}

#[actix_web::test]
async fn image_detail_enforces_owner_or_admin() {
    let ctx = test_context();
    let app = test_app!(ctx);
    let admin = admin_token(&ctx);
    let user = user_token(&ctx);
    let png = common::test_png_bytes(48, 48);

    let resp = upload!(
        &app,
        &admin,
        &[
            Part::File("image", "bin.png", "image/png", &png),
            Part::Text("location", "depot"),
            Part::Text("skip_ml", "true"),
        ]
    );
    let body: Value = test::read_body_json(resp).await;
    let image_id = body["image_id"].as_str().unwrap().to_string();

    // Another user's image is off limits.
    let req = test::TestRequest::get()
        .uri(&format!("/api/images/{}", image_id))
        .insert_header(bearer(&user))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // The owner can read it.
    let req = test::TestRequest::get()
        .uri(&format!("/api/images/{}", image_id))
        .insert_header(bearer(&admin))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = test::TestRequest::get()
        .uri("/api/images/does-not-exist")
        .insert_header(bearer(&user))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn delete_removes_record_and_media() {
    let ctx = test_context();
    let app = test_app!(ctx);
    let token = user_token(&ctx);
    let png = common::test_png_bytes(48, 48);

    let resp = upload!(
        &app,
        &token,
        &[
            Part::File("image", "bin.png", "image/png", &png),
            Part::Text("location", "quay"),
            Part::Text("skip_ml", "true"),
        ]
    );
    let body: Value = test::read_body_json(resp).await;
    let image_id = body["image_id"].as_str().unwrap().to_string();
    let storage_key = body["storage_key"].as_str().unwrap().to_string();

    let req = test::TestRequest::delete()
        .uri(&format!("/api/images/{}/delete", image_id))
        .insert_header(bearer(&token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["message"], "Image deleted");

    let req = test::TestRequest::get()
        .uri(&format!("/api/images/{}", image_id))
        .insert_header(bearer(&token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::get()
        .uri(&format!("/media/{}", storage_key))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn media_serves_uploaded_bytes_without_auth() {
    let ctx = test_context();
    let app = test_app!(ctx);
    let token = user_token(&ctx);
    let png = common::test_png_bytes(48, 48);

    let resp = upload!(
        &app,
        &token,
        &[
            Part::File("image", "bin.png", "image/png", &png),
            Part::Text("location", "underpass"),
            Part::Text("skip_ml", "true"),
        ]
    );
    let body: Value = test::read_body_json(resp).await;
    let storage_key = body["storage_key"].as_str().unwrap().to_string();

    let req = test::TestRequest::get()
        .uri(&format!("/media/{}", storage_key))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-type").unwrap().to_str().unwrap(),
        "image/png"
    );
    let served = test::read_body(resp).await;
    assert_eq!(&served[..], &png[..]);
}

#[actix_web::test]
async fn reprocess_without_provider_marks_unavailable() {
    let ctx = test_context();
    let app = test_app!(ctx);
    let token = user_token(&ctx);
    let png = common::test_png_bytes(48, 48);

    let resp = upload!(
        &app,
        &token,
        &[
            Part::File("image", "bin.png", "image/png", &png),
            Part::Text("location", "beach"),
            Part::Text("skip_ml", "true"),
        ]
    );
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "completed");
    let image_id = body["image_id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri(&format!("/api/images/{}/reprocess", image_id))
        .insert_header(bearer(&token))
        .set_json(json!({}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["message"], "Reprocessing complete");
    assert_eq!(body["outcome"]["status"], "completed");
    assert_eq!(body["image"]["status"], "ml_unavailable");
}

#[actix_web::test]
async fn ml_config_roundtrip_requires_admin() {
    let ctx = test_context();
    let app = test_app!(ctx);
    let admin = admin_token(&ctx);
    let user = user_token(&ctx);

    let req = test::TestRequest::get()
        .uri("/api/admin/ml-config")
        .insert_header(bearer(&user))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::get()
        .uri("/api/admin/ml-config")
        .insert_header(bearer(&admin))
        .to_request();
    let current: Value = test::call_and_read_body_json(&app, req).await;
    assert!((current["confidence_threshold"].as_f64().unwrap() - 0.1).abs() < 1e-6);

    let req = test::TestRequest::put()
        .uri("/api/admin/ml-config")
        .insert_header(bearer(&admin))
        .set_json(json!({"confidence_threshold": 0.25, "max_detections": 10}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = test::TestRequest::get()
        .uri("/api/admin/ml-config")
        .insert_header(bearer(&admin))
        .to_request();
    let updated: Value = test::call_and_read_body_json(&app, req).await;
    assert!((updated["confidence_threshold"].as_f64().unwrap() - 0.25).abs() < 1e-6);
    assert_eq!(updated["max_detections"], 10);
}

#[actix_web::test]
async fn admin_analytics_aggregates_statuses() {
    let ctx = test_context();
    let app = test_app!(ctx);
    let admin = admin_token(&ctx);
    let user = user_token(&ctx);
    let png = common::test_png_bytes(48, 48);
    let other_png = common::test_png_bytes(56, 56);

    let resp = upload!(
        &app,
        &user,
        &[
            Part::File("image", "a.png", "image/png", &png),
            Part::Text("location", "park"),
            Part::Text("skip_ml", "true"),
        ]
    );
    assert_eq!(resp.status(), StatusCode::CREATED);
    let resp = upload!(
        &app,
        &user,
        &[
            Part::File("image", "b.png", "image/png", &other_png),
            Part::Text("location", "park"),
        ]
    );
    assert_eq!(resp.status(), StatusCode::CREATED);

    let req = test::TestRequest::get()
        .uri("/api/admin/analytics")
        .insert_header(bearer(&user))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::get()
        .uri("/api/admin/analytics")
        .insert_header(bearer(&admin))
        .to_request();
    let analytics: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(analytics["total_images"], 2);
    assert_eq!(analytics["status_counts"]["completed"], 1);
    assert_eq!(analytics["status_counts"]["ml_unavailable"], 1);
    assert_eq!(analytics["total_detections"], 0);
}
