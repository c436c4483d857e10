use actix_web::{web, Error, HttpResponse};
use actix_multipart::Multipart;
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use serde_json::json;
use shared::{ImageStatus, ProviderKind};
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use crate::auth::middleware::{AuthMiddleware, AuthenticatedUser};
use crate::auth::routes as auth_routes;
use crate::config::{merge_model_config, AppConfig, MlConfigUpdate, MlSettings};
use crate::db::models::{ImageRecord, ImageRecordPatch};
use crate::db::ImageRepository;
use crate::ml::orchestrator::{ProcessRequest, ProcessingOrchestrator};
use crate::storage::{content_type_for_key, ObjectStorage, StorageError};

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, auth_middleware: AuthMiddleware) {
    cfg.service(
        web::scope("/api")
            .wrap(auth_middleware)
            .service(web::resource("/health").route(web::get().to(api_health)))
            .service(
                web::scope("/users")
                    .service(web::resource("/health").route(web::get().to(auth_routes::users_health)))
                    .service(web::resource("/login").route(web::post().to(auth_routes::login)))
                    .service(web::resource("/refresh").route(web::post().to(auth_routes::refresh)))
                    .service(web::resource("/profile").route(web::get().to(auth_routes::profile))),
            )
            .service(
                web::scope("/images")
                    .service(web::resource("/health").route(web::get().to(images_health)))
                    .service(web::resource("/upload").route(web::post().to(upload_image)))
                    .service(web::resource("/list").route(web::get().to(list_images)))
                    .service(web::resource("/{image_id}").route(web::get().to(get_image_details)))
                    .service(web::resource("/{image_id}/delete").route(web::delete().to(delete_image)))
                    .service(
                        web::resource("/{image_id}/reprocess").route(web::post().to(reprocess_image)),
                    ),
            )
            .service(
                web::scope("/admin")
                    .service(web::resource("/health").route(web::get().to(admin_health)))
                    .service(web::resource("/analytics").route(web::get().to(admin_analytics)))
                    .service(
                        web::resource("/ml-config")
                            .route(web::get().to(get_ml_config))
                            .route(web::put().to(update_ml_config)),
                    ),
            ),
    )
    .service(web::resource("/media/{key:.*}").route(web::get().to(serve_media)));
}

async fn api_health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "message": "API is running"
    }))
}

async fn images_health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "message": "Images API is running"
    }))
}

async fn upload_image(
    user: AuthenticatedUser,
    mut payload: Multipart,
    repository: web::Data<dyn ImageRepository>,
    storage: web::Data<dyn ObjectStorage>,
    orchestrator: web::Data<ProcessingOrchestrator>,
    ml_settings: web::Data<MlSettings>,
    app_config: web::Data<AppConfig>,
) -> Result<HttpResponse, Error> {
    let mut image_data: Vec<u8> = Vec::new();
    let mut image_content_type: Option<String> = None;
    let mut location = String::new();
    let mut latitude: Option<f64> = None;
    let mut longitude: Option<f64> = None;
    let mut skip_ml = false;

    while let Ok(Some(mut field)) = payload.try_next().await {
        let name = field.name().unwrap_or("").to_string();
        if name == "image" {
            image_content_type = field.content_type().map(|mime| mime.to_string());
        }

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            data.write_all(&chunk?)?;
        }

        match name.as_str() {
            "image" => image_data = data,
            "location" => location = String::from_utf8_lossy(&data).trim().to_string(),
            "latitude" => latitude = String::from_utf8_lossy(&data).trim().parse().ok(),
            "longitude" => longitude = String::from_utf8_lossy(&data).trim().parse().ok(),
            "skip_ml" => {
                skip_ml = String::from_utf8_lossy(&data).trim().eq_ignore_ascii_case("true")
            }
            _ => {}
        }
    }

    if image_data.is_empty() {
        return Ok(HttpResponse::BadRequest().json(ErrorResponse {
            error: "No image file provided".to_string(),
        }));
    }
    if location.is_empty() {
        return Ok(HttpResponse::BadRequest().json(ErrorResponse {
            error: "Location is required".to_string(),
        }));
    }

    let content_type = image_content_type.unwrap_or_else(|| "image/jpeg".to_string());
    let folder = format!("images/{}", user.user_id());
    let uploaded = match storage.upload(&image_data, &folder, &content_type).await {
        Ok(uploaded) => uploaded,
        Err(e @ (StorageError::InvalidFormat | StorageError::FileTooLarge)) => {
            return Ok(HttpResponse::BadRequest().json(ErrorResponse {
                error: e.to_string(),
            }));
        }
        Err(e) => {
            log::error!("Image upload to storage failed: {}", e);
            return Ok(HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to store image".to_string(),
            }));
        }
    };

    let record = ImageRecord::new(
        user.user_id(),
        uploaded.url.clone(),
        uploaded.key.clone(),
        location,
        latitude,
        longitude,
    );
    if let Err(e) = repository.insert(&record).await {
        log::error!("Failed to persist image record {}: {}", record.image_id, e);
        return Ok(HttpResponse::InternalServerError().json(ErrorResponse {
            error: "Failed to save image record".to_string(),
        }));
    }
    log::info!(
        "User {} uploaded image {} ({} bytes)",
        user.user_id(),
        record.image_id,
        image_data.len()
    );

    let request = ProcessRequest {
        skip_ml,
        config: ml_settings.current().await,
    };
    let image_id = record.image_id.clone();

    if app_config.ml.async_processing {
        spawn_processing(
            orchestrator.clone(),
            repository.clone(),
            image_id.clone(),
            request,
            app_config.ml.processing_timeout_secs,
        );
    } else {
        let outcome = orchestrator.process(&image_id, request).await;
        log::debug!("Inline processing of image {} finished: {}", image_id, outcome.status);
    }

    let stored = repository.get(&image_id).await.ok().flatten().unwrap_or(record);
    Ok(HttpResponse::Created().json(stored))
}

fn spawn_processing(
    orchestrator: web::Data<ProcessingOrchestrator>,
    repository: web::Data<dyn ImageRepository>,
    image_id: String,
    request: ProcessRequest,
    timeout_secs: u64,
) {
    actix_web::rt::spawn(async move {
        let deadline = Duration::from_secs(timeout_secs);
        match tokio::time::timeout(deadline, orchestrator.process(&image_id, request)).await {
            Ok(outcome) => {
                log::info!(
                    "Background processing of image {} finished: {}",
                    image_id,
                    outcome.status
                );
            }
            Err(_) => {
                log::error!(
                    "Background processing of image {} timed out after {}s",
                    image_id,
                    timeout_secs
                );
                let patch = ImageRecordPatch {
                    status: Some(ImageStatus::MlFailed),
                    error_message: Some(Some(format!(
                        "processing timed out after {}s",
                        timeout_secs
                    ))),
                    ..ImageRecordPatch::default()
                };
                if let Err(e) = repository.update(&image_id, patch).await {
                    log::error!("Failed to record timeout for image {}: {}", image_id, e);
                }
            }
        }
    });
}

async fn list_images(
    user: AuthenticatedUser,
    repository: web::Data<dyn ImageRepository>,
) -> HttpResponse {
    match repository.list_by_owner(user.user_id()).await {
        Ok(records) => HttpResponse::Ok().json(records),
        Err(e) => {
            log::error!("Failed to list images for user {}: {}", user.user_id(), e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to list images".to_string(),
            })
        }
    }
}

/// Loads a record and enforces the owner-or-admin rule shared by the detail,
/// delete and reprocess endpoints.
async fn load_owned_record(
    user: &AuthenticatedUser,
    repository: &web::Data<dyn ImageRepository>,
    image_id: &str,
) -> Result<ImageRecord, HttpResponse> {
    match repository.get(image_id).await {
        Ok(Some(record)) => {
            if record.user_uid != user.user_id() && !user.is_admin() {
                return Err(HttpResponse::Forbidden().json(ErrorResponse {
                    error: "Not allowed to access this image".to_string(),
                }));
            }
            Ok(record)
        }
        Ok(None) => Err(HttpResponse::NotFound().json(ErrorResponse {
            error: "Image not found".to_string(),
        })),
        Err(e) => {
            log::error!("Failed to load image {}: {}", image_id, e);
            Err(HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to load image".to_string(),
            }))
        }
    }
}

async fn get_image_details(
    user: AuthenticatedUser,
    repository: web::Data<dyn ImageRepository>,
    path: web::Path<String>,
) -> HttpResponse {
    let image_id = path.into_inner();
    match load_owned_record(&user, &repository, &image_id).await {
        Ok(record) => HttpResponse::Ok().json(record),
        Err(response) => response,
    }
}

async fn delete_image(
    user: AuthenticatedUser,
    repository: web::Data<dyn ImageRepository>,
    storage: web::Data<dyn ObjectStorage>,
    path: web::Path<String>,
) -> HttpResponse {
    let image_id = path.into_inner();
    let record = match load_owned_record(&user, &repository, &image_id).await {
        Ok(record) => record,
        Err(response) => return response,
    };

    match repository.remove(&image_id).await {
        Ok(Some(removed)) => {
            // Blob cleanup is best effort; the record is already gone.
            if let Err(e) = storage.remove(&removed.storage_key).await {
                log::warn!("Failed to delete stored object {}: {}", removed.storage_key, e);
            }
            if let Some(processed_key) = &removed.processed_storage_key {
                if let Err(e) = storage.remove(processed_key).await {
                    log::warn!("Failed to delete processed object {}: {}", processed_key, e);
                }
            }
            log::info!("User {} deleted image {}", user.user_id(), image_id);
            HttpResponse::Ok().json(json!({
                "message": "Image deleted",
                "image_id": record.image_id
            }))
        }
        Ok(None) => HttpResponse::NotFound().json(ErrorResponse {
            error: "Image not found".to_string(),
        }),
        Err(e) => {
            log::error!("Failed to delete image {}: {}", image_id, e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to delete image".to_string(),
            })
        }
    }
}

async fn reprocess_image(
    user: AuthenticatedUser,
    repository: web::Data<dyn ImageRepository>,
    orchestrator: web::Data<ProcessingOrchestrator>,
    ml_settings: web::Data<MlSettings>,
    app_config: web::Data<AppConfig>,
    path: web::Path<String>,
    body: Option<web::Json<MlConfigUpdate>>,
) -> HttpResponse {
    let image_id = path.into_inner();
    if let Err(response) = load_owned_record(&user, &repository, &image_id).await {
        return response;
    }

    let overrides = body.map(|json| json.into_inner()).unwrap_or_default();
    let config = merge_model_config(ml_settings.current().await, &overrides);
    log::info!(
        "Reprocessing image {} with provider {} (threshold {})",
        image_id,
        config.provider,
        config.confidence_threshold
    );

    let request = ProcessRequest {
        skip_ml: false,
        config,
    };

    if app_config.ml.async_processing {
        spawn_processing(
            orchestrator.clone(),
            repository.clone(),
            image_id.clone(),
            request,
            app_config.ml.processing_timeout_secs,
        );
        let stored = repository.get(&image_id).await.ok().flatten();
        return HttpResponse::Accepted().json(json!({
            "message": "Reprocessing started",
            "image": stored
        }));
    }

    let outcome = orchestrator.process(&image_id, request).await;
    let stored = repository.get(&image_id).await.ok().flatten();
    HttpResponse::Ok().json(json!({
        "message": "Reprocessing complete",
        "image": stored,
        "outcome": outcome
    }))
}

async fn admin_health(
    user: AuthenticatedUser,
    repository: web::Data<dyn ImageRepository>,
    storage: web::Data<dyn ObjectStorage>,
    orchestrator: web::Data<ProcessingOrchestrator>,
) -> HttpResponse {
    if !user.is_admin() {
        return admin_forbidden();
    }

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "repository_backend": repository.backend_name(),
        "storage_backend": storage.backend_name(),
        "hosted_detection": orchestrator.provider_available(ProviderKind::Hosted),
        "local_detection": orchestrator.provider_available(ProviderKind::Local),
    }))
}

async fn admin_analytics(
    user: AuthenticatedUser,
    repository: web::Data<dyn ImageRepository>,
) -> HttpResponse {
    if !user.is_admin() {
        return admin_forbidden();
    }

    let records = match repository.list_all().await {
        Ok(records) => records,
        Err(e) => {
            log::error!("Failed to load analytics data: {}", e);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to load analytics".to_string(),
            });
        }
    };

    let mut status_counts: HashMap<String, u32> = HashMap::new();
    let mut waste_types: HashMap<String, u32> = HashMap::new();
    let mut total_detections: usize = 0;

    for record in &records {
        *status_counts.entry(record.status.to_string()).or_insert(0) += 1;
        if let Some(analysis) = &record.analysis_results {
            total_detections += analysis.total_detections;
            for (class, count) in &analysis.waste_types {
                *waste_types.entry(class.clone()).or_insert(0) += count;
            }
        }
    }

    HttpResponse::Ok().json(json!({
        "total_images": records.len(),
        "status_counts": status_counts,
        "total_detections": total_detections,
        "waste_types": waste_types,
    }))
}

async fn get_ml_config(user: AuthenticatedUser, ml_settings: web::Data<MlSettings>) -> HttpResponse {
    if !user.is_admin() {
        return admin_forbidden();
    }
    HttpResponse::Ok().json(ml_settings.current().await)
}

async fn update_ml_config(
    user: AuthenticatedUser,
    ml_settings: web::Data<MlSettings>,
    body: web::Json<MlConfigUpdate>,
) -> HttpResponse {
    if !user.is_admin() {
        return admin_forbidden();
    }
    let updated = ml_settings.apply(&body.into_inner()).await;
    log::info!(
        "ML defaults updated: provider {}, threshold {}, min size {}, max {}",
        updated.provider,
        updated.confidence_threshold,
        updated.min_detection_size,
        updated.max_detections
    );
    HttpResponse::Ok().json(updated)
}

fn admin_forbidden() -> HttpResponse {
    HttpResponse::Forbidden().json(ErrorResponse {
        error: "Admin access required".to_string(),
    })
}

async fn serve_media(path: web::Path<String>, storage: web::Data<dyn ObjectStorage>) -> HttpResponse {
    let key = path.into_inner();
    match storage.fetch(&key).await {
        Ok(data) => HttpResponse::Ok()
            .content_type(content_type_for_key(&key))
            .body(data),
        Err(StorageError::NotFound(_)) => HttpResponse::NotFound().json(ErrorResponse {
            error: "Object not found".to_string(),
        }),
        Err(e) => {
            log::error!("Failed to read media object {}: {}", key, e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to read object".to_string(),
            })
        }
    }
}
