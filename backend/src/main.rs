use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_s3::Client as S3Client;
use backend::auth::jwt::JwtService;
use backend::auth::middleware::AuthMiddleware;
use backend::config::{AppConfig, MlSettings, RepositoryBackend, StorageBackend};
use backend::db::dynamodb_repository::DynamoDbRepository;
use backend::db::memory_repository::MemoryRepository;
use backend::db::ImageRepository;
use backend::ml::hosted::HostedDetector;
use backend::ml::orchestrator::ProcessingOrchestrator;
use backend::ml::provider::DetectionProvider;
use backend::routes::configure_routes;
use backend::storage::memory_service::MemoryStorage;
use backend::storage::s3_service::S3Service;
use backend::storage::ObjectStorage;
use std::sync::Arc;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv::dotenv().ok();

    let app_config = AppConfig::from_env();

    let needs_aws = app_config.storage.backend == StorageBackend::S3
        || app_config.repository.backend == RepositoryBackend::DynamoDb;
    let aws_config = if needs_aws {
        Some(aws_config::defaults(BehaviorVersion::latest()).load().await)
    } else {
        None
    };

    let storage: Arc<dyn ObjectStorage> = match (&aws_config, &app_config.storage.s3_bucket) {
        (Some(aws), Some(bucket)) if app_config.storage.backend == StorageBackend::S3 => {
            log::info!("Using S3 object storage (bucket: {})", bucket);
            Arc::new(S3Service::new(
                S3Client::new(aws),
                bucket.clone(),
                app_config.storage.aws_region.clone(),
            ))
        }
        _ => {
            log::info!(
                "Using in-memory object storage served at {}/media",
                app_config.base_url
            );
            Arc::new(MemoryStorage::new(app_config.base_url.clone()))
        }
    };

    let repository: Arc<dyn ImageRepository> = match (&aws_config, &app_config.repository.images_table)
    {
        (Some(aws), Some(table)) if app_config.repository.backend == RepositoryBackend::DynamoDb => {
            log::info!("Using DynamoDB image repository (table: {})", table);
            Arc::new(DynamoDbRepository::new(DynamoDbClient::new(aws), table.clone()))
        }
        _ => {
            log::info!("Using in-memory image repository");
            Arc::new(MemoryRepository::new())
        }
    };

    let hosted: Option<Arc<dyn DetectionProvider>> =
        match HostedDetector::from_config(&app_config.detector) {
            Some(detector) => {
                log::info!("Hosted detection configured (model: {})", detector.model_id());
                Some(Arc::new(detector))
            }
            None => {
                log::warn!(
                    "Hosted detection is not configured (set DETECTOR_API_KEY); provider disabled"
                );
                None
            }
        };

    #[cfg(feature = "local-ml")]
    let local: Option<Arc<dyn DetectionProvider>> =
        match backend::ml::local::LocalDetector::from_config(&app_config.local_model) {
            Some(detector) => {
                log::info!("Local detection configured ({})", detector.model_id());
                Some(Arc::new(detector))
            }
            None => None,
        };
    #[cfg(not(feature = "local-ml"))]
    let local: Option<Arc<dyn DetectionProvider>> = {
        if app_config.local_model.model_path.is_some() {
            log::warn!(
                "LOCAL_MODEL_PATH is set but this build has no local model support \
                 (enable the local-ml feature)"
            );
        }
        None
    };

    let orchestrator = Arc::new(ProcessingOrchestrator::new(
        repository.clone(),
        storage.clone(),
        hosted,
        local,
    ));

    let jwt_service = JwtService::new(&app_config.jwt_secret);
    let auth_middleware = AuthMiddleware::new(jwt_service.clone());
    let ml_settings = web::Data::new(MlSettings::new(app_config.ml.defaults));

    log::info!("Login: {}/api/users/login (demo accounts)", app_config.base_url);

    let bind_address = format!("0.0.0.0:{}", app_config.port);
    log::info!("Starting server on {}", bind_address);

    let repository_data: web::Data<dyn ImageRepository> = web::Data::from(repository);
    let storage_data: web::Data<dyn ObjectStorage> = web::Data::from(storage);
    let orchestrator_data = web::Data::from(orchestrator);
    let app_config_data = web::Data::new(app_config);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::AUTHORIZATION,
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(repository_data.clone())
            .app_data(storage_data.clone())
            .app_data(orchestrator_data.clone())
            .app_data(web::Data::new(jwt_service.clone()))
            .app_data(ml_settings.clone())
            .app_data(app_config_data.clone())
            .configure(|cfg| configure_routes(cfg, auth_middleware.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}
