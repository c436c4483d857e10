use actix_web::{web, HttpResponse, Result};

use super::jwt::JwtService;
use super::middleware::AuthenticatedUser;
use super::models::{authenticate_demo, find_demo_user, AuthResponse, LoginRequest};

#[derive(serde::Serialize)]
struct ErrorResponse {
    error: String,
}

pub async fn users_health() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "message": "Users API is running"
    })))
}

pub async fn login(
    jwt_service: web::Data<JwtService>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse> {
    match authenticate_demo(&body.username, &body.password) {
        Some(user) => match jwt_service.generate_token(&user) {
            Ok(token) => {
                log::info!("User {} logged in", user.username);
                Ok(HttpResponse::Ok().json(AuthResponse { token, user }))
            }
            Err(e) => {
                log::error!("Failed to generate token for {}: {}", user.username, e);
                Ok(HttpResponse::InternalServerError().json(ErrorResponse {
                    error: "Failed to issue token".to_string(),
                }))
            }
        },
        None => {
            log::warn!("Failed login attempt for username '{}'", body.username);
            Ok(HttpResponse::Unauthorized().json(ErrorResponse {
                error: "Invalid username or password".to_string(),
            }))
        }
    }
}

pub async fn profile(user: AuthenticatedUser) -> Result<HttpResponse> {
    if user.user_id().is_nil() {
        return Ok(HttpResponse::Unauthorized().json(ErrorResponse {
            error: "Invalid user ID".to_string(),
        }));
    }

    match find_demo_user(user.user_id()) {
        Some(account) => Ok(HttpResponse::Ok().json(account)),
        None => Ok(HttpResponse::NotFound().json(ErrorResponse {
            error: "Unknown user".to_string(),
        })),
    }
}

pub async fn refresh(
    user: AuthenticatedUser,
    jwt_service: web::Data<JwtService>,
) -> Result<HttpResponse> {
    let Some(account) = find_demo_user(user.user_id()) else {
        return Ok(HttpResponse::Unauthorized().json(ErrorResponse {
            error: "Unknown user".to_string(),
        }));
    };

    match jwt_service.refresh_token(&account) {
        Ok(token) => Ok(HttpResponse::Ok().json(AuthResponse {
            token,
            user: account,
        })),
        Err(e) => {
            log::error!("Failed to refresh token for {}: {}", account.username, e);
            Ok(HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to issue token".to_string(),
            }))
        }
    }
}
