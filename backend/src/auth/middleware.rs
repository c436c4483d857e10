use super::jwt::JwtService;
use super::models::Role;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage, HttpResponse,
};
use actix_web::{FromRequest, HttpRequest};
use futures::future::{ok, Ready};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

/// Identity attached to a request after token verification.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: Role,
}

#[derive(Clone)]
pub struct AuthMiddleware {
    jwt_service: Arc<JwtService>,
}

impl AuthMiddleware {
    pub fn new(jwt_service: JwtService) -> Self {
        Self {
            jwt_service: Arc::new(jwt_service),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<actix_web::body::EitherBody<B>>;
    type Error = Error;
    type Transform = AuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddlewareService {
            service: Arc::new(service),
            jwt_service: self.jwt_service.clone(),
        })
    }
}

pub struct AuthMiddlewareService<S> {
    service: Arc<S>,
    jwt_service: Arc<JwtService>,
}

#[derive(Debug)]
enum AuthError {
    NoAuthHeader,
    InvalidHeaderFormat,
    NotBearerToken,
    VerificationFailed(String),
    InvalidUuidInClaims(String),
}

impl AuthError {
    fn log_message(&self, path: &str) -> String {
        match self {
            AuthError::NoAuthHeader => format!("No Authorization header found for path: {}", path),
            AuthError::InvalidHeaderFormat => format!(
                "Invalid Authorization header format (non-UTF-8) for path: {}",
                path
            ),
            AuthError::NotBearerToken => format!(
                "Authorization header for path {} doesn't start with 'Bearer '",
                path
            ),
            AuthError::VerificationFailed(e) => {
                format!("JWT token verification failed for path {}: {}", path, e)
            }
            AuthError::InvalidUuidInClaims(sub) => {
                format!("Invalid UUID in JWT claims.sub for path {}: {}", path, sub)
            }
        }
    }

    fn client_error_json(&self) -> serde_json::Value {
        let error_message = match self {
            AuthError::InvalidUuidInClaims(_) => "Invalid token claims",
            AuthError::VerificationFailed(_) => "Token verification failed",
            _ => "Missing or invalid authorization token",
        };
        serde_json::json!({"error": error_message})
    }
}

/// Paths reachable without a token: health probes, login and served media.
fn is_public_path(path: &str) -> bool {
    path == "/"
        || path == "/api/health"
        || path == "/api/users/health"
        || path == "/api/images/health"
        || path == "/api/users/login"
        || path.starts_with("/media/")
}

fn validate_request_token(
    req: &ServiceRequest,
    jwt_service: &JwtService,
) -> Result<AuthContext, AuthError> {
    let auth_header = req
        .headers()
        .get("Authorization")
        .ok_or(AuthError::NoAuthHeader)?;
    let auth_str = auth_header
        .to_str()
        .map_err(|_| AuthError::InvalidHeaderFormat)?;
    let token = auth_str
        .strip_prefix("Bearer ")
        .ok_or(AuthError::NotBearerToken)?;

    let claims = jwt_service
        .verify_token(token)
        .map_err(|e| AuthError::VerificationFailed(format!("{:?}", e)))?;

    log::debug!("JWT token verified for user: {}", claims.username);
    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| AuthError::InvalidUuidInClaims(claims.sub.clone()))?;

    Ok(AuthContext {
        user_id,
        role: claims.role,
    })
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<actix_web::body::EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let jwt_service = self.jwt_service.clone();

        Box::pin(async move {
            let path_str = req.path().to_string();

            if is_public_path(&path_str) {
                let res = service.call(req).await?;
                return Ok(res.map_into_left_body());
            }
            log::debug!("Auth middleware processing path: {}", &path_str);

            match validate_request_token(&req, &jwt_service) {
                Ok(context) => {
                    req.extensions_mut().insert(context);
                    let res = service.call(req).await?;
                    Ok(res.map_into_left_body())
                }
                Err(auth_error) => {
                    log::warn!("{}", auth_error.log_message(&path_str));

                    let (http_req, _payload) = req.into_parts();
                    let response = HttpResponse::Unauthorized()
                        .json(auth_error.client_error_json())
                        .map_into_right_body();
                    Ok(ServiceResponse::new(http_req, response))
                }
            }
        })
    }
}

pub struct AuthenticatedUser(pub AuthContext);

impl AuthenticatedUser {
    pub fn user_id(&self) -> Uuid {
        self.0.user_id
    }

    pub fn is_admin(&self) -> bool {
        self.0.role == Role::Admin
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        match req.extensions().get::<AuthContext>() {
            Some(context) => ok(AuthenticatedUser(*context)),
            None => {
                // Only reachable when a handler using this extractor is
                // registered outside the auth middleware scope.
                log::warn!(
                    "AuthenticatedUser extractor: no auth context in request extensions for path: {}",
                    req.path()
                );
                ok(AuthenticatedUser(AuthContext {
                    user_id: Uuid::nil(),
                    role: Role::User,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_paths_skip_authentication() {
        assert!(is_public_path("/api/health"));
        assert!(is_public_path("/api/users/login"));
        assert!(is_public_path("/media/images/u1/abc.png"));
        assert!(is_public_path("/"));
    }

    #[test]
    fn protected_paths_require_authentication() {
        assert!(!is_public_path("/api/images/list"));
        assert!(!is_public_path("/api/images/upload"));
        assert!(!is_public_path("/api/admin/analytics"));
        assert!(!is_public_path("/api/users/profile"));
    }
}
