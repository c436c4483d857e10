use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEMO_ADMIN_ID: Uuid = Uuid::from_u128(1);
pub const DEMO_USER_ID: Uuid = Uuid::from_u128(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User ID.
    pub sub: String,
    pub username: String,
    pub role: Role,
    pub exp: usize,
    pub iat: usize,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: AuthUser,
}

struct DemoAccount {
    user: fn() -> AuthUser,
    password: &'static str,
}

fn demo_admin() -> AuthUser {
    AuthUser {
        id: DEMO_ADMIN_ID,
        username: "admin".to_string(),
        email: "admin@binsight.dev".to_string(),
        role: Role::Admin,
    }
}

fn demo_user() -> AuthUser {
    AuthUser {
        id: DEMO_USER_ID,
        username: "user".to_string(),
        email: "user@binsight.dev".to_string(),
        role: Role::User,
    }
}

// Fixed demo accounts; real identity federation is out of scope for now.
const DEMO_ACCOUNTS: [DemoAccount; 2] = [
    DemoAccount {
        user: demo_admin,
        password: "admin123",
    },
    DemoAccount {
        user: demo_user,
        password: "user123",
    },
];

pub fn authenticate_demo(username: &str, password: &str) -> Option<AuthUser> {
    DEMO_ACCOUNTS.iter().find_map(|account| {
        let user = (account.user)();
        (user.username == username && account.password == password).then_some(user)
    })
}

pub fn find_demo_user(user_id: Uuid) -> Option<AuthUser> {
    DEMO_ACCOUNTS.iter().find_map(|account| {
        let user = (account.user)();
        (user.id == user_id).then_some(user)
    })
}
