//! Fixtures shared by the handler and service tests.

use axum::{
    body::{to_bytes, Body},
    extract::FromRef,
    http::{header, Method, Request, StatusCode},
};
use argon2::{password_hash::SaltString, Argon2, PasswordHasher};
use rand::rngs::OsRng;
use serde_json::Value;
use tower::ServiceExt;

use crate::auth::{
    dto::JwtKeys,
    repo_types::{NewUser, User},
};
use crate::state::AppState;

/// Argon2 PHC string for `plain`, as an operator would put in `DEFAULT_PASS_HASH`.
pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .to_string();
    Ok(hash)
}

pub async fn insert_user(state: &AppState, username: &str, admin: bool) -> User {
    let mut conn = state.db.acquire().await.unwrap();
    crate::auth::repo::insert_user(
        &mut conn,
        &NewUser {
            username: username.into(),
            email: format!("{username}@example.com"),
            password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$aGFzaGhhc2g".into(),
            admin,
        },
    )
    .await
    .unwrap()
}

pub fn token(state: &AppState, user_id: i64) -> String {
    JwtKeys::from_ref(state).sign_access(user_id).unwrap()
}

/// Sends one request through the full router and decodes the JSON reply
/// (`Value::Null` for empty bodies).
pub async fn call(
    state: &AppState,
    method: Method,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(t) = bearer {
        req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
    }
    let req = match body {
        Some(json) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };

    let res = crate::app::build_app(state.clone()).oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}
