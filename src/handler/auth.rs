use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use cookie::time::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::{
    handler::{error_response, ErrorResponse},
    service::auth::AuthError,
    state::AppState,
};

const REFRESH_COOKIE: &str = "refreshToken";

#[derive(Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct RegisterResponse {
    pub user_uid: String,
    pub email: String,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct LoginResponse {
    pub access_token: String,
    pub needs_password_change: bool,
}

#[derive(Serialize, ToSchema)]
pub struct AccessTokenResponse {
    pub access_token: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub new_password: String,
}

#[derive(Serialize, ToSchema)]
pub struct StatusResponse {
    pub status: String,
}

fn ok_status() -> Response {
    (
        StatusCode::OK,
        Json(StatusResponse {
            status: "ok".to_string(),
        }),
    )
        .into_response()
}

fn auth_error(err: AuthError) -> Response {
    let status = match err.code {
        "invalid_email" | "invalid_password" => StatusCode::BAD_REQUEST,
        "email_taken" => StatusCode::CONFLICT,
        "invalid_credentials" | "invalid_token" | "missing_token" => StatusCode::UNAUTHORIZED,
        "user_blocked" => StatusCode::FORBIDDEN,
        "reset_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
        _ => {
            tracing::error!(code = err.code, message = %err.message, "auth request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(status, err.code, err.message)
}

fn missing_token() -> Response {
    error_response(StatusCode::UNAUTHORIZED, "missing_token", "token is required")
}

/// Accepts both `Authorization: Bearer <token>` and a bare token.
fn authorization_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let token = match value.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ if value.eq_ignore_ascii_case("bearer") => "",
        _ => value,
    };
    (!token.is_empty()).then_some(token)
}

fn refresh_cookie(state: &AppState, value: String, max_age: Duration) -> Cookie<'static> {
    let mut cookie = Cookie::new(REFRESH_COOKIE, value);
    cookie.set_http_only(true);
    cookie.set_path("/");
    cookie.set_same_site(SameSite::Lax);
    cookie.set_max_age(max_age);
    if state.config().values().is_production() {
        cookie.set_secure(true);
    }
    cookie
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh-token", post(refresh_token))
        .route("/change-password", post(change_password))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
        .route("/logout", post(logout))
        .with_state(state)
}

#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Created", body = RegisterResponse),
        (status = 400, description = "Invalid payload", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Response {
    match state.auth().register(&payload.email, &payload.password).await {
        Ok(user) => (
            StatusCode::CREATED,
            Json(RegisterResponse {
                user_uid: user.uid.to_string(),
                email: user.email,
            }),
        )
            .into_response(),
        Err(err) => auth_error(err),
    }
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in, refresh token set as cookie", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "User blocked", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Response {
    let output = match state.auth().login(&payload.email, &payload.password).await {
        Ok(output) => output,
        Err(err) => return auth_error(err),
    };

    let max_age = Duration::seconds(
        i64::try_from(state.auth().refresh_token_ttl().as_secs()).unwrap_or(i64::MAX),
    );
    let jar = jar.add(refresh_cookie(&state, output.refresh_token, max_age));
    let response = LoginResponse {
        access_token: output.access_token,
        needs_password_change: output.needs_password_change,
    };
    (StatusCode::OK, jar, Json(response)).into_response()
}

#[utoipa::path(
    post,
    path = "/auth/refresh-token",
    responses(
        (status = 200, description = "New access token", body = AccessTokenResponse),
        (status = 401, description = "Missing or invalid refresh token", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn refresh_token(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let Some(cookie) = jar.get(REFRESH_COOKIE) else {
        return missing_token();
    };

    match state.auth().refresh(cookie.value()).await {
        Ok(access_token) => {
            (StatusCode::OK, Json(AccessTokenResponse { access_token })).into_response()
        }
        Err(err) => auth_error(err),
    }
}

#[utoipa::path(
    post,
    path = "/auth/change-password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = StatusResponse),
        (status = 400, description = "New password rejected", body = ErrorResponse),
        (status = 401, description = "Invalid token or old password", body = ErrorResponse)
    ),
    security(("access_token" = [])),
    tag = "auth"
)]
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<ChangePasswordRequest>,
) -> Response {
    let Some(token) = authorization_token(&headers) else {
        return missing_token();
    };

    match state
        .auth()
        .change_password(token, &payload.old_password, &payload.new_password)
        .await
    {
        Ok(()) => ok_status(),
        Err(err) => auth_error(err),
    }
}

#[utoipa::path(
    post,
    path = "/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset link sent if the account exists", body = StatusResponse),
        (status = 503, description = "Password reset not configured", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Response {
    match state.auth().forgot_password(&payload.email).await {
        Ok(()) => ok_status(),
        Err(err) => auth_error(err),
    }
}

#[utoipa::path(
    post,
    path = "/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset", body = StatusResponse),
        (status = 401, description = "Invalid reset token", body = ErrorResponse)
    ),
    security(("access_token" = [])),
    tag = "auth"
)]
pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<ResetPasswordRequest>,
) -> Response {
    let Some(token) = authorization_token(&headers) else {
        return missing_token();
    };

    match state
        .auth()
        .reset_password(token, &payload.email, &payload.new_password)
        .await
    {
        Ok(()) => ok_status(),
        Err(err) => auth_error(err),
    }
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 204, description = "Refresh cookie cleared")
    ),
    tag = "auth"
)]
pub async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    if jar.get(REFRESH_COOKIE).is_none() {
        return StatusCode::NO_CONTENT.into_response();
    }
    let jar = jar.add(refresh_cookie(&state, String::new(), Duration::seconds(0)));
    (StatusCode::NO_CONTENT, jar).into_response()
}
