use utoipa::OpenApi;

use crate::handler::{
    self,
    auth::{
        AccessTokenResponse, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest,
        LoginResponse, RegisterRequest, RegisterResponse, ResetPasswordRequest, StatusResponse,
    },
    health::Health,
    ErrorResponse,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        handler::health::health,
        handler::auth::register,
        handler::auth::login,
        handler::auth::refresh_token,
        handler::auth::change_password,
        handler::auth::forgot_password,
        handler::auth::reset_password,
        handler::auth::logout
    ),
    components(schemas(
        Health,
        ErrorResponse,
        RegisterRequest,
        RegisterResponse,
        LoginRequest,
        LoginResponse,
        AccessTokenResponse,
        ChangePasswordRequest,
        ForgotPasswordRequest,
        ResetPasswordRequest,
        StatusResponse
    )),
    tags(
        (name = "health", description = "Health check"),
        (name = "auth", description = "Password authentication")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_every_auth_path() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        for expected in [
            "/health",
            "/auth/register",
            "/auth/login",
            "/auth/refresh-token",
            "/auth/change-password",
            "/auth/forgot-password",
            "/auth/reset-password",
            "/auth/logout",
        ] {
            assert!(
                paths.iter().any(|path| path.as_str() == expected),
                "missing {expected}"
            );
        }
    }
}
