use axum::{
    http::{header, HeaderValue, Method},
    Router,
};
use std::sync::Arc;
use thiserror::Error;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    handler::{self, auth, health},
    openapi::ApiDoc,
    state::AppState,
};

/// A feature router and the prefix it owns.
pub struct ModuleRoute {
    pub path: &'static str,
    pub router: Router,
}

impl ModuleRoute {
    pub fn new(path: &'static str, router: Router) -> Self {
        Self { path, router }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("invalid route prefix {0:?}: must start with '/', not end with '/', and not be the root")]
    InvalidPrefix(&'static str),
    #[error("route prefix {first:?} overlaps {second:?}")]
    Overlap {
        first: &'static str,
        second: &'static str,
    },
}

/// Mounts feature routers under their prefixes. Prefixes may not overlap,
/// so every request path maps to at most one module regardless of the
/// order entries were declared in.
#[derive(Default)]
pub struct RouteTable {
    entries: Vec<ModuleRoute>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mount(mut self, route: ModuleRoute) -> Self {
        self.entries.push(route);
        self
    }

    pub fn prefixes(&self) -> Vec<&'static str> {
        self.entries.iter().map(|entry| entry.path).collect()
    }

    fn check(&self) -> Result<(), RouteError> {
        for (idx, entry) in self.entries.iter().enumerate() {
            let path = entry.path;
            if !path.starts_with('/') || path.ends_with('/') || path.contains("//") {
                return Err(RouteError::InvalidPrefix(path));
            }
            for earlier in &self.entries[..idx] {
                if overlaps(earlier.path, path) {
                    return Err(RouteError::Overlap {
                        first: earlier.path,
                        second: path,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn into_router(self) -> Result<Router, RouteError> {
        self.check()?;
        let router = self
            .entries
            .into_iter()
            .fold(Router::new(), |root, entry| {
                tracing::debug!(prefix = entry.path, "mounting module routes");
                root.nest(entry.path, entry.router)
            });
        Ok(router)
    }
}

/// `/auth` overlaps `/auth` and `/auth/admin`, but not `/authz`.
fn overlaps(a: &str, b: &str) -> bool {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    long == short || long.strip_prefix(short).is_some_and(|rest| rest.starts_with('/'))
}

pub fn module_routes(state: Arc<AppState>) -> Vec<ModuleRoute> {
    vec![ModuleRoute::new("/auth", auth::routes(state))]
}

pub fn app(state: Arc<AppState>) -> Result<Router, RouteError> {
    let table = module_routes(state.clone())
        .into_iter()
        .fold(RouteTable::new(), RouteTable::mount);
    tracing::info!(prefixes = ?table.prefixes(), "mounting modules");
    let modules = table.into_router()?;

    let config = state.config().values();
    let mut router = Router::new().merge(health::routes()).merge(modules);
    if !config.is_production() {
        router = router.merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()));
    }

    Ok(router
        .fallback(handler::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors(&config.origins)))
}

fn build_cors(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    if origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring unparsable CORS origin");
                None
            }
        })
        .collect();
    // Refresh tokens travel as cookies, which browsers only send cross-origin
    // with credentials enabled and an explicit origin list.
    cors.allow_origin(AllowOrigin::list(parsed))
        .allow_credentials(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::test_config, repo::users::memory::InMemoryUsersRepo,
        service::email::recording::RecordingMailService,
    };
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        routing::any,
    };
    use tower::ServiceExt;

    fn probe(name: &'static str) -> Router {
        Router::new()
            .route("/", any(move || async move { name }))
            .route("/*rest", any(move || async move { name }))
    }

    async fn hit(router: &Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn forwards_prefixed_requests_to_their_module_only() {
        let router = RouteTable::new()
            .mount(ModuleRoute::new("/auth", probe("auth")))
            .mount(ModuleRoute::new("/users", probe("users")))
            .into_router()
            .unwrap();

        assert_eq!(hit(&router, "/auth/login").await, (StatusCode::OK, "auth".into()));
        assert_eq!(hit(&router, "/auth/a/b/c").await, (StatusCode::OK, "auth".into()));
        assert_eq!(hit(&router, "/users/1").await, (StatusCode::OK, "users".into()));
        assert_eq!(hit(&router, "/health").await.0, StatusCode::NOT_FOUND);
        assert_eq!(hit(&router, "/authz/x").await.0, StatusCode::NOT_FOUND);
    }

    #[test]
    fn rejects_overlapping_prefixes() {
        let err = RouteTable::new()
            .mount(ModuleRoute::new("/auth", Router::new()))
            .mount(ModuleRoute::new("/auth/admin", Router::new()))
            .into_router()
            .unwrap_err();
        assert_eq!(
            err,
            RouteError::Overlap {
                first: "/auth",
                second: "/auth/admin"
            }
        );

        let err = RouteTable::new()
            .mount(ModuleRoute::new("/auth", Router::new()))
            .mount(ModuleRoute::new("/auth", Router::new()))
            .into_router()
            .unwrap_err();
        assert!(matches!(err, RouteError::Overlap { .. }));

        assert!(RouteTable::new()
            .mount(ModuleRoute::new("/auth", Router::new()))
            .mount(ModuleRoute::new("/authz", Router::new()))
            .into_router()
            .is_ok());
    }

    #[test]
    fn rejects_malformed_prefixes() {
        for path in ["/", "auth", "/auth/", "//auth"] {
            let err = RouteTable::new()
                .mount(ModuleRoute::new(path, Router::new()))
                .into_router()
                .unwrap_err();
            assert_eq!(err, RouteError::InvalidPrefix(path));
        }
    }

    #[test]
    fn overlap_is_segment_aware() {
        assert!(overlaps("/auth", "/auth"));
        assert!(overlaps("/auth/admin", "/auth"));
        assert!(!overlaps("/auth", "/authz"));
        assert!(!overlaps("/a", "/b"));
    }

    fn state() -> Arc<AppState> {
        AppState::with_parts(
            test_config(),
            Arc::new(InMemoryUsersRepo::default()),
            Arc::new(RecordingMailService::default()),
        )
    }

    #[test]
    fn declares_auth_module() {
        let table = module_routes(state())
            .into_iter()
            .fold(RouteTable::new(), RouteTable::mount);
        assert_eq!(table.prefixes(), vec!["/auth"]);
    }

    #[tokio::test]
    async fn app_serves_health_outside_auth() {
        let app = app(state()).unwrap();
        let (status, body) = hit(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"status":"ok"}"#);

        let (status, body) = hit(&app, "/nowhere").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("\"code\":\"not_found\""));
    }

    #[tokio::test]
    async fn app_routes_auth_paths_to_auth_module() {
        let app = app(state()).unwrap();
        // Only the auth module's JSON extractor answers 415 for a bodiless POST.
        let response = app
            .clone()
            .oneshot(Request::post("/auth/login").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let (status, _) = hit(&app, "/health/login").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
