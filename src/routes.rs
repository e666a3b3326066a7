// Router assembly
// Shared state, the OpenAPI document and the route table.

use axum::{
    extract::{FromRef, State},
    http::Uri,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
    Modify, OpenApi, ToSchema,
};
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use crate::auth::{self, AuthService, SessionAuthProvider, TokenService};
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::persistence::{PersistenceService, Table};
use crate::promotions::{self, handlers as promo};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            )
        }
    }
}

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    paths(
        health,
        promo::create_promotion,
        promo::list_promotions,
        promo::deactivate_promotion,
        promo::delete_promotion,
        promo::evaluate_order,
        promo::apply_promotions,
        promo::metrics,
        auth::handlers::sign_up_handler,
        auth::handlers::sign_in_handler,
        auth::handlers::session_handler,
    ),
    components(
        schemas(
            HealthStatus,
            promotions::Promotion,
            promotions::PromotionDefinition,
            promotions::NewPromotion,
            promotions::models::NewPromotionRule,
            promotions::models::NewPromotionAction,
            promotions::models::NewCategoryEligibility,
            promotions::models::NewCustomerEligibility,
            promotions::models::NewProductEligibility,
            promotions::models::PromotionRule,
            promotions::models::PromotionAction,
            promotions::models::CategoryEligibility,
            promotions::models::CustomerEligibility,
            promotions::models::ProductEligibility,
            promotions::AppliedPromotion,
            promotions::OrderContext,
            promotions::LineItem,
            promotions::CustomerContext,
            promotions::DiscountResult,
            promotions::FreeItem,
            promotions::EvaluatedPromotion,
            promotions::ApplyOutcome,
            promotions::DeclinedPromotion,
            promotions::DeclineReason,
            promotions::MetricsSummary,
            promotions::types::PromotionType,
            promotions::types::DiscountType,
            promotions::types::RuleType,
            promotions::types::RuleOperator,
            promotions::types::LogicalOperator,
            promotions::types::ActionType,
            promotions::types::TargetType,
            promotions::types::CustomerGroup,
            promo::ApplyRequest,
            auth::Session,
            auth::AuthUser,
            auth::RegisterRequest,
            auth::LoginRequest,
        )
    ),
    tags(
        (name = "promotions", description = "Promotion catalog and order evaluation"),
        (name = "auth", description = "Sign-up, sign-in and session lookup"),
        (name = "health", description = "Liveness")
    ),
    info(
        title = "Promotion Engine API",
        version = "0.1.0",
        description = "Evaluates and applies multi-tenant promotions to orders"
    )
)]
pub struct ApiDoc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<promotions::PromotionEngine>,
    pub auth: Arc<AuthService>,
    pub tokens: TokenService,
    pub store: Arc<dyn PersistenceService>,
}

impl AppState {
    /// Wire the engine and auth services over one store
    pub fn build(config: &AppConfig, store: Arc<dyn PersistenceService>) -> Self {
        let tokens = TokenService::with_ttl(config.jwt_secret.clone(), config.session_ttl_seconds);
        let auth = Arc::new(AuthService::new(store.clone(), tokens.clone()));
        let provider = Arc::new(SessionAuthProvider::new(auth.clone()));
        let engine = Arc::new(promotions::PromotionEngine::with_cache_ttl(
            store.clone(),
            provider,
            config.catalog_cache_ttl,
        ));

        Self {
            engine,
            auth,
            tokens,
            store,
        }
    }
}

impl FromRef<AppState> for Arc<promotions::PromotionEngine> {
    fn from_ref(state: &AppState) -> Self {
        state.engine.clone()
    }
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

impl FromRef<AppState> for TokenService {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
}

/// Handler for GET /health
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service and store are up", body = HealthStatus),
        (status = 503, description = "Store unreachable")
    ),
    tag = "health"
)]
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthStatus>, ApiError> {
    // Any round trip proves the store answers
    state.store.get(Table::Promotions, Uuid::nil()).await?;
    Ok(Json(HealthStatus {
        status: "ok".to_string(),
    }))
}

async fn fallback(uri: Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}

/// Creates and configures the application router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(health))
        .route("/api/auth/sign-up", post(auth::sign_up_handler))
        .route("/api/auth/sign-in", post(auth::sign_in_handler))
        .route("/api/auth/session", get(auth::session_handler))
        .route("/api/promotions", post(promo::create_promotion))
        .route("/api/promotions/evaluate", post(promo::evaluate_order))
        .route("/api/promotions/apply", post(promo::apply_promotions))
        .route("/api/promotions/metrics", get(promo::metrics))
        .route("/api/promotions/:id", axum::routing::delete(promo::delete_promotion))
        .route("/api/promotions/:id/deactivate", post(promo::deactivate_promotion))
        .route("/api/tenants/:tenant_id/promotions", get(promo::list_promotions))
        .fallback(fallback)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
