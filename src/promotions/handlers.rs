// HTTP handlers for the promotion engine
//
// Catalog administration plus the two engine entry points (evaluate, apply).
// Administration and apply are bearer-protected and scoped to the caller's tenant.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::promotions::{
    ApplyOutcome, EvaluatedPromotion, MetricsSummary, NewPromotion, OrderContext,
    PromoResult, Promotion, PromotionDefinition, PromotionEngine,
};

/// Request body for POST /api/promotions/apply
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ApplyRequest {
    pub order: OrderContext,
    /// Promotion ids the caller wants applied
    pub selections: Vec<Uuid>,
}

/// Handler for POST /api/promotions
#[utoipa::path(
    post,
    path = "/api/promotions",
    request_body = NewPromotion,
    responses(
        (status = 201, description = "Promotion created", body = PromotionDefinition),
        (status = 400, description = "Invalid promotion", body = String, example = json!({"error": "Invalid promotion", "details": "percentage discount 150 exceeds 100"})),
        (status = 401, description = "Missing or invalid token"),
        (status = 403, description = "Promotion belongs to another tenant")
    ),
    security(("bearer_auth" = [])),
    tag = "promotions"
)]
pub async fn create_promotion(
    State(engine): State<Arc<PromotionEngine>>,
    user: AuthenticatedUser,
    Json(request): Json<NewPromotion>,
) -> PromoResult<(StatusCode, Json<PromotionDefinition>)> {
    user.authorize_tenant(request.tenant_id)?;
    tracing::debug!("User {} creating promotion: {}", user.user_id, request.name);
    let definition = engine.catalog().create_promotion(request).await?;
    Ok((StatusCode::CREATED, Json(definition)))
}

/// Handler for GET /api/tenants/:tenant_id/promotions
#[utoipa::path(
    get,
    path = "/api/tenants/{tenant_id}/promotions",
    params(
        ("tenant_id" = Uuid, Path, description = "Tenant ID")
    ),
    responses(
        (status = 200, description = "All promotions of the tenant", body = Vec<PromotionDefinition>),
        (status = 401, description = "Missing or invalid token"),
        (status = 403, description = "Caller belongs to another tenant")
    ),
    security(("bearer_auth" = [])),
    tag = "promotions"
)]
pub async fn list_promotions(
    State(engine): State<Arc<PromotionEngine>>,
    user: AuthenticatedUser,
    Path(tenant_id): Path<Uuid>,
) -> PromoResult<Json<Vec<PromotionDefinition>>> {
    user.authorize_tenant(tenant_id)?;
    Ok(Json(engine.catalog().list_all(tenant_id).await?))
}

/// Handler for POST /api/promotions/:id/deactivate
#[utoipa::path(
    post,
    path = "/api/promotions/{id}/deactivate",
    params(
        ("id" = Uuid, Path, description = "Promotion ID")
    ),
    responses(
        (status = 200, description = "Promotion deactivated", body = Promotion),
        (status = 403, description = "Promotion belongs to another tenant"),
        (status = 404, description = "Promotion not found")
    ),
    security(("bearer_auth" = [])),
    tag = "promotions"
)]
pub async fn deactivate_promotion(
    State(engine): State<Arc<PromotionEngine>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> PromoResult<Json<Promotion>> {
    user.authorize_tenant(engine.catalog().owner_of(id).await?)?;
    Ok(Json(engine.catalog().deactivate_promotion(id).await?))
}

/// Handler for DELETE /api/promotions/:id
#[utoipa::path(
    delete,
    path = "/api/promotions/{id}",
    params(
        ("id" = Uuid, Path, description = "Promotion ID")
    ),
    responses(
        (status = 204, description = "Promotion deleted"),
        (status = 403, description = "Promotion belongs to another tenant"),
        (status = 404, description = "Promotion not found")
    ),
    security(("bearer_auth" = [])),
    tag = "promotions"
)]
pub async fn delete_promotion(
    State(engine): State<Arc<PromotionEngine>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> PromoResult<StatusCode> {
    user.authorize_tenant(engine.catalog().owner_of(id).await?)?;
    engine.catalog().delete_promotion(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for POST /api/promotions/evaluate
#[utoipa::path(
    post,
    path = "/api/promotions/evaluate",
    request_body = OrderContext,
    responses(
        (status = 200, description = "Promotions that apply to the order", body = Vec<EvaluatedPromotion>),
        (status = 400, description = "Negative or overflowing amounts in the order")
    ),
    tag = "promotions"
)]
pub async fn evaluate_order(
    State(engine): State<Arc<PromotionEngine>>,
    Json(order): Json<OrderContext>,
) -> PromoResult<Json<Vec<EvaluatedPromotion>>> {
    Ok(Json(engine.evaluate_order(&order).await?))
}

/// Handler for POST /api/promotions/apply
#[utoipa::path(
    post,
    path = "/api/promotions/apply",
    request_body = ApplyRequest,
    responses(
        (status = 200, description = "Applied and declined selections", body = ApplyOutcome),
        (status = 401, description = "Missing or invalid token"),
        (status = 403, description = "Order belongs to another tenant")
    ),
    security(("bearer_auth" = [])),
    tag = "promotions"
)]
pub async fn apply_promotions(
    State(engine): State<Arc<PromotionEngine>>,
    user: AuthenticatedUser,
    Json(request): Json<ApplyRequest>,
) -> PromoResult<Json<ApplyOutcome>> {
    user.authorize_tenant(request.order.tenant_id)?;
    tracing::debug!(
        "User {} applying {} promotion(s) to order {}",
        user.user_id,
        request.selections.len(),
        request.order.order_id
    );
    let outcome = engine
        .apply_promotions_as(&request.order, &request.selections, Some(user.user_id))
        .await?;
    Ok(Json(outcome))
}

/// Handler for GET /api/promotions/metrics
#[utoipa::path(
    get,
    path = "/api/promotions/metrics",
    responses(
        (status = 200, description = "Engine counters", body = MetricsSummary)
    ),
    tag = "promotions"
)]
pub async fn metrics(State(engine): State<Arc<PromotionEngine>>) -> Json<MetricsSummary> {
    Json(engine.metrics().summary())
}


#[cfg(test)]
mod tests {
    use crate::config::AppConfig;
    use crate::persistence::InMemoryStore;
    use crate::routes::{create_router, AppState};
    use axum::http::{header, HeaderValue, StatusCode};
    use axum_test::TestServer;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use uuid::Uuid;

    fn server() -> TestServer {
        let config = AppConfig::for_tests();
        let state = AppState::build(&config, Arc::new(InMemoryStore::new()));
        TestServer::new(create_router(state)).unwrap()
    }

    fn promotion_payload(tenant_id: Uuid) -> Value {
        json!({
            "tenant_id": tenant_id,
            "name": "Spring sale",
            "promotion_type": "percentage",
            "discount_type": "percentage",
            "discount_value": "10",
            "maximum_discount_amount": "15",
            "start_date": "2020-01-01T00:00:00Z",
            "rules": [
                { "rule_type": "order", "field_name": "order.total", "operator": "greater_than", "value": "100" }
            ]
        })
    }

    fn order_payload(tenant_id: Uuid, unit_price: &str) -> Value {
        json!({
            "order_id": Uuid::new_v4(),
            "tenant_id": tenant_id,
            "customer": { "id": Uuid::new_v4(), "groups": ["retail"] },
            "items": [
                { "product_id": Uuid::new_v4(), "category": "tools", "quantity": 1, "unit_price": unit_price }
            ]
        })
    }

    /// A signed-up staff member and the tenant their sign-up opened
    struct Staff {
        token: String,
        tenant_id: Uuid,
    }

    impl Staff {
        fn bearer(&self) -> HeaderValue {
            HeaderValue::from_str(&format!("Bearer {}", self.token)).unwrap()
        }
    }

    async fn sign_up(server: &TestServer, email: &str) -> Staff {
        let response = server
            .post("/api/auth/sign-up")
            .json(&json!({ "email": email, "password": "password123" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);
        let session: Value = response.json();
        Staff {
            token: session["access_token"].as_str().unwrap().to_string(),
            tenant_id: session["user"]["tenant_id"].as_str().unwrap().parse().unwrap(),
        }
    }

    async fn create(server: &TestServer, staff: &Staff) -> Value {
        let response = server
            .post("/api/promotions")
            .add_header(header::AUTHORIZATION, staff.bearer())
            .json(&promotion_payload(staff.tenant_id))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);
        response.json()
    }

    #[tokio::test]
    async fn test_create_and_list_promotions() {
        let server = server();
        let staff = sign_up(&server, "owner@example.com").await;

        let created = create(&server, &staff).await;
        assert_eq!(created["rules"].as_array().unwrap().len(), 1);

        let response = server
            .get(&format!("/api/tenants/{}/promotions", staff.tenant_id))
            .add_header(header::AUTHORIZATION, staff.bearer())
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let listed: Value = response.json();
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_admin_routes_require_bearer_token() {
        let server = server();
        let tenant_id = Uuid::new_v4();

        let response = server
            .post("/api/promotions")
            .json(&promotion_payload(tenant_id))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

        let response = server.get(&format!("/api/tenants/{}/promotions", tenant_id)).await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

        let response = server.delete(&format!("/api/promotions/{}", Uuid::new_v4())).await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_cross_tenant_admin_is_forbidden() {
        let server = server();
        let owner = sign_up(&server, "owner@example.com").await;
        let other = sign_up(&server, "other@example.com").await;
        let created = create(&server, &owner).await;
        let id = created["promotion"]["id"].as_str().unwrap().to_string();

        let response = server
            .post("/api/promotions")
            .add_header(header::AUTHORIZATION, other.bearer())
            .json(&promotion_payload(owner.tenant_id))
            .await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
        let body: Value = response.json();
        assert_eq!(body["error"], "Forbidden");

        let response = server
            .get(&format!("/api/tenants/{}/promotions", owner.tenant_id))
            .add_header(header::AUTHORIZATION, other.bearer())
            .await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

        let response = server
            .post(&format!("/api/promotions/{}/deactivate", id))
            .add_header(header::AUTHORIZATION, other.bearer())
            .await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

        let response = server
            .delete(&format!("/api/promotions/{}", id))
            .add_header(header::AUTHORIZATION, other.bearer())
            .await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

        // Untouched for its owner
        let response = server
            .get(&format!("/api/tenants/{}/promotions", owner.tenant_id))
            .add_header(header::AUTHORIZATION, owner.bearer())
            .await;
        let listed: Value = response.json();
        assert_eq!(listed[0]["promotion"]["is_active"], true);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_percentage() {
        let server = server();
        let staff = sign_up(&server, "owner@example.com").await;
        let mut payload = promotion_payload(staff.tenant_id);
        payload["discount_value"] = json!("150");

        let response = server
            .post("/api/promotions")
            .add_header(header::AUTHORIZATION, staff.bearer())
            .json(&payload)
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"], "Invalid promotion");

        let mut payload = promotion_payload(staff.tenant_id);
        payload["actions"] = json!([
            { "action_type": "discount_percentage", "target_type": "order", "action_value": "250" }
        ]);
        let response = server
            .post("/api/promotions")
            .add_header(header::AUTHORIZATION, staff.bearer())
            .json(&payload)
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_evaluate_endpoint_applies_cap_and_rules() {
        let server = server();
        let staff = sign_up(&server, "owner@example.com").await;
        create(&server, &staff).await;

        let response = server
            .post("/api/promotions/evaluate")
            .json(&order_payload(staff.tenant_id, "200"))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let results: Value = response.json();
        assert_eq!(results.as_array().unwrap().len(), 1);
        assert_eq!(results[0]["discount"]["amount"], "15");

        let response = server
            .post("/api/promotions/evaluate")
            .json(&order_payload(staff.tenant_id, "100"))
            .await;
        let results: Value = response.json();
        assert!(results.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_evaluate_rejects_overflowing_order() {
        let server = server();
        let mut order = order_payload(Uuid::new_v4(), "79228162514264337593543950335");
        order["items"][0]["quantity"] = json!(2);

        let response = server.post("/api/promotions/evaluate").json(&order).await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"], "Validation error");
    }

    #[tokio::test]
    async fn test_apply_requires_bearer_token() {
        let server = server();
        let response = server
            .post("/api/promotions/apply")
            .json(&json!({ "order": order_payload(Uuid::new_v4(), "200"), "selections": [] }))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_apply_records_caller() {
        let server = server();
        let staff = sign_up(&server, "cashier@example.com").await;
        let created = create(&server, &staff).await;

        let response = server
            .post("/api/promotions/apply")
            .add_header(header::AUTHORIZATION, staff.bearer())
            .json(&json!({
                "order": order_payload(staff.tenant_id, "200"),
                "selections": [created["promotion"]["id"]]
            }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let outcome: Value = response.json();
        assert_eq!(outcome["applied"].as_array().unwrap().len(), 1);
        assert!(outcome["applied"][0]["applied_by"].is_string());
    }

    #[tokio::test]
    async fn test_apply_to_other_tenant_order_is_forbidden() {
        let server = server();
        let owner = sign_up(&server, "owner@example.com").await;
        let other = sign_up(&server, "other@example.com").await;
        let created = create(&server, &owner).await;

        let response = server
            .post("/api/promotions/apply")
            .add_header(header::AUTHORIZATION, other.bearer())
            .json(&json!({
                "order": order_payload(owner.tenant_id, "200"),
                "selections": [created["promotion"]["id"]]
            }))
            .await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

        let summary: Value = server.get("/api/promotions/metrics").await.json();
        assert_eq!(summary["applications_committed"], 0);
    }

    #[tokio::test]
    async fn test_deactivate_and_delete() {
        let server = server();
        let staff = sign_up(&server, "owner@example.com").await;
        let created = create(&server, &staff).await;
        let id = created["promotion"]["id"].as_str().unwrap().to_string();

        let response = server
            .post(&format!("/api/promotions/{}/deactivate", id))
            .add_header(header::AUTHORIZATION, staff.bearer())
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let promotion: Value = response.json();
        assert_eq!(promotion["is_active"], false);

        let response = server
            .delete(&format!("/api/promotions/{}", id))
            .add_header(header::AUTHORIZATION, staff.bearer())
            .await;
        assert_eq!(response.status_code(), StatusCode::NO_CONTENT);

        let response = server
            .delete(&format!("/api/promotions/{}", id))
            .add_header(header::AUTHORIZATION, staff.bearer())
            .await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let server = server();
        server
            .post("/api/promotions/evaluate")
            .json(&order_payload(Uuid::new_v4(), "50"))
            .await;

        let response = server.get("/api/promotions/metrics").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let summary: Value = response.json();
        assert_eq!(summary["evaluations"], 1);
    }
}
