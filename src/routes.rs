use axum::{
    routing::{get, post},
    Router,
};

use crate::billing;

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/billing/plans", get(billing::billing_list_plans))
        .route(
            "/api/billing/companies/:company_id/quote",
            post(billing::billing_quote_selection),
        )
        .route(
            "/api/billing/companies/:company_id/provision",
            post(billing::billing_provision_subscription),
        )
}
