use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod middleware;
pub mod payments;
pub mod rentals;
pub mod state;
pub mod webhooks;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    // Everything here needs a bearer token
    let protected = Router::new()
        .route("/api/rentals", post(rentals::create_rental))
        .route("/api/rentals/user", get(rentals::list_user_rentals))
        .route(
            "/api/rentals/{id}",
            get(rentals::get_rental).delete(rentals::cancel_rental),
        )
        .route(
            "/api/payment/create-payment-intent",
            post(payments::create_payment_intent),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::user_auth_middleware,
        ));

    Router::new()
        .merge(protected)
        .route("/api/payment/webhook", post(webhooks::payment_webhook))
        .route("/health", get(|| async { "ok" }))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
