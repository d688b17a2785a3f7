use crate::credits::service::CreditService;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Credit accounting service. Backed by the Postgres repositories in
    /// production; tests wire the in-memory ones instead.
    pub credits: CreditService,
}
