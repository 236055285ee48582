use axum::Router;
use axum::routing::{get, post};
use routeserver_service::metric;
use routeserver_service::services::SharedServices;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use tower::ServiceBuilder;

mod error;
mod tasks;

pub use error::ResponseError;

use tasks::{clear_tasks, get_task, list_tasks};

pub async fn healthcheck() -> &'static str {
    metric!(counter("healthcheck") += 1);
    "ok"
}

pub fn create_app(services: SharedServices) -> Router {
    // The layers here go "top to bottom" according to the reading order here.
    let layer = ServiceBuilder::new()
        .layer(NewSentryLayer::new_from_top())
        .layer(SentryHttpLayer::new().enable_transaction());
    Router::new()
        .route("/tasks", get(list_tasks))
        .route("/tasks/clear", post(clear_tasks))
        .route("/tasks/:task_id", get(get_task))
        .with_state(services)
        .layer(layer)
        // the healthcheck is last, as it will bypass all the middlewares
        .route("/healthcheck", get(healthcheck))
}
