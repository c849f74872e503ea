//! Shared setup for the integration tests.
//!
//! Tests run the full actix app against the in-memory store, so no database
//! is needed. The concrete `MemoryStore` handle is kept alongside the state
//! so tests can seed and inspect storage directly.

use std::sync::Arc;

use actix_http::Request;
use actix_web::body::MessageBody;
use actix_web::dev::{Service, ServiceResponse};
use actix_web::{test, web, App, Error};

use taskdeck::auth::AuthMiddleware;
use taskdeck::notify::LogSender;
use taskdeck::store::MemoryStore;
use taskdeck::{routes, AppState};

pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub state: web::Data<AppState>,
}

pub fn test_context() -> TestContext {
    std::env::set_var("JWT_SECRET", "integration_test_secret");
    let store = Arc::new(MemoryStore::new());
    let state = web::Data::new(AppState {
        store: store.clone(),
        notifier: Arc::new(LogSender),
        dev_mode: true,
    });
    TestContext { store, state }
}

pub async fn spawn_app(
    state: web::Data<AppState>,
) -> impl Service<Request, Response = ServiceResponse<impl MessageBody>, Error = Error> {
    test::init_service(
        App::new()
            .app_data(state)
            .service(routes::health::health)
            .service(
                web::scope("/api")
                    .wrap(AuthMiddleware)
                    .configure(routes::config),
            ),
    )
    .await
}
