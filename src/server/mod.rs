//! HTTP control surface: start/stop endpoints, the MJPEG feed and a small
//! bundled page.

mod routes;

pub use routes::create_router;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};

use crate::detection::ColorRange;
use crate::session::Session;

/// State handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub session: Session,
    /// Used when `POST /start` carries no ranges.
    pub default_ranges: Arc<Vec<ColorRange>>,
}

impl AppState {
    pub fn new(session: Session, default_ranges: Vec<ColorRange>) -> Self {
        Self {
            session,
            default_ranges: Arc::new(default_ranges),
        }
    }
}

/// Serve until `shutdown` resolves.
pub async fn run_server(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
