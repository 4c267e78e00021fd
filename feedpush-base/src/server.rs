use std::sync::Arc;

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use derive_new::new;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::CoreMetrics;

/// A server that serves agent-specific routes
#[derive(new, Debug)]
pub struct Server {
    listen_port: u16,
    core_metrics: Arc<CoreMetrics>,
}

impl Server {
    /// Run an HTTP server serving OpenMetrics format reports on `/metrics`
    /// (this is compatible with Prometheus, which ought to be configured to
    /// scrape this endpoint)
    pub fn run(self: Arc<Self>) -> JoinHandle<()> {
        let port = self.listen_port;
        info!(port, "starting server on 0.0.0.0");

        let app = self.router();

        tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
                Ok(listener) => listener,
                Err(err) => {
                    error!(?err, port, "Failed to bind metrics server");
                    return;
                }
            };
            if let Err(err) = axum::serve(listener, app).await {
                error!(?err, "Metrics server exited");
            }
        })
    }

    fn router(&self) -> Router {
        let core_metrics = self.core_metrics.clone();
        Router::new().route("/metrics", get(move || Self::gather_metrics(core_metrics)))
    }

    async fn gather_metrics(core_metrics: Arc<CoreMetrics>) -> impl IntoResponse {
        debug!("Traversing route for /metrics endpoint for serving Prometheus metrics");
        match core_metrics.gather().map(String::from_utf8) {
            Ok(Ok(metrics)) => (StatusCode::OK, metrics),
            Ok(Err(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error".to_owned(),
            ),
            Err(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to gather metrics".to_owned(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use feedpush_core::WorkerTier;
    use prometheus::{Counter, Registry};

    use super::*;

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let registry = Registry::new();
        let counter = Counter::new("expected_metric_content", "test123").unwrap();
        registry.register(Box::new(counter.clone())).unwrap();
        counter.inc();

        let port = 18_081;
        let metrics = CoreMetrics::new("test", WorkerTier::PRIMARY, port, registry).unwrap();
        let server = Arc::new(Server::new(port, Arc::new(metrics)));
        let _server_task = server.run();

        tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;

        let response = reqwest::Client::new()
            .get(format!("http://127.0.0.1:{port}/metrics"))
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());

        let body = response.text().await.expect("Failed to read response body");
        assert!(body.contains("expected_metric_content"));
    }
}
