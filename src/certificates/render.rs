//! Client for the external certificate renderer.
//!
//! The renderer's visual output is a black box; this service only keeps the
//! returned artifact reference.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::RendererConfig;

#[derive(Debug, Clone, Serialize)]
pub struct RenderRequest {
    pub student_name: String,
    pub course_name: String,
    pub certificate_number: String,
    pub instructor_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RendererError {
    #[error("Renderer API error: {0}")]
    Api(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Parse error: {0}")]
    Parse(String),
}

#[async_trait]
pub trait CertificateRenderer: Send + Sync {
    /// Renders the certificate and returns the artifact URL.
    async fn render(&self, request: &RenderRequest) -> Result<String, RendererError>;
}

#[derive(Deserialize)]
struct RenderedArtifact {
    url: String,
}

#[derive(Debug, Clone)]
pub struct HttpCertificateRenderer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCertificateRenderer {
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
        }
    }
}

#[async_trait]
impl CertificateRenderer for HttpCertificateRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<String, RendererError> {
        let response = self
            .client
            .post(format!("{}/render", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| RendererError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RendererError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(RendererError::Api(format!("HTTP {}: {}", status, body)));
        }

        let artifact: RenderedArtifact =
            serde_json::from_str(&body).map_err(|e| RendererError::Parse(e.to_string()))?;
        Ok(artifact.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_render_returns_artifact_url() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/render")
            .with_status(200)
            .with_body(r#"{"url":"https://cdn.example.com/certs/abc.pdf"}"#)
            .create_async()
            .await;

        let renderer = HttpCertificateRenderer::new(&RendererConfig {
            base_url: server.url(),
        });
        let url = renderer
            .render(&RenderRequest {
                student_name: "Ada Lovelace".to_string(),
                course_name: "Rust Basics".to_string(),
                certificate_number: "CERT-1-2-3".to_string(),
                instructor_name: "Grace Hopper".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.example.com/certs/abc.pdf");
    }

    #[tokio::test]
    async fn test_render_error_is_propagated() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/render")
            .with_status(503)
            .with_body("renderer down")
            .create_async()
            .await;

        let renderer = HttpCertificateRenderer::new(&RendererConfig {
            base_url: server.url(),
        });
        let err = renderer
            .render(&RenderRequest {
                student_name: "Ada".to_string(),
                course_name: "Rust".to_string(),
                certificate_number: "CERT-1".to_string(),
                instructor_name: "Grace".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RendererError::Api(_)));
    }
}
