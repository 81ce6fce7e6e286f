//! `render_chart`: render mermaid source to an image via mermaid.ink.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use std::sync::Arc;
use std::time::Duration;
use studyguide_core::document::{DiagramImage, DiagramRenderer};
use studyguide_core::error::{RenderError, ToolError};
use studyguide_core::study::Artifact;
use studyguide_core::tool::{Tool, ToolResult};
use tracing::{debug, warn};

/// HTTP client for a mermaid.ink compatible renderer.
pub struct MermaidInkRenderer {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl MermaidInkRenderer {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RenderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RenderError::Network(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            client,
        })
    }

    fn image_url(&self, source: &str) -> String {
        format!("{}/img/{}?bgColor=!white", self.base_url, URL_SAFE.encode(source.as_bytes()))
    }
}

#[async_trait]
impl DiagramRenderer for MermaidInkRenderer {
    async fn render(&self, source: &str) -> Result<DiagramImage, RenderError> {
        let url = self.image_url(source);
        debug!(chars = source.len(), "Requesting diagram render");

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                RenderError::Timeout(self.timeout.as_secs())
            } else {
                RenderError::Network(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(RenderError::Status(response.status().as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.contains("image") {
            return Err(RenderError::NotAnImage(content_type));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RenderError::Network(e.to_string()))?;

        Ok(DiagramImage {
            content_type,
            bytes: bytes.to_vec(),
        })
    }
}

/// Remove markdown fences the model tends to wrap diagrams in.
pub fn strip_fences(source: &str) -> String {
    source.replace("```mermaid", "").replace("```", "").trim().to_string()
}

pub struct RenderChartTool {
    renderer: Arc<dyn DiagramRenderer>,
}

impl RenderChartTool {
    pub fn new(renderer: Arc<dyn DiagramRenderer>) -> Self {
        Self { renderer }
    }
}

#[async_trait]
impl Tool for RenderChartTool {
    fn name(&self) -> &str {
        "render_chart"
    }

    fn description(&self) -> &str {
        "Render a Mermaid.js diagram and display it to the user as an image. \
         Use for flowcharts, sequence diagrams, mind maps and other visual explanations."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "diagram_source": {
                    "type": "string",
                    "description": "Valid Mermaid.js syntax for the diagram"
                }
            },
            "required": ["diagram_source"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let source = arguments["diagram_source"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'diagram_source' argument".into()))?;

        let source = strip_fences(source);
        if source.is_empty() {
            return Err(ToolError::InvalidArguments("Diagram source is empty".into()));
        }

        match self.renderer.render(&source).await {
            Ok(image) => {
                let data_uri = format!(
                    "data:{};base64,{}",
                    image.content_type,
                    STANDARD.encode(&image.bytes)
                );
                Ok(ToolResult::with_artifact(Artifact::Chart { data_uri }))
            }
            Err(e) => {
                warn!(error = %e, "Diagram render failed");
                Ok(ToolResult::failure(match e {
                    RenderError::Status(code) => format!("Error: Failed to generate diagram (status {code})"),
                    RenderError::NotAnImage(_) => "Error: Could not generate diagram image".to_string(),
                    other => format!("Error: Failed to generate diagram ({other})"),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeRenderer {
        outcome: fn() -> Result<DiagramImage, RenderError>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DiagramRenderer for FakeRenderer {
        async fn render(&self, source: &str) -> Result<DiagramImage, RenderError> {
            self.seen.lock().unwrap().push(source.to_string());
            (self.outcome)()
        }
    }

    fn tool(outcome: fn() -> Result<DiagramImage, RenderError>) -> (RenderChartTool, Arc<FakeRenderer>) {
        let renderer = Arc::new(FakeRenderer { outcome, seen: Mutex::new(Vec::new()) });
        (RenderChartTool::new(renderer.clone()), renderer)
    }

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_fences("```mermaid\ngraph TD; A-->B\n```"), "graph TD; A-->B");
        assert_eq!(strip_fences("  graph LR; X-->Y  "), "graph LR; X-->Y");
    }

    #[test]
    fn url_carries_encoded_source_and_background() {
        let renderer = MermaidInkRenderer::new("https://mermaid.ink/", Duration::from_secs(5)).unwrap();
        let url = renderer.image_url("graph TD; A-->B");
        assert!(url.starts_with("https://mermaid.ink/img/"));
        assert!(url.ends_with("?bgColor=!white"));
        assert!(!url.contains('+'));
    }

    /// Serve one canned HTTP response on a local port and return its base URL.
    async fn serve_once(status_line: &'static str, content_type: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let head = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: {content_type}\r\nContent-Length: 4\r\nConnection: close\r\n\r\n"
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&[0x89, b'P', b'N', b'G']).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn any_2xx_image_response_is_accepted() {
        let base = serve_once("203 Non-Authoritative Information", "image/png").await;
        let renderer = MermaidInkRenderer::new(&base, Duration::from_secs(5)).unwrap();

        let image = renderer.render("graph TD; A-->B").await.unwrap();
        assert_eq!(image.content_type, "image/png");
        assert_eq!(image.bytes, vec![0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn server_error_is_a_status_failure() {
        let base = serve_once("503 Service Unavailable", "image/png").await;
        let renderer = MermaidInkRenderer::new(&base, Duration::from_secs(5)).unwrap();

        let err = renderer.render("graph TD; A-->B").await.unwrap_err();
        assert!(matches!(err, RenderError::Status(503)));
    }

    #[tokio::test]
    async fn non_image_body_is_rejected() {
        let base = serve_once("200 OK", "text/html").await;
        let renderer = MermaidInkRenderer::new(&base, Duration::from_secs(5)).unwrap();

        let err = renderer.render("graph TD; A-->B").await.unwrap_err();
        assert!(matches!(err, RenderError::NotAnImage(_)));
    }

    #[tokio::test]
    async fn image_becomes_data_uri_artifact() {
        let (tool, renderer) = tool(|| {
            Ok(DiagramImage { content_type: "image/jpeg".into(), bytes: vec![1, 2, 3] })
        });

        let result = tool
            .execute(serde_json::json!({"diagram_source": "```mermaid\ngraph TD; A-->B\n```"}))
            .await
            .unwrap();

        assert_eq!(renderer.seen.lock().unwrap()[0], "graph TD; A-->B");
        assert_eq!(result.output, "CHART_IMAGE:data:image/jpeg;base64,AQID");
        assert!(matches!(result.artifact, Some(Artifact::Chart { .. })));
    }

    #[tokio::test]
    async fn renderer_status_is_reported_as_text() {
        let (tool, _) = tool(|| Err(RenderError::Status(503)));
        let result = tool.execute(serde_json::json!({"diagram_source": "graph TD; A"})).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.output, "Error: Failed to generate diagram (status 503)");
        assert!(result.artifact.is_none());
    }

    #[tokio::test]
    async fn non_image_response_is_reported_as_text() {
        let (tool, _) = tool(|| Err(RenderError::NotAnImage("text/html".into())));
        let result = tool.execute(serde_json::json!({"diagram_source": "graph TD; A"})).await.unwrap();
        assert_eq!(result.output, "Error: Could not generate diagram image");
    }
}
