//! HTTP endpoint serving `POST /remove-background`
//!
//! The request body is the encoded image, or a `text/plain` URL to fetch it
//! from. Successful responses carry the PNG composite; every pipeline failure
//! becomes a 500 with the error message as plain text.

use crate::{
    config::ServerConfig,
    error::{BgRemovalError, Result},
    processor::BackgroundRemovalProcessor,
    services::{ImageLoader, ImageSource, RequestStaging, PNG_CONTENT_TYPE},
    types::ProcessingTimings,
};
use hyper::body::HttpBody;
use hyper::header::{self, HeaderValue};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use instant::Instant;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Path of the single processing endpoint
pub const ENDPOINT: &str = "/remove-background";

/// Response header carrying the per-request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Shared state of the HTTP endpoint
pub struct BackgroundRemovalServer {
    processor: Arc<BackgroundRemovalProcessor>,
    loader: ImageLoader,
    staging: Option<RequestStaging>,
    allowed_origin: Option<HeaderValue>,
    config: ServerConfig,
}

impl std::fmt::Debug for BackgroundRemovalServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRemovalServer")
            .field("processor", &self.processor)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BackgroundRemovalServer {
    /// Wrap a loaded processor with the endpoint configuration
    ///
    /// # Errors
    /// - Invalid server configuration or CORS origin
    /// - HTTP client for URL sources cannot be built
    pub fn new(processor: Arc<BackgroundRemovalProcessor>, config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let allowed_origin = config
            .allowed_origin
            .as_deref()
            .map(HeaderValue::from_str)
            .transpose()
            .map_err(|e| BgRemovalError::invalid_config(format!("Invalid allowed origin: {e}")))?;
        let loader = ImageLoader::new(Duration::from_secs(config.fetch_timeout_secs))?
            .with_max_fetch_bytes(config.max_body_bytes);
        let staging = config
            .stage_to_disk
            .then(|| RequestStaging::new(config.staging_dir.clone()));

        Ok(Self {
            processor,
            loader,
            staging,
            allowed_origin,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address and serve until Ctrl-C
    ///
    /// # Errors
    /// - Address cannot be parsed or bound
    /// - Server failure while running
    pub async fn run(self) -> Result<()> {
        let (addr, server) = Arc::new(self).bind(shutdown_signal())?;
        info!("Listening on http://{addr}{ENDPOINT}");
        server.await
    }

    /// Bind the configured address, serving until `shutdown` resolves
    ///
    /// Returns the bound address (useful with port 0) and the server future,
    /// which must be awaited or spawned to accept connections.
    ///
    /// # Errors
    /// - Address cannot be parsed or bound
    pub fn bind<F>(
        self: Arc<Self>,
        shutdown: F,
    ) -> Result<(SocketAddr, impl Future<Output = Result<()>>)>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.socket_addr()?;
        let make_svc = make_service_fn(move |_conn| {
            let server = Arc::clone(&self);
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let server = Arc::clone(&server);
                    async move { Ok::<_, Infallible>(server.handle(req).await) }
                }))
            }
        });

        let server = Server::try_bind(&addr)
            .map_err(|e| BgRemovalError::internal(format!("Failed to bind {addr}: {e}")))?
            .serve(make_svc);
        let local_addr = server.local_addr();
        let graceful = server.with_graceful_shutdown(shutdown);

        Ok((local_addr, async move {
            graceful
                .await
                .map_err(|e| BgRemovalError::internal(format!("HTTP server error: {e}")))?;
            info!("Server stopped");
            Ok(())
        }))
    }

    /// Route one request; never fails, errors become responses
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let request_id = Uuid::new_v4();
        let start = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let mut response = if path != ENDPOINT {
            text_response(StatusCode::NOT_FOUND, "Not found")
        } else if method == Method::OPTIONS {
            let mut response = empty_response(StatusCode::NO_CONTENT);
            let headers = response.headers_mut();
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static("POST, OPTIONS"),
            );
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static("Content-Type"),
            );
            response
        } else if method == Method::POST {
            self.remove_background(req, request_id).await
        } else {
            let mut response =
                text_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("POST, OPTIONS"));
            response
        };

        if let Some(origin) = &self.allowed_origin {
            let headers = response.headers_mut();
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
            headers.insert(header::VARY, HeaderValue::from_static("Origin"));
        }
        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }

        info!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Request complete"
        );
        response
    }

    async fn remove_background(&self, req: Request<Body>, request_id: Uuid) -> Response<Body> {
        let max_bytes = self.config.max_body_bytes;
        let declared_length = req
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared_length.is_some_and(|len| len > max_bytes) {
            warn!(request_id = %request_id, "Declared body exceeds {max_bytes} bytes");
            return text_response(StatusCode::PAYLOAD_TOO_LARGE, "Image too large");
        }

        let is_text = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with("text/plain"));

        let body = match read_body(req.into_body(), max_bytes).await {
            Ok(Some(body)) => body,
            Ok(None) => {
                warn!(request_id = %request_id, "Body exceeds {max_bytes} bytes");
                return text_response(StatusCode::PAYLOAD_TOO_LARGE, "Image too large");
            },
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Failed to read request body");
                return text_response(StatusCode::BAD_REQUEST, "Failed to read request body");
            },
        };
        if body.iter().all(u8::is_ascii_whitespace) {
            return text_response(StatusCode::BAD_REQUEST, "No image provided");
        }

        match self.run_pipeline(body, is_text, request_id).await {
            Ok((png, timings)) => {
                debug!(request_id = %request_id, "{}", timings.summary());
                let mut response = Response::new(Body::from(png));
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static(PNG_CONTENT_TYPE),
                );
                response
            },
            Err(e) => {
                error!(
                    request_id = %request_id,
                    kind = e.kind(),
                    error = %e,
                    "Background removal failed"
                );
                text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            },
        }
    }

    async fn run_pipeline(
        &self,
        body: Vec<u8>,
        is_text: bool,
        request_id: Uuid,
    ) -> Result<(Vec<u8>, ProcessingTimings)> {
        let bytes = match url_body(&body, is_text) {
            Some(url) => {
                debug!(request_id = %request_id, url = %url, "Fetching remote image");
                self.loader.fetch(&url).await?
            },
            None => body,
        };

        let processor = Arc::clone(&self.processor);
        let staging = self.staging.clone();
        tokio::task::spawn_blocking(move || match staging {
            Some(staging) => {
                let staged = staging.stage(request_id)?;
                let input = staged.write_input(&bytes)?;
                let result = processor.process_file(&input)?;
                result.save_png(staged.output_path())?;
                let png = staged.read_output()?;
                staged.close()?;
                Ok((png, result.timings))
            },
            None => {
                let result = processor.process_bytes(&bytes)?;
                Ok((result.to_png_bytes()?, result.timings))
            },
        })
        .await
        .map_err(|e| BgRemovalError::internal(format!("Processing task failed: {e}")))?
    }
}

/// Collect a body, giving `None` once it grows past `limit` bytes
async fn read_body(mut body: Body, limit: usize) -> hyper::Result<Option<Vec<u8>>> {
    let mut buffer = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk?;
        if buffer.len() + chunk.len() > limit {
            return Ok(None);
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(Some(buffer))
}

/// URL carried by a `text/plain` body, if it is one
fn url_body(body: &[u8], is_text: bool) -> Option<String> {
    if !is_text {
        return None;
    }
    let text = std::str::from_utf8(body).ok()?.trim();
    match ImageSource::parse(text) {
        ImageSource::Url(url) => Some(url),
        _ => None,
    }
}

fn text_response<S: Into<String>>(status: StatusCode, message: S) -> Response<Body> {
    let mut response = Response::new(Body::from(message.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(TEXT_CONTENT_TYPE),
    );
    response
}

fn empty_response(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining connections");
}
