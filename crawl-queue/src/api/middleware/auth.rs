//! Shared-secret token authentication for protected endpoints.
//!
//! A request is accepted when it carries `Authorization: Bearer <token>` or a
//! `?token=<token>` query parameter matching the configured secret. Without a
//! configured secret every protected request is rejected.

use axum::{
    Json,
    http::{Request, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::api::error::ApiErrorResponse;

/// Token check shared by every clone of the layer.
#[derive(Debug, Clone, Default)]
pub struct TokenAuth {
    token: Option<Arc<str>>,
}

impl TokenAuth {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()).map(Arc::from),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.token.is_some()
    }

    /// Check a presented token.
    pub fn is_valid(&self, presented: &str) -> bool {
        match &self.token {
            Some(expected) => constant_time_eq(expected.as_bytes(), presented.as_bytes()),
            None => false,
        }
    }

    /// Accept if either the bearer header or the `token` query parameter matches.
    pub fn authorize<B>(&self, request: &Request<B>) -> bool {
        let bearer = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);
        if bearer.is_some_and(|t| self.is_valid(t)) {
            return true;
        }

        request
            .uri()
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .any(|(k, v)| k == "token" && self.is_valid(&v))
            })
            .unwrap_or(false)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiErrorResponse {
            code: "UNAUTHORIZED".to_string(),
            message: "Unauthorized".to_string(),
        }),
    )
        .into_response()
}

/// Layer for token authentication.
#[derive(Clone)]
pub struct TokenAuthLayer {
    auth: TokenAuth,
}

impl TokenAuthLayer {
    pub fn new(token: Option<String>) -> Self {
        Self {
            auth: TokenAuth::new(token),
        }
    }
}

impl<S> tower::Layer<S> for TokenAuthLayer {
    type Service = TokenAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TokenAuthService {
            inner,
            auth: self.auth.clone(),
        }
    }
}

/// Service for token authentication.
#[derive(Clone)]
pub struct TokenAuthService<S> {
    inner: S,
    auth: TokenAuth,
}

impl<S, B> tower::Service<Request<B>> for TokenAuthService<S>
where
    S: tower::Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        if self.auth.authorize(&request) {
            let future = self.inner.call(request);
            Box::pin(future)
        } else {
            if !self.auth.is_configured() {
                tracing::warn!(path = %request.uri().path(), "Rejected request: API_TOKEN is not set");
            } else {
                tracing::debug!(path = %request.uri().path(), "Rejected request with missing or invalid token");
            }
            Box::pin(async move { Ok(unauthorized()) })
        }
    }
}
