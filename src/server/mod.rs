//! Forward-auth HTTP server
//!
//! Every request is authenticated, authorized and answered with a status
//! only: 200 when allowed, an error status otherwise. A fronting proxy is
//! expected to forward the original method and URI in `X-Forwarded-Method`
//! and `X-Forwarded-Uri`; without them the request line itself is checked.
//!
//! A client that disconnects drops its request future, and with it any
//! backend call in flight. On shutdown, authorizations still running are
//! cancelled and answered with 504.

use crate::auth::{AuthError, AuthRequest, Authenticator, Identity};
use crate::authz::builder::RequestAuthorizer;
use crate::authz::{Authorizer, AuthzError, CancelHandle, ErrorKind, RequestContext};
use crate::config::{AuthHeadersConfig, Config, ConfigError};
use crate::metrics;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE, WWW_AUTHENTICATE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::http::request::Parts;
use hyper::{body::Incoming, HeaderMap, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

const FORWARDED_METHOD: &str = "x-forwarded-method";
const FORWARDED_URI: &str = "x-forwarded-uri";

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),

    #[error("Server error: {0}")]
    RuntimeError(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Headers carrying the verified identity to the upstream
struct IdentityHeaders {
    user: HeaderName,
    groups: HeaderName,
    separator: String,
}

impl IdentityHeaders {
    fn from_config(config: &AuthHeadersConfig) -> Result<Option<Self>, ServerError> {
        if !config.enabled {
            return Ok(None);
        }
        let parse = |name: &str| {
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                ConfigError::ValidationError(format!("invalid header name '{}': {}", name, e))
            })
        };
        Ok(Some(Self {
            user: parse(&config.user_field_name)?,
            groups: parse(&config.groups_field_name)?,
            separator: config.group_separator.clone(),
        }))
    }

    fn apply(&self, identity: &Identity, response: &mut Response<Full<Bytes>>) {
        let headers = response.headers_mut();
        if let Ok(user) = HeaderValue::from_str(identity.name()) {
            headers.insert(self.user.clone(), user);
        }
        if identity.groups().is_empty() {
            return;
        }
        if let Ok(groups) = HeaderValue::from_str(&identity.groups().join(&self.separator)) {
            headers.insert(self.groups.clone(), groups);
        }
    }
}

/// Shared per-connection state
struct Gate {
    authenticator: Arc<dyn Authenticator>,
    authorizer: RequestAuthorizer,
    identity_headers: Option<IdentityHeaders>,
    shutdown: CancelHandle,
}

impl Gate {
    /// Authorization context for one request, cancelled on shutdown
    fn context_for(&self, uri: &Uri, headers: &HeaderMap) -> RequestContext {
        self.authorizer
            .context_for(uri, headers)
            .cancelled_by(&self.shutdown)
    }
}

/// HTTP Server
pub struct Server {
    gate: Arc<Gate>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Build the authenticator and authorizer chain from configuration and
    /// bind the listener.
    pub async fn from_config(config: &Config) -> Result<Self, ServerError> {
        let jwt = config.authentication.jwt.as_ref().ok_or_else(|| {
            ConfigError::ValidationError("no authenticator configured".into())
        })?;
        let authenticator: Arc<dyn Authenticator> = Arc::new(jwt.authenticator()?);

        let delegate: Option<Arc<dyn Authorizer>> = match &config.subject_access_review {
            Some(sar) => {
                let authorizer = sar.authorizer()?;
                info!(endpoint = authorizer.endpoint(), "SubjectAccessReview backend configured");
                Some(Arc::new(authorizer) as Arc<dyn Authorizer>)
            }
            None => {
                warn!("No subject_access_review configured, only static rules and ignore_paths can allow requests");
                None
            }
        };

        let authorizer = config.request_authorizer(delegate)?;
        Self::bind(
            &config.server.address,
            authenticator,
            authorizer,
            &config.server.auth_headers,
        )
        .await
    }

    /// Bind to `address` with explicit collaborators
    ///
    /// If port 0 is specified, the OS will assign an available port.
    pub async fn bind(
        address: &str,
        authenticator: Arc<dyn Authenticator>,
        authorizer: RequestAuthorizer,
        auth_headers: &AuthHeadersConfig,
    ) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        info!(address = %local_addr, "Server bound");

        Ok(Self {
            gate: Arc::new(Gate {
                authenticator,
                authorizer,
                identity_headers: IdentityHeaders::from_config(auth_headers)?,
                shutdown: CancelHandle::new(),
            }),
            listener,
            local_addr,
        })
    }

    /// The address the server is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until Ctrl-C.
    ///
    /// Connection errors are logged and don't stop the server.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(address = %self.local_addr, "Starting server");

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                signal = &mut shutdown => {
                    signal.map_err(|e| ServerError::RuntimeError(e.to_string()))?;
                    info!("Shutting down server");
                    self.gate.shutdown.cancel();
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let gate = Arc::clone(&self.gate);
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let gate = Arc::clone(&gate);
                    async move { Ok::<_, Infallible>(handle_request(req, &gate).await) }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Error serving connection from {}: {}", peer_addr, e);
                }
            });
        }
    }
}

/// Build AuthRequest from hyper Request headers
fn build_auth_request(req: &Parts, method: &str, uri: &Uri) -> AuthRequest {
    let mut headers = HashMap::new();
    for (name, value) in &req.headers {
        if let Ok(v) = value.to_str() {
            headers.insert(name.as_str().to_string(), v.to_string());
        }
    }

    AuthRequest {
        headers,
        method: method.to_string(),
        path: uri.path().to_string(),
    }
}

/// Method and URI being authorized, honouring forwarded headers
fn target_of(req: &Parts) -> Result<(String, Uri), String> {
    let method = match req.headers.get(FORWARDED_METHOD) {
        Some(value) => value
            .to_str()
            .map_err(|_| "invalid X-Forwarded-Method".to_string())?
            .to_ascii_uppercase(),
        None => req.method.as_str().to_string(),
    };
    let uri = match req.headers.get(FORWARDED_URI) {
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|raw| raw.parse::<Uri>().ok())
            .ok_or_else(|| "invalid X-Forwarded-Uri".to_string())?,
        None => req.uri.clone(),
    };
    Ok((method, uri))
}

async fn handle_request(req: Request<Incoming>, gate: &Gate) -> Response<Full<Bytes>> {
    // the body is never read
    let (req, _body) = req.into_parts();
    let (method, uri) = match target_of(&req) {
        Ok(target) => target,
        Err(reason) => {
            warn!(reason = %reason, "Rejecting request");
            return text(StatusCode::BAD_REQUEST, "Bad Request");
        }
    };

    let auth_request = build_auth_request(&req, &method, &uri);
    let identity = match gate.authenticator.authenticate(&auth_request).await {
        Ok(identity) => {
            metrics::record_auth_attempt("jwt", true);
            identity
        }
        Err(err) => {
            metrics::record_auth_attempt("jwt", false);
            warn!(path = uri.path(), error = %err, "Authentication failed");
            return unauthorized(&err);
        }
    };

    let ctx = gate.context_for(&uri, &req.headers);
    match gate
        .authorizer
        .authorize_in(&ctx, &identity, &method, &uri)
        .await
    {
        Ok(decision) if decision.is_allow() => {
            let mut response = text(StatusCode::OK, "OK");
            if let Some(headers) = &gate.identity_headers {
                headers.apply(&identity, &mut response);
            }
            response
        }
        Ok(_) => text(StatusCode::FORBIDDEN, "Forbidden"),
        Err(err) => error_response(&err),
    }
}

fn error_response(err: &AuthzError) -> Response<Full<Bytes>> {
    match err.kind() {
        ErrorKind::BadRequest => text(StatusCode::BAD_REQUEST, "Bad Request"),
        ErrorKind::Unavailable => text(StatusCode::GATEWAY_TIMEOUT, "Authorization timed out"),
        ErrorKind::Internal => text(StatusCode::INTERNAL_SERVER_ERROR, "Authorization error"),
    }
}

fn unauthorized(err: &AuthError) -> Response<Full<Bytes>> {
    let (challenge, body) = match err {
        AuthError::MissingAuth => ("Bearer", "Missing authentication"),
        AuthError::TokenExpired => (
            "Bearer error=\"invalid_token\", error_description=\"Token expired\"",
            "Token expired",
        ),
        AuthError::InvalidSignature | AuthError::InvalidToken(_) => {
            ("Bearer error=\"invalid_token\"", "Invalid token")
        }
    };
    let mut response = text(StatusCode::UNAUTHORIZED, body);
    response
        .headers_mut()
        .insert(WWW_AUTHENTICATE, HeaderValue::from_static(challenge));
    response
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
