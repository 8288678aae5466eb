//! Enclave key provisioning service
//!
//! At startup the binary resolves the database encryption key according to
//! `ENCRYPTION_KEY_SOURCE` (see [`enclave_keymanager::provision`]), then
//! serves the key exchange endpoint so that later nodes can join the
//! cluster:
//!
//! - `POST /v1/key-exchange`: attested key exchange (503 until a key is held)
//! - `GET /health`: liveness probe
//!
//! This build wires the software enclave runtime; deployments inside real
//! hardware implement [`enclave_keymanager::enclave::EnclaveRuntime`] over
//! their platform SDK instead.

use anyhow::Result;
use bytes::Bytes;
use enclave_keymanager::config::ProvisionConfig;
use enclave_keymanager::enclave::{EnclaveRuntime, LocalEnclave};
use enclave_keymanager::keystore::KeyStore;
use enclave_keymanager::provider::{response_status, KeyProvider};
use enclave_keymanager::provision::provision;
use enclave_keymanager::wire::{API_VERSION_PREFIX, PATH_KEY_EXCHANGE};
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{body::Incoming, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Default HTTP port
const HTTP_PORT: u16 = 3000;

struct AppState {
    /// Present once provisioning yielded a key; sqlite mode leaves it empty
    provider: Option<KeyProvider>,
}

async fn handle_http_request(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let exchange_path = format!("{}{}", API_VERSION_PREFIX, PATH_KEY_EXCHANGE);

    let response = match (req.method(), req.uri().path()) {
        (&Method::POST, path) if path == exchange_path => {
            let Some(provider) = state.provider.as_ref() else {
                return Ok(Response::builder()
                    .status(StatusCode::SERVICE_UNAVAILABLE)
                    .body(Full::new(Bytes::new()))
                    .unwrap());
            };
            match req.collect().await {
                Ok(body) => match provider.handle_exchange(&body.to_bytes()) {
                    Ok(exchange_response) => {
                        let body = serde_json::to_vec(&exchange_response)
                            .expect("response serialization cannot fail");
                        Response::builder()
                            .status(StatusCode::OK)
                            .header("Content-Type", "application/json")
                            .body(Full::new(Bytes::from(body)))
                            .unwrap()
                    }
                    Err(e) => {
                        warn!(error = %e, "rejected key exchange request");
                        Response::builder()
                            .status(response_status(&e))
                            .body(Full::new(Bytes::new()))
                            .unwrap()
                    }
                },
                Err(e) => {
                    error!(error = %e, "failed to read request body");
                    Response::builder()
                        .status(StatusCode::BAD_REQUEST)
                        .body(Full::new(Bytes::new()))
                        .unwrap()
                }
            }
        }
        (&Method::GET, "/health") => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(r#"{"status":"ok"}"#)))
            .unwrap(),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from(r#"{"error":"Not found"}"#)))
            .unwrap(),
    };

    Ok(response)
}

async fn run_http_server(state: Arc<AppState>, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(address = %addr, "HTTP server listening");

    loop {
        let (stream, remote_addr) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = Arc::clone(&state);

        tokio::spawn(async move {
            let service = service_fn(move |req| handle_http_request(Arc::clone(&state), req));

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!(remote_addr = %remote_addr, error = %e, "Connection error");
            }
        });
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ProvisionConfig::from_env();
    info!(
        db_type = %config.db_type,
        inside_enclave = config.inside_enclave,
        key_source = %config.encryption_key_source,
        "starting enclave key provisioning service"
    );

    let runtime: Arc<dyn EnclaveRuntime> = Arc::new(LocalEnclave::new());
    if config.inside_enclave {
        warn!("INSIDE_ENCLAVE is set but this build carries the software enclave runtime");
    }
    let store = KeyStore::new(Arc::clone(&runtime), config.inside_enclave);

    let key = match provision(&config, runtime.as_ref(), &store).await {
        Ok(key) => key,
        Err(e) => {
            error!(error = %e, "key provisioning failed");
            return Err(e.into());
        }
    };

    let provider = match key {
        Some(key) => Some(KeyProvider::new(Arc::clone(&runtime), key)),
        None => {
            info!("no encryption key held, key exchange endpoint disabled");
            None
        }
    };

    let state = Arc::new(AppState { provider });
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(HTTP_PORT);
    run_http_server(state, port).await
}
