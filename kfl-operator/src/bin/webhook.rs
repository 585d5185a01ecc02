//! KFL Admission Webhook Server
//!
//! Serves the FLCluster defaulting and validating hooks over TLS.

use anyhow::Context;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, Response, StatusCode};
use kfl_operator::admission::{self, MUTATE_PATH, VALIDATE_PATH};
use kfl_operator::telemetry::{self, TracingConfig};
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse};
use std::convert::Infallible;
use std::env;
use std::net::SocketAddr;
use tokio::fs;
use tracing::{error, info};

/// Default webhook server port (HTTPS)
const DEFAULT_WEBHOOK_PORT: u16 = 8443;

/// Default TLS certificate path (mounted by Kubernetes)
const DEFAULT_TLS_CERT_PATH: &str = "/certs/tls.crt";

/// Default TLS private key path (mounted by Kubernetes)
const DEFAULT_TLS_KEY_PATH: &str = "/certs/tls.key";

type Hook = fn(&AdmissionRequest<DynamicObject>) -> AdmissionResponse;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing(&TracingConfig::from_env())?;

    info!("KFL admission webhook starting");

    let port: u16 = env::var("WEBHOOK_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_WEBHOOK_PORT);

    let tls_cert = env::var("TLS_CERT_FILE").unwrap_or_else(|_| DEFAULT_TLS_CERT_PATH.to_string());
    let tls_key = env::var("TLS_KEY_FILE").unwrap_or_else(|_| DEFAULT_TLS_KEY_PATH.to_string());

    info!(
        port = port,
        tls_cert = %tls_cert,
        tls_key = %tls_key,
        "Webhook configuration loaded"
    );

    let cert_pem = fs::read(&tls_cert)
        .await
        .with_context(|| format!("reading {tls_cert}"))?;
    let key_pem = fs::read(&tls_key)
        .await
        .with_context(|| format!("reading {tls_key}"))?;

    let certs = rustls_pemfile::certs(&mut cert_pem.as_slice()).collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())?
        .context("no private key found in PEM file")?;

    let mut tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    let tls_acceptor = tokio_rustls::TlsAcceptor::from(std::sync::Arc::new(tls_config));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Webhook server listening");

    loop {
        let (stream, _peer_addr) = listener.accept().await?;
        let acceptor = tls_acceptor.clone();

        tokio::spawn(async move {
            match acceptor.accept(stream).await {
                Ok(tls_stream) => {
                    let io = hyper_util::rt::TokioIo::new(tls_stream);
                    let service = hyper::service::service_fn(handle_request);

                    if let Err(e) = hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        error!(error = %e, "Connection error");
                    }
                }
                Err(e) => {
                    error!(error = %e, "TLS handshake failed");
                }
            }
        });
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::POST, MUTATE_PATH) => answer(req, admission::mutate).await,
        (&Method::POST, VALIDATE_PATH) => answer(req, admission::validate).await,
        (&Method::GET, "/healthz") => build_response(StatusCode::OK, "OK"),
        (&Method::GET, "/readyz") => build_response(StatusCode::OK, "Ready"),
        _ => build_response(StatusCode::NOT_FOUND, "Not Found"),
    };
    Ok(response)
}

/// Read an AdmissionReview and answer it with `hook`.
async fn answer(req: Request<hyper::body::Incoming>, hook: Hook) -> Response<Full<Bytes>> {
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!(error = %e, "Failed to read request body");
            return build_response(StatusCode::BAD_REQUEST, "Failed to read request body");
        }
    };

    let review = admission::review(&body, hook);
    match serde_json::to_vec(&review) {
        Ok(json) => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(json)))
            .unwrap_or_else(|e| {
                error!(error = %e, "Failed to build admission review response");
                build_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to build response")
            }),
        Err(e) => {
            error!(error = %e, "Failed to serialize AdmissionReview");
            build_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to serialize response")
        }
    }
}

fn build_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .unwrap_or_else(|e| {
            error!(error = %e, "Failed to build response");
            Response::new(Full::new(Bytes::from("Internal Error")))
        })
}
