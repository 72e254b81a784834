//! The HTTPS-CONNECT interception port. Accepts both proxy-style CONNECT
//! and direct (SNI-spoofed) TLS, terminates TLS with a CA-signed leaf for
//! the requested host, and feeds known provider traffic through the same
//! pipeline dispatch as the clear port. Unknown hosts are spliced through.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use hyper::{Body, Method, Request, StatusCode};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use llm_client::clients::types::RequestKind;
use llm_client::provider::ProviderKind;

use crate::application::application::Application;
use crate::pipeline::types::RouteMode;
use crate::webserver::completions;
use crate::webserver::types::ApiError;

use super::ca::CertificateAuthority;
use super::leaf::LeafCache;
use super::ProxyError;

struct SniCertResolver {
    ca: Arc<CertificateAuthority>,
    cache: Arc<LeafCache>,
}

impl ResolvesServerCert for SniCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let host = client_hello.server_name()?;
        match self.cache.get_or_issue(host, &self.ca) {
            Ok(key) => Some(key),
            Err(err) => {
                warn!(host, error = %err, "leaf issuance failed");
                None
            }
        }
    }
}

/// Hosts the gateway understands well enough to inspect.
fn provider_for_host(host: &str) -> Option<ProviderKind> {
    match host {
        "api.githubcopilot.com"
        | "copilot-proxy.githubusercontent.com"
        | "proxy.enterprise.githubcopilot.com" => Some(ProviderKind::Copilot),
        "api.openai.com" => Some(ProviderKind::OpenAI),
        "api.anthropic.com" => Some(ProviderKind::Anthropic),
        "openrouter.ai" => Some(ProviderKind::OpenRouter),
        _ => None,
    }
}

/// (client dialect, request kind) for an intercepted completion path.
fn classify_path(path: &str) -> Option<(ProviderKind, RequestKind)> {
    if path.contains("/chat/completions") {
        Some((ProviderKind::OpenAI, RequestKind::Chat))
    } else if path.contains("/v1/messages") {
        Some((ProviderKind::Anthropic, RequestKind::Chat))
    } else if path.contains("/completions") {
        Some((ProviderKind::OpenAI, RequestKind::Completion))
    } else if path.contains("/embeddings") {
        None
    } else {
        None
    }
}

pub async fn run_proxy(app: Application, addr: SocketAddr) -> anyhow::Result<()> {
    let resolver = Arc::new(SniCertResolver {
        ca: app.certificate_authority.clone(),
        cache: app.leaf_cache.clone(),
    });
    let mut server_config = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_cert_resolver(resolver);
    server_config.alpn_protocols = vec![b"http/1.1".to_vec()];
    let acceptor = TlsAcceptor::from(Arc::new(server_config));

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "TLS interception proxy listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let app = app.clone();
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(app, acceptor, stream).await {
                debug!(%peer, error = %err, "proxy connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    app: Application,
    acceptor: TlsAcceptor,
    mut stream: TcpStream,
) -> anyhow::Result<()> {
    // 0x16 is a TLS handshake record: the client dialed us directly via
    // spoofed DNS. Anything else should be an HTTP CONNECT.
    let mut first = [0u8; 1];
    let n = stream.peek(&mut first).await?;
    let connect_host = if n == 1 && first[0] != 0x16 {
        Some(read_connect(&mut stream).await?)
    } else {
        None
    };

    let tls_stream = acceptor.accept(stream).await?;
    let sni_host = tls_stream
        .get_ref()
        .1
        .server_name()
        .map(str::to_owned);
    let host = connect_host
        .map(|authority| {
            authority
                .split(':')
                .next()
                .unwrap_or(authority.as_str())
                .to_owned()
        })
        .or(sni_host)
        .unwrap_or_default();

    let service = hyper::service::service_fn(move |request: Request<Body>| {
        let app = app.clone();
        let host = host.clone();
        async move { Ok::<_, Infallible>(intercepted(app, host, request).await) }
    });
    hyper::server::conn::Http::new()
        .serve_connection(tls_stream, service)
        .await?;
    Ok(())
}

/// Reads the CONNECT preamble and acknowledges it.
async fn read_connect(stream: &mut TcpStream) -> Result<String, ProxyError> {
    let mut buffer = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !buffer.ends_with(b"\r\n\r\n") {
        if buffer.len() > 8192 {
            return Err(ProxyError::BadConnect);
        }
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(ProxyError::BadConnect);
        }
        buffer.push(byte[0]);
    }
    let preamble = String::from_utf8_lossy(&buffer);
    let mut parts = preamble.lines().next().unwrap_or_default().split_whitespace();
    if parts.next() != Some("CONNECT") {
        return Err(ProxyError::BadConnect);
    }
    let authority = parts.next().ok_or(ProxyError::BadConnect)?.to_owned();
    stream
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await?;
    Ok(authority)
}

async fn intercepted(app: Application, host: String, request: Request<Body>) -> Response {
    let method = request.method().clone();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_else(|| "/".to_owned());
    let headers = request.headers().clone();
    let body_bytes = match hyper::body::to_bytes(request.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => return ApiError::bad_request(err.to_string()).into_response(),
    };

    let provider = provider_for_host(&host);
    let classified = classify_path(&path_and_query);
    if method == Method::POST {
        if let (Some(kind), Some((dialect, request_kind))) = (provider, classified) {
            match serde_json::from_slice::<serde_json::Value>(&body_bytes) {
                Ok(body) => {
                    let auth = completions::client_auth(&headers);
                    return completions::dispatch(
                        app,
                        RouteMode::Fixed(kind),
                        dialect,
                        request_kind,
                        body,
                        auth,
                    )
                    .await;
                }
                Err(err) => {
                    return ApiError::bad_request(format!("body is not json: {}", err))
                        .into_response()
                }
            }
        }
    }

    splice_passthrough(host, method, path_and_query, headers, body_bytes).await
}

/// Traffic the gateway does not inspect (telemetry, token exchanges,
/// unknown hosts) is replayed to the real upstream over system-trusted TLS.
async fn splice_passthrough(
    host: String,
    method: Method,
    path_and_query: String,
    headers: hyper::HeaderMap,
    body: hyper::body::Bytes,
) -> Response {
    let url = format!("https://{}{}", host, path_and_query);
    let client = reqwest::Client::new();
    let mut builder = client.request(method, url);
    for (name, value) in &headers {
        if *name == hyper::header::HOST || *name == hyper::header::CONTENT_LENGTH {
            continue;
        }
        builder = builder.header(name, value);
    }
    match builder.body(body.to_vec()).send().await {
        Ok(upstream) => {
            let status = StatusCode::from_u16(upstream.status().as_u16())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            let content_type = upstream
                .headers()
                .get(hyper::header::CONTENT_TYPE)
                .cloned();
            match upstream.bytes().await {
                Ok(bytes) => {
                    let mut response = Response::new(axum::body::boxed(Body::from(bytes)));
                    *response.status_mut() = status;
                    if let Some(content_type) = content_type {
                        response
                            .headers_mut()
                            .insert(hyper::header::CONTENT_TYPE, content_type);
                    }
                    response
                }
                Err(err) => {
                    ApiError::new(StatusCode::BAD_GATEWAY, err.to_string()).into_response()
                }
            }
        }
        Err(err) => ApiError::new(StatusCode::BAD_GATEWAY, err.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copilot_hosts_are_recognized() {
        assert_eq!(
            provider_for_host("api.githubcopilot.com"),
            Some(ProviderKind::Copilot)
        );
        assert_eq!(provider_for_host("example.com"), None);
    }

    #[test]
    fn completion_paths_classify_by_dialect() {
        assert_eq!(
            classify_path("/chat/completions"),
            Some((ProviderKind::OpenAI, RequestKind::Chat))
        );
        assert_eq!(
            classify_path("/v1/messages"),
            Some((ProviderKind::Anthropic, RequestKind::Chat))
        );
        assert_eq!(
            classify_path("/v1/engines/copilot-codex/completions"),
            Some((ProviderKind::OpenAI, RequestKind::Completion))
        );
        assert_eq!(classify_path("/telemetry"), None);
    }
}
