//! TLS interception for clients that dial the upstream host directly: a
//! locally-generated CA signs per-SNI leaf certificates on demand, the
//! decrypted traffic runs through the same pipeline as the clear port.

pub mod ca;
pub mod intercept;
pub mod leaf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("certificate generation failed: {0}")]
    Rcgen(#[from] rcgen::RcgenError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("key material rejected by rustls: {0}")]
    BadKey(String),

    #[error("malformed CONNECT request")]
    BadConnect,
}
