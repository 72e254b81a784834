//! CodeGate: a local, privacy-preserving gateway between AI coding
//! assistants and their upstream LLM providers. Traffic is normalized to a
//! common shape, inspected and rewritten by an ordered pipeline (secret and
//! PII redaction, package intelligence, workspace muxing), then forwarded
//! and restored on the way back, streaming-safe end to end.

pub mod application;
pub mod db;
pub mod extraction;
pub mod mux;
pub mod packages;
pub mod pipeline;
pub mod proxy;
pub mod redaction;
pub mod webserver;
pub mod workspace;
