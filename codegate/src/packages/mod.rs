//! Package intelligence: a small in-process vector index over known-bad
//! package records, queried with embeddings of extracted identifiers.

pub mod embedder;
pub mod index;
pub mod types;
