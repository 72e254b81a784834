//! Workspace-scoped routing: rules are evaluated in priority order against
//! the request, the first match picks the upstream endpoint and model.

pub mod router;
pub mod types;
