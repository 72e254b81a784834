use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which detector family found a literal. Secrets outrank PII when spans
/// collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanOrigin {
    Secret,
    Pii,
}

impl SpanOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanOrigin::Secret => "secret",
            SpanOrigin::Pii => "pii",
        }
    }
}

/// A byte range inside one text part that a detector flagged. Offsets are
/// valid UTF-8 boundaries in the scanned string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedSpan {
    pub start: usize,
    pub end: usize,
    pub origin: SpanOrigin,
    pub subtype: String,
}

impl DetectedSpan {
    pub fn new(start: usize, end: usize, origin: SpanOrigin, subtype: impl Into<String>) -> Self {
        Self {
            start,
            end,
            origin,
            subtype: subtype.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// One reversible substitution, bound to the session that created it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstitutionEntry {
    placeholder: String,
    literal: String,
    origin: SpanOrigin,
    subtype: String,
    discovered_at: DateTime<Utc>,
}

impl SubstitutionEntry {
    pub fn new(
        placeholder: String,
        literal: String,
        origin: SpanOrigin,
        subtype: String,
    ) -> Self {
        Self {
            placeholder,
            literal,
            origin,
            subtype,
            discovered_at: Utc::now(),
        }
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    pub fn literal(&self) -> &str {
        &self.literal
    }

    pub fn origin(&self) -> SpanOrigin {
        self.origin
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    pub fn discovered_at(&self) -> DateTime<Utc> {
        self.discovered_at
    }
}
