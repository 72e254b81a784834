//! The secret & PII redaction engine: deterministic signature scanning,
//! pattern-based entity recognition, the per-session reversible substitution
//! store and the streaming restorer that undoes the substitutions on the
//! way back to the client.

pub mod pii;
pub mod signatures;
pub mod store;
pub mod types;
pub mod unredact;

use types::{DetectedSpan, SpanOrigin};

/// Resolves overlapping spans longest-match-first, ties broken by detector
/// priority (secret wins over pii). The surviving spans are disjoint and
/// sorted by start offset.
pub fn resolve_overlaps(mut spans: Vec<DetectedSpan>) -> Vec<DetectedSpan> {
    spans.sort_by(|a, b| {
        let len_a = a.end - a.start;
        let len_b = b.end - b.start;
        len_b
            .cmp(&len_a)
            .then_with(|| priority(a.origin).cmp(&priority(b.origin)))
            .then_with(|| a.start.cmp(&b.start))
    });
    let mut kept: Vec<DetectedSpan> = Vec::with_capacity(spans.len());
    for span in spans {
        if kept
            .iter()
            .all(|existing| span.end <= existing.start || span.start >= existing.end)
        {
            kept.push(span);
        }
    }
    kept.sort_by_key(|span| span.start);
    kept
}

fn priority(origin: SpanOrigin) -> u8 {
    match origin {
        SpanOrigin::Secret => 0,
        SpanOrigin::Pii => 1,
    }
}

/// Rewrites `text` in place, replacing every resolved span with a
/// placeholder from the store. Spans that fall inside an existing
/// placeholder are dropped, which is what makes a second pass a no-op.
/// Returns the entries that were applied.
pub fn redact_text(
    text: &mut String,
    spans: Vec<DetectedSpan>,
    store: &store::SubstitutionStore,
) -> Vec<types::SubstitutionEntry> {
    let occupied = unredact::placeholder_regions(text);
    let spans: Vec<DetectedSpan> = spans
        .into_iter()
        .filter(|span| {
            occupied
                .iter()
                .all(|(start, end)| span.end <= *start || span.start >= *end)
        })
        .collect();
    let spans = resolve_overlaps(spans);
    let mut applied = Vec::with_capacity(spans.len());
    // back-to-front so earlier offsets stay valid while splicing
    for span in spans.into_iter().rev() {
        let literal = text[span.start..span.end].to_owned();
        let entry = store.placeholder_for(&literal, span.origin, &span.subtype);
        text.replace_range(span.start..span.end, entry.placeholder());
        applied.push(entry);
    }
    applied.reverse();
    applied
}
