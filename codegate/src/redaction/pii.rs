//! Entity recognition over message text. The recognizer is behind a trait
//! so a model-backed implementation can be slotted in; the built-in one is
//! pattern-based and covers the common typed spans.

use lazy_static::lazy_static;
use regex::Regex;

use super::types::{DetectedSpan, SpanOrigin};

pub trait PiiRecognizer: Send + Sync {
    fn recognize(&self, text: &str) -> Vec<DetectedSpan>;
}

pub struct PatternEntityRecognizer;

lazy_static! {
    static ref EMAIL: Regex =
        Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").unwrap();
    static ref CREDIT_CARD: Regex =
        Regex::new(r"\b(?:\d[ \-]?){13,19}\b").unwrap();
    static ref SSN: Regex = Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap();
    static ref PHONE: Regex =
        Regex::new(r"\+?\d{1,3}[ \-.]?\(?\d{2,4}\)?[ \-.]\d{3,4}[ \-.]\d{3,4}\b").unwrap();
    static ref IPV4: Regex = Regex::new(
        r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b"
    )
    .unwrap();
    static ref IPV6: Regex =
        Regex::new(r"\b(?:[0-9a-fA-F]{1,4}:){7}[0-9a-fA-F]{1,4}\b").unwrap();
}

/// Luhn checksum, the card-number gate that keeps long digit runs from
/// false-flagging as payment data.
fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 || digits.len() > 19 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(index, &digit)| {
            if index % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                digit
            }
        })
        .sum();
    sum % 10 == 0
}

impl PiiRecognizer for PatternEntityRecognizer {
    fn recognize(&self, text: &str) -> Vec<DetectedSpan> {
        let mut spans = Vec::new();
        for found in EMAIL.find_iter(text) {
            spans.push(DetectedSpan::new(
                found.start(),
                found.end(),
                SpanOrigin::Pii,
                "email",
            ));
        }
        for found in CREDIT_CARD.find_iter(text) {
            if luhn_valid(found.as_str()) {
                spans.push(DetectedSpan::new(
                    found.start(),
                    found.end(),
                    SpanOrigin::Pii,
                    "credit_card",
                ));
            }
        }
        for found in SSN.find_iter(text) {
            spans.push(DetectedSpan::new(
                found.start(),
                found.end(),
                SpanOrigin::Pii,
                "ssn",
            ));
        }
        for found in PHONE.find_iter(text) {
            spans.push(DetectedSpan::new(
                found.start(),
                found.end(),
                SpanOrigin::Pii,
                "phone",
            ));
        }
        for found in IPV4.find_iter(text) {
            spans.push(DetectedSpan::new(
                found.start(),
                found.end(),
                SpanOrigin::Pii,
                "ip_address",
            ));
        }
        for found in IPV6.find_iter(text) {
            spans.push(DetectedSpan::new(
                found.start(),
                found.end(),
                SpanOrigin::Pii,
                "ip_address",
            ));
        }
        spans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_and_ip_are_typed() {
        let spans = PatternEntityRecognizer.recognize("mail me at dev@example.com from 10.0.0.1");
        let subtypes: Vec<&str> = spans.iter().map(|s| s.subtype.as_str()).collect();
        assert!(subtypes.contains(&"email"));
        assert!(subtypes.contains(&"ip_address"));
    }

    #[test]
    fn luhn_filters_card_candidates() {
        // 4111111111111111 passes Luhn, 4111111111111112 does not
        let spans = PatternEntityRecognizer.recognize("card 4111111111111111 ok");
        assert!(spans.iter().any(|s| s.subtype == "credit_card"));
        let spans = PatternEntityRecognizer.recognize("card 4111111111111112 ok");
        assert!(!spans.iter().any(|s| s.subtype == "credit_card"));
    }

    #[test]
    fn ssn_shape_is_detected() {
        let spans = PatternEntityRecognizer.recognize("ssn is 078-05-1120");
        assert!(spans.iter().any(|s| s.subtype == "ssn"));
    }

    #[test]
    fn version_numbers_are_not_phone_numbers() {
        let spans = PatternEntityRecognizer.recognize("upgrade to 1.2.3 now");
        assert!(!spans.iter().any(|s| s.subtype == "phone"));
    }
}
