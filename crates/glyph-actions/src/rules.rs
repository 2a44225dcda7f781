//! Built-in instant action rules
//!
//! Rules are evaluated in table order against the lower-cased prompt; the first
//! match wins. Each transform is idempotent: it updates its own marked element
//! when present and inserts it otherwise.

use crate::markup::{escape, open_tag, remove, upsert};
use once_cell::sync::Lazy;
use regex::Regex;

/// Predicate over the lower-cased, trimmed prompt
pub type Predicate = fn(&str) -> bool;

/// Transform from (original prompt, current content) to new content
pub type Transform = fn(&str, &str) -> String;

/// One entry of the instant action table
#[derive(Debug, Clone, Copy)]
pub struct InstantRule {
    /// Rule name, also used as the element marker
    pub name: &'static str,
    /// Example prompt shown in suggestion lists
    pub example: &'static str,
    /// Whether this rule handles the prompt
    pub matches: Predicate,
    /// Produces the new document
    pub apply: Transform,
}

/// Built-in rules in evaluation order
pub static BUILTIN_RULES: &[InstantRule] = &[
    InstantRule {
        name: "remove-watermark",
        example: "Remove watermark",
        matches: matches_remove_watermark,
        apply: apply_remove_watermark,
    },
    InstantRule {
        name: "watermark",
        example: "Add a DRAFT watermark",
        matches: matches_watermark,
        apply: apply_watermark,
    },
    InstantRule {
        name: "qr-code",
        example: "Add QR code",
        matches: matches_qr_code,
        apply: apply_qr_code,
    },
    InstantRule {
        name: "payment-terms",
        example: "Add payment terms: Net 30",
        matches: matches_payment_terms,
        apply: apply_payment_terms,
    },
    InstantRule {
        name: "signature-line",
        example: "Add signature line",
        matches: matches_signature_line,
        apply: apply_signature_line,
    },
    InstantRule {
        name: "paid-stamp",
        example: "Mark as paid",
        matches: matches_paid_stamp,
        apply: apply_paid_stamp,
    },
    InstantRule {
        name: "thank-you-note",
        example: "Add thank you note",
        matches: matches_thank_you_note,
        apply: apply_thank_you_note,
    },
];

static QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["“']([^"”']+)["”']"#).expect("quoted pattern is valid"));

static URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[^\s<>]+").expect("url pattern is valid"));

static WORD_BEFORE_WATERMARK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([A-Za-z][\w-]*)\s+watermark\b").expect("watermark pattern is valid")
});

static PAYMENT_TERMS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)payment\s+terms\s*(?:to\b|of\b|:|=)?\s*(.*)$")
        .expect("payment terms pattern is valid")
});

const DEFAULT_WATERMARK: &str = "DRAFT";
const DEFAULT_PAYMENT_TERMS: &str = "Net 30";
const DEFAULT_THANK_YOU: &str = "Thank you for your business!";
const QR_PLACEHOLDER: &str = "{{payment_url}}";

fn after_colon(prompt: &str) -> Option<&str> {
    let (_, rest) = prompt.split_once(':')?;
    let rest = rest.trim().trim_end_matches('.').trim();
    (!rest.is_empty()).then_some(rest)
}

fn quoted(prompt: &str) -> Option<&str> {
    QUOTED
        .captures(prompt)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
}

// -- watermark ---------------------------------------------------------------

fn matches_remove_watermark(prompt: &str) -> bool {
    prompt.contains("watermark")
        && (prompt.contains("remove") || prompt.contains("delete") || prompt.contains("no watermark"))
}

fn apply_remove_watermark(_prompt: &str, content: &str) -> String {
    remove(content, "watermark")
}

fn matches_watermark(prompt: &str) -> bool {
    prompt.contains("watermark")
}

fn watermark_text(prompt: &str) -> String {
    const FILLER: &[&str] = &["add", "a", "an", "the", "put", "insert", "with", "set", "new"];

    let text = quoted(prompt)
        .or_else(|| after_colon(prompt))
        .map(str::to_string)
        .or_else(|| {
            WORD_BEFORE_WATERMARK
                .captures(prompt)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .filter(|w| !FILLER.contains(&w.to_lowercase().as_str()))
        })
        .unwrap_or_else(|| DEFAULT_WATERMARK.to_string());

    text.to_uppercase()
}

fn apply_watermark(prompt: &str, content: &str) -> String {
    let element = format!(
        "{}{}</div>",
        open_tag(
            "watermark",
            r#"style="position:fixed;top:40%;left:0;right:0;text-align:center;font-size:96px;opacity:0.08;transform:rotate(-30deg);pointer-events:none;""#,
        ),
        escape(&watermark_text(prompt))
    );
    upsert(content, "watermark", &element)
}

// -- QR code -----------------------------------------------------------------

fn matches_qr_code(prompt: &str) -> bool {
    prompt.contains("qr code") || prompt.contains("qr-code") || prompt.contains("qrcode")
}

fn apply_qr_code(prompt: &str, content: &str) -> String {
    let target = URL
        .find(prompt)
        .map_or(QR_PLACEHOLDER, |m| m.as_str().trim_end_matches(&['.', ',', ')'][..]));
    let src = format!(
        "https://api.qrserver.com/v1/create-qr-code/?size=120x120&data={}",
        urlencoding::encode(target)
    );
    let element = format!(
        r#"{}<img alt="QR code" width="120" height="120" src="{}"/></div>"#,
        open_tag("qr-code", r#"style="margin-top:16px;text-align:right;""#),
        escape(&src)
    );
    upsert(content, "qr-code", &element)
}

// -- payment terms -----------------------------------------------------------

fn matches_payment_terms(prompt: &str) -> bool {
    prompt.contains("payment terms")
}

fn payment_terms_text(prompt: &str) -> String {
    PAYMENT_TERMS
        .captures(prompt.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().trim_end_matches('.').trim())
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_PAYMENT_TERMS)
        .to_string()
}

fn apply_payment_terms(prompt: &str, content: &str) -> String {
    let element = format!(
        "{}<strong>Payment terms:</strong> {}</div>",
        open_tag("payment-terms", r#"class="payment-terms" style="margin-top:12px;""#),
        escape(&payment_terms_text(prompt))
    );
    upsert(content, "payment-terms", &element)
}

// -- signature line ----------------------------------------------------------

fn matches_signature_line(prompt: &str) -> bool {
    prompt.contains("signature line")
        || prompt.contains("signature field")
        || prompt.contains("add signature")
}

fn apply_signature_line(_prompt: &str, content: &str) -> String {
    let element = format!(
        "{}Authorized signature: ______________________ Date: __________</div>",
        open_tag("signature-line", r#"style="margin-top:48px;""#)
    );
    upsert(content, "signature-line", &element)
}

// -- paid stamp --------------------------------------------------------------

fn matches_paid_stamp(prompt: &str) -> bool {
    prompt.contains("mark as paid") || prompt.contains("paid stamp")
}

fn apply_paid_stamp(_prompt: &str, content: &str) -> String {
    let element = format!(
        "{}PAID</div>",
        open_tag(
            "paid-stamp",
            r#"style="position:absolute;top:32px;right:32px;padding:8px 16px;border:4px solid #16a34a;color:#16a34a;font-weight:700;transform:rotate(12deg);""#,
        )
    );
    upsert(content, "paid-stamp", &element)
}

// -- thank you note ----------------------------------------------------------

fn matches_thank_you_note(prompt: &str) -> bool {
    prompt.contains("thank you note")
        || prompt.contains("thank-you note")
        || prompt.contains("thank you message")
}

fn apply_thank_you_note(prompt: &str, content: &str) -> String {
    let text = quoted(prompt)
        .or_else(|| after_colon(prompt))
        .unwrap_or(DEFAULT_THANK_YOU);
    let element = format!(
        "{}{}</div>",
        open_tag("thank-you-note", r#"style="margin-top:24px;font-style:italic;""#),
        escape(text)
    );
    upsert(content, "thank-you-note", &element)
}
