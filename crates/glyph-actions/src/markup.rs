//! Marker-based element upsert/removal
//!
//! Every instant-action element is a single `<div>` carrying
//! `data-glyph-instant="<rule>"` and no nested `<div>`, so locating it does not
//! need a full HTML parser.

/// Attribute identifying elements owned by instant actions
pub const MARKER_ATTR: &str = "data-glyph-instant";

/// Opening tag for a marked element
#[must_use]
pub fn open_tag(marker: &str, attrs: &str) -> String {
    if attrs.is_empty() {
        format!(r#"<div {MARKER_ATTR}="{marker}">"#)
    } else {
        format!(r#"<div {MARKER_ATTR}="{marker}" {attrs}>"#)
    }
}

/// Byte range of the first element carrying `marker`
#[must_use]
pub fn find_marked(content: &str, marker: &str) -> Option<std::ops::Range<usize>> {
    let needle = format!(r#"{MARKER_ATTR}="{marker}""#);
    let attr_at = content.find(&needle)?;
    let start = content[..attr_at].rfind('<')?;
    let close = content[attr_at..].find("</div>")?;
    Some(start..attr_at + close + "</div>".len())
}

/// Whether `content` already carries `marker`
#[inline]
#[must_use]
pub fn has_marker(content: &str, marker: &str) -> bool {
    find_marked(content, marker).is_some()
}

/// Replace the marked element in place, or insert `element` before `</body>`
#[must_use]
pub fn upsert(content: &str, marker: &str, element: &str) -> String {
    if let Some(range) = find_marked(content, marker) {
        let mut out = String::with_capacity(content.len() + element.len());
        out.push_str(&content[..range.start]);
        out.push_str(element);
        out.push_str(&content[range.end..]);
        return out;
    }

    match find_body_close(content) {
        Some(at) => {
            let mut out = String::with_capacity(content.len() + element.len());
            out.push_str(&content[..at]);
            out.push_str(element);
            out.push_str(&content[at..]);
            out
        }
        None => format!("{content}{element}"),
    }
}

/// Remove the marked element if present
#[must_use]
pub fn remove(content: &str, marker: &str) -> String {
    match find_marked(content, marker) {
        Some(range) => format!("{}{}", &content[..range.start], &content[range.end..]),
        None => content.to_string(),
    }
}

fn find_body_close(content: &str) -> Option<usize> {
    // ASCII lowercasing keeps byte offsets aligned with `content`
    content.to_ascii_lowercase().rfind("</body>")
}

/// Escape text for use inside element content or attribute values
#[must_use]
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const EL: &str = r#"<div data-glyph-instant="note">hi</div>"#;

    #[test]
    fn upsert_inserts_before_body_close() {
        let out = upsert("<html><BODY><p>x</p></BODY></html>", "note", EL);
        assert_eq!(out, format!("<html><BODY><p>x</p>{EL}</BODY></html>"));
    }

    #[test]
    fn upsert_appends_without_body() {
        assert_eq!(upsert("<p>x</p>", "note", EL), format!("<p>x</p>{EL}"));
    }

    #[test]
    fn upsert_replaces_existing_element() {
        let doc = format!("<body>{EL}<p>y</p></body>");
        let replacement = r#"<div data-glyph-instant="note">bye</div>"#;
        assert_eq!(
            upsert(&doc, "note", replacement),
            format!("<body>{replacement}<p>y</p></body>")
        );
    }

    #[test]
    fn remove_drops_only_marked_element() {
        let doc = format!("<body><div>keep</div>{EL}</body>");
        assert_eq!(remove(&doc, "note"), "<body><div>keep</div></body>");
        assert_eq!(remove("<p>none</p>", "note"), "<p>none</p>");
    }

    #[test]
    fn escape_covers_markup_characters() {
        assert_eq!(escape(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }
}
