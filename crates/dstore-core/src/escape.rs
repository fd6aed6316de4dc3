//! Entity escaping for attribute values and buffer text.
//!
//! The table is a superset of XML's: `;` is escaped too, so `&#59;` must be
//! understood by every peer.

use std::borrow::Cow;

const ENTITIES: [(char, &str); 6] = [
    ('&', "&amp;"),
    ('"', "&quot;"),
    ('\'', "&apos;"),
    ('<', "&lt;"),
    ('>', "&gt;"),
    (';', "&#59;"),
];

fn entity_for(c: char) -> Option<&'static str> {
    ENTITIES.iter().find(|(ch, _)| *ch == c).map(|(_, e)| *e)
}

/// Escape `& " ' < > ;`.
pub fn escape(text: &str) -> Cow<'_, str> {
    if !text.chars().any(|c| entity_for(c).is_some()) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match entity_for(c) {
            Some(entity) => out.push_str(entity),
            None => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Decode the six entities. Anything else after `&` is kept literally.
pub fn unescape(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        match ENTITIES.iter().find(|(_, e)| rest.starts_with(e)) {
            Some((c, e)) => {
                out.push(*c);
                rest = &rest[e.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}
