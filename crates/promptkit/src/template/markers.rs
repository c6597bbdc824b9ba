//! In-band directive markers.
//!
//! Directives (`role`, `media`, `history`) render to markers built from
//! reserved ASCII control characters. The message assembler scans for them
//! after rendering. Interpolated data has the reserved characters removed,
//! so only the template itself can produce a marker.

use std::borrow::Cow;

pub const MARKER_START: char = '\u{1e}';
pub const FIELD_SEPARATOR: char = '\u{1f}';
pub const MARKER_END: char = '\u{1d}';

const RESERVED: [char; 3] = [MARKER_START, FIELD_SEPARATOR, MARKER_END];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    /// Start a new message with this role name.
    Role(String),
    Media {
        url: String,
        content_type: Option<String>,
    },
    /// Splice conversation history here.
    History,
}

impl Marker {
    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(MARKER_START);
        match self {
            Marker::Role(name) => {
                out.push_str("role");
                out.push(FIELD_SEPARATOR);
                out.push_str(&strip_reserved(name));
            }
            Marker::Media { url, content_type } => {
                out.push_str("media");
                out.push(FIELD_SEPARATOR);
                out.push_str(&strip_reserved(url));
                if let Some(ct) = content_type {
                    out.push(FIELD_SEPARATOR);
                    out.push_str(&strip_reserved(ct));
                }
            }
            Marker::History => out.push_str("history"),
        }
        out.push(MARKER_END);
        out
    }

    fn decode(body: &str) -> Option<Marker> {
        let mut fields = body.split(FIELD_SEPARATOR);
        match fields.next()? {
            "role" => Some(Marker::Role(fields.next()?.to_string())),
            "media" => {
                let url = fields.next()?.to_string();
                let content_type = fields
                    .next()
                    .filter(|ct| !ct.is_empty())
                    .map(str::to_string);
                Some(Marker::Media { url, content_type })
            }
            "history" => Some(Marker::History),
            _ => None,
        }
    }
}

/// Remove reserved marker characters from `text`.
pub fn strip_reserved(text: &str) -> Cow<'_, str> {
    if text.contains(RESERVED) {
        Cow::Owned(text.chars().filter(|c| !RESERVED.contains(c)).collect())
    } else {
        Cow::Borrowed(text)
    }
}

/// A piece of rendered output: literal text, or a decoded marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    Marker(Marker),
}

/// Split rendered output into text and markers. A start character without
/// a matching end, or an unrecognized marker body, is kept as text.
pub fn scan(rendered: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut rest = rendered;
    while let Some(start) = rest.find(MARKER_START) {
        let (before, tail) = rest.split_at(start);
        let body_and_more = tail.split_at(MARKER_START.len_utf8()).1;
        let Some(end) = body_and_more.find(MARKER_END) else {
            break;
        };
        let (body, after) = body_and_more.split_at(end);
        let after = after.split_at(MARKER_END.len_utf8()).1;
        match Marker::decode(body) {
            Some(marker) => {
                if !before.is_empty() {
                    segments.push(Segment::Text(before));
                }
                segments.push(Segment::Marker(marker));
            }
            None => {
                let consumed = before.len() + MARKER_START.len_utf8() + body.len() + MARKER_END.len_utf8();
                segments.push(Segment::Text(rest.split_at(consumed).0));
            }
        }
        rest = after;
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest));
    }
    segments
}
