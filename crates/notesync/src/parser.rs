//! # Content Parser
//!
//! Turns raw note text into the structured fields the rest of the engine
//! lists and sorts by. Used for drafts (which only have raw text) and for
//! notes fetched straight from the remote store.
//!
//! ## Note Format
//!
//! ```text
//! ---                      <-- optional YAML frontmatter
//! title: Groceries
//! created: 2024-03-01T09:00:00Z
//! updated: 2024-03-02
//! public: true             <-- or `visibility: public` / `private: false`
//! tags: [home, errands]    <-- or `tags: "home, errands"`
//! ---
//! # Groceries              <-- title fallback when frontmatter has none
//!
//! Milk, eggs.              <-- preview source
//! ```
//!
//! ## Rules
//!
//! - **Title**: frontmatter `title`, else the first level-1 heading, else the
//!   first non-empty body line with leading `#` stripped.
//! - **Timestamps**: RFC 3339, `YYYY-MM-DD HH:MM:SS`, or `YYYY-MM-DD` (midnight UTC).
//! - **Visibility**: private unless the frontmatter says otherwise.
//! - **Preview**: plain text of the markdown body (title heading excluded),
//!   whitespace collapsed, bounded to `preview_length` characters.
//! - **Malformed frontmatter** is ignored as a whole and flagged on the result;
//!   the body is still parsed.
//!
//! Parsing is a pure function of its input.

use crate::model::Visibility;
use crate::tags::normalize_tags;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use serde_yaml::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedContent {
    pub title: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub visibility: Visibility,
    pub tags: BTreeSet<String>,
    pub preview: String,
    pub malformed_frontmatter: bool,
}

pub fn parse_content(raw: &str, preview_length: usize) -> ParsedContent {
    let (frontmatter, body) = split_frontmatter(raw);
    let mut parsed = ParsedContent::default();

    if let Some(yaml) = frontmatter.filter(|yaml| !yaml.trim().is_empty()) {
        match serde_yaml::from_str::<Value>(yaml) {
            Ok(value @ Value::Mapping(_)) => apply_frontmatter(&mut parsed, &value),
            Ok(Value::Null) => {}
            Ok(_) | Err(_) => parsed.malformed_frontmatter = true,
        }
    }

    let (heading_title, text) = extract_text(body);
    if parsed.title.is_none() {
        parsed.title = heading_title.or_else(|| first_line_title(body));
    }
    parsed.preview = truncate_chars(&collapse_whitespace(&text), preview_length);
    parsed
}

/// Splits a leading `---` fenced YAML block from the body.
/// An unterminated fence is treated as ordinary body text.
pub fn split_frontmatter(raw: &str) -> (Option<&str>, &str) {
    let text = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let rest = match text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
    {
        Some(rest) => rest,
        None => return (None, text),
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed == "---" || trimmed == "..." {
            return (Some(&rest[..offset]), &rest[offset + line.len()..]);
        }
        offset += line.len();
    }
    (None, text)
}

fn apply_frontmatter(parsed: &mut ParsedContent, value: &Value) {
    if let Some(title) = value.get("title").and_then(Value::as_str) {
        let title = title.trim();
        if !title.is_empty() {
            parsed.title = Some(title.to_string());
        }
    }

    parsed.created_at = ["created", "created_at", "createdAt", "date"]
        .iter()
        .find_map(|key| value.get(*key).and_then(timestamp_value));
    parsed.updated_at = ["updated", "updated_at", "updatedAt", "modified"]
        .iter()
        .find_map(|key| value.get(*key).and_then(timestamp_value));

    if let Some(public) = value.get("public").and_then(Value::as_bool) {
        parsed.visibility = Visibility::from_public(public);
    } else if let Some(private) = value.get("private").and_then(Value::as_bool) {
        parsed.visibility = Visibility::from_public(!private);
    } else if let Some(vis) = value.get("visibility").and_then(Value::as_str) {
        parsed.visibility = Visibility::from_public(vis.trim().eq_ignore_ascii_case("public"));
    }

    parsed.tags = match value.get("tags") {
        Some(Value::Sequence(items)) => {
            normalize_tags(items.iter().filter_map(scalar_string).collect::<Vec<_>>())
        }
        Some(Value::String(list)) => normalize_tags(list.split(',')),
        _ => BTreeSet::new(),
    };
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
        _ => None,
    }
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Walks the markdown body, returning the first H1 text and the remaining plain text.
fn extract_text(body: &str) -> (Option<String>, String) {
    let mut title: Option<String> = None;
    let mut in_title = false;
    let mut heading = String::new();
    let mut text = String::new();

    for event in Parser::new_ext(body, Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS) {
        match event {
            Event::Start(Tag::Heading {
                level: HeadingLevel::H1,
                ..
            }) if title.is_none() => {
                in_title = true;
                heading.clear();
            }
            Event::End(TagEnd::Heading(HeadingLevel::H1)) if in_title => {
                in_title = false;
                let trimmed = heading.trim();
                if !trimmed.is_empty() {
                    title = Some(trimmed.to_string());
                }
            }
            Event::Text(t) | Event::Code(t) => {
                if in_title {
                    heading.push_str(&t);
                } else {
                    text.push_str(&t);
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if in_title {
                    heading.push(' ');
                } else {
                    text.push(' ');
                }
            }
            Event::End(TagEnd::Paragraph)
            | Event::End(TagEnd::Heading(_))
            | Event::End(TagEnd::Item)
            | Event::End(TagEnd::CodeBlock) => text.push(' '),
            _ => {}
        }
    }

    (title, text)
}

fn first_line_title(body: &str) -> Option<String> {
    body.lines()
        .map(|line| line.trim().trim_start_matches('#').trim())
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Bounds `text` to `max` characters, the last one being an ellipsis when cut.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let truncated: String = text.chars().take(max - 1).collect();
    format!("{}…", truncated.trim_end())
}
