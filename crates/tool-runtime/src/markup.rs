//! Parsing of tool calls embedded as tags in assistant text.
//!
//! Re-expressed from the original system's `xml_tool_parser.py` in an
//! idiomatic Rust shape: a tolerant attribute regex plus manual depth
//! counting for nested same-name tags, rather than a general XML parser
//! (the original never parses full XML either — it only ever looks for its
//! own registered tag names).

use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::registry::MarkupLookup;
use crate::tool::{ParamSource, ToolCall};

/// Finds the earliest complete occurrence of any of `tags` in `window`,
/// handling nested same-name tags by depth counting. Returns the byte range
/// of the whole match (open tag through matching close tag) and which tag
/// matched.
pub fn find_earliest_complete_chunk(window: &str, tags: &[String]) -> Option<(usize, usize, String)> {
    let mut best: Option<(usize, usize, String)> = None;
    for tag in tags {
        if let Some((start, end)) = find_balanced(window, tag, 0) {
            if best.as_ref().map_or(true, |(best_start, ..)| start < *best_start) {
                best = Some((start, end, tag.clone()));
            }
        }
    }
    best
}

/// Parses one matched chunk (e.g. `<create_note title="x">body</create_note>`)
/// into a `ToolCall`, using the tool's markup schema. Returns `None` if any
/// mapped parameter could not be filled — the chunk is rejected, not
/// partially accepted.
pub fn parse_markup_call(chunk: &str, lookup: &MarkupLookup) -> Option<ToolCall> {
    let markup = lookup.definition.markup.as_ref()?;
    let open_tag_end = chunk.find('>')?;
    let open_tag = &chunk[..=open_tag_end];

    let mut params = serde_json::Map::new();
    for mapping in &markup.mappings {
        let value = match mapping.source {
            ParamSource::Attribute => extract_attribute(open_tag, &mapping.path),
            ParamSource::ChildElement => extract_child_element(chunk, &mapping.path),
            ParamSource::RootTextContent => extract_root_text(chunk, &markup.tag_name),
        };
        match value {
            Some(v) => {
                params.insert(mapping.param_name.clone(), Value::String(v));
            }
            None => {
                tracing::warn!(
                    tag = %markup.tag_name,
                    param = %mapping.param_name,
                    "markup call missing required parameter, dropping chunk"
                );
                return None;
            }
        }
    }

    Some(ToolCall {
        id: format!("tool_{}", stable_hash(chunk)),
        name: lookup.definition.name.clone(),
        input: Value::Object(params),
    })
}

/// Deterministic id derived from the matched chunk so the same textual call
/// reproduces the same id across retries and test runs (not a random uuid).
fn stable_hash(chunk: &str) -> String {
    let digest = Sha256::digest(chunk.as_bytes());
    hex_prefix(&digest, 10)
}

fn hex_prefix(bytes: &[u8], n: usize) -> String {
    bytes.iter().take(n).map(|b| format!("{:02x}", b)).collect()
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn extract_attribute(open_tag: &str, attr_name: &str) -> Option<String> {
    let pattern = format!(
        r#"{}\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>/]+))"#,
        regex::escape(attr_name)
    );
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(open_tag)?;
    let raw = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3))?;
    Some(decode_entities(raw.as_str()))
}

fn extract_child_element(chunk: &str, child_tag: &str) -> Option<String> {
    let (start, end) = find_balanced(chunk, child_tag, 0)?;
    let body = &chunk[start..end];
    let open_end = body.find('>')? + 1;
    let close_start = body.rfind('<')?;
    if open_end >= close_start {
        return Some(String::new());
    }
    Some(decode_entities(body[open_end..close_start].trim()))
}

fn extract_root_text(chunk: &str, tag_name: &str) -> Option<String> {
    let open_end = chunk.find('>')? + 1;
    let close_marker = format!("</{}>", tag_name);
    let close_start = chunk.rfind(&close_marker)?;
    if open_end >= close_start {
        return Some(String::new());
    }
    Some(decode_entities(chunk[open_end..close_start].trim()))
}

/// Locates the first balanced `<tag ...> ... </tag>` span starting the scan
/// at byte offset `from`, treating nested occurrences of the same tag name
/// as increasing a depth counter rather than closing the outer span.
fn find_balanced(haystack: &str, tag: &str, from: usize) -> Option<(usize, usize)> {
    let open_start = find_tag_open(haystack, tag, from)?;
    let mut cursor = haystack[open_start..].find('>')? + open_start + 1;
    let close_marker = format!("</{}>", tag);
    let mut depth = 1usize;

    loop {
        let next_open = find_tag_open(haystack, tag, cursor);
        let next_close = haystack[cursor..].find(&close_marker).map(|p| p + cursor);

        match (next_open, next_close) {
            (Some(o), Some(c)) if o < c => {
                depth += 1;
                cursor = haystack[o..].find('>')? + o + 1;
            }
            (_, Some(c)) => {
                depth -= 1;
                cursor = c + close_marker.len();
                if depth == 0 {
                    return Some((open_start, cursor));
                }
            }
            _ => return None,
        }
    }
}

/// Finds the next `<tag` occurrence whose following byte is a legal opening
/// tag terminator, so a registered tag `foo` doesn't match `<foobar>`.
fn find_tag_open(haystack: &str, tag: &str, from: usize) -> Option<usize> {
    let marker = format!("<{}", tag);
    let mut search_from = from;
    loop {
        let found = haystack.get(search_from..)?.find(&marker)? + search_from;
        let after = found + marker.len();
        match haystack.as_bytes().get(after) {
            Some(b'>') | Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') | Some(b'/') => {
                return Some(found)
            }
            Some(_) => search_from = found + marker.len(),
            None => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_simple_tag_span() {
        let text = "preamble <note title=\"hi\">body</note> trailer";
        let (s, e) = find_balanced(text, "note", 0).unwrap();
        assert_eq!(&text[s..e], "<note title=\"hi\">body</note>");
    }

    #[test]
    fn handles_nested_same_name_tags_by_depth() {
        let text = "<box><box>inner</box>outer</box>";
        let (s, e) = find_balanced(text, "box", 0).unwrap();
        assert_eq!(&text[s..e], text);
    }

    #[test]
    fn does_not_match_prefix_tag_names() {
        let text = "<notebook>x</notebook> <note>y</note>";
        let (s, e) = find_balanced(text, "note", 0).unwrap();
        assert_eq!(&text[s..e], "<note>y</note>");
    }

    #[test]
    fn extracts_quoted_and_unquoted_attributes() {
        let open_tag = "<t a=\"1\" b='2' c=3>";
        assert_eq!(extract_attribute(open_tag, "a").as_deref(), Some("1"));
        assert_eq!(extract_attribute(open_tag, "b").as_deref(), Some("2"));
        assert_eq!(extract_attribute(open_tag, "c").as_deref(), Some("3"));
    }

    #[test]
    fn decodes_standard_entities() {
        assert_eq!(decode_entities("a &amp; b &lt;c&gt;"), "a & b <c>");
    }

    #[test]
    fn stable_hash_is_deterministic() {
        let a = stable_hash("<note>x</note>");
        let b = stable_hash("<note>x</note>");
        assert_eq!(a, b);
    }
}
