use std::collections::BTreeSet;

use serde_yaml::{Mapping, Value};

use crate::{Error, Result, VaultPath};

/// A document split into its header and body, before index construction.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub path: VaultPath,
    pub header: Header,
    pub body: String,
}

/// Key/value header block found at the top of a document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header(Mapping);

impl Header {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(Value::String(key.into()))
    }

    pub fn id(&self) -> Option<String> {
        self.get("id").and_then(scalar_to_string)
    }

    pub fn title(&self) -> Option<String> {
        self.get("title").and_then(scalar_to_string)
    }

    pub fn tags(&self) -> BTreeSet<String> {
        self.get("tags").map(tags_from_value).unwrap_or_default()
    }
}

pub fn parse_document(path: &VaultPath, content: &str) -> Result<ParsedDocument> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let (header, body) = split_header(path, content)?;
    Ok(ParsedDocument {
        path: path.clone(),
        header,
        body: body.to_string(),
    })
}

fn split_header<'a>(path: &VaultPath, content: &'a str) -> Result<(Header, &'a str)> {
    let Some(rest) = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
    else {
        return Ok((Header::default(), content));
    };

    // The closing fence must sit on its own line.
    let mut idx = 0usize;
    while idx < rest.len() {
        let line_end = match rest[idx..].find('\n') {
            Some(off) => idx + off + 1,
            None => rest.len(),
        };
        let line = rest[idx..line_end].trim_end_matches(['\r', '\n']);
        if line == "---" {
            let header_text = &rest[..idx];
            let body = &rest[line_end..];
            return Ok((parse_header(header_text)?, body));
        }
        idx = line_end;
    }

    Err(Error::header(path.as_path(), "header fence not closed"))
}

/// Non-mapping headers (a bare list, a line of prose) carry no fields.
fn parse_header(text: &str) -> Result<Header> {
    match serde_yaml::from_str::<Value>(text)? {
        Value::Mapping(map) => Ok(Header(map)),
        _ => Ok(Header::default()),
    }
}

fn scalar_to_string(v: &Value) -> Option<String> {
    let s = match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn tags_from_value(v: &Value) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    match v {
        Value::Sequence(seq) => {
            for item in seq {
                if let Some(tag) = scalar_to_string(item).and_then(|s| normalize_tag(&s)) {
                    out.insert(tag);
                }
            }
        }
        Value::String(s) => {
            for part in s
                .split(|c: char| c.is_whitespace() || c == ',')
                .filter(|p| !p.is_empty())
            {
                if let Some(tag) = normalize_tag(part) {
                    out.insert(tag);
                }
            }
        }
        _ => {}
    }
    out
}

fn normalize_tag(raw: &str) -> Option<String> {
    let s = raw.trim();
    let s = s.strip_prefix('#').unwrap_or(s).trim();
    (!s.is_empty()).then(|| s.to_string())
}
