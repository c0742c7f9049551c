//! Text-wrangling parsers for model output: fenced blocks, frontmatter,
//! checklists, best-effort auto-parsing, and a minimal XML reader.

use super::core::json_to_value;
use super::{expect_arity, str_arg};
use crate::context::RuntimeContext;
use crate::error::RuntimeError;
use crate::value::{Callable, RuntimeFn, Value};
use std::collections::BTreeMap;

pub fn register(functions: &mut BTreeMap<String, Callable>) {
    functions.insert(
        "parse_auto".to_string(),
        RuntimeFn::callable("parse_auto", builtin_parse_auto),
    );
    functions.insert(
        "parse_xml".to_string(),
        RuntimeFn::callable("parse_xml", builtin_parse_xml),
    );
    functions.insert(
        "parse_fence".to_string(),
        RuntimeFn::callable("parse_fence", builtin_parse_fence),
    );
    functions.insert(
        "parse_fences".to_string(),
        RuntimeFn::callable("parse_fences", builtin_parse_fences),
    );
    functions.insert(
        "parse_frontmatter".to_string(),
        RuntimeFn::callable("parse_frontmatter", builtin_parse_frontmatter),
    );
    functions.insert(
        "parse_checklist".to_string(),
        RuntimeFn::callable("parse_checklist", builtin_parse_checklist),
    );
}

// ============================================================================
// Fenced code blocks
// ============================================================================

struct Fence {
    lang: String,
    content: String,
}

fn find_fences(text: &str) -> Vec<Fence> {
    let mut fences = Vec::new();
    let mut lines = text.lines();
    while let Some(line) = lines.next() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("```") {
            let lang = rest.trim().to_string();
            let mut content = String::new();
            for inner in lines.by_ref() {
                if inner.trim_start().starts_with("```") {
                    break;
                }
                content.push_str(inner);
                content.push('\n');
            }
            fences.push(Fence { lang, content });
        }
    }
    fences
}

/// Content of the first fenced block; the empty string when there is none.
fn builtin_parse_fence(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("parse_fence", args, 1)?;
    let text = str_arg("parse_fence", args, 0)?;
    let fences = find_fences(text);
    Ok(Value::Str(
        fences.into_iter().next().map(|f| f.content).unwrap_or_default(),
    ))
}

/// All fenced blocks as `{lang, content}` dicts.
fn builtin_parse_fences(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("parse_fences", args, 1)?;
    let text = str_arg("parse_fences", args, 0)?;
    Ok(Value::Tuple(
        find_fences(text)
            .into_iter()
            .map(|f| {
                let mut map = BTreeMap::new();
                map.insert("lang".to_string(), Value::Str(f.lang));
                map.insert("content".to_string(), Value::Str(f.content));
                Value::Dict(map)
            })
            .collect(),
    ))
}

// ============================================================================
// Frontmatter and checklists
// ============================================================================

/// Parse a `---` frontmatter header into `{meta, body}`. Scalar values are
/// read as JSON when they parse, strings otherwise.
fn builtin_parse_frontmatter(
    args: &[Value],
    _ctx: &mut RuntimeContext,
) -> Result<Value, RuntimeError> {
    expect_arity("parse_frontmatter", args, 1)?;
    let text = str_arg("parse_frontmatter", args, 0)?;

    let mut meta = BTreeMap::new();
    let mut body = text.to_string();
    if let Some(rest) = text.strip_prefix("---\n").or_else(|| text.strip_prefix("---\r\n")) {
        if let Some(end) = rest.find("\n---") {
            let header = &rest[..end];
            let after = &rest[end + 4..];
            body = after.trim_start_matches(['\r', '\n']).to_string();
            for line in header.lines() {
                let Some((key, value)) = line.split_once(':') else {
                    continue;
                };
                let key = key.trim();
                if key.is_empty() {
                    continue;
                }
                let raw = value.trim();
                let parsed = serde_json::from_str::<serde_json::Value>(raw)
                    .map(|j| json_to_value(&j))
                    .unwrap_or_else(|_| Value::Str(raw.to_string()));
                meta.insert(key.to_string(), parsed);
            }
        }
    }

    let mut out = BTreeMap::new();
    out.insert("meta".to_string(), Value::Dict(meta));
    out.insert("body".to_string(), Value::Str(body));
    Ok(Value::Dict(out))
}

/// Markdown checklist items as `{text, done}` dicts.
fn builtin_parse_checklist(
    args: &[Value],
    _ctx: &mut RuntimeContext,
) -> Result<Value, RuntimeError> {
    expect_arity("parse_checklist", args, 1)?;
    let text = str_arg("parse_checklist", args, 0)?;
    let mut items = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_start();
        let Some(rest) = trimmed
            .strip_prefix("- [")
            .or_else(|| trimmed.strip_prefix("* ["))
        else {
            continue;
        };
        let mut chars = rest.chars();
        let marker = chars.next();
        let Some(done) = (match marker {
            Some(' ') => Some(false),
            Some('x') | Some('X') => Some(true),
            _ => None,
        }) else {
            continue;
        };
        let rest: String = chars.collect();
        let Some(text) = rest.strip_prefix("] ") else {
            continue;
        };
        let mut map = BTreeMap::new();
        map.insert("text".to_string(), Value::Str(text.trim_end().to_string()));
        map.insert("done".to_string(), Value::Bool(done));
        items.push(Value::Dict(map));
    }
    Ok(Value::Tuple(items))
}

// ============================================================================
// Auto-parsing
// ============================================================================

/// Best-effort parse of model output: the whole input as JSON, then JSON
/// inside the first fenced block, then the trimmed input as a string.
fn builtin_parse_auto(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("parse_auto", args, 1)?;
    let text = str_arg("parse_auto", args, 0)?;
    let trimmed = text.trim();
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return Ok(json_to_value(&json));
    }
    for fence in find_fences(text) {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(fence.content.trim()) {
            return Ok(json_to_value(&json));
        }
    }
    Ok(Value::Str(trimmed.to_string()))
}

// ============================================================================
// Minimal XML
// ============================================================================

/// Parse a single XML element into `{tag, attributes, children, text}`.
fn builtin_parse_xml(args: &[Value], _ctx: &mut RuntimeContext) -> Result<Value, RuntimeError> {
    expect_arity("parse_xml", args, 1)?;
    let text = str_arg("parse_xml", args, 0)?;
    let chars: Vec<char> = text.chars().collect();
    let mut reader = XmlReader { chars, pos: 0 };
    reader.skip_prolog();
    let element = reader.parse_element()?;
    Ok(element)
}

struct XmlReader {
    chars: Vec<char>,
    pos: usize,
}

impl XmlReader {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars()
            .enumerate()
            .all(|(i, c)| self.chars.get(self.pos + i) == Some(&c))
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|c| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn skip_until(&mut self, end: &str) {
        while self.pos < self.chars.len() && !self.starts_with(end) {
            self.pos += 1;
        }
        self.pos = (self.pos + end.chars().count()).min(self.chars.len());
    }

    fn skip_prolog(&mut self) {
        loop {
            self.skip_ws();
            if self.starts_with("<?") {
                self.skip_until("?>");
            } else if self.starts_with("<!--") {
                self.skip_until("-->");
            } else if self.starts_with("<!") {
                self.skip_until(">");
            } else {
                break;
            }
        }
    }

    fn error(&self, message: &str) -> RuntimeError {
        RuntimeError::operation(format!("parse_xml: {}", message), None)
    }

    fn read_name(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '-' || c == ':' || c == '.' {
                name.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        name
    }

    fn parse_element(&mut self) -> Result<Value, RuntimeError> {
        self.skip_ws();
        if self.peek() != Some('<') {
            return Err(self.error("expected `<`"));
        }
        self.pos += 1;
        let tag = self.read_name();
        if tag.is_empty() {
            return Err(self.error("expected element name"));
        }

        let mut attributes = BTreeMap::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some('/') => {
                    self.pos += 1;
                    if self.peek() != Some('>') {
                        return Err(self.error("malformed self-closing tag"));
                    }
                    self.pos += 1;
                    return Ok(element_value(tag, attributes, Vec::new(), String::new()));
                }
                Some('>') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => {
                    let name = self.read_name();
                    if name.is_empty() {
                        return Err(self.error("expected attribute name"));
                    }
                    self.skip_ws();
                    if self.peek() != Some('=') {
                        return Err(self.error("expected `=` after attribute name"));
                    }
                    self.pos += 1;
                    self.skip_ws();
                    let quote = self.peek();
                    if quote != Some('"') && quote != Some('\'') {
                        return Err(self.error("expected quoted attribute value"));
                    }
                    let quote = quote.unwrap_or('"');
                    self.pos += 1;
                    let mut value = String::new();
                    while let Some(c) = self.peek() {
                        if c == quote {
                            break;
                        }
                        value.push(c);
                        self.pos += 1;
                    }
                    if self.peek() != Some(quote) {
                        return Err(self.error("unterminated attribute value"));
                    }
                    self.pos += 1;
                    attributes.insert(name, Value::Str(unescape_xml(&value)));
                }
                None => return Err(self.error("unterminated start tag")),
            }
        }

        let mut children = Vec::new();
        let mut text = String::new();
        loop {
            if self.starts_with("<!--") {
                self.skip_until("-->");
                continue;
            }
            if self.starts_with("</") {
                self.pos += 2;
                let closing = self.read_name();
                if closing != tag {
                    return Err(self.error(&format!(
                        "mismatched closing tag `{}` for `{}`",
                        closing, tag
                    )));
                }
                self.skip_ws();
                if self.peek() != Some('>') {
                    return Err(self.error("malformed closing tag"));
                }
                self.pos += 1;
                return Ok(element_value(tag, attributes, children, text));
            }
            match self.peek() {
                Some('<') => children.push(self.parse_element()?),
                Some(c) => {
                    text.push(c);
                    self.pos += 1;
                }
                None => return Err(self.error(&format!("unterminated element `{}`", tag))),
            }
        }
    }
}

fn element_value(
    tag: String,
    attributes: BTreeMap<String, Value>,
    children: Vec<Value>,
    text: String,
) -> Value {
    let mut map = BTreeMap::new();
    map.insert("tag".to_string(), Value::Str(tag));
    map.insert("attributes".to_string(), Value::Dict(attributes));
    map.insert("children".to_string(), Value::Tuple(children));
    map.insert(
        "text".to_string(),
        Value::Str(unescape_xml(text.trim())),
    );
    Value::Dict(map)
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
