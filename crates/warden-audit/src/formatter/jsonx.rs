//! JSONx rendering: JSON expressed as XML elements in the `json:` namespace.

use serde_json::Value;

const JSONX_NAMESPACE: &str = "http://www.ibm.com/xmlns/prod/2009/jsonx";

/// Render `value` as a JSONx document.
pub fn to_jsonx(value: &Value) -> String {
    let mut out = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    write_element(&mut out, None, value, true);
    out
}

fn write_element(out: &mut String, name: Option<&str>, value: &Value, root: bool) {
    let tag = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };

    out.push_str("<json:");
    out.push_str(tag);
    if root {
        out.push_str(&format!(r#" xmlns:json="{JSONX_NAMESPACE}""#));
    }
    if let Some(name) = name {
        out.push_str(&format!(r#" name="{}""#, escape(name)));
    }

    match value {
        Value::Null => {
            out.push_str("/>");
            return;
        }
        Value::Bool(b) => out.push_str(&format!(">{b}")),
        Value::Number(n) => out.push_str(&format!(">{n}")),
        Value::String(s) => {
            out.push('>');
            out.push_str(&escape(s));
        }
        Value::Array(items) => {
            out.push('>');
            for item in items {
                write_element(out, None, item, false);
            }
        }
        Value::Object(map) => {
            out.push('>');
            for (key, item) in map {
                write_element(out, Some(key), item, false);
            }
        }
    }

    out.push_str("</json:");
    out.push_str(tag);
    out.push('>');
}

fn escape(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            // Not representable in XML 1.0, even as a character reference.
            c if !is_xml_char(c) => escaped.push(char::REPLACEMENT_CHARACTER),
            other => escaped.push(other),
        }
    }
    escaped
}

fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..)
}
