use regex::Regex;
use std::collections::HashMap;

/// Parameter name given to a catch-all capture.
pub const CATCH_ALL: &str = "*";

/// Values captured from a matched path, URL-decoded.
///
/// `values` keeps declaration order; `named` maps parameter names to values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteMatch {
    pub values: Vec<String>,
    pub named: HashMap<String, String>,
}

impl RouteMatch {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }

    pub fn at(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A compiled path template.
#[derive(Debug, Clone)]
pub struct PathPattern {
    regex: Regex,
    names: Vec<String>,
}

impl PathPattern {
    /// Compile a route template into an anchored pattern.
    ///
    /// - `{name}` and a segment-leading `:name` capture one path segment.
    /// - `/.*` on its own captures the whole remaining path (catch-all).
    /// - A trailing `(.*)` or `.*` captures the rest of the path.
    /// - Everything else matches literally.
    pub fn compile(template: &str) -> Result<Self, regex::Error> {
        if template == "/.*" || template == "/*" {
            return Ok(Self {
                regex: Regex::new(r"^/(.*)$")?,
                names: vec![CATCH_ALL.to_string()],
            });
        }

        let (body, catch_all) = if let Some(prefix) = template.strip_suffix("(.*)") {
            (prefix, true)
        } else if let Some(prefix) = template.strip_suffix(".*") {
            (prefix, true)
        } else {
            (template, false)
        };

        let mut pattern = String::with_capacity(body.len() + 16);
        let mut names = Vec::new();
        pattern.push('^');

        let mut rest = body;
        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('{') {
                if let Some(end) = after.find('}') {
                    names.push(after[..end].trim().to_string());
                    pattern.push_str("([^/]+)");
                    rest = &after[end + 1..];
                    continue;
                }
            }

            if let Some(after) = rest.strip_prefix(':') {
                if pattern.ends_with('/') {
                    let end = after.find('/').unwrap_or(after.len());
                    if end > 0 {
                        names.push(after[..end].to_string());
                        pattern.push_str("([^/]+)");
                        rest = &after[end..];
                        continue;
                    }
                }
            }

            let Some(c) = rest.chars().next() else {
                break;
            };
            pattern.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4])));
            rest = &rest[c.len_utf8()..];
        }

        if catch_all {
            pattern.push_str("(.*)");
            names.push(CATCH_ALL.to_string());
        }
        pattern.push('$');

        Ok(Self {
            regex: Regex::new(&pattern)?,
            names,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Match a request path; captures are URL-decoded.
    pub fn matches(&self, path: &str) -> Option<RouteMatch> {
        let caps = self.regex.captures(path)?;
        let mut matched = RouteMatch::default();

        for (i, name) in self.names.iter().enumerate() {
            let raw = caps.get(i + 1).map(|m| m.as_str()).unwrap_or_default();
            let value = urlencoding::decode(raw)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| raw.to_string());
            matched.named.insert(name.clone(), value.clone());
            matched.values.push(value);
        }

        Some(matched)
    }
}
