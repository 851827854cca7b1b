//! Path handling shared by the safe object operations, the change detector and
//! the environment resolver.
//!
//! Two notations live here:
//! - access paths (`server.port`, or an explicit list of keys) used to read and
//!   write nested values;
//! - change paths (`server.port`, `headers["x-trace"]`, `hosts[2]`) rendered on
//!   every [`ChangeRecord`](crate::diff::ChangeRecord).

use std::fmt;

/// An ordered list of keys addressing a nested value.
///
/// An empty string addresses the root. A dotted string is split on `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ConfigPath {
    segments: Vec<String>,
}

impl ConfigPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for ConfigPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl From<&str> for ConfigPath {
    fn from(path: &str) -> Self {
        if path.is_empty() {
            return Self::root();
        }
        Self {
            segments: path.split('.').map(str::to_string).collect(),
        }
    }
}

impl From<&String> for ConfigPath {
    fn from(path: &String) -> Self {
        Self::from(path.as_str())
    }
}

impl From<String> for ConfigPath {
    fn from(path: String) -> Self {
        Self::from(path.as_str())
    }
}

impl From<Vec<String>> for ConfigPath {
    fn from(segments: Vec<String>) -> Self {
        Self { segments }
    }
}

impl From<&[&str]> for ConfigPath {
    fn from(segments: &[&str]) -> Self {
        Self {
            segments: segments.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl<const N: usize> From<[&str; N]> for ConfigPath {
    fn from(segments: [&str; N]) -> Self {
        Self {
            segments: segments.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl From<&ConfigPath> for ConfigPath {
    fn from(path: &ConfigPath) -> Self {
        path.clone()
    }
}

/// One step of a rendered change path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Keys that render with dot notation: `[A-Za-z_$][A-Za-z0-9_$]*`.
pub fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Appends a mapping key to a rendered change path.
pub fn join_key(parent: &str, key: &str) -> String {
    if is_identifier(key) {
        if parent.is_empty() {
            key.to_string()
        } else {
            format!("{parent}.{key}")
        }
    } else {
        // serde_json quoting gives us escaping of `"` and `\` for free
        let quoted = serde_json::to_string(key).unwrap_or_else(|_| format!("\"{key}\""));
        format!("{parent}[{quoted}]")
    }
}

/// Appends an array index to a rendered change path.
pub fn join_index(parent: &str, index: usize) -> String {
    format!("{parent}[{index}]")
}

/// Parses a rendered change path back into segments.
///
/// Returns `None` for malformed input.
pub fn parse_change_path(path: &str) -> Option<Vec<PathSegment>> {
    let mut segments = Vec::new();
    let chars: Vec<char> = path.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '.' => {
                if segments.is_empty() {
                    return None;
                }
                i += 1;
                let start = i;
                while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                    i += 1;
                }
                if start == i {
                    return None;
                }
                segments.push(PathSegment::Key(chars[start..i].iter().collect()));
            }
            '[' => {
                i += 1;
                if i < chars.len() && chars[i] == '"' {
                    // quoted key; find the closing quote honouring escapes
                    let start = i;
                    i += 1;
                    while i < chars.len() && chars[i] != '"' {
                        if chars[i] == '\\' {
                            i += 1;
                        }
                        i += 1;
                    }
                    if i >= chars.len() {
                        return None;
                    }
                    let literal: String = chars[start..=i].iter().collect();
                    let key: String = serde_json::from_str(&literal).ok()?;
                    i += 1;
                    if i >= chars.len() || chars[i] != ']' {
                        return None;
                    }
                    i += 1;
                    segments.push(PathSegment::Key(key));
                } else {
                    let start = i;
                    while i < chars.len() && chars[i] != ']' {
                        i += 1;
                    }
                    if i >= chars.len() {
                        return None;
                    }
                    let digits: String = chars[start..i].iter().collect();
                    let index = digits.parse::<usize>().ok()?;
                    i += 1;
                    segments.push(PathSegment::Index(index));
                }
            }
            _ => {
                if !segments.is_empty() {
                    return None;
                }
                let start = i;
                while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                    i += 1;
                }
                segments.push(PathSegment::Key(chars[start..i].iter().collect()));
            }
        }
    }

    Some(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_from_str() {
        let path = ConfigPath::from("server.http.port");
        assert_eq!(path.segments(), &["server", "http", "port"]);
        assert!(ConfigPath::from("").is_root());
        assert_eq!(ConfigPath::from(["a", "b.c"]).segments(), &["a", "b.c"]);
    }

    #[test]
    fn test_join_renders_all_notations() {
        let path = join_key("", "server");
        let path = join_key(&path, "x-trace");
        let path = join_index(&path, 3);
        let path = join_key(&path, "name");
        assert_eq!(path, r#"server["x-trace"][3].name"#);
        assert_eq!(join_key("", "1abc"), r#"["1abc"]"#);
    }

    #[test]
    fn test_parse_change_path_inverts_rendering() {
        let rendered = r#"a["we\"ird.key"][0].b"#;
        let parsed = parse_change_path(rendered).unwrap();
        assert_eq!(
            parsed,
            vec![
                PathSegment::Key("a".into()),
                PathSegment::Key("we\"ird.key".into()),
                PathSegment::Index(0),
                PathSegment::Key("b".into()),
            ]
        );
        assert_eq!(parse_change_path("").unwrap(), vec![]);
        assert!(parse_change_path("a[").is_none());
        assert!(parse_change_path(".a").is_none());
    }
}
