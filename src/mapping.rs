//! Path mapping engine.
//!
//! Rewrites a file path reported by the media server into a path the local
//! player can open. Rules are evaluated in order and the first match wins.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// How a mapping rule's pattern is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingKind {
  /// `*` matches one path segment, `**` matches across separators.
  Wildcard,
  /// Full regular expression with `$1` style backreferences.
  Regex,
  /// Literal string prefix. Unknown type names fall back to this.
  #[default]
  #[serde(other)]
  Prefix,
}

impl MappingKind {
  /// Parse a form or config name; anything unrecognised is a prefix rule.
  pub fn from_name(name: &str) -> Self {
    match name.trim().to_ascii_lowercase().as_str() {
      "wildcard" => MappingKind::Wildcard,
      "regex" => MappingKind::Regex,
      _ => MappingKind::Prefix,
    }
  }
}

/// A single pattern/replacement rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapping {
  #[serde(rename = "type", default)]
  pub kind: MappingKind,
  #[serde(rename = "match", default)]
  pub pattern: String,
  #[serde(rename = "replace", default)]
  pub replacement: String,
}

impl PathMapping {
  pub fn new(
    kind: MappingKind,
    pattern: impl Into<String>,
    replacement: impl Into<String>,
  ) -> Self {
    Self {
      kind,
      pattern: pattern.into(),
      replacement: replacement.into(),
    }
  }

  /// Apply this rule to `path`. Returns `None` when the rule does not match.
  pub fn apply(&self, path: &str) -> Option<String> {
    match self.kind {
      MappingKind::Prefix => path
        .strip_prefix(self.pattern.as_str())
        .map(|rest| format!("{}{}", self.replacement, rest)),
      MappingKind::Wildcard => self.apply_wildcard(path),
      MappingKind::Regex => self.apply_regex(path),
    }
  }

  fn apply_wildcard(&self, path: &str) -> Option<String> {
    let re = match wildcard_to_regex(&self.pattern) {
      Ok(re) => re,
      Err(e) => {
        log::warn!("Invalid wildcard pattern {:?}: {}", self.pattern, e);
        return None;
      }
    };

    let caps = re.captures(path)?;
    // The last group is always the remainder capture appended by the compiler.
    let last = caps.len() - 1;
    let remainder = caps.get(last).map(|m| m.as_str()).unwrap_or("");

    let mut result = self.replacement.clone();
    for i in 1..last {
      let value = caps.get(i).map(|m| m.as_str()).unwrap_or("");
      result = result.replace(&format!("{{{}}}", i), value);
    }

    let joined = result.ends_with(is_separator) || remainder.starts_with(is_separator);
    if !remainder.is_empty() && !joined {
      result.push('/');
    }
    result.push_str(remainder);
    Some(result)
  }

  fn apply_regex(&self, path: &str) -> Option<String> {
    let re = match Regex::new(&self.pattern) {
      Ok(re) => re,
      Err(e) => {
        log::warn!("Invalid regex pattern {:?}: {}", self.pattern, e);
        return None;
      }
    };

    if !re.is_match(path) {
      return None;
    }
    Some(re.replace_all(path, self.replacement.as_str()).into_owned())
  }
}

fn is_separator(c: char) -> bool {
  c == '/' || c == '\\'
}

/// Compile a wildcard pattern into an anchored regex.
///
/// `**` becomes a lazy `(.*?)`, `*` becomes `([^/]*)`, and a trailing `(.*)$`
/// captures whatever follows the declared pattern.
pub fn wildcard_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
  let mut out = String::with_capacity(pattern.len() + 16);
  out.push('^');

  let mut chars = pattern.chars().peekable();
  while let Some(c) = chars.next() {
    if c == '*' {
      if chars.peek() == Some(&'*') {
        chars.next();
        out.push_str("(.*?)");
      } else {
        out.push_str("([^/]*)");
      }
    } else {
      let mut buf = [0u8; 4];
      out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
    }
  }

  out.push_str("(.*)$");
  Regex::new(&out)
}

/// Translate `path` using the first matching rule, then convert every `/` to `\`.
pub fn translate(path: &str, rules: &[PathMapping]) -> String {
  let mapped = rules
    .iter()
    .find_map(|rule| rule.apply(path))
    .unwrap_or_else(|| path.to_string());

  let translated = mapped.replace('/', "\\");
  warn_on_unc_colon(&translated);
  translated
}

/// SMB shares reject `:` past the share component.
fn warn_on_unc_colon(translated: &str) {
  if let Some(unc) = translated.strip_prefix("\\\\") {
    let parts: Vec<&str> = unc.splitn(3, '\\').collect();
    if parts.len() == 3 && parts[2].contains(':') {
      log::warn!("Colon in SMB path may cause issues: {}", translated);
    }
  }
}
