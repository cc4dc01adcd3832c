// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Lenient key/value file parsing.
//!
//! Credential and tool configuration files on a developer machine (AWS
//! credentials, AWS config, and friends) are loosely INI shaped. We only ever
//! need to answer "does this key hold that value", so instead of a full INI
//! parser we use a deliberately forgiving line grammar.
//!
//! # Grammar
//!
//! Input is processed one line at a time after trimming surrounding
//! whitespace:
//!
//! 1. Empty lines, and lines starting with `#` or `;`, are comments.
//! 2. `[name]` starts a new section called `name` (trimmed).
//! 3. `key = value` assigns `value` to `key` in the current section. The line
//!    is split on the _first_ `=`, both sides are trimmed, and one level of
//!    matching single or double quotes is removed from the value.
//! 4. Any other line is silently ignored.
//!
//! Keys that appear before the first section header live in the root section,
//! named by the empty string. When a key repeats within a section, the last
//! assignment wins.
//!
//! # Limitations
//!
//! No line continuations, no inline comments, no escapes, and no nesting.
//! A value such as `a = b # note` keeps the `# note` part verbatim.

use std::collections::BTreeMap;

/// Parsed key/value document.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KvDocument {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl KvDocument {
    /// Construct empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `key` inside `section`.
    ///
    /// Use an empty section name for keys defined before any header.
    pub fn get(&self, section: impl AsRef<str>, key: impl AsRef<str>) -> Option<&str> {
        self.sections
            .get(section.as_ref())
            .and_then(|entries| entries.get(key.as_ref()))
            .map(String::as_str)
    }

    /// Check if a section header was seen, or root keys exist for `""`.
    pub fn has_section(&self, section: impl AsRef<str>) -> bool {
        self.sections.contains_key(section.as_ref())
    }

    /// All entries of a section.
    pub fn section(&self, section: impl AsRef<str>) -> Option<&BTreeMap<String, String>> {
        self.sections.get(section.as_ref())
    }
}

impl From<&str> for KvDocument {
    fn from(content: &str) -> Self {
        let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let mut current = String::new();

        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
                current = name.trim().to_string();
                sections.entry(current.clone()).or_default();
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };

            let key = key.trim();
            if key.is_empty() {
                continue;
            }

            sections
                .entry(current.clone())
                .or_default()
                .insert(key.to_string(), unquote(value.trim()).to_string());
        }

        Self { sections }
    }
}

impl From<String> for KvDocument {
    fn from(content: String) -> Self {
        Self::from(content.as_str())
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }

    value
}
