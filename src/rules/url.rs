//! URL rules: optional host regex plus optional path regex.
//!
//! # Responsibilities
//! - Compile host (case-insensitive) and path (case-sensitive) patterns
//! - Match by regex search, ignoring an explicit `:80`
//! - Persist lists as `host[;path] hitcount[ comment]` lines

use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;
use std::io::{BufRead, Write};

use crate::rules::list::{Rule, RuleEntry, RuleList};
use crate::rules::RuleError;

/// A block, exception or image rule.
#[derive(Debug, Clone)]
pub struct UrlRule {
    host: Option<Regex>,
    path: Option<Regex>,
    comment: Option<String>,
}

impl UrlRule {
    /// At least one of `host` and `path` is required.
    pub fn new(
        host: Option<&str>,
        path: Option<&str>,
        comment: Option<&str>,
    ) -> Result<Self, RuleError> {
        if host.is_none() && path.is_none() {
            return Err(RuleError::MissingPatterns);
        }

        let host = host
            .map(|pattern| {
                RegexBuilder::new(&pattern.replacen(":80", "", 1))
                    .case_insensitive(true)
                    .build()
            })
            .transpose()?;
        let path = path.map(Regex::new).transpose()?;

        Ok(Self {
            host,
            path,
            comment: comment.map(str::to_string),
        })
    }

    /// Host pattern as compiled (an explicit `:80` already removed).
    pub fn host_pattern(&self) -> Option<&str> {
        self.host.as_ref().map(Regex::as_str)
    }

    pub fn path_pattern(&self) -> Option<&str> {
        self.path.as_ref().map(Regex::as_str)
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// The path pattern is only consulted when a path is known.
    pub fn matches(&self, host: &str, path: Option<&str>) -> bool {
        if let Some(regex) = &self.host {
            let host = host.strip_suffix(":80").unwrap_or(host);
            if !regex.is_match(host) {
                return false;
            }
        }
        match (&self.path, path) {
            (Some(regex), Some(path)) => regex.is_match(path),
            _ => true,
        }
    }
}

/// Pattern without its `^`/`$` anchors, lower-cased, for display sorting.
fn display_key(pattern: Option<&str>) -> Option<String> {
    pattern.map(|p| {
        let p = p.strip_prefix('^').unwrap_or(p);
        let p = p.strip_suffix('$').unwrap_or(p);
        p.to_lowercase()
    })
}

impl Rule for UrlRule {
    fn display_cmp(&self, other: &Self) -> Ordering {
        let by_host = match (
            display_key(self.host_pattern()),
            display_key(other.host_pattern()),
        ) {
            (Some(a), Some(b)) => a.cmp(&b),
            (None, None) => Ordering::Equal,
            (None, Some(_)) => return Ordering::Greater,
            (Some(_), None) => return Ordering::Less,
        };
        if by_host != Ordering::Equal {
            return by_host;
        }

        match (
            display_key(self.path_pattern()),
            display_key(other.path_pattern()),
        ) {
            (Some(a), Some(b)) => a.cmp(&b),
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
        }
    }
}

/// URL rules ordered by hit count.
pub type UrlRuleList = RuleList<UrlRule>;

impl RuleList<UrlRule> {
    pub fn add_patterns(
        &self,
        host: Option<&str>,
        path: Option<&str>,
        comment: Option<&str>,
    ) -> Result<u32, RuleError> {
        Ok(self.add(UrlRule::new(host, path, comment)?))
    }

    /// First rule matching the host and, if given, the decoded path.
    pub fn match_url(&self, host: &str, path: Option<&str>) -> Option<RuleEntry<UrlRule>> {
        self.find(|rule| rule.matches(host, path))
    }

    /// Replace the list with `host[;path] hitcount[ comment]` lines.
    pub fn read_from<R: BufRead>(&self, reader: R) -> Result<(), RuleError> {
        let mut loaded = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let Some((spec, rest)) = line.split_once(' ') else {
                tracing::warn!(line = %line, "Skipping URL rule line without hit count");
                continue;
            };
            let (host, path) = match spec.split_once(';') {
                None => (Some(spec), None),
                Some(("", path)) => (None, Some(path)),
                Some((host, path)) => (Some(host), Some(path)),
            };
            let host = host.map(|h| h.replace("%20", " "));
            let path = path.map(|p| p.replace("%20", " "));

            let (hits, comment) = match rest.split_once(' ') {
                Some((hits, comment)) => (hits, Some(comment)),
                None => (rest, None),
            };
            let hits: u32 = hits.parse().map_err(|_| RuleError::Parse {
                line: index + 1,
                message: format!("invalid hit count {hits:?}"),
            })?;

            match UrlRule::new(host.as_deref(), path.as_deref(), comment) {
                Ok(rule) => loaded.push((rule, hits)),
                Err(e) => tracing::warn!(line = %line, error = %e, "Skipping invalid URL rule"),
            }
        }
        self.reload(loaded);
        Ok(())
    }

    /// Write one line per rule, in working order.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), RuleError> {
        for entry in self.snapshot() {
            let rule = entry.rule();
            let mut line = String::new();
            if let Some(host) = rule.host_pattern() {
                line.push_str(&host.replace(' ', "%20"));
            }
            if let Some(path) = rule.path_pattern() {
                line.push(';');
                line.push_str(&path.replace(' ', "%20"));
            }
            line.push(' ');
            line.push_str(&entry.hits().to_string());
            if let Some(comment) = rule.comment() {
                line.push(' ');
                line.push_str(comment);
            }
            writeln!(writer, "{line}")?;
        }
        writer.flush()?;
        Ok(())
    }
}
