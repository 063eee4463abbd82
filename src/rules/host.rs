//! Host-pattern rules and cookie-host matching.
//!
//! # Responsibilities
//! - Split a host pattern into components with optional wildcards
//! - Compare candidate hosts from the rightmost component inward
//! - Persist cookie-host lists as `[^]pattern hitcount` lines

use std::cmp::Ordering;
use std::io::{BufRead, Write};

use crate::rules::list::{Rule, RuleEntry, RuleList};
use crate::rules::wildcard::WildcardMatcher;
use crate::rules::RuleError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Wildcard(WildcardMatcher),
}

impl Part {
    fn matches(&self, component: &str) -> bool {
        match self {
            Part::Literal(literal) => literal.eq_ignore_ascii_case(component),
            Part::Wildcard(matcher) => matcher.matches(component),
        }
    }
}

/// Strip a leading `.` and any `:port`.
fn normalize_host(host: &str) -> &str {
    let host = host.strip_prefix('.').unwrap_or(host);
    match host.find(':') {
        Some(pos) => &host[..pos],
        None => host,
    }
}

/// Components of a host name. Trailing empty components are dropped.
pub fn split_host(host: &str) -> Vec<&str> {
    let mut parts: Vec<&str> = normalize_host(host).split('.').collect();
    while parts.len() > 1 && parts.last().is_some_and(|p| p.is_empty()) {
        parts.pop();
    }
    parts
}

/// A dot-separated host pattern such as `*.example.com` or `ad?.net`.
///
/// `exact` only matters for outgoing cookie matching: an exact cookie host
/// never matches subdomains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRule {
    source: String,
    parts: Vec<Part>,
    exact: bool,
}

impl HostRule {
    pub fn new(pattern: &str) -> Result<Self, RuleError> {
        Self::with_exact(pattern, false)
    }

    pub fn with_exact(pattern: &str, exact: bool) -> Result<Self, RuleError> {
        let source = normalize_host(pattern.trim());
        if source.is_empty() {
            return Err(RuleError::EmptyPattern);
        }

        let parts = split_host(source)
            .into_iter()
            .map(|part| match WildcardMatcher::new(part) {
                Some(matcher) if part.contains(['*', '?']) => Part::Wildcard(matcher),
                _ => Part::Literal(part.to_string()),
            })
            .collect();

        Ok(Self {
            source: source.to_string(),
            parts,
            exact,
        })
    }

    /// The pattern as given, minus leading dot and port.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_exact(&self) -> bool {
        self.exact
    }

    /// Right-to-left component match.
    ///
    /// `allow_longer` admits hosts with more components than the pattern,
    /// `allow_shorter` hosts with fewer.
    pub fn matches(&self, host_parts: &[&str], allow_longer: bool, allow_shorter: bool) -> bool {
        if host_parts.len() < self.parts.len() && !allow_shorter {
            return false;
        }
        if host_parts.len() > self.parts.len() && !allow_longer {
            return false;
        }

        self.parts
            .iter()
            .rev()
            .zip(host_parts.iter().rev())
            .all(|(part, component)| part.matches(component))
    }

    /// Cookie-domain match. Incoming cookies may name a parent domain of the
    /// pattern; outgoing requests may go to subdomains unless the rule is exact.
    pub fn matches_cookie(&self, host_parts: &[&str], incoming: bool) -> bool {
        if incoming {
            self.matches(host_parts, false, true)
        } else {
            self.matches(host_parts, !self.exact, false)
        }
    }
}

impl Rule for HostRule {
    fn display_cmp(&self, other: &Self) -> Ordering {
        self.source
            .to_ascii_lowercase()
            .cmp(&other.source.to_ascii_lowercase())
    }
}

/// Host rules ordered by hit count.
pub type HostRuleList = RuleList<HostRule>;

impl RuleList<HostRule> {
    /// Add a plain or exact cookie host pattern.
    pub fn add_pattern(&self, pattern: &str, exact: bool) -> Result<u32, RuleError> {
        Ok(self.add(HostRule::with_exact(pattern, exact)?))
    }

    /// First rule matching `host` under explicit length semantics.
    pub fn match_host(
        &self,
        host: &str,
        allow_longer: bool,
        allow_shorter: bool,
    ) -> Option<RuleEntry<HostRule>> {
        if normalize_host(host).is_empty() {
            return None;
        }
        let parts = split_host(host);
        self.find(|rule| rule.matches(&parts, allow_longer, allow_shorter))
    }

    /// First rule matching a cookie domain (incoming) or request host (outgoing).
    pub fn match_cookie(&self, domain: &str, incoming: bool) -> Option<RuleEntry<HostRule>> {
        if normalize_host(domain).is_empty() {
            return None;
        }
        let parts = split_host(domain);
        self.find(|rule| rule.matches_cookie(&parts, incoming))
    }

    /// Replace the list with `[^]pattern hitcount` lines.
    pub fn read_from<R: BufRead>(&self, reader: R) -> Result<(), RuleError> {
        let mut loaded = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split(' ').collect();
            let [pattern, hits] = fields[..] else {
                tracing::warn!(line = %line, "Skipping malformed host rule line");
                continue;
            };
            let hits: u32 = hits.parse().map_err(|_| RuleError::Parse {
                line: index + 1,
                message: format!("invalid hit count {hits:?}"),
            })?;

            let rule = match pattern.strip_prefix('^') {
                Some(pattern) => HostRule::with_exact(pattern, true),
                None => HostRule::with_exact(pattern, false),
            };
            match rule {
                Ok(rule) => loaded.push((rule, hits)),
                Err(e) => tracing::warn!(line = %line, error = %e, "Skipping invalid host rule"),
            }
        }
        self.reload(loaded);
        Ok(())
    }

    /// Write one `[^]pattern hitcount` line per rule, in working order.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), RuleError> {
        for entry in self.snapshot() {
            let rule = entry.rule();
            let marker = if rule.is_exact() { "^" } else { "" };
            writeln!(writer, "{marker}{} {}", rule.source(), entry.hits())?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str) -> HostRule {
        HostRule::new(pattern).unwrap()
    }

    #[test]
    fn wildcard_subdomains() {
        let r = rule("*.example.com");
        assert!(r.matches(&split_host("a.example.com"), true, false));
        assert!(r.matches(&split_host("a.b.example.com"), true, false));
        assert!(!r.matches(&split_host("example.com"), true, false));
        assert!(r.matches(&split_host("example.com"), true, true));
        assert!(!r.matches(&split_host("a.example.org"), true, true));
    }

    #[test]
    fn longer_hosts_need_permission() {
        let r = rule("example.com");
        assert!(r.matches(&split_host("example.com"), false, false));
        assert!(!r.matches(&split_host("www.example.com"), false, false));
        assert!(r.matches(&split_host("www.example.com"), true, false));
    }

    #[test]
    fn question_mark_component() {
        let r = rule("ad?.net");
        assert!(r.matches(&split_host("ads.net"), false, false));
        assert!(!r.matches(&split_host("ad.net"), false, false));
        assert!(!r.matches(&split_host("adss.net"), false, false));
    }

    #[test]
    fn pattern_normalization() {
        let r = rule(".Example.COM:8080");
        assert_eq!(r.source(), "Example.COM");
        assert!(r.matches(&split_host("www.example.com:80"), true, false));
        assert!(matches!(HostRule::new("."), Err(RuleError::EmptyPattern)));
    }

    #[test]
    fn cookie_direction_semantics() {
        let plain = HostRule::with_exact("example.com", false).unwrap();
        let exact = HostRule::with_exact("example.com", true).unwrap();
        let sub = split_host("www.example.com");
        let parent = split_host("example.com");

        assert!(plain.matches_cookie(&sub, false));
        assert!(!exact.matches_cookie(&sub, false));
        assert!(exact.matches_cookie(&parent, false));

        let deep = HostRule::new("www.example.com").unwrap();
        assert!(deep.matches_cookie(&parent, true));
        assert!(!plain.matches_cookie(&sub, true));
    }

    #[test]
    fn list_matching_counts_hits() {
        let list = HostRuleList::new();
        let id = list.add_pattern("example.com", false).unwrap();
        let hit = list.match_cookie(".www.example.com", false).unwrap();
        assert_eq!(hit.id(), id);
        assert_eq!(hit.hits(), 1);
        assert!(list.match_cookie("other.org", false).is_none());
        assert!(list.match_cookie("", true).is_none());
    }

    #[test]
    fn persistence_format() {
        let list = HostRuleList::new();
        list.read_from("^exact.org 3\n\nsite.net 7\nbroken line here\n".as_bytes())
            .unwrap();
        assert_eq!(list.len(), 2);

        let mut out = Vec::new();
        list.write_to(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "site.net 7\n^exact.org 3\n");

        let err = list.read_from("site.net many\n".as_bytes()).unwrap_err();
        assert!(matches!(err, RuleError::Parse { line: 1, .. }));
    }
}
