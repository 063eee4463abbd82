//! Per-user policy state and header rewriting.
//!
//! # Responsibilities
//! - Hold one user's policy levels, rule lists and cookie jars
//! - Rewrite outgoing request headers (cookies, referer, from, user agent)
//! - Filter incoming `Set-Cookie` lines against the cookie host lists
//!
//! # Design Decisions
//! - Profiles are built explicitly and shared through `Arc`
//! - Cookie decisions log under their own target so they can be enabled alone

use std::path::Path;

use crate::config::{CookieLevel, FakeLevel, PolicyConfig, RefererLevel};
use crate::http::headers::cookie_value;
use crate::http::{Message, Request, Response};
use crate::policy::block::{check_blocked, BlockAction};
use crate::policy::jar::CookieJar;
use crate::rules::{RuleError, RuleSet};

const COOKIE_LOG: &str = "forward_proxy::cookies";

/// Settings and rule state of one proxy user.
#[derive(Debug)]
pub struct UserProfile {
    name: String,
    policy: PolicyConfig,
    rules: RuleSet,
    in_jar: CookieJar,
    out_jar: CookieJar,
}

impl UserProfile {
    pub fn new(name: impl Into<String>, policy: PolicyConfig, rules: RuleSet) -> Self {
        Self {
            name: name.into(),
            policy,
            rules,
            in_jar: CookieJar::new(),
            out_jar: CookieJar::new(),
        }
    }

    /// Profile whose rules come from `dir`, if one is given.
    pub fn load(
        name: impl Into<String>,
        policy: PolicyConfig,
        dir: Option<&Path>,
    ) -> Result<Self, RuleError> {
        let rules = match dir {
            Some(dir) => RuleSet::load_dir(dir)?,
            None => RuleSet::new(),
        };
        Ok(Self::new(name, policy, rules))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Hosts whose incoming cookies were eaten.
    pub fn in_jar(&self) -> &CookieJar {
        &self.in_jar
    }

    /// Hosts whose outgoing cookies were eaten.
    pub fn out_jar(&self) -> &CookieJar {
        &self.out_jar
    }

    pub fn check_blocked(&self, host: &str, path: Option<&str>) -> Option<BlockAction> {
        check_blocked(&self.rules, host, path)
    }

    /// Session cookie hosts are consulted before plain cookie hosts.
    fn cookie_allowed(&self, domain: &str, incoming: bool) -> Option<bool> {
        let session = self.rules.session_cookies.match_cookie(domain, incoming).is_some();
        if session {
            return Some(true);
        }
        self.rules
            .cookie_hosts
            .match_cookie(domain, incoming)
            .map(|_| false)
    }

    fn host_excepted(&self, host: &str) -> bool {
        self.rules.cookie_exceptions.match_cookie(host, false).is_some()
    }

    /// Apply the cookie, referer, from and user-agent levels to a request.
    pub fn apply_request(&self, request: &mut Request) {
        let host = request.headers().get("Host").unwrap_or_default().to_string();
        let headers = request.headers_mut();

        if !headers.cookies().is_empty() {
            match self.policy.cookies {
                CookieLevel::Pass => {}
                CookieLevel::Check => {
                    let allowed = self.cookie_allowed(&host, false).is_some();
                    if allowed && !self.host_excepted(&host) {
                        tracing::trace!(
                            target: COOKIE_LOG,
                            host = %host,
                            cookies = ?headers.cookies(),
                            "Passing outgoing cookies"
                        );
                    } else {
                        tracing::debug!(
                            target: COOKIE_LOG,
                            host = %host,
                            cookies = ?headers.cookies(),
                            "Eating outgoing cookies"
                        );
                        self.out_jar.record(&host);
                        headers.cookies_mut().clear();
                    }
                }
                CookieLevel::Eat => headers.cookies_mut().clear(),
            }
        }

        if headers.contains("Referer") {
            match self.policy.referer {
                RefererLevel::Pass => {}
                RefererLevel::Trim => headers.insert("Referer", format!("http://{host}/")),
                RefererLevel::Eat => {
                    headers.remove("Referer");
                }
            }
        }

        rewrite(headers, "From", self.policy.from, &self.policy.from_value);
        rewrite(headers, "User-Agent", self.policy.agent, &self.policy.agent_value);
    }

    /// Filter `Set-Cookie` lines of a response to a request for `host`.
    pub fn apply_response(&self, host: &str, response: &mut Response) {
        let cookies = response.headers_mut().cookies_mut();
        if cookies.is_empty() {
            return;
        }

        match self.policy.cookies {
            CookieLevel::Pass => {}
            CookieLevel::Eat => cookies.clear(),
            CookieLevel::Check => {
                let mut kept = Vec::with_capacity(cookies.len());
                let mut session = Vec::new();

                for line in cookies.drain(..) {
                    let fields = cookie_fields(cookie_value(&line), host);
                    let domain = fields
                        .iter()
                        .skip(1)
                        .find_map(|f| f.strip_prefix("domain="))
                        .unwrap_or(host)
                        .to_string();

                    match self.cookie_allowed(&domain, true) {
                        Some(is_session) if !self.host_excepted(host) => {
                            tracing::trace!(
                                target: COOKIE_LOG,
                                host = %host,
                                cookie = %line,
                                "Passing incoming cookie"
                            );
                            if is_session {
                                session.push(session_cookie(&fields));
                            } else {
                                kept.push(line);
                            }
                        }
                        _ => {
                            tracing::debug!(
                                target: COOKIE_LOG,
                                host = %host,
                                cookie = %line,
                                "Eating incoming cookie"
                            );
                            self.in_jar.record(host);
                        }
                    }
                }

                kept.extend(session);
                *cookies = kept;
            }
        }
    }
}

fn rewrite(headers: &mut crate::http::Headers, name: &str, level: FakeLevel, fake: &str) {
    if !headers.contains(name) {
        return;
    }
    match level {
        FakeLevel::Pass => {}
        FakeLevel::Fake => headers.insert(name, fake),
        FakeLevel::Eat => {
            headers.remove(name);
        }
    }
}

/// Split a cookie value on `;`, lower-casing attribute names.
fn cookie_fields(value: &str, host: &str) -> Vec<String> {
    let mut raw: Vec<&str> = value.split(';').map(|f| f.trim_matches([' ', '\t'])).collect();
    while raw.len() > 1 && raw.last().is_some_and(|f| f.is_empty()) {
        raw.pop();
    }

    let mut fields = Vec::with_capacity(raw.len());
    for (i, field) in raw.into_iter().enumerate() {
        if i == 0 {
            fields.push(field.to_string());
            continue;
        }
        match field.split_once('=') {
            Some((name, value)) => fields.push(format!("{}={}", name.to_lowercase(), value)),
            None => {
                tracing::warn!(
                    target: COOKIE_LOG,
                    host = %host,
                    field = %field,
                    "Invalid cookie field"
                );
                fields.push(field.to_string());
            }
        }
    }
    fields
}

/// The cookie without its expiry, which turns it into a session cookie.
fn session_cookie(fields: &[String]) -> String {
    let mut line = format!("Set-Cookie: {}", fields.first().map_or("", String::as_str));
    for field in fields.iter().skip(1) {
        if !field.starts_with("expires=") {
            line.push_str("; ");
            line.push_str(field);
        }
    }
    line
}
