//! Non-validating URI decomposition.
//!
//! # Responsibilities
//! - Split `scheme://user@host:port/path?query#fragment` into its parts
//! - Percent-decode path, query and fragment
//! - Keep the raw path+query+fragment for abs_path forwarding
//!
//! # Design Decisions
//! - One RFC 2396 appendix B regular expression does the split: every part
//!   is optional and nothing is checked against a strict grammar, so odd
//!   browser input parses
//! - `+` decodes to a space, as browsers form-encode query strings

use std::sync::OnceLock;

use percent_encoding::percent_decode_str;
use regex::Regex;

use crate::error::UriFormatError;

/// RFC 2396 appendix B: scheme, authority, path, query, fragment.
const URI_PATTERN: &str = r"^(([^:/?#]+):)?(//([^/?#]*))?([^?#]*)(\?([^#]*))?(#(.*))?";

fn uri_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(URI_PATTERN).expect("URI pattern compiles"))
}

/// One decomposed URI. Immutable once parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Uri {
    source: String,
    path_source: String,
    scheme: Option<String>,
    user: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    path: Option<String>,
    query: Option<String>,
    fragment: Option<String>,
}

impl Uri {
    /// Split `raw` into its components.
    pub fn parse(raw: &str) -> Result<Self, UriFormatError> {
        let mut uri = Uri {
            source: raw.to_string(),
            ..Default::default()
        };

        // The pattern has no mandatory part, so it matches every input.
        let Some(caps) = uri_pattern().captures(raw) else {
            return Err(UriFormatError::new(raw, "unparsable URI"));
        };

        uri.scheme = caps.get(2).map(|m| m.as_str().to_ascii_lowercase());
        if let Some(authority) = caps.get(4) {
            uri.split_authority(authority.as_str(), raw)?;
        }

        let raw_path = caps.get(5).map_or("", |m| m.as_str());
        if let Some(path) = caps.get(5) {
            uri.path_source = raw[path.start()..].to_string();
        }

        if !raw_path.is_empty() {
            uri.path = Some(decode(raw_path, raw)?);
        }
        uri.query = caps.get(7).map(|q| decode(q.as_str(), raw)).transpose()?;
        uri.fragment = caps.get(9).map(|f| decode(f.as_str(), raw)).transpose()?;

        Ok(uri)
    }

    fn split_authority(&mut self, authority: &str, raw: &str) -> Result<(), UriFormatError> {
        let host_part = match authority.find('@') {
            Some(pos) => {
                self.user = Some(authority[..pos].to_string());
                &authority[pos + 1..]
            }
            None => authority,
        };

        // an IPv6 literal keeps its colons; the port follows the `]`
        let port_at = match host_part.strip_prefix('[') {
            Some(inner) => inner.find(']').and_then(|end| {
                let after = end + 2;
                host_part[after..].starts_with(':').then_some(after)
            }),
            None => host_part.find(':'),
        };
        let host = match port_at {
            Some(pos) => {
                let port = &host_part[pos + 1..];
                self.port = Some(port.parse().map_err(|_| {
                    UriFormatError::new(raw, format!("invalid host port: {port}"))
                })?);
                &host_part[..pos]
            }
            None => host_part,
        };

        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if !host.is_empty() {
            self.host = Some(host.to_ascii_lowercase());
        }
        Ok(())
    }

    /// The string this URI was parsed from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Raw path, query and fragment, exactly as received.
    pub fn path_source(&self) -> &str {
        &self.path_source
    }

    /// Request target for a server that already knows the authority.
    pub fn abs_path(&self) -> &str {
        if self.path_source.is_empty() {
            "/"
        } else {
            &self.path_source
        }
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// Decoded path with `?query` and `#fragment` re-attached, if there is a path.
    pub fn full_path(&self) -> Option<String> {
        let mut full = self.path.clone()?;
        if let Some(query) = &self.query {
            full.push('?');
            full.push_str(query);
        }
        if let Some(fragment) = &self.fragment {
            full.push('#');
            full.push_str(fragment);
        }
        Some(full)
    }
}

/// Form-style percent decoding. Bad escapes fail; invalid UTF-8 is replaced.
fn decode(part: &str, raw: &str) -> Result<String, UriFormatError> {
    let bytes = part.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let escape = bytes.get(i + 1..i + 3);
            match escape {
                Some([a, b]) if a.is_ascii_hexdigit() && b.is_ascii_hexdigit() => i += 3,
                Some(_) => {
                    return Err(UriFormatError::new(raw, "illegal hex characters in escape pattern"))
                }
                None => {
                    return Err(UriFormatError::new(raw, "incomplete trailing escape pattern"))
                }
            }
        } else {
            i += 1;
        }
    }

    let plus_decoded = part.replace('+', " ");
    Ok(percent_decode_str(&plus_decoded).decode_utf8_lossy().into_owned())
}
