//! Block rule decisions and the pages that announce them.

use url::form_urlencoded;

use crate::http::{Message, Response};
use crate::rules::RuleSet;

/// Outcome of a block rule hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockAction {
    /// An image rule also matched: answer with the blank image.
    Redirect,
    /// Answer 403 with a link to the rule editor.
    Forbidden { rule_id: u32 },
}

impl BlockAction {
    pub fn label(&self) -> &'static str {
        match self {
            BlockAction::Redirect => "redirect",
            BlockAction::Forbidden { .. } => "forbidden",
        }
    }
}

/// Block rules first, exceptions cancel, image rules pick the redirect.
pub fn check_blocked(rules: &RuleSet, host: &str, path: Option<&str>) -> Option<BlockAction> {
    let rule = rules.block_rules.match_url(host, path)?;
    if rules.block_exceptions.match_url(host, path).is_some() {
        return None;
    }
    if rules.image_rules.match_url(host, path).is_some() {
        return Some(BlockAction::Redirect);
    }
    Some(BlockAction::Forbidden { rule_id: rule.id() })
}

/// `307` pointing at the local blank image.
pub fn redirect_response(local_url: &str) -> Response {
    let mut response = Response::new(307, "Temporary Redirect");
    let headers = response.headers_mut();
    headers.insert("Location", format!("{local_url}/res/blank.gif"));
    headers.insert("Content-Length", "0");
    response
}

/// `403` head and HTML body linking to the rule that fired.
pub fn forbidden_response(local_url: &str, rule_id: u32, blocked_url: &str) -> (Response, Vec<u8>) {
    // `&` and `?` would otherwise confuse the editor's own query parsing
    let hidden = blocked_url.replace('&', " amp; ").replace('?', " quest; ");
    let encoded: String = form_urlencoded::byte_serialize(hidden.as_bytes()).collect();

    let body = format!(
        "<html><body><a href=\"{local_url}/rule?id={rule_id}&url={encoded}\"><font size=\"-1\">Blocked</font></a></body></html>"
    )
    .into_bytes();

    let mut response = Response::new(403, "Forbidden");
    let headers = response.headers_mut();
    headers.insert("Content-Type", "text/html");
    headers.insert("Content-Length", body.len().to_string());
    (response, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> RuleSet {
        let rules = RuleSet::new();
        rules.block_rules.add_patterns(Some("ads"), None, None).unwrap();
        rules
            .block_exceptions
            .add_patterns(Some("ads"), Some("^/allowed"), None)
            .unwrap();
        rules.image_rules.add_patterns(None, Some(r"\.gif$"), None).unwrap();
        rules
    }

    #[test]
    fn exceptions_cancel_and_images_redirect() {
        let rules = rules();
        assert_eq!(check_blocked(&rules, "www.example.com", Some("/")), None);
        assert_eq!(check_blocked(&rules, "ads.net", Some("/allowed/x")), None);
        assert_eq!(
            check_blocked(&rules, "ads.net", Some("/b.gif")),
            Some(BlockAction::Redirect)
        );

        let id = rules.block_rules.snapshot()[0].id();
        assert_eq!(
            check_blocked(&rules, "ads.net", Some("/page")),
            Some(BlockAction::Forbidden { rule_id: id })
        );
    }

    #[test]
    fn image_rules_alone_do_not_block() {
        let rules = RuleSet::new();
        rules.image_rules.add_patterns(None, Some(r"\.gif$"), None).unwrap();
        assert_eq!(check_blocked(&rules, "h", Some("/a.gif")), None);
    }

    #[test]
    fn forbidden_page_hides_query_characters() {
        let (response, body) =
            forbidden_response("http://proxy:8080", 7, "http://ads.net/x?a=1&b=2");
        assert_eq!(response.status(), 403);
        let body = String::from_utf8(body).unwrap();
        assert!(body.contains(
            "http://proxy:8080/rule?id=7&url=http%3A%2F%2Fads.net%2Fx+quest%3B+a%3D1+amp%3B+b%3D2"
        ));
        assert_eq!(
            response.headers().get("Content-Length"),
            Some(body.len().to_string().as_str())
        );
    }

    #[test]
    fn redirect_points_at_blank_gif() {
        let response = redirect_response("http://proxy");
        assert_eq!(
            response.headers().get("Location"),
            Some("http://proxy/res/blank.gif")
        );
    }
}
