//! `*` / `?` wildcard matching for single host components.

/// A non-empty wildcard pattern. `*` matches any run, `?` one character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildcardMatcher {
    pattern: Vec<char>,
}

impl WildcardMatcher {
    /// Returns `None` for an empty pattern.
    pub fn new(pattern: &str) -> Option<Self> {
        if pattern.is_empty() {
            return None;
        }
        Some(Self {
            pattern: pattern.chars().collect(),
        })
    }

    /// ASCII case-insensitive match of the whole `text`.
    pub fn matches(&self, text: &str) -> bool {
        let text: Vec<char> = text.chars().collect();
        if text.is_empty() && self.pattern == ['*'] {
            return true;
        }
        self.match_from(0, &text, 0)
    }

    fn match_from(&self, p: usize, text: &[char], t: usize) -> bool {
        let pattern = &self.pattern;
        if p == pattern.len() {
            return t == text.len();
        }
        if t == text.len() {
            return p == pattern.len() - 1 && pattern[p] == '*';
        }

        match pattern[p] {
            '*' => {
                let p = p + 1;
                if p == pattern.len() {
                    return true;
                }
                // the rest of the pattern consumes at least this many characters
                let min_len = pattern[p..].iter().filter(|&&c| c != '*').count();
                let remaining = text.len() - t;
                if remaining < min_len {
                    return false;
                }
                (0..=remaining - min_len).any(|skip| self.match_from(p, text, t + skip))
            }
            '?' => self.match_from(p + 1, text, t + 1),
            c if c.eq_ignore_ascii_case(&text[t]) => self.match_from(p + 1, text, t + 1),
            _ => false,
        }
    }
}
