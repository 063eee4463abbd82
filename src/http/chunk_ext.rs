//! Chunk extension parsing: `name=value[;name=value...]`.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Name,
    NameFinished,
    Value,
    ValueFinished,
}

/// Parsed chunk extensions of one chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkExtensions {
    pairs: HashMap<String, String>,
}

impl ChunkExtensions {
    /// Parse an extension string as found after the `;` of a size line.
    ///
    /// Values may be double-quoted. Blanks around names and values are
    /// skipped. Whatever is pending at the end of the string is stored.
    pub fn parse(ext: &str) -> Self {
        let mut pairs = HashMap::new();
        let mut name = String::new();
        let mut value = String::new();
        let mut state = State::Name;
        let mut quoted = false;

        let mut finish = |name: &mut String, value: &mut String| {
            if name.is_empty() {
                if !value.is_empty() {
                    tracing::debug!(value = %value, "Ignoring chunk extension without name");
                }
            } else {
                pairs.insert(std::mem::take(name), std::mem::take(value));
            }
            name.clear();
            value.clear();
        };

        for c in ext.chars() {
            match state {
                State::Name => match c {
                    '=' => state = State::NameFinished,
                    ';' => finish(&mut name, &mut value),
                    ' ' | '\t' => {}
                    _ => name.push(c),
                },
                State::NameFinished => match c {
                    '=' | ' ' | '\t' => {}
                    '"' => {
                        quoted = true;
                        state = State::Value;
                    }
                    ';' => {
                        finish(&mut name, &mut value);
                        state = State::Name;
                    }
                    _ => {
                        value.push(c);
                        state = State::Value;
                    }
                },
                State::Value if quoted => match c {
                    '"' => state = State::ValueFinished,
                    _ => value.push(c),
                },
                State::Value => match c {
                    ' ' | '\t' => state = State::ValueFinished,
                    ';' => {
                        finish(&mut name, &mut value);
                        state = State::Name;
                    }
                    _ => value.push(c),
                },
                State::ValueFinished => {
                    finish(&mut name, &mut value);
                    quoted = false;
                    state = State::Name;
                    match c {
                        ' ' | '\t' | ';' => {}
                        _ => name.push(c),
                    }
                }
            }
        }
        finish(&mut name, &mut value);

        Self { pairs }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_pairs() {
        let ext = ChunkExtensions::parse("type=header;url=http://h/x;header-length=42");
        assert_eq!(ext.len(), 3);
        assert_eq!(ext.get("type"), Some("header"));
        assert_eq!(ext.get("url"), Some("http://h/x"));
        assert_eq!(ext.get("header-length"), Some("42"));
    }

    #[test]
    fn quoted_values_keep_separators() {
        let ext = ChunkExtensions::parse(r#"a="x; y=z" ; b = 2"#);
        assert_eq!(ext.get("a"), Some("x; y=z"));
        assert_eq!(ext.get("b"), Some("2"));
    }

    #[test]
    fn last_pair_is_finalized_without_terminator() {
        let ext = ChunkExtensions::parse("only=1");
        assert_eq!(ext.get("only"), Some("1"));

        let ext = ChunkExtensions::parse(r#"open="unterminated"#);
        assert_eq!(ext.get("open"), Some("unterminated"));
    }

    #[test]
    fn names_without_values() {
        let ext = ChunkExtensions::parse("flag;k=v");
        assert_eq!(ext.get("flag"), Some(""));
        assert_eq!(ext.get("k"), Some("v"));
    }

    #[test]
    fn empty_and_garbage_input() {
        assert!(ChunkExtensions::parse("").is_empty());
        let ext = ChunkExtensions::parse("=orphan");
        assert!(ext.is_empty());
    }
}
