//! Key/value parsing of event bodies
//!
//! A body such as `a=7|b=hi` is split on the primary delimiter into items and
//! each item is split once on the key/value separator, so values may contain
//! the separator themselves.

use indexmap::IndexMap;
use tracing::trace;

/// Default primary delimiter
pub const DEFAULT_DELIMITER: &str = "|";

/// Default key/value separator
pub const DEFAULT_KEY_VALUE_SEPARATOR: &str = "=";

/// Field name to raw text, in first-seen key order
pub type ParsedEvent = IndexMap<String, String>;

/// Splits event bodies into key/value fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventParser {
    delimiter: String,
    separator: String,
}

impl Default for EventParser {
    fn default() -> Self {
        Self::new(DEFAULT_DELIMITER, DEFAULT_KEY_VALUE_SEPARATOR)
    }
}

impl EventParser {
    /// Create a parser with the given delimiters
    pub fn new(delimiter: impl Into<String>, separator: impl Into<String>) -> Self {
        Self {
            delimiter: delimiter.into(),
            separator: separator.into(),
        }
    }

    /// Primary delimiter
    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// Key/value separator
    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Parse a body.
    ///
    /// Empty values are kept, a repeated key keeps its first position but
    /// takes the last value, and items without a separator are dropped.
    pub fn parse(&self, body: &[u8]) -> ParsedEvent {
        let text = String::from_utf8_lossy(body);
        let mut fields = ParsedEvent::new();
        for item in text.split(self.delimiter.as_str()) {
            match item.split_once(self.separator.as_str()) {
                Some((key, value)) => {
                    fields.insert(key.to_string(), value.to_string());
                }
                None if item.is_empty() => {}
                None => trace!(item = %item, "Ignoring item without key/value separator"),
            }
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let fields = EventParser::default().parse(b"a=7|b=hi");
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["a"], "7");
        assert_eq!(fields["b"], "hi");
    }

    #[test]
    fn test_value_may_contain_separator() {
        let fields = EventParser::default().parse(b"q=x=y|r=");
        assert_eq!(fields["q"], "x=y");
        assert_eq!(fields["r"], "");
    }

    #[test]
    fn test_duplicate_keys_last_wins() {
        let fields = EventParser::default().parse(b"a=1|b=2|a=3");
        assert_eq!(fields["a"], "3");
        assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_items_without_separator_are_ignored() {
        let fields = EventParser::default().parse(b"junk|a=1||");
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["a"], "1");
    }

    #[test]
    fn test_custom_delimiters() {
        let parser = EventParser::new(", ", ":");
        let fields = parser.parse(b"host:db1, port:5432");
        assert_eq!(fields["host"], "db1");
        assert_eq!(fields["port"], "5432");
    }

    #[test]
    fn test_round_trip() {
        let pairs = [("id", "1"), ("name", "alice"), ("note", "")];
        let body = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("|");
        let fields = EventParser::default().parse(body.as_bytes());
        let back: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        assert_eq!(back, pairs);
    }

    #[test]
    fn test_empty_body() {
        assert!(EventParser::default().parse(b"").is_empty());
    }
}
