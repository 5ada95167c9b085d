//! Text and clock helpers shared by the store, the transports and the CLI

/// Longest response-body excerpt carried into an error message
const ERROR_EXCERPT_CHARS: usize = 180;

/// Trimmed view of `value`, or `None` when only whitespace remains
pub fn non_blank(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

/// Owned form of [`non_blank`] for optional settings such as URLs and tokens
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    value.as_deref().and_then(non_blank).map(str::to_owned)
}

/// Whether `value` starts with an `http` or `https` scheme, in any case
pub fn is_http_url(value: &str) -> bool {
    let scheme = value.get(..8).unwrap_or(value).to_ascii_lowercase();
    scheme.starts_with("http://") || scheme.starts_with("https://")
}

/// One-line excerpt of a response body: whitespace runs collapse to a single space
pub fn compact_text(value: &str) -> String {
    let mut excerpt = String::new();
    for word in value.split_whitespace() {
        if !excerpt.is_empty() {
            excerpt.push(' ');
        }
        excerpt.push_str(word);
    }
    excerpt.chars().take(ERROR_EXCERPT_CHARS).collect()
}

/// Wall clock in Unix milliseconds, the unit of every stored timestamp
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
