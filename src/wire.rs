use serde::Deserialize;

/// Error payload fields the client understands. Everything else is ignored.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default, rename = "retryAfter")]
    pub retry_after: Option<RetryAfter>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RetryAfter {
    Number(serde_json::Number),
    Text(String),
}

impl RetryAfter {
    fn into_hint(self) -> String {
        match self {
            Self::Number(number) => number.to_string(),
            Self::Text(text) => text,
        }
    }
}

/// Extracts `retryAfter` from a JSON error body, if present.
pub fn retry_after_from_body(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body)
        .ok()?
        .retry_after
        .map(RetryAfter::into_hint)
}

#[cfg(test)]
mod tests {
    use super::retry_after_from_body;

    #[test]
    fn reads_numeric_and_string_hints() {
        assert_eq!(
            retry_after_from_body(r#"{"retryAfter": 3}"#).as_deref(),
            Some("3")
        );
        assert_eq!(
            retry_after_from_body(r#"{"message": "slow down", "retryAfter": "1.5"}"#).as_deref(),
            Some("1.5")
        );
    }

    #[test]
    fn missing_or_unparseable_bodies_yield_none() {
        assert_eq!(retry_after_from_body(r#"{"message": "nope"}"#), None);
        assert_eq!(retry_after_from_body("<html>bad gateway</html>"), None);
        assert_eq!(retry_after_from_body(""), None);
        assert_eq!(retry_after_from_body(r#"{"retryAfter": null}"#), None);
    }
}
