use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlightError {
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("API error: {0}")]
    ApiError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_prefixes() {
        assert_eq!(
            FlightError::NetworkError("timed out".into()).to_string(),
            "Network error: timed out"
        );
        assert_eq!(
            FlightError::ApiError("HTTP error: 429".into()).to_string(),
            "API error: HTTP error: 429"
        );
    }
}
