//! # Error Classification
//!
//! Maps a raw failure message and the name of the service it came from to an
//! [`ErrorCategory`]. Rules are checked in a fixed order so that explicit
//! network and timeout signals win over provider status-code heuristics.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::ErrorCategory;

// Keyword groups, matched anywhere in the message
static NETWORK_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)connection|network|timeout|unreachable|dns").unwrap());
static TIMEOUT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)timeout|timed out").unwrap());
static RATE_LIMIT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)rate limit|too many requests|429|quota").unwrap());
static QUOTA_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)quota").unwrap());
static AUTH_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)auth|unauthorized|401|403|invalid key|api key").unwrap());
static UNAVAILABLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)503|service unavailable|unavailable|down|maintenance").unwrap());
static INVALID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)invalid|bad request|400|malformed|validation").unwrap());

// Standalone HTTP status codes, e.g. `HTTP 502` or `status=429`
static STATUS_CODE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[1-5]\d{2}\b").unwrap());

/// Status-code heuristics for a provider family
struct ProviderRule {
    /// Any of these substrings in the service name selects the rule
    service_markers: &'static [&'static str],
    /// Whether 5xx codes mean the provider is unavailable
    server_errors: bool,
    /// Whether 403 counts as an authentication failure
    forbidden_is_auth: bool,
}

const PROVIDER_RULES: &[ProviderRule] = &[
    ProviderRule {
        service_markers: &["openai"],
        server_errors: true,
        forbidden_is_auth: true,
    },
    ProviderRule {
        service_markers: &["deepgram"],
        server_errors: false,
        forbidden_is_auth: false,
    },
    ProviderRule {
        service_markers: &["cartesia", "elevenlabs", "eleven"],
        server_errors: false,
        forbidden_is_auth: false,
    },
];

/// Classifies service failures. Stateless and deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, error_message: &str, service_name: &str) -> ErrorCategory {
        let message = error_message;
        let service = service_name.to_lowercase();

        if NETWORK_PATTERN.is_match(message) {
            // "timeout" is also a network keyword, so it resolves to network here
            return ErrorCategory::Network;
        }
        if TIMEOUT_PATTERN.is_match(message) {
            return ErrorCategory::Timeout;
        }
        if RATE_LIMIT_PATTERN.is_match(message) {
            return if QUOTA_PATTERN.is_match(message) {
                ErrorCategory::QuotaExceeded
            } else {
                ErrorCategory::RateLimit
            };
        }
        if AUTH_PATTERN.is_match(message) {
            return ErrorCategory::Authentication;
        }
        if UNAVAILABLE_PATTERN.is_match(message) {
            return ErrorCategory::ServiceUnavailable;
        }
        if INVALID_PATTERN.is_match(message) {
            return ErrorCategory::InvalidInput;
        }

        if let Some(category) = classify_by_provider(message, &service) {
            return category;
        }

        ErrorCategory::Transient
    }
}

fn classify_by_provider(message: &str, service: &str) -> Option<ErrorCategory> {
    let rule = PROVIDER_RULES
        .iter()
        .find(|rule| rule.service_markers.iter().any(|marker| service.contains(marker)))?;

    let codes = status_codes(message);
    if codes.contains(&429) {
        return Some(ErrorCategory::RateLimit);
    }
    if codes.contains(&401) || (rule.forbidden_is_auth && codes.contains(&403)) {
        return Some(ErrorCategory::Authentication);
    }
    if rule.server_errors && codes.iter().any(|code| (500..600).contains(code)) {
        return Some(ErrorCategory::ServiceUnavailable);
    }
    None
}

fn status_codes(message: &str) -> Vec<u16> {
    STATUS_CODE_PATTERN
        .find_iter(message)
        .filter_map(|code| code.as_str().parse::<u16>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(message: &str, service: &str) -> ErrorCategory {
        ErrorClassifier::new().classify(message, service)
    }

    #[test]
    fn test_network_signals_win() {
        assert_eq!(classify("Connection reset by peer", "openai_llm"), ErrorCategory::Network);
        assert_eq!(classify("DNS lookup failed", "deepgram_stt"), ErrorCategory::Network);
        // "timeout" sits in the network list and is matched first
        assert_eq!(classify("Request timeout (429)", "openai_llm"), ErrorCategory::Network);
    }

    #[test]
    fn test_timed_out_is_timeout() {
        assert_eq!(classify("operation timed out after 30s", "cartesia_tts"), ErrorCategory::Timeout);
    }

    #[test]
    fn test_quota_wins_over_rate_limit() {
        assert_eq!(classify("Rate limit reached", "openai_llm"), ErrorCategory::RateLimit);
        assert_eq!(classify("429 Too Many Requests", "any"), ErrorCategory::RateLimit);
        assert_eq!(
            classify("Rate limit: monthly quota exhausted", "openai_llm"),
            ErrorCategory::QuotaExceeded
        );
    }

    #[test]
    fn test_keyword_order() {
        assert_eq!(classify("Unauthorized", "svc"), ErrorCategory::Authentication);
        assert_eq!(classify("Invalid API key", "svc"), ErrorCategory::Authentication);
        assert_eq!(classify("Service Unavailable", "svc"), ErrorCategory::ServiceUnavailable);
        assert_eq!(classify("scheduled maintenance", "svc"), ErrorCategory::ServiceUnavailable);
        assert_eq!(classify("malformed payload", "svc"), ErrorCategory::InvalidInput);
        assert_eq!(classify("Bad Request", "svc"), ErrorCategory::InvalidInput);
    }

    #[test]
    fn test_provider_status_codes() {
        assert_eq!(classify("HTTP 502 from upstream", "openai_llm"), ErrorCategory::ServiceUnavailable);
        assert_eq!(classify("status=500", "openai_llm"), ErrorCategory::ServiceUnavailable);
        // Only the OpenAI family maps server errors
        assert_eq!(classify("status=500", "deepgram_stt"), ErrorCategory::Transient);
        assert_eq!(classify("status 401", "elevenlabs_tts"), ErrorCategory::Authentication);
    }

    #[test]
    fn test_status_codes_are_whole_numbers() {
        assert_eq!(status_codes("HTTP 502 then status=429"), vec![502, 429]);
        assert_eq!(status_codes("request 5021 failed on port 8080"), Vec::<u16>::new());
        assert_eq!(status_codes("code 700"), Vec::<u16>::new());
        // A five digit id is not a 500
        assert_eq!(classify("job 50012 failed", "openai_llm"), ErrorCategory::Transient);
    }

    #[test]
    fn test_default_is_transient() {
        assert_eq!(classify("something odd happened", "unknown"), ErrorCategory::Transient);
        assert_eq!(classify("", ""), ErrorCategory::Transient);
    }
}
