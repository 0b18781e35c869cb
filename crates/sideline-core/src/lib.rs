//! # sideline-core
//!
//! Deterministic presentation logic for the Sideline dashboard.
//!
//! This crate answers two questions for every value the dashboard renders:
//! - Which explanatory reasons are safe to show next to it?
//! - How fresh and trustworthy is the upstream data behind it?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same input always produces same output
//! 2. **No I/O**: Network calls live in `sideline-runtime`
//! 3. **Bounded**: Reason chips never exceed the display budget
//!
//! ## Example
//!
//! ```rust
//! use sideline_core::{clamp_reasons, ClampOptions, Reason};
//!
//! let reasons = vec![
//!     Reason::new("Target share up", 5.0, 0.9),
//!     Reason::new("Tough matchup", 4.0, 0.8),
//! ];
//! let chips = clamp_reasons(&reasons, &ClampOptions::default());
//!
//! assert_eq!(chips.len(), 2);
//! assert_eq!(chips[0].effect, 1.94);
//! ```

pub mod reasons;
pub mod trust;

pub use reasons::{clamp_reasons, ClampOptions, Reason, MIN_CONFIDENCE};
pub use trust::{TrustMetadata, HEADER_LAST_REFRESH, HEADER_REQUEST_ID, HEADER_SCHEMA_VERSION, HEADER_STALE};

use thiserror::Error;

/// Errors from parsing upstream payloads into core types.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid reason payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// Parse a JSON array of reasons as delivered by the upstream API.
///
/// Accepts either a bare array or an object with a `reasons` field.
pub fn parse_reasons(json: &str) -> Result<Vec<Reason>, CoreError> {
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum Payload {
        Bare(Vec<Reason>),
        Wrapped { reasons: Vec<Reason> },
    }

    let payload: Payload = serde_json::from_str(json)?;
    Ok(match payload {
        Payload::Bare(reasons) => reasons,
        Payload::Wrapped { reasons } => reasons,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_array() {
        let reasons = parse_reasons(
            r#"[{"label":"Snap share","effect":2.5,"confidence":0.85}]"#,
        )
        .unwrap();
        assert_eq!(reasons.len(), 1);
        assert_eq!(reasons[0].label, "Snap share");
    }

    #[test]
    fn test_parse_wrapped_with_aliases() {
        let reasons = parse_reasons(
            r#"{"reasons":[{"label":"Weather","pct":-1.2,"conf":0.7}]}"#,
        )
        .unwrap();
        assert_eq!(reasons[0].effect, -1.2);
        assert_eq!(reasons[0].confidence, 0.7);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_reasons("{\"nope\":1}"),
            Err(CoreError::InvalidPayload(_))
        ));
    }
}
