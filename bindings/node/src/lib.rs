//! Node.js bindings for the dashboard's server components.
//!
//! ```js
//! const { clampReasons, parseTrustHeaders } = require('@sideline/core');
//!
//! const chips = clampReasons(reasons, { maxChips: 2 });
//! const trust = parseTrustHeaders(Object.fromEntries(res.headers));
//! ```

#![deny(clippy::all)]

use napi::bindgen_prelude::*;
use napi_derive::napi;
use sideline_core::{clamp_reasons as core_clamp, ClampOptions, Reason, TrustMetadata};
use std::collections::HashMap;

#[napi(object)]
pub struct JsReason {
    pub label: String,
    pub effect: f64,
    pub confidence: f64,
}

#[napi(object)]
pub struct JsClampOptions {
    pub max_chips: Option<u32>,
    pub max_abs_total: Option<f64>,
}

#[napi(object)]
pub struct JsTrustMetadata {
    pub schema_version: Option<String>,
    /// RFC 3339
    pub last_refresh: Option<String>,
    pub request_id: Option<String>,
    pub stale: bool,
}

impl From<JsReason> for Reason {
    fn from(js: JsReason) -> Self {
        Reason::new(js.label, js.effect, js.confidence)
    }
}

impl From<Reason> for JsReason {
    fn from(reason: Reason) -> Self {
        Self {
            label: reason.label,
            effect: reason.effect,
            confidence: reason.confidence,
        }
    }
}

impl From<TrustMetadata> for JsTrustMetadata {
    fn from(trust: TrustMetadata) -> Self {
        Self {
            schema_version: trust.schema_version,
            last_refresh: trust.last_refresh.map(|t| t.to_rfc3339()),
            request_id: trust.request_id,
            stale: trust.stale,
        }
    }
}

fn to_options(options: Option<JsClampOptions>) -> Result<ClampOptions> {
    let mut resolved = ClampOptions::default();
    let Some(options) = options else {
        return Ok(resolved);
    };

    if let Some(max_chips) = options.max_chips {
        resolved = resolved.with_max_chips(max_chips as usize);
    }
    if let Some(max_abs_total) = options.max_abs_total {
        if max_abs_total.is_nan() {
            return Err(Error::new(Status::InvalidArg, "maxAbsTotal must be a number"));
        }
        resolved = resolved.with_max_abs_total(max_abs_total);
    }
    Ok(resolved)
}

/// Keep the strongest confident reasons and scale them to the display budget.
#[napi]
pub fn clamp_reasons(reasons: Vec<JsReason>, options: Option<JsClampOptions>) -> Result<Vec<JsReason>> {
    let options = to_options(options)?;
    let reasons: Vec<Reason> = reasons.into_iter().map(Reason::from).collect();

    Ok(core_clamp(&reasons, &options)
        .into_iter()
        .map(JsReason::from)
        .collect())
}

/// Clamp a raw JSON payload (bare array or `{ reasons: [...] }`).
#[napi]
pub fn clamp_reasons_json(json: String, options: Option<JsClampOptions>) -> Result<serde_json::Value> {
    let options = to_options(options)?;
    let reasons = sideline_core::parse_reasons(&json)
        .map_err(|e| Error::new(Status::InvalidArg, e.to_string()))?;

    serde_json::to_value(core_clamp(&reasons, &options))
        .map_err(|e| Error::new(Status::GenericFailure, e.to_string()))
}

/// Read trust metadata from response headers. Header names are case-insensitive.
#[napi]
pub fn parse_trust_headers(headers: HashMap<String, String>) -> JsTrustMetadata {
    TrustMetadata::from_headers(headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))).into()
}

/// Milliseconds since the last upstream refresh, if known.
#[napi]
pub fn trust_age_ms(headers: HashMap<String, String>) -> Option<i64> {
    let trust = TrustMetadata::from_headers(headers.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    trust
        .age(chrono::Utc::now())
        .map(|age| age.num_milliseconds())
}
