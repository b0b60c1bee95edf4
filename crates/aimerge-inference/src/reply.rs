use crate::backend::ResolutionResponse;
use serde::Deserialize;

pub const LOCAL_FALLBACK_CONFIDENCE: f64 = 0.5;
pub const HOSTED_FALLBACK_CONFIDENCE: f64 = 0.6;

const UNEXPECTED_FORMAT: &str =
    "The model replied in an unexpected format; its raw reply is used as the resolution.";
const NO_EXPLANATION: &str = "No explanation provided.";

#[derive(Debug, Deserialize)]
struct RawReply {
    resolution: Option<serde_json::Value>,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    confidence: Option<serde_json::Value>,
    #[serde(default)]
    alternatives: Option<Vec<String>>,
}

/// Unwrap a model reply into a [`ResolutionResponse`].
///
/// Never fails: a reply that is not the requested JSON object becomes
/// `{resolution: raw, explanation: <fallback>, confidence: fallback_confidence}`.
pub fn parse_reply(raw: &str, fallback_confidence: f64) -> ResolutionResponse {
    match try_parse(raw) {
        Some(response) => response,
        None => {
            tracing::warn!(len = raw.len(), "Backend reply was not valid JSON; degrading");
            ResolutionResponse {
                resolution: raw.trim().to_string(),
                explanation: UNEXPECTED_FORMAT.to_string(),
                confidence: fallback_confidence.clamp(0.0, 1.0),
                alternatives: None,
            }
        }
    }
}

fn try_parse(raw: &str) -> Option<ResolutionResponse> {
    let body = extract_json_object(strip_fences(raw))?;
    let reply: RawReply = serde_json::from_str(body).ok()?;

    let resolution = match reply.resolution? {
        serde_json::Value::String(s) => s,
        _ => return None,
    };

    let confidence = match reply.confidence {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.5),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.5),
        _ => 0.5,
    };
    let confidence = if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.5
    };

    let explanation = reply
        .explanation
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| NO_EXPLANATION.to_string());

    Some(ResolutionResponse {
        resolution,
        explanation,
        confidence,
        alternatives: reply.alternatives.filter(|a| !a.is_empty()),
    })
}

/// Drop a surrounding markdown code fence, if any.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the info string ("json") on the opening fence line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
