//! Strict structural and semantic validator for `ai_output_v1`, the contract an AI
//! provider's response must satisfy before it is trusted and persisted.
//!
//! Mirrors a single validation pass rather than a schema library: every rule here is
//! enforced by hand because several of them (citation cross-referencing, baseline-delta
//! bounds, minimal JSONPath existence checks) cut across fields in ways a generic JSON
//! Schema validator can't express cleanly.

use serde_json::Value;
use thiserror::Error;

pub const ALLOWED_TOP_KEYS: &[&str] = &[
    "schema_version",
    "model_id",
    "prompt_version",
    "generated_at_utc",
    "event_key",
    "verdict",
    "narrative",
    "risks",
    "flags",
    "field_citations",
];

pub const ALLOWED_STATUS: &[&str] = &["applicable", "not_applicable", "insufficient_data"];
pub const ALLOWED_SEVERITY: &[&str] = &["low", "medium", "high"];
pub const ALLOWED_HORIZON: &[i64] = &[60, 180];

pub const MAX_RATING_DELTA: f64 = 3.0;
pub const MAX_CONF_DELTA: f64 = 0.35;

const MAX_NARRATIVE_BULLETS: usize = 5;
const MAX_BULLET_CHARS: usize = 160;
const MAX_RISKS: usize = 8;
const MAX_FLAGS: usize = 12;
const MAX_CITATIONS: usize = 40;
const MAX_SUMMARY_CHARS: usize = 240;
const DELTA_EPSILON: f64 = 1e-9;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("{0}")]
pub struct AiValidationError(pub String);

fn invalid(msg: impl Into<String>) -> AiValidationError {
    AiValidationError(msg.into())
}

pub type AiValidationResult<T> = Result<T, AiValidationError>;

/// Parse a model response into a JSON value: try the whole trimmed text first, then
/// fall back to the substring from the first `{` to the last `}`.
pub fn extract_json_from_text(text: &str) -> AiValidationResult<Value> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        if v.is_object() {
            return Ok(v);
        }
    }

    let start = trimmed.find('{').ok_or_else(|| invalid("no JSON object found in model output"))?;
    let end = trimmed.rfind('}').ok_or_else(|| invalid("no JSON object found in model output"))?;
    if end < start {
        return Err(invalid("no JSON object found in model output"));
    }

    let candidate = &trimmed[start..=end];
    let value: Value =
        serde_json::from_str(candidate).map_err(|e| invalid(format!("failed to parse JSON object: {e}")))?;
    if !value.is_object() {
        return Err(invalid("parsed JSON is not an object"));
    }
    Ok(value)
}

fn as_object<'a>(v: &'a Value, what: &str) -> AiValidationResult<&'a serde_json::Map<String, Value>> {
    v.as_object().ok_or_else(|| invalid(format!("{what} must be an object")))
}

fn non_empty_str<'a>(v: &'a Value, what: &str) -> AiValidationResult<&'a str> {
    let s = v.as_str().ok_or_else(|| invalid(format!("{what} must be a string")))?;
    if s.is_empty() {
        return Err(invalid(format!("{what} must not be empty")));
    }
    Ok(s)
}

fn is_single_line_le(s: &str, max_chars: usize) -> bool {
    !s.contains('\n') && s.chars().count() <= max_chars
}

/// Minimal JSONPath step parser: `$` optionally followed by `.key` or `[N]` segments.
fn parse_json_path(path: &str) -> AiValidationResult<Vec<PathStep>> {
    let mut rest = path.strip_prefix('$').ok_or_else(|| invalid(format!("citation path must start with $: {path}")))?;
    let mut steps = Vec::new();

    if rest.is_empty() {
        return Ok(steps);
    }
    if let Some(stripped) = rest.strip_prefix('.') {
        rest = stripped;
    }

    let mut chars = rest.char_indices().peekable();
    let mut key_start = 0usize;
    let bytes = rest.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'.' => {
                if i > key_start {
                    steps.push(PathStep::Key(rest[key_start..i].to_string()));
                }
                i += 1;
                key_start = i;
            }
            b'[' => {
                if i > key_start {
                    steps.push(PathStep::Key(rest[key_start..i].to_string()));
                }
                let close = rest[i..].find(']').map(|o| i + o).ok_or_else(|| invalid(format!("unterminated [ in path: {path}")))?;
                let digits = &rest[i + 1..close];
                if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                    return Err(invalid(format!("bracket index must be all-digit: {path}")));
                }
                let idx: usize = digits.parse().map_err(|_| invalid(format!("bad bracket index: {path}")))?;
                steps.push(PathStep::Index(idx));
                i = close + 1;
                key_start = i;
            }
            _ => i += 1,
        }
    }
    if key_start < bytes.len() {
        steps.push(PathStep::Key(rest[key_start..].to_string()));
    }
    let _ = chars.next();
    Ok(steps)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathStep {
    Key(String),
    Index(usize),
}

fn json_path_exists(root: &Value, path: &str) -> bool {
    let Ok(steps) = parse_json_path(path) else { return false };
    let mut current = root;
    for step in steps {
        match step {
            PathStep::Key(k) => match current.get(&k) {
                Some(v) => current = v,
                None => return false,
            },
            PathStep::Index(idx) => match current.as_array().and_then(|a| a.get(idx)) {
                Some(v) => current = v,
                None => return false,
            },
        }
    }
    true
}

fn validate_signal(sig: &Value, expected_applicable: bool, side_name: &str) -> AiValidationResult<()> {
    let sig = as_object(sig, &format!("verdict.{side_name}"))?;
    for key in ["status", "rating", "confidence", "horizon_days", "summary"] {
        if !sig.contains_key(key) {
            return Err(invalid(format!("verdict.{side_name}.{key} is required")));
        }
    }

    let status = non_empty_str(&sig["status"], &format!("verdict.{side_name}.status"))?;
    if !ALLOWED_STATUS.contains(&status) {
        return Err(invalid(format!("verdict.{side_name}.status must be one of {ALLOWED_STATUS:?}")));
    }

    if !expected_applicable && status != "not_applicable" {
        return Err(invalid(format!(
            "verdict.{side_name}.status must be not_applicable when the event has no {side_name} side"
        )));
    }

    if status != "applicable" {
        for key in ["rating", "confidence", "horizon_days", "summary"] {
            if !sig[key].is_null() {
                return Err(invalid(format!("verdict.{side_name}.{key} must be null when status is {status}")));
            }
        }
        return Ok(());
    }

    let rating = sig["rating"].as_f64().ok_or_else(|| invalid(format!("verdict.{side_name}.rating must be a number")))?;
    if !(1.0..=10.0).contains(&rating) {
        return Err(invalid(format!("verdict.{side_name}.rating must be in [1.0, 10.0]")));
    }
    if (rating * 10.0).round() / 10.0 != rating {
        return Err(invalid(format!("verdict.{side_name}.rating must have exactly one decimal place")));
    }

    let confidence =
        sig["confidence"].as_f64().ok_or_else(|| invalid(format!("verdict.{side_name}.confidence must be a number")))?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(invalid(format!("verdict.{side_name}.confidence must be in [0.0, 1.0]")));
    }

    let horizon = sig["horizon_days"]
        .as_i64()
        .ok_or_else(|| invalid(format!("verdict.{side_name}.horizon_days must be an integer")))?;
    if !ALLOWED_HORIZON.contains(&horizon) {
        return Err(invalid(format!("verdict.{side_name}.horizon_days must be one of {ALLOWED_HORIZON:?}")));
    }

    non_empty_str(&sig["summary"], &format!("verdict.{side_name}.summary"))?;
    if !is_single_line_le(sig["summary"].as_str().unwrap_or_default(), MAX_SUMMARY_CHARS) {
        return Err(invalid(format!("verdict.{side_name}.summary must be a single line of at most {MAX_SUMMARY_CHARS} chars")));
    }

    Ok(())
}

fn validate_bullets(list: &Value, what: &str) -> AiValidationResult<()> {
    let arr = list.as_array().ok_or_else(|| invalid(format!("{what} must be an array")))?;
    if arr.len() > MAX_NARRATIVE_BULLETS {
        return Err(invalid(format!("{what} must have at most {MAX_NARRATIVE_BULLETS} items")));
    }
    for item in arr {
        let s = non_empty_str(item, what)?;
        if !is_single_line_le(s, MAX_BULLET_CHARS) {
            return Err(invalid(format!("{what} items must be a single line of at most {MAX_BULLET_CHARS} chars")));
        }
    }
    Ok(())
}

fn validate_baseline_deltas(output: &serde_json::Map<String, Value>, ai_input: &Value) -> AiValidationResult<()> {
    let Some(baseline) = ai_input.get("baseline").filter(|b| b.is_object()) else { return Ok(()) };

    for side_name in ["buy_signal", "sell_signal"] {
        let side_key = side_name.trim_end_matches("_signal");
        let Some(base_side) = baseline.get(side_key).filter(|b| b.is_object()) else { continue };
        let (Some(base_rating), Some(base_conf)) =
            (base_side.get("rating").and_then(|v| v.as_f64()), base_side.get("confidence").and_then(|v| v.as_f64()))
        else {
            continue;
        };

        let Some(sig) = output.get("verdict").and_then(|v| v.get(side_name)) else { continue };
        if sig.get("status").and_then(|v| v.as_str()) != Some("applicable") {
            continue;
        }
        let Some(out_rating) = sig.get("rating").and_then(|v| v.as_f64()) else { continue };
        let Some(out_conf) = sig.get("confidence").and_then(|v| v.as_f64()) else { continue };

        if (out_rating - base_rating).abs() > MAX_RATING_DELTA + DELTA_EPSILON {
            return Err(invalid(format!("{side_name} rating deviates from baseline by more than {MAX_RATING_DELTA}")));
        }
        if (out_conf - base_conf).abs() > MAX_CONF_DELTA + DELTA_EPSILON {
            return Err(invalid(format!("{side_name} confidence deviates from baseline by more than {MAX_CONF_DELTA}")));
        }
    }

    Ok(())
}

/// Validate a candidate AI response against the `ai_output_v1` contract, cross-checking
/// it against the `ai_input` payload that produced it (event identity, applicability,
/// baseline deltas).
pub fn validate_ai_output(ai_output: &Value, ai_input: &Value) -> AiValidationResult<()> {
    let output = as_object(ai_output, "ai_output")?;

    for key in output.keys() {
        if !ALLOWED_TOP_KEYS.contains(&key.as_str()) {
            return Err(invalid(format!("unknown top-level key: {key}")));
        }
    }
    for key in ALLOWED_TOP_KEYS {
        if !output.contains_key(*key) {
            return Err(invalid(format!("missing required top-level key: {key}")));
        }
    }

    if output["schema_version"].as_str() != Some("ai_output_v1") {
        return Err(invalid("schema_version must be \"ai_output_v1\""));
    }
    non_empty_str(&output["model_id"], "model_id")?;
    non_empty_str(&output["prompt_version"], "prompt_version")?;

    let generated_at = non_empty_str(&output["generated_at_utc"], "generated_at_utc")?;
    if !generated_at.ends_with('Z') {
        return Err(invalid("generated_at_utc must be an ISO-8601 UTC timestamp ending in Z"));
    }

    let event_key = as_object(&output["event_key"], "event_key")?;
    for field in ["issuer_cik", "owner_key", "accession_number"] {
        let value = non_empty_str(event_key.get(field).unwrap_or(&Value::Null), &format!("event_key.{field}"))?;
        let expected = ai_input.pointer(&format!("/event/{field}")).and_then(|v| v.as_str());
        if expected != Some(value) {
            return Err(invalid(format!("event_key.{field} does not match ai_input.event.{field}")));
        }
    }

    let verdict = as_object(&output["verdict"], "verdict")?;
    if !verdict.contains_key("buy_signal") || !verdict.contains_key("sell_signal") {
        return Err(invalid("verdict must have buy_signal and sell_signal"));
    }
    let has_buy = ai_input.pointer("/event/buy/has_buy").and_then(|v| v.as_bool()).unwrap_or(false);
    let has_sell = ai_input.pointer("/event/sell/has_sell").and_then(|v| v.as_bool()).unwrap_or(false);
    validate_signal(&verdict["buy_signal"], has_buy, "buy_signal")?;
    validate_signal(&verdict["sell_signal"], has_sell, "sell_signal")?;

    let narrative = as_object(&output["narrative"], "narrative")?;
    for field in ["thesis_bullets", "context_bullets", "counterpoints_bullets"] {
        validate_bullets(narrative.get(field).unwrap_or(&Value::Null), &format!("narrative.{field}"))?;
    }

    let risks = output["risks"].as_array().ok_or_else(|| invalid("risks must be an array"))?;
    if risks.len() > MAX_RISKS {
        return Err(invalid(format!("risks must have at most {MAX_RISKS} items")));
    }
    let mut risk_texts: Vec<String> = Vec::new();
    for risk in risks {
        let risk_obj = as_object(risk, "risks[]")?;
        non_empty_str(risk_obj.get("risk_type").unwrap_or(&Value::Null), "risks[].risk_type")?;
        let severity = non_empty_str(risk_obj.get("severity").unwrap_or(&Value::Null), "risks[].severity")?;
        if !ALLOWED_SEVERITY.contains(&severity) {
            return Err(invalid(format!("risks[].severity must be one of {ALLOWED_SEVERITY:?}")));
        }
        let text = non_empty_str(risk_obj.get("text").unwrap_or(&Value::Null), "risks[].text")?;
        if text.contains('\n') {
            return Err(invalid("risks[].text must be a single line"));
        }
        risk_texts.push(text.to_string());
    }

    let flags = output["flags"].as_array().ok_or_else(|| invalid("flags must be an array"))?;
    if flags.len() > MAX_FLAGS {
        return Err(invalid(format!("flags must have at most {MAX_FLAGS} items")));
    }
    for flag in flags {
        non_empty_str(flag, "flags[]")?;
    }

    let citations = output["field_citations"].as_array().ok_or_else(|| invalid("field_citations must be an array"))?;
    if citations.len() > MAX_CITATIONS {
        return Err(invalid(format!("field_citations must have at most {MAX_CITATIONS} items")));
    }
    let mut citation_claims: Vec<String> = Vec::new();
    for citation in citations {
        let citation_obj = as_object(citation, "field_citations[]")?;
        let claim = non_empty_str(citation_obj.get("claim").unwrap_or(&Value::Null), "field_citations[].claim")?;
        let paths = citation_obj
            .get("input_paths")
            .and_then(|v| v.as_array())
            .ok_or_else(|| invalid("field_citations[].input_paths must be a non-empty array"))?;
        if paths.is_empty() {
            return Err(invalid("field_citations[].input_paths must be non-empty"));
        }
        for path in paths {
            let path_str = non_empty_str(path, "field_citations[].input_paths[]")?;
            if !path_str.starts_with("$.") {
                return Err(invalid("field_citations[].input_paths[] must start with \"$.\""));
            }
            if !json_path_exists(ai_input, path_str) {
                return Err(invalid(format!("field_citations[].input_paths[] does not resolve in ai_input: {path_str}")));
            }
        }
        citation_claims.push(claim.to_string());
    }

    let any_applicable = [&verdict["buy_signal"], &verdict["sell_signal"]]
        .iter()
        .any(|s| s.get("status").and_then(|v| v.as_str()) == Some("applicable"));
    let any_narrative = ["thesis_bullets", "context_bullets", "counterpoints_bullets"]
        .iter()
        .any(|f| narrative.get(*f).and_then(|v| v.as_array()).map(|a| !a.is_empty()).unwrap_or(false));
    if (any_applicable || any_narrative || !risks.is_empty()) && citations.is_empty() {
        return Err(invalid("field_citations must be non-empty when any signal is applicable or risks/narrative are present"));
    }

    for risk_text in &risk_texts {
        if !citation_claims.contains(risk_text) {
            return Err(invalid(format!("risk text must appear verbatim as a field_citations claim: {risk_text}")));
        }
    }

    validate_baseline_deltas(output, ai_input)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_input() -> Value {
        json!({
            "event": {
                "issuer_cik": "0000000001",
                "owner_key": "owner-1",
                "accession_number": "0000000001-24-000001",
                "buy": {"has_buy": true},
                "sell": {"has_sell": false}
            },
            "baseline": null
        })
    }

    fn minimal_output(status_buy: &str) -> Value {
        json!({
            "schema_version": "ai_output_v1",
            "model_id": "gemini-2.5-flash-lite",
            "prompt_version": "prompt_ai_v4",
            "generated_at_utc": "2024-01-01T00:00:00Z",
            "event_key": {
                "issuer_cik": "0000000001",
                "owner_key": "owner-1",
                "accession_number": "0000000001-24-000001"
            },
            "verdict": {
                "buy_signal": if status_buy == "applicable" {
                    json!({"status": "applicable", "rating": 7.5, "confidence": 0.6, "horizon_days": 60, "summary": "Solid buy."})
                } else {
                    json!({"status": status_buy, "rating": null, "confidence": null, "horizon_days": null, "summary": null})
                },
                "sell_signal": {"status": "not_applicable", "rating": null, "confidence": null, "horizon_days": null, "summary": null}
            },
            "narrative": {"thesis_bullets": [], "context_bullets": [], "counterpoints_bullets": []},
            "risks": [],
            "flags": [],
            "field_citations": []
        })
    }

    #[test]
    fn accepts_a_well_formed_minimal_output() {
        let input = minimal_input();
        let output = minimal_output("applicable");
        assert!(validate_ai_output(&output, &input).is_ok());
    }

    #[test]
    fn rejects_unknown_top_level_key() {
        let input = minimal_input();
        let mut output = minimal_output("applicable");
        output.as_object_mut().unwrap().insert("extra_field".to_string(), json!(true));
        assert!(validate_ai_output(&output, &input).is_err());
    }

    #[test]
    fn rejects_applicable_status_on_a_side_without_data() {
        let input = minimal_input();
        let mut output = minimal_output("applicable");
        output["verdict"]["sell_signal"] = json!({"status": "applicable", "rating": 5.0, "confidence": 0.5, "horizon_days": 60, "summary": "x"});
        assert!(validate_ai_output(&output, &input).is_err());
    }

    #[test]
    fn rejects_rating_with_more_than_one_decimal() {
        let input = minimal_input();
        let mut output = minimal_output("applicable");
        output["verdict"]["buy_signal"]["rating"] = json!(7.53);
        assert!(validate_ai_output(&output, &input).is_err());
    }

    #[test]
    fn rejects_risk_text_without_matching_citation() {
        let input = minimal_input();
        let mut output = minimal_output("applicable");
        output["risks"] = json!([{"risk_type": "volatility", "severity": "medium", "text": "High beta risk."}]);
        assert!(validate_ai_output(&output, &input).is_err());
    }

    #[test]
    fn accepts_risk_text_with_matching_citation_and_resolvable_path() {
        let input = json!({
            "event": {
                "issuer_cik": "0000000001",
                "owner_key": "owner-1",
                "accession_number": "0000000001-24-000001",
                "buy": {"has_buy": true, "beta": 1.6},
                "sell": {"has_sell": false}
            },
            "baseline": null
        });
        let mut output = minimal_output("applicable");
        output["risks"] = json!([{"risk_type": "volatility", "severity": "medium", "text": "High beta risk."}]);
        output["field_citations"] = json!([{"claim": "High beta risk.", "input_paths": ["$.event.buy.beta"]}]);
        assert!(validate_ai_output(&output, &input).is_ok());
    }

    #[test]
    fn rejects_rating_outside_baseline_delta_bound() {
        let input = json!({
            "event": {
                "issuer_cik": "0000000001",
                "owner_key": "owner-1",
                "accession_number": "0000000001-24-000001",
                "buy": {"has_buy": true},
                "sell": {"has_sell": false}
            },
            "baseline": {"buy": {"rating": 5.0, "confidence": 0.5}}
        });
        let mut output = minimal_output("applicable");
        output["verdict"]["buy_signal"]["rating"] = json!(9.0);
        assert!(validate_ai_output(&output, &input).is_err());
    }

    #[test]
    fn json_path_resolves_array_index() {
        let doc = json!({"event": {"tags": ["a", "b"]}});
        assert!(json_path_exists(&doc, "$.event.tags[1]"));
        assert!(!json_path_exists(&doc, "$.event.tags[5]"));
    }

    #[test]
    fn extract_json_from_text_strips_surrounding_prose() {
        let text = "Here is the result:\n{\"a\": 1}\nThanks!";
        let value = extract_json_from_text(text).unwrap();
        assert_eq!(value["a"], 1);
    }
}
