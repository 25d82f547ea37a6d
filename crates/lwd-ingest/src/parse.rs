//! Payload normalization for both channels.
//!
//! Converts raw transport frames into a weight and a stability flag.
//! Nothing here raises past the ingestor: a `ParseError` means "drop the
//! frame and log it".

use lwd_schemas::{Grams, WeightParseError};
use serde_json::Value;

/// Named fields scanned in order on controller payloads.
pub const CONTROLLER_WEIGHT_FIELDS: [&str; 10] = [
    "weight", "Weight", "WEIGHT", "value", "Value", "VALUE", "data", "Data", "d", "w",
];

/// Open range for the "first plausible number" fallback: (0, 10000) kg.
const FALLBACK_MIN: Grams = Grams::new(0);
const FALLBACK_MAX: Grams = Grams::new(10_000_000);

const STABLE_MARKERS: [&str; 4] = ["ST", "OK", "STABLE", "S"];
const UNSTABLE_MARKERS: [&str; 3] = ["US", "UNSTABLE", "U"];

/// A decoded reading before it is stamped with source and time.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Reading {
    pub value: Grams,
    pub stable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("no weight field and no plausible numeric value in payload")]
    NoWeight,
    #[error("line contains no numeric token")]
    NoNumericToken,
    #[error(transparent)]
    Number(#[from] WeightParseError),
}

// ---------------------------------------------------------------------------
// Frame decoding
// ---------------------------------------------------------------------------

/// How an ingestor turns frames into readings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameDecoder {
    /// JSON messages; envelope frames for other topics are ignored.
    Controller { topic: String },
    /// Free-text lines.
    Scale,
}

impl FrameDecoder {
    /// `Ok(None)` means the frame was valid but not for us.
    pub fn decode(&self, frame: &str) -> Result<Option<Reading>, ParseError> {
        match self {
            FrameDecoder::Controller { topic } => decode_controller_frame(frame, topic),
            FrameDecoder::Scale => parse_scale_line(frame).map(Some),
        }
    }

    /// Level for logging a frame that failed to decode.
    pub fn drop_level(&self) -> tracing::Level {
        match self {
            FrameDecoder::Controller { .. } => tracing::Level::DEBUG,
            FrameDecoder::Scale => tracing::Level::TRACE,
        }
    }
}

// ---------------------------------------------------------------------------
// Controller channel
// ---------------------------------------------------------------------------

/// Decode one pub/sub frame. Frames shaped `{topic, payload}` are unwrapped
/// and filtered by topic; anything else is treated as the payload itself.
pub fn decode_controller_frame(frame: &str, topic: &str) -> Result<Option<Reading>, ParseError> {
    let v: Value =
        serde_json::from_str(frame).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    let payload = match (v.get("topic").and_then(Value::as_str), v.get("payload")) {
        (Some(t), Some(p)) => {
            if t != topic {
                return Ok(None);
            }
            match p {
                // Bridges often forward the raw message body as a string.
                Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| p.clone()),
                other => other.clone(),
            }
        }
        _ => v,
    };

    parse_controller_payload(&payload).map(Some)
}

/// Resolve weight from a controller payload.
///
/// 1. Named fields in [`CONTROLLER_WEIGHT_FIELDS`] order.
/// 2. The same list one level under `d` when `d` is an object.
/// 3. The first numeric value in (0, 10000) kg, depth-first.
pub fn parse_controller_payload(payload: &Value) -> Result<Reading, ParseError> {
    let stable = payload
        .get("stable")
        .or_else(|| payload.get("Stable"))
        .and_then(Value::as_bool)
        .unwrap_or(true);

    let value = scan_named_fields(payload)
        .or_else(|| payload.get("d").and_then(scan_named_fields))
        .or_else(|| first_plausible_number(payload))
        .ok_or(ParseError::NoWeight)?;

    Ok(Reading { value, stable })
}

fn scan_named_fields(v: &Value) -> Option<Grams> {
    let obj = v.as_object()?;
    CONTROLLER_WEIGHT_FIELDS
        .iter()
        .filter_map(|f| obj.get(*f))
        .find_map(numeric_value)
}

fn numeric_value(v: &Value) -> Option<Grams> {
    match v {
        Value::Number(n) => n.as_f64().and_then(Grams::from_kg),
        Value::String(s) => Grams::parse_kg(&s.trim().replace(',', ".")).ok(),
        _ => None,
    }
}

fn first_plausible_number(v: &Value) -> Option<Grams> {
    match v {
        Value::Object(map) => map.values().find_map(first_plausible_number),
        Value::Array(items) => items.iter().find_map(first_plausible_number),
        Value::Number(_) => numeric_value(v).filter(|g| *g > FALLBACK_MIN && *g < FALLBACK_MAX),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Scale channel
// ---------------------------------------------------------------------------

/// Parse one scale line.
///
/// Grammar: optional prefix tokens, one numeric token (decimal comma
/// accepted), optional unit (`kg` default, `g`), optional stability marker.
/// An explicit unstable marker wins; otherwise the reading is stable.
pub fn parse_scale_line(line: &str) -> Result<Reading, ParseError> {
    let (number, rest) = find_numeric_token(line).ok_or(ParseError::NoNumericToken)?;
    let normalized = number.replace(',', ".");
    let parsed = Grams::parse_kg(&normalized)?;

    let value = if unit_is_grams(rest) {
        grams_from_gram_count(parsed)
    } else {
        parsed
    };

    Ok(Reading {
        value,
        stable: explicit_stability(line).unwrap_or(true),
    })
}

/// Locate the first `[sign]digits[(.|,)digits]` run. Returns the token and
/// the text after it.
fn find_numeric_token(line: &str) -> Option<(String, &str)> {
    let bytes = line.as_bytes();
    let start = bytes.iter().position(|b| b.is_ascii_digit())?;

    let mut end = start;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end + 1 < bytes.len()
        && (bytes[end] == b'.' || bytes[end] == b',')
        && bytes[end + 1].is_ascii_digit()
    {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }

    let negative = start > 0 && bytes[start - 1] == b'-';
    let mut token = String::with_capacity(end - start + 1);
    if negative {
        token.push('-');
    }
    token.push_str(&line[start..end]);
    Some((token, &line[end..]))
}

fn unit_is_grams(rest: &str) -> bool {
    let unit = rest.trim_start().to_ascii_lowercase();
    if unit.starts_with("kg") {
        return false;
    }
    unit.starts_with('g') && !unit[1..].starts_with(|c: char| c.is_ascii_alphabetic())
}

/// A value parsed as kilograms that was actually a gram count: divide by
/// 1000, rounding half away from zero.
fn grams_from_gram_count(parsed: Grams) -> Grams {
    let raw = parsed.raw();
    let whole = raw / 1000;
    let rem = raw % 1000;
    if rem.abs() >= 500 {
        Grams::new(whole + raw.signum())
    } else {
        Grams::new(whole)
    }
}

/// `Some(true)`/`Some(false)` for an explicit marker, `None` when the line
/// carries none. Unstable wins when both appear.
fn explicit_stability(line: &str) -> Option<bool> {
    let tokens: Vec<String> = line
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_uppercase())
        .collect();

    if tokens.iter().any(|t| UNSTABLE_MARKERS.contains(&t.as_str())) {
        Some(false)
    } else if tokens.iter().any(|t| STABLE_MARKERS.contains(&t.as_str())) {
        Some(true)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn g(raw: i64) -> Grams {
        Grams::new(raw)
    }

    // --- controller ---------------------------------------------------------

    #[test]
    fn controller_named_field_order_wins() {
        let r = parse_controller_payload(&json!({"value": 3.0, "weight": 12.5})).unwrap();
        assert_eq!(r.value, g(12_500));
        let r = parse_controller_payload(&json!({"Data": "11,75"})).unwrap();
        assert_eq!(r.value, g(11_750));
    }

    #[test]
    fn controller_nested_under_d() {
        let r = parse_controller_payload(&json!({"d": {"w": 12.04}, "ts": 1700000000})).unwrap();
        assert_eq!(r.value, g(12_040));
    }

    #[test]
    fn controller_fallback_takes_first_plausible_number() {
        let payload = json!({"seq": 0, "gross": 12.3, "ts": 1700000000});
        let r = parse_controller_payload(&payload).unwrap();
        assert_eq!(r.value, g(12_300));

        let out_of_range = json!({"ts": 1700000000, "count": 0});
        assert_eq!(
            parse_controller_payload(&out_of_range),
            Err(ParseError::NoWeight)
        );
    }

    #[test]
    fn controller_fallback_follows_document_order() {
        // Alphabetical order would pick "gross" first.
        let r = decode_controller_frame(r#"{"ts": 5.0, "gross": 12.3}"#, "t")
            .unwrap()
            .unwrap();
        assert_eq!(r.value, g(5_000));

        let nested = r#"{"zone": {"b": 7.5, "a": 9.0}, "avg": 3.0}"#;
        let r = decode_controller_frame(nested, "t").unwrap().unwrap();
        assert_eq!(r.value, g(7_500));
    }

    #[test]
    fn controller_stability_flag_defaults_true() {
        let r = parse_controller_payload(&json!({"weight": 1.0})).unwrap();
        assert!(r.stable);
        let r = parse_controller_payload(&json!({"weight": 1.0, "stable": false})).unwrap();
        assert!(!r.stable);
    }

    #[test]
    fn controller_envelope_filters_topic() {
        let ours = r#"{"topic":"plc/weight","payload":{"weight":12.1}}"#;
        let theirs = r#"{"topic":"plc/alarm","payload":{"weight":99}}"#;
        let stringly = r#"{"topic":"plc/weight","payload":"{\"w\": 12.2}"}"#;

        assert_eq!(
            decode_controller_frame(ours, "plc/weight").unwrap().unwrap().value,
            g(12_100)
        );
        assert_eq!(decode_controller_frame(theirs, "plc/weight").unwrap(), None);
        assert_eq!(
            decode_controller_frame(stringly, "plc/weight").unwrap().unwrap().value,
            g(12_200)
        );
    }

    #[test]
    fn controller_garbage_is_parse_error() {
        assert!(matches!(
            decode_controller_frame("not json", "plc/weight"),
            Err(ParseError::InvalidJson(_))
        ));
    }

    // --- scale --------------------------------------------------------------

    #[test]
    fn scale_plain_kg_line() {
        let r = parse_scale_line("12.345 kg").unwrap();
        assert_eq!(r, Reading { value: g(12_345), stable: true });
    }

    #[test]
    fn scale_prefix_tokens_and_decimal_comma() {
        let r = parse_scale_line("ST,GS,+0012,040kg").unwrap();
        assert_eq!(r.value, g(12_040));
        assert!(r.stable);
    }

    #[test]
    fn scale_gram_unit_is_converted() {
        assert_eq!(parse_scale_line("12040 g").unwrap().value, g(12_040));
        assert_eq!(parse_scale_line("W: 1234.5g ST").unwrap().value, g(1_235));
    }

    #[test]
    fn scale_unstable_markers() {
        assert!(!parse_scale_line("US,GS, 12.30 kg").unwrap().stable);
        assert!(!parse_scale_line("12.30 kg unstable").unwrap().stable);
        assert!(!parse_scale_line("U 12.30").unwrap().stable);
        assert!(parse_scale_line("S 12.30").unwrap().stable);
        assert!(parse_scale_line("12.30").unwrap().stable);
        assert_eq!(explicit_stability("OK 12.30 kg"), Some(true));
        assert_eq!(explicit_stability("12.30 kg"), None);
    }

    #[test]
    fn scale_negative_values_keep_sign() {
        assert_eq!(parse_scale_line("GS -0.250 kg").unwrap().value, g(-250));
    }

    #[test]
    fn scale_malformed_lines_error() {
        assert_eq!(parse_scale_line(""), Err(ParseError::NoNumericToken));
        assert_eq!(parse_scale_line("ST,GS,  kg"), Err(ParseError::NoNumericToken));
    }

    #[test]
    fn controller_drops_log_louder_than_scale_noise() {
        let controller = FrameDecoder::Controller { topic: "t".to_string() };
        assert_eq!(controller.drop_level(), tracing::Level::DEBUG);
        assert_eq!(FrameDecoder::Scale.drop_level(), tracing::Level::TRACE);
    }

    #[test]
    fn decoder_dispatches_by_channel() {
        let scale = FrameDecoder::Scale;
        assert_eq!(scale.decode("5 kg").unwrap().unwrap().value, g(5_000));

        let ctrl = FrameDecoder::Controller {
            topic: "t".to_string(),
        };
        assert_eq!(ctrl.decode(r#"{"w": 5}"#).unwrap().unwrap().value, g(5_000));
    }
}
