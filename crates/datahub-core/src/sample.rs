//! Timestamped data samples and their textual forms.
//!
//! A [`Sample`] is an immutable pair of timestamp and [`Value`]. Samples are
//! stamped during ingress normalization, before they are shared; once wrapped
//! in an `Rc` there is no way to mutate them.

use crate::error::{HubError, Result};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// Sentinel timestamp: "stamp with the wall clock at ingress".
///
/// NaN never compares equal to a real timestamp, so zero (a legitimate epoch
/// instant) stays usable as data.
pub const NOW: f64 = f64::NAN;

/// Wall clock in seconds since the Unix epoch.
pub fn wall_clock() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 * 1e-6
}

/// The five sample types. The discriminants are wire-stable: they appear as
/// the `type` field of snapshot output and must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleType {
    Trigger,
    Boolean,
    Numeric,
    String,
    Json,
}

impl SampleType {
    /// The numeric tag used in snapshot output (Trigger=0 … Json=4).
    pub fn wire_tag(self) -> u32 {
        match self {
            SampleType::Trigger => 0,
            SampleType::Boolean => 1,
            SampleType::Numeric => 2,
            SampleType::String => 3,
            SampleType::Json => 4,
        }
    }

    /// Inverse of [`wire_tag`](Self::wire_tag).
    pub fn from_wire_tag(tag: u32) -> Result<Self> {
        match tag {
            0 => Ok(SampleType::Trigger),
            1 => Ok(SampleType::Boolean),
            2 => Ok(SampleType::Numeric),
            3 => Ok(SampleType::String),
            4 => Ok(SampleType::Json),
            other => Err(HubError::BadParameter(format!("unknown type tag {other}"))),
        }
    }

    /// Short name as used by the CLI and hub-scripts.
    pub fn name(self) -> &'static str {
        match self {
            SampleType::Trigger => "trigger",
            SampleType::Boolean => "bool",
            SampleType::Numeric => "num",
            SampleType::String => "str",
            SampleType::Json => "json",
        }
    }

    /// Parse a short name (`trigger|bool|num|str|json`).
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "trigger" => Ok(SampleType::Trigger),
            "bool" | "boolean" => Ok(SampleType::Boolean),
            "num" | "numeric" => Ok(SampleType::Numeric),
            "str" | "string" => Ok(SampleType::String),
            "json" => Ok(SampleType::Json),
            other => Err(HubError::BadParameter(format!("unknown type name {other:?}"))),
        }
    }
}

/// A sample's payload.
///
/// JSON payloads carry raw text assumed syntactically valid at ingress; the
/// hub never re-parses them except for extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Trigger,
    Boolean(bool),
    Numeric(f64),
    String(String),
    Json(String),
}

impl Value {
    pub fn sample_type(&self) -> SampleType {
        match self {
            Value::Trigger => SampleType::Trigger,
            Value::Boolean(_) => SampleType::Boolean,
            Value::Numeric(_) => SampleType::Numeric,
            Value::String(_) => SampleType::String,
            Value::Json(_) => SampleType::Json,
        }
    }

    /// Byte length of the heap payload (zero for scalar kinds). Used for the
    /// maximum-sample-size gate.
    pub fn payload_len(&self) -> usize {
        match self {
            Value::String(s) | Value::Json(s) => s.len(),
            _ => 0,
        }
    }

    /// Printable form: bare text, no quoting.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Trigger => String::new(),
            Value::Boolean(b) => b.to_string(),
            Value::Numeric(n) => format_numeric(*n),
            Value::String(s) | Value::Json(s) => s.clone(),
        }
    }

    /// JSON text form. Strings are quoted and escaped, JSON payloads are
    /// inserted verbatim, a trigger renders as `null`.
    pub fn to_json_text(&self) -> String {
        match self {
            Value::Trigger => "null".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Numeric(n) => format_numeric(*n),
            Value::String(s) => {
                let mut out = String::with_capacity(s.len() + 2);
                escape_json_string(s, &mut out);
                out
            }
            Value::Json(s) => s.clone(),
        }
    }
}

/// An immutable timestamped value.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    timestamp: f64,
    value: Value,
}

impl Sample {
    pub fn new(timestamp: f64, value: Value) -> Self {
        Self { timestamp, value }
    }

    pub fn trigger(timestamp: f64) -> Self {
        Self::new(timestamp, Value::Trigger)
    }

    pub fn boolean(timestamp: f64, v: bool) -> Self {
        Self::new(timestamp, Value::Boolean(v))
    }

    pub fn numeric(timestamp: f64, v: f64) -> Self {
        Self::new(timestamp, Value::Numeric(v))
    }

    pub fn string(timestamp: f64, v: impl Into<String>) -> Self {
        Self::new(timestamp, Value::String(v.into()))
    }

    pub fn json(timestamp: f64, v: impl Into<String>) -> Self {
        Self::new(timestamp, Value::Json(v.into()))
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn sample_type(&self) -> SampleType {
        self.value.sample_type()
    }

    /// Ingress normalization: replace the [`NOW`] sentinel with the wall
    /// clock. Consumes and returns the sample, so stamping cannot happen
    /// after the sample has been shared.
    pub fn stamped(mut self) -> Self {
        if self.timestamp.is_nan() {
            self.timestamp = wall_clock();
        }
        self
    }

    /// A copy of this sample carrying a different value but the same
    /// timestamp. Used by override substitution and JSON extraction, which
    /// both preserve provenance.
    pub fn with_value(&self, value: Value) -> Sample {
        Sample::new(self.timestamp, value)
    }
}

/// Shared, reference-counted sample. Single-threaded by contract, so a plain
/// `Rc` count suffices.
pub type SharedSample = Rc<Sample>;

/// Canonical numeric text: shortest round-trip form; NaN and infinities
/// render as `null` so the output stays valid JSON.
pub fn format_numeric(v: f64) -> String {
    if v.is_nan() || v.is_infinite() {
        return "null".to_string();
    }
    // -0.0 prints as "-0"; fold it to "0"
    let v = if v == 0.0 { 0.0 } else { v };
    format!("{v}")
}

/// Append `s` as a double-quoted JSON string to `out`.
///
/// Escape rules: characters ≤ U+001F, `"`, and `\` are escaped; `\b \f \n
/// \r \t \" \\` use their short forms; any other control character emits
/// `\u00XX`.
pub fn escape_json_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) <= 0x1F => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Reverse of [`escape_json_string`]: strip the outer quotes and unescape
/// `\X` pairs byte-for-byte.
///
/// `\uXXXX` is NOT expanded: `\u0041` becomes `u0041`. Adequate for
/// round-tripping this hub's own emissions; a known limitation for foreign
/// input.
pub fn json_to_string(json: &str) -> Result<String> {
    let inner = json
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(|| HubError::FormatError("string is not quoted".to_string()))?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('b') => out.push('\u{0008}'),
            Some('f') => out.push('\u{000C}'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {
                return Err(HubError::FormatError(
                    "dangling escape at end of string".to_string(),
                ));
            }
        }
    }
    Ok(out)
}

/// One step of an extraction path: object member or array index.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSeg<'a> {
    Member(&'a str),
    Index(usize),
}

/// Parse a dotted/indexed extraction spec such as `a.b[3].c` or `[0].name`.
fn parse_extraction_spec(spec: &str) -> Result<Vec<PathSeg<'_>>> {
    if spec.is_empty() {
        return Err(HubError::FormatError("empty extraction spec".to_string()));
    }
    let mut segs = Vec::new();
    for (i, part) in spec.split('.').enumerate() {
        let mut rest = part;
        // Leading member name, if any
        let name_end = rest.find('[').unwrap_or(rest.len());
        let name = &rest[..name_end];
        rest = &rest[name_end..];
        if name.is_empty() {
            // A bare index group is only valid at the very start ("[0].x")
            if !(i == 0 && rest.starts_with('[')) {
                return Err(HubError::FormatError(format!(
                    "malformed extraction spec {spec:?}"
                )));
            }
        } else {
            segs.push(PathSeg::Member(name));
        }
        while let Some(stripped) = rest.strip_prefix('[') {
            let close = stripped.find(']').ok_or_else(|| {
                HubError::FormatError(format!("unterminated index in {spec:?}"))
            })?;
            let idx: usize = stripped[..close].parse().map_err(|_| {
                HubError::FormatError(format!("bad index in extraction spec {spec:?}"))
            })?;
            segs.push(PathSeg::Index(idx));
            rest = &stripped[close + 1..];
        }
        if !rest.is_empty() {
            return Err(HubError::FormatError(format!(
                "malformed extraction spec {spec:?}"
            )));
        }
    }
    Ok(segs)
}

/// Apply a dotted/indexed extraction to a JSON sample.
///
/// The returned sample carries the *original* sample's timestamp, preserving
/// provenance. Scalars map to their natural sample types; objects and arrays
/// stay JSON text; `null` becomes a trigger.
pub fn extract_json(sample: &Sample, spec: &str) -> Result<Sample> {
    let Value::Json(text) = sample.value() else {
        return Err(HubError::FormatError(
            "extraction applies to json samples only".to_string(),
        ));
    };
    let parsed: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| HubError::FormatError(format!("malformed json: {e}")))?;

    let mut node = &parsed;
    for seg in parse_extraction_spec(spec)? {
        node = match seg {
            PathSeg::Member(name) => node
                .get(name)
                .ok_or_else(|| HubError::NotFound(format!("no member {name:?} in json")))?,
            PathSeg::Index(i) => node
                .get(i)
                .ok_or_else(|| HubError::NotFound(format!("no index [{i}] in json")))?,
        };
    }

    let value = match node {
        serde_json::Value::Null => Value::Trigger,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => Value::Numeric(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::String(s.clone()),
        other => Value::Json(other.to_string()),
    };
    Ok(sample.with_value(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tags_are_stable() {
        assert_eq!(SampleType::Trigger.wire_tag(), 0);
        assert_eq!(SampleType::Boolean.wire_tag(), 1);
        assert_eq!(SampleType::Numeric.wire_tag(), 2);
        assert_eq!(SampleType::String.wire_tag(), 3);
        assert_eq!(SampleType::Json.wire_tag(), 4);
        for tag in 0..5 {
            assert_eq!(SampleType::from_wire_tag(tag).unwrap().wire_tag(), tag);
        }
        assert!(matches!(
            SampleType::from_wire_tag(5),
            Err(HubError::BadParameter(_))
        ));
    }

    #[test]
    fn test_stamping_replaces_only_the_sentinel() {
        let s = Sample::numeric(NOW, 1.0).stamped();
        assert!(s.timestamp() > 1.0e9, "sentinel should become wall clock");

        let s = Sample::numeric(0.0, 1.0).stamped();
        assert_eq!(s.timestamp(), 0.0, "epoch zero is real data, not the sentinel");
    }

    #[test]
    fn test_escape_short_forms_and_control_chars() {
        let mut out = String::new();
        escape_json_string("a\"b\\c\n\t\u{0001}", &mut out);
        assert_eq!(out, "\"a\\\"b\\\\c\\n\\t\\u0001\"");
    }

    #[test]
    fn test_escaped_strings_parse_as_json() {
        let mut out = String::new();
        escape_json_string("line1\nline2 \u{0008}\u{000C} \"q\"", &mut out);
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed, serde_json::json!("line1\nline2 \u{0008}\u{000C} \"q\""));
    }

    #[test]
    fn test_json_to_string_roundtrips_own_emissions() {
        let original = "tabs\tand\nnewlines and \"quotes\" and \\slashes";
        let mut escaped = String::new();
        escape_json_string(original, &mut escaped);
        assert_eq!(json_to_string(&escaped).unwrap(), original);
    }

    #[test]
    fn test_json_to_string_does_not_expand_unicode_escapes() {
        // Documented limitation: \uXXXX unescapes byte-for-byte.
        assert_eq!(json_to_string("\"\\u0041\"").unwrap(), "u0041");
    }

    #[test]
    fn test_json_to_string_rejects_unquoted() {
        assert!(matches!(
            json_to_string("bare"),
            Err(HubError::FormatError(_))
        ));
    }

    #[test]
    fn test_json_text_forms() {
        assert_eq!(Value::Trigger.to_json_text(), "null");
        assert_eq!(Value::Boolean(true).to_json_text(), "true");
        assert_eq!(Value::Numeric(42.0).to_json_text(), "42");
        assert_eq!(Value::Numeric(-0.0).to_json_text(), "0");
        assert_eq!(Value::Numeric(f64::NAN).to_json_text(), "null");
        assert_eq!(Value::String("hi".into()).to_json_text(), "\"hi\"");
        assert_eq!(Value::Json("{\"a\":1}".into()).to_json_text(), "{\"a\":1}");
    }

    #[test]
    fn test_json_roundtrip_within_emitter_domain() {
        // convert_to_json |> parse |> create yields an equal sample.
        let cases = vec![
            Value::Trigger,
            Value::Boolean(false),
            Value::Numeric(3.25),
            Value::String("edge \"case\"\n".into()),
        ];
        for value in cases {
            let text = value.to_json_text();
            let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
            let back = match parsed {
                serde_json::Value::Null => Value::Trigger,
                serde_json::Value::Bool(b) => Value::Boolean(b),
                serde_json::Value::Number(n) => Value::Numeric(n.as_f64().unwrap()),
                serde_json::Value::String(s) => Value::String(s),
                other => Value::Json(other.to_string()),
            };
            assert_eq!(back, value);
        }
    }

    #[test]
    fn test_extract_member_path() {
        let s = Sample::json(12.5, r#"{"a":{"b":[10,20,{"c":"deep"}]}}"#);
        let out = extract_json(&s, "a.b[2].c").unwrap();
        assert_eq!(out.timestamp(), 12.5, "extraction preserves provenance");
        assert_eq!(out.value(), &Value::String("deep".into()));
    }

    #[test]
    fn test_extract_leading_index() {
        let s = Sample::json(1.0, r#"[{"x":true},{"x":false}]"#);
        let out = extract_json(&s, "[1].x").unwrap();
        assert_eq!(out.value(), &Value::Boolean(false));
    }

    #[test]
    fn test_extract_structured_node_stays_json() {
        let s = Sample::json(1.0, r#"{"a":{"b":1}}"#);
        let out = extract_json(&s, "a").unwrap();
        assert_eq!(out.sample_type(), SampleType::Json);
    }

    #[test]
    fn test_extract_errors() {
        let s = Sample::json(1.0, r#"{"a":1}"#);
        assert!(matches!(
            extract_json(&s, "missing"),
            Err(HubError::NotFound(_))
        ));
        assert!(matches!(
            extract_json(&s, "a[b]"),
            Err(HubError::FormatError(_))
        ));
        let bad = Sample::json(1.0, "{not json");
        assert!(matches!(
            extract_json(&bad, "a"),
            Err(HubError::FormatError(_))
        ));
    }
}
