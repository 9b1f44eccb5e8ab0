use std::fmt;

use serde::Serialize;

/// A program fragment submitted for evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeUnit {
    label: String,
    source: String,
}

impl CodeUnit {
    pub fn new(label: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            source: source.into(),
        }
    }

    /// Name used in logs, e.g. a file path or `unit#2`.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl From<&str> for CodeUnit {
    fn from(source: &str) -> Self {
        Self::new("<inline>", source)
    }
}

impl From<String> for CodeUnit {
    fn from(source: String) -> Self {
        Self::new("<inline>", source)
    }
}

/// A value produced by the foreign runtime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Int(i64),
    Float(f64),
}

impl Value {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Int(v) => v as f64,
            Value::Float(v) => v,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => f.write_str(&format_float(v)),
        }
    }
}

/// Print a float the way the runtime's `println` does: shortest round-trip
/// digits, always with a fractional part, `Inf`/`NaN` spelled out.
///
/// Magnitudes below `1e-4` or from `1e6` up use an exponent, as in `1.0e6`
/// and `2.5e-7`.
pub fn format_float(v: f64) -> String {
    if v.is_nan() {
        return "NaN".into();
    }
    if v.is_infinite() {
        return if v > 0.0 { "Inf".into() } else { "-Inf".into() };
    }

    let magnitude = v.abs();
    if magnitude != 0.0 && !(1e-4..1e6).contains(&magnitude) {
        let scientific = format!("{v:e}");
        return match scientific.split_once('e') {
            Some((mantissa, exponent)) if !mantissa.contains('.') => {
                format!("{mantissa}.0e{exponent}")
            }
            _ => scientific,
        };
    }
    format!("{v:?}")
}

/// Result of evaluating one code unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EvalOutcome {
    Success {
        value: Option<Value>,
        output: Vec<String>,
    },
    Failure {
        diagnostic: String,
        output: Vec<String>,
    },
}

impl EvalOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, EvalOutcome::Success { .. })
    }

    pub fn value(&self) -> Option<Value> {
        match self {
            EvalOutcome::Success { value, .. } => *value,
            EvalOutcome::Failure { .. } => None,
        }
    }

    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            EvalOutcome::Success { .. } => None,
            EvalOutcome::Failure { diagnostic, .. } => Some(diagnostic),
        }
    }

    /// Lines printed by the unit, including those printed before a failure.
    pub fn output(&self) -> &[String] {
        match self {
            EvalOutcome::Success { output, .. } | EvalOutcome::Failure { output, .. } => output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats_print_like_the_runtime() {
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Float(2f64.sqrt()).to_string(), "1.4142135623730951");
        assert_eq!(Value::Float(f64::INFINITY).to_string(), "Inf");
        assert_eq!(Value::Float(f64::NEG_INFINITY).to_string(), "-Inf");
        assert_eq!(Value::Float(f64::NAN).to_string(), "NaN");
        assert_eq!(Value::Int(-7).to_string(), "-7");
    }

    #[test]
    fn exponent_forms_keep_a_fractional_mantissa() {
        assert_eq!(format_float(1e300), "1.0e300");
        assert_eq!(format_float(1e-7), "1.0e-7");
        assert_eq!(format_float(1.5e300), "1.5e300");
        assert_eq!(format_float(-2.5e-10), "-2.5e-10");
        assert_eq!(format_float(1e6), "1.0e6");
        assert_eq!(format_float(1234567.0), "1.234567e6");
        assert_eq!(format_float(1e-5), "1.0e-5");
    }

    #[test]
    fn moderate_magnitudes_print_plainly() {
        assert_eq!(format_float(123456.7), "123456.7");
        assert_eq!(format_float(100000.0), "100000.0");
        assert_eq!(format_float(0.0001), "0.0001");
        assert_eq!(format_float(0.0), "0.0");
        assert_eq!(format_float(-0.0), "-0.0");
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let outcome = EvalOutcome::Success {
            value: Some(Value::Int(2)),
            output: vec![],
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "status": "success",
                "value": { "type": "int", "value": 2 },
                "output": []
            })
        );

        let failure = EvalOutcome::Failure {
            diagnostic: "DivideError: integer division error".into(),
            output: vec!["1".into()],
        };
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["output"][0], "1");
    }

    #[test]
    fn code_unit_from_str_uses_inline_label() {
        let unit = CodeUnit::from("1+1");
        assert_eq!(unit.label(), "<inline>");
        assert_eq!(unit.source(), "1+1");
    }
}
