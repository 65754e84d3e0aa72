//! Evaluation results (`T?` and `R?`).
//!
//! ```text
//! start<result>#<match>#<instances>[#<index>#<x>#<y>#<rot>#<quality>]stop
//! ```
//!
//! The five trailing fields are only present on `PASS`. The result field may
//! carry a leading group digit (`0PASS`).

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::ProtocolError;

static ENVELOPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\s*start(.*)stop\s*$").expect("valid regex"));

static VERDICT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d?(PASS|FAIL)$").expect("valid regex"));

const FAIL_FIELDS: usize = 3;
const PASS_FIELDS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

/// Position and quality of the matched instance. Only reported on `PASS`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub index: u32,
    pub x: i32,
    pub y: i32,
    pub rotation: f64,
    pub quality: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationResult {
    pub verdict: Verdict,
    pub match_score: f64,
    pub instances: u32,
    pub detection: Option<Detection>,
    /// Set when the device stayed busy for every attempt and no real
    /// evaluation was obtained.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub forced: bool,
}

impl EvaluationResult {
    /// Terminal `FAIL` used when every attempt was rejected as busy.
    pub fn forced_fail() -> Self {
        EvaluationResult {
            verdict: Verdict::Fail,
            match_score: 0.0,
            instances: 0,
            detection: None,
            forced: true,
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    /// Offset of the detected position from the centre of a
    /// `width` x `height` image, as `(dx, dy)` in pixels.
    pub fn offset_from_center(&self, width: u32, height: u32) -> Option<(f64, f64)> {
        self.detection.as_ref().map(|d| {
            (
                f64::from(width) / 2.0 - f64::from(d.x),
                f64::from(height) / 2.0 - f64::from(d.y),
            )
        })
    }
}

fn field<T: FromStr>(fields: &[&str], idx: usize, name: &str) -> Result<T, ProtocolError> {
    let raw = fields[idx];
    raw.parse().map_err(|_| {
        ProtocolError::malformed(format!("evaluation field `{}` has invalid value {:?}", name, raw))
    })
}

/// Decode an evaluation payload.
pub fn decode_evaluation(payload: &[u8]) -> Result<EvaluationResult, ProtocolError> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| ProtocolError::malformed("evaluation payload is not UTF-8"))?;
    let body = ENVELOPE
        .captures(text)
        .and_then(|c| c.get(1))
        .ok_or_else(|| ProtocolError::malformed(format!("missing start/stop markers in {:?}", text)))?
        .as_str();

    let fields: Vec<&str> = body.split('#').map(str::trim).collect();
    let verdict = match VERDICT.captures(fields[0]).and_then(|c| c.get(1)) {
        Some(m) if m.as_str() == "PASS" => Verdict::Pass,
        Some(_) => Verdict::Fail,
        None => {
            return Err(ProtocolError::malformed(format!(
                "unknown evaluation result {:?}",
                fields[0]
            )));
        }
    };

    let expected = match verdict {
        Verdict::Pass => PASS_FIELDS,
        Verdict::Fail => FAIL_FIELDS,
    };
    if fields.len() != expected {
        return Err(ProtocolError::malformed(format!(
            "{:?} result has {} fields, expected {}",
            verdict,
            fields.len(),
            expected
        )));
    }

    let detection = match verdict {
        Verdict::Pass => Some(Detection {
            index: field(&fields, 3, "index")?,
            x: field(&fields, 4, "x")?,
            y: field(&fields, 5, "y")?,
            rotation: field(&fields, 6, "rot")?,
            quality: field(&fields, 7, "quality")?,
        }),
        Verdict::Fail => None,
    };

    Ok(EvaluationResult {
        verdict,
        match_score: field(&fields, 1, "match")?,
        instances: field(&fields, 2, "instances")?,
        detection,
        forced: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_pass() {
        let result = decode_evaluation(b"startPASS#0.95#1#3#120#240#1.5#0.98stop").unwrap();
        assert_eq!(result.verdict, Verdict::Pass);
        assert_eq!(result.match_score, 0.95);
        assert_eq!(result.instances, 1);
        assert_eq!(
            result.detection,
            Some(Detection {
                index: 3,
                x: 120,
                y: 240,
                rotation: 1.5,
                quality: 0.98,
            })
        );
        assert!(!result.forced);
    }

    #[test]
    fn test_decode_fail() {
        let result = decode_evaluation(b"startFAIL#0.10#0stop").unwrap();
        assert_eq!(result.verdict, Verdict::Fail);
        assert_eq!(result.match_score, 0.10);
        assert_eq!(result.instances, 0);
        assert_eq!(result.detection, None);
    }

    #[test]
    fn test_decode_tolerates_spacing_and_group_digit() {
        let result = decode_evaluation(b"start 0PASS#0.95#1#3#120#240#1.5#0.98 stop").unwrap();
        assert!(result.passed());
        let result = decode_evaluation(b"start FAIL#0.10#0 stop").unwrap();
        assert!(!result.passed());
    }

    #[test]
    fn test_field_count_must_match_verdict() {
        for payload in [
            &b"startPASS#0.95#1stop"[..],
            &b"startPASS#0.95#1#3#120#240#1.5stop"[..],
            &b"startFAIL#0.10#0#3#120#240#1.5#0.98stop"[..],
            &b"startFAIL#0.10stop"[..],
        ] {
            assert!(matches!(
                decode_evaluation(payload),
                Err(ProtocolError::MalformedResponse(_))
            ));
        }
    }

    #[test]
    fn test_rejects_bad_envelope_and_values() {
        for payload in [
            &b"PASS#0.95#1#3#120#240#1.5#0.98"[..],
            &b"startMAYBE#0.5#1stop"[..],
            &b"startFAIL#high#0stop"[..],
            &b"startPASS#0.95#1#3#x#240#1.5#0.98stop"[..],
            &b"!"[..],
        ] {
            assert!(matches!(
                decode_evaluation(payload),
                Err(ProtocolError::MalformedResponse(_))
            ));
        }
    }

    #[test]
    fn test_offset_from_center() {
        let result = decode_evaluation(b"startPASS#0.95#1#3#120#240#1.5#0.98stop").unwrap();
        assert_eq!(result.offset_from_center(640, 480), Some((200.0, 0.0)));
        assert_eq!(EvaluationResult::forced_fail().offset_from_center(640, 480), None);
    }
}
