//! Harness report wire contract
//!
//! A harness prints exactly one line holding a JSON object:
//!
//! ```text
//! {"protocol": 1, "test_results": [...], "fatal_error": null}
//! ```
//!
//! `protocol` and `fatal_error` may be omitted. Every other stdout line is
//! program output and is handed back untouched.

use serde::{Deserialize, Serialize};

use crate::core::TestResult;

pub const PROTOCOL_VERSION: u32 = 1;

/// The single report object a harness emits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessReport {
    #[serde(default = "default_protocol")]
    pub protocol: u32,
    pub test_results: Vec<TestResult>,
    /// Set when the harness could not load the user code at all
    #[serde(default)]
    pub fatal_error: Option<String>,
}

fn default_protocol() -> u32 {
    PROTOCOL_VERSION
}

impl HarnessReport {
    pub fn new(test_results: Vec<TestResult>) -> Self {
        Self {
            protocol: PROTOCOL_VERSION,
            test_results,
            fatal_error: None,
        }
    }

    /// Serialize to the single-line wire form
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Captured output split into the report and everything else
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedOutput {
    pub test_results: Vec<TestResult>,
    pub output: String,
    pub fatal_error: Option<String>,
    /// Whether a report line was found
    pub matched: bool,
}

/// Find the first report line in `text`
///
/// A miss is not an error: the whole text comes back as `output` with an
/// empty result list.
pub fn parse_output(text: &str) -> ParsedOutput {
    let lines: Vec<&str> = text.lines().collect();

    for (index, line) in lines.iter().enumerate() {
        let Some(report) = parse_report_line(line) else {
            continue;
        };

        let output = lines
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, l)| *l)
            .collect::<Vec<_>>()
            .join("\n");

        return ParsedOutput {
            test_results: report.test_results,
            output,
            fatal_error: report.fatal_error,
            matched: true,
        };
    }

    ParsedOutput {
        output: text.to_string(),
        ..Default::default()
    }
}

fn parse_report_line(line: &str) -> Option<HarnessReport> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }

    let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    if !value.as_object()?.contains_key("test_results") {
        return None;
    }

    match serde_json::from_value::<HarnessReport>(value) {
        Ok(report) if report.protocol == PROTOCOL_VERSION => Some(report),
        Ok(report) => {
            tracing::warn!(
                "Ignoring harness report with unknown protocol version {}",
                report.protocol
            );
            None
        }
        Err(e) => {
            tracing::debug!("Malformed harness report line: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_results() -> Vec<TestResult> {
        vec![
            TestResult::evaluate("first", "4", "4", 0.002, None),
            TestResult::evaluate("second", "5", "6", 0.001, None),
            TestResult::evaluate(
                "third",
                "",
                "1",
                0.0,
                Some("ZeroDivisionError: division by zero".into()),
            ),
        ]
    }

    #[test]
    fn test_round_trip_through_parser() {
        let report = HarnessReport::new(sample_results());
        let line = report.to_line().unwrap();
        assert!(!line.contains('\n'));

        let parsed = parse_output(&format!("{}\n", line));
        assert!(parsed.matched);
        assert_eq!(parsed.test_results, sample_results());
        assert_eq!(parsed.output, "");
        assert!(parsed.fatal_error.is_none());
    }

    #[test]
    fn test_remaining_lines_keep_their_order() {
        let line = HarnessReport::new(sample_results()).to_line().unwrap();
        let text = format!("debug one\n{}\ndebug two\n", line);

        let parsed = parse_output(&text);
        assert!(parsed.matched);
        assert_eq!(parsed.output, "debug one\ndebug two");
        assert_eq!(parsed.test_results.len(), 3);
    }

    #[test]
    fn test_bare_report_without_version_is_accepted() {
        let text = r#"{"test_results": [{"test_name": "a", "passed": true, "actual_output": "1", "expected_output": "1", "execution_time": 0.1}]}"#;
        let parsed = parse_output(text);
        assert!(parsed.matched);
        assert_eq!(parsed.test_results[0].test_name, "a");
        assert!(parsed.test_results[0].error_message.is_none());
    }

    #[test]
    fn test_first_report_line_wins() {
        let first = HarnessReport::new(vec![TestResult::evaluate("x", "1", "1", 0.0, None)])
            .to_line()
            .unwrap();
        let second = HarnessReport::new(Vec::new()).to_line().unwrap();
        let parsed = parse_output(&format!("{}\n{}", first, second));
        assert_eq!(parsed.test_results.len(), 1);
        assert_eq!(parsed.output, second);
    }

    #[test]
    fn test_no_report_returns_full_text() {
        let text = "4\n{\"not\": \"a report\"}\n{broken json";
        let parsed = parse_output(text);
        assert!(!parsed.matched);
        assert!(parsed.test_results.is_empty());
        assert_eq!(parsed.output, text);
    }

    #[test]
    fn test_unknown_protocol_is_a_miss() {
        let text = r#"{"protocol": 99, "test_results": []}"#;
        assert!(!parse_output(text).matched);
    }

    #[test]
    fn test_fatal_error_is_carried() {
        let text = r#"{"protocol": 1, "test_results": [], "fatal_error": "SyntaxError: invalid syntax"}"#;
        let parsed = parse_output(text);
        assert!(parsed.matched);
        assert_eq!(
            parsed.fatal_error.as_deref(),
            Some("SyntaxError: invalid syntax")
        );
    }
}
