use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::ExecutionStatus;
use super::violation::SecurityViolation;

/// Outcome of a single test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_name: String,
    pub passed: bool,
    pub actual_output: String,
    pub expected_output: String,
    /// Seconds spent in this case
    pub execution_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TestResult {
    /// Build a result, deriving `passed` from the outputs and the error state
    pub fn evaluate(
        test_name: impl Into<String>,
        actual_output: impl Into<String>,
        expected_output: impl Into<String>,
        execution_time: f64,
        error_message: Option<String>,
    ) -> Self {
        let actual_output = actual_output.into();
        let expected_output = expected_output.into();
        let passed = error_message.is_none() && outputs_match(&actual_output, &expected_output);

        Self {
            test_name: test_name.into(),
            passed,
            actual_output,
            expected_output,
            execution_time,
            error_message,
        }
    }
}

/// Compare program output with expected output, ignoring surrounding whitespace
pub fn outputs_match(actual: &str, expected: &str) -> bool {
    actual.trim() == expected.trim()
}

/// Best-effort resource measurements reported by the isolation backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// CPU seconds
    pub cpu_time: f64,
    /// Bytes
    pub memory_peak: u64,
    /// Bytes
    pub memory_average: u64,
    /// Bytes
    pub disk_read: u64,
    /// Bytes
    pub disk_write: u64,
}

impl ResourceUsage {
    /// Replace negative or non-finite CPU readings with zero
    pub fn sanitized(mut self) -> Self {
        if !self.cpu_time.is_finite() || self.cpu_time < 0.0 {
            self.cpu_time = 0.0;
        }
        self
    }
}

/// Complete result of one `execute()` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeExecutionResult {
    pub request_id: String,
    pub status: ExecutionStatus,
    pub output: String,
    pub errors: Vec<String>,
    pub test_results: Vec<TestResult>,
    pub resource_usage: ResourceUsage,
    pub security_violations: Vec<SecurityViolation>,
    /// Wall-clock seconds spent in `execute()`
    pub execution_time: f64,
    pub created_at: DateTime<Utc>,
}

impl CodeExecutionResult {
    pub fn new(request_id: impl Into<String>, status: ExecutionStatus) -> Self {
        Self {
            request_id: request_id.into(),
            status,
            output: String::new(),
            errors: Vec::new(),
            test_results: Vec::new(),
            resource_usage: ResourceUsage::default(),
            security_violations: Vec::new(),
            execution_time: 0.0,
            created_at: Utc::now(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// True when every test passed; vacuously true without tests
    pub fn all_tests_passed(&self) -> bool {
        self.test_results.iter().all(|t| t.passed)
    }

    pub fn has_security_violations(&self) -> bool {
        !self.security_violations.is_empty()
    }

    pub fn critical_security_violations(&self) -> Vec<&SecurityViolation> {
        self.security_violations
            .iter()
            .filter(|v| v.is_critical())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::violation::Severity;

    #[test]
    fn test_outputs_match_ignores_surrounding_whitespace() {
        assert!(outputs_match("4\n", "4"));
        assert!(outputs_match("  hello world \n\n", "hello world"));
        assert!(!outputs_match("hello  world", "hello world"));
        assert!(!outputs_match("5", "4"));
    }

    #[test]
    fn test_evaluate_fails_on_error_even_with_matching_output() {
        let ok = TestResult::evaluate("a", "1\n", "1", 0.01, None);
        assert!(ok.passed);

        let errored = TestResult::evaluate("b", "1", "1", 0.01, Some("boom".into()));
        assert!(!errored.passed);
    }

    #[test]
    fn test_derived_properties() {
        let mut result = CodeExecutionResult::new("req", ExecutionStatus::Success);
        assert!(result.success());
        assert!(result.all_tests_passed());
        assert!(!result.has_security_violations());

        result.test_results = vec![
            TestResult::evaluate("one", "1", "1", 0.0, None),
            TestResult::evaluate("two", "3", "2", 0.0, None),
        ];
        result.security_violations = vec![
            SecurityViolation {
                pattern: "python.infinite_loop".into(),
                line_number: Some(3),
                description: "loop".into(),
                severity: Severity::Medium,
            },
            SecurityViolation {
                pattern: "python.eval".into(),
                line_number: Some(1),
                description: "eval".into(),
                severity: Severity::Critical,
            },
        ];

        assert!(!result.all_tests_passed());
        assert!(result.has_security_violations());
        let critical = result.critical_security_violations();
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].pattern, "python.eval");
    }

    #[test]
    fn test_resource_usage_sanitized() {
        let usage = ResourceUsage {
            cpu_time: f64::NAN,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(usage.cpu_time, 0.0);
    }
}
