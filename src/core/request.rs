use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::limits::ExecutionLimits;

/// One input/expected-output pair driven by the test harness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub input_data: String,
    pub expected_output: String,
    /// Per-case timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
}

impl TestCase {
    pub fn new(
        name: impl Into<String>,
        input_data: impl Into<String>,
        expected_output: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            input_data: input_data.into(),
            expected_output: expected_output.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = Some(seconds);
        self
    }
}

/// A request to execute untrusted code
///
/// Immutable once handed to the orchestrator: fields are only readable
/// through accessors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeExecutionRequest {
    #[serde(default = "new_request_id")]
    id: String,
    code: String,
    language: String,
    #[serde(default)]
    test_cases: Vec<TestCase>,
    #[serde(default)]
    limits: ExecutionLimits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
}

fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

impl CodeExecutionRequest {
    pub fn new(code: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            id: new_request_id(),
            code: code.into(),
            language: language.into(),
            test_cases: Vec::new(),
            limits: ExecutionLimits::default(),
            user_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_test_cases(mut self, test_cases: impl IntoIterator<Item = TestCase>) -> Self {
        self.test_cases = test_cases.into_iter().collect();
        self
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn test_cases(&self) -> &[TestCase] {
        &self.test_cases
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_request_gets_unique_id() {
        let a = CodeExecutionRequest::new("print(1)", "python");
        let b = CodeExecutionRequest::new("print(1)", "python");
        assert_ne!(a.id(), b.id());
        assert!(a.test_cases().is_empty());
        assert_eq!(a.limits(), &ExecutionLimits::default());
    }

    #[test]
    fn test_deserialize_minimal_request() {
        let request: CodeExecutionRequest = serde_json::from_str(
            r#"{
                "code": "print(input())",
                "language": "python",
                "test_cases": [
                    {"name": "echo", "input_data": "hi", "expected_output": "hi", "timeout": 1.5}
                ]
            }"#,
        )
        .unwrap();

        assert!(!request.id().is_empty());
        assert_eq!(request.language(), "python");
        assert_eq!(request.test_cases().len(), 1);
        assert_eq!(request.test_cases()[0].timeout, Some(1.5));
        assert_eq!(request.user_id(), None);
    }

    #[test]
    fn test_builders_preserve_case_order() {
        let request = CodeExecutionRequest::new("x", "python")
            .with_id("req-1")
            .with_user_id("user-7")
            .with_test_cases(vec![
                TestCase::new("first", "1", "1"),
                TestCase::new("second", "2", "2"),
                TestCase::new("third", "3", "3").with_timeout(2.0),
            ]);

        assert_eq!(request.id(), "req-1");
        assert_eq!(request.user_id(), Some("user-7"));
        let names: Vec<_> = request.test_cases().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }
}
