//! Per-request test harness generation
//!
//! A harness is a small driver program written next to the user code. It
//! runs every test case in request order, catches per-case failures, and
//! prints one report line (see [`protocol`]). Test data is embedded
//! base64-encoded; no user text is ever spliced into generated source.

pub mod java;
pub mod javascript;
pub mod protocol;
pub mod python;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{CodeExecutionRequest, TestCase};
use crate::languages::LanguageConfig;
use crate::sandbox::CODE_DIR;

/// Harness strategy for a language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HarnessKind {
    Python,
    Javascript,
    Java,
}

impl HarnessKind {
    /// File name the harness is written under
    pub fn file_name(&self) -> &'static str {
        match self {
            HarnessKind::Python => "harness.py",
            HarnessKind::Javascript => "harness.js",
            HarnessKind::Java => "Harness.java",
        }
    }

    /// Canonical language the strategy drives
    pub fn language(&self) -> &'static str {
        match self {
            HarnessKind::Python => "python",
            HarnessKind::Javascript => "javascript",
            HarnessKind::Java => "java",
        }
    }
}

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("no test harness strategy for language '{0}'")]
    NoStrategy(String),
    #[error("invalid entry point '{entry_point}' for language '{language}'")]
    InvalidEntryPoint {
        language: String,
        entry_point: String,
    },
    #[error("invalid source file name '{0}'")]
    InvalidSourceFile(String),
    #[error("failed to encode test data: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Generated driver source and the name to write it under
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedHarness {
    pub file_name: String,
    pub source: String,
}

/// Test case as embedded in a harness
#[derive(Debug, Clone, Serialize)]
struct CaseData<'a> {
    name: &'a str,
    input: &'a str,
    expected: &'a str,
    /// Seconds; 0 disables the per-case check
    timeout: f64,
}

/// Generate the harness for a request
///
/// A language without a harness strategy is a configuration defect.
pub fn generate(
    request: &CodeExecutionRequest,
    config: &LanguageConfig,
) -> Result<GeneratedHarness, HarnessError> {
    let kind = config
        .harness
        .ok_or_else(|| HarnessError::NoStrategy(config.name.clone()))?;

    if !is_identifier(&config.entry_point) {
        return Err(HarnessError::InvalidEntryPoint {
            language: config.name.clone(),
            entry_point: config.entry_point.clone(),
        });
    }
    if !is_safe_file_name(&config.source_file) {
        return Err(HarnessError::InvalidSourceFile(config.source_file.clone()));
    }

    let default_timeout = request.limits().timeout;
    let cases: Vec<CaseData> = request
        .test_cases()
        .iter()
        .map(|case| CaseData {
            name: &case.name,
            input: &case.input_data,
            expected: &case.expected_output,
            timeout: case_timeout(case, default_timeout) * config.timeout_multiplier,
        })
        .collect();

    let source_path = format!("{}/{}", CODE_DIR, config.source_file);
    let source = match kind {
        HarnessKind::Python => python::render(&config.entry_point, &source_path, &encode_json(&cases)?),
        HarnessKind::Javascript => {
            javascript::render(&config.entry_point, &source_path, &encode_json(&cases)?)
        }
        HarnessKind::Java => java::render(&config.entry_point, &java::JavaCases::from_cases(&cases)),
    };

    tracing::debug!(
        "Generated {} harness for request {} with {} cases",
        config.name,
        request.id(),
        cases.len()
    );

    Ok(GeneratedHarness {
        file_name: kind.file_name().to_string(),
        source,
    })
}

/// Per-case timeout in seconds, falling back to the request timeout
fn case_timeout(case: &TestCase, default_timeout: f64) -> f64 {
    [case.timeout.unwrap_or(f64::NAN), default_timeout]
        .into_iter()
        .find(|t| t.is_finite() && *t > 0.0)
        .unwrap_or(0.0)
}

fn encode_json(cases: &[CaseData<'_>]) -> Result<String, HarnessError> {
    Ok(STANDARD.encode(serde_json::to_vec(cases)?))
}

fn encode_text(text: &str) -> String {
    STANDARD.encode(text.as_bytes())
}

/// Substitute `{{KEY}}` placeholders
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{{{}}}}}", key), value)
    })
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ExecutionLimits;
    use crate::languages::LanguageRegistry;

    fn request(language: &str) -> CodeExecutionRequest {
        CodeExecutionRequest::new("def solution(x):\n    return x\n", language)
            .with_test_cases(vec![
                TestCase::new("first", "print('injected')", "1"),
                TestCase::new("second", "2", "2").with_timeout(0.5),
            ])
            .with_limits(ExecutionLimits {
                timeout: 4.0,
                ..Default::default()
            })
    }

    fn decode_embedded(source: &str, marker: &str) -> serde_json::Value {
        let start = source.find(marker).unwrap() + marker.len();
        let end = start + source[start..].find(['"', '\'']).unwrap();
        let bytes = STANDARD.decode(&source[start..end]).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_python_harness_embeds_cases_in_order() {
        let registry = LanguageRegistry::builtin().unwrap();
        let harness = generate(&request("python"), registry.get("python").unwrap()).unwrap();

        assert_eq!(harness.file_name, "harness.py");
        assert!(!harness.source.contains("print('injected')"));
        assert!(harness.source.contains("/code/solution.py"));
        assert!(!harness.source.contains("{{"));

        let cases = decode_embedded(&harness.source, "b64decode(\"");
        assert_eq!(cases[0]["name"], "first");
        assert_eq!(cases[0]["input"], "print('injected')");
        assert_eq!(cases[0]["timeout"], 4.0);
        assert_eq!(cases[1]["name"], "second");
        assert_eq!(cases[1]["timeout"], 0.5);
    }

    #[test]
    fn test_javascript_harness() {
        let registry = LanguageRegistry::builtin().unwrap();
        let harness = generate(&request("js"), registry.get("js").unwrap()).unwrap();

        assert_eq!(harness.file_name, "harness.js");
        assert!(harness.source.contains("'/code/solution.js'"));
        assert!(!harness.source.contains("{{"));
        let cases = decode_embedded(&harness.source, "Buffer.from('");
        assert_eq!(cases.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_java_harness_applies_multiplier() {
        let registry = LanguageRegistry::builtin().unwrap();
        let harness = generate(&request("java"), registry.get("java").unwrap()).unwrap();

        assert_eq!(harness.file_name, "Harness.java");
        assert!(harness.source.contains("public class Harness"));
        assert!(harness.source.contains("{ 8.0, 1.0 }"));
        assert!(harness.source.contains(&format!("\"{}\"", encode_text("first"))));
        assert!(!harness.source.contains("print('injected')"));
        assert!(!harness.source.contains("{{"));
    }

    #[test]
    fn test_language_without_strategy_is_config_error() {
        let mut config = LanguageRegistry::builtin()
            .unwrap()
            .get("python")
            .unwrap()
            .clone();
        config.harness = None;
        assert!(matches!(
            generate(&request("python"), &config),
            Err(HarnessError::NoStrategy(name)) if name == "python"
        ));
    }

    #[test]
    fn test_rejects_unsafe_entry_point_and_file_name() {
        let registry = LanguageRegistry::builtin().unwrap();
        let mut config = registry.get("python").unwrap().clone();
        config.entry_point = "solution\"); import os; (\"".into();
        assert!(matches!(
            generate(&request("python"), &config),
            Err(HarnessError::InvalidEntryPoint { .. })
        ));

        let mut config = registry.get("python").unwrap().clone();
        config.source_file = "x\".py".into();
        assert!(matches!(
            generate(&request("python"), &config),
            Err(HarnessError::InvalidSourceFile(_))
        ));
    }

    #[test]
    fn test_case_timeout_fallback() {
        let case = TestCase::new("a", "", "");
        assert_eq!(case_timeout(&case, 3.0), 3.0);
        assert_eq!(case_timeout(&case.clone().with_timeout(1.5), 3.0), 1.5);
        assert_eq!(case_timeout(&case.clone().with_timeout(-1.0), 3.0), 3.0);
        assert_eq!(case_timeout(&case, f64::NAN), 0.0);
    }

    #[test]
    fn test_fill_and_identifier() {
        assert_eq!(fill("a {{X}} b {{X}}", &[("X", "1")]), "a 1 b 1");
        assert!(is_identifier("solution"));
        assert!(is_identifier("_entry2"));
        assert!(!is_identifier("2x"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a-b"));
    }
}
