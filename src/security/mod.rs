//! Static security pre-screening
//!
//! A best-effort denylist scan. Only critical findings gate execution; all
//! other findings are advisory and are surfaced with the result.

pub mod rules;

use crate::core::{SecurityViolation, Severity};

pub use rules::canonical_language;

const PYTHON_BLOCKED_IMPORTS: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "shutil",
    "socket",
    "ssl",
    "urllib",
    "http",
    "requests",
    "ctypes",
    "pickle",
    "marshal",
    "multiprocessing",
    "threading",
    "importlib",
    "signal",
    "resource",
];

const JAVASCRIPT_BLOCKED_IMPORTS: &[&str] = &[
    "fs",
    "fs/promises",
    "path",
    "os",
    "child_process",
    "vm",
    "net",
    "http",
    "https",
    "http2",
    "dgram",
    "dns",
    "tls",
    "cluster",
    "worker_threads",
];

const JAVA_BLOCKED_IMPORTS: &[&str] = &[
    "java.io.File",
    "java.nio.file",
    "java.net",
    "java.lang.reflect",
    "java.lang.ProcessBuilder",
    "javax.script",
    "sun.misc",
];

/// Literal replacements applied by `sanitize`, in order
const PYTHON_REPLACEMENTS: &[(&str, &str)] = &[
    ("__import__(", "_blocked_import("),
    ("eval(", "_blocked_eval("),
    ("exec(", "_blocked_exec("),
    ("compile(", "_blocked_compile("),
    ("open(", "_blocked_open("),
    ("os.system(", "_blocked_system("),
    ("subprocess.", "_blocked_subprocess."),
];

const JAVASCRIPT_REPLACEMENTS: &[(&str, &str)] = &[
    ("eval(", "_blockedEval("),
    ("new Function(", "new _BlockedFunction("),
    ("require('child_process')", "_blockedRequire('child_process')"),
    ("require(\"child_process\")", "_blockedRequire(\"child_process\")"),
    ("process.exit(", "_blockedExit("),
];

const JAVA_REPLACEMENTS: &[(&str, &str)] = &[
    ("Runtime.getRuntime().exec(", "_blockedExec("),
    ("new ProcessBuilder(", "new _BlockedProcessBuilder("),
    ("System.exit(", "_blockedExit("),
];

/// Stateless pattern scanner
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityValidator;

impl SecurityValidator {
    pub fn new() -> Self {
        Self
    }

    /// Scan code line by line and return every rule match
    ///
    /// Output is ordered by line, then by rule order. A language without a
    /// rule set yields an empty list.
    pub fn validate(&self, code: &str, language: &str) -> Vec<SecurityViolation> {
        let Some(rules) = rules::rules_for(language) else {
            tracing::debug!("No security rules for language {}, skipping scan", language);
            return Vec::new();
        };

        let mut violations = Vec::new();
        for (index, line) in code.lines().enumerate() {
            for rule in rules {
                if rule.regex.is_match(line) {
                    violations.push(SecurityViolation {
                        pattern: rule.id.to_string(),
                        line_number: Some(index + 1),
                        description: rule.description.to_string(),
                        severity: rule.severity,
                    });
                }
            }
        }
        violations
    }

    /// True iff the scan finds no critical violation
    pub fn is_safe(&self, code: &str, language: &str) -> bool {
        !self
            .validate(code, language)
            .iter()
            .any(|v| v.severity == Severity::Critical)
    }

    /// Informational denylist of modules, independent of the scan
    pub fn blocked_imports(&self, language: &str) -> &'static [&'static str] {
        match canonical_language(language) {
            Some("python") => PYTHON_BLOCKED_IMPORTS,
            Some("javascript") => JAVASCRIPT_BLOCKED_IMPORTS,
            Some("java") => JAVA_BLOCKED_IMPORTS,
            _ => &[],
        }
    }

    /// Replace literal occurrences of dangerous call names
    ///
    /// Advisory only: equivalent constructions spelled differently pass
    /// through untouched, so the output must never be treated as safe.
    pub fn sanitize(&self, code: &str, language: &str) -> String {
        let replacements = match canonical_language(language) {
            Some("python") => PYTHON_REPLACEMENTS,
            Some("javascript") => JAVASCRIPT_REPLACEMENTS,
            Some("java") => JAVA_REPLACEMENTS,
            _ => return code.to_string(),
        };

        let mut sanitized = code.to_string();
        for (from, to) in replacements {
            sanitized = replace_call(&sanitized, from, to);
        }
        sanitized
    }
}

/// Replace `from` when it is not preceded by an identifier character
fn replace_call(code: &str, from: &str, to: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut rest = code;
    while let Some(pos) = rest.find(from) {
        let (before, after) = rest.split_at(pos);
        out.push_str(before);
        let glued = before
            .chars()
            .next_back()
            .or_else(|| out[..out.len() - before.len()].chars().next_back())
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.');
        if glued && from.chars().next().is_some_and(|c| c.is_alphanumeric()) {
            out.push_str(from);
        } else {
            out.push_str(to);
        }
        rest = &after[from.len()..];
    }
    out.push_str(rest);
    out
}
