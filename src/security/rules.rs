//! Built-in denylist rules, per language
//!
//! Rule order is significant: violations on a line are reported in the order
//! the rules appear here.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};

use crate::core::Severity;

struct RuleSpec {
    id: &'static str,
    pattern: &'static str,
    severity: Severity,
    description: &'static str,
}

const fn rule(
    id: &'static str,
    pattern: &'static str,
    severity: Severity,
    description: &'static str,
) -> RuleSpec {
    RuleSpec {
        id,
        pattern,
        severity,
        description,
    }
}

const PYTHON_RULES: &[RuleSpec] = &[
    rule(
        "python.eval",
        r"\beval\s*\(",
        Severity::Critical,
        "eval() executes arbitrary expressions",
    ),
    rule(
        "python.exec",
        r"\bexec\s*\(",
        Severity::Critical,
        "exec() executes arbitrary statements",
    ),
    rule(
        "python.compile",
        r"(^|[^\w.])compile\s*\(",
        Severity::Critical,
        "compile() builds executable code objects",
    ),
    rule(
        "python.dynamic_import",
        r"\b__import__\s*\(|\bimportlib\b",
        Severity::Critical,
        "dynamic import can load arbitrary modules",
    ),
    rule(
        "python.subprocess",
        r"\bsubprocess\b",
        Severity::Critical,
        "subprocess spawns host processes",
    ),
    rule(
        "python.os_exec",
        r"\bos\s*\.\s*(system|popen|exec\w*|spawn\w*|fork\w*)\b",
        Severity::Critical,
        "os process primitives spawn or replace processes",
    ),
    rule(
        "python.os_module",
        r"^\s*(import|from)\s+(os|sys|shutil|pathlib|glob|tempfile|io)\b",
        Severity::High,
        "import of an operating system or filesystem module",
    ),
    rule(
        "python.network_module",
        r"^\s*(import|from)\s+(socket|ssl|urllib\w*|http|requests|ftplib|smtplib|asyncio)\b",
        Severity::High,
        "import of a network module",
    ),
    rule(
        "python.native_module",
        r"^\s*(import|from)\s+(ctypes|cffi|pickle|marshal|multiprocessing|threading|signal|resource)\b",
        Severity::High,
        "import of a low-level interpreter or process module",
    ),
    rule(
        "python.open",
        r"(^|[^\w.])open\s*\(",
        Severity::High,
        "direct file access through open()",
    ),
    rule(
        "python.introspection",
        r"__(builtins|class|subclasses|globals|bases|mro|code|dict)__",
        Severity::High,
        "access to interpreter internals",
    ),
    rule(
        "python.infinite_loop",
        r"\bwhile\s+(true|1)\s*:",
        Severity::Medium,
        "potentially unbounded loop",
    ),
    rule(
        "python.large_range",
        r"\brange\s*\(\s*(\d{8,}|10\s*\*\*\s*([7-9]|\d{2,}))",
        Severity::Medium,
        "very large fixed iteration count",
    ),
    rule(
        "python.exit",
        r"(^|[^\w.])(exit|quit)\s*\(|\bsys\s*\.\s*exit\s*\(|\bos\s*\.\s*_exit\s*\(",
        Severity::Medium,
        "abrupt process termination",
    ),
    rule(
        "python.wildcard_import",
        r"^\s*from\s+\S+\s+import\s+\*",
        Severity::Low,
        "wildcard import",
    ),
    rule(
        "python.global_statement",
        r"^\s*global\s+\w+",
        Severity::Low,
        "mutation of module-level state",
    ),
];

const JAVASCRIPT_RULES: &[RuleSpec] = &[
    rule(
        "javascript.eval",
        r"\beval\s*\(",
        Severity::Critical,
        "eval() executes arbitrary code",
    ),
    rule(
        "javascript.function_constructor",
        r#"\bnew\s+Function\s*\(|\bFunction\s*\(\s*['"`]"#,
        Severity::Critical,
        "Function constructor compiles code from strings",
    ),
    rule(
        "javascript.child_process",
        r"\bchild_process\b",
        Severity::Critical,
        "child_process spawns host processes",
    ),
    rule(
        "javascript.string_timer",
        r#"\b(setTimeout|setInterval)\s*\(\s*['"`]"#,
        Severity::Critical,
        "timer with a string body evaluates code",
    ),
    rule(
        "javascript.vm_module",
        r#"\brequire\s*\(\s*['"`](node:)?vm['"`]|\bfrom\s+['"`](node:)?vm['"`]"#,
        Severity::Critical,
        "vm module evaluates code",
    ),
    rule(
        "javascript.fs_module",
        r#"\brequire\s*\(\s*['"`](node:)?(fs|fs/promises|path|os)['"`]|\bfrom\s+['"`](node:)?(fs|fs/promises|path|os)['"`]"#,
        Severity::High,
        "import of a filesystem or operating system module",
    ),
    rule(
        "javascript.net_module",
        r#"\brequire\s*\(\s*['"`](node:)?(net|http|https|http2|dgram|dns|tls|cluster|worker_threads)['"`]|\bfrom\s+['"`](node:)?(net|http|https|http2|dgram|dns|tls|cluster|worker_threads)['"`]"#,
        Severity::High,
        "import of a network or threading module",
    ),
    rule(
        "javascript.process_access",
        r"\bprocess\s*\.\s*(env|binding|dlopen|mainModule|kill)\b",
        Severity::High,
        "access to process internals",
    ),
    rule(
        "javascript.prototype_tampering",
        r"__proto__|\bObject\s*\.\s*setPrototypeOf\b|\.prototype\s*(\.\s*\w+|\[[^\]]*\])\s*=([^=]|$)",
        Severity::High,
        "prototype tampering",
    ),
    rule(
        "javascript.constructor_access",
        r#"\bconstructor\s*\.\s*constructor\b|\[\s*['"`]constructor['"`]\s*\]"#,
        Severity::High,
        "constructor chain access",
    ),
    rule(
        "javascript.global_object",
        r"\b(globalThis|global)\s*(\.|\[)",
        Severity::High,
        "access to the global object",
    ),
    rule(
        "javascript.infinite_loop",
        r"\bwhile\s*\(\s*(true|1)\s*\)|\bfor\s*\(\s*;\s*;\s*\)",
        Severity::Medium,
        "potentially unbounded loop",
    ),
    rule(
        "javascript.large_loop",
        r"<=?\s*(\d{8,}|1e([7-9]|\d{2,}))\b",
        Severity::Medium,
        "very large fixed iteration count",
    ),
    rule(
        "javascript.process_exit",
        r"\bprocess\s*\.\s*(exit|abort)\s*\(",
        Severity::Medium,
        "abrupt process termination",
    ),
    rule(
        "javascript.debugger",
        r"\bdebugger\b",
        Severity::Low,
        "debugger statement",
    ),
    rule(
        "javascript.var",
        r"^\s*var\s+",
        Severity::Low,
        "function-scoped var declaration",
    ),
];

const JAVA_RULES: &[RuleSpec] = &[
    rule(
        "java.runtime_exec",
        r"\bRuntime\s*\.\s*getRuntime\s*\(\s*\)\s*\.\s*exec\b",
        Severity::Critical,
        "Runtime.exec spawns host processes",
    ),
    rule(
        "java.process_builder",
        r"\bProcessBuilder\b",
        Severity::Critical,
        "ProcessBuilder spawns host processes",
    ),
    rule(
        "java.script_engine",
        r"\bScriptEngine(Manager)?\b",
        Severity::Critical,
        "script engines evaluate code from strings",
    ),
    rule(
        "java.class_loading",
        r"\bURLClassLoader\b|\bdefineClass\b",
        Severity::Critical,
        "runtime class loading executes arbitrary bytecode",
    ),
    rule(
        "java.file_io",
        r"\bjava\s*\.\s*(io\s*\.\s*File\w*|nio\s*\.\s*file)\b|\bnew\s+File(InputStream|OutputStream|Reader|Writer)?\s*\(|\bFiles\s*\.\s*\w+\s*\(",
        Severity::High,
        "filesystem access",
    ),
    rule(
        "java.network",
        r"\bjava\s*\.\s*net\b|\bnew\s+(Socket|ServerSocket|DatagramSocket|URL)\s*\(|\bHttpClient\b",
        Severity::High,
        "network access",
    ),
    rule(
        "java.reflection",
        r"\bjava\s*\.\s*lang\s*\.\s*reflect\b|\bsetAccessible\s*\(|\bClass\s*\.\s*forName\s*\(",
        Severity::High,
        "reflection can bypass access checks",
    ),
    rule(
        "java.environment",
        r"\bSystem\s*\.\s*(getenv|setProperty|setSecurityManager)\s*\(",
        Severity::High,
        "access to the process environment",
    ),
    rule(
        "java.unsafe",
        r"\bsun\s*\.\s*misc\b|\bUnsafe\b",
        Severity::High,
        "unsafe memory access",
    ),
    rule(
        "java.infinite_loop",
        r"\bwhile\s*\(\s*true\s*\)|\bfor\s*\(\s*;\s*;\s*\)",
        Severity::Medium,
        "potentially unbounded loop",
    ),
    rule(
        "java.large_loop",
        r"<=?\s*(\d{8,}|1e([7-9]|\d{2,}))\b",
        Severity::Medium,
        "very large fixed iteration count",
    ),
    rule(
        "java.system_exit",
        r"\bSystem\s*\.\s*exit\s*\(|\bRuntime\s*\.\s*getRuntime\s*\(\s*\)\s*\.\s*(halt|exit)\s*\(",
        Severity::Medium,
        "abrupt process termination",
    ),
    rule(
        "java.stack_trace",
        r"\.printStackTrace\s*\(",
        Severity::Low,
        "stack trace dumped to output",
    ),
    rule(
        "java.wildcard_import",
        r"^\s*import\s+[\w.]+\.\*\s*;",
        Severity::Low,
        "wildcard import",
    ),
];

/// A compiled rule
pub struct Rule {
    pub id: &'static str,
    pub regex: Regex,
    pub severity: Severity,
    pub description: &'static str,
}

static RULES: OnceLock<HashMap<&'static str, Vec<Rule>>> = OnceLock::new();

fn compile(specs: &[RuleSpec]) -> Vec<Rule> {
    specs
        .iter()
        .filter_map(|spec| {
            match RegexBuilder::new(spec.pattern)
                .case_insensitive(true)
                .build()
            {
                Ok(regex) => Some(Rule {
                    id: spec.id,
                    regex,
                    severity: spec.severity,
                    description: spec.description,
                }),
                Err(e) => {
                    tracing::error!("Security rule {} failed to compile: {}", spec.id, e);
                    None
                }
            }
        })
        .collect()
}

fn table() -> &'static HashMap<&'static str, Vec<Rule>> {
    RULES.get_or_init(|| {
        let mut rules = HashMap::new();
        rules.insert("python", compile(PYTHON_RULES));
        rules.insert("javascript", compile(JAVASCRIPT_RULES));
        rules.insert("java", compile(JAVA_RULES));
        rules
    })
}

/// Map a language name or alias to the key used by the rule table
pub fn canonical_language(language: &str) -> Option<&'static str> {
    match language.trim().to_lowercase().as_str() {
        "python" | "python3" | "py" => Some("python"),
        "javascript" | "js" | "node" | "nodejs" => Some("javascript"),
        "java" => Some("java"),
        _ => None,
    }
}

/// Rules for a language, or `None` when the language has no rule set
pub fn rules_for(language: &str) -> Option<&'static [Rule]> {
    let key = canonical_language(language)?;
    table().get(key).map(|rules| rules.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_builtin_rule_compiles() {
        assert_eq!(rules_for("python").unwrap().len(), PYTHON_RULES.len());
        assert_eq!(rules_for("javascript").unwrap().len(), JAVASCRIPT_RULES.len());
        assert_eq!(rules_for("java").unwrap().len(), JAVA_RULES.len());
    }

    #[test]
    fn test_rule_ids_are_unique_and_prefixed() {
        for (language, specs) in [
            ("python", PYTHON_RULES),
            ("javascript", JAVASCRIPT_RULES),
            ("java", JAVA_RULES),
        ] {
            let mut seen = std::collections::HashSet::new();
            for spec in specs {
                assert!(spec.id.starts_with(language), "{}", spec.id);
                assert!(seen.insert(spec.id), "duplicate rule id {}", spec.id);
            }
        }
    }

    #[test]
    fn test_aliases_resolve() {
        assert_eq!(canonical_language("PY"), Some("python"));
        assert_eq!(canonical_language("node"), Some("javascript"));
        assert_eq!(canonical_language("ruby"), None);
        assert!(rules_for("ruby").is_none());
    }
}
