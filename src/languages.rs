//! Language profiles for compilation and execution

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::core::ExecutionLimits;
use crate::error::EngineError;
use crate::harness::HarnessKind;
use crate::security::canonical_language;

/// Configuration for a supported programming language
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageConfig {
    /// Canonical language name (e.g., "python")
    pub name: String,
    /// Container image the code runs in
    pub image: String,
    /// Extension including the dot (e.g., ".py")
    pub file_extension: String,
    /// Name the user code is written under (e.g., "solution.py")
    pub source_file: String,
    /// Shell compile step, run before the program (None if not needed)
    pub compile_command: Option<String>,
    /// Run command for plain programs
    pub run_command: Vec<String>,
    /// Run command used when a test harness drives the code
    pub harness_run_command: Option<Vec<String>>,
    pub harness: Option<HarnessKind>,
    /// Function the harness calls with each test input
    pub entry_point: String,
    pub test_framework: Option<String>,
    pub allowed_imports: Vec<String>,
    pub blocked_patterns: Vec<String>,
    /// actual_timeout = limits.timeout * timeout_multiplier
    pub timeout_multiplier: f64,
    /// The launch needs a writable scratch area (e.g. compiler output)
    pub needs_scratch: bool,
    pub aliases: Vec<String>,
}

impl LanguageConfig {
    /// Wall-clock limit for this language under the given limits
    pub fn effective_timeout(&self, limits: &ExecutionLimits) -> f64 {
        limits.timeout * self.timeout_multiplier
    }

    pub fn has_compile_step(&self) -> bool {
        self.compile_command.is_some()
    }

    /// Language whose security rules and syntax lexicon apply
    ///
    /// Profiles under an operator-chosen name fall back to the language of
    /// their harness strategy.
    pub fn scan_language(&self) -> &str {
        if canonical_language(&self.name).is_some() {
            return &self.name;
        }
        match self.harness {
            Some(kind) => kind.language(),
            None => &self.name,
        }
    }
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
struct RawLanguageConfig {
    image: String,
    file_extension: String,
    source_file: String,
    compile_command: Option<String>,
    run_command: String,
    harness: Option<HarnessKind>,
    harness_run_command: Option<String>,
    #[serde(default = "default_entry_point")]
    entry_point: String,
    test_framework: Option<String>,
    #[serde(default)]
    allowed_imports: Vec<String>,
    #[serde(default)]
    blocked_patterns: Vec<String>,
    #[serde(default = "default_multiplier")]
    timeout_multiplier: f64,
    #[serde(default)]
    needs_scratch: bool,
    #[serde(default)]
    aliases: Vec<String>,
}

fn default_entry_point() -> String {
    "solution".to_string()
}

fn default_multiplier() -> f64 {
    1.0
}

/// Immutable language → profile map, built once at startup
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    languages: HashMap<String, LanguageConfig>,
    /// alias → canonical name
    aliases: HashMap<String, String>,
}

impl LanguageRegistry {
    /// Registry built from the embedded `files/languages.toml`
    pub fn builtin() -> Result<Self, EngineError> {
        let content = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));
        Self::from_toml_str(content)
    }

    /// Load an operator-provided language file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, EngineError> {
        let raw_configs: HashMap<String, RawLanguageConfig> = toml::from_str(content)?;

        let mut languages = HashMap::new();
        let mut aliases = HashMap::new();

        for (name, raw) in raw_configs {
            let name = name.to_lowercase();
            let config = into_config(&name, raw)?;

            for alias in &config.aliases {
                let alias = alias.to_lowercase();
                if let Some(previous) = aliases.insert(alias.clone(), name.clone()) {
                    return Err(invalid(
                        &name,
                        format!("alias '{}' is already used by '{}'", alias, previous),
                    ));
                }
            }

            languages.insert(name, config);
        }

        if let Some((alias, owner)) = aliases.iter().find(|(alias, _)| languages.contains_key(*alias)) {
            return Err(invalid(
                owner,
                format!("alias '{}' shadows a language name", alias),
            ));
        }

        tracing::debug!("Loaded {} language profiles", languages.len());
        Ok(Self { languages, aliases })
    }

    /// Canonical language names, sorted
    pub fn list_supported(&self) -> Vec<String> {
        let mut names: Vec<String> = self.languages.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_supported(&self, language: &str) -> bool {
        self.resolve(language).is_some()
    }

    /// Look up a language by name or alias; unknown languages are an error
    pub fn get(&self, language: &str) -> Result<&LanguageConfig, EngineError> {
        self.resolve(language)
            .ok_or_else(|| EngineError::UnsupportedLanguage(language.to_string()))
    }

    fn resolve(&self, language: &str) -> Option<&LanguageConfig> {
        let key = language.trim().to_lowercase();
        self.languages.get(&key).or_else(|| {
            self.aliases
                .get(&key)
                .and_then(|canonical| self.languages.get(canonical))
        })
    }
}

fn into_config(name: &str, raw: RawLanguageConfig) -> Result<LanguageConfig, EngineError> {
    let run_command = into_command(&raw.run_command);
    if run_command.is_empty() {
        return Err(invalid(name, "run_command is empty"));
    }
    if raw.image.trim().is_empty() {
        return Err(invalid(name, "image is empty"));
    }
    if !raw.file_extension.starts_with('.') || raw.file_extension.len() < 2 {
        return Err(invalid(
            name,
            format!("file_extension '{}' must start with '.'", raw.file_extension),
        ));
    }
    if raw.source_file.contains('/') || !raw.source_file.ends_with(&raw.file_extension) {
        return Err(invalid(
            name,
            format!(
                "source_file '{}' must be a bare file name ending in '{}'",
                raw.source_file, raw.file_extension
            ),
        ));
    }
    if !raw.timeout_multiplier.is_finite() || raw.timeout_multiplier <= 0.0 {
        return Err(invalid(name, "timeout_multiplier must be positive"));
    }
    if let Some(compile) = &raw.compile_command {
        if compile.trim().is_empty() {
            return Err(invalid(name, "compile_command is empty"));
        }
    }

    let harness_run_command = raw.harness_run_command.as_deref().map(into_command);
    if raw.harness.is_some() && harness_run_command.as_ref().map_or(true, |c| c.is_empty()) {
        return Err(invalid(
            name,
            "harness is set but harness_run_command is missing",
        ));
    }

    Ok(LanguageConfig {
        name: name.to_string(),
        image: raw.image,
        file_extension: raw.file_extension,
        source_file: raw.source_file,
        compile_command: raw.compile_command,
        run_command,
        harness_run_command,
        harness: raw.harness,
        entry_point: raw.entry_point,
        test_framework: raw.test_framework,
        allowed_imports: raw.allowed_imports,
        blocked_patterns: raw.blocked_patterns,
        timeout_multiplier: raw.timeout_multiplier,
        needs_scratch: raw.needs_scratch,
        aliases: raw.aliases,
    })
}

fn invalid(language: &str, reason: impl Into<String>) -> EngineError {
    EngineError::InvalidLanguageConfig {
        language: language.to_string(),
        reason: reason.into(),
    }
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}
