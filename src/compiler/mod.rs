//! Compiler module - launch planning
//!
//! Compilation happens inside the same isolation unit as the run, so a
//! request never needs more than one unit. For languages with a compile step
//! the unit runs a small shell script:
//!
//! ```text
//! { <compile>; } || exit 86
//! exec <run>
//! ```
//!
//! A compile failure is then recognizable by the reserved exit code.

use crate::error::EngineError;
use crate::languages::LanguageConfig;
use crate::sandbox::CommandSpec;

/// Exit code the launch script uses when the compile step fails
pub const COMPILE_FAILED_EXIT: i64 = 86;

/// Command the isolation unit runs
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchPlan {
    pub command: CommandSpec,
    pub has_compile_step: bool,
}

/// Build the launch command for a language
///
/// `with_harness` selects the harness run command instead of running the
/// user program directly.
pub fn plan_launch(config: &LanguageConfig, with_harness: bool) -> Result<LaunchPlan, EngineError> {
    let run = if with_harness {
        config
            .harness_run_command
            .as_ref()
            .ok_or_else(|| EngineError::InvalidLanguageConfig {
                language: config.name.clone(),
                reason: "no harness_run_command configured".to_string(),
            })?
    } else {
        &config.run_command
    };

    let plan = match &config.compile_command {
        None => LaunchPlan {
            command: CommandSpec::from_vec(run),
            has_compile_step: false,
        },
        Some(compile) => {
            let run_line = run.iter().map(|arg| shell_quote(arg)).collect::<Vec<_>>().join(" ");
            LaunchPlan {
                command: CommandSpec::shell(format!(
                    "{{ {}; }} || exit {}\nexec {}",
                    compile.trim(),
                    COMPILE_FAILED_EXIT,
                    run_line
                )),
                has_compile_step: true,
            }
        }
    };

    tracing::debug!("Launch plan for {}: {:?}", config.name, plan.command.to_vec());
    Ok(plan)
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '=' | ':' | ','));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::LanguageRegistry;

    #[test]
    fn test_interpreted_language_runs_directly() {
        let registry = LanguageRegistry::builtin().unwrap();
        let python = registry.get("python").unwrap();

        let plan = plan_launch(python, false).unwrap();
        assert!(!plan.has_compile_step);
        assert_eq!(plan.command.to_vec(), vec!["python3", "-B", "/code/solution.py"]);

        let plan = plan_launch(python, true).unwrap();
        assert_eq!(plan.command.to_vec(), vec!["python3", "-B", "/code/harness.py"]);
    }

    #[test]
    fn test_compiled_language_uses_launch_script() {
        let registry = LanguageRegistry::builtin().unwrap();
        let java = registry.get("java").unwrap();

        let plan = plan_launch(java, true).unwrap();
        assert!(plan.has_compile_step);
        assert_eq!(plan.command.program, "/bin/sh");
        assert_eq!(
            plan.command.args,
            vec![
                "-c".to_string(),
                "{ mkdir -p /tmp/classes && javac -d /tmp/classes /code/*.java; } || exit 86\nexec java -cp /tmp/classes Harness".to_string()
            ]
        );
    }

    #[test]
    fn test_missing_harness_command_is_config_error() {
        let registry = LanguageRegistry::builtin().unwrap();
        let mut config = registry.get("python").unwrap().clone();
        config.harness_run_command = None;
        assert!(matches!(
            plan_launch(&config, true),
            Err(EngineError::InvalidLanguageConfig { .. })
        ));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/code/a.py"), "/code/a.py");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}
