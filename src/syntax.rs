//! Best-effort syntax check used when no sandbox is available
//!
//! Nothing is executed or parsed for real: the check only tracks brackets,
//! string literals and comments. JavaScript regex literals are not
//! recognized and may produce spurious findings.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::security::canonical_language;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxIssue {
    /// 1-indexed
    pub line: usize,
    pub message: String,
}

impl fmt::Display for SyntaxIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

struct Lexicon {
    line_comment: &'static str,
    block_comment: Option<(&'static str, &'static str)>,
    /// Quotes that end at the end of a line
    quotes: &'static [char],
    /// Delimiters whose literals may span lines
    multiline_quotes: &'static [&'static str],
}

const PYTHON: Lexicon = Lexicon {
    line_comment: "#",
    block_comment: None,
    quotes: &['\'', '"'],
    multiline_quotes: &["\"\"\"", "'''"],
};

const JAVASCRIPT: Lexicon = Lexicon {
    line_comment: "//",
    block_comment: Some(("/*", "*/")),
    quotes: &['\'', '"'],
    multiline_quotes: &["`"],
};

const JAVA: Lexicon = Lexicon {
    line_comment: "//",
    block_comment: Some(("/*", "*/")),
    quotes: &['\'', '"'],
    multiline_quotes: &["\"\"\""],
};

enum State {
    Code,
    Quote(char, usize),
    Multiline(&'static str, usize),
    BlockComment(usize),
}

/// Check bracket balance and literal termination
///
/// Languages without a lexicon yield no findings.
pub fn check(code: &str, language: &str) -> Vec<SyntaxIssue> {
    let lexicon = match canonical_language(language) {
        Some("python") => &PYTHON,
        Some("javascript") => &JAVASCRIPT,
        Some("java") => &JAVA,
        _ => return Vec::new(),
    };

    let mut issues = Vec::new();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut state = State::Code;

    for (index, line) in code.lines().enumerate() {
        let line_no = index + 1;
        let mut pos = 0;

        while pos < line.len() {
            let rest = &line[pos..];
            let Some(c) = rest.chars().next() else {
                break;
            };

            match state {
                State::Code => {
                    if rest.starts_with(lexicon.line_comment) {
                        break;
                    }
                    if let Some((open, _)) = lexicon.block_comment {
                        if rest.starts_with(open) {
                            state = State::BlockComment(line_no);
                            pos += open.len();
                            continue;
                        }
                    }
                    if let Some(&delim) = lexicon
                        .multiline_quotes
                        .iter()
                        .find(|d| rest.starts_with(**d))
                    {
                        state = State::Multiline(delim, line_no);
                        pos += delim.len();
                        continue;
                    }
                    if lexicon.quotes.contains(&c) {
                        state = State::Quote(c, line_no);
                    } else {
                        match c {
                            '(' | '[' | '{' => stack.push((c, line_no)),
                            ')' | ']' | '}' => match stack.pop() {
                                Some((open, _)) if closer(open) == c => {}
                                Some((open, opened)) => {
                                    issues.push(SyntaxIssue {
                                        line: line_no,
                                        message: format!(
                                            "mismatched '{}', expected '{}' to close '{}' from line {}",
                                            c,
                                            closer(open),
                                            open,
                                            opened
                                        ),
                                    });
                                }
                                None => issues.push(SyntaxIssue {
                                    line: line_no,
                                    message: format!("unexpected '{}'", c),
                                }),
                            },
                            _ => {}
                        }
                    }
                }
                State::Quote(quote, _) => {
                    if c == '\\' {
                        pos += c.len_utf8();
                        // skip the escaped character, if any
                        if let Some(next) = line[pos..].chars().next() {
                            pos += next.len_utf8();
                        }
                        continue;
                    }
                    if c == quote {
                        state = State::Code;
                    }
                }
                State::Multiline(delim, _) => {
                    if c == '\\' {
                        pos += c.len_utf8();
                        if let Some(next) = line[pos..].chars().next() {
                            pos += next.len_utf8();
                        }
                        continue;
                    }
                    if rest.starts_with(delim) {
                        state = State::Code;
                        pos += delim.len();
                        continue;
                    }
                }
                State::BlockComment(_) => {
                    if let Some((_, close)) = lexicon.block_comment {
                        if rest.starts_with(close) {
                            state = State::Code;
                            pos += close.len();
                            continue;
                        }
                    }
                }
            }
            pos += c.len_utf8();
        }

        if let State::Quote(_, opened) = state {
            // a trailing backslash continues the literal on the next line
            if !line.ends_with('\\') {
                issues.push(SyntaxIssue {
                    line: opened,
                    message: "unterminated string literal".to_string(),
                });
                state = State::Code;
            }
        }
    }

    match state {
        State::Multiline(_, opened) | State::Quote(_, opened) => issues.push(SyntaxIssue {
            line: opened,
            message: "unterminated string literal".to_string(),
        }),
        State::BlockComment(opened) => issues.push(SyntaxIssue {
            line: opened,
            message: "unterminated block comment".to_string(),
        }),
        State::Code => {}
    }

    for (open, opened) in stack {
        issues.push(SyntaxIssue {
            line: opened,
            message: format!("unclosed '{}'", open),
        });
    }

    issues
}

fn closer(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_code_has_no_issues() {
        assert!(check("def f(x):\n    return [x, {'a': (1, 2)}]\n", "python").is_empty());
        assert!(check("const s = `a\n(b`; // )\n/* ] */ f(s);", "javascript").is_empty());
        assert!(check(
            "class Solution { String s = \"}\"; char c = '{'; }",
            "java"
        )
        .is_empty());
        assert!(check("s = \"\"\"\n(\n\"\"\"\nprint('#')", "python").is_empty());
    }

    #[test]
    fn test_unclosed_bracket() {
        let issues = check("print((1 + 2)\nx = 3", "python");
        assert_eq!(
            issues,
            vec![SyntaxIssue {
                line: 1,
                message: "unclosed '('".to_string()
            }]
        );
    }

    #[test]
    fn test_mismatched_and_unexpected() {
        let issues = check("x = [1, 2)\n}", "javascript");
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].line, 1);
        assert!(issues[0].message.starts_with("mismatched ')'"));
        assert_eq!(issues[1].to_string(), "line 2: unexpected '}'");
    }

    #[test]
    fn test_unterminated_literals() {
        let issues = check("x = 'abc\ny = 1", "python");
        assert_eq!(issues[0].message, "unterminated string literal");
        assert_eq!(issues[0].line, 1);

        let issues = check("/* never closed", "java");
        assert_eq!(issues[0].message, "unterminated block comment");

        let issues = check("s = '''\nabc", "py");
        assert_eq!(issues[0].message, "unterminated string literal");
    }

    #[test]
    fn test_escapes_and_continuations() {
        assert!(check(r#"s = "a \" ( b""#, "python").is_empty());
        assert!(check("s = 'abc \\\ndef'", "python").is_empty());
    }

    #[test]
    fn test_unknown_language() {
        assert!(check("((((", "cobol").is_empty());
    }
}
