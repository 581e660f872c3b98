//! JavaScript harness
//!
//! Calls the exported entry point when there is one. Otherwise the source is
//! re-evaluated per case in a fresh `vm` context with `input` bound to the
//! case input.

use super::{fill, protocol::PROTOCOL_VERSION};

const TEMPLATE: &str = r##"'use strict';
const CASES = JSON.parse(Buffer.from('{{CASES}}', 'base64').toString('utf8'));
const PROTOCOL_VERSION = {{PROTOCOL}};
const ENTRY_POINT = '{{ENTRY_POINT}}';
const SOURCE_PATH = '{{SOURCE_PATH}}';

const fs = require('fs');
const util = require('util');
const vm = require('vm');

const realWrite = process.stdout.write.bind(process.stdout);
let captured = null;

process.stdout.write = function (chunk, encoding, callback) {
  if (captured === null) {
    return realWrite(chunk, encoding, callback);
  }
  captured.push(typeof chunk === 'string' ? chunk : Buffer.from(chunk).toString('utf8'));
  const done = typeof encoding === 'function' ? encoding : callback;
  if (typeof done === 'function') {
    done();
  }
  return true;
};

const capturedLog = (...args) => {
  process.stdout.write(util.format(...args) + '\n');
};
console.log = capturedLog;
console.info = capturedLog;
console.debug = capturedLog;

function startCapture() {
  captured = [];
}

function stopCapture() {
  const text = captured === null ? '' : captured.join('');
  captured = null;
  return text;
}

function describe(err) {
  if (err && err.name) {
    return err.message ? `${err.name}: ${err.message}` : err.name;
  }
  return String(err);
}

function emit(results, fatalError) {
  const report = {
    protocol: PROTOCOL_VERSION,
    test_results: results,
    fatal_error: fatalError,
  };
  return new Promise((resolve) => {
    realWrite(JSON.stringify(report) + '\n', () => resolve());
  });
}

function loadSolution() {
  startCapture();
  try {
    return { exported: require(SOURCE_PATH), error: null };
  } catch (err) {
    return { exported: null, error: err };
  } finally {
    stopCapture();
  }
}

function resolveEntry(exported) {
  if (typeof exported === 'function') {
    return exported;
  }
  if (exported && typeof exported[ENTRY_POINT] === 'function') {
    return exported[ENTRY_POINT];
  }
  if (exported && typeof exported.default === 'function') {
    return exported.default;
  }
  return null;
}

async function settle(value) {
  if (value && typeof value.then === 'function') {
    value = await value;
  }
  if (value !== undefined && value !== null) {
    process.stdout.write(String(value) + '\n');
  }
}

async function runCase(entry, source, testCase) {
  const timeoutMs = Math.round((testCase.timeout || 0) * 1000);
  const started = process.hrtime.bigint();
  let error = null;

  startCapture();
  try {
    if (entry !== null) {
      await settle(entry(testCase.input));
    } else {
      const module = { exports: {} };
      const context = { console, input: testCase.input, require, module, exports: module.exports, Buffer };
      const options = { filename: SOURCE_PATH };
      if (timeoutMs > 0) {
        options.timeout = timeoutMs;
      }
      vm.runInNewContext(source, context, options);
      const fn = typeof context[ENTRY_POINT] === 'function' ? context[ENTRY_POINT] : resolveEntry(module.exports);
      if (fn !== null) {
        await settle(fn(testCase.input));
      }
    }
  } catch (err) {
    error = describe(err);
  }
  const actual = stopCapture().replace(/[\r\n]+$/, '');
  const elapsed = Number(process.hrtime.bigint() - started) / 1e9;

  if (error === null && timeoutMs > 0 && elapsed * 1000 > timeoutMs) {
    error = `timed out after ${testCase.timeout}s`;
  }

  return {
    test_name: testCase.name,
    passed: error === null && actual.trim() === testCase.expected.trim(),
    actual_output: actual,
    expected_output: testCase.expected,
    execution_time: elapsed,
    error_message: error,
  };
}

async function main() {
  const source = fs.readFileSync(SOURCE_PATH, 'utf8');
  const loaded = loadSolution();
  if (loaded.error instanceof SyntaxError) {
    await emit([], describe(loaded.error));
    return 1;
  }

  const entry = loaded.error === null ? resolveEntry(loaded.exported) : null;
  const results = [];
  for (const testCase of CASES) {
    results.push(await runCase(entry, source, testCase));
  }
  await emit(results, null);
  return 0;
}

main().then(
  (code) => process.exit(code),
  async (err) => {
    await emit([], describe(err));
    process.exit(1);
  },
);
"##;

pub(super) fn render(entry_point: &str, source_path: &str, encoded_cases: &str) -> String {
    fill(
        TEMPLATE,
        &[
            ("PROTOCOL", &PROTOCOL_VERSION.to_string()),
            ("ENTRY_POINT", entry_point),
            ("SOURCE_PATH", source_path),
            ("CASES", encoded_cases),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TestResult;
    use crate::harness::protocol::parse_output;

    #[test]
    fn test_render_fills_every_placeholder() {
        let source = render("solution", "/code/solution.js", "W10=");
        assert!(source.starts_with("'use strict';\nconst CASES = JSON.parse(Buffer.from('W10='"));
        assert!(source.contains("const ENTRY_POINT = 'solution';"));
        assert!(!source.contains("{{"));
    }

    #[test]
    fn test_report_line_reaches_parser() {
        // JSON.stringify output: compact, exponent form for tiny numbers
        let line = r#"{"protocol":1,"test_results":[{"test_name":"sum","passed":true,"actual_output":"3\n","expected_output":"3","execution_time":1e-7,"error_message":null},{"test_name":"slow","passed":false,"actual_output":"","expected_output":"9","execution_time":0.5,"error_message":"timed out after 0.25s"}],"fatal_error":null}"#;

        let parsed = parse_output(&format!("{}\n", line));

        assert!(parsed.matched);
        assert_eq!(parsed.output, "");
        assert_eq!(
            parsed.test_results,
            vec![
                TestResult {
                    test_name: "sum".into(),
                    passed: true,
                    actual_output: "3\n".into(),
                    expected_output: "3".into(),
                    execution_time: 1e-7,
                    error_message: None,
                },
                TestResult {
                    test_name: "slow".into(),
                    passed: false,
                    actual_output: "".into(),
                    expected_output: "9".into(),
                    execution_time: 0.5,
                    error_message: Some("timed out after 0.25s".into()),
                },
            ]
        );
    }

    #[test]
    fn test_fatal_report_line_reaches_parser() {
        let line = r#"{"protocol":1,"test_results":[],"fatal_error":"SyntaxError: Unexpected token ')'"}"#;

        let parsed = parse_output(line);

        assert!(parsed.matched);
        assert!(parsed.test_results.is_empty());
        assert_eq!(
            parsed.fatal_error.as_deref(),
            Some("SyntaxError: Unexpected token ')'")
        );
    }
}
