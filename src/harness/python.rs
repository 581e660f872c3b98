//! Python harness
//!
//! Loads the user module with stdout discarded. When the module defines the
//! entry point it is called with each input; otherwise the file is re-run
//! per case as `__main__` with stdin redirected.

use super::{fill, protocol::PROTOCOL_VERSION};

const TEMPLATE: &str = r##"import base64
import contextlib
import importlib.util
import io
import json
import runpy
import signal
import sys
import time

PROTOCOL_VERSION = {{PROTOCOL}}
ENTRY_POINT = "{{ENTRY_POINT}}"
SOURCE_PATH = "{{SOURCE_PATH}}"
CASES = json.loads(base64.b64decode("{{CASES}}").decode("utf-8"))

_real_stdout = sys.stdout
_real_stdin = sys.stdin


class CaseTimeout(Exception):
    pass


def _on_alarm(signum, frame):
    raise CaseTimeout()


def _emit(results, fatal_error=None):
    report = {
        "protocol": PROTOCOL_VERSION,
        "test_results": results,
        "fatal_error": fatal_error,
    }
    _real_stdout.write(json.dumps(report) + "\n")
    _real_stdout.flush()


def _load():
    spec = importlib.util.spec_from_file_location("solution", SOURCE_PATH)
    module = importlib.util.module_from_spec(spec)
    sys.stdin = io.StringIO("")
    try:
        with contextlib.redirect_stdout(io.StringIO()):
            spec.loader.exec_module(module)
    finally:
        sys.stdin = _real_stdin
    return module


def _describe(exc):
    message = str(exc)
    if message:
        return "%s: %s" % (type(exc).__name__, message)
    return type(exc).__name__


def _run_case(module, case):
    buffer = io.StringIO()
    error = None
    timeout = float(case.get("timeout") or 0)
    entry = getattr(module, ENTRY_POINT, None) if module is not None else None
    started = time.perf_counter()
    try:
        if timeout > 0:
            signal.signal(signal.SIGALRM, _on_alarm)
            signal.setitimer(signal.ITIMER_REAL, timeout)
        try:
            sys.stdin = io.StringIO(case["input"])
            with contextlib.redirect_stdout(buffer):
                if callable(entry):
                    value = entry(case["input"])
                    if value is not None:
                        print(value)
                else:
                    runpy.run_path(SOURCE_PATH, run_name="__main__")
        finally:
            if timeout > 0:
                signal.setitimer(signal.ITIMER_REAL, 0)
            sys.stdin = _real_stdin
    except CaseTimeout:
        error = "timed out after %.1fs" % timeout
    except SystemExit as exc:
        if exc.code not in (None, 0):
            error = "exited with status %s" % (exc.code,)
    except BaseException as exc:
        error = _describe(exc)
    elapsed = time.perf_counter() - started

    actual = buffer.getvalue().rstrip("\r\n")
    expected = case["expected"]
    return {
        "test_name": case["name"],
        "passed": error is None and actual.strip() == expected.strip(),
        "actual_output": actual,
        "expected_output": expected,
        "execution_time": elapsed,
        "error_message": error,
    }


def main():
    try:
        module = _load()
    except SyntaxError as exc:
        _emit([], "SyntaxError: %s (line %s)" % (exc.msg, exc.lineno))
        return 1
    except BaseException:
        # scripts that read input at import time run per case instead
        module = None

    results = [_run_case(module, case) for case in CASES]
    _emit(results)
    return 0


if __name__ == "__main__":
    sys.exit(main())
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
