//! Java harness
//!
//! A `Harness` class compiled alongside `Solution`. It reflects on
//! `Solution`, preferring `static <entry>(String)` over `main(String[])`,
//! and runs each case on a daemon worker so a stuck case can be abandoned.

use super::{encode_text, fill, protocol::PROTOCOL_VERSION, CaseData};

const TEMPLATE: &str = r##"import java.io.ByteArrayInputStream;
import java.io.ByteArrayOutputStream;
import java.io.InputStream;
import java.io.PrintStream;
import java.lang.reflect.InvocationTargetException;
import java.lang.reflect.Method;
import java.lang.reflect.Modifier;
import java.nio.charset.StandardCharsets;
import java.util.ArrayList;
import java.util.Base64;
import java.util.List;
import java.util.concurrent.ExecutionException;
import java.util.concurrent.ExecutorService;
import java.util.concurrent.Executors;
import java.util.concurrent.Future;
import java.util.concurrent.TimeUnit;
import java.util.concurrent.TimeoutException;

public class Harness {
    static final int PROTOCOL_VERSION = {{PROTOCOL}};
    static final String ENTRY_POINT = "{{ENTRY_POINT}}";
    static final String[] NAMES = { {{NAMES}} };
    static final String[] INPUTS = { {{INPUTS}} };
    static final String[] EXPECTED = { {{EXPECTED}} };
    static final double[] TIMEOUTS = { {{TIMEOUTS}} };

    static ExecutorService worker = newWorker();

    static ExecutorService newWorker() {
        return Executors.newSingleThreadExecutor(task -> {
            Thread thread = new Thread(task, "harness-case");
            thread.setDaemon(true);
            return thread;
        });
    }

    static String decode(String encoded) {
        return new String(Base64.getDecoder().decode(encoded), StandardCharsets.UTF_8);
    }

    static String quote(String value) {
        StringBuilder sb = new StringBuilder("\"");
        for (char c : value.toCharArray()) {
            switch (c) {
                case '"': sb.append("\\\""); break;
                case '\\': sb.append("\\\\"); break;
                case '\n': sb.append("\\n"); break;
                case '\r': sb.append("\\r"); break;
                case '\t': sb.append("\\t"); break;
                default:
                    if (c < 0x20) {
                        sb.append(String.format("\\u%04x", (int) c));
                    } else {
                        sb.append(c);
                    }
            }
        }
        return sb.append('"').toString();
    }

    static String report(List<String> results, String fatalError) {
        return "{\"protocol\":" + PROTOCOL_VERSION
            + ",\"test_results\":[" + String.join(",", results) + "]"
            + ",\"fatal_error\":" + (fatalError == null ? "null" : quote(fatalError)) + "}";
    }

    static Method findStatic(Class<?> type, String name, Class<?> parameter) {
        try {
            Method method = type.getMethod(name, parameter);
            return Modifier.isStatic(method.getModifiers()) ? method : null;
        } catch (NoSuchMethodException e) {
            return null;
        }
    }

    static String describe(Throwable error) {
        if (error instanceof InvocationTargetException && error.getCause() != null) {
            error = error.getCause();
        }
        String message = error.getMessage();
        String name = error.getClass().getSimpleName();
        return message == null ? name : name + ": " + message;
    }

    static String stripNewlines(String text) {
        int end = text.length();
        while (end > 0 && (text.charAt(end - 1) == '\n' || text.charAt(end - 1) == '\r')) {
            end--;
        }
        return text.substring(0, end);
    }

    static String runCase(Method entry, Method main, int index) {
        String name = decode(NAMES[index]);
        String input = decode(INPUTS[index]);
        String expected = decode(EXPECTED[index]);
        double timeout = TIMEOUTS[index];

        PrintStream realOut = System.out;
        InputStream realIn = System.in;
        ByteArrayOutputStream buffer = new ByteArrayOutputStream();
        PrintStream capture = new PrintStream(buffer, true, StandardCharsets.UTF_8);
        String error = null;
        long started = System.nanoTime();

        System.setOut(capture);
        System.setIn(new ByteArrayInputStream(input.getBytes(StandardCharsets.UTF_8)));
        Future<Object> future = worker.submit(() -> entry != null
            ? entry.invoke(null, input)
            : main.invoke(null, (Object) new String[0]));
        try {
            Object value = timeout > 0
                ? future.get((long) Math.ceil(timeout * 1000), TimeUnit.MILLISECONDS)
                : future.get();
            if (value != null) {
                capture.println(value);
            }
        } catch (TimeoutException e) {
            future.cancel(true);
            worker.shutdownNow();
            worker = newWorker();
            error = "timed out after " + timeout + "s";
        } catch (ExecutionException e) {
            error = describe(e.getCause() == null ? e : e.getCause());
        } catch (InterruptedException e) {
            Thread.currentThread().interrupt();
            error = "interrupted";
        } finally {
            capture.flush();
            System.setOut(realOut);
            System.setIn(realIn);
        }
        double elapsed = (System.nanoTime() - started) / 1e9;

        String actual = stripNewlines(buffer.toString(StandardCharsets.UTF_8));
        boolean passed = error == null && actual.trim().equals(expected.trim());
        return "{\"test_name\":" + quote(name)
            + ",\"passed\":" + passed
            + ",\"actual_output\":" + quote(actual)
            + ",\"expected_output\":" + quote(expected)
            + ",\"execution_time\":" + elapsed
            + ",\"error_message\":" + (error == null ? "null" : quote(error)) + "}";
    }

    public static void main(String[] args) {
        PrintStream realOut = System.out;
        List<String> results = new ArrayList<>();
        Class<?> solution;
        try {
            solution = Class.forName("Solution");
        } catch (Throwable t) {
            realOut.println(report(results, "could not load class Solution: " + describe(t)));
            realOut.flush();
            System.exit(1);
            return;
        }

        Method entry = findStatic(solution, ENTRY_POINT, String.class);
        Method main = entry == null ? findStatic(solution, "main", String[].class) : null;
        if (entry == null && main == null) {
            realOut.println(report(results,
                "class Solution defines neither static " + ENTRY_POINT + "(String) nor main(String[])"));
            realOut.flush();
            System.exit(1);
            return;
        }

        for (int i = 0; i < NAMES.length; i++) {
            results.add(runCase(entry, main, i));
        }
        realOut.println(report(results, null));
        realOut.flush();
        System.exit(0);
    }
}
"##;

/// Test data laid out as parallel Java array initializers
pub(super) struct JavaCases {
    names: String,
    inputs: String,
    expected: String,
    timeouts: String,
}

impl JavaCases {
    pub(super) fn from_cases(cases: &[CaseData<'_>]) -> Self {
        let strings = |values: Vec<&str>| {
            values
                .into_iter()
                .map(|value| format!("\"{}\"", encode_text(value)))
                .collect::<Vec<_>>()
                .join(", ")
        };

        Self {
            names: strings(cases.iter().map(|case| case.name).collect()),
            inputs: strings(cases.iter().map(|case| case.input).collect()),
            expected: strings(cases.iter().map(|case| case.expected).collect()),
            timeouts: cases
                .iter()
                .map(|case| format!("{:?}", case.timeout))
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

pub(super) fn render(entry_point: &str, cases: &JavaCases) -> String {
    fill(
        TEMPLATE,
        &[
            ("PROTOCOL", &PROTOCOL_VERSION.to_string()),
            ("ENTRY_POINT", entry_point),
            ("NAMES", &cases.names),
            ("INPUTS", &cases.inputs),
            ("EXPECTED", &cases.expected),
            ("TIMEOUTS", &cases.timeouts),
        ],
    )
}
