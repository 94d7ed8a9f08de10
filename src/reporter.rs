//! Test result reporting (pytest-style)
//!
//! The harness reports through the [`TestReporter`] trait, so output formats
//! other than the console one (JSON, TAP, ...) only need a new implementation.

use std::fmt;
use std::io::{self, IsTerminal, Stdout, Write};
use std::time::Duration;

use crate::tb::Traceback;

/// The test being reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestInfo {
    /// Dotted ancestor ids, excluding the top-level suite
    pub path: String,
    /// Jasmine's full name
    pub name: String,
    pub description: String,
}

/// One failed expectation of a spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionFailure {
    pub message: String,
    /// Absent when the stack held no user frame
    pub traceback: Option<Traceback>,
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(traceback) = &self.traceback {
            write!(f, "{}", traceback)?;
        }
        write!(f, "AssertionError: {}", self.message)
    }
}

/// Counts of a finished run: one per test, plus one error per failed suite
/// hook, so `total` is the sum of the other counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub skipped: usize,
    pub duration: Duration,
}

impl TestSummary {
    pub fn was_successful(&self) -> bool {
        self.failed == 0 && self.errors == 0
    }
}

/// Receives the outcome of every test as the run progresses.
///
/// Between `on_test_start` and `on_test_stop` a test may report several
/// outcomes: one failure per failed expectation, plus errors raised by its
/// hooks.
pub trait TestReporter {
    /// Called once, before the first test starts
    fn on_collection_complete(&mut self, _test_count: usize) {}

    fn on_test_start(&mut self, test: &TestInfo);

    fn on_success(&mut self, test: &TestInfo);

    fn on_skip(&mut self, test: &TestInfo, reason: &str);

    fn on_failure(&mut self, test: &TestInfo, failure: &AssertionFailure);

    /// A problem outside the spec itself, such as a failing hook
    fn on_error(&mut self, test: &TestInfo, error: &str);

    fn on_test_stop(&mut self, _test: &TestInfo) {}

    /// Called when all tests have completed
    fn on_run_complete(&mut self, summary: &TestSummary);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Verdict {
    Passed,
    Skipped,
    Failed,
    Error,
}

/// Default console reporter (pytest-style)
pub struct ConsoleReporter<W: Write = Stdout> {
    out: W,
    verbose: bool,
    color: bool,
    current: Option<(Verdict, String)>,
    problems: Vec<(String, String)>,
}

impl ConsoleReporter<Stdout> {
    /// Report to stdout, coloured when it is a terminal.
    pub fn new(verbose: bool) -> Self {
        let out = io::stdout();
        let color = out.is_terminal();
        Self::with_writer(out, verbose).with_color(color)
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn with_writer(out: W, verbose: bool) -> Self {
        Self {
            out,
            verbose,
            color: false,
            current: None,
            problems: Vec::new(),
        }
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.color {
            format!("\x1b[{}m{}\x1b[0m", code, text)
        } else {
            text.to_string()
        }
    }

    fn settle(&mut self, verdict: Verdict, detail: String) {
        match &self.current {
            Some((worst, _)) if *worst >= verdict => {}
            _ => self.current = Some((verdict, detail)),
        }
    }

    // Output errors are ignored; a broken pipe must not abort the run.
    fn emit(&mut self, text: &str) {
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.flush();
    }
}

impl<W: Write> TestReporter for ConsoleReporter<W> {
    fn on_collection_complete(&mut self, test_count: usize) {
        let header = self.paint("1", "=================== test session starts ===================");
        self.emit(&format!("{}\ncollected {} items\n\n", header, test_count));
    }

    fn on_test_start(&mut self, test: &TestInfo) {
        self.current = None;
        if self.verbose {
            self.emit(&format!("{} ... ", test.path));
        }
    }

    fn on_success(&mut self, _test: &TestInfo) {
        self.settle(Verdict::Passed, String::new());
    }

    fn on_skip(&mut self, _test: &TestInfo, reason: &str) {
        self.settle(Verdict::Skipped, reason.to_string());
    }

    fn on_failure(&mut self, test: &TestInfo, failure: &AssertionFailure) {
        self.settle(Verdict::Failed, String::new());
        self.problems.push((test.path.clone(), failure.to_string()));
    }

    fn on_error(&mut self, test: &TestInfo, error: &str) {
        self.settle(Verdict::Error, String::new());
        self.problems.push((test.path.clone(), format!("Error: {}", error)));
    }

    fn on_test_stop(&mut self, _test: &TestInfo) {
        let Some((verdict, detail)) = self.current.take() else {
            return;
        };
        let status = match (verdict, self.verbose) {
            (Verdict::Passed, true) => self.paint("32", "PASSED"),
            (Verdict::Passed, false) => self.paint("32", "."),
            (Verdict::Failed, true) => self.paint("31", "FAILED"),
            (Verdict::Failed, false) => self.paint("31", "F"),
            (Verdict::Error, true) => self.paint("31", "ERROR"),
            (Verdict::Error, false) => self.paint("31", "E"),
            (Verdict::Skipped, true) if detail.is_empty() => self.paint("33", "SKIPPED"),
            (Verdict::Skipped, true) => format!("{} ({})", self.paint("33", "SKIPPED"), detail),
            (Verdict::Skipped, false) => self.paint("33", "s"),
        };
        if self.verbose {
            self.emit(&format!("{}\n", status));
        } else {
            self.emit(&status);
        }
    }

    fn on_run_complete(&mut self, summary: &TestSummary) {
        let mut text = String::new();
        if !self.verbose {
            text.push('\n');
        }

        if !self.problems.is_empty() {
            text.push('\n');
            text.push_str(&self.paint("1;31", "=================== FAILURES ==================="));
            text.push('\n');
            for (path, body) in &self.problems {
                text.push('\n');
                text.push_str(&self.paint("1", &format!("___________ {} ___________", path)));
                text.push_str("\n\n");
                for line in body.lines() {
                    text.push_str(&format!("    {}\n", line));
                }
            }
        }

        let mut parts = Vec::new();
        if summary.passed > 0 {
            parts.push(format!("{} passed", summary.passed));
        }
        if summary.failed > 0 {
            parts.push(format!("{} failed", summary.failed));
        }
        if summary.errors > 0 {
            parts.push(format!("{} errors", summary.errors));
        }
        if summary.skipped > 0 {
            parts.push(format!("{} skipped", summary.skipped));
        }
        if parts.is_empty() {
            parts.push("no tests ran".to_string());
        }

        let line = format!(
            "=================== {} in {:.2}s ===================",
            parts.join(", "),
            summary.duration.as_secs_f64()
        );
        let code = if summary.was_successful() { "1;32" } else { "1;31" };
        text.push('\n');
        text.push_str(&self.paint(code, &line));
        text.push('\n');
        self.emit(&text);
    }
}
