use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Which extraction strategy was applied to a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    Pytest,
    Pylint,
    Lint,
    Typecheck,
    Generic,
}

impl ExtractorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pytest => "pytest",
            Self::Pylint => "pylint",
            Self::Lint => "lint",
            Self::Typecheck => "typecheck",
            Self::Generic => "generic",
        }
    }
}

/// Structured failure summary extracted from a raw job trace.
///
/// Built fresh on every inspection, never cached. Absent fields mean the
/// strategy found nothing to report, not that extraction failed.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    #[serde(rename = "type")]
    pub kind: ExtractorKind,
    pub short_summary: Option<String>,
    pub detailed_failures: Option<String>,
    pub stderr: Option<String>,
    pub error_lines: Vec<String>,
}

impl FailureReport {
    fn empty(kind: ExtractorKind) -> Self {
        Self {
            kind,
            short_summary: None,
            detailed_failures: None,
            stderr: None,
            error_lines: Vec::new(),
        }
    }
}

/// Picks an extraction strategy from a job's display name.
///
/// Case-insensitive substring tests, first match wins. This is a
/// naming-convention heuristic: a job named "unit-lint-check" classifies as
/// pytest because the test rule is checked before the lint rule. The rule
/// order is load-bearing for existing callers and must not be reordered.
pub fn classify(job_name: &str) -> ExtractorKind {
    let name = job_name.to_lowercase();

    if name.contains("pylint") {
        ExtractorKind::Pylint
    } else if ["test", "pytest", "integration", "unit"]
        .iter()
        .any(|word| name.contains(word))
    {
        ExtractorKind::Pytest
    } else if name.contains("ruff") || name.contains("lint") {
        ExtractorKind::Lint
    } else if name.contains("mypy") || name.contains("type") {
        ExtractorKind::Typecheck
    } else {
        ExtractorKind::Generic
    }
}

/// Extracts a failure summary from a raw trace, dispatching on job name.
pub fn extract(trace: &str, job_name: &str) -> FailureReport {
    match classify(job_name) {
        ExtractorKind::Pytest => extract_pytest(trace),
        ExtractorKind::Pylint => extract_pylint(trace),
        ExtractorKind::Lint => extract_lint(trace),
        ExtractorKind::Typecheck => extract_typecheck(trace),
        ExtractorKind::Generic => extract_generic(trace),
    }
}

static PYTEST_SUMMARY_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*={5,}\s*short test summary info\s*={5,}\s*$").unwrap()
});
static PYTEST_FAILURES_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*={5,}\s*FAILURES\s*={5,}\s*$").unwrap());
static PYTEST_STDERR_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-=]{5,}\s*Captured stderr call\s*[-=]{5,}\s*$").unwrap());
static EQUALS_DELIMITER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*={5,}").unwrap());

/// Collects the block introduced by `header`, ending where `terminator`
/// matches or at end of text. Returns None when the header never appears or
/// the captured block is blank.
fn capture_block(
    lines: &[&str],
    header: &Regex,
    terminator: &Regex,
    include_header: bool,
) -> Option<String> {
    let start = lines.iter().position(|line| header.is_match(line))?;

    let mut block: Vec<&str> = Vec::new();
    if include_header {
        block.push(lines[start]);
    }
    for line in &lines[start + 1..] {
        if terminator.is_match(line) {
            break;
        }
        block.push(line);
    }

    let text = block.join("\n").trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Pytest traces carry up to three independent sections: the short summary,
/// the FAILURES detail, and captured stderr. The captures may overlap in the
/// source and each is optional.
fn extract_pytest(trace: &str) -> FailureReport {
    let mut report = FailureReport::empty(ExtractorKind::Pytest);
    let lines: Vec<&str> = trace.lines().collect();

    report.short_summary = capture_block(
        &lines,
        &PYTEST_SUMMARY_HEADER,
        &EQUALS_DELIMITER,
        true,
    );
    report.detailed_failures = capture_block(
        &lines,
        &PYTEST_FAILURES_HEADER,
        &PYTEST_STDERR_HEADER,
        true,
    );
    report.stderr = capture_block(&lines, &PYTEST_STDERR_HEADER, &EQUALS_DELIMITER, false);

    report
}

static PYLINT_MODULE_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\*+\s*Module\s+(.+)$").unwrap());
static PYLINT_VIOLATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.+\.py:\d+:\d+:\s+[A-Z]\d+:").unwrap());
static JOB_EXIT_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ERROR: Job failed: command terminated with exit code (\d+)").unwrap()
});

const PYLINT_MAX_VIOLATIONS: usize = 20;

fn extract_pylint(trace: &str) -> FailureReport {
    let mut report = FailureReport::empty(ExtractorKind::Pylint);

    // Violation lines only count inside a "***** Module path" section
    let mut in_module = false;
    let mut violations: Vec<String> = Vec::new();
    for line in trace.lines() {
        if PYLINT_MODULE_HEADER.is_match(line) {
            in_module = true;
        } else if in_module && PYLINT_VIOLATION.is_match(line) {
            violations.push(line.trim().to_string());
        }
    }

    if !violations.is_empty() {
        let mut summary = format!(
            "Pylint found {} violation(s):\n{}",
            violations.len(),
            violations[..violations.len().min(PYLINT_MAX_VIOLATIONS)].join("\n")
        );
        if violations.len() > PYLINT_MAX_VIOLATIONS {
            summary.push_str(&format!(
                "\n... and {} more violations",
                violations.len() - PYLINT_MAX_VIOLATIONS
            ));
        }
        report.short_summary = Some(summary);
    } else if let Some(captures) = JOB_EXIT_CODE.captures(trace) {
        report.short_summary = Some(format!("Pylint failed with exit code {}", &captures[1]));
    }

    report
}

static LINT_ISSUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+\.py):(\d+):(\d+):\s+([A-Z]\d+)\s+(.+)$").unwrap());

const LINT_MAX_ISSUES: usize = 15;

fn extract_lint(trace: &str) -> FailureReport {
    let mut report = FailureReport::empty(ExtractorKind::Lint);

    let issues: Vec<String> = trace
        .lines()
        .filter(|line| LINT_ISSUE.is_match(line))
        .map(|line| line.trim().to_string())
        .collect();

    if !issues.is_empty() {
        let mut summary = format!(
            "Linting found {} issue(s):\n{}",
            issues.len(),
            issues[..issues.len().min(LINT_MAX_ISSUES)].join("\n")
        );
        if issues.len() > LINT_MAX_ISSUES {
            summary.push_str(&format!(
                "\n... and {} more issues",
                issues.len() - LINT_MAX_ISSUES
            ));
        }
        report.short_summary = Some(summary);
    }

    report
}

static TYPECHECK_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+\.py):(\d+):\s+error:\s+(.+)$").unwrap());

const TYPECHECK_MAX_ERRORS: usize = 15;

fn extract_typecheck(trace: &str) -> FailureReport {
    let mut report = FailureReport::empty(ExtractorKind::Typecheck);

    let errors: Vec<String> = trace
        .lines()
        .filter(|line| TYPECHECK_ERROR.is_match(line))
        .map(|line| line.trim().to_string())
        .collect();

    if !errors.is_empty() {
        let mut summary = format!(
            "Type checking found {} error(s):\n{}",
            errors.len(),
            errors[..errors.len().min(TYPECHECK_MAX_ERRORS)].join("\n")
        );
        if errors.len() > TYPECHECK_MAX_ERRORS {
            summary.push_str(&format!(
                "\n... and {} more errors",
                errors.len() - TYPECHECK_MAX_ERRORS
            ));
        }
        report.short_summary = Some(summary);
    }

    report
}

const GENERIC_CONTEXT_LINES: usize = 30;
const GENERIC_MAX_ERROR_LINES: usize = 20;
const GENERIC_KEYWORDS: [&str; 5] = ["error", "failed", "exception", "fatal", "abort"];

/// Fallback for unrecognized job types: the tail before the runner's
/// "Job failed" marker when present, otherwise a keyword scan.
fn extract_generic(trace: &str) -> FailureReport {
    let mut report = FailureReport::empty(ExtractorKind::Generic);
    let lines: Vec<&str> = trace.lines().collect();

    if let Some(failed_index) = lines.iter().position(|line| line.contains("Job failed")) {
        let start = failed_index.saturating_sub(GENERIC_CONTEXT_LINES);
        let context = lines[start..=failed_index].join("\n");
        report.short_summary = Some(format!("Job failed. Last 30 lines:\n{context}"));
        return report;
    }

    let error_lines: Vec<String> = lines
        .iter()
        .filter(|line| {
            let lower = line.to_lowercase();
            GENERIC_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
        })
        .take(GENERIC_MAX_ERROR_LINES)
        .map(|line| line.trim().to_string())
        .collect();

    if !error_lines.is_empty() {
        report.short_summary = Some(format!("Error lines found:\n{}", error_lines.join("\n")));
        report.error_lines = error_lines;
    }

    report
}
