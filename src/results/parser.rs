//! JUnit-style result document parsing.
//!
//! The execution service writes one `testsuite` element per batch with one
//! `testcase` element per test. Parsing is lenient on purpose: a missing or
//! malformed field degrades to its default for that field only, and only an
//! XML syntax error fails the whole document.

#![allow(missing_docs)]

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::core::errors::{HarnessError, Result};

/// Placeholder for identifiers the document does not carry.
pub const UNKNOWN_FIELD: &str = "???";
/// Status of a case with no failure markers.
pub const PASSED: &str = "PASSED";
/// Seed reported for suites that did not record one.
pub const UNKNOWN_SEED: i64 = -1;

const MARKER_TAGS: [&str; 3] = ["error", "failure", "skipped"];

/// One assertion-bearing test case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestCase {
    pub name: String,
    pub classname: String,
    pub file: String,
    pub lineno: String,
    /// Wall-clock duration in seconds.
    pub time_s: f64,
    /// Simulated duration in nanoseconds.
    pub sim_time_ns: f64,
    /// Simulated nanoseconds per wall-clock second; 0 when `time_s` is 0.
    pub ratio_time: f64,
    /// Comma-joined failure markers, or [`PASSED`].
    pub status: String,
}

impl TestCase {
    pub fn passed(&self) -> bool {
        self.status == PASSED
    }

    pub fn has_marker(&self, marker: &str) -> bool {
        self.status.split(", ").any(|m| m == marker)
    }
}

/// One execution batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestSuite {
    /// Seed recorded by the execution service, if any.
    pub random_seed: Option<u32>,
    pub test_cases: Vec<TestCase>,
    pub errors: usize,
    pub failures: usize,
    pub skipped: usize,
    pub total_sim_time_ns: f64,
}

impl TestSuite {
    /// Recorded seed, or [`UNKNOWN_SEED`] when none was recorded.
    pub fn seed_or_sentinel(&self) -> i64 {
        self.random_seed.map_or(UNKNOWN_SEED, i64::from)
    }

    pub fn passed(&self) -> bool {
        self.errors == 0 && self.failures == 0
    }
}

/// Parse the result document at `path`.
pub fn parse_results_file(path: &Path) -> Result<Vec<TestSuite>> {
    let raw = fs::read_to_string(path).map_err(|source| HarnessError::io(path, source))?;
    parse_results_str(&raw).map_err(|err| match err {
        HarnessError::ResultParse { details, .. } => HarnessError::ResultParse {
            path: path.to_path_buf(),
            details,
        },
        other => other,
    })
}

/// Parse a result document held in memory. Suites and cases keep document order.
pub fn parse_results_str(raw: &str) -> Result<Vec<TestSuite>> {
    let doc = roxmltree::Document::parse(raw).map_err(|e| HarnessError::ResultParse {
        path: std::path::PathBuf::from("<memory>"),
        details: e.to_string(),
    })?;

    Ok(doc
        .descendants()
        .filter(|node| node.has_tag_name("testsuite"))
        .map(parse_suite)
        .collect())
}

fn parse_suite(node: roxmltree::Node<'_, '_>) -> TestSuite {
    let test_cases: Vec<TestCase> = node
        .descendants()
        .filter(|n| n.has_tag_name("testcase"))
        .map(parse_case)
        .collect();

    let count = |marker: &str| test_cases.iter().filter(|tc| tc.has_marker(marker)).count();

    TestSuite {
        random_seed: suite_seed(node),
        errors: count("ERROR"),
        failures: count("FAILURE"),
        skipped: count("SKIPPED"),
        total_sim_time_ns: test_cases.iter().map(|tc| tc.sim_time_ns).sum(),
        test_cases,
    }
}

/// `random_seed` attribute, falling back to a `<property name="random_seed">` child.
fn suite_seed(node: roxmltree::Node<'_, '_>) -> Option<u32> {
    let raw = node.attribute("random_seed").or_else(|| {
        node.descendants()
            .filter(|n| n.has_tag_name("property"))
            .find(|n| n.attribute("name") == Some("random_seed"))
            .and_then(|n| n.attribute("value"))
    })?;
    raw.trim().parse::<u32>().ok()
}

fn parse_case(node: roxmltree::Node<'_, '_>) -> TestCase {
    let text = |name: &str| node.attribute(name).unwrap_or(UNKNOWN_FIELD).to_string();

    let time_s = parse_f64_or_zero(node.attribute("time"));
    let sim_time_ns = match node.attribute("sim_time_ns") {
        Some(ns) => parse_f64_or_zero(Some(ns)),
        None => parse_f64_or_zero(node.attribute("sim_time_ps")) / 1e3,
    };
    let ratio_time = if time_s > 0.0 {
        sim_time_ns / time_s
    } else {
        0.0
    };

    let markers: Vec<String> = node
        .children()
        .filter(|c| c.is_element())
        .map(|c| c.tag_name().name())
        .filter(|tag| MARKER_TAGS.iter().any(|m| tag.eq_ignore_ascii_case(m)))
        .map(str::to_ascii_uppercase)
        .collect();
    let status = if markers.is_empty() {
        PASSED.to_string()
    } else {
        markers.join(", ")
    };

    TestCase {
        name: text("name"),
        classname: text("classname"),
        file: text("file"),
        lineno: text("lineno"),
        time_s,
        sim_time_ns,
        ratio_time,
        status,
    }
}

/// Parse a float field; absent, malformed or non-finite values become 0.
fn parse_f64_or_zero(raw: Option<&str>) -> f64 {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}
