//! Result documents: typed suites and cases plus batch-level tallies.

pub mod parser;

use serde::Serialize;

pub use parser::{TestCase, TestSuite, parse_results_file, parse_results_str};

/// Aggregate counts over any number of suites.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ResultSummary {
    pub suites: usize,
    pub cases: usize,
    pub passed: usize,
    pub errors: usize,
    pub failures: usize,
    pub skipped: usize,
    pub total_sim_time_ns: f64,
}

impl ResultSummary {
    pub fn from_suites<'a>(suites: impl IntoIterator<Item = &'a TestSuite>) -> Self {
        let mut summary = Self::default();
        for suite in suites {
            summary.suites += 1;
            summary.cases += suite.test_cases.len();
            summary.passed += suite.test_cases.iter().filter(|c| c.passed()).count();
            summary.errors += suite.errors;
            summary.failures += suite.failures;
            summary.skipped += suite.skipped;
            summary.total_sim_time_ns += suite.total_sim_time_ns;
        }
        summary
    }

    pub fn all_passed(&self) -> bool {
        self.errors == 0 && self.failures == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_adds_up_suites() {
        let xml = r#"<testsuites>
            <testsuite><testcase name="a" sim_time_ns="10"/><testcase name="b"><error/></testcase></testsuite>
            <testsuite><testcase name="c" sim_time_ns="5"><failure/></testcase></testsuite>
        </testsuites>"#;
        let suites = parse_results_str(xml).unwrap();
        let summary = ResultSummary::from_suites(&suites);
        assert_eq!(summary.suites, 2);
        assert_eq!(summary.cases, 3);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.failures, 1);
        assert!((summary.total_sim_time_ns - 15.0).abs() < 1e-9);
        assert!(!summary.all_passed());
    }

    #[test]
    fn empty_summary_passes() {
        let summary = ResultSummary::from_suites(std::iter::empty());
        assert_eq!(summary, ResultSummary::default());
        assert!(summary.all_passed());
    }
}
