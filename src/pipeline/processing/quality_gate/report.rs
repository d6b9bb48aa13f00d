use super::{ValidationLevel, ValidationSummary};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            other => Err(format!("unknown report format: {}", other)),
        }
    }
}

impl ValidationSummary {
    /// Render the summary for operators. `threshold` decides the PASS/FAIL line.
    pub fn to_report(&self, format: ReportFormat, threshold: f64) -> String {
        match format {
            ReportFormat::Json => self.json_report(threshold),
            ReportFormat::Text => self.text_report(threshold),
        }
    }

    fn json_report(&self, threshold: f64) -> String {
        let doc = json!({
            "total_checks": self.total(),
            "passed_checks": self.passed(),
            "failed_checks": self.failed(),
            "warnings": self.failed_at(ValidationLevel::Warning),
            "errors": self.failed_at(ValidationLevel::Error),
            "critical_issues": self.failed_at(ValidationLevel::Critical),
            "pass_rate": self.pass_rate(),
            "is_valid": self.is_valid(threshold),
            "results": self.results(),
        });
        serde_json::to_string_pretty(&doc).unwrap_or_else(|_| doc.to_string())
    }

    fn text_report(&self, threshold: f64) -> String {
        let rule = "=".repeat(60);
        let mut lines = vec![
            rule.clone(),
            "DATA VALIDATION REPORT".to_string(),
            rule,
            format!("Total Checks: {}", self.total()),
            format!(
                "Passed: {} ({:.1}%)",
                self.passed(),
                self.pass_rate() * 100.0
            ),
            format!("Failed: {}", self.failed()),
            format!("  Warnings: {}", self.failed_at(ValidationLevel::Warning)),
            format!("  Errors: {}", self.failed_at(ValidationLevel::Error)),
            format!("  Critical: {}", self.failed_at(ValidationLevel::Critical)),
            format!(
                "Overall Status: {}",
                if self.is_valid(threshold) { "PASS" } else { "FAIL" }
            ),
            String::new(),
            "FAILED CHECKS:".to_string(),
        ];

        for result in self.failures() {
            lines.push(String::new());
            lines.push(format!("{}: {}", result.level(), result.check_name()));
            lines.push(format!("  Message: {}", result.message()));
            for (key, value) in result.details() {
                lines.push(format!("  {}: {}", key, value));
            }
        }
        lines.join("\n")
    }
}
