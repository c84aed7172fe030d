//! `STATUS:<NAME>:<OK|FAIL|SKIPPED>:<message>` line protocol.

use std::fmt;

use serde::Serialize;

pub const OVERALL: &str = "OVERALL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Ok,
    Fail,
    Skipped,
}

impl HealthStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "OK" => Some(HealthStatus::Ok),
            "FAIL" => Some(HealthStatus::Fail),
            "SKIPPED" => Some(HealthStatus::Skipped),
            _ => None,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthStatus::Ok => "OK",
            HealthStatus::Fail => "FAIL",
            HealthStatus::Skipped => "SKIPPED",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
}

/// Ordered checks of one bootstrap run, `OVERALL` last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct HealthReport {
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    /// Parse script stdout. Non-status lines are ignored; a later line for the
    /// same check replaces the earlier one.
    ///
    /// `OVERALL` is always present and last. It is synthesised when the script
    /// did not print it, and forced to `FAIL` whenever any check failed.
    pub fn parse(stdout: &str) -> Self {
        let mut checks: Vec<HealthCheck> = Vec::new();
        let mut overall: Option<HealthCheck> = None;

        for line in stdout.lines() {
            let Some(check) = parse_status_line(line) else {
                continue;
            };
            if check.name == OVERALL {
                overall = Some(check);
                continue;
            }
            match checks.iter_mut().find(|c| c.name == check.name) {
                Some(existing) => *existing = check,
                None => checks.push(check),
            }
        }

        let failed: Vec<&str> = checks
            .iter()
            .filter(|c| c.status == HealthStatus::Fail)
            .map(|c| c.name.as_str())
            .collect();

        let overall = match overall {
            Some(reported) if failed.is_empty() || reported.status == HealthStatus::Fail => reported,
            _ if !failed.is_empty() => HealthCheck {
                name: OVERALL.to_string(),
                status: HealthStatus::Fail,
                message: format!("failed checks: {}", failed.join(", ")),
            },
            _ => HealthCheck {
                name: OVERALL.to_string(),
                status: HealthStatus::Ok,
                message: "all checks passed".to_string(),
            },
        };
        checks.push(overall);

        Self { checks }
    }

    /// Force `OVERALL` to `FAIL` after the script exited non-zero; checks it
    /// printed before aborting are kept as reported.
    pub fn mark_aborted(&mut self, exit_code: i32) {
        let aborted = HealthCheck {
            name: OVERALL.to_string(),
            status: HealthStatus::Fail,
            message: format!("bootstrap aborted (exit {exit_code})"),
        };
        self.checks.retain(|c| c.name != OVERALL);
        self.checks.push(aborted);
    }

    pub fn overall(&self) -> Option<&HealthCheck> {
        self.checks.iter().rev().find(|c| c.name == OVERALL)
    }

    pub fn is_healthy(&self) -> bool {
        self.overall()
            .is_some_and(|c| c.status == HealthStatus::Ok)
    }

    pub fn get(&self, name: &str) -> Option<&HealthCheck> {
        self.checks.iter().find(|c| c.name == name)
    }
}

/// Parse one `STATUS:` line. The message may itself contain colons.
pub fn parse_status_line(line: &str) -> Option<HealthCheck> {
    let rest = line.trim().strip_prefix("STATUS:")?;
    let mut parts = rest.splitn(3, ':');
    let name = parts.next()?.trim();
    let status = HealthStatus::parse(parts.next()?)?;
    let message = parts.next()?.trim();
    if name.is_empty() {
        return None;
    }
    Some(HealthCheck {
        name: name.to_string(),
        status,
        message: message.to_string(),
    })
}
