//! Per-run outcome statistics and the rendered report.
//!
//! Every processed resource lands in exactly one of the four buckets.
//! Rendering is a read-only projection; delivery (stdout, mail) is the
//! caller's concern.

use crate::directory::types::SecretEntry;
use chrono::Local;
use std::fmt::Write;

/// Identity of a resource, as carried into the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSummary {
    pub id: String,
    pub name: String,
}

/// A renewal that could not be completed nor rolled back. The undelivered
/// payload is retained so an operator can finish the commit by hand.
#[derive(Debug, Clone)]
pub struct FailedRenewal {
    pub resource: ResourceSummary,
    pub payload: Vec<SecretEntry>,
}

/// Outcome statistics of one renewal run.
#[derive(Debug, Default)]
pub struct RenewalStats {
    /// Resources matching the scope before any filtering.
    pub found: usize,
    /// Resources left after eligibility and access filtering.
    pub renewable: usize,
    /// Renewed and committed to the directory.
    pub success: Vec<ResourceSummary>,
    /// The external service did not accept the update.
    pub failures: Vec<ResourceSummary>,
    /// Commit failed, the external service was rolled back.
    pub rollback: Vec<ResourceSummary>,
    /// Both the commit and the rollback failed; operator action required.
    pub errors: Vec<FailedRenewal>,
}

impl RenewalStats {
    /// Number of resources that reached a terminal state.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.success.len() + self.failures.len() + self.rollback.len() + self.errors.len()
    }

    /// Whether any resource needs operator intervention.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Render the human/mail-readable summary.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Credential renewal report - {}",
            Local::now().format("%d/%m/%Y %H:%M")
        );
        let _ = writeln!(out, "{}", "=".repeat(48));
        let _ = writeln!(out, "Resources found      : {}", self.found);
        let _ = writeln!(out, "Resources renewable  : {}", self.renewable);
        let _ = writeln!(out, "Renewed              : {}", self.success.len());
        let _ = writeln!(out, "Failed (service)     : {}", self.failures.len());
        let _ = writeln!(out, "Rolled back          : {}", self.rollback.len());
        let _ = writeln!(out, "Errors (manual fix)  : {}", self.errors.len());

        Self::render_bucket(&mut out, "Renewed", &self.success);
        Self::render_bucket(&mut out, "Failed", &self.failures);
        Self::render_bucket(&mut out, "Rolled back", &self.rollback);

        if !self.errors.is_empty() {
            let _ = writeln!(out, "\n*** Heads up! ***");
            let _ = writeln!(
                out,
                "The following passwords were changed on their service but could"
            );
            let _ = writeln!(
                out,
                "not be saved in the directory, and the rollback failed too."
            );
            let _ = writeln!(
                out,
                "Complete the update manually with the encrypted payloads below."
            );
            for failed in &self.errors {
                let _ = writeln!(
                    out,
                    "- {} [{}]",
                    failed.resource.name, failed.resource.id
                );
                match serde_json::to_string(&failed.payload) {
                    Ok(json) => {
                        let _ = writeln!(out, "  payload: {}", json);
                    }
                    Err(_) => {
                        let _ = writeln!(out, "  payload: <unserializable>");
                    }
                }
            }
        }
        out
    }

    fn render_bucket(out: &mut String, label: &str, bucket: &[ResourceSummary]) {
        if bucket.is_empty() {
            return;
        }
        let _ = writeln!(out, "\n{}:", label);
        for summary in bucket {
            let _ = writeln!(out, "- {} [{}]", summary.name, summary.id);
        }
    }
}
