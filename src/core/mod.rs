mod finding;
mod report;
mod severity;

pub use finding::{Category, Finding, now_rfc3339};
pub use report::{CheckResult, HostInfo, ScanReport};
pub use severity::Severity;
