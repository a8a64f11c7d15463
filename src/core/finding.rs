use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Sudo,
    FilePermissions,
    Users,
    Processes,
    Kernel,
}

impl Category {
    pub const fn as_str(self) -> &'static str {
        match self {
            Category::Sudo => "sudo",
            Category::FilePermissions => "file_permissions",
            Category::Users => "users",
            Category::Processes => "processes",
            Category::Kernel => "kernel",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single observation produced by a check.
///
/// Built through the consuming `with_*` methods and not touched again once it
/// leaves the check that created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub check: String,
    pub category: Category,
    pub title: String,
    pub severity: Severity,
    pub description: String,
    pub remediation: Option<String>,
    /// Command line or file the observation came from.
    pub command: Option<String>,
    pub raw_output: Option<String>,
    pub timestamp: String,
}

impl Finding {
    pub fn new(
        check: &str,
        category: Category,
        severity: Severity,
        id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        let title = title.into();
        Self {
            id: id.into(),
            check: check.to_string(),
            category,
            description: title.clone(),
            title,
            severity,
            remediation: None,
            command: None,
            raw_output: None,
            timestamp: now_rfc3339(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        let output = output.into();
        if !output.trim().is_empty() {
            self.raw_output = Some(output);
        }
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}
