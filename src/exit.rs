use std::fmt;

/// Process exit status. Findings never change it; only the run itself can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    /// Bad flags, config file or environment, detected before scanning.
    InvalidArgs = 2,
    /// Nothing under the sysroot could be inspected.
    ScanFailed = 10,
    /// The report could not be serialized or written.
    ReportFailed = 20,
}

impl ExitCode {
    pub const fn as_i32(self) -> i32 {
        self as i32
    }
}

#[derive(Debug)]
pub struct ExitError {
    pub code: ExitCode,
    pub err: anyhow::Error,
}

impl ExitError {
    pub fn new(code: ExitCode, err: anyhow::Error) -> Self {
        Self { code, err }
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.err.fmt(f)
    }
}

impl std::error::Error for ExitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.err.source()
    }
}

pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<ExitError>()
        .map_or(ExitCode::ScanFailed, |exit| exit.code)
        .as_i32()
}

pub fn invalid_args(message: impl Into<String>) -> anyhow::Error {
    ExitError::new(ExitCode::InvalidArgs, anyhow::anyhow!(message.into())).into()
}

pub fn invalid_args_err(err: anyhow::Error) -> anyhow::Error {
    ExitError::new(ExitCode::InvalidArgs, err).into()
}

pub fn scan_failed(message: impl Into<String>) -> anyhow::Error {
    ExitError::new(ExitCode::ScanFailed, anyhow::anyhow!(message.into())).into()
}

pub fn report_failed_err(err: anyhow::Error) -> anyhow::Error {
    ExitError::new(ExitCode::ReportFailed, err).into()
}
