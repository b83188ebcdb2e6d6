//! Process exit codes.

use std::process::ExitCode;

use mediaprobe_core::RunSummary;

/// Outcome of the whole process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Every item settled without failures.
    Success,
    /// Some items failed or the run was interrupted; rerun to resume.
    Incomplete,
    /// The run could not proceed.
    Fatal,
}

impl ProcessExit {
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Incomplete => 1,
            Self::Fatal => 2,
        }
    }
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        ExitCode::from(exit.code())
    }
}

/// Maps the worker counts of a finished run to the exit outcome.
pub(crate) fn determine_exit_outcome(summary: &RunSummary) -> ProcessExit {
    if summary.is_clean() {
        ProcessExit::Success
    } else {
        ProcessExit::Incomplete
    }
}
