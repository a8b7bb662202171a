//! Search trace recorded while resolving a patch.

use std::fmt;

use log::trace;

use crate::descriptor::JavaType;

/// Candidate snapshot of one weak class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggedClass {
    pub name: String,
    pub matches: Vec<String>,
}

/// Indented trace of the resolution search plus the state needed to explain
/// a failure. Trace lines are only kept when the logger is enabled; the group
/// snapshot and tick count are always kept.
#[derive(Debug, Default)]
pub struct StateLogger {
    enabled: bool,
    level: usize,
    log: String,
    groups: Vec<Vec<LoggedClass>>,
    failed_ticks: u64,
}

impl StateLogger {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn println(&mut self, line: impl AsRef<str>) {
        if !self.enabled {
            return;
        }
        let line = line.as_ref();
        trace!("{}{line}", "  ".repeat(self.level));
        for _ in 0..self.level {
            self.log.push_str("  ");
        }
        self.log.push_str(line);
        self.log.push('\n');
    }

    /// Like [`StateLogger::println`], but only formats when enabled.
    pub fn println_with(&mut self, line: impl FnOnce() -> String) {
        if self.enabled {
            self.println(line());
        }
    }

    pub fn indent(&mut self) {
        self.level += 1;
    }

    pub fn unindent(&mut self) {
        self.level = self.level.saturating_sub(1);
    }

    pub fn add_group(&mut self, classes: Vec<LoggedClass>) {
        self.groups.push(classes);
    }

    pub fn set_failed_ticks(&mut self, ticks: u64) {
        self.failed_ticks = ticks;
    }

    pub fn into_failure(self) -> ResolutionFailure {
        ResolutionFailure {
            groups: self.groups,
            failed_ticks: self.failed_ticks,
            log: self.log,
        }
    }

    pub fn type_mismatch(required: &JavaType, got: &JavaType) -> String {
        format!("The type {got} did not match the required type {required}")
    }
}

/// Report of a group that no candidate assignment could satisfy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolutionFailure {
    pub groups: Vec<Vec<LoggedClass>>,
    pub failed_ticks: u64,
    pub log: String,
}

impl ResolutionFailure {
    /// Failure without a search, e.g. when a fixed scope fails validation.
    pub fn from_log(log: impl Into<String>) -> Self {
        Self {
            groups: Vec::new(),
            failed_ticks: 0,
            log: log.into(),
        }
    }
}

impl fmt::Display for ResolutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Groups: {}", self.groups.len())?;
        for group in &self.groups {
            writeln!(f, "  Classes: {}", group.len())?;
            for class in group {
                writeln!(f, "    {} {}", class.name, class.matches.len())?;
                writeln!(f, "    [ {} ]", class.matches.join(", "))?;
            }
        }
        writeln!(f, "Failed after {} tests", self.failed_ticks)?;
        writeln!(f, "Walk-through:")?;
        f.write_str(&self.log)
    }
}
