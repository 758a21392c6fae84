//! Structured progress from `git checkout --progress` stderr.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

pub const CHECKOUT_KIND: &str = "checkout";

/// One progress update for a checkout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutProgress {
    pub kind: &'static str,
    pub title: String,
    /// The git output line this update was parsed from.
    pub description: Option<String>,
    /// Fraction complete, always within `[0, 1]`.
    pub value: f64,
    /// Branch name, commit sha or path being checked out.
    pub target: String,
}

impl CheckoutProgress {
    pub fn new(title: impl Into<String>, target: impl Into<String>, value: f64) -> Self {
        Self {
            kind: CHECKOUT_KIND,
            title: title.into(),
            description: None,
            value: clamp_unit(value),
            target: target.into(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

// `Updating files:  42% (420/1000)` with an optional `, done.` suffix.
static PROGRESS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:remote: )?([A-Za-z][A-Za-z ]*?):\s+(\d{1,3})%\s+\((\d+)/(\d+)\)")
        .expect("progress pattern is valid")
});

const CHECKOUT_TITLES: &[&str] = &["Checking out files", "Updating files"];
const LFS_TITLE: &str = "Filtering content";

/// A progress line git printed for a step this parser tracks.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedProgress {
    pub title: String,
    pub text: String,
    pub fraction: f64,
}

/// Recognises the checkout steps git reports on stderr.  "Checking out
/// files" and "Updating files" are the same step under old and new git
/// names; git-lfs "Filtering content" is tracked when enabled.
#[derive(Debug, Clone)]
pub struct CheckoutProgressParser {
    track_lfs: bool,
}

impl Default for CheckoutProgressParser {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CheckoutProgressParser {
    pub fn new(track_lfs: bool) -> Self {
        Self { track_lfs }
    }

    fn tracks(&self, title: &str) -> bool {
        CHECKOUT_TITLES.contains(&title) || (self.track_lfs && title == LFS_TITLE)
    }

    pub fn parse(&self, line: &str) -> Option<ParsedProgress> {
        let line = line.trim();
        let caps = PROGRESS_LINE.captures(line)?;
        let title = caps[1].trim();
        if !self.tracks(title) {
            return None;
        }

        let done: f64 = caps[3].parse().ok()?;
        let total: f64 = caps[4].parse().ok()?;
        let fraction = if total > 0.0 {
            done / total
        } else {
            caps[2].parse::<f64>().ok()? / 100.0
        };

        Some(ParsedProgress {
            title: title.to_string(),
            text: line.to_string(),
            fraction: clamp_unit(fraction),
        })
    }
}

/// Splits a byte stream into lines on `\n` or `\r`, the latter being how git
/// redraws a progress line in place.
#[derive(Debug, Default)]
pub struct ProgressLineSplitter {
    pending: Vec<u8>,
}

impl ProgressLineSplitter {
    /// Complete, non-empty lines found after appending `chunk`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                self.flush_into(&mut lines);
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let mut lines = Vec::new();
        self.flush_into(&mut lines);
        lines.pop()
    }

    fn flush_into(&mut self, lines: &mut Vec<String>) {
        if self.pending.is_empty() {
            return;
        }
        lines.push(String::from_utf8_lossy(&self.pending).into_owned());
        self.pending.clear();
    }
}
