//! LRC (synced lyrics) model
//!
//! Parses `[MM:SS.xx]text` lines into ordered, 1-indexed lyric lines and
//! derives segment time ranges from them. Tracks need at least
//! [`MIN_ELIGIBLE_LINES`] parsed lines to be worth segmenting.

use once_cell::sync::Lazy;
use regex::Regex;

/// Minimum parsed lines for a track to be eligible for segmentation
pub const MIN_ELIGIBLE_LINES: usize = 4;

/// Buffer appended after the last line's timestamp when a segment ends on it
const LAST_LINE_BUFFER_SECS: f64 = 3.0;

/// Matches `[MM:SS]`, `[MM:SS.cc]`, and `[MM:SS.ccc]`
static TIMESTAMP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d{2}):(\d{2})(?:\.(\d{2,3}))?\]").unwrap());

/// A single lyric line with its timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct LyricLine {
    /// 1-indexed position after sorting
    pub line_number: usize,
    /// Seconds from track start
    pub timestamp: f64,
    pub text: String,
}

/// Parsed LRC data
#[derive(Debug, Clone)]
pub struct ParsedLrc {
    lines: Vec<LyricLine>,
}

impl ParsedLrc {
    /// Ordered lyric lines, numbered 1..=total_lines
    pub fn lines(&self) -> &[LyricLine] {
        &self.lines
    }

    pub fn total_lines(&self) -> usize {
        self.lines.len()
    }

    /// Whether the track has enough lines to segment
    pub fn is_eligible(&self) -> bool {
        self.total_lines() >= MIN_ELIGIBLE_LINES
    }

    /// Timestamp of a line (1-indexed), `None` when out of range
    pub fn timestamp(&self, line_number: usize) -> Option<f64> {
        if line_number == 0 {
            return None;
        }
        self.lines.get(line_number - 1).map(|l| l.timestamp)
    }

    /// Time range covered by lines `start..=end` (1-indexed, inclusive)
    ///
    /// The end of the range is the start of the line after `end`, so the
    /// audio of the last included line is fully covered; when `end` is the
    /// final line a fixed buffer is added instead. Returns `None` when
    /// either bound is out of range - callers must check.
    pub fn segment_timespan(&self, start: usize, end: usize) -> Option<(f64, f64)> {
        let t_start = self.timestamp(start)?;
        let t_end = match self.timestamp(end + 1) {
            Some(next) => next,
            None => self.timestamp(end)? + LAST_LINE_BUFFER_SECS,
        };
        Some((t_start, t_end))
    }

    /// Combined text of lines `start..=end`, newline separated
    pub fn lyrics_text(&self, start: usize, end: usize) -> String {
        self.lines
            .iter()
            .filter(|l| l.line_number >= start && l.line_number <= end)
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// All lyrics as plain text without timestamps
    pub fn plain_lyrics(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Estimated duration based on the last timestamp
    pub fn duration(&self) -> f64 {
        self.lines
            .last()
            .map(|l| l.timestamp + LAST_LINE_BUFFER_SECS)
            .unwrap_or(0.0)
    }

    /// Check that a 1-indexed inclusive line range is inside the lyrics
    pub fn validate_range(&self, start: usize, end: usize) -> Result<(), String> {
        if start < 1 {
            return Err(format!("start_line must be >= 1, got {start}"));
        }
        if end < start {
            return Err(format!("end_line ({end}) must be >= start_line ({start})"));
        }
        if start > self.total_lines() {
            return Err(format!(
                "start_line ({start}) exceeds total lines ({})",
                self.total_lines()
            ));
        }
        if end > self.total_lines() {
            return Err(format!(
                "end_line ({end}) exceeds total lines ({})",
                self.total_lines()
            ));
        }
        Ok(())
    }
}

fn timestamp_seconds(caps: &regex::Captures<'_>) -> f64 {
    let minutes: f64 = caps[1].parse().unwrap_or(0.0);
    let seconds: f64 = caps[2].parse().unwrap_or(0.0);
    let fraction = match caps.get(3) {
        Some(m) => {
            let digits = m.as_str();
            let value: f64 = digits.parse().unwrap_or(0.0);
            // Two digits are centiseconds, three are milliseconds
            if digits.len() == 2 {
                value / 100.0
            } else {
                value / 1000.0
            }
        }
        None => 0.0,
    };
    minutes * 60.0 + seconds + fraction
}

/// Parse LRC text into ordered lyric lines
///
/// Lines without a timestamp, lines whose text is empty, and metadata lines
/// (text beginning with `[`) are dropped before numbering. When a line
/// carries several timestamps, the first assigns its time and the text is
/// whatever follows the last bracket. Lines are sorted by timestamp and
/// renumbered from 1.
pub fn parse_lrc(synced_lyrics: &str) -> ParsedLrc {
    let mut lines: Vec<LyricLine> = Vec::new();

    for raw_line in synced_lyrics.lines() {
        let raw_line = raw_line.trim();
        if raw_line.is_empty() {
            continue;
        }

        let matches: Vec<regex::Captures<'_>> = TIMESTAMP.captures_iter(raw_line).collect();
        let Some(first) = matches.first() else {
            continue;
        };

        let last_end = matches
            .last()
            .map(|c| c.get(0).map(|m| m.end()).unwrap_or(0))
            .unwrap_or(0);
        let text = raw_line[last_end..].trim();

        if text.is_empty() || text.starts_with('[') {
            continue;
        }

        lines.push(LyricLine {
            line_number: 0,
            timestamp: timestamp_seconds(first),
            text: text.to_string(),
        });
    }

    lines.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    for (i, line) in lines.iter_mut().enumerate() {
        line.line_number = i + 1;
    }

    ParsedLrc { lines }
}
