//! Schedule extraction from OCR text using regex grammars.
//!
//! Pure functions, no async. Each line of recognized text is scanned for
//! opening-hour ranges; the text left after removing them becomes the
//! business address.

use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::schema::{Business, ClosingType, TimeWindow};

/// Lines at or under this many characters cannot hold an address and a range.
const MIN_LINE_CHARS: usize = 10;
/// Residual address text at or under this many characters is discarded.
const MIN_ADDRESS_CHARS: usize = 5;
/// Names shorter than this borrow the next comma segment.
const MIN_NAME_CHARS: usize = 10;
/// A single window longer than this (minutes) is a continuous schedule.
const CONTINUOUS_MINUTES: u32 = 600;
const MINUTES_PER_DAY: u32 = 24 * 60;

/// Time-range grammars, applied in this order. Each has two capture groups:
/// opening and closing token.
const TIME_GRAMMARS: &[(&str, &str)] = &[
    (
        "colon",
        r"([0-9]{1,2}:[0-9]{2}(?::[0-9]{2})?)\s*-\s*([0-9]{1,2}:[0-9]{2}(?::[0-9]{2})?)",
    ),
    ("period", r"([0-9]{1,2}\.[0-9]{2})\s*-\s*([0-9]{1,2}\.[0-9]{2})"),
    ("letter_h", r"([0-9]{1,2}h[0-9]{2})\s*-\s*([0-9]{1,2}h[0-9]{2})"),
    ("de_a", r"(?i)de\s+([0-9]{1,2}:[0-9]{2})\s+a\s+([0-9]{1,2}:[0-9]{2})"),
];

/// Looser range pattern used to cut ranges out of the line.
const RANGE_STRIP_PATTERN: &str = r"[0-9]{1,2}[:.]?[0-9]{2}\s*[-–]\s*[0-9]{1,2}[:.]?[0-9]{2}";

/// Stray marker some OCR exports leave in front of highlighted rows.
const OCR_MARKER: &str = ">>>";

/// Pre-compiled grammars ready for matching.
pub struct ScheduleGrammars {
    ranges: Vec<CompiledGrammar>,
    strip: Option<Regex>,
    whitespace: Option<Regex>,
}

struct CompiledGrammar {
    #[allow(dead_code)]
    id: &'static str,
    regex: Regex,
}

impl ScheduleGrammars {
    /// Compile the built-in grammars. Skips invalid regexes with a warning.
    pub fn compile() -> Self {
        let mut ranges = Vec::new();
        for &(id, pattern) in TIME_GRAMMARS {
            match Regex::new(pattern) {
                Ok(regex) => ranges.push(CompiledGrammar { id, regex }),
                Err(e) => warn!("Skipping invalid time grammar '{}': {}", id, e),
            }
        }
        debug!("Compiled {} time grammars", ranges.len());

        Self {
            ranges,
            strip: compile_or_warn("range_strip", RANGE_STRIP_PATTERN),
            whitespace: compile_or_warn("whitespace", r"\s+"),
        }
    }

    /// Shared instance, compiled on first use.
    pub fn shared() -> &'static Self {
        static GRAMMARS: OnceLock<ScheduleGrammars> = OnceLock::new();
        GRAMMARS.get_or_init(Self::compile)
    }

    /// Every window on the line, grammar by grammar, left to right.
    ///
    /// A line matched by more than one grammar yields each window once per
    /// grammar; duplicates are kept.
    pub fn find_windows(&self, line: &str) -> Vec<TimeWindow> {
        let mut windows = Vec::new();
        for grammar in &self.ranges {
            for cap in grammar.regex.captures_iter(line) {
                let (Some(start), Some(end)) = (cap.get(1), cap.get(2)) else {
                    continue;
                };
                windows.push(TimeWindow::new(
                    normalize_time(start.as_str()),
                    normalize_time(end.as_str()),
                ));
            }
        }
        windows
    }

    /// Remove the time ranges from a line. Returns `None` when too little is left.
    pub fn address_from_line(&self, line: &str) -> Option<String> {
        let stripped = match &self.strip {
            Some(re) => re.replace_all(line, "").into_owned(),
            None => line.to_string(),
        };
        let stripped = stripped.replace(OCR_MARKER, "");
        let collapsed = match &self.whitespace {
            Some(re) => re.replace_all(&stripped, " ").into_owned(),
            None => stripped.split_whitespace().collect::<Vec<_>>().join(" "),
        };
        let cleaned = collapsed.trim();

        if cleaned.chars().count() > MIN_ADDRESS_CHARS {
            Some(cleaned.to_string())
        } else {
            None
        }
    }
}

fn compile_or_warn(id: &str, pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!("Skipping invalid pattern '{}': {}", id, e);
            None
        }
    }
}

/// Parse OCR text into businesses with their opening windows.
pub fn extract(text: &str) -> Vec<Business> {
    extract_with(ScheduleGrammars::shared(), text)
}

/// Same as [`extract`] but with explicit grammars.
pub fn extract_with(grammars: &ScheduleGrammars, text: &str) -> Vec<Business> {
    let mut businesses = Vec::new();

    for line in text.split('\n') {
        let line = line.trim();
        if line.chars().count() <= MIN_LINE_CHARS {
            continue;
        }

        let found_times = grammars.find_windows(line);
        if found_times.is_empty() {
            continue;
        }

        let Some(address) = grammars.address_from_line(line) else {
            debug!("Dropping line with no address left: {:?}", line);
            continue;
        };

        let business = Business {
            id: format!("business-{}", businesses.len()),
            name: business_name(&address),
            schedule: schedule_string(&found_times),
            closing_type: closing_type(&found_times),
            raw_line: line.to_string(),
            address,
            found_times,
        };
        debug!(
            "Found {} ({:?}): {}",
            business.id, business.closing_type, business.schedule
        );
        businesses.push(business);
    }

    debug!("Extracted {} businesses", businesses.len());
    businesses
}

/// Canonicalize `9h30`, `9.30` or `9:30:00` to `09:30`.
///
/// Tokens without at least two components are returned unchanged.
pub fn normalize_time(token: &str) -> String {
    if token.is_empty() {
        return String::new();
    }
    let unified = token.replace(['h', '.'], ":");
    let parts: Vec<&str> = unified.split(':').collect();
    if parts.len() >= 2 {
        format!("{:0>2}:{:0>2}", parts[0], parts[1])
    } else {
        token.to_string()
    }
}

/// First comma segment of the address, widened with the second one when it
/// is too short to identify anything (e.g. a bare street number).
pub fn business_name(address: &str) -> String {
    let parts: Vec<&str> = address.split(',').collect();
    let first = parts[0].trim();
    if first.chars().count() < MIN_NAME_CHARS && parts.len() > 1 {
        // segments keep their own spacing, only the outer ends are trimmed
        format!("{}, {}", parts[0], parts[1]).trim().to_string()
    } else {
        first.to_string()
    }
}

pub fn schedule_string(windows: &[TimeWindow]) -> String {
    windows
        .iter()
        .map(|w| format!("{} - {}", w.start, w.end))
        .collect::<Vec<_>>()
        .join(" / ")
}

/// Minutes since midnight for an `HH:MM` string.
pub fn minutes_of_day(time: &str) -> Option<u32> {
    let (hours, minutes) = time.split_once(':')?;
    let minutes = minutes.split(':').next()?;
    Some(hours.trim().parse::<u32>().ok()? * 60 + minutes.trim().parse::<u32>().ok()?)
}

/// Length of a window in minutes; an end at or before the start runs past midnight.
pub fn window_minutes(window: &TimeWindow) -> Option<u32> {
    let start = minutes_of_day(&window.start)?;
    let end = minutes_of_day(&window.end)?;
    if end > start {
        Some(end - start)
    } else {
        Some((MINUTES_PER_DAY + end).saturating_sub(start))
    }
}

pub fn closing_type(windows: &[TimeWindow]) -> ClosingType {
    match windows {
        [] => ClosingType::Final,
        [only] => match window_minutes(only) {
            Some(duration) if duration > CONTINUOUS_MINUTES => ClosingType::Continuous,
            _ => ClosingType::Final,
        },
        _ => ClosingType::Midday,
    }
}
