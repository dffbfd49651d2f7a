//! Partition descriptors and name-based date extraction.

use chrono::{NaiveDate, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// A discovered child table, enriched over the course of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub name: String,
    pub parsed_date: NaiveDate,
    pub row_count: Option<i64>,
    /// Set only for the synthesized "virtual partition" used in date-column
    /// mode when no physical partitions match the request.
    pub range: Option<(chrono::DateTime<Utc>, chrono::DateTime<Utc>)>,
}

impl Partition {
    pub fn physical(name: impl Into<String>, parsed_date: NaiveDate) -> Self {
        Self {
            name: name.into(),
            parsed_date,
            row_count: None,
            range: None,
        }
    }

    pub fn virtual_partition(
        name: impl Into<String>,
        start: chrono::DateTime<Utc>,
        end: chrono::DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            parsed_date: start.date_naive(),
            row_count: None,
            range: Some((start, end)),
        }
    }

    pub fn is_virtual(&self) -> bool {
        self.range.is_some()
    }
}

struct Pattern {
    regex: &'static str,
    parse: fn(&regex::Captures) -> Option<NaiveDate>,
}

fn patterns() -> &'static [Pattern] {
    static PATTERNS: &[Pattern] = &[
        // T_YYYYMMDD
        Pattern {
            regex: r"^.+_(\d{4})(\d{2})(\d{2})$",
            parse: |c| {
                NaiveDate::from_ymd_opt(
                    c[1].parse().ok()?,
                    c[2].parse().ok()?,
                    c[3].parse().ok()?,
                )
            },
        },
        // T_pYYYYMMDD
        Pattern {
            regex: r"^.+_p(\d{4})(\d{2})(\d{2})$",
            parse: |c| {
                NaiveDate::from_ymd_opt(
                    c[1].parse().ok()?,
                    c[2].parse().ok()?,
                    c[3].parse().ok()?,
                )
            },
        },
        // T_YYYY_MM_DD (checked before T_YYYY_MM since it's more specific)
        Pattern {
            regex: r"^.+_(\d{4})_(\d{2})_(\d{2})$",
            parse: |c| {
                NaiveDate::from_ymd_opt(
                    c[1].parse().ok()?,
                    c[2].parse().ok()?,
                    c[3].parse().ok()?,
                )
            },
        },
        // T_YYYY_MM
        Pattern {
            regex: r"^.+_(\d{4})_(\d{2})$",
            parse: |c| NaiveDate::from_ymd_opt(c[1].parse().ok()?, c[2].parse().ok()?, 1),
        },
    ];
    PATTERNS
}

fn compiled() -> &'static [Regex] {
    static COMPILED: OnceLock<Vec<Regex>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        patterns()
            .iter()
            .map(|p| Regex::new(p.regex).expect("static partition-date regex is valid"))
            .collect()
    })
}

/// Extract the date encoded in a partition name by trying each of the known
/// patterns in order (most specific first). Returns `None` for malformed
/// names rather than erroring.
pub fn parse_partition_date(name: &str) -> Option<NaiveDate> {
    for (regex, pattern) in compiled().iter().zip(patterns()) {
        if let Some(captures) = regex.captures(name)
            && let Some(date) = (pattern.parse)(&captures)
        {
            return Some(date);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_yyyymmdd() {
        assert_eq!(
            parse_partition_date("events_20240103"),
            NaiveDate::from_ymd_opt(2024, 1, 3)
        );
    }

    #[test]
    fn parses_p_prefixed_yyyymmdd() {
        assert_eq!(
            parse_partition_date("events_p20240103"),
            NaiveDate::from_ymd_opt(2024, 1, 3)
        );
    }

    #[test]
    fn parses_underscored_year_month_day() {
        assert_eq!(
            parse_partition_date("events_2024_01_03"),
            NaiveDate::from_ymd_opt(2024, 1, 3)
        );
    }

    #[test]
    fn parses_underscored_year_month() {
        assert_eq!(
            parse_partition_date("events_2024_01"),
            NaiveDate::from_ymd_opt(2024, 1, 1)
        );
    }

    #[test]
    fn rejects_malformed_names() {
        assert_eq!(parse_partition_date("events_default"), None);
        assert_eq!(parse_partition_date("events"), None);
        assert_eq!(parse_partition_date("events_2024"), None);
    }

    #[test]
    fn rejects_invalid_calendar_dates() {
        assert_eq!(parse_partition_date("events_20241340"), None);
    }
}
