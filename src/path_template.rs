//! Object-key path templates.
//!
//! A template is a string containing any of `{table}`, `{YYYY}`, `{MM}`,
//! `{DD}`, `{HH}`, expanded against a slice's start instant (always UTC) to
//! produce the `basePath` portion of an object key. The filename is derived
//! separately from the output duration and, for schema-only dumps, from the
//! table name alone.

use crate::slice::OutputDuration;
use chrono::{DateTime, Datelike, Utc};

/// Expand `{table}`/`{YYYY}`/`{MM}`/`{DD}`/`{HH}` placeholders against a
/// slice start, collapse repeated `/`, and strip any trailing `/`.
///
/// Idempotent: re-expanding the result (which contains no more placeholders)
/// returns the same string.
pub fn expand_base_path(template: &str, table: &str, at: DateTime<Utc>) -> String {
    let expanded = template
        .replace("{table}", table)
        .replace("{YYYY}", &format!("{:04}", at.year()))
        .replace("{MM}", &format!("{:02}", at.month()))
        .replace("{DD}", &format!("{:02}", at.day()))
        .replace("{HH}", &format!("{:02}", at.hour()));

    squeeze_path(&expanded)
}

/// Expand a template for a schema-only dump: date placeholders are erased
/// (not zero-filled), and the empty segments they leave behind are squeezed
/// out.
pub fn expand_schema_only_path(template: &str, table: &str) -> String {
    let expanded = template
        .replace("{table}", table)
        .replace("{YYYY}", "")
        .replace("{MM}", "")
        .replace("{DD}", "")
        .replace("{HH}", "");

    squeeze_path(&expanded)
}

fn squeeze_path(path: &str) -> String {
    let mut squeezed = String::with_capacity(path.len());
    let mut last_was_slash = false;
    for ch in path.chars() {
        if ch == '/' {
            if last_was_slash {
                continue;
            }
            last_was_slash = true;
        } else {
            last_was_slash = false;
        }
        squeezed.push(ch);
    }
    squeezed.trim_end_matches('/').to_string()
}

/// Filename date format selected by output duration.
fn filename_date(at: DateTime<Utc>, duration: OutputDuration) -> String {
    match duration {
        OutputDuration::Hourly => at.format("%Y-%m-%d-%H").to_string(),
        OutputDuration::Daily => at.format("%Y-%m-%d").to_string(),
        OutputDuration::Weekly => {
            // Monday-normalized: the slice start is already aligned to Monday
            // by `Slice::align`, so this is just the date format.
            at.format("%Y-%m-%d").to_string()
        }
        OutputDuration::Monthly => at.format("%Y-%m").to_string(),
        OutputDuration::Yearly => at.format("%Y").to_string(),
    }
}

/// Full object key for a time-grouped artifact: `<base>/<table>-<date>.dump`.
pub fn object_key(
    template: &str,
    table: &str,
    at: DateTime<Utc>,
    duration: OutputDuration,
) -> String {
    let base = expand_base_path(template, table, at);
    let filename = format!("{}-{}.dump", table, filename_date(at, duration));
    join_base_and_filename(&base, &filename)
}

/// Object key for a schema-only dump: `schema.dump` if `{table}` appeared in
/// the path (so the table is already encoded in the directory structure),
/// else `<table>-schema.dump`.
pub fn schema_only_object_key(template: &str, table: &str) -> String {
    let base = expand_schema_only_path(template, table);
    let filename = if template.contains("{table}") {
        "schema.dump".to_string()
    } else {
        format!("{}-schema.dump", table)
    };
    join_base_and_filename(&base, &filename)
}

fn join_base_and_filename(base: &str, filename: &str) -> String {
    if base.is_empty() {
        filename.to_string()
    } else {
        format!("{base}/{filename}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn expands_all_placeholders() {
        let base = expand_base_path("{table}/{YYYY}/{MM}/{DD}/{HH}", "events", at(2024, 1, 3, 7));
        assert_eq!(base, "events/2024/01/03/07");
    }

    #[test]
    fn collapses_repeated_and_trailing_slashes() {
        let base = expand_base_path("{table}//{YYYY}/{MM}/", "events", at(2024, 1, 3, 7));
        assert_eq!(base, "events/2024/01");
    }

    #[test]
    fn idempotent_after_expansion() {
        let base = expand_base_path("{table}/{YYYY}/{MM}/{DD}", "events", at(2024, 1, 3, 7));
        let reexpanded = expand_base_path(&base, "events", at(2024, 1, 3, 7));
        assert_eq!(base, reexpanded);
        assert!(!reexpanded.contains('{'));
    }

    #[test]
    fn object_key_daily() {
        let key = object_key(
            "{table}/{YYYY}/{MM}/{DD}",
            "events",
            at(2024, 1, 3, 0),
            OutputDuration::Daily,
        );
        assert_eq!(key, "events/2024/01/03/events-2024-01-03.dump");
    }

    #[test]
    fn schema_only_key_without_table_placeholder() {
        let key = schema_only_object_key("archives/{YYYY}", "events");
        assert_eq!(key, "archives/events-schema.dump");
    }

    #[test]
    fn schema_only_key_with_table_placeholder() {
        let key = schema_only_object_key("archives/{table}", "events");
        assert_eq!(key, "archives/events/schema.dump");
    }
}
