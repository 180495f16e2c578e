// Output filename patterns and rename filter files

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{date:([^}]+)\}").unwrap())
}

/// Splits a filename at its final extension. The extension keeps its leading
/// dot; a name without a dot has an empty extension.
pub fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) => name.split_at(idx),
        None => (name, ""),
    }
}

/// Renders a destination filename: `${date:<layout>}` expands to now in the
/// given chrono layout, `${filename}` to the name without its final
/// extension, `${ext}` to the final extension including the dot.
pub fn render_output_pattern(pattern: &str, file_name: &str) -> String {
    render_output_pattern_at(pattern, file_name, Utc::now())
}

fn render_output_pattern_at(pattern: &str, file_name: &str, now: DateTime<Utc>) -> String {
    let expanded = expand_dates(pattern, now);
    let (stem, ext) = split_name(file_name);
    expanded.replace("${filename}", stem).replace("${ext}", ext)
}

fn expand_dates(pattern: &str, now: DateTime<Utc>) -> String {
    date_re()
        .replace_all(pattern, |caps: &regex::Captures<'_>| {
            now.format(&caps[1]).to_string()
        })
        .into_owned()
}

/// The two-line rclone rename rules for a file pattern: the first rule
/// matches names with an extension (`{1}` stem, `{2}` extension), the second
/// matches extensionless names with the `{2}` reference removed.
pub fn rename_filter_rules(pattern: &str) -> String {
    rename_filter_rules_at(pattern, Utc::now())
}

fn rename_filter_rules_at(pattern: &str, now: DateTime<Utc>) -> String {
    let expanded = expand_dates(pattern, now);
    let with_ext = expanded.replace("${filename}", "{1}").replace("${ext}", "{2}");
    let without_ext = with_ext.replace("{2}", "");
    format!("-- (.*)(\\..+)$ {with_ext}\n-- ([^.]+)$ {without_ext}\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 16, 10, 30, 0).unwrap()
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("report.csv"), ("report", ".csv"));
        assert_eq!(split_name("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_name("README"), ("README", ""));
        assert_eq!(split_name(".bashrc"), ("", ".bashrc"));
    }

    #[test]
    fn test_identity_pattern_round_trips() {
        assert_eq!(
            render_output_pattern("${filename}${ext}", "report.csv"),
            "report.csv"
        );
        assert_eq!(
            render_output_pattern("${filename}${ext}", "archive.tar.gz"),
            "archive.tar.gz"
        );
    }

    #[test]
    fn test_date_expansion() {
        assert_eq!(
            render_output_pattern_at("${date:%Y%m%d}_${filename}${ext}", "data.bin", fixed_now()),
            "20250616_data.bin"
        );
        assert_eq!(
            render_output_pattern_at("${filename}-${date:%H%M}${ext}", "data.bin", fixed_now()),
            "data-1030.bin"
        );
    }

    #[test]
    fn test_plain_pattern_ignores_file_name() {
        assert_eq!(render_output_pattern("fixed-name.dat", "x.csv"), "fixed-name.dat");
    }

    #[test]
    fn test_rename_filter_rules() {
        let rules = rename_filter_rules_at("${date:%Y}_${filename}${ext}", fixed_now());
        let lines: Vec<&str> = rules.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "-- (.*)(\\..+)$ 2025_{1}{2}");
        assert_eq!(lines[1], "-- ([^.]+)$ 2025_{1}");
    }

    #[test]
    fn test_rename_filter_rules_without_placeholders() {
        let rules = rename_filter_rules_at("prefix_${filename}${ext}", fixed_now());
        assert!(rules.starts_with("-- (.*)(\\..+)$ prefix_{1}{2}\n"));
        assert!(rules.ends_with("-- ([^.]+)$ prefix_{1}\n"));
    }

    proptest! {
        #[test]
        fn prop_identity_pattern_for_dotted_names(
            stem in "[a-zA-Z0-9_-]{1,20}",
            ext in "[a-zA-Z0-9]{1,6}",
        ) {
            let name = format!("{stem}.{ext}");
            prop_assert_eq!(render_output_pattern("${filename}${ext}", &name), name);
        }
    }
}
