// Property-based tests for output filename patterns

use common::transfer::pattern::{render_output_pattern, rename_filter_rules, split_name};
use proptest::prelude::*;

// `${filename}${ext}` reproduces any name with at least one dot.
#[test]
fn identity_pattern_round_trips_dotted_names() {
    proptest!(|(
        stem in "[a-zA-Z0-9_.-]{1,30}",
        ext in "[a-zA-Z0-9]{1,8}",
    )| {
        let name = format!("{stem}.{ext}");
        prop_assert_eq!(render_output_pattern("${filename}${ext}", &name), name);
    });
}

// Splitting a name always partitions it: stem + ext == name, and the ext is
// either empty or starts with a dot that the stem no longer contains at its
// end.
#[test]
fn split_name_partitions_the_name() {
    proptest!(|(name in "[a-zA-Z0-9_.-]{1,40}")| {
        let (stem, ext) = split_name(&name);
        prop_assert_eq!(format!("{stem}{ext}"), name.clone());
        if !ext.is_empty() {
            prop_assert!(ext.starts_with('.'));
            prop_assert!(!ext[1..].contains('.'));
        } else {
            prop_assert!(!name.contains('.'));
        }
    });
}

// A pattern without placeholders is a constant, whatever the input name.
#[test]
fn placeholder_free_patterns_are_constant() {
    proptest!(|(
        pattern in "[a-zA-Z0-9_-]{1,30}",
        name_a in "[a-zA-Z0-9_.-]{1,20}",
        name_b in "[a-zA-Z0-9_.-]{1,20}",
    )| {
        prop_assert_eq!(
            render_output_pattern(&pattern, &name_a),
            render_output_pattern(&pattern, &name_b)
        );
    });
}

// The rename filter file always holds exactly the two documented rules, in
// order, with `{2}` removed from the extensionless rule.
#[test]
fn rename_rules_have_the_documented_shape() {
    proptest!(|(pattern in "[a-zA-Z0-9_-]{0,10}\\$\\{filename\\}[a-zA-Z0-9_-]{0,10}\\$\\{ext\\}")| {
        let rules = rename_filter_rules(&pattern);
        let lines: Vec<&str> = rules.lines().collect();
        prop_assert_eq!(lines.len(), 2);
        prop_assert!(lines[0].starts_with("-- (.*)(\\..+)$ "));
        prop_assert!(lines[1].starts_with("-- ([^.]+)$ "));
        let line0_has_1 = lines[0].contains("{1}");
        let line0_has_2 = lines[0].contains("{2}");
        let line1_has_1 = lines[1].contains("{1}");
        let line1_has_2 = lines[1].contains("{2}");
        prop_assert!(line0_has_1);
        prop_assert!(line0_has_2);
        prop_assert!(line1_has_1);
        prop_assert!(!line1_has_2);
    });
}
