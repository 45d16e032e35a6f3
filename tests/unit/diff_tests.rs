use confsnap::models::{SummaryFields, SummaryValue};
use confsnap::orchestrator::diff_preview::compute_diff;

#[test]
fn diff_covers_union_of_fields_in_name_order() {
    let current = SummaryFields::new()
        .with("flag", 0_i64)
        .with("count", 3_i64)
        .with("legacy", true);
    let target = SummaryFields::new()
        .with("flag", 1_i64)
        .with("count", 3_i64)
        .with("added", "x");

    let diff = compute_diff(&current, &target);

    let fields: Vec<&str> = diff.entries.iter().map(|e| e.field.as_str()).collect();
    assert_eq!(fields, vec!["added", "count", "flag", "legacy"]);

    let changed: Vec<&str> = diff.changed().map(|e| e.field.as_str()).collect();
    assert_eq!(changed, vec!["added", "flag", "legacy"]);

    let added = &diff.entries[0];
    assert_eq!(added.before, None);
    assert_eq!(added.after, Some(SummaryValue::Text("x".into())));
    let legacy = &diff.entries[3];
    assert_eq!(legacy.before, Some(SummaryValue::Flag(true)));
    assert_eq!(legacy.after, None);
}

#[test]
fn identical_summaries_have_no_changes() {
    let fields = SummaryFields::new().with("flag", 1_i64);
    let diff = compute_diff(&fields, &fields);
    assert!(!diff.has_changes());
    assert_eq!(diff.entries.len(), 1);
    assert!(!diff.entries[0].changed);
}

#[test]
fn type_change_counts_as_a_change() {
    let diff = compute_diff(
        &SummaryFields::new().with("flag", 1_i64),
        &SummaryFields::new().with("flag", true),
    );
    assert!(diff.has_changes());
}

#[test]
fn render_lists_changes_and_counts_the_rest() {
    let current = SummaryFields::new().with("flag", 0_i64).with("count", 3_i64);
    let target = SummaryFields::new()
        .with("flag", 1_i64)
        .with("count", 3_i64)
        .with("name", "edge");

    let text = compute_diff(&current, &target).render();
    assert!(text.contains("  flag: 0 -> 1\n"));
    assert!(text.contains("  name: <absent> -> \"edge\"\n"));
    assert!(text.contains("(1 unchanged)"));
    assert!(!text.contains("count:"));

    let quiet = compute_diff(&current, &current).render();
    assert!(quiet.contains("no summarized fields differ"));
}

#[test]
fn empty_summaries_diff_to_nothing() {
    let diff = compute_diff(&SummaryFields::new(), &SummaryFields::new());
    assert!(diff.entries.is_empty());
    assert!(!diff.has_changes());
}
