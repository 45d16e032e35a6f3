use confsnap::models::{Payload, SummaryValue};
use confsnap::summary::{JsonSummaryExtractor, SummaryExtractor, SummaryFieldSpec};
use confsnap::AppError;

const DISTRIBUTION: &str = r#"{
    "Enabled": true,
    "Comment": "edge",
    "PriceClass": null,
    "Weight": 0.5,
    "Origins": {"Quantity": 2, "Items": [{"Id": "a"}, {"Id": "b"}]},
    "Aliases": ["a.example", "b.example", "c.example"]
}"#;

fn field(name: &str, pointer: &str) -> SummaryFieldSpec {
    SummaryFieldSpec {
        name: name.into(),
        pointer: pointer.into(),
    }
}

#[test]
fn top_level_mode_summarizes_every_member() {
    let fields = JsonSummaryExtractor::top_level()
        .extract(&Payload::from(DISTRIBUTION))
        .unwrap();

    assert_eq!(fields.get("Enabled"), Some(&SummaryValue::Flag(true)));
    assert_eq!(fields.get("Comment"), Some(&SummaryValue::Text("edge".into())));
    assert_eq!(fields.get("Weight"), Some(&SummaryValue::Text("0.5".into())));
    assert_eq!(fields.get("Origins"), Some(&SummaryValue::Number(2)));
    assert_eq!(fields.get("Aliases"), Some(&SummaryValue::Number(3)));
    assert_eq!(fields.get("PriceClass"), None, "null is left out");
    assert_eq!(fields.len(), 5);
}

#[test]
fn pointer_mode_extracts_only_named_fields() {
    let extractor = JsonSummaryExtractor::with_fields(vec![
        field("origins", "/Origins/Quantity"),
        field("first_origin", "/Origins/Items/0/Id"),
        field("alias_count", "/Aliases"),
        field("missing", "/Logging/Enabled"),
    ]);
    let fields = extractor.extract(&Payload::from(DISTRIBUTION)).unwrap();

    let names: Vec<&String> = fields.field_names().collect();
    assert_eq!(names, vec!["alias_count", "first_origin", "origins"]);
    assert_eq!(fields.get("origins"), Some(&SummaryValue::Number(2)));
    assert_eq!(fields.get("first_origin"), Some(&SummaryValue::Text("a".into())));
    assert_eq!(fields.get("alias_count"), Some(&SummaryValue::Number(3)));
}

#[test]
fn empty_field_list_falls_back_to_top_level() {
    let fields = JsonSummaryExtractor::with_fields(Vec::new())
        .extract(&Payload::from(r#"{"flag":1}"#))
        .unwrap();
    assert_eq!(fields.get("flag"), Some(&SummaryValue::Number(1)));
}

#[test]
fn non_json_payload_is_a_validation_error() {
    let err = JsonSummaryExtractor::top_level()
        .extract(&Payload::from("<xml/>"))
        .expect_err("not JSON");
    assert!(matches!(err, AppError::Validation(_)));
}

#[test]
fn top_level_mode_requires_an_object() {
    let err = JsonSummaryExtractor::top_level()
        .extract(&Payload::from("[1,2,3]"))
        .expect_err("array document");
    assert!(matches!(err, AppError::Validation(_)));

    let fields = JsonSummaryExtractor::with_fields(vec![field("len", "")])
        .extract(&Payload::from("[1,2,3]"))
        .expect("pointer mode accepts any document");
    assert_eq!(fields.get("len"), Some(&SummaryValue::Number(3)));
}
