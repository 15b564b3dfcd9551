use super::*;

#[test]
fn qualified_target_splits_on_first_colon() {
    match Target::parse("py:ns:helper") {
        Target::Qualified { tag, name } => {
            assert_eq!(tag, "py");
            assert_eq!(name, "ns:helper");
        }
        other => panic!("unexpected target {other:?}"),
    }
}

#[test]
fn bare_name_is_global() {
    assert!(matches!(Target::parse("two_doubles"), Target::Global("two_doubles")));
}

#[test]
fn empty_halves_survive_parsing() {
    assert!(matches!(
        Target::parse(":f"),
        Target::Qualified { tag: "", name: "f" }
    ));
    assert!(matches!(
        Target::parse("mock:"),
        Target::Qualified { tag: "mock", name: "" }
    ));
}

#[test]
fn display_round_trips_text_targets() {
    assert_eq!(Target::parse("mock:two_doubles").to_string(), "mock:two_doubles");
    assert_eq!(Target::parse("sum").to_string(), "sum");
}
