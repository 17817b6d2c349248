mod fixtures;

use fixtures::{compile_error, compile_error_with, get_engine, loader};
use razorleaf::{Options, Point, Position, RazorleafError, SyntaxErrorKind};
use rstest::rstest;

#[test]
#[ntest::timeout(100)]
fn test_duplicate_block_message() {
    let error = compile_error("block a\nblock a\n");

    insta::assert_snapshot!(error.to_string(), @r"
A block named “a” already exists in this context at line 2, character 7 in <Razor Leaf template>

1 | block a
2 | block a
  |       ^
");
}

#[test]
#[ntest::timeout(100)]
fn test_circular_inclusion_message() {
    let options = Options::new().loader(loader(&[("a", "include b\n"), ("b", "include a\n")]));
    let error = compile_error_with("include a\n", &options);

    insta::assert_snapshot!(error.to_string(), @r"
Circular inclusion: ⤷ a → b ⤴ at line 1, character 1 in b

1 | include a
  | ^
");
}

#[test]
#[ntest::timeout(100)]
fn test_circular_extension_message() {
    let options = Options::new().loader(loader(&[("a", "include b\n"), ("b", "extends a\n")]));
    let error = compile_error_with("extends a\n", &options);

    insta::assert_snapshot!(error.message(), @"Circular extension: ⤷ a → b ⤴");
    assert_eq!(error.location().map(|l| l.template.as_str()), Some("b"));
}

#[test]
#[ntest::timeout(100)]
fn test_unterminated_string_points_at_end_of_input() {
    let error = compile_error("p\n  \"abc");

    insta::assert_snapshot!(error.message(), @r#"Expected end of string before end of input, starting at line 2, character 3"#);
    assert_eq!(error.location().map(|l| l.point), Some(Point::Eof));
}

#[rstest]
#[case::excessive("a\n\t\tb\n", "Excessive indent")]
#[case::tab("a\n  b\n\tc\n", "Unexpected tab indent; indentation was established as 2 spaces")]
#[case::space("a\n\tb\n  c\n", "Unexpected space indent; indentation was established as tabs")]
#[case::else_alone("else\n", "Unexpected else")]
#[case::raw_attribute("a href: !\"x\"\n", "Attributes cannot have raw strings as values")]
#[ntest::timeout(100)]
fn test_syntax_messages(#[case] source: &str, #[case] message: &str) {
    let error = compile_error(source);
    assert!(matches!(error, RazorleafError::Syntax(_)), "{error:?}");
    assert_eq!(error.message(), message);
}

#[test]
#[ntest::timeout(100)]
fn test_errors_in_loaded_templates_name_their_template() {
    let engine = get_engine(&[("page", "include broken\n"), ("broken", "p\n\t\"unfinished\n")]);

    match engine.compile("page") {
        Err(RazorleafError::Syntax(error)) => {
            assert_eq!(error.location.template, "broken");
            assert!(matches!(error.kind, SyntaxErrorKind::Unterminated { .. }));
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
#[ntest::timeout(100)]
fn test_argument_errors_point_at_the_argument() {
    let error = compile_error("macro m(a)\nm(a: 1, b: 2)\n");

    let location = error.location().expect("error has a location");
    let Point::At(Position { line, column, .. }) = location.point else {
        panic!("expected a position");
    };
    assert_eq!(line, 2);
    assert!(column > 3, "column {column} should be past the first argument");
}

#[test]
#[ntest::timeout(100)]
fn test_invalid_globals() {
    let options = Options::new().global("data", 1);

    assert_eq!(
        compile_error_with("p\n", &options),
        RazorleafError::InvalidGlobal {
            name: "data".to_owned()
        }
    );
}
