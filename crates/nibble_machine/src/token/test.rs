use super::*;
use alloc::vec;

fn ident(name: &str) -> Token {
    Token::Identifier(name.to_string())
}

#[test]
fn parses_strtol_literals() {
    assert_eq!(parse_number("15"), Some(15));
    assert_eq!(parse_number("0x1F"), Some(31));
    assert_eq!(parse_number("0X10"), Some(16));
    assert_eq!(parse_number("017"), Some(15));
    assert_eq!(parse_number("0"), Some(0));
    assert_eq!(parse_number("-3"), Some(-3));
    assert_eq!(parse_number("+7"), Some(7));
    assert_eq!(parse_number("0x"), None);
    assert_eq!(parse_number("08"), None);
    assert_eq!(parse_number("12ab"), None);
    assert_eq!(parse_number("push"), None);
    assert_eq!(parse_number("-"), None);
}

#[test]
fn splits_on_any_whitespace() {
    let lines = tokenize_line(4, "  push\t 5   ; five").unwrap();
    assert_eq!(
        lines,
        vec![SourceLine::instruction(4, vec![ident("push"), Token::Number(5)])]
    );
}

#[test]
fn blank_and_comment_lines_yield_nothing() {
    assert!(tokenize_line(1, "").unwrap().is_empty());
    assert!(tokenize_line(2, "   \t").unwrap().is_empty());
    assert!(tokenize_line(3, "; only a comment").unwrap().is_empty());
}

#[test]
fn label_definition_and_reference() {
    let lines = tokenize("loop:\npush loop:2\n").unwrap();
    assert_eq!(
        lines,
        vec![
            SourceLine::label(1, "loop".to_string()),
            SourceLine::instruction(
                2,
                vec![
                    ident("push"),
                    Token::Reference(Reference {
                        name: "loop".to_string(),
                        digit: 2,
                    }),
                ]
            ),
        ]
    );
}

#[test]
fn label_with_trailing_instruction_splits() {
    let lines = tokenize_line(9, "start: push 1").unwrap();
    assert_eq!(
        lines,
        vec![
            SourceLine::label(9, "start".to_string()),
            SourceLine::instruction(9, vec![ident("push"), Token::Number(1)]),
        ]
    );
}

#[test]
fn rejects_bad_reference_digits() {
    for word in ["a:4", "a:12", "a:9"] {
        let err = tokenize_line(1, &alloc::format!("push {word}")).unwrap_err();
        assert!(matches!(
            err.error_kind(),
            AssemblerErrorKind::InvalidReferenceDigit(_)
        ));
        assert_eq!(err.line_number(), Some(1));
    }
}

#[test]
fn rejects_misplaced_labels() {
    let err = tokenize_line(2, "push here:").unwrap_err();
    assert!(matches!(err.error_kind(), AssemblerErrorKind::InvalidLabel(_)));
    let err = tokenize_line(3, ":").unwrap_err();
    assert!(matches!(err.error_kind(), AssemblerErrorKind::InvalidLabel(_)));
}

#[test]
fn display_round_trips_spacing() {
    let lines = tokenize("  dup   mul\tadd").unwrap();
    assert_eq!(alloc::format!("{}", lines[0]), "dup mul add");
}
