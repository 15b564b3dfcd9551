use super::{lexer::Lexer, token::TokenType};

fn types(source: &str) -> Vec<TokenType> {
    Lexer::new(source)
        .tokenize()
        .into_iter()
        .map(|t| t.token_type)
        .collect()
}

#[test]
fn test_indented_block_emits_indent_and_dedent() {
    use TokenType::*;
    let source = "def f(x):\n    return x\ny = 1\n";
    assert_eq!(
        types(source),
        vec![
            Def, Ident, LParen, Ident, RParen, Colon, Newline, Indent, Return, Ident, Newline,
            Dedent, Ident, Assign, Int, Newline, Eof
        ]
    );
}

#[test]
fn test_missing_trailing_newline_is_synthesized() {
    use TokenType::*;
    assert_eq!(
        types("def f():\n\treturn 1"),
        vec![
            Def, Ident, LParen, RParen, Colon, Newline, Indent, Return, Int, Newline, Dedent,
            Eof
        ]
    );
}

#[test]
fn test_blank_and_comment_lines_are_skipped() {
    use TokenType::*;
    let source = "\n# header\nx = 1  # trailing\n\n   \n    # indented comment\ny = 2\n";
    assert_eq!(
        types(source),
        vec![Ident, Assign, Int, Newline, Ident, Assign, Int, Newline, Eof]
    );
}

#[test]
fn test_newlines_inside_brackets_are_ignored() {
    use TokenType::*;
    let source = "xs = [1,\n      2]\n";
    assert_eq!(
        types(source),
        vec![Ident, Assign, LBracket, Int, Comma, Int, RBracket, Newline, Eof]
    );
}

#[test]
fn test_numbers_strings_and_operators() {
    let tokens = Lexer::new("3.1416 1e3 42 'it\\'s' \"a\\tb\" <= != ==").tokenize();
    let pairs: Vec<(TokenType, &str)> = tokens
        .iter()
        .map(|t| (t.token_type, t.literal.as_str()))
        .collect();
    assert_eq!(pairs[0], (TokenType::Float, "3.1416"));
    assert_eq!(pairs[1], (TokenType::Float, "1e3"));
    assert_eq!(pairs[2], (TokenType::Int, "42"));
    assert_eq!(pairs[3], (TokenType::String, "it's"));
    assert_eq!(pairs[4], (TokenType::String, "a\tb"));
    assert_eq!(pairs[5], (TokenType::Lte, "<="));
    assert_eq!(pairs[6], (TokenType::NotEq, "!="));
    assert_eq!(pairs[7], (TokenType::Eq, "=="));
}

#[test]
fn test_inconsistent_dedent_is_illegal() {
    let tokens = Lexer::new("if x:\n        y\n    z\n").tokenize();
    assert!(
        tokens
            .iter()
            .any(|t| t.token_type == TokenType::Illegal && t.literal.contains("unindent"))
    );
}

#[test]
fn test_unterminated_string_is_illegal() {
    let tokens = Lexer::new("x = 'open\n").tokenize();
    assert_eq!(tokens[2].token_type, TokenType::Illegal);
    assert_eq!(tokens[2].literal, "unterminated string");
}

#[test]
fn test_positions_are_one_based() {
    let tokens = Lexer::new("a\n  b").tokenize();
    assert_eq!(tokens[0].position.line, 1);
    assert_eq!(tokens[0].position.column, 1);
    let b = tokens.iter().find(|t| t.literal == "b").unwrap();
    assert_eq!((b.position.line, b.position.column), (2, 3));
}
