use super::{
    ast::{Expression, Program, Statement},
    error::ScriptError,
    lexer::Lexer,
    parser::{MAX_NESTING, Parser, parse},
};

fn parse_ok(input: &str) -> Program {
    let mut parser = Parser::new(Lexer::new(input));
    let program = parser.parse_program();
    assert!(
        parser.errors.is_empty(),
        "parser errors: {:?}",
        parser.errors
    );
    program
}

fn expression(input: &str) -> String {
    let program = parse_ok(input);
    match &program.statements[0] {
        Statement::Expression { expression, .. } => expression.to_string(),
        other => panic!("expected expression statement, got {other:?}"),
    }
}

#[test]
fn parses_def_with_params_and_body() {
    let program = parse_ok("def py_func(js_func):\n\treturn js_func(two_doubles)\n");
    assert_eq!(program.statements.len(), 1);

    match &program.statements[0] {
        Statement::Def {
            name, params, body, ..
        } => {
            assert_eq!(name, "py_func");
            assert_eq!(params, &["js_func"]);
            assert_eq!(body.len(), 1);
            assert!(matches!(body[0], Statement::Return { value: Some(_), .. }));
        }
        other => panic!("expected def, got {other:?}"),
    }
}

#[test]
fn parses_from_import_path() {
    let program = parse_ok("from asd.mock import two_doubles, my_empty_func\n");
    match &program.statements[0] {
        Statement::Import { path, names, .. } => {
            assert_eq!(path, &["asd", "mock"]);
            assert_eq!(names, &["two_doubles", "my_empty_func"]);
        }
        other => panic!("expected import, got {other:?}"),
    }
}

#[test]
fn operator_precedence() {
    assert_eq!(expression("1 + 2 * 3"), "(1 + (2 * 3))");
    assert_eq!(expression("-a * b"), "((-a) * b)");
    assert_eq!(expression("not a == b"), "(not (a == b))");
    assert_eq!(expression("a or b and c"), "(a or (b and c))");
    assert_eq!(expression("f(x)(y)[0]"), "(f(x)(y)[0])");
    assert_eq!(expression("(1 + 2) * 3"), "((1 + 2) * 3)");
}

#[test]
fn parses_lambda_and_containers() {
    assert_eq!(expression("lambda a, b: a + b"), "(lambda a, b: (a + b))");
    assert_eq!(expression("lambda: 1"), "(lambda : 1)");
    assert_eq!(expression("[1, 2.5, 'x',]"), "[1, 2.5, \"x\"]");
    assert_eq!(expression("{'k': [True, None]}"), "{\"k\": [True, None]}");
}

#[test]
fn parses_if_elif_else_chain() {
    let source = "\
if x < 0:
    y = -1
elif x == 0:
    y = 0
else:
    y = 1
";
    let program = parse_ok(source);
    assert_eq!(program.statements.len(), 1);
    let Statement::If { alternative, .. } = &program.statements[0] else {
        panic!("expected if");
    };
    let nested = &alternative.as_ref().unwrap()[0];
    let Statement::If {
        condition,
        alternative,
        ..
    } = nested
    else {
        panic!("expected elif");
    };
    assert_eq!(condition.to_string(), "(x == 0)");
    assert_eq!(alternative.as_ref().unwrap().len(), 1);
}

#[test]
fn nested_blocks_close_together() {
    let source = "\
def outer():
    def inner():
        return 1
    return inner
x = outer
";
    let program = parse_ok(source);
    assert_eq!(program.statements.len(), 2);
    assert!(matches!(program.statements[1], Statement::Assign { .. }));
}

#[test]
fn missing_colon_is_reported_with_position() {
    let err = parse("def f()\n    return 1\n").unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"syntax error at 1:8: expected `:`, found `NEWLINE`");
}

#[test]
fn illegal_character_is_reported() {
    let err = parse("x = 1 $ 2\n").unwrap_err();
    assert!(err.to_string().contains("illegal character `$`"), "{err}");
}

#[test]
fn out_of_range_integer_is_reported() {
    let err = parse("x = 99999999999999999999\n").unwrap_err();
    assert!(err.to_string().contains("out of range"), "{err}");
}

#[test]
fn literal_expressions() {
    let program = parse_ok("42\n");
    assert!(matches!(
        &program.statements[0],
        Statement::Expression {
            expression: Expression::Integer(42),
            ..
        }
    ));
}

fn nesting_error(source: &str) -> bool {
    matches!(
        parse(source),
        Err(ScriptError::Syntax { message, .. }) if message == "expression nested too deeply"
    )
}

#[test]
fn rejects_runaway_nesting() {
    let deep = 50_000;
    assert!(nesting_error(&format!(
        "x = {}1{}\n",
        "(".repeat(deep),
        ")".repeat(deep)
    )));
    assert!(nesting_error(&format!("x = {}1\n", "1 + ".repeat(deep))));
    assert!(nesting_error(&format!("x = {}1{}\n", "[".repeat(deep), "]".repeat(deep))));
    assert!(nesting_error(&format!("x = {}1\n", "-".repeat(deep))));

    let shallow = MAX_NESTING / 2;
    let source = format!("x = {}1{}\n", "(".repeat(shallow), ")".repeat(shallow));
    assert!(parse(&source).is_ok());
    assert!(parse(&format!("x = {}1\n", "1 + ".repeat(shallow))).is_ok());
}

#[test]
fn rejects_runaway_elif_chains() {
    let mut source = String::from("def f(n):\n    if n == 0:\n        return 0\n");
    for i in 0..MAX_NESTING * 2 {
        source.push_str(&format!("    elif n == {i}:\n        return {i}\n"));
    }
    assert!(nesting_error(&source));
}
