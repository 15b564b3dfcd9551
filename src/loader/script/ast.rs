use std::{fmt, sync::Arc};

use super::token::Position;

pub type Block = Vec<Statement>;

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Def {
        name: String,
        params: Vec<String>,
        body: Arc<Block>,
        position: Position,
    },
    Return {
        value: Option<Expression>,
        position: Position,
    },
    If {
        condition: Expression,
        consequence: Block,
        alternative: Option<Block>,
        position: Position,
    },
    Assign {
        name: String,
        value: Expression,
        position: Position,
    },
    /// `from a.b import x, y`; the last path segment names the runtime.
    Import {
        path: Vec<String>,
        names: Vec<String>,
        position: Position,
    },
    Pass,
    Expression {
        expression: Expression,
        position: Position,
    },
}

impl Statement {
    pub fn position(&self) -> Option<Position> {
        match self {
            Statement::Def { position, .. }
            | Statement::Return { position, .. }
            | Statement::If { position, .. }
            | Statement::Assign { position, .. }
            | Statement::Import { position, .. }
            | Statement::Expression { position, .. } => Some(*position),
            Statement::Pass => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Identifier(String),
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    None,
    List(Vec<Expression>),
    Dict(Vec<(Expression, Expression)>),
    Prefix {
        operator: String,
        right: Box<Expression>,
    },
    Infix {
        left: Box<Expression>,
        operator: String,
        right: Box<Expression>,
    },
    Call {
        function: Box<Expression>,
        arguments: Vec<Expression>,
    },
    Index {
        left: Box<Expression>,
        index: Box<Expression>,
    },
    Lambda {
        params: Vec<String>,
        body: Arc<Expression>,
    },
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Identifier(name) => write!(f, "{name}"),
            Expression::Integer(value) => write!(f, "{value}"),
            Expression::Float(value) => write!(f, "{value:?}"),
            Expression::String(value) => write!(f, "{value:?}"),
            Expression::Boolean(true) => write!(f, "True"),
            Expression::Boolean(false) => write!(f, "False"),
            Expression::None => write!(f, "None"),
            Expression::List(items) => {
                write!(f, "[")?;
                write_list(f, items)?;
                write!(f, "]")
            }
            Expression::Dict(pairs) => {
                write!(f, "{{")?;
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            Expression::Prefix { operator, right } if operator == "not" => {
                write!(f, "(not {right})")
            }
            Expression::Prefix { operator, right } => write!(f, "({operator}{right})"),
            Expression::Infix {
                left,
                operator,
                right,
            } => write!(f, "({left} {operator} {right})"),
            Expression::Call {
                function,
                arguments,
            } => {
                write!(f, "{function}(")?;
                write_list(f, arguments)?;
                write!(f, ")")
            }
            Expression::Index { left, index } => write!(f, "({left}[{index}])"),
            Expression::Lambda { params, body } => {
                write!(f, "(lambda {}: {body})", params.join(", "))
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expression]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

/// Parsed module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub statements: Block,
}
