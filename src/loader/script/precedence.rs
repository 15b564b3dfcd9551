use super::token::TokenType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    Lowest,
    Or,      // or
    And,     // and
    Not,     // not x
    Compare, // ==, !=, <, >, <=, >=
    Sum,     // +, -
    Product, // *, /, %
    Prefix,  // -x
    Call,    // f(x)
    Index,   // xs[i]
}

pub fn token_precedence(token_type: &TokenType) -> Precedence {
    match token_type {
        TokenType::Or => Precedence::Or,
        TokenType::And => Precedence::And,
        TokenType::Eq
        | TokenType::NotEq
        | TokenType::Lt
        | TokenType::Gt
        | TokenType::Lte
        | TokenType::Gte => Precedence::Compare,
        TokenType::Plus | TokenType::Minus => Precedence::Sum,
        TokenType::Asterisk | TokenType::Slash | TokenType::Percent => Precedence::Product,
        TokenType::LParen => Precedence::Call,
        TokenType::LBracket => Precedence::Index,
        _ => Precedence::Lowest,
    }
}
