use super::lexer::Token;
use super::EvalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Str(String),
    None,
    List(Vec<Expr>),
    Name(String),
    Call(String, Vec<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Conditional {
        then: Box<Expr>,
        cond: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

pub fn parse(tokens: &[Token]) -> Result<Expr, EvalError> {
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.conditional()?;
    if parser.pos != tokens.len() {
        return Err(EvalError::Syntax("trailing tokens".into()));
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        match self.peek() {
            Some(Token::Ident(name)) if name == word => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), EvalError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(EvalError::Syntax(format!("expected {:?}", expected)))
        }
    }

    // `a if cond else b`
    fn conditional(&mut self) -> Result<Expr, EvalError> {
        let then = self.or()?;
        if self.eat_keyword("if") {
            let cond = self.or()?;
            if !self.eat_keyword("else") {
                return Err(EvalError::Syntax("expected 'else'".into()));
            }
            let otherwise = self.conditional()?;
            return Ok(Expr::Conditional {
                then: Box::new(then),
                cond: Box::new(cond),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(then)
    }

    fn or(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.and()?;
        while self.eat_keyword("or") {
            let rhs = self.and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.not()?;
        while self.eat_keyword("and") {
            let rhs = self.not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not(&mut self) -> Result<Expr, EvalError> {
        if self.eat_keyword("not") {
            return Ok(Expr::Not(Box::new(self.not()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinOp::Eq,
                Some(Token::Ne) => BinOp::Ne,
                Some(Token::Lt) => BinOp::Lt,
                Some(Token::Le) => BinOp::Le,
                Some(Token::Gt) => BinOp::Gt,
                Some(Token::Ge) => BinOp::Ge,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn additive(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::DoubleSlash) => BinOp::FloorDiv,
                Some(Token::Percent) => BinOp::Mod,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        if self.eat(&Token::Plus) {
            return self.unary();
        }
        self.power()
    }

    // `**` binds tighter than unary minus on its left and is right-associative.
    fn power(&mut self) -> Result<Expr, EvalError> {
        let base = self.postfix()?;
        if self.eat(&Token::Power) {
            let exponent = self.unary()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.primary()?;
        while self.eat(&Token::LBracket) {
            let index = self.conditional()?;
            self.expect(&Token::RBracket)?;
            expr = Expr::Index(Box::new(expr), Box::new(index));
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        match self.advance() {
            Some(Token::Int(i)) => Ok(Expr::Int(*i)),
            Some(Token::Float(f)) => Ok(Expr::Float(*f)),
            Some(Token::Str(s)) => Ok(Expr::Str(s.clone())),
            Some(Token::LParen) => {
                let inner = self.conditional()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let items = self.sequence(&Token::RBracket)?;
                Ok(Expr::List(items))
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "True" => Ok(Expr::Int(1)),
                "False" => Ok(Expr::Int(0)),
                "None" => Ok(Expr::None),
                "if" | "else" | "and" | "or" | "not" => {
                    Err(EvalError::Syntax(format!("unexpected keyword '{}'", name)))
                }
                _ => {
                    if self.eat(&Token::LParen) {
                        let args = self.sequence(&Token::RParen)?;
                        Ok(Expr::Call(name.clone(), args))
                    } else {
                        Ok(Expr::Name(name.clone()))
                    }
                }
            },
            Some(other) => Err(EvalError::Syntax(format!("unexpected token {:?}", other))),
            None => Err(EvalError::Syntax("unexpected end of expression".into())),
        }
    }

    fn sequence(&mut self, close: &Token) -> Result<Vec<Expr>, EvalError> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.conditional()?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(&Token::Comma)?;
            if self.eat(close) {
                return Ok(items);
            }
        }
    }
}
