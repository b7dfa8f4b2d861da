use super::lexer::Token;
use super::{ArithOp, CmpOp, Expr, QueryTable};
use crate::errors::{Result, SafetyError};

/// Name the safety predicate must be defined under.
const PREDICATE: &str = "is_safe";

/// Recursive-descent parser over a token stream.
pub(crate) struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    table: &'a QueryTable,
    param: Option<String>,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token>, table: &'a QueryTable) -> Self {
        Self {
            tokens,
            pos: 0,
            table,
            param: None,
        }
    }

    /// `program := [ "def" "is_safe" "(" IDENT ")" ":" ] [ "return" ] expr`
    pub fn parse_program(mut self) -> Result<Expr> {
        if self.eat_keyword("def") {
            let name = self.expect_ident()?;
            if name != PREDICATE {
                return Err(SafetyError::sketch(format!(
                    "expected a definition of {PREDICATE}, found {name}"
                )));
            }
            self.expect(&Token::LParen)?;
            self.param = Some(self.expect_ident()?);
            self.expect(&Token::RParen)?;
            self.expect(&Token::Colon)?;
        }
        self.eat_keyword("return");

        let expr = self.parse_or()?;
        match self.peek() {
            None => Ok(expr),
            Some(token) => Err(SafetyError::sketch(format!(
                "unexpected trailing token {token:?}"
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut operands = vec![self.parse_and()?];
        while self.eat_keyword("or") {
            operands.push(self.parse_and()?);
        }
        Ok(if operands.len() == 1 {
            operands.remove(0)
        } else {
            Expr::Or(operands)
        })
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut operands = vec![self.parse_not()?];
        while self.eat_keyword("and") {
            operands.push(self.parse_not()?);
        }
        Ok(if operands.len() == 1 {
            operands.remove(0)
        } else {
            Expr::And(operands)
        })
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat_keyword("not") {
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let first = self.parse_sum()?;
        let mut rest = Vec::new();
        while let Some(op) = self.peek().and_then(cmp_op) {
            self.pos += 1;
            rest.push((op, self.parse_sum()?));
        }
        Ok(if rest.is_empty() {
            first
        } else {
            Expr::Compare {
                first: Box::new(first),
                rest,
            }
        })
    }

    fn parse_sum(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_term()?;
            lhs = Expr::Arith {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => ArithOp::Mul,
                Some(Token::Slash) => ArithOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Arith {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        let token = self
            .next()
            .ok_or_else(|| SafetyError::sketch("unexpected end of sketch"))?;
        match token {
            Token::Number(value) => Ok(Expr::Num(value)),
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) if name == "True" => Ok(Expr::Bool(true)),
            Token::Ident(name) if name == "False" => Ok(Expr::Bool(false)),
            Token::Ident(name) => {
                let query = self
                    .table
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| SafetyError::sketch(format!("unknown function {name}")))?;
                self.expect(&Token::LParen)?;
                let arg = self.expect_ident()?;
                let param = self.param.get_or_insert_with(|| arg.clone());
                if *param != arg {
                    return Err(SafetyError::sketch(format!(
                        "{name} must be called with {param}, found {arg}"
                    )));
                }
                self.expect(&Token::RParen)?;
                Ok(Expr::Call(query))
            }
            other => Err(SafetyError::sketch(format!("unexpected token {other:?}"))),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.peek() {
            Some(Token::Ident(name)) if name == keyword => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.next() {
            Some(ref token) if token == expected => Ok(()),
            Some(token) => Err(SafetyError::sketch(format!(
                "expected {expected:?}, found {token:?}"
            ))),
            None => Err(SafetyError::sketch(format!(
                "expected {expected:?}, found end of sketch"
            ))),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(name),
            Some(token) => Err(SafetyError::sketch(format!(
                "expected an identifier, found {token:?}"
            ))),
            None => Err(SafetyError::sketch(
                "expected an identifier, found end of sketch",
            )),
        }
    }
}

fn cmp_op(token: &Token) -> Option<CmpOp> {
    match token {
        Token::Lt => Some(CmpOp::Lt),
        Token::Le => Some(CmpOp::Le),
        Token::Gt => Some(CmpOp::Gt),
        Token::Ge => Some(CmpOp::Ge),
        Token::EqEq => Some(CmpOp::Eq),
        Token::NotEq => Some(CmpOp::Ne),
        _ => None,
    }
}
