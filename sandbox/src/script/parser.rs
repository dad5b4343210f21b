//! Recursive-descent parser from tokens to [`Module`].

use super::ast::{
    BinaryOp, CompareOp, Expr, ExprKind, Literal, LogicalOp, Module, Stmt, StmtKind, Target,
    UnaryOp,
};
use super::lexer::{Keyword, Op, Tok, Token, tokenize};
use super::{ErrorKind, ScriptError};

pub fn parse(source: &str) -> Result<Module, ScriptError> {
    let tokens = tokenize(source)?;
    Parser {
        tokens,
        pos: 0,
        loop_depth: 0,
    }
    .module()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    loop_depth: usize,
}

type Parsed<T> = Result<T, ScriptError>;

impl Parser {
    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn peek_next(&self) -> &Tok {
        self.tokens
            .get(self.pos + 1)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::at(ErrorKind::Syntax, self.line(), message)
    }

    fn unexpected(&self, expected: &str) -> ScriptError {
        self.error(format!("expected {expected}, found {}", describe(self.peek())))
    }

    fn eat_op(&mut self, op: Op) -> bool {
        if *self.peek() == Tok::Op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: Keyword) -> bool {
        if *self.peek() == Tok::Keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: Op, expected: &str) -> Parsed<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_name(&mut self) -> Parsed<String> {
        match self.peek().clone() {
            Tok::Name(name) => {
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected("a name")),
        }
    }

    fn module(mut self) -> Parsed<Module> {
        let mut body = Vec::new();
        while *self.peek() != Tok::Eof {
            if *self.peek() == Tok::Newline {
                self.pos += 1;
                continue;
            }
            if *self.peek() == Tok::Indent {
                return Err(self.error("unexpected indent"));
            }
            body.push(self.statement()?);
        }
        Ok(Module { body })
    }

    fn statement(&mut self) -> Parsed<Stmt> {
        match self.peek() {
            Tok::Keyword(Keyword::If) => self.if_statement(),
            Tok::Keyword(Keyword::For) => self.for_statement(),
            _ => {
                let stmt = self.simple_statement()?;
                self.end_of_line()?;
                Ok(stmt)
            }
        }
    }

    fn end_of_line(&mut self) -> Parsed<()> {
        match self.peek() {
            Tok::Newline => {
                self.pos += 1;
                Ok(())
            }
            Tok::Eof | Tok::Dedent => Ok(()),
            _ => Err(self.unexpected("end of line")),
        }
    }

    fn simple_statement(&mut self) -> Parsed<Stmt> {
        let line = self.line();
        let kind = match self.peek() {
            Tok::Keyword(Keyword::Pass) => {
                self.pos += 1;
                StmtKind::Pass
            }
            Tok::Keyword(Keyword::Break) | Tok::Keyword(Keyword::Continue) => {
                let is_break = *self.peek() == Tok::Keyword(Keyword::Break);
                if self.loop_depth == 0 {
                    let word = if is_break { "break" } else { "continue" };
                    return Err(self.error(format!("'{word}' outside loop")));
                }
                self.pos += 1;
                if is_break {
                    StmtKind::Break
                } else {
                    StmtKind::Continue
                }
            }
            _ => {
                let expr = self.expression()?;
                match self.peek() {
                    Tok::Op(Op::Assign) => {
                        self.pos += 1;
                        let target = self.target(expr)?;
                        let value = self.expression()?;
                        if *self.peek() == Tok::Op(Op::Assign) {
                            return Err(self.error("chained assignment is not supported"));
                        }
                        StmtKind::Assign { target, value }
                    }
                    Tok::Op(Op::PlusAssign) | Tok::Op(Op::MinusAssign) => {
                        let op = if self.advance() == Tok::Op(Op::PlusAssign) {
                            BinaryOp::Add
                        } else {
                            BinaryOp::Sub
                        };
                        let target = self.target(expr)?;
                        let value = self.expression()?;
                        StmtKind::AugAssign { target, op, value }
                    }
                    _ => StmtKind::Expr(expr),
                }
            }
        };
        Ok(Stmt { kind, line })
    }

    fn target(&self, expr: Expr) -> Parsed<Target> {
        match expr.kind {
            ExprKind::Name(name) => Ok(Target::Name(name)),
            ExprKind::Index { value, index } => match value.kind {
                ExprKind::Name(name) => Ok(Target::Item { name, key: *index }),
                _ => Err(ScriptError::at(
                    ErrorKind::Syntax,
                    expr.line,
                    "only a variable or variable[key] can be assigned",
                )),
            },
            _ => Err(ScriptError::at(
                ErrorKind::Syntax,
                expr.line,
                "cannot assign to expression",
            )),
        }
    }

    fn block(&mut self) -> Parsed<Vec<Stmt>> {
        self.expect_op(Op::Colon, "':'")?;
        if *self.peek() != Tok::Newline {
            let stmt = self.simple_statement()?;
            self.end_of_line()?;
            return Ok(vec![stmt]);
        }
        self.pos += 1;
        if *self.peek() != Tok::Indent {
            return Err(self.error("expected an indented block"));
        }
        self.pos += 1;
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::Dedent => {
                    self.pos += 1;
                    break;
                }
                Tok::Eof => break,
                Tok::Newline => self.pos += 1,
                Tok::Indent => return Err(self.error("unexpected indent")),
                _ => body.push(self.statement()?),
            }
        }
        Ok(body)
    }

    fn if_statement(&mut self) -> Parsed<Stmt> {
        let line = self.line();
        self.pos += 1;
        let mut branches = vec![(self.expression()?, self.block()?)];
        let mut orelse = Vec::new();
        loop {
            if self.eat_keyword(Keyword::Elif) {
                branches.push((self.expression()?, self.block()?));
            } else if self.eat_keyword(Keyword::Else) {
                orelse = self.block()?;
                break;
            } else {
                break;
            }
        }
        Ok(Stmt {
            kind: StmtKind::If { branches, orelse },
            line,
        })
    }

    fn for_statement(&mut self) -> Parsed<Stmt> {
        let line = self.line();
        self.pos += 1;
        let var = self.expect_name()?;
        if *self.peek() == Tok::Op(Op::Comma) {
            return Err(self.error("tuple unpacking is not supported"));
        }
        if !self.eat_keyword(Keyword::In) {
            return Err(self.unexpected("'in'"));
        }
        let iter = self.expression()?;
        self.loop_depth += 1;
        let body = self.block();
        self.loop_depth -= 1;
        Ok(Stmt {
            kind: StmtKind::For {
                var,
                iter,
                body: body?,
            },
            line,
        })
    }

    fn expression(&mut self) -> Parsed<Expr> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Parsed<Expr> {
        let mut left = self.and_expr()?;
        while *self.peek() == Tok::Keyword(Keyword::Or) {
            let line = self.line();
            self.pos += 1;
            let right = self.and_expr()?;
            left = Expr::new(
                ExprKind::Logical {
                    op: LogicalOp::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                line,
            );
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Parsed<Expr> {
        let mut left = self.not_expr()?;
        while *self.peek() == Tok::Keyword(Keyword::And) {
            let line = self.line();
            self.pos += 1;
            let right = self.not_expr()?;
            left = Expr::new(
                ExprKind::Logical {
                    op: LogicalOp::And,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                line,
            );
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Parsed<Expr> {
        if *self.peek() == Tok::Keyword(Keyword::Not) {
            let line = self.line();
            self.pos += 1;
            let operand = self.not_expr()?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                line,
            ));
        }
        self.comparison()
    }

    fn compare_op(&mut self) -> Option<CompareOp> {
        let op = match (self.peek(), self.peek_next()) {
            (Tok::Op(Op::Eq), _) => CompareOp::Eq,
            (Tok::Op(Op::NotEq), _) => CompareOp::NotEq,
            (Tok::Op(Op::Lt), _) => CompareOp::Lt,
            (Tok::Op(Op::Le), _) => CompareOp::Le,
            (Tok::Op(Op::Gt), _) => CompareOp::Gt,
            (Tok::Op(Op::Ge), _) => CompareOp::Ge,
            (Tok::Keyword(Keyword::In), _) => CompareOp::In,
            (Tok::Keyword(Keyword::Not), Tok::Keyword(Keyword::In)) => {
                self.pos += 1;
                CompareOp::NotIn
            }
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn comparison(&mut self) -> Parsed<Expr> {
        let left = self.arith()?;
        let line = self.line();
        let Some(op) = self.compare_op() else {
            return Ok(left);
        };
        let right = self.arith()?;
        if self.compare_op().is_some() {
            return Err(ScriptError::at(
                ErrorKind::Syntax,
                line,
                "chained comparisons are not supported",
            ));
        }
        Ok(Expr::new(
            ExprKind::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            line,
        ))
    }

    fn arith(&mut self) -> Parsed<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Op(Op::Plus) => BinaryOp::Add,
                Tok::Op(Op::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            let line = self.line();
            self.pos += 1;
            let right = self.term()?;
            left = binary(op, left, right, line);
        }
    }

    fn term(&mut self) -> Parsed<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Tok::Op(Op::Star) => BinaryOp::Mul,
                Tok::Op(Op::Slash) => BinaryOp::Div,
                Tok::Op(Op::DoubleSlash) => BinaryOp::FloorDiv,
                Tok::Op(Op::Percent) => BinaryOp::Mod,
                _ => return Ok(left),
            };
            let line = self.line();
            self.pos += 1;
            let right = self.unary()?;
            left = binary(op, left, right, line);
        }
    }

    fn unary(&mut self) -> Parsed<Expr> {
        let op = match self.peek() {
            Tok::Op(Op::Minus) => UnaryOp::Neg,
            Tok::Op(Op::Plus) => UnaryOp::Pos,
            _ => return self.postfix(),
        };
        let line = self.line();
        self.pos += 1;
        let operand = self.unary()?;
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            line,
        ))
    }

    fn postfix(&mut self) -> Parsed<Expr> {
        let mut expr = self.primary()?;
        loop {
            let line = self.line();
            if self.eat_op(Op::LBracket) {
                let index = self.expression()?;
                if *self.peek() == Tok::Op(Op::Colon) {
                    return Err(self.error("slices are not supported"));
                }
                self.expect_op(Op::RBracket, "']'")?;
                expr = Expr::new(
                    ExprKind::Index {
                        value: Box::new(expr),
                        index: Box::new(index),
                    },
                    line,
                );
            } else if self.eat_op(Op::Dot) {
                let method = self.expect_name()?;
                if !self.eat_op(Op::LParen) {
                    return Err(self.error(format!("attribute '{method}' is not supported")));
                }
                let (args, kwargs) = self.arguments()?;
                if !kwargs.is_empty() {
                    return Err(ScriptError::at(
                        ErrorKind::Syntax,
                        line,
                        format!("method '{method}' does not take keyword arguments"),
                    ));
                }
                expr = Expr::new(
                    ExprKind::Method {
                        receiver: Box::new(expr),
                        method,
                        args,
                    },
                    line,
                );
            } else if *self.peek() == Tok::Op(Op::LParen) {
                return Err(self.error("only named functions can be called"));
            } else {
                return Ok(expr);
            }
        }
    }

    /// Argument list after `(`, consuming the closing `)`.
    fn arguments(&mut self) -> Parsed<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.eat_op(Op::RParen) {
            if let (Tok::Name(name), Tok::Op(Op::Assign)) = (self.peek(), self.peek_next()) {
                let name = name.clone();
                if kwargs.iter().any(|(existing, _)| *existing == name) {
                    return Err(self.error(format!("keyword argument repeated: {name}")));
                }
                self.pos += 2;
                kwargs.push((name, self.expression()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                args.push(self.expression()?);
            }
            if !self.eat_op(Op::Comma) {
                self.expect_op(Op::RParen, "',' or ')'")?;
                break;
            }
        }
        Ok((args, kwargs))
    }

    fn primary(&mut self) -> Parsed<Expr> {
        let line = self.line();
        let kind = match self.advance() {
            Tok::Int(n) => ExprKind::Literal(Literal::Int(n)),
            Tok::Float(x) => ExprKind::Literal(Literal::Float(x)),
            Tok::Str(s) => {
                let mut text = s;
                while let Tok::Str(next) = self.peek().clone() {
                    text.push_str(&next);
                    self.pos += 1;
                }
                ExprKind::Literal(Literal::Str(text))
            }
            Tok::Keyword(Keyword::True) => ExprKind::Literal(Literal::Bool(true)),
            Tok::Keyword(Keyword::False) => ExprKind::Literal(Literal::Bool(false)),
            Tok::Keyword(Keyword::None) => ExprKind::Literal(Literal::None),
            Tok::Name(name) => {
                if self.eat_op(Op::LParen) {
                    let (args, kwargs) = self.arguments()?;
                    ExprKind::Call {
                        callee: name,
                        args,
                        kwargs,
                    }
                } else {
                    ExprKind::Name(name)
                }
            }
            Tok::Op(Op::LParen) => {
                let inner = self.expression()?;
                if *self.peek() == Tok::Op(Op::Comma) {
                    return Err(self.error("tuples are not supported"));
                }
                self.expect_op(Op::RParen, "')'")?;
                return Ok(inner);
            }
            Tok::Op(Op::LBracket) => {
                let mut items = Vec::new();
                while !self.eat_op(Op::RBracket) {
                    items.push(self.expression()?);
                    if *self.peek() == Tok::Keyword(Keyword::For) {
                        return Err(self.error("comprehensions are not supported"));
                    }
                    if !self.eat_op(Op::Comma) {
                        self.expect_op(Op::RBracket, "',' or ']'")?;
                        break;
                    }
                }
                ExprKind::List(items)
            }
            Tok::Op(Op::LBrace) => {
                let mut entries = Vec::new();
                while !self.eat_op(Op::RBrace) {
                    let key = self.expression()?;
                    self.expect_op(Op::Colon, "':'")?;
                    let value = self.expression()?;
                    entries.push((key, value));
                    if !self.eat_op(Op::Comma) {
                        self.expect_op(Op::RBrace, "',' or '}'")?;
                        break;
                    }
                }
                ExprKind::Dict(entries)
            }
            other => {
                return Err(ScriptError::at(
                    ErrorKind::Syntax,
                    line,
                    format!("unexpected {}", describe(&other)),
                ));
            }
        };
        Ok(Expr::new(kind, line))
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr, line: usize) -> Expr {
    Expr::new(
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        line,
    )
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Name(name) => format!("name '{name}'"),
        Tok::Keyword(kw) => format!("keyword {kw:?}").to_lowercase(),
        Tok::Int(n) => format!("number {n}"),
        Tok::Float(x) => format!("number {x}"),
        Tok::Str(_) => "string".to_string(),
        Tok::Op(op) => format!("{op:?}").to_lowercase(),
        Tok::Newline => "end of line".to_string(),
        Tok::Indent => "indent".to_string(),
        Tok::Dedent => "dedent".to_string(),
        Tok::Eof => "end of input".to_string(),
    }
}
