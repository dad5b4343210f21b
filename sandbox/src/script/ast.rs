//! Syntax tree produced by the parser.

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Assign {
        target: Target,
        value: Expr,
    },
    AugAssign {
        target: Target,
        op: BinaryOp,
        value: Expr,
    },
    Expr(Expr),
    If {
        /// `if` and `elif` arms in source order.
        branches: Vec<(Expr, Vec<Stmt>)>,
        orelse: Vec<Stmt>,
    },
    For {
        var: String,
        iter: Expr,
        body: Vec<Stmt>,
    },
    Pass,
    Break,
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    /// `name[key] = value`
    Item { name: String, key: Expr },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Name(String),
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Index {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Method {
        receiver: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::NotEq => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::In => "in",
            CompareOp::NotIn => "not in",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

impl Expr {
    pub fn new(kind: ExprKind, line: usize) -> Self {
        Self { kind, line }
    }

    /// Visit this expression and every nested sub-expression, parents first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expr)) {
        visit(self);
        match &self.kind {
            ExprKind::Literal(_) | ExprKind::Name(_) => {}
            ExprKind::List(items) => {
                for item in items {
                    item.walk(visit);
                }
            }
            ExprKind::Dict(entries) => {
                for (key, value) in entries {
                    key.walk(visit);
                    value.walk(visit);
                }
            }
            ExprKind::Index { value, index } => {
                value.walk(visit);
                index.walk(visit);
            }
            ExprKind::Call { args, kwargs, .. } => {
                for arg in args {
                    arg.walk(visit);
                }
                for (_, value) in kwargs {
                    value.walk(visit);
                }
            }
            ExprKind::Method { receiver, args, .. } => {
                receiver.walk(visit);
                for arg in args {
                    arg.walk(visit);
                }
            }
            ExprKind::Unary { operand, .. } => operand.walk(visit),
            ExprKind::Binary { left, right, .. }
            | ExprKind::Compare { left, right, .. }
            | ExprKind::Logical { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
        }
    }
}

impl Stmt {
    /// Visit every statement in `body`, recursing into blocks.
    pub fn walk_all<'a>(body: &'a [Stmt], visit: &mut impl FnMut(&'a Stmt)) {
        for stmt in body {
            visit(stmt);
            match &stmt.kind {
                StmtKind::If { branches, orelse } => {
                    for (_, block) in branches {
                        Stmt::walk_all(block, visit);
                    }
                    Stmt::walk_all(orelse, visit);
                }
                StmtKind::For { body, .. } => Stmt::walk_all(body, visit),
                _ => {}
            }
        }
    }

    /// Expressions owned directly by this statement (not by nested blocks).
    pub fn expressions(&self) -> Vec<&Expr> {
        match &self.kind {
            StmtKind::Assign { target, value } | StmtKind::AugAssign { target, value, .. } => {
                let mut out = vec![value];
                if let Target::Item { key, .. } = target {
                    out.push(key);
                }
                out
            }
            StmtKind::Expr(expr) => vec![expr],
            StmtKind::If { branches, .. } => branches.iter().map(|(cond, _)| cond).collect(),
            StmtKind::For { iter, .. } => vec![iter],
            StmtKind::Pass | StmtKind::Break | StmtKind::Continue => Vec::new(),
        }
    }
}
