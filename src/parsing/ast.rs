use crate::source::Pos;

pub trait HasPos {
    fn pos(&self) -> Pos;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    FunctionDef {
        name: String,
        params: Vec<Param>,
        vararg: Option<String>,
        returns: Option<Expr>,
        body: Vec<Stmt>,
        pos: Pos,
    },
    Return { value: Option<Expr>, pos: Pos },
    Assign { targets: Vec<Expr>, value: Expr, pos: Pos },
    AnnAssign { target: String, annotation: Expr, value: Option<Expr>, pos: Pos },
    AugAssign { target: Expr, op: BinOpKind, value: Expr, pos: Pos },
    If { test: Expr, body: Vec<Stmt>, orelse: Vec<Stmt>, pos: Pos },
    For { target: Expr, iter: Expr, body: Vec<Stmt>, orelse: Vec<Stmt>, pos: Pos },
    Assert { test: Expr, msg: Option<Expr>, pos: Pos },
    ImportFrom { module: String, names: Vec<String>, pos: Pos },
    Import { module: String, pos: Pos },
    Expr { value: Expr, pos: Pos },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub annotation: Expr,
    pub default: Option<Expr>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    pub name: String,
    pub value: Expr,
    pub pos: Pos,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOpKind {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOpKind::Add => "+",
            BinOpKind::Sub => "-",
            BinOpKind::Mul => "*",
            BinOpKind::Div => "/",
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum UnaryOpKind {
    Pos,
    Neg,
    Not,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum BoolOpKind {
    And,
    Or,
}

impl BoolOpKind {
    pub fn symbol(&self) -> &'static str {
        match self {
            BoolOpKind::And => "and",
            BoolOpKind::Or => "or",
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
}

/// A subscript is either a plain index or a slice; slices are parsed so they
/// can be rejected with a proper diagnostic instead of a parse error.
#[derive(Debug, Clone, PartialEq)]
pub enum Index {
    Single(Box<Expr>),
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int { value: i64, pos: Pos },
    Float { value: f64, pos: Pos },
    Str { value: String, pos: Pos },
    Bool { value: bool, pos: Pos },
    NoneLit { pos: Pos },
    Name { name: String, pos: Pos },
    BinOp { left: Box<Expr>, op: BinOpKind, right: Box<Expr>, pos: Pos },
    UnaryOp { op: UnaryOpKind, operand: Box<Expr>, pos: Pos },
    BoolOp { op: BoolOpKind, values: Vec<Expr>, pos: Pos },
    Compare { left: Box<Expr>, ops: Vec<CmpOp>, comparators: Vec<Expr>, pos: Pos },
    Call { func: Box<Expr>, args: Vec<Expr>, keywords: Vec<Keyword>, pos: Pos },
    Attribute { value: Box<Expr>, attr: String, pos: Pos },
    Subscript { value: Box<Expr>, index: Index, pos: Pos },
    ListLit { elts: Vec<Expr>, pos: Pos },
    TupleLit { elts: Vec<Expr>, pos: Pos },
    IfExp { test: Box<Expr>, body: Box<Expr>, orelse: Box<Expr>, pos: Pos },
}

impl HasPos for Expr {
    fn pos(&self) -> Pos {
        match self {
            Expr::Int { pos, .. } => *pos,
            Expr::Float { pos, .. } => *pos,
            Expr::Str { pos, .. } => *pos,
            Expr::Bool { pos, .. } => *pos,
            Expr::NoneLit { pos } => *pos,
            Expr::Name { pos, .. } => *pos,
            Expr::BinOp { pos, .. } => *pos,
            Expr::UnaryOp { pos, .. } => *pos,
            Expr::BoolOp { pos, .. } => *pos,
            Expr::Compare { pos, .. } => *pos,
            Expr::Call { pos, .. } => *pos,
            Expr::Attribute { pos, .. } => *pos,
            Expr::Subscript { pos, .. } => *pos,
            Expr::ListLit { pos, .. } => *pos,
            Expr::TupleLit { pos, .. } => *pos,
            Expr::IfExp { pos, .. } => *pos,
        }
    }
}

impl HasPos for Stmt {
    fn pos(&self) -> Pos {
        match self {
            Stmt::FunctionDef { pos, .. } => *pos,
            Stmt::Return { pos, .. } => *pos,
            Stmt::Assign { pos, .. } => *pos,
            Stmt::AnnAssign { pos, .. } => *pos,
            Stmt::AugAssign { pos, .. } => *pos,
            Stmt::If { pos, .. } => *pos,
            Stmt::For { pos, .. } => *pos,
            Stmt::Assert { pos, .. } => *pos,
            Stmt::ImportFrom { pos, .. } => *pos,
            Stmt::Import { pos, .. } => *pos,
            Stmt::Expr { pos, .. } => *pos,
        }
    }
}
