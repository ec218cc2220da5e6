//! Node shapes for the AST the planner consumes (`spec.md` §1, §3).
//!
//! This crate has no lexer and no parser: it exists only so `lucidb-expr`'s
//! plan builder has a concrete Rust type to build `RelExpr` trees from,
//! mirroring the shape of the teacher's `spacetimedb-sql-parser` AST module
//! (not its parser). A host embedding LucidB is expected to hand these
//! types to `lucidb-expr::PlanBuilder` however it likes -- built by hand in
//! tests, or produced by an external parser the host brings itself.

use lucidb_sats::Value;

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Select(SelectStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
    CreateTable(CreateTableStmt),
    DropTable(String),
    Begin,
    Commit,
    Rollback { to_savepoint: Option<String> },
    Savepoint(String),
    Release(String),
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct SelectStmt {
    pub projection: Vec<SelectItem>,
    pub from: Option<TableRef>,
    pub joins: Vec<JoinClause>,
    pub selection: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<Expr>,
    pub offset: Option<Expr>,
    pub ctes: Vec<(String, SelectStmt)>,
    pub set_op: Option<Box<SetOp>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SetOp {
    pub op: SetOpKind,
    pub all: bool,
    pub lhs: SelectStmt,
    pub rhs: SelectStmt,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetOpKind {
    Union,
    Intersect,
    Except,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SelectItem {
    Star,
    Expr { expr: Expr, alias: Option<String> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
    pub alias: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Cross,
}

#[derive(Clone, Debug, PartialEq)]
pub enum JoinCondition {
    On(Expr),
    Using(Vec<String>),
    None,
}

#[derive(Clone, Debug, PartialEq)]
pub struct JoinClause {
    pub kind: JoinKind,
    pub table: TableRef,
    pub condition: JoinCondition,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderItem {
    pub expr: Expr,
    pub dir: SortDir,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InsertStmt {
    pub table: TableRef,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Expr>>,
    pub returning: Vec<SelectItem>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UpdateStmt {
    pub table: TableRef,
    pub assignments: Vec<(String, Expr)>,
    pub selection: Option<Expr>,
    pub returning: Vec<SelectItem>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeleteStmt {
    pub table: TableRef,
    pub selection: Option<Expr>,
    pub returning: Vec<SelectItem>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CreateTableStmt {
    pub schema: Option<String>,
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub primary_key: Vec<String>,
    pub checks: Vec<CheckDef>,
    pub module_name: Option<String>,
    pub module_args: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub type_name: String,
    pub nullable: bool,
}

/// A table-level CHECK constraint as written in `CREATE TABLE`. `name` is
/// `None` for an unnamed constraint (the catalog assigns a synthetic one).
#[derive(Clone, Debug, PartialEq)]
pub struct CheckDef {
    pub name: Option<String>,
    pub expr: Expr,
    pub deferrable: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    IsNull,
    IsNotNull,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Like,
    Glob,
    Concat,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FrameBound {
    UnboundedPreceding,
    Preceding(i64),
    CurrentRow,
    Following(i64),
    UnboundedFollowing,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WindowSpec {
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<OrderItem>,
    /// `None` means the default frame (per `spec.md` §9, only constant
    /// integer-literal offsets are supported; richer frame expressions
    /// are out of scope).
    pub frame: Option<(FrameBound, FrameBound)>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    Column {
        table: Option<String>,
        name: String,
    },
    Parameter(usize),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Cast {
        expr: Box<Expr>,
        type_name: String,
    },
    Case {
        operand: Option<Box<Expr>>,
        branches: Vec<(Expr, Expr)>,
        else_branch: Option<Box<Expr>>,
    },
    FunctionCall {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
    },
    WindowCall {
        name: String,
        args: Vec<Expr>,
        window: WindowSpec,
    },
    ScalarSubquery(Box<SelectStmt>),
    Exists(Box<SelectStmt>),
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    InSubquery {
        expr: Box<Expr>,
        subquery: Box<SelectStmt>,
        negated: bool,
    },
}
