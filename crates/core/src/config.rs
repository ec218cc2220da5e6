//! The `Database` configuration surface (`spec.md` §6): a plain struct
//! with a builder, the same `Default`-plus-setter shape the teacher uses
//! for its own per-database configuration rather than reaching for a
//! config-file crate.

/// Whether a column declared without an explicit `NOT NULL`/`NULL`
/// qualifier defaults to nullable or not.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnNullability {
    Strict,
    Nullable,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    /// The virtual-table module a `CREATE TABLE` with no explicit `USING`
    /// clause is registered against.
    pub default_vtab_module: String,
    /// The module-args string passed to that default module's `create`.
    pub default_vtab_args: String,
    pub default_column_nullability: ColumnNullability,
    /// Enables `TraceSink` collection for every statement run.
    pub runtime_metrics: bool,
    /// Additionally threads a plan reference through each trace record.
    /// Has no effect unless `runtime_metrics` is also set.
    pub trace_plan_stack: bool,
    /// Recursion cap applied to CTEs that reference themselves; LucidB's
    /// plan builder does not currently implement recursive CTEs (the
    /// non-recursive `WITH` form only), so this bounds a future extension
    /// and is otherwise inert.
    pub max_recursion: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            default_vtab_module: "memory".to_string(),
            default_vtab_args: String::new(),
            default_column_nullability: ColumnNullability::Nullable,
            runtime_metrics: false,
            trace_plan_stack: false,
            max_recursion: 64,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DatabaseConfigBuilder {
    config: DatabaseConfig,
}

impl DatabaseConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_vtab_module(mut self, name: impl Into<String>) -> Self {
        self.config.default_vtab_module = name.into();
        self
    }

    pub fn default_vtab_args(mut self, args: impl Into<String>) -> Self {
        self.config.default_vtab_args = args.into();
        self
    }

    pub fn default_column_nullability(mut self, nullability: ColumnNullability) -> Self {
        self.config.default_column_nullability = nullability;
        self
    }

    pub fn runtime_metrics(mut self, enabled: bool) -> Self {
        self.config.runtime_metrics = enabled;
        self
    }

    pub fn trace_plan_stack(mut self, enabled: bool) -> Self {
        self.config.trace_plan_stack = enabled;
        self
    }

    pub fn max_recursion(mut self, cap: u32) -> Self {
        self.config.max_recursion = cap;
        self
    }

    pub fn build(self) -> DatabaseConfig {
        self.config
    }
}
