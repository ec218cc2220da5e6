//! Translates a pre-built [`lucidb_sql_ast::Stmt`] into a [`RelExpr`] tree
//! (`spec.md` §3, §4.3).
//!
//! This is deliberately not a parser front-end: it consumes the AST shapes
//! `lucidb-sql-ast` defines and resolves names against a [`Catalog`],
//! allocating a fresh, statement-scoped [`AttributeId`] for every computed
//! column while reusing the producing node's id for a bare passthrough
//! column, per the "projections re-use incoming IDs" rule.

use std::collections::HashMap;

use lucidb_primitives::{AttributeId, AttributeIdGen};
use lucidb_sats::{LogicalType, PhysicalType};
use lucidb_schema::Catalog;
use lucidb_sql_ast as ast;

use crate::checks::{CheckProvider, CheckTemplate, NoChecks};
use crate::error::{PlanError, PlanResult};
use crate::rel::{
    Attribute, Cardinality, CheckSpec, DmlOp, JoinCondition as RelJoinCondition, JoinKind as RelJoinKind, LogicalProps,
    PushedDown, Reduction, RelExpr, SetOpKind as RelSetOpKind,
};
use crate::scalar::{BinaryOp, FrameBound, InList, ScalarExpr, SortDir, UnaryOp, WindowFrame};

static NO_CHECKS: NoChecks = NoChecks;

/// One FROM-clause source in scope: an optional alias (the bare table name
/// when none was given) paired with its visible output attributes.
#[derive(Clone)]
struct ScopeEntry {
    alias: String,
    attrs: Vec<Attribute>,
}

type Scope = Vec<ScopeEntry>;

pub struct PlanBuilder<'a> {
    catalog: &'a Catalog,
    checks: &'a dyn CheckProvider,
    ids: AttributeIdGen,
    ctes: HashMap<String, RelExpr>,
    /// `Some` while building projection/having/order-by expressions of a
    /// grouped query: aggregate function calls encountered while this is
    /// set are lifted into a [`Reduction`] instead of built inline.
    collecting: Option<Vec<Reduction>>,
}

impl<'a> PlanBuilder<'a> {
    /// A builder with no CHECK-constraint enforcement -- fine for SELECT-
    /// only use and for tests that don't exercise DML constraints.
    pub fn new(catalog: &'a Catalog) -> Self {
        Self::with_checks(catalog, &NO_CHECKS)
    }

    /// A builder that consults `checks` to resolve a table's CHECK
    /// constraints when building INSERT/UPDATE/DELETE. `lucidb-core`
    /// passes its own registry, built from each `CREATE TABLE`'s AST.
    pub fn with_checks(catalog: &'a Catalog, checks: &'a dyn CheckProvider) -> Self {
        Self {
            catalog,
            checks,
            ids: AttributeIdGen::new(),
            ctes: HashMap::new(),
            collecting: None,
        }
    }

    fn fresh(&mut self) -> AttributeId {
        self.ids.next()
    }

    pub fn build_stmt(&mut self, stmt: &ast::Stmt) -> PlanResult<RelExpr> {
        match stmt {
            ast::Stmt::Select(s) => self.build_select(s),
            ast::Stmt::Insert(s) => self.build_insert(s),
            ast::Stmt::Update(s) => self.build_update(s),
            ast::Stmt::Delete(s) => self.build_delete(s),
            ast::Stmt::CreateTable(_) | ast::Stmt::DropTable(_) => Err(PlanError::Unsupported(
                "DDL statements are resolved against the catalog directly, not represented as a plan tree".into(),
            )),
            ast::Stmt::Begin | ast::Stmt::Commit | ast::Stmt::Rollback { .. } | ast::Stmt::Savepoint(_) | ast::Stmt::Release(_) => {
                Err(PlanError::Unsupported(
                    "transaction-control statements are handled by the transaction coordinator, not the plan tree".into(),
                ))
            }
        }
    }

    // -- SELECT -----------------------------------------------------------

    fn build_select(&mut self, stmt: &ast::SelectStmt) -> PlanResult<RelExpr> {
        if let Some(set_op) = &stmt.set_op {
            return self.build_set_op(set_op, stmt);
        }

        let mut cte_names = Vec::new();
        for (name, def) in &stmt.ctes {
            let built = self.build_select(def)?;
            cte_names.push(name.clone());
            self.ctes.insert(name.clone(), built);
        }

        let (mut node, mut scope) = self.build_from(stmt)?;

        if let Some(selection) = &stmt.selection {
            let predicate = self.build_expr(selection, &scope)?;
            let attrs = node.attributes().to_vec();
            let props = node.logical_props().clone();
            node = RelExpr::Filter {
                input: Box::new(node),
                predicate,
                attrs,
                props,
            };
        }

        let is_grouped = !stmt.group_by.is_empty() || self.any_aggregate(stmt);
        if is_grouped {
            let group_by = stmt
                .group_by
                .iter()
                .map(|e| self.build_expr(e, &scope))
                .collect::<PlanResult<Vec<_>>>()?;

            self.collecting = Some(Vec::new());
            let projections = self.build_select_items(&stmt.projection, &scope)?;
            let having = stmt.having.as_ref().map(|h| self.build_expr(h, &scope)).transpose()?;
            let order_by = stmt
                .order_by
                .iter()
                .map(|o| Ok((self.build_expr(&o.expr, &scope)?, map_sort_dir(o.dir))))
                .collect::<PlanResult<Vec<_>>>()?;
            let reductions = self.collecting.take().unwrap_or_default();

            let mut attrs: Vec<Attribute> = Vec::with_capacity(group_by.len() + reductions.len());
            for g in &group_by {
                attrs.push(Attribute {
                    id: g.id(),
                    name: attribute_label(g),
                    ty: g.ty(),
                });
            }
            for r in &reductions {
                attrs.push(Attribute {
                    id: r.output,
                    name: r.function_name.clone(),
                    ty: LogicalType::nullable(PhysicalType::Real),
                });
            }

            node = RelExpr::Aggregate {
                input: Box::new(node),
                group_by,
                reductions,
                attrs,
                props: LogicalProps::default(),
            };

            if let Some(predicate) = having {
                let attrs = node.attributes().to_vec();
                node = RelExpr::Filter {
                    input: Box::new(node),
                    predicate,
                    attrs,
                    props: LogicalProps::default(),
                };
            }

            node = self.finish_select(node, projections, order_by, stmt)?;
        } else {
            let projections = self.build_select_items(&stmt.projection, &scope)?;
            let order_by = stmt
                .order_by
                .iter()
                .map(|o| Ok((self.build_expr(&o.expr, &scope)?, map_sort_dir(o.dir))))
                .collect::<PlanResult<Vec<_>>>()?;
            node = self.finish_select(node, projections, order_by, stmt)?;
        }

        for name in cte_names.into_iter().rev() {
            if let Some(definition) = self.ctes.remove(&name) {
                let attrs = node.attributes().to_vec();
                let props = node.logical_props().clone();
                node = RelExpr::Cte {
                    name,
                    definition: Box::new(definition),
                    body: Box::new(node),
                    attrs,
                    props,
                };
            }
        }

        scope.clear();
        Ok(node)
    }

    /// Projects, sorts and limits a built body. Shared by the grouped and
    /// ungrouped paths once their input scope for ORDER BY is settled.
    fn finish_select(
        &mut self,
        input: RelExpr,
        projections: Vec<(Attribute, ScalarExpr)>,
        order_by: Vec<(ScalarExpr, SortDir)>,
        stmt: &ast::SelectStmt,
    ) -> PlanResult<RelExpr> {
        let proj_ids: Vec<AttributeId> = projections.iter().map(|(a, _)| a.id).collect();
        let hidden: Vec<(Attribute, ScalarExpr)> = order_by
            .iter()
            .filter(|(e, _)| !proj_ids.contains(&e.id()))
            .map(|(e, _)| {
                (
                    Attribute {
                        id: e.id(),
                        name: attribute_label(e),
                        ty: e.ty(),
                    },
                    e.clone(),
                )
            })
            .collect();

        let mut seq_attrs: Vec<Attribute> = Vec::with_capacity(projections.len() + hidden.len());
        let mut seq_exprs: Vec<ScalarExpr> = Vec::with_capacity(projections.len() + hidden.len());
        for (a, e) in projections.iter().chain(hidden.iter()) {
            seq_attrs.push(a.clone());
            seq_exprs.push(e.clone());
        }

        let mut node = RelExpr::Seq {
            input: Box::new(input),
            projections: seq_exprs,
            attrs: seq_attrs,
            props: LogicalProps::default(),
        };

        if !order_by.is_empty() {
            let keys = order_by.iter().map(|(e, d)| (e.id(), *d)).collect();
            let attrs = node.attributes().to_vec();
            node = RelExpr::Sort {
                input: Box::new(node),
                keys,
                attrs,
                props: LogicalProps::default(),
            };
        }

        if !hidden.is_empty() {
            let final_attrs: Vec<Attribute> = projections.iter().map(|(a, _)| a.clone()).collect();
            let final_exprs: Vec<ScalarExpr> = final_attrs
                .iter()
                .map(|a| ScalarExpr::ColumnRef {
                    id: a.id,
                    refers_to: a.id,
                    ty: a.ty.clone(),
                })
                .collect();
            node = RelExpr::Seq {
                input: Box::new(node),
                projections: final_exprs,
                attrs: final_attrs,
                props: LogicalProps::default(),
            };
        }

        if stmt.limit.is_some() || stmt.offset.is_some() {
            let limit = stmt.limit.as_ref().map(|e| self.build_expr(e, &[])).transpose()?;
            let offset = stmt.offset.as_ref().map(|e| self.build_expr(e, &[])).transpose()?;
            let attrs = node.attributes().to_vec();
            node = RelExpr::Limit {
                input: Box::new(node),
                limit,
                offset,
                attrs,
                props: LogicalProps::default(),
            };
        }

        Ok(node)
    }

    fn build_select_items(&mut self, items: &[ast::SelectItem], scope: &Scope) -> PlanResult<Vec<(Attribute, ScalarExpr)>> {
        let mut out = Vec::new();
        for item in items {
            match item {
                ast::SelectItem::Star => {
                    for entry in scope {
                        for attr in &entry.attrs {
                            let expr = ScalarExpr::ColumnRef {
                                id: attr.id,
                                refers_to: attr.id,
                                ty: attr.ty.clone(),
                            };
                            out.push((attr.clone(), expr));
                        }
                    }
                }
                ast::SelectItem::Expr { expr, alias } => {
                    let built = self.build_expr(expr, scope)?;
                    let name = alias.clone().unwrap_or_else(|| attribute_label(&built));
                    let attr = Attribute {
                        id: built.id(),
                        name,
                        ty: built.ty(),
                    };
                    out.push((attr, built));
                }
            }
        }
        Ok(out)
    }

    fn any_aggregate(&self, stmt: &ast::SelectStmt) -> bool {
        let in_items = stmt.projection.iter().any(|i| match i {
            ast::SelectItem::Star => false,
            ast::SelectItem::Expr { expr, .. } => self.expr_has_aggregate(expr),
        });
        in_items || stmt.having.as_ref().is_some_and(|h| self.expr_has_aggregate(h))
    }

    fn expr_has_aggregate(&self, expr: &ast::Expr) -> bool {
        match expr {
            ast::Expr::FunctionCall { name, .. } => self
                .catalog
                .function(name)
                .map(|f| matches!(f.kind, lucidb_schema::FunctionKind::Aggregate))
                .unwrap_or(false),
            ast::Expr::Unary { expr, .. } | ast::Expr::Cast { expr, .. } => self.expr_has_aggregate(expr),
            ast::Expr::Binary { lhs, rhs, .. } => self.expr_has_aggregate(lhs) || self.expr_has_aggregate(rhs),
            ast::Expr::Case {
                operand,
                branches,
                else_branch,
            } => {
                operand.as_deref().is_some_and(|e| self.expr_has_aggregate(e))
                    || branches.iter().any(|(w, t)| self.expr_has_aggregate(w) || self.expr_has_aggregate(t))
                    || else_branch.as_deref().is_some_and(|e| self.expr_has_aggregate(e))
            }
            _ => false,
        }
    }

    fn build_set_op(&mut self, set_op: &ast::SetOp, outer: &ast::SelectStmt) -> PlanResult<RelExpr> {
        let left = self.build_select(&set_op.lhs)?;
        let right = self.build_select(&set_op.rhs)?;
        if left.attributes().len() != right.attributes().len() {
            return Err(PlanError::SetOpArityMismatch {
                left: left.attributes().len(),
                right: right.attributes().len(),
            });
        }
        let attrs = left.attributes().to_vec();
        let props = LogicalProps {
            cardinality: if set_op.all { None } else { Some(Cardinality::Set) },
            ..Default::default()
        };
        let mut node = RelExpr::Set {
            op: match set_op.op {
                ast::SetOpKind::Union => RelSetOpKind::Union,
                ast::SetOpKind::Intersect => RelSetOpKind::Intersect,
                ast::SetOpKind::Except => RelSetOpKind::Except,
            },
            all: set_op.all,
            left: Box::new(left),
            right: Box::new(right),
            attrs,
            props,
        };
        if outer.limit.is_some() || outer.offset.is_some() || !outer.order_by.is_empty() {
            let scope: Scope = vec![ScopeEntry {
                alias: String::new(),
                attrs: node.attributes().to_vec(),
            }];
            let order_by = outer
                .order_by
                .iter()
                .map(|o| Ok((self.build_expr(&o.expr, &scope)?, map_sort_dir(o.dir))))
                .collect::<PlanResult<Vec<_>>>()?;
            if !order_by.is_empty() {
                let keys = order_by.iter().map(|(e, d)| (e.id(), *d)).collect();
                let attrs = node.attributes().to_vec();
                node = RelExpr::Sort {
                    input: Box::new(node),
                    keys,
                    attrs,
                    props: LogicalProps::default(),
                };
            }
            if outer.limit.is_some() || outer.offset.is_some() {
                let limit = outer.limit.as_ref().map(|e| self.build_expr(e, &[])).transpose()?;
                let offset = outer.offset.as_ref().map(|e| self.build_expr(e, &[])).transpose()?;
                let attrs = node.attributes().to_vec();
                node = RelExpr::Limit {
                    input: Box::new(node),
                    limit,
                    offset,
                    attrs,
                    props: LogicalProps::default(),
                };
            }
        }
        Ok(node)
    }

    // -- FROM / JOIN --------------------------------------------------------

    fn build_from(&mut self, stmt: &ast::SelectStmt) -> PlanResult<(RelExpr, Scope)> {
        let Some(from) = &stmt.from else {
            return Ok((
                RelExpr::Values {
                    rows: vec![vec![]],
                    attrs: vec![],
                    props: LogicalProps::default(),
                },
                Vec::new(),
            ));
        };

        let (mut node, entry) = self.resolve_table_ref(from)?;
        let mut scope: Scope = vec![entry];

        for join in &stmt.joins {
            let (right_node, right_entry) = self.resolve_table_ref(&join.table)?;
            let mut joined_scope = scope.clone();
            joined_scope.push(ScopeEntry {
                alias: right_entry.alias.clone(),
                attrs: right_entry.attrs.clone(),
            });

            let condition = match &join.condition {
                ast::JoinCondition::On(expr) => RelJoinCondition::On(self.build_expr(expr, &joined_scope)?),
                ast::JoinCondition::Using(cols) => {
                    let mut eq_terms = Vec::new();
                    for col in cols {
                        let left_attr = self.resolve_column(None, col, &scope)?;
                        let right_attr = self.resolve_column(None, col, std::slice::from_ref(&right_entry))?;
                        eq_terms.push(left_attr);
                        eq_terms.push(right_attr);
                    }
                    RelJoinCondition::Using(eq_terms)
                }
                ast::JoinCondition::None => RelJoinCondition::None,
            };

            let mut attrs = node.attributes().to_vec();
            attrs.extend(right_node.attributes().iter().cloned());

            node = RelExpr::Join {
                kind: match join.kind {
                    ast::JoinKind::Inner => RelJoinKind::Inner,
                    ast::JoinKind::Left => RelJoinKind::Left,
                    ast::JoinKind::Right => RelJoinKind::Right,
                    ast::JoinKind::Cross => RelJoinKind::Cross,
                },
                left: Box::new(node),
                right: Box::new(right_node),
                condition,
                attrs,
                props: LogicalProps::default(),
            };
            scope = joined_scope;
        }

        Ok((node, scope))
    }

    fn resolve_table_ref(&mut self, table_ref: &ast::TableRef) -> PlanResult<(RelExpr, ScopeEntry)> {
        let alias = table_ref.alias.clone().unwrap_or_else(|| table_ref.name.clone());

        if table_ref.schema.is_none() {
            if let Some(cte) = self.ctes.get(&table_ref.name) {
                let cloned = cte.clone();
                let node = self.fresh_copy(&cloned);
                let entry = ScopeEntry {
                    alias,
                    attrs: node.attributes().to_vec(),
                };
                return Ok((node, entry));
            }
        }

        let schema_name = table_ref.schema.clone().unwrap_or_else(|| "main".to_string());
        let qualified = format!("{schema_name}.{}", table_ref.name);
        let table = self.catalog.table(&qualified)?.clone();

        let attrs: Vec<Attribute> = table
            .columns
            .iter()
            .map(|c| Attribute {
                id: self.fresh(),
                name: c.name.clone(),
                ty: c.ty.clone(),
            })
            .collect();

        let node = RelExpr::Retrieve {
            table_id: table.table_id,
            module_name: table.module_name.clone(),
            pushed: PushedDown::default(),
            attrs: attrs.clone(),
            props: LogicalProps::default(),
        };
        Ok((node, ScopeEntry { alias, attrs }))
    }

    // -- INSERT / UPDATE / DELETE ------------------------------------------

    fn build_insert(&mut self, stmt: &ast::InsertStmt) -> PlanResult<RelExpr> {
        let schema_name = stmt.table.schema.clone().unwrap_or_else(|| "main".to_string());
        let qualified = format!("{schema_name}.{}", stmt.table.name);
        let table = self.catalog.table(&qualified)?.clone();

        let target_columns = if stmt.columns.is_empty() {
            table.columns.clone()
        } else {
            stmt.columns
                .iter()
                .map(|name| {
                    table
                        .column_named(name)
                        .cloned()
                        .ok_or_else(|| PlanError::UnknownColumn(name.clone()))
                })
                .collect::<PlanResult<Vec<_>>>()?
        };

        let mut rows = Vec::with_capacity(stmt.rows.len());
        for row in &stmt.rows {
            if row.len() != target_columns.len() {
                return Err(PlanError::ArityMismatch {
                    name: "INSERT row".into(),
                    expected: target_columns.len().to_string(),
                    got: row.len(),
                });
            }
            rows.push(row.iter().map(|e| self.build_expr(e, &[])).collect::<PlanResult<Vec<_>>>()?);
        }

        let attrs: Vec<Attribute> = target_columns
            .iter()
            .map(|c| Attribute {
                id: self.fresh(),
                name: c.name.clone(),
                ty: c.ty.clone(),
            })
            .collect();

        let values = RelExpr::Values {
            rows,
            attrs: attrs.clone(),
            props: LogicalProps::default(),
        };

        let mut checks: Vec<CheckSpec> = target_columns
            .iter()
            .filter(|c| !c.ty.nullable)
            .filter_map(|c| attrs.iter().find(|a| a.name == c.name))
            .map(|a| self.not_null_check(a))
            .collect();
        let insert_scope: Scope = vec![ScopeEntry {
            alias: stmt.table.name.clone(),
            attrs: attrs.clone(),
        }];
        for template in self.checks.checks_for(table.table_id, DmlOp::Insert) {
            let expr = self.build_expr(&template.expr, &insert_scope)?;
            let contains_subquery = expr_contains_subquery(&expr);
            checks.push(CheckSpec {
                constraint_name: template.constraint_name,
                expr,
                deferrable: template.deferrable || contains_subquery,
                contains_subquery,
            });
        }

        let mutation_input = if checks.is_empty() {
            values
        } else {
            RelExpr::ConstraintCheck {
                input: Box::new(values),
                op: DmlOp::Insert,
                checks,
                attrs: attrs.clone(),
                props: LogicalProps::default(),
            }
        };

        let mut node = RelExpr::Insert {
            table_id: table.table_id,
            input: Box::new(mutation_input),
            attrs: attrs.clone(),
            props: LogicalProps::default(),
        };

        if !stmt.returning.is_empty() {
            let all_attrs: Vec<Attribute> = table
                .columns
                .iter()
                .map(|c| Attribute {
                    id: attrs
                        .iter()
                        .find(|a| a.name == c.name)
                        .map(|a| a.id)
                        .unwrap_or_else(|| AttributeId::from_raw(u32::MAX)),
                    name: c.name.clone(),
                    ty: c.ty.clone(),
                })
                .collect();
            let scope: Scope = vec![ScopeEntry {
                alias: stmt.table.name.clone(),
                attrs: all_attrs,
            }];
            let projections = self.build_select_items(&stmt.returning, &scope)?;
            let ret_attrs = projections.iter().map(|(a, _)| a.clone()).collect();
            let ret_exprs = projections.into_iter().map(|(_, e)| e).collect();
            node = RelExpr::Returning {
                input: Box::new(node),
                projections: ret_exprs,
                attrs: ret_attrs,
                props: LogicalProps::default(),
            };
        }
        Ok(node)
    }

    fn build_update(&mut self, stmt: &ast::UpdateStmt) -> PlanResult<RelExpr> {
        let (base, scope) = self.resolve_table_ref(&stmt.table).map(|(n, e)| (n, vec![e]))?;
        let table_id = match &base {
            RelExpr::Retrieve { table_id, .. } => *table_id,
            _ => return Err(PlanError::Internal("UPDATE target did not resolve to a base table".into())),
        };

        let mut node = base;
        if let Some(selection) = &stmt.selection {
            let predicate = self.build_expr(selection, &scope)?;
            let attrs = node.attributes().to_vec();
            node = RelExpr::Filter {
                input: Box::new(node),
                predicate,
                attrs,
                props: LogicalProps::default(),
            };
        }

        let table = self.catalog.table_by_id(table_id)?.clone();

        let mut assignments = Vec::with_capacity(stmt.assignments.len());
        let mut not_null_checks = Vec::new();
        for (col, expr) in &stmt.assignments {
            let attr_id = self.resolve_column(None, col, &scope)?;
            let value = self.build_expr(expr, &scope)?;
            if let Some(col_def) = table.column_named(col) {
                if !col_def.ty.nullable {
                    not_null_checks.push(self.not_null_check_expr(col, value.clone()));
                }
            }
            assignments.push((attr_id, value));
        }

        let mut checks = not_null_checks;
        for template in self.checks.checks_for(table_id, DmlOp::Update) {
            let base = self.build_expr(&template.expr, &scope)?;
            let substituted = substitute_assigned(&base, &assignments);
            let contains_subquery = expr_contains_subquery(&substituted);
            checks.push(CheckSpec {
                constraint_name: template.constraint_name,
                expr: substituted,
                deferrable: template.deferrable || contains_subquery,
                contains_subquery,
            });
        }

        if !checks.is_empty() {
            let attrs = node.attributes().to_vec();
            node = RelExpr::ConstraintCheck {
                input: Box::new(node),
                op: DmlOp::Update,
                checks,
                attrs,
                props: LogicalProps::default(),
            };
        }

        let attrs = node.attributes().to_vec();
        node = RelExpr::Update {
            table_id,
            input: Box::new(node),
            assignments,
            attrs,
            props: LogicalProps::default(),
        };

        if !stmt.returning.is_empty() {
            let projections = self.build_select_items(&stmt.returning, &scope)?;
            let ret_attrs = projections.iter().map(|(a, _)| a.clone()).collect();
            let ret_exprs = projections.into_iter().map(|(_, e)| e).collect();
            node = RelExpr::Returning {
                input: Box::new(node),
                projections: ret_exprs,
                attrs: ret_attrs,
                props: LogicalProps::default(),
            };
        }
        Ok(node)
    }

    fn build_delete(&mut self, stmt: &ast::DeleteStmt) -> PlanResult<RelExpr> {
        let (base, scope) = self.resolve_table_ref(&stmt.table).map(|(n, e)| (n, vec![e]))?;
        let table_id = match &base {
            RelExpr::Retrieve { table_id, .. } => *table_id,
            _ => return Err(PlanError::Internal("DELETE target did not resolve to a base table".into())),
        };

        let mut node = base;
        if let Some(selection) = &stmt.selection {
            let predicate = self.build_expr(selection, &scope)?;
            let attrs = node.attributes().to_vec();
            node = RelExpr::Filter {
                input: Box::new(node),
                predicate,
                attrs,
                props: LogicalProps::default(),
            };
        }

        let mut checks = Vec::new();
        for template in self.checks.checks_for(table_id, DmlOp::Delete) {
            let expr = self.build_expr(&template.expr, &scope)?;
            let contains_subquery = expr_contains_subquery(&expr);
            checks.push(CheckSpec {
                constraint_name: template.constraint_name,
                expr,
                deferrable: template.deferrable || contains_subquery,
                contains_subquery,
            });
        }

        if !checks.is_empty() {
            let attrs = node.attributes().to_vec();
            node = RelExpr::ConstraintCheck {
                input: Box::new(node),
                op: DmlOp::Delete,
                checks,
                attrs,
                props: LogicalProps::default(),
            };
        }

        let attrs = node.attributes().to_vec();
        node = RelExpr::Delete {
            table_id,
            input: Box::new(node),
            attrs,
            props: LogicalProps::default(),
        };

        if !stmt.returning.is_empty() {
            let projections = self.build_select_items(&stmt.returning, &scope)?;
            let ret_attrs = projections.iter().map(|(a, _)| a.clone()).collect();
            let ret_exprs = projections.into_iter().map(|(_, e)| e).collect();
            node = RelExpr::Returning {
                input: Box::new(node),
                projections: ret_exprs,
                attrs: ret_attrs,
                props: LogicalProps::default(),
            };
        }
        Ok(node)
    }

    // -- scalar expressions -------------------------------------------------

    fn resolve_column(&self, table: Option<&str>, name: &str, scope: &[ScopeEntry]) -> PlanResult<AttributeId> {
        let mut found = None;
        for entry in scope {
            if let Some(t) = table {
                if entry.alias != t {
                    continue;
                }
            }
            if let Some(attr) = entry.attrs.iter().find(|a| a.name == name) {
                if found.is_some() {
                    return Err(PlanError::AmbiguousColumn(name.to_string()));
                }
                found = Some(attr.id);
            }
        }
        found.ok_or_else(|| PlanError::UnknownColumn(name.to_string()))
    }

    fn resolve_column_typed(&self, table: Option<&str>, name: &str, scope: &[ScopeEntry]) -> PlanResult<(AttributeId, LogicalType)> {
        let mut found = None;
        for entry in scope {
            if let Some(t) = table {
                if entry.alias != t {
                    continue;
                }
            }
            if let Some(attr) = entry.attrs.iter().find(|a| a.name == name) {
                if found.is_some() {
                    return Err(PlanError::AmbiguousColumn(name.to_string()));
                }
                found = Some((attr.id, attr.ty.clone()));
            }
        }
        found.ok_or_else(|| PlanError::UnknownColumn(name.to_string()))
    }

    fn build_expr(&mut self, expr: &ast::Expr, scope: &[ScopeEntry]) -> PlanResult<ScalarExpr> {
        match expr {
            ast::Expr::Literal(value) => {
                let ty = literal_type(value);
                Ok(ScalarExpr::Literal {
                    id: self.fresh(),
                    value: value.clone(),
                    ty,
                })
            }
            ast::Expr::Column { table, name } => {
                let (refers_to, ty) = self.resolve_column_typed(table.as_deref(), name, scope)?;
                Ok(ScalarExpr::ColumnRef {
                    id: refers_to,
                    refers_to,
                    ty,
                })
            }
            ast::Expr::Parameter(index) => Ok(ScalarExpr::Parameter {
                id: self.fresh(),
                index: *index,
                ty: LogicalType::nullable(PhysicalType::Text),
            }),
            ast::Expr::Unary { op, expr } => {
                let inner = self.build_expr(expr, scope)?;
                let ty = match op {
                    ast::UnaryOp::IsNull | ast::UnaryOp::IsNotNull => LogicalType::not_null(PhysicalType::Boolean),
                    ast::UnaryOp::Not => LogicalType::nullable(PhysicalType::Boolean),
                    ast::UnaryOp::Neg => inner.ty(),
                };
                Ok(ScalarExpr::Unary {
                    id: self.fresh(),
                    op: map_unary_op(*op),
                    expr: Box::new(inner),
                    ty,
                })
            }
            ast::Expr::Binary { op, lhs, rhs } => {
                let lhs_built = self.build_expr(lhs, scope)?;
                let rhs_built = self.build_expr(rhs, scope)?;
                let ty = binary_result_type(*op, &lhs_built.ty(), &rhs_built.ty());
                Ok(ScalarExpr::Binary {
                    id: self.fresh(),
                    op: map_binary_op(*op),
                    lhs: Box::new(lhs_built),
                    rhs: Box::new(rhs_built),
                    ty,
                })
            }
            ast::Expr::Cast { expr, type_name } => {
                let inner = self.build_expr(expr, scope)?;
                Ok(ScalarExpr::Cast {
                    id: self.fresh(),
                    expr: Box::new(inner),
                    ty: parse_type_name(type_name),
                })
            }
            ast::Expr::Case {
                operand,
                branches,
                else_branch,
            } => {
                let operand = operand.as_deref().map(|e| self.build_expr(e, scope)).transpose()?;
                let branches = branches
                    .iter()
                    .map(|(w, t)| Ok((self.build_expr(w, scope)?, self.build_expr(t, scope)?)))
                    .collect::<PlanResult<Vec<_>>>()?;
                let else_branch = else_branch.as_deref().map(|e| self.build_expr(e, scope)).transpose()?;
                let ty = branches
                    .first()
                    .map(|(_, t)| t.ty())
                    .or_else(|| else_branch.as_ref().map(|e| e.ty()))
                    .unwrap_or_else(|| LogicalType::nullable(PhysicalType::Text));
                Ok(ScalarExpr::Case {
                    id: self.fresh(),
                    operand: operand.map(Box::new),
                    branches,
                    else_branch: else_branch.map(Box::new),
                    ty,
                })
            }
            ast::Expr::FunctionCall { name, args, distinct } => self.build_function_call(name, args, *distinct, scope),
            ast::Expr::WindowCall { name, args, window } => self.build_window_call(name, args, window, scope),
            ast::Expr::ScalarSubquery(select) => {
                let plan = self.build_select(select)?;
                if plan.attributes().len() != 1 {
                    return Err(PlanError::ScalarSubqueryArity(plan.attributes().len()));
                }
                let ty = plan.attributes()[0].ty.clone();
                Ok(ScalarExpr::ScalarSubquery {
                    id: self.fresh(),
                    plan: Box::new(plan),
                    ty,
                })
            }
            ast::Expr::Exists(select) => {
                let plan = self.build_select(select)?;
                Ok(ScalarExpr::Exists {
                    id: self.fresh(),
                    plan: Box::new(plan),
                })
            }
            ast::Expr::InList { expr, list, negated } => {
                let built = self.build_expr(expr, scope)?;
                let values = list.iter().map(|e| self.build_expr(e, scope)).collect::<PlanResult<Vec<_>>>()?;
                Ok(ScalarExpr::In {
                    id: self.fresh(),
                    expr: Box::new(built),
                    list: InList::Values(values),
                    negated: *negated,
                })
            }
            ast::Expr::InSubquery { expr, subquery, negated } => {
                let built = self.build_expr(expr, scope)?;
                let plan = self.build_select(subquery)?;
                Ok(ScalarExpr::In {
                    id: self.fresh(),
                    expr: Box::new(built),
                    list: InList::Subquery(Box::new(plan)),
                    negated: *negated,
                })
            }
        }
    }

    fn build_function_call(&mut self, name: &str, args: &[ast::Expr], distinct: bool, scope: &[ScopeEntry]) -> PlanResult<ScalarExpr> {
        let function = self.catalog.function(name)?.clone();
        check_arity(&function, name, args.len())?;

        if matches!(function.kind, lucidb_schema::FunctionKind::Aggregate) {
            if self.collecting.is_none() {
                return Err(PlanError::AggregateMisuse(name.to_string()));
            }
            // Aggregate arguments evaluate against the ungrouped input, so
            // they are built without the collecting context (an aggregate
            // cannot itself nest another aggregate call).
            let saved = self.collecting.take();
            let built_args = args.iter().map(|a| self.build_expr(a, scope)).collect::<PlanResult<Vec<_>>>()?;
            self.collecting = saved;
            let output = self.fresh();
            self.collecting.as_mut().expect("checked above").push(Reduction {
                output,
                function_name: name.to_string(),
                args: built_args,
                distinct,
            });
            return Ok(ScalarExpr::ColumnRef {
                id: output,
                refers_to: output,
                ty: function.return_type.clone(),
            });
        }

        let built_args = args.iter().map(|a| self.build_expr(a, scope)).collect::<PlanResult<Vec<_>>>()?;
        let deterministic = function.deterministic && built_args.iter().all(ScalarExpr::is_deterministic);
        Ok(ScalarExpr::FunctionCall {
            id: self.fresh(),
            function: function.function_id,
            name: name.to_string(),
            args: built_args,
            deterministic,
            ty: function.return_type,
        })
    }

    fn build_window_call(&mut self, name: &str, args: &[ast::Expr], window: &ast::WindowSpec, scope: &[ScopeEntry]) -> PlanResult<ScalarExpr> {
        let function = self.catalog.function(name)?.clone();
        let built_args = args.iter().map(|a| self.build_expr(a, scope)).collect::<PlanResult<Vec<_>>>()?;
        let partition_by = window
            .partition_by
            .iter()
            .map(|e| self.build_expr(e, scope))
            .collect::<PlanResult<Vec<_>>>()?;
        let order_by = window
            .order_by
            .iter()
            .map(|o| Ok((self.build_expr(&o.expr, scope)?, map_sort_dir(o.dir))))
            .collect::<PlanResult<Vec<_>>>()?;
        let bounds = window.frame.as_ref().map(|(lo, hi)| (map_frame_bound(lo), map_frame_bound(hi)));
        Ok(ScalarExpr::WindowCall {
            id: self.fresh(),
            name: name.to_string(),
            args: built_args,
            frame: WindowFrame {
                partition_by,
                order_by,
                bounds,
            },
            ty: function.return_type,
        })
    }

    /// Deep-clones a [`RelExpr`] subtree with every attribute id replaced
    /// by a fresh one, so a CTE referenced from more than one place in the
    /// body never lets two logically distinct rows collide under the same
    /// id (spec.md §4.3, §9 "attribute ids").
    fn fresh_copy(&mut self, node: &RelExpr) -> RelExpr {
        let mut map: HashMap<u32, AttributeId> = HashMap::new();
        self.remap_rel(node, &mut map)
    }

    fn remap_rel(&mut self, node: &RelExpr, map: &mut HashMap<u32, AttributeId>) -> RelExpr {
        let children: Vec<RelExpr> = node.children().into_iter().map(|c| self.remap_rel(c, map)).collect();
        let rebuilt = if children.is_empty() { node.clone() } else { node.with_children(children) };
        self.remap_node(rebuilt, map)
    }

    fn remap_node(&mut self, node: RelExpr, map: &mut HashMap<u32, AttributeId>) -> RelExpr {
        for attr in node.attributes() {
            map.entry(attr.id.raw()).or_insert_with(|| self.ids.next());
        }
        self.rewrite_rel_exprs(node, map)
    }

    fn rewrite_rel_exprs(&mut self, node: RelExpr, map: &mut HashMap<u32, AttributeId>) -> RelExpr {
        let remap_attrs = |attrs: Vec<Attribute>, map: &HashMap<u32, AttributeId>| -> Vec<Attribute> {
            attrs
                .into_iter()
                .map(|mut a| {
                    if let Some(new_id) = map.get(&a.id.raw()) {
                        a.id = *new_id;
                    }
                    a
                })
                .collect()
        };
        match node {
            RelExpr::Seq {
                input,
                projections,
                attrs,
                props,
            } => RelExpr::Seq {
                input,
                projections: projections.into_iter().map(|e| self.rewrite_scalar(e, map)).collect(),
                attrs: remap_attrs(attrs, map),
                props,
            },
            RelExpr::Filter {
                input,
                predicate,
                attrs,
                props,
            } => RelExpr::Filter {
                input,
                predicate: self.rewrite_scalar(predicate, map),
                attrs: remap_attrs(attrs, map),
                props,
            },
            RelExpr::Join {
                kind,
                left,
                right,
                condition,
                attrs,
                props,
            } => RelExpr::Join {
                kind,
                left,
                right,
                condition: match condition {
                    RelJoinCondition::On(e) => RelJoinCondition::On(self.rewrite_scalar(e, map)),
                    RelJoinCondition::Using(ids) => {
                        RelJoinCondition::Using(ids.into_iter().map(|id| *map.get(&id.raw()).unwrap_or(&id)).collect())
                    }
                    RelJoinCondition::None => RelJoinCondition::None,
                },
                attrs: remap_attrs(attrs, map),
                props,
            },
            RelExpr::Aggregate {
                input,
                group_by,
                reductions,
                attrs,
                props,
            } => RelExpr::Aggregate {
                input,
                group_by: group_by.into_iter().map(|e| self.rewrite_scalar(e, map)).collect(),
                reductions: reductions
                    .into_iter()
                    .map(|r| Reduction {
                        output: *map.get(&r.output.raw()).unwrap_or(&r.output),
                        function_name: r.function_name,
                        args: r.args.into_iter().map(|e| self.rewrite_scalar(e, map)).collect(),
                        distinct: r.distinct,
                    })
                    .collect(),
                attrs: remap_attrs(attrs, map),
                props,
            },
            RelExpr::Window {
                input,
                windows,
                attrs,
                props,
            } => RelExpr::Window {
                input,
                windows: windows.into_iter().map(|e| self.rewrite_scalar(e, map)).collect(),
                attrs: remap_attrs(attrs, map),
                props,
            },
            RelExpr::Sort { input, keys, attrs, props } => RelExpr::Sort {
                input,
                keys: keys.into_iter().map(|(id, d)| (*map.get(&id.raw()).unwrap_or(&id), d)).collect(),
                attrs: remap_attrs(attrs, map),
                props,
            },
            RelExpr::Limit {
                input,
                limit,
                offset,
                attrs,
                props,
            } => RelExpr::Limit {
                input,
                limit: limit.map(|e| self.rewrite_scalar(e, map)),
                offset: offset.map(|e| self.rewrite_scalar(e, map)),
                attrs: remap_attrs(attrs, map),
                props,
            },
            RelExpr::Set {
                op,
                all,
                left,
                right,
                attrs,
                props,
            } => RelExpr::Set {
                op,
                all,
                left,
                right,
                attrs: remap_attrs(attrs, map),
                props,
            },
            RelExpr::Cte {
                name,
                definition,
                body,
                attrs,
                props,
            } => RelExpr::Cte {
                name,
                definition,
                body,
                attrs: remap_attrs(attrs, map),
                props,
            },
            RelExpr::Values { rows, attrs, props } => RelExpr::Values {
                rows: rows
                    .into_iter()
                    .map(|row| row.into_iter().map(|e| self.rewrite_scalar(e, map)).collect())
                    .collect(),
                attrs: remap_attrs(attrs, map),
                props,
            },
            RelExpr::Retrieve {
                table_id,
                module_name,
                pushed,
                attrs,
                props,
            } => RelExpr::Retrieve {
                table_id,
                module_name,
                pushed,
                attrs: remap_attrs(attrs, map),
                props,
            },
            RelExpr::MutationContext {
                input,
                captures,
                attrs,
                props,
            } => RelExpr::MutationContext {
                input,
                captures: captures
                    .into_iter()
                    .map(|(id, e)| (*map.get(&id.raw()).unwrap_or(&id), self.rewrite_scalar(e, map)))
                    .collect(),
                attrs: remap_attrs(attrs, map),
                props,
            },
            RelExpr::ConstraintCheck {
                input,
                op,
                checks,
                attrs,
                props,
            } => RelExpr::ConstraintCheck {
                input,
                op,
                checks: checks
                    .into_iter()
                    .map(|c| CheckSpec {
                        expr: self.rewrite_scalar(c.expr, map),
                        ..c
                    })
                    .collect(),
                attrs: remap_attrs(attrs, map),
                props,
            },
            RelExpr::Insert {
                table_id,
                input,
                attrs,
                props,
            } => RelExpr::Insert {
                table_id,
                input,
                attrs: remap_attrs(attrs, map),
                props,
            },
            RelExpr::Update {
                table_id,
                input,
                assignments,
                attrs,
                props,
            } => RelExpr::Update {
                table_id,
                input,
                assignments: assignments
                    .into_iter()
                    .map(|(id, e)| (*map.get(&id.raw()).unwrap_or(&id), self.rewrite_scalar(e, map)))
                    .collect(),
                attrs: remap_attrs(attrs, map),
                props,
            },
            RelExpr::Delete {
                table_id,
                input,
                attrs,
                props,
            } => RelExpr::Delete {
                table_id,
                input,
                attrs: remap_attrs(attrs, map),
                props,
            },
            RelExpr::Returning {
                input,
                projections,
                attrs,
                props,
            } => RelExpr::Returning {
                input,
                projections: projections.into_iter().map(|e| self.rewrite_scalar(e, map)).collect(),
                attrs: remap_attrs(attrs, map),
                props,
            },
            RelExpr::Block { statements, attrs, props } => RelExpr::Block {
                statements,
                attrs: remap_attrs(attrs, map),
                props,
            },
            RelExpr::Cache {
                input,
                fingerprint,
                attrs,
                props,
            } => RelExpr::Cache {
                input,
                fingerprint,
                attrs: remap_attrs(attrs, map),
                props,
            },
        }
    }

    fn rewrite_scalar(&mut self, expr: ScalarExpr, map: &mut HashMap<u32, AttributeId>) -> ScalarExpr {
        let new_id = *map.entry(expr.id().raw()).or_insert_with(|| self.ids.next());
        match expr {
            ScalarExpr::Literal { value, ty, .. } => ScalarExpr::Literal { id: new_id, value, ty },
            ScalarExpr::ColumnRef { refers_to, ty, .. } => {
                let mapped = *map.entry(refers_to.raw()).or_insert_with(|| self.ids.next());
                ScalarExpr::ColumnRef {
                    id: mapped,
                    refers_to: mapped,
                    ty,
                }
            }
            ScalarExpr::Parameter { index, ty, .. } => ScalarExpr::Parameter { id: new_id, index, ty },
            ScalarExpr::Unary { op, expr, ty, .. } => ScalarExpr::Unary {
                id: new_id,
                op,
                expr: Box::new(self.rewrite_scalar(*expr, map)),
                ty,
            },
            ScalarExpr::Binary { op, lhs, rhs, ty, .. } => ScalarExpr::Binary {
                id: new_id,
                op,
                lhs: Box::new(self.rewrite_scalar(*lhs, map)),
                rhs: Box::new(self.rewrite_scalar(*rhs, map)),
                ty,
            },
            ScalarExpr::Cast { expr, ty, .. } => ScalarExpr::Cast {
                id: new_id,
                expr: Box::new(self.rewrite_scalar(*expr, map)),
                ty,
            },
            ScalarExpr::Case {
                operand,
                branches,
                else_branch,
                ty,
                ..
            } => ScalarExpr::Case {
                id: new_id,
                operand: operand.map(|e| Box::new(self.rewrite_scalar(*e, map))),
                branches: branches
                    .into_iter()
                    .map(|(w, t)| (self.rewrite_scalar(w, map), self.rewrite_scalar(t, map)))
                    .collect(),
                else_branch: else_branch.map(|e| Box::new(self.rewrite_scalar(*e, map))),
                ty,
            },
            ScalarExpr::FunctionCall {
                function,
                name,
                args,
                deterministic,
                ty,
                ..
            } => ScalarExpr::FunctionCall {
                id: new_id,
                function,
                name,
                args: args.into_iter().map(|e| self.rewrite_scalar(e, map)).collect(),
                deterministic,
                ty,
            },
            ScalarExpr::WindowCall { name, args, frame, ty, .. } => ScalarExpr::WindowCall {
                id: new_id,
                name,
                args: args.into_iter().map(|e| self.rewrite_scalar(e, map)).collect(),
                frame: WindowFrame {
                    partition_by: frame.partition_by.into_iter().map(|e| self.rewrite_scalar(e, map)).collect(),
                    order_by: frame.order_by.into_iter().map(|(e, d)| (self.rewrite_scalar(e, map), d)).collect(),
                    bounds: frame.bounds,
                },
                ty,
            },
            ScalarExpr::ScalarSubquery { plan, ty, .. } => ScalarExpr::ScalarSubquery {
                id: new_id,
                plan: Box::new(self.remap_rel(&plan, map)),
                ty,
            },
            ScalarExpr::Exists { plan, .. } => ScalarExpr::Exists {
                id: new_id,
                plan: Box::new(self.remap_rel(&plan, map)),
            },
            ScalarExpr::In { expr, list, negated, .. } => ScalarExpr::In {
                id: new_id,
                expr: Box::new(self.rewrite_scalar(*expr, map)),
                list: match list {
                    InList::Values(vs) => InList::Values(vs.into_iter().map(|e| self.rewrite_scalar(e, map)).collect()),
                    InList::Subquery(plan) => InList::Subquery(Box::new(self.remap_rel(&plan, map))),
                },
                negated,
            },
        }
    }

    /// A non-deferrable CHECK enforcing `attr IS NOT NULL`, synthesized
    /// for every column the catalog marks non-nullable -- the schema
    /// carries nullability, not a standalone NOT NULL constraint, so the
    /// builder derives one per `spec.md` §4.3's "Constraint-check node".
    fn not_null_check(&mut self, attr: &Attribute) -> CheckSpec {
        self.not_null_check_expr(
            &attr.name,
            ScalarExpr::ColumnRef {
                id: attr.id,
                refers_to: attr.id,
                ty: attr.ty.clone(),
            },
        )
    }

    /// Same as [`Self::not_null_check`] but over an arbitrary already-built
    /// expression -- used for UPDATE, where the value being checked is the
    /// assignment's right-hand side, not a bare column read.
    fn not_null_check_expr(&mut self, column_name: &str, value: ScalarExpr) -> CheckSpec {
        let id = self.fresh();
        let expr = ScalarExpr::Unary {
            id,
            op: UnaryOp::IsNotNull,
            expr: Box::new(value),
            ty: LogicalType::not_null(PhysicalType::Boolean),
        };
        CheckSpec {
            constraint_name: format!("{column_name}__not_null"),
            expr,
            deferrable: false,
            contains_subquery: false,
        }
    }
}

/// Whether evaluating `expr` requires running a nested plan -- such a
/// CHECK is always deferred to commit time (§4.3's deferred-check rule),
/// since the subquery's own writes may not have settled mid-statement.
fn expr_contains_subquery(expr: &ScalarExpr) -> bool {
    if matches!(expr, ScalarExpr::ScalarSubquery { .. } | ScalarExpr::Exists { .. }) {
        return true;
    }
    if let ScalarExpr::In { list: InList::Subquery(_), .. } = expr {
        return true;
    }
    expr.children().iter().any(|c| expr_contains_subquery(c))
}

/// Replaces every `ColumnRef` in `expr` that names one of `subs`'s
/// attributes with that assignment's right-hand side, evaluated in the
/// same pre-update scope -- how an UPDATE's CHECK constraints see the
/// *new* value of an assigned column without needing the scheduler's own
/// post-assignment row. Subquery plans nested inside the expression are
/// left untouched: they close over their own scope, not this one.
fn substitute_assigned(expr: &ScalarExpr, subs: &[(AttributeId, ScalarExpr)]) -> ScalarExpr {
    if let ScalarExpr::ColumnRef { refers_to, .. } = expr {
        if let Some((_, replacement)) = subs.iter().find(|(id, _)| id == refers_to) {
            return replacement.clone();
        }
    }
    match expr {
        ScalarExpr::Unary { id, op, expr: inner, ty } => ScalarExpr::Unary {
            id: *id,
            op: *op,
            expr: Box::new(substitute_assigned(inner, subs)),
            ty: ty.clone(),
        },
        ScalarExpr::Binary { id, op, lhs, rhs, ty } => ScalarExpr::Binary {
            id: *id,
            op: *op,
            lhs: Box::new(substitute_assigned(lhs, subs)),
            rhs: Box::new(substitute_assigned(rhs, subs)),
            ty: ty.clone(),
        },
        ScalarExpr::Cast { id, expr: inner, ty } => ScalarExpr::Cast {
            id: *id,
            expr: Box::new(substitute_assigned(inner, subs)),
            ty: ty.clone(),
        },
        ScalarExpr::Case {
            id,
            operand,
            branches,
            else_branch,
            ty,
        } => ScalarExpr::Case {
            id: *id,
            operand: operand.as_ref().map(|o| Box::new(substitute_assigned(o, subs))),
            branches: branches
                .iter()
                .map(|(w, t)| (substitute_assigned(w, subs), substitute_assigned(t, subs)))
                .collect(),
            else_branch: else_branch.as_ref().map(|e| Box::new(substitute_assigned(e, subs))),
            ty: ty.clone(),
        },
        ScalarExpr::FunctionCall {
            id,
            function,
            name,
            args,
            deterministic,
            ty,
        } => ScalarExpr::FunctionCall {
            id: *id,
            function: *function,
            name: name.clone(),
            args: args.iter().map(|a| substitute_assigned(a, subs)).collect(),
            deterministic: *deterministic,
            ty: ty.clone(),
        },
        ScalarExpr::In { id, expr: inner, list, negated } => ScalarExpr::In {
            id: *id,
            expr: Box::new(substitute_assigned(inner, subs)),
            list: match list {
                InList::Values(vs) => InList::Values(vs.iter().map(|v| substitute_assigned(v, subs)).collect()),
                InList::Subquery(plan) => InList::Subquery(plan.clone()),
            },
            negated: *negated,
        },
        other => other.clone(),
    }
}

fn attribute_label(expr: &ScalarExpr) -> String {
    match expr {
        ScalarExpr::ColumnRef { .. } => "?column?".to_string(),
        ScalarExpr::FunctionCall { name, .. } | ScalarExpr::WindowCall { name, .. } => name.clone(),
        _ => "?column?".to_string(),
    }
}

fn check_arity(function: &lucidb_schema::FunctionDef, name: &str, got: usize) -> PlanResult<()> {
    match function.arity {
        lucidb_schema::FunctionArity::Fixed(n) if got != n as usize => Err(PlanError::ArityMismatch {
            name: name.to_string(),
            expected: n.to_string(),
            got,
        }),
        _ => Ok(()),
    }
}

fn literal_type(value: &lucidb_sats::Value) -> LogicalType {
    match value.type_of() {
        Some(physical) => LogicalType::not_null(physical),
        None => LogicalType::nullable(PhysicalType::Text),
    }
}

/// Result type of a binary scalar operator. Comparison and boolean
/// operators always produce a nullable boolean (NULL propagates per the
/// three-valued-logic rule); arithmetic takes the wider numeric promotion
/// of its operands; `||` is text.
fn binary_result_type(op: ast::BinaryOp, lhs: &LogicalType, rhs: &LogicalType) -> LogicalType {
    use ast::BinaryOp::*;
    match op {
        Eq | NotEq | Lt | LtEq | Gt | GtEq | And | Or | Like | Glob => LogicalType::nullable(PhysicalType::Boolean),
        Concat => LogicalType::new(PhysicalType::Text, lhs.nullable || rhs.nullable),
        Add | Sub | Mul | Div | Mod => {
            let nullable = lhs.nullable || rhs.nullable;
            let physical = match (lhs.physical, rhs.physical) {
                (PhysicalType::Real, _) | (_, PhysicalType::Real) => PhysicalType::Real,
                (PhysicalType::BigInt, _) | (_, PhysicalType::BigInt) => PhysicalType::BigInt,
                _ => PhysicalType::Integer,
            };
            LogicalType::new(physical, nullable)
        }
    }
}

fn map_unary_op(op: ast::UnaryOp) -> UnaryOp {
    match op {
        ast::UnaryOp::Neg => UnaryOp::Neg,
        ast::UnaryOp::Not => UnaryOp::Not,
        ast::UnaryOp::IsNull => UnaryOp::IsNull,
        ast::UnaryOp::IsNotNull => UnaryOp::IsNotNull,
    }
}

fn map_binary_op(op: ast::BinaryOp) -> BinaryOp {
    match op {
        ast::BinaryOp::Add => BinaryOp::Add,
        ast::BinaryOp::Sub => BinaryOp::Sub,
        ast::BinaryOp::Mul => BinaryOp::Mul,
        ast::BinaryOp::Div => BinaryOp::Div,
        ast::BinaryOp::Mod => BinaryOp::Mod,
        ast::BinaryOp::Eq => BinaryOp::Eq,
        ast::BinaryOp::NotEq => BinaryOp::NotEq,
        ast::BinaryOp::Lt => BinaryOp::Lt,
        ast::BinaryOp::LtEq => BinaryOp::LtEq,
        ast::BinaryOp::Gt => BinaryOp::Gt,
        ast::BinaryOp::GtEq => BinaryOp::GtEq,
        ast::BinaryOp::And => BinaryOp::And,
        ast::BinaryOp::Or => BinaryOp::Or,
        ast::BinaryOp::Like => BinaryOp::Like,
        ast::BinaryOp::Glob => BinaryOp::Glob,
        ast::BinaryOp::Concat => BinaryOp::Concat,
    }
}

fn map_sort_dir(dir: ast::SortDir) -> SortDir {
    match dir {
        ast::SortDir::Asc => SortDir::Asc,
        ast::SortDir::Desc => SortDir::Desc,
    }
}

fn map_frame_bound(bound: &ast::FrameBound) -> FrameBound {
    match bound {
        ast::FrameBound::UnboundedPreceding => FrameBound::UnboundedPreceding,
        ast::FrameBound::Preceding(n) => FrameBound::Preceding(*n),
        ast::FrameBound::CurrentRow => FrameBound::CurrentRow,
        ast::FrameBound::Following(n) => FrameBound::Following(*n),
        ast::FrameBound::UnboundedFollowing => FrameBound::UnboundedFollowing,
    }
}

fn parse_type_name(name: &str) -> LogicalType {
    let physical = match name.to_ascii_uppercase().as_str() {
        "INTEGER" | "INT" => PhysicalType::Integer,
        "BIGINT" => PhysicalType::BigInt,
        "REAL" | "FLOAT" | "DOUBLE" => PhysicalType::Real,
        "BLOB" => PhysicalType::Blob,
        "BOOLEAN" | "BOOL" => PhysicalType::Boolean,
        "DATE" | "TIME" | "DATETIME" | "TIMESTAMP" => PhysicalType::Temporal,
        "JSON" => PhysicalType::Json,
        _ => PhysicalType::Text,
    };
    LogicalType::nullable(physical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lucidb_schema::{ColumnDef, FunctionArity, FunctionDef, FunctionKind, TableSchema};
    use lucidb_primitives::TableId;

    fn catalog_with_table() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.register_module("memory").unwrap();
        catalog
            .create_table(TableSchema {
                table_id: TableId::new(0),
                schema_name: "main".into(),
                table_name: "t".into(),
                columns: vec![
                    ColumnDef::new(0u16.into(), "id", LogicalType::not_null(PhysicalType::Integer)),
                    ColumnDef::new(1u16.into(), "name", LogicalType::nullable(PhysicalType::Text)),
                ],
                primary_key: Default::default(),
                indexes: vec![],
                checks: vec![],
                module_name: "memory".into(),
                module_args: String::new(),
            })
            .unwrap();
        catalog
            .register_function(FunctionDef {
                function_id: 0u32.into(),
                name: "count".into(),
                arity: FunctionArity::Fixed(0),
                deterministic: true,
                kind: FunctionKind::Aggregate,
                return_type: LogicalType::not_null(PhysicalType::BigInt),
            })
            .unwrap();
        catalog
    }

    fn select(sql_like: ast::SelectStmt) -> ast::Stmt {
        ast::Stmt::Select(sql_like)
    }

    #[test]
    fn builds_a_simple_projection_and_filter() {
        let catalog = catalog_with_table();
        let mut builder = PlanBuilder::new(&catalog);
        let stmt = select(ast::SelectStmt {
            projection: vec![ast::SelectItem::Expr {
                expr: ast::Expr::Column {
                    table: None,
                    name: "name".into(),
                },
                alias: None,
            }],
            from: Some(ast::TableRef {
                schema: None,
                name: "t".into(),
                alias: None,
            }),
            selection: Some(ast::Expr::Binary {
                op: ast::BinaryOp::Gt,
                lhs: Box::new(ast::Expr::Column {
                    table: None,
                    name: "id".into(),
                }),
                rhs: Box::new(ast::Expr::Literal(lucidb_sats::Value::Integer(1))),
            }),
            ..Default::default()
        });
        let plan = builder.build_stmt(&stmt).unwrap();
        assert_eq!(plan.attributes().len(), 1);
        assert_eq!(plan.attributes()[0].name, "name");
    }

    #[test]
    fn unknown_column_is_rejected() {
        let catalog = catalog_with_table();
        let mut builder = PlanBuilder::new(&catalog);
        let stmt = select(ast::SelectStmt {
            projection: vec![ast::SelectItem::Expr {
                expr: ast::Expr::Column {
                    table: None,
                    name: "nope".into(),
                },
                alias: None,
            }],
            from: Some(ast::TableRef {
                schema: None,
                name: "t".into(),
                alias: None,
            }),
            ..Default::default()
        });
        assert!(matches!(builder.build_stmt(&stmt), Err(PlanError::UnknownColumn(_))));
    }

    #[test]
    fn aggregate_outside_group_context_is_an_error() {
        let catalog = catalog_with_table();
        let mut builder = PlanBuilder::new(&catalog);
        // `count(*)`-style call with zero args, used directly as a WHERE
        // operand: aggregates are never valid there, grouped or not.
        let stmt = ast::Expr::FunctionCall {
            name: "count".into(),
            args: vec![],
            distinct: false,
        };
        assert!(matches!(builder.build_expr(&stmt, &[]), Err(PlanError::AggregateMisuse(_))));
    }

    #[test]
    fn star_expands_to_all_scope_columns() {
        let catalog = catalog_with_table();
        let mut builder = PlanBuilder::new(&catalog);
        let stmt = select(ast::SelectStmt {
            projection: vec![ast::SelectItem::Star],
            from: Some(ast::TableRef {
                schema: None,
                name: "t".into(),
                alias: None,
            }),
            ..Default::default()
        });
        let plan = builder.build_stmt(&stmt).unwrap();
        assert_eq!(plan.attributes().len(), 2);
    }

    #[test]
    fn insert_synthesizes_not_null_check_for_non_nullable_column() {
        let catalog = catalog_with_table();
        let mut builder = PlanBuilder::new(&catalog);
        let stmt = ast::Stmt::Insert(ast::InsertStmt {
            table: ast::TableRef {
                schema: None,
                name: "t".into(),
                alias: None,
            },
            columns: vec!["id".into(), "name".into()],
            rows: vec![vec![
                ast::Expr::Literal(lucidb_sats::Value::Integer(1)),
                ast::Expr::Literal(lucidb_sats::Value::Text("a".into())),
            ]],
            returning: vec![],
        });
        let plan = builder.build_stmt(&stmt).unwrap();
        let RelExpr::Insert { input, .. } = plan else { panic!("expected Insert") };
        let RelExpr::ConstraintCheck { checks, op, .. } = *input else {
            panic!("expected a ConstraintCheck node guarding the insert, got no NOT NULL enforcement")
        };
        assert_eq!(op, DmlOp::Insert);
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].constraint_name, "id__not_null");
        assert!(!checks[0].deferrable);
    }

    struct FixedChecks(Vec<CheckTemplate>);

    impl CheckProvider for FixedChecks {
        fn checks_for(&self, _table_id: TableId, _op: DmlOp) -> Vec<CheckTemplate> {
            self.0.clone()
        }
    }

    #[test]
    fn update_substitutes_assigned_value_into_check_expression() {
        let catalog = catalog_with_table();
        // `CHECK (id > 0)`, named, not declared deferrable -- should see
        // the *new* value being assigned, not the pre-update row's.
        let provider = FixedChecks(vec![CheckTemplate {
            constraint_name: "id_positive".into(),
            expr: ast::Expr::Binary {
                op: ast::BinaryOp::Gt,
                lhs: Box::new(ast::Expr::Column { table: None, name: "id".into() }),
                rhs: Box::new(ast::Expr::Literal(lucidb_sats::Value::Integer(0))),
            },
            deferrable: false,
        }]);
        let mut builder = PlanBuilder::with_checks(&catalog, &provider);
        let stmt = ast::Stmt::Update(ast::UpdateStmt {
            table: ast::TableRef {
                schema: None,
                name: "t".into(),
                alias: None,
            },
            assignments: vec![("id".into(), ast::Expr::Literal(lucidb_sats::Value::Integer(5)))],
            selection: None,
            returning: vec![],
        });
        let plan = builder.build_stmt(&stmt).unwrap();
        let RelExpr::Update { input, .. } = plan else { panic!("expected Update") };
        let RelExpr::ConstraintCheck { checks, .. } = *input else {
            panic!("expected a ConstraintCheck node guarding the update")
        };
        let named = checks.iter().find(|c| c.constraint_name == "id_positive").unwrap();
        // The substituted expression no longer references the column at
        // all -- it's `5 > 0`, a literal comparison against the assigned
        // value, not `id > 0` against the row being overwritten.
        match &named.expr {
            ScalarExpr::Binary { lhs, .. } => assert!(matches!(**lhs, ScalarExpr::Literal { value: lucidb_sats::Value::Integer(5), .. })),
            other => panic!("expected a substituted binary expression, got {other:?}"),
        }
    }

    #[test]
    fn subquery_bearing_check_is_always_deferred() {
        let catalog = catalog_with_table();
        let provider = FixedChecks(vec![CheckTemplate {
            constraint_name: "references_other_table".into(),
            expr: ast::Expr::Exists(Box::new(ast::SelectStmt {
                projection: vec![ast::SelectItem::Star],
                from: Some(ast::TableRef {
                    schema: None,
                    name: "t".into(),
                    alias: None,
                }),
                ..Default::default()
            })),
            deferrable: false,
        }]);
        let mut builder = PlanBuilder::with_checks(&catalog, &provider);
        let stmt = ast::Stmt::Delete(ast::DeleteStmt {
            table: ast::TableRef {
                schema: None,
                name: "t".into(),
                alias: None,
            },
            selection: None,
            returning: vec![],
        });
        let plan = builder.build_stmt(&stmt).unwrap();
        let RelExpr::Delete { input, .. } = plan else { panic!("expected Delete") };
        let RelExpr::ConstraintCheck { checks, .. } = *input else {
            panic!("expected a ConstraintCheck node guarding the delete")
        };
        assert_eq!(checks.len(), 1);
        assert!(checks[0].contains_subquery);
        assert!(checks[0].deferrable);
    }
}
