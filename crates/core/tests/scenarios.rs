//! End-to-end scenarios exercised through `Database`'s public surface only,
//! built by hand against `lucidb_sql_ast` since this workspace brings no
//! parser of its own (`lucidb-sql-ast`'s own doc comment explains why).

use lucidb::ast::{
    BinaryOp, CheckDef, ColumnSpec, CreateTableStmt, DeleteStmt, Expr, InsertStmt, JoinClause, JoinCondition, JoinKind, OrderItem,
    SelectItem, SelectStmt, SortDir, Stmt, TableRef, UpdateStmt, WindowSpec,
};
use lucidb::{Database, Error, Row, Value};

fn table_ref(name: &str) -> TableRef {
    TableRef {
        schema: None,
        name: name.to_string(),
        alias: None,
    }
}

fn col(name: &str) -> Expr {
    Expr::Column {
        table: None,
        name: name.to_string(),
    }
}

fn create_users() -> Stmt {
    Stmt::CreateTable(CreateTableStmt {
        schema: None,
        name: "users".to_string(),
        columns: vec![
            ColumnSpec {
                name: "id".to_string(),
                type_name: "INTEGER".to_string(),
                nullable: false,
            },
            ColumnSpec {
                name: "name".to_string(),
                type_name: "TEXT".to_string(),
                nullable: true,
            },
            ColumnSpec {
                name: "email".to_string(),
                type_name: "TEXT".to_string(),
                nullable: true,
            },
        ],
        primary_key: vec!["id".to_string()],
        checks: Vec::new(),
        module_name: None,
        module_args: None,
    })
}

fn insert_user(id: i64, name: &str, email: &str) -> Stmt {
    Stmt::Insert(InsertStmt {
        table: table_ref("users"),
        columns: vec!["id".to_string(), "name".to_string(), "email".to_string()],
        rows: vec![vec![
            Expr::Literal(Value::Integer(id)),
            Expr::Literal(Value::Text(name.to_string())),
            Expr::Literal(Value::Text(email.to_string())),
        ]],
        returning: Vec::new(),
    })
}

fn select_all_users_ordered() -> Stmt {
    Stmt::Select(SelectStmt {
        projection: vec![SelectItem::Star],
        from: Some(table_ref("users")),
        order_by: vec![OrderItem {
            expr: col("id"),
            dir: SortDir::Asc,
        }],
        ..Default::default()
    })
}

#[tokio::test]
async fn s1_basic_crud_round_trips_in_declared_column_order() {
    let db = Database::with_default_config();

    db.exec(&create_users()).await.unwrap();
    db.exec(&insert_user(1, "Alice", "alice@example.com")).await.unwrap();
    db.exec(&insert_user(2, "Bob", "bob@example.com")).await.unwrap();

    let rows = db.exec(&select_all_users_ordered()).await.unwrap();

    assert_eq!(
        rows,
        vec![
            Row::new(vec![
                Value::Integer(1),
                Value::Text("Alice".to_string()),
                Value::Text("alice@example.com".to_string())
            ]),
            Row::new(vec![
                Value::Integer(2),
                Value::Text("Bob".to_string()),
                Value::Text("bob@example.com".to_string())
            ]),
        ]
    );
}

#[tokio::test]
async fn s4_rollback_to_savepoint_restores_the_pre_update_value() {
    let db = Database::with_default_config();
    db.exec(&create_users()).await.unwrap();
    db.exec(&Stmt::Begin).await.unwrap();
    db.exec(&insert_user(1, "Alice", "alice@example.com")).await.unwrap();
    db.exec(&Stmt::Savepoint("s1".to_string())).await.unwrap();

    db.exec(&Stmt::Update(UpdateStmt {
        table: table_ref("users"),
        assignments: vec![("name".to_string(), Expr::Literal(Value::Text("Alicia".to_string())))],
        selection: Some(Expr::Binary {
            op: BinaryOp::Eq,
            lhs: Box::new(col("id")),
            rhs: Box::new(Expr::Literal(Value::Integer(1))),
        }),
        returning: Vec::new(),
    }))
    .await
    .unwrap();

    db.exec(&Stmt::Rollback {
        to_savepoint: Some("s1".to_string()),
    })
    .await
    .unwrap();
    db.exec(&Stmt::Commit).await.unwrap();

    let rows = db.exec(&select_all_users_ordered()).await.unwrap();
    assert_eq!(
        rows,
        vec![Row::new(vec![
            Value::Integer(1),
            Value::Text("Alice".to_string()),
            Value::Text("alice@example.com".to_string())
        ])]
    );
}

fn create_table_a() -> Stmt {
    Stmt::CreateTable(CreateTableStmt {
        schema: None,
        name: "a".to_string(),
        columns: vec![ColumnSpec {
            name: "id".to_string(),
            type_name: "INTEGER".to_string(),
            nullable: false,
        }],
        primary_key: vec!["id".to_string()],
        checks: Vec::new(),
        module_name: None,
        module_args: None,
    })
}

fn create_table_b() -> Stmt {
    Stmt::CreateTable(CreateTableStmt {
        schema: None,
        name: "b".to_string(),
        columns: vec![
            ColumnSpec {
                name: "id".to_string(),
                type_name: "INTEGER".to_string(),
                nullable: false,
            },
            ColumnSpec {
                name: "aid".to_string(),
                type_name: "INTEGER".to_string(),
                nullable: true,
            },
        ],
        primary_key: vec!["id".to_string()],
        checks: vec![CheckDef {
            name: Some("b_aid_exists_in_a".to_string()),
            expr: Expr::Exists(Box::new(SelectStmt {
                projection: vec![SelectItem::Expr {
                    expr: Expr::Literal(Value::Integer(1)),
                    alias: None,
                }],
                from: Some(table_ref("a")),
                selection: Some(Expr::Binary {
                    op: BinaryOp::Eq,
                    lhs: Box::new(col("id")),
                    rhs: Box::new(col("aid")),
                }),
                ..Default::default()
            })),
            deferrable: true,
        }],
        module_name: None,
        module_args: None,
    })
}

fn insert_a(id: i64) -> Stmt {
    Stmt::Insert(InsertStmt {
        table: table_ref("a"),
        columns: vec!["id".to_string()],
        rows: vec![vec![Expr::Literal(Value::Integer(id))]],
        returning: Vec::new(),
    })
}

fn insert_b(id: i64, aid: i64) -> Stmt {
    Stmt::Insert(InsertStmt {
        table: table_ref("b"),
        columns: vec!["id".to_string(), "aid".to_string()],
        rows: vec![vec![Expr::Literal(Value::Integer(id)), Expr::Literal(Value::Integer(aid))]],
        returning: Vec::new(),
    })
}

#[tokio::test]
async fn s5_deferred_cross_table_check_allows_any_ordering_within_one_transaction() {
    let db = Database::with_default_config();
    db.exec(&create_table_a()).await.unwrap();
    db.exec(&create_table_b()).await.unwrap();

    db.exec(&Stmt::Begin).await.unwrap();
    db.exec(&insert_b(100, 1)).await.unwrap();
    db.exec(&insert_a(1)).await.unwrap();
    db.exec(&Stmt::Commit).await.unwrap();

    let rows = db
        .exec(&Stmt::Select(SelectStmt {
            projection: vec![SelectItem::Star],
            from: Some(table_ref("b")),
            ..Default::default()
        }))
        .await
        .unwrap();
    assert_eq!(rows, vec![Row::new(vec![Value::Integer(100), Value::Integer(1)])]);
}

#[tokio::test]
async fn s5_standalone_violating_insert_raises_constraint_at_commit() {
    let db = Database::with_default_config();
    db.exec(&create_table_a()).await.unwrap();
    db.exec(&create_table_b()).await.unwrap();

    db.exec(&Stmt::Begin).await.unwrap();
    db.exec(&insert_b(200, 999)).await.unwrap();
    let result = db.exec(&Stmt::Commit).await;

    assert!(matches!(result, Err(Error::Constraint(_))), "expected Constraint, got {result:?}");
}

#[tokio::test]
async fn s6_dropping_a_dependency_table_raises_schema_missing_on_next_run() {
    let db = Database::with_default_config();
    db.exec(&create_users()).await.unwrap();
    db.exec(&insert_user(1, "Alice", "alice@example.com")).await.unwrap();

    let mut statement = db.prepare(select_all_users_ordered()).await.unwrap();
    let first = statement.all().await.unwrap();
    assert_eq!(first.len(), 1);

    db.exec(&Stmt::DropTable("users".to_string())).await.unwrap();

    let second = statement.all().await;
    assert!(matches!(second, Err(Error::SchemaMissing(_))), "expected SchemaMissing, got {second:?}");

    let reprepared = db.prepare(select_all_users_ordered()).await;
    assert!(matches!(reprepared, Err(Error::SchemaMissing(_))), "expected SchemaMissing, got {reprepared:?}");

    statement.finalize().await;

    db.exec(&create_users()).await.unwrap();
    db.exec(&insert_user(2, "Bob", "bob@example.com")).await.unwrap();
    let rows = db.exec(&select_all_users_ordered()).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn bind_rejects_a_value_that_does_not_match_the_parameter_position() {
    let db = Database::with_default_config();
    db.exec(&create_users()).await.unwrap();
    db.exec(&insert_user(1, "Alice", "alice@example.com")).await.unwrap();

    let mut statement = db
        .prepare(Stmt::Select(SelectStmt {
            projection: vec![SelectItem::Star],
            from: Some(table_ref("users")),
            selection: Some(Expr::Binary {
                op: BinaryOp::Eq,
                lhs: Box::new(col("id")),
                rhs: Box::new(Expr::Parameter(0)),
            }),
            ..Default::default()
        }))
        .await
        .unwrap();

    // Every bound parameter's inferred type is nullable `Text` regardless of
    // the column it's compared against (`PlanBuilder::build_expr`'s
    // `Expr::Parameter` arm) -- binding anything else raises `Mismatch`.
    let err = statement.bind(0, Value::Integer(1));
    assert!(matches!(err, Err(Error::Mismatch(_))), "expected Mismatch, got {err:?}");
    statement.finalize().await;
}

fn create_orders() -> Stmt {
    Stmt::CreateTable(CreateTableStmt {
        schema: None,
        name: "orders".to_string(),
        columns: vec![
            ColumnSpec {
                name: "id".to_string(),
                type_name: "INTEGER".to_string(),
                nullable: false,
            },
            ColumnSpec {
                name: "user_id".to_string(),
                type_name: "INTEGER".to_string(),
                nullable: true,
            },
        ],
        primary_key: vec!["id".to_string()],
        checks: Vec::new(),
        module_name: None,
        module_args: None,
    })
}

fn insert_order(id: i64, user_id: i64) -> Stmt {
    Stmt::Insert(InsertStmt {
        table: table_ref("orders"),
        columns: vec!["id".to_string(), "user_id".to_string()],
        rows: vec![vec![Expr::Literal(Value::Integer(id)), Expr::Literal(Value::Integer(user_id))]],
        returning: Vec::new(),
    })
}

#[tokio::test]
async fn s2_left_join_null_pads_the_unmatched_side() {
    let db = Database::with_default_config();
    db.exec(&create_users()).await.unwrap();
    db.exec(&create_orders()).await.unwrap();
    db.exec(&insert_user(1, "Alice", "alice@example.com")).await.unwrap();
    db.exec(&insert_user(2, "Bob", "bob@example.com")).await.unwrap();
    db.exec(&insert_order(10, 1)).await.unwrap();

    let mut u = table_ref("users");
    u.alias = Some("u".to_string());
    let mut o = table_ref("orders");
    o.alias = Some("o".to_string());

    let stmt = Stmt::Select(SelectStmt {
        projection: vec![
            SelectItem::Expr {
                expr: Expr::Column {
                    table: Some("u".to_string()),
                    name: "name".to_string(),
                },
                alias: None,
            },
            SelectItem::Expr {
                expr: Expr::Column {
                    table: Some("o".to_string()),
                    name: "id".to_string(),
                },
                alias: None,
            },
        ],
        from: Some(u),
        joins: vec![JoinClause {
            kind: JoinKind::Left,
            table: o,
            condition: JoinCondition::On(Expr::Binary {
                op: BinaryOp::Eq,
                lhs: Box::new(Expr::Column {
                    table: Some("o".to_string()),
                    name: "user_id".to_string(),
                }),
                rhs: Box::new(Expr::Column {
                    table: Some("u".to_string()),
                    name: "id".to_string(),
                }),
            }),
        }],
        order_by: vec![OrderItem {
            expr: Expr::Column {
                table: Some("u".to_string()),
                name: "id".to_string(),
            },
            dir: SortDir::Asc,
        }],
        ..Default::default()
    });

    let rows = db.exec(&stmt).await.unwrap();
    assert_eq!(
        rows,
        vec![
            Row::new(vec![Value::Text("Alice".to_string()), Value::Integer(10)]),
            Row::new(vec![Value::Text("Bob".to_string()), Value::Null]),
        ]
    );
}

fn create_t_x() -> Stmt {
    Stmt::CreateTable(CreateTableStmt {
        schema: None,
        name: "t".to_string(),
        columns: vec![
            ColumnSpec {
                name: "id".to_string(),
                type_name: "INTEGER".to_string(),
                nullable: false,
            },
            ColumnSpec {
                name: "x".to_string(),
                type_name: "INTEGER".to_string(),
                nullable: true,
            },
        ],
        primary_key: vec!["id".to_string()],
        checks: Vec::new(),
        module_name: None,
        module_args: None,
    })
}

fn insert_x(id: i64, x: i64) -> Stmt {
    Stmt::Insert(InsertStmt {
        table: table_ref("t"),
        columns: vec!["id".to_string(), "x".to_string()],
        rows: vec![vec![Expr::Literal(Value::Integer(id)), Expr::Literal(Value::Integer(x))]],
        returning: Vec::new(),
    })
}

fn window_select(function_name: &str) -> Stmt {
    Stmt::Select(SelectStmt {
        projection: vec![SelectItem::Expr {
            expr: Expr::WindowCall {
                name: function_name.to_string(),
                args: Vec::new(),
                window: WindowSpec {
                    partition_by: Vec::new(),
                    order_by: vec![OrderItem {
                        expr: col("x"),
                        dir: SortDir::Asc,
                    }],
                    frame: None,
                },
            },
            alias: None,
        }],
        from: Some(table_ref("t")),
        ..Default::default()
    })
}

#[tokio::test]
async fn s3_rank_leaves_gaps_after_ties_dense_rank_does_not() {
    let db = Database::with_default_config();
    db.exec(&create_t_x()).await.unwrap();
    for (id, x) in [1, 2, 2, 3].into_iter().enumerate() {
        db.exec(&insert_x(id as i64 + 1, x)).await.unwrap();
    }

    let rank_rows = db.exec(&window_select("rank")).await.unwrap();
    assert_eq!(
        rank_rows,
        vec![
            Row::new(vec![Value::Integer(1)]),
            Row::new(vec![Value::Integer(2)]),
            Row::new(vec![Value::Integer(2)]),
            Row::new(vec![Value::Integer(4)]),
        ]
    );

    let dense_rows = db.exec(&window_select("dense_rank")).await.unwrap();
    assert_eq!(
        dense_rows,
        vec![
            Row::new(vec![Value::Integer(1)]),
            Row::new(vec![Value::Integer(2)]),
            Row::new(vec![Value::Integer(2)]),
            Row::new(vec![Value::Integer(3)]),
        ]
    );
}

#[tokio::test]
async fn s1_delete_removes_the_matching_row_only() {
    let db = Database::with_default_config();
    db.exec(&create_users()).await.unwrap();
    db.exec(&insert_user(1, "Alice", "alice@example.com")).await.unwrap();
    db.exec(&insert_user(2, "Bob", "bob@example.com")).await.unwrap();

    db.exec(&Stmt::Delete(DeleteStmt {
        table: table_ref("users"),
        selection: Some(Expr::Binary {
            op: BinaryOp::Eq,
            lhs: Box::new(col("id")),
            rhs: Box::new(Expr::Literal(Value::Integer(1))),
        }),
        returning: Vec::new(),
    }))
    .await
    .unwrap();

    let rows = db.exec(&select_all_users_ordered()).await.unwrap();
    assert_eq!(
        rows,
        vec![Row::new(vec![
            Value::Integer(2),
            Value::Text("Bob".to_string()),
            Value::Text("bob@example.com".to_string())
        ])]
    );
}
