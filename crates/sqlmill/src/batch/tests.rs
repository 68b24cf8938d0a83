use super::*;
use crate::config::{SkipPolicy, SqlConfig};
use crate::entity::{IdGenerator, SqlType};
use serde_json::json;

fn account() -> EntityDescriptor {
    EntityDescriptor::builder("account")
        .field(FieldDescriptor::new("id", SqlType::BigInt).primary_key())
        .field(FieldDescriptor::new("name", SqlType::Varchar).length(64).indexed())
        .field(FieldDescriptor::new("age", SqlType::Int))
        .field(FieldDescriptor::new("status", SqlType::TinyInt).default_value(1))
        .build()
        .unwrap()
}

fn doc() -> EntityDescriptor {
    EntityDescriptor::builder("doc")
        .field(
            FieldDescriptor::new("id", SqlType::Char)
                .length(36)
                .primary_key()
                .id_generator(IdGenerator::Uuid),
        )
        .field(FieldDescriptor::new("title", SqlType::Varchar))
        .build()
        .unwrap()
}

fn member() -> EntityDescriptor {
    EntityDescriptor::builder("member")
        .field(FieldDescriptor::new("tenant", SqlType::Int).primary_key())
        .field(FieldDescriptor::new("uid", SqlType::Int).primary_key())
        .field(FieldDescriptor::new("role", SqlType::Varchar))
        .build()
        .unwrap()
}

fn post() -> EntityDescriptor {
    EntityDescriptor::builder("post")
        .field(FieldDescriptor::new("id", SqlType::BigInt).primary_key())
        .field(
            FieldDescriptor::new("deleted", SqlType::TinyInt)
                .default_value(0)
                .logical_delete(1),
        )
        .build()
        .unwrap()
}

fn keyless() -> EntityDescriptor {
    EntityDescriptor::builder("audit_log")
        .field(FieldDescriptor::new("msg", SqlType::Text))
        .build()
        .unwrap()
}

fn rec(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

fn recs(values: Vec<Value>) -> Vec<Record> {
    values.into_iter().map(rec).collect()
}

fn mysql() -> SqlConfig {
    SqlConfig::new()
}

/// Temp table name from a `DROP TABLE IF EXISTS <name>` step.
fn temp_name(step: &CompiledStatement) -> String {
    step.sql
        .strip_prefix("DROP TABLE IF EXISTS ")
        .unwrap()
        .to_string()
}

// ==================== Participation ====================

#[test]
fn participation_follows_skip_order() {
    let e = account();
    let age = e.field("age").unwrap();
    let status = e.field("status").unwrap();
    let policy = SkipPolicy::default();

    assert_eq!(participate(age, &rec(json!({})), &policy, false), None);
    assert_eq!(participate(age, &rec(json!({"age": null})), &policy, false), None);
    assert_eq!(participate(age, &rec(json!({"age": 3})), &policy, false), Some(json!(3)));

    let keep = SkipPolicy::keep_all();
    assert_eq!(participate(age, &rec(json!({})), &keep, false), Some(Value::Null));
    assert_eq!(participate(status, &rec(json!({})), &keep, true), Some(json!(1)));
    assert_eq!(
        participate(status, &rec(json!({"status": "  "})), &keep, false),
        Some(json!(""))
    );
}

#[test]
fn id_generator_fields_always_take_part_on_insert() {
    let e = doc();
    let id = e.field("id").unwrap();
    let policy = SkipPolicy::default();
    assert_eq!(participate(id, &rec(json!({})), &policy, true), Some(Value::Null));
    assert_eq!(participate(id, &rec(json!({"id": ""})), &policy, true), Some(Value::Null));
    assert_eq!(participate(id, &rec(json!({"id": "x"})), &policy, true), Some(json!("x")));
    assert_eq!(participate(id, &rec(json!({})), &policy, false), None);
}

// ==================== Insert ====================

#[test]
fn insert_multi_row_values() {
    let rows = recs(vec![
        json!({"id": 1, "name": "a", "age": 20}),
        json!({"id": 2, "name": "b"}),
    ]);
    let steps = insert(&account(), &rows, &InsertOptions::default(), &mysql()).unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(
        steps[0].sql,
        "INSERT INTO account (id, name, age) VALUES (?, ?, ?), (?, ?, ?)"
    );
    assert_eq!(steps[0].params, vec![json!(1), json!("a"), json!(20), json!(2), json!("b"), json!(null)]);
    assert_eq!(steps[0].param_count(), 2 * 3);
}

#[test]
fn insert_uses_generator_for_empty_ids() {
    let rows = recs(vec![json!({"title": "x"}), json!({"id": "abc", "title": "y"})]);
    let config = SqlConfig::for_dialect(Dialect::Postgres);
    let steps = insert(&doc(), &rows, &InsertOptions::default(), &config).unwrap();
    assert_eq!(
        steps[0].sql,
        "INSERT INTO doc (id, title) VALUES (gen_random_uuid(), $1), ($2, $3)"
    );
    assert_eq!(steps[0].params, vec![json!("x"), json!("abc"), json!("y")]);

    let steps = insert(&doc(), &rows[..1], &InsertOptions::default(), &mysql()).unwrap();
    assert_eq!(steps[0].sql, "INSERT INTO doc (id, title) VALUES (UUID(), ?)");
}

#[test]
fn insert_keep_all_falls_back_to_defaults() {
    let rows = recs(vec![json!({"id": 1, "name": ""})]);
    let config = mysql().with_skip(SkipPolicy::keep_all());
    let steps = insert(&account(), &rows, &InsertOptions::default(), &config).unwrap();
    assert_eq!(
        steps[0].sql,
        "INSERT INTO account (id, name, age, status) VALUES (?, ?, ?, ?)"
    );
    assert_eq!(steps[0].params, vec![json!(1), json!(""), json!(null), json!(1)]);
}

#[test]
fn insert_replace_per_dialect() {
    let rows = recs(vec![json!({"id": 1, "name": "a"})]);
    let opts = InsertOptions::new(InsertMode::Replace);

    let steps = insert(&account(), &rows, &opts, &mysql()).unwrap();
    assert_eq!(steps[0].sql, "REPLACE INTO account (id, name) VALUES (?, ?)");

    let steps = insert(&account(), &rows, &opts, &SqlConfig::for_dialect(Dialect::Sqlite)).unwrap();
    assert_eq!(steps[0].sql, "INSERT OR REPLACE INTO account (id, name) VALUES (?, ?)");

    let pg = SqlConfig::for_dialect(Dialect::Postgres);
    let steps = insert(&account(), &rows, &opts, &pg).unwrap();
    assert_eq!(
        steps[0].sql,
        "INSERT INTO account (id, name) VALUES ($1, $2) ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name"
    );

    let only_key = recs(vec![json!({"id": 1})]);
    let steps = insert(&account(), &only_key, &opts, &pg).unwrap();
    assert_eq!(
        steps[0].sql,
        "INSERT INTO account (id) VALUES ($1) ON CONFLICT (id) DO NOTHING"
    );

    let err = insert(&keyless(), &recs(vec![json!({"msg": "m"})]), &opts, &pg).unwrap_err();
    assert!(matches!(err, SqlError::Validation(_)));
}

#[test]
fn insert_if_not_exists_unions_each_record() {
    let rows = recs(vec![
        json!({"id": 1, "name": "a"}),
        json!({"id": 2, "name": "b"}),
        json!({"id": 3, "name": "c"}),
    ]);
    let opts = InsertOptions::new(InsertMode::IfNotExists);
    let steps = insert(&account(), &rows, &opts, &mysql()).unwrap();
    assert_eq!(steps.len(), 1);
    let branch = "SELECT ?, ? FROM DUAL WHERE NOT EXISTS (SELECT 1 FROM account WHERE id = ?)";
    assert_eq!(
        steps[0].sql,
        format!("INSERT INTO account (id, name) {branch} UNION ALL {branch} UNION ALL {branch}")
    );
    assert_eq!(steps[0].sql.matches("NOT EXISTS").count(), 3);
    assert_eq!(
        steps[0].params,
        vec![json!(1), json!("a"), json!(1), json!(2), json!("b"), json!(2), json!(3), json!("c"), json!(3)]
    );
}

#[test]
fn insert_if_not_exists_with_custom_fields() {
    let rows = recs(vec![json!({"id": 1, "name": "a"})]);
    let opts = InsertOptions::new(InsertMode::IfNotExists).with_exists_fields(["name"]);
    let steps = insert(&account(), &rows, &opts, &SqlConfig::for_dialect(Dialect::Sqlite)).unwrap();
    assert_eq!(
        steps[0].sql,
        "INSERT INTO account (id, name) SELECT ?, ? WHERE NOT EXISTS (SELECT 1 FROM account WHERE name = ?)"
    );

    let bad = InsertOptions::new(InsertMode::IfNotExists).with_exists_fields(["nope"]);
    assert!(insert(&account(), &rows, &bad, &mysql()).is_err());

    let opts = InsertOptions::new(InsertMode::IfNotExists);
    assert!(insert(&keyless(), &recs(vec![json!({"msg": "m"})]), &opts, &mysql()).is_err());
}

#[test]
fn insert_if_not_exists_requires_check_values() {
    let opts = InsertOptions::new(InsertMode::IfNotExists).with_exists_fields(["name"]);
    let rows = recs(vec![json!({"id": 1, "name": "a"}), json!({"id": 2})]);
    let err = insert(&account(), &rows, &opts, &mysql()).unwrap_err();
    assert!(matches!(err, SqlError::Validation(_)));
    assert!(err.to_string().contains("existence field 'name'"));

    let rows = recs(vec![json!({"id": 2, "name": null})]);
    assert!(insert(&account(), &rows, &opts, &mysql()).is_err());

    // A declared default stands in for the missing value.
    let opts = InsertOptions::new(InsertMode::IfNotExists).with_exists_fields(["status"]);
    let steps = insert(&account(), &recs(vec![json!({"id": 3})]), &opts, &mysql()).unwrap();
    assert!(steps[0].sql.ends_with("WHERE status = ?)"));
    assert_eq!(steps[0].params.last(), Some(&json!(1)));
}

#[test]
fn insert_temp_table_five_steps() {
    let rows = recs(vec![json!({"id": 1, "name": "a"}), json!({"id": 2, "name": "b"})]);
    let opts = InsertOptions::new(InsertMode::TempTable);
    let steps = insert(&account(), &rows, &opts, &mysql()).unwrap();
    assert_eq!(steps.len(), 5);

    let tmp = temp_name(&steps[0]);
    assert!(tmp.starts_with("account_"));
    assert_eq!(
        steps[1].sql,
        format!("CREATE TEMPORARY TABLE IF NOT EXISTS {tmp} (id BIGINT NOT NULL, name VARCHAR(64)) ENGINE=MEMORY")
    );
    assert_eq!(steps[2].sql, format!("INSERT INTO {tmp} (id, name) VALUES (?, ?), (?, ?)"));
    assert_eq!(steps[2].params.len(), 4);
    assert_eq!(
        steps[3].sql,
        format!("INSERT INTO account (id, name) SELECT id, name FROM {tmp}")
    );
    assert_eq!(steps[4].sql, format!("DROP TABLE IF EXISTS {tmp}"));
}

#[test]
fn insert_chunks_by_max_deal() {
    let rows: Vec<Record> = (1..=5).map(|i| rec(json!({"id": i, "name": "n"}))).collect();
    let config = mysql().with_max_deal(2);
    let steps = insert(&account(), &rows, &InsertOptions::default(), &config).unwrap();
    let counts: Vec<usize> = steps.iter().map(|s| s.param_count()).collect();
    assert_eq!(counts, vec![4, 4, 2]);
}

#[test]
fn insert_edge_cases() {
    let steps = insert(&account(), &[], &InsertOptions::default(), &mysql()).unwrap();
    assert!(steps.is_empty());

    let err = insert(&account(), &recs(vec![json!({})]), &InsertOptions::default(), &mysql())
        .unwrap_err();
    assert!(matches!(err, SqlError::Validation(_)));

    let err = insert(
        &account(),
        &recs(vec![json!({"id": 1})]),
        &InsertOptions::default(),
        &mysql().with_max_deal(0),
    )
    .unwrap_err();
    assert!(matches!(err, SqlError::Config(_)));
}

// ==================== Update ====================

#[test]
fn update_case_when_per_column() {
    let rows = recs(vec![
        json!({"id": 1, "name": "a", "age": 30}),
        json!({"id": 2, "name": "b"}),
    ]);
    let steps = update(&account(), &rows, &mysql()).unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(
        steps[0].sql,
        "UPDATE account SET name = CASE WHEN id = ? THEN ? WHEN id = ? THEN ? ELSE name END, \
         age = CASE WHEN id = ? THEN ? ELSE age END WHERE id IN (?, ?)"
    );
    assert_eq!(
        steps[0].params,
        vec![json!(1), json!("a"), json!(2), json!("b"), json!(1), json!(30), json!(1), json!(2)]
    );
    assert!(!steps[0].sql.contains("status"));
}

#[test]
fn update_composite_keys() {
    let rows = recs(vec![
        json!({"tenant": 1, "uid": 2, "role": "x"}),
        json!({"tenant": 1, "uid": 3, "role": "y"}),
    ]);
    let steps = update(&member(), &rows, &SqlConfig::for_dialect(Dialect::Postgres)).unwrap();
    assert_eq!(
        steps[0].sql,
        "UPDATE member SET role = CASE WHEN tenant = $1 AND uid = $2 THEN $3 \
         WHEN tenant = $4 AND uid = $5 THEN $6 ELSE role END \
         WHERE (tenant = $7 AND uid = $8) OR (tenant = $9 AND uid = $10)"
    );
    assert_eq!(steps[0].param_count(), 10);
}

#[test]
fn update_skips_unchanged_records() {
    let rows = recs(vec![json!({"id": 1, "name": "a"}), json!({"id": 2, "name": null})]);
    let steps = update(&account(), &rows, &mysql()).unwrap();
    assert_eq!(
        steps[0].sql,
        "UPDATE account SET name = CASE WHEN id = ? THEN ? ELSE name END WHERE id IN (?)"
    );

    let steps = update(&account(), &recs(vec![json!({"id": 1})]), &mysql()).unwrap();
    assert!(steps.is_empty());
}

#[test]
fn update_requires_keys() {
    let err = update(&account(), &recs(vec![json!({"name": "a"})]), &mysql()).unwrap_err();
    assert!(err.to_string().contains("missing key 'id'"));

    let err = update(&account(), &recs(vec![json!({"id": " ", "name": "a"})]), &mysql()).unwrap_err();
    assert!(matches!(err, SqlError::Validation(_)));

    assert!(update(&keyless(), &recs(vec![json!({"msg": "m"})]), &mysql()).is_err());
}

// ==================== Delete ====================

#[test]
fn delete_by_ids_and_where() {
    let steps = delete(&account(), &DeleteRequest::ids([json!(1), json!(2)]), &mysql()).unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].sql, "DELETE FROM account WHERE (id = ?) OR (id = ?)");
    assert_eq!(steps[0].params, vec![json!(1), json!(2)]);

    let req = DeleteRequest::by_where(recs(vec![json!({"age": null, "name": "a"})]));
    let steps = delete(&account(), &req, &mysql()).unwrap();
    assert_eq!(steps[0].sql, "DELETE FROM account WHERE (name = ? AND age IS NULL)");
    assert_eq!(steps[0].params, vec![json!("a")]);
}

#[test]
fn delete_logical_marks_rows() {
    let steps = delete(&post(), &DeleteRequest::ids([json!(5)]), &mysql()).unwrap();
    assert_eq!(steps[0].sql, "UPDATE post SET deleted = ? WHERE (id = ?)");
    assert_eq!(steps[0].params, vec![json!(1), json!(5)]);

    let steps = delete(&post(), &DeleteRequest::ids([json!(5)]).force(), &mysql()).unwrap();
    assert_eq!(steps[0].sql, "DELETE FROM post WHERE (id = ?)");
}

#[test]
fn delete_raw_predicate() {
    let pg = SqlConfig::for_dialect(Dialect::Postgres);
    let req = DeleteRequest::raw("age > :age AND name = :name", json!({"age": 3, "name": "x"}));
    let steps = delete(&account(), &req, &pg).unwrap();
    assert_eq!(steps[0].sql, "DELETE FROM account WHERE age > $1 AND name = $2");
    assert_eq!(steps[0].params, vec![json!(3), json!("x")]);

    let req = DeleteRequest::raw("id = :id", json!({"id": 7})).with_mode(DeleteMode::TempTable);
    let steps = delete(&post(), &req, &pg).unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].sql, "UPDATE post SET deleted = $1 WHERE id = $2");
    assert_eq!(steps[0].params, vec![json!(1), json!(7)]);

    assert!(delete(&account(), &DeleteRequest::raw("  ", json!({})), &pg).is_err());
}

#[test]
fn delete_temp_table_per_dialect() {
    let req = DeleteRequest::ids([json!(1), json!(2)]).with_mode(DeleteMode::TempTable);

    let steps = delete(&account(), &req, &mysql()).unwrap();
    assert_eq!(steps.len(), 5);
    let tmp = temp_name(&steps[0]);
    assert_eq!(
        steps[1].sql,
        format!("CREATE TEMPORARY TABLE IF NOT EXISTS {tmp} (id BIGINT NOT NULL, KEY idx_id (id)) ENGINE=MEMORY")
    );
    assert_eq!(steps[2].sql, format!("INSERT INTO {tmp} (id) VALUES (?), (?)"));
    assert_eq!(steps[2].params, vec![json!(1), json!(2)]);
    assert_eq!(
        steps[3].sql,
        format!("DELETE a.* FROM account a INNER JOIN {tmp} b ON a.id <=> b.id")
    );
    assert_eq!(steps[4].sql, format!("DROP TABLE IF EXISTS {tmp}"));

    let steps = delete(&account(), &req, &SqlConfig::for_dialect(Dialect::Postgres)).unwrap();
    assert_eq!(steps.len(), 5);
    let tmp = temp_name(&steps[0]);
    assert_eq!(
        steps[1].sql,
        format!("CREATE TEMPORARY TABLE IF NOT EXISTS {tmp} (id BIGINT NOT NULL)")
    );
    assert_eq!(steps[2].sql, format!("INSERT INTO {tmp} (id) VALUES ($1), ($2)"));
    assert_eq!(
        steps[3].sql,
        format!("DELETE FROM account a USING {tmp} b WHERE a.id IS NOT DISTINCT FROM b.id")
    );

    let steps = delete(&account(), &req, &SqlConfig::for_dialect(Dialect::Sqlite)).unwrap();
    assert_eq!(steps.len(), 5);
    let tmp = temp_name(&steps[0]);
    assert_eq!(
        steps[3].sql,
        format!("DELETE FROM account WHERE EXISTS (SELECT 1 FROM {tmp} b WHERE account.id IS b.id)")
    );
}

#[test]
fn delete_temp_table_fills_in_chunks() {
    let ids: Vec<Value> = (1..=5).map(|i| json!(i)).collect();
    let req = DeleteRequest::ids(ids).with_mode(DeleteMode::TempTable);
    let steps = delete(&account(), &req, &mysql().with_max_deal(2)).unwrap();
    assert_eq!(steps.len(), 7);
    let tmp = temp_name(&steps[0]);
    let fills: Vec<&CompiledStatement> = steps
        .iter()
        .filter(|s| s.sql.starts_with(&format!("INSERT INTO {tmp}")))
        .collect();
    assert_eq!(fills.len(), 3);
    assert_eq!(
        fills.iter().map(|s| s.param_count()).collect::<Vec<_>>(),
        vec![2, 2, 1]
    );
    assert!(steps[5].sql.starts_with("DELETE a.* FROM account a"));
    assert_eq!(steps[6].sql, format!("DROP TABLE IF EXISTS {tmp}"));
}

#[test]
fn temp_table_join_matches_null_keys() {
    let records = recs(vec![json!({"name": "a", "age": null})]);
    let common = DeleteRequest::by_where(records.clone());
    let temp = DeleteRequest::by_where(records).with_mode(DeleteMode::TempTable);

    let steps = delete(&account(), &common, &mysql()).unwrap();
    assert_eq!(steps[0].sql, "DELETE FROM account WHERE (name = ? AND age IS NULL)");

    let cases = [
        (Dialect::Mysql, "a.name <=> b.name AND a.age <=> b.age"),
        (
            Dialect::Postgres,
            "a.name IS NOT DISTINCT FROM b.name AND a.age IS NOT DISTINCT FROM b.age",
        ),
        (Dialect::Sqlite, "account.name IS b.name AND account.age IS b.age"),
    ];
    for (dialect, on) in cases {
        let steps = delete(&account(), &temp, &SqlConfig::for_dialect(dialect)).unwrap();
        assert!(steps[3].sql.contains(on), "{dialect}: {}", steps[3].sql);
        assert_eq!(steps[2].params, vec![json!("a"), Value::Null]);
    }
}

#[test]
fn delete_temp_table_logical() {
    let req = DeleteRequest::ids([json!(1)]).with_mode(DeleteMode::TempTable);

    let steps = delete(&post(), &req, &mysql()).unwrap();
    assert_eq!(steps.len(), 5);
    let tmp = temp_name(&steps[0]);
    assert_eq!(
        steps[3].sql,
        format!("UPDATE post a INNER JOIN {tmp} b ON a.id <=> b.id SET a.deleted = ?")
    );
    assert_eq!(steps[3].params, vec![json!(1)]);

    let steps = delete(&post(), &req, &SqlConfig::for_dialect(Dialect::Postgres)).unwrap();
    let tmp = temp_name(&steps[0]);
    assert_eq!(
        steps[3].sql,
        format!("UPDATE post a SET deleted = $1 FROM {tmp} b WHERE a.id IS NOT DISTINCT FROM b.id")
    );
}

#[test]
fn delete_validation() {
    assert!(delete(&account(), &DeleteRequest::ids(Vec::<Value>::new()), &mysql()).unwrap().is_empty());

    let err = delete(&member(), &DeleteRequest::ids([json!(1)]), &mysql()).unwrap_err();
    assert!(err.to_string().contains("exactly one primary key"));

    let err = delete(&account(), &DeleteRequest::by_where(recs(vec![json!({})])), &mysql())
        .unwrap_err();
    assert!(matches!(err, SqlError::Validation(_)));

    let err = delete(
        &account(),
        &DeleteRequest::by_where(recs(vec![json!({"bogus": 1})])),
        &mysql(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("Unknown field 'bogus'"));

    let req = DeleteRequest::by_where(recs(vec![json!({"id": 1}), json!({"name": "a"})]))
        .with_mode(DeleteMode::TempTable);
    assert!(delete(&account(), &req, &mysql()).is_err());
}

// ==================== Select ====================

#[test]
fn select_common_union() {
    let req = SelectRequest::ids([json!(1), json!(2)]).with_columns(["id", "name"]);
    let plan = select_by_keys(&account(), &req, &mysql()).unwrap();
    assert_eq!(plan.steps.len(), 1);
    assert_eq!(plan.query_step, 0);
    assert_eq!(
        plan.query().sql,
        "SELECT a.id, a.name FROM account a WHERE a.id = ? \
         UNION ALL SELECT a.id, a.name FROM account a WHERE a.id = ?"
    );
    assert_eq!(plan.query().params, vec![json!(1), json!(2)]);

    let plan = select_by_keys(&account(), &SelectRequest::ids([json!(1)]).count(), &mysql()).unwrap();
    assert_eq!(plan.query().sql, "SELECT COUNT(1) ct FROM account a WHERE a.id = ?");
}

#[test]
fn select_aliases_renamed_columns() {
    let e = EntityDescriptor::builder("user_info")
        .field(FieldDescriptor::new("id", SqlType::Int).primary_key())
        .field(FieldDescriptor::new("userName", SqlType::Varchar).column("user_name"))
        .build()
        .unwrap();
    let plan = select_by_keys(&e, &SelectRequest::ids([json!(1)]), &mysql()).unwrap();
    assert_eq!(
        plan.query().sql,
        "SELECT a.id, a.user_name AS userName FROM user_info a WHERE a.id = ?"
    );
}

#[test]
fn select_where_applies_skip_policy() {
    let req = SelectRequest::by_where(recs(vec![json!({"name": "a", "age": null})]))
        .with_columns(["id"]);
    let plan = select_by_keys(&account(), &req, &mysql()).unwrap();
    assert_eq!(plan.query().sql, "SELECT a.id FROM account a WHERE a.name = ?");

    let keep = mysql().with_skip(SkipPolicy::default().with_skip_null(false));
    let plan = select_by_keys(&account(), &req, &keep).unwrap();
    assert_eq!(
        plan.query().sql,
        "SELECT a.id FROM account a WHERE a.name = ? AND a.age IS NULL"
    );
}

#[test]
fn select_temp_table_join() {
    let req = SelectRequest::ids([json!(1), json!(2)])
        .with_mode(SelectMode::TempTable)
        .count();
    let plan = select_by_keys(&account(), &req, &mysql()).unwrap();
    assert_eq!(plan.steps.len(), 5);
    assert_eq!(plan.query_step, 3);
    let tmp = temp_name(&plan.steps[0]);
    assert_eq!(
        plan.query().sql,
        format!("SELECT COUNT(1) ct FROM account a INNER JOIN {tmp} b ON a.id <=> b.id")
    );
    assert_eq!(plan.steps[4].sql, format!("DROP TABLE IF EXISTS {tmp}"));
}

#[test]
fn select_temp_table_query_follows_fill_chunks() {
    let ids: Vec<Value> = (1..=3).map(|i| json!(i)).collect();
    let req = SelectRequest::ids(ids).with_mode(SelectMode::TempTable);
    let plan = select_by_keys(&account(), &req, &mysql().with_max_deal(1)).unwrap();
    assert_eq!(plan.steps.len(), 7);
    assert_eq!(plan.query_step, 5);
    assert!(plan.query().sql.starts_with("SELECT a.id, a.name, a.age, a.status FROM account a INNER JOIN"));
}

#[test]
fn select_validation() {
    let err = select_by_keys(&account(), &SelectRequest::ids(Vec::<Value>::new()), &mysql()).unwrap_err();
    assert!(matches!(err, SqlError::Validation(_)));

    let req = SelectRequest::by_where(recs(vec![json!({"name": ""})]));
    assert!(select_by_keys(&account(), &req, &mysql()).is_err());

    let req = SelectRequest::ids([json!(1)]).with_columns(["nope"]);
    assert!(select_by_keys(&account(), &req, &mysql()).is_err());

    let req = SelectRequest::raw("age > :age", json!({"age": 1})).with_columns(["id"]);
    let plan = select_by_keys(&account(), &req, &mysql()).unwrap();
    assert_eq!(plan.query().sql, "SELECT a.id FROM account a WHERE age > ?");
}

// ==================== DDL ====================

#[test]
fn create_table_mysql_inline_index() {
    let steps = create_table(&account(), Dialect::Mysql, false);
    assert_eq!(steps.len(), 1);
    assert_eq!(
        steps[0].sql,
        "CREATE TABLE IF NOT EXISTS account (id BIGINT NOT NULL, name VARCHAR(64), age INT, \
         status TINYINT DEFAULT 1, PRIMARY KEY (id), KEY idx_account_name (name))"
    );

    let steps = create_table(&account(), Dialect::Mysql, true);
    assert!(steps[0].sql.starts_with("CREATE TEMPORARY TABLE IF NOT EXISTS account ("));
    assert!(steps[0].sql.ends_with(" ENGINE=MEMORY"));
}

#[test]
fn create_table_separate_indexes() {
    let steps = create_table(&account(), Dialect::Postgres, false);
    assert_eq!(steps.len(), 2);
    assert_eq!(
        steps[0].sql,
        "CREATE TABLE IF NOT EXISTS account (id BIGINT NOT NULL, name VARCHAR(64), age INTEGER, \
         status SMALLINT DEFAULT 1, PRIMARY KEY (id))"
    );
    assert_eq!(
        steps[1].sql,
        "CREATE INDEX IF NOT EXISTS idx_account_name ON account (name)"
    );

    let steps = create_table(&keyless(), Dialect::Sqlite, false);
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].sql, "CREATE TABLE IF NOT EXISTS audit_log (msg TEXT)");
}
