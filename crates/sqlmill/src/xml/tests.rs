use super::*;
use crate::dialect::Dialect;
use crate::error::{SqlError, SqlResult};
use serde_json::{Value, json};
use std::collections::HashMap;

fn run_with(xml: &str, bag: &Value, dialect: Dialect) -> SqlResult<String> {
    let nodes = parse_fragment(xml)?;
    interpret(&nodes, bag, &[], &(), dialect)
}

fn run(xml: &str, bag: Value) -> SqlResult<String> {
    run_with(xml, &bag, Dialect::Mysql).map(|s| squash(&s))
}

fn squash(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ==================== parsing ====================

#[test]
fn parse_fragment_decodes_entities_and_cdata() {
    let nodes = parse_fragment("a &lt; 1 <![CDATA[AND b > 2]]><if test=\"x\">y</if>").unwrap();
    assert_eq!(
        nodes,
        vec![
            TagNode::text("a < 1 AND b > 2"),
            TagNode::element("if", &[("test", "x")], vec![TagNode::text("y")]),
        ]
    );
}

#[test]
fn parse_fragment_rejects_mismatched_tags() {
    assert!(parse_fragment("<if test=\"a\">x</where>").is_err());
    assert!(parse_fragment("<if test=\"a\">x").is_err());
}

#[test]
fn parse_mapper_blocks() {
    let doc = parse_mapper(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<mapper namespace="user">
  <resultMap id="rm"><id column="id" property="id"/></resultMap>
  <sql id="cols">id, name</sql>
  <select id="list">SELECT <include refid="cols"/> FROM user</select>
</mapper>"#,
    )
    .unwrap();
    assert_eq!(doc.namespace.as_deref(), Some("user"));
    let ids: Vec<_> = doc.blocks.iter().map(|b| (b.kind.as_str(), b.id.as_str())).collect();
    assert_eq!(ids, vec![("sql", "cols"), ("select", "list")]);
}

#[test]
fn parse_mapper_requires_id() {
    let err = parse_mapper("<mapper><select>SELECT 1</select></mapper>").unwrap_err();
    assert!(matches!(err, SqlError::MalformedTag { .. }));
    let err = parse_mapper("<mapper><procedure id=\"p\"/></mapper>").unwrap_err();
    assert!(matches!(err, SqlError::MalformedTag { .. }));
}

// ==================== substitution ====================

#[test]
fn escaped_and_raw_markers() {
    let s = run(
        "SELECT * FROM ${table} WHERE name = #{name} AND age = #{age} AND x = #{none}",
        json!({"table": "user", "name": "O'Brien", "age": 18, "none": null}),
    )
    .unwrap();
    assert_eq!(
        s,
        "SELECT * FROM user WHERE name = 'O''Brien' AND age = '18' AND x = NULL"
    );
}

#[test]
fn composite_values_are_json_quoted() {
    let s = run("VALUES (#{doc})", json!({"doc": {"a": 1}})).unwrap();
    assert_eq!(s, "VALUES ('{\"a\":1}')");
}

#[test]
fn substituted_values_are_not_rescanned() {
    let s = run("x = #{a}", json!({"a": "${b}", "b": "boom"})).unwrap();
    assert_eq!(s, "x = '${b}'");
}

#[test]
fn unresolved_markers_fail() {
    let err = run("x = #{missing} AND y = ${gone}", json!({})).unwrap_err();
    match err {
        SqlError::UnconvertedParameter(markers) => {
            assert_eq!(markers, vec!["#{missing}".to_string(), "${gone}".to_string()])
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn mybatis_type_hints_are_ignored() {
    let s = run("a = #{name,jdbcType=VARCHAR}", json!({"name": "x"})).unwrap();
    assert_eq!(s, "a = 'x'");
}

#[test]
fn postgres_positional_dollars_pass_through() {
    let s = run("a = $1", json!({})).unwrap();
    assert_eq!(s, "a = $1");
}

#[test]
fn mysql_escaping_of_backslash() {
    let s = run_with("#{p}", &json!({"p": "a\\b"}), Dialect::Mysql).unwrap();
    assert_eq!(s, "'a\\\\b'");
    let s = run_with("#{p}", &json!({"p": "a\\b"}), Dialect::Postgres).unwrap();
    assert_eq!(s, "'a\\b'");
}

// ==================== if / choose ====================

#[test]
fn if_renders_only_when_true() {
    let xml = r#"SELECT * FROM t <if test="status != null and status != ''">WHERE status = #{status}</if>"#;
    assert_eq!(
        run(xml, json!({"status": "A"})).unwrap(),
        "SELECT * FROM t WHERE status = 'A'"
    );
    assert_eq!(run(xml, json!({})).unwrap(), "SELECT * FROM t");
}

#[test]
fn if_with_broken_expression_is_false() {
    assert_eq!(run(r#"a<if test="x ===== 1">b</if>"#, json!({"x": 1})).unwrap(), "a");
}

#[test]
fn if_without_test_is_malformed() {
    let err = run("<if>b</if>", json!({})).unwrap_err();
    assert!(matches!(err, SqlError::MalformedTag { ref tag, .. } if tag == "if"));
    assert!(err.is_authoring_defect());
}

#[test]
fn unknown_tag_is_malformed() {
    let err = run("<loop>b</loop>", json!({})).unwrap_err();
    assert!(matches!(err, SqlError::MalformedTag { .. }));
}

#[test]
fn choose_first_true_wins() {
    let xml = r#"<choose>
        <when test="kind == 1">ONE</when>
        <when test="kind >= 1">MANY</when>
        <otherwise>NONE</otherwise>
    </choose>"#;
    assert_eq!(run(xml, json!({"kind": 1})).unwrap(), "ONE");
    assert_eq!(run(xml, json!({"kind": 5})).unwrap(), "MANY");
    assert_eq!(run(xml, json!({})).unwrap(), "NONE");
}

#[test]
fn choose_without_match_renders_nothing() {
    let xml = r#"<choose><when test="false">X</when></choose>"#;
    assert_eq!(run(xml, json!({})).unwrap(), "");
}

// ==================== where / trim / set ====================

#[test]
fn where_strips_leading_connective() {
    let xml = r#"SELECT * FROM t <where>
        <if test="a != null">AND a = #{a}</if>
        <if test="b != null">OR b = #{b}</if>
    </where>"#;
    assert_eq!(run(xml, json!({"a": 1})).unwrap(), "SELECT * FROM t WHERE a = '1'");
    assert_eq!(run(xml, json!({"b": 2})).unwrap(), "SELECT * FROM t WHERE b = '2'");
    assert_eq!(run(xml, json!({})).unwrap(), "SELECT * FROM t");
}

#[test]
fn where_keeps_columns_starting_with_connective() {
    let xml = "<where>order_no = 1 AND</where>";
    assert_eq!(run(xml, json!({})).unwrap(), "WHERE order_no = 1");
}

#[test]
fn trim_with_overrides() {
    let xml = r#"<trim prefix="(" suffix=")" suffixOverrides=",">a, b, </trim>"#;
    assert_eq!(run(xml, json!({})).unwrap(), "( a, b )");
    let xml = r#"<trim prefix="WHERE" prefixOverrides="AND |OR ">AND x = 1</trim>"#;
    assert_eq!(run(xml, json!({})).unwrap(), "WHERE x = 1");
}

#[test]
fn trim_fixes_comma_before_where() {
    let xml = r#"<trim prefix="SET">a = 1, WHERE id = 2</trim>"#;
    assert_eq!(run(xml, json!({})).unwrap(), "SET a = 1 WHERE id = 2");
}

#[test]
fn set_strips_commas() {
    let xml = r#"UPDATE t <set>
        <if test="a != null">a = #{a},</if>
        <if test="b != null">b = #{b},</if>
    </set> WHERE id = 1"#;
    assert_eq!(
        run(xml, json!({"a": 1, "b": 2})).unwrap(),
        "UPDATE t SET a = '1', b = '2' WHERE id = 1"
    );
    assert_eq!(run(xml, json!({"b": 2})).unwrap(), "UPDATE t SET b = '2' WHERE id = 1");
}

// ==================== foreach / bind ====================

#[test]
fn foreach_joins_items() {
    let xml = r#"id IN <foreach collection="ids" item="id" open="(" close=")" separator=",">#{id}</foreach>"#;
    assert_eq!(run(xml, json!({"ids": [1, 2]})).unwrap(), "id IN ('1','2')");
}

#[test]
fn foreach_empty_is_open_close() {
    let xml = r#"<foreach collection="ids" item="id" open="(" close=")" separator=",">#{id}</foreach>"#;
    assert_eq!(run(xml, json!({"ids": []})).unwrap(), "()");
}

#[test]
fn foreach_over_objects_with_index() {
    let xml = r#"<foreach collection="rows" item="r" index="i" separator=" UNION ALL ">SELECT ${i} n, #{r.name} v</foreach>"#;
    assert_eq!(
        run(xml, json!({"rows": [{"name": "a"}, {"name": "b"}]})).unwrap(),
        "SELECT 0 n, 'a' v UNION ALL SELECT 1 n, 'b' v"
    );
}

#[test]
fn foreach_item_does_not_leak() {
    let xml = r#"<foreach collection="ids" item="id">#{id}</foreach> #{id}"#;
    assert_eq!(run(xml, json!({"ids": [1], "id": 9})).unwrap(), "'1' '9'");
}

#[test]
fn foreach_missing_collection() {
    let err = run(r#"<foreach item="x">a</foreach>"#, json!({})).unwrap_err();
    assert!(matches!(err, SqlError::MalformedTag { .. }));
    let err = run(r#"<foreach collection="nope" item="x">a</foreach>"#, json!({})).unwrap_err();
    assert!(matches!(err, SqlError::UnconvertedParameter(_)));
}

#[test]
fn bind_adds_key_for_rest_of_scope() {
    let xml = r#"<bind name="pattern" value="'%' + name + '%'"/>name LIKE #{pattern}"#;
    assert_eq!(run(xml, json!({"name": "ab"})).unwrap(), "name LIKE '%ab%'");
}

#[test]
fn bind_inside_foreach_is_iteration_local() {
    let xml = r#"<foreach collection="xs" item="x"><bind name="y" value="x * 2"/>${y}</foreach> <if test="y == null">none</if>"#;
    assert_eq!(run(xml, json!({"xs": [1, 2]})).unwrap(), "24 none");
}

// ==================== include ====================

fn fragments() -> HashMap<String, Vec<TagNode>> {
    let mut map = HashMap::new();
    map.insert(
        "base.cols".to_string(),
        parse_fragment("id, ${extra}").unwrap(),
    );
    map.insert(
        "user.filter".to_string(),
        parse_fragment(r#"<where><if test="name != null">name = #{name}</if></where>"#).unwrap(),
    );
    map
}

#[test]
fn include_walks_namespace_chain_with_properties() {
    let nodes = parse_fragment(
        r#"SELECT <include refid="cols"><property name="extra" value="name"/></include> FROM user <include refid="filter"/>"#,
    )
    .unwrap();
    let namespaces = vec!["user".to_string(), "base".to_string()];
    let s = interpret(&nodes, &json!({"name": "x"}), &namespaces, &fragments(), Dialect::Mysql).unwrap();
    assert_eq!(squash(&s), "SELECT id, name FROM user WHERE name = 'x'");
}

#[test]
fn include_refid_is_substituted() {
    let nodes = parse_fragment(r#"<include refid="${which}"/>"#).unwrap();
    let s = interpret(
        &nodes,
        &json!({"which": "filter", "name": "y"}),
        &["user".to_string()],
        &fragments(),
        Dialect::Mysql,
    )
    .unwrap();
    assert_eq!(squash(&s), "WHERE name = 'y'");
}

#[test]
fn include_unresolved_fails() {
    let nodes = parse_fragment(r#"<include refid="nope"/>"#).unwrap();
    let err = interpret(&nodes, &json!({}), &["user".to_string()], &fragments(), Dialect::Mysql)
        .unwrap_err();
    assert!(matches!(err, SqlError::IncludeResolution { ref refid, .. } if refid == "nope"));
}

#[test]
fn include_recursion_is_bounded() {
    let mut map = HashMap::new();
    map.insert("a.loop".to_string(), parse_fragment(r#"x<include refid="loop"/>"#).unwrap());
    let nodes = parse_fragment(r#"<include refid="loop"/>"#).unwrap();
    let err = interpret(&nodes, &json!({}), &["a".to_string()], &map, Dialect::Mysql).unwrap_err();
    assert!(matches!(err, SqlError::MalformedTag { .. }));
}

#[test]
fn interpreter_never_mutates_bag() {
    let bag = json!({"xs": [1]});
    let nodes = parse_fragment(r#"<bind name="z" value="1"/><foreach collection="xs" item="x">${x}</foreach>"#).unwrap();
    interpret(&nodes, &bag, &[], &(), Dialect::Sqlite).unwrap();
    assert_eq!(bag, json!({"xs": [1]}));
}

// ==================== text expansion ====================

/// Replaces every `{{x}}` with the view's `x`.
struct Braces;

impl TextExpander for Braces {
    fn expand(&self, text: &str, view: &Value) -> SqlResult<String> {
        let x = view.get("x").and_then(Value::as_str).unwrap_or_default();
        Ok(text.replace("{{x}}", x))
    }
}

#[test]
fn text_nodes_expand_before_substitution() {
    let nodes = parse_fragment(
        r#"<bind name="x" value="'col'"/>SELECT {{x}} FROM t WHERE v = #{v}"#,
    )
    .unwrap();
    let bag = json!({"v": "{{x}}"});
    let out = interpret_with(&nodes, &bag, &[], &(), Dialect::Mysql, &Braces).unwrap();
    assert_eq!(squash(&out), "SELECT col FROM t WHERE v = '{{x}}'");

    let out = interpret(&nodes, &bag, &[], &(), Dialect::Mysql).unwrap();
    assert_eq!(squash(&out), "SELECT {{x}} FROM t WHERE v = '{{x}}'");
}
