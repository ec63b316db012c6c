//! Condition expression language.
//!
//! Expressions are compiled by a raw `rhai` engine: no packages, no
//! statements, no function definitions. Literals, field paths rooted at
//! `data`, `input` or `trigger`, comparisons, `&&`, `||`, `!` and
//! parentheses are all that compile. JavaScript-style `===`/`!==` and
//! single-quoted strings are accepted and rewritten before compilation.

use flowcore::{NodeContext, NodeError, NodeInput};
use rhai::{Dynamic, Engine, EvalAltResult, Scope, AST};
use serde_json::{json, Value};
use std::cmp::Ordering;

/// Roots an expression or prompt template may refer to.
pub const ROOTS: [&str; 3] = ["data", "input", "trigger"];

const MAX_EXPR_DEPTH: usize = 32;
const MAX_OPERATIONS: u64 = 10_000;
const MAX_STRING_SIZE: usize = 64 * 1024;

/// Tokens and keywords that never compile.
const DISABLED_SYMBOLS: [&str; 42] = [
    "+", "*", "/", "%", "**", "<<", ">>", "&", "|", "^", "=", "+=", "-=", "*=", "/=", "%=",
    "**=", "<<=", ">>=", "&=", "|=", "^=", "..", "..=", "?.", "??", "if", "else", "switch",
    "while", "loop", "for", "do", "let", "const", "fn", "return", "throw", "try", "import",
    "print", "eval",
];

/// Build the object the roots resolve against.
///
/// `data` is the single upstream output, or the keyed input map when
/// several predecessors delivered.
pub fn scope(input: &NodeInput, ctx: &NodeContext) -> Value {
    json!({
        "data": input.primary(),
        "input": input.to_map(),
        "trigger": ctx.trigger_payload.as_ref(),
    })
}

/// A compiled expression.
#[derive(Debug, Clone)]
pub struct Expr {
    ast: AST,
}

impl Expr {
    pub fn parse(source: &str) -> Result<Self, NodeError> {
        if source.trim().is_empty() {
            return Err(NodeError::Evaluation("empty expression".to_string()));
        }
        let vars = variables(&Value::Null)?;
        let ast = engine()
            .compile_expression_with_scope(&vars, &normalize(source))
            .map_err(|e| NodeError::Evaluation(format!("invalid expression '{}': {}", source, e)))?;
        Ok(Self { ast })
    }

    pub fn evaluate(&self, scope: &Value) -> Result<Value, NodeError> {
        let mut vars = variables(scope)?;
        let result: Dynamic = engine()
            .eval_ast_with_scope(&mut vars, &self.ast)
            .map_err(|e| NodeError::Evaluation(e.to_string()))?;
        Ok(to_json(&result))
    }
}

fn engine() -> Engine {
    let mut engine = Engine::new_raw();
    engine.set_strict_variables(true);
    engine.set_fast_operators(false);
    engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_EXPR_DEPTH);
    engine.set_max_operations(MAX_OPERATIONS);
    engine.set_max_string_size(MAX_STRING_SIZE);
    for symbol in DISABLED_SYMBOLS {
        engine.disable_symbol(symbol);
    }

    engine.register_fn("==", |a: Dynamic, b: Dynamic| equals(&to_json(&a), &to_json(&b)));
    engine.register_fn("!=", |a: Dynamic, b: Dynamic| !equals(&to_json(&a), &to_json(&b)));
    engine.register_fn("<", |a: Dynamic, b: Dynamic| order(&a, &b).map(|o| o == Ordering::Less));
    engine.register_fn("<=", |a: Dynamic, b: Dynamic| {
        order(&a, &b).map(|o| o != Ordering::Greater)
    });
    engine.register_fn(">", |a: Dynamic, b: Dynamic| {
        order(&a, &b).map(|o| o == Ordering::Greater)
    });
    engine.register_fn(">=", |a: Dynamic, b: Dynamic| order(&a, &b).map(|o| o != Ordering::Less));
    engine.register_fn("!", |a: Dynamic| !truthy(&to_json(&a)));
    engine
}

/// Scope holding the three roots plus `null`/`undefined`.
fn variables(scope: &Value) -> Result<Scope<'static>, NodeError> {
    let mut vars = Scope::new();
    for root in ROOTS {
        let value = scope.get(root).unwrap_or(&Value::Null);
        let dynamic = rhai::serde::to_dynamic(value)
            .map_err(|e| NodeError::Evaluation(format!("cannot expose '{}': {}", root, e)))?;
        vars.push_constant_dynamic(root, dynamic);
    }
    vars.push_constant("null", ());
    vars.push_constant("undefined", ());
    Ok(vars)
}

fn to_json(value: &Dynamic) -> Value {
    rhai::serde::from_dynamic(value).unwrap_or(Value::Null)
}

/// Rewrite `===`/`!==` to `==`/`!=` and single-quoted strings to
/// double-quoted ones. String contents are left alone.
fn normalize(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' => {
                out.push('"');
                i += 1;
                let mut closed = false;
                while i < chars.len() {
                    let ch = chars[i];
                    i += 1;
                    match ch {
                        '\\' => {
                            out.push('\\');
                            if let Some(&escaped) = chars.get(i) {
                                out.push(escaped);
                                i += 1;
                            }
                        }
                        ch if ch == c => {
                            closed = true;
                            break;
                        }
                        '"' => out.push_str("\\\""),
                        ch => out.push(ch),
                    }
                }
                if closed {
                    out.push('"');
                }
            }
            '=' | '!' if chars.get(i + 1) == Some(&'=') && chars.get(i + 2) == Some(&'=') => {
                out.push(c);
                out.push('=');
                i += 3;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// `null`, `false`, `0`, `NaN` and `""` are falsy; everything else is truthy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Structural equality; numbers compare by value so `1 == 1.0`.
fn equals(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => lhs == rhs,
    }
}

fn order(lhs: &Dynamic, rhs: &Dynamic) -> Result<Ordering, Box<EvalAltResult>> {
    let (lhs, rhs) = (to_json(lhs), to_json(rhs));
    match (&lhs, &rhs) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            a.partial_cmp(&b).ok_or_else(|| "cannot order NaN".into())
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(format!(
            "cannot order {} against {}",
            type_name(&lhs),
            type_name(&rhs)
        )
        .into()),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str, scope: &Value) -> Result<Value, NodeError> {
        Expr::parse(source)?.evaluate(scope)
    }

    fn scope() -> Value {
        json!({
            "data": { "sentiment": "positive", "score": 0.92, "tags": ["a", "b"], "count": 3 },
            "input": { "ai-1": { "sentiment": "positive" } },
            "trigger": { "user": { "name": "Ada" }, "urgent": false },
        })
    }

    #[test]
    fn strict_and_loose_equality_on_strings() {
        let scope = scope();
        assert_eq!(eval("data.sentiment === 'positive'", &scope).unwrap(), json!(true));
        assert_eq!(eval("data.sentiment == \"negative\"", &scope).unwrap(), json!(false));
        assert_eq!(eval("data.sentiment !== 'negative'", &scope).unwrap(), json!(true));
    }

    #[test]
    fn numeric_comparisons() {
        let scope = scope();
        assert_eq!(eval("data.score >= 0.9", &scope).unwrap(), json!(true));
        assert_eq!(eval("data.count < 3", &scope).unwrap(), json!(false));
        assert_eq!(eval("data.count == 3.0", &scope).unwrap(), json!(true));
        assert_eq!(eval("data.count > -1", &scope).unwrap(), json!(true));
    }

    #[test]
    fn boolean_operators_and_grouping() {
        let scope = scope();
        assert_eq!(
            eval("!trigger.urgent && (data.count > 5 || data.tags[1] == 'b')", &scope).unwrap(),
            json!(true)
        );
        assert_eq!(eval("!(data.count == 3)", &scope).unwrap(), json!(false));
    }

    #[test]
    fn bracket_keys_reach_node_ids_with_dashes() {
        let scope = scope();
        assert_eq!(
            eval("input['ai-1'].sentiment === 'positive'", &scope).unwrap(),
            json!(true)
        );
        assert_eq!(eval("trigger.user.name", &scope).unwrap(), json!("Ada"));
    }

    #[test]
    fn missing_fields_are_null() {
        let scope = scope();
        assert_eq!(eval("data.nope == null", &scope).unwrap(), json!(true));
        assert_eq!(eval("data.nope", &scope).unwrap(), Value::Null);
    }

    #[test]
    fn unknown_root_is_an_error() {
        assert!(matches!(
            Expr::parse("window.alert"),
            Err(NodeError::Evaluation(_))
        ));
    }

    #[test]
    fn ordering_mixed_types_is_an_error() {
        assert!(matches!(
            eval("data.sentiment > 3", &scope()),
            Err(NodeError::Evaluation(_))
        ));
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        for source in [
            "",
            "data.sentiment ===",
            "(data.count > 1",
            "data.tags[",
            "'unterminated",
            "data.count = 3",
            "data.count 3",
            "data.count + 1 > 3",
            "let x = 1",
            "if data.count > 1 { true } else { false }",
        ] {
            assert!(
                matches!(Expr::parse(source), Err(NodeError::Evaluation(_))),
                "expected parse failure for {:?}",
                source
            );
        }
    }

    #[test]
    fn calls_fail_at_evaluation() {
        assert!(matches!(
            eval("data.exit()", &scope()),
            Err(NodeError::Evaluation(_))
        ));
    }

    #[test]
    fn deeply_nested_expression_is_rejected_without_overflow() {
        let source = format!("{}true{}", "(".repeat(100_000), ")".repeat(100_000));
        assert!(matches!(
            Expr::parse(&source),
            Err(NodeError::Evaluation(_))
        ));
    }

    #[test]
    fn truthiness_follows_javascript() {
        for falsy in [json!(null), json!(false), json!(0), json!(""), json!(0.0)] {
            assert!(!truthy(&falsy), "{} should be falsy", falsy);
        }
        for t in [json!(true), json!(1), json!("x"), json!([]), json!({})] {
            assert!(truthy(&t), "{} should be truthy", t);
        }
    }

    #[test]
    fn quotes_inside_strings_survive_normalization() {
        assert_eq!(normalize("a === 'it\"s'"), "a == \"it\\\"s\"");
        assert_eq!(normalize("a !== \"x===y\""), "a != \"x===y\"");
    }
}
