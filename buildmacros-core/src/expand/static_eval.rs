//! Build-time evaluation of macro arguments.
//!
//! An argument is static when it is built only from literals: strings,
//! numbers, booleans, arrays, tuples, struct literals with named fields, and
//! the `json!` literals the engine itself emits for resolved config. Field
//! and index access into such values is allowed, so
//! `get_own_config::<Cfg>().debug` can drive a `macro_condition` once the
//! inner call has been resolved. Any reference to a runtime value is a
//! `NonStaticArgument`.

use proc_macro2::{Delimiter, TokenStream, TokenTree};
use quote::ToTokens;
use serde_json::{Map, Number, Value};
use syn::{BinOp, Expr, Lit, Member, UnOp};

use crate::error::{MacroError, MacroResult};

/// Evaluate `expr` for the macro `macro_name`.
pub fn evaluate(expr: &Expr, macro_name: &'static str) -> MacroResult<Value> {
    let non_static = |what: &str| MacroError::non_static(macro_name, what.to_string());

    match expr {
        Expr::Lit(lit) => eval_lit(&lit.lit).ok_or_else(|| non_static("unsupported literal")),
        Expr::Paren(p) => evaluate(&p.expr, macro_name),
        Expr::Group(g) => evaluate(&g.expr, macro_name),
        Expr::Reference(r) => evaluate(&r.expr, macro_name),
        Expr::Array(a) => a
            .elems
            .iter()
            .map(|e| evaluate(e, macro_name))
            .collect::<MacroResult<Vec<_>>>()
            .map(Value::Array),
        Expr::Tuple(t) => {
            if t.elems.is_empty() {
                return Ok(Value::Null);
            }
            t.elems
                .iter()
                .map(|e| evaluate(e, macro_name))
                .collect::<MacroResult<Vec<_>>>()
                .map(Value::Array)
        }
        Expr::Struct(s) => {
            if s.rest.is_some() {
                return Err(non_static("struct update syntax"));
            }
            let mut object = Map::new();
            for field in &s.fields {
                let Member::Named(name) = &field.member else {
                    return Err(non_static("unnamed struct field"));
                };
                object.insert(name.to_string(), evaluate(&field.expr, macro_name)?);
            }
            Ok(Value::Object(object))
        }
        Expr::Path(p) if p.qself.is_none() && p.path.is_ident("None") => Ok(Value::Null),
        Expr::Path(p) => Err(non_static(&format!(
            "`{}` is a runtime value",
            p.path.to_token_stream()
        ))),
        Expr::Unary(u) => {
            let inner = evaluate(&u.expr, macro_name)?;
            match (&u.op, inner) {
                (UnOp::Neg(_), Value::Number(n)) => negate(&n)
                    .map(Value::Number)
                    .ok_or_else(|| non_static("number out of range")),
                (UnOp::Not(_), Value::Bool(b)) => Ok(Value::Bool(!b)),
                _ => Err(non_static("unsupported unary operation")),
            }
        }
        Expr::Binary(b) => {
            let left = evaluate(&b.left, macro_name)?;
            let right = evaluate(&b.right, macro_name)?;
            match (&b.op, left, right) {
                (BinOp::And(_), Value::Bool(l), Value::Bool(r)) => Ok(Value::Bool(l && r)),
                (BinOp::Or(_), Value::Bool(l), Value::Bool(r)) => Ok(Value::Bool(l || r)),
                (BinOp::Eq(_), l, r) => Ok(Value::Bool(l == r)),
                (BinOp::Ne(_), l, r) => Ok(Value::Bool(l != r)),
                _ => Err(non_static("unsupported binary operation")),
            }
        }
        Expr::Field(f) => {
            let base = evaluate(&f.base, macro_name)?;
            let key = match &f.member {
                Member::Named(name) => name.to_string(),
                Member::Unnamed(index) => index.index.to_string(),
            };
            match base {
                Value::Object(mut object) => Ok(object.remove(&key).unwrap_or(Value::Null)),
                Value::Array(mut items) => {
                    let index: usize = key
                        .parse()
                        .map_err(|_| non_static("field access on an array"))?;
                    Ok(if index < items.len() {
                        items.swap_remove(index)
                    } else {
                        Value::Null
                    })
                }
                _ => Err(non_static("field access on a non-object value")),
            }
        }
        Expr::Index(i) => {
            let base = evaluate(&i.expr, macro_name)?;
            let index = evaluate(&i.index, macro_name)?;
            match (base, index) {
                (Value::Object(mut object), Value::String(key)) => {
                    Ok(object.remove(&key).unwrap_or(Value::Null))
                }
                (Value::Array(items), Value::Number(n)) => Ok(n
                    .as_u64()
                    .and_then(|i| items.get(i as usize).cloned())
                    .unwrap_or(Value::Null)),
                _ => Err(non_static("unsupported index expression")),
            }
        }
        Expr::Macro(m) => {
            let name = m
                .mac
                .path
                .segments
                .last()
                .map(|s| s.ident.to_string())
                .unwrap_or_default();
            match name.as_str() {
                "json" => json_from_tokens(m.mac.tokens.clone())
                    .ok_or_else(|| non_static("json! literal with runtime values")),
                "vec" => {
                    let elems = m
                        .mac
                        .parse_body_with(
                            syn::punctuated::Punctuated::<Expr, syn::Token![,]>::parse_terminated,
                        )
                        .map_err(|_| non_static("malformed vec! literal"))?;
                    elems
                        .iter()
                        .map(|e| evaluate(e, macro_name))
                        .collect::<MacroResult<Vec<_>>>()
                        .map(Value::Array)
                }
                _ => Err(non_static(&format!("macro `{name}!` is not a literal"))),
            }
        }
        Expr::Call(_) => Err(non_static("function calls are evaluated at runtime")),
        Expr::MethodCall(_) => Err(non_static("method calls are evaluated at runtime")),
        _ => Err(non_static("expression is not a literal")),
    }
}

/// Evaluate `expr` and require a string.
pub fn evaluate_string(expr: &Expr, macro_name: &'static str) -> MacroResult<String> {
    match evaluate(expr, macro_name)? {
        Value::String(s) => Ok(s),
        other => Err(MacroError::invalid_args(
            macro_name,
            format!("expected a string, found {}", short(&other)),
        )),
    }
}

/// Evaluate `expr` and require a boolean.
pub fn evaluate_bool(expr: &Expr, macro_name: &'static str) -> MacroResult<bool> {
    match evaluate(expr, macro_name)? {
        Value::Bool(b) => Ok(b),
        other => Err(MacroError::invalid_args(
            macro_name,
            format!("expected a boolean, found {}", short(&other)),
        )),
    }
}

fn short(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() > 40 {
        format!("{}...", text.chars().take(40).collect::<String>())
    } else {
        text
    }
}

fn eval_lit(lit: &Lit) -> Option<Value> {
    match lit {
        Lit::Str(s) => Some(Value::String(s.value())),
        Lit::Char(c) => Some(Value::String(c.value().to_string())),
        Lit::Bool(b) => Some(Value::Bool(b.value)),
        Lit::Int(i) => i
            .base10_parse::<u64>()
            .ok()
            .map(Number::from)
            .or_else(|| i.base10_parse::<i64>().ok().map(Number::from))
            .map(Value::Number),
        Lit::Float(f) => f
            .base10_parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        _ => None,
    }
}

fn negate(n: &Number) -> Option<Number> {
    if let Some(i) = n.as_i64() {
        return i.checked_neg().map(Number::from);
    }
    if let Some(u) = n.as_u64() {
        return i64::try_from(u).ok().and_then(|i| i.checked_neg()).map(Number::from);
    }
    n.as_f64().and_then(|f| Number::from_f64(-f))
}

/// Read back the body of a `json!(...)` literal.
///
/// Returns `None` if any part of it is not a JSON literal.
pub fn json_from_tokens(tokens: TokenStream) -> Option<Value> {
    let trees: Vec<TokenTree> = tokens.into_iter().collect();
    parse_json_value(&trees)
}

fn split_commas(trees: &[TokenTree]) -> Vec<&[TokenTree]> {
    trees
        .split(|tt| matches!(tt, TokenTree::Punct(p) if p.as_char() == ','))
        .filter(|part| !part.is_empty())
        .collect()
}

fn parse_json_value(trees: &[TokenTree]) -> Option<Value> {
    match trees {
        [TokenTree::Group(g)] => {
            let inner: Vec<TokenTree> = g.stream().into_iter().collect();
            match g.delimiter() {
                Delimiter::Brace => {
                    let mut object = Map::new();
                    for entry in split_commas(&inner) {
                        let (key, rest) = entry.split_first()?;
                        let (colon, value) = rest.split_first()?;
                        if !matches!(colon, TokenTree::Punct(p) if p.as_char() == ':') {
                            return None;
                        }
                        let Some(Value::String(key)) = parse_json_value(std::slice::from_ref(key))
                        else {
                            return None;
                        };
                        object.insert(key, parse_json_value(value)?);
                    }
                    Some(Value::Object(object))
                }
                Delimiter::Bracket => split_commas(&inner)
                    .into_iter()
                    .map(parse_json_value)
                    .collect::<Option<Vec<_>>>()
                    .map(Value::Array),
                Delimiter::None | Delimiter::Parenthesis => parse_json_value(&inner),
            }
        }
        [TokenTree::Ident(ident)] => match ident.to_string().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            "null" => Some(Value::Null),
            _ => None,
        },
        [TokenTree::Literal(lit)] => {
            let lit: Lit = syn::parse2(TokenTree::Literal(lit.clone()).into()).ok()?;
            eval_lit(&lit)
        }
        [TokenTree::Punct(p), TokenTree::Literal(lit)] if p.as_char() == '-' => {
            let lit: Lit = syn::parse2(TokenTree::Literal(lit.clone()).into()).ok()?;
            match eval_lit(&lit)? {
                Value::Number(n) => negate(&n).map(Value::Number),
                _ => None,
            }
        }
        _ => None,
    }
}
