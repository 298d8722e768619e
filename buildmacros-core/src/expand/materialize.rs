//! Turning resolved values back into syntax.
//!
//! Scalars become plain literals. `null`, arrays and objects become
//! `::serde_json::json!(...)` literals, which [`super::static_eval`] can read
//! back when they feed another macro.

use proc_macro2::{Literal, Span, TokenStream};
use quote::quote;
use serde_json::{Number, Value};
use syn::{Expr, ExprLit, ExprMacro, Lit, LitBool, LitStr, Macro, MacroDelimiter};

/// Build the syntax node for `value`, spanned at `span`.
pub fn materialize(value: &Value, span: Span) -> Expr {
    match value {
        Value::Bool(b) => lit(Lit::Bool(LitBool::new(*b, span))),
        Value::String(s) => lit(Lit::Str(LitStr::new(s, span))),
        Value::Number(n) => number_expr(n, span),
        Value::Null | Value::Array(_) | Value::Object(_) => Expr::Macro(ExprMacro {
            attrs: Vec::new(),
            mac: Macro {
                path: syn::parse_quote_spanned!(span=> ::serde_json::json),
                bang_token: syn::token::Not(span),
                delimiter: MacroDelimiter::Paren(syn::token::Paren(span)),
                tokens: json_tokens(value, span),
            },
        }),
    }
}

fn lit(lit: Lit) -> Expr {
    Expr::Lit(ExprLit {
        attrs: Vec::new(),
        lit,
    })
}

fn number_expr(n: &Number, span: Span) -> Expr {
    let tokens = number_tokens(n, span);
    syn::parse2(tokens.clone()).unwrap_or(Expr::Verbatim(tokens))
}

fn number_tokens(n: &Number, span: Span) -> TokenStream {
    let mut literal = if let Some(u) = n.as_u64() {
        Literal::u64_unsuffixed(u)
    } else if let Some(i) = n.as_i64() {
        let mut magnitude = Literal::u64_unsuffixed(i.unsigned_abs());
        magnitude.set_span(span);
        return quote!(- #magnitude);
    } else {
        let f = n.as_f64().unwrap_or_default();
        if f.is_sign_negative() {
            let mut magnitude = Literal::f64_unsuffixed(-f);
            magnitude.set_span(span);
            return quote!(- #magnitude);
        }
        Literal::f64_unsuffixed(f)
    };
    literal.set_span(span);
    quote!(#literal)
}

/// Tokens of a `json!` body for `value`.
pub fn json_tokens(value: &Value, span: Span) -> TokenStream {
    match value {
        Value::Null => quote!(null),
        Value::Bool(true) => quote!(true),
        Value::Bool(false) => quote!(false),
        Value::Number(n) => number_tokens(n, span),
        Value::String(s) => {
            let s = LitStr::new(s, span);
            quote!(#s)
        }
        Value::Array(items) => {
            let items = items.iter().map(|v| json_tokens(v, span));
            quote!([ #(#items),* ])
        }
        Value::Object(object) => {
            let entries = object.iter().map(|(k, v)| {
                let key = LitStr::new(k, span);
                let value = json_tokens(v, span);
                quote!(#key : #value)
            });
            quote!({ #(#entries),* })
        }
    }
}
