//! The rewriting pass over one file.
//!
//! Walks the tree depth-first with [`VisitMut`]. Arguments are expanded
//! before the call that holds them, so `macro_condition(dependency_satisfies(..))`
//! sees a boolean literal by the time the condition is evaluated. The first
//! failure is recorded and stops all further descent.
//!
//! Bodies of other macro invocations (`println!`, `assert!`, ..) are parsed
//! as comma-separated expressions and expanded like any other code. A body
//! that does not parse that way must not mention a macro at all.

use std::collections::HashSet;
use std::path::Path;

use proc_macro2::{Span, TokenStream, TokenTree};
use quote::ToTokens;
use serde_json::{json, Value};
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::visit::{self, Visit};
use syn::visit_mut::{self, VisitMut};
use syn::{
    Block, Expr, ExprBlock, ExprIf, ExprPath, ExprTuple, FnArg, ImplItemFn, Item,
    ItemFn, ItemMod, Macro, Pat, PatIdent, PathSegment, Signature, Stmt, Token, TraitItemFn,
};
use tracing::{debug, trace};

use super::materialize::materialize;
use super::specifier::{module_path, ImportSite};
use super::static_eval::{evaluate, evaluate_bool, evaluate_string};
use super::{ExpansionContext, ExpansionStats};
use crate::classify::{Classifier, MacroKind, ModulePath};
use crate::diagnostics::Diagnostic;
use crate::error::{MacroError, MacroResult};
use crate::registry::describe;

/// Outcome of folding an `if macro_condition(..)`.
enum Fold {
    Keep(Expr),
    Remove,
}

pub(super) struct Expander<'a> {
    ctx: ExpansionContext<'a>,
    classifier: Classifier<'a>,
    file: &'a Path,
    module: ModulePath,
    /// Module owning the file's directory, for relative imports.
    directory: ModulePath,
    /// Names bound by enclosing fn params, closures, patterns and local fns.
    scopes: Vec<HashSet<String>>,
    stats: ExpansionStats,
    error: Option<Diagnostic>,
}

impl<'a> Expander<'a> {
    pub(super) fn new(
        ctx: ExpansionContext<'a>,
        classifier: Classifier<'a>,
        file: &'a Path,
        directory: ModulePath,
    ) -> Self {
        let module = classifier.symbols().root().to_vec();
        Self {
            ctx,
            classifier,
            file,
            module,
            directory,
            scopes: Vec::new(),
            stats: ExpansionStats::default(),
            error: None,
        }
    }

    pub(super) fn finish(self) -> Result<ExpansionStats, Diagnostic> {
        match self.error {
            Some(diagnostic) => Err(diagnostic),
            None => Ok(self.stats),
        }
    }

    fn fail(&mut self, span: Span, error: MacroError) {
        if self.error.is_none() {
            self.error = Some(Diagnostic::at(self.file, span, error));
        }
    }

    fn failed(&self) -> bool {
        self.error.is_some()
    }

    fn is_shadowed(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope.contains(name))
    }

    fn bind(&mut self, names: HashSet<String>) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.extend(names);
        }
    }

    /// Macro named by the callee of `expr`, when `expr` is a call.
    fn call_kind(&self, expr: &Expr) -> Option<MacroKind> {
        let Expr::Call(call) = expr else {
            return None;
        };
        let Expr::Path(ExprPath {
            qself: None, path, ..
        }) = &*call.func
        else {
            return None;
        };
        self.path_kind(path)
    }

    fn path_kind(&self, path: &syn::Path) -> Option<MacroKind> {
        if path.leading_colon.is_none() && path.segments.len() == 1 {
            let name = path.segments[0].ident.to_string();
            if self.is_shadowed(&name) {
                return None;
            }
        }
        self.classifier.classify(path, &self.module)
    }

    /// First macro named anywhere in a token stream, with its span.
    fn macro_in_tokens(&self, tokens: TokenStream) -> Option<(MacroKind, Span)> {
        let trees: Vec<TokenTree> = tokens.into_iter().collect();
        let mut i = 0;
        while i < trees.len() {
            match &trees[i] {
                TokenTree::Group(group) => {
                    if let Some(found) = self.macro_in_tokens(group.stream()) {
                        return Some(found);
                    }
                }
                // `$name` is a macro_rules metavariable
                TokenTree::Ident(_) if i > 0 && is_punct(&trees[i - 1], '$') => {}
                TokenTree::Ident(ident) => {
                    let (path, next) = path_at(&trees, i);
                    if let Some(kind) = self.path_kind(&path) {
                        return Some((kind, ident.span()));
                    }
                    i = next;
                    continue;
                }
                _ => {}
            }
            i += 1;
        }
        None
    }

    /// `if macro_condition(..) { .. }`, possibly with parens around the condition.
    fn is_conditional(&self, expr: &Expr) -> bool {
        match expr {
            Expr::If(expr_if) => {
                self.call_kind(unparen(&expr_if.cond)) == Some(MacroKind::MacroCondition)
            }
            _ => false,
        }
    }

    /// Fold a conditional in place, following `else if macro_condition(..)`
    /// links until a branch is kept. Returns true when the whole expression
    /// must go away.
    fn fold_conditional(&mut self, expr: &mut Expr) -> bool {
        loop {
            let taken = std::mem::replace(expr, unit());
            let Expr::If(expr_if) = taken else {
                *expr = taken;
                return false;
            };
            match self.fold_if(expr_if) {
                Some(Fold::Keep(kept)) => {
                    *expr = kept;
                    if !self.is_conditional(expr) {
                        self.visit_expr_mut(expr);
                        return false;
                    }
                }
                Some(Fold::Remove) => return true,
                None => return false,
            }
        }
    }

    fn fold_if(&mut self, expr_if: ExprIf) -> Option<Fold> {
        let name = MacroKind::MacroCondition.export_name();
        let span = expr_if.cond.span();
        let Expr::Call(mut call) = into_unparen(*expr_if.cond) else {
            return None;
        };

        if call.args.len() != 1 {
            let message = format!("expected 1 argument, found {}", call.args.len());
            self.fail(span, MacroError::invalid_args(name, message));
            return None;
        }
        for arg in call.args.iter_mut() {
            self.visit_expr_mut(arg);
        }
        if self.failed() {
            return None;
        }

        let predicate = match evaluate_bool(&call.args[0], name) {
            Ok(predicate) => predicate,
            Err(error) => {
                self.fail(span, error);
                return None;
            }
        };
        self.stats.record(MacroKind::MacroCondition);
        self.stats.branches_eliminated += 1;
        trace!(
            file = %self.file.display(),
            line = span.start().line,
            predicate,
            "conditional folded"
        );

        Some(if predicate {
            Fold::Keep(Expr::Block(ExprBlock {
                attrs: Vec::new(),
                label: None,
                block: expr_if.then_branch,
            }))
        } else {
            match expr_if.else_branch {
                Some((_, else_expr)) => Fold::Keep(*else_expr),
                None => Fold::Remove,
            }
        })
    }

    fn expand_call(&mut self, expr: &mut Expr, kind: MacroKind) {
        let span = expr.span();
        if kind == MacroKind::MacroCondition {
            self.fail(span, MacroError::MisplacedMacroCondition);
            return;
        }
        let Expr::Call(call) = expr else {
            return;
        };

        for arg in call.args.iter_mut() {
            self.visit_expr_mut(arg);
        }
        if self.failed() {
            return;
        }

        match self.resolve(kind, &call.args, span) {
            Ok(replacement) => {
                self.stats.record(kind);
                debug!(
                    file = %self.file.display(),
                    line = span.start().line,
                    macro_name = kind.export_name(),
                    "macro resolved"
                );
                *expr = replacement;
            }
            Err(error) => self.fail(span, error),
        }
    }

    fn resolve(
        &self,
        kind: MacroKind,
        args: &Punctuated<Expr, Token![,]>,
        span: Span,
    ) -> MacroResult<Expr> {
        let name = kind.export_name();
        let args: Vec<&Expr> = args.iter().collect();
        let ctx = self.ctx;

        match kind {
            MacroKind::DependencySatisfies => {
                let [package, range] = arity::<2>(name, &args)?;
                let package = evaluate_string(package, name)?;
                let range = evaluate_string(range, name)?;
                let satisfied = ctx.resolver.satisfies(ctx.package, &package, &range)?;
                Ok(materialize(&Value::Bool(satisfied), span))
            }
            MacroKind::MacroCondition => Err(MacroError::MisplacedMacroCondition),
            MacroKind::Each => {
                let [array] = arity::<1>(name, &args)?;
                match evaluate(array, name) {
                    Ok(Value::Array(_)) | Err(MacroError::NonStaticArgument { .. }) => {
                        Ok(array.clone())
                    }
                    Ok(other) => Err(MacroError::NotAnArray {
                        found: describe(&other).to_string(),
                    }),
                    Err(error) => Err(error),
                }
            }
            MacroKind::ImportSync => {
                let [specifier] = arity::<1>(name, &args)?;
                let specifier = evaluate_string(specifier, name)?;
                let site = ImportSite {
                    module: &self.module,
                    directory: &self.directory,
                };
                let path = module_path(&specifier, ctx.package, ctx.resolver, site, span)?;
                Ok(Expr::Path(ExprPath {
                    attrs: Vec::new(),
                    qself: None,
                    path,
                }))
            }
            MacroKind::GetConfig => {
                let [package] = arity::<1>(name, &args)?;
                let package = evaluate_string(package, name)?;
                let config = self.config_of(&package)?;
                Ok(materialize(&config, span))
            }
            MacroKind::GetOwnConfig => {
                let [] = arity::<0>(name, &args)?;
                let config = ctx.registry.get_own_config(ctx.package)?;
                Ok(materialize(&config, span))
            }
            MacroKind::FailBuild => {
                let Some((message, rest)) = args.split_first() else {
                    return Err(MacroError::invalid_args(name, "expected a message"));
                };
                let message = evaluate_string(message, name)?;
                let values = rest
                    .iter()
                    .map(|arg| evaluate(arg, name))
                    .collect::<MacroResult<Vec<_>>>()?;
                Err(MacroError::user_failure(format_failure(&message, &values)))
            }
        }
    }

    /// Config of `package` as seen by the enclosing package.
    fn config_of(&self, package: &str) -> MacroResult<Value> {
        let ctx = self.ctx;
        if package == ctx.package.name {
            return Ok(ctx.registry.get_own_config(ctx.package)?.as_ref().clone());
        }
        if !ctx.resolver.declares_dependency(ctx.package, package)? {
            return Err(MacroError::UnauthorizedConfigAccess {
                requester: ctx.package.to_string(),
                target: package.to_string(),
            });
        }
        match ctx.resolver.resolve(ctx.package, package)? {
            Some(resolved) => Ok(ctx
                .registry
                .get_config(ctx.package, &resolved.identity, ctx.resolver)?
                .as_ref()
                .clone()),
            // Declared but not installed: nothing can have been registered for it
            None => Ok(json!({})),
        }
    }
}

impl VisitMut for Expander<'_> {
    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        if self.failed() {
            return;
        }
        if self.is_conditional(expr) {
            if self.fold_conditional(expr) {
                *expr = unit();
            }
            return;
        }
        if let Some(kind) = self.call_kind(expr) {
            self.expand_call(expr, kind);
            return;
        }

        match expr {
            Expr::Closure(closure) => {
                self.scopes.push(bindings(closure.inputs.iter()));
                visit_mut::visit_expr_closure_mut(self, closure);
                self.scopes.pop();
            }
            Expr::ForLoop(for_loop) => {
                self.visit_expr_mut(&mut for_loop.expr);
                self.scopes.push(bindings(std::iter::once(&*for_loop.pat)));
                self.visit_block_mut(&mut for_loop.body);
                self.scopes.pop();
            }
            _ => visit_mut::visit_expr_mut(self, expr),
        }
    }

    fn visit_macro_mut(&mut self, mac: &mut Macro) {
        if self.failed() {
            return;
        }
        match mac.parse_body_with(Punctuated::<Expr, Token![,]>::parse_terminated) {
            Ok(mut args) => {
                let before = (self.stats.total(), self.stats.branches_eliminated);
                for arg in args.iter_mut() {
                    self.visit_expr_mut(arg);
                }
                let after = (self.stats.total(), self.stats.branches_eliminated);
                if !self.failed() && after != before {
                    mac.tokens = args.into_token_stream();
                }
            }
            Err(_) => {
                if let Some((kind, span)) = self.macro_in_tokens(mac.tokens.clone()) {
                    let host = mac
                        .path
                        .segments
                        .last()
                        .map(|s| s.ident.to_string())
                        .unwrap_or_default();
                    self.fail(
                        span,
                        MacroError::UnexpandableMacroBody {
                            macro_name: kind.export_name(),
                            host,
                        },
                    );
                }
            }
        }
    }

    fn visit_expr_if_mut(&mut self, node: &mut ExprIf) {
        if self.failed() {
            return;
        }
        self.visit_expr_mut(&mut node.cond);
        self.scopes.push(let_bindings(&node.cond));
        self.visit_block_mut(&mut node.then_branch);
        self.scopes.pop();

        let removed = match &mut node.else_branch {
            Some((_, else_expr)) if self.is_conditional(else_expr) => {
                self.fold_conditional(else_expr)
            }
            Some((_, else_expr)) => {
                self.visit_expr_mut(else_expr);
                false
            }
            None => false,
        };
        if removed {
            node.else_branch = None;
        }
    }

    fn visit_arm_mut(&mut self, arm: &mut syn::Arm) {
        if self.failed() {
            return;
        }
        self.scopes.push(bindings(std::iter::once(&arm.pat)));
        visit_mut::visit_arm_mut(self, arm);
        self.scopes.pop();
    }

    fn visit_block_mut(&mut self, block: &mut Block) {
        if self.failed() {
            return;
        }
        self.scopes.push(local_fns(&block.stmts));

        let stmts = std::mem::take(&mut block.stmts);
        for mut stmt in stmts {
            if self.failed() {
                block.stmts.push(stmt);
                continue;
            }
            let conditional = matches!(&stmt, Stmt::Expr(expr, _) if self.is_conditional(expr));
            if conditional {
                if let Stmt::Expr(expr, _) = &mut stmt {
                    if self.fold_conditional(expr) {
                        continue;
                    }
                }
            } else {
                self.visit_stmt_mut(&mut stmt);
            }
            // A `let` binds from the next statement on
            if let Stmt::Local(local) = &stmt {
                self.bind(bindings(std::iter::once(&local.pat)));
            }
            block.stmts.push(stmt);
        }

        self.scopes.pop();
    }

    fn visit_item_fn_mut(&mut self, item: &mut ItemFn) {
        if self.failed() {
            return;
        }
        self.scopes.push(params(&item.sig));
        visit_mut::visit_item_fn_mut(self, item);
        self.scopes.pop();
    }

    fn visit_impl_item_fn_mut(&mut self, item: &mut ImplItemFn) {
        if self.failed() {
            return;
        }
        self.scopes.push(params(&item.sig));
        visit_mut::visit_impl_item_fn_mut(self, item);
        self.scopes.pop();
    }

    fn visit_trait_item_fn_mut(&mut self, item: &mut TraitItemFn) {
        if self.failed() {
            return;
        }
        self.scopes.push(params(&item.sig));
        visit_mut::visit_trait_item_fn_mut(self, item);
        self.scopes.pop();
    }

    fn visit_item_mod_mut(&mut self, item: &mut ItemMod) {
        if self.failed() {
            return;
        }
        let Some(child) = self
            .classifier
            .symbols()
            .child_module(&self.module, &item.ident.to_string())
        else {
            visit_mut::visit_item_mod_mut(self, item);
            return;
        };

        // Locals of an enclosing fn are not visible inside a module
        let parent = std::mem::replace(&mut self.module, child);
        let scopes = std::mem::take(&mut self.scopes);
        visit_mut::visit_item_mod_mut(self, item);
        self.scopes = scopes;
        self.module = parent;
    }
}

/// Argument-count check that hands back the arguments as an array.
fn arity<'e, const N: usize>(
    name: &'static str,
    args: &[&'e Expr],
) -> MacroResult<[&'e Expr; N]> {
    <[&Expr; N]>::try_from(args.to_vec()).map_err(|_| {
        let plural = if N == 1 { "" } else { "s" };
        MacroError::invalid_args(
            name,
            format!("expected {N} argument{plural}, found {}", args.len()),
        )
    })
}

/// Substitute `%s` placeholders in order. Strings are inserted raw, other
/// values as JSON. Placeholders without a value are left as they are.
fn format_failure(template: &str, values: &[Value]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut values = values.iter();
    let mut rest = template;
    while let Some(pos) = rest.find("%s") {
        out.push_str(&rest[..pos]);
        match values.next() {
            Some(Value::String(s)) => out.push_str(s),
            Some(other) => out.push_str(&other.to_string()),
            None => out.push_str("%s"),
        }
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
}

fn is_punct(tree: &TokenTree, ch: char) -> bool {
    matches!(tree, TokenTree::Punct(p) if p.as_char() == ch)
}

/// The `a::b::c` path starting at the ident `trees[start]`, and the index
/// just past it.
fn path_at(trees: &[TokenTree], start: usize) -> (syn::Path, usize) {
    let mut segments: Punctuated<PathSegment, Token![::]> = Punctuated::new();
    let mut i = start;
    while let Some(TokenTree::Ident(ident)) = trees.get(i) {
        segments.push(PathSegment::from(ident.clone()));
        let separated = matches!(
            (trees.get(i + 1), trees.get(i + 2), trees.get(i + 3)),
            (Some(a), Some(b), Some(TokenTree::Ident(_))) if is_punct(a, ':') && is_punct(b, ':')
        );
        if !separated {
            i += 1;
            break;
        }
        i += 3;
    }
    let path = syn::Path {
        leading_colon: None,
        segments,
    };
    (path, i)
}

fn unit() -> Expr {
    Expr::Tuple(ExprTuple {
        attrs: Vec::new(),
        paren_token: Default::default(),
        elems: Punctuated::new(),
    })
}

fn unparen(expr: &Expr) -> &Expr {
    match expr {
        Expr::Paren(p) => unparen(&p.expr),
        Expr::Group(g) => unparen(&g.expr),
        _ => expr,
    }
}

fn into_unparen(expr: Expr) -> Expr {
    match expr {
        Expr::Paren(p) => into_unparen(*p.expr),
        Expr::Group(g) => into_unparen(*g.expr),
        other => other,
    }
}

/// Collects every identifier a pattern binds.
#[derive(Default)]
struct PatBindings(HashSet<String>);

impl<'ast> Visit<'ast> for PatBindings {
    fn visit_pat_ident(&mut self, node: &'ast PatIdent) {
        self.0.insert(node.ident.to_string());
        visit::visit_pat_ident(self, node);
    }
}

fn bindings<'p>(pats: impl Iterator<Item = &'p Pat>) -> HashSet<String> {
    let mut collector = PatBindings::default();
    for pat in pats {
        collector.visit_pat(pat);
    }
    collector.0
}

fn params(sig: &Signature) -> HashSet<String> {
    bindings(sig.inputs.iter().filter_map(|arg| match arg {
        FnArg::Typed(typed) => Some(&*typed.pat),
        FnArg::Receiver(_) => None,
    }))
}

/// Bindings introduced by `if let` conditions, including `&&` chains.
fn let_bindings(cond: &Expr) -> HashSet<String> {
    match cond {
        Expr::Let(expr_let) => bindings(std::iter::once(&*expr_let.pat)),
        Expr::Binary(binary) => {
            let mut names = let_bindings(&binary.left);
            names.extend(let_bindings(&binary.right));
            names
        }
        _ => HashSet::new(),
    }
}

/// Functions declared inside a block, visible throughout it.
fn local_fns(stmts: &[Stmt]) -> HashSet<String> {
    stmts
        .iter()
        .filter_map(|stmt| match stmt {
            Stmt::Item(Item::Fn(f)) => Some(f.sig.ident.to_string()),
            _ => None,
        })
        .collect()
}
