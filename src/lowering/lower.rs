use indexmap::IndexMap;
use crate::error::{CompileError, WarningKind};
use crate::parsing::ast::*;
use crate::source::Pos;
use super::flags::BuildFlag;
use super::scope::PathReturns;
use super::types::{self, Ty};
use super::{Builder, Lower};

impl Builder {
    pub fn lower_stmt(&mut self, stmt: &Stmt) -> Lower<String> {
        match stmt {
            Stmt::FunctionDef { name, params, vararg, returns, body, pos } => {
                self.lower_function_def(name, params, vararg.as_deref(), returns.as_ref(), body, *pos)
            }
            Stmt::Return { value, pos } => self.lower_return(value.as_ref(), *pos),
            Stmt::Assign { targets, value, pos } => {
                self.lower_assign(targets, value, *pos).map(|(text, _)| text)
            }
            Stmt::AnnAssign { target, annotation, value, pos } => self
                .lower_ann_assign(target, annotation, value.as_ref(), *pos)
                .map(|(text, _)| text),
            Stmt::AugAssign { target, op, value, pos } => {
                // desugars into the plain binary-op-then-assign form, carrying
                // the statement's own position for diagnostics
                let bin = Expr::BinOp {
                    left: Box::new(target.clone()),
                    op: *op,
                    right: Box::new(value.clone()),
                    pos: *pos,
                };
                self.lower_assign(std::slice::from_ref(target), &bin, *pos).map(|(text, _)| text)
            }
            Stmt::If { test, body, orelse, pos } => {
                self.lower_if(test, body, orelse, *pos).map(|(text, _)| text)
            }
            Stmt::For { target, iter, body, orelse, pos } => {
                self.lower_for(target, iter, body, orelse, *pos)
            }
            Stmt::Assert { test, msg, pos } => self.lower_assert(test, msg.as_ref(), *pos),
            Stmt::ImportFrom { module, pos, .. } => {
                if module == "typing" {
                    Ok(String::new())
                } else {
                    Err(CompileError::unsupported(
                        format!("import of module '{}' is not supported", module),
                        *pos,
                    ))
                }
            }
            Stmt::Import { module, pos } => Err(CompileError::unsupported(
                format!("import of module '{}' is not supported", module),
                *pos,
            )),
            Stmt::Expr { value, .. } => self.lower_expr(value).map(|(text, _)| text),
        }
    }

    pub fn lower_expr(&mut self, expr: &Expr) -> Lower<(String, Ty)> {
        match expr {
            Expr::Int { value, pos } => self.maybe_truthy(value.to_string(), Ty::Int, *pos),
            Expr::Float { value, pos } => {
                // debug formatting keeps the decimal point so the target
                // reads the literal as inexact
                self.maybe_truthy(format!("{:?}", value), Ty::Float, *pos)
            }
            Expr::Str { value, pos } => {
                let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
                self.maybe_truthy(format!("\"{}\"", escaped), Ty::Str, *pos)
            }
            Expr::Bool { value, pos } => {
                self.maybe_truthy(if *value { "#t" } else { "#f" }.to_owned(), Ty::Bool, *pos)
            }
            // a symbol compiles to a static, comparison-safe sentinel in the
            // target runtime
            Expr::NoneLit { pos } => {
                self.maybe_truthy("'NoneType".to_owned(), Ty::NoneLiteral, *pos)
            }
            Expr::Name { name, pos } => {
                let ty = self
                    .scopes
                    .get(name)
                    .cloned()
                    .ok_or_else(|| name_error(name, *pos))?;
                self.maybe_truthy(name.clone(), ty, *pos)
            }
            Expr::BinOp { op, pos, .. } => {
                let (text, ty) = self.lower_binop(expr, *op, *pos)?;
                self.maybe_truthy(text, ty, *pos)
            }
            Expr::UnaryOp { op, operand, pos } => self.lower_unary(*op, operand, *pos),
            Expr::BoolOp { op, values, pos } => self.lower_boolop(*op, values, *pos),
            Expr::Compare { left, ops, comparators, pos } => {
                self.unresolved(|b| b.lower_compare(left, ops, comparators, *pos))
            }
            Expr::Call { func, args, keywords, pos } => {
                let (text, ty) = self.unresolved(|b| b.lower_call(func, args, keywords, *pos))?;
                self.maybe_truthy(text, ty, *pos)
            }
            Expr::Attribute { pos, .. } => Err(CompileError::unsupported(
                "attributes are only supported as method calls",
                *pos,
            )),
            Expr::Subscript { value, index, pos } => {
                let (text, ty) = self.unresolved(|b| b.lower_subscript(value, index, *pos))?;
                self.maybe_truthy(text, ty, *pos)
            }
            Expr::ListLit { elts, pos } => {
                let (text, ty) = self.unresolved(|b| b.lower_list(elts, *pos))?;
                self.maybe_truthy(text, ty, *pos)
            }
            Expr::TupleLit { elts, pos } => {
                let (text, ty) = self.unresolved(|b| b.lower_tuple(elts, *pos))?;
                self.maybe_truthy(text, ty, *pos)
            }
            Expr::IfExp { test, body, orelse, pos } => self.lower_if_exp(test, body, orelse, *pos),
        }
    }

    // ------------------------------------------------------------------
    // context helpers

    /// Lowers with truthiness resolution switched off, the default for any
    /// subexpression that is not itself a bare test.
    fn unresolved<T>(&mut self, f: impl FnOnce(&mut Builder) -> Lower<T>) -> Lower<T> {
        self.scoped(|flags| &mut flags.resolve_truthy, false, f)
    }

    /// Applies the truthiness rule when the surrounding context asked for an
    /// explicit boolean test.
    fn maybe_truthy(&mut self, text: String, ty: Ty, pos: Pos) -> Lower<(String, Ty)> {
        if self.scopes.flags().resolve_truthy {
            self.truthy(text, &ty, pos)
        } else {
            Ok((text, ty))
        }
    }

    /// Converts a typed value into an explicit boolean expression.
    fn truthy(&mut self, text: String, ty: &Ty, pos: Pos) -> Lower<(String, Ty)> {
        self.flags.set(BuildFlag::NotEqual);
        let resolved = match ty {
            Ty::Bool => text,
            Ty::Int | Ty::Float => format!("(!= {} 0)", text),
            Ty::Str => format!("(!= {} \"\")", text),
            Ty::None | Ty::NoneLiteral => "#f".to_owned(),
            Ty::List(..) => format!("(!= (gvector-count {}) 0)", text),
            Ty::Tuple(_) => format!("(!= (vector-length {}) 0)", text),
            _ => {
                return Err(CompileError::type_mismatch(
                    format!("can not use an instance of type {} as a boolean test", ty),
                    pos,
                ))
            }
        };
        Ok((resolved, Ty::Bool))
    }

    /// Compatibility with the non-fatal unresolved-none diagnostic attached.
    fn check_compatible(&mut self, have: &Ty, want: &Ty, pos: Pos) -> bool {
        let mut unsound_none = false;
        let ok = types::compatible(have, want, &mut unsound_none);
        if ok && unsound_none {
            self.warn(WarningKind::Type, "Can not assure type correctness for None", pos);
        }
        ok
    }

    fn merge_at(&mut self, t1: &Ty, t2: &Ty, symmetric: bool, pos: Pos) -> Lower<Ty> {
        types::merge(t1, t2, symmetric).map_err(|msg| CompileError::type_mismatch(msg, pos))
    }

    fn annotation_type(&mut self, annotation: &Expr) -> Lower<Ty> {
        match annotation {
            Expr::Name { name, pos } => match name.as_str() {
                "bool" => Ok(Ty::Bool),
                "int" => Ok(Ty::Int),
                "float" => Ok(Ty::Float),
                "str" => Ok(Ty::Str),
                _ => Err(CompileError::type_mismatch(
                    format!("annotation '{}' is not supported", name),
                    *pos,
                )),
            },
            Expr::NoneLit { .. } => Ok(Ty::None),
            Expr::Subscript { value, index, pos } => {
                let Expr::Name { name, .. } = value.as_ref() else {
                    return Err(CompileError::type_mismatch(
                        "this annotation form is not supported",
                        *pos,
                    ));
                };
                let Index::Single(inner) = index else {
                    return Err(CompileError::type_mismatch(
                        "this annotation form is not supported",
                        *pos,
                    ));
                };
                match name.as_str() {
                    "List" => Ok(Ty::list(self.annotation_type(inner)?)),
                    "Tuple" => {
                        let elements = match inner.as_ref() {
                            Expr::TupleLit { elts, .. } => elts
                                .iter()
                                .map(|e| self.annotation_type(e))
                                .collect::<Lower<Vec<Ty>>>()?,
                            single => vec![self.annotation_type(single)?],
                        };
                        Ok(Ty::Tuple(elements))
                    }
                    other => match self.scopes.get(other) {
                        Some(Ty::List(element, _)) => Ok((**element).clone()),
                        _ => Err(CompileError::type_mismatch(
                            format!("subscript-type {} is not supported", other),
                            *pos,
                        )),
                    },
                }
            }
            other => Err(CompileError::type_mismatch(
                "this annotation form is not supported",
                other.pos(),
            )),
        }
    }

    // ------------------------------------------------------------------
    // functions and returns

    fn lower_function_def(
        &mut self,
        name: &str,
        params: &[Param],
        vararg: Option<&str>,
        returns: Option<&Expr>,
        body: &[Stmt],
        pos: Pos,
    ) -> Lower<String> {
        let ret_ty = match returns {
            Some(annotation) => self.annotation_type(annotation)?,
            None => Ty::NoneLiteral,
        };

        self.scopes.push_frame();
        let result = self.function_parts(name, params, vararg, ret_ty, body, pos);
        self.scopes.pop_frame();
        let (args, body_text) = result?;

        if args.is_empty() {
            Ok(format!("(define ({}) {})", name, body_text))
        } else {
            Ok(format!("(define ({} {}) {})", name, args.join(" "), body_text))
        }
    }

    fn function_parts(
        &mut self,
        name: &str,
        params: &[Param],
        vararg: Option<&str>,
        ret_ty: Ty,
        body: &[Stmt],
        pos: Pos,
    ) -> Lower<(Vec<String>, String)> {
        let mut args = Vec::new();
        let mut positional = Vec::new();
        let mut kwparams = IndexMap::new();
        let mut bindings = Vec::new();

        for param in params {
            let annotated = self.annotation_type(&param.annotation)?;
            match &param.default {
                Some(default) => {
                    let (default_text, default_ty) = self.lower_expr(default)?;
                    if !self.check_compatible(&default_ty, &annotated, param.pos) {
                        return Err(CompileError::type_mismatch(
                            format!(
                                "annotation type {} and default type {} are incompatible for argument '{}' of {}",
                                annotated, default_ty, param.name, name
                            ),
                            param.pos,
                        ));
                    }
                    args.push(format!("#:{} [{} {}]", param.name, param.name, default_text));
                    kwparams.insert(param.name.clone(), annotated.clone());
                }
                None => {
                    args.push(param.name.clone());
                    positional.push(annotated.clone());
                }
            }
            bindings.push((param.name.clone(), annotated));
        }
        if let Some(rest) = vararg {
            args.push(format!(". {}", rest));
        }

        // registered before the body so direct and mutual recursion resolve
        let fn_ty = Ty::function(positional, kwparams, vararg.is_some(), ret_ty.clone());
        self.scopes.set_propagating(name, fn_ty);
        for (param_name, param_ty) in bindings {
            self.scopes.set(&param_name, param_ty);
        }
        self.scopes.flags_mut().return_type = ret_ty.clone();

        let mut parts = Vec::new();
        for stmt in body {
            if self.scopes.flags().did_return {
                return Err(CompileError::structural(
                    "No expressions allowed after 'return'",
                    stmt.pos(),
                ));
            }
            let text = self.lower_stmt(stmt)?;
            if !text.is_empty() {
                parts.push(text);
            }
        }

        if !self.scopes.flags().did_return {
            if !matches!(ret_ty, Ty::None | Ty::NoneLiteral) {
                self.warn(
                    WarningKind::Syntax,
                    "Implicitly added 'return None' to function with return type other than 'None'",
                    pos,
                );
            }
            let implicit = self.lower_return(Some(&Expr::NoneLit { pos }), pos)?;
            parts.push(implicit);
        }

        Ok((args, parts.join(" ")))
    }

    fn lower_return(&mut self, value: Option<&Expr>, pos: Pos) -> Lower<String> {
        if self.scopes.depth() == 1 {
            return Err(CompileError::structural("'return' outside of a function", pos));
        }
        if self.scopes.flags().in_loop {
            return Err(CompileError::structural(
                "Returning inside of loops is not supported",
                pos,
            ));
        }
        let none = Expr::NoneLit { pos };
        let value = value.unwrap_or(&none);
        let (text, value_ty) = self.lower_expr(value)?;
        let ret_ty = self.scopes.flags().return_type.clone();
        if !self.check_compatible(&value_ty, &ret_ty, pos) {
            return Err(CompileError::type_mismatch(
                format!("Type {} and {} are incompatible for return value", ret_ty, value_ty),
                pos,
            ));
        }
        self.scopes.flags_mut().did_return = true;
        Ok(text)
    }

    // ------------------------------------------------------------------
    // assignments

    fn lower_assign(&mut self, targets: &[Expr], value: &Expr, pos: Pos) -> Lower<(String, bool)> {
        // the value is lowered before any target binds, so a tuple value
        // reading a not-yet-bound target name fails here
        let (value_text, value_ty) = self.lower_expr(value)?;
        let mut ret = String::new();
        let mut is_define = false;
        for target in targets {
            match target {
                Expr::TupleLit { elts, .. } => {
                    let (text, define) = self.lower_tuple_assign(elts, value, pos)?;
                    ret.push_str(&text);
                    is_define = define;
                }
                Expr::Subscript { value: recv, index, pos: sub_pos } => {
                    let text =
                        self.lower_subscript_store(recv, index, &value_text, &value_ty, *sub_pos)?;
                    ret.push_str(&text);
                    is_define = false;
                }
                Expr::Name { name, pos: name_pos } => {
                    let (text, define) =
                        self.lower_name_assign(name, &value_text, &value_ty, *name_pos)?;
                    ret.push_str(&text);
                    is_define = define;
                }
                other => {
                    return Err(CompileError::type_mismatch(
                        "can not assign to this expression",
                        other.pos(),
                    ))
                }
            }
        }
        Ok((ret, is_define))
    }

    fn lower_name_assign(
        &mut self,
        name: &str,
        value_text: &str,
        value_ty: &Ty,
        pos: Pos,
    ) -> Lower<(String, bool)> {
        if self.scopes.has_local(name) {
            let stored = self.scopes.get_local(name).unwrap().clone();
            if !self.check_compatible(value_ty, &stored, pos) {
                if types::is_restricted(value_ty) {
                    return Err(CompileError::type_mismatch(
                        format!(
                            "restricted type {} may only be introduced through an annotated assignment",
                            value_ty
                        ),
                        pos,
                    ));
                }
                return Err(CompileError::type_mismatch(
                    format!("Type {} and {} are incompatible for '{}'", stored, value_ty, name),
                    pos,
                ));
            }
            // widen a binding whose type was still unresolved, so that
            // int->float->int round trips can not sneak through
            if (matches!(stored, Ty::NoneLiteral) || types::has_pending(&stored))
                && !matches!(value_ty, Ty::NoneLiteral)
            {
                if self.scopes.flags().definitions_claim {
                    self.warn(
                        WarningKind::Type,
                        "Can not assure type correctness for retyped variable in a control structure",
                        pos,
                    );
                }
                let merged = self.merge_at(&stored, value_ty, false, pos)?;
                self.scopes.set(name, merged);
            }
            Ok((format!("(set! {} {})", name, value_text), false))
        } else {
            self.scopes.set(name, value_ty.clone());
            if self.scopes.flags().skip_value {
                Ok((format!("(define {} void)", name), true))
            } else {
                Ok((format!("(define {} {})", name, value_text), true))
            }
        }
    }

    fn lower_subscript_store(
        &mut self,
        recv: &Expr,
        index: &Index,
        value_text: &str,
        value_ty: &Ty,
        pos: Pos,
    ) -> Lower<String> {
        let (recv_text, recv_ty) = self.unresolved(|b| b.lower_expr(recv))?;
        let Index::Single(index_expr) = index else {
            return Err(CompileError::unsupported(
                "Advanced slicing is not yet implemented for lists",
                pos,
            ));
        };
        match recv_ty {
            Ty::List(contained, _) => {
                let len_expr = format!("(gvector-count {})", recv_text);
                let (index_text, _) = self.normalize_index(index_expr, &len_expr, pos)?;
                if !self.check_compatible(value_ty, &contained, pos) {
                    return Err(CompileError::type_mismatch(
                        format!(
                            "element of type {} can not be appended to list containing type {}",
                            value_ty, contained
                        ),
                        pos,
                    ));
                }
                self.flags.set(BuildFlag::Gvector);
                Ok(format!("(safe-gvector-set! {} {} {})", recv_text, index_text, value_text))
            }
            other => Err(CompileError::type_mismatch(
                format!("value of type {} can not be subscripted", other),
                pos,
            )),
        }
    }

    /// Simultaneous multi-assignment. Every pre-bound target is captured into
    /// a deep-copied temporary first, and the right-hand expressions are
    /// rewritten against those copies, so a name on both sides reads its
    /// pre-assignment value.
    fn lower_tuple_assign(
        &mut self,
        elts: &[Expr],
        value: &Expr,
        pos: Pos,
    ) -> Lower<(String, bool)> {
        let Expr::TupleLit { elts: value_elts, .. } = value else {
            return Err(CompileError::unsupported(
                "MultiAssign requires a tuple of values",
                value.pos(),
            ));
        };
        if elts.len() != value_elts.len() {
            return Err(CompileError::structural(
                format!("MultiAssign requires {} values, {} provided", elts.len(), value_elts.len()),
                pos,
            ));
        }

        let mut captured: Vec<String> = Vec::new();
        let mut pre_inner = String::new();
        for recipient in elts {
            let base = assign_base_name(recipient).ok_or_else(|| {
                CompileError::unsupported(
                    "MultiAssign is not supported for this target",
                    recipient.pos(),
                )
            })?;
            if self.scopes.has_local(base) && !captured.iter().any(|c| c == base) {
                self.flags.set(BuildFlag::DeepCopy);
                let ty = self.scopes.get_local(base).unwrap().clone();
                let dunder = format!("___{}___", base);
                pre_inner.push_str(&format!("(define {} (deepcopy {}))", dunder, base));
                self.scopes.set(&dunder, ty);
                captured.push(base.to_owned());
            }
        }

        let mut pre = String::new();
        let mut inner = String::new();
        for (recipient, value_node) in elts.iter().zip(value_elts) {
            let aliased = alias_rewrite(value_node, &captured);
            let base = assign_base_name(recipient).unwrap();
            let bound = self.scopes.has_local(base);
            let (text, _) = self.lower_assign(std::slice::from_ref(recipient), &aliased, pos)?;
            if bound {
                inner.push_str(&text);
            } else {
                pre.push_str(&text);
            }
        }
        for base in &captured {
            self.scopes.remove(&format!("___{}___", base));
        }

        if self.scopes.flags().skip_value {
            Ok((pre, true))
        } else if inner.is_empty() {
            Ok((pre, false))
        } else {
            Ok((format!("{}((lambda () {}{}))", pre, pre_inner, inner), false))
        }
    }

    fn lower_ann_assign(
        &mut self,
        target: &str,
        annotation: &Expr,
        value: Option<&Expr>,
        pos: Pos,
    ) -> Lower<(String, bool)> {
        let Some(value) = value else {
            return Err(CompileError::structural(
                format!("variable '{}' must be initialized", target),
                pos,
            ));
        };
        let (value_text, value_ty) = self.lower_expr(value)?;
        let annotated = self.annotation_type(annotation)?;
        if !self.check_compatible(&value_ty, &annotated, pos) {
            return Err(CompileError::type_mismatch(
                format!(
                    "can not assign value of type {} to variable with type annotation of {}",
                    value_ty, annotated
                ),
                pos,
            ));
        }
        if self.scopes.has_local(target) {
            // a pending placeholder marks a hoisted declaration waiting to be
            // finished; everything else is a redefinition
            if !matches!(self.scopes.get_local(target), Some(Ty::Pending)) {
                return Err(CompileError::type_mismatch("Can not redefine a variable's type", pos));
            }
            self.scopes.set(target, annotated);
            Ok((format!("(set! {} {})", target, value_text), false))
        } else if self.scopes.flags().skip_value {
            self.scopes.set(target, Ty::Pending);
            Ok((format!("(define {} void)", target), true))
        } else {
            self.scopes.set(target, annotated);
            Ok((format!("(define {} {})", target, value_text), true))
        }
    }

    // ------------------------------------------------------------------
    // conditionals and loops

    /// Lowers an assignment found inside a conditional or loop body. Fresh
    /// bindings are lowered once without their value to produce a hoistable
    /// declaration, then again as a plain mutation.
    fn handle_assign(&mut self, stmt: &Stmt) -> Lower<String> {
        let (possible_define, is_define) =
            self.scoped(|flags| &mut flags.skip_value, true, |b| b.lower_assign_stmt(stmt))?;
        if is_define {
            self.scopes.flags_mut().definitions.push(possible_define);
            self.lower_assign_stmt(stmt).map(|(text, _)| text)
        } else {
            Ok(possible_define)
        }
    }

    fn lower_assign_stmt(&mut self, stmt: &Stmt) -> Lower<(String, bool)> {
        match stmt {
            Stmt::Assign { targets, value, pos } => self.lower_assign(targets, value, *pos),
            Stmt::AnnAssign { target, annotation, value, pos } => {
                self.lower_ann_assign(target, annotation, value.as_ref(), *pos)
            }
            _ => unreachable!("only assignments reach handle_assign"),
        }
    }

    /// One branch body. Records the branch's return behaviour against its
    /// siblings and rejects the mix of returning and falling through.
    fn lower_branch_body(&mut self, stmts: &[Stmt], inner: bool, pos: Pos) -> Lower<String> {
        let (parts, did_return) = self.scoped(|flags| &mut flags.inner_body, inner, |b| {
            let mut parts: Vec<String> = Vec::new();
            let mut did_return = false;
            for stmt in stmts {
                if did_return {
                    return Err(CompileError::structural(
                        "No expressions allowed after 'return'",
                        stmt.pos(),
                    ));
                }
                let text = match stmt {
                    Stmt::Assign { .. } | Stmt::AnnAssign { .. } => b.handle_assign(stmt)?,
                    Stmt::If { test, body, orelse, pos } => {
                        let (text, returns) = b.lower_if(test, body, orelse, *pos)?;
                        did_return = returns;
                        text
                    }
                    _ => {
                        if matches!(stmt, Stmt::Return { .. }) {
                            did_return = true;
                        }
                        b.lower_stmt(stmt)?
                    }
                };
                if !text.is_empty() {
                    parts.push(text);
                }
            }
            Ok((parts, did_return))
        })?;
        self.scopes.flags_mut().path_returns.insert(did_return);
        if self.scopes.flags().path_returns.is_mixed() {
            return Err(CompileError::structural(
                "Please ensure all paths have the same return behaviour",
                pos,
            ));
        }
        Ok(parts.join(" "))
    }

    /// The returned bool is the conditional's aggregate return behaviour,
    /// fed into the parent's consistency check when conditionals nest.
    fn lower_if(
        &mut self,
        test: &Expr,
        body: &[Stmt],
        orelse: &[Stmt],
        pos: Pos,
    ) -> Lower<(String, bool)> {
        self.scoped(|flags| &mut flags.path_returns, PathReturns::default(), |b| {
            // the first conditional of a nested chain claims responsibility
            // for hoisting local definitions out of its branches
            let root_claim = !b.scopes.flags().definitions_claim;
            if root_claim {
                b.scopes.flags_mut().definitions_claim = true;
            }

            let body_text = b.lower_branch_body(body, true, pos)?;
            if body_text.is_empty() {
                return Err(CompileError::structural("expected an indented block", pos));
            }
            let (test_text, _) =
                b.scoped(|flags| &mut flags.resolve_truthy, true, |b| b.lower_expr(test))?;
            let mut clauses = vec![format!("({} {})", test_text, body_text)];

            if !orelse.is_empty() {
                if orelse.len() == 1 && matches!(orelse[0], Stmt::If { .. }) {
                    // a lone else-if splices into this clause list
                    clauses.push(b.lower_branch_body(orelse, false, pos)?);
                } else {
                    let else_text = b.lower_branch_body(orelse, true, pos)?;
                    clauses.push(format!("(else {})", else_text));
                }
            }

            let returns = b.scopes.flags().path_returns.agreed();

            if !root_claim {
                if !b.scopes.flags().inner_body {
                    Ok((clauses.join("\n"), returns))
                } else {
                    Ok((format!("(cond {})", clauses.join(" ")), returns))
                }
            } else {
                let definitions = std::mem::take(&mut b.scopes.flags_mut().definitions);
                b.scopes.flags_mut().definitions_claim = false;
                let mut out = definitions.join("\n");
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(&format!("(cond {})", clauses.join(" ")));
                Ok((out, returns))
            }
        })
    }

    fn handle_loop_target(&mut self, name: &str, target_ty: Ty, pos: Pos) -> Lower<()> {
        if self.scopes.has_local(name) {
            let stored = self.scopes.get_local(name).unwrap().clone();
            if !self.check_compatible(&stored, &target_ty, pos) {
                return Err(CompileError::type_mismatch(
                    format!("Type {} and {} are incompatible", stored, target_ty),
                    pos,
                ));
            }
        } else {
            self.scopes.set(name, target_ty);
            self.scopes.flags_mut().definitions.push(format!("(define {} void)", name));
        }
        Ok(())
    }

    fn lower_for(
        &mut self,
        target: &Expr,
        iter: &Expr,
        body: &[Stmt],
        orelse: &[Stmt],
        pos: Pos,
    ) -> Lower<String> {
        let (iter_text, iter_ty) = self.unresolved(|b| b.lower_expr(iter))?;
        let (iter_text, element_ty) = match &iter_ty {
            Ty::List(element, native) => {
                let text =
                    if *native { iter_text } else { format!("(gvector->list {})", iter_text) };
                (text, (**element).clone())
            }
            Ty::Tuple(_) => (format!("(vector->list {})", iter_text), Ty::Any),
            Ty::Any => {
                return Err(CompileError::unsupported(
                    "an iterable of type Any is currently not supported in for loops",
                    pos,
                ))
            }
            other => {
                return Err(CompileError::type_mismatch(
                    format!("can not iterate over an instance of {}", other),
                    pos,
                ))
            }
        };

        // the loop construct is an expression-scoped lambda, so the target
        // must be declared ahead of the loop and mutated per iteration
        let prefix = match target {
            Expr::Name { name, pos: name_pos } => {
                self.handle_loop_target(name, element_ty, *name_pos)?;
                format!("(set! {} __i__)", name)
            }
            Expr::TupleLit { elts, pos: target_pos } => {
                let sub_ty = match &element_ty {
                    Ty::List(element, _) => (**element).clone(),
                    Ty::Tuple(_) | Ty::Any => Ty::Any,
                    other => {
                        return Err(CompileError::type_mismatch(
                            format!(
                                "MultiTarget for loop requires an iterable subtype, '{}' given",
                                other
                            ),
                            *target_pos,
                        ))
                    }
                };
                self.warn(
                    WarningKind::Type,
                    "No type guarantees can be made about multi-variable iteration",
                    *target_pos,
                );
                let mut names = Vec::new();
                for elt in elts {
                    let Expr::Name { name, pos: name_pos } = elt else {
                        return Err(CompileError::type_mismatch(
                            "MultiTarget in a for loop must be a variable name",
                            elt.pos(),
                        ));
                    };
                    self.handle_loop_target(name, sub_ty.clone(), *name_pos)?;
                    names.push(name.clone());
                }
                self.flags.set(BuildFlag::ToList);
                format!("(set!-values ({}) (apply values (toList __i__)))", names.join(" "))
            }
            other => {
                return Err(CompileError::unsupported(
                    "this target form is not supported in for loops",
                    other.pos(),
                ))
            }
        };

        let root_claim = !self.scopes.flags().definitions_claim;
        if root_claim {
            self.scopes.flags_mut().definitions_claim = true;
        }

        let mut parts = vec![prefix];
        let body_parts = self.scoped(|flags| &mut flags.in_loop, true, |b| {
            b.scoped(|flags| &mut flags.inner_body, true, |b| {
                let mut out = Vec::new();
                for stmt in body {
                    let text = match stmt {
                        Stmt::Assign { .. } | Stmt::AnnAssign { .. } => b.handle_assign(stmt)?,
                        _ => b.lower_stmt(stmt)?,
                    };
                    if !text.is_empty() {
                        out.push(text);
                    }
                }
                Ok(out)
            })
        })?;
        parts.extend(body_parts);

        if !orelse.is_empty() {
            return Err(CompileError::unsupported(
                "'else' syntax is not supported in conjunction with for loops",
                pos,
            ));
        }

        let loop_text = format!("(for-each (lambda (__i__) {}) {})", parts.join(" "), iter_text);
        if !root_claim {
            Ok(loop_text)
        } else {
            let definitions = std::mem::take(&mut self.scopes.flags_mut().definitions);
            self.scopes.flags_mut().definitions_claim = false;
            let mut out = definitions.join("\n");
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&loop_text);
            Ok(out)
        }
    }

    // ------------------------------------------------------------------
    // calls

    fn lower_call(
        &mut self,
        func: &Expr,
        args: &[Expr],
        keywords: &[Keyword],
        pos: Pos,
    ) -> Lower<(String, Ty)> {
        match func {
            Expr::Attribute { value, attr, pos: attr_pos } => {
                self.lower_method_call(value, attr, args, *attr_pos)
            }
            Expr::Name { name, .. } => match name.as_str() {
                "print" => {
                    self.flags.set(BuildFlag::Print);
                    self.generic_call("PRINT", args, keywords, pos)
                }
                "range" => self.lower_range(args, keywords, pos),
                "input" => self.lower_input(args, pos),
                "len" => self.lower_len(args, pos),
                "int" => self.lower_converter(
                    "int",
                    &[Ty::Int, Ty::Float, Ty::Str, Ty::Bool],
                    BuildFlag::ToInt,
                    Ty::Int,
                    args,
                    pos,
                ),
                "float" => self.lower_converter(
                    "float",
                    &[Ty::Float, Ty::Int, Ty::Str, Ty::Bool],
                    BuildFlag::ToFloat,
                    Ty::Float,
                    args,
                    pos,
                ),
                "str" => self.lower_converter(
                    "str",
                    &[Ty::Str, Ty::Int, Ty::Float, Ty::Bool],
                    BuildFlag::ToStr,
                    Ty::Str,
                    args,
                    pos,
                ),
                "bool" => self.lower_converter(
                    "bool",
                    &[Ty::Bool, Ty::Int, Ty::Float, Ty::Str],
                    BuildFlag::ToBool,
                    Ty::Bool,
                    args,
                    pos,
                ),
                _ => self.generic_call(name, args, keywords, pos),
            },
            other => Err(CompileError::unsupported(
                "only named functions and methods can be called",
                other.pos(),
            )),
        }
    }

    fn generic_call(
        &mut self,
        name: &str,
        args: &[Expr],
        keywords: &[Keyword],
        pos: Pos,
    ) -> Lower<(String, Ty)> {
        let fn_ty = match self.scopes.get(name) {
            Some(Ty::Function(f)) => f.clone(),
            Some(other) => {
                return Err(CompileError::type_mismatch(
                    format!("'{}' of type {} is not callable", name, other),
                    pos,
                ))
            }
            None => return Err(name_error(name, pos)),
        };

        let declared = fn_ty.params.len();
        let supplied = args.len();
        if (fn_ty.vararg && supplied < declared) || (!fn_ty.vararg && supplied != declared) {
            return Err(CompileError::arity(
                format!(
                    "{} takes {} positional arguments but you provided {}",
                    name,
                    declared,
                    supplied + keywords.len()
                ),
                pos,
            ));
        }
        if keywords.len() > fn_ty.kwparams.len() {
            return Err(CompileError::arity(
                format!(
                    "{} takes {} keyword arguments but you provided {}",
                    name,
                    fn_ty.kwparams.len(),
                    keywords.len()
                ),
                pos,
            ));
        }

        let mut parts = Vec::new();
        for (i, arg) in args.iter().enumerate() {
            let (text, ty) = self.lower_expr(arg)?;
            if let Some(want) = fn_ty.params.get(i) {
                if !self.check_compatible(&ty, want, arg.pos()) {
                    return Err(CompileError::type_mismatch(
                        format!("type {} can not be applied to an argument of type {}", ty, want),
                        arg.pos(),
                    ));
                }
            }
            parts.push(text);
        }
        for keyword in keywords {
            let (text, ty) = self.lower_expr(&keyword.value)?;
            let Some(want) = fn_ty.kwparams.get(&keyword.name) else {
                return Err(CompileError::type_mismatch(
                    format!("'{}' is an invalid keyword argument for {}", keyword.name, name),
                    keyword.pos,
                ));
            };
            if !self.check_compatible(&ty, want, keyword.pos) {
                return Err(CompileError::type_mismatch(
                    format!("type {} can not be applied to an argument of type {}", ty, want),
                    keyword.pos,
                ));
            }
            parts.push(format!("#:{} {}", keyword.name, text));
        }

        let text = if parts.is_empty() {
            format!("({})", name)
        } else {
            format!("({} {})", name, parts.join(" "))
        };
        Ok((text, fn_ty.ret.clone()))
    }

    fn lower_range(&mut self, args: &[Expr], keywords: &[Keyword], pos: Pos) -> Lower<(String, Ty)> {
        if !keywords.is_empty() {
            return Err(CompileError::arity("builtin range takes no keyword arguments", pos));
        }
        if args.is_empty() || args.len() > 3 {
            return Err(CompileError::arity(
                format!("builtin range takes 1 to 3 arguments, {} provided", args.len()),
                pos,
            ));
        }
        let mut parts = Vec::new();
        for arg in args {
            let (text, ty) = self.lower_expr(arg)?;
            if !self.check_compatible(&ty, &Ty::Int, arg.pos()) {
                return Err(CompileError::type_mismatch("builtin range takes 1 to 3 integers", arg.pos()));
            }
            parts.push(text);
        }
        Ok((format!("(range {})", parts.join(" ")), Ty::native_range(Ty::Int)))
    }

    fn lower_input(&mut self, args: &[Expr], pos: Pos) -> Lower<(String, Ty)> {
        self.flags.set(BuildFlag::Input);
        if args.len() > 1 {
            return Err(CompileError::arity(
                format!("builtin input takes 0 to 1 arguments, {} provided", args.len()),
                pos,
            ));
        }
        let prompt = match args.first() {
            Some(arg) => {
                let (text, ty) = self.lower_expr(arg)?;
                if !self.check_compatible(&ty, &Ty::Str, arg.pos()) {
                    return Err(CompileError::type_mismatch(
                        "builtin input takes 0 to 1 strings",
                        arg.pos(),
                    ));
                }
                text
            }
            None => "\"\"".to_owned(),
        };
        Ok((format!("(input {})", prompt), Ty::Str))
    }

    fn lower_len(&mut self, args: &[Expr], pos: Pos) -> Lower<(String, Ty)> {
        if args.len() != 1 {
            return Err(CompileError::arity(
                format!("builtin len takes 1 argument, {} provided", args.len()),
                pos,
            ));
        }
        let (text, ty) = self.lower_expr(&args[0])?;
        let text = match ty {
            Ty::Str => format!("(string-length {})", text),
            Ty::List(..) => format!("(gvector-count {})", text),
            Ty::Tuple(_) => format!("(vector-length {})", text),
            other => {
                return Err(CompileError::type_mismatch(
                    format!("object of type '{}' has no len()", other),
                    pos,
                ))
            }
        };
        Ok((text, Ty::Int))
    }

    fn lower_converter(
        &mut self,
        name: &str,
        accepted: &[Ty],
        flag: BuildFlag,
        ret: Ty,
        args: &[Expr],
        pos: Pos,
    ) -> Lower<(String, Ty)> {
        self.flags.set(flag);
        if args.len() != 1 {
            return Err(CompileError::arity(
                format!("builtin typeConverter {} takes 1 argument, {} provided", name, args.len()),
                pos,
            ));
        }
        let (text, ty) = self.lower_expr(&args[0])?;
        if matches!(ty, Ty::Any) {
            if !self.scopes.flags().skip_value {
                self.warn(
                    WarningKind::Type,
                    "Can not assure type correctness for Any",
                    args[0].pos(),
                );
            }
        } else if !accepted.contains(&ty) {
            return Err(CompileError::type_mismatch(
                format!(
                    "builtin typeConverter {} takes one of [{}], {} provided",
                    name,
                    crate::util::map_join(accepted, Ty::render),
                    ty
                ),
                pos,
            ));
        }
        Ok((format!("({} {})", name, text), ret))
    }

    fn lower_method_call(
        &mut self,
        recv: &Expr,
        attr: &str,
        args: &[Expr],
        pos: Pos,
    ) -> Lower<(String, Ty)> {
        let Expr::Name { name: recv_name, .. } = recv else {
            return Err(CompileError::type_mismatch(
                "only variables may use attribute calls",
                recv.pos(),
            ));
        };
        let (recv_text, recv_ty) = self.lower_expr(recv)?;
        match recv_ty {
            Ty::List(contained, native) => match attr {
                "append" => {
                    if args.len() != 1 {
                        return Err(CompileError::arity(
                            format!(
                                "append on a list takes 1 type-compatible argument, {} provided",
                                args.len()
                            ),
                            pos,
                        ));
                    }
                    let (value_text, value_ty) = self.lower_expr(&args[0])?;
                    if !self.check_compatible(&value_ty, &contained, args[0].pos()) {
                        return Err(CompileError::type_mismatch(
                            format!(
                                "element of type {} can not be appended to list containing type {}",
                                value_ty, contained
                            ),
                            args[0].pos(),
                        ));
                    }
                    // an empty literal's pending element type commits here
                    if types::has_pending(&contained) {
                        let resolved = self.merge_at(&contained, &value_ty, false, pos)?;
                        self.scopes.update(recv_name, Ty::List(Box::new(resolved), native));
                    }
                    self.flags.set(BuildFlag::GvectorRequire);
                    Ok((format!("(gvector-add! {} {})", recv_text, value_text), Ty::Null))
                }
                "pop" => {
                    if args.len() != 1 {
                        return Err(CompileError::arity(
                            format!(
                                "pop on a list takes 1 positional argument, {} provided",
                                args.len()
                            ),
                            pos,
                        ));
                    }
                    let len_expr = format!("(gvector-count {})", recv_text);
                    let (index_text, _) = self.normalize_index(&args[0], &len_expr, pos)?;
                    self.flags.set(BuildFlag::Gvector);
                    Ok((format!("(gvector-pop! {} {})", recv_text, index_text), (*contained).clone()))
                }
                "insert" => {
                    if args.len() != 2 {
                        return Err(CompileError::arity(
                            format!(
                                "insert on a list takes 2 positional arguments, {} provided",
                                args.len()
                            ),
                            pos,
                        ));
                    }
                    let len_expr = format!("(gvector-count {})", recv_text);
                    let (index_text, _) = self.normalize_index(&args[0], &len_expr, pos)?;
                    let (value_text, value_ty) = self.lower_expr(&args[1])?;
                    if !self.check_compatible(&value_ty, &contained, args[1].pos()) {
                        return Err(CompileError::type_mismatch(
                            format!(
                                "element of type {} can not be inserted into a list containing type {}",
                                value_ty, contained
                            ),
                            args[1].pos(),
                        ));
                    }
                    if types::has_pending(&contained) {
                        let resolved = self.merge_at(&contained, &value_ty, false, pos)?;
                        self.scopes.update(recv_name, Ty::List(Box::new(resolved), native));
                    }
                    self.flags.set(BuildFlag::GvectorRequire);
                    Ok((
                        format!("(gvector-insert! {} {} {})", recv_text, index_text, value_text),
                        Ty::Null,
                    ))
                }
                _ => Err(CompileError::attribute("no such attribute function on type list", pos)),
            },
            other => Err(CompileError::attribute(
                format!("object of type {} does not have any attribute functions", other),
                pos,
            )),
        }
    }

    // ------------------------------------------------------------------
    // operators and literals

    fn lower_binop(&mut self, expr: &Expr, op: BinOpKind, pos: Pos) -> Lower<(String, Ty)> {
        // same-operator chains along the left spine collapse into one flat
        // N-ary application; right-nested groupings keep their parentheses
        let mut chain = Vec::new();
        collect_chain(expr, op, &mut chain);
        let mut lowered = Vec::with_capacity(chain.len());
        for operand in &chain {
            lowered.push(self.unresolved(|b| b.lower_expr(operand))?);
        }

        if lowered.iter().all(|(_, ty)| ty.is_numeric()) {
            let ty = if lowered.iter().any(|(_, ty)| matches!(ty, Ty::Float)) {
                Ty::Float
            } else {
                Ty::Int
            };
            let parts: Vec<&str> = lowered.iter().map(|(text, _)| text.as_str()).collect();
            return Ok((format!("({} {})", op.symbol(), parts.join(" ")), ty));
        }
        if lowered.iter().all(|(_, ty)| matches!(ty, Ty::Str)) {
            if op != BinOpKind::Add {
                return Err(CompileError::type_mismatch(
                    format!("unsupported operand type(s) for {}: 'str' and 'str'", op.symbol()),
                    pos,
                ));
            }
            let parts: Vec<&str> = lowered.iter().map(|(text, _)| text.as_str()).collect();
            return Ok((format!("(string-append {})", parts.join(" ")), Ty::Str));
        }

        let first = &lowered[0].1;
        let second = lowered.iter().map(|(_, ty)| ty).find(|ty| *ty != first).unwrap_or(first);
        Err(CompileError::type_mismatch(
            format!("unsupported operand type(s) for {}: '{}' and '{}'", op.symbol(), first, second),
            pos,
        ))
    }

    fn lower_unary(&mut self, op: UnaryOpKind, operand: &Expr, pos: Pos) -> Lower<(String, Ty)> {
        let (text, ty) = self.unresolved(|b| b.lower_expr(operand))?;
        let is_literal = matches!(operand, Expr::Int { .. } | Expr::Float { .. });
        let folded = match (op, &ty) {
            (UnaryOpKind::Pos, t) if t.is_numeric() => Some((text.clone(), ty.clone())),
            (UnaryOpKind::Neg, t) if t.is_numeric() => {
                // negating a literal folds textually instead of emitting a call
                let negated =
                    if is_literal { format!("-{}", text) } else { format!("(- {})", text) };
                Some((negated, ty.clone()))
            }
            (UnaryOpKind::Not, Ty::Bool) => Some((format!("(not {})", text), Ty::Bool)),
            _ => None,
        };

        if self.scopes.flags().resolve_truthy {
            return match folded {
                Some((folded_text, folded_ty)) => self.truthy(folded_text, &folded_ty, pos),
                None if op == UnaryOpKind::Not => {
                    let (test, _) = self.truthy(text, &ty, pos)?;
                    Ok((format!("(not {})", test), Ty::Bool))
                }
                None => Err(CompileError::type_mismatch(
                    format!("unary operation can not be applied to type {}", ty),
                    pos,
                )),
            };
        }
        match folded {
            Some(ret) => Ok(ret),
            None => Err(CompileError::type_mismatch(
                format!("unary operation can not be applied to type {}", ty),
                pos,
            )),
        }
    }

    fn lower_boolop(&mut self, op: BoolOpKind, values: &[Expr], _pos: Pos) -> Lower<(String, Ty)> {
        // operands keep the ambient context, so truthiness distributes into
        // the individual tests of `if a or b:`
        let mut parts = Vec::new();
        for value in values {
            parts.push(self.lower_expr(value)?.0);
        }
        Ok((format!("({} {})", op.symbol(), parts.join(" ")), Ty::Bool))
    }

    fn comparison_text(&mut self, op: CmpOp, t1: &Ty, t2: &Ty, pos: Pos) -> Lower<String> {
        match op {
            CmpOp::Eq => {
                self.flags.set(BuildFlag::Equal);
                Ok("==".to_owned())
            }
            CmpOp::NotEq => {
                self.flags.set(BuildFlag::NotEqual);
                Ok("!=".to_owned())
            }
            CmpOp::In => {
                self.flags.set(BuildFlag::In);
                match t2 {
                    Ty::Any => self.warn(
                        WarningKind::Type,
                        "Can not assure type correctness for Any",
                        pos,
                    ),
                    Ty::List(..) | Ty::Tuple(_) => {}
                    other => {
                        return Err(CompileError::type_mismatch(
                            format!("argument of type {} is not iterable", other),
                            pos,
                        ))
                    }
                }
                Ok("in?".to_owned())
            }
            CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => {
                let symbol = match op {
                    CmpOp::Lt => "<",
                    CmpOp::LtE => "<=",
                    CmpOp::Gt => ">",
                    _ => ">=",
                };
                if t1.is_numeric() && t2.is_numeric() {
                    Ok(symbol.to_owned())
                } else if matches!(t1, Ty::Str) && matches!(t2, Ty::Str) {
                    Ok(format!("string{}?", symbol))
                } else {
                    Err(CompileError::type_mismatch(
                        format!("can not compare instances of types {} and {}", t1, t2),
                        pos,
                    ))
                }
            }
        }
    }

    fn lower_compare(
        &mut self,
        left: &Expr,
        ops: &[CmpOp],
        comparators: &[Expr],
        pos: Pos,
    ) -> Lower<(String, Ty)> {
        let (left_text, left_ty) = self.lower_expr(left)?;
        let (right_text, right_ty) = self.lower_expr(&comparators[0])?;
        let op_text = self.comparison_text(ops[0], &left_ty, &right_ty, pos)?;
        let mut ret = format!("({} {} {})", op_text, left_text, right_text);
        if ops.len() == 1 {
            return Ok((ret, Ty::Bool));
        }

        // a chain like a < b > c becomes a flattened (and (< a b) (> b c))
        for i in 1..ops.len() {
            let (lhs_text, lhs_ty) = self.lower_expr(&comparators[i - 1])?;
            let (rhs_text, rhs_ty) = self.lower_expr(&comparators[i])?;
            let op_text = self.comparison_text(ops[i], &lhs_ty, &rhs_ty, pos)?;
            ret.push_str(&format!("({} {} {})", op_text, lhs_text, rhs_text));
        }
        Ok((format!("(and {})", ret), Ty::Bool))
    }

    fn lower_list(&mut self, elts: &[Expr], _pos: Pos) -> Lower<(String, Ty)> {
        self.flags.set(BuildFlag::Gvector);
        let mut contained = Ty::Pending;
        let mut elements = Vec::new();
        for elt in elts {
            let (text, ty) = self.lower_expr(elt)?;
            elements.push(text);
            contained = self.merge_at(&contained, &ty, false, elt.pos())?;
        }
        if elements.is_empty() {
            Ok(("(gvector)".to_owned(), Ty::list(Ty::Pending)))
        } else {
            Ok((format!("(gvector {})", elements.join(" ")), Ty::list(contained)))
        }
    }

    fn lower_tuple(&mut self, elts: &[Expr], pos: Pos) -> Lower<(String, Ty)> {
        if elts.len() < 2 {
            return Err(CompileError::structural("A tuple requires two or more elements", pos));
        }
        let mut elements = Vec::new();
        let mut types_seen = Vec::new();
        for elt in elts {
            let (text, ty) = self.lower_expr(elt)?;
            elements.push(text);
            types_seen.push(ty);
        }
        Ok((format!("(vector-immutable {})", elements.join(" ")), Ty::Tuple(types_seen)))
    }

    fn lower_subscript(&mut self, value: &Expr, index: &Index, pos: Pos) -> Lower<(String, Ty)> {
        let (recv_text, recv_ty) = self.lower_expr(value)?;
        let Index::Single(index_expr) = index else {
            return Err(CompileError::unsupported("Advanced slicing is not yet implemented", pos));
        };
        match recv_ty {
            Ty::List(contained, _) => {
                self.flags.set(BuildFlag::Gvector);
                let len_expr = format!("(gvector-count {})", recv_text);
                let (index_text, _) = self.normalize_index(index_expr, &len_expr, pos)?;
                Ok((format!("(gvector-access {} {})", recv_text, index_text), (*contained).clone()))
            }
            Ty::Tuple(elements) => match literal_int(index_expr) {
                Some(index) => {
                    let len = elements.len() as i64;
                    if index >= len || index < -len {
                        return Err(CompileError::structural(
                            format!(
                                "Index '{}' is out of range for a tuple of length {}",
                                index, len
                            ),
                            pos,
                        ));
                    }
                    let slot = if index < 0 { (len + index) as usize } else { index as usize };
                    let text = if index < 0 {
                        format!(
                            "(vector-ref {} (- (vector-length {}) {}))",
                            recv_text, recv_text, -index
                        )
                    } else {
                        format!("(vector-ref {} {})", recv_text, index)
                    };
                    Ok((text, elements[slot].clone()))
                }
                None => {
                    // dynamic tuple indices are never bounds-checked at
                    // compile time and carry no element type guarantee
                    let (index_text, index_ty) = self.unresolved(|b| b.lower_expr(index_expr))?;
                    if !matches!(index_ty, Ty::Int) {
                        return Err(CompileError::type_mismatch(
                            format!(
                                "an instance of type {} can not be used to index into a tuple",
                                index_ty
                            ),
                            pos,
                        ));
                    }
                    let normalized = format!(
                        "(if (< {idx} 0) (- (vector-length {recv}) (- {idx})) {idx})",
                        idx = index_text,
                        recv = recv_text
                    );
                    Ok((format!("(vector-ref {} {})", recv_text, normalized), Ty::Any))
                }
            },
            other => Err(CompileError::type_mismatch(
                format!("value of type {} can not be subscripted", other),
                pos,
            )),
        }
    }

    /// Rewrites an index against the container's length: negative literals
    /// become `length - k` up front, and an index whose sign is unknown at
    /// compile time resolves through a runtime conditional.
    fn normalize_index(
        &mut self,
        index: &Expr,
        len_expr: &str,
        pos: Pos,
    ) -> Lower<(String, Option<i64>)> {
        match literal_int(index) {
            Some(k) if k < 0 => Ok((format!("(- {} {})", len_expr, -k), Some(k))),
            Some(k) => Ok((k.to_string(), Some(k))),
            None => {
                let (text, ty) = self.unresolved(|b| b.lower_expr(index))?;
                if !matches!(ty, Ty::Int) {
                    return Err(CompileError::type_mismatch(
                        format!("an instance of type {} can not be used to index into a list", ty),
                        pos,
                    ));
                }
                Ok((
                    format!("(if (< {idx} 0) (- {len} (- {idx})) {idx})", idx = text, len = len_expr),
                    None,
                ))
            }
        }
    }

    fn lower_if_exp(
        &mut self,
        test: &Expr,
        body: &Expr,
        orelse: &Expr,
        pos: Pos,
    ) -> Lower<(String, Ty)> {
        let (test_text, _) =
            self.scoped(|flags| &mut flags.resolve_truthy, true, |b| b.lower_expr(test))?;
        let (body_text, body_ty) = self.lower_expr(body)?;
        let (else_text, else_ty) = self.lower_expr(orelse)?;
        // both branches are equally authoritative
        let ty = self.merge_at(&body_ty, &else_ty, true, pos)?;
        Ok((format!("(if {} {} {})", test_text, body_text, else_text), ty))
    }

    fn lower_assert(&mut self, test: &Expr, msg: Option<&Expr>, _pos: Pos) -> Lower<String> {
        let (test_text, _) = self.lower_expr(test)?;
        let mut message = String::from("AssertionError");
        if let Some(msg) = msg {
            let (msg_text, msg_ty) = self.lower_expr(msg)?;
            let rendered = if matches!(msg_ty, Ty::Str)
                && msg_text.starts_with('"')
                && msg_text.ends_with('"')
            {
                msg_text[1..msg_text.len() - 1].to_owned()
            } else {
                msg_text
            };
            message.push_str(": ");
            message.push_str(&rendered);
        }
        Ok(format!("(unless {} (raise \"{}\" #t))", test_text, message))
    }
}

fn name_error(name: &str, pos: Pos) -> CompileError {
    CompileError::name(format!("name '{}' is not defined", name), pos)
}

/// The operands of a same-operator chain, gathered along the left spine so
/// explicit right-side groupings keep their meaning.
fn collect_chain<'e>(expr: &'e Expr, op: BinOpKind, out: &mut Vec<&'e Expr>) {
    if let Expr::BinOp { left, op: inner_op, right, .. } = expr {
        if *inner_op == op {
            collect_chain(left, op, out);
            out.push(right);
            return;
        }
    }
    out.push(expr);
}

fn literal_int(expr: &Expr) -> Option<i64> {
    match expr {
        Expr::Int { value, .. } => Some(*value),
        Expr::UnaryOp { op: UnaryOpKind::Neg, operand, .. } => match operand.as_ref() {
            Expr::Int { value, .. } => Some(-*value),
            _ => None,
        },
        Expr::UnaryOp { op: UnaryOpKind::Pos, operand, .. } => literal_int(operand),
        _ => None,
    }
}

/// The variable underlying an assignment target, through nested subscripts.
fn assign_base_name(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Name { name, .. } => Some(name),
        Expr::Subscript { value, .. } => assign_base_name(value),
        _ => None,
    }
}

fn alias_index(index: &Index, captured: &[String]) -> Index {
    match index {
        Index::Single(inner) => Index::Single(Box::new(alias_rewrite(inner, captured))),
        Index::Slice { lower, upper } => Index::Slice {
            lower: lower.as_ref().map(|e| Box::new(alias_rewrite(e, captured))),
            upper: upper.as_ref().map(|e| Box::new(alias_rewrite(e, captured))),
        },
    }
}

/// A copy of `expr` with every reference to a captured name redirected to its
/// deep-copied temporary.
fn alias_rewrite(expr: &Expr, captured: &[String]) -> Expr {
    match expr {
        Expr::Name { name, pos } if captured.iter().any(|c| c == name) => {
            Expr::Name { name: format!("___{}___", name), pos: *pos }
        }
        Expr::BinOp { left, op, right, pos } => Expr::BinOp {
            left: Box::new(alias_rewrite(left, captured)),
            op: *op,
            right: Box::new(alias_rewrite(right, captured)),
            pos: *pos,
        },
        Expr::UnaryOp { op, operand, pos } => Expr::UnaryOp {
            op: *op,
            operand: Box::new(alias_rewrite(operand, captured)),
            pos: *pos,
        },
        Expr::BoolOp { op, values, pos } => Expr::BoolOp {
            op: *op,
            values: values.iter().map(|v| alias_rewrite(v, captured)).collect(),
            pos: *pos,
        },
        Expr::Compare { left, ops, comparators, pos } => Expr::Compare {
            left: Box::new(alias_rewrite(left, captured)),
            ops: ops.clone(),
            comparators: comparators.iter().map(|c| alias_rewrite(c, captured)).collect(),
            pos: *pos,
        },
        Expr::Call { func, args, keywords, pos } => Expr::Call {
            func: Box::new(alias_rewrite(func, captured)),
            args: args.iter().map(|a| alias_rewrite(a, captured)).collect(),
            keywords: keywords
                .iter()
                .map(|k| Keyword {
                    name: k.name.clone(),
                    value: alias_rewrite(&k.value, captured),
                    pos: k.pos,
                })
                .collect(),
            pos: *pos,
        },
        Expr::Attribute { value, attr, pos } => Expr::Attribute {
            value: Box::new(alias_rewrite(value, captured)),
            attr: attr.clone(),
            pos: *pos,
        },
        Expr::Subscript { value, index, pos } => Expr::Subscript {
            value: Box::new(alias_rewrite(value, captured)),
            index: alias_index(index, captured),
            pos: *pos,
        },
        Expr::ListLit { elts, pos } => Expr::ListLit {
            elts: elts.iter().map(|e| alias_rewrite(e, captured)).collect(),
            pos: *pos,
        },
        Expr::TupleLit { elts, pos } => Expr::TupleLit {
            elts: elts.iter().map(|e| alias_rewrite(e, captured)).collect(),
            pos: *pos,
        },
        Expr::IfExp { test, body, orelse, pos } => Expr::IfExp {
            test: Box::new(alias_rewrite(test, captured)),
            body: Box::new(alias_rewrite(body, captured)),
            orelse: Box::new(alias_rewrite(orelse, captured)),
            pos: *pos,
        },
        other => other.clone(),
    }
}
