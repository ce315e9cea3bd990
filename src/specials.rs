use std::sync::Arc;
use im::Vector;
use phf::phf_map;
use crate::{LispError, LispValue, Result, expect};
use crate::context::LispContext;
use crate::env::LispEnv;
use crate::eval::{eval, eval_body};
use crate::package::{KnownSymbols, LispSymbol};
use crate::util::{LispCons, LispFunc, LispSpecialForm};

pub(crate) static SPECIAL_FORMS: phf::Map<&'static str, LispSpecialForm> = phf_map! {
    "quote" => LispSpecialForm::Quote,
    "quasiquote" => LispSpecialForm::Quasiquote,
    "unquote" => LispSpecialForm::Unquote,
    "slice-unquote" => LispSpecialForm::SliceUnquote,
    "progn" => LispSpecialForm::Progn,
    "let" => LispSpecialForm::Let,
    "if" => LispSpecialForm::If,
    "lambda" => LispSpecialForm::Lambda,
    "gamma" => LispSpecialForm::Gamma,
};

pub(crate) fn eval_special(
    form: LispSpecialForm,
    args: Vector<LispValue>,
    env: &mut LispEnv,
    ctx: &mut LispContext,
) -> Result<LispValue> {
    match form {
        LispSpecialForm::Quote => special_quote(args),
        LispSpecialForm::Quasiquote => special_quasiquote(args, env, ctx),
        LispSpecialForm::Unquote => Err(LispError::OnlyInQuasiquote("unquote")),
        LispSpecialForm::SliceUnquote => Err(LispError::OnlyInQuasiquote("slice-unquote")),
        LispSpecialForm::Progn => eval_body(&args, env, ctx),
        LispSpecialForm::Let => special_let(args, env, ctx),
        LispSpecialForm::If => special_if(args, env, ctx),
        LispSpecialForm::Lambda => Ok(LispValue::Function(make_procedure(args, env)?)),
        LispSpecialForm::Gamma => Ok(LispValue::Macro(make_procedure(args, env)?)),
    }
}

fn special_quote(mut args: Vector<LispValue>) -> Result<LispValue> {
    expect!(args.len() == 1, LispError::IncorrectArguments(1, args.len()));
    let Some(arg) = args.pop_front() else { unreachable!() };
    Ok(arg)
}

fn special_let(mut args: Vector<LispValue>, env: &mut LispEnv, ctx: &mut LispContext) -> Result<LispValue> {
    expect!(!args.is_empty(), LispError::TooFewArguments(1, 0));
    let Some(clauses) = args.pop_front() else { unreachable!() };
    let clauses = clauses.try_into_vec()?;
    // every value is computed before any binding is visible
    let mut bindings = Vec::with_capacity(clauses.len());
    for clause in clauses.iter() {
        let parts = clause
            .try_into_vec()
            .map_err(|_| LispError::InvalidBinding(clause.to_string()))?;
        expect!(parts.len() == 2, LispError::InvalidBinding(clause.to_string()));
        let sym = parts[0].expect_symbol()?;
        bindings.push((sym, eval(&parts[1], env, ctx)?));
    }
    let mut scope = env.push_layer(bindings);
    eval_body(&args, &mut scope, ctx)
}

fn special_if(mut args: Vector<LispValue>, env: &mut LispEnv, ctx: &mut LispContext) -> Result<LispValue> {
    expect!(args.len() == 2 || args.len() == 3, LispError::ArgumentRange(2, 3, args.len()));
    let Some(pred) = args.pop_front() else { unreachable!() };
    if eval(&pred, env, ctx)?.truthiness() {
        eval(&args[0], env, ctx)
    } else if let Some(otherwise) = args.get(1) {
        eval(otherwise, env, ctx)
    } else {
        Ok(LispValue::Nil)
    }
}

/// Shared by `lambda` and `gamma`: `(params body...)` closed over `env`.
fn make_procedure(mut args: Vector<LispValue>, env: &LispEnv) -> Result<Arc<LispFunc>> {
    expect!(!args.is_empty(), LispError::TooFewArguments(1, 0));
    let Some(params) = args.pop_front() else { unreachable!() };
    let params = params
        .try_into_vec()?
        .iter()
        .map(LispValue::expect_symbol)
        .collect::<Result<Vec<LispSymbol>>>()?;
    Ok(Arc::new(LispFunc::User {
        name: None,
        params,
        body: args,
        closure: env.make_closure(),
    }))
}

fn special_quasiquote(args: Vector<LispValue>, env: &mut LispEnv, ctx: &mut LispContext) -> Result<LispValue> {
    expect!(args.len() == 1, LispError::IncorrectArguments(1, args.len()));
    let known = ctx.registry().known().clone();
    if let LispValue::Cons(cell) = &args[0] {
        expect!(cell.car != LispValue::Symbol(known.slice_unquote.clone()), LispError::SliceAtTopLevel);
    }
    let mut out = quasi(&args[0], 1, &known, env, ctx)?;
    expect!(out.len() == 1, LispError::SliceAtTopLevel);
    let Some(val) = out.pop() else { unreachable!() };
    Ok(val)
}

fn wrap(head: &LispSymbol, values: Vec<LispValue>) -> Vec<LispValue> {
    values
        .into_iter()
        .map(|val| LispValue::list_from([head.clone().into(), val]))
        .collect()
}

/// Rebuilds `value` at quasiquote nesting `level`. Each call yields the
/// values it contributes to the enclosing list: one for most forms, any
/// number for a `slice-unquote` that is due.
fn quasi(
    value: &LispValue,
    level: usize,
    known: &KnownSymbols,
    env: &mut LispEnv,
    ctx: &mut LispContext,
) -> Result<Vec<LispValue>> {
    let LispValue::Cons(cell) = value else {
        return Ok(vec![value.clone()]);
    };
    if let LispValue::Symbol(head) = &cell.car {
        let is_marker = [&known.quote, &known.quasiquote, &known.unquote, &known.slice_unquote]
            .contains(&head);
        if is_marker {
            let operands = cell.cdr.try_into_vec()?;
            expect!(operands.len() == 1, LispError::IncorrectArguments(1, operands.len()));
            let operand = &operands[0];
            return if *head == known.quote {
                Ok(wrap(head, quasi(operand, level, known, env, ctx)?))
            } else if *head == known.quasiquote {
                Ok(wrap(head, quasi(operand, level + 1, known, env, ctx)?))
            } else if level > 1 {
                Ok(wrap(head, quasi(operand, level - 1, known, env, ctx)?))
            } else if *head == known.unquote {
                Ok(vec![eval(operand, env, ctx)?])
            } else {
                Ok(eval(operand, env, ctx)?.try_into_vec()?.into_iter().collect())
            };
        }
    }
    let mut out = Vec::new();
    let mut cur = value;
    let tail = loop {
        let LispValue::Cons(cell) = cur else { break cur.clone() };
        // `(a . ,b)` reads as `(a unquote b)`
        if !std::ptr::eq(cur, value) && is_unquote_form(cell, known) {
            let splices = level == 1 && cell.car == LispValue::Symbol(known.slice_unquote.clone());
            expect!(!splices, LispError::SliceInDottedTail);
            let mut rebuilt = quasi(cur, level, known, env, ctx)?;
            expect!(rebuilt.len() == 1, LispError::SliceInDottedTail);
            let Some(tail) = rebuilt.pop() else { unreachable!() };
            break tail;
        }
        out.extend(quasi(&cell.car, level, known, env, ctx)?);
        cur = &cell.cdr;
    };
    Ok(vec![LispValue::list_with_tail(out, tail)])
}

fn is_unquote_form(cell: &LispCons, known: &KnownSymbols) -> bool {
    let LispValue::Symbol(head) = &cell.car else { return false };
    (*head == known.unquote || *head == known.slice_unquote)
        && matches!(&cell.cdr, LispValue::Cons(rest) if rest.cdr.is_nil())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_form_is_named() {
        assert_eq!(SPECIAL_FORMS.len(), 9);
        assert_eq!(SPECIAL_FORMS.get("gamma"), Some(&LispSpecialForm::Gamma));
        assert!(SPECIAL_FORMS.get("defun").is_none());
    }

    #[test]
    fn quasi_atoms_are_inert() {
        let mut ctx = LispContext::new();
        let mut env = LispEnv::new();
        let known = ctx.registry().known().clone();
        let x: LispValue = ctx.registry().intern("x").into();
        assert_eq!(quasi(&x, 1, &known, &mut env, &mut ctx).unwrap(), vec![x]);
        assert_eq!(
            quasi(&LispValue::Nil, 1, &known, &mut env, &mut ctx).unwrap(),
            vec![LispValue::Nil]
        );
    }

    #[test]
    fn quasi_keeps_improper_tail() {
        let mut ctx = LispContext::new();
        let out = ctx.eval_source("`(1 ,(+ 1 1) . 3)").unwrap();
        assert_eq!(out, LispValue::list_with_tail(vec![1.into(), 2.into()], 3.into()));
    }

    #[test]
    fn quasi_unquotes_dotted_tail() {
        let mut ctx = LispContext::new();
        let out = ctx.eval_source("`(1 . ,(+ 1 1))").unwrap();
        assert_eq!(out, LispValue::cons(1.into(), 2.into()));
        assert!(matches!(
            ctx.eval_source("`(1 . ,@'(2))"),
            Err(LispError::SliceInDottedTail)
        ));
    }
}
