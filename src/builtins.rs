use std::sync::Arc;
use im::Vector;
use crate::{LispError, LispValue, Result, expect};
use crate::backend::Register;
use crate::context::LispContext;
use crate::env::LispEnv;
use crate::eval::{eval, macroexpand_1};
use crate::package::{LispPackage, PackageRegistry};
use crate::specials::SPECIAL_FORMS;
use crate::util::{LispBuiltinFunc, LispFunc, LispProcedure};

fn lisp_plus(args: Vector<LispValue>, _env: &mut LispEnv, _ctx: &mut LispContext) -> Result<LispValue> {
    let mut sum: i64 = 0;
    for arg in args.iter() {
        sum = sum.checked_add(arg.expect_integer()?).ok_or(LispError::IntegerOverflow)?;
    }
    Ok(sum.into())
}

fn lisp_print(mut args: Vector<LispValue>, _env: &mut LispEnv, ctx: &mut LispContext) -> Result<LispValue> {
    expect!(args.len() == 1, LispError::IncorrectArguments(1, args.len()));
    let Some(val) = args.pop_front() else { unreachable!() };
    writeln!(ctx.output(), "{}", val)?;
    Ok(val)
}

fn lisp_inspect(args: Vector<LispValue>, _env: &mut LispEnv, _ctx: &mut LispContext) -> Result<LispValue> {
    expect!(args.len() == 1, LispError::IncorrectArguments(1, args.len()));
    Ok(args[0].inspect().into())
}

fn lisp_typep(args: Vector<LispValue>, _env: &mut LispEnv, ctx: &mut LispContext) -> Result<LispValue> {
    expect!(args.len() == 2, LispError::IncorrectArguments(2, args.len()));
    let kind = args[1].expect_symbol()?;
    Ok(ctx.truth(args[0].type_test(kind.name())))
}

fn lisp_car(args: Vector<LispValue>, _env: &mut LispEnv, _ctx: &mut LispContext) -> Result<LispValue> {
    expect!(args.len() == 1, LispError::IncorrectArguments(1, args.len()));
    Ok(args[0].expect_cons()?.car.clone())
}

fn lisp_cdr(args: Vector<LispValue>, _env: &mut LispEnv, _ctx: &mut LispContext) -> Result<LispValue> {
    expect!(args.len() == 1, LispError::IncorrectArguments(1, args.len()));
    Ok(args[0].expect_cons()?.cdr.clone())
}

fn lisp_eq(args: Vector<LispValue>, _env: &mut LispEnv, ctx: &mut LispContext) -> Result<LispValue> {
    expect!(args.len() == 2, LispError::IncorrectArguments(2, args.len()));
    Ok(ctx.truth(args[0].is_eq(&args[1])))
}

fn lisp_eql(args: Vector<LispValue>, _env: &mut LispEnv, ctx: &mut LispContext) -> Result<LispValue> {
    expect!(args.len() == 2, LispError::IncorrectArguments(2, args.len()));
    let a = args[0].expect_integer()?;
    let b = args[1].expect_integer()?;
    Ok(ctx.truth(a == b))
}

fn lisp_setq(args: Vector<LispValue>, env: &mut LispEnv, _ctx: &mut LispContext) -> Result<LispValue> {
    expect!(args.len() == 2, LispError::IncorrectArguments(2, args.len()));
    let sym = args[0].expect_symbol()?;
    let val = args[1].clone();
    if !env.set(&sym, val.clone()) {
        sym.set_dynamic(val.clone())?;
    }
    Ok(val)
}

fn lisp_eval(args: Vector<LispValue>, env: &mut LispEnv, ctx: &mut LispContext) -> Result<LispValue> {
    expect!(args.len() == 1, LispError::IncorrectArguments(1, args.len()));
    eval(&args[0], env, ctx)
}

fn lisp_macroexpand_1(args: Vector<LispValue>, env: &mut LispEnv, ctx: &mut LispContext) -> Result<LispValue> {
    expect!(args.len() == 1, LispError::IncorrectArguments(1, args.len()));
    macroexpand_1(&args[0], env, ctx)
}

fn lisp_set_symbol_function(args: Vector<LispValue>, _env: &mut LispEnv, _ctx: &mut LispContext) -> Result<LispValue> {
    expect!(args.len() == 2, LispError::IncorrectArguments(2, args.len()));
    let sym = args[0].expect_symbol()?;
    // anonymous closures take the name they are first installed under
    let (procedure, val) = match &args[1] {
        LispValue::Function(f) => {
            let f = LispFunc::named(f, sym.name());
            (LispProcedure::Function(f.clone()), LispValue::Function(f))
        },
        LispValue::Macro(m) => {
            let m = LispFunc::named(m, sym.name());
            (LispProcedure::Macro(m.clone()), LispValue::Macro(m))
        },
        other => return Err(other.type_error("procedure")),
    };
    sym.set_function(procedure);
    Ok(val)
}

fn lisp_set_symbol_package(args: Vector<LispValue>, _env: &mut LispEnv, _ctx: &mut LispContext) -> Result<LispValue> {
    expect!(args.len() == 2, LispError::IncorrectArguments(2, args.len()));
    let sym = args[0].expect_symbol()?;
    let package = args[1].expect_package()?;
    sym.set_package(package);
    Ok(args[1].clone())
}

fn lisp_make_package(args: Vector<LispValue>, _env: &mut LispEnv, _ctx: &mut LispContext) -> Result<LispValue> {
    expect!(args.len() == 1, LispError::IncorrectArguments(1, args.len()));
    Ok(LispPackage::new(args[0].expect_string()?).into())
}

fn check_emittable(val: &LispValue) -> Result<()> {
    match val {
        LispValue::Function(_) | LispValue::Macro(_) => Err(LispError::CannotEmit(val.to_string())),
        LispValue::Cons(_) => {
            let (items, tail) = val.split_tail();
            items.iter().try_for_each(check_emittable)?;
            check_emittable(&tail)
        },
        _ => Ok(()),
    }
}

fn lisp_emit(mut args: Vector<LispValue>, _env: &mut LispEnv, ctx: &mut LispContext) -> Result<LispValue> {
    expect!(args.len() == 1, LispError::IncorrectArguments(1, args.len()));
    let Some(val) = args.pop_front() else { unreachable!() };
    check_emittable(&val)?;
    write!(ctx.emitter(), "{}", val)?;
    Ok(val)
}

fn lisp_mov(args: Vector<LispValue>, _env: &mut LispEnv, ctx: &mut LispContext) -> Result<LispValue> {
    expect!(args.len() == 2, LispError::IncorrectArguments(2, args.len()));
    let reg = Register::from_name(args[0].expect_symbol()?.name())?;
    let imm = args[1].expect_integer()?;
    ctx.backend()?.mov_immediate(reg, imm)?;
    Ok(LispValue::Nil)
}

fn lisp_syscall(args: Vector<LispValue>, _env: &mut LispEnv, ctx: &mut LispContext) -> Result<LispValue> {
    expect!(args.is_empty(), LispError::IncorrectArguments(0, args.len()));
    ctx.backend()?.syscall()?;
    Ok(LispValue::Nil)
}

/// `(name params body...)` to
/// `(set-symbol-function (quote name) (lambda params body...))`, or `gamma`
/// in place of `lambda` for `defmacro`.
fn define_form(mut args: Vector<LispValue>, ctx: &LispContext, gamma: bool) -> Result<LispValue> {
    expect!(args.len() >= 2, LispError::TooFewArguments(2, args.len()));
    let Some(name) = args.pop_front() else { unreachable!() };
    name.expect_symbol()?;
    let known = ctx.registry().known();
    let constructor = if gamma { &known.gamma } else { &known.lambda };
    args.push_front(constructor.clone().into());
    Ok(LispValue::list_from([
        known.set_symbol_function.clone().into(),
        LispValue::list_from([known.quote.clone().into(), name]),
        args.into(),
    ]))
}

fn lisp_defun(args: Vector<LispValue>, _env: &mut LispEnv, ctx: &mut LispContext) -> Result<LispValue> {
    define_form(args, ctx, false)
}

fn lisp_defmacro(args: Vector<LispValue>, _env: &mut LispEnv, ctx: &mut LispContext) -> Result<LispValue> {
    define_form(args, ctx, true)
}

const BUILTIN_FUNCTIONS: &[(&str, LispBuiltinFunc)] = &[
    ("+", lisp_plus),
    ("print", lisp_print),
    ("inspect", lisp_inspect),
    ("typep", lisp_typep),
    ("car", lisp_car),
    ("cdr", lisp_cdr),
    ("eq", lisp_eq),
    ("eql", lisp_eql),
    ("setq", lisp_setq),
    ("eval", lisp_eval),
    ("macroexpand-1", lisp_macroexpand_1),
    ("set-symbol-function", lisp_set_symbol_function),
    ("set-symbol-package", lisp_set_symbol_package),
    ("make-package", lisp_make_package),
    ("emit", lisp_emit),
    ("mov", lisp_mov),
    ("syscall", lisp_syscall),
];

const BUILTIN_MACROS: &[(&str, LispBuiltinFunc)] = &[
    ("defun", lisp_defun),
    ("defmacro", lisp_defmacro),
];

macro_rules! lisp_func {
    ($name:expr, $f:expr) => { Arc::new(LispFunc::Builtin { name: $name, f: $f }) }
}

/// Installs every special form, builtin and global binding in the root
/// package of `registry`.
pub(crate) fn bootstrap(registry: &PackageRegistry) {
    let known = registry.known();
    known.t.push_dynamic(known.t.clone().into());
    known.nil.push_dynamic(LispValue::Nil);
    known.current_package.push_dynamic(registry.root().clone().into());
    // `alma::name` always reaches the root package
    registry.intern(registry.root().name()).set_package(registry.root().clone());

    for (name, form) in SPECIAL_FORMS.entries() {
        registry.intern(name).set_function(LispProcedure::Special(*form));
    }
    for &(name, f) in BUILTIN_FUNCTIONS {
        registry.intern(name).set_function(LispProcedure::Function(lisp_func!(name, f)));
    }
    for &(name, f) in BUILTIN_MACROS {
        registry.intern(name).set_function(LispProcedure::Macro(lisp_func!(name, f)));
    }
}
