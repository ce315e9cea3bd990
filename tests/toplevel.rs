mod common;
use common::*;

const PROGRAM: &str = r#"
    ; prints two lines, then fails
    (defun greet (name) (print name))
    (greet "hello")
    (greet 'world)
    (car (greet 5))
    (print "unreachable")
"#;

#[test]
fn abort_remaining_by_default() {
    let (mut ctx, out) = testing_context();
    assert_eq!(ctx.policy(), ErrorPolicy::AbortRemaining);
    ctx.run(PROGRAM).unwrap();
    assert_eq!(
        out.contents(),
        "hello\nworld\n5\nErr: invalid data type. expected cons, received 5\n"
    );
}

#[test]
fn continue_next_form() {
    let (ctx, out) = testing_context();
    let mut ctx = ctx.with_policy(ErrorPolicy::ContinueNextForm);
    ctx.run(PROGRAM).unwrap();
    assert!(out.contents().ends_with("received 5\nunreachable\n"));
}

#[test]
fn definitions_persist_between_runs() {
    let (mut ctx, out) = testing_context();
    ctx.run("(defun twice (x) (+ x x))").unwrap();
    ctx.run("(print (twice 21))").unwrap();
    assert_eq!(out.contents(), "42\n");
}

#[test]
fn reader_errors_are_reported() {
    let (mut ctx, out) = testing_context();
    ctx.run("(print \"abc)").unwrap();
    assert_eq!(
        out.contents(),
        "Err: unterminated string literal starting at line 1, column 8\n"
    );
    out.clear();
    ctx.run("\n  )").unwrap();
    assert_eq!(out.contents(), "Err: syntax error at line 2, column 3: unexpected ')'\n");
}

#[test]
fn string_escapes_print() {
    let (mut ctx, out) = testing_context();
    ctx.run(r#"(print "a\tb\bc\nd") (emit "e\"f\\")"#).unwrap();
    assert_eq!(out.contents(), "a\tb c\nd\ne\"f\\");
}

#[test]
fn emit_refuses_procedures() {
    let (mut ctx, out) = testing_context();
    ctx.run("(emit (lambda () 1))").unwrap();
    assert_eq!(out.contents(), "Err: a procedure cannot be emitted: #<function>\n");
}

#[test]
fn failed_let_does_not_leak_bindings() {
    let (ctx, out) = testing_context();
    let mut ctx = ctx.with_policy(ErrorPolicy::ContinueNextForm);
    ctx.run("(let ((x 1)) (let ((x 2)) (car 5))) (print x) (let ((x 3)) (print x))").unwrap();
    assert_eq!(
        out.contents(),
        "Err: invalid data type. expected cons, received 5\n\
         Err: the symbol `x` is not bound\n\
         3\n"
    );
}

#[test]
fn failed_call_does_not_leak_parameters() {
    let (ctx, out) = testing_context();
    let mut ctx = ctx.with_policy(ErrorPolicy::ContinueNextForm);
    ctx.run("(defun f (y) (car y)) (f 2) (print y) (print (f '(4)))").unwrap();
    assert_eq!(
        out.contents(),
        "Err: invalid data type. expected cons, received 2\n\
         Err: the symbol `y` is not bound\n\
         4\n"
    );
}
