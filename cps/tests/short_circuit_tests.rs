// Logical operators: short-circuiting and deep nesting.

use cps::{
    BlockId, Builder, DefaultInvoker, DispatchTable, Env, Outcome, Program, SuspensionSnapshot,
    Trampoline, Value,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// An invoker exposing `touch()`, which counts its calls and returns `result`.
fn counting_invoker(result: bool) -> (DefaultInvoker, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let invoker = DefaultInvoker::new().with_function("touch", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Bool(result))
    });
    (invoker, calls)
}

fn run(program: Program, invoker: DefaultInvoker) -> Outcome {
    let trampoline = Trampoline::new(Arc::new(program), Arc::new(invoker));
    trampoline.run(trampoline.start(Env::new()))
}

fn logical(and: bool, lhs: bool) -> Program {
    let mut b = Builder::new();
    let l = b.constant(lhs);
    let r = b.call(None, "touch", vec![]);
    let root = if and { b.and(l, r) } else { b.or(l, r) };
    b.finish(root).expect("valid program")
}

#[test]
fn and_with_false_lhs_skips_rhs() {
    let (invoker, calls) = counting_invoker(true);
    let value = run(logical(true, false), invoker).completed();
    assert_eq!(value, Some(Value::Bool(false)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn or_with_true_lhs_skips_rhs() {
    let (invoker, calls) = counting_invoker(false);
    let value = run(logical(false, true), invoker).completed();
    assert_eq!(value, Some(Value::Bool(true)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn rhs_value_becomes_the_result_when_evaluated() {
    let (invoker, calls) = counting_invoker(false);
    let value = run(logical(true, true), invoker).completed();
    assert_eq!(value, Some(Value::Bool(false)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let (invoker, calls) = counting_invoker(true);
    let value = run(logical(false, false), invoker).completed();
    assert_eq!(value, Some(Value::Bool(true)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn operands_are_not_coerced_to_booleans() {
    let mut b = Builder::new();
    let l = b.constant("left");
    let r = b.constant(7i64);
    let root = b.and(l, r);
    let program = b.finish(root).expect("valid program");
    assert_eq!(run(program, DefaultInvoker::new()).completed(), Some(Value::Int(7)));
}

#[test]
fn failure_in_lhs_skips_rhs_and_propagates() {
    let (invoker, calls) = counting_invoker(true);
    let mut b = Builder::new();
    let l = b.local("undefined");
    let r = b.call(None, "touch", vec![]);
    let root = b.and(l, r);
    let program = b.finish(root).expect("valid program");

    let failure = run(program, invoker).failed().expect("failure");
    assert_eq!(failure.kind, cps::kinds::MISSING_VARIABLE);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn left_deep_chain_runs_in_constant_native_stack() {
    const DEPTH: usize = 100_000;
    let handle = std::thread::Builder::new()
        .stack_size(256 * 1024)
        .spawn(|| {
            let mut b = Builder::new();
            let mut acc: BlockId = b.constant(true);
            for _ in 0..DEPTH {
                let rhs = b.constant(true);
                acc = b.and(acc, rhs);
            }
            let program = b.finish(acc).expect("valid program");
            run(program, DefaultInvoker::new()).completed()
        })
        .expect("spawn");
    assert_eq!(handle.join().expect("no stack overflow"), Some(Value::Bool(true)));
}

#[test]
fn deeply_nested_negation_runs_in_constant_native_stack() {
    let handle = std::thread::Builder::new()
        .stack_size(256 * 1024)
        .spawn(|| {
            let mut b = Builder::new();
            let mut acc = b.constant(false);
            for _ in 0..50_001 {
                acc = b.not(acc);
            }
            let program = b.finish(acc).expect("valid program");
            run(program, DefaultInvoker::new()).completed()
        })
        .expect("spawn");
    assert_eq!(handle.join().expect("no stack overflow"), Some(Value::Bool(true)));
}

/// `yield "ask" && touch()` (or `||`): the lhs parks the run.
fn asking_lhs(and: bool) -> Arc<Program> {
    let mut b = Builder::new();
    let request = b.constant("ask");
    let l = b.yield_to_host(request);
    let r = b.call(None, "touch", vec![]);
    let root = if and { b.and(l, r) } else { b.or(l, r) };
    Arc::new(b.finish(root).expect("valid program"))
}

/// Suspends inside the lhs, persists the run as JSON, restores it on a fresh
/// trampoline and answers the suspension with `answer`.
fn resume_after_restart(and: bool, answer: bool) -> (Option<Value>, usize) {
    let program = asking_lhs(and);
    let json = {
        let (invoker, _) = counting_invoker(true);
        let t = Trampoline::new(Arc::clone(&program), Arc::new(invoker));
        let suspension = t.run(t.start(Env::new())).suspended().expect("suspended");
        assert_eq!(suspension.request, Value::from("ask"));
        SuspensionSnapshot::capture(&suspension).to_json().expect("encode")
    };

    let restored = SuspensionSnapshot::from_json(&json)
        .expect("decode")
        .restore(&DispatchTable::standard())
        .expect("restore");
    let (invoker, calls) = counting_invoker(!answer);
    let t = Trampoline::new(program, Arc::new(invoker));
    let value = t.run(restored.resume(answer)).completed();
    (value, calls.load(Ordering::SeqCst))
}

#[test]
fn and_decision_survives_a_restart_inside_lhs() {
    assert_eq!(resume_after_restart(true, false), (Some(Value::Bool(false)), 0));
    assert_eq!(resume_after_restart(true, true), (Some(Value::Bool(false)), 1));
}

#[test]
fn or_decision_survives_a_restart_inside_lhs() {
    assert_eq!(resume_after_restart(false, true), (Some(Value::Bool(true)), 0));
    assert_eq!(resume_after_restart(false, false), (Some(Value::Bool(true)), 1));
}
