// Loops, failures, suspension and run control through the trampoline.

use cps::blocks::BinaryOp;
use cps::{
    kinds, Builder, CatchClause, DefaultInvoker, DispatchTable, Env, LoggingInvoker, Outcome,
    Program, SuspensionSnapshot, Trampoline, Value,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn trampoline(program: Program) -> Trampoline {
    Trampoline::new(Arc::new(program), Arc::new(DefaultInvoker::new()))
}

fn run(program: Program) -> Outcome {
    let t = trampoline(program);
    t.run(t.start(Env::new()))
}

/// i = 0; while (i < limit) { i = i + 1 }; i
fn counting_loop(limit: i64) -> Program {
    let mut b = Builder::new();
    let zero = b.constant(0i64);
    let init = b.declare("i", Some(zero));
    let i = b.local("i");
    let max = b.constant(limit);
    let cond = b.binary(BinaryOp::Lt, i, max);
    let i2 = b.local("i");
    let one = b.constant(1i64);
    let inc = b.binary(BinaryOp::Add, i2, one);
    let body = b.assign("i", inc);
    let looped = b.while_loop(cond, body);
    let result = b.local("i");
    let root = b.sequence(vec![init, looped, result]);
    b.finish(root).expect("valid program")
}

#[test]
fn while_loop_counts_to_its_limit() {
    assert_eq!(run(counting_loop(25)).completed(), Some(Value::Int(25)));
}

#[test]
fn catch_binds_the_failure_and_finally_always_runs() {
    let mut b = Builder::new();
    let no = b.constant(false);
    let cleaned = b.declare("cleaned", Some(no));
    let boom = b.constant("boom");
    let body = b.throw(boom);
    let e = b.local("e");
    let message = b.property(e, "message");
    let yes = b.constant(true);
    let finally = b.assign("cleaned", yes);
    let guarded = b.try_catch(
        body,
        vec![CatchClause {
            kind: None,
            var: "e".to_string(),
            body: message,
        }],
        Some(finally),
    );
    let caught = b.declare("caught", Some(guarded));
    let c = b.local("caught");
    let slash = b.constant("/");
    let joined = b.binary(BinaryOp::Add, c, slash);
    let flag = b.local("cleaned");
    let summary = b.binary(BinaryOp::Add, joined, flag);
    let root = b.sequence(vec![cleaned, caught, summary]);
    let program = b.finish(root).expect("valid program");

    assert_eq!(run(program).completed(), Some(Value::from("boom/true")));
}

#[test]
fn unmatched_catch_kind_lets_failure_escape_after_finally() {
    let mut b = Builder::new();
    let one = b.constant(1i64);
    let zero = b.constant(0i64);
    let body = b.binary(BinaryOp::Div, one, zero);
    let handled = b.constant("handled");
    let cleanup = b.constant("cleanup");
    let marker = b.assign("ran_finally", cleanup);
    let root = b.try_catch(
        body,
        vec![CatchClause {
            kind: Some(kinds::MISSING_VARIABLE.to_string()),
            var: "e".to_string(),
            body: handled,
        }],
        Some(marker),
    );
    let program = b.finish(root).expect("valid program");

    let env = Env::new();
    let t = trampoline(program);
    let failure = t.run(t.start(env.clone())).failed().expect("escaped");
    assert_eq!(failure.kind, kinds::DIVISION_BY_ZERO);
    assert_eq!(env.lookup("ran_finally"), Some(Value::from("cleanup")));
}

#[test]
fn property_store_writes_the_updated_receiver_back() {
    let mut b = Builder::new();
    let empty = b.constant(Value::Map(Default::default()));
    let decl = b.declare("config", Some(empty));
    let value = b.constant(3i64);
    let store = b.set_property("config", "retries", value);
    let config = b.local("config");
    let read = b.property(config, "retries");
    let root = b.sequence(vec![decl, store, read]);
    let program = b.finish(root).expect("valid program");

    assert_eq!(run(program).completed(), Some(Value::Int(3)));
}

#[test]
fn internal_calls_are_recorded_by_the_logging_invoker() {
    let mut b = Builder::new();
    let arg = b.constant("x");
    let root = b.call(None, "echo", vec![arg]);
    let program = b.finish(root).expect("valid program");
    let invoker = LoggingInvoker::new(
        DefaultInvoker::new().with_function("echo", |args| Ok(args[0].clone())),
    );
    let calls = invoker.calls();
    let t = Trampoline::new(Arc::new(program), Arc::new(invoker));

    assert_eq!(t.run(t.start(Env::new())).completed(), Some(Value::from("x")));
    assert_eq!(*calls.lock().expect("log"), vec!["Script.echo".to_string()]);
}

/// total = 10; answer = yield "need-input"; total + answer
fn asking_program() -> Program {
    let mut b = Builder::new();
    let ten = b.constant(10i64);
    let total = b.declare("total", Some(ten));
    let request = b.constant("need-input");
    let asked = b.yield_to_host(request);
    let answer = b.declare("answer", Some(asked));
    let t = b.local("total");
    let a = b.local("answer");
    let sum = b.binary(BinaryOp::Add, t, a);
    let root = b.sequence(vec![total, answer, sum]);
    b.finish(root).expect("valid program")
}

#[test]
fn suspended_run_resumes_in_place() {
    let t = trampoline(asking_program());
    let suspension = t.run(t.start(Env::new())).suspended().expect("suspended");
    assert_eq!(suspension.request, Value::from("need-input"));
    assert_eq!(t.run(suspension.resume(32i64)).completed(), Some(Value::Int(42)));
}

#[test]
fn suspended_run_resumes_from_a_persisted_snapshot() {
    let program = Arc::new(asking_program());
    let json = {
        let t = Trampoline::new(Arc::clone(&program), Arc::new(DefaultInvoker::new()));
        let suspension = t.run(t.start(Env::new())).suspended().expect("suspended");
        SuspensionSnapshot::capture(&suspension).to_json().expect("encode")
    };

    let restored = SuspensionSnapshot::from_json(&json)
        .expect("decode")
        .restore(&DispatchTable::standard())
        .expect("restore");
    let t = Trampoline::new(program, Arc::new(DefaultInvoker::new()));
    assert_eq!(t.run(restored.resume(5i64)).completed(), Some(Value::Int(15)));
}

#[test]
fn resuming_with_a_failure_reaches_enclosing_handlers() {
    let mut b = Builder::new();
    let request = b.constant("fetch");
    let body = b.yield_to_host(request);
    let e = b.local("e");
    let kind = b.property(e, "kind");
    let root = b.try_catch(
        body,
        vec![CatchClause {
            kind: None,
            var: "e".to_string(),
            body: kind,
        }],
        None,
    );
    let t = trampoline(b.finish(root).expect("valid program"));
    let suspension = t.run(t.start(Env::new())).suspended().expect("suspended");
    let step = suspension.resume_with_failure(cps::Failure::new("Timeout", "no answer"));
    assert_eq!(t.run(step).completed(), Some(Value::from("Timeout")));
}

#[test]
fn cancellation_is_observed_between_steps() {
    let t = trampoline(counting_loop(1_000));
    t.cancel_token().cancel();
    assert!(matches!(t.run(t.start(Env::new())), Outcome::Cancelled));
}

#[test]
fn budget_pauses_the_run_and_the_remaining_step_finishes_it() {
    let t = trampoline(counting_loop(50)).with_budget(100);
    let mut step = t.start(Env::new());
    let mut pauses = 0;
    let value = loop {
        match t.run(step) {
            Outcome::OutOfBudget(next) => {
                pauses += 1;
                step = next;
            }
            other => break other.completed(),
        }
    };
    assert!(pauses > 0);
    assert_eq!(value, Some(Value::Int(50)));
}

#[test]
fn unregistered_continuation_type_is_an_engine_fault() {
    let t = trampoline(counting_loop(1)).with_table(Arc::new(DispatchTable::new()));
    let failure = t.run(t.start(Env::new())).failed().expect("fault");
    assert_eq!(failure.kind, kinds::ENGINE_FAULT);
}

#[test]
fn deeply_nested_scopes_run_and_drop_in_constant_native_stack() {
    let handle = std::thread::Builder::new()
        .stack_size(256 * 1024)
        .spawn(|| {
            let mut b = Builder::new();
            let mut acc = b.constant(true);
            for _ in 0..100_000 {
                acc = b.scope(acc);
            }
            run(b.finish(acc).expect("valid program")).completed()
        })
        .expect("spawn");
    assert_eq!(handle.join().expect("no stack overflow"), Some(Value::Bool(true)));
}
