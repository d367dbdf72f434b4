//! Compiled workflow scripts.
//!
//! A [`Script`] pairs an immutable compiled [`Program`] with the mutable
//! state one run works on: the binding (the script's root scope) and the
//! script fields (a scope below the binding). The program is shared freely;
//! the state is deep-copied by [`Script::clone_script`], so runs never see
//! each other's writes.

use crate::error::CompileError;
use crate::execution::FlowExecution;
use cps::{Continuation, Env, Invoker, Outcome, Program, Step, Trampoline, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Variables supplied by the caller, visible to the whole script.
pub type Binding = BTreeMap<String, Value>;

pub struct Script {
    name: String,
    program: Arc<Program>,
    binding: Env,
    fields: Env,
    execution: Option<Arc<FlowExecution>>,
}

impl Script {
    pub fn new(name: impl Into<String>, program: Program) -> Self {
        let binding = Env::new();
        let fields = binding.child();
        Script {
            name: name.into(),
            program: Arc::new(program),
            binding,
            fields,
            execution: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn binding(&self) -> &Env {
        &self.binding
    }

    pub fn fields(&self) -> &Env {
        &self.fields
    }

    pub fn execution(&self) -> Option<&Arc<FlowExecution>> {
        self.execution.as_ref()
    }

    pub fn set_field(&self, name: &str, value: impl Into<Value>) {
        self.fields.declare(name, value.into());
    }

    pub fn bind(mut self, execution: Arc<FlowExecution>) -> Self {
        self.execution = Some(execution);
        self
    }

    /// A copy sharing only the compiled program. `binding` becomes the new
    /// root scope and the fields are copied by value.
    pub fn clone_script(&self, binding: Binding, execution: Option<Arc<FlowExecution>>) -> Script {
        let root = Env::with_bindings(binding);
        let fields = root.child();
        for (name, value) in self.fields.local_bindings() {
            fields.declare(&name, value);
        }
        Script {
            name: self.name.clone(),
            program: Arc::clone(&self.program),
            binding: root,
            fields,
            execution,
        }
    }

    /// The first step of a run. Statements execute in the fields scope.
    pub fn start(&self) -> Step {
        Step::eval(self.program.root(), self.fields.clone(), Continuation::halt())
    }

    pub fn trampoline(&self, invoker: Arc<dyn Invoker>) -> Trampoline {
        Trampoline::new(Arc::clone(&self.program), invoker)
    }

    /// Runs the script to completion or to its first suspension.
    pub fn run(&self, invoker: Arc<dyn Invoker>) -> Outcome {
        let trampoline = self.trampoline(invoker);
        let outcome = trampoline.run(self.start());
        tracing::debug!(script = %self.name, "run finished: {}", describe(&outcome));
        outcome
    }
}

fn describe(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Completed(value) => format!("completed with {}", value),
        Outcome::Failed(failure) => format!("failed with {}", failure),
        Outcome::Suspended(suspension) => format!("suspended on {}", suspension.request),
        Outcome::Cancelled => "cancelled".to_string(),
        Outcome::OutOfBudget(_) => "out of budget".to_string(),
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("name", &self.name)
            .field("blocks", &self.program.len())
            .field("fields", &self.fields.local_bindings())
            .field("execution", &self.execution.as_ref().map(|e| e.id()))
            .finish()
    }
}

/// Reference front-end: decodes a JSON-encoded program arena.
pub fn compile_json(name: &str, text: &str) -> Result<Script, CompileError> {
    let program: Program = serde_json::from_str(text)?;
    program.validate()?;
    Ok(Script::new(name, program))
}
