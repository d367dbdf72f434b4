// Environment for variable bindings and scope management

use crate::values::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// A lexical scope in the evaluation tree. Cloning an `Env` clones the
/// handle, not the scope: every clone observes the same bindings.
#[derive(Clone)]
pub struct Env(Arc<Scope>);

struct Scope {
    parent: Option<Env>,
    bindings: RwLock<BTreeMap<String, Value>>,
}

impl Env {
    /// Creates a new, empty root scope.
    pub fn new() -> Self {
        Self::with_bindings(BTreeMap::new())
    }

    /// Creates a root scope pre-populated with `bindings`.
    pub fn with_bindings(bindings: BTreeMap<String, Value>) -> Self {
        Env(Arc::new(Scope {
            parent: None,
            bindings: RwLock::new(bindings),
        }))
    }

    /// Creates a new child scope that inherits from this one.
    pub fn child(&self) -> Self {
        Self::child_with(self, BTreeMap::new())
    }

    pub(crate) fn child_with(parent: &Env, bindings: BTreeMap<String, Value>) -> Self {
        Env(Arc::new(Scope {
            parent: Some(parent.clone()),
            bindings: RwLock::new(bindings),
        }))
    }

    pub fn parent(&self) -> Option<&Env> {
        self.0.parent.as_ref()
    }

    /// Looks up a name by searching this scope and then its parents.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut scope = Some(self);
        while let Some(env) = scope {
            if let Some(value) = env.read().get(name) {
                return Some(value.clone());
            }
            scope = env.parent();
        }
        None
    }

    /// Introduces (or shadows) a binding in this scope.
    pub fn declare(&self, name: &str, value: Value) {
        self.write().insert(name.to_string(), value);
    }

    /// Updates the nearest scope that binds `name`. Names bound nowhere land
    /// in the root scope, like assignments to an undeclared script variable.
    pub fn assign(&self, name: &str, value: Value) {
        let mut scope = self;
        loop {
            if scope.read().contains_key(name) {
                break;
            }
            match scope.parent() {
                Some(parent) => scope = parent,
                None => break,
            }
        }
        scope.write().insert(name.to_string(), value);
    }

    /// A copy of the bindings held directly by this scope.
    pub fn local_bindings(&self) -> BTreeMap<String, Value> {
        self.read().clone()
    }

    pub fn binding_count(&self) -> usize {
        self.read().len()
    }

    /// Identity of the underlying scope, stable for the lifetime of the scope.
    pub fn scope_id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub fn same_scope(&self, other: &Env) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    // Bindings are plain values, so a writer that panicked cannot leave them
    // half-updated; a poisoned lock is simply reclaimed.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Value>> {
        self.0.bindings.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Value>> {
        self.0.bindings.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// Scope chains are as deep as the program nests blocks; release parents one
// at a time while this drop holds the last handle instead of recursing.
impl Drop for Scope {
    fn drop(&mut self) {
        let mut parent = self.parent.take();
        while let Some(Env(scope)) = parent {
            parent = Arc::into_inner(scope).and_then(|mut scope| scope.parent.take());
        }
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut depth = 0;
        let mut scope = self.parent();
        while let Some(env) = scope {
            depth += 1;
            scope = env.parent();
        }
        f.debug_struct("Env")
            .field("bindings", &*self.read())
            .field("depth", &depth)
            .finish()
    }
}
