// ── Stack definitions ──
//
// A stack is an ordered set of declarations. Declaration order is
// significant: it breaks ties in the apply order and orders error reports.

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use secrecy::SecretString;

use super::address::Address;
use super::decl::{LocalDecl, LookupDecl, OutputDecl, ResourceDecl, VariableDecl};
use super::value::{Sensitive, Value};
use crate::error::CoreError;

#[derive(Debug, Clone, Default)]
pub struct StackDefinition {
    pub name: String,
    pub variables: IndexMap<String, VariableDecl>,
    pub lookups: IndexMap<Address, LookupDecl>,
    pub locals: IndexMap<String, LocalDecl>,
    pub resources: IndexMap<Address, ResourceDecl>,
    pub outputs: IndexMap<String, OutputDecl>,
}

impl StackDefinition {
    pub fn builder(name: impl Into<String>) -> StackBuilder {
        StackBuilder {
            stack: StackDefinition {
                name: name.into(),
                ..Default::default()
            },
            duplicates: Vec::new(),
        }
    }

    /// Whether `address` names a declared resource, lookup, or local.
    pub fn declares(&self, address: &Address) -> bool {
        match address {
            Address::Resource { .. } => self.resources.contains_key(address),
            Address::Data { .. } => self.lookups.contains_key(address),
            Address::Local(name) => self.locals.contains_key(name),
        }
    }
}

/// Accumulates declarations; duplicates are reported by [`build`](Self::build).
pub struct StackBuilder {
    stack: StackDefinition,
    duplicates: Vec<String>,
}

impl StackBuilder {
    pub fn variable(mut self, decl: VariableDecl) -> Self {
        if self.stack.variables.contains_key(&decl.name) {
            self.duplicates.push(format!("var.{}", decl.name));
        }
        self.stack.variables.insert(decl.name.clone(), decl);
        self
    }

    pub fn lookup(mut self, decl: LookupDecl) -> Self {
        if self.stack.lookups.contains_key(&decl.address) {
            self.duplicates.push(decl.address.to_string());
        }
        self.stack.lookups.insert(decl.address.clone(), decl);
        self
    }

    pub fn local(mut self, decl: LocalDecl) -> Self {
        if self.stack.locals.contains_key(&decl.name) {
            self.duplicates.push(format!("local.{}", decl.name));
        }
        self.stack.locals.insert(decl.name.clone(), decl);
        self
    }

    pub fn resource(mut self, decl: ResourceDecl) -> Self {
        if self.stack.resources.contains_key(&decl.address) {
            self.duplicates.push(decl.address.to_string());
        }
        self.stack.resources.insert(decl.address.clone(), decl);
        self
    }

    pub fn output(mut self, decl: OutputDecl) -> Self {
        if self.stack.outputs.contains_key(&decl.name) {
            self.duplicates.push(format!("output.{}", decl.name));
        }
        self.stack.outputs.insert(decl.name.clone(), decl);
        self
    }

    pub fn build(self) -> Result<StackDefinition, CoreError> {
        match self.duplicates.into_iter().next() {
            Some(address) => Err(CoreError::DuplicateDeclaration { address }),
            None => Ok(self.stack),
        }
    }
}

// ── Variable bindings ───────────────────────────────────────────────

/// Caller-supplied variable values. `Debug` lists names only.
#[derive(Clone, Default, PartialEq)]
pub struct VariableBindings {
    values: BTreeMap<String, Value>,
}

impl VariableBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set_secret(&mut self, name: impl Into<String>, secret: SecretString) {
        self.values
            .insert(name.into(), Value::Sensitive(Sensitive::from(secret)));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl fmt::Debug for VariableBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}
