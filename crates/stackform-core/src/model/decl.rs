// ── Declarations ──
//
// The typed building blocks of a stack: variables, lookups, locals,
// resources, and outputs. Each is constructed with a small fluent API so
// stack modules read like configuration.

use std::collections::BTreeMap;
use std::fmt;

use super::address::Address;
use super::expr::{Expr, Reference};
use super::kind::{LookupKind, ResourceKind};
use super::value::Value;

// ── Variables ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    String,
    Number,
    Bool,
    List,
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Bool => "bool",
            Self::List => "list",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDecl {
    pub name: String,
    pub var_type: VarType,
    pub description: String,
    /// `None` with `nullable == false` means the variable is required.
    pub default: Option<Value>,
    pub nullable: bool,
    pub sensitive: bool,
}

impl VariableDecl {
    pub fn new(name: impl Into<String>, var_type: VarType) -> Self {
        Self {
            name: name.into(),
            var_type,
            description: String::new(),
            default: None,
            nullable: false,
            sensitive: false,
        }
    }

    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Optional; resolves to null when unset.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none() && !self.nullable
    }
}

// ── Lookups ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Exactly one match; the lookup resolves to that item's attributes.
    One,
    /// One or more matches; the lookup resolves to `{ ids, items }`.
    Many,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LookupDecl {
    pub address: Address,
    pub kind: LookupKind,
    pub filters: Vec<(String, Expr)>,
    pub cardinality: Cardinality,
}

impl LookupDecl {
    pub fn one(kind: LookupKind, name: impl Into<String>) -> Self {
        Self::new(kind, name, Cardinality::One)
    }

    pub fn many(kind: LookupKind, name: impl Into<String>) -> Self {
        Self::new(kind, name, Cardinality::Many)
    }

    fn new(kind: LookupKind, name: impl Into<String>, cardinality: Cardinality) -> Self {
        Self {
            address: Address::data(kind, name),
            kind,
            filters: Vec::new(),
            cardinality,
        }
    }

    pub fn filter(mut self, name: impl Into<String>, value: Expr) -> Self {
        self.filters.push((name.into(), value));
        self
    }

    pub fn references(&self) -> Vec<Reference> {
        let mut out: Vec<Reference> = Vec::new();
        for (_, e) in &self.filters {
            for r in e.references() {
                if !out.contains(&r) {
                    out.push(r);
                }
            }
        }
        out
    }

    pub fn describe_filters(&self) -> String {
        self.filters
            .iter()
            .map(|(k, v)| format!("{k} = {}", v.describe()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// ── Locals ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct LocalDecl {
    pub name: String,
    pub expr: Expr,
    /// An empty list result fails the build instead of flowing downstream.
    pub non_empty: bool,
}

impl LocalDecl {
    pub fn new(name: impl Into<String>, expr: Expr) -> Self {
        Self {
            name: name.into(),
            expr,
            non_empty: false,
        }
    }

    pub fn non_empty(mut self) -> Self {
        self.non_empty = true;
        self
    }

    pub fn address(&self) -> Address {
        Address::local(self.name.clone())
    }
}

// ── Resources ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lifecycle {
    pub create_before_destroy: bool,
    pub ignore_changes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDecl {
    pub address: Address,
    pub kind: ResourceKind,
    pub attributes: BTreeMap<String, Expr>,
    pub depends_on: Vec<Address>,
    pub lifecycle: Lifecycle,
}

impl ResourceDecl {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            address: Address::resource(kind, name),
            kind,
            attributes: BTreeMap::new(),
            depends_on: Vec::new(),
            lifecycle: Lifecycle::default(),
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: Expr) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn depends_on(mut self, address: &Address) -> Self {
        self.depends_on.push(address.clone());
        self
    }

    pub fn create_before_destroy(mut self) -> Self {
        self.lifecycle.create_before_destroy = true;
        self
    }

    pub fn ignore_changes(mut self, attribute: impl Into<String>) -> Self {
        self.lifecycle.ignore_changes.push(attribute.into());
        self
    }

    pub fn name(&self) -> &str {
        self.address.name()
    }

    /// Attribute references, keyed by the attribute holding them.
    pub fn references(&self) -> Vec<(String, Reference)> {
        let mut out = Vec::new();
        for (attr, e) in &self.attributes {
            for r in e.references() {
                out.push((attr.clone(), r));
            }
        }
        out
    }
}

// ── Outputs ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct OutputDecl {
    pub name: String,
    pub expr: Expr,
    pub description: String,
    pub sensitive: bool,
}

impl OutputDecl {
    pub fn new(name: impl Into<String>, expr: Expr) -> Self {
        Self {
            name: name.into(),
            expr,
            description: String::new(),
            sensitive: false,
        }
    }

    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }
}
