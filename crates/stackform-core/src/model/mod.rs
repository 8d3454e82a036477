// ── Stack model ──
//
// Addresses, values, expressions, and the declarations a stack is built
// from. Nothing here talks to a platform.

pub mod address;
pub mod decl;
pub mod expr;
pub mod kind;
pub mod stack;
pub mod value;

pub use address::{Address, AddressParseError};
pub use decl::{
    Cardinality, Lifecycle, LocalDecl, LookupDecl, OutputDecl, ResourceDecl, VarType,
    VariableDecl,
};
pub use expr::{Expr, Reference};
pub use kind::{LookupKind, ResourceKind};
pub use stack::{StackBuilder, StackDefinition, VariableBindings};
pub use value::{Sensitive, Value};
