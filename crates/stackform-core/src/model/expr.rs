// ── Expressions ──
//
// Attribute values are expression trees. References are typed nodes, so
// dependency edges are collected by walking the tree rather than scanning
// strings.

use std::collections::BTreeMap;

use super::address::Address;
use super::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// `var.<name>`
    Var(String),
    /// `<address>.<attribute>` on a resource or lookup.
    Attr { target: Address, attribute: String },
    /// `local.<name>`
    Local(String),
    /// String interpolation of the parts, in order.
    Concat(Vec<Expr>),
    List(Vec<Expr>),
    Map(BTreeMap<String, Expr>),
    /// Project `field` out of every map in `items`, keeping only maps whose
    /// `key` attribute is one of `allowed` when a filter is given.
    Select {
        items: Box<Expr>,
        field: String,
        filter: Option<(String, Box<Expr>)>,
    },
}

/// Something an expression depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reference {
    Var(String),
    Node {
        target: Address,
        attribute: Option<String>,
    },
}

impl Reference {
    pub fn describe(&self) -> String {
        match self {
            Self::Var(name) => format!("var.{name}"),
            Self::Node {
                target,
                attribute: Some(attr),
            } => format!("{target}.{attr}"),
            Self::Node { target, .. } => target.to_string(),
        }
    }
}

impl Expr {
    // ── Constructors ────────────────────────────────────────────────

    pub fn lit(v: impl Into<Value>) -> Self {
        Self::Literal(v.into())
    }

    pub fn null() -> Self {
        Self::Literal(Value::Null)
    }

    pub fn var(name: impl Into<String>) -> Self {
        Self::Var(name.into())
    }

    pub fn attr(target: &Address, attribute: impl Into<String>) -> Self {
        Self::Attr {
            target: target.clone(),
            attribute: attribute.into(),
        }
    }

    pub fn local(name: impl Into<String>) -> Self {
        Self::Local(name.into())
    }

    pub fn concat(parts: impl IntoIterator<Item = Expr>) -> Self {
        Self::Concat(parts.into_iter().collect())
    }

    pub fn list(items: impl IntoIterator<Item = Expr>) -> Self {
        Self::List(items.into_iter().collect())
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Expr)>) -> Self {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn select(items: Expr, field: impl Into<String>) -> Self {
        Self::Select {
            items: Box::new(items),
            field: field.into(),
            filter: None,
        }
    }

    pub fn select_where(
        items: Expr,
        field: impl Into<String>,
        key: impl Into<String>,
        allowed: Expr,
    ) -> Self {
        Self::Select {
            items: Box::new(items),
            field: field.into(),
            filter: Some((key.into(), Box::new(allowed))),
        }
    }

    // ── Analysis ────────────────────────────────────────────────────

    /// Every reference in this tree, in first-seen order, deduplicated.
    pub fn references(&self) -> Vec<Reference> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect(&self, out: &mut Vec<Reference>) {
        let reference = match self {
            Self::Literal(_) => return,
            Self::Var(name) => Reference::Var(name.clone()),
            Self::Local(name) => Reference::Node {
                target: Address::local(name.clone()),
                attribute: None,
            },
            Self::Attr { target, attribute } => Reference::Node {
                target: target.clone(),
                attribute: Some(attribute.clone()),
            },
            Self::Concat(parts) | Self::List(parts) => {
                for p in parts {
                    p.collect(out);
                }
                return;
            }
            Self::Map(map) => {
                for v in map.values() {
                    v.collect(out);
                }
                return;
            }
            Self::Select { items, filter, .. } => {
                items.collect(out);
                if let Some((_, allowed)) = filter {
                    allowed.collect(out);
                }
                return;
            }
        };
        if !out.contains(&reference) {
            out.push(reference);
        }
    }

    /// Human-readable rendering, used for lookup filter descriptions.
    pub fn describe(&self) -> String {
        match self {
            Self::Literal(v) => v.to_string(),
            Self::Var(name) => format!("var.{name}"),
            Self::Local(name) => format!("local.{name}"),
            Self::Attr { target, attribute } => format!("{target}.{attribute}"),
            Self::Concat(parts) => parts.iter().map(Expr::describe).collect::<Vec<_>>().join(" + "),
            Self::List(items) => format!(
                "[{}]",
                items.iter().map(Expr::describe).collect::<Vec<_>>().join(", ")
            ),
            Self::Map(_) => "{...}".to_owned(),
            Self::Select {
                items,
                field,
                filter: None,
            } => format!("{}[*].{field}", items.describe()),
            Self::Select {
                items,
                field,
                filter: Some((key, allowed)),
            } => format!(
                "{}[{key} in {}].{field}",
                items.describe(),
                allowed.describe()
            ),
        }
    }
}

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Self::Literal(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LookupKind, ResourceKind};

    #[test]
    fn references_are_collected_from_nested_trees() {
        let lb = Address::resource(ResourceKind::AwsLb, "shared");
        let e = Expr::map([
            ("url", Expr::concat([Expr::lit("http://"), Expr::attr(&lb, "dns_name")])),
            ("again", Expr::attr(&lb, "dns_name")),
            ("region", Expr::var("region")),
            ("subnets", Expr::local("gpu_subnet_ids")),
        ]);
        let refs = e.references();
        assert_eq!(refs.len(), 3);
        assert!(refs.contains(&Reference::Var("region".into())));
        assert!(refs.contains(&Reference::Node {
            target: lb,
            attribute: Some("dns_name".into())
        }));
    }

    #[test]
    fn select_describes_filter() {
        let private = Address::data(LookupKind::AwsSubnets, "private");
        let e = Expr::select_where(
            Expr::attr(&private, "items"),
            "id",
            "availability_zone",
            Expr::local("gpu_zones"),
        );
        assert_eq!(
            e.describe(),
            "data.aws_subnets.private.items[availability_zone in local.gpu_zones].id"
        );
        assert_eq!(e.references().len(), 2);
    }
}
