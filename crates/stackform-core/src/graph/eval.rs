// ── Expression evaluation ──
//
// Evaluates expressions against resolved variables, lookups, locals, and
// recorded resource state. Attributes of resources that have not applied
// yet (or are about to be replaced) evaluate to `Value::Unknown`, which
// propagates through every composite.

use std::collections::{BTreeMap, HashSet};

use crate::error::CoreError;
use crate::model::{Address, Expr, Value};
use crate::state::ResourceState;

pub struct EvalContext<'a> {
    pub variables: &'a BTreeMap<String, Value>,
    pub lookups: &'a BTreeMap<Address, Value>,
    pub locals: &'a BTreeMap<String, Value>,
    pub resources: &'a BTreeMap<Address, ResourceState>,
    /// Resources whose attributes are not yet known this run.
    pub pending: &'a HashSet<Address>,
}

impl EvalContext<'_> {
    pub fn eval(&self, expr: &Expr, context: &str) -> Result<Value, CoreError> {
        let fail = |message: String| CoreError::Evaluation {
            context: context.to_owned(),
            message,
        };

        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Var(name) => self
                .variables
                .get(name)
                .cloned()
                .ok_or_else(|| fail(format!("variable '{name}' is not resolved"))),
            Expr::Local(name) => self
                .locals
                .get(name)
                .cloned()
                .ok_or_else(|| fail(format!("local '{name}' is not resolved"))),
            Expr::Attr { target, attribute } => self.attribute(target, attribute, context),
            Expr::Concat(parts) => {
                let mut out = String::new();
                let mut sensitive = false;
                for part in parts {
                    let v = self.eval(part, context)?;
                    if !v.is_known() {
                        return Ok(Value::Unknown);
                    }
                    sensitive |= v.is_sensitive();
                    let s = v.interpolate().ok_or_else(|| {
                        fail(format!("cannot interpolate a {} into a string", v.type_name()))
                    })?;
                    out.push_str(&s);
                }
                Ok(if sensitive {
                    Value::sensitive(out)
                } else {
                    Value::String(out)
                })
            }
            Expr::List(items) => Ok(Value::List(
                items
                    .iter()
                    .map(|e| self.eval(e, context))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Map(map) => Ok(Value::Map(
                map.iter()
                    .map(|(k, e)| self.eval(e, context).map(|v| (k.clone(), v)))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Select {
                items,
                field,
                filter,
            } => {
                let items = self.eval(items, context)?;
                let allowed = match filter {
                    Some((key, allowed)) => {
                        let allowed = self.eval(allowed, context)?;
                        if !allowed.is_known() {
                            return Ok(Value::Unknown);
                        }
                        let list = allowed.as_list().ok_or_else(|| {
                            fail(format!("filter on '{key}' needs a list, got {}", allowed.type_name()))
                        })?;
                        Some((key, list.iter().filter_map(Value::interpolate).collect::<HashSet<_>>()))
                    }
                    None => None,
                };
                if !items.is_known() {
                    return Ok(Value::Unknown);
                }
                let list = items
                    .as_list()
                    .ok_or_else(|| fail(format!("selection needs a list, got {}", items.type_name())))?;

                let mut out = Vec::new();
                for item in list {
                    if let Some((key, allowed)) = &allowed {
                        let keep = item
                            .get(key)
                            .and_then(Value::interpolate)
                            .is_some_and(|v| allowed.contains(&v));
                        if !keep {
                            continue;
                        }
                    }
                    if let Some(v) = item.get(field) {
                        if !out.contains(v) {
                            out.push(v.clone());
                        }
                    }
                }
                Ok(Value::List(out))
            }
        }
    }

    /// Evaluate every attribute of a declaration, dropping nulls (an unset
    /// optional attribute is the same as an absent one).
    pub fn eval_attributes(
        &self,
        attributes: &BTreeMap<String, Expr>,
        owner: &Address,
    ) -> Result<BTreeMap<String, Value>, CoreError> {
        let mut out = BTreeMap::new();
        for (name, expr) in attributes {
            let v = self.eval(expr, &format!("{owner}.{name}"))?;
            if !v.is_null() {
                out.insert(name.clone(), v);
            }
        }
        Ok(out)
    }

    fn attribute(&self, target: &Address, attribute: &str, context: &str) -> Result<Value, CoreError> {
        match target {
            Address::Resource { .. } => {
                if self.pending.contains(target) {
                    return Ok(Value::Unknown);
                }
                let Some(state) = self.resources.get(target) else {
                    return Ok(Value::Unknown);
                };
                state
                    .attribute(attribute)
                    .cloned()
                    .ok_or_else(|| CoreError::UnknownAttribute {
                        address: target.clone(),
                        attribute: attribute.to_owned(),
                    })
            }
            Address::Data { .. } => {
                let resolved = self.lookups.get(target).ok_or_else(|| CoreError::Evaluation {
                    context: context.to_owned(),
                    message: format!("{target} is not resolved"),
                })?;
                resolved
                    .get(attribute)
                    .cloned()
                    .ok_or_else(|| CoreError::UnknownAttribute {
                        address: target.clone(),
                        attribute: attribute.to_owned(),
                    })
            }
            Address::Local(name) => self.eval(&Expr::Local(name.clone()), context),
        }
    }
}
