//! Schema driven planning.
//!
//! Resources in this provider never plan by hand. The planned state is derived
//! from the resource schema:
//!
//! - unset attributes with a static default take the default
//! - computed values that are not known until apply are planned as `null`
//! - `UseStateForUnknown` computed attributes keep their prior value
//! - computed attributes keep their prior value when nothing else changes
//! - a changed `RequiresReplace` attribute forces replacement

use serde_json::{Map, Value};

use crate::schema::{Attribute, Block, PlanModifier, Schema};
use crate::types::{AttributeChange, PlanResult};

/// Plan a resource change.
///
/// `prior` is `None` for a create and `proposed` is `None` for a destroy.
pub fn plan_resource(schema: &Schema, prior: Option<&Value>, proposed: Option<&Value>) -> PlanResult {
    let prior = prior.and_then(Value::as_object);
    match proposed.and_then(Value::as_object) {
        None => plan_destroy(schema, prior),
        Some(proposed) => match prior {
            None => plan_create(schema, proposed),
            Some(prior) => plan_update(schema, prior, proposed),
        },
    }
}

fn plan_create(schema: &Schema, proposed: &Map<String, Value>) -> PlanResult {
    let planned = plan_object(&schema.block, None, proposed, true);
    let changes = diff(&schema.block, None, &planned);
    PlanResult::with_changes(Value::Object(planned), changes, false)
}

fn plan_update(schema: &Schema, prior: &Map<String, Value>, proposed: &Map<String, Value>) -> PlanResult {
    let mut planned = plan_object(&schema.block, Some(prior), proposed, false);
    if diff(&schema.block, Some(prior), &planned).is_empty() {
        return PlanResult::no_change(Value::Object(planned));
    }

    // something changes, so computed values without a modifier become unknown
    planned = plan_object(&schema.block, Some(prior), proposed, true);
    let changes = diff(&schema.block, Some(prior), &planned);
    let requires_replace = schema.block.attribute_names().into_iter().any(|name| {
        let attr = &schema.block.attributes[name];
        attr.has_modifier(PlanModifier::RequiresReplace)
            && non_null(prior.get(name)) != non_null(planned.get(name))
    });

    PlanResult::with_changes(Value::Object(planned), changes, requires_replace)
}

fn plan_destroy(schema: &Schema, prior: Option<&Map<String, Value>>) -> PlanResult {
    let changes = match prior {
        Some(prior) => diff(&schema.block, Some(prior), &Map::new()),
        None => Vec::new(),
    };
    PlanResult::with_changes(Value::Null, changes, false)
}

fn plan_object(
    block: &Block,
    prior: Option<&Map<String, Value>>,
    proposed: &Map<String, Value>,
    mark_unknown: bool,
) -> Map<String, Value> {
    let mut planned = Map::new();

    for name in block.attribute_names() {
        let attr = &block.attributes[name];
        let prior_value = non_null(prior.and_then(|p| p.get(name)));
        let configured = if attr.is_computed_only() {
            None
        } else {
            non_null(proposed.get(name))
        };

        let value = match configured {
            Some(v) => v.clone(),
            None => plan_unset(attr, prior_value, mark_unknown),
        };
        planned.insert(name.to_string(), value);
    }

    for name in block.block_names() {
        let nested = &block.blocks[name];
        let value = match proposed.get(name) {
            Some(Value::Object(obj)) => {
                let prior_block = prior.and_then(|p| p.get(name)).and_then(Value::as_object);
                Value::Object(plan_object(&nested.block, prior_block, obj, mark_unknown))
            },
            Some(v) => v.clone(),
            None => Value::Null,
        };
        planned.insert(name.to_string(), value);
    }

    planned
}

fn plan_unset(attr: &Attribute, prior_value: Option<&Value>, mark_unknown: bool) -> Value {
    if let Some(default) = &attr.default {
        return default.clone();
    }
    if !attr.flags.computed {
        return Value::Null;
    }
    if attr.has_modifier(PlanModifier::UseStateForUnknown) || !mark_unknown {
        return prior_value.cloned().unwrap_or(Value::Null);
    }
    Value::Null
}

fn diff(block: &Block, prior: Option<&Map<String, Value>>, planned: &Map<String, Value>) -> Vec<AttributeChange> {
    let mut names = block.attribute_names();
    names.extend(block.block_names());
    names.sort_unstable();

    names
        .into_iter()
        .filter_map(|name| {
            let before = non_null(prior.and_then(|p| p.get(name)));
            let after = non_null(planned.get(name));
            if before == after {
                None
            } else {
                Some(AttributeChange::new(name, before.cloned(), after.cloned()))
            }
        })
        .collect()
}

fn non_null(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}
