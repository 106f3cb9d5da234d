//! Policy table codec.
//!
//! # Purpose
//! Maps between a casbin model and the single serialized record stored under
//! the policy key, in both directions.
//!
//! # Record formats
//! - [`RecordFormat::Untagged`] (default, compatible with existing records):
//!   a JSON array of string arrays with no category tag. The category of a
//!   row is inferred from its length by [`classify`].
//! - [`RecordFormat::Tagged`] (opt-in): the same JSON shape, each row prefixed
//!   with its ptype (`"p"`, `"g"`, `"p2"`, ...).
//!
//! # Known limitation
//! Length-based classification cannot tell a two-field authorization rule
//! from a grouping rule, nor a three-field grouping rule from an
//! authorization rule. Changing the heuristic would reinterpret existing
//! records, so it is kept as is; such rules are reported with a warning at
//! save time and the tagged format is the way out.
use casbin::Model;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const AUTHORIZATION_PTYPE: &str = "p";
pub const GROUPING_PTYPE: &str = "g";

const SECTIONS: [&str; 2] = [AUTHORIZATION_PTYPE, GROUPING_PTYPE];

/// One rule's raw fields, without the category tag.
pub type Rule = Vec<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleCategory {
    Authorization,
    Grouping,
}

impl RuleCategory {
    pub fn ptype(self) -> &'static str {
        match self {
            RuleCategory::Authorization => AUTHORIZATION_PTYPE,
            RuleCategory::Grouping => GROUPING_PTYPE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFormat {
    #[default]
    Untagged,
    Tagged,
}

impl RecordFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordFormat::Untagged => "untagged",
            RecordFormat::Tagged => "tagged",
        }
    }
}

impl fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "untagged" => Ok(RecordFormat::Untagged),
            "tagged" => Ok(RecordFormat::Tagged),
            other => Err(format!("unknown record format {other:?}")),
        }
    }
}

/// Infer a row's category from its length: more than two fields is an
/// authorization rule, exactly two is a grouping rule. Shorter rows have no
/// category.
pub fn classify(fields: &[String]) -> Option<RuleCategory> {
    match fields.len() {
        0 | 1 => None,
        2 => Some(RuleCategory::Grouping),
        _ => Some(RuleCategory::Authorization),
    }
}

pub fn encode(rules: &[Rule]) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(rules)
}

/// Parse a stored value. Empty input and the JSON literal `null` are the
/// empty table.
pub fn decode(bytes: &[u8]) -> serde_json::Result<Vec<Rule>> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let rules: Option<Vec<Rule>> = serde_json::from_slice(bytes)?;
    Ok(rules.unwrap_or_default())
}

/// Map a stored row to the ptype it belongs to and the fields to insert.
pub fn route(mut row: Rule, format: RecordFormat) -> Option<(String, Rule)> {
    match format {
        RecordFormat::Untagged => {
            classify(&row).map(|category| (category.ptype().to_string(), row))
        }
        RecordFormat::Tagged => {
            if row.is_empty() {
                return None;
            }
            let ptype = row.remove(0);
            Some((ptype, row))
        }
    }
}

/// Append `fields` to the model under section `ptype[..1]`, type `ptype`.
///
/// An empty ptype is a no-op, as is a ptype the model does not declare.
/// Returns whether the model changed.
pub fn apply_to_model(ptype: &str, fields: Rule, model: &mut dyn Model) -> bool {
    let Some(sec) = ptype.get(..1) else {
        return false;
    };
    model.add_policy(sec, ptype, fields)
}

/// Build the table to store from the model's current rules.
pub fn table_from_model(model: &dyn Model, format: RecordFormat) -> Vec<Rule> {
    match format {
        RecordFormat::Untagged => untagged_table(model),
        RecordFormat::Tagged => tagged_table(model),
    }
}

fn untagged_table(model: &dyn Model) -> Vec<Rule> {
    for sec in SECTIONS {
        for ptype in declared_ptypes(model, sec) {
            if ptype != sec && !model.get_policy(sec, &ptype).is_empty() {
                tracing::warn!(%ptype, "ptype is not persisted by the untagged record format");
            }
        }
    }

    let authorizations = model.get_policy(AUTHORIZATION_PTYPE, AUTHORIZATION_PTYPE);
    let groupings = model.get_policy(GROUPING_PTYPE, GROUPING_PTYPE);
    warn_on_misclassified(&authorizations, RuleCategory::Authorization);
    warn_on_misclassified(&groupings, RuleCategory::Grouping);

    let mut rules = authorizations;
    rules.extend(groupings);
    rules
}

fn warn_on_misclassified(rules: &[Rule], category: RuleCategory) {
    for rule in rules {
        let reloaded = classify(rule);
        if reloaded != Some(category) {
            tracing::warn!(
                ptype = category.ptype(),
                fields = rule.len(),
                reloads_as = reloaded.map(RuleCategory::ptype).unwrap_or("nothing"),
                "rule shape is ambiguous in the untagged record format"
            );
        }
    }
}

fn tagged_table(model: &dyn Model) -> Vec<Rule> {
    let mut rules = Vec::new();
    for sec in SECTIONS {
        for ptype in declared_ptypes(model, sec) {
            for fields in model.get_policy(sec, &ptype) {
                let mut row = Vec::with_capacity(fields.len() + 1);
                row.push(ptype.clone());
                row.extend(fields);
                rules.push(row);
            }
        }
    }
    rules
}

fn declared_ptypes(model: &dyn Model, sec: &str) -> Vec<String> {
    let mut ptypes: Vec<String> = model
        .get_model()
        .get(sec)
        .map(|assertions| assertions.keys().cloned().collect())
        .unwrap_or_default();
    ptypes.sort();
    ptypes
}

/// Convert a stored table between record formats.
///
/// Rows that have no representation in the target format (degenerate rows,
/// and ptypes other than `p`/`g` when converting to untagged) are dropped.
pub fn retag(rules: Vec<Rule>, from: RecordFormat, to: RecordFormat) -> Vec<Rule> {
    if from == to {
        return rules;
    }
    rules
        .into_iter()
        .filter_map(|row| route(row, from))
        .filter_map(|(ptype, fields)| match to {
            RecordFormat::Tagged => {
                let mut row = Vec::with_capacity(fields.len() + 1);
                row.push(ptype);
                row.extend(fields);
                Some(row)
            }
            RecordFormat::Untagged => {
                if ptype == AUTHORIZATION_PTYPE || ptype == GROUPING_PTYPE {
                    Some(fields)
                } else {
                    tracing::warn!(%ptype, "dropping rule with no untagged representation");
                    None
                }
            }
        })
        .collect()
}

/// Casbin filter semantics: every non-empty filter value must equal the field
/// at the same position; a rule shorter than the filter never matches.
pub fn matches_filter(fields: &[String], filter: &[&str]) -> bool {
    if fields.len() < filter.len() {
        return false;
    }
    filter
        .iter()
        .zip(fields)
        .all(|(wanted, field)| wanted.is_empty() || wanted.trim() == field.trim())
}
