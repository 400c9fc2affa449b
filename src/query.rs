//! Mango-style selectors and index definitions.

use crate::persistence::{DESIGN_PREFIX, Document};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::borrow::Cow;
use std::cmp::Ordering;

/// Field conditions that must all hold for a document to match.
///
/// A condition is either a plain value (equality) or an object of operators:
/// `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$exists`. Field names
/// may be dotted paths into nested objects. Unknown operators never match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selector(Map<String, Value>);

impl Selector {
    /// Matches every live, non-design document.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and(field, value)
    }

    pub fn by_type(doc_type: &str) -> Self {
        Self::eq("type", doc_type)
    }

    pub fn by_id(id: &str) -> Self {
        Self::eq("_id", id)
    }

    /// Adds a condition; `condition` may be a plain value or an operator object.
    pub fn and(mut self, field: impl Into<String>, condition: impl Into<Value>) -> Self {
        self.0.insert(field.into(), condition.into());
        self
    }

    /// Top-level fields compared for plain equality, with the value they
    /// must equal. Every matching document satisfies all of them.
    pub(crate) fn equalities(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().filter_map(|(field, condition)| {
            if field.starts_with('_') || field.contains('.') {
                return None;
            }
            let expected = match condition {
                Value::Object(ops) if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) => {
                    ops.get("$eq")?
                }
                value => value,
            };
            match expected {
                Value::String(_) | Value::Number(_) | Value::Bool(_) => Some((field.as_str(), expected)),
                _ => None,
            }
        })
    }

    pub fn matches(&self, doc: &Document) -> bool {
        if doc.deleted || doc.is_design() {
            return false;
        }
        self.0
            .iter()
            .all(|(path, condition)| condition_holds(lookup(doc, path).as_deref(), condition))
    }
}

fn lookup<'a>(doc: &'a Document, path: &str) -> Option<Cow<'a, Value>> {
    match path {
        "_id" => return Some(Cow::Owned(Value::String(doc.id.clone()))),
        "_rev" => return doc.rev.clone().map(|rev| Cow::Owned(Value::String(rev))),
        _ => {}
    }
    let mut segments = path.split('.');
    let mut current = doc.body.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(Cow::Borrowed(current))
}

fn condition_holds(value: Option<&Value>, condition: &Value) -> bool {
    match condition {
        Value::Object(ops) if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) => {
            ops.iter().all(|(op, operand)| operator_holds(value, op, operand))
        }
        expected => value == Some(expected),
    }
}

fn operator_holds(value: Option<&Value>, op: &str, operand: &Value) -> bool {
    match op {
        "$exists" => operand.as_bool() == Some(value.is_some()),
        "$eq" => value == Some(operand),
        "$ne" => value != Some(operand),
        "$in" => match (value, operand.as_array()) {
            (Some(value), Some(candidates)) => candidates.contains(value),
            _ => false,
        },
        "$gt" => compare(value, operand) == Some(Ordering::Greater),
        "$gte" => matches!(compare(value, operand), Some(Ordering::Greater | Ordering::Equal)),
        "$lt" => compare(value, operand) == Some(Ordering::Less),
        "$lte" => matches!(compare(value, operand), Some(Ordering::Less | Ordering::Equal)),
        _ => false,
    }
}

fn compare(value: Option<&Value>, operand: &Value) -> Option<Ordering> {
    match (value?, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// A query index over one or more document fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub fields: Vec<String>,
}

impl IndexSpec {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: None,
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn index_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("idx-{}", self.fields.join("-")))
    }

    pub fn design_id(&self) -> String {
        format!("{DESIGN_PREFIX}{}", self.index_name())
    }

    pub fn to_design_document(&self) -> Document {
        Document::new(self.design_id())
            .with_field("language", "query")
            .with_field("index", json!({ "fields": self.fields }))
    }

    /// Whether `doc` already defines this index.
    pub fn is_defined_by(&self, doc: &Document) -> bool {
        !doc.deleted && doc.body.get("index") == Some(&json!({ "fields": self.fields }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member() -> Document {
        Document::new("member:7")
            .with_field("type", "member")
            .with_field("shares", 2)
            .with_field("address", json!({ "city": "Basel" }))
    }

    #[test]
    fn equality_and_nested_paths() {
        assert!(Selector::by_type("member").matches(&member()));
        assert!(Selector::eq("address.city", "Basel").matches(&member()));
        assert!(!Selector::eq("address.city", "Bern").matches(&member()));
        assert!(Selector::by_id("member:7").matches(&member()));
    }

    #[test]
    fn operators() {
        let doc = member();
        assert!(Selector::eq("shares", json!({ "$gte": 2, "$lt": 3 })).matches(&doc));
        assert!(!Selector::eq("shares", json!({ "$gt": 2 })).matches(&doc));
        assert!(Selector::eq("type", json!({ "$in": ["member", "season"] })).matches(&doc));
        assert!(Selector::eq("email", json!({ "$exists": false })).matches(&doc));
        assert!(Selector::eq("type", json!({ "$ne": "season" })).matches(&doc));
        assert!(!Selector::eq("type", json!({ "$regex": "m.*" })).matches(&doc));
    }

    #[test]
    fn equalities_cover_scalar_top_level_conditions() {
        let selector = Selector::by_type("member")
            .and("shares", json!({ "$eq": 2, "$lt": 5 }))
            .and("address.city", "Basel")
            .and("email", json!({ "$exists": true }))
            .and("nickname", Value::Null)
            .and("_id", "member:7");
        let mut found: Vec<(&str, &Value)> = selector.equalities().collect();
        found.sort_by_key(|(field, _)| *field);
        assert_eq!(found, vec![("shares", &json!(2)), ("type", &json!("member"))]);
    }

    #[test]
    fn design_and_deleted_documents_never_match() {
        let design = IndexSpec::new(["type"]).to_design_document();
        assert!(!Selector::all().matches(&design));
        let mut gone = member();
        gone.deleted = true;
        assert!(!Selector::all().matches(&gone));
    }
}
