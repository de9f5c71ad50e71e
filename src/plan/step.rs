//! Typed plan steps.
//!
//! Models are sloppy with key names and casing, so every step goes through
//! [`Step::from_json`], which normalizes aliases before the typed decode. Anything that
//! still does not decode becomes [`Step::Unrecognized`] instead of failing the plan.

use crate::dataset::Value;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value as JsonValue};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Filter,
    Aggregate,
    DeriveColumn,
    Sort,
    Chart,
    Select,
    Limit,
}

impl StepKind {
    pub const ALL: [StepKind; 7] = [
        StepKind::Filter,
        StepKind::Aggregate,
        StepKind::DeriveColumn,
        StepKind::Sort,
        StepKind::Chart,
        StepKind::Select,
        StepKind::Limit,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Filter => "filter",
            StepKind::Aggregate => "aggregate",
            StepKind::DeriveColumn => "derive_column",
            StepKind::Sort => "sort",
            StepKind::Chart => "chart",
            StepKind::Select => "select",
            StepKind::Limit => "limit",
        }
    }

    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            StepKind::Filter => &["where"],
            StepKind::Aggregate => &["metric", "agg", "group_by"],
            StepKind::DeriveColumn => &["derive", "compute", "add_column"],
            StepKind::Sort => &["order_by", "sort_by"],
            StepKind::Chart => &["plot", "visualize"],
            StepKind::Select => &["project", "columns"],
            StepKind::Limit => &["head", "take", "top"],
        }
    }

    /// Resolves a kind name case-insensitively; `-` and spaces count as `_`.
    pub fn parse(name: &str) -> Option<Self> {
        let normalized = name.trim().to_lowercase().replace(['-', ' '], "_");
        StepKind::ALL
            .into_iter()
            .find(|k| k.name() == normalized || k.aliases().contains(&normalized.as_str()))
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    #[serde(alias = "=", alias = "==", alias = "equals", alias = "is")]
    Eq,
    #[serde(alias = "!=", alias = "<>", alias = "neq", alias = "not_equals")]
    Ne,
    #[serde(alias = ">", alias = "greater_than")]
    Gt,
    #[serde(alias = ">=", alias = "ge")]
    Gte,
    #[serde(alias = "<", alias = "less_than")]
    Lt,
    #[serde(alias = "<=", alias = "le")]
    Lte,
    #[serde(alias = "like", alias = "includes")]
    Contains,
    #[serde(alias = "startswith")]
    StartsWith,
    #[serde(alias = "endswith")]
    EndsWith,
    #[serde(alias = "one_of")]
    In,
    #[serde(alias = "regex", alias = "match")]
    Matches,
    #[serde(alias = "null", alias = "is_empty")]
    IsNull,
    #[serde(alias = "is_not_null", alias = "not_empty")]
    NotNull,
}

/// Right-hand side of a condition: one value, or a list for `in`.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Scalar(Value),
    List(Vec<Value>),
}

impl Default for Operand {
    fn default() -> Self {
        Operand::Scalar(Value::Null)
    }
}

impl Serialize for Operand {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Operand::Scalar(v) => v.serialize(serializer),
            Operand::List(items) => items.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Operand {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match JsonValue::deserialize(deserializer)? {
            JsonValue::Array(items) => Operand::List(items.into_iter().map(Value::from).collect()),
            other => Operand::Scalar(Value::from(other)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub column: String,
    #[serde(alias = "operator")]
    pub op: CompareOp,
    #[serde(default)]
    pub value: Operand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combine {
    #[default]
    #[serde(alias = "and")]
    All,
    #[serde(alias = "or")]
    Any,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterStep {
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub combine: Combine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFn {
    #[serde(alias = "total")]
    Sum,
    #[serde(alias = "avg", alias = "average")]
    Mean,
    Count,
    #[serde(alias = "minimum")]
    Min,
    #[serde(alias = "maximum")]
    Max,
    Median,
    #[serde(alias = "count_distinct", alias = "nunique", alias = "unique")]
    DistinctCount,
}

impl AggFn {
    pub fn name(&self) -> &'static str {
        match self {
            AggFn::Sum => "sum",
            AggFn::Mean => "mean",
            AggFn::Count => "count",
            AggFn::Min => "min",
            AggFn::Max => "max",
            AggFn::Median => "median",
            AggFn::DistinctCount => "distinct_count",
        }
    }

    /// Whether the reduction only looks at numeric cells.
    pub fn is_numeric(&self) -> bool {
        matches!(self, AggFn::Sum | AggFn::Mean | AggFn::Min | AggFn::Max | AggFn::Median)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(rename = "fn", alias = "function", alias = "agg", alias = "aggregation", alias = "op")]
    pub func: AggFn,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
    #[serde(rename = "as", alias = "alias", alias = "name", default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl AggregateStep {
    /// `as` when given, else `{column}_{fn}`, else `row_count` for a bare count.
    pub fn output_name(&self) -> String {
        if let Some(alias) = self.alias.as_ref().filter(|a| !a.trim().is_empty()) {
            return alias.clone();
        }
        match &self.column {
            Some(column) => format!("{}_{}", column, self.func.name()),
            None if self.func == AggFn::Count => "row_count".to_string(),
            None => self.func.name().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeriveStep {
    #[serde(alias = "name", alias = "target", alias = "new_column")]
    pub column: String,
    #[serde(alias = "expr", alias = "formula")]
    pub expression: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    #[serde(alias = "ascending")]
    Asc,
    #[serde(alias = "descending")]
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    #[serde(default, alias = "direction")]
    pub order: SortOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortStep {
    pub by: Vec<SortKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    #[serde(alias = "column", alias = "bar_chart")]
    Bar,
    #[serde(alias = "line_chart")]
    Line,
    #[serde(alias = "point", alias = "scatter_plot")]
    Scatter,
    #[serde(alias = "donut", alias = "pie_chart")]
    Pie,
    Area,
    #[serde(alias = "hist")]
    Histogram,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartStep {
    #[serde(alias = "type", alias = "chart")]
    pub chart_type: ChartType,
    pub x: String,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub y: Vec<String>,
    #[serde(default, alias = "series", skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectStep {
    #[serde(deserialize_with = "one_or_many")]
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitStep {
    #[serde(alias = "n", alias = "limit", alias = "rows")]
    pub count: usize,
}

/// One operation of a plan.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Filter(FilterStep),
    Aggregate(AggregateStep),
    DeriveColumn(DeriveStep),
    Sort(SortStep),
    Chart(ChartStep),
    Select(SelectStep),
    Limit(LimitStep),
    /// Unknown kind or parameters that did not decode. Kept so the executor can report it.
    Unrecognized {
        kind: String,
        reason: String,
        raw: JsonValue,
    },
}

impl Step {
    pub fn kind(&self) -> Option<StepKind> {
        match self {
            Step::Filter(_) => Some(StepKind::Filter),
            Step::Aggregate(_) => Some(StepKind::Aggregate),
            Step::DeriveColumn(_) => Some(StepKind::DeriveColumn),
            Step::Sort(_) => Some(StepKind::Sort),
            Step::Chart(_) => Some(StepKind::Chart),
            Step::Select(_) => Some(StepKind::Select),
            Step::Limit(_) => Some(StepKind::Limit),
            Step::Unrecognized { .. } => None,
        }
    }

    /// Kind label for logs and warnings, including unrecognized kinds.
    pub fn kind_label(&self) -> String {
        match self {
            Step::Unrecognized { kind, .. } => kind.clone(),
            other => other.kind().map(|k| k.name().to_string()).unwrap_or_default(),
        }
    }

    /// Decodes one raw step. Never fails.
    pub fn from_json(raw: JsonValue) -> Step {
        if !raw.is_object() {
            return Step::Unrecognized {
                kind: String::new(),
                reason: "step is not a JSON object".to_string(),
                raw,
            };
        }
        let obj = raw.as_object().cloned().unwrap_or_default();

        let kind_name = ["kind", "type", "tool", "tool_name", "op", "operation", "action"]
            .iter()
            .find_map(|k| {
                obj.get(*k)
                    .and_then(|v| v.as_str())
                    .and_then(StepKind::parse)
                    .map(|kind| (*k, kind))
            });
        let Some((kind_key, kind)) = kind_name else {
            let label = obj
                .get("kind")
                .or_else(|| obj.get("type"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let reason = if label.is_empty() {
                "step has no kind".to_string()
            } else {
                format!("unsupported step kind '{}'", label)
            };
            return Step::Unrecognized { kind: label, reason, raw };
        };

        let mut params = obj.clone();
        params.remove(kind_key);
        params.remove("kind");
        // Some models nest parameters under "params"/"args".
        for nested in ["params", "args", "parameters"] {
            if let Some(JsonValue::Object(inner)) = params.remove(nested) {
                for (k, v) in inner {
                    params.entry(k).or_insert(v);
                }
            }
        }
        normalize_params(kind, &mut params);

        let decoded = match kind {
            StepKind::Filter => serde_json::from_value(JsonValue::Object(params)).map(Step::Filter),
            StepKind::Aggregate => serde_json::from_value(JsonValue::Object(params)).map(Step::Aggregate),
            StepKind::DeriveColumn => {
                serde_json::from_value(JsonValue::Object(params)).map(Step::DeriveColumn)
            }
            StepKind::Sort => serde_json::from_value(JsonValue::Object(params)).map(Step::Sort),
            StepKind::Chart => serde_json::from_value(JsonValue::Object(params)).map(Step::Chart),
            StepKind::Select => serde_json::from_value(JsonValue::Object(params)).map(Step::Select),
            StepKind::Limit => serde_json::from_value(JsonValue::Object(params)).map(Step::Limit),
        };

        decoded.unwrap_or_else(|e| Step::Unrecognized {
            kind: kind.name().to_string(),
            reason: format!("invalid {} parameters: {}", kind, e),
            raw,
        })
    }

    pub fn to_json(&self) -> JsonValue {
        let (kind, params) = match self {
            Step::Unrecognized { raw, .. } => return raw.clone(),
            Step::Filter(p) => (StepKind::Filter, serde_json::to_value(p)),
            Step::Aggregate(p) => (StepKind::Aggregate, serde_json::to_value(p)),
            Step::DeriveColumn(p) => (StepKind::DeriveColumn, serde_json::to_value(p)),
            Step::Sort(p) => (StepKind::Sort, serde_json::to_value(p)),
            Step::Chart(p) => (StepKind::Chart, serde_json::to_value(p)),
            Step::Select(p) => (StepKind::Select, serde_json::to_value(p)),
            Step::Limit(p) => (StepKind::Limit, serde_json::to_value(p)),
        };
        let mut out = Map::new();
        out.insert("kind".to_string(), json!(kind.name()));
        if let Ok(JsonValue::Object(fields)) = params {
            out.extend(fields);
        }
        JsonValue::Object(out)
    }
}

impl Serialize for Step {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Step {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        JsonValue::deserialize(deserializer).map(Step::from_json)
    }
}

/// Rewrites shorthand forms into the canonical parameter layout.
fn normalize_params(kind: StepKind, params: &mut Map<String, JsonValue>) {
    for key in ["op", "operator", "fn", "function", "agg", "aggregation", "order", "direction", "chart_type", "type", "chart", "combine"] {
        if let Some(JsonValue::String(s)) = params.get_mut(key) {
            *s = s.trim().to_lowercase().replace([' ', '-'], "_");
        }
    }

    match kind {
        StepKind::Filter => {
            if !params.contains_key("conditions") {
                if let Some(cond) = params.remove("condition") {
                    params.insert("conditions".to_string(), cond);
                } else if params.contains_key("column") {
                    let mut cond = Map::new();
                    for key in ["column", "op", "operator", "value"] {
                        if let Some(v) = params.remove(key) {
                            cond.insert(key.to_string(), v);
                        }
                    }
                    params.insert("conditions".to_string(), JsonValue::Array(vec![JsonValue::Object(cond)]));
                }
            }
            if let Some(JsonValue::Object(single)) = params.get("conditions").cloned() {
                params.insert("conditions".to_string(), JsonValue::Array(vec![JsonValue::Object(single)]));
            }
            if let Some(JsonValue::Array(conds)) = params.get_mut("conditions") {
                for cond in conds.iter_mut() {
                    if let JsonValue::Object(c) = cond {
                        for key in ["op", "operator"] {
                            if let Some(JsonValue::String(s)) = c.get_mut(key) {
                                *s = s.trim().to_lowercase().replace([' ', '-'], "_");
                            }
                        }
                    }
                }
            }
        }
        StepKind::Aggregate => {
            if !params.contains_key("group_by") {
                if let Some(by) = params.remove("by") {
                    params.insert("group_by".to_string(), by);
                }
            }
        }
        StepKind::Sort => {
            let step_level = params.clone();
            let by = match params.remove("by").or_else(|| params.remove("keys")) {
                Some(JsonValue::String(column)) => vec![sort_key(column, &step_level)],
                Some(JsonValue::Array(items)) => items
                    .into_iter()
                    .map(|item| match item {
                        JsonValue::String(column) => sort_key(column, &step_level),
                        JsonValue::Object(mut key) => {
                            for field in ["order", "direction"] {
                                if let Some(JsonValue::String(s)) = key.get_mut(field) {
                                    *s = s.trim().to_lowercase();
                                }
                            }
                            if let Some(desc) = key.remove("descending").and_then(|v| v.as_bool()) {
                                key.insert("order".to_string(), json!(if desc { "desc" } else { "asc" }));
                            }
                            JsonValue::Object(key)
                        }
                        other => other,
                    })
                    .collect(),
                Some(other) => vec![other],
                None => match params.remove("column") {
                    Some(JsonValue::String(column)) => vec![sort_key(column, &step_level)],
                    Some(other) => vec![other],
                    None => Vec::new(),
                },
            };
            params.clear();
            params.insert("by".to_string(), JsonValue::Array(by));
        }
        StepKind::Chart | StepKind::Select | StepKind::DeriveColumn => {}
        StepKind::Limit => {}
    }
}

/// Builds a sort key using the step-level `order` / `descending` flags.
fn sort_key(column: String, params: &Map<String, JsonValue>) -> JsonValue {
    let descending = params.get("descending").and_then(|v| v.as_bool()).unwrap_or(false)
        || params
            .get("order")
            .or_else(|| params.get("direction"))
            .and_then(|v| v.as_str())
            .map(|s| s.starts_with("desc"))
            .unwrap_or(false)
        || params.get("ascending").and_then(|v| v.as_bool()) == Some(false);
    json!({ "column": column, "order": if descending { "desc" } else { "asc" } })
}

/// Accepts either a single string or a list of strings.
fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_filter_is_normalized() {
        let step = Step::from_json(json!({"kind": "filter", "column": "a", "op": "EQ", "value": 1}));
        assert_eq!(
            step,
            Step::Filter(FilterStep {
                conditions: vec![Condition {
                    column: "a".to_string(),
                    op: CompareOp::Eq,
                    value: Operand::Scalar(Value::Number(1.0)),
                }],
                combine: Combine::All,
            })
        );
    }

    #[test]
    fn test_symbolic_operators_and_any_combine() {
        let step = Step::from_json(json!({
            "kind": "filter",
            "conditions": [
                {"column": "a", "operator": ">=", "value": 3},
                {"column": "b", "op": "contains", "value": "x"}
            ],
            "combine": "OR"
        }));
        let Step::Filter(filter) = step else { panic!("expected filter") };
        assert_eq!(filter.conditions[0].op, CompareOp::Gte);
        assert_eq!(filter.combine, Combine::Any);
    }

    #[test]
    fn test_aggregate_aliases_and_naming() {
        let step = Step::from_json(json!({"kind": "aggregate", "column": "x", "fn": "sum"}));
        let Step::Aggregate(agg) = step else { panic!("expected aggregate") };
        assert_eq!(agg.output_name(), "x_sum");

        let step = Step::from_json(json!({"type": "metric", "function": "AVG", "column": "price", "by": "region"}));
        let Step::Aggregate(agg) = step else { panic!("expected aggregate") };
        assert_eq!(agg.func, AggFn::Mean);
        assert_eq!(agg.group_by, vec!["region".to_string()]);
        assert_eq!(agg.output_name(), "price_mean");

        let count = AggregateStep { column: None, func: AggFn::Count, group_by: vec![], alias: None };
        assert_eq!(count.output_name(), "row_count");
    }

    #[test]
    fn test_sort_shorthands() {
        let step = Step::from_json(json!({"kind": "sort", "column": "a", "descending": true}));
        assert_eq!(
            step,
            Step::Sort(SortStep {
                by: vec![SortKey { column: "a".to_string(), order: SortOrder::Desc }]
            })
        );

        let step = Step::from_json(json!({"kind": "order_by", "by": ["a", {"column": "b", "order": "DESC"}]}));
        let Step::Sort(sort) = step else { panic!("expected sort") };
        assert_eq!(sort.by[0].order, SortOrder::Asc);
        assert_eq!(sort.by[1].order, SortOrder::Desc);
    }

    #[test]
    fn test_derive_kind_aliases() {
        for kind in ["derive", "derive-column", "derive_column", "Derive Column"] {
            let step = Step::from_json(json!({"kind": kind, "column": "c", "expression": "a + b"}));
            assert_eq!(step.kind(), Some(StepKind::DeriveColumn), "kind {}", kind);
        }
    }

    #[test]
    fn test_unknown_kind_and_bad_params_are_unrecognized() {
        let step = Step::from_json(json!({"kind": "pivot", "columns": ["a"]}));
        match step {
            Step::Unrecognized { kind, reason, .. } => {
                assert_eq!(kind, "pivot");
                assert!(reason.contains("unsupported"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let step = Step::from_json(json!({"kind": "chart", "chart_type": "radar", "x": "a"}));
        assert!(matches!(step, Step::Unrecognized { ref kind, .. } if kind == "chart"));

        assert!(matches!(Step::from_json(json!("sort")), Step::Unrecognized { .. }));
    }

    #[test]
    fn test_nested_params_are_flattened() {
        let step = Step::from_json(json!({"tool": "limit", "args": {"n": 3}}));
        assert_eq!(step, Step::Limit(LimitStep { count: 3 }));
    }

    #[test]
    fn test_canonical_json_decodes_to_same_step() {
        let steps = vec![
            Step::from_json(json!({"kind": "filter", "column": "a", "op": "in", "value": [1, 2]})),
            Step::from_json(json!({"kind": "chart", "type": "bar", "x": "region", "y": "total"})),
            Step::from_json(json!({"kind": "select", "columns": "a"})),
            Step::from_json(json!({"kind": "sort", "by": "a"})),
        ];
        for step in steps {
            assert!(step.kind().is_some(), "{:?}", step);
            assert_eq!(Step::from_json(step.to_json()), step);
        }
    }
}
