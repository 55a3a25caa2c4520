//! Declarative record normalization
//!
//! Mapping rules turn one raw provider record into a [`NormalizedRow`]. Missing or
//! malformed fields degrade to null (or the rule's default); only a missing natural key
//! rejects the record.

use super::types::{NormalizedRow, Value};
use serde_json::Value as Json;
use std::collections::BTreeMap;

/// Parameters attached to every record of a request unit (e.g. the KPI id in the URL)
pub type UnitParams = BTreeMap<String, String>;

/// One raw record from a provider payload
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub data: Json,
    pub params: UnitParams,
}

impl SourceRecord {
    pub fn new(data: Json) -> Self {
        Self {
            data,
            params: UnitParams::new(),
        }
    }

    pub fn with_params(data: Json, params: UnitParams) -> Self {
        Self { data, params }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
    /// Name of the first key of an object, in document order
    FirstKey,
}

/// Dotted path into a JSON record: `name.common`, `car.signs[0]`, `currencies.$key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    pub fn parse(path: &str) -> Self {
        let mut segments = Vec::new();
        for part in path.split('.').filter(|p| !p.is_empty()) {
            if part == "$key" {
                segments.push(PathSegment::FirstKey);
                continue;
            }
            let (name, mut rest) = match part.find('[') {
                Some(idx) => (&part[..idx], &part[idx..]),
                None => (part, ""),
            };
            if !name.is_empty() {
                segments.push(PathSegment::Key(name.to_string()));
            }
            while let Some(stripped) = rest.strip_prefix('[') {
                let Some(end) = stripped.find(']') else {
                    // Unterminated index; treat the remainder as a literal key
                    segments.push(PathSegment::Key(rest.to_string()));
                    break;
                };
                match stripped[..end].trim().parse::<usize>() {
                    Ok(idx) => segments.push(PathSegment::Index(idx)),
                    Err(_) => segments.push(PathSegment::Key(stripped[..end].to_string())),
                }
                rest = &stripped[end + 1..];
            }
        }
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Walk the path. Any missing step yields `None`.
    pub fn resolve(&self, root: &Json) -> Option<Value> {
        let mut current = root;
        for (pos, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Key(key) => current = current.as_object()?.get(key)?,
                PathSegment::Index(idx) => current = current.as_array()?.get(*idx)?,
                PathSegment::FirstKey => {
                    let first = current.as_object()?.keys().next()?;
                    // A key name is a leaf; nothing can follow it
                    return if pos + 1 == self.0.len() {
                        Some(Value::Text(first.clone()))
                    } else {
                        None
                    };
                }
            }
        }
        Some(Value::from_json(current))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Extract {
    Path(FieldPath),
    /// Text concatenation of two paths; null when `head` is missing
    Combine { head: FieldPath, tail: FieldPath },
    /// Value of a unit parameter
    Param(String),
    Const(Value),
}

impl Extract {
    fn apply(&self, record: &SourceRecord) -> Value {
        match self {
            Self::Path(path) => path.resolve(&record.data).unwrap_or(Value::Null),
            Self::Combine { head, tail } => {
                let head = match head.resolve(&record.data) {
                    Some(v) if !v.is_blank() => v.key_text(),
                    _ => return Value::Null,
                };
                let tail = match tail.resolve(&record.data) {
                    Some(v) if !v.is_null() => v.key_text(),
                    _ => String::new(),
                };
                Value::Text(format!("{}{}", head, tail))
            }
            Self::Param(name) => record
                .params
                .get(name)
                .map(|v| Value::Text(v.clone()))
                .unwrap_or(Value::Null),
            Self::Const(value) => value.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    pub column: String,
    pub extract: Extract,
    /// Used when extraction yields null
    pub default: Value,
}

/// Column rules plus the columns forming the natural key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingRules {
    rules: Vec<FieldRule>,
    natural_key: Vec<String>,
}

impl MappingRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a natural key column from a record path
    pub fn key(mut self, column: &str, path: &str) -> Self {
        self.natural_key.push(column.to_string());
        self.push(column, Extract::Path(FieldPath::parse(path)))
    }

    /// Map a natural key column from a unit parameter
    pub fn key_param(mut self, column: &str, param: &str) -> Self {
        self.natural_key.push(column.to_string());
        self.push(column, Extract::Param(param.to_string()))
    }

    pub fn field(self, column: &str, path: &str) -> Self {
        self.push(column, Extract::Path(FieldPath::parse(path)))
    }

    pub fn combine(self, column: &str, head: &str, tail: &str) -> Self {
        self.push(
            column,
            Extract::Combine {
                head: FieldPath::parse(head),
                tail: FieldPath::parse(tail),
            },
        )
    }

    pub fn param(self, column: &str, param: &str) -> Self {
        self.push(column, Extract::Param(param.to_string()))
    }

    pub fn constant(self, column: &str, value: impl Into<Value>) -> Self {
        self.push(column, Extract::Const(value.into()))
    }

    /// Set the default of the most recently added rule
    pub fn or_default(mut self, value: impl Into<Value>) -> Self {
        if let Some(rule) = self.rules.last_mut() {
            rule.default = value.into();
        }
        self
    }

    fn push(mut self, column: &str, extract: Extract) -> Self {
        self.rules.push(FieldRule {
            column: column.to_string(),
            extract,
            default: Value::Null,
        });
        self
    }

    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }

    pub fn natural_key(&self) -> &[String] {
        &self.natural_key
    }
}

/// Apply mapping rules to one record. Returns `None` when the natural key is null or empty.
pub fn normalize(record: &SourceRecord, rules: &MappingRules) -> Option<NormalizedRow> {
    let values: BTreeMap<String, Value> = rules
        .rules
        .iter()
        .map(|rule| {
            let value = match rule.extract.apply(record) {
                Value::Null => rule.default.clone(),
                value => value,
            };
            (rule.column.clone(), value)
        })
        .collect();

    NormalizedRow::new(values, &rules.natural_key)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn country_rules() -> MappingRules {
        MappingRules::new()
            .key("iso_alpha2", "cca2")
            .field("license_plate", "car.signs[0]")
            .field("internet_tld", "tld[0]")
            .field("currency_code", "currencies.$key")
            .combine("calling_code", "idd.root", "idd.suffixes[0]")
            .field("country_name", "name.common")
    }

    #[test]
    fn test_parse_paths() {
        assert_eq!(
            FieldPath::parse("car.signs[0]").segments(),
            &[PathSegment::Key("car".into()), PathSegment::Key("signs".into()), PathSegment::Index(0)]
        );
        assert_eq!(
            FieldPath::parse("currencies.$key").segments(),
            &[PathSegment::Key("currencies".into()), PathSegment::FirstKey]
        );
        assert_eq!(FieldPath::parse("[1]").segments(), &[PathSegment::Index(1)]);
    }

    #[test]
    fn test_normalize_full_country() {
        let record = SourceRecord::new(json!({
            "cca2": "SE",
            "car": {"signs": ["S"], "side": "right"},
            "tld": [".se"],
            "currencies": {"SEK": {"name": "Swedish krona"}},
            "idd": {"root": "+4", "suffixes": ["6"]},
            "name": {"common": "Sweden"}
        }));
        let row = normalize(&record, &country_rules()).unwrap();
        assert_eq!(row.key().to_string(), "SE");
        assert_eq!(row.get("license_plate"), &Value::text("S"));
        assert_eq!(row.get("internet_tld"), &Value::text(".se"));
        assert_eq!(row.get("currency_code"), &Value::text("SEK"));
        assert_eq!(row.get("calling_code"), &Value::text("+46"));
        assert_eq!(row.get("country_name"), &Value::text("Sweden"));
    }

    #[test]
    fn test_first_key_follows_document_order() {
        let record = SourceRecord::new(json!({
            "cca2": "CH",
            "currencies": {"CHF": {}, "EUR": {}}
        }));
        let row = normalize(&record, &country_rules()).unwrap();
        assert_eq!(row.get("currency_code"), &Value::text("CHF"));
    }

    #[test]
    fn test_missing_fields_degrade_to_null() {
        let record = SourceRecord::new(json!({
            "cca2": "AQ",
            "car": {"signs": []},
            "tld": "not-a-list",
            "currencies": {},
            "idd": {"suffixes": ["1"]}
        }));
        let row = normalize(&record, &country_rules()).unwrap();
        assert_eq!(row.get("license_plate"), &Value::Null);
        assert_eq!(row.get("internet_tld"), &Value::Null);
        assert_eq!(row.get("currency_code"), &Value::Null);
        assert_eq!(row.get("calling_code"), &Value::Null);
        assert_eq!(row.get("country_name"), &Value::Null);
    }

    #[test]
    fn test_combine_without_suffix() {
        let record = SourceRecord::new(json!({"cca2": "US", "idd": {"root": "+1", "suffixes": []}}));
        let row = normalize(&record, &country_rules()).unwrap();
        assert_eq!(row.get("calling_code"), &Value::text("+1"));
    }

    #[test]
    fn test_reject_missing_or_empty_key() {
        let rules = country_rules();
        assert!(normalize(&SourceRecord::new(json!({"cca2": ""})), &rules).is_none());
        assert!(normalize(&SourceRecord::new(json!({"cca2": null})), &rules).is_none());
        assert!(normalize(&SourceRecord::new(json!({"name": {"common": "Nowhere"}})), &rules).is_none());
        assert!(normalize(&SourceRecord::new(json!("scalar")), &rules).is_none());
    }

    #[test]
    fn test_params_and_defaults() {
        let rules = MappingRules::new()
            .key_param("kpi_id", "kpi_id")
            .key("instrument_id", "i")
            .field("numeric_value", "n")
            .field("is_string", "flag")
            .or_default(false)
            .constant("provider", "borsdata");
        let mut params = UnitParams::new();
        params.insert("kpi_id".into(), "2".into());

        let row = normalize(&SourceRecord::with_params(json!({"i": 750, "n": 1.25}), params.clone()), &rules).unwrap();
        assert_eq!(row.key().to_string(), "2/750");
        assert_eq!(row.get("is_string"), &Value::Bool(false));
        assert_eq!(row.get("provider"), &Value::text("borsdata"));

        // Missing param means missing key
        assert!(normalize(&SourceRecord::new(json!({"i": 750})), &rules).is_none());
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let record = SourceRecord::new(json!({"cca2": "NO", "name": {"common": "Norway"}}));
        let rules = country_rules();
        assert_eq!(normalize(&record, &rules), normalize(&record, &rules));
    }
}
