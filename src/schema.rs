use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::OnceLock;

/// Kind of value a block property holds.
///
/// Catalogs spell kinds as strings: `text`, `number`, `list(column)`,
/// `dict(string,string)`, `mc(preview,train,test,run)` and so on.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ValueKind {
    #[default]
    Text,
    Number,
    Boolean,
    File,
    Url,
    Column,
    Formula,
    List(Box<ValueKind>),
    Dict(Box<ValueKind>, Box<ValueKind>),
    /// Multiple choice over a fixed set of options
    MultiChoice(Vec<String>),
    /// Kind name this editor has no special handling for
    Other(String),
}

fn compound_kind_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(list|dict|mc)\s*\((.*)\)\s*$").expect("valid kind regex"))
}

impl ValueKind {
    /// Parse a catalog kind string
    pub fn parse(s: &str) -> Result<Self, String> {
        if let Some(caps) = compound_kind_regex().captures(s) {
            let inner = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            return match &caps[1] {
                "list" => Ok(ValueKind::List(Box::new(ValueKind::parse(inner)?))),
                "dict" => {
                    let (key, value) = inner
                        .split_once(',')
                        .ok_or_else(|| format!("dict kind needs key and value: {}", s))?;
                    Ok(ValueKind::Dict(
                        Box::new(ValueKind::parse(key)?),
                        Box::new(ValueKind::parse(value)?),
                    ))
                }
                _ => Ok(ValueKind::MultiChoice(
                    inner
                        .split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect(),
                )),
            };
        }

        match s.trim() {
            "" => Err("empty value kind".to_string()),
            "text" | "string" => Ok(ValueKind::Text),
            "number" => Ok(ValueKind::Number),
            "boolean" => Ok(ValueKind::Boolean),
            "file" => Ok(ValueKind::File),
            "url" => Ok(ValueKind::Url),
            "column" => Ok(ValueKind::Column),
            "formula" => Ok(ValueKind::Formula),
            other if other.contains('(') || other.contains(')') => {
                Err(format!("malformed value kind: {}", other))
            }
            other => Ok(ValueKind::Other(other.to_string())),
        }
    }

    /// Render a live value for a block description.
    ///
    /// Only text, number and boolean kinds are shown; everything else
    /// returns `None`.
    pub fn describe(&self, value: &Value) -> Option<String> {
        match self {
            ValueKind::Text => Some(match value {
                Value::String(s) => format!("\"{}\"", s),
                other => format!("\"{}\"", other),
            }),
            ValueKind::Number => Some(match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            ValueKind::Boolean => Some(if is_truthy(value) { "True" } else { "False" }.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Text => write!(f, "text"),
            ValueKind::Number => write!(f, "number"),
            ValueKind::Boolean => write!(f, "boolean"),
            ValueKind::File => write!(f, "file"),
            ValueKind::Url => write!(f, "url"),
            ValueKind::Column => write!(f, "column"),
            ValueKind::Formula => write!(f, "formula"),
            ValueKind::List(inner) => write!(f, "list({})", inner),
            ValueKind::Dict(k, v) => write!(f, "dict({},{})", k, v),
            ValueKind::MultiChoice(options) => write!(f, "mc({})", options.join(",")),
            ValueKind::Other(name) => write!(f, "{}", name),
        }
    }
}

impl TryFrom<String> for ValueKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ValueKind::parse(&value)
    }
}

impl From<ValueKind> for String {
    fn from(kind: ValueKind) -> Self {
        kind.to_string()
    }
}

/// Truthiness of a JSON value, the way the engine's scripting side sees it
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn default_enabled() -> bool {
    true
}

/// Declaration of one block property
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PropertySpec {
    /// Human-readable label; falls back to the attribute name
    #[serde(default, alias = "desc", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, rename = "type")]
    pub kind: ValueKind,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Kept in the schema but not offered by the edit surface
    #[serde(default)]
    pub hidden: bool,
}

impl PropertySpec {
    pub fn new(kind: ValueKind) -> Self {
        Self {
            description: None,
            kind,
            enabled: true,
            default: None,
            hidden: false,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Label for the attribute `name`
    pub fn label<'a>(&'a self, name: &'a str) -> &'a str {
        self.description.as_deref().unwrap_or(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_simple_kinds() {
        assert_eq!(ValueKind::parse("text").unwrap(), ValueKind::Text);
        assert_eq!(ValueKind::parse("string").unwrap(), ValueKind::Text);
        assert_eq!(ValueKind::parse("number").unwrap(), ValueKind::Number);
        assert_eq!(ValueKind::parse("boolean").unwrap(), ValueKind::Boolean);
        assert_eq!(ValueKind::parse("file").unwrap(), ValueKind::File);
        assert_eq!(
            ValueKind::parse("colour").unwrap(),
            ValueKind::Other("colour".to_string())
        );
    }

    #[test]
    fn test_parse_compound_kinds() {
        assert_eq!(
            ValueKind::parse("list(column)").unwrap(),
            ValueKind::List(Box::new(ValueKind::Column))
        );
        assert_eq!(
            ValueKind::parse("dict(column,formula)").unwrap(),
            ValueKind::Dict(Box::new(ValueKind::Column), Box::new(ValueKind::Formula))
        );
        assert_eq!(
            ValueKind::parse("mc(preview,train,test,run)").unwrap(),
            ValueKind::MultiChoice(vec![
                "preview".to_string(),
                "train".to_string(),
                "test".to_string(),
                "run".to_string()
            ])
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(ValueKind::parse("").is_err());
        assert!(ValueKind::parse("dict(text)").is_err());
        assert!(ValueKind::parse("list(").is_err());
    }

    #[test]
    fn test_display_round_trips() {
        for s in ["text", "list(text)", "dict(text,text)", "mc(a,b)"] {
            let kind = ValueKind::parse(s).unwrap();
            assert_eq!(kind.to_string(), s);
        }
    }

    #[test]
    fn test_describe_values() {
        assert_eq!(
            ValueKind::Text.describe(&json!("abc")),
            Some("\"abc\"".to_string())
        );
        assert_eq!(ValueKind::Number.describe(&json!(3)), Some("3".to_string()));
        assert_eq!(
            ValueKind::Boolean.describe(&json!(true)),
            Some("True".to_string())
        );
        assert_eq!(
            ValueKind::Boolean.describe(&json!(0)),
            Some("False".to_string())
        );
        assert_eq!(ValueKind::File.describe(&json!("a.csv")), None);
    }

    #[test]
    fn test_property_spec_from_catalog_json() {
        let spec: PropertySpec =
            serde_json::from_value(json!({"desc": "Size of moving window", "type": "number"}))
                .unwrap();
        assert_eq!(spec.kind, ValueKind::Number);
        assert_eq!(spec.label("window"), "Size of moving window");
        assert!(spec.enabled);
        assert!(!spec.hidden);

        let hidden: PropertySpec = serde_json::from_value(json!({"hidden": true})).unwrap();
        assert!(hidden.hidden);
        assert_eq!(hidden.kind, ValueKind::Text);
        assert_eq!(hidden.label("kargs"), "kargs");
    }
}
