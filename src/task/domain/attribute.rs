//! Typed task attributes.

use super::{ParseEnumError, TaskDomainError};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;

/// Declared type of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// Free text.
    String,
    /// Integer or decimal number.
    Number,
    /// `true` or `false`.
    Boolean,
    /// RFC 3339 timestamp or `YYYY-MM-DD` date.
    Date,
    /// Arbitrary JSON document.
    Json,
}

impl AttributeType {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for AttributeType {
    type Error = ParseEnumError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "string" => Ok(Self::String),
            "number" => Ok(Self::Number),
            "boolean" => Ok(Self::Boolean),
            "date" => Ok(Self::Date),
            "json" => Ok(Self::Json),
            _ => Err(ParseEnumError::new("attribute type", value)),
        }
    }
}

/// Attribute value tagged with its type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    /// Free text.
    String(String),
    /// Number preserved in its JSON representation.
    Number(Number),
    /// Boolean flag.
    Boolean(bool),
    /// Point in time.
    Date(DateTime<Utc>),
    /// Arbitrary JSON document.
    Json(Value),
}

impl AttributeValue {
    /// Parses `raw` as a value of `attribute_type`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidAttributeValue`] when `raw` is not
    /// a valid representation of the declared type.
    pub fn parse(
        name: &str,
        attribute_type: AttributeType,
        raw: &str,
    ) -> Result<Self, TaskDomainError> {
        let invalid = || TaskDomainError::InvalidAttributeValue {
            name: name.to_owned(),
            raw: raw.to_owned(),
            expected: attribute_type.as_str(),
        };
        let trimmed = raw.trim();
        match attribute_type {
            AttributeType::String => Ok(Self::String(raw.to_owned())),
            AttributeType::Number => match serde_json::from_str::<Value>(trimmed) {
                Ok(Value::Number(number)) => Ok(Self::Number(number)),
                _ => Err(invalid()),
            },
            AttributeType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" => Ok(Self::Boolean(true)),
                "false" => Ok(Self::Boolean(false)),
                _ => Err(invalid()),
            },
            AttributeType::Date => parse_date(trimmed).map(Self::Date).ok_or_else(invalid),
            AttributeType::Json => serde_json::from_str(trimmed)
                .map(Self::Json)
                .map_err(|_| invalid()),
        }
    }

    /// Returns the type tag of the value.
    #[must_use]
    pub const fn attribute_type(&self) -> AttributeType {
        match self {
            Self::String(_) => AttributeType::String,
            Self::Number(_) => AttributeType::Number,
            Self::Boolean(_) => AttributeType::Boolean,
            Self::Date(_) => AttributeType::Date,
            Self::Json(_) => AttributeType::Json,
        }
    }

    /// Renders the value in the form accepted by [`Self::parse`].
    #[must_use]
    pub fn to_raw(&self) -> String {
        match self {
            Self::String(text) => text.clone(),
            Self::Number(number) => number.to_string(),
            Self::Boolean(flag) => flag.to_string(),
            Self::Date(timestamp) => timestamp.to_rfc3339(),
            Self::Json(document) => document.to_string(),
        }
    }

    /// Returns the text when the value is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the number when the value is numeric.
    #[must_use]
    pub const fn as_number(&self) -> Option<&Number> {
        match self {
            Self::Number(number) => Some(number),
            _ => None,
        }
    }

    /// Returns the flag when the value is boolean.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(flag) => Some(*flag),
            _ => None,
        }
    }

    /// Returns the timestamp when the value is a date.
    #[must_use]
    pub const fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(timestamp) => Some(*timestamp),
            _ => None,
        }
    }

    /// Returns the document when the value is JSON.
    #[must_use]
    pub const fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(document) => Some(document),
            _ => None,
        }
    }
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(timestamp.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Named, typed attribute owned by one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAttribute {
    name: String,
    value: AttributeValue,
    category: Option<String>,
    indexed: bool,
    created_at: DateTime<Utc>,
}

impl TaskAttribute {
    /// Creates a validated attribute.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidAttributeName`] when the name is
    /// blank or contains whitespace.
    pub fn new(
        name: impl Into<String>,
        value: AttributeValue,
        created_at: DateTime<Utc>,
    ) -> Result<Self, TaskDomainError> {
        let raw_name = name.into();
        let trimmed = raw_name.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(TaskDomainError::InvalidAttributeName(raw_name));
        }
        Ok(Self {
            name: trimmed.to_owned(),
            value,
            category: None,
            indexed: false,
            created_at,
        })
    }

    /// Sets the attribute category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Marks the attribute as searchable.
    #[must_use]
    pub const fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Returns the attribute name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the typed value.
    #[must_use]
    pub const fn value(&self) -> &AttributeValue {
        &self.value
    }

    /// Returns the category, if any.
    #[must_use]
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// Returns whether the attribute participates in attribute search.
    #[must_use]
    pub const fn is_indexed(&self) -> bool {
        self.indexed
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
