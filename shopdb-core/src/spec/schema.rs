//! `$jsonSchema` validator rules
//!
//! A [`SchemaRule`] is a typed tree of [`SchemaNode`]s. It renders to the
//! validator document handed to the store at collection creation, and it can
//! evaluate a document locally the way the store's validator would for the
//! subset of keywords used here (`bsonType`, `required`, `properties`, `enum`).

use std::fmt;

use mongodb::bson::{Bson, Document, doc};
use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};

/// BSON type aliases accepted by `bsonType`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BsonType {
    Object,
    String,
    Int,
    Long,
    Double,
    Decimal,
    Date,
    Bool,
}

impl BsonType {
    /// The alias as written in a validator
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::String => "string",
            Self::Int => "int",
            Self::Long => "long",
            Self::Double => "double",
            Self::Decimal => "decimal",
            Self::Date => "date",
            Self::Bool => "bool",
        }
    }

    /// Whether a value carries exactly this BSON type
    pub fn matches(&self, value: &Bson) -> bool {
        matches!(
            (self, value),
            (Self::Object, Bson::Document(_))
                | (Self::String, Bson::String(_))
                | (Self::Int, Bson::Int32(_))
                | (Self::Long, Bson::Int64(_))
                | (Self::Double, Bson::Double(_))
                | (Self::Decimal, Bson::Decimal128(_))
                | (Self::Date, Bson::DateTime(_))
                | (Self::Bool, Bson::Boolean(_))
        )
    }
}

impl fmt::Display for BsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Document(_) => "object",
        Bson::Array(_) => "array",
        Bson::String(_) => "string",
        Bson::Int32(_) => "int",
        Bson::Int64(_) => "long",
        Bson::Double(_) => "double",
        Bson::Decimal128(_) => "decimal",
        Bson::DateTime(_) => "date",
        Bson::Boolean(_) => "bool",
        Bson::Null => "null",
        _ => "other",
    }
}

fn join_path(parent: &str, field: &str) -> String {
    if parent.is_empty() {
        field.to_string()
    } else {
        format!("{parent}.{field}")
    }
}

/// Kinds of validator failure for a single field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    /// A required field is absent
    Missing,
    /// The field is present with the wrong BSON type
    WrongType {
        expected: BsonType,
        found: &'static str,
    },
    /// The value is not one of the enumerated values
    NotAllowed { value: String },
}

/// A single reason a document fails a [`SchemaRule`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// Dotted path of the offending field
    pub path: String,
    pub kind: ViolationKind,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ViolationKind::Missing => write!(f, "{}: missing required field", self.path),
            ViolationKind::WrongType { expected, found } => {
                write!(f, "{}: expected {}, found {}", self.path, expected, found)
            }
            ViolationKind::NotAllowed { value } => {
                write!(f, "{}: value {} is not allowed", self.path, value)
            }
        }
    }
}

/// One node of a schema tree
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaNode {
    bson_type: BsonType,
    required: Vec<String>,
    properties: Vec<(String, SchemaNode)>,
    allowed: Vec<String>,
}

impl SchemaNode {
    pub fn new(bson_type: BsonType) -> Self {
        Self {
            bson_type,
            required: Vec::new(),
            properties: Vec::new(),
            allowed: Vec::new(),
        }
    }

    pub fn object() -> Self {
        Self::new(BsonType::Object)
    }

    /// Mark a field as required
    pub fn require(mut self, field: impl Into<String>) -> Self {
        self.required.push(field.into());
        self
    }

    /// Declare a property, keeping declaration order
    pub fn property(mut self, name: impl Into<String>, node: SchemaNode) -> Self {
        self.properties.push((name.into(), node));
        self
    }

    /// Restrict a string node to an enumerated set
    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed.extend(values.into_iter().map(Into::into));
        self
    }

    /// Render as a `$jsonSchema` fragment
    pub fn to_document(&self) -> Document {
        let mut doc = doc! { "bsonType": self.bson_type.as_str() };
        if !self.required.is_empty() {
            doc.insert("required", self.required.clone());
        }
        if !self.allowed.is_empty() {
            doc.insert("enum", self.allowed.clone());
        }
        if !self.properties.is_empty() {
            let mut properties = Document::new();
            for (name, node) in &self.properties {
                properties.insert(name.clone(), node.to_document());
            }
            doc.insert("properties", properties);
        }
        doc
    }

    fn check_shape(&self, path: &str, problems: &mut Vec<String>) {
        let at = if path.is_empty() { "<root>" } else { path };

        if self.bson_type != BsonType::Object
            && (!self.required.is_empty() || !self.properties.is_empty())
        {
            problems.push(format!(
                "{at}: required/properties declared on non-object type {}",
                self.bson_type
            ));
        }
        if self.bson_type != BsonType::String && !self.allowed.is_empty() {
            problems.push(format!(
                "{at}: enum declared on non-string type {}",
                self.bson_type
            ));
        }

        for (idx, field) in self.required.iter().enumerate() {
            if field.is_empty() {
                problems.push(format!("{at}: empty required field name"));
            } else if self.required[..idx].contains(field) {
                problems.push(format!("{at}: required field {field} listed twice"));
            }
        }

        for (idx, (name, node)) in self.properties.iter().enumerate() {
            if name.is_empty() {
                problems.push(format!("{at}: empty property name"));
                continue;
            }
            if self.properties[..idx].iter().any(|(other, _)| other == name) {
                problems.push(format!("{at}: property {name} declared twice"));
            }
            node.check_shape(&join_path(path, name), problems);
        }
    }

    fn evaluate_value(&self, path: &str, value: &Bson, out: &mut Vec<SchemaViolation>) {
        if !self.bson_type.matches(value) {
            out.push(SchemaViolation {
                path: path.to_string(),
                kind: ViolationKind::WrongType {
                    expected: self.bson_type,
                    found: type_name(value),
                },
            });
            return;
        }

        match value {
            Bson::String(s) if !self.allowed.is_empty() && !self.allowed.contains(s) => {
                out.push(SchemaViolation {
                    path: path.to_string(),
                    kind: ViolationKind::NotAllowed { value: s.clone() },
                });
            }
            Bson::Document(fields) => self.evaluate_fields(path, fields, out),
            _ => {}
        }
    }

    fn evaluate_fields(&self, path: &str, fields: &Document, out: &mut Vec<SchemaViolation>) {
        for field in &self.required {
            if !fields.contains_key(field) {
                out.push(SchemaViolation {
                    path: join_path(path, field),
                    kind: ViolationKind::Missing,
                });
            }
        }
        for (name, node) in &self.properties {
            if let Some(value) = fields.get(name) {
                node.evaluate_value(&join_path(path, name), value, out);
            }
        }
    }
}

/// A complete collection validator rooted at an object node
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaRule {
    root: SchemaNode,
}

impl SchemaRule {
    pub fn new(root: SchemaNode) -> Self {
        Self { root }
    }

    /// The validator document: `{ $jsonSchema: { ... } }`
    pub fn to_validator(&self) -> Document {
        doc! { "$jsonSchema": self.root.to_document() }
    }

    /// Reject rules the store would refuse or silently misinterpret
    pub fn check(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.root.bson_type != BsonType::Object {
            problems.push(format!(
                "<root>: validator root must be object, got {}",
                self.root.bson_type
            ));
        }
        self.root.check_shape("", &mut problems);

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ProvisionError::ValidationSpec(problems.join("; ")))
        }
    }

    /// All reasons `document` fails this rule; empty when it passes
    pub fn evaluate(&self, document: &Document) -> Vec<SchemaViolation> {
        let mut out = Vec::new();
        self.root.evaluate_fields("", document, &mut out);
        out
    }
}

/// Event kinds accepted in the `event_type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Purchase,
    OrderReceived,
    OrderCancelled,
    RatingAdded,
    RatingUpdated,
}

impl EventType {
    pub const ALL: [EventType; 5] = [
        Self::Purchase,
        Self::OrderReceived,
        Self::OrderCancelled,
        Self::RatingAdded,
        Self::RatingUpdated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::OrderReceived => "order_received",
            Self::OrderCancelled => "order_cancelled",
            Self::RatingAdded => "rating_added",
            Self::RatingUpdated => "rating_updated",
        }
    }
}

/// Validator for the `events` collection
pub fn event_schema() -> SchemaRule {
    let data = SchemaNode::object()
        .require("user_id")
        .require("product_id")
        .property("user_id", SchemaNode::new(BsonType::Int))
        .property("product_id", SchemaNode::new(BsonType::Int))
        .property("quantity", SchemaNode::new(BsonType::Int))
        .property("price", SchemaNode::new(BsonType::Decimal))
        .property("rating", SchemaNode::new(BsonType::Decimal))
        .property("review", SchemaNode::new(BsonType::String));

    let root = SchemaNode::object()
        .require("event_type")
        .require("timestamp")
        .require("data")
        .property(
            "event_type",
            SchemaNode::new(BsonType::String).one_of(EventType::ALL.iter().map(EventType::as_str)),
        )
        .property("timestamp", SchemaNode::new(BsonType::Date))
        .property("data", data);

    SchemaRule::new(root)
}
