//! Store schemas: attributes, defaults and index declarations

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::{OrmError, OrmResult};
use crate::storage::IndexSpec;
use crate::value::{Value, ValueKind};

/// Key path used when no attribute is declared as primary key.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// Declared type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Number,
    Date,
    Boolean,
    Object,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Number => "number",
            DataType::Date => "date",
            DataType::Boolean => "boolean",
            DataType::Object => "object",
        }
    }

    /// Whether a non-null value satisfies this type.
    ///
    /// Only `string`, `number` and `date` are checked; `boolean` and `object`
    /// accept any value.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            DataType::String => value.kind() == ValueKind::String,
            DataType::Number => value.kind() == ValueKind::Number,
            DataType::Date => value.kind() == ValueKind::Date,
            DataType::Boolean | DataType::Object => true,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Factory producing a fresh default value for each created row.
pub type DefaultFactory = Rc<dyn Fn() -> Result<Value, String>>;

/// Default applied to an absent field on create.
#[derive(Clone)]
pub enum DefaultValue {
    Literal(Value),
    Factory(DefaultFactory),
}

impl DefaultValue {
    pub fn resolve(&self) -> Result<Value, String> {
        match self {
            DefaultValue::Literal(value) => Ok(value.clone()),
            DefaultValue::Factory(factory) => factory(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            DefaultValue::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// A typed field declared on a store.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub data_type: DataType,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub allow_null: bool,
    pub unique: bool,
    pub default_value: Option<DefaultValue>,
}

impl Attribute {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            primary_key: false,
            auto_increment: false,
            allow_null: true,
            unique: false,
            default_value: None,
        }
    }

    pub fn string() -> Self {
        Self::new(DataType::String)
    }

    pub fn number() -> Self {
        Self::new(DataType::Number)
    }

    pub fn date() -> Self {
        Self::new(DataType::Date)
    }

    pub fn boolean() -> Self {
        Self::new(DataType::Boolean)
    }

    pub fn object() -> Self {
        Self::new(DataType::Object)
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn allow_null(mut self, allow: bool) -> Self {
        self.allow_null = allow;
        self
    }

    /// Shorthand for `allow_null(false)`.
    pub fn not_null(self) -> Self {
        self.allow_null(false)
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(DefaultValue::Literal(value.into()));
        self
    }

    /// Default computed by `factory`, invoked once per created row.
    pub fn default_with(mut self, factory: impl Fn() -> Value + 'static) -> Self {
        self.default_value = Some(DefaultValue::Factory(Rc::new(move || Ok(factory()))));
        self
    }

    /// Fallible default factory; an `Err` rejects the create with a
    /// validation error.
    pub fn try_default_with(
        mut self,
        factory: impl Fn() -> Result<Value, String> + 'static,
    ) -> Self {
        self.default_value = Some(DefaultValue::Factory(Rc::new(factory)));
        self
    }
}

/// A secondary index declared in store options.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Index name; defaults to the fields joined with `_`
    #[serde(default)]
    pub name: Option<String>,
    pub fields: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, rename = "multiEntry")]
    pub multi_entry: bool,
}

impl IndexConfig {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            fields: vec![field.into()],
            ..Self::default()
        }
    }

    pub fn compound(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn multi_entry(mut self) -> Self {
        self.multi_entry = true;
        self
    }

    pub fn index_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.fields.join("_"))
    }
}

/// Options passed to `define`.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub indexes: Vec<IndexConfig>,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(mut self, index: IndexConfig) -> Self {
        self.indexes.push(index);
        self
    }
}

/// The full schema of one store.
#[derive(Debug, Clone)]
pub struct StoreSchema {
    name: String,
    attributes: Vec<(String, Attribute)>,
    options: StoreOptions,
    primary_key: String,
    auto_increment: bool,
}

impl StoreSchema {
    /// Build and check a schema.
    ///
    /// Fails on an empty store name, duplicate attribute names, more than one
    /// primary key, or an index without fields.
    pub fn new<K: Into<String>>(
        name: impl Into<String>,
        attributes: impl IntoIterator<Item = (K, Attribute)>,
        options: StoreOptions,
    ) -> OrmResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(OrmError::Schema("store name cannot be empty".to_string()));
        }

        let mut declared: Vec<(String, Attribute)> = Vec::new();
        for (field, attribute) in attributes {
            let field = field.into();
            if declared.iter().any(|(f, _)| *f == field) {
                return Err(OrmError::Schema(format!(
                    "attribute '{}' declared twice on '{}'",
                    field, name
                )));
            }
            declared.push((field, attribute));
        }

        let keys: Vec<&(String, Attribute)> =
            declared.iter().filter(|(_, a)| a.primary_key).collect();
        let (primary_key, auto_increment) = match keys.as_slice() {
            [] => (DEFAULT_PRIMARY_KEY.to_string(), true),
            [(field, attribute)] => (field.clone(), attribute.auto_increment),
            _ => {
                return Err(OrmError::Schema(format!(
                    "'{}' declares {} primary keys, expected at most one",
                    name,
                    keys.len()
                )))
            }
        };

        if let Some(index) = options.indexes.iter().find(|i| i.fields.is_empty()) {
            return Err(OrmError::Schema(format!(
                "index '{}' on '{}' has no fields",
                index.index_name(),
                name
            )));
        }

        for (field, attribute) in &declared {
            if !attribute.unique || *field == primary_key {
                continue;
            }
            let clash = options.indexes.iter().find(|i| i.index_name() == *field);
            if let Some(index) = clash {
                if !index.unique || index.fields != [field.clone()] {
                    return Err(OrmError::Schema(format!(
                        "index '{}' on '{}' shadows the unique index of attribute '{}'",
                        index.index_name(),
                        name,
                        field
                    )));
                }
            }
        }

        Ok(Self {
            name,
            attributes: declared,
            options,
            primary_key,
            auto_increment,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[(String, Attribute)] {
        &self.attributes
    }

    pub fn attribute(&self, field: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, a)| a)
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Key path of the store.
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Whether the store assigns keys itself.
    pub fn auto_increment(&self) -> bool {
        self.auto_increment
    }

    /// Every secondary index migration must create: the declared indexes,
    /// then a unique index per `unique` non-primary attribute.
    pub fn index_specs(&self) -> Vec<IndexSpec> {
        let mut specs: Vec<IndexSpec> = self
            .options
            .indexes
            .iter()
            .map(|index| IndexSpec {
                name: index.index_name(),
                key_path: index.fields.clone(),
                unique: index.unique,
                multi_entry: index.multi_entry,
            })
            .collect();

        for (field, attribute) in &self.attributes {
            if !attribute.unique || attribute.primary_key || *field == self.primary_key {
                continue;
            }
            // a declared unique index on the same field already covers it
            if specs.iter().any(|s| s.name == *field) {
                continue;
            }
            specs.push(IndexSpec {
                name: field.clone(),
                key_path: vec![field.clone()],
                unique: true,
                multi_entry: false,
            });
        }
        specs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_primary_key() {
        let schema = StoreSchema::new(
            "users",
            vec![("name", Attribute::string())],
            StoreOptions::default(),
        )
        .unwrap();
        assert_eq!(schema.primary_key(), "id");
        assert!(schema.auto_increment());
    }

    #[test]
    fn test_declared_primary_key() {
        let schema = StoreSchema::new(
            "users",
            vec![("email", Attribute::string().primary_key())],
            StoreOptions::default(),
        )
        .unwrap();
        assert_eq!(schema.primary_key(), "email");
        assert!(!schema.auto_increment());
    }

    #[test]
    fn test_rejects_two_primary_keys() {
        let err = StoreSchema::new(
            "users",
            vec![
                ("a", Attribute::number().primary_key()),
                ("b", Attribute::number().primary_key()),
            ],
            StoreOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, OrmError::Schema(_)));
    }

    #[test]
    fn test_index_named_after_unique_attribute() {
        // a non-unique index would replace the attribute's unique index
        let err = StoreSchema::new(
            "users",
            vec![("email", Attribute::string().unique())],
            StoreOptions::new().index(IndexConfig::new("email")),
        )
        .unwrap_err();
        assert!(matches!(err, OrmError::Schema(_)));

        let err = StoreSchema::new(
            "users",
            vec![
                ("email", Attribute::string().unique()),
                ("name", Attribute::string()),
            ],
            StoreOptions::new().index(IndexConfig::new("name").named("email").unique()),
        )
        .unwrap_err();
        assert!(matches!(err, OrmError::Schema(_)));

        let schema = StoreSchema::new(
            "users",
            vec![("email", Attribute::string().unique())],
            StoreOptions::new().index(IndexConfig::new("email").unique()),
        )
        .unwrap();
        let specs = schema.index_specs();
        assert_eq!(specs.len(), 1);
        assert!(specs[0].unique);
    }

    #[test]
    fn test_index_specs_include_unique_attributes() {
        let schema = StoreSchema::new(
            "users",
            vec![
                ("id", Attribute::number().primary_key().auto_increment().unique()),
                ("email", Attribute::string().unique()),
                ("tags", Attribute::object()),
            ],
            StoreOptions::new()
                .index(IndexConfig::new("tags").multi_entry())
                .index(IndexConfig::compound(["last", "first"]).named("full_name")),
        )
        .unwrap();

        let names: Vec<String> = schema.index_specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["tags", "full_name", "email"]);
        assert!(schema.index_specs()[2].unique);
    }

    #[test]
    fn test_type_acceptance_is_strict() {
        assert!(DataType::Number.accepts(&Value::from(1)));
        assert!(!DataType::Number.accepts(&Value::from("1")));
        assert!(!DataType::String.accepts(&Value::from(1)));
        // boolean and object are not checked
        assert!(DataType::Boolean.accepts(&Value::from("yes")));
        assert!(DataType::Object.accepts(&Value::from(3)));
    }
}
