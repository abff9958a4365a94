//! Defaults and schema validation, run before any write reaches storage

use crate::error::{FieldViolation, ValidationError, ViolationKind};
use crate::schema::StoreSchema;
use crate::value::{Fields, Value};

/// Fill every absent declared attribute that has a default.
///
/// Factories run once per call. Factory failures are collected and returned
/// together; the successful defaults are still applied to `data`.
pub fn apply_defaults(schema: &StoreSchema, data: &mut Fields) -> Result<(), ValidationError> {
    let mut violations = Vec::new();

    for (field, attribute) in schema.attributes() {
        if data.contains_key(field) {
            continue;
        }
        let Some(default) = &attribute.default_value else {
            continue;
        };
        match default.resolve() {
            Ok(value) => {
                data.insert(field.clone(), value);
            }
            Err(cause) => violations.push(FieldViolation::new(
                field.clone(),
                ViolationKind::DefaultFactory(cause),
            )),
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(schema.name(), violations))
    }
}

/// Check a row against its schema, collecting every violation.
pub fn validate(schema: &StoreSchema, data: &Fields) -> Result<(), ValidationError> {
    let mut violations = Vec::new();
    let primary_key = schema.primary_key();

    if !schema.auto_increment() && is_absent(data.get(primary_key)) {
        violations.push(FieldViolation::new(
            primary_key,
            ViolationKind::MissingPrimaryKey,
        ));
    }

    for (field, attribute) in schema.attributes() {
        let is_key = field == primary_key;
        match data.get(field) {
            None | Some(Value::Null) => {
                // missing keys are reported above; auto keys are assigned on write
                if is_key {
                    continue;
                }
                if !attribute.allow_null {
                    violations.push(FieldViolation::new(field.clone(), ViolationKind::NotNull));
                }
            }
            Some(value) => {
                if !attribute.data_type.accepts(value) {
                    violations.push(FieldViolation::new(
                        field.clone(),
                        ViolationKind::TypeMismatch {
                            expected: attribute.data_type,
                            found: value.kind(),
                        },
                    ));
                }
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(schema.name(), violations))
    }
}

/// Reject `changes` if they would alter the primary key of `current`.
pub fn check_key_unchanged(
    schema: &StoreSchema,
    current: &Fields,
    changes: &Fields,
) -> Result<(), ValidationError> {
    let primary_key = schema.primary_key();
    match (changes.get(primary_key), current.get(primary_key)) {
        (Some(new), Some(old)) if new != old => Err(ValidationError::new(
            schema.name(),
            vec![FieldViolation::new(
                primary_key,
                ViolationKind::PrimaryKeyImmutable,
            )],
        )),
        _ => Ok(()),
    }
}

fn is_absent(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}
