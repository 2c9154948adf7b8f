//! Record types and the derivation of their schemas.

use std::any::{type_name, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::FixedOffset;
use once_cell::sync::Lazy;

use crate::config::BindConfig;
use crate::types::{
    FieldSpec, FieldValue, RecordSchema, SemanticType, Value, MAX_DECIMAL_PRECISION,
    MAX_DECIMAL_SCALE,
};
use crate::{Error, ErrorKind, Result};

/// A typed record that can be bound to rows of a columnar table.
///
/// ```
/// use recordframe::types::{FieldValue, ValueReader};
/// use recordframe::{Record, RecordDeclaration, Result, Value};
///
/// struct Person {
///     id: i64,
///     name: String,
///     nickname: Option<String>,
/// }
///
/// impl Record for Person {
///     fn declare(decl: RecordDeclaration) -> RecordDeclaration {
///         decl.index_field::<i64>("id")
///             .field::<String>("name")
///             .field::<Option<String>>("nickname")
///     }
///
///     fn to_values(&self) -> Vec<Option<Value>> {
///         vec![
///             self.id.into_value(),
///             self.name.clone().into_value(),
///             self.nickname.clone().into_value(),
///         ]
///     }
///
///     fn from_values(values: Vec<Option<Value>>) -> Result<Self> {
///         let mut reader = ValueReader::new(values);
///         Ok(Self {
///             id: reader.read()?,
///             name: reader.read()?,
///             nickname: reader.read()?,
///         })
///     }
/// }
/// ```
pub trait Record: Sized + 'static {
    /// Declare the record's fields, in order.
    fn declare(decl: RecordDeclaration) -> RecordDeclaration;

    /// Binding configuration of the record type.
    fn config() -> BindConfig {
        BindConfig::default()
    }

    /// The record's field values, in declaration order.
    fn to_values(&self) -> Vec<Option<Value>>;

    /// Build a record from field values in declaration order.
    fn from_values(values: Vec<Option<Value>>) -> Result<Self>;
}

#[derive(Debug, Clone)]
struct DeclaredField {
    name: String,
    rust_type: &'static str,
    inferred: Option<SemanticType>,
    annotated: Option<SemanticType>,
    nullable: bool,
    is_index: bool,
}

/// Declaration of a record type's fields.
#[derive(Debug, Clone)]
pub struct RecordDeclaration {
    name: String,
    fields: Vec<DeclaredField>,
}

impl RecordDeclaration {
    /// Start the declaration of the record type `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: vec![],
        }
    }

    fn push<T: FieldValue>(mut self, name: &str, annotated: Option<SemanticType>) -> Self {
        self.fields.push(DeclaredField {
            name: name.to_string(),
            rust_type: type_name::<T>(),
            inferred: T::semantic_type(),
            annotated,
            nullable: T::nullable(),
            is_index: false,
        });
        self
    }

    /// Declare a field whose semantic type follows from its rust type.
    pub fn field<T: FieldValue>(self, name: &str) -> Self {
        self.push::<T>(name, None)
    }

    /// Declare an index field whose semantic type follows from its rust
    /// type.
    pub fn index_field<T: FieldValue>(self, name: &str) -> Self {
        self.field::<T>(name).index()
    }

    /// Declare a field with an explicit semantic type.
    pub fn typed<T: FieldValue>(self, name: &str, semantic_type: SemanticType) -> Self {
        self.push::<T>(name, Some(semantic_type))
    }

    /// Declare a timestamp field with its zone, `None` for naive
    /// timestamps.
    pub fn timestamp<T: FieldValue>(self, name: &str, tz: Option<FixedOffset>) -> Self {
        self.typed::<T>(name, SemanticType::Timestamp { tz })
    }

    /// Declare a decimal field with its precision and scale.
    pub fn decimal<T: FieldValue>(self, name: &str, precision: u8, scale: u8) -> Self {
        self.typed::<T>(name, SemanticType::Decimal { precision, scale })
    }

    /// Mark the last declared field as index field.
    pub fn index(mut self) -> Self {
        if let Some(field) = self.fields.last_mut() {
            field.is_index = true;
        }
        self
    }
}

/// Derive the schema of a record declaration.
pub fn derive_schema(decl: RecordDeclaration) -> Result<RecordSchema> {
    let record = decl.name;
    let err = |message: String| {
        Error::new(ErrorKind::SchemaDerivation, message).with_context("record", record.clone())
    };

    if decl.fields.is_empty() {
        return Err(err("record declares no field".to_string()));
    }

    let mut names = HashSet::new();
    let mut fields = Vec::with_capacity(decl.fields.len());
    for declared in decl.fields {
        if !names.insert(declared.name.clone()) {
            return Err(err(format!("field {} is declared twice", declared.name)));
        }
        let semantic_type = resolve_semantic_type(&declared).map_err(&err)?;
        check_semantic_type(&semantic_type)
            .map_err(|reason| err(format!("field {}: {reason}", declared.name)))?;
        if declared.is_index && !semantic_type.is_indexable() {
            return Err(err(format!(
                "field {} of type {semantic_type} can't be an index field",
                declared.name
            )));
        }
        fields.push(FieldSpec {
            name: declared.name,
            semantic_type,
            nullable: declared.nullable,
            is_index: declared.is_index,
        });
    }

    let schema = RecordSchema::new(record, fields);
    log::debug!(
        "derived schema of {} with columns {:?} and index {:?}",
        schema.name(),
        schema.column_names(),
        schema.index_names()
    );
    Ok(schema)
}

fn resolve_semantic_type(declared: &DeclaredField) -> std::result::Result<SemanticType, String> {
    match (&declared.annotated, &declared.inferred) {
        (None, Some(inferred)) => Ok(inferred.clone()),
        (None, None) => Err(format!(
            "field {} of rust type {} needs an explicit type annotation, \
             e.g. a zone for timestamps or a precision for decimals",
            declared.name, declared.rust_type
        )),
        (Some(annotated), None) => Ok(annotated.clone()),
        (Some(annotated), Some(inferred)) => {
            let compatible = annotated == inferred
                || matches!(
                    (annotated, inferred),
                    (SemanticType::Enumeration(_), SemanticType::String)
                );
            if compatible {
                Ok(annotated.clone())
            } else {
                Err(format!(
                    "field {} is annotated as {annotated} but its rust type {} is {inferred}",
                    declared.name, declared.rust_type
                ))
            }
        }
    }
}

fn check_semantic_type(semantic_type: &SemanticType) -> std::result::Result<(), String> {
    match semantic_type {
        SemanticType::Decimal { precision, scale } => {
            if *precision == 0 || *precision > MAX_DECIMAL_PRECISION {
                return Err(format!(
                    "decimal precision {precision} must be between 1 and {MAX_DECIMAL_PRECISION}"
                ));
            }
            if scale > precision {
                return Err(format!("decimal scale {scale} exceeds precision {precision}"));
            }
            if *scale > MAX_DECIMAL_SCALE {
                return Err(format!(
                    "decimal scale {scale} must be at most {MAX_DECIMAL_SCALE}"
                ));
            }
        }
        SemanticType::Enumeration(members) => {
            if members.is_empty() {
                return Err("enumeration has no member".to_string());
            }
            let mut seen = HashSet::new();
            if let Some(dup) = members.iter().find(|m| !seen.insert(m.as_str())) {
                return Err(format!("enumeration member {dup} is declared twice"));
            }
        }
        _ => {}
    }
    Ok(())
}

static SCHEMAS: Lazy<RwLock<HashMap<TypeId, Arc<RecordSchema>>>> = Lazy::new(Default::default);

/// Register a record type, returning its schema.
///
/// The schema is derived on first registration and cached for the
/// lifetime of the process.
pub fn register<R: Record>() -> Result<Arc<RecordSchema>> {
    let id = TypeId::of::<R>();
    if let Some(schema) = SCHEMAS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&id)
    {
        return Ok(schema.clone());
    }

    let name = record_name(type_name::<R>());
    let schema = Arc::new(derive_schema(R::declare(RecordDeclaration::new(name)))?);
    log::debug!("registered record type {}", type_name::<R>());

    let mut schemas = SCHEMAS.write().unwrap_or_else(PoisonError::into_inner);
    Ok(schemas.entry(id).or_insert(schema).clone())
}

/// The unqualified name of a rust type, generic arguments excluded.
fn record_name(type_name: &str) -> &str {
    let base = type_name.split('<').next().unwrap_or(type_name);
    base.rsplit("::").next().unwrap_or(base)
}
