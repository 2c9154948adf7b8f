use std::fmt;
use std::fmt::{Debug, Display, Formatter};

use itertools::Itertools;

use crate::validator::Violation;

/// Result that is a wrapper of `Result<T, recordframe::Error>`
pub type Result<T> = std::result::Result<T, Error>;

/// ErrorKind is all kinds of Error of recordframe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// recordframe don't know what happened here, and no actions other than
    /// just returning it back.
    Unexpected,

    /// The record declaration is malformed.
    ///
    /// Returned at registration time when a record declares no fields,
    /// repeats a field name, or attaches an index annotation to a type that
    /// can't serve as a row key.
    SchemaDerivation,
    /// The table's columns can't be reconciled with the record schema
    /// without destructive narrowing.
    ///
    /// Errors of this kind carry one [`Violation`] per offending field.
    Schema,
    /// The table's index levels don't carry exactly the index fields.
    IndexNotSet,
    /// An index field that should be moved into the index is not a column.
    MissingIndexField,
    /// An index field was written through a record view.
    IndexFieldImmutable,
    /// A value doesn't match the semantic type or nullability of its field.
    ValueInvalid,
    /// The record has no field with the requested name.
    FieldNotFound,
    /// The row addressed by a locator doesn't exist.
    RowNotFound,
    /// A positional locator was captured before the table's rows changed.
    StaleLocator,
    /// Configuration can't be parsed.
    ConfigInvalid,
    /// Arrow interchange failed.
    ArrowError,
}

impl ErrorKind {
    /// Convert self into static str.
    pub fn into_static(self) -> &'static str {
        self.into()
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.into_static())
    }
}

impl From<ErrorKind> for &'static str {
    fn from(v: ErrorKind) -> &'static str {
        match v {
            ErrorKind::Unexpected => "Unexpected",
            ErrorKind::SchemaDerivation => "SchemaDerivation",
            ErrorKind::Schema => "Schema",
            ErrorKind::IndexNotSet => "IndexNotSet",
            ErrorKind::MissingIndexField => "MissingIndexField",
            ErrorKind::IndexFieldImmutable => "IndexFieldImmutable",
            ErrorKind::ValueInvalid => "ValueInvalid",
            ErrorKind::FieldNotFound => "FieldNotFound",
            ErrorKind::RowNotFound => "RowNotFound",
            ErrorKind::StaleLocator => "StaleLocator",
            ErrorKind::ConfigInvalid => "ConfigInvalid",
            ErrorKind::ArrowError => "ArrowError",
        }
    }
}

/// Error is the error struct returned by all recordframe functions.
pub struct Error {
    kind: ErrorKind,
    message: String,

    context: Vec<(&'static str, String)>,
    violations: Vec<Violation>,
    source: Option<anyhow::Error>,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;

        if !self.context.is_empty() {
            write!(f, ", context: {{ ")?;
            write!(
                f,
                "{}",
                self.context
                    .iter()
                    .map(|(k, v)| format!("{k}: {v}"))
                    .join(", ")
            )?;
            write!(f, " }}")?;
        }

        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }

        if !self.violations.is_empty() {
            write!(f, ", violations: [{}]", self.violations.iter().join("; "))?;
        }

        if let Some(source) = &self.source {
            write!(f, ", source: {source}")?;
        }

        Ok(())
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        // If alternate has been specified, we will print like Debug.
        if f.alternate() {
            let mut de = f.debug_struct("Error");
            de.field("kind", &self.kind);
            de.field("message", &self.message);
            de.field("context", &self.context);
            de.field("violations", &self.violations);
            de.field("source", &self.source);
            return de.finish();
        }

        write!(f, "{}", self.kind)?;
        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }
        writeln!(f)?;

        if !self.context.is_empty() {
            writeln!(f)?;
            writeln!(f, "Context:")?;
            for (k, v) in self.context.iter() {
                writeln!(f, "    {k}: {v}")?;
            }
        }
        if !self.violations.is_empty() {
            writeln!(f)?;
            writeln!(f, "Violations:")?;
            for violation in self.violations.iter() {
                writeln!(f, "    {violation}")?;
            }
        }
        if let Some(source) = &self.source {
            writeln!(f)?;
            writeln!(f, "Source: {source:?}")?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|v| v.as_ref())
    }
}

impl Error {
    /// Create a new Error with error kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),

            context: Vec::default(),
            violations: Vec::default(),
            source: None,
        }
    }

    /// Create a [`ErrorKind::Schema`] error carrying every violation found.
    pub fn schema(violations: Vec<Violation>) -> Self {
        let mut err = Self::new(
            ErrorKind::Schema,
            format!(
                "table doesn't conform to the record schema ({} violation(s))",
                violations.len()
            ),
        );
        err.violations = violations;
        err
    }

    /// Add more context in error.
    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Set source for error.
    ///
    /// # Notes
    ///
    /// If the source has been set, we will raise a panic here.
    pub fn set_source(mut self, src: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "the source error has been set");

        self.source = Some(src.into());
        self
    }

    /// Return error's kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Return error's message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Return the field-level violations of a [`ErrorKind::Schema`] error.
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }
}

impl From<arrow_schema::ArrowError> for Error {
    fn from(v: arrow_schema::ArrowError) -> Self {
        Self::new(ErrorKind::ArrowError, "handling arrow data failed").set_source(v)
    }
}

impl From<toml::de::Error> for Error {
    fn from(v: toml::de::Error) -> Self {
        Self::new(ErrorKind::ConfigInvalid, "parsing toml config failed").set_source(v)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use once_cell::sync::Lazy;

    use super::*;

    static TEST_ERROR: Lazy<Error> = Lazy::new(|| Error {
        kind: ErrorKind::Unexpected,
        message: "something wrong happened".to_string(),
        context: vec![
            ("field", "points_balance".to_string()),
            ("called", "write".to_string()),
        ],
        violations: vec![],
        source: Some(anyhow!("column error")),
    });

    #[test]
    fn test_error_display() {
        let s = format!("{}", Lazy::force(&TEST_ERROR));
        assert_eq!(
            s,
            r#"Unexpected, context: { field: points_balance, called: write } => something wrong happened, source: column error"#
        )
    }

    #[test]
    fn test_error_debug() {
        let s = format!("{:?}", Lazy::force(&TEST_ERROR));
        assert_eq!(
            s,
            r#"Unexpected => something wrong happened

Context:
    field: points_balance
    called: write

Source: column error
"#
        )
    }

    #[test]
    fn test_schema_error_lists_violations() {
        let err = Error::schema(vec![Violation::new(
            "id",
            None,
            None,
            "missing from the table",
        )]);
        assert_eq!(err.kind(), ErrorKind::Schema);
        assert_eq!(err.violations().len(), 1);
        assert_eq!(
            format!("{err}"),
            "Schema => table doesn't conform to the record schema (1 violation(s)), violations: [id: missing from the table]"
        );
    }
}
