//! Table transforms
//!
//! One [`TableTransform`] per known staged file, registered in a
//! [`TransformRegistry`] under the same file name the schema registry uses.
//! The orchestrator looks a transform up by name and calls it; there is no
//! per-file branching anywhere else.
//!
//! Transforms are pure: a raw table in, a transformed table out. Plain
//! functions with the right signature implement the trait, so registering a
//! new file is one function plus one `register` call.

pub mod companies_cars;
pub mod employees_salaries;

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::registry::{COMPANIES_CARS_FILE, EMPLOYEES_SALARIES_FILE};
use crate::table::{RawTable, TableError, TransformedTable};

#[derive(Error, Debug)]
pub enum TransformError {
    #[error(transparent)]
    Table(#[from] TableError),

    #[error("invalid value {value:?} in column '{column}' at row {row}: {reason}")]
    InvalidValue {
        column: String,
        row: usize,
        value: String,
        reason: String,
    },

    #[error("column name '{0}' is not ASCII snake case")]
    InvalidColumnName(String),
}

/// Converts a raw staged table into warehouse shape
pub trait TableTransform: Send + Sync {
    fn transform(&self, raw: RawTable) -> Result<TransformedTable, TransformError>;
}

impl<F> TableTransform for F
where
    F: Fn(RawTable) -> Result<TransformedTable, TransformError> + Send + Sync,
{
    fn transform(&self, raw: RawTable) -> Result<TransformedTable, TransformError> {
        self(raw)
    }
}

/// File name → transform
#[derive(Clone, Default)]
pub struct TransformRegistry {
    transforms: HashMap<String, Arc<dyn TableTransform>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transforms for the built-in mappings
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(EMPLOYEES_SALARIES_FILE, employees_salaries::transform);
        registry.register(COMPANIES_CARS_FILE, companies_cars::transform);
        registry
    }

    /// Register `transform` for `file_name`, replacing any previous one
    pub fn register<T>(&mut self, file_name: impl Into<String>, transform: T) -> &mut Self
    where
        T: TableTransform + 'static,
    {
        self.transforms.insert(file_name.into(), Arc::new(transform));
        self
    }

    pub fn get(&self, file_name: &str) -> Option<Arc<dyn TableTransform>> {
        self.transforms.get(file_name).cloned()
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.transforms.contains_key(file_name)
    }
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.transforms.keys().collect();
        names.sort();
        f.debug_struct("TransformRegistry")
            .field("files", &names)
            .finish()
    }
}

/// `true` when `name` is non-empty lowercase ASCII letters, digits and
/// underscores, starting with a letter
pub fn is_ascii_snake_case(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {
            chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        },
        _ => false,
    }
}
