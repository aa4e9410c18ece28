use std::collections::HashSet;

use super::record::BASE_COLUMNS;

/// Ordered set of every column either sink has seen.
///
/// Columns are only ever appended. Both sinks consult this registry so
/// their schemas grow the same way.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRegistry {
    columns: Vec<String>,
    index: HashSet<String>,
}

impl Default for ColumnRegistry {
    fn default() -> Self {
        Self::with_columns(BASE_COLUMNS.iter().copied())
    }
}

impl ColumnRegistry {
    /// Registry seeded with `columns` (duplicates collapse, order kept).
    pub fn with_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = Self {
            columns: Vec::new(),
            index: HashSet::new(),
        };
        registry.extend(columns);
        registry
    }

    /// Append unseen columns; returns the ones that were new.
    pub fn extend<I, S>(&mut self, columns: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut added = Vec::new();
        for column in columns {
            let column = column.as_ref();
            if self.index.insert(column.to_ascii_lowercase()) {
                self.columns.push(column.to_string());
                added.push(column.to_string());
            }
        }
        added
    }

    pub fn contains(&self, column: &str) -> bool {
        self.index.contains(&column.to_ascii_lowercase())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Column names usable as SQL identifiers after quoting: non-empty,
/// printable, no quote characters.
pub fn is_valid_column_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= 128 && !name.chars().any(|c| c.is_control() || c == '"')
}
