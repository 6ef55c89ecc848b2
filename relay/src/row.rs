//! Result rows

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::{FromValue, Value};

/// Column metadata for one prepared statement
///
/// Computed once after prepare and shared by every row the statement produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Columns {
    names: Vec<String>,
}

impl Columns {
    pub(crate) fn new(names: Vec<String>) -> Self { Self { names } }

    pub fn len(&self) -> usize { self.names.len() }

    pub fn is_empty(&self) -> bool { self.names.is_empty() }

    /// (name, offset) pairs in statement order
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> { self.names.iter().enumerate().map(|(i, n)| (n.as_str(), i)) }

    pub fn name(&self, offset: usize) -> Option<&str> { self.names.get(offset).map(String::as_str) }

    /// Leftmost offset with this name
    pub fn offset(&self, name: &str) -> Option<usize> { self.names.iter().position(|n| n == name) }
}

/// One row produced by a statement step
///
/// Duplicate column names are kept. Name lookups return the leftmost match.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<Columns>,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(columns: Arc<Columns>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn columns(&self) -> &Columns { &self.columns }

    pub fn len(&self) -> usize { self.values.len() }

    pub fn is_empty(&self) -> bool { self.values.is_empty() }

    pub fn get(&self, name: &str) -> Option<&Value> { self.columns.offset(name).map(|i| &self.values[i]) }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.iter().filter(move |(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn value(&self, offset: usize) -> Option<&Value> { self.values.get(offset) }

    pub fn decode<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self.get(name).ok_or_else(|| Error::ColumnNotFound(name.to_string()))?;
        T::from_value(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> { self.columns.names.iter().map(String::as_str).zip(self.values.iter()) }

    pub fn into_values(self) -> Vec<Value> { self.values }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Row {
        let columns = Arc::new(Columns::new(vec!["id".into(), "name".into(), "id".into()]));
        Row::new(columns, vec![Value::Integer(1), Value::Text("a".into()), Value::Integer(2)])
    }

    #[test]
    fn test_duplicate_names_are_preserved() {
        let row = row();
        assert_eq!(row.len(), 3);
        assert_eq!(row.get("id"), Some(&Value::Integer(1)));
        assert_eq!(row.get_all("id").cloned().collect::<Vec<_>>(), vec![Value::Integer(1), Value::Integer(2)]);
        assert_eq!(row.value(2), Some(&Value::Integer(2)));
        let names: Vec<_> = row.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["id", "name", "id"]);
    }

    #[test]
    fn test_decode() {
        let row = row();
        assert_eq!(row.decode::<String>("name").unwrap(), "a");
        assert!(matches!(row.decode::<i64>("missing"), Err(Error::ColumnNotFound(_))));
        assert!(matches!(row.decode::<i64>("name"), Err(Error::Conversion { .. })));
    }
}
