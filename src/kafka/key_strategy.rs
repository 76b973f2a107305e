use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Derives the partition key of a record.
///
/// Records without a key are spread across partitions by the broker client.
/// Any `Fn(&T) -> Option<String>` closure is a strategy.
pub trait PartitionKeyStrategy<T>: Send + Sync {
    fn partition_key(&self, value: &T) -> Option<String>;
}

impl<T, F> PartitionKeyStrategy<T> for F
where
    F: Fn(&T) -> Option<String> + Send + Sync,
{
    fn partition_key(&self, value: &T) -> Option<String> {
        self(value)
    }
}

/// Key taken from fields of the record's JSON representation.
#[derive(Debug, Clone, Default)]
pub enum KeyStrategy {
    /// Dotted path to a single field, e.g. `customer.id`.
    FieldPath(String),
    /// Several field paths joined with `:`; missing any field yields no key.
    Composite(Vec<String>),
    #[default]
    None,
}

impl KeyStrategy {
    pub fn extract_key(&self, record: &Value) -> Option<String> {
        match self {
            KeyStrategy::FieldPath(path) => extract_field_value(record, path),
            KeyStrategy::Composite(fields) => extract_composite_key(record, fields),
            KeyStrategy::None => None,
        }
    }
}

impl<T: Serialize> PartitionKeyStrategy<T> for KeyStrategy {
    fn partition_key(&self, value: &T) -> Option<String> {
        if let KeyStrategy::None = self {
            return None;
        }
        match serde_json::to_value(value) {
            Ok(record) => self.extract_key(&record),
            Err(e) => {
                warn!("Record could not be converted for key extraction: {}", e);
                None
            }
        }
    }
}

fn extract_field_value(record: &Value, field_path: &str) -> Option<String> {
    let mut current = record;

    for part in field_path.split('.') {
        match current.get(part) {
            Some(value) => current = value,
            None => {
                debug!("Field '{}' not found in record", part);
                return None;
            }
        }
    }

    match current {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        _ => Some(current.to_string()),
    }
}

fn extract_composite_key(record: &Value, fields: &[String]) -> Option<String> {
    let mut key_parts = Vec::with_capacity(fields.len());

    for field in fields {
        match extract_field_value(record, field) {
            Some(value) => key_parts.push(value),
            None => {
                debug!("Missing field '{}' for composite key", field);
                return None;
            }
        }
    }

    if key_parts.is_empty() {
        None
    } else {
        Some(key_parts.join(":"))
    }
}
