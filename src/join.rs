//! Lookup join between primary records and the kelurahan reference set.
//!
//! The backend represents an embedded foreign-key lookup either as an object
//! or as a one-element list, depending on how it infers the relationship.
//! Both shapes are folded to `Option<KelurahanRef>` during decoding, so code
//! past the fetch boundary never sees the list form.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::model::{Kelurahan, RecordId, Student, Submission, UserProfile};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KelurahanRef {
    #[serde(default, deserialize_with = "crate::model::lenient_string")]
    pub name: String,
}

/// Object → `Some`, `[obj, ..]` → `Some(first)`, anything else → `None`.
pub fn normalize_embedded(value: &Value) -> Option<KelurahanRef> {
    let candidate = match value {
        Value::Array(items) => items.first()?,
        Value::Object(_) => value,
        _ => return None,
    };
    let name = match candidate.get("name")? {
        Value::String(s) => s.clone(),
        Value::Null => return None,
        other => other.to_string(),
    };
    Some(KelurahanRef { name })
}

pub(crate) fn deserialize_embedded<'de, D>(deserializer: D) -> Result<Option<KelurahanRef>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(normalize_embedded))
}

/// In-memory `id → name` map over the reference collection.
#[derive(Debug, Clone, Default)]
pub struct KelurahanIndex {
    by_id: HashMap<String, String>,
}

impl KelurahanIndex {
    pub fn new(list: &[Kelurahan]) -> Self {
        let by_id = list
            .iter()
            .map(|k| (k.id.to_string(), k.name.clone()))
            .collect();
        Self { by_id }
    }

    /// Ids compare as text, so `3` and `"3"` resolve the same row.
    pub fn name_of(&self, id: Option<&RecordId>) -> Option<&str> {
        id.and_then(|id| self.by_id.get(&id.to_string()))
            .map(String::as_str)
    }

    pub fn resolve(&self, id: Option<&RecordId>) -> Option<KelurahanRef> {
        self.name_of(id).map(|name| KelurahanRef {
            name: name.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Records that carry a kelurahan foreign key and its denormalized name.
pub trait KelurahanJoin {
    fn kelurahan_fk(&self) -> Option<&RecordId>;
    fn set_kelurahan(&mut self, value: Option<KelurahanRef>);
}

macro_rules! impl_kelurahan_join {
    ( $( $ty:ty ),+ $(,)? ) => {
        $(
            impl KelurahanJoin for $ty {
                fn kelurahan_fk(&self) -> Option<&RecordId> {
                    self.kelurahan_id.as_ref()
                }

                fn set_kelurahan(&mut self, value: Option<KelurahanRef>) {
                    self.kelurahan = value;
                }
            }
        )+
    };
}

impl_kelurahan_join!(Student, Submission, UserProfile);

/// Overwrite the display field of every record from the lookup. Unmatched
/// keys leave the field `None`.
pub fn join_kelurahan<T: KelurahanJoin>(records: &mut [T], index: &KelurahanIndex) {
    for record in records.iter_mut() {
        let resolved = index.resolve(record.kelurahan_fk());
        record.set_kelurahan(resolved);
    }
}
