//! Dataset entity: a named object-store location that subscriptions watch.

use serde::{Deserialize, Serialize};

use crate::entity::EntityData;
use crate::error::ValidationError;

/// A named object-store location (`bucket` + key `prefix`).
///
/// Subscriptions reference a dataset by id; object-created notifications are
/// matched against the dataset's bucket and prefix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatasetData {
    /// Human-readable dataset name.
    pub name: String,
    /// Object store bucket.
    pub bucket: String,
    /// Key prefix within the bucket (may be empty for the whole bucket).
    #[serde(default)]
    pub prefix: String,
}

impl EntityData for DatasetData {
    const KIND: &'static str = "datasets";

    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::MissingField("name".to_string()));
        }
        if self.bucket.is_empty() {
            return Err(ValidationError::MissingField("bucket".to_string()));
        }
        Ok(())
    }
}
