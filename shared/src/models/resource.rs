//! Producer resource identity.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Well-known key holding the producing service's name.
pub const SERVICE_NAME: &str = "service.name";

/// Identifies the application that produced a set of records.
///
/// Attribute values are rendered to strings on receipt. Two resources are the
/// same producer exactly when their attribute maps are equal, which is what
/// the batching queue keys open batches on. Resources are shared behind an
/// `Arc` by every record and batch of a producer session.
///
/// # Example
///
/// ```
/// use shared::models::Resource;
///
/// let resource = Resource::new()
///     .with_attribute("service.name", "checkout")
///     .with_attribute("deployment.environment", "prod");
///
/// assert_eq!(resource.service_name(), Some("checkout"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Resource {
    attributes: BTreeMap<String, String>,
}

impl Resource {
    /// Creates an empty resource.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Returns an attribute value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Returns the `service.name` attribute, if set.
    #[must_use]
    pub fn service_name(&self) -> Option<&str> {
        self.get(SERVICE_NAME)
    }

    /// Returns all attributes in key order.
    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Returns true if the resource carries no attributes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl FromIterator<(String, String)> for Resource {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            attributes: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.service_name() {
            Some(service) => write!(f, "{service}"),
            None if self.attributes.is_empty() => write!(f, "<anonymous>"),
            None => {
                let pairs: Vec<String> = self
                    .attributes
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect();
                write!(f, "{}", pairs.join(","))
            }
        }
    }
}
