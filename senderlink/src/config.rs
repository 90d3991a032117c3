use std::collections::BTreeMap;

/// Options for a sender link.
///
/// The sender link never interprets these; they are handed to the
/// transport unchanged on every attach attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkOptions {
    /// Link name announced to the remote, if any.
    pub name: Option<String>,

    /// Free-form attach properties.
    pub properties: BTreeMap<String, String>,
}

impl LinkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Returns the value of an attach property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}
