//! Ordered parameter set attached to a channel definition.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One configuration parameter of a channel definition.
///
/// `name` is required for persistence; it is optional here so that a
/// malformed tuple can be represented and rejected by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelParameter {
    pub name: Option<String>,
    pub value: Option<String>,
    /// Whether a subscriber may override `value`.
    #[serde(default, rename = "override")]
    pub override_allowed: bool,
    #[serde(default)]
    pub description: Option<String>,
}

impl ChannelParameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>, override_allowed: bool) -> Self {
        Self {
            name: Some(name.into()),
            value: Some(value.into()),
            override_allowed,
            description: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Name to persist, or the reason this tuple cannot be stored.
    pub(crate) fn storable_name(&self, index: usize) -> Result<&str> {
        match (self.name.as_deref(), self.value.as_deref()) {
            (Some(name), _) => Ok(name),
            (None, None) => Err(Error::InvalidParameter {
                index,
                reason: "parameter has neither name nor value",
            }),
            (None, Some(_)) => Err(Error::InvalidParameter {
                index,
                reason: "parameter value has no name",
            }),
        }
    }
}

/// Parameters in insertion order. Duplicate names are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet {
    params: Vec<ChannelParameter>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, parameter: ChannelParameter) {
        self.params.push(parameter);
    }

    /// Append a parameter built from its parts.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        override_allowed: bool,
    ) -> &mut ChannelParameter {
        self.params
            .push(ChannelParameter::new(name, value, override_allowed));
        let last = self.params.len() - 1;
        &mut self.params[last]
    }

    /// Replace the whole set, keeping the order of `parameters`.
    pub fn replace(&mut self, parameters: impl IntoIterator<Item = ChannelParameter>) {
        self.params = parameters.into_iter().collect();
    }

    #[must_use]
    pub fn as_slice(&self) -> &[ChannelParameter] {
        &self.params
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChannelParameter> {
        self.params.iter()
    }

    /// First parameter with the given name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ChannelParameter> {
        self.params
            .iter()
            .find(|p| p.name.as_deref() == Some(name))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl FromIterator<ChannelParameter> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = ChannelParameter>>(iter: I) -> Self {
        Self {
            params: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ParameterSet {
    type IntoIter = std::vec::IntoIter<ChannelParameter>;
    type Item = ChannelParameter;

    fn into_iter(self) -> Self::IntoIter {
        self.params.into_iter()
    }
}

impl<'a> IntoIterator for &'a ParameterSet {
    type IntoIter = std::slice::Iter<'a, ChannelParameter>;
    type Item = &'a ChannelParameter;

    fn into_iter(self) -> Self::IntoIter {
        self.params.iter()
    }
}
