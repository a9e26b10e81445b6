//! Serialized form of a bias tree.
//!
//! A fragment is a tagged element: the tag is the registered bias name,
//! settings live in attributes or small text children, and composite biases
//! nest their children as sub-fragments. Fragments are stored as JSON.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub tag: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Fragment>,
}

impl Fragment {
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.attributes.insert(name.into(), value.to_string());
        self
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Adds a `<tag>text</tag>` style child.
    #[must_use]
    pub fn with_text_child(mut self, tag: impl Into<String>, text: impl ToString) -> Self {
        self.children.push(Fragment {
            tag: tag.into(),
            text: Some(text.to_string()),
            ..Fragment::default()
        });
        self
    }

    /// Text of the first child named `tag`.
    #[must_use]
    pub fn child_text(&self, tag: &str) -> Option<&str> {
        self.children
            .iter()
            .find(|child| child.tag == tag)
            .and_then(|child| child.text.as_deref())
    }

    #[must_use]
    pub fn with_child(mut self, child: Fragment) -> Self {
        self.children.push(child);
        self
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize bias fragment")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Invalid bias fragment JSON")
    }
}
