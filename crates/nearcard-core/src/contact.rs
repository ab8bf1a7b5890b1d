//! The contact record exchanged between nearby devices.

use serde::{Deserialize, Serialize};

/// A contact card as broadcast by one device and collected by another.
///
/// Only `name` is mandatory. Every other field is optional free text and is
/// omitted from the wire form when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    /// Display name. Empty only when a received payload carried no name.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    /// Messaging handle (e.g. a chat username).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messenger: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_page: Option<String>,

    /// Social network profile URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub social_url: Option<String>,

    /// Reference to an avatar image, usually a URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl ContactRecord {
    /// Create a record with only a name set.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Copy of this record with blank optional fields dropped.
    ///
    /// Fields that are empty or whitespace-only are not worth a packet.
    pub fn for_broadcast(&self) -> Self {
        fn non_blank(value: &Option<String>) -> Option<String> {
            value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
        }

        Self {
            name: self.name.clone(),
            surname: non_blank(&self.surname),
            phone: non_blank(&self.phone),
            messenger: non_blank(&self.messenger),
            organization: non_blank(&self.organization),
            job_title: non_blank(&self.job_title),
            web_page: non_blank(&self.web_page),
            social_url: non_blank(&self.social_url),
            avatar_url: non_blank(&self.avatar_url),
        }
    }

    /// True when the record has a usable (non-blank) name.
    pub fn has_name(&self) -> bool {
        !self.name.trim().is_empty()
    }

    /// Optional fields in wire order.
    pub(crate) fn optional_fields(&self) -> [&Option<String>; 8] {
        [
            &self.surname,
            &self.phone,
            &self.messenger,
            &self.organization,
            &self.job_title,
            &self.web_page,
            &self.social_url,
            &self.avatar_url,
        ]
    }

    /// Mutable optional fields in wire order.
    pub(crate) fn optional_fields_mut(&mut self) -> [&mut Option<String>; 8] {
        [
            &mut self.surname,
            &mut self.phone,
            &mut self.messenger,
            &mut self.organization,
            &mut self.job_title,
            &mut self.web_page,
            &mut self.social_url,
            &mut self.avatar_url,
        ]
    }
}
