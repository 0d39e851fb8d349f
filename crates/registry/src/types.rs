use {
    chrono::{DateTime, TimeZone, Utc},
    serde::{Deserialize, Serialize},
};

use crate::params::ParameterSet;

/// A publishable channel definition and its parameters.
///
/// `approver_id` and the other integer ids read back as `0` when unset in
/// storage. Use [`ChannelDefinition::visibility`] (driven by
/// `approval_date`) to tell whether a definition is approved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelDefinition {
    pub publish_id: i64,
    pub title: String,
    pub description: String,
    /// Implementation class rendering this channel.
    pub class_name: String,
    pub type_id: i64,
    pub publisher_id: i64,
    pub approver_id: i64,
    pub publish_date: Option<DateTime<Utc>>,
    pub approval_date: Option<DateTime<Utc>>,
    pub timeout_ms: i64,
    pub editable: bool,
    pub has_help: bool,
    pub has_about: bool,
    pub name: String,
    /// Unique short name used for lookup and routing.
    pub fname: String,
    pub parameters: ParameterSet,
}

/// Where a definition sits in the approval workflow at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Unapproved,
    /// Approved with an approval date still in the future.
    Scheduled,
    Live,
}

impl ChannelDefinition {
    pub fn new(publish_id: i64, fname: impl Into<String>) -> Self {
        Self {
            publish_id,
            fname: fname.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn visibility(&self, now: DateTime<Utc>) -> Visibility {
        match self.approval_date {
            None => Visibility::Unapproved,
            Some(at) if at <= now => Visibility::Live,
            Some(_) => Visibility::Scheduled,
        }
    }
}

/// Entry of the channel type catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelType {
    /// Allocated by the store on insert; ignored when adding.
    pub id: i64,
    pub class_name: String,
    pub name: String,
    pub description: String,
    /// URI of the channel publishing document for this type.
    pub definition_uri: String,
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

pub(crate) fn db_flag(value: bool) -> &'static str {
    if value { "Y" } else { "N" }
}

pub(crate) fn parse_flag(value: Option<&str>) -> bool {
    value == Some("Y")
}
