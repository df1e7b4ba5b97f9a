use serde::{Deserialize, Serialize};

/// The signed-in user as reported by the identity provider.
///
/// Only `subject` takes part in ownership checks; the rest is display data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture_url: Option<String>,
}
impl Identity {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            email: None,
            name: None,
            picture_url: None,
        }
    }
}

/// Who is calling into the metadata store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// A signed-in user
    User(Identity),
    /// A trusted server-side action running without a user identity
    System,
    /// Nobody is signed in
    Anonymous,
}
impl Caller {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Caller::User(identity) => Some(identity),
            Caller::System | Caller::Anonymous => None,
        }
    }
}
