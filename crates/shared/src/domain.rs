use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(ProjectId);
id_newtype!(ConversationId);
id_newtype!(MessageId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantKind {
    Client,
    Employee,
    Admin,
}

impl ParticipantKind {
    /// Path segment used when addressing conversation lists by role.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantKind::Client => "client",
            ParticipantKind::Employee => "employee",
            ParticipantKind::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversationKind {
    ProjectLinked,
    Direct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Attachment,
}

/// One logged-in chat participant. The display name is captured onto each
/// outgoing message at send time and never updated retroactively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub kind: ParticipantKind,
    pub display_name: String,
}

impl Participant {
    pub fn new(user_id: impl Into<String>, kind: ParticipantKind, display_name: impl Into<String>) -> Self {
        Self {
            user_id: UserId(user_id.into()),
            kind,
            display_name: display_name.into(),
        }
    }
}
