use std::{collections::HashMap, fs};

use anyhow::anyhow;
use shared::domain::ParticipantKind;

#[derive(Debug)]
pub struct Settings {
    pub server_url: String,
    pub user_id: String,
    pub user_type: String,
    pub display_name: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".into(),
            user_id: String::new(),
            user_type: "client".into(),
            display_name: String::new(),
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("chat.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("server_url") {
                settings.server_url = v.clone();
            }
            if let Some(v) = file_cfg.get("user_id") {
                settings.user_id = v.clone();
            }
            if let Some(v) = file_cfg.get("user_type") {
                settings.user_type = v.clone();
            }
            if let Some(v) = file_cfg.get("display_name") {
                settings.display_name = v.clone();
            }
        }
    }

    if let Ok(v) = std::env::var("CHAT_SERVER_URL") {
        settings.server_url = v;
    }
    if let Ok(v) = std::env::var("CHAT_USER_ID") {
        settings.user_id = v;
    }
    if let Ok(v) = std::env::var("CHAT_USER_TYPE") {
        settings.user_type = v;
    }
    if let Ok(v) = std::env::var("CHAT_DISPLAY_NAME") {
        settings.display_name = v;
    }

    settings
}

pub fn parse_participant_kind(raw: &str) -> anyhow::Result<ParticipantKind> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "client" => Ok(ParticipantKind::Client),
        "employee" => Ok(ParticipantKind::Employee),
        "admin" => Ok(ParticipantKind::Admin),
        other => Err(anyhow!(
            "unknown user type '{other}' (expected client, employee, or admin)"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_participant_kinds_case_insensitively() {
        assert_eq!(
            parse_participant_kind("Client").expect("client"),
            ParticipantKind::Client
        );
        assert_eq!(
            parse_participant_kind(" employee ").expect("employee"),
            ParticipantKind::Employee
        );
        assert_eq!(
            parse_participant_kind("ADMIN").expect("admin"),
            ParticipantKind::Admin
        );
    }

    #[test]
    fn rejects_unknown_participant_kinds() {
        assert!(parse_participant_kind("manager").is_err());
    }
}
