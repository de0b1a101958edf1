use serde::{Deserialize, Serialize};

/// Who spoke a turn. The backend's vocabulary differs (`model` for the
/// assistant); that mapping lives in `llm::ChatRole`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub participant_id: String,
    pub short_term: Vec<Turn>,
    pub long_term_summary: String,
    pub turn_count: u32,
    /// Unix seconds of the last save. `None` until the record is first persisted.
    pub last_updated: Option<i64>,
}

impl MemoryRecord {
    pub fn new(participant_id: &str) -> Self {
        Self {
            participant_id: participant_id.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    #[default]
    Default,
    Premium,
}

impl ModelVariant {
    pub fn from_premium_flag(premium: bool) -> Self {
        if premium {
            ModelVariant::Premium
        } else {
            ModelVariant::Default
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelVariant::Default => "default",
            ModelVariant::Premium => "premium",
        }
    }
}

pub fn unix_ts() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_turns_reject_unknown_roles() {
        let ok: Vec<Turn> =
            serde_json::from_str(r#"[{"role":"user","text":"a"},{"role":"assistant","text":"b"}]"#)
                .unwrap();
        assert_eq!(ok, vec![Turn::user("a"), Turn::assistant("b")]);

        let bad = serde_json::from_str::<Vec<Turn>>(r#"[{"role":"tool","text":"x"}]"#);
        assert!(bad.is_err());
    }

    #[test]
    fn premium_flag_selects_variant() {
        assert_eq!(ModelVariant::from_premium_flag(true), ModelVariant::Premium);
        assert_eq!(ModelVariant::from_premium_flag(false), ModelVariant::Default);
    }

    #[test]
    fn new_record_is_empty() {
        let r = MemoryRecord::new("u1");
        assert_eq!(r.participant_id, "u1");
        assert!(r.short_term.is_empty());
        assert!(r.long_term_summary.is_empty());
        assert_eq!(r.turn_count, 0);
        assert_eq!(r.last_updated, None);
    }
}
