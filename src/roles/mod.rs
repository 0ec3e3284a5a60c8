//! Roleplay characters and conversation history
//!
//! The pipeline consumes these through two narrow interfaces: look up a
//! role's prompt and voice, and read the prior turns for a (user, role)
//! pair. Persistence behind them is a collaborator concern; the in-process
//! implementations here are enough to run the server.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::types::ChatMessage;

/// A playable character
#[derive(Debug, Clone, Serialize)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub prompt: String,
    /// Synthesizer voice identifier
    pub voice: String,
}

/// Listing shape: prompts stay server-side
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RoleSummary {
    pub id: i64,
    pub name: String,
}

#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn lookup(&self, id: i64) -> Result<Role>;
    async fn list(&self) -> Result<Vec<RoleSummary>>;
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Prior turns for this user and role, oldest first
    async fn history(&self, user_id: &str, role_id: i64) -> Result<Vec<ChatMessage>>;
}

/// Built-in role set
pub struct StaticRoles {
    roles: Vec<Role>,
}

impl StaticRoles {
    pub fn new(roles: Vec<Role>) -> Self {
        Self { roles }
    }

    pub fn builtin() -> Self {
        Self::new(vec![
            Role {
                id: 1,
                name: "晓芸".to_string(),
                prompt: "你是晓芸，一位温柔耐心的知心姐姐。你认真倾听用户说的每一句话，\
                         用口语化的短句回应，关心对方的感受，偶尔提一个贴心的问题。"
                    .to_string(),
                voice: "qiniu_zh_female_wwxkjx".to_string(),
            },
            Role {
                id: 2,
                name: "老周".to_string(),
                prompt: "你是老周，一位见多识广的说书人。你喜欢用生动的比喻把道理讲清楚，\
                         语气沉稳幽默，每次回答控制在三两句话之内。"
                    .to_string(),
                voice: "qiniu_zh_male_ljfdxz".to_string(),
            },
        ])
    }
}

#[async_trait]
impl RoleDirectory for StaticRoles {
    async fn lookup(&self, id: i64) -> Result<Role> {
        match self.roles.iter().find(|r| r.id == id) {
            Some(role) => Ok(role.clone()),
            None => bail!("unknown role id {}", id),
        }
    }

    async fn list(&self) -> Result<Vec<RoleSummary>> {
        Ok(self
            .roles
            .iter()
            .map(|r| RoleSummary { id: r.id, name: r.name.clone() })
            .collect())
    }
}

/// In-memory history, seeded by the surrounding application
#[derive(Default)]
pub struct MemoryHistory {
    turns: RwLock<HashMap<(String, i64), Vec<ChatMessage>>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, user_id: &str, role_id: i64, messages: Vec<ChatMessage>) {
        self.turns
            .write()
            .unwrap()
            .insert((user_id.to_string(), role_id), messages);
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn history(&self, user_id: &str, role_id: i64) -> Result<Vec<ChatMessage>> {
        Ok(self
            .turns
            .read()
            .unwrap()
            .get(&(user_id.to_string(), role_id))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builtin_lookup_and_list() {
        let roles = StaticRoles::builtin();
        let role = roles.lookup(1).await.unwrap();
        assert!(!role.prompt.is_empty());
        assert!(!role.voice.is_empty());

        let listed = roles.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        // prompts never leave through the listing
        let json = serde_json::to_string(&listed).unwrap();
        assert!(!json.contains("prompt"));
    }

    #[tokio::test]
    async fn test_unknown_role_is_an_error() {
        assert!(StaticRoles::builtin().lookup(99).await.is_err());
    }

    #[tokio::test]
    async fn test_history_reads_seeded_turns() {
        let history = MemoryHistory::new();
        assert!(history.history("u1", 1).await.unwrap().is_empty());

        history.seed("u1", 1, vec![ChatMessage::user("早上好"), ChatMessage::assistant("早呀")]);
        let turns = history.history("u1", 1).await.unwrap();
        assert_eq!(turns.len(), 2);
        // other pairs stay empty
        assert!(history.history("u1", 2).await.unwrap().is_empty());
    }
}
