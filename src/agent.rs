//! Agent identity shared by every session.

use tokio::sync::RwLock;
use tracing::info;

/// Reported when the invoking user cannot be determined.
pub const UNKNOWN_USER: &str = "Unknown";

/// Process-wide identity of the running agent.
///
/// The name is the only state shared between sessions and is guarded by a
/// lock, so a rename is always observed whole. The user is fixed at startup.
#[derive(Debug)]
pub struct AgentIdentity {
    name: RwLock<String>,
    user: String,
}

impl AgentIdentity {
    /// Create an identity with the given initial name and user.
    pub fn new(name: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            name: RwLock::new(name.into()),
            user: user.into(),
        }
    }

    /// Create an identity for the user this process runs as.
    pub fn for_current_user(name: impl Into<String>) -> Self {
        Self::new(name, resolve_user())
    }

    /// Current agent name.
    pub async fn name(&self) -> String {
        self.name.read().await.clone()
    }

    /// Replace the agent name.
    pub async fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        let mut current = self.name.write().await;
        info!(old = %current.as_str(), new = %name, "Agent renamed");
        *current = name;
    }

    /// User the agent runs as.
    pub fn user(&self) -> &str {
        &self.user
    }
}

/// Resolve the invoking user from `USER`, then `USERNAME`.
pub fn resolve_user() -> String {
    ["USER", "USERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
        .unwrap_or_else(|| UNKNOWN_USER.to_string())
}
