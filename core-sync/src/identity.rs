//! Identity seam: who the engine syncs for

use async_trait::async_trait;
use std::sync::RwLock;
use std::sync::PoisonError;

/// Current signed-in user as seen by the host app.
///
/// When no user is present the orchestrator skips cycles and local writes
/// keep accumulating in the queue.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_user_id(&self) -> Option<String>;

    async fn is_session_valid(&self) -> bool {
        self.current_user_id().await.is_some()
    }
}

/// Identity set directly by the host, e.g. after its own sign-in flow
#[derive(Debug, Default)]
pub struct StaticIdentity {
    user_id: RwLock<Option<String>>,
}

impl StaticIdentity {
    pub fn new(user_id: Option<String>) -> Self {
        Self {
            user_id: RwLock::new(user_id),
        }
    }

    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self::new(Some(user_id.into()))
    }

    pub fn set_user(&self, user_id: impl Into<String>) {
        *self.user_id.write().unwrap_or_else(PoisonError::into_inner) = Some(user_id.into());
    }

    pub fn clear(&self) {
        *self.user_id.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_user_id(&self) -> Option<String> {
        self.user_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
