use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::{Credential, UserId};

pub type CredentialHandle = Arc<Mutex<Credential>>;

/// In-memory working set of registered broadcasters.
///
/// Each credential sits behind its own lock so a token refresh and a currency
/// change for the same user serialize, while different users never contend
/// beyond the short map lookup.
#[derive(Default)]
pub struct UserRegistry {
    inner: Mutex<HashMap<UserId, CredentialHandle>>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a credential.
    ///
    /// An existing entry is overwritten in place so tasks already holding its
    /// handle observe the new tokens.
    pub async fn insert(&self, credential: Credential) -> CredentialHandle {
        let existing = {
            let mut map = self.inner.lock().await;
            match map.get(&credential.user_id) {
                Some(handle) => handle.clone(),
                None => {
                    let user_id = credential.user_id.clone();
                    let handle = Arc::new(Mutex::new(credential));
                    map.insert(user_id, handle.clone());
                    return handle;
                }
            }
        };
        *existing.lock().await = credential;
        existing
    }

    pub async fn get(&self, user_id: &UserId) -> Option<CredentialHandle> {
        self.inner.lock().await.get(user_id).cloned()
    }

    pub async fn contains(&self, user_id: &UserId) -> bool {
        self.inner.lock().await.contains_key(user_id)
    }

    /// Lock one user's credential. `None` when the user is not registered.
    pub async fn lock(&self, user_id: &UserId) -> Option<OwnedMutexGuard<Credential>> {
        let handle = self.get(user_id).await?;
        Some(handle.lock_owned().await)
    }

    /// Copy of the credential as it is right now.
    pub async fn snapshot(&self, user_id: &UserId) -> Option<Credential> {
        let guard = self.lock(user_id).await?;
        Some(guard.clone())
    }

    pub async fn user_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.inner.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
