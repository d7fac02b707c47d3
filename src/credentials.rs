use std::sync::Mutex;

/// Where the API key lives. The adapter reads it before every request and
/// tells the store to forget it when the upstream rejects it as invalid, so
/// a stale key is never retried.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Option<String>;
    fn set(&self, secret: String);
    fn delete(&self);
}

/// Process-local store backed by a mutex. Suitable for CLI use where the key
/// arrives from the environment at startup; longer-lived deployments can
/// implement [`CredentialStore`] over whatever vault they have.
#[derive(Default)]
pub struct MemoryCredentialStore {
    secret: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(secret: String) -> Self {
        Self {
            secret: Mutex::new(Some(secret)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<String> {
        if let Ok(guard) = self.secret.lock() {
            guard.clone()
        } else {
            None
        }
    }

    fn set(&self, secret: String) {
        if let Ok(mut guard) = self.secret.lock() {
            *guard = Some(secret);
        }
    }

    fn delete(&self) {
        if let Ok(mut guard) = self.secret.lock() {
            if guard.take().is_some() {
                tracing::info!(target: "auth", "stored credential deleted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_delete_roundtrip() {
        let store = MemoryCredentialStore::new();
        assert!(store.get().is_none());

        store.set("sk-test".to_string());
        assert_eq!(store.get().as_deref(), Some("sk-test"));

        store.delete();
        assert!(store.get().is_none());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = MemoryCredentialStore::with_secret("sk-test".to_string());
        store.delete();
        store.delete();
        assert!(store.get().is_none());
    }
}
