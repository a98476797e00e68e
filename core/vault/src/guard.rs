//! Inactivity auto-lock.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use crate::session::Session;

/// Locks a session after a period without activity.
///
/// Every session operation counts as activity. Dropping the guard locks the
/// session immediately.
pub struct SessionGuard {
    session: Session,
    timeout: Duration,
    task: JoinHandle<()>,
}

impl SessionGuard {
    /// Start watching `session`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(session: Session, timeout: Duration) -> Self {
        let watched = session.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        info!(
                            session = %watched.handle().as_str(),
                            timeout_secs = timeout.as_secs(),
                            "Locking session after inactivity"
                        );
                        watched.lock();
                        break;
                    }
                    _ = watched.activity().notified() => {}
                }
            }
        });

        Self {
            session,
            timeout,
            task,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Reset the inactivity deadline.
    pub fn touch(&self) {
        self.session.touch();
    }

    pub fn is_locked(&self) -> bool {
        self.session.is_locked()
    }

    /// Lock now. Idempotent.
    pub fn lock(&self) {
        self.task.abort();
        self.session.lock();
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.lock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaultSettings;
    use crate::manager::Vault;
    use crate::tree::Scope;
    use markvault_common::{Error, IndexPath};
    use markvault_crypto::KdfParams;
    use markvault_storage::MemoryStore;
    use std::sync::Arc;
    use tokio::time::sleep;

    const TIMEOUT: Duration = Duration::from_secs(600);

    async fn session() -> Session {
        let settings = VaultSettings {
            kdf: KdfParams::new(1024, 1, 1),
            ..Default::default()
        };
        Vault::new(Arc::new(MemoryStore::new()), settings)
            .create("secret123")
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_locks_after_inactivity() {
        let guard = SessionGuard::spawn(session().await, TIMEOUT);
        assert!(!guard.is_locked());

        sleep(TIMEOUT + Duration::from_secs(1)).await;

        assert!(guard.is_locked());
        assert!(matches!(
            guard.session().count_bookmarks(&Scope::All),
            Err(Error::Locked)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_postpones_lock() {
        let guard = SessionGuard::spawn(session().await, TIMEOUT);

        sleep(Duration::from_secs(400)).await;
        guard
            .session()
            .add_folder(&IndexPath::root(), "Work")
            .await
            .unwrap();
        sleep(Duration::from_secs(400)).await;
        assert!(!guard.is_locked());

        guard.touch();
        sleep(Duration::from_secs(400)).await;
        assert!(!guard.is_locked());

        sleep(Duration::from_secs(201)).await;
        assert!(guard.is_locked());
    }

    #[tokio::test]
    async fn test_explicit_lock() {
        let guard = SessionGuard::spawn(session().await, TIMEOUT);
        guard.lock();
        guard.lock();
        assert!(guard.is_locked());
    }

    #[tokio::test]
    async fn test_drop_locks() {
        let session = session().await;
        let guard = SessionGuard::spawn(session.clone(), TIMEOUT);
        assert!(!session.is_locked());

        drop(guard);
        assert!(session.is_locked());
    }
}
