//! Vault session management.
//!
//! A [`Session`] is the unlocked state of one vault: the session key, the
//! decrypted tree, the query and icon caches, and the store the tree is
//! saved to. It is a cheap-to-clone handle; all clones observe the same
//! state, including a lock.
//!
//! Tree edits are applied synchronously under the tree lock and then saved.
//! Saves are serialized and always write the latest tree, so the save for an
//! earlier edit can never overwrite a later one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::blob::PersistedBlob;
use crate::cache::{Icon, IconCache, Page, QueryCache};
use crate::config::VaultSettings;
use crate::keys::KeyManager;
use crate::tree::{Bookmark, Folder, Node, Position, Scope, Tree};
use markvault_common::{Error, FolderId, IndexPath, Result};
use markvault_crypto::{encrypt, Salt};
use markvault_storage::BlobStore;

/// Session handle for tracking active sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle(String);

impl SessionHandle {
    /// Generate a new unique session handle.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the handle string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a save attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The latest tree was encrypted and written.
    Written,
    /// The latest tree was already persisted by an earlier save.
    Superseded,
    /// The session was locked before the save could complete.
    Discarded,
}

struct SaveState {
    persisted_version: u64,
}

struct SessionInner {
    handle: SessionHandle,
    store: Arc<dyn BlobStore>,
    settings: VaultSettings,
    keys: KeyManager,
    tree: Mutex<Tree>,
    queries: Mutex<QueryCache>,
    icons: Mutex<IconCache>,
    saves: tokio::sync::Mutex<SaveState>,
    activity: Notify,
}

/// An unlocked vault.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

fn check_url(url: &str) -> Result<String> {
    let url = url.trim();
    let parsed =
        Url::parse(url).map_err(|e| Error::InvalidInput(format!("Invalid URL '{}': {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(url.to_string()),
        scheme => Err(Error::InvalidInput(format!(
            "Unsupported URL scheme '{}'",
            scheme
        ))),
    }
}

fn icon_key(url: &str) -> Result<String> {
    let parsed = Url::parse(url.trim())
        .map_err(|e| Error::InvalidInput(format!("Invalid URL '{}': {}", url, e)))?;
    parsed
        .host_str()
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| Error::InvalidInput(format!("URL has no host: {}", url)))
}

impl Session {
    /// Wrap an installed key and a loaded tree.
    ///
    /// # Preconditions
    /// - `keys` is ready
    /// - `tree` matches the blob currently persisted under the settings key
    pub(crate) fn new(
        store: Arc<dyn BlobStore>,
        settings: VaultSettings,
        keys: KeyManager,
        tree: Tree,
    ) -> Self {
        let icons = IconCache::new(settings.icon_cache_capacity, settings.icon_eviction);
        let persisted_version = tree.version();
        Self {
            inner: Arc::new(SessionInner {
                handle: SessionHandle::new(),
                store,
                settings,
                keys,
                tree: Mutex::new(tree),
                queries: Mutex::new(QueryCache::new()),
                icons: Mutex::new(icons),
                saves: tokio::sync::Mutex::new(SaveState { persisted_version }),
                activity: Notify::new(),
            }),
        }
    }

    /// Get the session handle.
    pub fn handle(&self) -> &SessionHandle {
        &self.inner.handle
    }

    pub fn settings(&self) -> &VaultSettings {
        &self.inner.settings
    }

    /// Whether the session has been locked.
    pub fn is_locked(&self) -> bool {
        !self.inner.keys.is_ready()
    }

    /// Record activity, postponing auto-lock.
    pub fn touch(&self) {
        self.inner.activity.notify_one();
    }

    pub(crate) fn activity(&self) -> &Notify {
        &self.inner.activity
    }

    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.inner.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queries(&self) -> MutexGuard<'_, QueryCache> {
        self.inner.queries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn icons(&self) -> MutexGuard<'_, IconCache> {
        self.inner.icons.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the tree of an unlocked session.
    ///
    /// Readiness is checked while the tree lock is held, so a concurrent
    /// [`Session::lock`] is observed either fully or not at all.
    fn unlocked_tree(&self) -> Result<MutexGuard<'_, Tree>> {
        let tree = self.tree();
        if !self.inner.keys.is_ready() {
            return Err(Error::Locked);
        }
        self.touch();
        Ok(tree)
    }

    /// Run a read-only closure against the tree.
    ///
    /// # Errors
    /// - `Locked` if the session has been locked
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Tree) -> T,
    {
        let tree = self.unlocked_tree()?;
        Ok(f(&tree))
    }

    /// Current tree version.
    pub fn version(&self) -> Result<u64> {
        self.read(Tree::version)
    }

    /// Copy of the node at `path`.
    pub fn resolve(&self, path: &IndexPath) -> Result<Node> {
        self.unlocked_tree()?.resolve(path).cloned()
    }

    /// Cached listing of the bookmarks in `scope` matching `query`.
    pub fn bookmarks(&self, scope: &Scope, query: &str) -> Result<Arc<Vec<Bookmark>>> {
        let tree = self.unlocked_tree()?;
        self.queries().bookmarks(&tree, scope, query)
    }

    /// Cached search; a blank query lists the whole scope.
    pub fn search(&self, query: &str, scope: &Scope) -> Result<Arc<Vec<Bookmark>>> {
        self.bookmarks(scope, query)
    }

    /// One page of the listing, sized by the settings.
    pub fn page(&self, scope: &Scope, query: &str, page: usize) -> Result<Page> {
        let tree = self.unlocked_tree()?;
        self.queries()
            .page(&tree, scope, query, page, self.inner.settings.page_size)
    }

    pub fn count_bookmarks(&self, scope: &Scope) -> Result<usize> {
        let tree = self.unlocked_tree()?;
        self.queries().count_bookmarks(&tree, scope)
    }

    pub fn count_folders(&self, path: &IndexPath) -> Result<usize> {
        let tree = self.unlocked_tree()?;
        self.queries().count_folders(&tree, path)
    }

    /// Current path of the folder carrying `id`.
    pub fn find_folder(&self, id: &FolderId) -> Result<Option<IndexPath>> {
        self.read(|tree| tree.find_folder(id))
    }

    pub fn folder_id(&self, path: &IndexPath) -> Result<FolderId> {
        self.unlocked_tree()?.folder_id(path)
    }

    /// Cached icon for the host of `url`.
    pub fn icon(&self, url: &str) -> Result<Option<Icon>> {
        let key = icon_key(url)?;
        let _tree = self.unlocked_tree()?;
        let icon = self.icons().get(&key).cloned();
        Ok(icon)
    }

    /// Remember an icon fetched for the host of `url`.
    pub fn cache_icon(&self, url: &str, icon: Icon) -> Result<()> {
        let key = icon_key(url)?;
        let _tree = self.unlocked_tree()?;
        let evicted = self.icons().insert(key, icon);
        if let Some((host, _)) = evicted {
            debug!(host = %host, "Icon evicted");
        }
        Ok(())
    }

    /// Apply an edit and save the result.
    async fn mutate<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Tree) -> Result<T>,
    {
        let (result, version) = {
            let mut tree = self.unlocked_tree()?;
            let result = f(&mut tree);
            (result, tree.version())
        };

        let value = match result {
            Ok(value) => value,
            Err(e) => {
                if e.is_structural() {
                    warn!(op, error = %e, "Rejected tree edit");
                }
                return Err(e);
            }
        };
        info!(op, version, "Tree updated");

        match self.save().await? {
            SaveOutcome::Discarded => Err(Error::Locked),
            SaveOutcome::Written | SaveOutcome::Superseded => Ok(value),
        }
    }

    /// Add a bookmark to the folder at `parent` (the roots for `/`).
    ///
    /// A blank title falls back to the URL.
    ///
    /// # Errors
    /// - `InvalidInput` if the URL is not an http(s) URL
    /// - `PathNotFound` / `NotAFolder` for a bad parent
    pub async fn add_bookmark(&self, parent: &IndexPath, title: &str, url: &str) -> Result<IndexPath> {
        let url = check_url(url)?;
        let title = match title.trim() {
            "" => url.clone(),
            title => title.to_string(),
        };
        let node = Node::Bookmark(Bookmark::new(title, url));
        self.mutate("add_bookmark", |tree| tree.insert(parent, node))
            .await
    }

    /// Add an empty folder to the folder at `parent` (the roots for `/`).
    pub async fn add_folder(&self, parent: &IndexPath, name: &str) -> Result<IndexPath> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("Folder name cannot be empty".to_string()));
        }
        let node = Node::Folder(Folder::new(name));
        self.mutate("add_folder", |tree| tree.insert(parent, node))
            .await
    }

    pub async fn rename(&self, path: &IndexPath, name: &str) -> Result<()> {
        self.mutate("rename", |tree| tree.rename(path, name)).await
    }

    pub async fn update_bookmark(&self, path: &IndexPath, title: &str, url: &str) -> Result<()> {
        let url = check_url(url)?;
        self.mutate("update_bookmark", |tree| {
            tree.update_bookmark(path, title, &url)
        })
        .await
    }

    pub async fn remove(&self, path: &IndexPath) -> Result<Node> {
        self.mutate("remove", |tree| tree.remove(path)).await
    }

    pub async fn remove_many(&self, paths: &[IndexPath]) -> Result<usize> {
        self.mutate("remove_many", |tree| tree.remove_many(paths))
            .await
    }

    pub async fn move_node(
        &self,
        source: &IndexPath,
        destination: &IndexPath,
        position: Position,
    ) -> Result<IndexPath> {
        self.mutate("move", |tree| {
            tree.move_node(source, destination, position)
        })
        .await
    }

    pub async fn move_many(&self, paths: &[IndexPath], folder: &IndexPath) -> Result<usize> {
        self.mutate("move_many", |tree| tree.move_many(paths, folder))
            .await
    }

    /// Append top-level nodes, e.g. converted from another browser.
    pub async fn append_roots(&self, nodes: Vec<Node>) -> Result<usize> {
        self.mutate("append_roots", |tree| Ok(tree.append_roots(nodes)))
            .await
    }

    /// Persist the latest tree.
    ///
    /// Saves run one at a time. Each one snapshots the tree when it starts,
    /// so a save that finds its snapshot already persisted is skipped.
    ///
    /// # Errors
    /// - Storage and serialization failures
    pub async fn save(&self) -> Result<SaveOutcome> {
        let mut saves = self.inner.saves.lock().await;
        let keys = &self.inner.keys;
        let generation = keys.generation();

        let (version, plaintext) = {
            let tree = self.tree();
            if !keys.is_ready() {
                return Ok(SaveOutcome::Discarded);
            }
            (tree.version(), Zeroizing::new(tree.to_json()?))
        };

        if version <= saves.persisted_version {
            debug!(version, "Save superseded");
            return Ok(SaveOutcome::Superseded);
        }

        let (payload, salt) = match (keys.encrypt(&plaintext), keys.salt()) {
            (Ok(payload), Some(salt)) => (payload, salt),
            (Err(Error::Locked), _) | (Ok(_), None) => return Ok(SaveOutcome::Discarded),
            (Err(e), _) => return Err(e),
        };
        let blob = PersistedBlob::new(salt, payload, keys.params()).to_bytes()?;

        if keys.generation() != generation {
            warn!(version, "Discarding save completed after lock");
            return Ok(SaveOutcome::Discarded);
        }

        self.inner
            .store
            .set(&self.inner.settings.blob_key, blob)
            .await?;
        saves.persisted_version = version;
        debug!(version, "Vault saved");
        Ok(SaveOutcome::Written)
    }

    /// Re-encrypt the vault under a new password.
    ///
    /// # Postconditions
    /// - The stored blob is replaced in a single write
    /// - The session continues with the new key and salt
    ///
    /// # Errors
    /// - `AuthenticationFailure` if `old` is wrong
    /// - `InvalidInput` if `new` violates the password policy
    /// - `Locked` if the session is locked before completion. When the lock
    ///   lands during the store write, the stored vault already uses `new`
    ///   and the session stays locked.
    pub async fn change_password(&self, old: &str, new: &str) -> Result<()> {
        if self.is_locked() {
            return Err(Error::Locked);
        }
        self.inner.settings.check_password(new)?;
        self.touch();

        let _saves = self.inner.saves.lock().await;
        let keys = &self.inner.keys;
        let store = &self.inner.store;
        let blob_key = &self.inner.settings.blob_key;
        let generation = keys.generation();

        let bytes = store
            .get(blob_key)
            .await?
            .ok_or_else(|| Error::NotFound("Vault blob not found".to_string()))?;
        let current = PersistedBlob::from_bytes(&bytes)?;

        if !keys
            .verify_password(old, &current.salt, &current.encrypted)
            .await?
        {
            warn!("Password change rejected");
            return Err(Error::AuthenticationFailure);
        }

        let plaintext = keys.decrypt(&current.encrypted)?;
        let salt = Salt::generate()?;
        let key = keys.derive(new, &salt).await?;
        let payload = encrypt(&key, &plaintext)?;
        let blob = PersistedBlob::new(salt, payload.into(), keys.params());

        if keys.generation() != generation {
            return Err(Error::Locked);
        }
        store.set(blob_key, blob.to_bytes()?).await?;
        if keys.install_if(generation, key, salt).is_none() {
            warn!("Session locked during password change; stored vault uses the new password");
            return Err(Error::Locked);
        }

        info!(session = %self.inner.handle.as_str(), "Master password changed");
        Ok(())
    }

    /// Clear the key, the tree and every cache. Idempotent.
    ///
    /// Work in flight is not cancelled; its results are discarded.
    pub fn lock(&self) {
        let was_ready = self.inner.keys.is_ready();
        {
            let mut tree = self.tree();
            self.inner.keys.clear();
            *tree = Tree::new();
        }
        self.queries().clear();
        self.icons().clear();

        if was_ready {
            info!(session = %self.inner.handle.as_str(), "Session locked");
        }
    }
}
