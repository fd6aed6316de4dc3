//! Sinks for raw payloads and sources for class bytes.
//!
//! Incoming envelopes name a handler id in their `source` attribute. The
//! registry returns the matching handler, or the default one when the id is
//! empty or unknown.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::Result;

/// Receives file payloads.
#[async_trait]
pub trait ByteStreamHandler: Send + Sync {
    fn id(&self) -> &str;

    /// Replace the contents of `remote_path`.
    async fn save_file(&self, remote_path: &str, bytes: &[u8], binary: bool) -> Result<()>;

    /// Append to `remote_path`, creating it if needed.
    async fn append_to_file(&self, remote_path: &str, bytes: &[u8], binary: bool) -> Result<()>;
}

/// Receives class bytes and serialized class instances.
#[async_trait]
pub trait ClassByteStreamHandler: Send + Sync {
    fn id(&self) -> &str;

    /// An empty payload means the peer could not find the class.
    async fn save_class(&self, class_name: &str, bytes: &[u8]) -> Result<()>;

    async fn save_class_instance(&self, name: &str, bytes: &[u8]) -> Result<()>;
}

/// Handlers keyed by id, with a fallback.
pub struct HandlerRegistry<H: ?Sized> {
    handlers: RwLock<HashMap<String, Arc<H>>>,
    default: Arc<H>,
}

impl<H: ?Sized> HandlerRegistry<H> {
    pub fn new(default: Arc<H>) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            default,
        }
    }

    pub fn register(&self, id: impl Into<String>, handler: Arc<H>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.into(), handler);
    }

    /// The handler registered as `id`, or the default.
    pub fn get(&self, id: &str) -> Arc<H> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        match handlers.get(id) {
            Some(h) => Arc::clone(h),
            None => {
                if !id.is_empty() {
                    debug!("no handler {:?}, using default", id);
                }
                Arc::clone(&self.default)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Filesystem sink
// ─────────────────────────────────────────────────────────────────────────────

/// Writes file payloads below a root directory.
pub struct FileSystemHandler {
    id: String,
    root: PathBuf,
}

/// `relative` below `root`, keeping only its plain components.
fn confine(root: &Path, relative: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for component in Path::new(relative).components() {
        if let Component::Normal(part) = component {
            path.push(part);
        }
    }
    path
}

impl FileSystemHandler {
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
        }
    }

    /// Remote paths are resolved under the root. Only plain components are
    /// kept, so `..` and absolute prefixes cannot leave it.
    pub fn resolve(&self, remote_path: &str) -> PathBuf {
        confine(&self.root, remote_path)
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ByteStreamHandler for FileSystemHandler {
    fn id(&self) -> &str {
        &self.id
    }

    async fn save_file(&self, remote_path: &str, bytes: &[u8], _binary: bool) -> Result<()> {
        let path = self.resolve(remote_path);
        Self::ensure_parent(&path).await?;
        tokio::fs::write(&path, bytes).await?;
        debug!("saved {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    async fn append_to_file(&self, remote_path: &str, bytes: &[u8], _binary: bool) -> Result<()> {
        let path = self.resolve(remote_path);
        Self::ensure_parent(&path).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory sink
// ─────────────────────────────────────────────────────────────────────────────

/// Keeps every payload in memory. Useful for tests and for peers that only
/// relay.
#[derive(Default)]
pub struct MemoryHandler {
    id: String,
    files: Mutex<HashMap<String, Vec<u8>>>,
    classes: Mutex<HashMap<String, Bytes>>,
    instances: Mutex<HashMap<String, Bytes>>,
}

impl MemoryHandler {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn file(&self, remote_path: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(remote_path)
            .cloned()
    }

    pub fn class(&self, class_name: &str) -> Option<Bytes> {
        self.classes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(class_name)
            .cloned()
    }

    pub fn instance(&self, name: &str) -> Option<Bytes> {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

#[async_trait]
impl ByteStreamHandler for MemoryHandler {
    fn id(&self) -> &str {
        &self.id
    }

    async fn save_file(&self, remote_path: &str, bytes: &[u8], _binary: bool) -> Result<()> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(remote_path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn append_to_file(&self, remote_path: &str, bytes: &[u8], _binary: bool) -> Result<()> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(remote_path.to_string())
            .or_default()
            .extend_from_slice(bytes);
        Ok(())
    }
}

#[async_trait]
impl ClassByteStreamHandler for MemoryHandler {
    fn id(&self) -> &str {
        &self.id
    }

    async fn save_class(&self, class_name: &str, bytes: &[u8]) -> Result<()> {
        self.classes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(class_name.to_string(), Bytes::copy_from_slice(bytes));
        Ok(())
    }

    async fn save_class_instance(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Bytes::copy_from_slice(bytes));
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Class loaders
// ─────────────────────────────────────────────────────────────────────────────

/// `a.b.C` becomes `a/b/C.class`.
pub fn class_resource_path(class_name: &str) -> String {
    format!("{}.class", class_name.replace('.', "/"))
}

/// A source of class bytes.
#[async_trait]
pub trait ClassLoader: Send + Sync {
    /// Bytes of `resource`, or `None` if this loader does not have it.
    async fn load(&self, resource: &str) -> Option<Bytes>;
}

/// Loads resources from files below a directory.
pub struct DirectoryClassLoader {
    root: PathBuf,
}

impl DirectoryClassLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ClassLoader for DirectoryClassLoader {
    async fn load(&self, resource: &str) -> Option<Bytes> {
        // Class names come from the peer; never leave the root.
        let path = confine(&self.root, resource);
        if path == self.root {
            return None;
        }
        match tokio::fs::read(&path).await {
            Ok(bytes) => Some(Bytes::from(bytes)),
            Err(e) => {
                debug!("{} not in {}: {}", resource, self.root.display(), e);
                None
            }
        }
    }
}

/// Resources held in memory.
#[derive(Default)]
pub struct MemoryClassLoader {
    resources: RwLock<HashMap<String, Bytes>>,
}

impl MemoryClassLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, resource: impl Into<String>, bytes: impl Into<Bytes>) {
        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resource.into(), bytes.into());
    }
}

#[async_trait]
impl ClassLoader for MemoryClassLoader {
    async fn load(&self, resource: &str) -> Option<Bytes> {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource)
            .cloned()
    }
}

/// Ordered loaders; the first one that has a resource wins.
#[derive(Default)]
pub struct ClassLoaderRegistry {
    loaders: RwLock<Vec<Arc<dyn ClassLoader>>>,
}

impl ClassLoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, loader: Arc<dyn ClassLoader>) {
        self.loaders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(loader);
    }

    /// Bytes of the class, or `None` if no loader has it.
    pub async fn find_class(&self, class_name: &str) -> Option<Bytes> {
        let resource = class_resource_path(class_name);
        let loaders: Vec<Arc<dyn ClassLoader>> = self
            .loaders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for loader in loaders {
            if let Some(bytes) = loader.load(&resource).await {
                return Some(bytes);
            }
        }
        warn!("class {} not found in any loader", class_name);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_resource_path() {
        assert_eq!(class_resource_path("org.example.Miner"), "org/example/Miner.class");
        assert_eq!(class_resource_path("Plain"), "Plain.class");
    }

    #[test]
    fn test_registry_falls_back_to_default() {
        let default = Arc::new(MemoryHandler::new("default"));
        let registry = HandlerRegistry::<dyn ByteStreamHandler>::new(default);
        registry.register("special", Arc::new(MemoryHandler::new("special")));

        assert_eq!(registry.get("special").id(), "special");
        assert_eq!(registry.get("unknown").id(), "default");
        assert_eq!(registry.get("").id(), "default");
    }

    #[tokio::test]
    async fn test_memory_append() {
        let handler = MemoryHandler::new("m");
        handler.save_file("/a", b"one", false).await.unwrap();
        handler.append_to_file("/a", b"two", false).await.unwrap();
        assert_eq!(handler.file("/a").unwrap(), b"onetwo");
    }

    #[tokio::test]
    async fn test_filesystem_handler() {
        let dir = tempfile::tempdir().unwrap();
        let handler = FileSystemHandler::new("fs", dir.path());
        handler.save_file("/sub/a.txt", b"hello", false).await.unwrap();
        handler.append_to_file("/sub/a.txt", b" world", false).await.unwrap();

        let written = tokio::fs::read(dir.path().join("sub/a.txt")).await.unwrap();
        assert_eq!(written, b"hello world");
    }

    #[test]
    fn test_resolve_stays_under_root() {
        let handler = FileSystemHandler::new("fs", "/srv/files");
        assert_eq!(handler.resolve("/a/b.txt"), PathBuf::from("/srv/files/a/b.txt"));
        assert_eq!(handler.resolve("../../etc/passwd"), PathBuf::from("/srv/files/etc/passwd"));
        assert_eq!(handler.resolve("./x"), PathBuf::from("/srv/files/x"));
    }

    #[tokio::test]
    async fn test_first_loader_wins() {
        let first = Arc::new(MemoryClassLoader::new());
        let second = Arc::new(MemoryClassLoader::new());
        first.insert("a/B.class", Bytes::from_static(b"first"));
        second.insert("a/B.class", Bytes::from_static(b"second"));
        second.insert("a/C.class", Bytes::from_static(b"only-second"));

        let registry = ClassLoaderRegistry::new();
        registry.register(first);
        registry.register(second);

        assert_eq!(registry.find_class("a.B").await.unwrap(), Bytes::from_static(b"first"));
        assert_eq!(registry.find_class("a.C").await.unwrap(), Bytes::from_static(b"only-second"));
        assert!(registry.find_class("a.D").await.is_none());
    }

    #[tokio::test]
    async fn test_directory_loader() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("x")).unwrap();
        std::fs::write(dir.path().join("x/Y.class"), b"\xca\xfe").unwrap();

        let loader = DirectoryClassLoader::new(dir.path());
        assert_eq!(&loader.load("x/Y.class").await.unwrap()[..], b"\xca\xfe");
        assert!(loader.load("x/Z.class").await.is_none());
    }

    #[tokio::test]
    async fn test_directory_loader_stays_under_root() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let secret = outside.path().join("secret.class");
        std::fs::write(&secret, b"SECRET").unwrap();
        std::fs::create_dir_all(root.path().join("pkg")).unwrap();
        std::fs::write(root.path().join("pkg/Ok.class"), b"ok").unwrap();

        let loader = DirectoryClassLoader::new(root.path());
        assert!(loader.load(&secret.to_string_lossy()).await.is_none());

        let outside_name = outside.path().file_name().unwrap().to_string_lossy();
        let parent_hop = format!("../{}/secret.class", outside_name);
        assert!(loader.load(&parent_hop).await.is_none());
        assert!(loader.load("").await.is_none());

        // Leading dots in a class name become an absolute path.
        let registry = ClassLoaderRegistry::new();
        registry.register(Arc::new(loader));
        assert_eq!(&registry.find_class(".pkg.Ok").await.unwrap()[..], b"ok");
    }
}
