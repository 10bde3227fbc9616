//! Hot reload of a resolved config.
//!
//! Watches every file that could change the result (the main config in all
//! its extensions and `.config/` variants, rc files, `package.json`, and the
//! files of extended layers) and re-runs [`load_config`] when one changes.
//!
//! File events are coalesced with a debouncer, forwarded into a tokio
//! channel, and drained by a single task so reloads never overlap. A reload
//! that fails to parse keeps the previous config.

use super::diff::{ConfigDiff, diff};
use super::formats::SUPPORTED_EXTENSIONS;
use super::loader::load_config;
use super::options::ResolveOptions;
use super::types::ResolvedConfig;
use crate::error::Result;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Debounce applied when none is configured.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Kind of file change that triggered a reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Created,
    Updated,
    Removed,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeType::Created => write!(f, "created"),
            ChangeType::Updated => write!(f, "updated"),
            ChangeType::Removed => write!(f, "removed"),
        }
    }
}

/// A change to one watched file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: ChangeType,
    pub path: PathBuf,
}

/// Old and new config of one reload, handed to the hooks.
pub struct WatchContext {
    pub old_config: Arc<ResolvedConfig>,
    pub new_config: Arc<ResolvedConfig>,
    diff: OnceLock<ConfigDiff>,
}

impl WatchContext {
    pub fn new(old_config: Arc<ResolvedConfig>, new_config: Arc<ResolvedConfig>) -> Self {
        Self {
            old_config,
            new_config,
            diff: OnceLock::new(),
        }
    }

    /// Structural diff of the two config bodies, computed on first use.
    pub fn diff(&self) -> &ConfigDiff {
        self.diff
            .get_or_init(|| diff(&self.old_config.config, &self.new_config.config))
    }
}

impl fmt::Debug for WatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchContext")
            .field("old_config", &self.old_config.config_file)
            .field("new_config", &self.new_config.config_file)
            .finish_non_exhaustive()
    }
}

/// Callbacks around each reload. All methods default to no-ops.
///
/// A hook that fails aborts the reload it belongs to and the previous
/// config stays current.
#[async_trait]
pub trait WatchHooks: Send + Sync {
    /// Called once per changed file, before the reload.
    async fn on_watch(&self, _event: &WatchEvent) -> anyhow::Result<()> {
        Ok(())
    }

    /// Return `true` when the change was applied in place; the new config
    /// is then discarded and `on_update` is skipped.
    async fn accept_hmr(&self, _context: &WatchContext) -> anyhow::Result<bool> {
        Ok(false)
    }

    /// Called with the new config before it becomes current.
    async fn on_update(&self, _context: &WatchContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl WatchHooks for NoHooks {}

/// Options for [`watch_config`].
#[derive(Clone)]
pub struct WatchOptions {
    pub resolve: ResolveOptions,
    /// `None` uses the raw file watcher without debouncing.
    pub debounce: Option<Duration>,
    pub hooks: Arc<dyn WatchHooks>,
}

impl WatchOptions {
    pub fn new(resolve: ResolveOptions) -> Self {
        Self {
            resolve,
            debounce: Some(DEFAULT_DEBOUNCE),
            hooks: Arc::new(NoHooks),
        }
    }

    pub fn with_debounce(mut self, debounce: Option<Duration>) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn WatchHooks>) -> Self {
        self.hooks = hooks;
        self
    }
}

/// Lifecycle of a [`ConfigWatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Watching,
    Reloading,
    Closed,
}

/// What a reload ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The new config is now current.
    Updated,
    /// `accept_hmr` took the change; the current config is unchanged.
    Accepted,
    /// Resolution or a hook failed; the previous config is kept.
    Failed,
    /// The watcher was closed before the reload started.
    Closed,
}

enum Backend {
    Debounced(Debouncer<RecommendedWatcher>),
    Raw(RecommendedWatcher),
}

impl Backend {
    fn watch_dir(&mut self, dir: &Path) -> notify::Result<()> {
        debug!("Watching directory: {}", dir.display());
        match self {
            Backend::Debounced(debouncer) => debouncer
                .watcher()
                .watch(dir, RecursiveMode::NonRecursive),
            Backend::Raw(watcher) => watcher.watch(dir, RecursiveMode::NonRecursive),
        }
    }
}

/// Taken out on close; the forwarding thread arms new directories through it.
type SharedBackend = Arc<Mutex<Option<Backend>>>;

/// Paths reported by the file watcher. Debounced events carry no kind.
struct Notice {
    kind: Option<ChangeType>,
    paths: Vec<PathBuf>,
}

struct Shared {
    options: ResolveOptions,
    hooks: Arc<dyn WatchHooks>,
    current: ArcSwap<ResolvedConfig>,
    updates: watch::Sender<Arc<ResolvedConfig>>,
    closed: AtomicBool,
    reload_lock: tokio::sync::Mutex<()>,
}

impl Shared {
    async fn process(&self, events: &[WatchEvent]) -> ReloadOutcome {
        let _guard = self.reload_lock.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return ReloadOutcome::Closed;
        }
        for event in events {
            info!("Config file {}: {}", event.kind, event.path.display());
            if let Err(e) = self.hooks.on_watch(event).await {
                warn!("on_watch hook failed for {}: {:#}", event.path.display(), e);
                return ReloadOutcome::Failed;
            }
        }
        self.reload().await
    }

    async fn reload(&self) -> ReloadOutcome {
        let new_config = match load_config(&self.options).await {
            Ok(resolved) => Arc::new(resolved),
            Err(e) if e.is_load_failure() => {
                warn!("Failed to reload config, keeping the previous one: {}", e);
                return ReloadOutcome::Failed;
            }
            Err(e) => {
                error!("Config reload aborted, keeping the previous one: {}", e);
                return ReloadOutcome::Failed;
            }
        };
        let context = WatchContext::new(self.current.load_full(), new_config.clone());

        match self.hooks.accept_hmr(&context).await {
            Ok(true) => {
                debug!("Config change accepted in place");
                return ReloadOutcome::Accepted;
            }
            Ok(false) => {}
            Err(e) => {
                warn!("accept_hmr hook failed: {:#}", e);
                return ReloadOutcome::Failed;
            }
        }
        if let Err(e) = self.hooks.on_update(&context).await {
            warn!("on_update hook failed: {:#}", e);
            return ReloadOutcome::Failed;
        }

        debug!("Config reloaded with {} change(s)", context.diff().len());
        self.current.store(new_config.clone());
        self.updates.send_replace(new_config);
        ReloadOutcome::Updated
    }
}

/// Handle to a watched config.
///
/// Dropping the handle stops watching.
pub struct ConfigWatcher {
    shared: Arc<Shared>,
    watching_files: Vec<PathBuf>,
    backend: SharedBackend,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConfigWatcher {
    /// The current config.
    pub fn config(&self) -> Arc<ResolvedConfig> {
        self.shared.current.load_full()
    }

    /// Value from the current config, see [`ResolvedConfig::get`].
    pub fn get(&self, key: &str) -> Option<Value> {
        self.shared.current.load().get(key).cloned()
    }

    /// Files whose changes trigger a reload.
    pub fn watching_files(&self) -> &[PathBuf] {
        &self.watching_files
    }

    /// Receiver notified whenever a new config becomes current.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ResolvedConfig>> {
        self.shared.updates.subscribe()
    }

    pub fn state(&self) -> WatchState {
        if self.shared.closed.load(Ordering::SeqCst) {
            WatchState::Closed
        } else if self.shared.reload_lock.try_lock().is_err() {
            WatchState::Reloading
        } else {
            WatchState::Watching
        }
    }

    /// Reload immediately, without a file event.
    pub async fn reload_now(&self) -> ReloadOutcome {
        self.shared.process(&[]).await
    }

    /// Stop watching. A reload already running is allowed to finish.
    pub async fn unwatch(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        let backend = self
            .backend
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(backend);
        let _ = self.shared.reload_lock.lock().await;
        if let Some(task) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
        info!("Stopped watching config");
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        let backend = self
            .backend
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(backend);
        if let Some(task) = self.task.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
    }
}

impl fmt::Debug for ConfigWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigWatcher")
            .field("state", &self.state())
            .field("watching_files", &self.watching_files)
            .finish_non_exhaustive()
    }
}

/// Files that can affect the result of `resolved`.
pub fn watched_files(resolved: &ResolvedConfig, options: &ResolveOptions) -> Vec<PathBuf> {
    let config_file = options.config_file_name();
    let short_name = config_file.strip_suffix(".config");
    let rc_file = options.rc_file_name();

    let mut files = Vec::new();
    let mut push = |path: PathBuf| {
        if !files.contains(&path) {
            files.push(path);
        }
    };

    let dirs = std::iter::once(resolved.cwd.as_path())
        .chain(resolved.layers.iter().filter_map(|l| l.cwd.as_deref()));
    for dir in dirs {
        for ext in SUPPORTED_EXTENSIONS {
            push(dir.join(format!("{config_file}{ext}")));
            push(dir.join(".config").join(format!("{config_file}{ext}")));
            if let Some(short) = short_name {
                push(dir.join(".config").join(format!("{short}{ext}")));
            }
        }
        if let Some(rc) = &rc_file {
            push(dir.join(rc));
        }
        if options.package_json.is_enabled() {
            push(dir.join("package.json"));
        }
    }
    for layer in &resolved.layers {
        if let Some(file) = &layer.config_file
            && file.is_absolute()
        {
            push(file.clone());
        }
    }
    files
}

/// Match key for a path: canonical parent directory plus file name.
///
/// Events report canonical paths, which may differ from the configured
/// ones through symlinks. The file and its parent may not exist.
fn watch_key(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?;
    let parent = path.parent()?;
    Some(canonical_dir(parent).join(name))
}

/// Canonicalize the longest existing prefix of `dir` and keep the rest.
fn canonical_dir(dir: &Path) -> PathBuf {
    for ancestor in dir.ancestors() {
        if let Ok(canonical) = std::fs::canonicalize(ancestor) {
            return match dir.strip_prefix(ancestor) {
                Ok(rest) if !rest.as_os_str().is_empty() => canonical.join(rest),
                _ => canonical,
            };
        }
    }
    dir.to_path_buf()
}

fn nearest_existing(dir: &Path) -> Option<PathBuf> {
    dir.ancestors().find(|d| d.is_dir()).map(Path::to_path_buf)
}

/// Maps raw event paths back to watched files and infers change kinds.
struct FileTracker {
    files: HashMap<PathBuf, PathBuf>,
    present: HashSet<PathBuf>,
    armed: BTreeSet<PathBuf>,
}

impl FileTracker {
    fn new(files: &[PathBuf]) -> Self {
        let mut tracker = Self {
            files: HashMap::new(),
            present: HashSet::new(),
            armed: BTreeSet::new(),
        };
        for file in files {
            if let Some(key) = watch_key(file) {
                if file.exists() {
                    tracker.present.insert(key.clone());
                }
                tracker.files.insert(key, file.clone());
            }
        }
        tracker
    }

    fn lookup(&self, event_path: &Path) -> Option<(PathBuf, PathBuf)> {
        let key = watch_key(event_path)?;
        let path = self.files.get(&key)?.clone();
        Some((key, path))
    }

    /// Classify a debounced event, which carries no kind, by comparing
    /// existence before and after.
    fn classify(&mut self, event_path: &Path) -> Option<WatchEvent> {
        let (key, path) = self.lookup(event_path)?;
        let exists = path.exists();
        let existed = if exists {
            !self.present.insert(key)
        } else {
            self.present.remove(&key)
        };
        let kind = match (existed, exists) {
            (false, true) => ChangeType::Created,
            (true, true) => ChangeType::Updated,
            (true, false) => ChangeType::Removed,
            (false, false) => return None,
        };
        Some(WatchEvent { kind, path })
    }

    /// Record a raw event, which already carries its kind.
    fn observe(&mut self, event_path: &Path, kind: ChangeType) -> Option<WatchEvent> {
        let (key, path) = self.lookup(event_path)?;
        if path.exists() {
            self.present.insert(key);
        } else {
            self.present.remove(&key);
        }
        Some(WatchEvent { kind, path })
    }

    /// Directories to watch: each file's parent, or its nearest existing
    /// ancestor while the parent is missing.
    fn watch_targets(&self) -> BTreeSet<PathBuf> {
        self.files
            .keys()
            .filter_map(|key| key.parent())
            .filter_map(nearest_existing)
            .collect()
    }

    /// Watch targets that are not watched yet. Returns the newly armed
    /// directories.
    fn arm(&mut self, backend: &mut Backend) -> notify::Result<Vec<PathBuf>> {
        self.armed.retain(|dir| dir.is_dir());
        let mut added = Vec::new();
        for dir in self.watch_targets() {
            if self.armed.contains(&dir) {
                continue;
            }
            backend.watch_dir(&dir)?;
            self.armed.insert(dir.clone());
            added.push(dir);
        }
        Ok(added)
    }

    /// Files in `dirs` that appeared before those directories were watched.
    fn rescan(&mut self, dirs: &[PathBuf]) -> Vec<WatchEvent> {
        let mut events = Vec::new();
        for (key, path) in &self.files {
            let in_dirs = key.parent().is_some_and(|p| dirs.iter().any(|d| d == p));
            if in_dirs && path.exists() && self.present.insert(key.clone()) {
                events.push(WatchEvent {
                    kind: ChangeType::Created,
                    path: path.clone(),
                });
            }
        }
        events
    }
}

fn raw_change_type(kind: &EventKind) -> Option<ChangeType> {
    match kind {
        EventKind::Create(_) => Some(ChangeType::Created),
        EventKind::Modify(_) => Some(ChangeType::Updated),
        EventKind::Remove(_) => Some(ChangeType::Removed),
        _ => None,
    }
}

/// Turn watcher notices into change events until the watcher is dropped.
///
/// A notice for a path that is not a watched file may be a directory that
/// just appeared, so the watched directories are re-armed then.
fn forward(
    rx: std::sync::mpsc::Receiver<Notice>,
    tx: mpsc::UnboundedSender<WatchEvent>,
    mut tracker: FileTracker,
    backend: SharedBackend,
) {
    while let Ok(notice) = rx.recv() {
        let mut changes = Vec::new();
        let mut rearm = false;
        for path in &notice.paths {
            let change = match notice.kind {
                Some(kind) => tracker.observe(path, kind),
                None => tracker.classify(path),
            };
            match change {
                Some(change) => changes.push(change),
                None => rearm |= tracker.lookup(path).is_none(),
            }
        }
        if rearm {
            let mut guard = backend.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(backend) = guard.as_mut() else {
                return;
            };
            match tracker.arm(backend) {
                Ok(added) => changes.extend(tracker.rescan(&added)),
                Err(e) => warn!("Cannot watch new config directory: {}", e),
            }
        }
        for change in changes {
            debug!("Config change detected: {:?}", change);
            if tx.send(change).is_err() {
                return;
            }
        }
    }
    debug!("Config watcher channel closed, stopping");
}

async fn run(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<WatchEvent>) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(event) = rx.try_recv() {
            if !batch.contains(&event) {
                batch.push(event);
            }
        }
        if shared.closed.load(Ordering::SeqCst) {
            break;
        }
        shared.process(&batch).await;
    }
}

fn start_backend(
    debounce: Option<Duration>,
    notices: std::sync::mpsc::Sender<Notice>,
) -> Result<Backend> {
    match debounce {
        Some(timeout) => {
            let debouncer = new_debouncer(timeout, move |result: DebounceEventResult| match result {
                Ok(events) => {
                    let paths = events.into_iter().map(|event| event.path).collect();
                    let _ = notices.send(Notice { kind: None, paths });
                }
                Err(e) => error!("File watcher error: {}", e),
            })?;
            Ok(Backend::Debounced(debouncer))
        }
        None => {
            let watcher = notify::recommended_watcher(
                move |result: notify::Result<notify::Event>| match result {
                    Ok(event) => {
                        let Some(kind) = raw_change_type(&event.kind) else {
                            return;
                        };
                        let _ = notices.send(Notice {
                            kind: Some(kind),
                            paths: event.paths,
                        });
                    }
                    Err(e) => error!("File watcher error: {}", e),
                },
            )?;
            Ok(Backend::Raw(watcher))
        }
    }
}

/// Resolve the config once and keep it current as its files change.
///
/// Fails only if the initial resolution fails or the file watcher cannot
/// be started. Must be called from within a tokio runtime.
pub async fn watch_config(options: WatchOptions) -> Result<ConfigWatcher> {
    let initial = Arc::new(load_config(&options.resolve).await?);
    let watching_files = watched_files(&initial, &options.resolve);
    let mut tracker = FileTracker::new(&watching_files);

    let (notice_tx, notice_rx) = std::sync::mpsc::channel();
    let mut backend = start_backend(options.debounce, notice_tx)?;
    tracker.arm(&mut backend)?;
    let backend: SharedBackend = Arc::new(Mutex::new(Some(backend)));

    let (tx, rx) = mpsc::unbounded_channel();
    let forward_backend = backend.clone();
    tokio::task::spawn_blocking(move || forward(notice_rx, tx, tracker, forward_backend));
    info!(
        "Watching {} config file candidates in {}",
        watching_files.len(),
        initial.cwd.display()
    );

    let (updates, _) = watch::channel(initial.clone());
    let shared = Arc::new(Shared {
        options: options.resolve,
        hooks: options.hooks,
        current: ArcSwap::new(initial),
        updates,
        closed: AtomicBool::new(false),
        reload_lock: tokio::sync::Mutex::new(()),
    });
    let task = tokio::spawn(run(shared.clone(), rx));

    Ok(ConfigWatcher {
        shared,
        watching_files,
        backend,
        task: Mutex::new(Some(task)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Layer;
    use serde_json::json;
    use tempfile::TempDir;

    fn resolved(cwd: &Path, layers: Vec<Layer>) -> ResolvedConfig {
        ResolvedConfig {
            config: json!({}),
            cwd: cwd.to_path_buf(),
            config_file: cwd.join("app.config"),
            layers,
            source_config_file: None,
            meta: None,
        }
    }

    #[test]
    fn test_watched_files_cover_candidates() {
        let cwd = PathBuf::from("/project");
        let base = PathBuf::from("/project/base");
        let layer = Layer::new(json!({"a": 1}), Some(base.join("theme.yaml"))).with_cwd(base.clone());
        let options = ResolveOptions::new(&cwd).with_name("app");

        let files = watched_files(&resolved(&cwd, vec![layer]), &options);
        assert!(files.contains(&cwd.join("app.config.json")));
        assert!(files.contains(&cwd.join(".config/app.config.toml")));
        assert!(files.contains(&cwd.join(".config/app.yaml")));
        assert!(files.contains(&cwd.join(".apprc")));
        assert!(files.contains(&base.join("app.config.ts")));
        assert!(files.contains(&base.join("theme.yaml")));
        assert!(!files.contains(&cwd.join("package.json")));

        let unique: HashSet<_> = files.iter().collect();
        assert_eq!(unique.len(), files.len());
    }

    #[test]
    fn test_tracker_infers_change_kind() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("app.config.json");
        let mut tracker = FileTracker::new(std::slice::from_ref(&file));

        std::fs::write(&file, "{}").unwrap();
        assert_eq!(tracker.classify(&file).unwrap().kind, ChangeType::Created);
        assert_eq!(tracker.classify(&file).unwrap().kind, ChangeType::Updated);
        std::fs::remove_file(&file).unwrap();
        assert_eq!(tracker.classify(&file).unwrap().kind, ChangeType::Removed);
        assert!(tracker.classify(&file).is_none());
        assert!(tracker.classify(&temp.path().join("other.json")).is_none());
    }

    #[test]
    fn test_missing_directory_is_watched_through_ancestor() {
        let temp = TempDir::new().unwrap();
        let root = std::fs::canonicalize(temp.path()).unwrap();
        let dot_config = root.join(".config");
        let file = dot_config.join("app.config.json");
        let mut tracker = FileTracker::new(std::slice::from_ref(&file));
        assert_eq!(tracker.watch_targets(), BTreeSet::from([root.clone()]));

        std::fs::create_dir(&dot_config).unwrap();
        std::fs::write(&file, "{}").unwrap();
        assert_eq!(tracker.watch_targets(), BTreeSet::from([dot_config.clone()]));

        let created = tracker.rescan(std::slice::from_ref(&dot_config));
        assert_eq!(
            created,
            vec![WatchEvent {
                kind: ChangeType::Created,
                path: file.clone(),
            }]
        );
        assert!(tracker.rescan(std::slice::from_ref(&dot_config)).is_empty());
        assert_eq!(tracker.classify(&file).unwrap().kind, ChangeType::Updated);
    }

    #[test]
    fn test_context_diff_is_cached() {
        let cwd = PathBuf::from("/project");
        let mut old = resolved(&cwd, Vec::new());
        old.config = json!({"port": 80});
        let mut new = old.clone();
        new.config = json!({"port": 443});

        let context = WatchContext::new(Arc::new(old), Arc::new(new));
        let first = context.diff() as *const ConfigDiff;
        assert_eq!(context.diff().len(), 1);
        assert!(std::ptr::eq(first, context.diff()));
    }
}
