// src/watch/watcher.rs

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::BuildEvent;
use crate::fs::{FileStamp, FileSystem};
use crate::types::{BoxFuture, Stage, WatchStatus};
use crate::watch::cache::StampCache;
use crate::watch::event_handler::{changes, ChangeKind};
use crate::watch::glob::{expand_all, subfolders, CwdGlob};
use crate::watch::path_utils::parent_dir;

/// Build callback: `(changed paths, every matched path)`.
pub type BuildFn =
    Arc<dyn Fn(Vec<PathBuf>, Vec<PathBuf>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`BuildFn`].
pub fn build_fn<F, Fut>(f: F) -> BuildFn
where
    F: Fn(Vec<PathBuf>, Vec<PathBuf>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |changed, all| Box::pin(f(changed, all)))
}

/// Registration options for [`Watcher::watch`].
#[derive(Clone)]
pub struct Subscription {
    key: Option<String>,
    globs: Vec<CwdGlob>,
    debounce: Duration,
    no_touch: bool,
    no_initial: bool,
    stage: Option<Stage>,
    pkg: Option<String>,
    build: BuildFn,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("globs", &self.globs)
            .field("debounce", &self.debounce)
            .field("no_touch", &self.no_touch)
            .field("no_initial", &self.no_initial)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub fn new(globs: Vec<CwdGlob>, build: BuildFn) -> Self {
        Self {
            key: None,
            globs,
            debounce: Duration::ZERO,
            no_touch: false,
            no_initial: false,
            stage: None,
            pkg: None,
            build,
        }
    }

    /// Key for replacement and cancellation. Unkeyed subscriptions get a
    /// generated one.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn debounce(mut self, window: Duration) -> Self {
        self.debounce = window;
        self
    }

    /// Only react to changes of the matched-file set, never to edits.
    pub fn no_touch(mut self) -> Self {
        self.no_touch = true;
        self
    }

    /// Skip the initial build; the subscription only monitors.
    pub fn no_initial(mut self) -> Self {
        self.no_initial = true;
        self
    }

    /// Stage used as log context for failures.
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Package used as log context for failures.
    pub fn pkg(mut self, pkg: impl Into<String>) -> Self {
        self.pkg = Some(pkg.into());
        self
    }
}

struct Live {
    opts: Subscription,
    generation: u64,
    status: Option<WatchStatus>,
    file_times: BTreeMap<PathBuf, FileStamp>,
    pending_rename: bool,
    pending_files: BTreeSet<PathBuf>,
    timer: Option<JoinHandle<()>>,
    /// Held for the whole of a fire, so builds of one subscription never
    /// overlap and events arriving meanwhile land in the next fire.
    build_lock: Arc<tokio::sync::Mutex<()>>,
}

#[derive(Default)]
struct State {
    subs: HashMap<String, Live>,
    /// Watched directory -> keys of the subscriptions that need it.
    dirs: HashMap<PathBuf, HashSet<String>>,
}

struct Inner {
    fs: Arc<dyn FileSystem>,
    state: Mutex<State>,
    stamps: Mutex<StampCache>,
    os: Mutex<Option<RecommendedWatcher>>,
    events: Option<mpsc::UnboundedSender<BuildEvent>>,
    next_id: AtomicU64,
}

/// Debounced, glob-scoped change notifier shared by every pipeline.
///
/// Cloning is cheap; all clones share the same subscriptions and OS
/// watches. In one-shot mode (`live == false`) no OS watches are opened and
/// subscriptions only run their initial build.
#[derive(Clone)]
pub struct Watcher {
    inner: Arc<Inner>,
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("blocking watch task panicked")
}

impl Watcher {
    /// Create a watcher. `events` receives [`BuildEvent::WatchSettled`]
    /// after each successful rebuild.
    pub fn new(
        fs: Arc<dyn FileSystem>,
        live: bool,
        events: Option<mpsc::UnboundedSender<BuildEvent>>,
    ) -> Result<Self> {
        let inner = Arc::new(Inner {
            fs,
            state: Mutex::new(State::default()),
            stamps: Mutex::new(StampCache::new()),
            os: Mutex::new(None),
            events,
            next_id: AtomicU64::new(1),
        });

        if live {
            let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
            let os = RecommendedWatcher::new(
                move |res: notify::Result<Event>| match res {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            debug!("watch event dropped; watcher is gone");
                        }
                    }
                    Err(err) => warn!("file watch error: {err}"),
                },
                Config::default(),
            )?;
            *lock(&inner.os) = Some(os);

            let weak = Arc::downgrade(&inner);
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    let watcher = Watcher { inner };
                    for (path, kind) in changes(event) {
                        watcher.handle_change(&path, kind);
                    }
                }
                debug!("watch event loop finished");
            });
            info!("file watching enabled");
        }

        Ok(Self { inner })
    }

    pub fn is_live(&self) -> bool {
        lock(&self.inner.os).is_some()
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.inner.fs
    }

    /// Register `sub` and, unless it is `no_initial`, run its first build
    /// before returning.
    ///
    /// A keyed registration first stops any live subscription with the same
    /// key. An empty glob list registers nothing.
    pub async fn watch(&self, sub: Subscription) -> Result<()> {
        if sub.globs.is_empty() {
            return Ok(());
        }
        let key = match &sub.key {
            Some(key) => {
                self.stop(key);
                key.clone()
            }
            None => format!(
                "watch-{}",
                self.inner.next_id.fetch_add(1, Ordering::Relaxed)
            ),
        };
        let generation = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let no_initial = sub.no_initial;
        let (file_times, folders) = {
            let this = self.clone();
            let globs = sub.globs.clone();
            blocking(move || {
                let times = if no_initial {
                    this.glob_stamps(&globs)
                } else {
                    BTreeMap::new()
                };
                let fs = this.inner.fs.as_ref();
                let folders: BTreeSet<PathBuf> = globs
                    .iter()
                    .flat_map(|g| {
                        let scope = g.scope(fs);
                        subfolders(fs, &scope.dir, scope.depth)
                    })
                    .collect();
                (times, folders)
            })
            .await?
        };

        {
            let mut state = lock(&self.inner.state);
            for folder in folders {
                self.add_dir_watch(&mut state, folder, &key);
            }
            state.subs.insert(
                key.clone(),
                Live {
                    opts: sub,
                    generation,
                    status: no_initial.then_some(WatchStatus::Ok),
                    file_times,
                    pending_rename: !no_initial,
                    pending_files: BTreeSet::new(),
                    timer: None,
                    build_lock: Arc::new(tokio::sync::Mutex::new(())),
                },
            );
        }
        debug!(key = %key, no_initial, "watch registered");

        if !no_initial {
            self.fire(&key, generation).await;
        }
        Ok(())
    }

    /// Stop the subscription `key`, releasing directory watches nobody else
    /// needs. Unknown keys are ignored.
    pub fn stop(&self, key: &str) {
        let mut state = lock(&self.inner.state);
        if let Some(sub) = state.subs.remove(key) {
            if let Some(timer) = sub.timer {
                timer.abort();
            }
            debug!(key, "watch stopped");
        }

        let mut released = Vec::new();
        state.dirs.retain(|dir, keys| {
            if keys.remove(key) && keys.is_empty() {
                released.push(dir.clone());
                false
            } else {
                true
            }
        });

        if let Some(os) = lock(&self.inner.os).as_mut() {
            for dir in released {
                if let Err(err) = os.unwatch(&dir) {
                    debug!("unwatch {:?}: {err}", dir);
                }
            }
        }
    }

    /// Register several subscriptions concurrently and wait for every
    /// initial build. The first registration error is returned after all
    /// have finished.
    pub async fn watch_all(&self, subs: Vec<Subscription>) -> Result<()> {
        let mut set = tokio::task::JoinSet::new();
        for sub in subs {
            let watcher = self.clone();
            set.spawn(async move { watcher.watch(sub).await });
        }
        let mut first_err = None;
        while let Some(joined) = set.join_next().await {
            let res = joined.context("watch registration panicked").and_then(|r| r);
            if let Err(err) = res {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Stop every subscription.
    pub fn stop_all(&self) {
        let keys: Vec<String> = lock(&self.inner.state).subs.keys().cloned().collect();
        for key in keys {
            self.stop(&key);
        }
    }

    /// True when at least one building (non-`no_initial`) subscription
    /// exists and every subscription's last build succeeded.
    pub fn watch_ok(&self) -> bool {
        let state = lock(&self.inner.state);
        state.subs.values().any(|s| !s.opts.no_initial)
            && state
                .subs
                .values()
                .all(|s| s.status == Some(WatchStatus::Ok))
    }

    /// Last build result of `key`; `None` while pending or when unknown.
    pub fn status(&self, key: &str) -> Option<WatchStatus> {
        lock(&self.inner.state).subs.get(key).and_then(|s| s.status)
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.inner.state).subs.contains_key(key)
    }

    /// Directories currently watched, sorted.
    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = lock(&self.inner.state).dirs.keys().cloned().collect();
        dirs.sort();
        dirs
    }

    fn add_dir_watch(&self, state: &mut State, dir: PathBuf, key: &str) {
        if let Some(keys) = state.dirs.get_mut(&dir) {
            keys.insert(key.to_string());
            return;
        }
        if let Some(os) = lock(&self.inner.os).as_mut() {
            if let Err(err) = os.watch(&dir, RecursiveMode::NonRecursive) {
                warn!("cannot watch {:?}: {err}", dir);
                return;
            }
        }
        state.dirs.insert(dir, HashSet::from([key.to_string()]));
    }

    /// Route one filesystem change to the subscriptions watching its
    /// directory and (re)start their debounce timers.
    pub fn handle_change(&self, path: &Path, kind: ChangeKind) {
        let mut state = lock(&self.inner.state);
        let Some(keys) = state.dirs.get(&parent_dir(path)).cloned() else {
            return;
        };

        match kind {
            ChangeKind::Rename => lock(&self.inner.stamps).invalidate(path),
            ChangeKind::Modify => {
                let content_watched = keys.iter().any(|k| {
                    state
                        .subs
                        .get(k)
                        .is_some_and(|s| !s.opts.no_touch)
                });
                if content_watched {
                    if let Err(err) = lock(&self.inner.stamps).refresh(self.inner.fs.as_ref(), path) {
                        debug!("stat {:?}: {err}", path);
                    }
                }
            }
        }

        for key in keys {
            let Some(sub) = state.subs.get_mut(&key) else {
                continue;
            };
            if !sub.opts.globs.iter().any(|g| g.matches(path)) {
                continue;
            }
            match kind {
                ChangeKind::Rename => sub.pending_rename = true,
                ChangeKind::Modify => {
                    sub.pending_files.insert(path.to_path_buf());
                }
            }
            self.arm(&key, sub);
        }
    }

    fn arm(&self, key: &str, sub: &mut Live) {
        if let Some(timer) = sub.timer.take() {
            timer.abort();
        }
        let watcher = self.clone();
        let key = key.to_string();
        let generation = sub.generation;
        let window = sub.opts.debounce;
        // The timer only sleeps; aborting it on re-arm never cancels a
        // build that is already running.
        sub.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            tokio::spawn(async move { watcher.fire(&key, generation).await });
        }));
    }

    async fn fire(&self, key: &str, generation: u64) {
        let build_lock = {
            let state = lock(&self.inner.state);
            match state.subs.get(key) {
                Some(sub) if sub.generation == generation => Arc::clone(&sub.build_lock),
                _ => return,
            }
        };
        let _guard = build_lock.lock().await;

        let (rename, touched, previous, opts) = {
            let mut state = lock(&self.inner.state);
            let Some(sub) = state.subs.get_mut(key).filter(|s| s.generation == generation) else {
                return;
            };
            (
                std::mem::take(&mut sub.pending_rename),
                std::mem::take(&mut sub.pending_files),
                sub.file_times.clone(),
                sub.opts.clone(),
            )
        };

        let detected = {
            let this = self.clone();
            let globs = opts.globs.clone();
            let no_touch = opts.no_touch;
            blocking(move || this.detect_changes(rename, touched, &globs, no_touch, previous)).await
        };
        let (changed, times) = match detected {
            Ok(found) => found,
            Err(err) => {
                error!(key, "change detection failed: {err:#}");
                return;
            }
        };

        let all: Vec<PathBuf> = times.keys().cloned().collect();
        {
            let mut state = lock(&self.inner.state);
            let Some(sub) = state.subs.get_mut(key).filter(|s| s.generation == generation) else {
                return;
            };
            sub.file_times = times;
            if changed.is_empty() {
                return;
            }
            sub.status = None;
        }

        debug!(key, changed = changed.len(), "watch fired");
        let result = (opts.build)(changed, all).await;

        {
            let mut state = lock(&self.inner.state);
            if let Some(sub) = state.subs.get_mut(key).filter(|s| s.generation == generation) {
                sub.status = Some(if result.is_ok() {
                    WatchStatus::Ok
                } else {
                    WatchStatus::Error
                });
            }
        }

        match result {
            Ok(()) => {
                if let Some(events) = &self.inner.events {
                    let _ = events.send(BuildEvent::WatchSettled);
                }
            }
            Err(err) => {
                let message = format!("{err:#}");
                if !message.is_empty() {
                    let ctx = opts.stage.map(|s| s.as_str()).unwrap_or("watch");
                    match &opts.pkg {
                        Some(pkg) => error!(ctx, pkg = %pkg, "{message}"),
                        None => error!(ctx, "{message}"),
                    }
                }
            }
        }
    }

    /// Compute the changed set for one fire, and the file stamps to keep.
    fn detect_changes(
        &self,
        rename: bool,
        touched: BTreeSet<PathBuf>,
        globs: &[CwdGlob],
        no_touch: bool,
        previous: BTreeMap<PathBuf, FileStamp>,
    ) -> (Vec<PathBuf>, BTreeMap<PathBuf, FileStamp>) {
        if rename {
            let current = self.glob_stamps(globs);
            let changed = if no_touch {
                let old: BTreeSet<&PathBuf> = previous.keys().collect();
                let new: BTreeSet<&PathBuf> = current.keys().collect();
                old.symmetric_difference(&new)
                    .map(|p| (*p).clone())
                    .collect()
            } else {
                current
                    .iter()
                    .filter(|(path, stamp)| previous.get(*path) != Some(*stamp))
                    .map(|(path, _)| path.clone())
                    .collect()
            };
            return (changed, current);
        }

        let mut times = previous;
        let mut changed = Vec::new();
        if !no_touch {
            let mut stamps = lock(&self.inner.stamps);
            for file in touched {
                let Ok(stamp) = stamps.get_or_stat(self.inner.fs.as_ref(), &file) else {
                    continue;
                };
                if times.get(&file) == Some(&stamp) {
                    continue;
                }
                times.insert(file.clone(), stamp);
                changed.push(file);
            }
        }
        (changed, times)
    }

    fn glob_stamps(&self, globs: &[CwdGlob]) -> BTreeMap<PathBuf, FileStamp> {
        let fs = self.inner.fs.as_ref();
        let files = expand_all(fs, globs);
        let mut stamps = lock(&self.inner.stamps);
        files
            .into_iter()
            .filter_map(|f| stamps.get_or_stat(fs, &f).ok().map(|s| (f, s)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    type Calls = Arc<Mutex<Vec<(Vec<PathBuf>, Vec<PathBuf>)>>>;

    fn recorder() -> (Calls, BuildFn) {
        let calls: Calls = Arc::default();
        let sink = Arc::clone(&calls);
        let build = build_fn(move |changed, all| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push((changed, all));
                Ok(())
            }
        });
        (calls, build)
    }

    fn fixture() -> (MockFileSystem, Watcher) {
        let fs = MockFileSystem::new();
        fs.add_file("/ws/src/a.ts", "a");
        fs.add_file("/ws/src/b.ts", "b");
        let watcher = Watcher::new(Arc::new(fs.clone()), false, None).unwrap();
        (fs, watcher)
    }

    fn glob(pattern: &str) -> Vec<CwdGlob> {
        vec![CwdGlob::new("/ws", pattern).unwrap()]
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(120)).await;
    }

    #[tokio::test]
    async fn initial_fire_reports_every_match() {
        let (_fs, watcher) = fixture();
        let (calls, build) = recorder();
        watcher
            .watch(Subscription::new(glob("src/*.ts"), build).key("k"))
            .await
            .unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.len(), 2);
        assert_eq!(watcher.status("k"), Some(WatchStatus::Ok));
        assert!(watcher.watch_ok());
    }

    #[tokio::test]
    async fn modify_fires_once_per_debounce_window() {
        let (fs, watcher) = fixture();
        let (calls, build) = recorder();
        watcher
            .watch(
                Subscription::new(glob("src/*.ts"), build)
                    .key("k")
                    .debounce(Duration::from_millis(30)),
            )
            .await
            .unwrap();

        fs.add_file("/ws/src/a.ts", "a2");
        watcher.handle_change(Path::new("/ws/src/a.ts"), ChangeKind::Modify);
        watcher.handle_change(Path::new("/ws/src/a.ts"), ChangeKind::Modify);
        settle().await;

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, vec![PathBuf::from("/ws/src/a.ts")]);
        assert_eq!(calls[1].1.len(), 2);
    }

    #[tokio::test]
    async fn unchanged_touch_does_not_rebuild() {
        let (_fs, watcher) = fixture();
        let (calls, build) = recorder();
        watcher
            .watch(Subscription::new(glob("src/*.ts"), build).key("k"))
            .await
            .unwrap();

        watcher.handle_change(Path::new("/ws/src/a.ts"), ChangeKind::Modify);
        settle().await;
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn no_touch_ignores_edits_but_sees_new_files() {
        let (fs, watcher) = fixture();
        let (calls, build) = recorder();
        watcher
            .watch(Subscription::new(glob("src/*.ts"), build).key("k").no_touch())
            .await
            .unwrap();

        fs.add_file("/ws/src/a.ts", "edited");
        watcher.handle_change(Path::new("/ws/src/a.ts"), ChangeKind::Modify);
        settle().await;
        assert_eq!(calls.lock().unwrap().len(), 1);

        fs.add_file("/ws/src/c.ts", "new");
        watcher.handle_change(Path::new("/ws/src/c.ts"), ChangeKind::Rename);
        settle().await;
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, vec![PathBuf::from("/ws/src/c.ts")]);
    }

    #[tokio::test]
    async fn no_initial_monitors_without_building() {
        let (fs, watcher) = fixture();
        let (calls, build) = recorder();
        watcher
            .watch(Subscription::new(glob("src/*.ts"), build).key("m").no_initial())
            .await
            .unwrap();
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(watcher.status("m"), Some(WatchStatus::Ok));
        // Only monitors registered.
        assert!(!watcher.watch_ok());

        fs.add_file("/ws/src/b.ts", "changed");
        watcher.handle_change(Path::new("/ws/src/b.ts"), ChangeKind::Modify);
        settle().await;
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failing_build_marks_error_until_next_success() {
        let (fs, watcher) = fixture();
        let fail = Arc::new(Mutex::new(true));
        let flag = Arc::clone(&fail);
        let build = build_fn(move |_, _| {
            let fail = *flag.lock().unwrap();
            async move {
                if fail {
                    anyhow::bail!("boom")
                }
                Ok(())
            }
        });
        watcher
            .watch(Subscription::new(glob("src/*.ts"), build).key("k"))
            .await
            .unwrap();
        assert_eq!(watcher.status("k"), Some(WatchStatus::Error));
        assert!(!watcher.watch_ok());

        *fail.lock().unwrap() = false;
        fs.add_file("/ws/src/a.ts", "fixed");
        watcher.handle_change(Path::new("/ws/src/a.ts"), ChangeKind::Modify);
        settle().await;
        assert_eq!(watcher.status("k"), Some(WatchStatus::Ok));
    }

    #[tokio::test]
    async fn rekeying_releases_old_directories() {
        let fs = MockFileSystem::new();
        fs.add_file("/ws/a/x.ts", "");
        fs.add_file("/ws/b/y.ts", "");
        let watcher = Watcher::new(Arc::new(fs), false, None).unwrap();

        let (calls, build) = recorder();
        let a = vec![CwdGlob::new("/ws", "a/*.ts").unwrap()];
        let b = vec![CwdGlob::new("/ws", "b/*.ts").unwrap()];
        watcher
            .watch(Subscription::new(a.clone(), build.clone()).key("k"))
            .await
            .unwrap();
        watcher
            .watch(Subscription::new(a, build.clone()).key("other"))
            .await
            .unwrap();
        watcher
            .watch(Subscription::new(b, build).key("k"))
            .await
            .unwrap();

        assert_eq!(
            watcher.watched_dirs(),
            vec![PathBuf::from("/ws/a"), PathBuf::from("/ws/b")]
        );
        watcher.stop("other");
        assert_eq!(watcher.watched_dirs(), vec![PathBuf::from("/ws/b")]);
        assert_eq!(calls.lock().unwrap().len(), 3);

        watcher.stop_all();
        assert!(watcher.watched_dirs().is_empty());
        assert!(!watcher.contains("k"));
    }
}
