//! File system watcher for live sync.
//!
//! Wraps the `notify` recommended watcher and turns its raw events into
//! [`FsEvent`]s: rename halves are paired, deletions learn whether they hit
//! a directory, and events are held until their path has been quiet for the
//! debounce window.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::event::{ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Result;

/// How long half of a rename waits for its partner.
pub const RENAME_PAIR_WINDOW: Duration = Duration::from_millis(500);

/// A change below the watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Created(PathBuf),
    /// File content changed.
    Changed(PathBuf),
    Deleted { path: PathBuf, is_dir: bool },
    Renamed { from: PathBuf, to: PathBuf },
}

impl FsEvent {
    /// The path the event is about; the new path for renames.
    pub fn path(&self) -> &Path {
        match self {
            FsEvent::Created(path) | FsEvent::Changed(path) => path,
            FsEvent::Deleted { path, .. } => path,
            FsEvent::Renamed { to, .. } => to,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FsEvent::Created(_) => "created",
            FsEvent::Changed(_) => "changed",
            FsEvent::Deleted { .. } => "deleted",
            FsEvent::Renamed { .. } => "renamed",
        }
    }
}

/// A rename half still waiting for its partner.
#[derive(Debug)]
struct PendingHalf {
    path: PathBuf,
    from: bool,
    at: Instant,
}

/// Turns raw notify events into [`FsEvent`]s.
///
/// Keeps the set of directories below the root, because a deleted path can
/// no longer be inspected and not every platform says what it was.
#[derive(Debug, Default)]
pub struct EventTranslator {
    known_dirs: HashSet<PathBuf>,
    halves: HashMap<usize, Vec<PendingHalf>>,
}

impl EventTranslator {
    pub fn new(known_dirs: HashSet<PathBuf>) -> Self {
        Self {
            known_dirs,
            halves: HashMap::new(),
        }
    }

    /// Every directory below `root`, found by a recursive scan.
    pub fn scan(root: &Path) -> Self {
        Self::new(directories_below(root).collect())
    }

    pub fn is_known_dir(&self, path: &Path) -> bool {
        self.known_dirs.contains(path)
    }

    pub fn has_pending(&self) -> bool {
        !self.halves.is_empty()
    }

    pub fn translate(&mut self, event: Event) -> Vec<FsEvent> {
        let mut out = Vec::new();
        match event.kind {
            EventKind::Create(_) => {
                for path in event.paths {
                    self.created(path, &mut out);
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => {
                self.renamed(mode, event.attrs.tracker(), event.paths, &mut out);
            }
            EventKind::Modify(ModifyKind::Metadata(_)) => {}
            EventKind::Modify(_) => {
                for path in event.paths {
                    if path.is_file() {
                        out.push(FsEvent::Changed(path));
                    }
                }
            }
            EventKind::Remove(kind) => {
                for path in event.paths {
                    let is_dir = match kind {
                        RemoveKind::Folder => true,
                        RemoveKind::File => false,
                        _ => self.known_dirs.contains(&path),
                    };
                    self.deleted(path, is_dir, &mut out);
                }
            }
            EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
        }
        out
    }

    /// Resolve rename halves older than `RENAME_PAIR_WINDOW`.
    pub fn flush_expired(&mut self, now: Instant) -> Vec<FsEvent> {
        let expired: Vec<usize> = self
            .halves
            .iter()
            .filter(|(_, halves)| {
                halves
                    .iter()
                    .all(|h| now.duration_since(h.at) >= RENAME_PAIR_WINDOW)
            })
            .map(|(cookie, _)| *cookie)
            .collect();

        let mut out = Vec::new();
        for cookie in expired {
            if let Some(halves) = self.halves.remove(&cookie) {
                self.resolve_unpaired(halves, &mut out);
            }
        }
        out
    }

    /// Resolve every pending half, e.g. when the watcher stops.
    pub fn flush_all(&mut self) -> Vec<FsEvent> {
        let mut out = Vec::new();
        let halves: Vec<_> = self.halves.drain().flat_map(|(_, h)| h).collect();
        self.resolve_unpaired(halves, &mut out);
        out
    }

    fn created(&mut self, path: PathBuf, out: &mut Vec<FsEvent>) {
        if path.is_dir() {
            // A tree moved in arrives as one event for its top directory.
            self.known_dirs.extend(directories_below(&path));
            self.known_dirs.insert(path.clone());
        }
        out.push(FsEvent::Created(path));
    }

    fn deleted(&mut self, path: PathBuf, is_dir: bool, out: &mut Vec<FsEvent>) {
        if is_dir {
            self.known_dirs.retain(|d| !d.starts_with(&path));
        }
        out.push(FsEvent::Deleted { path, is_dir });
    }

    fn renamed(
        &mut self,
        mode: RenameMode,
        tracker: Option<usize>,
        paths: Vec<PathBuf>,
        out: &mut Vec<FsEvent>,
    ) {
        match (mode, tracker) {
            (RenameMode::Both, _) if paths.len() == 2 => {
                if let Some(cookie) = tracker {
                    self.halves.remove(&cookie);
                } else {
                    self.halves
                        .retain(|_, hs| !hs.iter().any(|h| paths.contains(&h.path)));
                }
                let mut paths = paths.into_iter();
                if let (Some(from), Some(to)) = (paths.next(), paths.next()) {
                    self.moved_dirs(&from, &to);
                    out.push(FsEvent::Renamed { from, to });
                }
            }
            (RenameMode::From, Some(cookie)) | (RenameMode::To, Some(cookie)) => {
                let from = mode == RenameMode::From;
                let halves = self.halves.entry(cookie).or_default();
                for path in paths {
                    halves.push(PendingHalf {
                        path,
                        from,
                        at: Instant::now(),
                    });
                }
            }
            // Unpaired reports: the platform cannot tell us the partner, so
            // the path's current state decides.
            _ => {
                for path in paths {
                    if path.exists() {
                        self.created(path, out);
                    } else {
                        let is_dir = self.known_dirs.contains(&path);
                        self.deleted(path, is_dir, out);
                    }
                }
            }
        }
    }

    fn resolve_unpaired(&mut self, halves: Vec<PendingHalf>, out: &mut Vec<FsEvent>) {
        for half in halves {
            if half.from {
                let is_dir = self.known_dirs.contains(&half.path);
                self.deleted(half.path, is_dir, out);
            } else {
                self.created(half.path, out);
            }
        }
    }

    fn moved_dirs(&mut self, from: &Path, to: &Path) {
        let moved: Vec<PathBuf> = self
            .known_dirs
            .iter()
            .filter(|d| d.starts_with(from))
            .cloned()
            .collect();
        for dir in moved {
            self.known_dirs.remove(&dir);
            if let Ok(rest) = dir.strip_prefix(from) {
                self.known_dirs.insert(to.join(rest));
            }
        }
        if to.is_dir() {
            self.known_dirs.insert(to.to_path_buf());
        }
    }
}

/// Directories below `dir`, not including `dir` itself. Symlinks are not
/// followed; unreadable entries are logged and skipped.
fn directories_below(dir: &Path) -> impl Iterator<Item = PathBuf> {
    jwalk::WalkDir::new(dir)
        .skip_hidden(false)
        .follow_links(false)
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => entry.file_type().is_dir().then(|| entry.path()),
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                None
            }
        })
}

/// Async watcher over a directory tree.
pub struct LocalWatcher {
    _watcher: RecommendedWatcher,
    receiver: mpsc::UnboundedReceiver<notify::Result<Event>>,
    translator: EventTranslator,
    debouncer: EventDebouncer,
    ready: VecDeque<FsEvent>,
    root: PathBuf,
}

impl LocalWatcher {
    /// Start watching `root` recursively.
    pub fn new(root: &Path, debounce: Duration) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            },
            Config::default().with_poll_interval(Duration::from_secs(1)),
        )?;
        watcher.watch(root, RecursiveMode::Recursive)?;

        Ok(Self {
            _watcher: watcher,
            receiver: rx,
            translator: EventTranslator::scan(root),
            debouncer: EventDebouncer::new(debounce),
            ready: VecDeque::new(),
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Next translated event, or `None` once the watcher is gone.
    pub async fn next_event(&mut self) -> Option<FsEvent> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Some(event);
            }
            let released = self.debouncer.take_ready(Instant::now());
            if !released.is_empty() {
                self.ready.extend(released);
                continue;
            }

            let received = match self.next_wakeup(Instant::now()) {
                Some(wait) => match tokio::time::timeout(wait, self.receiver.recv()).await {
                    Ok(received) => received,
                    Err(_) => {
                        let flushed = self.translator.flush_expired(Instant::now());
                        self.debouncer.extend(flushed, Instant::now());
                        continue;
                    }
                },
                None => self.receiver.recv().await,
            };

            match received {
                Some(Ok(raw)) => {
                    debug!(kind = ?raw.kind, paths = ?raw.paths, "raw watcher event");
                    let now = Instant::now();
                    let events = self.translator.translate(raw);
                    self.debouncer.extend(events, now);
                    let flushed = self.translator.flush_expired(now);
                    self.debouncer.extend(flushed, now);
                }
                Some(Err(err)) => warn!(error = %err, "watcher reported an error"),
                None => {
                    let flushed = self.translator.flush_all();
                    self.debouncer.extend(flushed, Instant::now());
                    self.ready.extend(self.debouncer.drain());
                    return self.ready.pop_front();
                }
            }
        }
    }

    /// How long to wait for raw events before something pending is due.
    fn next_wakeup(&self, now: Instant) -> Option<Duration> {
        let rename = self.translator.has_pending().then_some(RENAME_PAIR_WINDOW);
        match (self.debouncer.next_due(now), rename) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Holds events until their path has been quiet for a short window.
///
/// A write usually produces a create followed by several modify
/// notifications. Handing the create over immediately would upload a file
/// that is still being written, so an event is released only once no
/// further event for its path arrived within the window. Repeats fold into
/// the pending event; a file created and deleted again inside the window
/// produces nothing. Events are released in arrival order.
#[derive(Debug)]
pub struct EventDebouncer {
    window: Duration,
    pending: VecDeque<(Instant, FsEvent)>,
}

impl EventDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: VecDeque::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Queue an event seen at `now`.
    pub fn push(&mut self, event: FsEvent, now: Instant) {
        // Any activity on a path keeps its pending events waiting.
        for (seen, pending) in self.pending.iter_mut() {
            if pending.path() == event.path() {
                *seen = now;
            }
        }

        match &event {
            FsEvent::Changed(path) => {
                let folded = self.pending.iter().any(|(_, p)| match p {
                    FsEvent::Created(p) | FsEvent::Changed(p) => p == path,
                    _ => false,
                });
                if folded {
                    return;
                }
            }
            FsEvent::Created(path) => {
                if self
                    .pending
                    .iter()
                    .any(|(_, p)| matches!(p, FsEvent::Created(p) if p == path))
                {
                    return;
                }
            }
            FsEvent::Deleted { path, .. } => {
                let created = self
                    .pending
                    .iter()
                    .any(|(_, p)| matches!(p, FsEvent::Created(p) if p == path));
                self.pending.retain(|(_, p)| match p {
                    FsEvent::Created(p) | FsEvent::Changed(p) => p != path,
                    _ => true,
                });
                if created {
                    debug!(path = %path.display(), "created and deleted inside the window");
                    return;
                }
            }
            // A file renamed before its create went out is just created
            // under the new name.
            FsEvent::Renamed { from, to } => {
                let created = self
                    .pending
                    .iter()
                    .position(|(_, p)| matches!(p, FsEvent::Created(p) if p == from));
                if let Some(index) = created {
                    self.pending[index] = (now, FsEvent::Created(to.clone()));
                    self.pending
                        .retain(|(_, p)| !matches!(p, FsEvent::Changed(p) if p == from));
                    return;
                }
            }
        }
        self.pending.push_back((now, event));
    }

    pub fn extend(&mut self, events: Vec<FsEvent>, now: Instant) {
        for event in events {
            self.push(event, now);
        }
    }

    /// Release the leading events whose path has been quiet for the window.
    pub fn take_ready(&mut self, now: Instant) -> Vec<FsEvent> {
        let mut ready = Vec::new();
        while let Some((seen, _)) = self.pending.front() {
            if now.duration_since(*seen) < self.window {
                break;
            }
            if let Some((_, event)) = self.pending.pop_front() {
                ready.push(event);
            }
        }
        ready
    }

    /// Time until the next event is released, if any is pending.
    pub fn next_due(&self, now: Instant) -> Option<Duration> {
        self.pending
            .front()
            .map(|(seen, _)| (*seen + self.window).saturating_duration_since(now))
    }

    /// Release everything regardless of age.
    pub fn drain(&mut self) -> Vec<FsEvent> {
        self.pending.drain(..).map(|(_, event)| event).collect()
    }
}
