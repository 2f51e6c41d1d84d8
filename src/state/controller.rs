/// Media workflow controller
///
/// Owns the in-memory copy of the catalog, the active filter and the
/// transient dialog state, and republishes all of it as one `GalleryState`
/// snapshot after every change. Front ends subscribe to the snapshot and
/// forward user intents back as method calls.
///
/// Store and file work runs on tokio's blocking pool. Results are applied
/// to the state in a single `send_modify`, so a subscriber never observes a
/// half-applied mutation. Two operations launched concurrently are not
/// ordered against each other: whichever finishes last decides the final
/// snapshot.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task;
use tracing::{debug, error, info, warn};

use super::data::{FilterMode, GeoPoint, MediaRecord, NewMediaRecord};
use super::library::MediaStore;
use crate::config::GalleryConfig;
use crate::error::{Error, Result};
use crate::media::geotag::GeotagExtractor;
use crate::media::import;

/// Two-phase delete: a record waits here until confirmed or cancelled
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DeleteState {
    #[default]
    Idle,
    Pending(MediaRecord),
}

/// Result of picking an image for a new entry
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImageSelection {
    /// App-private copy, `None` if copying failed
    pub path: Option<PathBuf>,
    /// Coordinates read from the copy, if any
    pub location: Option<GeoPoint>,
}

/// Everything a front end renders, published as one value
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryState {
    pub all_items: Vec<MediaRecord>,
    /// `all_items` under `active_filter`
    pub visible_items: Vec<MediaRecord>,
    /// `all_items` that can be placed on a map
    pub items_with_location: Vec<MediaRecord>,
    pub active_filter: FilterMode,
    /// `all_items.len() + 1` as of the last refresh
    pub title_counter: usize,
    pub action_menu_item: Option<MediaRecord>,
    pub show_action_menu: bool,
    pub show_edit_dialog: bool,
    pub editing: Option<MediaRecord>,
    pub delete: DeleteState,
    pub show_create_dialog: bool,
    pub selection: Option<ImageSelection>,
}

impl Default for GalleryState {
    fn default() -> Self {
        Self {
            all_items: Vec::new(),
            visible_items: Vec::new(),
            items_with_location: Vec::new(),
            active_filter: FilterMode::All,
            title_counter: 1,
            action_menu_item: None,
            show_action_menu: false,
            show_edit_dialog: false,
            editing: None,
            delete: DeleteState::Idle,
            show_create_dialog: false,
            selection: None,
        }
    }
}

impl GalleryState {
    /// Suggested title for the next new entry
    pub fn default_title(&self) -> String {
        format!("Media Item {}", self.title_counter)
    }

    /// Record currently awaiting delete confirmation
    pub fn pending_delete(&self) -> Option<&MediaRecord> {
        match &self.delete {
            DeleteState::Pending(record) => Some(record),
            DeleteState::Idle => None,
        }
    }

    fn recompute_views(&mut self) {
        self.visible_items = self.active_filter.apply(&self.all_items);
        self.items_with_location = self
            .all_items
            .iter()
            .filter(|r| r.has_location())
            .cloned()
            .collect();
    }
}

/// The parts of `GalleryConfig` the controller acts on
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub media_dir: PathBuf,
    pub default_location: GeoPoint,
    pub remote_placeholder: String,
    pub backfill_missing_location: bool,
    pub prune_grace: Duration,
}

impl From<&GalleryConfig> for ControllerSettings {
    fn from(config: &GalleryConfig) -> Self {
        Self {
            media_dir: config.media_path(),
            default_location: config.default_location,
            remote_placeholder: config.remote_placeholder.clone(),
            backfill_missing_location: config.backfill_missing_location,
            prune_grace: Duration::from_secs(config.prune_grace_secs),
        }
    }
}

struct Inner {
    store: Arc<dyn MediaStore>,
    geotagger: Arc<dyn GeotagExtractor>,
    settings: ControllerSettings,
    state: watch::Sender<GalleryState>,
}

/// Cheap to clone; clones share the same state and store
#[derive(Clone)]
pub struct MediaController {
    inner: Arc<Inner>,
}

impl MediaController {
    /// Create a controller with an empty state. Call `refresh` to load the
    /// catalog.
    pub fn new(
        store: Arc<dyn MediaStore>,
        geotagger: Arc<dyn GeotagExtractor>,
        settings: ControllerSettings,
    ) -> Self {
        let (state, _) = watch::channel(GalleryState::default());
        Self {
            inner: Arc::new(Inner {
                store,
                geotagger,
                settings,
                state,
            }),
        }
    }

    /// Receiver that is notified on every published change
    pub fn subscribe(&self) -> watch::Receiver<GalleryState> {
        self.inner.state.subscribe()
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> GalleryState {
        self.inner.state.borrow().clone()
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.inner.settings
    }

    fn update(&self, f: impl FnOnce(&mut GalleryState)) {
        self.inner.state.send_modify(f);
    }

    /// Run a store call on the blocking pool
    async fn with_store<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn MediaStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.inner.store);
        task::spawn_blocking(move || f(&*store)).await?
    }

    /// Reload every record from the store and republish the derived views
    /// under the active filter.
    pub async fn refresh(&self) -> Result<()> {
        let mut items = match self.with_store(|store| store.get_all()).await {
            Ok(items) => items,
            Err(e) => {
                error!(error = %e, "failed to load media items");
                return Err(e);
            }
        };

        if self.inner.settings.backfill_missing_location {
            let fallback = self.inner.settings.default_location;
            for item in items.iter_mut().filter(|i| i.location.is_none()) {
                debug!(id = item.id, "no stored location, using default origin");
                item.location = Some(fallback);
            }
        }

        let count = items.len();
        self.update(|state| {
            state.all_items = items;
            state.title_counter = count + 1;
            state.recompute_views();
        });

        debug!(count, "media items loaded");
        Ok(())
    }

    /// Switch the list filter. Works on the loaded items only.
    pub fn set_filter(&self, mode: FilterMode) {
        self.update(|state| {
            state.active_filter = mode;
            state.recompute_views();
        });
    }

    /// Copy `image` into app-private storage, read its geotag and publish
    /// both as the pending selection. Never fails: a failed copy yields a
    /// selection with neither path nor location.
    pub async fn select_image(&self, image: PathBuf) -> ImageSelection {
        let media_dir = self.inner.settings.media_dir.clone();
        let geotagger = Arc::clone(&self.inner.geotagger);

        let outcome = task::spawn_blocking(move || {
            let copy = match import::copy_into_storage(&image, &media_dir) {
                Ok(copy) => copy,
                Err(e) => {
                    warn!(path = %image.display(), error = %e, "could not copy selected image");
                    return ImageSelection::default();
                }
            };
            let location = geotagger.extract_location(&copy);
            ImageSelection {
                path: Some(copy),
                location,
            }
        })
        .await;

        let selection = outcome.unwrap_or_else(|e| {
            warn!(error = %e, "image selection task failed");
            ImageSelection::default()
        });

        if selection.path.is_some() && selection.location.is_none() {
            info!("selected image does not contain a valid location");
        }

        let published = selection.clone();
        self.update(|state| state.selection = Some(published));
        selection
    }

    pub fn clear_selection(&self) {
        self.update(|state| state.selection = None);
    }

    /// Insert a new record and reload the catalog.
    ///
    /// `title` must already be validated. `source` falls back to the
    /// configured remote placeholder. The location is the pending
    /// selection's geotag when `source` is that selection's copy, else
    /// `fallback` (e.g. the device position), else the default origin.
    pub async fn create_item(
        &self,
        title: String,
        source: Option<String>,
        is_remote: bool,
        fallback: Option<GeoPoint>,
    ) -> Result<MediaRecord> {
        let settings = &self.inner.settings;
        let source = source.unwrap_or_else(|| settings.remote_placeholder.clone());

        let extracted = self.inner.state.borrow().selection.as_ref().and_then(|sel| {
            let matches = sel
                .path
                .as_ref()
                .is_some_and(|p| p.to_string_lossy() == source.as_str());
            if matches {
                sel.location
            } else {
                None
            }
        });
        let location = extracted.or(fallback).unwrap_or(settings.default_location);

        let record = NewMediaRecord {
            title,
            source,
            created_at: chrono::Utc::now().timestamp_millis(),
            location: Some(location),
            is_remote,
        };
        debug!(title = %record.title, source = %record.source, is_remote, "adding media item");

        let created = match self.with_store(move |store| store.insert(record)).await {
            Ok(created) => created,
            Err(e) => {
                error!(error = %e, "failed to add media item");
                return Err(e);
            }
        };

        // The row is stored; a failed reload must not turn that into an error
        if let Err(e) = self.refresh().await {
            warn!(id = created.id, error = %e, "reload after insert failed, applying new item locally");
            let inserted = created.clone();
            self.update(move |state| {
                if !state.all_items.iter().any(|item| item.id == inserted.id) {
                    state.all_items.push(inserted);
                }
                state.title_counter = state.all_items.len() + 1;
                state.recompute_views();
            });
        }
        self.update(|state| {
            state.selection = None;
            state.show_create_dialog = false;
        });

        info!(id = created.id, title = %created.title, "media item added");
        Ok(created)
    }

    pub fn open_action_menu(&self, item: MediaRecord) {
        self.update(|state| {
            state.action_menu_item = Some(item);
            state.show_action_menu = true;
        });
    }

    /// Close the action menu and the edit dialog
    pub fn close_menus(&self) {
        self.update(|state| {
            state.show_action_menu = false;
            state.show_edit_dialog = false;
            state.editing = None;
        });
    }

    /// Start editing the item the action menu was opened for
    pub fn open_edit_dialog(&self) {
        self.update(|state| {
            state.show_action_menu = false;
            if let Some(item) = state.action_menu_item.clone() {
                state.editing = Some(item);
                state.show_edit_dialog = true;
            }
        });
    }

    pub fn request_edit(&self, item: MediaRecord) {
        self.update(|state| {
            state.show_action_menu = false;
            state.editing = Some(item);
            state.show_edit_dialog = true;
        });
    }

    /// Persist an edited record and swap it into the loaded list.
    ///
    /// `id` selects the record; `created_at` is taken from the loaded copy
    /// whatever the caller passed. Records that are not loaded are rejected
    /// with `NotFound` before the store is touched. On failure the state is
    /// left as it was, including the open edit.
    pub async fn commit_edit(&self, mut updated: MediaRecord) -> Result<MediaRecord> {
        let original_created_at = self
            .inner
            .state
            .borrow()
            .all_items
            .iter()
            .find(|item| item.id == updated.id)
            .map(|item| item.created_at);
        match original_created_at {
            Some(created_at) => updated.created_at = created_at,
            None => {
                warn!(id = updated.id, "edit for an item that is not loaded");
                return Err(Error::NotFound(updated.id));
            }
        }

        let to_store = updated.clone();
        if let Err(e) = self.with_store(move |store| store.update(&to_store)).await {
            error!(id = updated.id, error = %e, "failed to save edited item");
            return Err(e);
        }

        let applied = updated.clone();
        self.update(move |state| {
            if let Some(slot) = state.all_items.iter_mut().find(|item| item.id == applied.id) {
                *slot = applied;
            }
            state.recompute_views();
            state.editing = None;
            state.show_edit_dialog = false;
        });

        info!(id = updated.id, "media item updated");
        Ok(updated)
    }

    /// First phase of a delete: remember the record and ask for confirmation
    pub fn request_delete(&self, item: MediaRecord) {
        self.update(|state| {
            state.action_menu_item = None;
            state.show_action_menu = false;
            state.delete = DeleteState::Pending(item);
        });
    }

    /// Second phase of a delete. `on_result` receives whether the record
    /// was removed; the pending delete is cleared either way.
    pub async fn confirm_delete<F>(&self, on_result: F) -> bool
    where
        F: FnOnce(bool) + Send,
    {
        let Some(item) = self.snapshot().pending_delete().cloned() else {
            debug!("confirm_delete without a pending delete");
            on_result(false);
            return false;
        };

        let target = item.clone();
        let outcome = self.with_store(move |store| store.delete(&target)).await;
        let success = outcome.is_ok();

        self.update(|state| {
            if success {
                state.all_items.retain(|i| i.id != item.id);
                state.recompute_views();
            }
            // A newer request may have replaced ours while the store ran
            if state.pending_delete().map(|p| p.id) == Some(item.id) {
                state.delete = DeleteState::Idle;
            }
        });

        match outcome {
            Ok(()) => info!(id = item.id, title = %item.title, "media item deleted"),
            Err(e) => error!(id = item.id, error = %e, "failed to delete media item"),
        }

        on_result(success);
        success
    }

    pub fn cancel_delete(&self) {
        self.update(|state| state.delete = DeleteState::Idle);
    }

    pub fn open_create_dialog(&self) {
        self.update(|state| state.show_create_dialog = true);
    }

    pub fn close_create_dialog(&self) {
        self.update(|state| state.show_create_dialog = false);
    }

    /// Delete copied images that no record (and no pending selection)
    /// refers to. Returns how many files were removed.
    pub async fn prune_orphans(&self) -> Result<usize> {
        let mut referenced: HashSet<PathBuf> = self
            .with_store(|store| store.get_all())
            .await?
            .into_iter()
            .filter(|r| !r.is_remote)
            .map(|r| PathBuf::from(r.source))
            .collect();
        let pending = self.snapshot().selection.and_then(|s| s.path);
        referenced.extend(pending);

        let media_dir = self.inner.settings.media_dir.clone();
        let grace = self.inner.settings.prune_grace;
        let removed =
            task::spawn_blocking(move || import::prune_orphans(&media_dir, &referenced, grace)).await?;
        Ok(removed)
    }
}
