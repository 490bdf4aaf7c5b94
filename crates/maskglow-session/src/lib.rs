//! maskglow-session: debounced, cache-backed highlight driver.
//!
//! A [`HighlightSession`] owns everything that changes while a user
//! clicks through detected items on one uploaded image: the source and
//! its masks, the [`ResultCache`], and the latest requested selection.
//! All work runs on one thread under cooperative scheduling (a tokio
//! current-thread runtime inside a `LocalSet`), so state lives in
//! `Rc<RefCell<..>>` and no borrow is held across an `.await`.
//!
//! Ordering rules:
//!
//! - Every request bumps a generation counter. A computation whose
//!   generation is no longer current is discarded when it completes,
//!   so the displayed highlight always belongs to the newest request.
//! - [`HighlightSession::select`] waits out the debounce window before
//!   doing any work, so a burst of selections composites only the last.
//! - [`HighlightSession::on_image_changed`] empties the cache and makes
//!   every in-flight computation stale.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use maskglow_pipeline::pipeline::{self, HighlightOutcome, InstanceMasks, Prepared};
use maskglow_pipeline::{
    DetectionResponse, Dimensions, HighlightStyle, InstanceId, PipelineError, ResultCache,
    RgbaImage, Selection, SourceKey, raster,
};
use serde::{Deserialize, Serialize};

/// Session tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Quiet period a selection must survive before it is rendered,
    /// in milliseconds.
    pub debounce_ms: u64,
    /// Visual constants for the highlight.
    pub style: HighlightStyle,
}

impl SessionConfig {
    /// Default debounce window in milliseconds.
    pub const DEFAULT_DEBOUNCE_MS: u64 = 150;

    /// The debounce window as a [`Duration`].
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debounce_ms: Self::DEFAULT_DEBOUNCE_MS,
            style: HighlightStyle::NEON,
        }
    }
}

/// An uploaded image and the masks detected on it.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSource {
    /// Encoded image bytes as uploaded.
    pub bytes: Vec<u8>,
    /// Mask payloads keyed by instance.
    pub masks: InstanceMasks,
}

impl ImageSource {
    /// Pair image bytes with their masks.
    #[must_use]
    pub const fn new(bytes: Vec<u8>, masks: InstanceMasks) -> Self {
        Self { bytes, masks }
    }

    /// Pair image bytes with the masks of a detection response.
    #[must_use]
    pub fn from_detection(bytes: Vec<u8>, response: &DetectionResponse) -> Self {
        Self::new(bytes, response.instance_masks())
    }

    /// Identity of the image bytes.
    #[must_use]
    pub fn key(&self) -> SourceKey {
        SourceKey::from_bytes(&self.bytes)
    }
}

/// Errors surfaced by [`HighlightSession::select`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No image has been loaded yet.
    #[error("no image loaded")]
    NoImage,

    /// The pipeline could not produce a result; the previous display
    /// is kept.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// How a [`HighlightSession::select`] call ended.
#[derive(Debug)]
pub enum SelectOutcome {
    /// The result is now displayed.
    Displayed(Rc<HighlightOutcome>),
    /// A newer request or image replaced this one; nothing was applied.
    Superseded,
    /// The request failed; the previous display is unchanged.
    Failed(SessionError),
}

/// Counters for observing debounce and cache behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Compositing runs started (cache misses that survived debounce).
    pub composites_started: u64,
    /// Requests answered from the cache.
    pub cache_hits: u64,
    /// Finished computations dropped because they were stale.
    pub discarded: u64,
    /// Requests abandoned during the debounce window.
    pub superseded: u64,
}

/// Proof of one request. Results are applied only while it is current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    generation: u64,
    epoch: u64,
    selection: Selection,
}

impl Ticket {
    /// Selection this ticket was issued for.
    #[must_use]
    pub const fn selection(&self) -> &Selection {
        &self.selection
    }
}

#[derive(Debug)]
struct Loaded {
    key: SourceKey,
    bytes: Rc<[u8]>,
    masks: Rc<InstanceMasks>,
    decoded: Option<Rc<RgbaImage>>,
}

#[derive(Debug)]
struct State {
    config: SessionConfig,
    loaded: Option<Loaded>,
    cache: ResultCache,
    generation: u64,
    /// Bumped by every image load. The same bytes can come back with
    /// different masks, so the source key alone does not identify a load.
    epoch: u64,
    requested: Selection,
    displayed: Option<Rc<HighlightOutcome>>,
    stats: SessionStats,
}

enum Lookup {
    Hit(Rc<HighlightOutcome>),
    Miss(Prepared),
}

/// Debounced highlight driver for one image at a time.
///
/// Cloning yields another handle to the same session.
#[derive(Debug, Clone)]
pub struct HighlightSession {
    state: Rc<RefCell<State>>,
}

impl HighlightSession {
    /// An empty session with no image loaded.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                config,
                loaded: None,
                cache: ResultCache::new(),
                generation: 0,
                epoch: 0,
                requested: Selection::None,
                displayed: None,
                stats: SessionStats::default(),
            })),
        }
    }

    /// Replace the current image.
    ///
    /// Returns `false` (and changes nothing) if the same bytes and masks
    /// are already loaded. Otherwise the cache is emptied, the selection
    /// resets to [`Selection::None`], nothing is displayed, and every
    /// in-flight request becomes stale.
    pub fn on_image_changed(&self, source: ImageSource) -> bool {
        let key = source.key();
        let mut state = self.state.borrow_mut();
        if let Some(loaded) = &state.loaded
            && loaded.key == key
            && *loaded.masks == source.masks
        {
            return false;
        }

        log::info!(
            "image changed to {key} ({} bytes, {} masks)",
            source.bytes.len(),
            source.masks.len()
        );
        state.cache.invalidate_all();
        state.loaded = Some(Loaded {
            key,
            bytes: source.bytes.into(),
            masks: Rc::new(source.masks),
            decoded: None,
        });
        state.requested = Selection::None;
        state.displayed = None;
        state.generation += 1;
        state.epoch += 1;
        true
    }

    /// Record `selection` as the latest request and issue its ticket.
    ///
    /// Every ticket issued before this one becomes stale.
    pub fn request(&self, selection: Selection) -> Ticket {
        let mut state = self.state.borrow_mut();
        state.generation += 1;
        state.requested = selection.clone();
        Ticket {
            generation: state.generation,
            epoch: state.epoch,
            selection,
        }
    }

    /// Whether results for `ticket` would still be displayed.
    #[must_use]
    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.state.borrow().generation == ticket.generation
    }

    /// Deliver a finished computation.
    ///
    /// The outcome is cached if the image load it was computed from is
    /// still current, and displayed only if `ticket` is still current. Returns whether it
    /// was displayed.
    pub fn complete(&self, ticket: &Ticket, outcome: HighlightOutcome) -> bool {
        self.apply(ticket, Rc::new(outcome)).is_some()
    }

    /// Select `selection` after the debounce window.
    ///
    /// Returns [`SelectOutcome::Superseded`] if another request or image
    /// change arrives before this one is applied.
    #[allow(clippy::future_not_send)]
    pub async fn select(&self, selection: Selection) -> SelectOutcome {
        let ticket = self.request(selection);
        tokio::time::sleep(self.config().debounce()).await;

        if !self.is_current(&ticket) {
            self.state.borrow_mut().stats.superseded += 1;
            log::debug!("selection {} superseded while debouncing", ticket.selection);
            return SelectOutcome::Superseded;
        }

        let prepared = match self.lookup(&ticket) {
            Ok(Lookup::Hit(outcome)) => return SelectOutcome::Displayed(outcome),
            Ok(Lookup::Miss(prepared)) => prepared,
            Err(e) => return self.fail(&ticket, e),
        };

        // Let the executor service other work between the halves.
        tokio::task::yield_now().await;

        let style = self.config().style;
        match pipeline::render(prepared, &style) {
            Ok(outcome) => self
                .apply(&ticket, Rc::new(outcome))
                .map_or(SelectOutcome::Superseded, SelectOutcome::Displayed),
            Err(e) => self.fail(&ticket, e.into()),
        }
    }

    /// Select `instance`, or clear the selection if it is already the
    /// latest request.
    #[allow(clippy::future_not_send)]
    pub async fn toggle(&self, instance: InstanceId) -> SelectOutcome {
        let next = match self.selection() {
            Selection::Instance(current) if current == instance => Selection::None,
            _ => Selection::Instance(instance),
        };
        self.select(next).await
    }

    /// The latest requested selection.
    #[must_use]
    pub fn selection(&self) -> Selection {
        self.state.borrow().requested.clone()
    }

    /// The highlight currently on screen.
    #[must_use]
    pub fn displayed(&self) -> Option<Rc<HighlightOutcome>> {
        self.state.borrow().displayed.clone()
    }

    /// Counters since the session was created.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        self.state.borrow().stats
    }

    /// Identity of the loaded image.
    #[must_use]
    pub fn source_key(&self) -> Option<SourceKey> {
        self.state.borrow().loaded.as_ref().map(|l| l.key)
    }

    /// Session configuration.
    #[must_use]
    pub fn config(&self) -> SessionConfig {
        self.state.borrow().config
    }

    /// Answer from the cache, or run the first half of the pipeline.
    fn lookup(&self, ticket: &Ticket) -> Result<Lookup, SessionError> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let loaded = state.loaded.as_mut().ok_or(SessionError::NoImage)?;
        let key = loaded.key;

        if let Some(hit) = state.cache.get(key, &ticket.selection) {
            state.stats.cache_hits += 1;
            state.displayed = Some(Rc::clone(&hit));
            log::debug!("selection {} served from cache", ticket.selection);
            return Ok(Lookup::Hit(hit));
        }

        state.stats.composites_started += 1;
        log::debug!("compositing selection {}", ticket.selection);

        let source = match &loaded.decoded {
            Some(decoded) => Rc::clone(decoded),
            None => {
                let decoded = Rc::new(raster::decode_source(&loaded.bytes)?);
                loaded.decoded = Some(Rc::clone(&decoded));
                decoded
            }
        };
        let masks = Rc::clone(&loaded.masks);
        let dimensions = Dimensions::of(&source);
        let cache = &mut state.cache;

        let (overlay, report) =
            pipeline::resolve_overlay(dimensions, &masks, &ticket.selection, |id, payload| {
                if let Some(hit) = cache.get_mask(key, id) {
                    return Ok(hit.clone());
                }
                let normalized = pipeline::normalize_payload(payload, dimensions)?;
                cache.put_mask(key, id.clone(), normalized.clone());
                Ok(normalized)
            });

        Ok(Lookup::Miss(Prepared {
            source: RgbaImage::clone(&source),
            overlay,
            report,
        }))
    }

    fn apply(&self, ticket: &Ticket, outcome: Rc<HighlightOutcome>) -> Option<Rc<HighlightOutcome>> {
        let mut state = self.state.borrow_mut();
        if let Some(key) = state.loaded.as_ref().map(|l| l.key)
            && state.epoch == ticket.epoch
        {
            state
                .cache
                .put(key, ticket.selection.clone(), Rc::clone(&outcome));
        }

        if state.generation != ticket.generation {
            state.stats.discarded += 1;
            log::debug!("discarding stale result for {}", ticket.selection);
            return None;
        }
        state.displayed = Some(Rc::clone(&outcome));
        Some(outcome)
    }

    fn fail(&self, ticket: &Ticket, error: SessionError) -> SelectOutcome {
        if !self.is_current(ticket) {
            self.state.borrow_mut().stats.discarded += 1;
            return SelectOutcome::Superseded;
        }
        log::warn!("highlight for {} failed: {error}", ticket.selection);
        SelectOutcome::Failed(error)
    }
}

impl Default for HighlightSession {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}
