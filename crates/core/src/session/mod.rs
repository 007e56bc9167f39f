//! Playback sessions: one track bound to one media transport.
//!
//! Transport events travel over a channel created per binding. Rebinding
//! unloads the old transport and drops the old receiver before the new
//! channel exists, so a listener from a previous track can never fire into
//! the new session state.

pub mod sim;

use std::sync::mpsc::{channel, Receiver, Sender};

use serde::{Deserialize, Serialize};

use crate::module::EffectKind;
use crate::{RemixError, Result};

/// Track metadata as handed over by the catalog/UI layer. The core only
/// consumes `audio_url` and writes back the last applied effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub duration_seconds: Option<f64>,
    pub audio_url: String,
    #[serde(default)]
    pub last_applied_effect: Option<EffectKind>,
}

impl Track {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        audio_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            duration_seconds: None,
            audio_url: audio_url.into(),
            last_applied_effect: None,
        }
    }
}

/// Events a transport emits into its session's channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Stream metadata resolved; may arrive more than once.
    MetadataLoaded { duration: f64 },
    /// Enough data is buffered to start playback.
    CanPlay,
    /// Progress tick at the transport's native granularity.
    TimeUpdate { position: f64 },
    /// End of stream.
    Ended,
    /// Decode or network failure.
    Error { message: String },
}

/// The native media playback object driving actual decode/output.
///
/// Implementations deliver events for one loaded source in emission order
/// through the sender handed to [`Transport::load`], and stop delivering
/// entirely once [`Transport::unload`] returns.
pub trait Transport {
    /// Binds a source URL and the event channel for this binding.
    fn load(&mut self, url: &str, events: Sender<TransportEvent>);
    /// Detaches the current source and its event channel.
    fn unload(&mut self);
    /// Starts playback; fails with [`RemixError::Transport`] when the
    /// transport refuses (autoplay policy, decode failure).
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self);
    fn seek(&mut self, position: f64);
    /// Gain in 0.0–1.0.
    fn set_gain(&mut self, gain: f32);
    /// Playback-rate multiplier; 1.0 is the original speed.
    fn set_rate(&mut self, rate: f32);
    fn gain(&self) -> f32;
    fn rate(&self) -> f32;
    fn position(&self) -> f64;
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Empty,
    Loading,
    Ready,
    Playing,
    Paused,
    Ended,
    Error,
}

/// Host callbacks wired to transport events.
#[derive(Default)]
pub struct SessionCallbacks {
    pub on_next: Option<Box<dyn FnMut()>>,
    pub on_time_update: Option<Box<dyn FnMut(f64)>>,
    pub on_duration_change: Option<Box<dyn FnMut(f64)>>,
    pub on_error: Option<Box<dyn FnMut()>>,
    pub on_can_play: Option<Box<dyn FnMut()>>,
}

impl std::fmt::Debug for SessionCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCallbacks").finish()
    }
}

/// Binds one [`Track`] to one [`Transport`] and maps user intent onto it.
///
/// Volume is held in the host's 0–100 range and tempo as a percentage
/// (100 = original speed); both are rescaled on every change before being
/// applied to the transport.
pub struct PlaybackSession<T: Transport> {
    transport: T,
    callbacks: SessionCallbacks,
    state: SessionState,
    track: Option<Track>,
    receiver: Option<Receiver<TransportEvent>>,
    pending_play: bool,
    volume: u8,
    tempo_percent: u16,
    current_time: f64,
    duration: Option<f64>,
}

impl<T: Transport> PlaybackSession<T> {
    pub fn new(transport: T) -> Self {
        Self::with_callbacks(transport, SessionCallbacks::default())
    }

    pub fn with_callbacks(transport: T, callbacks: SessionCallbacks) -> Self {
        Self {
            transport,
            callbacks,
            state: SessionState::Empty,
            track: None,
            receiver: None,
            pending_play: false,
            volume: 100,
            tempo_percent: 100,
            current_time: 0.0,
            duration: None,
        }
    }

    /// Binds `track` as the active source, detaching any previous binding
    /// first.
    pub fn bind(&mut self, track: Track) -> Result<()> {
        // Detach before attach: the old channel is gone before the new one
        // exists.
        self.transport.unload();
        self.receiver = None;
        self.track = None;
        self.pending_play = false;
        self.current_time = 0.0;
        self.duration = None;

        if track.audio_url.is_empty() {
            self.state = SessionState::Empty;
            return Err(RemixError::InvalidInput("track has no audio url"));
        }

        let (sender, receiver) = channel();
        self.transport.load(&track.audio_url, sender);
        self.transport.set_gain(self.volume as f32 / 100.0);
        self.transport.set_rate(self.tempo_percent as f32 / 100.0);

        tracing::debug!(track = %track.id, url = %track.audio_url, "track bound");
        self.receiver = Some(receiver);
        self.track = Some(track);
        self.state = SessionState::Loading;
        Ok(())
    }

    /// Requests playback. Before readiness the intent is recorded and the
    /// session stays in `Loading`; the `Playing` transition happens when the
    /// transport reports it can play.
    pub fn play(&mut self) -> Result<()> {
        match self.state {
            SessionState::Empty => Err(RemixError::InvalidInput("no track is bound")),
            SessionState::Loading => {
                self.pending_play = true;
                Ok(())
            }
            SessionState::Playing => Ok(()),
            SessionState::Ready
            | SessionState::Paused
            | SessionState::Ended
            | SessionState::Error => self.attempt_play(),
        }
    }

    /// Pauses playback and clears any pending play intent.
    pub fn pause(&mut self) {
        self.pending_play = false;
        if self.state == SessionState::Playing {
            self.transport.pause();
            self.state = SessionState::Paused;
        }
    }

    /// Sets the transport position. Silently does nothing without a bound
    /// track.
    pub fn seek_to(&mut self, position: f64) {
        if self.track.is_some() {
            self.transport.seek(position.max(0.0));
        }
    }

    /// Volume in the host's 0–100 range, applied immediately as 0.0–1.0
    /// transport gain.
    pub fn set_volume(&mut self, volume: u8) {
        self.volume = volume.min(100);
        self.transport.set_gain(self.volume as f32 / 100.0);
    }

    /// Tempo as a percentage (100 = original), applied immediately as a
    /// playback-rate multiplier.
    pub fn set_tempo(&mut self, percent: u16) {
        self.tempo_percent = percent.max(1);
        self.transport.set_rate(self.tempo_percent as f32 / 100.0);
    }

    /// Drains and dispatches events queued by the current binding.
    pub fn pump_events(&mut self) {
        let mut events = Vec::new();
        if let Some(receiver) = &self.receiver {
            while let Ok(event) = receiver.try_recv() {
                events.push(event);
            }
        }
        for event in events {
            self.dispatch(event);
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn tempo_percent(&self) -> u16 {
        self.tempo_percent
    }

    pub fn track(&self) -> Option<&Track> {
        self.track.as_ref()
    }

    /// Records the effect most recently applied to the bound track.
    pub fn tag_applied_effect(&mut self, effect: EffectKind) {
        if let Some(track) = &mut self.track {
            track.last_applied_effect = Some(effect);
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn attempt_play(&mut self) -> Result<()> {
        match self.transport.play() {
            Ok(()) => {
                self.state = SessionState::Playing;
                Ok(())
            }
            Err(err) => {
                // Rejection falls back to Paused and is surfaced to the
                // caller as well as the callback.
                self.state = SessionState::Paused;
                if let Some(on_error) = self.callbacks.on_error.as_mut() {
                    on_error();
                }
                Err(err)
            }
        }
    }

    fn dispatch(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::MetadataLoaded { duration } => {
                self.duration = Some(duration);
                if let Some(on_duration_change) = self.callbacks.on_duration_change.as_mut() {
                    on_duration_change(duration);
                }
            }
            TransportEvent::CanPlay => {
                if self.state == SessionState::Loading {
                    self.state = SessionState::Ready;
                }
                if let Some(on_can_play) = self.callbacks.on_can_play.as_mut() {
                    on_can_play();
                }
                if self.pending_play {
                    self.pending_play = false;
                    let _ = self.attempt_play();
                }
            }
            TransportEvent::TimeUpdate { position } => {
                self.current_time = position;
                if let Some(on_time_update) = self.callbacks.on_time_update.as_mut() {
                    on_time_update(position);
                }
            }
            TransportEvent::Ended => {
                self.state = SessionState::Ended;
                if let Some(on_next) = self.callbacks.on_next.as_mut() {
                    on_next();
                }
            }
            TransportEvent::Error { message } => {
                tracing::warn!(%message, "transport reported an error");
                self.pending_play = false;
                self.state = SessionState::Error;
                if let Some(on_error) = self.callbacks.on_error.as_mut() {
                    on_error();
                }
            }
        }
    }
}

impl<T: Transport + std::fmt::Debug> std::fmt::Debug for PlaybackSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("state", &self.state)
            .field("track", &self.track.as_ref().map(|t| t.id.as_str()))
            .field("volume", &self.volume)
            .field("tempo_percent", &self.tempo_percent)
            .field("transport", &self.transport)
            .finish()
    }
}
