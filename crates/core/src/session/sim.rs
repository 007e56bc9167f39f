//! A deterministic transport for harnesses and tests.
//!
//! `SimTransport` models the readiness and event behavior of a native
//! media element without touching an audio device: loading completes when
//! the driver calls [`SimTransport::finish_loading`], and time advances
//! only through [`SimTransport::advance`].

use std::sync::mpsc::Sender;

use crate::{RemixError, Result};

use super::{Transport, TransportEvent};

/// Scripted media transport with a fixed stream duration.
#[derive(Debug)]
pub struct SimTransport {
    events: Option<Sender<TransportEvent>>,
    url: Option<String>,
    stream_duration: f64,
    position: f64,
    gain: f32,
    rate: f32,
    playing: bool,
    ready: bool,
    block_autoplay: bool,
}

impl SimTransport {
    /// Creates a transport whose loaded stream lasts `stream_duration`
    /// seconds.
    pub fn new(stream_duration: f64) -> Self {
        Self {
            events: None,
            url: None,
            stream_duration,
            position: 0.0,
            gain: 1.0,
            rate: 1.0,
            playing: false,
            ready: false,
            block_autoplay: false,
        }
    }

    /// When set, the next `play()` calls are refused the way a browser
    /// autoplay policy would refuse them.
    pub fn set_autoplay_blocked(&mut self, blocked: bool) {
        self.block_autoplay = blocked;
    }

    /// URL of the currently loaded source, if any.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Completes buffering: emits stream metadata followed by readiness.
    pub fn finish_loading(&mut self) {
        self.ready = true;
        let duration = self.stream_duration;
        self.emit(TransportEvent::MetadataLoaded { duration });
        self.emit(TransportEvent::CanPlay);
    }

    /// Advances wall-clock time by `dt` seconds. Stream position moves at
    /// the configured playback rate and end-of-stream fires once the
    /// position reaches the duration.
    pub fn advance(&mut self, dt: f64) {
        if !self.playing {
            return;
        }
        self.position += dt * self.rate as f64;
        if self.position >= self.stream_duration {
            self.position = self.stream_duration;
            self.playing = false;
            self.emit(TransportEvent::TimeUpdate {
                position: self.position,
            });
            self.emit(TransportEvent::Ended);
        } else {
            self.emit(TransportEvent::TimeUpdate {
                position: self.position,
            });
        }
    }

    /// Injects a decode/network failure.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.playing = false;
        self.emit(TransportEvent::Error {
            message: message.into(),
        });
    }

    fn emit(&self, event: TransportEvent) {
        if let Some(events) = &self.events {
            // A dropped receiver means the binding is gone; nothing to do.
            let _ = events.send(event);
        }
    }
}

impl Transport for SimTransport {
    fn load(&mut self, url: &str, events: Sender<TransportEvent>) {
        self.events = Some(events);
        self.url = Some(url.to_string());
        self.position = 0.0;
        self.playing = false;
        self.ready = false;
    }

    fn unload(&mut self) {
        self.events = None;
        self.url = None;
        self.playing = false;
        self.ready = false;
    }

    fn play(&mut self) -> Result<()> {
        if self.block_autoplay {
            return Err(RemixError::Transport(
                "playback blocked by autoplay policy".to_string(),
            ));
        }
        if !self.ready {
            return Err(RemixError::Transport(
                "transport has not buffered enough to play".to_string(),
            ));
        }
        self.playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn seek(&mut self, position: f64) {
        if self.url.is_some() {
            self.position = position.clamp(0.0, self.stream_duration);
        }
    }

    fn set_gain(&mut self, gain: f32) {
        self.gain = gain.clamp(0.0, 1.0);
    }

    fn set_rate(&mut self, rate: f32) {
        self.rate = rate.max(0.01);
    }

    fn gain(&self) -> f32 {
        self.gain
    }

    fn rate(&self) -> f32 {
        self.rate
    }

    fn position(&self) -> f64 {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::session::{PlaybackSession, SessionCallbacks, SessionState, Track};

    fn track(id: &str) -> Track {
        Track::new(id, format!("Track {id}"), "Artist", format!("https://cdn/{id}.mp3"))
    }

    fn session(duration: f64) -> PlaybackSession<SimTransport> {
        PlaybackSession::new(SimTransport::new(duration))
    }

    #[test]
    fn play_before_ready_waits_for_can_play() {
        let mut session = session(30.0);
        session.bind(track("a")).unwrap();
        assert_eq!(session.state(), SessionState::Loading);

        session.play().unwrap();
        assert_eq!(session.state(), SessionState::Loading);
        assert!(!session.transport().is_playing());

        session.transport_mut().finish_loading();
        session.pump_events();
        assert_eq!(session.state(), SessionState::Playing);
        assert!(session.transport().is_playing());
    }

    #[test]
    fn ready_session_plays_and_pauses() {
        let mut session = session(30.0);
        session.bind(track("a")).unwrap();
        session.transport_mut().finish_loading();
        session.pump_events();
        assert_eq!(session.state(), SessionState::Ready);

        session.play().unwrap();
        assert_eq!(session.state(), SessionState::Playing);
        session.pause();
        assert_eq!(session.state(), SessionState::Paused);
        session.play().unwrap();
        assert_eq!(session.state(), SessionState::Playing);
    }

    #[test]
    fn tempo_percent_maps_to_playback_rate() {
        let mut session = session(30.0);
        session.bind(track("a")).unwrap();

        session.set_tempo(125);
        assert!((session.transport().rate() - 1.25).abs() < 1e-6);

        session.set_tempo(80);
        assert!((session.transport().rate() - 0.80).abs() < 1e-6);
    }

    #[test]
    fn volume_maps_to_unit_gain() {
        let mut session = session(30.0);
        session.bind(track("a")).unwrap();

        session.set_volume(50);
        assert!((session.transport().gain() - 0.5).abs() < 1e-6);

        // Values above the host range clamp to full gain.
        session.set_volume(200);
        assert_eq!(session.volume(), 100);
        assert!((session.transport().gain() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn rebinding_discards_events_from_the_previous_track() {
        let durations = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&durations);
        let callbacks = SessionCallbacks {
            on_duration_change: Some(Box::new(move |d| sink.borrow_mut().push(d))),
            ..SessionCallbacks::default()
        };

        let mut session =
            PlaybackSession::with_callbacks(SimTransport::new(111.0), callbacks);
        session.bind(track("a")).unwrap();
        // Track A resolves metadata, but the session rebinds before the
        // events are pumped.
        session.transport_mut().finish_loading();

        session.bind(track("b")).unwrap();
        session.pump_events();
        assert!(durations.borrow().is_empty());
        assert_eq!(session.duration(), None);

        session.transport_mut().finish_loading();
        session.pump_events();
        assert_eq!(durations.borrow().as_slice(), &[111.0]);
    }

    #[test]
    fn stream_end_fires_on_next_and_ends_the_session() {
        let next_calls = Rc::new(RefCell::new(0usize));
        let sink = Rc::clone(&next_calls);
        let times = Rc::new(RefCell::new(Vec::new()));
        let times_sink = Rc::clone(&times);
        let callbacks = SessionCallbacks {
            on_next: Some(Box::new(move || *sink.borrow_mut() += 1)),
            on_time_update: Some(Box::new(move |t| times_sink.borrow_mut().push(t))),
            ..SessionCallbacks::default()
        };

        let mut session = PlaybackSession::with_callbacks(SimTransport::new(1.0), callbacks);
        session.bind(track("a")).unwrap();
        session.transport_mut().finish_loading();
        session.pump_events();
        session.play().unwrap();

        for _ in 0..5 {
            session.transport_mut().advance(0.25);
            session.pump_events();
        }

        assert_eq!(session.state(), SessionState::Ended);
        assert_eq!(*next_calls.borrow(), 1);
        assert!((session.current_time() - 1.0).abs() < 1e-9);
        assert!(!times.borrow().is_empty());
    }

    #[test]
    fn autoplay_rejection_falls_back_to_paused_and_surfaces_the_error() {
        let errors = Rc::new(RefCell::new(0usize));
        let sink = Rc::clone(&errors);
        let callbacks = SessionCallbacks {
            on_error: Some(Box::new(move || *sink.borrow_mut() += 1)),
            ..SessionCallbacks::default()
        };

        let mut session = PlaybackSession::with_callbacks(SimTransport::new(30.0), callbacks);
        session.bind(track("a")).unwrap();
        session.transport_mut().set_autoplay_blocked(true);
        session.transport_mut().finish_loading();
        session.pump_events();

        let err = session.play().unwrap_err();
        assert!(matches!(err, crate::RemixError::Transport(_)));
        assert_eq!(session.state(), SessionState::Paused);
        assert_eq!(*errors.borrow(), 1);
    }

    #[test]
    fn transport_failure_moves_the_session_to_error() {
        let errors = Rc::new(RefCell::new(0usize));
        let sink = Rc::clone(&errors);
        let callbacks = SessionCallbacks {
            on_error: Some(Box::new(move || *sink.borrow_mut() += 1)),
            ..SessionCallbacks::default()
        };

        let mut session = PlaybackSession::with_callbacks(SimTransport::new(30.0), callbacks);
        session.bind(track("a")).unwrap();
        session.transport_mut().finish_loading();
        session.pump_events();
        session.play().unwrap();

        session.transport_mut().fail("decode failure");
        session.pump_events();
        assert_eq!(session.state(), SessionState::Error);
        assert_eq!(*errors.borrow(), 1);
    }

    #[test]
    fn seek_without_a_track_is_a_silent_no_op() {
        let mut session = session(30.0);
        session.seek_to(10.0);
        assert_eq!(session.transport().position(), 0.0);

        session.bind(track("a")).unwrap();
        session.seek_to(10.0);
        assert!((session.transport().position() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn binding_a_track_without_a_url_is_rejected() {
        let mut session = session(30.0);
        let mut bad = track("a");
        bad.audio_url.clear();
        assert!(session.bind(bad).is_err());
        assert_eq!(session.state(), SessionState::Empty);
        assert!(session.play().is_err());
    }

    #[test]
    fn metadata_may_resolve_more_than_once() {
        let durations = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&durations);
        let callbacks = SessionCallbacks {
            on_duration_change: Some(Box::new(move |d| sink.borrow_mut().push(d))),
            ..SessionCallbacks::default()
        };

        let mut session = PlaybackSession::with_callbacks(SimTransport::new(30.0), callbacks);
        session.bind(track("a")).unwrap();
        session.transport_mut().finish_loading();
        session.transport_mut().finish_loading();
        session.pump_events();
        assert_eq!(durations.borrow().as_slice(), &[30.0, 30.0]);
        assert_eq!(session.duration(), Some(30.0));
    }
}
