use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use tracing::debug;

use crate::error::BoxfishError;

/// A readiness/error/end notification posted by the media engine onto its per-player channel.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Opened {
        duration_ms: u64,
        video_size: (u32, u32),
        frame_rate: f64,
    },
    EndReached,
    Error(String),
}

/// Seam for the native media engine.
///
/// Only the playback-control surface is consumed here; decoding is not part of
/// the core. Control methods are called from the UI thread; implementations may
/// deliver events from engine-owned threads through the polled event channel and
/// must be internally thread-safe for that purpose.
pub trait MediaEngine: Send {
    /// Load a media source. Returns once the engine accepts the request;
    /// readiness is reported asynchronously with [`EngineEvent::Opened`].
    fn open(&mut self, url: &str) -> Result<(), BoxfishError>;

    fn play(&mut self);

    fn pause(&mut self);

    fn is_playing(&self) -> bool;

    fn seek(&mut self, time_ms: u64);

    /// Snapshot of the playback position in milliseconds.
    fn current_time(&self) -> u64;

    /// Media duration in milliseconds, when known.
    fn duration(&self) -> Option<u64>;

    /// Intrinsic size of the decoded image, when known.
    fn video_size(&self) -> Option<(u32, u32)>;

    /// Nominal frame rate, used for frame stepping.
    fn frame_rate(&self) -> f64;

    fn set_volume(&mut self, volume: f32);

    fn volume(&self) -> f32;

    /// Drain one pending engine event, if any. Called from the UI thread each frame.
    fn poll_event(&mut self) -> Option<EngineEvent>;

    /// Release engine resources. Further control calls are no-ops.
    fn release(&mut self);
}

pub type EngineFactory = Box<dyn Fn() -> Box<dyn MediaEngine>>;

const DEFAULT_FRAME_RATE: f64 = 25.0;
const DEFAULT_VIDEO_SIZE: (u32, u32) = (1920, 1080);

/// A decode-less media engine modelling a playback clock.
///
/// Readiness is reported asynchronously from a probe thread, mirroring how a
/// real engine signals media-parsed events. A decoding engine can be substituted
/// behind [`MediaEngine`] without touching the rest of the application.
pub struct SimulatedEngine {
    url: Option<String>,
    playing: bool,
    base_time_ms: u64,
    playing_since: Option<Instant>,
    duration_ms: Option<u64>,
    video_size: Option<(u32, u32)>,
    frame_rate: f64,
    volume: f32,
    released: bool,
    event_tx: Sender<EngineEvent>,
    event_rx: Receiver<EngineEvent>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::channel();
        Self {
            url: None,
            playing: false,
            base_time_ms: 0,
            playing_since: None,
            duration_ms: None,
            video_size: None,
            frame_rate: DEFAULT_FRAME_RATE,
            volume: 1.0,
            released: false,
            event_tx,
            event_rx,
        }
    }

    pub fn factory() -> EngineFactory {
        Box::new(|| Box::new(SimulatedEngine::new()))
    }

    fn clock_ms(&self) -> u64 {
        let elapsed = self.playing_since.map(|since| since.elapsed().as_millis() as u64).unwrap_or(0);
        self.base_time_ms + elapsed
    }

    /// Deterministic per-source duration so repeated opens of the same URL agree.
    fn probe_duration_ms(url: &str) -> u64 {
        let sum: u64 = url.bytes().map(u64::from).sum();
        30_000 + (sum % 270) * 1_000
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaEngine for SimulatedEngine {
    fn open(&mut self, url: &str) -> Result<(), BoxfishError> {
        if self.released {
            return Err(BoxfishError::Unavailable("engine released".to_string()));
        }
        debug!("open(url={})", url);

        self.url = Some(url.to_string());
        self.playing = false;
        self.playing_since = None;
        self.base_time_ms = 0;
        self.duration_ms = None;
        self.video_size = None;

        // Probe the media off-thread; readiness arrives as an Opened event
        let tx = self.event_tx.clone();
        let url = url.to_string();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            let event = if url.trim().is_empty() {
                EngineEvent::Error(format!("cannot open media: {url:?}"))
            } else {
                EngineEvent::Opened {
                    duration_ms: Self::probe_duration_ms(&url),
                    video_size: DEFAULT_VIDEO_SIZE,
                    frame_rate: DEFAULT_FRAME_RATE,
                }
            };
            let _ = tx.send(event);
        });
        Ok(())
    }

    fn play(&mut self) {
        if self.released || self.playing {
            return;
        }
        self.playing = true;
        self.playing_since = Some(Instant::now());
    }

    fn pause(&mut self) {
        if !self.playing {
            return;
        }
        self.base_time_ms = self.clock_ms();
        self.playing = false;
        self.playing_since = None;
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn seek(&mut self, time_ms: u64) {
        if self.released {
            return;
        }
        self.base_time_ms = time_ms;
        if self.playing {
            self.playing_since = Some(Instant::now());
        }
    }

    fn current_time(&self) -> u64 {
        let time = self.clock_ms();
        match self.duration_ms {
            Some(duration) => time.min(duration),
            None => time,
        }
    }

    fn duration(&self) -> Option<u64> {
        self.duration_ms
    }

    fn video_size(&self) -> Option<(u32, u32)> {
        self.video_size
    }

    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn poll_event(&mut self) -> Option<EngineEvent> {
        if let Ok(event) = self.event_rx.try_recv() {
            if let EngineEvent::Opened { duration_ms, video_size, frame_rate } = &event {
                self.duration_ms = Some(*duration_ms);
                self.video_size = Some(*video_size);
                self.frame_rate = *frame_rate;
            }
            return Some(event);
        }

        // Playback ran off the end of the media
        if self.playing
            && let Some(duration) = self.duration_ms
            && self.clock_ms() >= duration
        {
            self.base_time_ms = duration;
            self.playing = false;
            self.playing_since = None;
            return Some(EngineEvent::EndReached);
        }

        None
    }

    fn release(&mut self) {
        self.pause();
        self.released = true;
        self.url = None;
    }
}
