//! In-memory audio backend and network used by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use super::{AudioBackend, AudioContext, DecodedAudio, PlayMode, Voice};
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::request::{AssetRequest, AssetResponse};

/// What the fake output has seen.
#[derive(Debug, Default)]
pub struct FakeAudioLog {
    pub contexts_created: usize,
    pub gain_at_creation: Vec<f32>,
    pub started: Vec<PlayMode>,
    pub loops_playing: usize,
    pub decodes: usize,
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    pub log: Arc<Mutex<FakeAudioLog>>,
    /// Makes every voice fail to stop and disconnect.
    pub fail_stop: Arc<AtomicBool>,
    pub start_suspended: bool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suspended() -> Self {
        Self {
            start_suspended: true,
            ..Self::default()
        }
    }

    pub fn loops_playing(&self) -> usize {
        self.log.lock().unwrap().loops_playing
    }

    pub fn started(&self) -> Vec<PlayMode> {
        self.log.lock().unwrap().started.clone()
    }
}

impl AudioBackend for FakeBackend {
    type Context = FakeContext;

    fn create_context(&self) -> Result<FakeContext> {
        let mut log = self.log.lock().unwrap();
        log.contexts_created += 1;
        drop(log);
        Ok(FakeContext {
            gain: 1.0,
            suspended: self.start_suspended,
            log: Arc::clone(&self.log),
            fail_stop: Arc::clone(&self.fail_stop),
        })
    }
}

pub struct FakeContext {
    gain: f32,
    suspended: bool,
    log: Arc<Mutex<FakeAudioLog>>,
    fail_stop: Arc<AtomicBool>,
}

impl AudioContext for FakeContext {
    type Voice = FakeVoice;

    fn gain(&self) -> f32 {
        self.gain
    }

    fn set_gain(&mut self, value: f32) {
        let mut log = self.log.lock().unwrap();
        if log.gain_at_creation.len() < log.contexts_created {
            log.gain_at_creation.push(value);
        }
        self.gain = value;
    }

    fn is_suspended(&self) -> bool {
        self.suspended
    }

    fn resume(&mut self) -> Result<()> {
        self.suspended = false;
        Ok(())
    }

    fn decode(&self, bytes: Bytes) -> Result<DecodedAudio> {
        self.log.lock().unwrap().decodes += 1;
        if bytes.is_empty() || bytes.starts_with(b"garbage") {
            return Err(Error::Decode("unrecognised format".to_string()));
        }
        Ok(DecodedAudio {
            channels: 1,
            sample_rate: 8000,
            samples: bytes.iter().map(|b| f32::from(*b) / 255.0).collect(),
        })
    }

    fn start(&mut self, _audio: &DecodedAudio, mode: PlayMode) -> Result<FakeVoice> {
        let mut log = self.log.lock().unwrap();
        log.started.push(mode);
        if mode == PlayMode::Loop {
            log.loops_playing += 1;
        }
        Ok(FakeVoice {
            mode,
            connected: true,
            log: Arc::clone(&self.log),
            fail_stop: Arc::clone(&self.fail_stop),
        })
    }
}

pub struct FakeVoice {
    mode: PlayMode,
    connected: bool,
    log: Arc<Mutex<FakeAudioLog>>,
    fail_stop: Arc<AtomicBool>,
}

impl Voice for FakeVoice {
    fn stop(&mut self) -> Result<()> {
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(Error::AudioDevice("voice already stopped".to_string()));
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if self.connected {
            self.connected = false;
            if self.mode == PlayMode::Loop {
                self.log.lock().unwrap().loops_playing -= 1;
            }
        }
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(Error::AudioDevice("voice not connected".to_string()));
        }
        Ok(())
    }

    fn is_finished(&self) -> bool {
        !self.connected
    }
}

/// A network that serves fixed bodies and fails for anything else.
#[derive(Default)]
pub struct FakeNetwork {
    bodies: Mutex<HashMap<String, Bytes>>,
    calls: Mutex<Vec<String>>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, body: &'static [u8]) {
        self.bodies
            .lock()
            .unwrap()
            .insert(url.to_string(), Bytes::from_static(body));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for FakeNetwork {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse> {
        self.calls.lock().unwrap().push(request.url.to_string());
        self.bodies
            .lock()
            .unwrap()
            .get(request.url.as_str())
            .cloned()
            .map(|body| AssetResponse::new(200, body))
            .ok_or_else(|| Error::Offline {
                url: request.url.to_string(),
            })
    }
}
