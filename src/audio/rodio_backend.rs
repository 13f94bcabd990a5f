//! Audio output through `rodio` on the default device.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use bytes::Bytes;
use rodio::buffer::SamplesBuffer;
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink, Source};

use super::{AudioBackend, AudioContext, DecodedAudio, PlayMode, Voice};
use crate::error::{Error, Result};

/// How often playing voices pick up gain changes.
const GAIN_POLL: Duration = Duration::from_millis(10);

/// Opens the default output device.
#[derive(Debug, Clone, Copy, Default)]
pub struct RodioBackend;

impl RodioBackend {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl AudioBackend for RodioBackend {
    type Context = RodioContext;

    fn create_context(&self) -> Result<RodioContext> {
        let stream = OutputStreamBuilder::from_default_device()
            .map_err(|e| Error::AudioDevice(e.to_string()))?
            .open_stream_or_fallback()
            .map_err(|e| Error::AudioDevice(e.to_string()))?;
        Ok(RodioContext {
            stream,
            gain: Arc::new(AtomicU32::new(1.0_f32.to_bits())),
        })
    }
}

/// An open output stream plus the shared gain every voice reads.
pub struct RodioContext {
    stream: OutputStream,
    gain: Arc<AtomicU32>,
}

/// Wraps a source so its amplitude tracks the shared gain.
fn behind_gain<S>(source: S, gain: Arc<AtomicU32>) -> impl Source + Send + 'static
where
    S: Source + Send + 'static,
{
    let initial = f32::from_bits(gain.load(Ordering::Relaxed));
    source
        .amplify(initial)
        .periodic_access(GAIN_POLL, move |amp| {
            amp.set_factor(f32::from_bits(gain.load(Ordering::Relaxed)));
        })
}

impl AudioContext for RodioContext {
    type Voice = RodioVoice;

    fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    fn set_gain(&mut self, value: f32) {
        self.gain.store(value.to_bits(), Ordering::Relaxed);
    }

    fn decode(&self, bytes: Bytes) -> Result<DecodedAudio> {
        let decoder = Decoder::new(Cursor::new(bytes)).map_err(|e| Error::Decode(e.to_string()))?;
        let channels = decoder.channels();
        let sample_rate = decoder.sample_rate();
        let samples: Vec<f32> = decoder.collect();
        if channels == 0 || sample_rate == 0 || samples.is_empty() {
            return Err(Error::Decode("no audio frames".to_string()));
        }
        Ok(DecodedAudio {
            channels,
            sample_rate,
            samples: samples.into(),
        })
    }

    fn start(&mut self, audio: &DecodedAudio, mode: PlayMode) -> Result<RodioVoice> {
        let source = SamplesBuffer::new(audio.channels, audio.sample_rate, audio.samples.to_vec());
        let gain = Arc::clone(&self.gain);
        let sink = Sink::connect_new(self.stream.mixer());
        match mode {
            PlayMode::Loop => sink.append(behind_gain(source.repeat_infinite(), gain)),
            PlayMode::Once => sink.append(behind_gain(source, gain)),
        }
        Ok(RodioVoice { sink: Some(sink) })
    }
}

/// A sink holding one voice.
pub struct RodioVoice {
    sink: Option<Sink>,
}

impl Voice for RodioVoice {
    fn stop(&mut self) -> Result<()> {
        let sink = self
            .sink
            .as_ref()
            .ok_or_else(|| Error::AudioDevice("voice already disconnected".to_string()))?;
        sink.stop();
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        // Dropping the sink removes its source from the mixer.
        self.sink
            .take()
            .map(drop)
            .ok_or_else(|| Error::AudioDevice("voice already disconnected".to_string()))
    }

    fn is_finished(&self) -> bool {
        self.sink.as_ref().is_none_or(Sink::empty)
    }
}
