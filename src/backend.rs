//! Audio backends: where the mixed root outputs go after each tick.

use rtrb::Producer;
use tracing::warn;

use crate::port::SignalBlock;

/// Receives one block per output channel at the end of every tick.
pub trait AudioBackend: Send {
    fn start(&mut self) {}

    fn stop(&mut self) {}

    /// Consume one block per channel. All blocks have the tick's length.
    fn render(&mut self, channels: &[SignalBlock]);
}

/// Discards everything. The default backend.
#[derive(Default, Debug)]
pub struct NullBackend;

impl AudioBackend for NullBackend {
    fn render(&mut self, _channels: &[SignalBlock]) {}
}

/// Pushes interleaved samples into an rtrb ring buffer.
///
/// Useful for:
/// - Sending audio to another thread
/// - Recording/analysis
/// - Tests
pub struct RtrbBackend {
    producer: Producer<f32>,
    channels: usize,
    dropped_blocks: usize,
}

impl RtrbBackend {
    /// Create a backend that writes `channels` interleaved channels to `producer`
    pub fn new(producer: Producer<f32>, channels: usize) -> Self {
        Self {
            producer,
            channels: channels.max(1),
            dropped_blocks: 0,
        }
    }

    /// Returns how many sample slots are available
    #[inline]
    pub fn available(&self) -> usize {
        self.producer.slots()
    }

    /// Blocks skipped because the buffer was full
    pub fn dropped_blocks(&self) -> usize {
        self.dropped_blocks
    }
}

impl AudioBackend for RtrbBackend {
    fn render(&mut self, channels: &[SignalBlock]) {
        interleave_into(&mut self.producer, self.channels, channels, &mut self.dropped_blocks);
    }
}

/// Write `blocks` interleaved into `producer`, mapping missing channels to the
/// last available one. Skips the whole block rather than partially writing.
fn interleave_into(
    producer: &mut Producer<f32>,
    channels: usize,
    blocks: &[SignalBlock],
    dropped: &mut usize,
) {
    let Some(first) = blocks.first() else {
        return;
    };
    let len = first.len();
    let needed = len * channels;
    if producer.slots() < needed {
        *dropped += 1;
        warn!(needed, available = producer.slots(), "output buffer full, dropping block");
        return;
    }

    for frame in 0..len {
        for ch in 0..channels {
            let src = &blocks[ch.min(blocks.len() - 1)];
            // Slots were checked above
            let _ = producer.push(src.get(frame).copied().unwrap_or(0.0));
        }
    }
}

#[cfg(feature = "cpal_sink")]
pub use cpal_backend::{CpalBackend, CpalDevice};

#[cfg(feature = "cpal_sink")]
mod cpal_backend {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, SupportedStreamConfig};
    use rtrb::{Consumer, Producer, RingBuffer};
    use tracing::{debug, error};

    use super::{interleave_into, AudioBackend};
    use crate::port::SignalBlock;

    /// A discovered audio output device
    pub struct CpalDevice {
        device: cpal::Device,
        config: SupportedStreamConfig,
        name: String,
    }

    impl CpalDevice {
        /// Get the default output device
        pub fn default_output() -> Option<Self> {
            let host = cpal::default_host();
            let device = host.default_output_device()?;
            Self::from_device(device)
        }

        /// List all available output devices
        pub fn list_outputs() -> Vec<Self> {
            let host = cpal::default_host();
            host.output_devices()
                .map(|devices| devices.filter_map(Self::from_device).collect())
                .unwrap_or_default()
        }

        fn from_device(device: cpal::Device) -> Option<Self> {
            let config = device.default_output_config().ok()?;
            let name = device.name().unwrap_or_else(|_| "Unknown".into());
            Some(Self { device, config, name })
        }

        pub fn name(&self) -> &str {
            &self.name
        }

        pub fn sample_rate(&self) -> u32 {
            self.config.sample_rate().0
        }

        pub fn channels(&self) -> u16 {
            self.config.channels()
        }

        /// Create a backend that plays on this device
        pub fn create_backend(&self) -> CpalBackend {
            CpalBackend::new(&self.device, &self.config)
        }
    }

    /// Plays the engine output on a CPAL device.
    ///
    /// The CPAL stream runs on its own thread; rendering feeds samples into
    /// a ring buffer that the stream consumes. The stream is paused while
    /// the engine is stopped.
    pub struct CpalBackend {
        buffer: Producer<f32>,
        channels: usize,
        playing: Arc<AtomicBool>,
        /// Tracks how many samples CPAL has consumed
        samples_consumed: Arc<AtomicUsize>,
        had_underrun: Arc<AtomicBool>,
        dropped_blocks: usize,
    }

    impl CpalBackend {
        pub fn new(device: &cpal::Device, config: &SupportedStreamConfig) -> Self {
            let channels = config.channels() as usize;
            let sample_format = config.sample_format();
            let stream_config = config.config();
            let sample_rate = stream_config.sample_rate.0;

            // ~100ms of audio to absorb scheduling jitter
            let buffer_samples = ((sample_rate as f32 * 0.1) as usize) * channels;
            let buffer_size = buffer_samples.next_power_of_two().max(8192);
            let (producer, consumer) = RingBuffer::<f32>::new(buffer_size);

            let playing = Arc::new(AtomicBool::new(false));
            let samples_consumed = Arc::new(AtomicUsize::new(0));
            let had_underrun = Arc::new(AtomicBool::new(false));

            let shared = StreamShared {
                playing: playing.clone(),
                samples_consumed: samples_consumed.clone(),
                had_underrun: had_underrun.clone(),
            };
            let device = device.clone();
            std::thread::spawn(move || {
                let stream = match build_stream(&device, sample_format, &stream_config, consumer, shared) {
                    Ok(stream) => stream,
                    Err(err) => {
                        error!(%err, "failed to build output stream");
                        return;
                    }
                };
                if let Err(err) = stream.play() {
                    error!(%err, "failed to start audio stream");
                    return;
                }
                debug!(sample_rate, channels, "audio stream running");

                // The stream lives as long as this thread
                loop {
                    std::thread::park();
                }
            });

            Self {
                buffer: producer,
                channels,
                playing,
                samples_consumed,
                had_underrun,
                dropped_blocks: 0,
            }
        }

        /// Returns how many samples have been played
        #[inline]
        pub fn samples_consumed(&self) -> usize {
            self.samples_consumed.load(Ordering::Relaxed)
        }

        /// Returns available space in the buffer (in samples)
        #[inline]
        pub fn buffer_available(&self) -> usize {
            self.buffer.slots()
        }

        /// Check and clear the underrun flag
        pub fn check_underrun(&self) -> bool {
            self.had_underrun.swap(false, Ordering::Relaxed)
        }

        pub fn dropped_blocks(&self) -> usize {
            self.dropped_blocks
        }
    }

    impl AudioBackend for CpalBackend {
        fn start(&mut self) {
            self.playing.store(true, Ordering::Relaxed);
        }

        fn stop(&mut self) {
            self.playing.store(false, Ordering::Relaxed);
        }

        fn render(&mut self, channels: &[SignalBlock]) {
            interleave_into(&mut self.buffer, self.channels, channels, &mut self.dropped_blocks);
        }
    }

    struct StreamShared {
        playing: Arc<AtomicBool>,
        samples_consumed: Arc<AtomicUsize>,
        had_underrun: Arc<AtomicBool>,
    }

    impl StreamShared {
        /// Fill `data` from the ring buffer, or with silence while stopped.
        fn fill<T: Copy>(&self, data: &mut [T], consumer: &mut Consumer<f32>, convert: impl Fn(f32) -> T) {
            if !self.playing.load(Ordering::Relaxed) {
                data.fill(convert(0.0));
                return;
            }
            let mut underrun = false;
            for sample in data.iter_mut() {
                let s = consumer.pop().unwrap_or_else(|_| {
                    underrun = true;
                    0.0
                });
                *sample = convert(s);
            }
            if underrun {
                self.had_underrun.store(true, Ordering::Relaxed);
            }
            self.samples_consumed.fetch_add(data.len(), Ordering::Relaxed);
        }
    }

    fn build_stream(
        device: &cpal::Device,
        sample_format: SampleFormat,
        stream_config: &cpal::StreamConfig,
        mut consumer: Consumer<f32>,
        shared: StreamShared,
    ) -> Result<cpal::Stream, cpal::BuildStreamError> {
        let on_error = |err| error!(?err, "CPAL stream error");
        match sample_format {
            SampleFormat::F32 => device.build_output_stream(
                stream_config,
                move |data: &mut [f32], _| shared.fill(data, &mut consumer, |s| s),
                on_error,
                None,
            ),
            SampleFormat::I16 => device.build_output_stream(
                stream_config,
                move |data: &mut [i16], _| {
                    shared.fill(data, &mut consumer, |s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                },
                on_error,
                None,
            ),
            SampleFormat::U16 => device.build_output_stream(
                stream_config,
                move |data: &mut [u16], _| {
                    shared.fill(data, &mut consumer, |s| {
                        ((s.clamp(-1.0, 1.0) + 1.0) * 0.5 * u16::MAX as f32) as u16
                    })
                },
                on_error,
                None,
            ),
            _ => Err(cpal::BuildStreamError::StreamConfigNotSupported),
        }
    }
}
