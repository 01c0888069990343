//! Output backends
//!
//! The renderer is pulled by exactly one backend:
//!
//! - [`NullOutput`]: a dedicated thread renders in device-sized blocks
//!   paced against wall time and throws the samples away. Used headless,
//!   in CI, and when only recording.
//! - `CpalOutput` (feature `cpal-output`): the system audio device's
//!   callback drives the renderer directly.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use driftconf::OutputKind;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::render::Renderer;

/// Frames the null output pulls per wakeup.
pub const NULL_BLOCK_FRAMES: usize = 1024;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to spawn render thread: {0}")]
    Thread(#[from] std::io::Error),

    #[error("output backend {0} is not compiled in")]
    Unavailable(&'static str),

    #[error("no output device available")]
    NoDevice,

    #[error("audio device error: {0}")]
    Device(String),
}

/// A running output. Dropping it stops rendering.
pub enum Output {
    Null(NullOutput),
    #[cfg(feature = "cpal-output")]
    Cpal(cpal_output::CpalOutput),
}

impl Output {
    pub fn start(kind: OutputKind, renderer: Renderer) -> Result<Self, OutputError> {
        match kind {
            OutputKind::Null => Ok(Output::Null(NullOutput::start(renderer, NULL_BLOCK_FRAMES)?)),
            #[cfg(feature = "cpal-output")]
            OutputKind::Cpal => Ok(Output::Cpal(cpal_output::CpalOutput::start(renderer)?)),
            #[cfg(not(feature = "cpal-output"))]
            OutputKind::Cpal => Err(OutputError::Unavailable("cpal")),
        }
    }

    pub fn kind(&self) -> OutputKind {
        match self {
            Output::Null(_) => OutputKind::Null,
            #[cfg(feature = "cpal-output")]
            Output::Cpal(_) => OutputKind::Cpal,
        }
    }

    pub fn stop(&mut self) {
        match self {
            Output::Null(output) => output.stop(),
            #[cfg(feature = "cpal-output")]
            Output::Cpal(output) => output.stop(),
        }
    }
}

/// Paced render thread with no device behind it.
pub struct NullOutput {
    running: Arc<AtomicBool>,
    blocks: Arc<AtomicU64>,
    thread_handle: Option<JoinHandle<()>>,
}

impl NullOutput {
    pub fn start(mut renderer: Renderer, block_frames: usize) -> Result<Self, OutputError> {
        let block_frames = block_frames.max(1);
        let running = Arc::new(AtomicBool::new(true));
        let blocks = Arc::new(AtomicU64::new(0));

        let block_duration =
            Duration::from_secs_f64(block_frames as f64 / renderer.sample_rate() as f64);
        let thread_running = Arc::clone(&running);
        let thread_blocks = Arc::clone(&blocks);

        let thread_handle = thread::Builder::new()
            .name("driftdeck-null-output".to_string())
            .spawn(move || {
                let mut buffer = vec![0.0f32; block_frames * 2];
                let mut deadline = Instant::now();
                while thread_running.load(Ordering::Acquire) {
                    renderer.render(&mut buffer, 2);
                    thread_blocks.fetch_add(1, Ordering::Relaxed);

                    deadline += block_duration;
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep(deadline - now);
                    } else if now - deadline > block_duration * 4 {
                        // Too far behind to catch up without a burst.
                        debug!("null output late by {:?}, resetting pace", now - deadline);
                        deadline = now;
                    }
                }
            })?;

        info!(block_frames, "null output started");
        Ok(Self {
            running,
            blocks,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Device-sized blocks rendered so far.
    pub fn blocks(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                warn!("null output thread panicked");
            }
            info!(blocks = self.blocks(), "null output stopped");
        }
    }
}

impl Drop for NullOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(feature = "cpal-output")]
mod cpal_output {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{BufferSize, SampleRate, Stream, StreamConfig};
    use tracing::{error, info};

    use super::OutputError;
    use crate::render::Renderer;

    /// Keeps the device stream alive; drop to stop audio.
    pub struct CpalOutput {
        stream: Option<Stream>,
    }

    impl CpalOutput {
        pub fn start(mut renderer: Renderer) -> Result<Self, OutputError> {
            let host = cpal::default_host();
            let device = host.default_output_device().ok_or(OutputError::NoDevice)?;
            let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

            let config = StreamConfig {
                channels: 2,
                sample_rate: SampleRate(renderer.sample_rate()),
                buffer_size: BufferSize::Default,
            };
            let channels = config.channels as usize;

            let stream = device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        renderer.render(data, channels);
                    },
                    |err| error!("audio stream error: {}", err),
                    None,
                )
                .map_err(|e| OutputError::Device(e.to_string()))?;
            stream
                .play()
                .map_err(|e| OutputError::Device(e.to_string()))?;

            info!(
                "audio output on {}: {} channels, {}Hz",
                device_name, config.channels, config.sample_rate.0
            );
            Ok(Self {
                stream: Some(stream),
            })
        }

        pub fn stop(&mut self) {
            if let Some(stream) = self.stream.take() {
                drop(stream);
                info!("audio output stopped");
            }
        }
    }
}
