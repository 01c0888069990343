//! Gapless playback scheduling
//!
//! The control side ([`PlaybackScheduler`]) decides when each decoded
//! buffer starts on the engine clock: back to back, so every buffer begins
//! exactly where the previous one ends. The render side ([`SourceMixer`])
//! starts each source on its frame and sums the active ones.
//!
//! Buffers travel to the render thread as `Arc`s. The scheduler keeps its
//! own clone of every buffer in flight and only lets go of it after the
//! renderer has dropped its copy, so PCM memory is always freed on the
//! control side.

use std::sync::Arc;

use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, warn};

use crate::clock::secs_to_frame;
use crate::decode::PcmBuffer;
use crate::events::PlaybackState;

/// Falling further behind than this triggers a resync.
pub const RESYNC_THRESHOLD_SECS: f64 = 0.5;

/// Lead time given to the first buffer after a resync.
pub const RESYNC_LEAD_SECS: f64 = 0.1;

/// Most buffers the renderer may hold at once, started or waiting.
pub const MAX_IN_FLIGHT: usize = 1024;

/// Room for every in-flight start plus the flushes that can follow them.
const SOURCE_QUEUE_CAPACITY: usize = MAX_IN_FLIGHT + 64;

/// A buffer placed on the engine timeline.
#[derive(Debug, Clone)]
pub struct ScheduledBuffer {
    pub buffer: Arc<PcmBuffer>,
    /// Engine seconds.
    pub start_time: f64,
    pub start_frame: u64,
    /// Rate multiplier captured at schedule time; applies to this source only.
    pub playback_rate: f64,
}

/// Control → render messages for sources.
#[derive(Debug, Clone)]
pub enum SourceCommand {
    Start(ScheduledBuffer),
    /// Silence every source already started or queued once the clock
    /// reaches `at_frame`.
    Flush { at_frame: u64 },
}

/// What [`PlaybackScheduler::ingest`] did with a buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IngestOutcome {
    /// Playback is paused or stopped; the buffer was discarded.
    Dropped,
    Scheduled {
        start_time: f64,
        /// The timeline fell behind and was moved forward.
        resynced: bool,
        /// First buffer of a loading phase: the caller should switch to
        /// playing after this many seconds.
        preroll: Option<f64>,
    },
    /// Too many buffers were already queued; the buffer was discarded and
    /// the timeline left where it was.
    Overflow,
}

pub struct PlaybackScheduler {
    sample_rate: u32,
    buffer_time: f64,
    next_start_time: f64,
    preroll_armed: bool,
    tx: Producer<SourceCommand>,
    in_flight: Vec<Arc<PcmBuffer>>,
}

impl PlaybackScheduler {
    /// `sample_rate` is the engine rate; `buffer_time` the pre-roll in seconds.
    pub fn new(sample_rate: u32, buffer_time: f64) -> (Self, SourceMixer) {
        let (tx, rx) = RingBuffer::new(SOURCE_QUEUE_CAPACITY);
        (
            Self {
                sample_rate: sample_rate.max(1),
                buffer_time: buffer_time.max(0.0),
                next_start_time: 0.0,
                preroll_armed: false,
                tx,
                in_flight: Vec::new(),
            },
            SourceMixer::new(sample_rate, rx),
        )
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn buffer_time(&self) -> f64 {
        self.buffer_time
    }

    /// Buffers still referenced by the renderer or its queue.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// A new loading phase begins; the next buffer arms pre-roll again.
    pub fn begin_loading(&mut self) {
        self.preroll_armed = false;
    }

    /// Place `buffer` on the timeline.
    ///
    /// `now` is the engine time at the moment of scheduling; no buffer is
    /// ever started before it.
    pub fn ingest(
        &mut self,
        buffer: PcmBuffer,
        playback_rate: f64,
        state: PlaybackState,
        now: f64,
    ) -> IngestOutcome {
        if !state.accepts_audio() {
            return IngestOutcome::Dropped;
        }
        if self.reclaim_count() >= MAX_IN_FLIGHT {
            warn!(in_flight = self.in_flight.len(), "too many buffers queued, dropping one");
            return IngestOutcome::Overflow;
        }

        let mut resynced = false;
        let mut preroll = None;
        if state == PlaybackState::Loading && !self.preroll_armed {
            self.next_start_time = self.next_start_time.max(now + self.buffer_time);
            self.preroll_armed = true;
            preroll = Some(self.buffer_time);
        } else if self.next_start_time < now - RESYNC_THRESHOLD_SECS {
            debug!(
                behind = now - self.next_start_time,
                "playback fell behind, resyncing"
            );
            self.next_start_time = now + RESYNC_LEAD_SECS;
            resynced = true;
        }

        let start_time = self.next_start_time.max(now);
        let duration = buffer.duration();
        let buffer = Arc::new(buffer);
        let scheduled = ScheduledBuffer {
            buffer: Arc::clone(&buffer),
            start_time,
            start_frame: secs_to_frame(start_time, self.sample_rate),
            playback_rate,
        };

        if self.tx.push(SourceCommand::Start(scheduled)).is_err() {
            warn!("source queue full, dropping buffer at {:.3}s", start_time);
            return IngestOutcome::Overflow;
        }

        self.in_flight.push(buffer);
        self.next_start_time = start_time + duration;

        IngestOutcome::Scheduled {
            start_time,
            resynced,
            preroll,
        }
    }

    /// Silence all sources at engine time `at`.
    pub fn flush(&mut self, at: f64) {
        let at_frame = secs_to_frame(at, self.sample_rate);
        if self.tx.push(SourceCommand::Flush { at_frame }).is_err() {
            warn!("source queue full, flush at {:.3}s lost", at);
        }
    }

    /// Forget the timeline (pause and stop).
    pub fn reset(&mut self) {
        self.next_start_time = 0.0;
        self.preroll_armed = false;
    }

    /// Free buffers the renderer no longer references. Returns how many.
    pub fn reclaim(&mut self) -> usize {
        let before = self.in_flight.len();
        self.in_flight.retain(|b| Arc::strong_count(b) > 1);
        before - self.in_flight.len()
    }

    fn reclaim_count(&mut self) -> usize {
        self.reclaim();
        self.in_flight.len()
    }
}

struct ActiveSource {
    buffer: Arc<PcmBuffer>,
    start_frame: u64,
    position: f64,
    step: f64,
    stop_at: Option<u64>,
    done: bool,
}

/// Render half: plays scheduled sources into a block.
///
/// The scheduler never lets more than [`MAX_IN_FLIGHT`] buffers reach the
/// mixer, so `active` is allocated once and never grows.
pub struct SourceMixer {
    sample_rate: u32,
    rx: Consumer<SourceCommand>,
    active: Vec<ActiveSource>,
}

impl SourceMixer {
    fn new(sample_rate: u32, rx: Consumer<SourceCommand>) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            rx,
            active: Vec::with_capacity(MAX_IN_FLIGHT),
        }
    }

    /// Sources started or waiting to start.
    pub fn active(&self) -> usize {
        self.active.len()
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.rx.pop() {
            match command {
                SourceCommand::Start(scheduled) => {
                    let step = scheduled.playback_rate.max(0.0)
                        * scheduled.buffer.sample_rate() as f64
                        / self.sample_rate as f64;
                    self.active.push(ActiveSource {
                        buffer: scheduled.buffer,
                        start_frame: scheduled.start_frame,
                        position: 0.0,
                        step,
                        stop_at: None,
                        done: false,
                    });
                }
                SourceCommand::Flush { at_frame } => {
                    for source in &mut self.active {
                        source.stop_at = Some(source.stop_at.map_or(at_frame, |s| s.min(at_frame)));
                    }
                }
            }
        }
    }

    /// Overwrite `left`/`right` with the sum of all sources for frames
    /// starting at `start_frame`.
    pub fn render(&mut self, start_frame: u64, left: &mut [f32], right: &mut [f32]) {
        self.drain_commands();
        left.fill(0.0);
        right.fill(0.0);
        let n = left.len().min(right.len());
        let end_frame = start_frame + n as u64;

        for source in &mut self.active {
            // Flushed before it ever sounded.
            if source
                .stop_at
                .is_some_and(|stop| stop <= source.start_frame.max(start_frame))
            {
                source.done = true;
                continue;
            }
            if source.start_frame >= end_frame {
                continue;
            }
            let pcm_l = source.buffer.left();
            let pcm_r = source.buffer.right();
            let frames = pcm_l.len();

            for i in 0..n {
                let frame = start_frame + i as u64;
                if frame < source.start_frame {
                    continue;
                }
                if source.stop_at.is_some_and(|stop| frame >= stop) {
                    source.done = true;
                    break;
                }
                let idx = source.position as usize;
                if idx >= frames || source.step <= 0.0 {
                    source.done = true;
                    break;
                }
                let frac = (source.position - idx as f64) as f32;
                let next = (idx + 1).min(frames - 1);
                left[i] += pcm_l[idx] + (pcm_l[next] - pcm_l[idx]) * frac;
                right[i] += pcm_r[idx] + (pcm_r[next] - pcm_r[idx]) * frac;
                source.position += source.step;
            }

            if source.position as usize >= frames {
                source.done = true;
            }
        }

        self.active.retain(|s| !s.done);
    }
}
