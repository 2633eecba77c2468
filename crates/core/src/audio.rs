//! Audio device seams and the buffers the orchestrator keeps between them.

use anyhow::Result;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// 16-bit PCM stream parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per capture read.
    pub chunk_frames: usize,
}

impl AudioFormat {
    pub const fn capture() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            chunk_frames: 1024,
        }
    }

    pub const fn playback() -> Self {
        Self {
            sample_rate: 24_000,
            channels: 1,
            chunk_frames: 1024,
        }
    }
}

/// Asks a blocked device call to give up early. Cloned handles share the flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Anything that holds an open device.
pub trait AudioStream: Send {
    /// Releases the device. Calling it more than once is harmless.
    fn close(&mut self);

    /// Raised when the device is released while a read or write is blocked.
    /// Streams that cannot be interrupted return `None`.
    fn stop_signal(&self) -> Option<StopSignal> {
        None
    }
}

/// A microphone. Reads block until a full chunk is available.
pub trait CaptureStream: AudioStream {
    fn read_chunk(&mut self) -> Result<Vec<u8>>;
}

/// A speaker. Writes block until the chunk has been queued to the device.
pub trait PlaybackStream: AudioStream {
    fn write(&mut self, pcm: &[u8]) -> Result<()>;
}

/// Opens devices. Opening may block.
pub trait AudioDevices: Send + Sync {
    fn open_capture(&self, format: &AudioFormat) -> Result<Box<dyn CaptureStream>>;

    fn open_playback(&self, format: &AudioFormat) -> Result<Box<dyn PlaybackStream>>;
}

/// Holds one device handle so that teardown can release it exactly once,
/// whichever task gets there first.
///
/// The lock is never held across a device call. A device that is in use when
/// the slot is released is closed by its user as soon as the call returns.
pub struct DeviceSlot<S: ?Sized + AudioStream> {
    inner: Mutex<SlotState<S>>,
}

struct SlotState<S: ?Sized> {
    stream: Option<Box<S>>,
    stop: Option<StopSignal>,
    in_use: bool,
    released: bool,
}

impl<S: ?Sized + AudioStream> DeviceSlot<S> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SlotState {
                stream: None,
                stop: None,
                in_use: false,
                released: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState<S>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores a freshly opened device. A device that arrives after the slot
    /// was released is closed on the spot.
    pub fn install(&self, mut stream: Box<S>) {
        let mut state = self.lock();
        if state.released {
            drop(state);
            stream.close();
        } else {
            state.stop = stream.stop_signal();
            state.stream = Some(stream);
        }
    }

    /// Runs `f` against the device, or returns `None` once it is released.
    /// One caller at a time.
    pub fn with<R>(&self, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        let mut stream = {
            let mut state = self.lock();
            let stream = state.stream.take()?;
            state.in_use = true;
            stream
        };

        let result = f(&mut *stream);

        let mut state = self.lock();
        state.in_use = false;
        if state.released {
            drop(state);
            stream.close();
        } else {
            state.stream = Some(stream);
        }
        Some(result)
    }

    /// Releases the device without waiting for a call in progress. Returns
    /// whether this call did the releasing.
    pub fn release(&self) -> bool {
        let mut state = self.lock();
        if state.released {
            return false;
        }
        state.released = true;
        if let Some(stop) = &state.stop {
            stop.stop();
        }
        let in_use = state.in_use;
        let stream = state.stream.take();
        drop(state);

        match stream {
            Some(mut stream) => {
                stream.close();
                true
            }
            None => in_use,
        }
    }

    pub fn is_released(&self) -> bool {
        self.lock().released
    }
}

impl<S: ?Sized + AudioStream> Default for DeviceSlot<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// FIFO of audio waiting to be played.
///
/// Unbounded: producers never wait. Consumers wait for the next chunk.
#[derive(Default)]
pub struct PlaybackQueue {
    chunks: Mutex<VecDeque<Vec<u8>>>,
    available: Notify,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.chunks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, chunk: Vec<u8>) {
        self.lock().push_back(chunk);
        self.available.notify_one();
    }

    pub async fn pop(&self) -> Vec<u8> {
        loop {
            if let Some(chunk) = self.lock().pop_front() {
                return chunk;
            }
            self.available.notified().await;
        }
    }

    /// Drops everything not yet played. Returns how many chunks were dropped.
    pub fn clear(&self) -> usize {
        let mut chunks = self.lock();
        let dropped = chunks.len();
        chunks.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
