//! Blocking capture and playback streams on top of cpal.
//!
//! A cpal stream cannot leave the thread that built it, so each stream lives
//! on its own thread and exchanges samples with the caller through a ring
//! buffer.

use crate::audio::{
    ToPcm16, create_resampler, downmix, pcm16_to_f32, shared_buffer, split_for_chunks,
};
use crate::device;
use anyhow::{Context, Result, anyhow, bail};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, StreamTrait};
use picnic_pal_core::audio::{
    AudioDevices, AudioFormat, AudioStream, CaptureStream, PlaybackStream, StopSignal,
};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd};
use rubato::{FastFixedIn, Resampler};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

const BUFFER_SECONDS: usize = 2;
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// The host's audio devices, optionally picked by name.
#[derive(Debug, Clone, Default)]
pub struct CpalDevices {
    input: Option<String>,
    output: Option<String>,
}

impl CpalDevices {
    pub fn new(input: Option<String>, output: Option<String>) -> Self {
        Self { input, output }
    }
}

impl AudioDevices for CpalDevices {
    fn open_capture(&self, format: &AudioFormat) -> Result<Box<dyn CaptureStream>> {
        Ok(Box::new(CpalCapture::open(self.input.clone(), *format)?))
    }

    fn open_playback(&self, format: &AudioFormat) -> Result<Box<dyn PlaybackStream>> {
        Ok(Box::new(CpalPlayback::open(self.output.clone(), *format)?))
    }
}

/// Owns the thread a cpal stream lives on.
struct StreamThread {
    stop: Option<mpsc::Sender<()>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl StreamThread {
    /// Runs `open` on a new thread and hands back what it returns next to the
    /// stream. The stream is dropped when `stop` is called.
    fn spawn<T, F>(name: &str, open: F) -> Result<(Self, T)>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<(cpal::Stream, T)> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || match open() {
                Ok((stream, handles)) => {
                    if ready_tx.send(Ok(handles)).is_ok() {
                        // Returns once the sender is dropped.
                        let _ = stop_rx.recv();
                    }
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .context("Failed to spawn audio thread")?;

        let handles = ready_rx
            .recv()
            .map_err(|_| anyhow!("audio thread exited during setup"))??;
        Ok((
            Self {
                stop: Some(stop_tx),
                worker: Some(worker),
            },
            handles,
        ))
    }

    fn stop(&mut self) {
        drop(self.stop.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Audio thread panicked");
            }
        }
    }
}

struct CaptureHandles {
    consumer: HeapCons<f32>,
    device_rate: u32,
    failed: Arc<AtomicBool>,
}

/// Microphone input resampled to the requested rate, mono PCM16.
pub struct CpalCapture {
    thread: StreamThread,
    consumer: HeapCons<f32>,
    resampler: FastFixedIn<f32>,
    pending: VecDeque<f32>,
    chunk_frames: usize,
    failed: Arc<AtomicBool>,
    stop: StopSignal,
}

impl CpalCapture {
    pub fn open(device_name: Option<String>, format: AudioFormat) -> Result<Self> {
        let (thread, handles) = StreamThread::spawn("picnic-pal-capture", move || {
            let input = device::input_device(device_name.as_deref())
                .context("Failed to get audio input device")?;
            tracing::info!("Using input device: {:?}", input.name()?);
            let supported = input
                .default_input_config()
                .context("Failed to get default input config")?;
            let config = StreamConfig {
                channels: supported.channels(),
                sample_rate: supported.sample_rate(),
                buffer_size: cpal::BufferSize::Default,
            };
            tracing::debug!("Input stream config: {:?}", &config);

            let channels = config.channels as usize;
            let device_rate = config.sample_rate.0;
            let (mut producer, consumer) =
                shared_buffer(device_rate as usize * BUFFER_SECONDS).split();
            let failed = Arc::new(AtomicBool::new(false));
            let flag = failed.clone();

            let stream = input.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono = downmix(data, channels);
                    let pushed = producer.push_slice(&mono);
                    if pushed < mono.len() {
                        tracing::warn!(
                            "Capture buffer full, dropped {} samples",
                            mono.len() - pushed
                        );
                    }
                },
                move |err| {
                    tracing::error!("An error occurred on input stream: {}", err);
                    flag.store(true, Ordering::SeqCst);
                },
                None,
            )?;
            stream.play()?;

            Ok((
                stream,
                CaptureHandles {
                    consumer,
                    device_rate,
                    failed,
                },
            ))
        })?;

        let resampler = create_resampler(
            handles.device_rate as f64,
            format.sample_rate as f64,
            format.chunk_frames,
        )?;
        Ok(Self {
            thread,
            consumer: handles.consumer,
            resampler,
            pending: VecDeque::new(),
            chunk_frames: format.chunk_frames,
            failed: handles.failed,
            stop: StopSignal::new(),
        })
    }
}

impl AudioStream for CpalCapture {
    fn close(&mut self) {
        self.thread.stop();
    }

    fn stop_signal(&self) -> Option<StopSignal> {
        Some(self.stop.clone())
    }
}

impl CaptureStream for CpalCapture {
    fn read_chunk(&mut self) -> Result<Vec<u8>> {
        while self.pending.len() < self.chunk_frames {
            if self.stop.is_stopped() {
                bail!("capture stopped");
            }
            if self.failed.load(Ordering::SeqCst) {
                bail!("input stream failed");
            }
            let needed = self.resampler.input_frames_next();
            if self.consumer.occupied_len() < needed {
                thread::sleep(POLL_INTERVAL);
                continue;
            }

            let mut frames = vec![0.0; needed];
            self.consumer.pop_slice(&mut frames);
            let resampled = self.resampler.process(&[frames.as_slice()], None)?;
            if let Some(mono) = resampled.first() {
                self.pending.extend(mono.iter().copied());
            }
        }

        let chunk: Vec<f32> = self.pending.drain(..self.chunk_frames).collect();
        Ok(chunk.to_pcm16())
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.thread.stop();
    }
}

struct PlaybackHandles {
    producer: HeapProd<f32>,
    device_rate: u32,
    failed: Arc<AtomicBool>,
}

/// Speaker output fed with mono PCM16 at the requested rate.
pub struct CpalPlayback {
    thread: StreamThread,
    producer: HeapProd<f32>,
    resampler: FastFixedIn<f32>,
    failed: Arc<AtomicBool>,
    stop: StopSignal,
}

impl CpalPlayback {
    pub fn open(device_name: Option<String>, format: AudioFormat) -> Result<Self> {
        let (thread, handles) = StreamThread::spawn("picnic-pal-playback", move || {
            let output = device::output_device(device_name.as_deref())
                .context("Failed to get audio output device")?;
            tracing::info!("Using output device: {:?}", output.name()?);
            let supported = output
                .default_output_config()
                .context("Failed to get default output config")?;
            let config = StreamConfig {
                channels: supported.channels(),
                sample_rate: supported.sample_rate(),
                buffer_size: cpal::BufferSize::Default,
            };
            tracing::debug!("Output stream config: {:?}", &config);

            let channels = config.channels as usize;
            let device_rate = config.sample_rate.0;
            let (producer, mut consumer) =
                shared_buffer(device_rate as usize * BUFFER_SECONDS).split();
            let failed = Arc::new(AtomicBool::new(false));
            let flag = failed.clone();

            let stream = output.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // Every channel of a frame plays the same mono sample.
                    for frame in data.chunks_mut(channels) {
                        frame.fill(consumer.try_pop().unwrap_or(0.0));
                    }
                },
                move |err| {
                    tracing::error!("An error occurred on output stream: {}", err);
                    flag.store(true, Ordering::SeqCst);
                },
                None,
            )?;
            stream.play()?;

            Ok((
                stream,
                PlaybackHandles {
                    producer,
                    device_rate,
                    failed,
                },
            ))
        })?;

        let resampler = create_resampler(
            format.sample_rate as f64,
            handles.device_rate as f64,
            format.chunk_frames,
        )?;
        Ok(Self {
            thread,
            producer: handles.producer,
            resampler,
            failed: handles.failed,
            stop: StopSignal::new(),
        })
    }

    fn push_blocking(&mut self, mut samples: &[f32]) -> Result<()> {
        while !samples.is_empty() {
            if self.stop.is_stopped() {
                bail!("playback stopped");
            }
            if self.failed.load(Ordering::SeqCst) {
                bail!("output stream failed");
            }
            let pushed = self.producer.push_slice(samples);
            samples = &samples[pushed..];
            if pushed == 0 {
                thread::sleep(POLL_INTERVAL);
            }
        }
        Ok(())
    }
}

impl AudioStream for CpalPlayback {
    fn close(&mut self) {
        self.thread.stop();
    }

    fn stop_signal(&self) -> Option<StopSignal> {
        Some(self.stop.clone())
    }
}

impl PlaybackStream for CpalPlayback {
    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        let samples = pcm16_to_f32(pcm);
        let chunk_size = self.resampler.input_frames_next();
        for frames in split_for_chunks(&samples, chunk_size) {
            if self.stop.is_stopped() {
                bail!("playback stopped");
            }
            let resampled = self.resampler.process(&[frames.as_slice()], None)?;
            if let Some(mono) = resampled.first() {
                self.push_blocking(mono)?;
            }
        }
        Ok(())
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.thread.stop();
    }
}
