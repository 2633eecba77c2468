//! The session pipeline: five cooperating tasks around one live session.
//!
//! ```text
//! stdin ──TextInput──┐ control (unbounded)
//!                    ├──────────────► RealtimeForward ──► session
//! mic ──AudioCapture─┘ outbound (bounded)                    │
//!                                                            ▼
//! speaker ◄──AudioPlayback◄── playback queue ◄──ResponseDispatch
//!                                                   └─► tool results via control
//! ```
//!
//! RealtimeForward is the only writer. The bounded outbound queue is the only
//! backpressure: a full queue parks the microphone until the session drains.

use crate::audio::{
    AudioDevices, AudioFormat, CaptureStream, DeviceSlot, PlaybackQueue, PlaybackStream,
};
use crate::error::{Fault, OrchestratorError};
use crate::events::{InboundEvent, OutboundEvent, SessionMessage};
use crate::session::{
    LiveConnector, ResponseMode, SessionConfig, SessionReader, SessionState, SessionWriter,
};
use crate::speech::SpeechSynthesizer;
use crate::tools::ToolRegistry;
use anyhow::anyhow;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinSet;

pub const CAPTURE_MIME_TYPE: &str = "audio/pcm";
pub const OUTBOUND_QUEUE_CAPACITY: usize = 5;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub session: SessionConfig,
    pub capture: AudioFormat,
    pub playback: AudioFormat,
    pub outbound_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            capture: AudioFormat::capture(),
            playback: AudioFormat::playback(),
            outbound_capacity: OUTBOUND_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Task {
    TextInput,
    RealtimeForward,
    AudioCapture,
    ResponseDispatch,
    AudioPlayback,
}

type TaskOutcome = (Task, Result<(), Fault>);

pub struct SessionOrchestrator {
    connector: Arc<dyn LiveConnector>,
    registry: Arc<ToolRegistry>,
    speech: Arc<dyn SpeechSynthesizer>,
    devices: Arc<dyn AudioDevices>,
    state: watch::Sender<SessionState>,
}

impl SessionOrchestrator {
    pub fn new(
        connector: Arc<dyn LiveConnector>,
        registry: Arc<ToolRegistry>,
        speech: Arc<dyn SpeechSynthesizer>,
        devices: Arc<dyn AudioDevices>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            connector,
            registry,
            speech,
            devices,
            state,
        }
    }

    /// Session state changes, starting with the current state.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: SessionState) {
        tracing::debug!(?state, "Session state changed");
        self.state.send_replace(state);
    }

    /// Runs one session until `input` yields a `q` line (or ends), or until
    /// any task fails.
    pub async fn run<R>(&self, config: OrchestratorConfig, input: R) -> Result<(), OrchestratorError>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        self.set_state(SessionState::Connecting);
        let (writer, reader) = match self.connector.connect(&config.session).await {
            Ok(halves) => halves,
            Err(e) => {
                self.set_state(SessionState::Failed);
                return Err(OrchestratorError::Faults(vec![Fault::Transport(e)]));
            }
        };
        self.set_state(SessionState::Active);
        tracing::info!(
            model = %config.session.model,
            mode = ?config.session.response_mode,
            "Session active. Type a message, or q to quit."
        );

        let writer = Arc::new(Mutex::new(writer));
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let playback_queue = Arc::new(PlaybackQueue::new());
        let capture_slot: Arc<DeviceSlot<dyn CaptureStream>> = Arc::new(DeviceSlot::new());
        let playback_slot: Arc<DeviceSlot<dyn PlaybackStream>> = Arc::new(DeviceSlot::new());
        let responder = Responder {
            registry: self.registry.clone(),
            speech: self.speech.clone(),
            playback: playback_queue.clone(),
            control: control_tx.clone(),
            mode: config.session.response_mode,
        };

        let mut tasks = JoinSet::new();
        tasks.spawn(tagged(Task::TextInput, text_input(input, control_tx)));
        tasks.spawn(tagged(
            Task::RealtimeForward,
            realtime_forward(writer.clone(), control_rx, outbound_rx),
        ));
        tasks.spawn(tagged(
            Task::AudioCapture,
            audio_capture(
                self.devices.clone(),
                config.capture,
                capture_slot.clone(),
                outbound_tx,
            ),
        ));
        tasks.spawn(tagged(
            Task::ResponseDispatch,
            response_dispatch(reader, responder),
        ));
        tasks.spawn(tagged(
            Task::AudioPlayback,
            audio_playback(
                self.devices.clone(),
                config.playback,
                playback_slot.clone(),
                playback_queue,
            ),
        ));

        let faults = supervise(&mut tasks).await;

        self.set_state(SessionState::Closing);
        release_devices(capture_slot, playback_slot).await;
        if let Err(e) = writer.lock().await.close().await {
            tracing::warn!("Failed to close session cleanly: {:#}", e);
        }

        if faults.is_empty() {
            self.set_state(SessionState::Closed);
            tracing::info!("Session closed.");
            Ok(())
        } else {
            self.set_state(SessionState::Failed);
            Err(OrchestratorError::Faults(faults))
        }
    }
}

async fn tagged<F>(task: Task, future: F) -> TaskOutcome
where
    F: Future<Output = Result<(), Fault>>,
{
    (task, future.await)
}

/// Waits for the first task to finish, then cancels the rest. Returns every
/// fault seen; the shutdown's own cancellations are not faults.
async fn supervise(tasks: &mut JoinSet<TaskOutcome>) -> Vec<Fault> {
    let mut faults = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((Task::TextInput, Ok(()))) => {
                tracing::info!("User requested exit, shutting down...");
                break;
            }
            Ok((task, Ok(()))) => {
                tracing::warn!(?task, "Task stopped on its own");
            }
            Ok((task, Err(fault))) => {
                tracing::error!(?task, "{}", fault);
                faults.push(fault);
                break;
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                tracing::error!("Task panicked: {}", e);
                faults.push(Fault::TaskPanicked(e.to_string()));
                break;
            }
        }
    }

    tasks.abort_all();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((task, Err(fault))) => {
                tracing::error!(?task, "{}", fault);
                faults.push(fault);
            }
            Err(e) if e.is_panic() => faults.push(Fault::TaskPanicked(e.to_string())),
            _ => {}
        }
    }
    faults
}

// Closing joins the device threads, so it runs off the scheduler. A device
// call still in flight is left to close its own stream when it returns.
async fn release_devices(
    capture: Arc<DeviceSlot<dyn CaptureStream>>,
    playback: Arc<DeviceSlot<dyn PlaybackStream>>,
) {
    match tokio::task::spawn_blocking(move || (capture.release(), playback.release())).await {
        Ok((capture, playback)) => {
            tracing::debug!(capture, playback, "Audio devices released");
        }
        Err(e) => tracing::error!("Failed to release audio devices: {}", e),
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, Fault>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Fault::TaskPanicked(e.to_string()))
}

fn writer_gone() -> Fault {
    Fault::Transport(anyhow!("session writer has stopped"))
}

async fn text_input<R>(input: R, control: mpsc::UnboundedSender<SessionMessage>) -> Result<(), Fault>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().eq_ignore_ascii_case("q") {
            return Ok(());
        }
        let content = if line.is_empty() { ".".to_string() } else { line };
        control
            .send(
                OutboundEvent::TextTurn {
                    content,
                    end_of_turn: true,
                }
                .into(),
            )
            .map_err(|_| writer_gone())?;
    }
    tracing::info!("Input closed.");
    Ok(())
}

/// Sole writer of the session. Control messages go first when both queues
/// have something.
async fn realtime_forward(
    writer: Arc<Mutex<Box<dyn SessionWriter>>>,
    mut control: mpsc::UnboundedReceiver<SessionMessage>,
    mut outbound: mpsc::Receiver<OutboundEvent>,
) -> Result<(), Fault> {
    loop {
        let message = tokio::select! {
            biased;
            Some(message) = control.recv() => message,
            Some(event) = outbound.recv() => SessionMessage::Outbound(event),
            else => return Ok(()),
        };
        writer
            .lock()
            .await
            .send(message)
            .await
            .map_err(Fault::Transport)?;
    }
}

async fn audio_capture(
    devices: Arc<dyn AudioDevices>,
    format: AudioFormat,
    slot: Arc<DeviceSlot<dyn CaptureStream>>,
    outbound: mpsc::Sender<OutboundEvent>,
) -> Result<(), Fault> {
    let opener = slot.clone();
    run_blocking(move || -> anyhow::Result<()> {
        opener.install(devices.open_capture(&format)?);
        Ok(())
    })
    .await?
    .map_err(Fault::Device)?;
    tracing::info!(sample_rate = format.sample_rate, "Microphone open");

    loop {
        let reader = slot.clone();
        let bytes = match run_blocking(move || reader.with(|stream| stream.read_chunk())).await? {
            Some(chunk) => chunk.map_err(Fault::Device)?,
            None => return Ok(()),
        };
        outbound
            .send(OutboundEvent::AudioChunk {
                bytes,
                mime_type: CAPTURE_MIME_TYPE.to_string(),
            })
            .await
            .map_err(|_| writer_gone())?;
    }
}

struct Responder {
    registry: Arc<ToolRegistry>,
    speech: Arc<dyn SpeechSynthesizer>,
    playback: Arc<PlaybackQueue>,
    control: mpsc::UnboundedSender<SessionMessage>,
    mode: ResponseMode,
}

async fn response_dispatch(
    mut reader: Box<dyn SessionReader>,
    responder: Responder,
) -> Result<(), Fault> {
    loop {
        responder.handle_turn(reader.as_mut()).await?;
    }
}

impl Responder {
    async fn handle_turn(&self, reader: &mut dyn SessionReader) -> Result<(), Fault> {
        loop {
            let event = reader
                .next_event()
                .await
                .map_err(Fault::Transport)?
                .ok_or_else(|| Fault::Transport(anyhow!("session closed by the service")))?;

            match event {
                InboundEvent::AudioChunk(bytes) => self.playback.push(bytes),
                InboundEvent::TextDelta(text) => self.speak(text).await?,
                InboundEvent::ToolCallBatch(calls) => {
                    let received = calls.len();
                    let results = self.registry.dispatch_all(calls).await;
                    tracing::info!("Answering {} of {} tool calls", results.len(), received);
                    self.control
                        .send(SessionMessage::ToolResults(results))
                        .map_err(|_| writer_gone())?;
                }
                InboundEvent::TurnComplete => {
                    if self.mode == ResponseMode::AudioOnly {
                        let dropped = self.playback.clear();
                        if dropped > 0 {
                            tracing::debug!("Turn complete, dropped {} unplayed chunks", dropped);
                        }
                    }
                    return Ok(());
                }
            }
        }
    }

    async fn speak(&self, text: String) -> Result<(), Fault> {
        if self.mode == ResponseMode::AudioOnly {
            tracing::debug!("Ignoring text in audio mode: {}", text);
            return Ok(());
        }
        if text.trim().is_empty() {
            return Ok(());
        }

        tracing::info!("Assistant: {}", text.trim());
        let audio = self
            .speech
            .synthesize(&text)
            .await
            .map_err(Fault::Synthesis)?;
        self.playback.push(audio);
        Ok(())
    }
}

async fn audio_playback(
    devices: Arc<dyn AudioDevices>,
    format: AudioFormat,
    slot: Arc<DeviceSlot<dyn PlaybackStream>>,
    queue: Arc<PlaybackQueue>,
) -> Result<(), Fault> {
    let opener = slot.clone();
    run_blocking(move || -> anyhow::Result<()> {
        opener.install(devices.open_playback(&format)?);
        Ok(())
    })
    .await?
    .map_err(Fault::Device)?;
    tracing::info!(sample_rate = format.sample_rate, "Speaker open");

    loop {
        let chunk = queue.pop().await;
        let writer = slot.clone();
        match run_blocking(move || writer.with(|stream| stream.write(&chunk))).await? {
            Some(written) => written.map_err(Fault::Device)?,
            None => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioStream;
    use crate::commerce::MockCommerceBackend;
    use crate::cart_matcher::MockCartMatcher;
    use crate::events::ToolCall;
    use crate::speech::MockSpeechSynthesizer;
    use crate::tools::picnic_registry;
    use async_trait::async_trait;
    use picnic_api::Cart;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::{Barrier, Notify};

    // --- Hand-written fakes for the session and the audio devices ---

    #[derive(Clone, Default)]
    struct FakeDevices {
        reads: Arc<AtomicUsize>,
        capture_closes: Arc<AtomicUsize>,
        playback_closes: Arc<AtomicUsize>,
        played: Arc<std::sync::Mutex<Vec<Vec<u8>>>>,
        writes_started: Arc<AtomicUsize>,
        // While set, writes block and ignore any stop request.
        hold_writes: Arc<AtomicBool>,
    }

    impl FakeDevices {
        fn writes_started(&self) -> usize {
            self.writes_started.load(Ordering::SeqCst)
        }

        fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }

        fn capture_closes(&self) -> usize {
            self.capture_closes.load(Ordering::SeqCst)
        }

        fn playback_closes(&self) -> usize {
            self.playback_closes.load(Ordering::SeqCst)
        }
    }

    struct FakeCapture(FakeDevices);

    impl AudioStream for FakeCapture {
        fn close(&mut self) {
            self.0.capture_closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CaptureStream for FakeCapture {
        fn read_chunk(&mut self) -> anyhow::Result<Vec<u8>> {
            std::thread::sleep(Duration::from_millis(1));
            let n = self.0.reads.fetch_add(1, Ordering::SeqCst);
            Ok(vec![n as u8; 4])
        }
    }

    struct FakePlayback(FakeDevices);

    impl AudioStream for FakePlayback {
        fn close(&mut self) {
            self.0.playback_closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl PlaybackStream for FakePlayback {
        fn write(&mut self, pcm: &[u8]) -> anyhow::Result<()> {
            self.0.writes_started.fetch_add(1, Ordering::SeqCst);
            while self.0.hold_writes.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
            self.0.played.lock().unwrap().push(pcm.to_vec());
            Ok(())
        }
    }

    impl AudioDevices for FakeDevices {
        fn open_capture(&self, _format: &AudioFormat) -> anyhow::Result<Box<dyn CaptureStream>> {
            Ok(Box::new(FakeCapture(self.clone())))
        }

        fn open_playback(&self, _format: &AudioFormat) -> anyhow::Result<Box<dyn PlaybackStream>> {
            Ok(Box::new(FakePlayback(self.clone())))
        }
    }

    enum WriterMode {
        Record,
        Block,
        Gate(Arc<Barrier>),
    }

    struct FakeWriter {
        mode: WriterMode,
        sent: Arc<std::sync::Mutex<Vec<SessionMessage>>>,
        closes: Arc<AtomicUsize>,
    }

    impl FakeWriter {
        fn new(mode: WriterMode) -> Self {
            Self {
                mode,
                sent: Arc::default(),
                closes: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl SessionWriter for FakeWriter {
        async fn send(&mut self, message: SessionMessage) -> anyhow::Result<()> {
            match &self.mode {
                WriterMode::Record => {}
                WriterMode::Block => std::future::pending::<()>().await,
                WriterMode::Gate(barrier) => {
                    barrier.wait().await;
                }
            }
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn close(&mut self) -> anyhow::Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Plays a script, then either hangs or fails.
    struct ScriptedReader {
        events: VecDeque<InboundEvent>,
        exhausted: Arc<Notify>,
        fail_at_end: bool,
    }

    impl ScriptedReader {
        fn new(events: Vec<InboundEvent>) -> Self {
            Self {
                events: events.into(),
                exhausted: Arc::new(Notify::new()),
                fail_at_end: false,
            }
        }
    }

    #[async_trait]
    impl SessionReader for ScriptedReader {
        async fn next_event(&mut self) -> anyhow::Result<Option<InboundEvent>> {
            if let Some(event) = self.events.pop_front() {
                return Ok(Some(event));
            }
            self.exhausted.notify_one();
            if self.fail_at_end {
                return Err(anyhow!("connection reset"));
            }
            std::future::pending().await
        }
    }

    struct FakeConnector {
        halves: std::sync::Mutex<Option<(Box<dyn SessionWriter>, Box<dyn SessionReader>)>>,
    }

    impl FakeConnector {
        fn new(writer: FakeWriter, reader: ScriptedReader) -> Self {
            Self {
                halves: std::sync::Mutex::new(Some((Box::new(writer), Box::new(reader)))),
            }
        }

        fn refusing() -> Self {
            Self {
                halves: std::sync::Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl LiveConnector for FakeConnector {
        async fn connect(
            &self,
            _config: &SessionConfig,
        ) -> anyhow::Result<(Box<dyn SessionWriter>, Box<dyn SessionReader>)> {
            self.halves
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| anyhow!("connection refused"))
        }
    }

    fn orchestrator(connector: FakeConnector, devices: &FakeDevices) -> SessionOrchestrator {
        SessionOrchestrator::new(
            Arc::new(connector),
            Arc::new(ToolRegistry::new()),
            Arc::new(MockSpeechSynthesizer::new()),
            Arc::new(devices.clone()),
        )
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition was not reached in time");
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    fn responder(
        registry: ToolRegistry,
        speech: MockSpeechSynthesizer,
        mode: ResponseMode,
    ) -> (Responder, Arc<PlaybackQueue>, mpsc::UnboundedReceiver<SessionMessage>) {
        let playback = Arc::new(PlaybackQueue::new());
        let (control, control_rx) = mpsc::unbounded_channel();
        let responder = Responder {
            registry: Arc::new(registry),
            speech: Arc::new(speech),
            playback: playback.clone(),
            control,
            mode,
        };
        (responder, playback, control_rx)
    }

    #[tokio::test]
    async fn test_text_input_sends_turns_until_sentinel() {
        let (control, mut control_rx) = mpsc::unbounded_channel();

        text_input(&b"two apples\n\nQ\nnever sent\n"[..], control)
            .await
            .unwrap();

        let turn = |content: &str| {
            SessionMessage::Outbound(OutboundEvent::TextTurn {
                content: content.to_string(),
                end_of_turn: true,
            })
        };
        assert_eq!(control_rx.recv().await, Some(turn("two apples")));
        assert_eq!(control_rx.recv().await, Some(turn(".")));
        assert_eq!(control_rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_forward_prefers_control_and_keeps_queue_order() {
        // --- Arrange ---
        let writer = FakeWriter::new(WriterMode::Record);
        let sent = writer.sent.clone();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::channel(5);
        let audio = |n: u8| OutboundEvent::AudioChunk {
            bytes: vec![n],
            mime_type: CAPTURE_MIME_TYPE.to_string(),
        };
        outbound_tx.send(audio(1)).await.unwrap();
        outbound_tx.send(audio(2)).await.unwrap();
        control_tx.send(SessionMessage::ToolResults(vec![])).unwrap();
        drop(outbound_tx);
        drop(control_tx);

        // --- Act ---
        realtime_forward(
            Arc::new(Mutex::new(Box::new(writer) as Box<dyn SessionWriter>)),
            control_rx,
            outbound_rx,
        )
        .await
        .unwrap();

        // --- Assert ---
        assert_eq!(
            *sent.lock().unwrap(),
            vec![
                SessionMessage::ToolResults(vec![]),
                SessionMessage::Outbound(audio(1)),
                SessionMessage::Outbound(audio(2)),
            ]
        );
    }

    #[tokio::test]
    async fn test_full_outbound_queue_blocks_capture_until_forward_drains() {
        // --- Arrange ---
        let devices = FakeDevices::default();
        let slot: Arc<DeviceSlot<dyn CaptureStream>> = Arc::new(DeviceSlot::new());
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let capture = tokio::spawn(audio_capture(
            Arc::new(devices.clone()),
            AudioFormat::capture(),
            slot.clone(),
            outbound_tx,
        ));

        // --- Act & Assert: five pushes fill the queue, the sixth parks ---
        wait_for(|| devices.reads() == 6).await;
        settle().await;
        assert_eq!(devices.reads(), 6);

        let gate = Arc::new(Barrier::new(2));
        let writer = FakeWriter::new(WriterMode::Gate(gate.clone()));
        let sent = writer.sent.clone();
        let (_control_tx, control_rx) = mpsc::unbounded_channel();
        let forward = tokio::spawn(realtime_forward(
            Arc::new(Mutex::new(Box::new(writer) as Box<dyn SessionWriter>)),
            control_rx,
            outbound_rx,
        ));

        // Forward took one chunk and is held at the gate: exactly one parked
        // push completed, and capture is parked again on the next chunk.
        wait_for(|| devices.reads() == 7).await;
        settle().await;
        assert_eq!(devices.reads(), 7);
        assert!(sent.lock().unwrap().is_empty());

        gate.wait().await;
        wait_for(|| sent.lock().unwrap().len() == 1).await;

        forward.abort();
        capture.abort();
        assert!(slot.release());
        assert_eq!(devices.capture_closes(), 1);
    }

    #[tokio::test]
    async fn test_text_mode_synthesizes_and_answers_tool_calls() {
        // --- Arrange ---
        let mut backend = MockCommerceBackend::new();
        backend.expect_get_cart().returning(|| {
            Ok(Cart::from_value(json!({
                "items": [{ "display_price": 119, "items": [{ "id": "s1", "name": "Milk" }] }]
            })))
        });
        let registry = picnic_registry(Arc::new(backend), Arc::new(MockCartMatcher::new()));
        let mut speech = MockSpeechSynthesizer::new();
        speech
            .expect_synthesize()
            .returning(|text| {
                assert_eq!(text, "Your cart has milk.");
                Ok(vec![7, 7])
            })
            .once();
        let (responder, playback, mut control_rx) =
            responder(registry, speech, ResponseMode::TextOnly);
        let reader = ScriptedReader::new(vec![
            InboundEvent::ToolCallBatch(vec![
                ToolCall {
                    name: "get_all_current_products_in_cart".to_string(),
                    args: Default::default(),
                    id: "c1".to_string(),
                },
                ToolCall {
                    name: "order_pizza".to_string(),
                    args: Default::default(),
                    id: "c2".to_string(),
                },
            ]),
            InboundEvent::TurnComplete,
            InboundEvent::TextDelta("Your cart has milk.".to_string()),
            InboundEvent::AudioChunk(vec![1]),
            InboundEvent::TurnComplete,
        ]);
        let exhausted = reader.exhausted.clone();

        // --- Act ---
        let dispatch = tokio::spawn(response_dispatch(Box::new(reader), responder));
        exhausted.notified().await;

        // --- Assert ---
        match control_rx.recv().await {
            Some(SessionMessage::ToolResults(results)) => {
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].id, "c1");
                assert_eq!(results[0].response["result"][0]["product_name"], "Milk");
            }
            other => panic!("expected tool results, got {:?}", other),
        }
        assert_eq!(playback.pop().await, vec![7, 7]);
        assert_eq!(playback.pop().await, vec![1]);
        dispatch.abort();
    }

    #[tokio::test]
    async fn test_whitespace_text_is_not_synthesized() {
        // No expectations: any synthesize call fails the test.
        let (responder, playback, _control_rx) = responder(
            ToolRegistry::new(),
            MockSpeechSynthesizer::new(),
            ResponseMode::TextOnly,
        );
        let reader = ScriptedReader::new(vec![
            InboundEvent::TextDelta(" \n ".to_string()),
            InboundEvent::TurnComplete,
        ]);
        let exhausted = reader.exhausted.clone();

        let dispatch = tokio::spawn(response_dispatch(Box::new(reader), responder));
        tokio::time::timeout(Duration::from_secs(5), exhausted.notified())
            .await
            .expect("dispatch stopped before the end of the script");

        assert!(playback.is_empty());
        assert!(!dispatch.is_finished());
        dispatch.abort();
    }

    #[tokio::test]
    async fn test_turn_complete_flushes_only_in_audio_mode() {
        for (mode, expected_len) in [(ResponseMode::AudioOnly, 0), (ResponseMode::TextOnly, 2)] {
            let (responder, playback, _control_rx) =
                responder(ToolRegistry::new(), MockSpeechSynthesizer::new(), mode);
            let reader = ScriptedReader::new(vec![
                InboundEvent::AudioChunk(vec![1]),
                InboundEvent::AudioChunk(vec![2]),
                InboundEvent::TurnComplete,
            ]);
            let exhausted = reader.exhausted.clone();

            let dispatch = tokio::spawn(response_dispatch(Box::new(reader), responder));
            exhausted.notified().await;

            assert_eq!(playback.len(), expected_len, "mode {:?}", mode);
            dispatch.abort();
        }
    }

    #[tokio::test]
    async fn test_sentinel_shutdown_releases_capture_once_while_capture_is_parked() {
        // --- Arrange ---
        let devices = FakeDevices::default();
        let writer = FakeWriter::new(WriterMode::Block);
        let writer_closes = writer.closes.clone();
        let connector = FakeConnector::new(writer, ScriptedReader::new(vec![]));
        let orchestrator = Arc::new(orchestrator(connector, &devices));
        let mut states = orchestrator.subscribe();
        let (mut stdin, input) = tokio::io::duplex(64);

        let run = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .run(OrchestratorConfig::default(), tokio::io::BufReader::new(input))
                    .await
            })
        };

        // One chunk is stuck in the writer, five fill the queue, and capture
        // is parked pushing the seventh.
        wait_for(|| devices.reads() == 7).await;
        settle().await;
        assert_eq!(devices.reads(), 7);
        assert_eq!(*states.borrow_and_update(), SessionState::Active);

        // --- Act ---
        stdin.write_all(b"q\n").await.unwrap();
        let outcome = run.await.unwrap();

        // --- Assert ---
        assert!(outcome.is_ok(), "{:?}", outcome);
        assert_eq!(devices.capture_closes(), 1);
        assert_eq!(devices.playback_closes(), 1);
        assert_eq!(writer_closes.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_sentinel_shutdown_does_not_wait_for_playback_in_progress() {
        // --- Arrange ---
        let devices = FakeDevices::default();
        devices.hold_writes.store(true, Ordering::SeqCst);
        let reader = ScriptedReader::new(vec![InboundEvent::AudioChunk(vec![9; 480])]);
        let connector = FakeConnector::new(FakeWriter::new(WriterMode::Record), reader);
        let orchestrator = Arc::new(orchestrator(connector, &devices));
        let (mut stdin, input) = tokio::io::duplex(64);

        let run = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .run(OrchestratorConfig::default(), tokio::io::BufReader::new(input))
                    .await
            })
        };
        wait_for(|| devices.writes_started() == 1).await;

        // --- Act ---
        stdin.write_all(b"q\n").await.unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .expect("shutdown waited for the speaker")
            .unwrap();

        // --- Assert ---
        assert!(outcome.is_ok(), "{:?}", outcome);
        assert_eq!(orchestrator.state(), SessionState::Closed);
        assert_eq!(devices.playback_closes(), 0);

        devices.hold_writes.store(false, Ordering::SeqCst);
        wait_for(|| devices.playback_closes() == 1).await;
        wait_for(|| devices.capture_closes() == 1).await;
        settle().await;
        assert_eq!(devices.playback_closes(), 1);
        assert_eq!(devices.capture_closes(), 1);
        assert_eq!(devices.played.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_fault_is_reported_after_teardown() {
        // --- Arrange ---
        let devices = FakeDevices::default();
        let mut reader = ScriptedReader::new(vec![InboundEvent::AudioChunk(vec![1])]);
        reader.fail_at_end = true;
        let connector = FakeConnector::new(FakeWriter::new(WriterMode::Record), reader);
        let orchestrator = orchestrator(connector, &devices);
        let (_stdin, input) = tokio::io::duplex(64);

        // --- Act ---
        let outcome = orchestrator
            .run(OrchestratorConfig::default(), tokio::io::BufReader::new(input))
            .await;

        // --- Assert ---
        let err = outcome.unwrap_err();
        assert!(
            err.faults().iter().any(|f| matches!(f, Fault::Transport(_))),
            "{}",
            err
        );
        assert!(devices.capture_closes() <= 1);
        assert_eq!(orchestrator.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_connect_failure_is_a_transport_fault() {
        let devices = FakeDevices::default();
        let orchestrator = orchestrator(FakeConnector::refusing(), &devices);

        let err = orchestrator
            .run(OrchestratorConfig::default(), &b""[..])
            .await
            .unwrap_err();

        assert!(matches!(err.faults(), [Fault::Transport(_)]));
        assert_eq!(orchestrator.state(), SessionState::Failed);
        assert_eq!(devices.reads(), 0);
    }
}
