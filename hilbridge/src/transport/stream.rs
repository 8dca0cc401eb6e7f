//! Streaming response worker.
//!
//! Some tests (baud-rate scans, auto-baud detection) answer with a series of
//! newline-delimited records instead of a single block. The worker sends the
//! message, then reads until the instrument goes quiet, closes the
//! connection, or the caller cancels, reporting each complete line as it
//! arrives.
//!
//! Event order on the channel is always:
//!
//! ```text
//! (Line, Progress)*  then exactly one of  Done | Failed
//! ```

use crate::error::{Error, Result};
use crate::protocol::message::WireMessage;
use crate::transport::{CancelToken, Endpoint, connect, is_timeout};
use log::{debug, info, trace, warn};
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Reason reported by [`StreamEvent::Failed`] after cancellation.
pub const CANCELLED_REASON: &str = "cancelled";

/// Polling step while waiting for a superseded worker.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Streaming worker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Timeout of the connect attempt. The worker does not retry.
    pub connect_timeout: Duration,
    /// Receiving ends once no bytes arrived for this long.
    pub response_timeout: Duration,
    /// Size of a single socket read.
    pub chunk_size: usize,
    /// Receiving ends early once this many bytes were read.
    pub max_response_bytes: usize,
    /// Read timeout of the socket; bounds how long cancellation may go
    /// unnoticed.
    pub poll_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(120),
            response_timeout: Duration::from_secs(40),
            chunk_size: 4096,
            max_response_bytes: 1024 * 1024,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl StreamConfig {
    /// Set the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the idle timeout.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the read chunk size.
    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Set the response size cap.
    #[must_use]
    pub fn with_max_response_bytes(mut self, max: usize) -> Self {
        self.max_response_bytes = max;
        self
    }

    /// Set the socket poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Event reported by a streaming worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A complete, non-blank line. `seq` starts at 1.
    Line {
        /// Cleaned line text.
        text: String,
        /// Position of the line in the stream.
        seq: usize,
    },
    /// Number of lines received so far.
    Progress(usize),
    /// All lines, joined with `\n`.
    Done(String),
    /// The exchange failed or was cancelled.
    Failed(String),
}

impl StreamEvent {
    /// Whether this is the last event of the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Failed(_))
    }
}

/// Lifecycle of a streaming worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Created, not started.
    Idle = 0,
    /// Opening the connection.
    Connecting = 1,
    /// Writing the message.
    Sending = 2,
    /// Reading lines.
    Receiving = 3,
    /// Finished normally.
    Done = 4,
    /// Finished with an error or cancelled.
    Failed = 5,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Sending,
            3 => Self::Receiving,
            4 => Self::Done,
            5 => Self::Failed,
            _ => Self::Idle,
        }
    }

    /// Whether the worker has finished.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

#[derive(Debug, Clone)]
struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(WorkerState::Idle as u8)))
    }

    fn set(&self, state: WorkerState) {
        trace!("Stream worker state: {state:?}");
        self.0.store(state as u8, Ordering::SeqCst);
    }

    fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::SeqCst))
    }
}

/// Splits a byte stream into cleaned text lines.
///
/// Chunks may end anywhere, including inside a UTF-8 sequence or a line.
/// Incomplete data is carried over to the next [`push`](Self::push).
#[derive(Debug, Default)]
pub struct LineAssembler {
    undecoded: Vec<u8>,
    text: String,
}

impl LineAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the complete, non-blank lines it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.undecoded.extend_from_slice(chunk);
        self.decode_available();

        let mut lines = Vec::new();
        while let Some(pos) = self.text.find('\n') {
            let raw: String = self.text.drain(..=pos).collect();
            let line = clean_line(&raw[..raw.len() - 1]);
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Flush whatever is left once the stream has ended.
    ///
    /// Returns the trailing partial line, if it is not blank.
    pub fn finish(&mut self) -> Option<String> {
        self.decode_available();
        if !self.undecoded.is_empty() {
            self.undecoded.clear();
            self.text.push(char::REPLACEMENT_CHARACTER);
        }

        let rest = clean_line(&std::mem::take(&mut self.text));
        (!rest.trim().is_empty()).then_some(rest)
    }

    /// Whether any bytes are buffered.
    pub fn has_pending(&self) -> bool {
        !self.undecoded.is_empty() || !self.text.is_empty()
    }

    /// Move decodable bytes into `text`. Invalid sequences become U+FFFD;
    /// an incomplete sequence at the end stays in `undecoded`.
    fn decode_available(&mut self) {
        loop {
            match std::str::from_utf8(&self.undecoded) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    self.undecoded.clear();
                    return;
                },
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    if let Ok(valid) = std::str::from_utf8(&self.undecoded[..valid_up_to]) {
                        self.text.push_str(valid);
                    }
                    match err.error_len() {
                        Some(bad) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            self.undecoded.drain(..valid_up_to + bad);
                        },
                        None => {
                            self.undecoded.drain(..valid_up_to);
                            return;
                        },
                    }
                },
            }
        }
    }
}

/// Drop a trailing `\r`, the BOM and control characters other than tab.
fn clean_line(line: &str) -> String {
    line.strip_suffix('\r')
        .unwrap_or(line)
        .chars()
        .filter(|&c| c == '\t' || (c != '\u{feff}' && !c.is_control()))
        .collect()
}

/// Caller side of a running stream.
#[derive(Debug)]
pub struct StreamSubscription {
    events: Receiver<StreamEvent>,
    cancel: CancelToken,
    state: StateCell,
}

impl StreamSubscription {
    /// Block until the next event. `None` once the worker is gone.
    pub fn recv(&self) -> Option<StreamEvent> {
        self.events.recv().ok()
    }

    /// Wait at most `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<StreamEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Next event if one is already queued.
    pub fn try_recv(&self) -> Option<StreamEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Blocking iterator over the remaining events.
    pub fn iter(&self) -> impl Iterator<Item = StreamEvent> + '_ {
        self.events.iter()
    }

    /// Request cancellation. The worker answers with
    /// `Failed("cancelled")`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this stream, e.g. for a Ctrl-C handler.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Current worker state.
    pub fn state(&self) -> WorkerState {
        self.state.get()
    }
}

/// Owner side of a running stream worker.
#[derive(Debug)]
pub struct WorkerHandle {
    cancel: CancelToken,
    state: StateCell,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Current worker state.
    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    /// Whether the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait up to `grace` for the worker to exit.
    ///
    /// Returns `false` if it was still running; the thread is then detached
    /// and finishes on its own at its next cancellation check.
    pub fn wait(self, grace: Duration) -> bool {
        let start = Instant::now();
        while !self.thread.is_finished() {
            if start.elapsed() >= grace {
                warn!("Stream worker did not stop within {grace:?}");
                return false;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }
        if self.thread.join().is_err() {
            warn!("Stream worker panicked");
        }
        true
    }
}

/// Start a streaming exchange on its own thread.
pub fn spawn(
    message: WireMessage,
    endpoint: Endpoint,
    config: StreamConfig,
) -> Result<(StreamSubscription, WorkerHandle)> {
    let (tx, rx) = mpsc::channel();
    let cancel = CancelToken::new();
    let state = StateCell::new();

    let worker = Worker {
        message,
        endpoint,
        config,
        cancel: cancel.clone(),
        state: state.clone(),
        tx,
    };
    let thread = thread::Builder::new()
        .name("hilbridge-stream".into())
        .spawn(move || worker.run())?;

    Ok((
        StreamSubscription {
            events: rx,
            cancel: cancel.clone(),
            state: state.clone(),
        },
        WorkerHandle {
            cancel,
            state,
            thread,
        },
    ))
}

struct Worker {
    message: WireMessage,
    endpoint: Endpoint,
    config: StreamConfig,
    cancel: CancelToken,
    state: StateCell,
    tx: Sender<StreamEvent>,
}

impl Worker {
    fn run(self) {
        let outcome = self.exchange();
        let terminal = match outcome {
            Ok(full) => {
                self.state.set(WorkerState::Done);
                info!("Stream from {} complete", self.endpoint);
                StreamEvent::Done(full)
            },
            Err(Error::Cancelled) => {
                self.state.set(WorkerState::Failed);
                info!("Stream from {} cancelled", self.endpoint);
                StreamEvent::Failed(CANCELLED_REASON.into())
            },
            Err(e) => {
                self.state.set(WorkerState::Failed);
                warn!("Stream from {} failed: {e}", self.endpoint);
                StreamEvent::Failed(e.to_string())
            },
        };
        if self.tx.send(terminal).is_err() {
            trace!("Subscriber gone before the terminal event");
        }
    }

    fn exchange(&self) -> Result<String> {
        self.state.set(WorkerState::Connecting);
        self.check_cancel()?;

        let timeout = self.config.connect_timeout.max(Duration::from_millis(1));
        let mut stream = connect(&self.endpoint, timeout)
            .map_err(|e| Error::ConnectionFailed(format!("{}: {e}", self.endpoint)))?;
        debug!("Connected to {}", self.endpoint);

        self.state.set(WorkerState::Sending);
        self.check_cancel()?;
        let bytes = self.message.to_wire_bytes();
        stream.write_all(&bytes)?;
        stream.flush()?;
        trace!("Sent {} bytes to {}", bytes.len(), self.endpoint);

        self.state.set(WorkerState::Receiving);
        stream.set_read_timeout(Some(self.config.poll_interval.max(Duration::from_millis(1))))?;

        let tx = &self.tx;
        receive_loop(&mut stream, &self.config, &self.cancel, &mut |event| {
            tx.send(event).ok();
        })
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Read lines from `reader` until idle timeout, EOF, size cap or
/// cancellation, calling `emit` with `Line` and `Progress` events.
///
/// Returns the emitted lines joined with `\n`. `reader` is expected to
/// time out its reads after roughly `config.poll_interval`.
pub(crate) fn receive_loop<R: Read>(
    reader: &mut R,
    config: &StreamConfig,
    cancel: &CancelToken,
    emit: &mut dyn FnMut(StreamEvent),
) -> Result<String> {
    let mut assembler = LineAssembler::new();
    let mut lines: Vec<String> = Vec::new();
    let mut buf = vec![0u8; config.chunk_size.max(1)];
    let mut total = 0usize;
    let mut last_data = Instant::now();

    let mut deliver = |text: String, lines: &mut Vec<String>| -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let seq = lines.len() + 1;
        emit(StreamEvent::Line {
            text: text.clone(),
            seq,
        });
        emit(StreamEvent::Progress(seq));
        lines.push(text);
        Ok(())
    };

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match reader.read(&mut buf) {
            Ok(0) => {
                debug!("Instrument closed the stream");
                break;
            },
            Ok(n) => {
                last_data = Instant::now();
                total += n;
                for line in assembler.push(&buf[..n]) {
                    deliver(line, &mut lines)?;
                }
                if total > config.max_response_bytes {
                    warn!(
                        "Response exceeded {} bytes, ending stream early",
                        config.max_response_bytes
                    );
                    break;
                }
            },
            Err(e) if is_timeout(&e) => {
                if last_data.elapsed() >= config.response_timeout {
                    debug!("No data for {:?}, ending stream", config.response_timeout);
                    break;
                }
            },
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(Error::Io(e)),
        }
    }

    if let Some(rest) = assembler.finish() {
        deliver(rest, &mut lines)?;
    }

    let full = lines.join("\n");
    Ok(full.trim_start_matches('\u{feff}').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;

    /// Replays a fixed sequence of read results, then reports EOF.
    struct ScriptedReader {
        steps: VecDeque<io::Result<Vec<u8>>>,
    }

    impl ScriptedReader {
        fn new(steps: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                steps: steps.into(),
            }
        }

        fn chunks(chunks: &[&[u8]]) -> Self {
            Self::new(chunks.iter().map(|c| Ok(c.to_vec())).collect())
        }
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.steps.pop_front() {
                None => Ok(0),
                Some(Err(e)) => Err(e),
                Some(Ok(data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    Ok(n)
                },
            }
        }
    }

    fn run_loop<R: Read>(reader: &mut R, config: &StreamConfig) -> (Result<String>, Vec<StreamEvent>) {
        let mut events = Vec::new();
        let result = receive_loop(reader, config, &CancelToken::new(), &mut |e| events.push(e));
        (result, events)
    }

    fn lines_of(events: &[StreamEvent]) -> Vec<(String, usize)> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Line { text, seq } => Some((text.clone(), *seq)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_assembler_carries_partial_lines() {
        let mut assembler = LineAssembler::new();
        assert!(assembler.push(b"110924.33,3.85,").is_empty());
        assert!(assembler.has_pending());
        assert_eq!(
            assembler.push(b"110924.33,-3.71\r\n115200,1152"),
            vec!["110924.33,3.85,110924.33,-3.71"]
        );
        assert_eq!(assembler.push(b"00\n\n  \n"), vec!["115200,115200"]);
        assert_eq!(assembler.finish(), None);
    }

    #[test]
    fn test_assembler_split_utf8_sequence() {
        let mut assembler = LineAssembler::new();
        let bytes = "µs\n".as_bytes();
        assert!(assembler.push(&bytes[..1]).is_empty());
        assert_eq!(assembler.push(&bytes[1..]), vec!["µs"]);
    }

    #[test]
    fn test_assembler_cleans_lines() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"\xef\xbb\xbfa\x00b\tc\xff\r\n");
        assert_eq!(lines, vec!["ab\tc\u{fffd}"]);
    }

    #[test]
    fn test_assembler_finish_flushes_remainder() {
        let mut assembler = LineAssembler::new();
        assert!(assembler.push(b"tail").is_empty());
        assert_eq!(assembler.finish().as_deref(), Some("tail"));
        assert!(!assembler.has_pending());
    }

    #[test]
    fn test_receive_loop_emits_lines_and_progress() {
        let mut reader = ScriptedReader::chunks(&[b"a,1\nb,", b"2\n", b"c,3"]);
        let (result, events) = run_loop(&mut reader, &StreamConfig::default());

        assert_eq!(result.unwrap(), "a,1\nb,2\nc,3");
        assert_eq!(
            lines_of(&events),
            vec![("a,1".into(), 1), ("b,2".into(), 2), ("c,3".into(), 3)]
        );
        assert_eq!(events[1], StreamEvent::Progress(1));
        assert_eq!(events.last(), Some(&StreamEvent::Progress(3)));
    }

    #[test]
    fn test_receive_loop_joins_split_trailing_line() {
        let mut reader = ScriptedReader::chunks(&[b"abc,1\ndef,2\npa", b"rt"]);
        let (result, events) = run_loop(&mut reader, &StreamConfig::default());

        assert_eq!(
            lines_of(&events),
            vec![
                ("abc,1".into(), 1),
                ("def,2".into(), 2),
                ("part".into(), 3)
            ]
        );
        assert_eq!(result.unwrap(), "abc,1\ndef,2\npart");
    }

    #[test]
    fn test_receive_loop_without_terminator() {
        let mut reader = ScriptedReader::chunks(&[b"115200,115200"]);
        let (result, events) = run_loop(&mut reader, &StreamConfig::default());
        assert_eq!(result.unwrap(), "115200,115200");
        assert_eq!(lines_of(&events).len(), 1);
    }

    #[test]
    fn test_receive_loop_idle_timeout_ends_stream() {
        let mut reader = ScriptedReader::new(vec![
            Ok(b"x\n".to_vec()),
            Err(io::Error::from(io::ErrorKind::WouldBlock)),
            Ok(b"never read\n".to_vec()),
        ]);
        let config = StreamConfig::default().with_response_timeout(Duration::ZERO);
        let (result, _) = run_loop(&mut reader, &config);
        assert_eq!(result.unwrap(), "x");
    }

    #[test]
    fn test_receive_loop_size_cap() {
        let mut reader = ScriptedReader::chunks(&[b"aaaa\n", b"bbbb\n", b"cccc\n"]);
        let config = StreamConfig::default().with_max_response_bytes(6);
        let (result, _) = run_loop(&mut reader, &config);
        assert_eq!(result.unwrap(), "aaaa\nbbbb");
    }

    #[test]
    fn test_receive_loop_socket_error() {
        let mut reader = ScriptedReader::new(vec![Err(io::Error::from(
            io::ErrorKind::ConnectionReset,
        ))]);
        let (result, events) = run_loop(&mut reader, &StreamConfig::default());
        assert!(matches!(result, Err(Error::Io(_))));
        assert!(events.is_empty());
    }

    #[test]
    fn test_receive_loop_cancel_stops_emission() {
        let cancel = CancelToken::new();
        let mut reader = ScriptedReader::chunks(&[b"one\ntwo\n", b"three\n"]);
        let mut events = Vec::new();
        let trigger = cancel.clone();
        let result = receive_loop(&mut reader, &StreamConfig::default(), &cancel, &mut |e| {
            trigger.cancel();
            events.push(e);
        });
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(lines_of(&events), vec![("one".into(), 1)]);
    }

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn fast_config() -> StreamConfig {
        init_logging();
        StreamConfig::default()
            .with_connect_timeout(Duration::from_secs(2))
            .with_response_timeout(Duration::from_millis(300))
            .with_poll_interval(Duration::from_millis(20))
    }

    #[test]
    fn test_spawn_streams_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = Endpoint::localhost(listener.local_addr().unwrap().port());
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut line = String::new();
            BufReader::new(stream.try_clone().unwrap())
                .read_line(&mut line)
                .unwrap();
            stream.write_all(b"115200,115200\n").unwrap();
            stream.write_all(b"57600,57600\n").unwrap();
        });

        let (subscription, handle) =
            spawn(WireMessage::from_text("[SerialPort]"), endpoint, fast_config()).unwrap();
        let events: Vec<StreamEvent> = subscription.iter().collect();

        assert_eq!(
            events.last(),
            Some(&StreamEvent::Done("115200,115200\n57600,57600".into()))
        );
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(lines_of(&events).len(), 2);
        assert_eq!(subscription.state(), WorkerState::Done);
        assert!(handle.wait(Duration::from_secs(1)));
    }

    #[test]
    fn test_spawn_cancel_reports_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = Endpoint::localhost(listener.local_addr().unwrap().port());
        thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_secs(3));
        });

        let config = fast_config().with_response_timeout(Duration::from_secs(30));
        let (subscription, handle) =
            spawn(WireMessage::from_text("[SerialPort]"), endpoint, config).unwrap();
        thread::sleep(Duration::from_millis(100));
        subscription.cancel();

        let last = subscription.iter().last();
        assert_eq!(last, Some(StreamEvent::Failed(CANCELLED_REASON.into())));
        assert_eq!(handle.state(), WorkerState::Failed);
        assert!(handle.wait(Duration::from_secs(1)));
    }

    #[test]
    fn test_spawn_connection_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let (subscription, _handle) = spawn(
            WireMessage::from_text("[SerialPort]"),
            Endpoint::localhost(port),
            fast_config(),
        )
        .unwrap();
        match subscription.recv() {
            Some(StreamEvent::Failed(reason)) => assert!(reason.contains("Connection failed")),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
