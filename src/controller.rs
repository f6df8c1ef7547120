//! Print controller state machine for the kiosk's serial link
//!
//! The kiosk sends newline-terminated `COMMAND:DATA` strings. Each complete line becomes a
//! [`Message`], which is fed to the [`Controller`] as an [`Event`] alongside timer ticks and
//! job completions. The controller answers with [`Reply`] values to send back.

use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

/// Maximum length of a single line
pub const LINE_BUFFER_SIZE: usize = 512;

/// Interval between heartbeat counter increments
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Time without a heartbeat from the kiosk after which a warning is raised
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(15);

/// Splits received bytes into lines
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> LineBuffer {
        LineBuffer {
            buf: Vec::with_capacity(LINE_BUFFER_SIZE),
        }
    }

    /// Feeds `bytes` into the buffer, returning each line completed by them
    ///
    /// A line is completed by a newline or by filling the buffer. Lines are trimmed and empty
    /// lines are dropped.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in bytes {
            if byte != b'\n' {
                self.buf.push(byte);
            }

            if byte == b'\n' || self.buf.len() >= LINE_BUFFER_SIZE {
                let line = String::from_utf8_lossy(&self.buf).trim().to_string();
                self.buf.clear();

                if !line.is_empty() {
                    lines.push(line);
                }
            }
        }

        lines
    }
}

impl Default for LineBuffer {
    fn default() -> LineBuffer {
        LineBuffer::new()
    }
}

/// A command received from the kiosk
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Message {
    Heartbeat,
    PrintJob(String),
    GetStatus,
    Echo(String),
    Ping,
    Cancel,
    Unknown(String),
}

impl Message {
    /// Parses a single `COMMAND[:DATA]` line
    pub fn parse(line: &str) -> Message {
        let (command, data) = match line.find(':') {
            Some(pos) => (&line[..pos], line[pos + 1..].trim()),
            None => (line, ""),
        };
        let command = command.trim().to_ascii_uppercase();

        match command.as_str() {
            "ESP32_HEARTBEAT" => Message::Heartbeat,
            "PRINT_JOB" => Message::PrintJob(data.to_string()),
            "GET_STATUS" => Message::GetStatus,
            "ECHO" => Message::Echo(data.to_string()),
            "PING" => Message::Ping,
            "CANCEL" => Message::Cancel,
            _ => Message::Unknown(command),
        }
    }
}

/// Something that happened to the controller
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Event {
    /// A message arrived from the kiosk at the given time
    Received(Message, Instant),
    /// The printer finished the current job
    JobFinished,
    Tick(Instant),
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum State {
    Idle,
    Printing { job: String },
}

/// A response to send back to the kiosk
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Reply {
    Heartbeat(u32),
    JobReceived(String),
    JobComplete(String),
    Busy(String),
    Status { printing: bool },
    EchoResponse(String),
    Pong,
    Cancelled(Option<String>),
    UnknownCommand(String),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Heartbeat(counter) => write!(f, "PICO_HEARTBEAT:{}:READY", counter),
            Reply::JobReceived(job) => write!(f, "JOB_RECEIVED:{}", job),
            Reply::JobComplete(job) => write!(f, "JOB_COMPLETE:{}", job),
            Reply::Busy(job) => write!(f, "ERROR:BUSY:{}", job),
            Reply::Status { printing: true } => f.write_str("STATUS:PRINTING:READY:False"),
            Reply::Status { printing: false } => f.write_str("STATUS:IDLE:READY:True"),
            Reply::EchoResponse(data) => write!(f, "ECHO_RESPONSE:{}", data),
            Reply::Pong => f.write_str("PONG"),
            Reply::Cancelled(Some(job)) => write!(f, "CANCELLED:{}", job),
            Reply::Cancelled(None) => f.write_str("CANCELLED"),
            Reply::UnknownCommand(command) => write!(f, "ERROR:UNKNOWN_COMMAND:{}", command),
        }
    }
}

#[derive(Debug)]
pub struct Controller {
    state: State,
    heartbeat_counter: u32,
    last_heartbeat: Option<Instant>,
    last_tick: Instant,
    started: Instant,
}

impl Controller {
    pub fn new(now: Instant) -> Controller {
        Controller {
            state: State::Idle,
            heartbeat_counter: 0,
            last_heartbeat: None,
            last_tick: now,
            started: now,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn heartbeat_counter(&self) -> u32 {
        self.heartbeat_counter
    }

    /// Advances the state machine by one event
    pub fn handle(&mut self, event: Event) -> Vec<Reply> {
        match event {
            Event::Received(message, now) => self.handle_message(message, now),
            Event::JobFinished => self.finish_job(),
            Event::Tick(now) => {
                self.tick(now);
                Vec::new()
            }
        }
    }

    fn handle_message(&mut self, message: Message, now: Instant) -> Vec<Reply> {
        debug!("Received {:?} in state {:?}", message, self.state);

        let reply = match message {
            Message::Heartbeat => {
                self.last_heartbeat = Some(now);
                Reply::Heartbeat(self.heartbeat_counter)
            }
            Message::PrintJob(job) => {
                if let State::Printing { job: current } = &self.state {
                    Reply::Busy(current.clone())
                } else {
                    info!("Starting print job {}", job);
                    self.state = State::Printing { job: job.clone() };
                    Reply::JobReceived(job)
                }
            }
            Message::GetStatus => Reply::Status {
                printing: self.is_printing(),
            },
            Message::Echo(data) => Reply::EchoResponse(data),
            Message::Ping => Reply::Pong,
            Message::Cancel => match std::mem::replace(&mut self.state, State::Idle) {
                State::Printing { job } => {
                    info!("Cancelled print job {}", job);
                    Reply::Cancelled(Some(job))
                }
                State::Idle => Reply::Cancelled(None),
            },
            Message::Unknown(command) => Reply::UnknownCommand(command),
        };

        vec![reply]
    }

    fn finish_job(&mut self) -> Vec<Reply> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Printing { job } => {
                info!("Finished print job {}", job);
                vec![Reply::JobComplete(job)]
            }
            State::Idle => Vec::new(),
        }
    }

    fn tick(&mut self, now: Instant) {
        while now.saturating_duration_since(self.last_tick) >= HEARTBEAT_INTERVAL {
            self.last_tick += HEARTBEAT_INTERVAL;
            self.heartbeat_counter = self.heartbeat_counter.wrapping_add(1);

            if self.is_heartbeat_overdue(self.last_tick) {
                let since = self.last_heartbeat.unwrap_or(self.started);

                warn!(
                    "No heartbeat from kiosk for {}s",
                    self.last_tick.saturating_duration_since(since).as_secs()
                );
            }
        }
    }

    fn is_printing(&self) -> bool {
        matches!(self.state, State::Printing { .. })
    }

    /// Returns true when no heartbeat was seen for longer than the timeout at `now`
    pub fn is_heartbeat_overdue(&self, now: Instant) -> bool {
        let since = self.last_heartbeat.unwrap_or(self.started);

        now.saturating_duration_since(since) > HEARTBEAT_TIMEOUT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn received(line: &str) -> Event {
        received_at(line, Instant::now())
    }

    fn received_at(line: &str, now: Instant) -> Event {
        Event::Received(Message::parse(line), now)
    }

    fn replies(controller: &mut Controller, event: Event) -> Vec<String> {
        controller
            .handle(event)
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn it_should_split_lines() {
        let mut buffer = LineBuffer::new();

        assert!(buffer.push(b"PI").is_empty());
        assert_eq!(buffer.push(b"NG\r\n\nECHO:hi\n"), vec!["PING", "ECHO:hi"]);
    }

    #[test]
    fn it_should_complete_overlong_lines() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(&[b'A'; LINE_BUFFER_SIZE + 3]);

        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), LINE_BUFFER_SIZE);
        assert_eq!(buffer.push(b"\n"), vec!["AAA"]);
    }

    #[test]
    fn it_should_parse_messages() {
        assert_eq!(Message::parse("esp32_heartbeat"), Message::Heartbeat);
        assert_eq!(
            Message::parse("PRINT_JOB: job-42 "),
            Message::PrintJob("job-42".into())
        );
        assert_eq!(Message::parse("ECHO:a:b"), Message::Echo("a:b".into()));
        assert_eq!(Message::parse("GET_STATUS"), Message::GetStatus);
        assert_eq!(
            Message::parse("reboot:now"),
            Message::Unknown("REBOOT".into())
        );
    }

    #[test]
    fn it_should_run_a_print_job() {
        let mut controller = Controller::new(Instant::now());

        assert_eq!(
            replies(&mut controller, received("GET_STATUS")),
            vec!["STATUS:IDLE:READY:True"]
        );
        assert_eq!(
            replies(&mut controller, received("PRINT_JOB:17")),
            vec!["JOB_RECEIVED:17"]
        );
        assert_eq!(
            controller.state(),
            &State::Printing { job: "17".into() }
        );
        assert_eq!(
            replies(&mut controller, received("GET_STATUS")),
            vec!["STATUS:PRINTING:READY:False"]
        );
        assert_eq!(
            replies(&mut controller, received("PRINT_JOB:18")),
            vec!["ERROR:BUSY:17"]
        );
        assert_eq!(
            replies(&mut controller, Event::JobFinished),
            vec!["JOB_COMPLETE:17"]
        );
        assert_eq!(controller.state(), &State::Idle);
        assert!(replies(&mut controller, Event::JobFinished).is_empty());
    }

    #[test]
    fn it_should_cancel_a_print_job() {
        let mut controller = Controller::new(Instant::now());

        assert_eq!(replies(&mut controller, received("CANCEL")), vec!["CANCELLED"]);

        controller.handle(received("PRINT_JOB:9"));

        assert_eq!(
            replies(&mut controller, received("cancel")),
            vec!["CANCELLED:9"]
        );
        assert_eq!(controller.state(), &State::Idle);
    }

    #[test]
    fn it_should_answer_simple_commands() {
        let mut controller = Controller::new(Instant::now());

        assert_eq!(replies(&mut controller, received("PING")), vec!["PONG"]);
        assert_eq!(
            replies(&mut controller, received("ECHO:hello")),
            vec!["ECHO_RESPONSE:hello"]
        );
        assert_eq!(
            replies(&mut controller, received("FOO")),
            vec!["ERROR:UNKNOWN_COMMAND:FOO"]
        );
    }

    #[test]
    fn it_should_count_heartbeat_intervals() {
        let start = Instant::now();
        let mut controller = Controller::new(start);

        controller.handle(Event::Tick(start + Duration::from_secs(4)));
        assert_eq!(controller.heartbeat_counter(), 0);

        controller.handle(Event::Tick(start + Duration::from_secs(11)));
        assert_eq!(controller.heartbeat_counter(), 2);

        assert_eq!(
            replies(
                &mut controller,
                received_at("ESP32_HEARTBEAT", start + Duration::from_secs(11))
            ),
            vec!["PICO_HEARTBEAT:2:READY"]
        );
    }

    #[test]
    fn it_should_notice_missing_heartbeats() {
        let start = Instant::now();
        let mut controller = Controller::new(start);

        assert!(!controller.is_heartbeat_overdue(start + Duration::from_secs(15)));
        assert!(controller.is_heartbeat_overdue(start + Duration::from_secs(16)));

        controller.handle(received_at("ESP32_HEARTBEAT", start + Duration::from_secs(16)));

        assert!(!controller.is_heartbeat_overdue(start + Duration::from_secs(20)));
    }

    #[test]
    fn it_should_time_heartbeats_by_their_arrival() {
        let start = Instant::now();
        let mut controller = Controller::new(start);

        controller.handle(Event::Tick(start + Duration::from_secs(20)));
        assert!(controller.is_heartbeat_overdue(start + Duration::from_secs(20)));

        controller.handle(received_at("ESP32_HEARTBEAT", start + Duration::from_secs(20)));

        assert!(!controller.is_heartbeat_overdue(start + Duration::from_secs(30)));
        assert!(!controller.is_heartbeat_overdue(start + Duration::from_secs(35)));
        assert!(controller.is_heartbeat_overdue(start + Duration::from_secs(36)));
    }
}
