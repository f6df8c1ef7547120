//! Runs the print controller over a serial port

use std::ffi::OsStr;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use log::{debug, trace};
use serialport::prelude::*;

use crate::controller::{Controller, Event, LineBuffer, Message, Reply, State};
use crate::error::SerialError;

/// The baud rate the kiosk talks at
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// How long a simulated print job takes
pub const DEFAULT_PRINT_DURATION: Duration = Duration::from_secs(5);

/// Opens the given `port` with the 8N1 settings the kiosk expects
pub fn open<S: AsRef<OsStr>>(
    port: S,
    baud_rate: u32,
) -> Result<Box<dyn serialport::SerialPort>, SerialError> {
    let settings = SerialPortSettings {
        baud_rate,
        data_bits: DataBits::Eight,
        flow_control: FlowControl::None,
        parity: Parity::None,
        stop_bits: StopBits::One,
        timeout: Duration::from_millis(100),
    };

    debug!("Opening serial port {:?} at {} baud", port.as_ref(), baud_rate);

    serialport::open_with_settings(port.as_ref(), &settings).map_err(|err| {
        SerialError::OpenError(port.as_ref().to_string_lossy().into_owned(), err)
    })
}

/// A controller attached to a byte stream
pub struct Session<P> {
    port: P,
    lines: LineBuffer,
    controller: Controller,
    print_duration: Duration,
    job_started: Option<Instant>,
}

impl<P: Read + Write> Session<P> {
    pub fn new(port: P, print_duration: Duration, now: Instant) -> Session<P> {
        Session {
            port,
            lines: LineBuffer::new(),
            controller: Controller::new(now),
            print_duration,
            job_started: None,
        }
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Consumes `self` and returns the inner port
    pub fn into_port(self) -> P {
        self.port
    }

    /// Reads whatever is available, then advances timers to `now`
    pub fn poll(&mut self, now: Instant) -> Result<(), SerialError> {
        let mut buf = [0u8; 64];

        let read = match self.port.read(&mut buf) {
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::TimedOut => 0,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => 0,
            Err(err) => return Err(err.into()),
        };

        for line in self.lines.push(&buf[..read]) {
            trace!("Received line {:?}", line);

            let replies = self
                .controller
                .handle(Event::Received(Message::parse(&line), now));

            if replies.iter().any(|reply| matches!(reply, Reply::JobReceived(_))) {
                self.job_started = Some(now);
            }

            self.send(&replies)?;
        }

        if !matches!(self.controller.state(), State::Printing { .. }) {
            self.job_started = None;
        }

        if let Some(started) = self.job_started {
            if now.saturating_duration_since(started) >= self.print_duration {
                let replies = self.controller.handle(Event::JobFinished);
                self.send(&replies)?;
                self.job_started = None;
            }
        }

        self.controller.handle(Event::Tick(now));

        Ok(())
    }

    fn send(&mut self, replies: &[Reply]) -> Result<(), SerialError> {
        for reply in replies {
            debug!("Sending {}", reply);

            writeln!(self.port, "{}", reply)?;
        }

        self.port.flush()?;

        Ok(())
    }
}

/// Serves the kiosk on `port` until an I/O error occurs
pub fn serve<P: Read + Write>(port: P, print_duration: Duration) -> Result<(), SerialError> {
    let mut session = Session::new(port, print_duration, Instant::now());

    loop {
        session.poll(Instant::now())?;
    }
}
