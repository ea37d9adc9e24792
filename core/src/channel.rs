//! The byte channel a session runs over: plain transport or TLS stream
//!
//! The raw transport connection is wrapped in [`Metered`] before anything
//! else touches it, so the session can tell whether an interrupted poll
//! already consumed bytes from the wire (TLS records included).

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_io_async::{ErrorType, Read, Write};
use hal_abstractions::{Connection, TlsEngine, Transport, TransportError};

/// Running count of bytes read from the transport
pub struct ReadMeter {
    bytes: Mutex<CriticalSectionRawMutex, Cell<u32>>,
}

impl ReadMeter {
    pub const fn new() -> Self {
        Self {
            bytes: Mutex::new(Cell::new(0)),
        }
    }

    /// Bytes read so far, wrapping
    pub fn count(&self) -> u32 {
        self.bytes.lock(|b| b.get())
    }

    pub(crate) fn record(&self, n: usize) {
        self.bytes.lock(|b| b.set(b.get().wrapping_add(n as u32)));
    }
}

impl Default for ReadMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport connection that reports every byte it reads to a [`ReadMeter`]
pub struct Metered<'a, C> {
    io: C,
    meter: &'a ReadMeter,
}

impl<'a, C: Connection> Metered<'a, C> {
    pub fn new(io: C, meter: &'a ReadMeter) -> Self {
        Self { io, meter }
    }
}

impl<C: Connection> ErrorType for Metered<'_, C> {
    type Error = TransportError;
}

impl<C: Connection> Read for Metered<'_, C> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let n = self.io.read(buf).await?;
        self.meter.record(n);
        Ok(n)
    }
}

impl<C: Connection> Write for Metered<'_, C> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.io.write(buf).await
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.io.flush().await
    }
}

impl<C: Connection> Connection for Metered<'_, C> {
    fn close(&mut self) {
        self.io.close();
    }
}

pub enum SessionChannel<P, S> {
    Plain(P),
    Secure(S),
}

/// Raw connection type of transport `T`, metered
pub type RawOf<'a, T> = Metered<'a, <T as Transport>::Connection>;

/// Channel type produced by transport `T` and TLS engine `E`
pub type ChannelOf<'a, T, E> = SessionChannel<RawOf<'a, T>, <E as TlsEngine>::Stream<RawOf<'a, T>>>;

impl<P: Connection, S: Connection> ErrorType for SessionChannel<P, S> {
    type Error = TransportError;
}

impl<P: Connection, S: Connection> Read for SessionChannel<P, S> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        match self {
            Self::Plain(io) => io.read(buf).await,
            Self::Secure(io) => io.read(buf).await,
        }
    }
}

impl<P: Connection, S: Connection> Write for SessionChannel<P, S> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        match self {
            Self::Plain(io) => io.write(buf).await,
            Self::Secure(io) => io.write(buf).await,
        }
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        match self {
            Self::Plain(io) => io.flush().await,
            Self::Secure(io) => io.flush().await,
        }
    }
}

impl<P: Connection, S: Connection> Connection for SessionChannel<P, S> {
    fn close(&mut self) {
        match self {
            Self::Plain(io) => io.close(),
            Self::Secure(io) => io.close(),
        }
    }
}
