//! Plain TCP route

use super::session::{Route, SessionOps};
use super::{Error, Result};
use crate::net::{self, ServerEndpoint, Timeouts, Transport};
use std::io;
use std::net::TcpStream;
use tracing::{debug, trace};

/// Unencrypted session over a transport
#[derive(Debug)]
pub struct PlainSession<S: Transport> {
    stream: Option<S>,
}

impl PlainSession<TcpStream> {
    /// Open a TCP connection to `endpoint`
    pub fn connect(endpoint: &ServerEndpoint<'_>, timeouts: &Timeouts) -> Result<Self> {
        Ok(PlainSession::new(net::connect(endpoint, timeouts)?))
    }
}

impl<S: Transport> PlainSession<S> {
    /// Wrap an already connected transport
    pub fn new(stream: S) -> Self {
        PlainSession {
            stream: Some(stream),
        }
    }

    fn stream_mut(&mut self) -> Result<&mut S> {
        self.stream.as_mut().ok_or(Error::Closed)
    }
}

impl<S: Transport> SessionOps for PlainSession<S> {
    fn route(&self) -> Route {
        Route::Plain
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let stream = self.stream_mut()?;
        if buf.is_empty() {
            return Ok(0);
        }

        match stream.read(buf) {
            Ok(0) => Err(Error::ConnectionClosed),
            Ok(n) => Ok(n),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                trace!("no data before receive timeout");
                Ok(0)
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let stream = self.stream_mut()?;
        stream.write_all(buf)?;
        Ok(buf.len())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream.close()?;
            debug!("plain session closed");
        }
        Ok(())
    }
}

impl<S: Transport> Drop for PlainSession<S> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
