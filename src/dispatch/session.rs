//! Session operations abstraction
//!
//! Both routes a connection can take, plain TCP and TLS, implement
//! `SessionOps`. The route is picked once when the connection is opened;
//! afterwards callers only see the trait.

use super::{Error, Result};
use crate::net::Transport;
use crate::tls::TlsSession;

/// Which route a connection uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Plain,
    Tls,
}

/// Session operations trait
pub trait SessionOps {
    /// Route this session implements
    fn route(&self) -> Route;

    /// Read once. `Ok(0)` means no data yet; an error means the connection
    /// is broken.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `buf`, returning the number of bytes written
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Close the session; repeated calls are no-ops
    fn close(&mut self) -> Result<()>;
}

impl<S: Transport> SessionOps for TlsSession<S> {
    fn route(&self) -> Route {
        Route::Tls
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.receive(buf).map_err(Error::from)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.send(buf).map_err(Error::from)
    }

    fn close(&mut self) -> Result<()> {
        self.disconnect();
        Ok(())
    }
}
