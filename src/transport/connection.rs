//! Shared connection handle.
//!
//! A [`ConnectionHandle`] owns one physical connection. Cloning the handle
//! shares it; sessions opened on it hold a clone.
//!
//! # Ownership
//!
//! Callers should close or drop their sessions before closing the
//! connection. This is not enforced: sessions on a closed connection simply
//! stop receiving events.
//!
//! The connection is torn down exactly once, either by [`ConnectionHandle::close`]
//! or when the last clone is dropped.
//!
//! # Example
//!
//! ```no_run
//! use cable_session::{ConnectionHandle, SessionOptions};
//!
//! # async fn example() -> cable_session::Result<()> {
//! let connection = ConnectionHandle::open("http://localhost:3000/cable")?;
//! let session = connection.session(SessionOptions::new());
//! // ...
//! drop(session);
//! connection.close();
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;
use url::Url;

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{Error, Result};
use crate::session::{ChannelSession, SessionOptions};

use super::cable::{CableConnector, CableOptions};
use super::{Connector, Transport};

// ============================================================================
// URL Handling
// ============================================================================

/// Parses a cable URL.
///
/// `http` and `https` are rewritten to `ws` and `wss`, the way Rails
/// clients derive the cable URL from the page URL.
///
/// # Errors
///
/// Returns [`Error::Config`] if the URL is malformed or its scheme is not
/// one of `ws`, `wss`, `http`, `https`.
pub fn cable_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw).map_err(|e| Error::config(format!("Invalid cable URL '{raw}': {e}")))?;

    let scheme = match url.scheme() {
        "ws" | "wss" => return Ok(url),
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(Error::config(format!(
                "Unsupported cable URL scheme '{other}' (expected ws, wss, http or https)"
            )));
        }
    };

    url.set_scheme(scheme)
        .map_err(|()| Error::config(format!("Cannot use scheme '{scheme}' for '{raw}'")))?;

    Ok(url)
}

// ============================================================================
// ConnectionInner
// ============================================================================

/// Shared state of all clones of a handle.
struct ConnectionInner {
    /// The physical connection.
    transport: Arc<dyn Transport>,
    /// Label used in diagnostics.
    url: String,
    /// `false` once torn down.
    open: AtomicBool,
    /// Connection-level diagnostics.
    diagnostics: Diagnostics,
}

impl ConnectionInner {
    /// Tears the transport down if still open.
    fn release(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }

        self.transport.teardown();
        debug!(url = %self.url, "Connection closed");
        self.diagnostics.emit(Diagnostic::ConnectionClosed {
            url: self.url.clone(),
        });
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// ConnectionHandle
// ============================================================================

/// Shared, ref-counted owner of one physical connection.
///
/// # Thread Safety
///
/// `ConnectionHandle` is `Send + Sync` and cheap to clone.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<ConnectionInner>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("url", &self.inner.url)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    /// Opens an ActionCable connection with default [`CableOptions`].
    ///
    /// Must be called inside a Tokio runtime. The handshake completes in the
    /// background; sessions may subscribe right away.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the URL is invalid or no runtime is running
    /// - [`Error::WebSocket`] if no handshake request can be built
    pub fn open(url: &str) -> Result<Self> {
        Self::builder().url(url).open()
    }

    /// Opens a connection through `connector`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid URL, or whatever the
    /// connector returns.
    pub fn open_with(connector: &dyn Connector, url: &str) -> Result<Self> {
        let url = cable_url(url)?;
        let transport = connector.connect(&url)?;
        Ok(Self::new(transport, url.to_string(), Diagnostics::disabled()))
    }

    /// Wraps an existing transport.
    #[must_use]
    pub fn from_transport(transport: Arc<dyn Transport>) -> Self {
        Self::new(transport, "transport".to_string(), Diagnostics::disabled())
    }

    /// Creates a [`ConnectionBuilder`].
    #[inline]
    #[must_use]
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    fn new(transport: Arc<dyn Transport>, url: String, diagnostics: Diagnostics) -> Self {
        debug!(url = %url, "Connection created");
        diagnostics.emit(Diagnostic::ConnectionCreated { url: url.clone() });

        Self {
            inner: Arc::new(ConnectionInner {
                transport,
                url,
                open: AtomicBool::new(true),
                diagnostics,
            }),
        }
    }

    /// Tears the connection down.
    ///
    /// Idempotent: only the first call (from any clone) has an effect.
    pub fn close(&self) {
        self.inner.release();
    }

    /// Returns `true` until the connection is closed.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Returns the URL (or label) of the connection.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Opens a new session on this connection.
    #[inline]
    #[must_use]
    pub fn session(&self, options: SessionOptions) -> ChannelSession {
        ChannelSession::open(self, options)
    }

    /// Returns the underlying transport.
    #[inline]
    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }
}

// ============================================================================
// ConnectionBuilder
// ============================================================================

/// Builder for [`ConnectionHandle`].
///
/// ```no_run
/// use cable_session::{CableOptions, ConnectionHandle};
///
/// # fn example() -> cable_session::Result<()> {
/// let connection = ConnectionHandle::builder()
///     .url("ws://localhost:3000/cable")
///     .cable_options(CableOptions::new().with_origin("http://localhost:3000"))
///     .verbose(true)
///     .open()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct ConnectionBuilder {
    /// Cable URL.
    url: Option<String>,
    /// Custom connector, cable transport when unset.
    connector: Option<Arc<dyn Connector>>,
    /// Options for the cable transport.
    cable_options: CableOptions,
    /// Connection diagnostics.
    diagnostics: Diagnostics,
}

impl fmt::Debug for ConnectionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionBuilder")
            .field("url", &self.url)
            .field("custom_connector", &self.connector.is_some())
            .field("cable_options", &self.cable_options)
            .field("diagnostics", &self.diagnostics)
            .finish()
    }
}

impl ConnectionBuilder {
    /// Creates a builder with no URL.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cable URL.
    #[inline]
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Uses a custom connector instead of the cable transport.
    #[inline]
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Sets options for the cable transport.
    #[inline]
    #[must_use]
    pub fn cable_options(mut self, options: CableOptions) -> Self {
        self.cable_options = options;
        self
    }

    /// Routes connection diagnostics to `tracing` when `true`.
    #[inline]
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.diagnostics = if verbose {
            Diagnostics::tracing()
        } else {
            Diagnostics::disabled()
        };
        self
    }

    /// Sets the diagnostics hook.
    #[inline]
    #[must_use]
    pub fn diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Opens the connection.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no URL is set or it is invalid
    /// - Any error from the connector
    pub fn open(self) -> Result<ConnectionHandle> {
        let raw = self.url.ok_or_else(|| {
            Error::config(
                "Cable URL is required. Use .url() to set it.\n\
                 Example: ConnectionHandle::builder().url(\"ws://localhost:3000/cable\")",
            )
        })?;
        let url = cable_url(&raw)?;

        let transport = match self.connector {
            Some(connector) => connector.connect(&url)?,
            None => CableConnector::new(self.cable_options).connect(&url)?,
        };

        Ok(ConnectionHandle::new(
            transport,
            url.to_string(),
            self.diagnostics,
        ))
    }
}

// ============================================================================
// Tests
// ============================================================================
