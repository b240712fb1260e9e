//! The process-wide owner of everything connections share.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::certificate::Certificate;
use crate::crypto::SigningKey;
use crate::handshake::Connection;
use crate::record::RecordLayer;
use crate::session::SessionStore;
use crate::ticket::TicketKey;
use crate::{Config, Error};

/// Shared state of many connections: configuration, the session store, the
/// local identity and the keys for tickets and cookies.
///
/// Cloning is cheap and every clone refers to the same store. Dropping the
/// last clone tears everything down, wiping the cached master secrets.
///
/// ```no_run
/// # use reprise::{Config, Context};
/// # fn main() -> Result<(), reprise::Error> {
/// let cert = reprise::certificate::generate_self_signed_certificate()?;
/// let server = Context::new(Config::default(), Some(cert))?;
/// let client = Context::new(Config::default(), None)?;
/// # let _ = (server, client);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

pub(crate) struct Identity {
    pub certificate: Vec<u8>,
    pub key: Mutex<Box<dyn SigningKey>>,
}

struct Inner {
    config: Config,
    store: Option<SessionStore>,
    identity: Option<Identity>,
    ticket_key: TicketKey,
    cookie_secret: [u8; 32],
}

impl Context {
    /// Set up a context.
    ///
    /// Loads the private key of `certificate` through the crypto provider,
    /// allocates the session store and generates the ticket and cookie keys.
    /// A context without certificate can only connect.
    pub fn new(config: Config, certificate: Option<Certificate>) -> Result<Context, Error> {
        let provider = config.crypto_provider();

        let identity = match certificate {
            Some(cert) => {
                let key = provider
                    .key_provider
                    .load_private_key(&cert.private_key)
                    .map_err(|e| Error::CertificateError(format!("Failed to load key: {}", e)))?;
                Some(Identity {
                    certificate: cert.certificate,
                    key: Mutex::new(key),
                })
            }
            None => None,
        };

        let store = if config.session_cache() {
            Some(SessionStore::new(
                config.session_cache_rows(),
                config.session_cache_columns(),
                config.client_session_index(),
            )?)
        } else {
            None
        };

        let ticket_key = TicketKey::generate(provider)?;

        let mut cookie_secret = [0u8; 32];
        provider
            .secure_random
            .fill(&mut cookie_secret)
            .map_err(Error::CryptoError)?;

        debug!(
            "New context, session cache {}",
            match &store {
                Some(s) => format!("{}x{}", s.rows(), s.columns()),
                None => "disabled".to_string(),
            }
        );

        Ok(Context {
            inner: Arc::new(Inner {
                config,
                store,
                identity,
                ticket_key,
                cookie_secret,
            }),
        })
    }

    /// Start a connecting (client) handshake over `record`.
    pub fn connect(&self, record: impl RecordLayer + 'static) -> Connection {
        Connection::new_client(self.clone(), Box::new(record))
    }

    /// Start an accepting (server) handshake over `record`.
    ///
    /// Fails with [`Error::ConfigError`] if the context has no certificate.
    pub fn accept(&self, record: impl RecordLayer + 'static) -> Result<Connection, Error> {
        if self.inner.identity.is_none() {
            return Err(Error::ConfigError(
                "Accepting connections requires a certificate".into(),
            ));
        }
        Ok(Connection::new_server(self.clone(), Box::new(record)))
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The session store, unless the session cache is disabled.
    pub fn session_store(&self) -> Option<&SessionStore> {
        self.inner.store.as_ref()
    }

    /// Save the whole session store.
    ///
    /// The snapshot records the store dimensions and the session record
    /// size, and can only be imported by a context configured the same way.
    pub fn export_store(&self) -> Result<Vec<u8>, Error> {
        self.session_store().ok_or(Error::CacheDisabled)?.export()
    }

    /// Replace the whole session store with a snapshot from
    /// [`export_store`](Self::export_store).
    pub fn import_store(&self, snapshot: &[u8]) -> Result<(), Error> {
        self.session_store()
            .ok_or(Error::CacheDisabled)?
            .import(snapshot)
    }

    pub(crate) fn identity(&self) -> Option<&Identity> {
        self.inner.identity.as_ref()
    }

    pub(crate) fn ticket_key(&self) -> &TicketKey {
        &self.inner.ticket_key
    }

    pub(crate) fn cookie_secret(&self) -> &[u8; 32] {
        &self.inner.cookie_secret
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.inner.config)
            .field("store", &self.inner.store)
            .field("has_identity", &self.inner.identity.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        zeroize::Zeroize::zeroize(&mut self.cookie_secret);
    }
}
