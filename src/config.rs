use std::sync::Arc;
use std::time::Duration;

use crate::certificate::CertVerifier;
use crate::crypto::CryptoProvider;
use crate::time::{Clock, SystemClock};
use crate::types::{CipherSuite, ProtocolVersion};
use crate::Error;

/// Handshake and session cache configuration.
#[derive(Clone)]
pub struct Config {
    datagram: bool,
    cipher_suites: Vec<CipherSuite>,
    session_cache: bool,
    session_cache_rows: usize,
    session_cache_columns: usize,
    client_session_index: bool,
    session_timeout: Duration,
    session_tickets: bool,
    require_client_certificate: bool,
    request_certificate_status: bool,
    stapled_certificate_status: Option<Vec<u8>>,
    keep_peer_certificates: bool,
    cert_verifier: Option<Arc<dyn CertVerifier>>,
    crypto_provider: CryptoProvider,
    clock: Arc<dyn Clock>,
    rng_seed: Option<u64>,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            datagram: false,
            cipher_suites: CipherSuite::supported().to_vec(),
            session_cache: true,
            session_cache_rows: 11,
            session_cache_columns: 3,
            client_session_index: true,
            session_timeout: Duration::from_secs(500),
            session_tickets: true,
            require_client_certificate: false,
            request_certificate_status: false,
            stapled_certificate_status: None,
            keep_peer_certificates: true,
            cert_verifier: None,
            crypto_provider: None,
            clock: None,
            rng_seed: None,
        }
    }

    /// Datagram mode (DTLS 1.2 with the cookie exchange).
    #[inline(always)]
    pub fn datagram(&self) -> bool {
        self.datagram
    }

    /// The protocol version implied by [`datagram`](Self::datagram).
    #[inline(always)]
    pub fn protocol_version(&self) -> ProtocolVersion {
        if self.datagram {
            ProtocolVersion::DTLS1_2
        } else {
            ProtocolVersion::TLS1_2
        }
    }

    /// Cipher suites in preference order.
    ///
    /// Offered by the client, and the subset the server accepts.
    #[inline(always)]
    pub fn cipher_suites(&self) -> &[CipherSuite] {
        &self.cipher_suites
    }

    /// Whether full handshakes publish sessions and resumption is attempted.
    #[inline(always)]
    pub fn session_cache(&self) -> bool {
        self.session_cache
    }

    /// Rows of the session store.
    #[inline(always)]
    pub fn session_cache_rows(&self) -> usize {
        self.session_cache_rows
    }

    /// Slots per row of the session store.
    #[inline(always)]
    pub fn session_cache_columns(&self) -> usize {
        self.session_cache_columns
    }

    /// Whether the store keeps the peer index used by
    /// [`Connection::remember_server`](crate::Connection::remember_server).
    #[inline(always)]
    pub fn client_session_index(&self) -> bool {
        self.client_session_index
    }

    /// Lifetime of new sessions unless overridden per connection.
    #[inline(always)]
    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    /// Whether clients offer and servers issue session tickets.
    #[inline(always)]
    pub fn session_tickets(&self) -> bool {
        self.session_tickets
    }

    /// For a server, require a client certificate.
    ///
    /// This will cause the server to send a CertificateRequest message.
    /// Makes the server fail if the client does not send a certificate.
    #[inline(always)]
    pub fn require_client_certificate(&self) -> bool {
        self.require_client_certificate
    }

    /// For a client, ask the server for a stapled certificate status.
    #[inline(always)]
    pub fn request_certificate_status(&self) -> bool {
        self.request_certificate_status
    }

    /// For a server, the status response to staple when asked.
    #[inline(always)]
    pub fn stapled_certificate_status(&self) -> Option<&[u8]> {
        self.stapled_certificate_status.as_deref()
    }

    /// Whether cached sessions keep a copy of the peer certificates.
    #[inline(always)]
    pub fn keep_peer_certificates(&self) -> bool {
        self.keep_peer_certificates
    }

    /// Peer certificate validation.
    #[inline(always)]
    pub fn cert_verifier(&self) -> Option<&dyn CertVerifier> {
        self.cert_verifier.as_deref()
    }

    /// Cryptographic provider.
    #[inline(always)]
    pub fn crypto_provider(&self) -> &CryptoProvider {
        &self.crypto_provider
    }

    /// Time source for session validity.
    #[inline(always)]
    pub fn clock(&self) -> &dyn Clock {
        &*self.clock
    }

    /// Seed for hello randoms and session ids.
    #[inline(always)]
    pub fn rng_seed(&self) -> Option<u64> {
        self.rng_seed
    }
}

/// Builder for [`Config`].
pub struct ConfigBuilder {
    datagram: bool,
    cipher_suites: Vec<CipherSuite>,
    session_cache: bool,
    session_cache_rows: usize,
    session_cache_columns: usize,
    client_session_index: bool,
    session_timeout: Duration,
    session_tickets: bool,
    require_client_certificate: bool,
    request_certificate_status: bool,
    stapled_certificate_status: Option<Vec<u8>>,
    keep_peer_certificates: bool,
    cert_verifier: Option<Arc<dyn CertVerifier>>,
    crypto_provider: Option<CryptoProvider>,
    clock: Option<Arc<dyn Clock>>,
    rng_seed: Option<u64>,
}

impl ConfigBuilder {
    /// Run DTLS 1.2 with the stateless cookie exchange instead of TLS 1.2.
    ///
    /// Defaults to false.
    pub fn datagram(mut self, datagram: bool) -> Self {
        self.datagram = datagram;
        self
    }

    /// Set the cipher suites in preference order.
    ///
    /// Unsupported suites are ignored. Defaults to every supported suite.
    pub fn cipher_suites(mut self, suites: &[CipherSuite]) -> Self {
        self.cipher_suites = suites.iter().copied().filter(|s| s.is_supported()).collect();
        self
    }

    /// Enable or disable the session cache.
    ///
    /// Defaults to true.
    pub fn session_cache(mut self, enabled: bool) -> Self {
        self.session_cache = enabled;
        self
    }

    /// Set the session store dimensions.
    ///
    /// Defaults to 11 rows of 3 slots.
    pub fn session_cache_size(mut self, rows: usize, columns: usize) -> Self {
        self.session_cache_rows = rows;
        self.session_cache_columns = columns;
        self
    }

    /// Maintain the peer index for client side lookups.
    ///
    /// Defaults to true.
    pub fn client_session_index(mut self, enabled: bool) -> Self {
        self.client_session_index = enabled;
        self
    }

    /// Set the default session lifetime.
    ///
    /// Whole seconds only. Defaults to 500 seconds.
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Offer (client) and issue (server) session tickets.
    ///
    /// Defaults to true.
    pub fn session_tickets(mut self, enabled: bool) -> Self {
        self.session_tickets = enabled;
        self
    }

    /// Set whether to require a client certificate (for servers).
    ///
    /// Defaults to false.
    pub fn require_client_certificate(mut self, require: bool) -> Self {
        self.require_client_certificate = require;
        self
    }

    /// Ask the server for a stapled certificate status (for clients).
    ///
    /// Defaults to false.
    pub fn request_certificate_status(mut self, request: bool) -> Self {
        self.request_certificate_status = request;
        self
    }

    /// Status response the server staples when the client asks.
    pub fn stapled_certificate_status(mut self, response: Vec<u8>) -> Self {
        self.stapled_certificate_status = Some(response);
        self
    }

    /// Copy the peer certificate chain into cached sessions.
    ///
    /// Only has an effect with the `session-certs` feature. Defaults to true.
    pub fn keep_peer_certificates(mut self, keep: bool) -> Self {
        self.keep_peer_certificates = keep;
        self
    }

    /// Set the peer certificate validation.
    ///
    /// Without one, any chain is accepted.
    pub fn cert_verifier(mut self, verifier: Arc<dyn CertVerifier>) -> Self {
        self.cert_verifier = Some(verifier);
        self
    }

    /// Set a custom crypto provider.
    ///
    /// If not set, the default installed via
    /// [`CryptoProvider::install_default`] is used, and failing that the
    /// RustCrypto provider.
    pub fn with_crypto_provider(mut self, provider: CryptoProvider) -> Self {
        self.crypto_provider = Some(provider);
        self
    }

    /// Set the time source. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Make hello randoms and session ids deterministic.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Build the configuration.
    ///
    /// Returns `Error::ConfigError` for an empty store, store dimensions
    /// above `u16::MAX`, no usable cipher suite or a zero session timeout.
    pub fn build(self) -> Result<Config, Error> {
        let max = u16::MAX as usize;
        let (rows, columns) = (self.session_cache_rows, self.session_cache_columns);
        if rows == 0 || columns == 0 || rows > max || columns > max {
            return Err(Error::ConfigError(format!(
                "Session cache size out of range: {}x{}",
                rows, columns
            )));
        }

        if self.cipher_suites.is_empty() {
            return Err(Error::ConfigError("No supported cipher suite".into()));
        }

        if self.session_timeout.as_secs() == 0 {
            return Err(Error::ConfigError("Session timeout must be at least 1s".into()));
        }

        if self.session_timeout.as_secs() > u32::MAX as u64 {
            return Err(Error::ConfigError(format!(
                "Session timeout too long: {:?}",
                self.session_timeout
            )));
        }

        let crypto_provider = self
            .crypto_provider
            .unwrap_or_else(CryptoProvider::default_or_rust_crypto);

        if crypto_provider.kx_groups.is_empty() {
            return Err(Error::ConfigError(
                "Crypto provider has no key exchange group".into(),
            ));
        }

        Ok(Config {
            datagram: self.datagram,
            cipher_suites: self.cipher_suites,
            session_cache: self.session_cache,
            session_cache_rows: rows,
            session_cache_columns: columns,
            client_session_index: self.client_session_index,
            session_timeout: self.session_timeout,
            session_tickets: self.session_tickets,
            require_client_certificate: self.require_client_certificate,
            request_certificate_status: self.request_certificate_status,
            stapled_certificate_status: self.stapled_certificate_status,
            keep_peer_certificates: self.keep_peer_certificates,
            cert_verifier: self.cert_verifier,
            crypto_provider,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            rng_seed: self.rng_seed,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder()
            .build()
            .expect("Default config should always validate")
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("datagram", &self.datagram)
            .field("cipher_suites", &self.cipher_suites)
            .field("session_cache", &self.session_cache)
            .field("session_cache_rows", &self.session_cache_rows)
            .field("session_cache_columns", &self.session_cache_columns)
            .field("session_timeout", &self.session_timeout)
            .field("session_tickets", &self.session_tickets)
            .field("require_client_certificate", &self.require_client_certificate)
            .finish_non_exhaustive()
    }
}
