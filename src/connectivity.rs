use anyhow::{bail, Context, Result};
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::io;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{info, warn};
use x509_parser::prelude::{FromDer, X509Certificate, X509Name};

use crate::error::ProbeError;
use crate::models::{ConnectivityOutcome, PeerCertificate};

/// One validated TLS handshake against `host:port`.
#[allow(async_fn_in_trait)]
pub trait TlsHandshake {
    async fn handshake(&mut self, host: &str, port: u16) -> ConnectivityOutcome;
}

/// Real prober: platform trust store, rustls on the ring provider.
pub struct TlsProber {
    provider: Arc<CryptoProvider>,
    verifier: Arc<WebPkiServerVerifier>,
    dns_resolver: TokioResolver,
    connect_timeout: Duration,
}

impl TlsProber {
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let native = rustls_native_certs::load_native_certs();
        for err in &native.errors {
            warn!("Skipping unreadable platform certificate: {}", err);
        }
        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(native.certs);
        if added == 0 {
            bail!("Platform trust store has no usable root certificates");
        }
        info!("Loaded {} platform root certificates ({} ignored)", added, ignored);

        Self::with_roots(roots, connect_timeout)
    }

    /// Trusts exactly `roots` instead of the platform store.
    pub fn with_roots(roots: RootCertStore, connect_timeout: Duration) -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
            .context("Failed to build certificate verifier")?;

        let dns_resolver = TokioResolver::builder_with_config(
            ResolverConfig::cloudflare(),
            TokioConnectionProvider::default(),
        ).build();

        Ok(Self {
            provider,
            verifier,
            dns_resolver,
            connect_timeout,
        })
    }

    async fn resolve(&self, address: &str) -> Result<IpAddr, String> {
        if let Ok(ip) = address.parse::<IpAddr>() { return Ok(ip); }
        match self.dns_resolver.lookup_ip(address).await {
            Ok(lookup) => lookup.iter().next().ok_or_else(|| "No IP Address Found".into()),
            Err(e) => Err(format!("DNS resolution failed: {}", e)),
        }
    }

    fn client_config(&self, verifier: Arc<RecordingVerifier>) -> Result<Arc<ClientConfig>, rustls::Error> {
        let config = ClientConfig::builder_with_provider(self.provider.clone())
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();
        Ok(Arc::new(config))
    }
}

impl TlsHandshake for TlsProber {
    async fn handshake(&mut self, host: &str, port: u16) -> ConnectivityOutcome {
        let recorder = Arc::new(RecordingVerifier::new(self.verifier.clone()));
        let config = self
            .client_config(recorder.clone())
            .map_err(|e| ProbeError::OtherConnection(e.to_string()))?;
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| ProbeError::OtherConnection(format!("invalid server name {}: {}", host, e)))?;

        let attempt = async {
            let ip = self.resolve(host).await.map_err(ProbeError::OtherConnection)?;
            let tcp = TcpStream::connect((ip, port))
                .await
                .map_err(|e| classify_io_error(&e, None))?;
            TlsConnector::from(config)
                .connect(server_name, tcp)
                .await
                .map_err(|e| classify_io_error(&e, recorder.captured_names()))
        };

        match tokio::time::timeout(self.connect_timeout, attempt).await {
            Err(_) => Err(ProbeError::ConnectionTimeout),
            Ok(Err(e)) => Err(e),
            Ok(Ok(_session)) => match recorder.captured() {
                Some(der) => common_names(&der).map_err(ProbeError::OtherConnection),
                None => Err(ProbeError::OtherConnection("server presented no certificate".into())),
            },
        }
    }
}

/// Maps a connect or handshake failure onto the probe taxonomy.
fn classify_io_error(err: &io::Error, certificate: Option<PeerCertificate>) -> ProbeError {
    if err.kind() == io::ErrorKind::TimedOut {
        return ProbeError::ConnectionTimeout;
    }
    match err.get_ref().and_then(|inner| inner.downcast_ref::<rustls::Error>()) {
        Some(rustls::Error::InvalidCertificate(_)) => ProbeError::CertificateVerification { certificate },
        _ => ProbeError::OtherConnection(err.to_string()),
    }
}

fn common_names(der: &CertificateDer<'_>) -> Result<PeerCertificate, String> {
    let (_, cert) = X509Certificate::from_der(der.as_ref())
        .map_err(|e| format!("unparseable peer certificate: {}", e))?;
    Ok(PeerCertificate {
        subject: first_common_name(cert.subject()),
        issuer: first_common_name(cert.issuer()),
    })
}

fn first_common_name(name: &X509Name<'_>) -> String {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Delegates to the webpki verifier but keeps the end-entity certificate,
/// so its names are still known when validation rejects it.
#[derive(Debug)]
struct RecordingVerifier {
    inner: Arc<WebPkiServerVerifier>,
    end_entity: Mutex<Option<CertificateDer<'static>>>,
}

impl RecordingVerifier {
    fn new(inner: Arc<WebPkiServerVerifier>) -> Self {
        Self {
            inner,
            end_entity: Mutex::new(None),
        }
    }

    fn captured(&self) -> Option<CertificateDer<'static>> {
        self.end_entity.lock().ok().and_then(|slot| slot.clone())
    }

    fn captured_names(&self) -> Option<PeerCertificate> {
        self.captured().and_then(|der| common_names(&der).ok())
    }
}

impl ServerCertVerifier for RecordingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if let Ok(mut slot) = self.end_entity.lock() {
            *slot = Some(end_entity.clone().into_owned());
        }
        self.inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
