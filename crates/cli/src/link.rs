//! Broker link
//!
//! A [`Link`] is one connection attempt to the broker. It is single-use: the
//! supervisor drops it on the first [`LinkEvent::Lost`] and opens a fresh one,
//! so the client's in-memory retransmission state never survives a
//! disconnect and the outbox stays the only source of redelivery.

use crate::config::{Config, ConfigError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use journal::OutgoingMessage;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Outgoing,
    Packet, QoS, TlsConfiguration, Transport,
};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Topic of the last will registered with the broker
pub const WILL_TOPIC: &str = "signalk/will";
/// Payload of the last will
pub const WILL_PAYLOAD: &str = "signalk disconnected";

/// How long a graceful close waits for the DISCONNECT to go out
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Connection-level events reported by a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Broker accepted the session
    Connected,
    /// Broker acknowledged the message with this outbox sequence id
    Acked(u64),
    /// Connection is gone; the link must be discarded
    Lost(String),
}

/// One broker connection
#[async_trait]
pub trait Link: Send {
    /// Submit a message for QoS 1 delivery
    ///
    /// Returns `Ok(false)` when the client queue is full; the caller retries
    /// later with the same message.
    fn try_submit(&mut self, seq: u64, message: &OutgoingMessage) -> Result<bool>;

    /// Wait for the next connection event
    ///
    /// Must be cancel safe; it is polled inside `select!`.
    async fn next_event(&mut self) -> LinkEvent;

    /// Tear the connection down, sending DISCONNECT first when `graceful`
    async fn close(&mut self, graceful: bool);
}

/// Factory for broker links
pub trait Connector: Send + Sync + 'static {
    type Link: Link + 'static;

    /// Start a new connection attempt; completion is reported as [`LinkEvent::Connected`]
    fn open(&self) -> Result<Self::Link>;
}

/// Transport security chosen for the broker URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    Plain,
    /// TLS, server certificate checked against the platform roots
    Verified,
    /// TLS, any server certificate accepted
    AcceptAny,
}

/// rumqttc-backed connector
pub struct MqttConnector {
    options: MqttOptions,
    capacity: usize,
    tls_mode: TlsMode,
}

impl MqttConnector {
    /// Build connection options: client id, credentials, last will and TLS policy
    pub fn new(config: &Config, self_id: &str) -> Result<Self> {
        let url = config.broker_url()?;
        let capacity = config.inflight_capacity;
        let inflight = u16::try_from(capacity).map_err(|_| ConfigError::OutOfRange {
            field: "inflight_capacity",
            reason: "must be between 1 and 65535".to_string(),
        })?;

        let mut options = MqttOptions::new(self_id, url.host.clone(), url.port);
        options
            .set_keep_alive(Duration::from_secs(config.keep_alive_secs))
            .set_clean_session(true)
            .set_inflight(inflight)
            .set_last_will(LastWill::new(WILL_TOPIC, WILL_PAYLOAD, QoS::AtMostOnce, false));

        if let Some(username) = config.username() {
            options.set_credentials(username, config.password.clone().unwrap_or_default());
        }

        let tls_mode = match (url.tls, config.reject_unauthorized) {
            (false, _) => TlsMode::Plain,
            (true, true) => TlsMode::Verified,
            (true, false) => TlsMode::AcceptAny,
        };

        if tls_mode != TlsMode::Plain {
            let tls = tls_configuration(tls_mode == TlsMode::Verified)?;
            options.set_transport(Transport::tls_with_config(tls));
        }

        debug!("Broker {}:{} ({:?})", url.host, url.port, tls_mode);

        Ok(Self {
            options,
            capacity,
            tls_mode,
        })
    }

    pub fn tls_mode(&self) -> TlsMode {
        self.tls_mode
    }
}

impl Connector for MqttConnector {
    type Link = MqttLink;

    fn open(&self) -> Result<MqttLink> {
        let (client, eventloop) = AsyncClient::new(self.options.clone(), self.capacity);
        let (tx, events) = mpsc::unbounded_channel();
        let unassigned = Arc::new(Mutex::new(VecDeque::new()));
        let driver = tokio::spawn(drive(eventloop, unassigned.clone(), tx));

        Ok(MqttLink {
            client,
            events,
            unassigned,
            driver,
        })
    }
}

/// Live rumqttc connection
pub struct MqttLink {
    client: AsyncClient,
    events: mpsc::UnboundedReceiver<LinkEvent>,
    /// Outbox ids submitted but not yet given a packet id, in submission order
    unassigned: Arc<Mutex<VecDeque<u64>>>,
    driver: JoinHandle<()>,
}

#[async_trait]
impl Link for MqttLink {
    fn try_submit(&mut self, seq: u64, message: &OutgoingMessage) -> Result<bool> {
        // Held across the enqueue so the driver cannot see the packet before its id
        let mut unassigned = self.unassigned.lock();
        match self.client.try_publish(
            message.topic.as_str(),
            QoS::AtLeastOnce,
            false,
            message.payload.clone(),
        ) {
            Ok(()) => {
                unassigned.push_back(seq);
                Ok(true)
            }
            Err(ClientError::TryRequest(_)) => Ok(false),
            Err(e) => Err(e).context("Failed to submit publish"),
        }
    }

    async fn next_event(&mut self) -> LinkEvent {
        self.events
            .recv()
            .await
            .unwrap_or_else(|| LinkEvent::Lost("event loop stopped".to_string()))
    }

    async fn close(&mut self, graceful: bool) {
        if graceful && self.client.try_disconnect().is_ok() {
            let _ = tokio::time::timeout(CLOSE_GRACE, &mut self.driver).await;
        }
        self.driver.abort();
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Poll the event loop, translating packets into link events
async fn drive(
    mut eventloop: EventLoop,
    unassigned: Arc<Mutex<VecDeque<u64>>>,
    tx: mpsc::UnboundedSender<LinkEvent>,
) {
    let mut inflight: HashMap<u16, u64> = HashMap::new();

    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    LinkEvent::Connected
                } else {
                    LinkEvent::Lost(format!("connection refused: {:?}", ack.code))
                }
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => match inflight.remove(&ack.pkid) {
                Some(seq) => LinkEvent::Acked(seq),
                None => {
                    debug!("PUBACK for unknown packet id {}", ack.pkid);
                    continue;
                }
            },
            Ok(Event::Incoming(Packet::Disconnect)) => {
                LinkEvent::Lost("broker sent DISCONNECT".to_string())
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                match unassigned.lock().pop_front() {
                    Some(seq) => {
                        inflight.insert(pkid, seq);
                    }
                    None => warn!("Outgoing publish {} without a queued message", pkid),
                }
                continue;
            }
            Ok(_) => continue,
            Err(e) => LinkEvent::Lost(e.to_string()),
        };

        let lost = matches!(event, LinkEvent::Lost(_));
        if tx.send(event).is_err() || lost {
            break;
        }
    }
}

fn tls_configuration(verify: bool) -> Result<TlsConfiguration> {
    let config = if verify {
        let mut roots = RootCertStore::empty();
        let certs = rustls_native_certs::load_native_certs()
            .context("Failed to load platform root certificates")?;
        for cert in certs {
            if let Err(e) = roots.add(cert) {
                debug!("Skipping unusable root certificate: {}", e);
            }
        }
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    } else {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
            .with_no_client_auth()
    };

    Ok(TlsConfiguration::Rustls(Arc::new(config)))
}

/// Verifier used when `reject_unauthorized` is off (self-signed brokers)
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}
