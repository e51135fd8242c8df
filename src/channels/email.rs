//! Email channel: IMAP for inbound attachments, SMTP via lettre for exports.
//!
//! IMAP is spoken directly over a rustls stream. Every operation opens its own
//! short session inside `spawn_blocking`; the pipeline makes a handful of
//! calls per run, so there is no connection to keep alive.

use std::io::{Read, Write as IoWrite};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MailAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};

use crate::channels::delivery::{Delivery, OutboundMessage};
use crate::channels::email_types::{
    imap_date, imap_quote, is_tagged_ok, literal_len, parse_search_ids, parse_source_message,
};
use crate::channels::source::{FetchQuery, MessageSource, SourceMessage};
use crate::error::ChannelError;

// ── Configuration ───────────────────────────────────────────────────

/// Email configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    pub mailbox: String,
}

impl EmailConfig {
    /// Build config from environment variables.
    /// Returns `None` if `EMAIL_IMAP_HOST` is not set (email disabled).
    pub fn from_env() -> Option<Self> {
        let imap_host = std::env::var("EMAIL_IMAP_HOST").ok()?;

        let imap_port: u16 = std::env::var("EMAIL_IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let smtp_host =
            std::env::var("EMAIL_SMTP_HOST").unwrap_or_else(|_| imap_host.replace("imap", "smtp"));

        let smtp_port: u16 = std::env::var("EMAIL_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("EMAIL_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("EMAIL_PASSWORD").unwrap_or_default());
        let from_address = std::env::var("EMAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());
        let mailbox = std::env::var("EMAIL_MAILBOX").unwrap_or_else(|_| "INBOX".to_string());

        Some(Self {
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
            mailbox,
        })
    }
}

// ── IMAP session ────────────────────────────────────────────────────

/// Error type for blocking IMAP operations.
type ImapError = Box<dyn std::error::Error + Send + Sync>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect to the first reachable address for `host:port`.
fn connect_tcp(host: &str, port: u16) -> std::io::Result<TcpStream> {
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{host} resolved to no addresses"),
        )
    }))
}

/// Fetch the full message without setting `\Seen`.
fn fetch_command(uid: u32) -> String {
    format!("UID FETCH {uid} BODY.PEEK[]")
}

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// A logged-in IMAP session with the configured mailbox selected.
struct ImapSession {
    tls: TlsStream,
    tag_counter: u32,
}

impl ImapSession {
    /// Connect, log in, and select the mailbox (blocking).
    fn open(config: &EmailConfig) -> Result<Self, ImapError> {
        let tcp = connect_tcp(&config.imap_host, config.imap_port)?;
        tcp.set_read_timeout(Some(Duration::from_secs(30)))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls::pki_types::ServerName::try_from(config.imap_host.clone())?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)?;

        let mut session = Self {
            tls: rustls::StreamOwned::new(conn, tcp),
            tag_counter: 0,
        };

        let _greeting = session.read_line()?;

        let login = format!(
            "LOGIN {} {}",
            imap_quote(&config.username),
            imap_quote(config.password.expose_secret())
        );
        session.command(&login).map_err(|_| "IMAP login failed")?;
        session.command(&format!("SELECT {}", imap_quote(&config.mailbox)))?;
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, ImapError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.tls.read(&mut byte) {
                Ok(0) => return Err("IMAP connection closed".into()),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).into_owned());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn next_tag(&mut self) -> String {
        self.tag_counter += 1;
        format!("A{}", self.tag_counter)
    }

    fn send(&mut self, tag: &str, cmd: &str) -> Result<(), ImapError> {
        IoWrite::write_all(&mut self.tls, format!("{tag} {cmd}\r\n").as_bytes())?;
        IoWrite::flush(&mut self.tls)?;
        Ok(())
    }

    /// Run a command and collect its response lines. Literals are read as
    /// raw bytes and returned separately, in order.
    fn command_with_literals(&mut self, cmd: &str) -> Result<(Vec<String>, Vec<Vec<u8>>), ImapError> {
        let tag = self.next_tag();
        self.send(&tag, cmd)?;

        let done_prefix = format!("{tag} ");
        let mut lines = Vec::new();
        let mut literals = Vec::new();
        loop {
            let line = self.read_line()?;
            if let Some(len) = literal_len(&line) {
                let mut literal = vec![0u8; len];
                self.tls.read_exact(&mut literal)?;
                literals.push(literal);
                lines.push(line);
                continue;
            }
            if line.starts_with(&done_prefix) {
                if !is_tagged_ok(&line, &tag) {
                    return Err(format!("IMAP command failed: {}", line.trim_end()).into());
                }
                lines.push(line);
                return Ok((lines, literals));
            }
            lines.push(line);
        }
    }

    fn command(&mut self, cmd: &str) -> Result<Vec<String>, ImapError> {
        self.command_with_literals(cmd).map(|(lines, _)| lines)
    }

    fn logout(mut self) {
        let tag = self.next_tag();
        let _ = self.send(&tag, "LOGOUT");
    }
}

/// Search, fetch, and parse unmarked messages (blocking).
fn fetch_unprocessed_imap(
    config: &EmailConfig,
    query: &FetchQuery,
) -> Result<Vec<SourceMessage>, ImapError> {
    let mut session = ImapSession::open(config)?;

    let search = format!(
        "UID SEARCH UNKEYWORD {} SINCE {}",
        query.processed_label,
        imap_date(query.since)
    );
    let mut uids = parse_search_ids(&session.command(&search)?);
    uids.sort_unstable();
    let skip = uids.len().saturating_sub(query.max_messages);
    let uids = &uids[skip..];

    let mut messages = Vec::with_capacity(uids.len());
    for uid in uids {
        let (_, literals) = session.command_with_literals(&fetch_command(*uid))?;
        let Some(raw) = literals.first() else {
            tracing::warn!(uid, "FETCH returned no message body");
            continue;
        };
        match parse_source_message(&uid.to_string(), raw) {
            Some(msg) if msg.received_at >= query.since && !msg.attachments.is_empty() => {
                messages.push(msg)
            }
            Some(_) => tracing::debug!(uid, "Skipping message outside window or without attachments"),
            None => tracing::warn!(uid, "Unparseable message"),
        }
    }

    session.logout();
    Ok(messages)
}

fn store_flag(config: &EmailConfig, uid: &str, op: char, label: &str) -> Result<(), ImapError> {
    let mut session = ImapSession::open(config)?;
    session.command(&format!("UID STORE {uid} {op}FLAGS ({label})"))?;
    session.logout();
    Ok(())
}

fn clear_labels_imap(config: &EmailConfig, label: &str, max: usize) -> Result<usize, ImapError> {
    let mut session = ImapSession::open(config)?;
    let mut uids = parse_search_ids(&session.command(&format!("UID SEARCH KEYWORD {label}"))?);
    uids.sort_unstable();
    let skip = uids.len().saturating_sub(max);
    let uids = &uids[skip..];

    if !uids.is_empty() {
        let set = uids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        session.command(&format!("UID STORE {set} -FLAGS ({label})"))?;
    }
    session.logout();
    Ok(uids.len())
}

// ── Source ──────────────────────────────────────────────────────────

/// IMAP mailbox as a `MessageSource`. The fetched marker is an IMAP keyword.
pub struct ImapSource {
    config: EmailConfig,
}

impl ImapSource {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }
}

fn fetch_failed(reason: impl std::fmt::Display) -> ChannelError {
    ChannelError::FetchFailed {
        name: "imap".into(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl MessageSource for ImapSource {
    fn name(&self) -> &str {
        "imap"
    }

    async fn fetch_unprocessed(
        &self,
        query: &FetchQuery,
    ) -> Result<Vec<SourceMessage>, ChannelError> {
        let cfg = self.config.clone();
        let query = query.clone();
        let messages = tokio::task::spawn_blocking(move || {
            fetch_unprocessed_imap(&cfg, &query).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| fetch_failed(format!("IMAP task panicked: {e}")))?
        .map_err(fetch_failed)?;

        tracing::info!(count = messages.len(), host = %self.config.imap_host, "Fetched messages");
        Ok(messages)
    }

    async fn mark_fetched(&self, id: &str, label: &str) -> Result<(), ChannelError> {
        let cfg = self.config.clone();
        let (id, label) = (id.to_string(), label.to_string());
        tokio::task::spawn_blocking(move || {
            store_flag(&cfg, &id, '+', &label).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| fetch_failed(format!("IMAP task panicked: {e}")))?
        .map_err(fetch_failed)
    }

    async fn clear_fetched_marks(&self, label: &str, max: usize) -> Result<usize, ChannelError> {
        let cfg = self.config.clone();
        let label = label.to_string();
        tokio::task::spawn_blocking(move || {
            clear_labels_imap(&cfg, &label, max).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| fetch_failed(format!("IMAP task panicked: {e}")))?
        .map_err(fetch_failed)
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let cfg = self.config.clone();
        let ok = tokio::task::spawn_blocking(move || {
            connect_tcp(&cfg.imap_host, cfg.imap_port).is_ok()
        })
        .await
        .unwrap_or(false);

        if ok {
            Ok(())
        } else {
            Err(ChannelError::HealthCheckFailed {
                name: "imap".into(),
            })
        }
    }
}

// ── Delivery ────────────────────────────────────────────────────────

/// SMTP delivery via lettre.
pub struct SmtpDelivery {
    config: EmailConfig,
}

impl SmtpDelivery {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }
}

fn send_failed(reason: impl std::fmt::Display) -> ChannelError {
    ChannelError::SendFailed {
        name: "email".into(),
        reason: reason.to_string(),
    }
}

/// Build the MIME message: plain-text body plus one attachment.
pub fn build_message(from_address: &str, msg: &OutboundMessage) -> Result<Message, ChannelError> {
    let from = Mailbox::new(
        Some(msg.display_name.clone()),
        from_address
            .parse()
            .map_err(|e| send_failed(format!("Invalid from address: {e}")))?,
    );
    let to: Mailbox = msg
        .recipient
        .parse()
        .map_err(|e| send_failed(format!("Invalid to address: {e}")))?;
    let content_type = ContentType::parse(&msg.attachment.content_type)
        .map_err(|e| send_failed(format!("Invalid attachment type: {e}")))?;

    let attachment =
        MailAttachment::new(msg.attachment.name.clone()).body(msg.attachment.bytes.clone(), content_type);

    Message::builder()
        .from(from)
        .to(to)
        .subject(msg.subject.as_str())
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(msg.body.clone()))
                .singlepart(attachment),
        )
        .map_err(|e| send_failed(format!("Failed to build email: {e}")))
}

#[async_trait]
impl Delivery for SmtpDelivery {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError> {
        let email = build_message(&self.config.from_address, message)?;
        let cfg = self.config.clone();

        tokio::task::spawn_blocking(move || {
            let creds = Credentials::new(
                cfg.username.clone(),
                cfg.password.expose_secret().to_string(),
            );
            let relay = if cfg.smtp_port == 465 {
                SmtpTransport::relay(&cfg.smtp_host)
            } else {
                SmtpTransport::starttls_relay(&cfg.smtp_host)
            };
            let builder = relay.map_err(|e| send_failed(format!("SMTP relay error: {e}")))?;

            let transport = builder.port(cfg.smtp_port).credentials(creds).build();
            transport
                .send(&email)
                .map_err(|e| send_failed(format!("SMTP send failed: {e}")))?;
            Ok::<_, ChannelError>(())
        })
        .await
        .map_err(|e| send_failed(format!("SMTP task panicked: {e}")))??;

        tracing::info!(
            recipient = %message.recipient,
            attachment = %message.attachment.name,
            "Email sent"
        );
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
