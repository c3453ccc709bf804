//! Sending the finished EPUB to a reader device by email.

use std::fmt;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::info;

use crate::config::ToDevice;

pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
const EPUB_CONTENT_TYPE: &str = "application/epub+zip";

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Invalid email address {address:?}: {source}")]
    Address {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },

    #[error("Could not build delivery email: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("Could not connect to mail server {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: lettre::transport::smtp::Error,
    },

    #[error("Could not send {attachment} to {device}: {source}")]
    Send {
        attachment: String,
        device: String,
        #[source]
        source: lettre::transport::smtp::Error,
    },
}

/// One EPUB addressed to one device.
#[derive(Clone)]
pub struct DeliveryRequest {
    pub device_email: String,
    pub sender_email: String,
    pub sender_password: String,
    /// Attachment file name, e.g. `2026-10-19 news.epub`.
    pub attachment_name: String,
    pub epub: Vec<u8>,
}

impl DeliveryRequest {
    pub fn new(to_device: &ToDevice, attachment_name: impl Into<String>, epub: Vec<u8>) -> Self {
        Self {
            device_email: to_device.device_email.clone(),
            sender_email: to_device.sender_email.clone(),
            sender_password: to_device.sender_password.clone(),
            attachment_name: attachment_name.into(),
            epub,
        }
    }
}

impl fmt::Debug for DeliveryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryRequest")
            .field("device_email", &self.device_email)
            .field("sender_email", &self.sender_email)
            .field("sender_password", &"********")
            .field("attachment_name", &self.attachment_name)
            .field("epub", &format_args!("{} bytes", self.epub.len()))
            .finish()
    }
}

#[async_trait]
pub trait DeviceDelivery: Send + Sync {
    async fn deliver(&self, request: &DeliveryRequest) -> Result<(), DeliveryError>;
}

/// Delivery through an authenticated SMTP relay (implicit TLS).
#[derive(Debug, Clone)]
pub struct SmtpDelivery {
    host: String,
}

impl Default for SmtpDelivery {
    fn default() -> Self {
        Self::new(DEFAULT_SMTP_HOST)
    }
}

impl SmtpDelivery {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

#[async_trait]
impl DeviceDelivery for SmtpDelivery {
    async fn deliver(&self, request: &DeliveryRequest) -> Result<(), DeliveryError> {
        let message = build_message(request)?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.host)
            .map_err(|source| DeliveryError::Connect {
                host: self.host.clone(),
                source,
            })?
            .credentials(Credentials::new(
                request.sender_email.clone(),
                request.sender_password.clone(),
            ))
            .build();
        transport
            .send(message)
            .await
            .map_err(|source| DeliveryError::Send {
                attachment: request.attachment_name.clone(),
                device: request.device_email.clone(),
                source,
            })?;
        info!(
            "Sent {} to {}",
            request.attachment_name, request.device_email
        );
        Ok(())
    }
}

fn mailbox(address: &str) -> Result<Mailbox, DeliveryError> {
    address.parse().map_err(|source| DeliveryError::Address {
        address: address.to_string(),
        source,
    })
}

/// The email carrying the EPUB as its only attachment.
pub fn build_message(request: &DeliveryRequest) -> Result<Message, DeliveryError> {
    let content_type = ContentType::parse(EPUB_CONTENT_TYPE)
        .unwrap_or(ContentType::TEXT_PLAIN);
    let attachment =
        Attachment::new(request.attachment_name.clone()).body(request.epub.clone(), content_type);
    let message = Message::builder()
        .from(mailbox(&request.sender_email)?)
        .to(mailbox(&request.device_email)?)
        .subject(request.attachment_name.trim_end_matches(".epub"))
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(String::from("Sent by rdrdigest.")))
                .singlepart(attachment),
        )?;
    Ok(message)
}
