//! Topics: the routing keys publishers hand to node selectors.
//!
//! Encoded form: one kind byte followed by the identifier bytes.
//! Display form: `<kind_name>/<hex identifier>`, e.g. `identity_updates_v1/deadbeef`.

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum TopicKind {
    GroupMessagesV1 = 0,
    WelcomeMessagesV1 = 1,
    IdentityUpdatesV1 = 2,
    KeyPackagesV1 = 3,
    PayerReportsV1 = 4,
    PayerReportAttestationsV1 = 5,
}

impl TopicKind {
    pub fn name(self) -> &'static str {
        match self {
            TopicKind::GroupMessagesV1 => "group_messages_v1",
            TopicKind::WelcomeMessagesV1 => "welcome_messages_v1",
            TopicKind::IdentityUpdatesV1 => "identity_updates_v1",
            TopicKind::KeyPackagesV1 => "key_packages_v1",
            TopicKind::PayerReportsV1 => "payer_reports_v1",
            TopicKind::PayerReportAttestationsV1 => "payer_report_attestations_v1",
        }
    }

    const ALL: [TopicKind; 6] = [
        TopicKind::GroupMessagesV1,
        TopicKind::WelcomeMessagesV1,
        TopicKind::IdentityUpdatesV1,
        TopicKind::KeyPackagesV1,
        TopicKind::PayerReportsV1,
        TopicKind::PayerReportAttestationsV1,
    ];
}

impl TryFrom<u8> for TopicKind {
    type Error = TopicError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        TopicKind::ALL
            .into_iter()
            .find(|kind| *kind as u8 == value)
            .ok_or(TopicError::UnknownKind(value))
    }
}

impl FromStr for TopicKind {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TopicKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| TopicError::UnknownKindName(s.to_string()))
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("topic is empty")]
    Empty,
    #[error("unknown topic kind byte {0}")]
    UnknownKind(u8),
    #[error("unknown topic kind {0:?}")]
    UnknownKindName(String),
    #[error("topic {0:?} is not of the form <kind>/<hex identifier>")]
    Malformed(String),
    #[error("topic identifier is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Opaque routing key. Immutable and cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    kind: TopicKind,
    identifier: Bytes,
}

impl Topic {
    pub fn new(kind: TopicKind, identifier: impl Into<Bytes>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
        }
    }

    pub fn kind(&self) -> TopicKind {
        self.kind
    }

    /// Identifier bytes without the kind prefix.
    pub fn identifier(&self) -> &[u8] {
        &self.identifier
    }

    /// Full encoded form: kind byte followed by the identifier.
    pub fn bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + self.identifier.len());
        buf.put_u8(self.kind as u8);
        buf.put_slice(&self.identifier);
        buf.freeze()
    }

    /// Decode the `[kind][identifier..]` form.
    pub fn from_bytes(data: &[u8]) -> Result<Self, TopicError> {
        let (&kind, identifier) = data.split_first().ok_or(TopicError::Empty)?;
        Ok(Self::new(
            TopicKind::try_from(kind)?,
            Bytes::copy_from_slice(identifier),
        ))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, hex::encode(&self.identifier))
    }
}

impl FromStr for Topic {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, identifier) = s
            .split_once('/')
            .ok_or_else(|| TopicError::Malformed(s.to_string()))?;
        Ok(Self::new(kind.parse()?, hex::decode(identifier)?))
    }
}
