//! Connection options and transport preferences.

use std::{
    fmt,
    ops::{BitOr, BitOrAssign},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::ClientError;

/// Default wait between retries and before an auto-reconnect.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Bit-set of acceptable transports.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub struct TransportKinds(u8);

impl TransportKinds {
    /// No transport preference.
    pub const NONE: Self = Self(0);
    pub const WEB_SOCKETS: Self = Self(1);
    pub const SERVER_SENT_EVENTS: Self = Self(2);
    pub const LONG_POLLING: Self = Self(4);
    /// Any of the available transports.
    pub const ANY: Self = Self(1 | 2 | 4);

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Build from raw bits, dropping unknown ones.
    #[must_use]
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ANY.0)
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when WebSockets is the one and only transport allowed.
    #[must_use]
    pub const fn is_web_sockets_only(self) -> bool {
        self.0 == Self::WEB_SOCKETS.0
    }
}

impl Default for TransportKinds {
    fn default() -> Self {
        Self::ANY
    }
}

impl From<u8> for TransportKinds {
    fn from(bits: u8) -> Self {
        Self::from_bits_truncate(bits)
    }
}

impl From<TransportKinds> for u8 {
    fn from(kinds: TransportKinds) -> Self {
        kinds.0
    }
}

impl BitOr for TransportKinds {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for TransportKinds {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for TransportKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Self::WEB_SOCKETS, "WebSockets"),
            (Self::SERVER_SENT_EVENTS, "ServerSentEvents"),
            (Self::LONG_POLLING, "LongPolling"),
        ]
        .into_iter()
        .filter(|(kind, _)| self.contains(*kind))
        .map(|(_, name)| name)
        .collect();

        if names.is_empty() {
            f.write_str("None")
        } else {
            f.write_str(&names.join(" | "))
        }
    }
}

/// Effective settings of a connection session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionOptions {
    /// Retries after the first failed transport start. `None` retries without bound.
    pub retry_count: Option<u32>,
    /// Retry failed starts and reconnect dropped sessions.
    pub auto_reconnect: bool,
    /// Emit connection-level trace output.
    pub enable_tracing: bool,
    /// Fixed retry interval and auto-reconnect wait.
    #[serde(rename = "reconnectDelayMs", with = "duration_ms")]
    pub reconnect_delay: Duration,
    /// Acceptable transports.
    pub transport: TransportKinds,
    /// Skip transport negotiation. Only valid with WebSockets alone.
    pub skip_negotiation: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            retry_count: None,
            auto_reconnect: true,
            enable_tracing: false,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            transport: TransportKinds::ANY,
            skip_negotiation: false,
        }
    }
}

impl ConnectionOptions {
    /// Defaults with `patch` applied on top.
    #[must_use]
    pub fn merged(patch: Option<&ConnectionOptionsPatch>) -> Self {
        let defaults = Self::default();
        match patch {
            Some(patch) => defaults.apply(patch),
            None => defaults,
        }
    }

    /// Overwrite every field that `patch` sets.
    #[must_use]
    pub fn apply(mut self, patch: &ConnectionOptionsPatch) -> Self {
        if let Some(retry_count) = patch.retry_count {
            self.retry_count = Some(retry_count);
        }
        if let Some(auto_reconnect) = patch.auto_reconnect {
            self.auto_reconnect = auto_reconnect;
        }
        if let Some(enable_tracing) = patch.enable_tracing {
            self.enable_tracing = enable_tracing;
        }
        if let Some(delay_ms) = patch.reconnect_delay_ms {
            self.reconnect_delay = Duration::from_millis(delay_ms);
        }
        if let Some(transport) = patch.transport {
            self.transport = transport;
        }
        if let Some(skip_negotiation) = patch.skip_negotiation {
            self.skip_negotiation = skip_negotiation;
        }
        self
    }

    /// Check option combinations.
    ///
    /// # Errors
    /// Returns `ClientError::Argument` when negotiation is skipped without
    /// restricting the transport to WebSockets.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.skip_negotiation && !self.transport.is_web_sockets_only() {
            return Err(ClientError::Argument("skip_negotiation"));
        }
        Ok(())
    }

    /// Parse options from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns error if the document is not valid options JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Partial options overlay, merged onto the defaults by `start()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOptionsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_reconnect: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_tracing: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportKinds>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_negotiation: Option<bool>,
}

impl ConnectionOptionsPatch {
    #[must_use]
    pub const fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    #[must_use]
    pub const fn auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = Some(auto_reconnect);
        self
    }

    #[must_use]
    pub const fn enable_tracing(mut self, enable_tracing: bool) -> Self {
        self.enable_tracing = Some(enable_tracing);
        self
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = Some(delay.as_millis() as u64);
        self
    }

    #[must_use]
    pub const fn transport(mut self, transport: TransportKinds) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub const fn skip_negotiation(mut self, skip_negotiation: bool) -> Self {
        self.skip_negotiation = Some(skip_negotiation);
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[test]
    fn test_defaults() {
        let options = ConnectionOptions::default();
        assert_eq!(options.retry_count, None);
        assert!(options.auto_reconnect);
        assert!(!options.enable_tracing);
        assert_eq!(options.reconnect_delay, Duration::from_millis(3000));
        assert_eq!(options.transport, TransportKinds::ANY);
    }

    #[test]
    fn test_patch_overrides_only_given_fields() {
        let patch = ConnectionOptionsPatch::default()
            .retry_count(2)
            .reconnect_delay(Duration::from_millis(250));
        let options = ConnectionOptions::merged(Some(&patch));

        assert_eq!(options.retry_count, Some(2));
        assert_eq!(options.reconnect_delay, Duration::from_millis(250));
        assert!(options.auto_reconnect);
        assert_eq!(options.transport, TransportKinds::ANY);
    }

    #[test]
    fn test_skip_negotiation_requires_web_sockets_only() {
        let any = ConnectionOptions::merged(Some(
            &ConnectionOptionsPatch::default().skip_negotiation(true),
        ));
        assert!(matches!(
            any.validate(),
            Err(ClientError::Argument("skip_negotiation"))
        ));

        let ws = ConnectionOptions::merged(Some(
            &ConnectionOptionsPatch::default()
                .skip_negotiation(true)
                .transport(TransportKinds::WEB_SOCKETS),
        ));
        assert_ok!(ws.validate());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let options = assert_ok!(ConnectionOptions::from_json(
            r#"{"retryCount": 5, "reconnectDelayMs": 100, "transport": 3}"#
        ));
        assert_eq!(options.retry_count, Some(5));
        assert_eq!(options.reconnect_delay, Duration::from_millis(100));
        assert_eq!(
            options.transport,
            TransportKinds::WEB_SOCKETS | TransportKinds::SERVER_SENT_EVENTS
        );
        assert!(options.auto_reconnect);

        assert_err!(ConnectionOptions::from_json(r#"{"retryCount": -1}"#));
    }

    #[test]
    fn test_transport_bits() {
        let kinds = TransportKinds::from(0xFF);
        assert_eq!(kinds, TransportKinds::ANY);
        assert!(kinds.contains(TransportKinds::LONG_POLLING));
        assert!(!TransportKinds::ANY.is_web_sockets_only());
        assert_eq!(format!("{:?}", TransportKinds::NONE), "None");
        assert_eq!(
            format!("{:?}", TransportKinds::WEB_SOCKETS | TransportKinds::LONG_POLLING),
            "WebSockets | LongPolling"
        );
    }
}
