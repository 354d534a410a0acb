use std::fmt;
use std::time::Duration;

use rumqttc::Transport as WireTransport;

use super::error::ConnectionError;

/// Broker connection settings resolved once at startup
#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub broker_url: String,
    pub topic: String,
    pub client_id_prefix: String,
    pub reconnect_period: Duration,
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_url: "wss://test.mosquitto.org:8081/mqtt".to_string(),
            topic: "device/ESP32-D15644".to_string(),
            client_id_prefix: "coindrop".to_string(),
            reconnect_period: Duration::from_millis(2000),
            connect_timeout: Duration::from_secs(30),
            keep_alive: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerScheme {
    Tcp,
    Tls,
    Ws,
    Wss,
}

impl BrokerScheme {
    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "mqtt" | "tcp" => Some(Self::Tcp),
            "mqtts" | "ssl" | "tls" => Some(Self::Tls),
            "ws" => Some(Self::Ws),
            "wss" => Some(Self::Wss),
            _ => None,
        }
    }

    fn default_port(self) -> u16 {
        match self {
            Self::Tcp => 1883,
            Self::Tls => 8883,
            Self::Ws => 80,
            Self::Wss => 443,
        }
    }

    pub fn is_websocket(self) -> bool {
        matches!(self, Self::Ws | Self::Wss)
    }
}

/// A parsed broker address, e.g. `wss://test.mosquitto.org:8081/mqtt`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub scheme: BrokerScheme,
    pub host: String,
    pub port: u16,
    pub path: String,
    url: String,
}

impl BrokerEndpoint {
    pub fn parse(url: &str) -> Result<Self, ConnectionError> {
        let url = url.trim();
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| ConnectionError::InvalidBrokerUrl(url.to_string()))?;
        let scheme = BrokerScheme::from_scheme(scheme)
            .ok_or_else(|| ConnectionError::UnsupportedScheme(scheme.to_string()))?;

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| ConnectionError::InvalidBrokerUrl(url.to_string()))?;
                (host, port)
            }
            None => (authority, scheme.default_port()),
        };

        if host.is_empty() {
            return Err(ConnectionError::InvalidBrokerUrl(url.to_string()));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            path: path.to_string(),
            url: url.to_string(),
        })
    }

    /// Address handed to rumqttc; websocket transports expect the full url
    pub fn broker_addr(&self) -> String {
        if self.scheme.is_websocket() {
            self.url.clone()
        } else {
            self.host.clone()
        }
    }

    pub fn wire_transport(&self) -> WireTransport {
        match self.scheme {
            BrokerScheme::Tcp => WireTransport::Tcp,
            BrokerScheme::Tls => WireTransport::tls_with_default_config(),
            BrokerScheme::Ws => WireTransport::Ws,
            BrokerScheme::Wss => WireTransport::wss_with_default_config(),
        }
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}
