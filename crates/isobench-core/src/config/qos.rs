//! QoS parameters and validation
//!
//! A [`BenchConfig`] carries one optional [`QosConfig`] per direction plus the
//! number of streams to create per session. Validation is pure: it checks each
//! field against its bound and names the first offending field.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum retransmission number
pub const RTN_MAX: u8 = 16;

/// Minimum SDU interval in microseconds
pub const INTERVAL_US_MIN: u32 = 0x100;

/// Maximum SDU interval in microseconds
pub const INTERVAL_US_MAX: u32 = 0xF_FFFF;

/// Maximum transport latency in milliseconds
pub const LATENCY_MS_MAX: u16 = 4000;

/// Minimum payload size: room for the embedded sequence counter
pub const SDU_MIN: u16 = std::mem::size_of::<u32>() as u16;

/// Absolute payload size ceiling, independent of the transport MTU
pub const SDU_MAX: u16 = 0xFFF;

/// Default retransmission number
pub const DEFAULT_RTN: u8 = 0;

/// Default SDU interval (7.5 ms)
pub const DEFAULT_INTERVAL_US: u32 = 7500;

/// Default transport latency
pub const DEFAULT_LATENCY_MS: u16 = 10;

/// Errors raised while validating a candidate configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid {field}: {value} (allowed {min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("Invalid PHY code: {0} (expected 1 = 1M, 2 = 2M, 4 = Coded)")]
    InvalidPhy(u64),

    #[error("Cannot disable both TX and RX")]
    BothDirectionsDisabled,
}

/// Physical-layer mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phy {
    #[serde(rename = "1M")]
    Le1M,
    #[serde(rename = "2M")]
    Le2M,
    #[serde(rename = "Coded")]
    Coded,
}

impl Phy {
    /// On-air code as used by the transport (1, 2 or 4)
    pub fn code(self) -> u8 {
        match self {
            Phy::Le1M => 1,
            Phy::Le2M => 2,
            Phy::Coded => 4,
        }
    }

    /// Map a transport PHY code back to a mode
    pub fn from_code(code: u64) -> Result<Self, ConfigError> {
        match code {
            1 => Ok(Phy::Le1M),
            2 => Ok(Phy::Le2M),
            4 => Ok(Phy::Coded),
            other => Err(ConfigError::InvalidPhy(other)),
        }
    }
}

impl fmt::Display for Phy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phy::Le1M => write!(f, "1M"),
            Phy::Le2M => write!(f, "2M"),
            Phy::Coded => write!(f, "Coded"),
        }
    }
}

/// Bounds the transport imposes on any configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportLimits {
    /// Maximum concurrent streams per link
    pub max_streams: usize,
    /// Largest payload the transport accepts in one submission
    pub tx_mtu: u16,
}

impl Default for TransportLimits {
    fn default() -> Self {
        Self {
            max_streams: crate::DEFAULT_MAX_STREAMS,
            tx_mtu: crate::DEFAULT_TX_MTU,
        }
    }
}

fn default_rtn() -> u8 {
    DEFAULT_RTN
}

fn default_interval_us() -> u32 {
    DEFAULT_INTERVAL_US
}

fn default_latency_ms() -> u16 {
    DEFAULT_LATENCY_MS
}

fn default_phy() -> Phy {
    Phy::Le2M
}

fn default_sdu() -> u16 {
    crate::DEFAULT_TX_MTU
}

fn default_direction() -> Option<QosConfig> {
    Some(QosConfig::default())
}

fn default_stream_count() -> usize {
    crate::DEFAULT_MAX_STREAMS
}

/// QoS parameters for one direction of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QosConfig {
    /// Retransmission number
    #[serde(default = "default_rtn")]
    pub rtn: u8,
    /// SDU interval in microseconds
    #[serde(default = "default_interval_us")]
    pub interval_us: u32,
    /// Maximum transport latency in milliseconds
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u16,
    /// Physical-layer mode
    #[serde(default = "default_phy")]
    pub phy: Phy,
    /// Payload size in bytes
    #[serde(default = "default_sdu")]
    pub sdu: u16,
}

impl Default for QosConfig {
    fn default() -> Self {
        Self {
            rtn: default_rtn(),
            interval_us: default_interval_us(),
            latency_ms: default_latency_ms(),
            phy: default_phy(),
            sdu: default_sdu(),
        }
    }
}

impl fmt::Display for QosConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rtn={}, interval={}, latency={}, phy={}, sdu={}",
            self.rtn, self.interval_us, self.latency_ms, self.phy, self.sdu
        )
    }
}

impl QosConfig {
    /// Check every field against its bound
    ///
    /// # Arguments
    /// * `direction` - Field prefix used in error messages ("tx" or "rx")
    /// * `limits` - Transport bounds (the SDU ceiling is the smaller of the MTU and 4095)
    pub fn validate(&self, direction: Direction, limits: &TransportLimits) -> Result<(), ConfigError> {
        if self.rtn > RTN_MAX {
            return Err(ConfigError::OutOfRange {
                field: direction.field("rtn"),
                value: self.rtn as u64,
                min: 0,
                max: RTN_MAX as u64,
            });
        }

        if !(INTERVAL_US_MIN..=INTERVAL_US_MAX).contains(&self.interval_us) {
            return Err(ConfigError::OutOfRange {
                field: direction.field("interval_us"),
                value: self.interval_us as u64,
                min: INTERVAL_US_MIN as u64,
                max: INTERVAL_US_MAX as u64,
            });
        }

        if self.latency_ms > LATENCY_MS_MAX {
            return Err(ConfigError::OutOfRange {
                field: direction.field("latency_ms"),
                value: self.latency_ms as u64,
                min: 0,
                max: LATENCY_MS_MAX as u64,
            });
        }

        let sdu_max = SDU_MAX.min(limits.tx_mtu);
        if !(SDU_MIN..=sdu_max).contains(&self.sdu) {
            return Err(ConfigError::OutOfRange {
                field: direction.field("sdu"),
                value: self.sdu as u64,
                min: SDU_MIN as u64,
                max: sdu_max as u64,
            });
        }

        Ok(())
    }
}

/// Stream direction, used to name fields in validation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Tx,
    Rx,
}

impl Direction {
    fn field(self, name: &'static str) -> &'static str {
        match (self, name) {
            (Direction::Tx, "rtn") => "tx.rtn",
            (Direction::Tx, "interval_us") => "tx.interval_us",
            (Direction::Tx, "latency_ms") => "tx.latency_ms",
            (Direction::Tx, "sdu") => "tx.sdu",
            (Direction::Rx, "rtn") => "rx.rtn",
            (Direction::Rx, "interval_us") => "rx.interval_us",
            (Direction::Rx, "latency_ms") => "rx.latency_ms",
            (Direction::Rx, "sdu") => "rx.sdu",
            (_, other) => other,
        }
    }
}

/// Complete benchmark configuration for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Send-direction QoS (None = TX disabled)
    #[serde(default = "default_direction")]
    pub tx: Option<QosConfig>,
    /// Receive-direction QoS (None = RX disabled)
    #[serde(default = "default_direction")]
    pub rx: Option<QosConfig>,
    /// Streams created per session
    #[serde(default = "default_stream_count")]
    pub stream_count: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            tx: default_direction(),
            rx: default_direction(),
            stream_count: default_stream_count(),
        }
    }
}

impl BenchConfig {
    /// Defaults sized to a particular transport (SDU = MTU, count = max streams)
    pub fn for_limits(limits: &TransportLimits) -> Self {
        let qos = QosConfig {
            sdu: limits.tx_mtu.min(SDU_MAX),
            ..Default::default()
        };
        Self {
            tx: Some(qos),
            rx: Some(qos),
            stream_count: limits.max_streams,
        }
    }

    /// Copy the TX parameters into RX
    pub fn mirror_tx_to_rx(&mut self) {
        if let Some(tx) = self.tx {
            self.rx = Some(tx);
        }
    }

    /// Validate a candidate configuration against transport limits
    ///
    /// # Returns
    /// The same configuration if every field is in bounds
    pub fn validate(self, limits: &TransportLimits) -> Result<Self, ConfigError> {
        if self.tx.is_none() && self.rx.is_none() {
            return Err(ConfigError::BothDirectionsDisabled);
        }

        if let Some(tx) = &self.tx {
            tx.validate(Direction::Tx, limits)?;
        }
        if let Some(rx) = &self.rx {
            rx.validate(Direction::Rx, limits)?;
        }

        if self.stream_count == 0 || self.stream_count > limits.max_streams {
            return Err(ConfigError::OutOfRange {
                field: "stream_count",
                value: self.stream_count as u64,
                min: 1,
                max: limits.max_streams as u64,
            });
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> TransportLimits {
        TransportLimits {
            max_streams: 2,
            tx_mtu: 251,
        }
    }

    fn with_tx(qos: QosConfig) -> BenchConfig {
        BenchConfig {
            tx: Some(qos),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(BenchConfig::default().validate(&limits()).is_ok());
    }

    #[test]
    fn test_interval_bounds() {
        let low = with_tx(QosConfig {
            interval_us: 255,
            ..Default::default()
        });
        assert!(matches!(
            low.validate(&limits()),
            Err(ConfigError::OutOfRange {
                field: "tx.interval_us",
                ..
            })
        ));

        let ok = with_tx(QosConfig {
            interval_us: 256,
            ..Default::default()
        });
        assert!(ok.validate(&limits()).is_ok());

        let high = with_tx(QosConfig {
            interval_us: INTERVAL_US_MAX + 1,
            ..Default::default()
        });
        assert!(high.validate(&limits()).is_err());
    }

    #[test]
    fn test_sdu_bounds() {
        let small = with_tx(QosConfig {
            sdu: 3,
            ..Default::default()
        });
        assert!(matches!(
            small.validate(&limits()),
            Err(ConfigError::OutOfRange { field: "tx.sdu", .. })
        ));

        let min = with_tx(QosConfig {
            sdu: 4,
            ..Default::default()
        });
        assert!(min.validate(&limits()).is_ok());

        let over_mtu = with_tx(QosConfig {
            sdu: 252,
            ..Default::default()
        });
        assert!(over_mtu.validate(&limits()).is_err());
    }

    #[test]
    fn test_sdu_ceiling_with_large_mtu() {
        let big = TransportLimits {
            max_streams: 2,
            tx_mtu: 8192,
        };
        let at_ceiling = with_tx(QosConfig {
            sdu: SDU_MAX,
            ..Default::default()
        });
        assert!(at_ceiling.validate(&big).is_ok());

        let over = with_tx(QosConfig {
            sdu: SDU_MAX + 1,
            ..Default::default()
        });
        assert!(over.validate(&big).is_err());
    }

    #[test]
    fn test_rtn_and_latency_bounds() {
        let rtn = with_tx(QosConfig {
            rtn: 17,
            ..Default::default()
        });
        assert!(matches!(
            rtn.validate(&limits()),
            Err(ConfigError::OutOfRange { field: "tx.rtn", .. })
        ));

        let latency = BenchConfig {
            rx: Some(QosConfig {
                latency_ms: 4001,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(matches!(
            latency.validate(&limits()),
            Err(ConfigError::OutOfRange {
                field: "rx.latency_ms",
                ..
            })
        ));
    }

    #[test]
    fn test_both_directions_disabled() {
        let config = BenchConfig {
            tx: None,
            rx: None,
            stream_count: 1,
        };
        assert_eq!(
            config.validate(&limits()),
            Err(ConfigError::BothDirectionsDisabled)
        );
    }

    #[test]
    fn test_one_direction_disabled_is_fine() {
        let config = BenchConfig {
            tx: None,
            ..Default::default()
        };
        assert!(config.validate(&limits()).is_ok());
    }

    #[test]
    fn test_stream_count_bounds() {
        let zero = BenchConfig {
            stream_count: 0,
            ..Default::default()
        };
        assert!(zero.validate(&limits()).is_err());

        let too_many = BenchConfig {
            stream_count: 3,
            ..Default::default()
        };
        assert!(matches!(
            too_many.validate(&limits()),
            Err(ConfigError::OutOfRange {
                field: "stream_count",
                value: 3,
                ..
            })
        ));
    }

    #[test]
    fn test_phy_codes() {
        assert_eq!(Phy::from_code(1), Ok(Phy::Le1M));
        assert_eq!(Phy::from_code(2), Ok(Phy::Le2M));
        assert_eq!(Phy::from_code(4), Ok(Phy::Coded));
        assert_eq!(Phy::from_code(3), Err(ConfigError::InvalidPhy(3)));
        assert_eq!(Phy::Coded.code(), 4);
    }

    #[test]
    fn test_mirror_tx_to_rx() {
        let mut config = with_tx(QosConfig {
            rtn: 3,
            ..Default::default()
        });
        config.mirror_tx_to_rx();
        assert_eq!(config.rx.map(|q| q.rtn), Some(3));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let json = r#"{"tx": {"rtn": 2}, "stream_count": 1}"#;
        let config: BenchConfig = serde_json::from_str(json).unwrap();
        let tx = config.tx.unwrap();
        assert_eq!(tx.rtn, 2);
        assert_eq!(tx.interval_us, DEFAULT_INTERVAL_US);
        assert_eq!(tx.phy, Phy::Le2M);
        assert_eq!(config.rx, Some(QosConfig::default()));
        assert_eq!(config.stream_count, 1);
    }

    #[test]
    fn test_disabled_direction_serializes_as_null() {
        let config = BenchConfig {
            rx: None,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let loaded: BenchConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.rx, None);
    }
}
