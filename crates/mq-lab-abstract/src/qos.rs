use serde::{Deserialize, Serialize};
use std::fmt;

/// MQTT-style delivery guarantee tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    /// 0: at most once, no retransmission.
    AtMostOnce,
    /// 1: at least once, duplicates possible.
    AtLeastOnce,
    /// 2: exactly once.
    ExactlyOnce,
}

impl QoS {
    pub fn level(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }

    /// Delivery QoS granted to a subscriber: the lower of the publish QoS
    /// and the subscription QoS.
    pub fn granted(self, subscription: QoS) -> QoS {
        self.min(subscription)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid QoS level '{0}', expected 0, 1 or 2")]
pub struct InvalidQoS(pub String);

impl TryFrom<u8> for QoS {
    type Error = InvalidQoS;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(InvalidQoS(other.to_string())),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> u8 {
        qos.level()
    }
}

impl std::str::FromStr for QoS {
    type Err = InvalidQoS;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level: u8 = s.parse().map_err(|_| InvalidQoS(s.to_string()))?;
        QoS::try_from(level)
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

#[cfg(test)]
mod tests {
    use super::QoS;

    #[test]
    fn parses_all_levels() {
        assert_eq!("0".parse::<QoS>().unwrap(), QoS::AtMostOnce);
        assert_eq!("1".parse::<QoS>().unwrap(), QoS::AtLeastOnce);
        assert_eq!("2".parse::<QoS>().unwrap(), QoS::ExactlyOnce);
        assert!("3".parse::<QoS>().is_err());
        assert!("one".parse::<QoS>().is_err());
    }

    #[test]
    fn granted_is_the_minimum() {
        assert_eq!(QoS::ExactlyOnce.granted(QoS::AtMostOnce), QoS::AtMostOnce);
        assert_eq!(QoS::AtMostOnce.granted(QoS::ExactlyOnce), QoS::AtMostOnce);
        assert_eq!(QoS::AtLeastOnce.granted(QoS::AtLeastOnce), QoS::AtLeastOnce);
    }
}
