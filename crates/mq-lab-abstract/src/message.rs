use crate::qos::QoS;
use crate::topic::{TopicKey, filters};

/// Everything that can arrive over the bus, decoded once at the boundary.
/// Workers act on the control variants; the controller acts on the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    QosUpdate(QoS),
    DelayUpdate(u64),
    InstanceCountUpdate(u32),
    StartTrigger,
    Data { key: TopicKey, sequence: i64 },
    Terminate { key: TopicKey },
    BrokerStatus { topic: String, line: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("message on unknown topic '{0}'")]
    UnknownTopic(String),
    #[error("malformed payload on '{topic}': {reason}")]
    BadPayload { topic: String, reason: String },
}

impl BusEvent {
    pub fn decode(topic: &str, payload: &[u8]) -> Result<Self, DecodeError> {
        if topic.starts_with("$SYS/") {
            return Ok(BusEvent::BrokerStatus {
                topic: topic.to_string(),
                line: String::from_utf8_lossy(payload).into_owned(),
            });
        }
        if let Some((key, terminate)) = TopicKey::parse(topic) {
            if terminate {
                return Ok(BusEvent::Terminate { key });
            }
            let sequence = parse_int::<i64>(topic, payload)?;
            return Ok(BusEvent::Data { key, sequence });
        }
        match topic {
            filters::QOS => {
                let level = parse_int::<u8>(topic, payload)?;
                let qos = QoS::try_from(level).map_err(|e| DecodeError::BadPayload {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                })?;
                Ok(BusEvent::QosUpdate(qos))
            }
            filters::DELAY => Ok(BusEvent::DelayUpdate(parse_int::<u64>(topic, payload)?)),
            filters::INSTANCE_COUNT => {
                Ok(BusEvent::InstanceCountUpdate(parse_int::<u32>(topic, payload)?))
            }
            filters::START => {
                if payload == b"start" {
                    Ok(BusEvent::StartTrigger)
                } else {
                    Err(DecodeError::BadPayload {
                        topic: topic.to_string(),
                        reason: "expected literal 'start'".to_string(),
                    })
                }
            }
            other => Err(DecodeError::UnknownTopic(other.to_string())),
        }
    }
}

fn parse_int<T: std::str::FromStr>(topic: &str, payload: &[u8]) -> Result<T, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(|_| DecodeError::BadPayload {
        topic: topic.to_string(),
        reason: "payload is not UTF-8".to_string(),
    })?;
    text.trim().parse().map_err(|_| DecodeError::BadPayload {
        topic: topic.to_string(),
        reason: format!("'{text}' is not a valid integer"),
    })
}
