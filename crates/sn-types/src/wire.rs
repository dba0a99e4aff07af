//! Wire protocol between host and client.
//!
//! One internally-tagged JSON message per line in each direction.  The tag
//! makes the format tolerant of unknown future fields, so a host and a
//! client from adjacent versions can run simultaneously during a rolling
//! worker addition.

use serde::{Deserialize, Serialize};

use crate::candidate::Candidate;
use crate::observation::Observation;

/// Messages exchanged over a dispatch channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// First message on every connection, client → host.  Identifies which
    /// registered worker (or new worker) the connection belongs to.
    Hello { address: String, category: String },
    /// Host → client: evaluate this candidate.
    Dispatch { candidate: Candidate },
    /// Client → host: result for a previously dispatched candidate.
    Report { observation: Observation },
    /// Host → client: stop after the current exchange and exit.
    Shutdown,
}

impl WireMessage {
    /// Serialize to a single protocol line (no trailing newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse one protocol line.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{ParamSet, ParamValue};

    #[test]
    fn hello_line_shape() {
        let msg = WireMessage::Hello {
            address: "gpu1.local".into(),
            category: "gpu-box".into(),
        };
        let line = msg.to_line().unwrap();
        assert!(line.contains(r#""type":"hello""#), "line: {line}");
        assert_eq!(WireMessage::from_line(&line).unwrap(), msg);
    }

    #[test]
    fn dispatch_and_report_round_trip() {
        let mut params = ParamSet::new();
        params.insert("lr".into(), ParamValue::Float(0.003));

        let dispatch = WireMessage::Dispatch {
            candidate: Candidate::new(12, params),
        };
        let back = WireMessage::from_line(&dispatch.to_line().unwrap()).unwrap();
        assert_eq!(back, dispatch);

        let report = WireMessage::Report {
            observation: Observation::scalar(12, 0.87),
        };
        let back = WireMessage::from_line(&report.to_line().unwrap()).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        let line = "  {\"type\":\"shutdown\"}\r\n";
        assert_eq!(WireMessage::from_line(line).unwrap(), WireMessage::Shutdown);
    }
}
