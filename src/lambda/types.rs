//! Wire payloads for the Lambda Cloud REST API.

use serde::{Deserialize, Serialize};

/// Every response body wraps its payload in a `data` field.
#[derive(Debug, Deserialize)]
pub(crate) struct DataEnvelope<T> {
    pub(crate) data: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LaunchData {
    #[serde(default)]
    pub(crate) instance_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct TerminatePayload<'a> {
    pub(crate) instance_ids: [&'a str; 1],
}

#[derive(Debug, Serialize)]
pub(crate) struct AddKeyPayload<'a> {
    pub(crate) name: &'a str,
    pub(crate) public_key: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_data_tolerates_missing_ids() {
        let envelope: DataEnvelope<LaunchData> = serde_json::from_str(r#"{"data":{}}"#)
            .unwrap_or_else(|err| panic!("decode: {err}"));
        assert!(envelope.data.instance_ids.is_empty());
    }

    #[test]
    fn terminate_payload_wraps_single_id() {
        let json = serde_json::to_string(&TerminatePayload {
            instance_ids: ["i-123"],
        })
        .unwrap_or_else(|err| panic!("encode: {err}"));
        assert_eq!(json, r#"{"instance_ids":["i-123"]}"#);
    }
}
