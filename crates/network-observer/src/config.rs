use network_throttle::ThrottleData;
use serde::{Deserialize, Serialize};

pub const DEFAULT_RESPONSE_BODY_LIMIT: u64 = 1_048_576;
pub const DEFAULT_REQUEST_BODY_LIMIT: u64 = 1_048_576;

/// Which process the observer lives in. Content processes only see a subset of
/// the topics.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    #[default]
    Parent,
    Content,
}

/// Body capture and throttling settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    pub decode_response_bodies: bool,
    /// Bytes of response body kept per request, 0 for unlimited.
    pub response_body_limit: u64,
    /// Characters of request body reported per request, 0 for unlimited.
    pub request_body_limit: u64,
    pub save_request_and_response_bodies: bool,
    pub auth_prompt_listener: bool,
    pub process: ProcessKind,
    pub throttle: Option<ThrottleData>,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            decode_response_bodies: true,
            response_body_limit: DEFAULT_RESPONSE_BODY_LIMIT,
            request_body_limit: DEFAULT_REQUEST_BODY_LIMIT,
            save_request_and_response_bodies: true,
            auth_prompt_listener: false,
            process: ProcessKind::Parent,
            throttle: None,
        }
    }
}
