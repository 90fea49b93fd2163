use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Observer-service topics the network monitor understands.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "http-on-examine-response")]
    ExamineResponse,
    #[serde(rename = "http-on-examine-cached-response")]
    ExamineCachedResponse,
    #[serde(rename = "http-on-modify-request")]
    ModifyRequest,
    #[serde(rename = "http-on-before-connect")]
    BeforeConnect,
    #[serde(rename = "http-on-stop-request")]
    StopRequest,
    #[serde(rename = "http-on-failed-opening-request")]
    FailedOpeningRequest,
    #[serde(rename = "service-worker-synthesized-response")]
    ServiceWorkerSynthesizedResponse,
    #[serde(rename = "file-channel-opened")]
    FileChannelOpened,
    #[serde(rename = "data-channel-opened")]
    DataChannelOpened,
}

impl Topic {
    pub const ALL: [Topic; 9] = [
        Topic::ExamineResponse,
        Topic::ExamineCachedResponse,
        Topic::ModifyRequest,
        Topic::BeforeConnect,
        Topic::StopRequest,
        Topic::FailedOpeningRequest,
        Topic::ServiceWorkerSynthesizedResponse,
        Topic::FileChannelOpened,
        Topic::DataChannelOpened,
    ];

    /// Topics that are also fired in content processes.
    pub const CONTENT_PROCESS: [Topic; 2] = [
        Topic::FailedOpeningRequest,
        Topic::ServiceWorkerSynthesizedResponse,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Topic::ExamineResponse => "http-on-examine-response",
            Topic::ExamineCachedResponse => "http-on-examine-cached-response",
            Topic::ModifyRequest => "http-on-modify-request",
            Topic::BeforeConnect => "http-on-before-connect",
            Topic::StopRequest => "http-on-stop-request",
            Topic::FailedOpeningRequest => "http-on-failed-opening-request",
            Topic::ServiceWorkerSynthesizedResponse => "service-worker-synthesized-response",
            Topic::FileChannelOpened => "file-channel-opened",
            Topic::DataChannelOpened => "data-channel-opened",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown topic: {0}")]
pub struct UnknownTopic(pub String);

impl FromStr for Topic {
    type Err = UnknownTopic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| UnknownTopic(s.to_owned()))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
