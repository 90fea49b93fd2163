//! Request blocking: the user's URL blocklist and the classification of
//! requests the platform itself refused.

use std::fmt;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use soulbrowser_core_types::{ChannelRef, ChannelStatus};

use crate::error::ObserverError;

/// Why a request never produced a regular response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockedReason {
    /// Matched the user's blocklist; serialized as `"devtools"`.
    DevTools,
    /// Platform blocking reason code.
    Platform(u32),
    /// Name of the failure status, e.g. `NS_ERROR_UNKNOWN_HOST`.
    Error(String),
}

impl fmt::Display for BlockedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockedReason::DevTools => f.write_str("devtools"),
            BlockedReason::Platform(code) => write!(f, "{code}"),
            BlockedReason::Error(name) => f.write_str(name),
        }
    }
}

impl Serialize for BlockedReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            BlockedReason::DevTools => serializer.serialize_str("devtools"),
            BlockedReason::Platform(code) => serializer.serialize_u32(*code),
            BlockedReason::Error(name) => serializer.serialize_str(name),
        }
    }
}

impl<'de> Deserialize<'de> for BlockedReason {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Code(u32),
            Name(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Code(code) => BlockedReason::Platform(code),
            Raw::Name(name) if name == "devtools" => BlockedReason::DevTools,
            Raw::Name(name) => BlockedReason::Error(name),
        })
    }
}

/// Outcome of inspecting a finished or failed channel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockedInfo {
    pub blocked_reason: Option<BlockedReason>,
    pub blocking_extension: Option<String>,
}

impl BlockedInfo {
    pub fn is_blocked(&self) -> bool {
        self.blocked_reason.is_some()
    }
}

/// Derives why a channel was blocked, if it was.
pub trait BlockedReasonResolver: Send + Sync {
    fn blocked_reason(&self, channel: &ChannelRef, from_cache: bool) -> BlockedInfo;
}

/// Statuses the network stack reports for requests that are displayed with a
/// regular status code instead of as failures.
const IGNORED_FAILURES: &[ChannelStatus] = &[
    ChannelStatus::ParsedDataCached,
    ChannelStatus::ImagelibFailure,
    ChannelStatus::BindingRedirected,
    ChannelStatus::ErrorAbort,
];

/// Default resolver: the channel's own blocking reason and extension, else the
/// name of its failure status.
#[derive(Clone, Copy, Debug, Default)]
pub struct NetworkBlockedReasons;

impl BlockedReasonResolver for NetworkBlockedReasons {
    fn blocked_reason(&self, channel: &ChannelRef, from_cache: bool) -> BlockedInfo {
        let code = channel.request_blocking_reason();
        let blocking_extension = channel.cancelled_by_extension();
        if code != 0 {
            return BlockedInfo {
                blocked_reason: Some(BlockedReason::Platform(code)),
                blocking_extension,
            };
        }

        let status = channel.status();
        // Aborted cache hits are not failures.
        let ignored = IGNORED_FAILURES.contains(&status)
            || (from_cache && status == ChannelStatus::BindingAborted);
        let blocked_reason = if ignored {
            None
        } else {
            status
                .error_name()
                .map(|name| BlockedReason::Error(name.into_owned()))
        };
        BlockedInfo {
            blocked_reason,
            blocking_extension,
        }
    }
}

/// A URL pattern as handed over by the network panel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockFilter {
    pub url: String,
}

impl BlockFilter {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Wildcard URL patterns, in insertion order.
#[derive(Debug, Default)]
pub struct BlockList {
    entries: Vec<(String, Regex)>,
}

impl BlockList {
    pub fn insert(&mut self, pattern: &str) -> Result<(), ObserverError> {
        if self.entries.iter().any(|(existing, _)| existing == pattern) {
            return Ok(());
        }
        let regex = wildcard_regex(pattern)?;
        self.entries.push((pattern.to_owned(), regex));
        Ok(())
    }

    pub fn remove(&mut self, pattern: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| existing != pattern);
        self.entries.len() != before
    }

    pub fn replace(&mut self, patterns: &[String]) -> Result<(), ObserverError> {
        let mut next = BlockList::default();
        for pattern in patterns {
            next.insert(pattern)?;
        }
        *self = next;
        Ok(())
    }

    pub fn patterns(&self) -> Vec<String> {
        self.entries.iter().map(|(pattern, _)| pattern.clone()).collect()
    }

    pub fn matches(&self, url: &str) -> bool {
        self.entries.iter().any(|(_, regex)| regex.is_match(url))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `*` matches any run of characters, everything else is literal. The result
/// is unanchored and case-insensitive.
fn wildcard_regex(pattern: &str) -> Result<Regex, ObserverError> {
    let source = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    RegexBuilder::new(&source)
        .case_insensitive(true)
        .build()
        .map_err(|source| ObserverError::InvalidPattern {
            pattern: pattern.to_owned(),
            source,
        })
}
