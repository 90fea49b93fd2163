//! Capture side of the response tee.

use std::io::Read;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use encoding_rs::{Encoding, UTF_8};
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use parking_lot::Mutex;
use soulbrowser_core_types::{ChannelRef, ChannelStatus, StreamError, StreamListener};
use tracing::debug;

use crate::activity::HttpActivity;
use crate::blocking::BlockedReasonResolver;
use crate::owner::{ResponseContent, ResponseContentInfo};

const CONTENT_ENCODING_HEADER: &str = "Content-Encoding";

/// Capture settings, snapshotted when the listener is installed.
#[derive(Clone, Copy, Debug)]
pub struct CaptureSettings {
    pub decode_response_bodies: bool,
    /// Bytes kept, 0 for unlimited.
    pub response_body_limit: u64,
}

#[derive(Default)]
struct CaptureState {
    captured: Vec<u8>,
    received: u64,
    truncated: bool,
    finished: bool,
}

/// Accumulates a bounded copy of the response body and reports it to the
/// request's owner when the stream stops.
pub struct NetworkResponseListener {
    activity: Arc<Mutex<HttpActivity>>,
    channel: ChannelRef,
    settings: CaptureSettings,
    resolver: Arc<dyn BlockedReasonResolver>,
    state: Mutex<CaptureState>,
}

impl NetworkResponseListener {
    pub fn new(
        activity: Arc<Mutex<HttpActivity>>,
        settings: CaptureSettings,
        resolver: Arc<dyn BlockedReasonResolver>,
    ) -> Arc<Self> {
        let channel = activity.lock().channel.clone();
        Arc::new(Self {
            activity,
            channel,
            settings,
            resolver,
            state: Mutex::new(CaptureState::default()),
        })
    }

    fn limit(&self) -> Option<usize> {
        (self.settings.response_body_limit > 0).then_some(self.settings.response_body_limit as usize)
    }
}

impl StreamListener for NetworkResponseListener {
    fn on_start_request(&self) -> Result<(), StreamError> {
        Ok(())
    }

    fn on_data_available(&self, data: &[u8], _offset: u64) -> Result<(), StreamError> {
        let discard = {
            let mut activity = self.activity.lock();
            activity.body_size += data.len() as u64;
            activity.discard_response_body
        };

        let mut state = self.state.lock();
        state.received += data.len() as u64;
        if discard {
            return Ok(());
        }
        let room = match self.limit() {
            Some(limit) => limit.saturating_sub(state.captured.len()),
            None => data.len(),
        };
        let take = room.min(data.len());
        state.captured.extend_from_slice(&data[..take]);
        if take < data.len() {
            state.truncated = true;
        }
        Ok(())
    }

    fn on_stop_request(&self, _status: ChannelStatus) {
        let (captured, received, mut truncated) = {
            let mut state = self.state.lock();
            if state.finished {
                return;
            }
            state.finished = true;
            (
                std::mem::take(&mut state.captured),
                state.received,
                state.truncated,
            )
        };

        let (owner, discard, from_cache, response_status, headers_size, charset) = {
            let activity = self.activity.lock();
            (
                activity.owner.clone(),
                activity.discard_response_body,
                activity.from_cache,
                activity.response_status,
                activity.headers_size,
                activity.charset.clone(),
            )
        };
        let Some(owner) = owner else {
            debug!(target: "network-observer", channel = %self.channel.id(), "response finished without an owner");
            return;
        };

        let charset = self
            .channel
            .content_charset()
            .filter(|charset| !charset.is_empty())
            .unwrap_or(charset);
        let mut mime_type = self.channel.content_type().unwrap_or_default();
        let body_size = captured.len() as u64;

        let mut body = captured;
        if self.settings.decode_response_bodies && !discard {
            if let Some(encodings) = self.channel.response_header(CONTENT_ENCODING_HEADER) {
                body = decode_content(&encodings, body, self.limit());
            }
            if let Some(limit) = self.limit() {
                if body.len() > limit {
                    body.truncate(limit);
                    truncated = true;
                }
            }
        }

        let size = body.len() as u64;
        let (text, encoding) = if discard {
            (String::new(), None)
        } else if !mime_type.is_empty() && is_text_mime(&mime_type) {
            (decode_text(&body, &charset), None)
        } else {
            (STANDARD.encode(&body), Some("base64".to_owned()))
        };
        if !mime_type.is_empty() && !charset.is_empty() {
            mime_type.push_str("; charset=");
            mime_type.push_str(&charset);
        }

        let blocked = self.resolver.blocked_reason(&self.channel, from_cache);
        owner.add_response_content(
            ResponseContent {
                mime_type,
                text,
                size,
                body_size,
                transferred_size: received + headers_size,
                encoding,
                response_status,
            },
            ResponseContentInfo {
                discard_response_body: discard,
                truncated,
                blocked_reason: blocked.blocked_reason,
                blocking_extension: blocked.blocking_extension,
            },
        );
    }
}

pub fn is_text_mime(mime: &str) -> bool {
    let lower = mime.to_ascii_lowercase();
    lower.starts_with("text/")
        || lower.contains("json")
        || lower.contains("javascript")
        || lower.contains("ecmascript")
        || lower.contains("xml")
        || lower.contains("csv")
        || lower.contains("html")
}

pub(crate) fn decode_text(bytes: &[u8], charset: &str) -> String {
    let encoding = Encoding::for_label(charset.as_bytes()).unwrap_or(UTF_8);
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

/// Undo every listed content coding, last applied first. Unknown codings stop
/// decoding and leave the body as it is.
///
/// With a limit, each decoder stops after `limit + 1` bytes so the caller can
/// tell a truncated body from one that fits exactly.
pub fn decode_content(encodings: &str, body: Vec<u8>, limit: Option<usize>) -> Vec<u8> {
    let cap = limit.map_or(u64::MAX, |limit| limit as u64 + 1);
    let mut body = body;
    for coding in encodings.rsplit(',').map(str::trim).filter(|c| !c.is_empty()) {
        match decode_one(&coding.to_ascii_lowercase(), &body, cap) {
            Some(decoded) => body = decoded,
            None => break,
        }
    }
    body
}

fn decode_one(coding: &str, body: &[u8], cap: u64) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    let result = match coding {
        "identity" => return Some(body.to_vec()),
        "gzip" | "x-gzip" => GzDecoder::new(body).take(cap).read_to_end(&mut out),
        "br" => brotli::Decompressor::new(body, 4096)
            .take(cap)
            .read_to_end(&mut out),
        "deflate" => {
            // Servers disagree on whether deflate carries the zlib wrapper.
            let zlib = ZlibDecoder::new(body).take(cap).read_to_end(&mut out);
            if zlib.is_err() && out.is_empty() {
                DeflateDecoder::new(body).take(cap).read_to_end(&mut out)
            } else {
                zlib
            }
        }
        other => {
            debug!(target: "network-observer", coding = other, "unsupported content coding");
            return None;
        }
    };
    match result {
        Ok(_) => Some(out),
        // Truncated captures still decode a usable prefix.
        Err(err) if !out.is_empty() => {
            debug!(target: "network-observer", coding, error = %err, "partial decode");
            Some(out)
        }
        Err(err) => {
            debug!(target: "network-observer", coding, error = %err, "decode failed");
            None
        }
    }
}
