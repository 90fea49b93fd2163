use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use soulbrowser_core_types::{
    AuthPrompt, AuthPromptListener, AuthResponder, Channel, ChannelError, ChannelId, ChannelKind,
    ChannelStatus, OverrideContent, StreamError, StreamListener, TimedChannelInfo, UploadThrottle,
};

/// Static description of a simulated channel.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSpec {
    pub url: String,
    pub kind: ChannelKind,
    pub method: Option<String>,
    pub response_status: Option<u16>,
    pub status_text: Option<String>,
    pub content_type: Option<String>,
    pub charset: Option<String>,
    pub response_headers: BTreeMap<String, String>,
    pub request_headers: BTreeMap<String, String>,
    pub upload_body: Option<String>,
    pub preload: bool,
    pub proxied: bool,
    pub blocking_reason: u32,
    pub cancelled_by_extension: Option<String>,
    pub timed_info: Option<TimedChannelInfo>,
}

impl ChannelSpec {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// The page's own listener: keeps every byte it is handed.
#[derive(Default)]
pub struct RecordingListener {
    started: Mutex<bool>,
    bytes: Mutex<Vec<u8>>,
    stopped: Mutex<Option<ChannelStatus>>,
}

impl RecordingListener {
    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    pub fn started(&self) -> bool {
        *self.started.lock()
    }

    pub fn stopped(&self) -> Option<ChannelStatus> {
        *self.stopped.lock()
    }
}

impl StreamListener for RecordingListener {
    fn on_start_request(&self) -> Result<(), StreamError> {
        *self.started.lock() = true;
        Ok(())
    }

    fn on_data_available(&self, data: &[u8], _offset: u64) -> Result<(), StreamError> {
        self.bytes.lock().extend_from_slice(data);
        Ok(())
    }

    fn on_stop_request(&self, status: ChannelStatus) {
        *self.stopped.lock() = Some(status);
    }
}

/// How an auth prompt raised on a [`SimChannel`] was answered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedAuth {
    Forwarded,
    Credentials { username: String, password: String },
}

struct SimResponder {
    outcome: Arc<Mutex<Option<RecordedAuth>>>,
}

impl AuthResponder for SimResponder {
    fn forward(self: Box<Self>) {
        *self.outcome.lock() = Some(RecordedAuth::Forwarded);
    }

    fn provide_credentials(self: Box<Self>, username: &str, password: &str) {
        *self.outcome.lock() = Some(RecordedAuth::Credentials {
            username: username.to_owned(),
            password: password.to_owned(),
        });
    }
}

#[derive(Default)]
struct SimState {
    status: Option<ChannelStatus>,
    response_status: Option<u16>,
    cancelled: Option<ChannelStatus>,
    started: bool,
    offset: u64,
    override_content: Option<OverrideContent>,
    upload_throttle: Option<UploadThrottle>,
    auth_listener: Option<Arc<dyn AuthPromptListener>>,
}

/// Scripted channel with a real listener chain.
///
/// The chain starts with a [`RecordingListener`] standing in for the page, so
/// tests can compare what the page saw with what an observer captured.
pub struct SimChannel {
    id: ChannelId,
    spec: ChannelSpec,
    consumer: Arc<RecordingListener>,
    head: Mutex<Arc<dyn StreamListener>>,
    state: Mutex<SimState>,
}

impl SimChannel {
    pub fn new(spec: ChannelSpec) -> Arc<Self> {
        let consumer = Arc::new(RecordingListener::default());
        Arc::new(Self {
            id: ChannelId::next(),
            head: Mutex::new(consumer.clone()),
            consumer,
            state: Mutex::new(SimState {
                response_status: spec.response_status,
                ..SimState::default()
            }),
            spec,
        })
    }

    pub fn consumer(&self) -> Arc<RecordingListener> {
        self.consumer.clone()
    }

    pub fn cancelled(&self) -> Option<ChannelStatus> {
        self.state.lock().cancelled
    }

    pub fn upload_throttle(&self) -> Option<UploadThrottle> {
        self.state.lock().upload_throttle
    }

    pub fn override_content(&self) -> Option<OverrideContent> {
        self.state.lock().override_content.clone()
    }

    pub fn has_auth_listener(&self) -> bool {
        self.state.lock().auth_listener.is_some()
    }

    pub fn set_status(&self, status: ChannelStatus) {
        self.state.lock().status = Some(status);
    }

    /// Swap the visible response status, as a revalidated cache entry does.
    pub fn set_response_status(&self, status: Option<u16>) {
        self.state.lock().response_status = status;
    }

    fn listener(&self) -> Arc<dyn StreamListener> {
        self.head.lock().clone()
    }

    pub fn start(&self) -> Result<(), StreamError> {
        self.state.lock().started = true;
        self.listener().on_start_request()
    }

    pub fn data(&self, bytes: &[u8]) -> Result<(), StreamError> {
        let offset = {
            let mut state = self.state.lock();
            let offset = state.offset;
            state.offset += bytes.len() as u64;
            offset
        };
        self.listener().on_data_available(bytes, offset)
    }

    pub fn stop(&self) {
        let status = self.status();
        self.listener().on_stop_request(status);
    }

    /// Start, deliver `body` in chunks of `chunk` bytes and stop.
    pub fn respond(&self, body: &[u8], chunk: usize) -> Result<(), StreamError> {
        self.start()?;
        for piece in body.chunks(chunk.max(1)) {
            self.data(piece)?;
        }
        self.stop();
        Ok(())
    }

    /// Serve the override installed on this channel, if any.
    pub fn respond_with_override(&self) -> Result<bool, StreamError> {
        let Some(content) = self.override_content() else {
            return Ok(false);
        };
        self.respond(&content.bytes, 16 * 1024)?;
        Ok(true)
    }

    /// Raise an auth prompt and report how the registered listener answered.
    pub fn prompt_auth(&self, prompt: AuthPrompt) -> Option<RecordedAuth> {
        let listener = self.state.lock().auth_listener.clone()?;
        let outcome = Arc::new(Mutex::new(None));
        listener.on_auth_prompt(
            prompt,
            Box::new(SimResponder {
                outcome: outcome.clone(),
            }),
        );
        let answer = outcome.lock().clone();
        answer
    }
}

impl Channel for SimChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn kind(&self) -> ChannelKind {
        self.spec.kind
    }

    fn url(&self) -> String {
        self.spec.url.clone()
    }

    fn method(&self) -> String {
        self.spec.method.clone().unwrap_or_else(|| "GET".to_owned())
    }

    fn status(&self) -> ChannelStatus {
        let state = self.state.lock();
        state.cancelled.or(state.status).unwrap_or(ChannelStatus::Ok)
    }

    fn response_status(&self) -> Option<u16> {
        self.state.lock().response_status
    }

    fn response_status_text(&self) -> Option<String> {
        self.spec.status_text.clone()
    }

    fn content_type(&self) -> Option<String> {
        if let Some(content) = &self.state.lock().override_content {
            return Some(content.content_type.clone());
        }
        self.spec.content_type.clone()
    }

    fn content_charset(&self) -> Option<String> {
        self.spec.charset.clone()
    }

    fn content_length(&self) -> Option<u64> {
        self.response_header("Content-Length")
            .and_then(|value| value.trim().parse().ok())
    }

    fn request_header(&self, name: &str) -> Option<String> {
        lookup(&self.spec.request_headers, name)
    }

    fn response_header(&self, name: &str) -> Option<String> {
        if self.state.lock().override_content.is_some() {
            return None;
        }
        lookup(&self.spec.response_headers, name)
    }

    fn upload_body(&self) -> Option<Vec<u8>> {
        self.spec.upload_body.as_ref().map(|body| body.as_bytes().to_vec())
    }

    fn is_preload(&self) -> bool {
        self.spec.preload
    }

    fn is_proxied(&self) -> bool {
        self.spec.proxied
    }

    fn request_blocking_reason(&self) -> u32 {
        self.spec.blocking_reason
    }

    fn cancelled_by_extension(&self) -> Option<String> {
        self.spec.cancelled_by_extension.clone()
    }

    fn timed_info(&self) -> Option<TimedChannelInfo> {
        self.spec.timed_info
    }

    fn cancel(&self, status: ChannelStatus) {
        let mut state = self.state.lock();
        if state.cancelled.is_none() {
            state.cancelled = Some(status);
        }
    }

    fn set_new_listener(
        &self,
        listener: Arc<dyn StreamListener>,
    ) -> Result<Arc<dyn StreamListener>, ChannelError> {
        if self.state.lock().started {
            return Err(ChannelError::AlreadyOpened);
        }
        Ok(std::mem::replace(&mut *self.head.lock(), listener))
    }

    fn set_override_content(&self, content: OverrideContent) -> Result<(), ChannelError> {
        if self.spec.kind != ChannelKind::Http {
            return Err(ChannelError::Unsupported(self.spec.kind));
        }
        let mut state = self.state.lock();
        if state.started {
            return Err(ChannelError::AlreadyOpened);
        }
        state.override_content = Some(content);
        Ok(())
    }

    fn set_upload_throttle(&self, throttle: UploadThrottle) {
        self.state.lock().upload_throttle = Some(throttle);
    }

    fn set_auth_prompt_listener(&self, listener: Arc<dyn AuthPromptListener>) {
        self.state.lock().auth_listener = Some(listener);
    }
}

fn lookup(headers: &BTreeMap<String, String>, name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use soulbrowser_core_types::ChannelRef;

    #[test]
    fn chain_replacement_returns_previous_head() {
        let channel = SimChannel::new(ChannelSpec::new("https://a.test/"));
        let extra = Arc::new(RecordingListener::default());
        let previous = channel.set_new_listener(extra.clone()).unwrap();
        channel.respond(b"abc", 2).unwrap();
        assert_eq!(extra.bytes(), b"abc");
        assert!(channel.consumer().bytes().is_empty());
        previous.on_data_available(b"x", 0).unwrap();
        assert_eq!(channel.consumer().bytes(), b"x");
    }

    #[test]
    fn listener_cannot_be_replaced_after_start() {
        let channel = SimChannel::new(ChannelSpec::new("https://a.test/"));
        channel.start().unwrap();
        let err = channel
            .set_new_listener(Arc::new(RecordingListener::default()))
            .err();
        assert_eq!(err, Some(ChannelError::AlreadyOpened));
    }

    #[test]
    fn cancel_sticks_to_the_first_status() {
        let channel = SimChannel::new(ChannelSpec::new("https://a.test/"));
        let as_ref: ChannelRef = channel.clone();
        as_ref.cancel(ChannelStatus::BindingAborted);
        as_ref.cancel(ChannelStatus::NetReset);
        assert_eq!(as_ref.status(), ChannelStatus::BindingAborted);
        assert_eq!(channel.cancelled(), Some(ChannelStatus::BindingAborted));
    }

    #[test]
    fn headers_are_case_insensitive() {
        let mut spec = ChannelSpec::new("https://a.test/");
        spec.response_headers
            .insert("Server-Timing".into(), "db;dur=1".into());
        let channel = SimChannel::new(spec);
        assert_eq!(
            channel.response_header("server-timing").as_deref(),
            Some("db;dur=1")
        );
    }

    #[test]
    fn spec_deserializes_from_partial_yaml_like_json() {
        let spec: ChannelSpec =
            serde_json::from_str(r#"{"url": "file:///tmp/a.txt", "kind": "file"}"#).unwrap();
        assert_eq!(spec.kind, ChannelKind::File);
        assert!(spec.response_headers.is_empty());
    }
}
