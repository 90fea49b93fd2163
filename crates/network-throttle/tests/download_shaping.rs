use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use network_throttle::{ThrottleData, ThrottleManager};
use parking_lot::Mutex;
use soulbrowser_core_types::{
    ActivitySubtype, Channel, ChannelError, ChannelId, ChannelRef, ChannelStatus, OverrideContent,
    StreamError, StreamListener, UploadThrottle,
};

#[derive(Default)]
struct Recorder {
    bytes: Mutex<Vec<u8>>,
    offsets: Mutex<Vec<u64>>,
    stopped: Mutex<Option<ChannelStatus>>,
}

impl StreamListener for Recorder {
    fn on_start_request(&self) -> Result<(), StreamError> {
        Ok(())
    }

    fn on_data_available(&self, data: &[u8], offset: u64) -> Result<(), StreamError> {
        self.bytes.lock().extend_from_slice(data);
        self.offsets.lock().push(offset);
        Ok(())
    }

    fn on_stop_request(&self, status: ChannelStatus) {
        *self.stopped.lock() = Some(status);
    }
}

struct PanickingListener;

impl StreamListener for PanickingListener {
    fn on_start_request(&self) -> Result<(), StreamError> {
        Ok(())
    }

    fn on_data_available(&self, _data: &[u8], _offset: u64) -> Result<(), StreamError> {
        panic!("page listener failed");
    }

    fn on_stop_request(&self, _status: ChannelStatus) {}
}

struct StubChannel {
    id: ChannelId,
    listener: Mutex<Arc<dyn StreamListener>>,
    upload: Mutex<Option<UploadThrottle>>,
}

impl StubChannel {
    fn new(listener: Arc<dyn StreamListener>) -> Arc<Self> {
        Arc::new(Self {
            id: ChannelId::next(),
            listener: Mutex::new(listener),
            upload: Mutex::new(None),
        })
    }

    fn head(&self) -> Arc<dyn StreamListener> {
        self.listener.lock().clone()
    }
}

impl Channel for StubChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn url(&self) -> String {
        "https://example.com/big.bin".to_owned()
    }

    fn status(&self) -> ChannelStatus {
        ChannelStatus::Ok
    }

    fn response_status(&self) -> Option<u16> {
        Some(200)
    }

    fn content_type(&self) -> Option<String> {
        None
    }

    fn content_charset(&self) -> Option<String> {
        None
    }

    fn response_header(&self, _name: &str) -> Option<String> {
        None
    }

    fn cancel(&self, _status: ChannelStatus) {}

    fn set_new_listener(
        &self,
        listener: Arc<dyn StreamListener>,
    ) -> Result<Arc<dyn StreamListener>, ChannelError> {
        Ok(std::mem::replace(&mut *self.listener.lock(), listener))
    }

    fn set_override_content(&self, _content: OverrideContent) -> Result<(), ChannelError> {
        Err(ChannelError::Other("not supported".into()))
    }

    fn set_upload_throttle(&self, throttle: UploadThrottle) {
        *self.upload.lock() = Some(throttle);
    }
}

fn four_bytes_per_second() -> ThrottleManager {
    ThrottleManager::new(ThrottleData {
        download_bps_mean: 4,
        download_bps_max: 4,
        ..Default::default()
    })
    .unwrap()
}

#[test]
fn bytes_are_released_at_the_configured_rate() {
    let manager = four_bytes_per_second();
    let recorder = Arc::new(Recorder::default());
    let stub = StubChannel::new(recorder.clone());
    let channel: ChannelRef = stub.clone();

    let throttle = manager.manage(&channel).unwrap().expect("throttled");
    let head = stub.head();
    head.on_start_request().unwrap();
    head.on_data_available(b"0123456789", 0).unwrap();

    assert_eq!(recorder.bytes.lock().as_slice(), b"0123");
    assert_eq!(throttle.buffered_bytes(), 6);

    let start = Instant::now();
    manager.pump(start + Duration::from_millis(1100));
    assert_eq!(recorder.bytes.lock().as_slice(), b"01234567");

    head.on_stop_request(ChannelStatus::Ok);
    assert!(recorder.stopped.lock().is_none(), "stop waits for the buffer");

    manager.pump(start + Duration::from_millis(2200));
    assert_eq!(recorder.bytes.lock().as_slice(), b"0123456789");
    assert_eq!(recorder.offsets.lock().as_slice(), &[0, 4, 8]);
    assert_eq!(*recorder.stopped.lock(), Some(ChannelStatus::Ok));
    assert!(manager.download_queue().unwrap().is_idle());
}

#[test]
fn deferred_activity_fires_once_after_release() {
    let manager = four_bytes_per_second();
    let recorder = Arc::new(Recorder::default());
    let stub = StubChannel::new(recorder.clone());
    let channel: ChannelRef = stub.clone();
    let throttle = manager.manage(&channel).unwrap().expect("throttled");

    let fired = Arc::new(Mutex::new(Vec::new()));
    for subtype in [
        ActivitySubtype::ResponseStart,
        ActivitySubtype::ResponseComplete,
    ] {
        let fired = fired.clone();
        throttle.add_activity_callback(
            subtype,
            Box::new(move |timestamp| fired.lock().push((subtype, timestamp))),
        );
    }
    assert!(fired.lock().is_empty());

    let head = stub.head();
    head.on_start_request().unwrap();
    head.on_data_available(b"012345", 0).unwrap();
    head.on_stop_request(ChannelStatus::Ok);
    let seen: Vec<_> = fired.lock().iter().map(|(subtype, _)| *subtype).collect();
    assert_eq!(seen, vec![ActivitySubtype::ResponseStart]);

    let start = Instant::now();
    manager.pump(start + Duration::from_millis(1100));
    manager.pump(start + Duration::from_millis(2200));
    let seen: Vec<_> = fired.lock().iter().map(|(subtype, _)| *subtype).collect();
    assert_eq!(
        seen,
        vec![ActivitySubtype::ResponseStart, ActivitySubtype::ResponseComplete]
    );
    assert!(fired.lock().iter().all(|(_, timestamp)| *timestamp > 0));
}

#[test]
fn empty_response_forwards_stop_immediately() {
    let manager = four_bytes_per_second();
    let recorder = Arc::new(Recorder::default());
    let stub = StubChannel::new(recorder.clone());
    let channel: ChannelRef = stub.clone();
    let throttle = manager.manage(&channel).unwrap().expect("throttled");

    let closed = Arc::new(Mutex::new(0));
    let counter = closed.clone();
    throttle.add_activity_callback(
        ActivitySubtype::TransactionClose,
        Box::new(move |_| *counter.lock() += 1),
    );

    let head = stub.head();
    head.on_start_request().unwrap();
    head.on_stop_request(ChannelStatus::BindingAborted);
    assert_eq!(*recorder.stopped.lock(), Some(ChannelStatus::BindingAborted));
    assert_eq!(*closed.lock(), 1);
}

#[test]
fn upload_throttle_is_handed_to_the_channel() {
    let manager = ThrottleManager::new(ThrottleData {
        upload_bps_mean: 100,
        upload_bps_max: 200,
        ..Default::default()
    })
    .unwrap();
    let stub = StubChannel::new(Arc::new(Recorder::default()));
    let channel: ChannelRef = stub.clone();

    assert!(manager.manage(&channel).unwrap().is_none());
    manager.manage_upload(&channel);
    assert_eq!(
        *stub.upload.lock(),
        Some(UploadThrottle {
            mean_bps: 100,
            max_bps: 200
        })
    );
}

#[test]
fn a_panicking_listener_does_not_stall_the_queue() {
    let manager = four_bytes_per_second();

    let broken = StubChannel::new(Arc::new(PanickingListener));
    let broken_ref: ChannelRef = broken.clone();
    manager.manage(&broken_ref).unwrap().expect("throttled");
    let broken_head = broken.head();
    broken_head.on_start_request().unwrap();
    let result = catch_unwind(AssertUnwindSafe(|| broken_head.on_data_available(b"ab", 0)));
    assert!(result.is_err());

    let recorder = Arc::new(Recorder::default());
    let healthy = StubChannel::new(recorder.clone());
    let healthy_ref: ChannelRef = healthy.clone();
    manager.manage(&healthy_ref).unwrap().expect("throttled");
    let head = healthy.head();
    head.on_start_request().unwrap();
    head.on_data_available(b"0123456789", 0).unwrap();
    assert_eq!(recorder.bytes.lock().as_slice(), b"0123");
}
