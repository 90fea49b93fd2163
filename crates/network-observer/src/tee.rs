use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use soulbrowser_core_types::{ChannelStatus, StreamError, StreamListener};
use tracing::warn;

use crate::infallible::panic_message;

/// Duplicates a response stream into a capture sink.
///
/// The original listener always goes first, receives every byte unmodified and
/// alone decides the result returned to the channel. Whatever the sink does,
/// including panicking, never reaches the original.
pub struct TeeListener {
    original: OnceCell<Arc<dyn StreamListener>>,
    sink: Arc<dyn StreamListener>,
}

impl TeeListener {
    pub fn new(sink: Arc<dyn StreamListener>) -> Arc<Self> {
        Arc::new(Self {
            original: OnceCell::new(),
            sink,
        })
    }

    pub fn set_original_listener(&self, original: Arc<dyn StreamListener>) {
        if self.original.set(original).is_err() {
            warn!(target: "network-observer", "tee already has an original listener");
        }
    }

    fn to_sink<F>(&self, callback: &'static str, f: F)
    where
        F: FnOnce(&dyn StreamListener) -> Result<(), StreamError>,
    {
        match catch_unwind(AssertUnwindSafe(|| f(self.sink.as_ref()))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(target: "network-observer", callback, error = %err, "capture sink failed");
            }
            Err(payload) => {
                warn!(
                    target: "network-observer",
                    callback,
                    panic = %panic_message(payload.as_ref()),
                    "capture sink panicked"
                );
            }
        }
    }
}

impl StreamListener for TeeListener {
    fn on_start_request(&self) -> Result<(), StreamError> {
        let result = match self.original.get() {
            Some(original) => original.on_start_request(),
            None => Ok(()),
        };
        self.to_sink("on_start_request", |sink| sink.on_start_request());
        result
    }

    fn on_data_available(&self, data: &[u8], offset: u64) -> Result<(), StreamError> {
        let result = match self.original.get() {
            Some(original) => original.on_data_available(data, offset),
            None => Ok(()),
        };
        self.to_sink("on_data_available", |sink| sink.on_data_available(data, offset));
        result
    }

    fn on_stop_request(&self, status: ChannelStatus) {
        if let Some(original) = self.original.get() {
            original.on_stop_request(status);
        }
        self.to_sink("on_stop_request", |sink| {
            sink.on_stop_request(status);
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect {
        bytes: Mutex<Vec<u8>>,
        stopped: Mutex<bool>,
    }

    impl StreamListener for Collect {
        fn on_start_request(&self) -> Result<(), StreamError> {
            Ok(())
        }

        fn on_data_available(&self, data: &[u8], _offset: u64) -> Result<(), StreamError> {
            self.bytes.lock().extend_from_slice(data);
            Ok(())
        }

        fn on_stop_request(&self, _status: ChannelStatus) {
            *self.stopped.lock() = true;
        }
    }

    struct Explodes;

    impl StreamListener for Explodes {
        fn on_start_request(&self) -> Result<(), StreamError> {
            Err(StreamError::Io("sink refused".into()))
        }

        fn on_data_available(&self, _data: &[u8], _offset: u64) -> Result<(), StreamError> {
            panic!("sink exploded");
        }

        fn on_stop_request(&self, _status: ChannelStatus) {
            panic!("sink exploded again");
        }
    }

    #[test]
    fn failing_sink_never_reaches_original() {
        let original = Arc::new(Collect::default());
        let tee = TeeListener::new(Arc::new(Explodes));
        tee.set_original_listener(original.clone());

        assert!(tee.on_start_request().is_ok());
        assert!(tee.on_data_available(b"hello", 0).is_ok());
        assert!(tee.on_data_available(b" world", 5).is_ok());
        tee.on_stop_request(ChannelStatus::Ok);

        assert_eq!(original.bytes.lock().as_slice(), b"hello world");
        assert!(*original.stopped.lock());
    }

    #[test]
    fn original_errors_are_returned_and_sink_still_sees_data() {
        struct Rejects;
        impl StreamListener for Rejects {
            fn on_start_request(&self) -> Result<(), StreamError> {
                Ok(())
            }
            fn on_data_available(&self, _data: &[u8], _offset: u64) -> Result<(), StreamError> {
                Err(StreamError::Cancelled(ChannelStatus::BindingAborted))
            }
            fn on_stop_request(&self, _status: ChannelStatus) {}
        }

        let sink = Arc::new(Collect::default());
        let tee = TeeListener::new(sink.clone());
        tee.set_original_listener(Arc::new(Rejects));
        assert_eq!(
            tee.on_data_available(b"abc", 0),
            Err(StreamError::Cancelled(ChannelStatus::BindingAborted))
        );
        assert_eq!(sink.bytes.lock().as_slice(), b"abc");
    }
}
