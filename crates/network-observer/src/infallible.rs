use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

use crate::error::ObserverError;

/// Run a platform notification handler so that neither an error nor a panic
/// escapes into the notification loop.
///
/// Activity distribution is one broadcast shared by every observer, so a
/// failure here is logged and the notification is dropped.
pub fn isolate<F>(handler: &'static str, f: F)
where
    F: FnOnce() -> Result<(), ObserverError>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            error!(target: "network-observer", handler, error = %err, "handler failed");
        }
        Err(payload) => {
            error!(
                target: "network-observer",
                handler,
                panic = %panic_message(payload.as_ref()),
                "handler panicked"
            );
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
