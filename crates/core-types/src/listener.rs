use thiserror::Error;

use crate::status::ChannelStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("stream cancelled: {0}")]
    Cancelled(ChannelStatus),
    #[error("stream i/o failure: {0}")]
    Io(String),
}

/// Receiver of a channel's response bytes.
///
/// Channels keep a chain of these; [`crate::Channel::set_new_listener`] lets an
/// observer splice itself in front of the current head of the chain.
pub trait StreamListener: Send + Sync {
    fn on_start_request(&self) -> Result<(), StreamError>;

    fn on_data_available(&self, data: &[u8], offset: u64) -> Result<(), StreamError>;

    fn on_stop_request(&self, status: ChannelStatus);
}
