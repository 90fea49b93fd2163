use std::sync::Arc;

use soulbrowser_core_types::{AuthPrompt, AuthPromptListener, AuthResponder, ChannelId};
use tracing::debug;

use crate::owner::NetworkEventOwner;

/// Routes a channel's authentication prompts to the request's owner.
pub struct NetworkAuthListener {
    channel: ChannelId,
    owner: Arc<dyn NetworkEventOwner>,
}

impl NetworkAuthListener {
    pub fn new(channel: ChannelId, owner: Arc<dyn NetworkEventOwner>) -> Arc<Self> {
        Arc::new(Self { channel, owner })
    }
}

impl AuthPromptListener for NetworkAuthListener {
    fn on_auth_prompt(&self, prompt: AuthPrompt, responder: Box<dyn AuthResponder>) {
        debug!(
            target: "network-observer",
            channel = %self.channel,
            realm = %prompt.realm,
            proxy = prompt.is_proxy,
            "auth prompt"
        );
        self.owner.on_auth_prompt(prompt, responder);
    }
}
