use serde::{Deserialize, Serialize};

/// Details of an HTTP authentication challenge raised for a channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPrompt {
    pub realm: String,
    pub scheme: String,
    pub host: String,
    pub is_proxy: bool,
}

/// One-shot answer to an [`AuthPrompt`].
pub trait AuthResponder: Send {
    /// Let the platform show its regular prompt.
    fn forward(self: Box<Self>);

    fn provide_credentials(self: Box<Self>, username: &str, password: &str);
}

pub trait AuthPromptListener: Send + Sync {
    fn on_auth_prompt(&self, prompt: AuthPrompt, responder: Box<dyn AuthResponder>);
}
