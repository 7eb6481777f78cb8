use std::sync::Arc;

use crate::{
    config::ClientConfig,
    explorer::{Explorer, Prompter},
    Channel, ChannelError,
};

/// The shared state a front end needs, built once at startup and passed
/// around by reference.
pub struct AppContext {
    config: ClientConfig,
    channel: Arc<Channel>,
    explorer: Explorer,
}

impl AppContext {
    pub fn connect(config: ClientConfig, prompter: Arc<dyn Prompter>) -> Result<Self, ChannelError> {
        let channel = Arc::new(Channel::connect(
            &config.url,
            config.client_id(),
            config.reconnect.policy(),
        )?);
        let explorer = Explorer::new(&config.root, channel.clone(), prompter);
        Ok(Self {
            config,
            channel,
            explorer,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    pub fn explorer(&self) -> &Explorer {
        &self.explorer
    }

    pub async fn shutdown(&self) {
        self.channel.shutdown().await;
    }
}
