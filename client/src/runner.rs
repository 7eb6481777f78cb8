use async_trait::async_trait;

use crate::{Channel, ChannelError};

/// Something that executes backend shell commands and returns their output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run_command(&self, command: String) -> Result<String, ChannelError>;
}

#[async_trait]
impl CommandRunner for Channel {
    async fn run_command(&self, command: String) -> Result<String, ChannelError> {
        self.run(command).await
    }
}
