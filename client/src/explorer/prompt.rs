use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub title: String,
    pub message: String,
}

impl Prompt {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn delete(path: &str) -> Self {
        Self::new(
            "Delete",
            format!("Are you sure you want to delete '{}'?", path),
        )
    }

    pub fn overwrite(path: &str) -> Self {
        Self::new("Overwrite", format!("'{}' already exists. Overwrite?", path))
    }

    pub fn conflict(path: &str) -> Self {
        Self::new(
            "Error",
            format!("File or folder '{}' already exists.", path),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Cancelled,
}

/// Asks the user things. Implemented by whatever front end drives the explorer.
#[async_trait]
pub trait Prompter: Send + Sync {
    async fn confirm(&self, prompt: Prompt) -> Confirmation;

    async fn alert(&self, prompt: Prompt);
}

/// Answers every confirmation the same way and logs alerts.
pub struct AutoPrompter(pub Confirmation);

#[async_trait]
impl Prompter for AutoPrompter {
    async fn confirm(&self, prompt: Prompt) -> Confirmation {
        log::debug!("Answering '{}' with {:?}", prompt.message, self.0);
        self.0
    }

    async fn alert(&self, prompt: Prompt) {
        log::warn!("{}: {}", prompt.title, prompt.message);
    }
}
