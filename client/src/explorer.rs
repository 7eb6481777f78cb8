//! File tree operations that talk to the backend. Every operation is split
//! into synchronous store mutations and awaits on the backend, the store
//! lock is never held across an await.

mod prompt;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use wss_protocol::command;

use crate::{
    tree::{
        parse_listing,
        path::{self, normalize},
        Entry, ListingEntry, LoadTicket, RefreshMode, TreeError, TreeEvent, TreeStore,
    },
    ChannelError, CommandRunner,
};

pub use prompt::{AutoPrompter, Confirmation, Prompt, Prompter};

#[derive(thiserror::Error, Debug)]
pub enum ExplorerError {
    #[error(transparent)]
    Channel(ChannelError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("'{command}' failed: {output}")]
    Command { command: String, output: String },
    #[error("could not parse the listing of '{path}': {source}")]
    Listing {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type ExplorerResult<T> = Result<T, ExplorerError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(String),
    Conflict(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameOutcome {
    Renamed(String),
    Unchanged,
    Conflict(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved(String),
    Unchanged,
    Rejected(TreeError),
    Conflict(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(String),
    Cancelled,
}

/// A placeholder waiting for a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCreate {
    parent: String,
    placeholder: String,
}

impl PendingCreate {
    pub fn parent(&self) -> &str {
        &self.parent
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }
}

/// Gives the loading slot back when an expand fails or is dropped before
/// its listing arrives.
struct PendingLoad<'a> {
    explorer: &'a Explorer,
    ticket: Option<LoadTicket>,
}

impl PendingLoad<'_> {
    fn finish(mut self, listing: Vec<ListingEntry>) -> bool {
        match self.ticket.take() {
            Some(ticket) => self.explorer.store().finish_expand(ticket, listing),
            None => false,
        }
    }
}

impl Drop for PendingLoad<'_> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            log::debug!("Expanding '{}' did not finish", ticket.path());
            self.explorer.store().abort_load(ticket);
        }
    }
}

pub struct Explorer {
    runner: Arc<dyn CommandRunner>,
    prompter: Arc<dyn Prompter>,
    store: Mutex<TreeStore>,
}

impl Explorer {
    pub fn new(root: &str, runner: Arc<dyn CommandRunner>, prompter: Arc<dyn Prompter>) -> Self {
        Self {
            runner,
            prompter,
            store: Mutex::new(TreeStore::new(root)),
        }
    }

    fn store(&self) -> MutexGuard<'_, TreeStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TreeEvent> {
        self.store().subscribe()
    }

    pub fn snapshot(&self) -> Vec<Entry> {
        self.store().entries().to_vec()
    }

    pub fn get(&self, path: &str) -> Option<Entry> {
        self.store().get(path).cloned()
    }

    /// Read access to the store.
    pub fn with_store<R>(&self, f: impl FnOnce(&TreeStore) -> R) -> R {
        f(&self.store())
    }

    async fn run(&self, cmd: String) -> ExplorerResult<String> {
        match self.runner.run_command(cmd.clone()).await {
            Ok(output) => Ok(output),
            Err(ChannelError::Command(output)) => Err(ExplorerError::Command {
                command: cmd,
                output,
            }),
            Err(e) => Err(ExplorerError::Channel(e)),
        }
    }

    /// Runs a command that prints nothing when it succeeds.
    async fn run_silent(&self, cmd: String) -> ExplorerResult<()> {
        let output = self.run(cmd.clone()).await?;
        if output.trim().is_empty() {
            Ok(())
        } else {
            log::error!("'{}' failed: {}", cmd, output.trim());
            Err(ExplorerError::Command {
                command: cmd,
                output,
            })
        }
    }

    async fn list(&self, dir: &str) -> ExplorerResult<Vec<ListingEntry>> {
        let output = self.run(command::list_dir(dir)).await?;
        parse_listing(&output).map_err(|source| ExplorerError::Listing {
            path: dir.to_string(),
            source,
        })
    }

    async fn exists(&self, path: &str) -> ExplorerResult<bool> {
        let cmd = command::path_exists(path);
        let output = self.run(cmd.clone()).await?;
        command::parse_exists(&output).ok_or(ExplorerError::Command {
            command: cmd,
            output,
        })
    }

    pub async fn load_root(&self) -> ExplorerResult<()> {
        let root = self.store().root().to_string();
        let listing = self.list(&root).await?;
        self.store()
            .apply_listing(&root, listing, RefreshMode::Open)?;
        Ok(())
    }

    /// Returns `false` if nothing changed, e.g. the directory already was
    /// open or is being loaded by someone else.
    pub async fn expand(&self, path: &str) -> ExplorerResult<bool> {
        let ticket = match self.store().begin_expand(path) {
            Ok(ticket) => ticket,
            Err(TreeError::AlreadyOpen(_)) => return Ok(false),
            Err(TreeError::Loading(p)) => {
                log::debug!("'{}' is already loading", p);
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let path = ticket.path().to_string();
        let load = PendingLoad {
            explorer: self,
            ticket: Some(ticket),
        };
        let listing = self.list(&path).await?;
        Ok(load.finish(listing))
    }

    pub fn collapse(&self, path: &str) -> ExplorerResult<bool> {
        Ok(self.store().collapse(path)?)
    }

    pub async fn toggle(&self, path: &str) -> ExplorerResult<bool> {
        let open = match self.store().get(path) {
            Some(e) => e.open,
            None => return Err(TreeError::NotFound(normalize(path)).into()),
        };
        if open {
            self.collapse(path)
        } else {
            self.expand(path).await
        }
    }

    /// Loads the root if needed and opens every directory above `path`.
    pub async fn reveal(&self, path: &str) -> ExplorerResult<()> {
        let path = normalize(path);
        let (root, empty) = {
            let store = self.store();
            (store.root().to_string(), store.is_empty())
        };
        if empty {
            self.load_root().await?;
        }

        let mut ancestors = Vec::new();
        let mut dir = path::parent(&path);
        while dir != root && path::is_within(&dir, &root) {
            ancestors.push(dir.clone());
            dir = path::parent(&dir);
        }
        for dir in ancestors.into_iter().rev() {
            self.expand(&dir).await?;
        }

        if path == root || self.get(&path).is_some() {
            Ok(())
        } else {
            Err(TreeError::NotFound(path).into())
        }
    }

    /// Reloads the direct children of `path`. A directory that is not in the
    /// tree, or closed with [`RefreshMode::KeepClosed`], is left alone.
    pub async fn refresh(&self, path: &str, mode: RefreshMode) -> ExplorerResult<bool> {
        let path = normalize(path);
        {
            let store = self.store();
            if path != store.root() {
                match store.get(&path) {
                    None => return Ok(false),
                    Some(e) if !e.is_dir() => {
                        return Err(TreeError::NotADirectory(path).into())
                    }
                    Some(e) if !e.open && mode == RefreshMode::KeepClosed => return Ok(false),
                    Some(_) => (),
                }
            }
        }

        let listing = self.list(&path).await?;
        match self.store().apply_listing(&path, listing, mode) {
            Ok(changed) => Ok(changed),
            Err(TreeError::NotFound(p)) => {
                log::debug!("'{}' vanished while refreshing", p);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Opens `target` if needed and shows a placeholder to be named.
    pub async fn begin_create(&self, target: &str) -> ExplorerResult<PendingCreate> {
        let target = normalize(target);
        let needs_expand = {
            let store = self.store();
            match store.get(&target) {
                Some(e) => e.is_dir() && !e.open,
                None if target == store.root() => false,
                None => return Err(TreeError::NotFound(target).into()),
            }
        };
        if needs_expand {
            self.expand(&target).await?;
        }

        let placeholder = self.store().insert_placeholder(&target)?;
        Ok(PendingCreate {
            parent: path::parent(&placeholder),
            placeholder,
        })
    }

    /// Creates `name` where the placeholder is. A trailing `/` creates a
    /// directory. On a conflict the placeholder stays for another try.
    pub async fn commit_create(
        &self,
        pending: &PendingCreate,
        name: &str,
    ) -> ExplorerResult<CreateOutcome> {
        let name = name.trim();
        if name.is_empty() {
            self.cancel_create(pending);
            return Ok(CreateOutcome::Cancelled);
        }
        let is_dir = name.ends_with('/');
        let name = name.trim_end_matches('/');
        if !path::is_valid_name(name) {
            return Err(TreeError::InvalidName(name.to_string()).into());
        }

        let path = path::join(&pending.parent, name);
        if self.exists(&path).await? {
            self.prompter.alert(Prompt::conflict(&path)).await;
            return Ok(CreateOutcome::Conflict(path));
        }

        let cmd = if is_dir {
            command::mkdir(&path)
        } else {
            command::create_file(&path)
        };
        self.run_silent(cmd).await?;
        log::info!("Created '{}'", path);

        self.cancel_create(pending);
        self.refresh(&pending.parent, RefreshMode::Open).await?;
        Ok(CreateOutcome::Created(path))
    }

    /// Drops the placeholder without touching the backend.
    pub fn cancel_create(&self, pending: &PendingCreate) {
        let mut store = self.store();
        if store.get(&pending.placeholder).is_some_and(|e| e.placeholder) {
            if let Err(e) = store.remove(&pending.placeholder) {
                log::debug!("Placeholder already gone: {}", e);
            }
        }
    }

    pub async fn rename(&self, path: &str, new_name: &str) -> ExplorerResult<RenameOutcome> {
        let path = normalize(path);
        let entry = self
            .get(&path)
            .ok_or_else(|| TreeError::NotFound(path.clone()))?;
        let new_name = new_name.trim();
        if new_name.is_empty() || new_name == entry.name {
            return Ok(RenameOutcome::Unchanged);
        }
        if !path::is_valid_name(new_name) {
            return Err(TreeError::InvalidName(new_name.to_string()).into());
        }

        let new_path = path::join(&entry.parent_path, new_name);
        if self.get(&new_path).is_some() || self.exists(&new_path).await? {
            self.prompter.alert(Prompt::conflict(&new_path)).await;
            return Ok(RenameOutcome::Conflict(new_path));
        }

        self.run_silent(command::move_path(&path, &new_path)).await?;
        log::info!("Renamed '{}' to '{}'", path, new_path);
        let renamed = self.store().rename(&path, new_name);
        match renamed {
            Ok(_) | Err(TreeError::NotFound(_)) => (),
            Err(e) => {
                log::warn!("Reloading '{}' after the rename: {}", entry.parent_path, e);
                self.refresh(&entry.parent_path, RefreshMode::KeepClosed)
                    .await?;
            }
        }
        Ok(RenameOutcome::Renamed(new_path))
    }

    pub async fn delete(&self, path: &str) -> ExplorerResult<DeleteOutcome> {
        let path = normalize(path);
        if self.get(&path).is_none() {
            return Err(TreeError::NotFound(path).into());
        }
        if self.prompter.confirm(Prompt::delete(&path)).await == Confirmation::Cancelled {
            return Ok(DeleteOutcome::Cancelled);
        }

        self.run_silent(command::remove(&path)).await?;
        log::info!("Deleted '{}'", path);
        match self.store().remove(&path) {
            Ok(_) | Err(TreeError::NotFound(_)) => Ok(DeleteOutcome::Deleted),
            Err(e) => Err(e.into()),
        }
    }

    /// Moves `source` onto `target`. Dropping onto a file moves into the
    /// directory containing that file.
    pub async fn drop_onto(&self, source: &str, target: &str) -> ExplorerResult<MoveOutcome> {
        let target = normalize(target);
        let into = {
            let store = self.store();
            match store.get(&target) {
                Some(e) if !e.is_dir() => e.parent_path.clone(),
                Some(_) => target,
                None if target == store.root() => target,
                None => return Err(TreeError::NotFound(target).into()),
            }
        };
        self.move_into(source, &into).await
    }

    pub async fn move_into(&self, source: &str, into: &str) -> ExplorerResult<MoveOutcome> {
        let source = normalize(source);
        let into = normalize(into);
        if let Err(e) = path::check_move(&source, &into) {
            log::warn!("{}", e);
            return Ok(MoveOutcome::Rejected(e));
        }
        let old_parent = path::parent(&source);
        if old_parent == into {
            return Ok(MoveOutcome::Unchanged);
        }

        let new_path = path::join(&into, &path::basename(&source));
        if self.exists(&new_path).await? {
            self.prompter.alert(Prompt::conflict(&new_path)).await;
            return Ok(MoveOutcome::Conflict(new_path));
        }

        self.run_silent(command::move_path(&source, &new_path)).await?;
        log::info!("Moved '{}' to '{}'", source, new_path);

        self.refresh(&old_parent, RefreshMode::KeepClosed).await?;
        self.refresh(&into, RefreshMode::Open).await?;
        Ok(MoveOutcome::Moved(new_path))
    }

    pub async fn read_file(&self, path: &str) -> ExplorerResult<String> {
        self.run(command::read_file(&normalize(path))).await
    }

    /// Writes `content` to `path`, asking before replacing an existing file.
    pub async fn save_as(&self, path: &str, content: &str) -> ExplorerResult<SaveOutcome> {
        let path = normalize(path);
        let exists = self.exists(&path).await?;
        if exists
            && self.prompter.confirm(Prompt::overwrite(&path)).await == Confirmation::Cancelled
        {
            return Ok(SaveOutcome::Cancelled);
        }

        self.run_silent(command::save_file(&path, content, exists))
            .await?;
        log::info!("Saved '{}'", path);
        self.refresh(&path::parent(&path), RefreshMode::KeepClosed)
            .await?;
        Ok(SaveOutcome::Saved(path))
    }
}

#[cfg(test)]
mod fake;
