use std::{
    collections::{HashMap, HashSet},
    ops::Range,
};

use tokio::sync::mpsc;

use super::{path, sort_listing, Entry, EntryKind, ListingEntry, TreeError, TreeEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// A closed directory stays closed and is not touched.
    KeepClosed,
    /// A closed directory is opened with the new listing.
    Open,
}

/// Proof that an expand is in flight. The directory is found again by path
/// when the listing arrives, its index may have moved in the meantime.
#[derive(Debug)]
#[must_use = "a load must be finished or aborted"]
pub struct LoadTicket {
    path: String,
}

impl LoadTicket {
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum InvariantError {
    #[error("entry {index} '{path}' has depth {depth}, expected {expected}")]
    Depth {
        index: usize,
        path: String,
        depth: usize,
        expected: usize,
    },
    #[error("entry {index} '{path}' claims parent '{parent}', expected '{expected}'")]
    Parent {
        index: usize,
        path: String,
        parent: String,
        expected: String,
    },
    #[error("'{0}' has children but is not an open directory")]
    ClosedWithChildren(String),
    #[error("'{0}' appears more than once")]
    Duplicate(String),
    #[error("index of '{0}' is stale")]
    StaleIndex(String),
}

/// Every visible entry in display order. A directory's descendants follow it
/// immediately as one contiguous run of greater depth. Mutations happen in a
/// single call, there is never a half-applied splice to observe.
pub struct TreeStore {
    root: String,
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    loading: HashSet<String>,
    listeners: Vec<mpsc::UnboundedSender<TreeEvent>>,
}

fn new_entry(listed: ListingEntry, depth: usize, parent: &str) -> Entry {
    Entry {
        name: listed.name,
        kind: listed.kind,
        depth,
        parent_path: parent.to_string(),
        open: false,
        placeholder: false,
    }
}

fn prepare(listing: Vec<ListingEntry>) -> Vec<ListingEntry> {
    let mut seen = HashSet::new();
    let mut listing: Vec<ListingEntry> = listing
        .into_iter()
        .filter(|l| seen.insert(l.name.clone()))
        .collect();
    sort_listing(&mut listing);
    listing
}

impl TreeStore {
    pub fn new(root: &str) -> Self {
        Self {
            root: path::normalize(root),
            entries: Vec::new(),
            index: HashMap::new(),
            loading: HashSet::new(),
            listeners: Vec::new(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn index_of(&self, path: &str) -> Option<usize> {
        self.index.get(&path::normalize(path)).copied()
    }

    pub fn get(&self, path: &str) -> Option<&Entry> {
        self.index_of(path).map(|i| &self.entries[i])
    }

    pub fn is_loading(&self, path: &str) -> bool {
        self.loading.contains(&path::normalize(path))
    }

    pub fn open_paths(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.open)
            .map(Entry::path)
            .collect()
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<TreeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.push(tx);
        rx
    }

    /// All visible descendants of `path`.
    pub fn children(&self, path: &str) -> Result<&[Entry], TreeError> {
        let dir = self.locate_dir(&path::normalize(path))?;
        Ok(&self.entries[self.block(dir)])
    }

    /// Names of the visible direct children of `path`.
    pub fn child_names(&self, path: &str) -> Result<Vec<&str>, TreeError> {
        let dir = self.locate_dir(&path::normalize(path))?;
        let depth = self.child_depth(dir);
        Ok(self.entries[self.block(dir)]
            .iter()
            .filter(|e| e.depth == depth)
            .map(|e| e.name.as_str())
            .collect())
    }

    pub fn begin_expand(&mut self, path: &str) -> Result<LoadTicket, TreeError> {
        let path = path::normalize(path);
        let Some(i) = self.locate_dir(&path)? else {
            return Err(TreeError::AlreadyOpen(path));
        };
        if self.entries[i].open {
            return Err(TreeError::AlreadyOpen(path));
        }
        if !self.loading.insert(path.clone()) {
            return Err(TreeError::Loading(path));
        }
        Ok(LoadTicket { path })
    }

    /// Splices `listing` in below the directory the ticket was taken for.
    /// Returns `false` when that directory vanished or got opened meanwhile.
    pub fn finish_expand(&mut self, ticket: LoadTicket, listing: Vec<ListingEntry>) -> bool {
        let LoadTicket { path } = ticket;
        self.loading.remove(&path);

        let Some(i) = self.index_of(&path) else {
            log::debug!("'{}' is gone, dropping its listing", path);
            return false;
        };
        let dir = &self.entries[i];
        if !dir.is_dir() || dir.open {
            log::debug!("'{}' changed while loading, dropping its listing", path);
            return false;
        }

        let depth = dir.depth + 1;
        let block = prepare(listing)
            .into_iter()
            .map(|l| new_entry(l, depth, &path))
            .collect();
        self.entries[i].open = true;
        self.splice(i + 1..i + 1, block);
        self.emit(TreeEvent::Expanded(path));
        true
    }

    pub fn abort_load(&mut self, ticket: LoadTicket) {
        self.loading.remove(&ticket.path);
    }

    /// Returns `false` if it already was closed.
    pub fn collapse(&mut self, path: &str) -> Result<bool, TreeError> {
        let path = path::normalize(path);
        let Some(i) = self.locate_dir(&path)? else {
            return Ok(false);
        };
        if !self.entries[i].open {
            return Ok(false);
        }
        let end = self.end_of_run(i);
        self.entries[i].open = false;
        self.splice(i + 1..end, Vec::new());
        self.emit(TreeEvent::Collapsed(path));
        Ok(true)
    }

    /// Replaces the direct children of `path` with `listing`. Children that
    /// were open directories and are still listed keep their whole subtree.
    /// Returns `false` if nothing was done.
    pub fn apply_listing(
        &mut self,
        path: &str,
        listing: Vec<ListingEntry>,
        mode: RefreshMode,
    ) -> Result<bool, TreeError> {
        let path = path::normalize(path);
        let dir = self.locate_dir(&path)?;
        if let Some(i) = dir {
            if !self.entries[i].open {
                if mode == RefreshMode::KeepClosed {
                    return Ok(false);
                }
                self.entries[i].open = true;
            }
        }

        let listing = prepare(listing);
        let depth = self.child_depth(dir);
        let range = self.block(dir);

        let mut placeholders = Vec::new();
        let mut kept: HashMap<String, Vec<Entry>> = HashMap::new();
        let old = &self.entries[range.clone()];
        let mut k = 0;
        while k < old.len() {
            let end = k + 1 + old[k + 1..].iter().take_while(|e| e.depth > depth).count();
            let child = &old[k];
            if child.placeholder {
                if !listing.iter().any(|l| l.name == child.name) {
                    placeholders.push(child.clone());
                }
            } else if child.is_dir() && child.open {
                kept.insert(child.name.clone(), old[k..end].to_vec());
            }
            k = end;
        }

        let mut block = placeholders;
        for listed in listing {
            match kept.remove(&listed.name) {
                Some(subtree) if listed.kind == EntryKind::Dir => block.extend(subtree),
                _ => block.push(new_entry(listed, depth, &path)),
            }
        }

        self.splice(range, block);
        self.emit(TreeEvent::Refreshed(path));
        Ok(true)
    }

    /// Inserts a provisional file entry right after `target`. A directory
    /// target gets it as its first child, a file target as a sibling.
    /// Returns the placeholder's path.
    pub fn insert_placeholder(&mut self, target: &str) -> Result<String, TreeError> {
        let target = path::normalize(target);
        let (at, depth, parent) = if target == self.root {
            (0, 0, self.root.clone())
        } else {
            let i = self
                .index_of(&target)
                .ok_or_else(|| TreeError::NotFound(target.clone()))?;
            let e = &self.entries[i];
            match (e.is_dir(), e.open) {
                (true, false) => return Err(TreeError::NotOpen(target)),
                (true, true) => (i + 1, e.depth + 1, target.clone()),
                (false, _) => (i + 1, e.depth, e.parent_path.clone()),
            }
        };

        let name = self.unique_child_name(&parent, "new")?;
        let entry = Entry {
            name,
            kind: EntryKind::File,
            depth,
            parent_path: parent,
            open: false,
            placeholder: true,
        };
        let placeholder = entry.path();
        self.splice(at..at, vec![entry]);
        self.emit(TreeEvent::Inserted(placeholder.clone()));
        Ok(placeholder)
    }

    /// Removes an entry together with its subtree.
    pub fn remove(&mut self, path: &str) -> Result<Entry, TreeError> {
        let path = path::normalize(path);
        let i = self
            .index_of(&path)
            .ok_or_else(|| TreeError::NotFound(path.clone()))?;
        let end = self.end_of_run(i);
        let removed = self.entries[i].clone();
        self.loading.retain(|p| !path::is_within(p, &path));
        self.splice(i..end, Vec::new());
        self.emit(TreeEvent::Removed(path));
        Ok(removed)
    }

    /// Renames in place, keeping an open directory's subtree, and moves the
    /// entry to its sorted position among its siblings.
    pub fn rename(&mut self, path: &str, new_name: &str) -> Result<String, TreeError> {
        let path = path::normalize(path);
        if !path::is_valid_name(new_name) {
            return Err(TreeError::InvalidName(new_name.to_string()));
        }
        let i = self
            .index_of(&path)
            .ok_or_else(|| TreeError::NotFound(path.clone()))?;
        let parent = self.entries[i].parent_path.clone();
        let new_path = path::join(&parent, new_name);
        if new_path == path {
            return Ok(new_path);
        }
        if self.index.contains_key(&new_path) {
            return Err(TreeError::Exists(new_path));
        }

        let end = self.end_of_run(i);
        let mut block: Vec<Entry> = self.entries.drain(i..end).collect();
        block[0].name = path::basename(&new_path);
        block[0].placeholder = false;
        for e in &mut block[1..] {
            e.parent_path = format!("{}{}", new_path, &e.parent_path[path.len()..]);
        }

        // entries before `i` kept their index, the parent is one of them
        let dir = if parent == self.root {
            None
        } else {
            self.index.get(&parent).copied()
        };
        let depth = block[0].depth;
        let range = self.block(dir);
        let key = (block[0].kind, block[0].name.clone());
        let at = self.entries[range.clone()]
            .iter()
            .position(|e| e.depth == depth && !e.placeholder && (e.kind, &e.name) > (key.0, &key.1))
            .map(|k| range.start + k)
            .unwrap_or(range.end);

        self.splice(at..at, block);
        self.loading = self
            .loading
            .drain()
            .map(|p| {
                if path::is_within(&p, &path) {
                    format!("{}{}", new_path, &p[path.len()..])
                } else {
                    p
                }
            })
            .collect();
        self.emit(TreeEvent::Renamed {
            from: path,
            to: new_path.clone(),
        });
        Ok(new_path)
    }

    /// Checks the structural invariants of the list.
    pub fn validate(&self) -> Result<(), InvariantError> {
        let mut stack: Vec<&Entry> = Vec::new();
        let mut seen = HashSet::new();

        for (index, e) in self.entries.iter().enumerate() {
            while stack.last().is_some_and(|top| top.depth >= e.depth) {
                stack.pop();
            }
            let path = e.path();
            let (expected, expected_parent) = match stack.last() {
                Some(top) => {
                    if !(top.is_dir() && top.open) {
                        return Err(InvariantError::ClosedWithChildren(top.path()));
                    }
                    (top.depth + 1, top.path())
                }
                None => (0, self.root.clone()),
            };
            if e.depth != expected {
                return Err(InvariantError::Depth {
                    index,
                    path,
                    depth: e.depth,
                    expected,
                });
            }
            if e.parent_path != expected_parent {
                return Err(InvariantError::Parent {
                    index,
                    path,
                    parent: e.parent_path.clone(),
                    expected: expected_parent,
                });
            }
            if self.index.get(&path) != Some(&index) {
                return Err(InvariantError::StaleIndex(path));
            }
            if !seen.insert(path.clone()) {
                return Err(InvariantError::Duplicate(path));
            }
            stack.push(e);
        }

        if self.index.len() != self.entries.len() {
            return Err(InvariantError::StaleIndex(self.root.clone()));
        }
        Ok(())
    }

    /// `None` is the root, which is always open.
    fn locate_dir(&self, path: &str) -> Result<Option<usize>, TreeError> {
        if path == self.root {
            return Ok(None);
        }
        let i = self
            .index
            .get(path)
            .copied()
            .ok_or_else(|| TreeError::NotFound(path.to_string()))?;
        if !self.entries[i].is_dir() {
            return Err(TreeError::NotADirectory(path.to_string()));
        }
        Ok(Some(i))
    }

    fn end_of_run(&self, i: usize) -> usize {
        let depth = self.entries[i].depth;
        i + 1
            + self.entries[i + 1..]
                .iter()
                .take_while(|e| e.depth > depth)
                .count()
    }

    fn block(&self, dir: Option<usize>) -> Range<usize> {
        match dir {
            None => 0..self.entries.len(),
            Some(i) => i + 1..self.end_of_run(i),
        }
    }

    fn child_depth(&self, dir: Option<usize>) -> usize {
        dir.map_or(0, |i| self.entries[i].depth + 1)
    }

    fn unique_child_name(&self, parent: &str, base: &str) -> Result<String, TreeError> {
        let taken: HashSet<&str> = self.child_names(parent)?.into_iter().collect();
        if !taken.contains(base) {
            return Ok(base.to_string());
        }
        Ok((1..)
            .map(|n| format!("{}-{}", base, n))
            .find(|name| !taken.contains(name.as_str()))
            .unwrap_or_else(|| base.to_string()))
    }

    fn splice(&mut self, range: Range<usize>, block: Vec<Entry>) {
        self.entries.splice(range, block);
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.path(), i))
            .collect();

        #[cfg(debug_assertions)]
        if let Err(e) = self.validate() {
            panic!("tree store corrupted: {}", e);
        }
    }

    fn emit(&mut self, event: TreeEvent) {
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
