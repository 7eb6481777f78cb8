//! An in-memory backend that understands the commands the explorer sends.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::Mutex,
};

use async_trait::async_trait;

use super::{Confirmation, Prompt, Prompter};
use crate::{
    tree::path::{self, is_within},
    ChannelError, CommandRunner,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Dir,
    File(String),
}

#[derive(Default)]
pub struct FakeBackend {
    nodes: Mutex<BTreeMap<String, Node>>,
    log: Mutex<Vec<String>>,
    failures: Mutex<Vec<(String, String)>>,
    stalls: Mutex<Vec<String>>,
}

fn local(remote: &str) -> String {
    path::normalize(remote)
}

/// Reads one argument quoted by `command::raw_string` off the front of `s`.
fn take_quoted(s: &str) -> Option<(String, &str)> {
    if let Some(rest) = s.strip_prefix('\'') {
        let end = rest.find('\'')?;
        return Some((rest[..end].to_string(), &rest[end + 1..]));
    }
    let rest = s.strip_prefix('r')?;
    let hashes = rest.len() - rest.trim_start_matches('#').len();
    let rest = rest[hashes..].strip_prefix('\'')?;
    let close = format!("'{}", "#".repeat(hashes));
    let end = rest.find(&close)?;
    Some((rest[..end].to_string(), &rest[end + close.len()..]))
}

impl FakeBackend {
    /// Builds a backend from paths, a trailing `/` marks a directory.
    pub fn with(paths: &[&str]) -> Self {
        let backend = Self::default();
        {
            let mut nodes = backend.nodes.lock().unwrap();
            for p in paths {
                let node = if p.ends_with('/') {
                    Node::Dir
                } else {
                    Node::File(String::new())
                };
                let p = path::normalize(p);
                let mut parent = path::parent(&p);
                while parent != "/" {
                    nodes.insert(parent.clone(), Node::Dir);
                    parent = path::parent(&parent);
                }
                nodes.insert(p, node);
            }
        }
        backend
    }

    /// The next command starting with `prefix` prints `output` and does nothing.
    pub fn fail_next(&self, prefix: &str, output: &str) {
        self.failures
            .lock()
            .unwrap()
            .push((prefix.to_string(), output.to_string()));
    }

    /// The next command starting with `prefix` never answers.
    pub fn hang_next(&self, prefix: &str) {
        self.stalls.lock().unwrap().push(prefix.to_string());
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn node(&self, p: &str) -> Option<Node> {
        self.nodes.lock().unwrap().get(p).cloned()
    }

    fn list(&self, dir: &str) -> String {
        let nodes = self.nodes.lock().unwrap();
        if dir != "/" && nodes.get(dir) != Some(&Node::Dir) {
            return format!("Error: '{}' is not a directory", dir);
        }
        let records: Vec<serde_json::Value> = nodes
            .iter()
            .filter(|(p, _)| path::parent(p) == dir && p.as_str() != "/")
            .map(|(p, n)| {
                serde_json::json!({
                    "name": path::basename(p),
                    "type": if *n == Node::Dir { "dir" } else { "file" },
                    "size": 0,
                })
            })
            .collect();
        serde_json::Value::Array(records).to_string()
    }

    fn execute(&self, cmd: &str) -> String {
        self.try_execute(cmd)
            .unwrap_or_else(|| format!("Error: unknown command '{}'", cmd))
    }

    fn try_execute(&self, cmd: &str) -> Option<String> {
        if let Some(rest) = cmd.strip_prefix("cd ") {
            let (dir, _) = take_quoted(rest)?;
            return Some(self.list(&local(&dir)));
        }
        if let Some(rest) = cmd.strip_prefix("mkdir (") {
            let (target, rest) = take_quoted(rest)?;
            let (content, rest) = take_quoted(rest.strip_prefix(" | path dirname) ; ")?)?;
            let rest = rest.strip_prefix(" | save ")?;
            let (force, rest) = match rest.strip_prefix("-f ") {
                Some(rest) => (true, rest),
                None => (false, rest),
            };
            let (again, _) = take_quoted(rest)?;
            assert_eq!(target, again);

            let p = local(&target);
            let mut nodes = self.nodes.lock().unwrap();
            if !force && nodes.contains_key(&p) {
                return Some(format!("Error: '{}' already exists", p));
            }
            nodes.insert(p, Node::File(content));
            return Some(String::new());
        }
        if let Some(rest) = cmd.strip_prefix("mkdir ") {
            let (p, _) = take_quoted(rest)?;
            self.nodes.lock().unwrap().insert(local(&p), Node::Dir);
            return Some(String::new());
        }
        if let Some(rest) = cmd.strip_prefix("mv -f ") {
            let (from, rest) = take_quoted(rest)?;
            let (to, _) = take_quoted(rest.strip_prefix(' ')?)?;
            let (from, to) = (local(&from), local(&to));
            let mut nodes = self.nodes.lock().unwrap();
            if !nodes.contains_key(&from) {
                return Some(format!("Error: '{}' not found", from));
            }
            let moved: Vec<(String, Node)> = nodes
                .iter()
                .filter(|(p, _)| is_within(p, &from))
                .map(|(p, n)| (p.clone(), n.clone()))
                .collect();
            for (p, n) in moved {
                nodes.remove(&p);
                nodes.insert(format!("{}{}", to, &p[from.len()..]), n);
            }
            return Some(String::new());
        }
        if let Some(rest) = cmd.strip_prefix("rm -rf ") {
            let (p, _) = take_quoted(rest)?;
            let p = local(&p);
            self.nodes
                .lock()
                .unwrap()
                .retain(|k, _| !is_within(k, &p));
            return Some(String::new());
        }
        if let Some(rest) = cmd.strip_prefix("open ") {
            let (p, _) = take_quoted(rest)?;
            let p = local(&p);
            return Some(match self.node(&p) {
                Some(Node::File(content)) => content,
                _ => format!("Error: cannot open '{}'", p),
            });
        }
        if let Some((p, rest)) = take_quoted(cmd) {
            if rest == " | path exists" {
                let p = local(&p);
                let exists = p == "/" || self.nodes.lock().unwrap().contains_key(&p);
                return Some(exists.to_string());
            }
        }
        None
    }
}

#[async_trait]
impl CommandRunner for FakeBackend {
    async fn run_command(&self, command: String) -> Result<String, ChannelError> {
        self.log.lock().unwrap().push(command.clone());

        let stall = {
            let mut stalls = self.stalls.lock().unwrap();
            stalls
                .iter()
                .position(|prefix| command.starts_with(prefix.as_str()))
                .map(|i| stalls.remove(i))
        };
        if stall.is_some() {
            std::future::pending::<()>().await;
        }

        let failure = {
            let mut failures = self.failures.lock().unwrap();
            failures
                .iter()
                .position(|(prefix, _)| command.starts_with(prefix.as_str()))
                .map(|i| failures.remove(i).1)
        };
        if let Some(output) = failure {
            return Ok(output);
        }

        Ok(self.execute(&command))
    }
}

#[derive(Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<Confirmation>>,
    seen: Mutex<Vec<Prompt>>,
}

impl ScriptedPrompter {
    pub fn answering(answers: &[Confirmation]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            seen: Mutex::default(),
        }
    }

    pub fn seen(&self) -> Vec<Prompt> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn confirm(&self, prompt: Prompt) -> Confirmation {
        self.seen.lock().unwrap().push(prompt);
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Confirmation::Cancelled)
    }

    async fn alert(&self, prompt: Prompt) {
        self.seen.lock().unwrap().push(prompt);
    }
}
