use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use tokio::sync::oneshot;
use wss_protocol::Envelope;

use super::ChannelError;

pub type Reply = Result<Envelope, ChannelError>;

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// A fresh id starting with `prefix`, unique within this process.
pub fn fresh_id(prefix: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}{}{}", prefix, base36(millis), base36(n))
}

pub fn next_msg_id() -> String {
    fresh_id("s")
}

/// Outstanding requests keyed by `msg_id`. Each is resolved at most once.
#[derive(Default)]
pub struct Registry {
    pending: Mutex<HashMap<String, oneshot::Sender<Reply>>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Reply>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, msg_id: &str) -> Result<oneshot::Receiver<Reply>, ChannelError> {
        let mut pending = self.lock();
        if pending.contains_key(msg_id) {
            return Err(ChannelError::DuplicateId(msg_id.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(msg_id.to_string(), tx);
        Ok(rx)
    }

    /// Completes the request `envelope` answers. Envelopes that match no
    /// pending request are handed back.
    pub fn resolve(&self, envelope: Envelope) -> Option<Envelope> {
        let waiter = match envelope.msg_id() {
            Some(id) => self.lock().remove(id),
            None => None,
        };
        match waiter {
            Some(tx) => {
                if tx.send(Ok(envelope)).is_err() {
                    log::debug!("Response arrived for a request nobody waits on anymore");
                }
                None
            }
            None => Some(envelope),
        }
    }

    pub fn reject(&self, msg_id: &str, error: ChannelError) -> bool {
        match self.lock().remove(msg_id) {
            Some(tx) => {
                let _ = tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Rejects every outstanding request, returns how many there were.
    pub fn reject_all<F>(&self, error: F) -> usize
    where
        F: Fn() -> ChannelError,
    {
        let drained: Vec<_> = self.lock().drain().collect();
        let n = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(error()));
        }
        n
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use wss_protocol::Kind;

    #[test]
    fn test_out_of_order() {
        let reg = Registry::default();
        let mut a = reg.register("a").unwrap();
        let mut b = reg.register("b").unwrap();

        assert!(reg
            .resolve(Envelope::new(Kind::CmdResult, "B").with_msg_id("b"))
            .is_none());
        assert!(a.try_recv().is_err());
        assert_eq!(b.try_recv().unwrap().unwrap().body().as_text(), "B");

        assert!(reg
            .resolve(Envelope::new(Kind::CmdResult, "A").with_msg_id("a"))
            .is_none());
        assert_eq!(a.try_recv().unwrap().unwrap().body().as_text(), "A");
        assert!(reg.is_empty());
    }

    #[test]
    fn test_unknown_and_late_responses_are_handed_back() {
        let reg = Registry::default();
        let _a = reg.register("a").unwrap();
        let unknown = Envelope::new(Kind::CmdResult, "?").with_msg_id("zzz");
        assert_eq!(reg.resolve(unknown.clone()), Some(unknown));

        let first = Envelope::new(Kind::CmdResult, "1").with_msg_id("a");
        assert!(reg.resolve(first.clone()).is_none());
        assert_eq!(reg.resolve(first.clone()), Some(first));
    }

    #[test]
    fn test_duplicate_id() {
        let reg = Registry::default();
        let _a = reg.register("a").unwrap();
        assert!(matches!(reg.register("a"), Err(ChannelError::DuplicateId(_))));
    }

    #[test]
    fn test_reject_all() {
        let reg = Registry::default();
        let mut rxs: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|id| reg.register(id).unwrap())
            .collect();
        assert_eq!(reg.reject_all(|| ChannelError::Disconnected), 3);
        for rx in &mut rxs {
            assert!(matches!(rx.try_recv(), Ok(Err(ChannelError::Disconnected))));
        }
        assert!(reg.is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        let ids: std::collections::HashSet<String> = (0..1000).map(|_| next_msg_id()).collect();
        assert_eq!(ids.len(), 1000);
        assert!(ids.iter().all(|id| id.starts_with('s')));
    }
}
