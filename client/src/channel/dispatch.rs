use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::mpsc;
use wss_protocol::{Envelope, Kind};

/// An unsolicited envelope as seen by a subscriber.
#[derive(Debug, Clone)]
pub struct Push {
    pub envelope: Arc<Envelope>,
    /// The envelope is the echo of something this client broadcast.
    pub own: bool,
}

pub struct Subscription {
    kind: Kind,
    rx: mpsc::UnboundedReceiver<Push>,
}

impl Subscription {
    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    /// `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<Push> {
        self.rx.recv().await
    }

    /// Like [`recv`](Self::recv) but skips echoes of this client's own broadcasts.
    pub async fn recv_foreign(&mut self) -> Option<Push> {
        loop {
            let push = self.rx.recv().await?;
            if !push.own {
                return Some(push);
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<Push> {
        self.rx.try_recv().ok()
    }
}

/// Routes envelopes that are not responses to the subscribers of their kind.
#[derive(Default)]
pub struct Dispatcher {
    subscribers: Mutex<HashMap<Kind, Vec<mpsc::UnboundedSender<Push>>>>,
    errors: Mutex<Vec<mpsc::UnboundedSender<String>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Dispatcher {
    pub fn subscribe(&self, kind: Kind) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers)
            .entry(kind.clone())
            .or_default()
            .push(tx);
        Subscription { kind, rx }
    }

    /// Decode failures and other problems on the link, as display strings.
    pub fn subscribe_errors(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.errors).push(tx);
        rx
    }

    pub fn report(&self, error: String) {
        log::error!("{}", error);
        lock(&self.errors).retain(|tx| tx.send(error.clone()).is_ok());
    }

    pub fn dispatch(&self, envelope: Envelope, own_id: &str) {
        let kind = envelope.kind();
        let own = envelope.origin() == Some(own_id);

        if kind.is_response() {
            log::debug!(
                "Response for unknown msg_id {:?}, dropping",
                envelope.msg_id()
            );
            return;
        }
        if !kind.is_push() {
            log::warn!("Unexpected envelope of type '{}', dropping", kind);
            return;
        }

        match &kind {
            Kind::Broadcast if !own => log::info!(
                "BROADCAST [from:{}, msg_id:{}]: {}",
                envelope.origin().unwrap_or("?"),
                envelope.msg_id().unwrap_or("-"),
                envelope.body().as_text()
            ),
            Kind::Broadcast => log::debug!("Echo of own broadcast"),
            _ => log::info!("NOTIFY: {} - {}", kind, envelope.body().as_text()),
        }

        let push = Push {
            envelope: Arc::new(envelope),
            own,
        };
        if let Some(subs) = lock(&self.subscribers).get_mut(&kind) {
            subs.retain(|tx| tx.send(push.clone()).is_ok());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_routes_by_kind() {
        let d = Dispatcher::default();
        let mut reload = d.subscribe(Kind::HmrReload);
        let mut css = d.subscribe(Kind::HmrCssUpdate);

        d.dispatch(Envelope::new(Kind::HmrReload, "/index.html"), "me");
        let push = reload.try_recv().unwrap();
        assert_eq!(push.envelope.body().as_text(), "/index.html");
        assert!(!push.own);
        assert!(css.try_recv().is_none());
    }

    #[test]
    fn test_own_broadcast_flagged() {
        let d = Dispatcher::default();
        let mut sub = d.subscribe(Kind::Broadcast);
        d.dispatch(Envelope::broadcast("x").with_origin("me"), "me");
        d.dispatch(Envelope::broadcast("y").with_origin("other"), "me");
        assert!(sub.try_recv().unwrap().own);
        assert!(!sub.try_recv().unwrap().own);
    }

    #[tokio::test]
    async fn test_recv_foreign_skips_echo() {
        let d = Dispatcher::default();
        let mut sub = d.subscribe(Kind::Broadcast);
        d.dispatch(Envelope::broadcast("x").with_origin("me"), "me");
        d.dispatch(Envelope::broadcast("y").with_origin("7"), "me");
        let push = sub.recv_foreign().await.unwrap();
        assert_eq!(push.envelope.origin(), Some("7"));
    }

    #[test]
    fn test_unknown_kind_dropped() {
        let d = Dispatcher::default();
        let mut sub = d.subscribe(Kind::Other("x".into()));
        d.dispatch(Envelope::new(Kind::Other("x".into()), ""), "me");
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_only_pushes_reach_subscribers() {
        let d = Dispatcher::default();
        let mut results = d.subscribe(Kind::CmdResult);
        let mut cmds = d.subscribe(Kind::Cmd);
        let mut notify = d.subscribe(Kind::NotifyUpdate);

        d.dispatch(Envelope::new(Kind::CmdResult, "late").with_msg_id("s1"), "me");
        d.dispatch(Envelope::new(Kind::CmdError, "late").with_msg_id("s2"), "me");
        d.dispatch(Envelope::cmd("ls"), "me");
        d.dispatch(Envelope::new(Kind::NotifyUpdate, "/main.rs"), "me");

        assert!(results.try_recv().is_none());
        assert!(cmds.try_recv().is_none());
        assert_eq!(
            notify.try_recv().unwrap().envelope.body().as_text(),
            "/main.rs"
        );
    }

    #[test]
    fn test_closed_subscribers_are_pruned() {
        let d = Dispatcher::default();
        drop(d.subscribe(Kind::HmrReload));
        d.dispatch(Envelope::new(Kind::HmrReload, "/"), "me");
        assert!(lock(&d.subscribers)[&Kind::HmrReload].is_empty());
    }
}
