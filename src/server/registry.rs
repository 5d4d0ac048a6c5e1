//! Connection registry: admission control, duplicate-login tracking, and
//! the broadcast fan-out path.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::types::LimitsConfig;
use crate::protocol::packets::messages::Message;

/// Why a connection was turned away at the door.
#[derive(Debug, PartialEq, Eq)]
pub enum AdmitVerdict {
    Admitted(u64),
    /// Source IP is banned.
    Banned,
    /// Global connection cap reached.
    Full,
    /// Per-IP connection cap reached.
    IpFull,
}

struct Member {
    ip: IpAddr,
    account: Option<String>,
    /// Push channel into the connection task; present once Active.
    sender: Option<mpsc::UnboundedSender<Message>>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    members: HashMap<u64, Member>,
    per_ip: HashMap<IpAddr, usize>,
    by_account: HashMap<String, u64>,
    banned_ips: HashSet<IpAddr>,
}

/// Shared connection table. One per server engine.
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
    limits: LimitsConfig,
}

impl ConnectionRegistry {
    pub fn new(limits: LimitsConfig) -> Self {
        ConnectionRegistry {
            inner: Mutex::new(Inner::default()),
            limits,
        }
    }

    /// Admission check for a fresh TCP connection.
    pub async fn admit(&self, ip: IpAddr) -> AdmitVerdict {
        let mut inner = self.inner.lock().await;
        if inner.banned_ips.contains(&ip) {
            warn!(%ip, "rejecting banned address");
            return AdmitVerdict::Banned;
        }
        if inner.members.len() >= self.limits.max_connections {
            warn!(%ip, "rejecting connection: server full");
            return AdmitVerdict::Full;
        }
        let ip_count = inner.per_ip.get(&ip).copied().unwrap_or(0);
        if ip_count >= self.limits.max_connections_per_ip {
            warn!(%ip, "rejecting connection: per-ip limit");
            return AdmitVerdict::IpFull;
        }

        inner.next_id += 1;
        let id = inner.next_id;
        inner.members.insert(
            id,
            Member {
                ip,
                account: None,
                sender: None,
            },
        );
        *inner.per_ip.entry(ip).or_insert(0) += 1;
        debug!(%ip, connection = id, "connection admitted");
        AdmitVerdict::Admitted(id)
    }

    /// Binds a logged-in account to a connection.
    ///
    /// Returns false when the account is already attached to a live
    /// connection; the caller must refuse the login.
    pub async fn bind_account(&self, id: u64, username: &str) -> bool {
        let key = username.to_lowercase();
        let mut inner = self.inner.lock().await;
        if inner.by_account.contains_key(&key) {
            warn!(username = %key, "duplicate login refused");
            return false;
        }
        let Some(member) = inner.members.get_mut(&id) else {
            return false;
        };
        member.account = Some(key.clone());
        inner.by_account.insert(key, id);
        true
    }

    /// Installs the push channel for an Active connection.
    pub async fn attach_sender(&self, id: u64, sender: mpsc::UnboundedSender<Message>) {
        let mut inner = self.inner.lock().await;
        if let Some(member) = inner.members.get_mut(&id) {
            member.sender = Some(sender);
        }
    }

    /// Pushes a packet to every Active connection except `from`.
    pub async fn broadcast_except(&self, from: u64, message: Message) {
        let inner = self.inner.lock().await;
        for (id, member) in &inner.members {
            if *id == from {
                continue;
            }
            if let Some(sender) = &member.sender {
                // A closed receiver means the task is on its way out;
                // removal happens in its cleanup.
                let _ = sender.send(message.clone());
            }
        }
    }

    /// Drops a connection from every index.
    pub async fn remove(&self, id: u64) {
        let mut inner = self.inner.lock().await;
        if let Some(member) = inner.members.remove(&id) {
            if let Some(count) = inner.per_ip.get_mut(&member.ip) {
                *count -= 1;
                if *count == 0 {
                    inner.per_ip.remove(&member.ip);
                }
            }
            if let Some(account) = member.account {
                inner.by_account.remove(&account);
            }
            debug!(connection = id, "connection removed");
        }
    }

    /// Bans an address and reports whether it was newly added.
    pub async fn ban_ip(&self, ip: IpAddr) -> bool {
        let mut inner = self.inner.lock().await;
        inner.banned_ips.insert(ip)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.lock().await.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max: usize, per_ip: usize) -> LimitsConfig {
        LimitsConfig {
            max_connections: max,
            max_connections_per_ip: per_ip,
            ..LimitsConfig::default()
        }
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, last])
    }

    #[tokio::test]
    async fn per_ip_and_global_caps() {
        let registry = ConnectionRegistry::new(limits(3, 2));
        assert!(matches!(
            registry.admit(ip(1)).await,
            AdmitVerdict::Admitted(_)
        ));
        assert!(matches!(
            registry.admit(ip(1)).await,
            AdmitVerdict::Admitted(_)
        ));
        assert_eq!(registry.admit(ip(1)).await, AdmitVerdict::IpFull);
        assert!(matches!(
            registry.admit(ip(2)).await,
            AdmitVerdict::Admitted(_)
        ));
        assert_eq!(registry.admit(ip(3)).await, AdmitVerdict::Full);
    }

    #[tokio::test]
    async fn removal_frees_capacity() {
        let registry = ConnectionRegistry::new(limits(10, 1));
        let AdmitVerdict::Admitted(id) = registry.admit(ip(1)).await else {
            panic!("expected admission");
        };
        assert_eq!(registry.admit(ip(1)).await, AdmitVerdict::IpFull);
        registry.remove(id).await;
        assert!(matches!(
            registry.admit(ip(1)).await,
            AdmitVerdict::Admitted(_)
        ));
    }

    #[tokio::test]
    async fn banned_ips_are_refused() {
        let registry = ConnectionRegistry::new(limits(10, 10));
        assert!(registry.ban_ip(ip(9)).await);
        assert!(!registry.ban_ip(ip(9)).await);
        assert_eq!(registry.admit(ip(9)).await, AdmitVerdict::Banned);
    }

    #[tokio::test]
    async fn duplicate_account_binding_is_refused() {
        let registry = ConnectionRegistry::new(limits(10, 10));
        let AdmitVerdict::Admitted(a) = registry.admit(ip(1)).await else {
            panic!("expected admission");
        };
        let AdmitVerdict::Admitted(b) = registry.admit(ip(2)).await else {
            panic!("expected admission");
        };
        assert!(registry.bind_account(a, "Ambrosia").await);
        assert!(!registry.bind_account(b, "ambrosia").await);
        registry.remove(a).await;
        assert!(registry.bind_account(b, "ambrosia").await);
    }

    #[tokio::test]
    async fn broadcast_skips_the_sender() {
        let registry = ConnectionRegistry::new(limits(10, 10));
        let AdmitVerdict::Admitted(a) = registry.admit(ip(1)).await else {
            panic!("expected admission");
        };
        let AdmitVerdict::Admitted(b) = registry.admit(ip(2)).await else {
            panic!("expected admission");
        };
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.attach_sender(a, tx_a).await;
        registry.attach_sender(b, tx_b).await;

        registry
            .broadcast_except(
                a,
                Message::ShowMessage {
                    sender: "Aria".into(),
                    text: "hello".into(),
                },
            )
            .await;
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
    }
}
