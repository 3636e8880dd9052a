//! The registry of connected clients.
//!
//! One [`ClientRecord`] exists per authenticated signalling address, holding
//! presence, voice state, and the client's codec pair. The registry owns the
//! codecs; each sits behind its own mutex so the mixer can encode while
//! holding only the registry read lock, and a mix tick never blocks the
//! dispatcher's reads. Fan-out helpers return address snapshots; datagrams
//! are never written while a registry lock is held.

use crate::protocol::{Presence, UserStatus};
use audiopus::coder::{Decoder as OpusDecoder, Encoder as OpusEncoder};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

pub(crate) struct ClientRecord {
    pub addr: SocketAddr,
    pub username: String,
    pub token: String,
    /// Where mixes are sent. Starts as the signalling IP plus the voice
    /// port; rebound to the observed remote address by the first voice
    /// packet (see `voice_bound`).
    pub voice_addr: SocketAddr,
    /// Whether `voice_addr` has been learned from live traffic. Cleared on
    /// voice disconnect and eviction so a fresh socket can bind again.
    pub voice_bound: bool,
    pub in_voice: bool,
    pub presence: Presence,
    pub last_voice_activity: Instant,
    pub encoder: Mutex<OpusEncoder>,
    pub decoder: Mutex<OpusDecoder>,
}

#[derive(Default)]
pub(crate) struct ClientRegistry {
    inner: RwLock<HashMap<SocketAddr, ClientRecord>>,
}

impl ClientRegistry {
    pub fn insert(&self, record: ClientRecord) {
        self.inner.write().insert(record.addr, record);
    }

    pub fn remove(&self, addr: &SocketAddr) -> Option<ClientRecord> {
        self.inner.write().remove(addr)
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.inner.read().contains_key(addr)
    }

    pub fn username_of(&self, addr: &SocketAddr) -> Option<String> {
        self.inner.read().get(addr).map(|c| c.username.clone())
    }

    pub fn read(&self) -> RwLockReadGuard<'_, HashMap<SocketAddr, ClientRecord>> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, HashMap<SocketAddr, ClientRecord>> {
        self.inner.write()
    }

    /// Moves a client in or out of the voice chat, returning its username.
    pub fn set_voice(&self, addr: &SocketAddr, in_voice: bool) -> Option<String> {
        let mut clients = self.inner.write();
        let record = clients.get_mut(addr)?;
        record.in_voice = in_voice;
        record.presence = if in_voice {
            Presence::InVoice
        } else {
            Presence::Online
        };
        if in_voice {
            record.last_voice_activity = Instant::now();
        } else {
            record.voice_bound = false;
        }
        Some(record.username.clone())
    }

    /// Signalling addresses of every authenticated client, minus `exclude`.
    pub fn recipients(&self, exclude: Option<SocketAddr>) -> Vec<SocketAddr> {
        self.inner
            .read()
            .values()
            .filter(|c| c.presence != Presence::Offline && !c.username.is_empty())
            .filter(|c| Some(c.addr) != exclude)
            .map(|c| c.addr)
            .collect()
    }

    /// Voice addresses of every client currently in the voice chat whose
    /// address has been confirmed by live traffic. The derived default is
    /// only a guess, so nothing is ever sent there.
    pub fn voice_recipients(&self) -> Vec<SocketAddr> {
        self.inner
            .read()
            .values()
            .filter(|c| c.in_voice && c.voice_bound)
            .map(|c| c.voice_addr)
            .collect()
    }

    /// Snapshot of every authenticated client's status, for `USER_LIST`.
    pub fn user_list(&self) -> Vec<UserStatus> {
        self.inner
            .read()
            .values()
            .filter(|c| c.presence != Presence::Offline && !c.username.is_empty())
            .map(|c| UserStatus {
                username: c.username.clone(),
                status: c.presence,
            })
            .collect()
    }

    /// Address, username, and presence of every authenticated client other
    /// than `exclude`, for the post-login presence exchange.
    pub fn peer_statuses(&self, exclude: SocketAddr) -> Vec<(SocketAddr, String, Presence)> {
        self.inner
            .read()
            .values()
            .filter(|c| c.addr != exclude && c.presence != Presence::Offline && !c.username.is_empty())
            .map(|c| (c.addr, c.username.clone(), c.presence))
            .collect()
    }
}
