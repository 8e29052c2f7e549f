//! Cryptographic session capability
//!
//! The ratchet, AEAD and signature algorithms are supplied by an opaque
//! session module. The engine only sees the [`SessionCapability`] contract.
//!
//! Every state-mutating module call must be durably persisted before its
//! output may reach the network; otherwise a crash between "send" and
//! "persist" leaves the two peers permanently desynchronized. The single
//! concrete adapter, [`PersistingSession`], enforces that ordering: it calls
//! the raw [`SessionModule`], exports the module state, hands it to
//! [`SessionPersistence`] and only then releases the output.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::errors::{CourierError, CourierResult, SessionError};
use crate::types::{Seeker, Timestamp, UserId};

// ----------------------------------------------------------------------------
// Session Status
// ----------------------------------------------------------------------------

/// Per-peer session state as reported by the session module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    /// The module has never heard of this peer
    UnknownPeer,
    /// Peer known, no session and no pending handshake
    NoSession,
    /// We announced, the peer has not answered yet
    SelfRequested,
    /// The peer announced, we have not answered yet
    PeerRequested,
    /// Both handshake halves exchanged
    Active,
    /// Session torn down and unusable
    Killed,
    /// Too many unacknowledged messages in flight
    Saturated,
}

impl SessionStatus {
    /// Statuses under which the outbound queue may be processed
    pub fn allows_sending(&self) -> bool {
        matches!(
            self,
            SessionStatus::Active | SessionStatus::SelfRequested | SessionStatus::Saturated
        )
    }
}

// ----------------------------------------------------------------------------
// Operation Outputs
// ----------------------------------------------------------------------------

/// Result of successfully verifying an incoming announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnouncementResult {
    pub announcer_id: UserId,
    pub announcer_public_key: Vec<u8>,
    pub timestamp: Timestamp,
    pub user_data: Vec<u8>,
}

/// A decrypted message-board entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingBoardMessage {
    pub plaintext: Vec<u8>,
    pub sender_id: UserId,
    pub timestamp: Timestamp,
    /// Our own seekers the peer confirms having read
    pub acknowledged_seekers: Vec<Seeker>,
}

/// An encrypted message ready for the message board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingBoardMessage {
    pub seeker: Seeker,
    pub ciphertext: Vec<u8>,
}

// ----------------------------------------------------------------------------
// Session Capability Trait
// ----------------------------------------------------------------------------

/// Handshake and per-message crypto operations for one local identity
pub trait SessionCapability: Send + Sync {
    /// Start (or renew) a session with the owner of `peer_public_key`
    fn establish_outgoing_session(
        &self,
        peer_public_key: &[u8],
        user_data: &[u8],
    ) -> CourierResult<Vec<u8>>;

    /// Verify an announcement; invalid or stale input yields `None`
    fn feed_incoming_announcement(&self, announcement: &[u8]) -> Option<AnnouncementResult>;

    /// Seekers currently worth polling on the message board
    fn message_board_read_keys(&self) -> Vec<Seeker>;

    /// Decrypt one board entry; undecryptable input yields `None`
    fn feed_incoming_message_board_read(
        &self,
        seeker: &Seeker,
        ciphertext: &[u8],
    ) -> Option<IncomingBoardMessage>;

    /// Encrypt for `peer`; `Ok(None)` means the session is not ready
    fn send_message(
        &self,
        peer: &UserId,
        plaintext: &[u8],
    ) -> CourierResult<Option<OutgoingBoardMessage>>;

    fn peer_session_status(&self, peer: &UserId) -> SessionStatus;

    /// Forget every session secret shared with `peer`
    fn peer_discard(&self, peer: &UserId) -> CourierResult<()>;

    /// Expire idle sessions; returns the peers that need a keep-alive
    fn refresh(&self) -> CourierResult<Vec<UserId>>;
}

// ----------------------------------------------------------------------------
// Raw Module and Persistence Contracts
// ----------------------------------------------------------------------------

/// The opaque cryptographic module as shipped by its vendor
pub trait SessionModule: Send {
    fn establish_outgoing_session(
        &mut self,
        peer_public_key: &[u8],
        user_data: &[u8],
    ) -> Option<Vec<u8>>;
    fn feed_incoming_announcement(&mut self, announcement: &[u8]) -> Option<AnnouncementResult>;
    fn message_board_read_keys(&self) -> Vec<Seeker>;
    fn feed_incoming_message_board_read(
        &mut self,
        seeker: &Seeker,
        ciphertext: &[u8],
    ) -> Option<IncomingBoardMessage>;
    fn send_message(&mut self, peer: &UserId, plaintext: &[u8]) -> Option<OutgoingBoardMessage>;
    fn peer_session_status(&self, peer: &UserId) -> SessionStatus;
    fn peer_discard(&mut self, peer: &UserId);
    fn refresh(&mut self) -> Vec<UserId>;

    /// Serialized (and module-encrypted) state blob
    fn export_state(&self) -> Vec<u8>;
}

/// Durable home of the session module state
pub trait SessionPersistence: Send + Sync {
    /// Durably write `state`; must not return before the write is complete
    fn persist_session(&self, owner: &UserId, state: &[u8]) -> CourierResult<()>;

    /// Last persisted state, if any
    fn load_session(&self, owner: &UserId) -> CourierResult<Option<Vec<u8>>>;
}

// ----------------------------------------------------------------------------
// Persisting Adapter
// ----------------------------------------------------------------------------

/// [`SessionCapability`] over a raw module, persisting before releasing output
pub struct PersistingSession<M: SessionModule> {
    owner: UserId,
    module: Mutex<M>,
    persistence: Arc<dyn SessionPersistence>,
}

impl<M: SessionModule> PersistingSession<M> {
    /// Wrap an already initialized module
    pub fn new(owner: UserId, module: M, persistence: Arc<dyn SessionPersistence>) -> Self {
        Self {
            owner,
            module: Mutex::new(module),
            persistence,
        }
    }

    /// Rebuild the module from the last persisted blob, or create a fresh one
    pub fn restore<D, F>(
        owner: UserId,
        persistence: Arc<dyn SessionPersistence>,
        decode: D,
        fresh: F,
    ) -> CourierResult<Self>
    where
        D: FnOnce(&[u8]) -> CourierResult<M>,
        F: FnOnce() -> M,
    {
        let module = match persistence.load_session(&owner)? {
            Some(blob) => {
                debug!("Restoring session state for {} ({} bytes)", owner, blob.len());
                decode(&blob)?
            }
            None => fresh(),
        };
        Ok(Self::new(owner, module, persistence))
    }

    pub fn owner(&self) -> &UserId {
        &self.owner
    }

    fn lock(&self) -> CourierResult<MutexGuard<'_, M>> {
        self.module
            .lock()
            .map_err(|_| CourierError::Session(SessionError::StatePoisoned))
    }

    /// Export and durably store the module state while the lock is held
    fn persist(&self, module: &M) -> CourierResult<()> {
        let state = module.export_state();
        self.persistence
            .persist_session(&self.owner, &state)
            .map_err(|e| {
                error!("Failed to persist session state for {}: {}", self.owner, e);
                CourierError::Session(SessionError::PersistFailed {
                    reason: e.to_string(),
                })
            })
    }
}

fn key_fingerprint(public_key: &[u8]) -> String {
    hex::encode(&public_key[..public_key.len().min(8)])
}

impl<M: SessionModule> SessionCapability for PersistingSession<M> {
    fn establish_outgoing_session(
        &self,
        peer_public_key: &[u8],
        user_data: &[u8],
    ) -> CourierResult<Vec<u8>> {
        let mut module = self.lock()?;
        let announcement = module
            .establish_outgoing_session(peer_public_key, user_data)
            .ok_or_else(|| {
                CourierError::handshake_failed(
                    key_fingerprint(peer_public_key),
                    "session module refused to establish a session",
                )
            })?;
        self.persist(&module)?;
        Ok(announcement)
    }

    fn feed_incoming_announcement(&self, announcement: &[u8]) -> Option<AnnouncementResult> {
        let mut module = self.lock().ok()?;
        let result = module.feed_incoming_announcement(announcement)?;
        self.persist(&module).ok()?;
        Some(result)
    }

    fn message_board_read_keys(&self) -> Vec<Seeker> {
        match self.lock() {
            Ok(module) => module.message_board_read_keys(),
            Err(e) => {
                error!("Cannot read seekers: {}", e);
                Vec::new()
            }
        }
    }

    fn feed_incoming_message_board_read(
        &self,
        seeker: &Seeker,
        ciphertext: &[u8],
    ) -> Option<IncomingBoardMessage> {
        let mut module = self.lock().ok()?;
        let message = module.feed_incoming_message_board_read(seeker, ciphertext)?;
        self.persist(&module).ok()?;
        Some(message)
    }

    fn send_message(
        &self,
        peer: &UserId,
        plaintext: &[u8],
    ) -> CourierResult<Option<OutgoingBoardMessage>> {
        let mut module = self.lock()?;
        match module.send_message(peer, plaintext) {
            Some(output) => {
                self.persist(&module)?;
                Ok(Some(output))
            }
            None => Ok(None),
        }
    }

    fn peer_session_status(&self, peer: &UserId) -> SessionStatus {
        match self.lock() {
            Ok(module) => module.peer_session_status(peer),
            Err(_) => SessionStatus::Killed,
        }
    }

    fn peer_discard(&self, peer: &UserId) -> CourierResult<()> {
        let mut module = self.lock()?;
        module.peer_discard(peer);
        self.persist(&module)
    }

    fn refresh(&self) -> CourierResult<Vec<UserId>> {
        let mut module = self.lock()?;
        let peers = module.refresh();
        self.persist(&module)?;
        Ok(peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Module whose state is a counter of mutating calls
    struct CountingModule {
        calls: u32,
    }

    impl SessionModule for CountingModule {
        fn establish_outgoing_session(&mut self, _: &[u8], user_data: &[u8]) -> Option<Vec<u8>> {
            self.calls += 1;
            Some(user_data.to_vec())
        }
        fn feed_incoming_announcement(&mut self, _: &[u8]) -> Option<AnnouncementResult> {
            None
        }
        fn message_board_read_keys(&self) -> Vec<Seeker> {
            Vec::new()
        }
        fn feed_incoming_message_board_read(
            &mut self,
            _: &Seeker,
            _: &[u8],
        ) -> Option<IncomingBoardMessage> {
            None
        }
        fn send_message(&mut self, _: &UserId, plaintext: &[u8]) -> Option<OutgoingBoardMessage> {
            self.calls += 1;
            Some(OutgoingBoardMessage {
                seeker: Seeker::new(vec![self.calls as u8]),
                ciphertext: plaintext.to_vec(),
            })
        }
        fn peer_session_status(&self, _: &UserId) -> SessionStatus {
            SessionStatus::Active
        }
        fn peer_discard(&mut self, _: &UserId) {
            self.calls += 1;
        }
        fn refresh(&mut self) -> Vec<UserId> {
            Vec::new()
        }
        fn export_state(&self) -> Vec<u8> {
            self.calls.to_be_bytes().to_vec()
        }
    }

    #[derive(Default)]
    struct RecordingPersistence {
        blobs: Mutex<Vec<Vec<u8>>>,
        fail: AtomicBool,
    }

    impl SessionPersistence for RecordingPersistence {
        fn persist_session(&self, _: &UserId, state: &[u8]) -> CourierResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CourierError::storage("disk full"));
            }
            self.blobs.lock().unwrap().push(state.to_vec());
            Ok(())
        }
        fn load_session(&self, _: &UserId) -> CourierResult<Option<Vec<u8>>> {
            Ok(self.blobs.lock().unwrap().last().cloned())
        }
    }

    fn adapter(persistence: Arc<RecordingPersistence>) -> PersistingSession<CountingModule> {
        PersistingSession::new(UserId::new([9; 32]), CountingModule { calls: 0 }, persistence)
    }

    #[test]
    fn test_state_is_persisted_before_output_is_released() {
        let persistence = Arc::new(RecordingPersistence::default());
        let session = adapter(persistence.clone());

        let output = session
            .send_message(&UserId::new([1; 32]), b"hello")
            .unwrap()
            .unwrap();
        assert_eq!(output.ciphertext, b"hello".to_vec());
        assert_eq!(
            persistence.blobs.lock().unwrap().last().cloned(),
            Some(1u32.to_be_bytes().to_vec())
        );
    }

    #[test]
    fn test_output_is_withheld_when_persistence_fails() {
        let persistence = Arc::new(RecordingPersistence::default());
        persistence.fail.store(true, Ordering::SeqCst);
        let session = adapter(persistence.clone());

        let result = session.send_message(&UserId::new([1; 32]), b"hello");
        assert!(matches!(
            result,
            Err(CourierError::Session(SessionError::PersistFailed { .. }))
        ));

        let result = session.establish_outgoing_session(&[1; 32], b"hi");
        assert!(result.is_err());
    }

    #[test]
    fn test_restore_uses_last_persisted_blob() {
        let persistence = Arc::new(RecordingPersistence::default());
        {
            let session = adapter(persistence.clone());
            session.establish_outgoing_session(&[2; 32], b"").unwrap();
            session.peer_discard(&UserId::new([2; 32])).unwrap();
        }

        let restored = PersistingSession::restore(
            UserId::new([9; 32]),
            persistence.clone(),
            |blob| {
                let calls = u32::from_be_bytes(blob.try_into().map_err(|_| CourierError::corrupt("bad blob"))?);
                Ok(CountingModule { calls })
            },
            || CountingModule { calls: 0 },
        )
        .unwrap();
        assert_eq!(restored.lock().unwrap().calls, 2);
    }

    #[test]
    fn test_sending_statuses() {
        assert!(SessionStatus::Active.allows_sending());
        assert!(SessionStatus::SelfRequested.allows_sending());
        assert!(SessionStatus::Saturated.allows_sending());
        assert!(!SessionStatus::PeerRequested.allows_sending());
        assert!(!SessionStatus::Killed.allows_sending());
        assert!(!SessionStatus::NoSession.allows_sending());
    }
}
