//! Shared test utilities for runtime integration tests
//!
//! Provides a fake session module with a simple two-party handshake, a fake
//! bulletin shared by every party, and helpers to build wired-up parties.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use courier_core::testing::ManualTimeSource;
use courier_core::{
    event_channel, AnnouncementPage, AnnouncementResult, BoardEntry, BulletinItem,
    BulletinTransport, Contact, CourierConfig, CourierError, CourierEvent, CourierResult,
    Discussion, EventReceiver, IncomingBoardMessage, MemoryStore, Message, OutgoingBoardMessage,
    PersistingSession, Seeker, SessionModule, SessionPersistence, SessionStatus, TimeSource,
    Timestamp, UserId,
};
use courier_runtime::{CourierRuntime, RuntimeBuilder};
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Fake Session Module
// ----------------------------------------------------------------------------

/// Handshake and counter state for one peer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerState {
    pub we_sent: bool,
    pub they_sent: bool,
    pub our_epoch: u32,
    pub their_epoch: u32,
    pub next_out: u32,
    pub next_in: u32,
    pub pending_acks: Vec<Seeker>,
}

/// Exported (persisted) state of the fake module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FakeModuleState {
    pub me: UserId,
    pub peers: BTreeMap<UserId, PeerState>,
    pub discards: u32,
}

/// Knobs a test can turn while the module sits inside the session adapter
#[derive(Debug, Default)]
pub struct FakeControls {
    /// Refuse to encrypt even when the session is active (simulated desync)
    pub refuse_encryption: AtomicBool,
    /// Return a result for an announcement epoch already seen
    pub accept_replays: AtomicBool,
    /// Peers returned by the next `refresh`
    pub keep_alive_peers: Mutex<Vec<UserId>>,
    pub discard_calls: AtomicUsize,
}

#[derive(Serialize, Deserialize)]
struct FakeAnnouncement {
    from: UserId,
    to: UserId,
    epoch: u32,
    user_data: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct FakeCipher {
    from: UserId,
    to: UserId,
    epoch: u32,
    seq: u32,
    sent_at: u64,
    acks: Vec<Seeker>,
    plaintext: Vec<u8>,
}

/// Announcement bytes as the fake module would produce them
pub fn forge_announcement(from: &UserId, to: &UserId, epoch: u32, user_data: &[u8]) -> Vec<u8> {
    bincode::serialize(&FakeAnnouncement {
        from: *from,
        to: *to,
        epoch,
        user_data: user_data.to_vec(),
    })
    .unwrap()
}

pub fn board_seeker(from: &UserId, to: &UserId, epoch: u32, seq: u32) -> Seeker {
    Seeker::new(format!("{}>{}#{}:{}", from, to, epoch, seq).into_bytes())
}

/// Session module whose "encryption" is plain bincode framing
pub struct FakeModule {
    state: FakeModuleState,
    controls: Arc<FakeControls>,
    time: ManualTimeSource,
}

impl FakeModule {
    pub fn new(me: UserId, controls: Arc<FakeControls>, time: ManualTimeSource) -> Self {
        Self {
            state: FakeModuleState {
                me,
                peers: BTreeMap::new(),
                discards: 0,
            },
            controls,
            time,
        }
    }

    /// Rebuild the module from an exported state blob
    pub fn from_state(
        blob: &[u8],
        controls: Arc<FakeControls>,
        time: ManualTimeSource,
    ) -> CourierResult<Self> {
        Ok(Self {
            state: bincode::deserialize(blob)?,
            controls,
            time,
        })
    }

    fn status(&self, peer: &UserId) -> SessionStatus {
        match self.state.peers.get(peer) {
            None => SessionStatus::UnknownPeer,
            Some(p) => match (p.we_sent, p.they_sent) {
                (true, true) => SessionStatus::Active,
                (true, false) => SessionStatus::SelfRequested,
                (false, true) => SessionStatus::PeerRequested,
                (false, false) => SessionStatus::NoSession,
            },
        }
    }
}

impl SessionModule for FakeModule {
    fn establish_outgoing_session(
        &mut self,
        peer_public_key: &[u8],
        user_data: &[u8],
    ) -> Option<Vec<u8>> {
        let peer = UserId::from_slice(peer_public_key)?;
        let me = self.state.me;
        let p = self.state.peers.entry(peer).or_default();
        if p.we_sent && p.they_sent {
            // Renewal of an active session waits for the peer again
            p.they_sent = false;
        }
        p.we_sent = true;
        p.our_epoch += 1;
        p.next_out = 0;
        bincode::serialize(&FakeAnnouncement {
            from: me,
            to: peer,
            epoch: p.our_epoch,
            user_data: user_data.to_vec(),
        })
        .ok()
    }

    fn feed_incoming_announcement(&mut self, announcement: &[u8]) -> Option<AnnouncementResult> {
        let a: FakeAnnouncement = bincode::deserialize(announcement).ok()?;
        if a.to != self.state.me {
            return None;
        }
        let replays = self.controls.accept_replays.load(Ordering::SeqCst);
        let p = self.state.peers.entry(a.from).or_default();
        if a.epoch < p.their_epoch || (a.epoch == p.their_epoch && !replays) {
            return None;
        }
        if a.epoch > p.their_epoch {
            if p.we_sent && p.they_sent {
                // The peer renewed an active session; we must answer
                p.we_sent = false;
            }
            p.they_sent = true;
            p.their_epoch = a.epoch;
            p.next_in = 0;
        }
        Some(AnnouncementResult {
            announcer_id: a.from,
            announcer_public_key: a.from.to_vec(),
            timestamp: self.time.now(),
            user_data: a.user_data,
        })
    }

    fn message_board_read_keys(&self) -> Vec<Seeker> {
        let me = self.state.me;
        self.state
            .peers
            .iter()
            .filter(|(_, p)| p.they_sent && p.their_epoch > 0)
            .map(|(peer, p)| board_seeker(peer, &me, p.their_epoch, p.next_in))
            .collect()
    }

    fn feed_incoming_message_board_read(
        &mut self,
        seeker: &Seeker,
        ciphertext: &[u8],
    ) -> Option<IncomingBoardMessage> {
        let c: FakeCipher = bincode::deserialize(ciphertext).ok()?;
        let me = self.state.me;
        if c.to != me {
            return None;
        }
        let p = self.state.peers.get_mut(&c.from)?;
        if c.epoch != p.their_epoch
            || c.seq != p.next_in
            || *seeker != board_seeker(&c.from, &me, c.epoch, c.seq)
        {
            return None;
        }
        p.next_in += 1;
        p.pending_acks.push(seeker.clone());
        Some(IncomingBoardMessage {
            plaintext: c.plaintext,
            sender_id: c.from,
            timestamp: Timestamp::new(c.sent_at),
            acknowledged_seekers: c.acks,
        })
    }

    fn send_message(&mut self, peer: &UserId, plaintext: &[u8]) -> Option<OutgoingBoardMessage> {
        if self.controls.refuse_encryption.load(Ordering::SeqCst) {
            return None;
        }
        if self.status(peer) != SessionStatus::Active {
            return None;
        }
        let me = self.state.me;
        let sent_at = self.time.now().as_millis();
        let p = self.state.peers.get_mut(peer)?;
        let seq = p.next_out;
        p.next_out += 1;
        let seeker = board_seeker(&me, peer, p.our_epoch, seq);
        let ciphertext = bincode::serialize(&FakeCipher {
            from: me,
            to: *peer,
            epoch: p.our_epoch,
            seq,
            sent_at,
            acks: std::mem::take(&mut p.pending_acks),
            plaintext: plaintext.to_vec(),
        })
        .ok()?;
        Some(OutgoingBoardMessage { seeker, ciphertext })
    }

    fn peer_session_status(&self, peer: &UserId) -> SessionStatus {
        self.status(peer)
    }

    fn peer_discard(&mut self, peer: &UserId) {
        self.state.peers.remove(peer);
        self.state.discards += 1;
        self.controls.discard_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn refresh(&mut self) -> Vec<UserId> {
        self.controls
            .keep_alive_peers
            .lock()
            .map(|mut peers| std::mem::take(&mut *peers))
            .unwrap_or_default()
    }

    fn export_state(&self) -> Vec<u8> {
        bincode::serialize(&self.state).unwrap_or_default()
    }
}

// ----------------------------------------------------------------------------
// Fake Bulletin
// ----------------------------------------------------------------------------

/// Shared announcement bulletin and message board
#[derive(Debug, Default)]
pub struct FakeBulletin {
    announcements: Mutex<Vec<Vec<u8>>>,
    board: Mutex<HashMap<Seeker, Vec<u8>>>,
    pub fail_announcements: AtomicUsize,
    pub fail_sends: AtomicUsize,
    pub fail_fetches: AtomicUsize,
    pub board_sends: AtomicUsize,
    pub board_fetches: AtomicUsize,
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl FakeBulletin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn announcement_count(&self) -> usize {
        self.announcements.lock().unwrap().len()
    }

    pub fn last_announcement(&self) -> Option<Vec<u8>> {
        self.announcements.lock().unwrap().last().cloned()
    }

    /// Append raw bytes to the bulletin, returning their counter
    pub fn post_announcement(&self, data: Vec<u8>) -> u64 {
        let mut announcements = self.announcements.lock().unwrap();
        announcements.push(data);
        announcements.len() as u64
    }

    pub fn put_on_board(&self, seeker: Seeker, ciphertext: Vec<u8>) {
        self.board.lock().unwrap().insert(seeker, ciphertext);
    }

    pub fn board_entry(&self, seeker: &Seeker) -> Option<Vec<u8>> {
        self.board.lock().unwrap().get(seeker).cloned()
    }

    pub fn board_len(&self) -> usize {
        self.board.lock().unwrap().len()
    }
}

#[async_trait]
impl BulletinTransport for FakeBulletin {
    async fn fetch_messages(&self, seekers: &[Seeker]) -> CourierResult<Vec<BoardEntry>> {
        tokio::task::yield_now().await;
        self.board_fetches.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.fail_fetches) {
            return Err(CourierError::fetch_failed("board unreachable"));
        }
        let board = self.board.lock().unwrap();
        Ok(seekers
            .iter()
            .filter_map(|seeker| {
                board.get(seeker).map(|ciphertext| BoardEntry {
                    seeker: seeker.clone(),
                    ciphertext: ciphertext.clone(),
                })
            })
            .collect())
    }

    async fn send_message(&self, entry: &BoardEntry) -> CourierResult<()> {
        tokio::task::yield_now().await;
        if take_failure(&self.fail_sends) {
            return Err(CourierError::send_failed("board unreachable"));
        }
        self.board_sends.fetch_add(1, Ordering::SeqCst);
        self.put_on_board(entry.seeker.clone(), entry.ciphertext.clone());
        Ok(())
    }

    async fn send_announcement(&self, announcement: &[u8]) -> CourierResult<u64> {
        tokio::task::yield_now().await;
        if take_failure(&self.fail_announcements) {
            return Err(CourierError::send_failed("bulletin unreachable"));
        }
        Ok(self.post_announcement(announcement.to_vec()))
    }

    async fn fetch_announcements(&self, cursor: Option<u64>) -> CourierResult<AnnouncementPage> {
        tokio::task::yield_now().await;
        let after = cursor.unwrap_or(0);
        let announcements = self.announcements.lock().unwrap();
        let items: Vec<BulletinItem> = announcements
            .iter()
            .enumerate()
            .map(|(index, data)| BulletinItem {
                counter: index as u64 + 1,
                data: data.clone(),
            })
            .filter(|item| item.counter > after)
            .collect();
        let next_cursor = items.last().map(|item| item.counter);
        Ok(AnnouncementPage { items, next_cursor })
    }
}

// ----------------------------------------------------------------------------
// Parties
// ----------------------------------------------------------------------------

/// Shared network and clock
pub struct World {
    pub bulletin: Arc<FakeBulletin>,
    pub time: ManualTimeSource,
}

impl World {
    pub fn new() -> Self {
        Self {
            bulletin: Arc::new(FakeBulletin::new()),
            time: ManualTimeSource::new_at(1_000_000),
        }
    }

    pub fn party(&self, name: &str, seed: u8) -> Party {
        self.party_with_config(name, seed, CourierConfig::testing().with_username(name))
    }

    pub fn party_with_config(&self, name: &str, seed: u8, config: CourierConfig) -> Party {
        let id = UserId::new([seed; 32]);
        let store = Arc::new(MemoryStore::new());
        let controls = Arc::new(FakeControls::default());
        let module = FakeModule::new(id, controls.clone(), self.time.clone());
        let session = Arc::new(PersistingSession::new(id, module, store.clone()));
        self.assemble(name, id, config, store, session, controls)
    }

    /// Simulate a process restart: same store, session restored from its blob
    pub fn restart(&self, party: Party) -> Party {
        let Party {
            id,
            name,
            store,
            controls,
            runtime,
            ..
        } = party;
        let config = runtime.config().clone();
        drop(runtime);

        let time = self.time.clone();
        let restored_controls = controls.clone();
        let session = PersistingSession::restore(
            id,
            store.clone(),
            |blob| FakeModule::from_state(blob, restored_controls, time.clone()),
            || FakeModule::new(id, controls.clone(), time.clone()),
        )
        .expect("session should restore");
        self.assemble(&name, id, config, store, Arc::new(session), controls)
    }

    fn assemble(
        &self,
        name: &str,
        id: UserId,
        config: CourierConfig,
        store: Arc<MemoryStore>,
        session: Arc<PersistingSession<FakeModule>>,
        controls: Arc<FakeControls>,
    ) -> Party {
        let (events, receiver) = event_channel();

        let runtime = RuntimeBuilder::new(id)
            .with_config(config)
            .with_session(session.clone())
            .with_store(store.clone())
            .with_transport(self.bulletin.clone())
            .with_event_sink(events)
            .with_time_source(Arc::new(self.time.clone()))
            .build()
            .expect("runtime should build");

        Party {
            id,
            name: name.to_string(),
            store,
            session,
            controls,
            runtime,
            events: receiver,
        }
    }
}

/// One local identity with its own store and session
pub struct Party {
    pub id: UserId,
    pub name: String,
    pub store: Arc<MemoryStore>,
    pub session: Arc<PersistingSession<FakeModule>>,
    pub controls: Arc<FakeControls>,
    pub runtime: CourierRuntime,
    pub events: EventReceiver,
}

impl Party {
    pub fn add_contact(&self, other: &Party) -> Contact {
        self.runtime
            .discussions()
            .add_contact(&other.id, &other.name, other.id.to_vec())
            .expect("contact should be added")
    }

    pub fn discussion_with(&self, other: &Party) -> Discussion {
        self.runtime
            .discussions()
            .discussion(&other.id)
            .unwrap()
            .expect("discussion should exist")
    }

    pub fn messages_with(&self, other: &Party) -> Vec<Message> {
        self.runtime.delivery().messages(&other.id).unwrap()
    }

    pub fn send_text(&self, other: &Party, content: &str) -> Message {
        self.runtime
            .delivery()
            .send(courier_runtime::MessageDraft::text(other.id.to_string(), content))
            .expect("message should be queued")
    }

    /// Last persisted state of the session module
    pub fn module_state(&self) -> FakeModuleState {
        let blob = self
            .store
            .load_session(&self.id)
            .unwrap()
            .expect("session state should be persisted");
        bincode::deserialize(&blob).unwrap()
    }

    pub fn drain_events(&mut self) -> Vec<CourierEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Run the full handshake: `initiator` starts, `responder` accepts
pub async fn connect(initiator: &Party, responder: &Party) {
    initiator.add_contact(responder);
    initiator
        .runtime
        .discussions()
        .start(&responder.id, Some("hello"))
        .await
        .expect("start should succeed");
    responder
        .runtime
        .announcements()
        .fetch_and_process()
        .await
        .expect("responder fetch should succeed");
    responder
        .runtime
        .discussions()
        .accept(&initiator.id, None)
        .await
        .expect("accept should succeed");
    initiator
        .runtime
        .announcements()
        .fetch_and_process()
        .await
        .expect("initiator fetch should succeed");
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
