//! Peers as tokio tasks.
//!
//! Each peer runs in its own task and owns its [`Peer`]. Commands arrive on
//! an unbounded inbox; everything the peer sends goes to a single router
//! task as JSON, which fans it out to every other inbox. The router also
//! carries session events, so a departing peer's last updates always reach
//! the others before its departure does.
//!
//! Every queued command is counted. The cluster has settled when the count
//! drops to zero.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rollcall_core::{MemberId, Peer, PeerView, ReconcileOutcome, RosterConfig};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{InvariantViolation, Result, SimError};

/// Work for a peer task.
#[derive(Debug)]
pub enum Command {
    /// Session layer: a member arrived.
    Arrived(MemberId),
    /// Session layer: a member departed.
    Departed(MemberId),
    /// Take over as coordinator.
    AssumeCoordinator,
    /// Local user flipped their activation.
    Toggle,
    /// Local user set their activation.
    SetActive(bool),
    /// An envelope from another peer, as JSON.
    Deliver(String),
    /// Send a late-join snapshot to this inbox.
    SnapshotTo(UnboundedSender<Command>),
    /// Run a reconcile pass and report the outcome.
    Reconcile(oneshot::Sender<ReconcileOutcome>),
    /// Finish queued work and hand the peer back.
    Stop,
}

/// Traffic for the router, handled strictly in order.
#[derive(Debug)]
enum Route {
    Envelope { from: MemberId, json: String },
    Join { id: MemberId, inbox: UnboundedSender<Command> },
    Leave(MemberId),
    Arrived(MemberId),
    Departed(MemberId),
    Promote(MemberId),
}

/// Outstanding work across the cluster.
#[derive(Debug, Clone, Default)]
struct Pending(Arc<AtomicUsize>);

impl Pending {
    fn add(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn done(&self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }

    fn is_idle(&self) -> bool {
        self.0.load(Ordering::SeqCst) == 0
    }

    fn send<T>(&self, tx: &UnboundedSender<T>, item: T) -> bool {
        self.add();
        if tx.send(item).is_err() {
            self.done();
            return false;
        }
        true
    }
}

/// Latest view published by each running peer.
type Board = Arc<RwLock<BTreeMap<MemberId, PeerView>>>;

/// A group of peer tasks joined by a router.
pub struct Cluster {
    config: RosterConfig,
    router: UnboundedSender<Route>,
    router_task: JoinHandle<()>,
    inboxes: BTreeMap<MemberId, UnboundedSender<Command>>,
    tasks: BTreeMap<MemberId, JoinHandle<Peer>>,
    board: Board,
    pending: Pending,
    coordinator: Option<MemberId>,
    next_id: u32,
}

impl Cluster {
    /// Start an empty cluster. Must be called inside a tokio runtime.
    pub fn start(config: RosterConfig) -> Result<Self> {
        config.validate()?;
        let (router, routes) = mpsc::unbounded_channel();
        let pending = Pending::default();
        let router_task = tokio::spawn(run_router(routes, pending.clone()));
        Ok(Self {
            config,
            router,
            router_task,
            inboxes: BTreeMap::new(),
            tasks: BTreeMap::new(),
            board: Arc::new(RwLock::new(BTreeMap::new())),
            pending,
            coordinator: None,
            next_id: 1,
        })
    }

    /// Ids of running peers.
    pub fn ids(&self) -> Vec<MemberId> {
        self.inboxes.keys().copied().collect()
    }

    /// The peer the session layer made coordinator.
    pub fn coordinator(&self) -> Option<MemberId> {
        self.coordinator
    }

    /// Spawn a new peer and announce it.
    pub fn join(&mut self) -> Result<MemberId> {
        let id = MemberId::new(self.next_id)
            .filter(|_| self.next_id < u32::MAX)
            .ok_or(SimError::IdsExhausted)?;
        self.next_id += 1;

        let (inbox, commands) = mpsc::unbounded_channel();
        let peer = Peer::new(id, &self.config);
        let task = tokio::spawn(run_peer(
            peer,
            commands,
            self.router.clone(),
            self.pending.clone(),
            self.board.clone(),
        ));
        self.inboxes.insert(id, inbox.clone());
        self.tasks.insert(id, task);
        info!(peer = %id, group = self.inboxes.len(), "peer task started");

        self.route(Route::Join { id, inbox })?;
        if self.coordinator.is_none() {
            self.coordinator = Some(id);
            self.route(Route::Promote(id))?;
        }
        self.route(Route::Arrived(id))?;
        Ok(id)
    }

    /// Stop a peer, then announce its departure. Returns its final state.
    pub async fn leave(&mut self, id: MemberId) -> Result<Peer> {
        let task = self.tasks.remove(&id).ok_or(SimError::UnknownPeer(id))?;
        self.inboxes.remove(&id);
        self.route(Route::Leave(id))?;
        let peer = task.await.map_err(|_| SimError::PeerGone(id))?;
        info!(peer = %id, group = self.inboxes.len(), "peer task stopped");

        self.route(Route::Departed(id))?;
        if self.coordinator == Some(id) {
            self.coordinator = self.inboxes.keys().next().copied();
            if let Some(next) = self.coordinator {
                self.route(Route::Promote(next))?;
            }
        }
        Ok(peer)
    }

    /// Flip a peer's activation.
    pub fn toggle(&self, id: MemberId) -> Result<()> {
        self.command(id, Command::Toggle)
    }

    /// Set a peer's activation.
    pub fn set_active(&self, id: MemberId, active: bool) -> Result<()> {
        self.command(id, Command::SetActive(active))
    }

    /// Ask a peer to reconcile now.
    pub async fn reconcile(&self, id: MemberId) -> Result<ReconcileOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.command(id, Command::Reconcile(reply))?;
        outcome.await.map_err(|_| SimError::PeerGone(id))
    }

    /// Latest view of every running peer.
    pub async fn views(&self) -> BTreeMap<MemberId, PeerView> {
        self.board.read().await.clone()
    }

    /// Wait until no work is queued anywhere.
    pub async fn settle(&self, limit: Duration) -> Result<()> {
        let pending = self.pending.clone();
        tokio::time::timeout(limit, async move {
            while !pending.is_idle() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .map_err(|_| SimError::Timeout(limit))
    }

    /// Check the membership invariants against the published views.
    pub async fn check_invariants(&self) -> std::result::Result<(), InvariantViolation> {
        check_views(&self.views().await)
    }

    /// Stop every peer and the router. Returns the final peers.
    pub async fn shutdown(mut self) -> Result<Vec<Peer>> {
        let mut peers = Vec::new();
        for id in self.ids() {
            self.inboxes.remove(&id);
            self.route(Route::Leave(id))?;
            if let Some(task) = self.tasks.remove(&id) {
                peers.push(task.await.map_err(|_| SimError::PeerGone(id))?);
            }
        }
        drop(self.router);
        if self.router_task.await.is_err() {
            warn!("router task panicked");
        }
        Ok(peers)
    }

    fn command(&self, id: MemberId, command: Command) -> Result<()> {
        let inbox = self.inboxes.get(&id).ok_or(SimError::UnknownPeer(id))?;
        if self.pending.send(inbox, command) {
            Ok(())
        } else {
            Err(SimError::PeerGone(id))
        }
    }

    fn route(&self, route: Route) -> Result<()> {
        if self.pending.send(&self.router, route) {
            Ok(())
        } else {
            Err(SimError::RouterGone)
        }
    }
}

async fn run_router(mut routes: UnboundedReceiver<Route>, pending: Pending) {
    let mut inboxes: BTreeMap<MemberId, UnboundedSender<Command>> = BTreeMap::new();

    while let Some(route) = routes.recv().await {
        match route {
            Route::Envelope { from, json } => {
                for (to, inbox) in &inboxes {
                    if *to != from {
                        pending.send(inbox, Command::Deliver(json.clone()));
                    }
                }
            }
            Route::Join { id, inbox } => {
                // Anything forwarded to the source before this point is in
                // its snapshot; anything after goes to the newcomer directly.
                if let Some(source) = inboxes.values().next() {
                    pending.send(source, Command::SnapshotTo(inbox.clone()));
                }
                inboxes.insert(id, inbox);
            }
            Route::Leave(id) => {
                if let Some(inbox) = inboxes.remove(&id) {
                    pending.send(&inbox, Command::Stop);
                }
            }
            Route::Arrived(id) => {
                for inbox in inboxes.values() {
                    pending.send(inbox, Command::Arrived(id));
                }
            }
            Route::Departed(id) => {
                for inbox in inboxes.values() {
                    pending.send(inbox, Command::Departed(id));
                }
            }
            Route::Promote(id) => match inboxes.get(&id) {
                Some(inbox) => {
                    pending.send(inbox, Command::AssumeCoordinator);
                }
                None => debug!(peer = %id, "promotion for absent peer"),
            },
        }
        pending.done();
    }
    trace!("router stopped");
}

async fn run_peer(
    mut peer: Peer,
    mut commands: UnboundedReceiver<Command>,
    router: UnboundedSender<Route>,
    pending: Pending,
    board: Board,
) -> Peer {
    let id = peer.id();
    board.write().await.insert(id, peer.view());

    while let Some(command) = commands.recv().await {
        let stop = matches!(command, Command::Stop);
        match command {
            Command::Arrived(member) => peer.member_arrived(member),
            Command::Departed(member) => peer.member_departed(member),
            Command::AssumeCoordinator => peer.assume_coordinator(),
            Command::Toggle => peer.toggle_active(),
            Command::SetActive(active) => peer.set_active(active),
            Command::Deliver(json) => {
                if let Err(e) = peer.receive_json(&json) {
                    warn!(peer = %id, error = %e, "dropping undecodable envelope");
                }
            }
            Command::SnapshotTo(inbox) => {
                for envelope in peer.snapshot() {
                    match envelope.to_json() {
                        Ok(json) => {
                            pending.send(&inbox, Command::Deliver(json));
                        }
                        Err(e) => warn!(peer = %id, error = %e, "snapshot envelope failed to encode"),
                    }
                }
            }
            Command::Reconcile(reply) => {
                let _ = reply.send(peer.reconcile());
            }
            Command::Stop => {}
        }

        for envelope in peer.drain_outbox() {
            match envelope.to_json() {
                Ok(json) => {
                    pending.send(&router, Route::Envelope { from: id, json });
                }
                Err(e) => warn!(peer = %id, error = %e, "envelope failed to encode"),
            }
        }
        for notification in peer.drain_notifications() {
            trace!(peer = %id, ?notification, "notification");
        }

        if stop {
            board.write().await.remove(&id);
            pending.done();
            // Snapshots addressed to us may still trail in.
            commands.close();
            while commands.try_recv().is_ok() {
                pending.done();
            }
            break;
        }
        board.write().await.insert(id, peer.view());
        pending.done();
    }
    peer
}

/// The invariants that can be read off views alone.
pub(crate) fn check_views(
    views: &BTreeMap<MemberId, PeerView>,
) -> std::result::Result<(), InvariantViolation> {
    for view in views.values() {
        let mut owners = BTreeSet::new();
        for row in &view.slots {
            if let Some(owner) = row.owner {
                if !owners.insert(owner) {
                    return Err(InvariantViolation::DuplicateOwner {
                        peer: view.peer,
                        member: owner,
                    });
                }
            }
        }

        let listed: Vec<MemberId> = view.members.iter().flatten().copied().collect();
        if listed.len() != view.member_count {
            return Err(InvariantViolation::CountMismatch { peer: view.peer });
        }
        let unique: BTreeSet<MemberId> = listed.iter().copied().collect();
        let active: BTreeSet<MemberId> = view
            .slots
            .iter()
            .filter(|row| row.active)
            .filter_map(|row| row.owner)
            .collect();
        if unique.len() != listed.len() || unique != active {
            return Err(InvariantViolation::RosterMismatch { peer: view.peer });
        }
    }

    let mut all = views.values();
    if let Some(first) = all.next() {
        for other in all {
            if !other.same_state(first) {
                return Err(InvariantViolation::Diverged {
                    a: first.peer,
                    b: other.peer,
                });
            }
        }
        let coordinators = views.values().filter(|v| v.role.is_coordinator()).count();
        if coordinators != 1 {
            return Err(InvariantViolation::CoordinatorCount(coordinators));
        }
    }
    Ok(())
}
