//! NetworkRuntime — assembles the directory, router and transport for one peer.

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::directory::NetworkObjectDirectory;
use crate::error::{KernelError, KernelResult};
use crate::methods::NetworkedObject;
use crate::ownership::OwnershipTable;
use crate::router::RpcRouter;
use crate::supervisor::Supervisor;
use netview_types::args::RpcArgs;
use netview_types::config::NetConfig;
use netview_types::error::{NetViewError, NetViewResult};
use netview_types::ids::{ConnectionId, ObjectId, Owner, ParticipantRef};
use netview_types::policy::DeliveryPolicy;
use netview_wire::{
    ClientTransport, ConnectionEntry, ConnectionRegistry, ServerTransport, TcpClient, TcpServer,
    Transport, TransportEvent, WireError,
};
use netview_wire::transport::EventReceiver;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Which side of the session this peer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => write!(f, "server"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// One peer of a session: either the authoritative server or a client.
pub struct NetworkRuntime {
    config: NetConfig,
    transport: Arc<dyn Transport>,
    /// Present only on the server.
    server: Option<Arc<ServerTransport>>,
    directory: Arc<NetworkObjectDirectory>,
    router: RpcRouter,
    diagnostics: Arc<Diagnostics>,
    supervisor: Arc<Supervisor>,
    events: Mutex<EventReceiver>,
    connected: AtomicBool,
    /// The TCP accept loop, when the server is listening.
    accept: Option<JoinHandle<()>>,
}

impl NetworkRuntime {
    /// Build the server peer around an already running server transport.
    pub fn server(
        config: NetConfig,
        transport: Arc<ServerTransport>,
        events: EventReceiver,
    ) -> KernelResult<Self> {
        let dyn_transport: Arc<dyn Transport> = transport.clone();
        Self::assemble(config, dyn_transport, Some(transport), events)
    }

    /// Build a client peer around an established uplink.
    pub fn client(
        config: NetConfig,
        transport: ClientTransport,
        events: EventReceiver,
    ) -> KernelResult<Self> {
        Self::assemble(config, Arc::new(transport), None, events)
    }

    fn assemble(
        config: NetConfig,
        transport: Arc<dyn Transport>,
        server: Option<Arc<ServerTransport>>,
        events: EventReceiver,
    ) -> KernelResult<Self> {
        config.validate()?;
        let supervisor = Arc::new(Supervisor::new());
        let diagnostics = Arc::new(Diagnostics::new(config.diagnostics_capacity));
        let ownership = Arc::new(OwnershipTable::new(
            config.allow_client_authority_override,
        ));
        let directory = Arc::new(NetworkObjectDirectory::new(
            ownership,
            Arc::clone(&supervisor),
            config.duplicate_methods,
        ));
        let router = RpcRouter::new(
            Arc::clone(&transport),
            Arc::clone(&directory),
            Arc::clone(&diagnostics),
        );
        info!(
            role = %transport.local(),
            nickname = %config.nickname,
            "NetView runtime assembled"
        );
        Ok(Self {
            config,
            transport,
            server,
            directory,
            router,
            diagnostics,
            supervisor,
            events: Mutex::new(events),
            connected: AtomicBool::new(true),
            accept: None,
        })
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn role(&self) -> Role {
        if self.server.is_some() {
            Role::Server
        } else {
            Role::Client
        }
    }

    /// Whether this peer is the authoritative server.
    pub fn is_host(&self) -> bool {
        self.server.is_some()
    }

    /// The participant this peer acts as.
    pub fn local_participant(&self) -> ParticipantRef {
        self.transport.local()
    }

    /// A server is connected to its own session until it disconnects; a
    /// client until its link goes away.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn nickname(&self) -> &str {
        &self.config.nickname
    }

    /// Live connections and their nicknames. Server only.
    pub fn player_list(&self) -> NetViewResult<Vec<ConnectionEntry>> {
        Ok(self.require_server("list players")?.registry().connected())
    }

    pub fn directory(&self) -> &Arc<NetworkObjectDirectory> {
        &self.directory
    }

    pub fn ownership(&self) -> &Arc<OwnershipTable> {
        self.directory.ownership()
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Register a locally activated object under a fresh id.
    pub fn register_object(&self, object: Arc<dyn NetworkedObject>) -> NetViewResult<ObjectId> {
        self.directory.register(object)
    }

    /// Register an object under an id agreed with the other peers.
    pub fn register_object_with_id(
        &self,
        id: ObjectId,
        object: Arc<dyn NetworkedObject>,
    ) -> NetViewResult<()> {
        self.directory.register_with_id(id, object)
    }

    /// Deactivate an object on this peer. Idempotent.
    pub fn unregister_object(&self, id: ObjectId) -> bool {
        self.directory.unregister(id)
    }

    /// Rebuild an object's method table after it was re-enabled.
    pub fn reactivate_object(&self, id: ObjectId) -> NetViewResult<()> {
        self.directory.reactivate(id)
    }

    /// Spawn an object on the server, optionally owned by a client.
    pub fn instantiate(
        &self,
        object: Arc<dyn NetworkedObject>,
        owner: Option<ConnectionId>,
    ) -> NetViewResult<ObjectId> {
        self.require_server("instantiate objects")?;
        if let Some(connection) = owner {
            if !self.transport.is_connected(connection) {
                return Err(NetViewError::StaleParticipant(ParticipantRef::Client(
                    connection,
                )));
            }
        }
        let id = self.directory.register(object)?;
        if let Some(connection) = owner {
            let owner = Owner::Client(connection);
            self.ownership().assign(id, owner)?;
            self.router.announce_owner(id, owner);
        }
        Ok(id)
    }

    /// Remove an object on the server. Returns whether it was live.
    pub fn destroy(&self, id: ObjectId) -> NetViewResult<bool> {
        self.require_server("destroy objects")?;
        Ok(self.directory.unregister(id))
    }

    /// Remove every object on the server.
    pub fn destroy_all(&self) -> NetViewResult<Vec<ObjectId>> {
        self.require_server("destroy objects")?;
        Ok(self.directory.clear())
    }

    /// Lock or unlock client takeover of an object. Server only.
    pub fn set_overridable(&self, id: ObjectId, overridable: bool) -> NetViewResult<()> {
        self.require_server("change authority rules")?;
        self.ownership().set_overridable(id, overridable)
    }

    /// Invoke `method` on `object` with a delivery policy. Fire-and-forget.
    pub fn invoke_rpc(
        &self,
        object: ObjectId,
        method: &str,
        policy: DeliveryPolicy,
        args: RpcArgs,
    ) -> KernelResult<()> {
        if !self.is_connected() {
            return Err(WireError::ConnectionClosed.into());
        }
        self.router.invoke_rpc(object, method, policy, args)
    }

    /// Ask the server for authority over `object`.
    pub fn request_ownership_transfer(&self, object: ObjectId) -> KernelResult<()> {
        if !self.is_connected() {
            return Err(WireError::ConnectionClosed.into());
        }
        self.router.request_ownership_transfer(object)
    }

    pub fn owner_of(&self, object: ObjectId) -> Owner {
        self.ownership().get_owner(object)
    }

    pub fn is_authority(&self, object: ObjectId, participant: ParticipantRef) -> bool {
        self.ownership().is_authority(object, participant)
    }

    /// Whether this peer is the authority over `object`.
    pub fn is_mine(&self, object: ObjectId) -> bool {
        self.is_authority(object, self.local_participant())
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Most recent recoverable failures, newest first.
    pub fn recent_diagnostics(&self, limit: usize) -> Vec<Diagnostic> {
        self.diagnostics.recent(limit)
    }

    /// React to one transport event.
    pub async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected {
                connection,
                nickname,
            } => {
                info!(connection = %connection, nickname = %nickname, "Player joined");
            }
            TransportEvent::Message { from, message } => {
                self.router.handle_relay(from, message);
            }
            TransportEvent::Disconnected(connection) => {
                if self.is_host() {
                    // Let in-flight work for every object settle first.
                    self.router.flush().await;
                    let released = self.router.release_participant(connection);
                    info!(
                        connection = %connection,
                        released = released.len(),
                        "Player left"
                    );
                } else if self.local_participant() == ParticipantRef::Client(connection) {
                    self.connected.store(false, Ordering::SeqCst);
                    self.transport.close();
                    info!(connection = %connection, "Disconnected from server");
                }
            }
        }
    }

    /// Process every queued transport event, then drain all object domains.
    ///
    /// Returns how many events were handled.
    pub async fn pump(&self) -> usize {
        let mut handled = 0;
        loop {
            let next = self.events.lock().await.try_recv();
            match next {
                Ok(event) => {
                    self.handle_event(event).await;
                    handled += 1;
                }
                Err(_) => break,
            }
        }
        self.router.flush().await;
        handled
    }

    /// Process transport events until the link closes or shutdown is requested.
    pub async fn run(&self) {
        let mut shutdown = self.supervisor.subscribe();
        let mut events = self.events.lock().await;
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        debug!("Transport event stream closed");
                        self.connected.store(false, Ordering::SeqCst);
                        break;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }
        self.router.flush().await;
    }

    /// Leave the session.
    ///
    /// A server stops accepting and drops every client; a client hangs up
    /// its link. Further calls fail with `ConnectionClosed`. Idempotent.
    pub fn disconnect(&self) {
        if let Some(accept) = &self.accept {
            accept.abort();
        }
        if self.connected.swap(false, Ordering::SeqCst) {
            info!(role = %self.role(), "Leaving session");
        }
        self.transport.close();
    }

    /// Leave the session, stop the event loop and tear down every object.
    pub async fn shutdown(&self) {
        self.disconnect();
        self.supervisor.shutdown();
        self.router.flush().await;
        let removed = self.directory.clear();
        info!(objects = removed.len(), "NetView runtime shut down");
    }

    fn require_server(&self, action: &str) -> NetViewResult<&Arc<ServerTransport>> {
        self.server
            .as_ref()
            .ok_or_else(|| NetViewError::ServerOnly(action.to_string()))
    }
}

/// Host a session: bind the configured listener unless running offline.
///
/// Returns the runtime and the bound address, if any.
pub async fn start_server(
    config: NetConfig,
) -> KernelResult<(Arc<NetworkRuntime>, Option<SocketAddr>)> {
    config.validate()?;
    let (transport, events) =
        ServerTransport::new(ConnectionRegistry::new(), config.max_connections);
    let transport = Arc::new(transport);

    let listening = if config.offline_mode {
        info!("Offline mode: hosting without a listener");
        None
    } else {
        let (listener, accept) = TcpServer::start(&config, Arc::clone(&transport))
            .await
            .map_err(|e| KernelError::BootFailed(format!("cannot listen: {e}")))?;
        Some((listener.local_addr(), accept))
    };

    let mut runtime = NetworkRuntime::server(config, transport, events)?;
    let bound = listening.map(|(addr, accept)| {
        runtime.accept = Some(accept);
        addr
    });
    Ok((Arc::new(runtime), bound))
}

/// Join a session hosted at `config.server_addr`.
pub async fn join_server(config: NetConfig) -> KernelResult<Arc<NetworkRuntime>> {
    config.validate()?;
    let client = TcpClient::connect(&config).await?;
    info!(
        server = %client.server_addr(),
        connection = %client.connection(),
        "Joined session"
    );
    let (transport, events) = client.into_parts();
    Ok(Arc::new(NetworkRuntime::client(config, transport, events)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use netview_wire::LoopbackHub;

    #[tokio::test]
    async fn test_server_facade() {
        let (hub, events) = LoopbackHub::new(4);
        let runtime = NetworkRuntime::server(NetConfig::default(), hub.server(), events).unwrap();
        assert_eq!(runtime.role(), Role::Server);
        assert!(runtime.is_host());
        assert!(runtime.is_connected());
        assert_eq!(runtime.local_participant(), ParticipantRef::Server);
        assert_eq!(runtime.nickname(), "player");
        assert!(runtime.player_list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_client_rejects_server_only_calls() {
        let (hub, _server_events) = LoopbackHub::new(4);
        let (transport, events) = hub.connect("alice").unwrap();
        let runtime = NetworkRuntime::client(NetConfig::default(), transport, events).unwrap();

        assert_eq!(runtime.role(), Role::Client);
        assert!(!runtime.is_host());
        assert!(matches!(
            runtime.player_list(),
            Err(NetViewError::ServerOnly(_))
        ));
        assert!(matches!(
            runtime.destroy(ObjectId(1)),
            Err(NetViewError::ServerOnly(_))
        ));
        assert!(matches!(
            runtime.set_overridable(ObjectId(1), false),
            Err(NetViewError::ServerOnly(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let (hub, events) = LoopbackHub::new(4);
        let config = NetConfig {
            nickname: String::new(),
            ..NetConfig::default()
        };
        assert!(NetworkRuntime::server(config, hub.server(), events).is_err());
    }

    #[tokio::test]
    async fn test_offline_server_has_no_listener() {
        let config = NetConfig {
            offline_mode: true,
            ..NetConfig::default()
        };
        let (runtime, bound) = start_server(config).await.unwrap();
        assert!(bound.is_none());
        assert!(runtime.is_host());
    }

    #[tokio::test]
    async fn test_client_disconnect_hangs_up() {
        let (hub, mut server_events) = LoopbackHub::new(4);
        let (transport, events) = hub.connect("alice").unwrap();
        let id = transport.connection();
        let runtime = NetworkRuntime::client(NetConfig::default(), transport, events).unwrap();
        let _ = server_events.try_recv();

        runtime.disconnect();
        runtime.disconnect();
        assert!(!runtime.is_connected());
        assert!(!hub.server().is_connected(id));
        assert_eq!(
            server_events.try_recv().unwrap(),
            TransportEvent::Disconnected(id)
        );
        assert!(matches!(
            runtime.invoke_rpc(ObjectId(1), "Ping", DeliveryPolicy::ToAll, RpcArgs::new()),
            Err(KernelError::Wire(WireError::ConnectionClosed))
        ));
    }

    #[tokio::test]
    async fn test_server_shutdown_drops_clients() {
        let (hub, server_events) = LoopbackHub::new(4);
        let (transport, events) = hub.connect("bob").unwrap();
        let id = transport.connection();
        let client = NetworkRuntime::client(NetConfig::default(), transport, events).unwrap();
        let server =
            NetworkRuntime::server(NetConfig::default(), hub.server(), server_events).unwrap();

        server.shutdown().await;
        assert!(server.player_list().unwrap().is_empty());
        assert!(!server.is_connected());

        client.pump().await;
        assert!(!client.is_connected());
        assert!(!hub.server().is_connected(id));
    }

    #[tokio::test]
    async fn test_shutdown_stops_run() {
        let (hub, events) = LoopbackHub::new(4);
        let runtime = Arc::new(
            NetworkRuntime::server(NetConfig::default(), hub.server(), events).unwrap(),
        );
        let looping = Arc::clone(&runtime);
        let handle = tokio::spawn(async move { looping.run().await });
        runtime.shutdown().await;
        handle.await.unwrap();
    }
}
