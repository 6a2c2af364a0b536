//! RPC router — the relay state machine.
//!
//! Clients always forward calls to the server. The server decides the relay
//! path with [`plan`], then fans the call out and performs local final
//! dispatch from inside the target object's ordering domain, in line with
//! ownership decisions for that object. Every recipient dispatches through
//! its own domain, appending the caller identity there and only there.
//! Traffic from a connection the server has already dropped is discarded.

use crate::diagnostics::Diagnostics;
use crate::directory::NetworkObjectDirectory;
use crate::error::KernelResult;
use crate::methods::MethodRegistry;
use crate::ownership::OwnershipTable;
use netview_types::args::RpcArgs;
use netview_types::error::NetViewError;
use netview_types::ids::{ConnectionId, ObjectId, Owner, ParticipantRef};
use netview_types::policy::DeliveryPolicy;
use netview_wire::{CallEnvelope, RelayMessage, TransferOutcome, Transport};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a call goes besides (possibly) the server itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOut {
    /// No client receives it.
    None,
    /// Every connected client, optionally skipping one.
    AllClients { except: Option<ConnectionId> },
    /// Exactly one client.
    Single(ConnectionId),
}

/// The server's decision for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayPlan {
    pub dispatch_locally: bool,
    pub fan_out: FanOut,
}

/// Decide how the server relays a call with `policy` issued by `caller`.
pub fn plan(policy: DeliveryPolicy, caller: ParticipantRef) -> RelayPlan {
    match policy {
        DeliveryPolicy::ToAuthority => RelayPlan {
            dispatch_locally: true,
            fan_out: FanOut::None,
        },
        DeliveryPolicy::ToOthersExceptCaller => RelayPlan {
            dispatch_locally: false,
            fan_out: FanOut::AllClients {
                except: caller.connection(),
            },
        },
        DeliveryPolicy::ToAll => RelayPlan {
            dispatch_locally: true,
            fan_out: FanOut::AllClients { except: None },
        },
        DeliveryPolicy::ToParticipant(ParticipantRef::Server) => RelayPlan {
            dispatch_locally: true,
            fan_out: FanOut::None,
        },
        DeliveryPolicy::ToParticipant(ParticipantRef::Client(target)) => RelayPlan {
            dispatch_locally: false,
            fan_out: FanOut::Single(target),
        },
    }
}

/// Routes calls and ownership traffic for one peer.
pub struct RpcRouter {
    transport: Arc<dyn Transport>,
    directory: Arc<NetworkObjectDirectory>,
    diagnostics: Arc<Diagnostics>,
}

impl RpcRouter {
    pub fn new(
        transport: Arc<dyn Transport>,
        directory: Arc<NetworkObjectDirectory>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            transport,
            directory,
            diagnostics,
        }
    }

    /// The participant this router speaks for.
    pub fn local(&self) -> ParticipantRef {
        self.transport.local()
    }

    fn ownership(&self) -> &Arc<OwnershipTable> {
        self.directory.ownership()
    }

    /// Invoke `method` on `object` with the given delivery policy.
    ///
    /// Fire-and-forget: returns once the call is queued. Only a local
    /// transport failure is reported here.
    pub fn invoke_rpc(
        &self,
        object: ObjectId,
        method: &str,
        policy: DeliveryPolicy,
        args: RpcArgs,
    ) -> KernelResult<()> {
        let envelope = CallEnvelope {
            object_id: object,
            method: method.to_string(),
            args,
            original_caller: self.local(),
            policy,
        };
        match self.local() {
            ParticipantRef::Server => self.relay(envelope),
            ParticipantRef::Client(_) => {
                debug!(object = %object, method, policy = %policy, "Forwarding call to server");
                self.transport
                    .send(ParticipantRef::Server, RelayMessage::Call(envelope))?;
            }
        }
        Ok(())
    }

    /// Server side: relay a call according to its plan.
    ///
    /// The fan-out and the local dispatch run as one job on the object's
    /// domain, so clients see the object's traffic in the server's order.
    fn relay(&self, envelope: CallEnvelope) {
        let plan = plan(envelope.policy, envelope.original_caller);
        debug!(
            object = %envelope.object_id,
            method = %envelope.method,
            caller = %envelope.original_caller,
            policy = %envelope.policy,
            ?plan,
            "Relaying call"
        );

        let entry = match self.directory.resolve(envelope.object_id) {
            Ok(entry) => entry,
            Err(e) => {
                // Not live here: the clients may still have it.
                fan_out(self.transport.as_ref(), &self.diagnostics, plan.fan_out, &envelope);
                if plan.dispatch_locally {
                    self.diagnostics
                        .record(Some(envelope.object_id), Some(&envelope.method), e);
                }
                return;
            }
        };

        let object = envelope.object_id;
        let method = envelope.method.clone();
        let transport = Arc::clone(&self.transport);
        let diagnostics = Arc::clone(&self.diagnostics);
        let queued = envelope.clone();
        let submitted = entry.domain.submit(Box::new(move |methods: &MethodRegistry| {
            fan_out(transport.as_ref(), &diagnostics, plan.fan_out, &queued);
            if plan.dispatch_locally {
                final_dispatch(methods, &diagnostics, queued);
            }
        }));
        if !submitted {
            fan_out(self.transport.as_ref(), &self.diagnostics, plan.fan_out, &envelope);
            if plan.dispatch_locally {
                self.diagnostics.record(
                    Some(object),
                    Some(&method),
                    NetViewError::AbsentObject(object),
                );
            }
        }
    }

    /// Client side: final dispatch, queued on the object's domain.
    fn dispatch(&self, envelope: CallEnvelope) {
        let entry = match self.directory.resolve(envelope.object_id) {
            Ok(entry) => entry,
            Err(e) => {
                self.diagnostics
                    .record(Some(envelope.object_id), Some(&envelope.method), e);
                return;
            }
        };

        let object = envelope.object_id;
        let method = envelope.method.clone();
        let diagnostics = Arc::clone(&self.diagnostics);
        let submitted = entry.domain.submit(Box::new(move |methods: &MethodRegistry| {
            final_dispatch(methods, &diagnostics, envelope);
        }));
        if !submitted {
            self.diagnostics.record(
                Some(object),
                Some(&method),
                NetViewError::AbsentObject(object),
            );
        }
    }

    /// Handle a relay message that arrived from `from`.
    pub fn handle_relay(&self, from: ParticipantRef, message: RelayMessage) {
        match self.local() {
            ParticipantRef::Server => self.handle_on_server(from, message),
            ParticipantRef::Client(_) => self.handle_on_client(from, message),
        }
    }

    fn handle_on_server(&self, from: ParticipantRef, message: RelayMessage) {
        let connection = match from {
            ParticipantRef::Client(connection) => connection,
            ParticipantRef::Server => {
                warn!(op = ?message, "Server received relay traffic from itself; ignoring");
                return;
            }
        };
        if !self.transport.is_connected(connection) {
            debug!(from = %from, object = %message.object_id(), "Dropping traffic from a closed connection");
            let method = match &message {
                RelayMessage::Call(envelope) => Some(envelope.method.clone()),
                _ => None,
            };
            self.diagnostics.record(
                Some(message.object_id()),
                method.as_deref(),
                NetViewError::StaleParticipant(from),
            );
            return;
        }
        match message {
            RelayMessage::Call(mut envelope) => {
                // Identity is whatever connection the call came in on.
                envelope.original_caller = from;
                self.relay(envelope);
            }
            RelayMessage::OwnershipTransferRequest { object_id, .. } => {
                self.arbitrate(object_id, from);
            }
            RelayMessage::OwnershipTransferResult { object_id, .. }
            | RelayMessage::OwnershipChanged { object_id, .. } => {
                warn!(object = %object_id, from = %from, "Client sent a server-only ownership message; ignoring");
            }
        }
    }

    fn handle_on_client(&self, from: ParticipantRef, message: RelayMessage) {
        if !from.is_server() {
            warn!(from = %from, "Client received traffic not relayed by the server; ignoring");
            return;
        }
        match message {
            RelayMessage::Call(envelope) => self.dispatch(envelope),
            RelayMessage::OwnershipTransferResult { object_id, outcome } => match outcome {
                TransferOutcome::Granted { new_owner } => self.mirror_owner(object_id, new_owner),
                TransferOutcome::Denied { reason } => {
                    debug!(object = %object_id, reason = %reason, "Ownership request denied");
                    self.diagnostics.record(
                        Some(object_id),
                        None,
                        NetViewError::AuthorityDenied {
                            object: object_id,
                            requester: self.local(),
                        },
                    );
                }
            },
            RelayMessage::OwnershipChanged { object_id, owner } => {
                self.mirror_owner(object_id, owner)
            }
            RelayMessage::OwnershipTransferRequest { object_id, .. } => {
                warn!(object = %object_id, "Client received an ownership request; ignoring");
            }
        }
    }

    /// Apply a server ownership decision in order with the object's calls.
    fn mirror_owner(&self, object: ObjectId, owner: Owner) {
        let ownership = Arc::clone(self.ownership());
        match self.directory.resolve(object) {
            Ok(entry) => {
                let queued = Arc::clone(&ownership);
                if !entry
                    .domain
                    .submit(Box::new(move |_: &MethodRegistry| queued.apply_remote(object, owner)))
                {
                    ownership.apply_remote(object, owner);
                }
            }
            Err(_) => ownership.apply_remote(object, owner),
        }
    }

    /// Ask for authority over `object` on behalf of the local participant.
    pub fn request_ownership_transfer(&self, object: ObjectId) -> KernelResult<()> {
        match self.local() {
            ParticipantRef::Server => self.arbitrate(object, ParticipantRef::Server),
            requester @ ParticipantRef::Client(_) => {
                debug!(object = %object, "Requesting authority from server");
                self.transport.send(
                    ParticipantRef::Server,
                    RelayMessage::OwnershipTransferRequest {
                        object_id: object,
                        requester,
                    },
                )?;
            }
        }
        Ok(())
    }

    /// Server side: decide a transfer request, in order with the object's calls.
    fn arbitrate(&self, object: ObjectId, requester: ParticipantRef) {
        let entry = match self.directory.resolve(object) {
            Ok(entry) => entry,
            Err(e) => {
                deny(self.transport.as_ref(), object, requester, &e);
                self.diagnostics.record(Some(object), None, e);
                return;
            }
        };

        let transport = Arc::clone(&self.transport);
        let ownership = Arc::clone(self.ownership());
        let diagnostics = Arc::clone(&self.diagnostics);
        let submitted = entry.domain.submit(Box::new(move |_: &MethodRegistry| {
            if let ParticipantRef::Client(connection) = requester {
                if !transport.is_connected(connection) {
                    diagnostics.record(
                        Some(object),
                        None,
                        NetViewError::StaleParticipant(requester),
                    );
                    return;
                }
            }
            match ownership.request_transfer(object, requester) {
                Ok(new_owner) => {
                    if requester.connection().is_some() {
                        if let Err(e) = transport.send(
                            requester,
                            RelayMessage::OwnershipTransferResult {
                                object_id: object,
                                outcome: TransferOutcome::Granted { new_owner },
                            },
                        ) {
                            warn!(requester = %requester, object = %object, error = %e, "Grant not delivered");
                        }
                    }
                    for (connection, e) in transport.broadcast(
                        RelayMessage::OwnershipChanged {
                            object_id: object,
                            owner: new_owner,
                        },
                        requester.connection(),
                    ) {
                        warn!(connection = %connection, object = %object, error = %e, "Ownership announcement failed");
                    }
                }
                Err(e) => {
                    deny(transport.as_ref(), object, requester, &e);
                    diagnostics.record(Some(object), None, e);
                }
            }
        }));
        if !submitted {
            let e = NetViewError::AbsentObject(object);
            deny(self.transport.as_ref(), object, requester, &e);
            self.diagnostics.record(Some(object), None, e);
        }
    }

    /// Server side: reset everything `connection` owned and tell the others.
    pub fn release_participant(&self, connection: ConnectionId) -> Vec<ObjectId> {
        let released = self.ownership().release_on_disconnect(connection);
        for object in &released {
            self.announce_owner(*object, Owner::ServerAuthority);
        }
        released
    }

    /// Server side: broadcast an object's current owner to every client.
    pub fn announce_owner(&self, object: ObjectId, owner: Owner) {
        for (connection, e) in self.transport.broadcast(
            RelayMessage::OwnershipChanged {
                object_id: object,
                owner,
            },
            None,
        ) {
            warn!(connection = %connection, object = %object, error = %e, "Ownership announcement failed");
        }
    }

    /// Wait until every object's queued work has run.
    pub async fn flush(&self) {
        self.directory.flush().await;
    }
}

/// Tell a client requester it did not get authority.
fn deny(transport: &dyn Transport, object: ObjectId, requester: ParticipantRef, error: &NetViewError) {
    if requester.connection().is_none() {
        return;
    }
    if let Err(e) = transport.send(
        requester,
        RelayMessage::OwnershipTransferResult {
            object_id: object,
            outcome: TransferOutcome::Denied {
                reason: error.to_string(),
            },
        },
    ) {
        warn!(requester = %requester, object = %object, error = %e, "Denial not delivered");
    }
}

/// Send a call to the clients a plan names.
fn fan_out(
    transport: &dyn Transport,
    diagnostics: &Diagnostics,
    targets: FanOut,
    envelope: &CallEnvelope,
) {
    match targets {
        FanOut::None => {}
        FanOut::AllClients { except } => {
            for (connection, e) in transport.broadcast(RelayMessage::Call(envelope.clone()), except) {
                warn!(connection = %connection, error = %e, "Relay to client failed");
            }
        }
        FanOut::Single(target) => {
            let participant = ParticipantRef::Client(target);
            if !transport.is_connected(target) {
                diagnostics.record(
                    Some(envelope.object_id),
                    Some(&envelope.method),
                    NetViewError::StaleParticipant(participant),
                );
            } else if let Err(e) = transport.send(participant, RelayMessage::Call(envelope.clone())) {
                warn!(connection = %target, error = %e, "Relay to client failed");
                diagnostics.record(
                    Some(envelope.object_id),
                    Some(&envelope.method),
                    NetViewError::StaleParticipant(participant),
                );
            }
        }
    }
}

/// Invoke a call on this peer, appending the caller identity.
fn final_dispatch(methods: &MethodRegistry, diagnostics: &Diagnostics, envelope: CallEnvelope) {
    let CallEnvelope {
        object_id,
        method,
        args,
        original_caller,
        ..
    } = envelope;
    debug!(object = %object_id, method = %method, caller = %original_caller, "Dispatching");
    if let Err(e) = methods.invoke(&method, args, original_caller) {
        diagnostics.record(Some(object_id), Some(&method), e);
    }
}
