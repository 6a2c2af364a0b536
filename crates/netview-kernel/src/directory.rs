//! Object directory — networked object id → live object and its domain.

use crate::domain::ObjectDomain;
use crate::methods::{MethodRegistry, NetworkedObject};
use crate::ownership::OwnershipTable;
use crate::supervisor::Supervisor;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use netview_types::config::DuplicateMethodPolicy;
use netview_types::error::{NetViewError, NetViewResult};
use netview_types::ids::ObjectId;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// A registered object.
pub struct ObjectEntry {
    pub id: ObjectId,
    pub object: Arc<dyn NetworkedObject>,
    pub domain: ObjectDomain,
}

/// Registry of live networked objects on this peer.
pub struct NetworkObjectDirectory {
    objects: DashMap<ObjectId, Arc<ObjectEntry>>,
    next_id: AtomicU32,
    ownership: Arc<OwnershipTable>,
    supervisor: Arc<Supervisor>,
    duplicates: DuplicateMethodPolicy,
}

impl NetworkObjectDirectory {
    pub fn new(
        ownership: Arc<OwnershipTable>,
        supervisor: Arc<Supervisor>,
        duplicates: DuplicateMethodPolicy,
    ) -> Self {
        Self {
            objects: DashMap::new(),
            next_id: AtomicU32::new(1),
            ownership,
            supervisor,
            duplicates,
        }
    }

    /// The ownership table this directory keeps in step.
    pub fn ownership(&self) -> &Arc<OwnershipTable> {
        &self.ownership
    }

    /// Register an object under a freshly allocated id.
    ///
    /// Ids come from a monotonic counter and are never handed out twice.
    pub fn register(&self, object: Arc<dyn NetworkedObject>) -> NetViewResult<ObjectId> {
        let id = ObjectId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.register_with_id(id, object)?;
        Ok(id)
    }

    /// Register an object under an id chosen by the lifecycle layer.
    ///
    /// Fails with `ObjectAlreadyRegistered` if the id is live, and with
    /// whatever the object's registration hook reports.
    pub fn register_with_id(
        &self,
        id: ObjectId,
        object: Arc<dyn NetworkedObject>,
    ) -> NetViewResult<()> {
        if self.objects.contains_key(&id) {
            return Err(NetViewError::ObjectAlreadyRegistered(id));
        }
        self.next_id
            .fetch_max(id.0.saturating_add(1), Ordering::SeqCst);

        let methods = self.build_methods(id, &object)?;
        match self.objects.entry(id) {
            Entry::Occupied(_) => Err(NetViewError::ObjectAlreadyRegistered(id)),
            Entry::Vacant(slot) => {
                info!(object = %id, methods = methods.len(), "Registered networked object");
                let domain = ObjectDomain::spawn(methods, Arc::clone(&self.supervisor));
                slot.insert(Arc::new(ObjectEntry { id, object, domain }));
                self.ownership.track(id);
                Ok(())
            }
        }
    }

    /// Rebuild an object's method table from scratch.
    ///
    /// Calls already queued on the object still see the old table.
    pub fn reactivate(&self, id: ObjectId) -> NetViewResult<()> {
        let entry = self.resolve(id)?;
        let methods = self.build_methods(id, &entry.object)?;
        if !entry.domain.replace_methods(methods) {
            return Err(NetViewError::AbsentObject(id));
        }
        Ok(())
    }

    /// Remove an object and forget its ownership record. Idempotent.
    pub fn unregister(&self, id: ObjectId) -> bool {
        let removed = self.objects.remove(&id).is_some();
        if removed {
            self.ownership.forget(id);
            info!(object = %id, "Unregistered networked object");
        }
        removed
    }

    /// Look up a live object.
    pub fn resolve(&self, id: ObjectId) -> NetViewResult<Arc<ObjectEntry>> {
        self.objects
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(NetViewError::AbsentObject(id))
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    /// Live object ids, ascending.
    pub fn ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.objects.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Remove every object. Returns the removed ids, ascending.
    pub fn clear(&self) -> Vec<ObjectId> {
        let ids = self.ids();
        for id in &ids {
            self.unregister(*id);
        }
        ids
    }

    /// Wait for every live object's queued work to finish.
    pub async fn flush(&self) {
        let domains: Vec<ObjectDomain> = self
            .objects
            .iter()
            .map(|e| e.value().domain.clone())
            .collect();
        for domain in domains {
            domain.flush().await;
        }
    }

    fn build_methods(
        &self,
        id: ObjectId,
        object: &Arc<dyn NetworkedObject>,
    ) -> NetViewResult<MethodRegistry> {
        let mut methods = MethodRegistry::new(id, self.duplicates);
        Arc::clone(object).register_methods(&mut methods)?;
        debug!(object = %id, methods = ?methods.names(), "Built method table");
        Ok(methods)
    }
}
