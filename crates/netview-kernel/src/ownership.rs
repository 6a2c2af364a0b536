//! Ownership table — which participant has authority over each object.
//!
//! Every tracked object starts under [`Owner::ServerAuthority`]. Only the
//! server mutates ownership through [`OwnershipTable::request_transfer`] and
//! [`OwnershipTable::assign`]; clients mirror the server's decisions with
//! [`OwnershipTable::apply_remote`].

use dashmap::DashMap;
use netview_types::error::{NetViewError, NetViewResult};
use netview_types::ids::{ConnectionId, ObjectId, Owner, ParticipantRef};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Authority state for one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipRecord {
    pub object_id: ObjectId,
    pub owner: Owner,
    /// Whether a client may take authority by asking for it.
    pub overridable: bool,
}

/// Per-object authority records.
pub struct OwnershipTable {
    records: DashMap<ObjectId, OwnershipRecord>,
    default_overridable: bool,
}

impl OwnershipTable {
    /// Create an empty table. New records take `default_overridable`.
    pub fn new(default_overridable: bool) -> Self {
        Self {
            records: DashMap::new(),
            default_overridable,
        }
    }

    /// Start tracking `object` under server authority.
    ///
    /// An existing record is left untouched.
    pub fn track(&self, object: ObjectId) {
        let overridable = self.default_overridable;
        self.records.entry(object).or_insert_with(|| OwnershipRecord {
            object_id: object,
            owner: Owner::ServerAuthority,
            overridable,
        });
    }

    /// Current owner. Unknown objects report `ServerAuthority`.
    pub fn get_owner(&self, object: ObjectId) -> Owner {
        self.records
            .get(&object)
            .map(|r| r.owner)
            .unwrap_or(Owner::ServerAuthority)
    }

    /// Snapshot of an object's record.
    pub fn record(&self, object: ObjectId) -> Option<OwnershipRecord> {
        self.records.get(&object).map(|r| *r)
    }

    /// Whether `participant` is the authority over `object`.
    pub fn is_authority(&self, object: ObjectId, participant: ParticipantRef) -> bool {
        self.get_owner(object).is_held_by(participant)
    }

    /// Change whether clients may take authority over `object`.
    pub fn set_overridable(&self, object: ObjectId, overridable: bool) -> NetViewResult<()> {
        let mut record = self
            .records
            .get_mut(&object)
            .ok_or(NetViewError::AbsentObject(object))?;
        record.overridable = overridable;
        Ok(())
    }

    /// Arbitrate a request from `requester` to become the authority.
    ///
    /// Succeeds iff the record is overridable, returning the new owner.
    pub fn request_transfer(
        &self,
        object: ObjectId,
        requester: ParticipantRef,
    ) -> NetViewResult<Owner> {
        let mut record = self
            .records
            .get_mut(&object)
            .ok_or(NetViewError::AbsentObject(object))?;
        if !record.overridable {
            return Err(NetViewError::AuthorityDenied { object, requester });
        }
        let owner = Owner::from(requester);
        if record.owner != owner {
            info!(object = %object, from = %record.owner, to = %owner, "Authority transferred");
        }
        record.owner = owner;
        Ok(owner)
    }

    /// Set the owner unconditionally. Server side only.
    pub fn assign(&self, object: ObjectId, owner: Owner) -> NetViewResult<()> {
        let mut record = self
            .records
            .get_mut(&object)
            .ok_or(NetViewError::AbsentObject(object))?;
        debug!(object = %object, owner = %owner, "Authority assigned");
        record.owner = owner;
        Ok(())
    }

    /// Mirror an ownership decision announced by the server.
    ///
    /// Creates the record if this peer has not seen the object yet.
    pub fn apply_remote(&self, object: ObjectId, owner: Owner) {
        let overridable = self.default_overridable;
        self.records
            .entry(object)
            .and_modify(|r| r.owner = owner)
            .or_insert(OwnershipRecord {
                object_id: object,
                owner,
                overridable,
            });
    }

    /// Reset every object owned by `connection` to server authority.
    ///
    /// Returns the released objects in ascending order.
    pub fn release_on_disconnect(&self, connection: ConnectionId) -> Vec<ObjectId> {
        let mut released = Vec::new();
        for mut record in self.records.iter_mut() {
            if record.owner == Owner::Client(connection) {
                record.owner = Owner::ServerAuthority;
                released.push(record.object_id);
            }
        }
        released.sort();
        if !released.is_empty() {
            info!(connection = %connection, count = released.len(), "Released authority on disconnect");
        }
        released
    }

    /// Stop tracking `object`.
    pub fn forget(&self, object: ObjectId) -> Option<OwnershipRecord> {
        self.records.remove(&object).map(|(_, r)| r)
    }

    pub fn clear(&self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const C3: ConnectionId = ConnectionId(3);
    const C4: ConnectionId = ConnectionId(4);

    #[test]
    fn test_unknown_object_is_server_owned() {
        let table = OwnershipTable::new(true);
        assert_eq!(table.get_owner(ObjectId(99)), Owner::ServerAuthority);
        assert!(table.is_authority(ObjectId(99), ParticipantRef::Server));
        assert!(table.record(ObjectId(99)).is_none());
    }

    #[test]
    fn test_track_starts_with_server() {
        let table = OwnershipTable::new(false);
        table.track(ObjectId(1));
        let record = table.record(ObjectId(1)).unwrap();
        assert_eq!(record.owner, Owner::ServerAuthority);
        assert!(!record.overridable);
    }

    #[test]
    fn test_transfer_when_overridable() {
        let table = OwnershipTable::new(true);
        table.track(ObjectId(1));

        let owner = table
            .request_transfer(ObjectId(1), ParticipantRef::Client(C3))
            .unwrap();
        assert_eq!(owner, Owner::Client(C3));
        assert!(table.is_authority(ObjectId(1), ParticipantRef::Client(C3)));
        assert!(!table.is_authority(ObjectId(1), ParticipantRef::Server));

        // A second client can take it over again.
        table
            .request_transfer(ObjectId(1), ParticipantRef::Client(C4))
            .unwrap();
        assert_eq!(table.get_owner(ObjectId(1)), Owner::Client(C4));
    }

    #[test]
    fn test_transfer_denied_when_locked() {
        let table = OwnershipTable::new(true);
        table.track(ObjectId(1));
        table.set_overridable(ObjectId(1), false).unwrap();

        let err = table
            .request_transfer(ObjectId(1), ParticipantRef::Client(C3))
            .unwrap_err();
        assert_eq!(
            err,
            NetViewError::AuthorityDenied {
                object: ObjectId(1),
                requester: ParticipantRef::Client(C3)
            }
        );
        assert_eq!(table.get_owner(ObjectId(1)), Owner::ServerAuthority);
    }

    #[test]
    fn test_transfer_of_untracked_object() {
        let table = OwnershipTable::new(true);
        assert_eq!(
            table.request_transfer(ObjectId(5), ParticipantRef::Client(C3)),
            Err(NetViewError::AbsentObject(ObjectId(5)))
        );
    }

    #[test]
    fn test_assign_ignores_overridable() {
        let table = OwnershipTable::new(false);
        table.track(ObjectId(1));
        table.assign(ObjectId(1), Owner::Client(C3)).unwrap();
        assert_eq!(table.get_owner(ObjectId(1)), Owner::Client(C3));
    }

    #[test]
    fn test_release_on_disconnect() {
        let table = OwnershipTable::new(true);
        for id in 1..=4 {
            table.track(ObjectId(id));
        }
        table.assign(ObjectId(3), Owner::Client(C3)).unwrap();
        table.assign(ObjectId(1), Owner::Client(C3)).unwrap();
        table.assign(ObjectId(2), Owner::Client(C4)).unwrap();

        let released = table.release_on_disconnect(C3);
        assert_eq!(released, vec![ObjectId(1), ObjectId(3)]);
        assert_eq!(table.get_owner(ObjectId(1)), Owner::ServerAuthority);
        assert_eq!(table.get_owner(ObjectId(2)), Owner::Client(C4));

        // Nothing left to release the second time.
        assert!(table.release_on_disconnect(C3).is_empty());
    }

    #[test]
    fn test_apply_remote_creates_and_updates() {
        let table = OwnershipTable::new(true);
        table.apply_remote(ObjectId(8), Owner::Client(C4));
        assert_eq!(table.get_owner(ObjectId(8)), Owner::Client(C4));
        table.apply_remote(ObjectId(8), Owner::ServerAuthority);
        assert_eq!(table.get_owner(ObjectId(8)), Owner::ServerAuthority);
    }

    #[test]
    fn test_forget() {
        let table = OwnershipTable::new(true);
        table.track(ObjectId(1));
        assert!(table.forget(ObjectId(1)).is_some());
        assert!(table.forget(ObjectId(1)).is_none());
        assert!(table.is_empty());
    }
}
