//! Method registry — binds method names to handlers for one networked object.
//!
//! Objects declare their remote-callable methods explicitly through
//! [`NetworkedObject::register_methods`], called once per activation on a
//! fresh registry. Deactivating and re-activating an object therefore
//! rebuilds its table from scratch.

use netview_types::args::RpcArgs;
use netview_types::config::DuplicateMethodPolicy;
use netview_types::error::{ArgumentError, NetViewError, NetViewResult};
use netview_types::ids::{ObjectId, ParticipantRef};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A bound handler for one remote-callable method.
pub type Invoker = Arc<dyn Fn(RpcArgs) -> Result<(), ArgumentError> + Send + Sync>;

/// A replicated entity that exposes remote-callable methods.
pub trait NetworkedObject: Send + Sync + 'static {
    /// Declare this object's methods. Called once per activation.
    fn register_methods(self: Arc<Self>, methods: &mut MethodRegistry) -> NetViewResult<()>;
}

/// A registered method on a specific object.
#[derive(Clone)]
pub struct MethodDescriptor {
    pub name: String,
    pub target: ObjectId,
    /// Append the original caller as the last argument at dispatch.
    pub wants_caller_identity: bool,
    invoker: Invoker,
}

impl MethodDescriptor {
    /// Run the handler with already-prepared arguments.
    pub fn call(&self, args: RpcArgs) -> Result<(), ArgumentError> {
        (self.invoker)(args)
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("wants_caller_identity", &self.wants_caller_identity)
            .finish_non_exhaustive()
    }
}

/// Name → handler table for one object.
pub struct MethodRegistry {
    object: ObjectId,
    duplicates: DuplicateMethodPolicy,
    methods: HashMap<String, MethodDescriptor>,
}

impl MethodRegistry {
    /// Create an empty registry for `object`.
    pub fn new(object: ObjectId, duplicates: DuplicateMethodPolicy) -> Self {
        Self {
            object,
            duplicates,
            methods: HashMap::new(),
        }
    }

    /// The object this registry belongs to.
    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// Register a handler under `name`.
    ///
    /// Under [`DuplicateMethodPolicy::Reject`] a second registration of the
    /// same name fails with `DuplicateMethod` and leaves the first in place.
    /// Under `Overwrite` the later handler wins.
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        wants_caller_identity: bool,
        invoker: F,
    ) -> NetViewResult<()>
    where
        F: Fn(RpcArgs) -> Result<(), ArgumentError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.methods.contains_key(&name) && self.duplicates == DuplicateMethodPolicy::Reject {
            return Err(NetViewError::DuplicateMethod {
                object: self.object,
                method: name,
            });
        }
        debug!(object = %self.object, method = %name, wants_caller_identity, "Registered method");
        self.methods.insert(
            name.clone(),
            MethodDescriptor {
                name,
                target: self.object,
                wants_caller_identity,
                invoker: Arc::new(invoker),
            },
        );
        Ok(())
    }

    /// Look up a method by name.
    pub fn resolve(&self, name: &str) -> NetViewResult<&MethodDescriptor> {
        self.methods
            .get(name)
            .ok_or_else(|| NetViewError::UnknownMethod {
                object: self.object,
                method: name.to_string(),
            })
    }

    /// Resolve and call `name`, appending `caller` if the method asks for it.
    pub fn invoke(&self, name: &str, mut args: RpcArgs, caller: ParticipantRef) -> NetViewResult<()> {
        let descriptor = self.resolve(name)?;
        if descriptor.wants_caller_identity {
            args.push_caller(caller);
        }
        descriptor
            .call(args)
            .map_err(|e| NetViewError::InvocationArgument {
                method: name.to_string(),
                reason: e.0,
            })
    }

    /// Drop every registered method.
    pub fn clear(&mut self) {
        self.methods.clear();
    }

    /// Registered method names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netview_types::ids::ConnectionId;
    use serde_json::json;
    use std::sync::Mutex;

    fn registry() -> MethodRegistry {
        MethodRegistry::new(ObjectId(7), DuplicateMethodPolicy::Reject)
    }

    #[test]
    fn test_register_and_resolve() {
        let mut methods = registry();
        methods.register("Heal", true, |_| Ok(())).unwrap();
        methods.register("Jump", false, |_| Ok(())).unwrap();

        let heal = methods.resolve("Heal").unwrap();
        assert_eq!(heal.name, "Heal");
        assert_eq!(heal.target, ObjectId(7));
        assert!(heal.wants_caller_identity);
        assert!(!methods.resolve("Jump").unwrap().wants_caller_identity);
        assert_eq!(methods.names(), vec!["Heal", "Jump"]);
    }

    #[test]
    fn test_unknown_method() {
        let methods = registry();
        let err = methods.resolve("Missing").unwrap_err();
        assert_eq!(
            err,
            NetViewError::UnknownMethod {
                object: ObjectId(7),
                method: "Missing".to_string()
            }
        );
        assert!(methods
            .invoke("Missing", RpcArgs::new(), ParticipantRef::Server)
            .is_err());
    }

    #[test]
    fn test_duplicate_rejected_keeps_first() {
        let hits = Arc::new(Mutex::new(Vec::new()));
        let mut methods = registry();
        let first = Arc::clone(&hits);
        methods
            .register("Heal", false, move |_| {
                first.lock().unwrap().push("first");
                Ok(())
            })
            .unwrap();
        let err = methods.register("Heal", false, |_| Ok(())).unwrap_err();
        assert!(matches!(err, NetViewError::DuplicateMethod { .. }));

        methods
            .invoke("Heal", RpcArgs::new(), ParticipantRef::Server)
            .unwrap();
        assert_eq!(*hits.lock().unwrap(), vec!["first"]);
    }

    #[test]
    fn test_duplicate_overwrite_policy() {
        let hits = Arc::new(Mutex::new(Vec::new()));
        let mut methods = MethodRegistry::new(ObjectId(1), DuplicateMethodPolicy::Overwrite);
        methods.register("Heal", false, |_| Ok(())).unwrap();
        let second = Arc::clone(&hits);
        methods
            .register("Heal", true, move |_| {
                second.lock().unwrap().push("second");
                Ok(())
            })
            .unwrap();

        assert_eq!(methods.len(), 1);
        assert!(methods.resolve("Heal").unwrap().wants_caller_identity);
        methods
            .invoke("Heal", RpcArgs::new(), ParticipantRef::Server)
            .unwrap();
        assert_eq!(*hits.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn test_invoke_appends_caller_only_when_wanted() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut methods = registry();
        let with_caller = Arc::clone(&seen);
        methods
            .register("Heal", true, move |args| {
                with_caller.lock().unwrap().push(args);
                Ok(())
            })
            .unwrap();
        let without_caller = Arc::clone(&seen);
        methods
            .register("Jump", false, move |args| {
                without_caller.lock().unwrap().push(args);
                Ok(())
            })
            .unwrap();

        let caller = ParticipantRef::Client(ConnectionId(3));
        methods
            .invoke("Heal", RpcArgs::from(vec![json!(25)]), caller)
            .unwrap();
        methods
            .invoke("Jump", RpcArgs::from(vec![json!(2)]), caller)
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].len(), 2);
        assert_eq!(seen[0].get::<u32>(0).unwrap(), 25);
        assert_eq!(seen[0].caller().unwrap(), caller);
        assert_eq!(seen[1].len(), 1);
    }

    #[test]
    fn test_argument_mismatch_is_reported() {
        let mut methods = registry();
        methods
            .register("Heal", false, |args| {
                args.expect_len(1)?;
                let _amount: u32 = args.get(0)?;
                Ok(())
            })
            .unwrap();

        let err = methods
            .invoke("Heal", RpcArgs::from(vec![json!("lots")]), ParticipantRef::Server)
            .unwrap_err();
        match err {
            NetViewError::InvocationArgument { method, reason } => {
                assert_eq!(method, "Heal");
                assert!(reason.contains("argument 0"));
            }
            other => panic!("Expected InvocationArgument, got {other:?}"),
        }
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut methods = registry();
        methods.register("Heal", false, |_| Ok(())).unwrap();
        methods.clear();
        assert!(methods.is_empty());
        assert!(methods.resolve("Heal").is_err());
        methods.register("Heal", false, |_| Ok(())).unwrap();
    }
}
