//! Ordering domains — one actor task per live object.
//!
//! Final dispatches and ownership arbitrations for an object are queued on
//! its domain and run strictly in submission order. Different objects run in
//! parallel. A handler may re-enter the router freely: anything it submits
//! is queued, never run inline.

use crate::methods::MethodRegistry;
use crate::supervisor::Supervisor;
use netview_types::ids::ObjectId;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Work run against an object's method table.
pub type Job = Box<dyn FnOnce(&MethodRegistry) + Send + 'static>;

enum DomainMessage {
    Run(Job),
    /// Swap in a freshly built method table.
    Replace(MethodRegistry),
    Barrier(oneshot::Sender<()>),
}

/// Handle to an object's actor. The actor stops once every handle is dropped.
#[derive(Clone)]
pub struct ObjectDomain {
    object: ObjectId,
    jobs: mpsc::UnboundedSender<DomainMessage>,
}

impl ObjectDomain {
    /// Spawn the actor owning `methods`. Must be called inside a tokio runtime.
    pub fn spawn(methods: MethodRegistry, supervisor: Arc<Supervisor>) -> Self {
        let object = methods.object();
        let (jobs, mut inbox) = mpsc::unbounded_channel::<DomainMessage>();
        tokio::spawn(async move {
            let mut methods = methods;
            while let Some(message) = inbox.recv().await {
                match message {
                    DomainMessage::Run(job) => {
                        let outcome = catch_unwind(AssertUnwindSafe(|| job(&methods)));
                        if outcome.is_err() {
                            supervisor.record_panic(object);
                        }
                    }
                    DomainMessage::Replace(fresh) => {
                        debug!(object = %object, methods = fresh.len(), "Method table rebuilt");
                        methods = fresh;
                    }
                    DomainMessage::Barrier(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!(object = %object, "Object domain stopped");
        });
        Self { object, jobs }
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// Queue a job. Returns `false` if the actor has stopped.
    pub fn submit(&self, job: Job) -> bool {
        self.jobs.send(DomainMessage::Run(job)).is_ok()
    }

    /// Replace the method table after everything already queued.
    pub fn replace_methods(&self, methods: MethodRegistry) -> bool {
        self.jobs.send(DomainMessage::Replace(methods)).is_ok()
    }

    /// Wait until every job queued before this call has run.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.jobs.send(DomainMessage::Barrier(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netview_types::args::RpcArgs;
    use netview_types::config::DuplicateMethodPolicy;
    use netview_types::ids::ParticipantRef;
    use std::sync::Mutex;

    fn domain_with_log(log: Arc<Mutex<Vec<u32>>>) -> (ObjectDomain, Arc<Supervisor>) {
        let mut methods = MethodRegistry::new(ObjectId(1), DuplicateMethodPolicy::Reject);
        methods
            .register("Push", false, move |args| {
                log.lock().unwrap().push(args.get(0)?);
                Ok(())
            })
            .unwrap();
        let supervisor = Arc::new(Supervisor::new());
        (ObjectDomain::spawn(methods, Arc::clone(&supervisor)), supervisor)
    }

    fn push(value: u32) -> Job {
        Box::new(move |methods: &MethodRegistry| {
            let args = RpcArgs::new().with(value).unwrap();
            methods.invoke("Push", args, ParticipantRef::Server).unwrap();
        })
    }

    #[tokio::test]
    async fn test_jobs_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (domain, _) = domain_with_log(Arc::clone(&log));
        for i in 0..50 {
            assert!(domain.submit(push(i)));
        }
        domain.flush().await;
        assert_eq!(*log.lock().unwrap(), (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_panic_does_not_stop_domain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (domain, supervisor) = domain_with_log(Arc::clone(&log));
        domain.submit(push(1));
        domain.submit(Box::new(|_: &MethodRegistry| panic!("handler blew up")));
        domain.submit(push(2));
        domain.flush().await;

        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
        assert_eq!(supervisor.object_panic_count(ObjectId(1)), 1);
    }

    #[tokio::test]
    async fn test_replace_methods_after_queued_jobs() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (domain, _) = domain_with_log(Arc::clone(&log));
        domain.submit(push(1));
        domain.replace_methods(MethodRegistry::new(ObjectId(1), DuplicateMethodPolicy::Reject));

        let missing = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&missing);
        domain.submit(Box::new(move |methods: &MethodRegistry| {
            *seen.lock().unwrap() = Some(methods.resolve("Push").is_err());
        }));
        domain.flush().await;

        assert_eq!(*log.lock().unwrap(), vec![1]);
        assert_eq!(*missing.lock().unwrap(), Some(true));
    }
}
