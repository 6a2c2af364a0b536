//! Demo object shared by `serve` and `join`: a lamp anyone can flip.

use netview_kernel::{MethodRegistry, NetworkedObject};
use netview_types::error::NetViewResult;
use netview_types::ids::{ObjectId, ParticipantRef};
use std::sync::Mutex;
use std::sync::Arc;
use tracing::info;

/// Every peer registers the lamp under this id.
pub const LAMP: ObjectId = ObjectId(1);

#[derive(Debug, Default)]
pub struct Lamp {
    state: Mutex<LampState>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LampState {
    pub lit: bool,
    pub color: String,
    pub last_toggled_by: Option<ParticipantRef>,
}

impl Lamp {
    pub fn snapshot(&self) -> LampState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl NetworkedObject for Lamp {
    fn register_methods(self: Arc<Self>, methods: &mut MethodRegistry) -> NetViewResult<()> {
        let lamp = Arc::clone(&self);
        methods.register("Toggle", true, move |args| {
            args.expect_len(1)?;
            let caller = args.caller()?;
            let mut state = lamp.state.lock().unwrap_or_else(|e| e.into_inner());
            state.lit = !state.lit;
            state.last_toggled_by = Some(caller);
            info!(lit = state.lit, by = %caller, "Lamp toggled");
            Ok(())
        })?;
        methods.register("SetColor", false, move |args| {
            args.expect_len(1)?;
            let color: String = args.get(0)?;
            info!(color = %color, "Lamp color changed");
            self.state.lock().unwrap_or_else(|e| e.into_inner()).color = color;
            Ok(())
        })
    }
}
