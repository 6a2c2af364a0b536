//! Session commands: serve and join.

use crate::demo::{Lamp, LAMP};
use crate::ui;
use netview_kernel::{join_server, start_server, KernelError, NetworkRuntime};
use netview_types::args::RpcArgs;
use netview_types::config::NetConfig;
use netview_types::policy::DeliveryPolicy;
use std::net::SocketAddr;
use std::sync::Arc;

/// Flags `serve` may override on top of the config file.
pub struct ServeOverrides {
    pub listen: Option<SocketAddr>,
    pub max_connections: Option<usize>,
    pub offline: bool,
    pub secret: Option<String>,
}

/// Flags `join` may override on top of the config file.
pub struct JoinOverrides {
    pub server: Option<SocketAddr>,
    pub nickname: Option<String>,
    pub secret: Option<String>,
}

pub(crate) fn apply_serve(mut config: NetConfig, overrides: ServeOverrides) -> NetConfig {
    if let Some(listen) = overrides.listen {
        config.listen_addr = listen;
    }
    if let Some(max) = overrides.max_connections {
        config.max_connections = max;
    }
    if let Some(secret) = overrides.secret {
        config.shared_secret = secret;
    }
    config.offline_mode |= overrides.offline;
    config
}

pub(crate) fn apply_join(mut config: NetConfig, overrides: JoinOverrides) -> NetConfig {
    if let Some(server) = overrides.server {
        config.server_addr = server;
    }
    if let Some(nickname) = overrides.nickname {
        config.nickname = nickname;
    }
    if let Some(secret) = overrides.secret {
        config.shared_secret = secret;
    }
    config
}

fn boot_error(e: &KernelError) -> ! {
    match e {
        KernelError::Wire(_) => ui::error_with_fix(
            &format!("Network error: {e}"),
            "Check the address and that both sides use the same shared_secret",
        ),
        _ => ui::error_with_fix(
            &format!("Failed to start: {e}"),
            "Check ~/.netview/config.toml or run `netview config init`",
        ),
    }
    std::process::exit(1);
}

fn register_lamp(runtime: &NetworkRuntime) -> Arc<Lamp> {
    let lamp = Arc::new(Lamp::default());
    if let Err(e) = runtime.register_object_with_id(LAMP, lamp.clone()) {
        ui::error(&format!("Cannot register demo lamp: {e}"));
        std::process::exit(1);
    }
    lamp
}

fn print_diagnostics(runtime: &NetworkRuntime) {
    let health = runtime.supervisor().health();
    if health.panic_count > 0 {
        ui::kv_warn("Handler panics", &health.panic_count.to_string());
    }
    let recent = runtime.recent_diagnostics(10);
    if recent.is_empty() {
        return;
    }
    ui::section("Recent diagnostics");
    for d in recent {
        ui::kv_warn(&d.at.format("%H:%M:%S").to_string(), &d.error.to_string());
    }
}

pub fn cmd_serve(config: NetConfig) {
    ui::banner();
    ui::blank();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            ui::error(&format!("Cannot start async runtime: {e}"));
            std::process::exit(1);
        }
    };
    rt.block_on(async {
        let (runtime, bound) = match start_server(config).await {
            Ok(started) => started,
            Err(e) => boot_error(&e),
        };
        let lamp = register_lamp(&runtime);

        ui::success("Hosting session");
        match bound {
            Some(addr) => ui::kv("Listening", &addr.to_string()),
            None => ui::kv_warn("Listening", "offline"),
        }
        ui::kv("Capacity", &runtime.config().max_connections.to_string());
        ui::kv("Lamp", &LAMP.to_string());
        ui::blank();
        ui::hint("Press Ctrl+C to stop the server");

        let looping = Arc::clone(&runtime);
        let events = tokio::spawn(async move { looping.run().await });
        let _ = tokio::signal::ctrl_c().await;

        ui::blank();
        ui::section("Session summary");
        match runtime.player_list() {
            Ok(players) => {
                for p in players {
                    ui::kv(&p.connection_id.to_string(), &p.nickname);
                }
            }
            Err(e) => ui::error(&e.to_string()),
        }
        let state = lamp.snapshot();
        ui::kv("Lamp lit", &state.lit.to_string());
        ui::kv("Lamp owner", &runtime.owner_of(LAMP).to_string());
        print_diagnostics(&runtime);

        runtime.shutdown().await;
        let _ = events.await;
    });
}

pub fn cmd_join(config: NetConfig, toggles: u32, claim: bool) {
    ui::banner();
    ui::blank();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            ui::error(&format!("Cannot start async runtime: {e}"));
            std::process::exit(1);
        }
    };
    rt.block_on(async {
        let server = config.server_addr;
        let runtime = match join_server(config).await {
            Ok(runtime) => runtime,
            Err(e) => boot_error(&e),
        };
        let lamp = register_lamp(&runtime);

        ui::success(&format!("Joined {server}"));
        ui::kv("You are", &runtime.local_participant().to_string());
        ui::kv("Nickname", runtime.nickname());
        ui::blank();

        let looping = Arc::clone(&runtime);
        let mut events = tokio::spawn(async move { looping.run().await });

        for _ in 0..toggles {
            if let Err(e) =
                runtime.invoke_rpc(LAMP, "Toggle", DeliveryPolicy::ToAll, RpcArgs::new())
            {
                ui::error(&format!("Toggle failed: {e}"));
            }
        }
        if claim {
            if let Err(e) = runtime.request_ownership_transfer(LAMP) {
                ui::error(&format!("Claim failed: {e}"));
            }
        }
        ui::hint("Press Ctrl+C to leave");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = &mut events => ui::kv_warn("Session", "server closed the connection"),
        }

        ui::blank();
        let state = lamp.snapshot();
        ui::kv("Lamp lit", &state.lit.to_string());
        ui::kv("Lamp is mine", &runtime.is_mine(LAMP).to_string());
        print_diagnostics(&runtime);

        runtime.shutdown().await;
        events.abort();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_overrides() {
        let config = apply_serve(
            NetConfig::default(),
            ServeOverrides {
                listen: Some("0.0.0.0:9000".parse().unwrap()),
                max_connections: Some(2),
                offline: true,
                secret: None,
            },
        );
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.max_connections, 2);
        assert!(config.offline_mode);
        assert!(config.shared_secret.is_empty());
    }

    #[test]
    fn test_join_overrides_keep_unset_fields() {
        let base = NetConfig {
            shared_secret: "from-file".to_string(),
            ..NetConfig::default()
        };
        let config = apply_join(
            base,
            JoinOverrides {
                server: None,
                nickname: Some("zed".to_string()),
                secret: None,
            },
        );
        assert_eq!(config.nickname, "zed");
        assert_eq!(config.shared_secret, "from-file");
        assert_eq!(config.server_addr, NetConfig::default().server_addr);
    }
}
