//! Dispatch strategy selection.
//!
//! The route is chosen once per call from configuration and then applied to
//! the action (and to the inner action of `execute_skill`).

use crate::io::config::DispatchConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchRoute {
    /// Forward to the orchestrator. `mock` asks the orchestrator not to
    /// perform real side effects.
    Remote { mock: bool },
    /// Execute against the in-process skill registry.
    Local,
    /// No dispatch path is enabled.
    Denied { reason: String },
}

impl DispatchRoute {
    /// Remote wins over local; with neither enabled, dispatch is refused.
    pub fn select(config: &DispatchConfig) -> Self {
        if config.via_remote {
            return DispatchRoute::Remote {
                mock: !config.allow_real,
            };
        }
        if config.allow_local {
            return DispatchRoute::Local;
        }
        DispatchRoute::Denied {
            reason: "neither remote dispatch (dispatch.via_remote) nor local dispatch \
                     (dispatch.allow_local) is enabled"
                .to_string(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DispatchRoute::Remote { .. } => "remote",
            DispatchRoute::Local => "local",
            DispatchRoute::Denied { .. } => "denied",
        }
    }
}
