//! Business services bound to the session layer.

pub mod auxiliary;
pub mod player;

use std::sync::Arc;

pub use auxiliary::{AuxiliaryService, ServerStatus};
pub use player::{Player, PlayerService};

use crate::config::Config;
use crate::events::EventBus;
use crate::metrics::RpcMetrics;
use crate::monicker::MonickerGenerator;
use crate::session::SessionManager;

/// Constructed service set, wired to shared infrastructure.
pub struct ServiceFactory {
    pub player: Arc<PlayerService>,
    pub auxiliary: Arc<AuxiliaryService>,
}

impl ServiceFactory {
    pub fn new(
        config: Arc<Config>,
        sessions: Arc<SessionManager>,
        metrics: Arc<RpcMetrics>,
        bus: &EventBus,
        generator: Box<dyn MonickerGenerator>,
    ) -> Arc<Self> {
        let player = PlayerService::new(config.server.password.clone(), Arc::clone(&sessions));
        player.subscribe(bus);

        let auxiliary =
            AuxiliaryService::new(config, Arc::clone(&player), sessions, metrics, generator);

        Arc::new(ServiceFactory { player, auxiliary })
    }
}
