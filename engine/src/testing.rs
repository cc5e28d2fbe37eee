use std::sync::Arc;

use storage::{Items, MemoryGateway, PersistenceGateway, StorageArea};
use tabs::MemoryBrowser;
use util::ManualClock;

use crate::{EngineConfig, TabKeeper};

pub(crate) struct Harness {
    pub browser: Arc<MemoryBrowser>,
    pub gateway: Arc<MemoryGateway>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            browser: Arc::new(MemoryBrowser::new()),
            gateway: Arc::new(MemoryGateway::new()),
        }
    }

    pub async fn seed(&self, key: &str, value: serde_json::Value) {
        let mut items = Items::new();
        items.insert(key.to_string(), value);
        self.gateway.set_local(items).await.unwrap();
    }

    pub async fn keeper(&self) -> TabKeeper {
        let config = EngineConfig {
            restore_on_startup: false,
            ..EngineConfig::default()
        };
        self.keeper_with(config).await
    }

    pub async fn keeper_with(&self, config: EngineConfig) -> TabKeeper {
        TabKeeper::init(
            self.browser.clone(),
            self.gateway.clone(),
            Arc::new(ManualClock::new(1_000)),
            config,
        )
        .await
    }

    pub fn stored(&self, key: &str) -> Option<serde_json::Value> {
        self.gateway.peek(StorageArea::Local, key)
    }
}

