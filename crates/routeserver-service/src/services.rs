//! Provides the shared services of the server and a way to initialize them.
//!
//! [`SharedServices`] is created once at startup from the [`Config`] and handed to everything
//! that needs access to the task registry, the object store or the event sink.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::caching::CapacityError;
use crate::config::Config;
use crate::events::EventSinkRef;
use crate::routing_data::{DataObject, RoutingDataCache};
use crate::store::{FilesystemObjectStore, ObjectStoreRef};
use crate::tasks::TaskRegistry;

#[derive(Clone)]
pub struct SharedServices {
    pub config: Arc<Config>,
    pub tasks: TaskRegistry,
    pub store: ObjectStoreRef,
    pub events: EventSinkRef,
}

impl SharedServices {
    /// Creates the services with a filesystem object store rooted at `object_store.root`.
    ///
    /// Background tasks are spawned onto `task_pool`.
    pub fn new(
        config: Config,
        task_pool: tokio::runtime::Handle,
        events: EventSinkRef,
    ) -> Result<Self> {
        let root = &config.object_store.root;
        std::fs::create_dir_all(root)
            .with_context(|| format!("failed to create object store at {}", root.display()))?;
        let store = Arc::new(FilesystemObjectStore::new(root));

        Ok(Self::with_store(config, task_pool, events, store))
    }

    /// Creates the services around an existing object store.
    pub fn with_store(
        config: Config,
        task_pool: tokio::runtime::Handle,
        events: EventSinkRef,
        store: ObjectStoreRef,
    ) -> Self {
        let tasks = TaskRegistry::new(
            &config.tasks,
            &config.progress,
            task_pool,
            Arc::clone(&events),
        );

        Self {
            config: Arc::new(config),
            tasks,
            store,
            events,
        }
    }

    /// Creates routing data caches backed by the object store, sized as configured.
    pub fn routing_data<N, E, G>(&self) -> Result<RoutingDataCache<N, E, G>, CapacityError>
    where
        N: DataObject,
        E: DataObject,
        G: DataObject,
    {
        RoutingDataCache::new(
            &self.config.caches,
            Arc::clone(&self.store),
            Arc::clone(&self.events),
        )
    }
}
