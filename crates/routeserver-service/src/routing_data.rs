//! The in-memory caches of decoded routing data.
//!
//! Transport networks, egress tables and opportunity grids are stored serialized in the
//! [`ObjectStore`](crate::store::ObjectStore). Decoding them is expensive, so the decoded objects
//! are kept in [`KeyedLoadingCache`]s with small capacities.

use std::sync::Arc;

use serde::Serialize;

use crate::caching::{CacheEntry, CacheError, CapacityError, KeyedLoadingCache};
use crate::config::CacheConfigs;
use crate::events::{EventSinkRef, to_payload};
use crate::store::{ObjectStoreRef, StoredObject};
use crate::types::Identity;
use crate::utils::futures::{m, measure};

/// Name of the event announcing that a network is being loaded.
pub const LOADING_EVENT: &str = "loading";

/// An object that can be decoded from its stored representation.
pub trait DataObject: Sized + Send + Sync + 'static {
    /// Human readable name of this kind of object, such as `network`.
    const KIND: &'static str;

    /// Decodes the stored object.
    ///
    /// This runs on the blocking thread pool and may take a long time.
    fn decode(object: StoredObject) -> Result<Self, CacheError>;
}

#[derive(Serialize)]
struct LoadingEvent<'a> {
    id: &'a str,
    kind: &'static str,
    message: String,
}

/// Caches of transport networks (`N`), egress tables (`E`) and opportunity grids (`G`).
pub struct RoutingDataCache<N, E, G> {
    store: ObjectStoreRef,
    events: EventSinkRef,
    networks: KeyedLoadingCache<N>,
    egress_tables: KeyedLoadingCache<E>,
    grids: KeyedLoadingCache<G>,
}

impl<N, E, G> std::fmt::Debug for RoutingDataCache<N, E, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingDataCache")
            .field("networks", &self.networks)
            .field("egress_tables", &self.egress_tables)
            .field("grids", &self.grids)
            .finish()
    }
}

impl<N: DataObject, E: DataObject, G: DataObject> RoutingDataCache<N, E, G> {
    pub fn new(
        config: &CacheConfigs,
        store: ObjectStoreRef,
        events: EventSinkRef,
    ) -> Result<Self, CapacityError> {
        Ok(Self {
            store,
            events,
            networks: KeyedLoadingCache::new("networks", config.networks)?,
            egress_tables: KeyedLoadingCache::new("egress_tables", config.egress_tables)?,
            grids: KeyedLoadingCache::new("grids", config.grids)?,
        })
    }

    /// Returns the transport network `id`, loading it if necessary.
    ///
    /// The user is notified when the network actually needs to be loaded, which may take a
    /// while. Failures are logged and reported as `None`, asking again retries the load.
    pub async fn network(&self, id: &str, identity: &Identity) -> Option<Arc<N>> {
        let store = Arc::clone(&self.store);
        let events = Arc::clone(&self.events);
        let identity = identity.clone();

        let entry = self
            .networks
            .get(id, move |id| async move {
                let event = LoadingEvent {
                    id: &id,
                    kind: N::KIND,
                    message: format!("Loading {} {id}, this may take a while", N::KIND),
                };
                events.send_event(&identity, LOADING_EVENT, to_payload(&event));
                load(store, identity, id).await
            })
            .await;

        match entry {
            Ok(network) => Some(network),
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::error!(network_id = id, error, "Failed to load network");
                None
            }
        }
    }

    /// Returns the egress table `id`, loading it if necessary.
    pub async fn egress_table(&self, id: &str, identity: &Identity) -> CacheEntry<Arc<E>> {
        let store = Arc::clone(&self.store);
        let identity = identity.clone();
        self.egress_tables
            .get(id, move |id| load(store, identity, id))
            .await
    }

    /// Returns the opportunity grid `id`, loading it if necessary.
    pub async fn grid(&self, id: &str, identity: &Identity) -> CacheEntry<Arc<G>> {
        let store = Arc::clone(&self.store);
        let identity = identity.clone();
        self.grids.get(id, move |id| load(store, identity, id)).await
    }

    /// Caches a grid that was computed rather than loaded.
    pub fn put_grid(&self, id: &str, grid: G) -> Arc<G> {
        self.grids.put(id, grid)
    }

    pub fn networks(&self) -> &KeyedLoadingCache<N> {
        &self.networks
    }

    pub fn egress_tables(&self) -> &KeyedLoadingCache<E> {
        &self.egress_tables
    }

    pub fn grids(&self) -> &KeyedLoadingCache<G> {
        &self.grids
    }
}

async fn load<T: DataObject>(
    store: ObjectStoreRef,
    identity: Identity,
    id: String,
) -> CacheEntry<T> {
    measure("routing_data.load", m::result, async move {
        let object = store.retrieve(&id, &identity).await?;
        tracing::debug!(kind = T::KIND, id, size = object.metadata.size, "Decoding");
        tokio::task::spawn_blocking(move || T::decode(object))
            .await
            .unwrap_or_else(|err| Err(CacheError::from_std_error(err)))
    })
    .await
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::events::{ChannelEventSink, Event};
    use crate::store::{InMemoryObjectStore, ObjectStore};

    use super::*;

    #[derive(Debug, PartialEq)]
    struct Text(String);

    impl DataObject for Text {
        const KIND: &'static str = "network";

        fn decode(object: StoredObject) -> Result<Self, CacheError> {
            String::from_utf8(object.data.to_vec())
                .map(Text)
                .map_err(|err| CacheError::Malformed(err.to_string()))
        }
    }

    type TestCache = RoutingDataCache<Text, Text, Text>;

    async fn setup() -> (
        TestCache,
        tokio::sync::mpsc::UnboundedReceiver<Event>,
        Identity,
    ) {
        routeserver_test::setup();
        let identity = Identity::new("ada", "acme");
        let store = InMemoryObjectStore::new();
        for id in ["net-1", "net-2", "net-3", "table-1", "grid-1"] {
            let data = Bytes::from(format!("contents of {id}"));
            store.store(id, &identity, data).await.unwrap();
        }
        store
            .store("broken", &identity, Bytes::from_static(&[0xff, 0xfe]))
            .await
            .unwrap();

        let (events, receiver) = ChannelEventSink::new();
        let cache =
            TestCache::new(&CacheConfigs::default(), Arc::new(store), Arc::new(events)).unwrap();
        (cache, receiver, identity)
    }

    #[tokio::test]
    async fn test_capacities() {
        let (cache, _, _) = setup().await;
        assert_eq!(cache.networks().capacity(), 2);
        assert_eq!(cache.egress_tables().capacity(), 2);
        assert_eq!(cache.grids().capacity(), 4);

        let config = CacheConfigs {
            grids: 0,
            ..Default::default()
        };
        let (events, _) = ChannelEventSink::new();
        let result = TestCache::new(
            &config,
            Arc::new(InMemoryObjectStore::new()),
            Arc::new(events),
        );
        assert_eq!(result.unwrap_err().name, "grids");
    }

    #[tokio::test]
    async fn test_network_notifies_once() {
        let (cache, mut receiver, identity) = setup().await;

        let network = cache.network("net-1", &identity).await.unwrap();
        assert_eq!(*network, Text("contents of net-1".into()));

        let event = receiver.try_recv().unwrap();
        assert_eq!(event.event_type, LOADING_EVENT);
        assert_eq!(event.identity, identity);
        assert_eq!(event.payload["id"], "net-1");
        assert_eq!(event.payload["kind"], "network");

        // served from memory without another notification
        let again = cache.network("net-1", &identity).await.unwrap();
        assert!(Arc::ptr_eq(&network, &again));
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_network() {
        let (cache, _, identity) = setup().await;
        assert!(cache.network("nope", &identity).await.is_none());
        assert!(cache.network("broken", &identity).await.is_none());
        assert!(cache.networks().is_empty());

        let other = Identity::new("grace", "globex");
        assert!(cache.network("net-1", &other).await.is_none());
    }

    #[tokio::test]
    async fn test_network_eviction() {
        let (cache, _, identity) = setup().await;
        for id in ["net-1", "net-2", "net-1", "net-3"] {
            cache.network(id, &identity).await.unwrap();
        }
        assert!(cache.networks().contains("net-1"));
        assert!(!cache.networks().contains("net-2"));
        assert!(cache.networks().contains("net-3"));
    }

    #[tokio::test]
    async fn test_egress_table_and_grid() {
        let (cache, mut receiver, identity) = setup().await;

        let table = cache.egress_table("table-1", &identity).await.unwrap();
        assert_eq!(table.0, "contents of table-1");
        assert_eq!(
            cache.grid("missing", &identity).await.unwrap_err(),
            CacheError::NotFound
        );
        assert!(matches!(
            cache.grid("broken", &identity).await,
            Err(CacheError::Malformed(_))
        ));

        // only network loads are announced
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_put_grid() {
        let (cache, _, identity) = setup().await;
        let computed = cache.put_grid("grid-9", Text("computed".into()));

        let grid = cache.grid("grid-9", &identity).await.unwrap();
        assert!(Arc::ptr_eq(&computed, &grid));
    }
}
