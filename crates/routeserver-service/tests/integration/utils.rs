use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use routeserver_service::caching::CacheError;
use routeserver_service::config::Config;
use routeserver_service::events::{ChannelEventSink, Event};
use routeserver_service::routing_data::{DataObject, RoutingDataCache};
use routeserver_service::services::SharedServices;
use routeserver_service::store::{ObjectStore, StoredObject};
use routeserver_service::types::Identity;
use routeserver_test as test;
use tokio::sync::mpsc::UnboundedReceiver;

pub use test::wait_until;

/// Number of networks decoded so far, across all tests of this binary.
pub static NETWORKS_DECODED: AtomicUsize = AtomicUsize::new(0);

/// A transport network, stored as one stop name per line.
#[derive(Debug)]
pub struct Network {
    pub stops: Vec<String>,
}

impl DataObject for Network {
    const KIND: &'static str = "network";

    fn decode(object: StoredObject) -> Result<Self, CacheError> {
        NETWORKS_DECODED.fetch_add(1, Ordering::SeqCst);
        // networks are slow to build
        std::thread::sleep(std::time::Duration::from_millis(50));
        let text = std::str::from_utf8(&object.data)
            .map_err(|err| CacheError::Malformed(err.to_string()))?;
        Ok(Network {
            stops: text.lines().map(str::to_owned).collect(),
        })
    }
}

/// Travel times from every stop to the street network, as JSON array.
#[derive(Debug)]
pub struct EgressTable {
    pub seconds: Vec<u32>,
}

impl DataObject for EgressTable {
    const KIND: &'static str = "egress table";

    fn decode(object: StoredObject) -> Result<Self, CacheError> {
        let seconds = serde_json::from_slice(&object.data)?;
        Ok(EgressTable { seconds })
    }
}

/// Opportunity counts per cell.
#[derive(Debug)]
pub struct Grid {
    pub cells: Vec<u8>,
}

impl DataObject for Grid {
    const KIND: &'static str = "grid";

    fn decode(object: StoredObject) -> Result<Self, CacheError> {
        Ok(Grid {
            cells: object.data.to_vec(),
        })
    }
}

pub type RoutingData = RoutingDataCache<Network, EgressTable, Grid>;

pub struct TestServices {
    pub services: SharedServices,
    pub routing_data: Arc<RoutingData>,
    pub events: UnboundedReceiver<Event>,
    pub identity: Identity,
    _store_dir: test::TempDir,
}

/// Sets up services backed by a filesystem store in a temporary directory.
///
/// The store holds the network `net`, the egress table `egress` and the grid `jobs` of the
/// organization of [`TestServices::identity`].
pub async fn setup_services(update_config: impl FnOnce(&mut Config)) -> TestServices {
    test::setup();

    let store_dir = test::tempdir();
    let mut config = Config::default();
    config.object_store.root = store_dir.path().to_owned();
    update_config(&mut config);

    let (events, receiver) = ChannelEventSink::new();
    let services =
        SharedServices::new(config, tokio::runtime::Handle::current(), Arc::new(events)).unwrap();

    let identity = Identity::new("ada", "acme");
    let objects: [(&str, &[u8]); 3] = [
        ("net", b"Central\nHarbor\nUniversity"),
        ("egress", b"[60, 120, 300]"),
        ("jobs", &[3, 0, 7, 1, 0, 2, 9, 4]),
    ];
    for (id, data) in objects {
        services
            .store
            .store(id, &identity, Bytes::copy_from_slice(data))
            .await
            .unwrap();
    }

    let routing_data = Arc::new(services.routing_data().unwrap());

    TestServices {
        services,
        routing_data,
        events: receiver,
        identity,
        _store_dir: store_dir,
    }
}

/// Drains all events that were sent so far.
pub fn drain(events: &mut UnboundedReceiver<Event>) -> Vec<Event> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
