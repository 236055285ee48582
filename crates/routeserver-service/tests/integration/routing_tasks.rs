use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use routeserver_service::caching::CacheError;
use routeserver_service::progress::{PROGRESS_EVENT, TaskState};
use routeserver_service::routing_data::LOADING_EVENT;
use routeserver_service::store::ObjectStore;

use crate::{NETWORKS_DECODED, drain, setup_services, wait_until};

#[tokio::test(flavor = "multi_thread")]
async fn test_accessibility_task() {
    let mut t = setup_services(|config| {
        config.progress.min_time_between_events = std::time::Duration::ZERO;
    })
    .await;

    let routing_data = Arc::clone(&t.routing_data);
    let identity = t.identity.clone();
    let task = t
        .services
        .tasks
        .submit(t.identity.clone(), "Waiting for a worker", move |task| async move {
            let grid = routing_data
                .grid("jobs", &identity)
                .await
                .context("failed to load opportunities")?;

            let progress = task.progress();
            progress.begin_task("Computing accessibility", grid.cells.len() as u64)?;
            for _ in &grid.cells {
                progress.increment(1)?;
            }
            Ok(())
        })
        .unwrap();

    wait_until(|| task.state().is_terminal()).await;
    let info = task.info();
    assert_eq!(info.state, TaskState::Completed);
    assert_eq!(info.title, "Computing accessibility");
    assert_eq!(info.steps_completed, 8);

    let events = drain(&mut t.events);
    let types: Vec<_> = events
        .iter()
        .filter(|event| event.event_type == PROGRESS_EVENT)
        .map(|event| event.payload["type"].as_str().unwrap().to_owned())
        .collect();
    // with 8 cells, every step is pushed
    assert_eq!(types.first().map(String::as_str), Some("begin"));
    assert_eq!(types.last().map(String::as_str), Some("done"));
    assert_eq!(types.iter().filter(|ty| *ty == "step").count(), 7);
    assert!(events.iter().all(|event| event.payload["id"] == task.id().to_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tasks_share_network_load() {
    let mut t = setup_services(|_| {}).await;
    let decoded_before = NETWORKS_DECODED.load(Ordering::SeqCst);

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let routing_data = Arc::clone(&t.routing_data);
            let identity = t.identity.clone();
            t.services
                .tasks
                .submit(t.identity.clone(), "Routing", move |task| async move {
                    let Some(network) = routing_data.network("net", &identity).await else {
                        task.progress().error("Network could not be loaded");
                        return Ok(());
                    };
                    task.progress().start(network.stops.len() as u64)?;
                    task.progress().increment(network.stops.len() as u64)?;
                    Ok(())
                })
                .unwrap()
        })
        .collect();

    for task in &tasks {
        wait_until(|| task.state().is_terminal()).await;
        assert_eq!(task.state(), TaskState::Completed);
    }

    assert_eq!(NETWORKS_DECODED.load(Ordering::SeqCst) - decoded_before, 1);
    let loading: Vec<_> = drain(&mut t.events)
        .into_iter()
        .filter(|event| event.event_type == LOADING_EVENT)
        .collect();
    assert_eq!(loading.len(), 1);
    assert_eq!(loading[0].payload["id"], "net");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_load_errors_task() {
    let t = setup_services(|_| {}).await;

    let routing_data = Arc::clone(&t.routing_data);
    let identity = t.identity.clone();
    let task = t
        .services
        .tasks
        .submit(t.identity.clone(), "Regional analysis", move |_| async move {
            routing_data
                .egress_table("missing", &identity)
                .await
                .context("failed to load egress table")?;
            Ok(())
        })
        .unwrap();

    wait_until(|| task.state().is_terminal()).await;
    let info = task.info();
    assert_eq!(info.state, TaskState::Errored);
    assert_eq!(info.title, "failed to load egress table: not found");

    // the failure was not cached
    assert!(t.routing_data.egress_tables().is_empty());
    let table = t
        .routing_data
        .egress_table("egress", &t.identity)
        .await
        .unwrap();
    assert_eq!(table.seconds, [60, 120, 300]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_object() {
    let t = setup_services(|_| {}).await;

    // the grid is binary and no valid JSON
    let store = Arc::clone(&t.services.store);
    let data = store.retrieve("jobs", &t.identity).await.unwrap().data;
    store.store("egress-bad", &t.identity, data).await.unwrap();

    let err = t
        .routing_data
        .egress_table("egress-bad", &t.identity)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Malformed(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_clear_finished_tasks() {
    let t = setup_services(|config| {
        config.tasks.worker_threads = 2;
    })
    .await;
    let tasks = &t.services.tasks;
    let release = Arc::new(tokio::sync::Notify::new());

    tasks
        .submit(t.identity.clone(), "A", |_| async { Ok(()) })
        .unwrap();
    tasks
        .submit(t.identity.clone(), "B", |_| async { anyhow::bail!("no such scenario") })
        .unwrap();
    let running = tasks
        .submit(t.identity.clone(), "C", {
            let release = Arc::clone(&release);
            move |_| async move {
                release.notified().await;
                Ok(())
            }
        })
        .unwrap();

    wait_until(|| {
        tasks
            .list()
            .iter()
            .filter(|info| info.state.is_terminal())
            .count()
            == 2
    })
    .await;

    assert_eq!(tasks.clear_completed(), 2);
    let listed = tasks.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, running.id());
    assert_eq!(listed[0].title, "C");

    release.notify_one();
    wait_until(|| running.state().is_terminal()).await;
    assert_eq!(tasks.clear_completed(), 1);
}
