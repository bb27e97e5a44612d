// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Dispatcher behavior against the in-memory daemon

use epc_discovery::{
    ClientState, CollisionHandling, DiscoveryBrowser, Dispatcher, DispatcherEvents,
    DispatcherNotification, DispatcherOptions, GroupState,
};
use epc_discovery_mock::{MockBrowser, MockDaemon};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn create(daemon: &MockDaemon, name: &str, options: DispatcherOptions) -> (Dispatcher, DispatcherEvents) {
    Dispatcher::new(Arc::new(daemon.clone()), name, options)
}

/// Apply events until the daemon has nothing more to say
fn settle(dispatcher: &mut Dispatcher, events: &mut DispatcherEvents) {
    while dispatcher.process_pending(events) > 0 {}
}

fn record_notifications(dispatcher: &mut Dispatcher) -> Arc<Mutex<Vec<DispatcherNotification>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    dispatcher.on_notification(move |n| sink.lock().unwrap().push(n.clone()));
    seen
}

fn owned_names(daemon: &MockDaemon) -> Vec<(String, String)> {
    daemon
        .announcements()
        .into_iter()
        .filter(|a| !a.is_foreign())
        .map(|a| (a.name, a.service_type))
        .collect()
}

#[test]
fn test_publish_with_subtype_and_details() {
    let daemon = MockDaemon::new();
    let (mut dispatcher, mut events) = create(&daemon, "Living Room", DispatcherOptions::default());

    dispatcher
        .add_service("_anon._sub._ftp._tcp", None, None, 2121, &["path=/pub"])
        .unwrap();
    settle(&mut dispatcher, &mut events);

    let announced = daemon.announcements();
    assert_eq!(announced.len(), 1);
    assert_eq!(announced[0].name, "Living Room");
    assert_eq!(announced[0].service_type, "_ftp._tcp");
    assert_eq!(announced[0].subtypes, ["_anon._sub._ftp._tcp"]);
    assert_eq!(dispatcher.group_state("_ftp._tcp"), Some(GroupState::Established));

    dispatcher.add_service_subtype("_ftp._tcp", "_music._sub._ftp._tcp");
    dispatcher.set_service_details("_ftp._tcp", &["path=/music"]);
    settle(&mut dispatcher, &mut events);

    let announced = daemon.announcements();
    assert_eq!(
        announced[0].subtypes,
        ["_anon._sub._ftp._tcp", "_music._sub._ftp._tcp"]
    );
    assert_eq!(announced[0].txt, ["path=/music"]);

    // Unknown types are ignored.
    dispatcher.add_service_subtype("_nope._tcp", "_x._sub._nope._tcp");
    dispatcher.set_service_details("_nope._tcp", &["a=b"]);
    assert_eq!(daemon.announcements().len(), 1);
}

#[test]
fn test_collision_renames_every_record() {
    let daemon = MockDaemon::new();
    daemon.inject_foreign("Printer", "_ftp._tcp", 21, &[]);

    let (mut dispatcher, mut events) = create(&daemon, "Printer", DispatcherOptions::default());
    let seen = record_notifications(&mut dispatcher);

    dispatcher.add_service::<&str>("_http._tcp", None, None, 8080, &[]).unwrap();
    dispatcher.add_service::<&str>("_ftp._tcp", None, None, 2121, &[]).unwrap();
    settle(&mut dispatcher, &mut events);

    assert_eq!(dispatcher.name(), "Printer #2");
    let mut names = owned_names(&daemon);
    names.sort();
    assert_eq!(
        names,
        vec![
            ("Printer #2".to_string(), "_ftp._tcp".to_string()),
            ("Printer #2".to_string(), "_http._tcp".to_string()),
        ]
    );
    assert_eq!(
        *seen.lock().unwrap(),
        vec![DispatcherNotification::NameChanged {
            old: "Printer".into(),
            new: "Printer #2".into(),
        }]
    );
}

#[test]
fn test_collision_converges_past_taken_alternatives() {
    let daemon = MockDaemon::new();
    daemon.inject_foreign("Box", "_http._tcp", 80, &[]);
    daemon.inject_foreign("Box #2", "_http._tcp", 80, &[]);

    let (mut dispatcher, mut events) = create(&daemon, "Box", DispatcherOptions::default());
    dispatcher.add_service::<&str>("_http._tcp", None, None, 8080, &[]).unwrap();
    settle(&mut dispatcher, &mut events);

    assert_eq!(dispatcher.name(), "Box #3");
    assert!(daemon.is_announced("Box #3", "_http._tcp"));
}

#[test]
fn test_collision_after_establishment() {
    let daemon = MockDaemon::new();
    let (mut dispatcher, mut events) = create(&daemon, "Box", DispatcherOptions::default());
    dispatcher.add_service::<&str>("_http._tcp", None, None, 8080, &[]).unwrap();
    settle(&mut dispatcher, &mut events);
    assert!(daemon.is_announced("Box", "_http._tcp"));

    daemon.inject_foreign("Box", "_http._tcp", 80, &[]);
    settle(&mut dispatcher, &mut events);

    assert_eq!(dispatcher.name(), "Box #2");
    assert_eq!(owned_names(&daemon), vec![("Box #2".to_string(), "_http._tcp".to_string())]);
}

#[test]
fn test_ignored_collision_keeps_name() {
    let daemon = MockDaemon::new();
    daemon.inject_foreign("Box", "_http._tcp", 80, &[]);

    let options = DispatcherOptions {
        collisions: CollisionHandling::Ignore,
        ..Default::default()
    };
    let (mut dispatcher, mut events) = create(&daemon, "Box", options);
    dispatcher.add_service::<&str>("_http._tcp", None, None, 8080, &[]).unwrap();
    settle(&mut dispatcher, &mut events);

    assert_eq!(dispatcher.name(), "Box");
    assert!(owned_names(&daemon).is_empty());
    assert_eq!(dispatcher.group_state("_http._tcp"), Some(GroupState::Collision));
}

#[test]
fn test_same_cookie_withdraws_duplicate() {
    let daemon = MockDaemon::new();
    daemon.inject_foreign("Box", "_http._tcp", 80, &["cookie=c00k1e"]);

    let options = DispatcherOptions {
        collisions: CollisionHandling::UniqueService,
        cookie: Some("c00k1e".into()),
        ..Default::default()
    };
    let (mut dispatcher, mut events) = create(&daemon, "Box", options);
    let seen = record_notifications(&mut dispatcher);
    dispatcher.add_service::<&str>("_http._tcp", None, None, 8080, &[]).unwrap();
    settle(&mut dispatcher, &mut events);

    assert_eq!(dispatcher.name(), "Box");
    assert!(owned_names(&daemon).is_empty());
    assert_eq!(
        *seen.lock().unwrap(),
        vec![DispatcherNotification::DuplicateService {
            service_type: "_http._tcp".into(),
        }]
    );
}

#[test]
fn test_different_cookie_renames() {
    let daemon = MockDaemon::new();
    daemon.inject_foreign("Box", "_http._tcp", 80, &["cookie=other"]);

    let options = DispatcherOptions {
        collisions: CollisionHandling::UniqueService,
        cookie: Some("c00k1e".into()),
        ..Default::default()
    };
    let (mut dispatcher, mut events) = create(&daemon, "Box", options);
    dispatcher.add_service::<&str>("_http._tcp", None, None, 8080, &[]).unwrap();
    settle(&mut dispatcher, &mut events);

    assert_eq!(dispatcher.name(), "Box #2");
    let announced = daemon.announcements();
    let ours = announced.iter().find(|a| !a.is_foreign()).unwrap();
    assert_eq!(ours.txt, ["cookie=c00k1e"]);
}

#[test]
fn test_rename_republishes_everything() {
    let daemon = MockDaemon::new();
    let (mut dispatcher, mut events) = create(&daemon, "Old", DispatcherOptions::default());
    dispatcher.add_service::<&str>("_http._tcp", None, None, 8080, &[]).unwrap();
    dispatcher.add_service::<&str>("_ftp._tcp", None, None, 2121, &[]).unwrap();
    settle(&mut dispatcher, &mut events);

    dispatcher.set_name("New");
    settle(&mut dispatcher, &mut events);

    let names: Vec<String> = owned_names(&daemon).into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, ["New", "New"]);
}

#[test]
fn test_reset_withdraws_and_run_restores() {
    let daemon = MockDaemon::new();
    let (mut dispatcher, mut events) = create(&daemon, "Box", DispatcherOptions::default());
    dispatcher.add_service::<&str>("_http._tcp", None, None, 8080, &[]).unwrap();
    settle(&mut dispatcher, &mut events);

    dispatcher.reset();
    settle(&mut dispatcher, &mut events);
    assert!(daemon.announcements().is_empty());
    assert_eq!(dispatcher.records().count(), 1);

    dispatcher.run().unwrap();
    settle(&mut dispatcher, &mut events);
    assert!(daemon.is_announced("Box", "_http._tcp"));
}

#[test]
fn test_recovers_from_daemon_restart() {
    let daemon = MockDaemon::new();
    let (mut dispatcher, mut events) = create(&daemon, "Box", DispatcherOptions::default());
    dispatcher.add_service::<&str>("_http._tcp", None, None, 8080, &[]).unwrap();
    settle(&mut dispatcher, &mut events);

    daemon.restart();
    assert!(daemon.announcements().is_empty());

    settle(&mut dispatcher, &mut events);
    assert!(daemon.is_announced("Box", "_http._tcp"));
    assert_eq!(daemon.client_count(), 1);
}

#[test]
fn test_waits_for_daemon_to_come_back() {
    let daemon = MockDaemon::new();
    let (mut dispatcher, mut events) = create(&daemon, "Box", DispatcherOptions::default());
    dispatcher.add_service::<&str>("_http._tcp", None, None, 8080, &[]).unwrap();
    settle(&mut dispatcher, &mut events);

    daemon.set_available(false);
    settle(&mut dispatcher, &mut events);
    assert!(daemon.announcements().is_empty());
    assert_eq!(dispatcher.client_state(), ClientState::Connecting);
    assert!(!dispatcher.is_inert());

    daemon.set_available(true);
    settle(&mut dispatcher, &mut events);
    assert!(daemon.is_announced("Box", "_http._tcp"));
}

#[test]
fn test_group_failure_recreates_client() {
    let daemon = MockDaemon::new();
    let (mut dispatcher, mut events) = create(&daemon, "Box", DispatcherOptions::default());
    dispatcher.add_service::<&str>("_http._tcp", None, None, 8080, &[]).unwrap();
    settle(&mut dispatcher, &mut events);

    assert!(daemon.fail_group("Box", "_http._tcp"));
    settle(&mut dispatcher, &mut events);

    assert!(daemon.is_announced("Box", "_http._tcp"));
    assert_eq!(daemon.client_count(), 1);
}

#[test]
fn test_host_collision_republishes() {
    let daemon = MockDaemon::new();
    let (mut dispatcher, mut events) = create(&daemon, "Box", DispatcherOptions::default());
    dispatcher.add_service::<&str>("_http._tcp", None, None, 8080, &[]).unwrap();
    settle(&mut dispatcher, &mut events);

    daemon.simulate_host_collision();
    assert!(daemon.announcements().is_empty());

    settle(&mut dispatcher, &mut events);
    assert!(daemon.is_announced("Box", "_http._tcp"));
}

#[test]
fn test_publishing_deferred_until_running() {
    let daemon = MockDaemon::new();
    daemon.hold_registration(true);

    let (mut dispatcher, mut events) = create(&daemon, "Box", DispatcherOptions::default());
    dispatcher.add_service::<&str>("_http._tcp", None, None, 8080, &[]).unwrap();
    settle(&mut dispatcher, &mut events);
    assert_eq!(dispatcher.client_state(), ClientState::Registering);
    assert!(daemon.announcements().is_empty());

    daemon.release_clients();
    settle(&mut dispatcher, &mut events);
    assert!(daemon.is_announced("Box", "_http._tcp"));
}

#[test]
fn test_inert_until_daemon_reachable() {
    let daemon = MockDaemon::new();
    daemon.set_available(false);

    let (mut dispatcher, mut events) = create(&daemon, "Box", DispatcherOptions::default());
    assert!(dispatcher.is_inert());
    dispatcher.add_service::<&str>("_http._tcp", None, None, 8080, &[]).unwrap();
    assert!(dispatcher.run().is_err());

    daemon.set_available(true);
    dispatcher.run().unwrap();
    settle(&mut dispatcher, &mut events);
    assert!(daemon.is_announced("Box", "_http._tcp"));
}

#[test]
fn test_drop_withdraws() {
    let daemon = MockDaemon::new();
    let (mut dispatcher, mut events) = create(&daemon, "Box", DispatcherOptions::default());
    dispatcher.add_service::<&str>("_http._tcp", None, None, 8080, &[]).unwrap();
    settle(&mut dispatcher, &mut events);

    drop(dispatcher);
    assert!(daemon.announcements().is_empty());
    assert_eq!(daemon.client_count(), 0);
}

#[tokio::test]
async fn test_spawned_dispatcher_follows_renames() {
    let daemon = MockDaemon::new();
    daemon.inject_foreign("Box", "_http._tcp", 80, &[]);

    let (dispatcher, events) = create(&daemon, "Box", DispatcherOptions::default());
    let handle = dispatcher.spawn(events);
    let mut name = handle.watch_name();

    handle
        .add_service("_myapp._sub._http._tcp", None, None, 8080, &["path=/"])
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(1), name.wait_for(|n| n == "Box #2"))
        .await
        .expect("Timeout waiting for rename")
        .unwrap();
    assert_eq!(handle.name(), "Box #2");

    let mut browser = MockBrowser::new(daemon.clone());
    browser.start_browsing("_myapp._sub._http._tcp").await.unwrap();
    let found = epc_discovery::wait_for_service(
        &browser,
        |s| s.name == "Box #2",
        Duration::from_secs(1),
    )
    .await
    .unwrap();
    assert_eq!(found.port, 8080);
    assert_eq!(found.txt_value("path"), Some("/"));

    handle.reset().await.unwrap();
    assert!(!daemon.is_announced("Box #2", "_http._tcp"));
    assert_eq!(handle.records().await.unwrap().len(), 1);

    drop(handle);
    tokio::time::timeout(Duration::from_secs(1), async {
        while daemon.client_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("dispatcher task did not stop");
}
