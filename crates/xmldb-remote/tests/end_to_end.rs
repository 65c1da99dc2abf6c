// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use xmldb_remote::testing::{MockConnector, MockStore};
use xmldb_remote::{
    with_chunk_size, with_observer, ClientEvent, ClientOption, Collection, Configurable, Database,
    Error, Properties, ResourceKind, ServiceKind, Session, Status, StatusCode,
    AUTHENTICATION_HEADER, BufferedObserver,
};

const DESCRIPTOR: &str = "xmldb:mock://localhost/db";

fn guest() -> Properties {
    let mut props = Properties::new();
    props.insert("user".into(), "guest".into());
    props.insert("password".into(), "guest".into());
    props
}

fn connect(store: &MockStore, opts: Vec<ClientOption>) -> Session {
    Session::connect_with(&MockConnector::new(store.clone()), DESCRIPTOR, guest(), opts)
        .expect("connect to mock store")
}

fn open_root(store: &MockStore) -> Collection {
    connect(store, Vec::new())
        .root_collection()
        .expect("open root")
        .expect("root exists")
}

fn sample_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

#[test]
fn xml_resource_lifecycle() {
    let store = MockStore::new().with_collection("/db");
    let root = open_root(&store);

    let mut created = root
        .create_resource("doc.xml", ResourceKind::Xml)
        .expect("create resource");
    created.set_content("<root/>");
    let status = root.store_resource(&created).expect("store resource");
    assert_eq!(status.bytes, 7);
    assert!(root.list_resources().unwrap().contains(&"doc.xml".to_string()));

    let fetched = root
        .resource("doc.xml")
        .expect("open resource")
        .expect("resource exists");
    assert_eq!(fetched.kind(), ResourceKind::Xml);
    assert!(!fetched.has_content());
    assert_eq!(fetched.content_as_string().unwrap(), "<root/>");

    root.remove_resource(&fetched).expect("remove resource");
    assert!(!root.list_resources().unwrap().contains(&"doc.xml".to_string()));
    assert_eq!(root.resource_count().unwrap(), 0);
}

#[test]
fn content_round_trips_for_any_chunk_size() {
    let content = sample_bytes(10_001);
    for chunk_size in [1usize, 7, 4096, 20_000] {
        let store = MockStore::new().with_collection("/db");
        let session = connect(&store, vec![with_chunk_size(chunk_size)]);
        let root = session.root_collection().unwrap().unwrap();
        let resource = root.create_resource("blob.bin", ResourceKind::Binary).unwrap();

        root.store_from(&resource, &mut Cursor::new(&content))
            .expect("upload");
        let sizes = store.upload_chunk_sizes();
        assert!(sizes.iter().all(|size| *size <= chunk_size), "chunk size {chunk_size}");
        assert_eq!(sizes.iter().sum::<usize>(), content.len());

        let downloaded = root.resource("blob.bin").unwrap().unwrap().content().unwrap();
        assert_eq!(downloaded.len(), content.len(), "chunk size {chunk_size}");
        assert_eq!(downloaded, content, "chunk size {chunk_size}");
    }
}

#[test]
fn empty_content_round_trips() {
    let store = MockStore::new().with_collection("/db");
    let root = open_root(&store);
    let mut resource = root.create_resource("empty.xml", ResourceKind::Xml).unwrap();
    resource.set_content(Vec::new());
    assert_eq!(root.store_resource(&resource).unwrap().bytes, 0);
    assert!(store.upload_chunk_sizes().is_empty());

    let fetched = root.resource("empty.xml").unwrap().unwrap();
    assert!(fetched.content().unwrap().is_empty());
}

#[test]
fn concurrent_close_issues_one_remote_call() {
    let store = MockStore::new().with_resource("/db", "a.xml", ResourceKind::Xml, "<a/>");
    let root = open_root(&store);
    let resource = root.resource("a.xml").unwrap().unwrap();

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                resource.close().expect("close resource");
                root.close().expect("close collection");
            });
        }
    });

    assert!(resource.is_closed());
    assert!(!root.is_open());
    assert_eq!(store.resource_close_calls(resource.handle()), 1);
    assert_eq!(store.collection_close_calls(root.handle()), 1);

    root.close().unwrap();
    resource.close().unwrap();
    assert_eq!(store.collection_close_calls(root.handle()), 1);
}

#[test]
fn closing_a_clone_closes_the_collection() {
    let store = MockStore::new().with_collection("/db");
    let root = open_root(&store);
    let alias = root.clone();
    alias.close().unwrap();
    assert!(!root.is_open());
    assert_eq!(root, alias);
}

#[test]
fn lookups_of_unknown_names() {
    let store = MockStore::new().with_collection("/db/known");
    let root = open_root(&store);

    assert!(root.child_collection("missing").unwrap().is_none());
    assert!(root.child_collection("known").unwrap().is_some());
    assert!(matches!(
        root.resource("missing.xml"),
        Err(Error::InvalidResource(_))
    ));

    let session = Session::connect_with(
        &MockConnector::new(store.clone()),
        "xmldb:mock://localhost/elsewhere",
        guest(),
        Vec::new(),
    )
    .unwrap();
    assert!(session.root_collection().unwrap().is_none());
}

#[test]
fn child_collections_link_back_to_parent() {
    let store = MockStore::new()
        .with_collection("/db/a/deep")
        .with_collection("/db/b");
    let root = open_root(&store);

    assert_eq!(root.list_child_collections().unwrap(), vec!["a", "b"]);
    assert_eq!(root.child_collection_count().unwrap(), 2);

    let child = root.child_collection("a").unwrap().unwrap();
    assert_eq!(child.name(), "a");
    assert_eq!(child.parent_collection(), Some(root.clone()));
    assert!(root.parent_collection().is_none());
    assert_eq!(child.list_child_collections().unwrap(), vec!["deep"]);
}

#[test]
fn every_call_carries_the_credentials() {
    let store = MockStore::new().with_resource("/db", "a.xml", ResourceKind::Xml, "<a/>");
    let root = open_root(&store);
    root.list_resources().unwrap();
    root.resource("a.xml").unwrap().unwrap().content().unwrap();

    let calls = store.recorded_calls();
    assert!(calls.len() >= 4);
    for (operation, metadata) in calls {
        assert_eq!(
            metadata.get(AUTHENTICATION_HEADER).map(String::as_str),
            Some("Basic Z3Vlc3Q6Z3Vlc3Q="),
            "{operation}"
        );
    }
}

#[test]
fn password_stays_out_of_the_root_request() {
    let store = MockStore::new().with_collection("/db");
    let session = connect(&store, Vec::new());
    assert!(!session.descriptor().info().contains_key("password"));
    assert!(session.root_collection().unwrap().is_some());
}

#[test]
fn stream_failure_is_not_a_clean_end() {
    let mut store = MockStore::new();
    for id in ["a", "b", "c", "d"] {
        store = store.with_resource("/db", id, ResourceKind::Binary, vec![1]);
    }
    let root = open_root(&store);

    store.fail_next_stream(2, Status::unavailable("stream reset"));
    let mut ids = root.resources().unwrap();
    assert_eq!(ids.next().unwrap().unwrap(), "a");
    assert_eq!(ids.next().unwrap().unwrap(), "b");
    let err = ids.next().unwrap().unwrap_err();
    assert!(matches!(err, Error::Vendor(ref status) if status.description == "stream reset"));
    assert!(ids.next().is_none());

    store.fail_next_stream(1, Status::internal("boom"));
    assert!(root.list_resources().unwrap_err().is_vendor());
}

#[test]
fn transport_failures_become_vendor_errors() {
    let store = MockStore::new().with_collection("/db");
    let observer = BufferedObserver::default();
    let session = connect(&store, vec![with_observer(Arc::new(observer.clone()))]);
    let root = session.root_collection().unwrap().unwrap();

    store.fail_next_unary(Status::internal("disk on fire"));
    let err = root.resource_count().unwrap_err();
    assert_eq!(err.to_string(), "xmldb vendor error: disk on fire");
    assert_eq!(err.status().map(|status| status.code), Some(StatusCode::Internal));

    let failures: Vec<_> = observer
        .snapshot()
        .into_iter()
        .filter(|event| matches!(event, ClientEvent::CallFailed { .. }))
        .collect();
    assert_eq!(
        failures,
        vec![ClientEvent::CallFailed {
            operation: "resource_count",
            status: Status::internal("disk on fire"),
        }]
    );
}

#[test]
fn failed_upload_surfaces_server_status() {
    let store = MockStore::new().with_collection("/db");
    let root = open_root(&store);
    let mut resource = root.create_resource("doc.xml", ResourceKind::Xml).unwrap();
    resource.set_content("<doc/>");

    store.fail_next_upload(Status::new(StatusCode::PermissionDenied, "read only"));
    let err = root.store_resource(&resource).unwrap_err();
    assert!(xmldb_remote::is_status(&err, StatusCode::PermissionDenied));
    assert_eq!(store.resource_content("/db", "doc.xml"), Some(Vec::new()));
}

#[test]
fn storing_without_content_is_an_invalid_resource() {
    let store = MockStore::new().with_collection("/db");
    let root = open_root(&store);
    let resource = root.create_resource("doc.xml", ResourceKind::Xml).unwrap();
    assert!(matches!(
        root.store_resource(&resource),
        Err(Error::InvalidResource(_))
    ));
}

#[test]
fn empty_id_gets_a_generated_one() {
    let store = MockStore::new().with_collection("/db");
    let root = open_root(&store);
    let resource = root.create_resource("", ResourceKind::Binary).unwrap();
    assert!(!resource.id().is_empty());
    assert_eq!(root.list_resources().unwrap(), vec![resource.id().to_string()]);
    assert_ne!(root.create_id().unwrap(), root.create_id().unwrap());
}

#[test]
fn download_into_a_file() {
    let content = sample_bytes(9000);
    let store = MockStore::new().with_resource("/db", "big.bin", ResourceKind::Binary, content.clone());
    let root = open_root(&store);
    let resource = root.resource("big.bin").unwrap().unwrap();

    let mut file = tempfile::tempfile().unwrap();
    assert_eq!(resource.content_to(&mut file).unwrap(), 9000);
    file.seek(SeekFrom::Start(0)).unwrap();
    let mut read_back = Vec::new();
    file.read_to_end(&mut read_back).unwrap();
    assert_eq!(read_back, content);
}

struct FailingSink {
    written: Vec<u8>,
    limit: usize,
}

impl Write for FailingSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.written.len() + buf.len() > self.limit {
            return Err(std::io::Error::other("sink full"));
        }
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn failing_sink_keeps_partial_content() {
    let store = MockStore::new().with_resource("/db", "big.bin", ResourceKind::Binary, sample_bytes(10_000));
    let root = open_root(&store);
    let resource = root.resource("big.bin").unwrap().unwrap();

    let mut sink = FailingSink {
        written: Vec::new(),
        limit: 5000,
    };
    assert!(matches!(resource.content_to(&mut sink), Err(Error::Io(_))));
    assert_eq!(sink.written, sample_bytes(4096));
}

#[test]
fn local_content_is_served_without_a_download() {
    let store = MockStore::new().with_resource("/db", "a.xml", ResourceKind::Xml, "<remote/>");
    let root = open_root(&store);
    let mut resource = root.resource("a.xml").unwrap().unwrap();
    resource.set_content_from(&mut Cursor::new("<local/>")).unwrap();

    let before = store.recorded_calls().len();
    assert_eq!(resource.content_as_string().unwrap(), "<local/>");
    assert_eq!(store.recorded_calls().len(), before);
    assert_eq!(resource.parent_collection(), Some(root));
}

#[test]
fn chunk_size_property_configures_the_session() {
    let store = MockStore::new().with_resource("/db", "a.bin", ResourceKind::Binary, sample_bytes(10));
    let mut props = guest();
    props.insert("chunk-size".into(), "3".into());
    let session =
        Session::connect_with(&MockConnector::new(store.clone()), DESCRIPTOR, props, Vec::new())
            .unwrap();
    assert_eq!(session.config().chunk_size, 3);

    let root = session.root_collection().unwrap().unwrap();
    let resource = root.resource("a.bin").unwrap().unwrap();
    let mut target = root.create_resource("copy.bin", ResourceKind::Binary).unwrap();
    target.set_content(resource.content().unwrap());
    root.store_resource(&target).unwrap();
    assert_eq!(store.upload_chunk_sizes(), vec![3, 3, 3, 1]);
}

#[test]
fn database_facade() {
    let store = MockStore::new().with_collection("/db");
    let mut database = Database::new();
    database.register_connector(Arc::new(MockConnector::new(store)));

    assert_eq!(database.name(), "");
    assert_eq!(database.conformance_level(), "");
    assert!(database.accepts_uri(DESCRIPTOR));
    assert!(database.accepts_uri("xmldb:tcp://localhost:8080/db"));
    assert!(!database.accepts_uri("xmldb:other://localhost/db"));
    assert!(!database.accepts_uri("gugus:tcp:"));

    assert!(database.get_collection("xmldb:tcp://", guest()).unwrap().is_none());
    assert!(database
        .get_collection("xmldb:other://localhost/db", guest())
        .unwrap()
        .is_none());
    let root = database.get_collection(DESCRIPTOR, guest()).unwrap().unwrap();
    assert_eq!(root.name(), "db");

    database.set_property("indent", Some("yes"));
    assert_eq!(database.property("indent").as_deref(), Some("yes"));
    root.set_property("indent", Some("no"));
    assert_eq!(root.property_or("indent", "yes"), "no");
}

#[test]
fn only_the_query_service_is_offered() {
    let store = MockStore::new().with_collection("/db");
    let root = open_root(&store);

    let service = root.service(ServiceKind::XQuery).expect("query service");
    assert_eq!(service.name(), "XQueryService");
    assert_eq!(service.collection(), &root);
    assert!(matches!(
        service.set_namespace("x", "urn:x"),
        Err(Error::NotImplemented(_))
    ));
    assert!(matches!(service.namespace("x"), Err(Error::NotImplemented(_))));
    assert!(matches!(service.query("//a"), Err(Error::NotImplemented(_))));

    assert!(root.service(ServiceKind::CollectionManagement).is_none());
    assert!(root.service(ServiceKind::PermissionManagement).is_none());
    assert!(root.service(ServiceKind::UserPrincipalLookup).is_none());

    let mut service = service;
    root.close().unwrap();
    assert!(matches!(
        service.set_collection(root.clone()),
        Err(Error::InvalidCollection(_))
    ));
}

#[test]
fn missing_services_and_rejected_descriptors_are_reported() {
    let store = MockStore::new().with_collection("/db");
    let observer = BufferedObserver::default();
    let mut database = Database::with_options(vec![with_observer(Arc::new(observer.clone()))]);
    database.register_connector(Arc::new(MockConnector::new(store)));

    assert!(database.get_collection("gugus:tcp:", guest()).unwrap().is_none());
    assert!(database
        .get_collection("xmldb:other://localhost/db", guest())
        .unwrap()
        .is_none());
    let root = database.get_collection(DESCRIPTOR, guest()).unwrap().unwrap();
    assert!(root.service(ServiceKind::PermissionManagement).is_none());

    let events = observer.snapshot();
    let rejected: Vec<&str> = events
        .iter()
        .filter_map(|event| match event {
            ClientEvent::DescriptorRejected { descriptor, .. } => Some(descriptor.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(rejected, vec!["gugus:tcp:", "xmldb:other://localhost/db"]);
    assert!(events.iter().any(|event| matches!(
        event,
        ClientEvent::DescriptorRejected { reason, .. } if reason.contains("other")
    )));
    assert!(events.contains(&ClientEvent::ServiceUnavailable {
        kind: ServiceKind::PermissionManagement,
        collection: root.to_string(),
    }));
}
