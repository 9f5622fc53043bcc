//! Stack specification loader tests

use stackroll::filesys::file::File;
use stackroll::models::spec::{Protocol, ReplicaMode};
use stackroll::spec::loader::{load_spec, load_spec_file};

use crate::support::WEB_STACK;

#[test]
fn test_load_valid_stack() {
    let spec = load_spec("web", WEB_STACK).unwrap();

    assert_eq!(spec.name(), "web");
    assert_eq!(spec.service_names(), vec!["api", "web", "worker"]);
    assert_eq!(spec.source(), WEB_STACK);
    assert_eq!(spec.digest().len(), 64);

    let api = spec.service("api").unwrap();
    assert_eq!(api.image, "registry.example.com/shop/api:2.0");
    assert_eq!(api.mode, ReplicaMode::Replicated(3));
    assert_eq!(api.ports[0].published, Some(8080));
    assert_eq!(api.ports[0].target, 80);
    assert_eq!(api.ports[0].protocol, Protocol::Tcp);

    // replicas default to one
    assert_eq!(spec.service("worker").unwrap().desired_replicas(), Some(1));
}

#[test]
fn test_load_global_and_long_ports() {
    let source = r#"
services:
  agent:
    image: prom/node-exporter:v1.8.0
    deploy:
      mode: global
    ports:
      - target: 9100
        published: 9100
        protocol: udp
      - 53
"#;
    let spec = load_spec("monitoring", source).unwrap();
    let agent = spec.service("agent").unwrap();
    assert_eq!(agent.mode, ReplicaMode::Global);
    assert_eq!(agent.desired_replicas(), None);
    assert_eq!(agent.ports.len(), 2);
    assert_eq!(agent.ports[0].protocol, Protocol::Udp);
    assert_eq!(agent.ports[1].target, 53);
}

#[test]
fn test_every_issue_is_reported() {
    let source = r#"
services:
  api:
    image: "app:${TAG}"
  "bad name":
    image: nginx
  db:
    deploy:
      mode: global
      replicas: 2
  cache:
    image: redis:7
    deploy:
      mode: sharded
    ports:
      - "0:6379"
"#;
    let err = load_spec("shop", source).unwrap_err();

    for field in [
        "services.api.image",
        "services.bad name",
        "services.db.image",
        "services.db.deploy.replicas",
        "services.cache.deploy.mode",
        "services.cache.ports[0]",
    ] {
        assert!(err.names_field(field), "missing issue for {}: {}", field, err);
    }
}

#[test]
fn test_empty_and_missing_services() {
    let err = load_spec("web", "services: {}\n").unwrap_err();
    assert!(err.names_field("services"));

    let err = load_spec("web", "version: \"3.8\"\n").unwrap_err();
    assert!(err.names_field("services"));
}

#[test]
fn test_bad_stack_name_and_bad_yaml() {
    let err = load_spec("-web", WEB_STACK).unwrap_err();
    assert!(err.names_field("stack"));

    let err = load_spec("web", "services: [unclosed").unwrap_err();
    assert!(err.names_field("<document>"));
}

#[test]
fn test_zero_replicas_is_valid() {
    let source = "services:\n  api:\n    image: nginx\n    deploy:\n      replicas: 0\n";
    let spec = load_spec("web", source).unwrap();
    assert_eq!(spec.service("api").unwrap().mode, ReplicaMode::Replicated(0));
}

#[tokio::test]
async fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stack.yml");
    std::fs::write(&path, WEB_STACK).unwrap();

    let spec = load_spec_file("web", &File::new(&path)).await.unwrap();
    assert_eq!(spec.services().len(), 3);

    let err = load_spec_file("web", &File::new(dir.path().join("missing.yml")))
        .await
        .unwrap_err();
    assert!(err.names_field("<source>"));
}
