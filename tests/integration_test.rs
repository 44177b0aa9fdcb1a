//! Integration tests for chatport
//!
//! These tests run the full workflow from an export on disk through planning,
//! dispatch against an in-memory API, recovery and finishing.

use async_trait::async_trait;
use blockkit::Export;
use chatport::config::{validate_config, MigrateConfig};
use chatport::dispatch::Dispatcher;
use chatport::mappings::StateMappings;
use chatport::migrate::Migration;
use chatport::queue::WorkItem;
use chatport::resolve::ReferenceTable;
use chatport::shutdown::ShutdownCoordinator;
use chatport::transport::{
    ApiRequest, ApiResponse, RemoteApi, RetryConfig, RetryingTransport, StaticToken,
    TransportError,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Answers creations like the import API: the new message id is its
/// creation time in milliseconds
struct FakeGraph {
    top_level_status: u16,
    requests: Mutex<Vec<ApiRequest>>,
}

impl FakeGraph {
    fn healthy() -> Self {
        Self::answering(201)
    }

    fn answering(top_level_status: u16) -> Self {
        Self {
            top_level_status,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn routes(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.route.clone())
            .collect()
    }
}

#[async_trait]
impl RemoteApi for FakeGraph {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());

        if request.route.ends_with("completeMigration") {
            return Ok(ApiResponse::new(204, ""));
        }
        if !request.route.ends_with("/replies") && self.top_level_status != 201 {
            return Ok(ApiResponse::new(
                self.top_level_status,
                r#"{"error": {"code": "Conflict"}}"#,
            ));
        }

        let body: serde_json::Value =
            serde_json::from_str(request.spec.body.as_deref().unwrap_or("{}")).unwrap();
        let created = body["createdDateTime"].as_str().unwrap();
        let id = chrono::DateTime::parse_from_rfc3339(created)
            .unwrap()
            .timestamp_millis();
        Ok(ApiResponse::new(201, format!(r#"{{"id": "{}"}}"#, id)))
    }
}

type FakeTransport = RetryingTransport<FakeGraph, StaticToken>;

fn transport(api: FakeGraph) -> FakeTransport {
    RetryingTransport::new(api, StaticToken::new("test-token"), RetryConfig::quick())
}

/// Export with one mapped channel holding a thread and one unmapped channel
fn write_export(root: &Path) {
    std::fs::create_dir_all(root.join("general")).unwrap();
    std::fs::create_dir_all(root.join("random")).unwrap();
    std::fs::write(
        root.join("channels.json"),
        r#"[{"id": "C1", "name": "general"}, {"id": "C2", "name": "random"}]"#,
    )
    .unwrap();
    std::fs::write(
        root.join("general").join("2023-11-14.json"),
        r#"[
            {"type": "message", "user": "U1", "ts": "1700000000.000100", "text": "kickoff",
             "replies": [{"user": "U2", "ts": "1700000005.000000"}]},
            {"type": "message", "user": "U2", "ts": "1700000005.000000", "thread_ts": "1700000000.000100",
             "blocks": [{"type": "rich_text", "elements": [{"type": "rich_text_section", "elements": [
                {"type": "text", "text": "on it", "style": {"bold": true}},
                {"type": "user", "user_id": "U1"}
             ]}]}]},
            {"type": "message", "subtype": "channel_join", "user": "U3", "ts": "1700000006.000000"}
        ]"#,
    )
    .unwrap();
    std::fs::write(
        root.join("general").join("2023-11-15.json"),
        r#"[{"type": "message", "user": "U1", "ts": "1700086400.000000", "text": "day two"}]"#,
    )
    .unwrap();
    std::fs::write(
        root.join("random").join("2023-11-14.json"),
        r#"[{"type": "message", "user": "U1", "ts": "1700000001.000000", "text": "not migrated"}]"#,
    )
    .unwrap();
}

fn write_state(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join("users.json"),
        r#"{
            "default": {"slackId": null, "entraId": "bot-id", "displayName": "Migration Bot"},
            "users": [
                {"slackId": "U1", "entraId": "aad-1", "displayName": "Ada"},
                {"slackId": "U2", "entraId": "aad-2", "displayName": "Grace"}
            ]
        }"#,
    )
    .unwrap();
    std::fs::write(
        dir.join("channels.json"),
        r#"[{"slackId": "C1", "slackName": "general", "channelId": "19:gen@thread", "teamId": "team-1"}]"#,
    )
    .unwrap();
}

/// Configuration rooted in `dir` with fast pacing and no retries
fn setup(dir: &Path) -> MigrateConfig {
    let mut config = MigrateConfig::new();
    config.paths.export_dir = dir.join("export");
    config.paths.state_dir = dir.join("state");
    config.paths.queue_dir = dir.join("queues");
    config.dispatch.pacing_floor_ms = 5;
    config.queue.flush_interval_ms = 50;
    config.retry.max_retries = 0;

    write_export(&config.paths.export_dir);
    write_state(&config.paths.state_dir);
    config
}

/// Map `random` too and give it a thread whose keys match the one in `general`
fn map_random_with_same_thread(config: &MigrateConfig) {
    std::fs::write(
        config.paths.state_dir.join("channels.json"),
        r#"[
            {"slackId": "C1", "slackName": "general", "channelId": "19:gen@thread", "teamId": "team-1"},
            {"slackId": "C2", "slackName": "random", "channelId": "19:rnd@thread", "teamId": "team-1"}
        ]"#,
    )
    .unwrap();
    std::fs::write(
        config.paths.export_dir.join("random").join("2023-11-14.json"),
        r#"[
            {"type": "message", "user": "U1", "ts": "1700000000.000100", "text": "same moment",
             "replies": [{"user": "U2", "ts": "1700000005.000000"}]},
            {"type": "message", "user": "U2", "ts": "1700000005.000000", "text": "random reply",
             "thread_ts": "1700000000.000100"}
        ]"#,
    )
    .unwrap();
}

fn plan(config: &MigrateConfig) -> Migration {
    let migration = Migration::open(config.clone()).unwrap();
    let export = Export::open(&config.paths.export_dir).unwrap();
    let mappings = StateMappings::load(&config.paths.state_dir).unwrap();
    migration.plan(&export, &mappings).unwrap();
    migration
}

fn read_references(config: &MigrateConfig) -> BTreeMap<String, String> {
    serde_json::from_slice(&std::fs::read(config.paths.references_path()).unwrap()).unwrap()
}

mod config_tests {
    use super::*;

    #[test]
    fn test_written_config_loads_and_validates() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("chatport.yaml");

        let mut config = MigrateConfig::new();
        config.auth.tenant_id = Some("contoso".to_string());
        config.auth.client_id = Some("app".to_string());
        config.save(&path).unwrap();

        let loaded = MigrateConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(validate_config(&loaded).is_ok());
    }
}

mod plan_tests {
    use super::*;

    #[test]
    fn test_plan_writes_queue_snapshots() {
        let temp_dir = TempDir::new().unwrap();
        let config = setup(temp_dir.path());
        let migration = plan(&config);

        assert_eq!(migration.parents().len(), 2);
        assert_eq!(migration.children().len(), 1);

        let parents: Vec<WorkItem> =
            serde_json::from_slice(&std::fs::read(config.paths.queue_path("parents")).unwrap())
                .unwrap();
        assert_eq!(parents.len(), 2);
        assert!(parents
            .iter()
            .all(|item| item.route.path == "teams/team-1/channels/19%3Agen%40thread/messages"));

        let first: serde_json::Value = serde_json::from_str(&parents[0].body).unwrap();
        assert_eq!(first["createdDateTime"], "2023-11-14T22:13:20.000Z");
        assert_eq!(first["from"]["user"]["id"], "aad-1");
        assert_eq!(first["body"]["content"], "<div>kickoff</div>");
    }

    #[test]
    fn test_reply_payload_carries_mentions() {
        let temp_dir = TempDir::new().unwrap();
        let config = setup(temp_dir.path());
        let migration = plan(&config);

        let children: Vec<WorkItem> =
            serde_json::from_slice(&std::fs::read(config.paths.queue_path("children")).unwrap())
                .unwrap();
        assert_eq!(children.len(), 1);
        assert!(children[0].is_reply());

        let payload: serde_json::Value = serde_json::from_str(&children[0].body).unwrap();
        assert_eq!(payload["from"]["user"]["displayName"], "Grace");
        assert_eq!(payload["mentions"][0]["mentioned"]["user"]["id"], "aad-1");
        assert!(payload["body"]["content"]
            .as_str()
            .unwrap()
            .starts_with("<div><strong>on it</strong><at id=\"0\">Ada</at>"));
        assert_eq!(migration.children().len(), 1);
    }
}

mod dispatch_tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_are_addressed_to_created_parents() {
        let temp_dir = TempDir::new().unwrap();
        let config = setup(temp_dir.path());
        let migration = plan(&config);

        let transport = transport(FakeGraph::healthy());
        let summary = migration.dispatch(&transport).await.unwrap();
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 0);

        let routes = transport.api().routes();
        assert_eq!(routes.len(), 3);
        assert!(routes[..2].iter().all(|r| r.ends_with("/messages")));
        assert_eq!(
            routes[2],
            "teams/team-1/channels/19%3Agen%40thread/messages/1700000000000/replies"
        );

        let references = read_references(&config);
        assert_eq!(references["U1:1700000000000"], "1700000000000");
        assert_eq!(references.len(), 3);
        assert!(migration.parents().is_empty() && migration.children().is_empty());
    }

    #[tokio::test]
    async fn test_replies_stay_in_their_own_channel_when_keys_match() {
        let temp_dir = TempDir::new().unwrap();
        let config = setup(temp_dir.path());
        map_random_with_same_thread(&config);
        let migration = plan(&config);
        assert_eq!(migration.parents().len(), 3);
        assert_eq!(migration.children().len(), 2);

        let transport = transport(FakeGraph::healthy());
        let summary = migration.dispatch(&transport).await.unwrap();
        assert_eq!(summary.succeeded, 5);

        let routes = transport.api().routes();
        let replies: Vec<&String> = routes.iter().filter(|r| r.ends_with("/replies")).collect();
        assert_eq!(replies.len(), 2);
        assert!(replies.contains(
            &&"teams/team-1/channels/19%3Agen%40thread/messages/1700000000000/replies".to_string()
        ));
        assert!(replies.contains(
            &&"teams/team-1/channels/19%3Arnd%40thread/messages/1700000000001/replies".to_string()
        ));

        let references = read_references(&config);
        assert_eq!(references.len(), 5);
        assert_eq!(references["U1:1700000000000"], "1700000000000");
        assert_eq!(references["U1:1700000000001"], "1700000000001");
    }

    #[tokio::test]
    async fn test_redelivered_items_are_not_failures() {
        let temp_dir = TempDir::new().unwrap();
        let config = setup(temp_dir.path());
        let migration = plan(&config);

        let transport = transport(FakeGraph::answering(409));
        let summary = migration.dispatch(&transport).await.unwrap();
        assert_eq!(summary.conflicts, 2);
        assert_eq!(summary.succeeded, 1);
        assert!(migration.failed().is_empty());

        let routes = transport.api().routes();
        assert!(routes[2].ends_with("/messages/1700000000000/replies"));
    }
}

mod recovery_tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_items_are_requeued_and_retried() {
        let temp_dir = TempDir::new().unwrap();
        let config = setup(temp_dir.path());
        let migration = plan(&config);

        // every top-level creation fails, so the reply has no parent either
        let broken = transport(FakeGraph::answering(400));
        let summary = migration.dispatch(&broken).await.unwrap();
        assert_eq!(summary.failed, 3);
        assert_eq!(migration.failed().len(), 3);
        assert_eq!(broken.api().routes().len(), 2);

        assert_eq!(migration.requeue_failed().unwrap(), 3);
        assert_eq!(migration.parents().len(), 2);
        assert_eq!(migration.children().len(), 1);

        let healthy = transport(FakeGraph::healthy());
        let summary = migration.dispatch(&healthy).await.unwrap();
        assert_eq!(summary.succeeded, 3);
        assert!(migration.failed().is_empty());
    }

    #[tokio::test]
    async fn test_state_survives_restart_between_phases() {
        let temp_dir = TempDir::new().unwrap();
        let config = setup(temp_dir.path());

        {
            let migration = plan(&config);
            let references = Arc::new(ReferenceTable::open(config.paths.references_path()).unwrap());
            let coordinator = ShutdownCoordinator::new();
            coordinator.register(migration.parents().clone());
            coordinator.register(migration.children().clone());
            coordinator.register(references.clone());

            // drain only the parents, as a run interrupted after the first phase would
            let transport = transport(FakeGraph::healthy());
            let dispatcher = Dispatcher::new(&transport, references, config.dispatch_config());
            dispatcher.run(&[migration.parents()]).await.unwrap();
            coordinator.shutdown().unwrap();
        }

        let resumed = Migration::open(config.clone()).unwrap();
        assert!(resumed.parents().is_empty());
        assert_eq!(resumed.children().len(), 1);
        assert_eq!(resumed.references().len(), 2);

        let transport = transport(FakeGraph::healthy());
        let summary = resumed.dispatch(&transport).await.unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(
            transport.api().routes(),
            vec!["teams/team-1/channels/19%3Agen%40thread/messages/1700000000000/replies"]
        );
    }
}

mod finish_tests {
    use super::*;

    #[tokio::test]
    async fn test_finish_completes_channel_then_team() {
        let temp_dir = TempDir::new().unwrap();
        let config = setup(temp_dir.path());
        let migration = Migration::open(config.clone()).unwrap();
        let mappings = StateMappings::load(&config.paths.state_dir).unwrap();

        let transport = transport(FakeGraph::healthy());
        let summary = migration
            .finish(&transport, mappings.channels())
            .await
            .unwrap();
        assert_eq!(summary.channels, 1);
        assert_eq!(summary.teams, 1);
        assert_eq!(
            transport.api().routes(),
            vec![
                "teams/team-1/channels/19%3Agen%40thread/completeMigration",
                "teams/team-1/completeMigration",
            ]
        );
    }
}
