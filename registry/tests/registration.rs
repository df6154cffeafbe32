mod common;

use common::harness;
use common::register;
use common::register_file;
use pretty_assertions::assert_eq;
use serde_json::json;

#[tokio::test]
async fn reregistering_a_key_updates_the_same_record() {
    let registry = harness().registry;
    let first = register(
        &registry,
        json!({
            "source": "gdrive",
            "path": "/docs/plan.pdf",
            "content_hash": "h1",
            "size": 10,
            "mime_type": "application/pdf",
        }),
    )
    .await;
    assert_eq!(first["is_new"], true);
    assert_eq!(first["key"], "gdrive:/docs/plan.pdf");

    let second = register(
        &registry,
        json!({"source": "gdrive", "path": "/docs/plan.pdf", "content_hash": "h2"}),
    )
    .await;
    assert_eq!(second["id"], first["id"]);
    assert_eq!(second["is_new"], false);

    let file = registry
        .call("get", json!({"id": first["id"]}))
        .await
        .unwrap();
    assert_eq!(file["content_hash"], "h2");
    assert_eq!(file["size"], 10);
    assert_eq!(file["mime_type"], "application/pdf");
    assert_eq!(file["status"], "active");
}

#[tokio::test]
async fn blank_fields_on_reregistration_keep_known_values() {
    let registry = harness().registry;
    let first = register(
        &registry,
        json!({
            "source": "local",
            "path": "/a.txt",
            "content_hash": "h1",
            "mime_type": "text/plain",
            "content_text": "quarterly plan",
        }),
    )
    .await;

    register(
        &registry,
        json!({
            "source": "local",
            "path": "/a.txt",
            "content_hash": "h1",
            "mime_type": "  ",
            "content_text": "   ",
        }),
    )
    .await;

    let file = registry
        .call("get", json!({"id": first["id"]}))
        .await
        .unwrap();
    assert_eq!(file["mime_type"], "text/plain");
    assert_eq!(file["content_text"], "quarterly plan");
}

#[tokio::test]
async fn registration_requires_a_content_hash() {
    let registry = harness().registry;
    let err = registry
        .call("register", json!({"source": "local", "path": "/a.txt"}))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "validation_error");

    let stats = registry.call("stats", json!({})).await.unwrap();
    assert_eq!(stats["total_files"], 0);
}

#[tokio::test]
async fn get_requires_id_or_source_and_path() {
    let registry = harness().registry;
    let err = registry
        .call("get", json!({"source": "local"}))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "validation_error");

    let err = registry
        .call("get", json!({"source": "local", "path": "/nope"}))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "not_found");
}

#[tokio::test]
async fn tagging_is_idempotent_and_untag_of_absent_tag_is_a_noop() {
    let registry = harness().registry;
    let id = register_file(&registry, "/a.txt", "h", 1).await;

    let tagged = registry
        .call("tag", json!({"id": id, "tags": ["work", " work ", "2024"]}))
        .await
        .unwrap();
    assert_eq!(tagged["status"], "tagged");
    assert_eq!(tagged["added"], json!(["work", "2024"]));

    let again = registry
        .call("tag", json!({"id": id, "tags": ["work"]}))
        .await
        .unwrap();
    assert_eq!(again["added"], json!([]));

    let untagged = registry
        .call(
            "untag",
            json!({"source": "local", "path": "/a.txt", "tags": ["never-attached"]}),
        )
        .await
        .unwrap();
    assert_eq!(untagged["removed"], json!([]));

    let tags = registry.call("tags", json!({})).await.unwrap();
    assert_eq!(tags["total"], 2);
    assert_eq!(tags["tags"][0]["name"], "2024");
    assert_eq!(tags["tags"][1]["usage_count"], 1);

    let err = registry
        .call("tag", json!({"id": id, "tags": ["  "]}))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "validation_error");
}

#[tokio::test]
async fn remove_is_soft_and_reregistration_restores() {
    let registry = harness().registry;
    let id = register_file(&registry, "/a.txt", "h", 1).await;

    let removed = registry.call("remove", json!({"id": id})).await.unwrap();
    assert_eq!(removed, json!({"status": "removed", "id": id}));

    let file = registry.call("get", json!({"id": id})).await.unwrap();
    assert_eq!(file["status"], "deleted");
    let listed = registry.call("search", json!({})).await.unwrap();
    assert_eq!(listed["total"], 0);

    register_file(&registry, "/a.txt", "h", 1).await;
    let file = registry.call("get", json!({"id": id})).await.unwrap();
    assert_eq!(file["status"], "active");
}

#[tokio::test]
async fn purge_deletes_and_verify_stamps() {
    let registry = harness().registry;
    let keep = register_file(&registry, "/keep.txt", "h1", 1).await;
    let gone = register_file(&registry, "/gone.txt", "h2", 1).await;

    let verified = registry.call("verify", json!({"id": keep})).await.unwrap();
    assert_eq!(verified["status"], "verified");
    assert!(verified["verified_at"].is_string());

    registry.call("purge", json!({"id": gone})).await.unwrap();
    let err = registry.call("get", json!({"id": gone})).await.unwrap_err();
    assert_eq!(err.reason(), "not_found");

    let activity = registry
        .call("activity", json!({"limit": 2}))
        .await
        .unwrap();
    assert_eq!(activity["total"], 2);
    assert_eq!(activity["activity"][0]["action"], "purged");
    assert_eq!(activity["activity"][1]["action"], "verified");
}

#[tokio::test]
async fn batch_register_isolates_bad_items() {
    let registry = harness().registry;
    let files: Vec<_> = (0..5)
        .map(|i| {
            if i == 2 {
                json!({"source": "local", "path": format!("/f{i}")})
            } else {
                json!({"source": "local", "path": format!("/f{i}"), "content_hash": format!("h{i}")})
            }
        })
        .collect();

    let report = registry
        .call("batch_register", json!({ "files": files }))
        .await
        .unwrap();
    assert_eq!(report["total"], 5);
    assert_eq!(report["succeeded"], 4);
    assert_eq!(report["failed"], 1);

    let bad = &report["results"][2];
    assert_eq!(bad["index"], 2);
    assert_eq!(bad["status"], "error");
    assert_eq!(bad["reason"], "validation_error");
    assert_eq!(bad["key"], "local:/f2");
    assert_eq!(report["results"][4]["status"], "registered");
    assert_eq!(report["results"][4]["details"]["is_new"], true);

    let listed = registry.call("search", json!({})).await.unwrap();
    assert_eq!(listed["total"], 4);
}

#[tokio::test]
async fn batch_calls_enforce_caps() {
    let registry = harness().registry;
    let err = registry
        .call("batch_register", json!({"files": []}))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "validation_error");

    let files: Vec<_> = (0..51)
        .map(|i| json!({"source": "s", "path": format!("/{i}"), "content_hash": "h"}))
        .collect();
    let err = registry
        .call("batch_register", json!({ "files": files }))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "invalid input: maximum 50 items per batch call, got 51"
    );
}

#[tokio::test]
async fn batch_get_tag_and_remove_report_per_item() {
    let registry = harness().registry;
    let a = register_file(&registry, "/a", "h1", 1).await;
    let b = register_file(&registry, "/b", "h2", 1).await;

    let got = registry
        .call(
            "batch_get",
            json!({"ids": [a, "999"], "keys": [{"source": "local", "path": "/b"}]}),
        )
        .await
        .unwrap();
    assert_eq!(got["succeeded"], 2);
    assert_eq!(got["results"][0]["status"], "found");
    assert_eq!(got["results"][1]["reason"], "not_found");
    assert_eq!(got["results"][1]["id"], "999");
    assert_eq!(got["results"][2]["id"], b);
    assert_eq!(got["results"][2]["details"]["path"], "/b");

    let tagged = registry
        .call("batch_tag", json!({"ids": [a, b], "tags": ["x"]}))
        .await
        .unwrap();
    assert_eq!(tagged["succeeded"], 2);
    assert_eq!(tagged["results"][1]["details"]["added"], json!(["x"]));

    let untagged = registry
        .call("batch_untag", json!({"ids": [a], "tags": ["x"]}))
        .await
        .unwrap();
    assert_eq!(untagged["results"][0]["status"], "untagged");

    let removed = registry
        .call("batch_remove", json!({"ids": [b, "12345"]}))
        .await
        .unwrap();
    assert_eq!((removed["succeeded"].clone(), removed["failed"].clone()), (json!(1), json!(1)));
    assert_eq!(removed["results"][0]["key"], "local:/b");
}

#[tokio::test]
async fn unknown_operations_and_shutdown() {
    let registry = harness().registry;
    let err = registry.call("explode", json!({})).await.unwrap_err();
    assert_eq!(err.to_string(), "unknown operation: explode");

    registry.shutdown();
    let err = registry.call("stats", json!({})).await.unwrap_err();
    assert_eq!(err.reason(), "cancelled");
}
