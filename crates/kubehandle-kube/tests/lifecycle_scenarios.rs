//! Lifecycle, polling and editing flows against the in-memory transport

use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use kubehandle_core::RetryBudget;
use kubehandle_kube::{
    ApiGroupRef, ApiVersionResolver, DynamicResource, KubeError, LifecycleState, MockOp,
    MockTransport, NudgePolicy, ResourceEditor, ResourceHandle, ResourceLifecycle,
};
use serde_json::{Value as JsonValue, json};
use tokio::time::Instant;

fn budget(timeout_secs: u64) -> RetryBudget {
    RetryBudget::default()
        .with_timeout(Duration::from_secs(timeout_secs))
        .with_interval(Duration::from_secs(1))
}

fn namespace_handle(name: &str) -> ResourceHandle {
    ResourceHandle::new("Namespace", ApiGroupRef::version("v1"), name)
}

fn namespace(mock: &MockTransport, name: &str) -> ResourceLifecycle {
    ResourceLifecycle::new(
        Arc::new(mock.clone()),
        DynamicResource::new(namespace_handle(name)),
    )
}

fn seed_namespace(mock: &MockTransport, name: &str, status: JsonValue) {
    mock.insert(
        "Namespace",
        None,
        json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": name}, "status": status}),
    );
}

fn leader_changed() -> KubeError {
    KubeError::api(500, "InternalError", "etcdserver: leader changed")
}

mod status_waits {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_then_value() {
        let mock = MockTransport::new();
        seed_namespace(&mock, "team", json!({"phase": "Active"}));
        mock.fail_next(MockOp::Get, leader_changed());
        mock.fail_next(MockOp::Get, leader_changed());

        let body = namespace(&mock, "team")
            .wait_for_status("Active", &budget(10))
            .await
            .unwrap();

        assert_eq!(body["status"]["phase"], "Active");
        assert_eq!(mock.operation_counts().gets, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_probes_once() {
        let mock = MockTransport::new();
        seed_namespace(&mock, "team", json!({"phase": "Pending"}));

        let err = namespace(&mock, "team")
            .wait_for_status("Active", &RetryBudget::once())
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(err.to_string().contains("last observed: Pending"), "{err}");
        assert_eq!(mock.operation_counts().gets, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_progression() {
        let mock = MockTransport::new();
        seed_namespace(&mock, "team", json!({}));
        mock.script_status(
            "Namespace",
            None,
            "team",
            [json!({"phase": "Pending"}), json!({"phase": "Pending"}), json!({"phase": "Active"})],
        );

        let start = Instant::now();
        namespace(&mock, "team")
            .wait_for_status("Active", &budget(30))
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_status_fails_without_sleeping() {
        let mock = MockTransport::new();
        seed_namespace(&mock, "team", json!({"phase": "Failed"}));
        let lifecycle = namespace(&mock, "team");

        let start = Instant::now();
        let err = lifecycle
            .wait_for_status("Active", &budget(60))
            .await
            .unwrap_err();

        assert_eq!(start.elapsed(), Duration::ZERO);
        match err {
            KubeError::Timeout(t) => {
                assert_eq!(t.stop_status.as_deref(), Some("Failed"));
                assert_eq!(t.kind, "Namespace");
                assert_eq!(t.name, "team");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(
            lifecycle.state(),
            LifecycleState::Failed {
                status: "Failed".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_status_can_be_disabled() {
        let mock = MockTransport::new();
        seed_namespace(&mock, "team", json!({"phase": "Failed"}));

        let err = namespace(&mock, "team")
            .wait_for_status("Active", &budget(3).without_stop_status())
            .await
            .unwrap_err();

        let KubeError::Timeout(t) = err else {
            panic!("expected timeout");
        };
        assert!(t.stop_status.is_none());
        assert_eq!(mock.operation_counts().gets, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let mock = MockTransport::new();
        seed_namespace(&mock, "team", json!({"phase": "Active"}));
        mock.fail_next(MockOp::Get, KubeError::api(403, "Forbidden", "namespaces is forbidden"));

        let err = namespace(&mock, "team")
            .wait_for_status("Active", &budget(60))
            .await
            .unwrap_err();

        assert!(matches!(err, KubeError::Api(kube::Error::Api(ref resp)) if resp.code == 403));
        assert_eq!(mock.operation_counts().gets, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_carries_last_transient_error() {
        let mock = MockTransport::new();
        for _ in 0..10 {
            mock.fail_next(MockOp::Get, leader_changed());
        }

        let err = namespace(&mock, "team")
            .wait_for_status("Active", &budget(2))
            .await
            .unwrap_err();

        let KubeError::Timeout(t) = err else {
            panic!("expected timeout");
        };
        let last = t.last_error.expect("last transient error");
        assert!(last.to_string().contains("leader changed"));
        assert_eq!(t.timeout, Duration::from_secs(2));
    }
}

mod condition_waits {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_condition_status() {
        let mock = MockTransport::new();
        seed_namespace(&mock, "team", json!({}));
        mock.script_status(
            "Namespace",
            None,
            "team",
            [
                json!({"conditions": [{"type": "Ready", "status": "False", "reason": "Starting"}]}),
                json!({"conditions": [
                    {"type": "Ready", "status": "False", "lastTransitionTime": "2024-05-01T10:00:00Z"},
                    {"type": "Ready", "status": "True", "reason": "Done", "lastTransitionTime": "2024-05-01T10:01:00Z"}
                ]}),
            ],
        );

        let condition = namespace(&mock, "team")
            .wait_for_condition("Ready", "True", &budget(10))
            .await
            .unwrap();
        assert_eq!(condition.reason.as_deref(), Some("Done"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_condition_timeout_names_last_seen() {
        let mock = MockTransport::new();
        seed_namespace(
            &mock,
            "team",
            json!({"conditions": [{"type": "Ready", "status": "False", "reason": "Starting"}]}),
        );

        let err = namespace(&mock, "team")
            .wait_for_condition("Ready", "True", &budget(1))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("condition Ready=True"), "{message}");
        assert!(message.contains("Ready=False (Starting)"), "{message}");
    }
}

mod deletion {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_delete_absent_is_idempotent() {
        let mock = MockTransport::new();
        let lifecycle = namespace(&mock, "ghost");

        assert!(!lifecycle.delete(true, &budget(10)).await.unwrap());
        assert!(!lifecycle.delete(true, &budget(10)).await.unwrap());
        assert_eq!(mock.operation_counts().gets, 0);
        assert_eq!(lifecycle.state(), LifecycleState::Absent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_waits_for_disappearance() {
        let mock = MockTransport::new().linger_on_delete(2);
        seed_namespace(&mock, "team", json!({"phase": "Active"}));
        let lifecycle = namespace(&mock, "team");

        assert!(lifecycle.delete(true, &budget(10)).await.unwrap());
        assert!(mock.object("Namespace", None, "team").is_none());
        assert_eq!(lifecycle.state(), LifecycleState::Absent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nudge_clears_finalizers() {
        let mock = MockTransport::new().linger_on_delete(100);
        seed_namespace(&mock, "team", json!({"phase": "Active"}));
        let lifecycle = ResourceLifecycle::new(
            Arc::new(mock.clone()),
            DynamicResource::new(namespace_handle("team")).with_nudge(NudgePolicy::ClearFinalizers),
        );

        assert!(lifecycle.clean_up(&budget(10)).await.unwrap());
        assert_eq!(mock.operation_counts().patches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_delete_times_out() {
        let mock = MockTransport::new().linger_on_delete(100);
        seed_namespace(&mock, "team", json!({"phase": "Active"}));

        let err = namespace(&mock, "team")
            .delete(true, &budget(2))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("deletion"), "{message}");
        assert!(message.contains("terminating"), "{message}");
    }
}

mod scoped_use {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_scoped_cleans_up_on_success() {
        let mock = MockTransport::new();
        let lifecycle = namespace(&mock, "scratch");

        let seen = lifecycle
            .scoped(&budget(10), |lc| async move { lc.exists().await })
            .await
            .unwrap();

        assert!(seen);
        assert!(mock.object("Namespace", None, "scratch").is_none());
        assert_eq!(mock.operation_counts().creates, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scoped_cleans_up_on_error() {
        let mock = MockTransport::new();
        let lifecycle = namespace(&mock, "scratch");

        let result: kubehandle_kube::Result<()> = lifecycle
            .scoped(&budget(10), |_| async {
                Err(KubeError::InvalidConfig("body failed".into()))
            })
            .await;

        assert!(matches!(result, Err(KubeError::InvalidConfig(_))));
        assert!(mock.object("Namespace", None, "scratch").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_editor_round_trip() {
        let mock = MockTransport::new();
        mock.insert(
            "ConfigMap",
            Some("default"),
            json!({"metadata": {"name": "settings", "labels": {"tier": "web"}}, "data": {"k": "v1"}}),
        );
        let target = ResourceLifecycle::new(
            Arc::new(mock.clone()),
            DynamicResource::new(ResourceHandle::namespaced(
                "ConfigMap",
                ApiGroupRef::version("v1"),
                "default",
                "settings",
            )),
        );
        let original = mock.object("ConfigMap", Some("default"), "settings").unwrap();

        let editor = ResourceEditor::new().with_patch(
            target,
            json!({"data": {"k": "v2"}, "metadata": {"labels": {"edited": "true"}}}),
        );
        editor
            .scoped(|| async {
                let edited = mock.object("ConfigMap", Some("default"), "settings").unwrap();
                assert_eq!(edited["data"]["k"], "v2");
                assert_eq!(edited["metadata"]["labels"]["edited"], "true");
                Ok(())
            })
            .await
            .unwrap();

        let restored = mock.object("ConfigMap", Some("default"), "settings").unwrap();
        assert_eq!(restored["data"], original["data"]);
        assert_eq!(restored["metadata"]["labels"], original["metadata"]["labels"]);
    }
}

mod discovery {
    use super::*;

    #[tokio::test]
    async fn test_create_uses_resolved_version() {
        let mock = MockTransport::new().serve("apps", "Deployment", &["v1beta1", "v1", "v2alpha1"], true);
        let transport = Arc::new(mock.clone());
        let lifecycle = ResourceLifecycle::new(
            transport.clone(),
            DynamicResource::new(ResourceHandle::namespaced(
                "Deployment",
                ApiGroupRef::group("apps"),
                "prod",
                "web",
            ))
            .with_body(json!({"spec": {"replicas": 1}})),
        )
        .with_resolver(ApiVersionResolver::new(transport).with_ceiling("v1".parse().unwrap()));

        let created = lifecycle.create().await.unwrap();
        assert_eq!(created["apiVersion"], "apps/v1");
        assert_eq!(lifecycle.handle().api_version(), Some("apps/v1"));
    }

    #[tokio::test]
    async fn test_unsupported_kind_fails_create() {
        let mock = MockTransport::new().serve("example.io", "Widget", &["v3"], true);
        let lifecycle = ResourceLifecycle::new(
            Arc::new(mock.clone()),
            DynamicResource::new(ResourceHandle::new("Widget", ApiGroupRef::group("example.io"), "w")),
        );

        let err = lifecycle.create().await.unwrap_err();
        assert!(matches!(err, KubeError::UnsupportedResource { .. }));
        assert_eq!(mock.operation_counts().creates, 0);
    }

    #[tokio::test]
    async fn test_missing_required_field_fails_create() {
        let mock = MockTransport::new();
        let lifecycle = ResourceLifecycle::new(
            Arc::new(mock.clone()),
            DynamicResource::new(namespace_handle("team")).require("spec.finalizers"),
        );

        let err = lifecycle.create().await.unwrap_err();
        assert!(matches!(err, KubeError::MissingField { .. }));
        assert_eq!(mock.operation_counts().creates, 0);
    }
}

mod streams {
    use super::*;

    fn event(name: &str, involved: &str, reason: &str) -> JsonValue {
        json!({
            "apiVersion": "v1",
            "kind": "Event",
            "metadata": {"name": name, "namespace": "default"},
            "involvedObject": {"kind": "Pod", "name": involved, "namespace": "default"},
            "reason": reason
        })
    }

    #[tokio::test]
    async fn test_events_for_object() {
        let mock = MockTransport::new();
        mock.insert("Event", Some("default"), event("web.1", "web", "Scheduled"));
        mock.insert("Event", Some("default"), event("db.1", "db", "Pulled"));

        let lifecycle = ResourceLifecycle::new(
            Arc::new(mock.clone()),
            DynamicResource::new(ResourceHandle::namespaced(
                "Pod",
                ApiGroupRef::version("v1"),
                "default",
                "web",
            )),
        );

        let events: Vec<_> = lifecycle
            .events(Duration::from_secs(5))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason.as_deref(), Some("Scheduled"));
    }

    #[tokio::test]
    async fn test_watch_and_list() {
        let mock = MockTransport::new();
        seed_namespace(&mock, "a", json!({"phase": "Active"}));
        seed_namespace(&mock, "b", json!({"phase": "Active"}));

        let lifecycle = namespace(&mock, "a");
        let events: Vec<_> = lifecycle
            .watch(Duration::from_secs(5))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].object["metadata"]["name"], "a");

        let all = lifecycle.list(&Default::default()).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
