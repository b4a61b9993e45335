//! Lifecycle integration tests
//!
//! Drives probe extensions through load/enable/disable/unload/reload
//! against a real on-disk extension directory.

mod common;

#[cfg(test)]
mod integration_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tessera_core::extension::{LifecycleOp, LifecyclePhase, ManagerOptions};
    use tessera_core::prelude::*;

    use crate::common::{Behavior, Fault, Fixture};

    async fn fixture_with(ids: &[(&str, &[&str])]) -> Fixture {
        let mut fx = Fixture::new();
        for (id, deps) in ids {
            fx.add(id, deps, Behavior::default());
        }
        fx.discover().await;
        fx
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let fx = fixture_with(&[("a", &[])]).await;
        let calls = fx.calls("a");

        fx.manager.load_extension("a").await.unwrap();
        fx.manager.load_extension("a").await.unwrap();

        assert_eq!(calls.initializes(), 1);
        assert_eq!(fx.manager.state("a"), ExtensionState::Loaded);
        assert_eq!(fx.manager.loaded_ids().await, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_enable_and_disable_are_idempotent() {
        let fx = fixture_with(&[("a", &[])]).await;
        let calls = fx.calls("a");

        fx.manager.load_extension("a").await.unwrap();
        fx.manager.enable_extension("a").await.unwrap();
        fx.manager.enable_extension("a").await.unwrap();
        assert_eq!(calls.starts(), 1);
        assert_eq!(fx.manager.state("a"), ExtensionState::Enabled);

        fx.manager.disable_extension("a").await.unwrap();
        fx.manager.disable_extension("a").await.unwrap();
        assert_eq!(calls.stops(), 1);
        assert_eq!(fx.manager.state("a"), ExtensionState::Disabled);

        // Disabled extensions can be started again.
        fx.manager.enable_extension("a").await.unwrap();
        assert_eq!(calls.starts(), 2);
    }

    #[tokio::test]
    async fn test_operations_on_unknown_or_unloaded_extension() {
        let fx = fixture_with(&[("a", &[])]).await;

        let err = fx.manager.load_extension("ghost").await.unwrap_err();
        assert!(matches!(err, Error::ManifestNotFound(ref id) if id == "ghost"));

        let err = fx.manager.enable_extension("a").await.unwrap_err();
        assert!(matches!(err, Error::NotLoaded(_)));
        let err = fx.manager.disable_extension("a").await.unwrap_err();
        assert!(matches!(err, Error::NotLoaded(_)));

        // Unloading something that is not loaded is a no-op.
        fx.manager.unload_extension("a").await.unwrap();
        assert_eq!(fx.manager.state("a"), ExtensionState::Unloaded);
    }

    #[tokio::test]
    async fn test_dependency_must_be_enabled_first() {
        let fx = fixture_with(&[("a", &[]), ("b", &["a"])]).await;
        let m = &fx.manager;

        m.load_extension("a").await.unwrap();
        m.load_extension("b").await.unwrap();
        let err = m.enable_extension("b").await.unwrap_err();
        match err {
            Error::DependencyNotEnabled { id, dependency } => {
                assert_eq!(id, "b");
                assert_eq!(dependency, "a");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(m.state("b"), ExtensionState::Loaded);
        assert_eq!(fx.calls("b").starts(), 0);

        m.enable_extension("a").await.unwrap();
        m.enable_extension("b").await.unwrap();
        assert_eq!(m.state("b"), ExtensionState::Enabled);
    }

    #[tokio::test]
    async fn test_disable_refused_while_dependents_enabled() {
        let fx = fixture_with(&[("a", &[]), ("b", &["a"])]).await;
        let m = &fx.manager;

        for id in ["a", "b"] {
            m.load_extension(id).await.unwrap();
            m.enable_extension(id).await.unwrap();
        }

        let err = m.disable_extension("a").await.unwrap_err();
        match err {
            Error::HasActiveDependents { id, dependents } => {
                assert_eq!(id, "a");
                assert_eq!(dependents, vec!["b".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(m.state("a"), ExtensionState::Enabled);
        assert_eq!(fx.calls("a").stops(), 0);

        m.disable_extension("b").await.unwrap();
        m.disable_extension("a").await.unwrap();
        assert_eq!(m.state("a"), ExtensionState::Disabled);
        assert_eq!(m.state("b"), ExtensionState::Disabled);
    }

    #[tokio::test]
    async fn test_unload_of_enabled_extension_stops_it_first() {
        let fx = fixture_with(&[("a", &[])]).await;
        let calls = fx.calls("a");

        fx.manager.load_extension("a").await.unwrap();
        fx.manager.enable_extension("a").await.unwrap();
        fx.manager.unload_extension("a").await.unwrap();

        assert_eq!(calls.stops(), 1);
        assert_eq!(calls.disposes(), 1);
        assert!(!fx.manager.is_loaded("a").await);
        assert_eq!(fx.manager.state("a"), ExtensionState::Unloaded);
    }

    #[tokio::test]
    async fn test_initialize_fault_leaves_no_record() {
        let mut fx = Fixture::new();
        fx.add(
            "broken",
            &[],
            Behavior {
                initialize: Fault::Fail,
                ..Default::default()
            },
        );
        fx.discover().await;

        let err = fx.manager.load_extension("broken").await.unwrap_err();
        match &err {
            Error::LifecycleFault { id, phase, message } => {
                assert_eq!(id, "broken");
                assert_eq!(*phase, LifecyclePhase::Initialize);
                assert!(message.contains("initialize refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!fx.manager.is_loaded("broken").await);
        assert_eq!(fx.manager.state("broken"), ExtensionState::Unloaded);
        assert!(fx.manager.last_error("broken").is_some());
        assert!(fx.manager.get_extension("broken").await.is_none());
    }

    #[tokio::test]
    async fn test_panic_in_initialize_is_contained() {
        let mut fx = Fixture::new();
        fx.add(
            "panicky",
            &[],
            Behavior {
                initialize: Fault::Panic,
                ..Default::default()
            },
        );
        fx.discover().await;

        let err = fx.manager.load_extension("panicky").await.unwrap_err();
        match err {
            Error::LifecycleFault { phase, message, .. } => {
                assert_eq!(phase, LifecyclePhase::Initialize);
                assert!(message.contains("panicked"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fx.manager.state("panicky"), ExtensionState::Unloaded);
    }

    #[tokio::test]
    async fn test_start_fault_moves_to_error_state() {
        let mut fx = Fixture::new();
        fx.add("flaky", &[], Behavior::failing_start());
        fx.discover().await;
        let m = &fx.manager;

        m.load_extension("flaky").await.unwrap();
        let err = m.enable_extension("flaky").await.unwrap_err();
        assert!(err.is_lifecycle_fault());
        assert_eq!(m.state("flaky"), ExtensionState::Error);
        assert!(m.last_error("flaky").unwrap().contains("start refused"));

        // Error only accepts unload or reload.
        for op in [LifecycleOp::Load, LifecycleOp::Enable, LifecycleOp::Disable] {
            let result = match op {
                LifecycleOp::Load => m.load_extension("flaky").await,
                LifecycleOp::Enable => m.enable_extension("flaky").await,
                _ => m.disable_extension("flaky").await,
            };
            match result {
                Err(Error::InvalidTransition { state, operation, .. }) => {
                    assert_eq!(state, ExtensionState::Error);
                    assert_eq!(operation, op);
                }
                other => panic!("{op:?} should be refused, got {other:?}"),
            }
        }

        m.unload_extension("flaky").await.unwrap();
        assert_eq!(m.state("flaky"), ExtensionState::Unloaded);
        assert_eq!(fx.calls("flaky").disposes(), 1);
    }

    #[tokio::test]
    async fn test_hanging_start_times_out() {
        let mut fx = Fixture::with_options(
            ManagerOptions::default().with_lifecycle_timeout(Duration::from_millis(100)),
        );
        fx.add(
            "slow",
            &[],
            Behavior {
                start: Fault::Hang,
                ..Default::default()
            },
        );
        fx.discover().await;

        fx.manager.load_extension("slow").await.unwrap();
        let err = tokio::time::timeout(Duration::from_secs(5), fx.manager.enable_extension("slow"))
            .await
            .expect("lifecycle timeout should fire first")
            .unwrap_err();

        match err {
            Error::LifecycleFault { phase, message, .. } => {
                assert_eq!(phase, LifecyclePhase::Start);
                assert!(message.contains("timed out"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fx.manager.state("slow"), ExtensionState::Error);
    }

    #[tokio::test]
    async fn test_dispose_fault_still_unloads() {
        let mut fx = Fixture::new();
        fx.add(
            "sticky",
            &[],
            Behavior {
                dispose: Fault::Fail,
                ..Default::default()
            },
        );
        fx.discover().await;

        fx.manager.load_extension("sticky").await.unwrap();
        let err = fx.manager.unload_extension("sticky").await.unwrap_err();
        assert!(matches!(
            err,
            Error::LifecycleFault {
                phase: LifecyclePhase::Dispose,
                ..
            }
        ));
        assert!(!fx.manager.is_loaded("sticky").await);
        assert_eq!(fx.manager.state("sticky"), ExtensionState::Unloaded);
    }

    #[tokio::test]
    async fn test_unload_removes_registered_apis() {
        let fx = fixture_with(&[("a", &[]), ("b", &[])]).await;
        let m = &fx.manager;
        m.load_extension("a").await.unwrap();
        m.load_extension("b").await.unwrap();

        let a = m.get_extension("a").await.unwrap();
        let answer = a.context.call_api("b", "whoami", json!(null)).await.unwrap();
        assert_eq!(answer, json!("b"));

        let b_context = m.get_extension("b").await.unwrap().context;
        m.unload_extension("b").await.unwrap();

        assert!(b_context.is_closed());
        let err = a.context.call_api("b", "whoami", json!(null)).await.unwrap_err();
        assert!(matches!(err, Error::ApiNotFound { .. }));
    }

    #[tokio::test]
    async fn test_reload_reenables_enabled_extension() {
        let fx = fixture_with(&[("c", &[])]).await;
        let calls = fx.calls("c");
        let m = &fx.manager;

        m.load_extension("c").await.unwrap();
        m.enable_extension("c").await.unwrap();
        m.reload_extension("c").await.unwrap();

        assert_eq!(m.state("c"), ExtensionState::Enabled);
        assert_eq!(calls.initializes(), 2);
        assert_eq!(calls.starts(), 2);
        assert_eq!(calls.stops(), 1);
        assert_eq!(calls.disposes(), 1);
    }

    #[tokio::test]
    async fn test_reload_picks_up_manifest_changes() {
        let fx = fixture_with(&[("c", &[])]).await;
        let m = &fx.manager;
        m.load_extension("c").await.unwrap();

        let manifest = json!({
            "id": "c",
            "name": "Probe c",
            "version": "1.1.0",
            "entryPoint": { "assembly": "c.ext", "type": "Probe" },
        });
        std::fs::write(
            fx.extensions_dir().join("c").join("extension.json"),
            manifest.to_string(),
        )
        .unwrap();

        m.reload_extension("c").await.unwrap();
        let handle = m.get_extension("c").await.unwrap();
        assert_eq!(handle.manifest.version, "1.1.0");
        assert_eq!(handle.state, ExtensionState::Loaded);
    }

    #[tokio::test]
    async fn test_reload_with_missing_artifact_ends_unloaded() {
        let fx = fixture_with(&[("c", &[])]).await;
        let m = &fx.manager;
        m.load_extension("c").await.unwrap();
        m.enable_extension("c").await.unwrap();

        std::fs::remove_file(fx.artifact("c")).unwrap();

        let err = m.reload_extension("c").await.unwrap_err();
        assert!(matches!(err, Error::ManifestInvalid { .. }));
        assert_eq!(m.state("c"), ExtensionState::Unloaded);
        assert!(!m.is_loaded("c").await);
        assert!(m.last_error("c").is_some());
    }

    #[tokio::test]
    async fn test_incompatible_host_version_is_refused() {
        let mut fx = Fixture::new();
        let manifest = json!({
            "id": "future",
            "name": "Future",
            "version": "1.0.0",
            "minimumHostVersion": "99.0.0",
            "entryPoint": { "assembly": "future.ext", "type": "Probe" },
        });
        let calls = fx.add_manifest("future", manifest, Behavior::default());
        fx.discover().await;

        let err = fx.manager.load_extension("future").await.unwrap_err();
        assert!(matches!(err, Error::Incompatible { .. }));
        assert_eq!(calls.initializes(), 0);
    }

    #[tokio::test]
    async fn test_load_all_and_shutdown_follow_dependency_order() {
        let fx = fixture_with(&[("app", &["mid"]), ("base", &[]), ("mid", &["base"])]).await;
        let m = &fx.manager;

        assert_eq!(
            m.load_order(&["app".to_string()]).await.unwrap(),
            vec!["base", "mid", "app"]
        );

        let report = m.load_all().await;
        assert!(report.is_success());
        assert_eq!(report.succeeded, vec!["base", "mid", "app"]);

        let report = m.enable_all(&["app".to_string()]).await;
        assert!(report.is_success());
        assert_eq!(m.state("app"), ExtensionState::Enabled);

        let report = m.shutdown().await;
        assert!(report.is_success());
        assert_eq!(report.succeeded, vec!["app", "mid", "base"]);
        assert!(m.loaded_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_isolates_unresolvable_extensions() {
        let fx = fixture_with(&[("ok", &[]), ("orphan", &["missing"])]).await;

        let report = fx.manager.load_all().await;
        assert_eq!(report.succeeded, vec!["ok".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "orphan");
        assert!(matches!(report.failed[0].1, Error::MissingDependency { .. }));
    }

    #[tokio::test]
    async fn test_lifecycle_events_are_published() {
        let fx = fixture_with(&[("a", &[])]).await;
        let mut tap = fx.manager.event_bus().tap();

        fx.manager.load_extension("a").await.unwrap();
        fx.manager.enable_extension("a").await.unwrap();
        fx.manager.unload_extension("a").await.unwrap();

        let mut kinds = Vec::new();
        while kinds.len() < 4 {
            let event = tokio::time::timeout(Duration::from_secs(2), tap.recv())
                .await
                .expect("event should arrive")
                .expect("bus should stay open");
            assert_eq!(event.payload.extension_id(), Some("a"));
            kinds.push(event.kind());
        }
        for kind in [
            EventKind::ExtensionLoaded,
            EventKind::ExtensionEnabled,
            EventKind::ExtensionDisabled,
            EventKind::ExtensionUnloaded,
        ] {
            assert!(kinds.contains(&kind), "missing {kind}");
        }
    }

    #[tokio::test]
    async fn test_handles_expose_type_and_state() {
        let fx = fixture_with(&[("a", &[]), ("b", &[])]).await;
        fx.manager.load_all().await;
        fx.manager.enable_extension("b").await.unwrap();

        let tools = fx.manager.get_extensions_by_type(ExtensionType::Tool).await;
        let ids: Vec<_> = tools.iter().map(|h| h.id().to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let b = fx.manager.get_extension("b").await.unwrap();
        assert_eq!(b.state, ExtensionState::Enabled);
        assert_eq!(b.instance.read().await.name(), "Probe");
        let _: Arc<ExtensionContext> = b.context;
    }

    #[tokio::test]
    async fn test_operations_on_one_id_are_serialized() {
        let mut fx = Fixture::new();
        fx.add("a", &[], Behavior::slow_initialize(Duration::from_millis(100)));
        fx.discover().await;
        let calls = fx.calls("a");

        let (first, second, enabled) = tokio::join!(
            fx.manager.load_extension("a"),
            fx.manager.load_extension("a"),
            fx.manager.enable_extension("a"),
        );
        first.unwrap();
        second.unwrap();
        enabled.unwrap();

        assert_eq!(calls.initializes(), 1);
        assert_eq!(calls.starts(), 1);
        assert_eq!(fx.manager.loaded_ids().await, vec!["a".to_string()]);
        assert_eq!(fx.manager.state("a"), ExtensionState::Enabled);
    }

    #[tokio::test]
    async fn test_different_ids_load_concurrently() {
        let delay = Duration::from_millis(200);
        let mut fx = Fixture::new();
        fx.add("a", &[], Behavior::slow_initialize(delay));
        fx.add("b", &[], Behavior::slow_initialize(delay));
        fx.discover().await;

        let started = tokio::time::Instant::now();
        let (a, b) = tokio::join!(
            fx.manager.load_extension("a"),
            fx.manager.load_extension("b"),
        );
        a.unwrap();
        b.unwrap();

        assert!(started.elapsed() < delay * 2, "loads ran one after another");
        assert_eq!(
            fx.manager.loaded_ids().await,
            vec!["a".to_string(), "b".to_string()]
        );
    }
}
