//! Request routing: binds an operation call to a session and runs it.

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::automation::Automation;
use crate::error::DocketError;
use crate::operations::{effect_flag, find_operation, ResponseShape};
use crate::session::SessionManager;

/// Normalized result of a routed operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RouteOutcome {
    /// Operation data, passed through from the automation layer.
    Data(Value),
    /// Action-only operations answer with a flag.
    Effect { success: bool },
}

impl RouteOutcome {
    pub fn into_json(self) -> Value {
        match self {
            RouteOutcome::Data(value) => value,
            RouteOutcome::Effect { success } => json!({ "success": success }),
        }
    }
}

/// Stateless dispatcher between the Operation API and the automation layer.
///
/// The only state it touches is session recency, through
/// [`SessionManager::resolve_session`].
pub struct RequestRouter {
    sessions: Arc<SessionManager>,
    automation: Arc<dyn Automation>,
}

impl RequestRouter {
    pub fn new(sessions: Arc<SessionManager>, automation: Arc<dyn Automation>) -> Self {
        Self { sessions, automation }
    }

    /// Run `operation` with `payload` on behalf of `session_id`.
    ///
    /// Unknown operations and invalid payloads fail before any session is
    /// looked up. Calls on the same session are serialized by the lease.
    pub async fn handle(
        &self,
        operation: &str,
        session_id: Option<&str>,
        payload: Value,
    ) -> Result<RouteOutcome, DocketError> {
        let spec = find_operation(operation)
            .ok_or_else(|| DocketError::NotFound(format!("Unknown operation: {}", operation)))?;
        spec.validate(&payload)?;

        let session_id = session_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(DocketError::SessionRequired)?;
        let lease = self.sessions.resolve_session(session_id).await?;

        log::debug!("Running {} on session {}", operation, lease.id());
        let params = if payload.is_null() { json!({}) } else { payload };
        let result = self
            .automation
            .execute(lease.handle(), operation, params)
            .await
            .map_err(|e| {
                log::warn!("Operation {} on session {} failed: {}", operation, lease.id(), e);
                DocketError::from(e)
            })?;
        drop(lease);

        Ok(match spec.shape {
            ResponseShape::Data => RouteOutcome::Data(result),
            ResponseShape::Effect => RouteOutcome::Effect {
                success: effect_flag(&result),
            },
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::{AutomationCall, AutomationError, Credentials, MemoryAutomation};
    use crate::session::SessionConfig;
    use std::time::Duration;

    struct Fixture {
        memory: Arc<MemoryAutomation>,
        sessions: Arc<SessionManager>,
        router: Arc<RequestRouter>,
    }

    fn fixture() -> Fixture {
        let memory = Arc::new(MemoryAutomation::new());
        let sessions = Arc::new(SessionManager::new(memory.clone(), SessionConfig::default()));
        let router = Arc::new(RequestRouter::new(sessions.clone(), memory.clone()));
        Fixture { memory, sessions, router }
    }

    async fn login(f: &Fixture) -> String {
        f.sessions
            .create_session(Credentials::new("lawyer", "pw"))
            .await
            .unwrap()
            .0
    }

    fn executes(memory: &MemoryAutomation) -> usize {
        memory
            .calls()
            .iter()
            .filter(|c| matches!(c, AutomationCall::Execute { .. }))
            .count()
    }

    mod errors {
        use super::*;

        #[tokio::test]
        async fn unknown_operation_is_not_found() {
            let f = fixture();
            let err = f.router.handle("drop_tables", None, json!({})).await.unwrap_err();
            assert!(matches!(err, DocketError::NotFound(_)));
        }

        #[tokio::test]
        async fn validation_runs_before_session_checks() {
            let f = fixture();
            let err = f
                .router
                .handle("sign_block", Some("bogus"), json!({}))
                .await
                .unwrap_err();
            assert_eq!(err, DocketError::missing_field("blockId"));
        }

        #[tokio::test]
        async fn missing_session_is_session_required() {
            let f = fixture();
            for id in [None, Some(""), Some("  ")] {
                let err = f.router.handle("list_deadlines", id, json!({})).await.unwrap_err();
                assert_eq!(err, DocketError::SessionRequired);
            }
            assert!(f.memory.calls().is_empty());
        }

        #[tokio::test]
        async fn every_operation_requires_a_session() {
            let f = fixture();
            for op in crate::operations::OPERATIONS {
                let payload: serde_json::Map<String, Value> =
                    op.required.iter().map(|k| (k.to_string(), json!("x"))).collect();
                let err = f
                    .router
                    .handle(op.name, None, Value::Object(payload))
                    .await
                    .unwrap_err();
                assert_eq!(err, DocketError::SessionRequired, "{}", op.name);
            }
            assert!(f.memory.calls().is_empty());
        }

        #[tokio::test]
        async fn unknown_session_is_session_not_found() {
            let f = fixture();
            let err = f
                .router
                .handle("list_deadlines", Some("missing"), json!({}))
                .await
                .unwrap_err();
            assert_eq!(err, DocketError::SessionNotFound("missing".into()));
            assert_eq!(executes(&f.memory), 0);
        }

        #[tokio::test]
        async fn automation_failure_keeps_message() {
            let f = fixture();
            let sid = login(&f).await;
            f.memory.push_response(
                "get_process",
                Err(AutomationError::Failed("portal returned 503".into())),
            );

            let err = f
                .router
                .handle("get_process", Some(&sid), json!({"processNumber": "1"}))
                .await
                .unwrap_err();
            match err {
                DocketError::AutomationFailure { message } => assert!(message.contains("portal returned 503")),
                other => panic!("Expected AutomationFailure, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn missing_resource_is_not_found() {
            let f = fixture();
            let sid = login(&f).await;
            f.memory
                .push_response("get_process", Err(AutomationError::NotFound("process 9".into())));
            let err = f
                .router
                .handle("get_process", Some(&sid), json!({"processNumber": "9"}))
                .await
                .unwrap_err();
            assert_eq!(err.status_code(), 404);
        }
    }

    mod outcomes {
        use super::*;

        #[tokio::test]
        async fn data_operations_pass_results_through() {
            let f = fixture();
            let sid = login(&f).await;
            f.memory.set_result("list_deadlines", json!([{"id": "d1"}]));

            let outcome = f.router.handle("list_deadlines", Some(&sid), Value::Null).await.unwrap();
            assert_eq!(outcome, RouteOutcome::Data(json!([{"id": "d1"}])));
        }

        #[tokio::test]
        async fn effect_operations_collapse_to_flag() {
            let f = fixture();
            let sid = login(&f).await;
            f.memory.set_result("sign_block", json!({"success": false, "reason": "expired cert"}));

            let outcome = f
                .router
                .handle("sign_block", Some(&sid), json!({"blockId": "b1"}))
                .await
                .unwrap();
            assert_eq!(outcome.into_json(), json!({"success": false}));
        }

        #[tokio::test]
        async fn payload_is_forwarded_as_params() {
            let f = fixture();
            let sid = login(&f).await;
            let payload = json!({"blockId": "b1", "documentId": "d7"});
            f.router.handle("add_to_block", Some(&sid), payload.clone()).await.unwrap();

            let forwarded = f.memory.calls().into_iter().find_map(|c| match c {
                AutomationCall::Execute { operation, params, .. } if operation == "add_to_block" => Some(params),
                _ => None,
            });
            assert_eq!(forwarded, Some(payload));
        }
    }

    mod concurrency {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn same_session_calls_never_overlap() {
            let f = fixture();
            let sid = login(&f).await;
            f.memory.set_delay(Duration::from_millis(200));

            let mut tasks = Vec::new();
            for _ in 0..3 {
                let router = Arc::clone(&f.router);
                let sid = sid.clone();
                tasks.push(tokio::spawn(async move {
                    router.handle("list_deadlines", Some(&sid), json!({})).await
                }));
            }
            for task in tasks {
                task.await.unwrap().unwrap();
            }
            assert_eq!(f.memory.max_in_flight(), 1);
            assert_eq!(f.memory.execute_count("list_deadlines"), 3);
        }

        #[tokio::test(start_paused = true)]
        async fn different_sessions_run_in_parallel() {
            let f = fixture();
            let a = login(&f).await;
            let b = login(&f).await;
            f.memory.set_delay(Duration::from_secs(1));

            let started = tokio::time::Instant::now();
            let (ra, rb) = tokio::join!(
                f.router.handle("list_deadlines", Some(&a), json!({})),
                f.router.handle("list_deadlines", Some(&b), json!({})),
            );
            ra.unwrap();
            rb.unwrap();
            assert!(started.elapsed() < Duration::from_millis(1500));
        }
    }
}
