//! RPC surface and broadcast integration, driven through the router without
//! real sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use foreman::domain::errors::DomainResult;
use foreman::domain::models::{
    Escalation, EscalationKind, EscalationSeverity, EscalationStatus, EventPayload, Permission,
    Session, Subscription,
};
use foreman::domain::ports::{
    CommandExecutor, CommandOutput, ExecutionEngine, ExecutionOutcome, ExecutionRequest,
    LlmReviewer, ReviewVerdict, WorkOrderRepository,
};
use foreman::gateway::auth::AuthManager;
use foreman::gateway::broadcast::BroadcastManager;
use foreman::gateway::connection::{ConnectionHandle, ConnectionManager, GatewayConfig, Outbound};
use foreman::gateway::handlers::{register_default_handlers, GatewayContext};
use foreman::gateway::router::RpcRouter;
use foreman::gateway::wire::{ERR_CONFLICT, ERR_METHOD_NOT_FOUND, ERR_NOT_FOUND, ERR_UNAUTHORIZED};
use foreman::infrastructure::InMemoryWorkOrderRepository;
use foreman::services::lane_selector::LanesConfig;
use foreman::services::model_selector::ModelTier;
use foreman::services::{
    ApprovalService, EscalationHandler, EventBus, EventBusConfig, QualityGateRunner, RetryHandler,
    SchedulerConfig, SchedulerCore, StuckConfig, TierResolver, VerificationConfig,
};

struct InstantEngine;

#[async_trait]
impl ExecutionEngine for InstantEngine {
    async fn execute(&self, _request: ExecutionRequest) -> DomainResult<ExecutionOutcome> {
        Ok(ExecutionOutcome::success(10, 0, 0.0))
    }
}

struct StaticTiers;

impl TierResolver for StaticTiers {
    fn model_for_tier(&self, tier: ModelTier) -> String {
        tier.as_str().to_string()
    }
}

struct PassingExecutor;

#[async_trait]
impl CommandExecutor for PassingExecutor {
    async fn execute(&self, _command: &str, _timeout: Duration) -> DomainResult<CommandOutput> {
        Ok(CommandOutput {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
        })
    }
}

struct PassingReviewer;

#[async_trait]
impl LlmReviewer for PassingReviewer {
    async fn review(&self, _prompt: &str, _context: Option<&str>) -> DomainResult<ReviewVerdict> {
        Ok(ReviewVerdict {
            passed: true,
            reasoning: "ok".to_string(),
        })
    }
}

struct Rig {
    router: RpcRouter,
    context: Arc<GatewayContext>,
}

fn rig() -> Rig {
    let repository = Arc::new(InMemoryWorkOrderRepository::new());
    let event_bus = Arc::new(EventBus::new(EventBusConfig::default()));
    let escalations = Arc::new(EscalationHandler::new(
        repository.clone(),
        event_bus.clone(),
        StuckConfig::default(),
    ));
    let gates = Arc::new(QualityGateRunner::new(
        Arc::new(PassingExecutor),
        Arc::new(PassingReviewer),
        VerificationConfig::default(),
    ));
    let scheduler = SchedulerCore::new(
        SchedulerConfig::default(),
        LanesConfig::default(),
        repository.clone(),
        Arc::new(InstantEngine),
        event_bus.clone(),
        Arc::new(StaticTiers),
        RetryHandler::with_defaults(),
        escalations.clone(),
        gates,
    );
    let context = Arc::new(GatewayContext {
        repository: repository.clone(),
        event_bus: event_bus.clone(),
        scheduler,
        approvals: Arc::new(ApprovalService::new(repository, event_bus)),
        escalations,
        connections: ConnectionManager::new(GatewayConfig::default()),
        auth: Arc::new(AuthManager::new(Duration::from_secs(30))),
    });
    let mut router = RpcRouter::new();
    register_default_handlers(&mut router, &context);
    Rig { router, context }
}

fn admin_session() -> Session {
    Session::local("127.0.0.1:9999")
}

fn reader_session() -> Session {
    Session::new("reader", "pk", [Permission::Read].into_iter().collect())
}

// ----------------------------------------------------------------------------
// goal.*
// ----------------------------------------------------------------------------

#[tokio::test]
async fn goal_submit_creates_goal_and_default_work_item() {
    let rig = rig();
    let session = admin_session();
    let mut rx = rig.context.event_bus.subscribe();

    let result = rig
        .router
        .dispatch(
            "goal.submit",
            Some(json!({ "title": "t", "description": "d" })),
            &session,
        )
        .await
        .unwrap();

    let goal_id: Uuid = serde_json::from_value(result["id"].clone()).unwrap();
    assert_eq!(result["status"], "queued");

    let items = rig
        .router
        .dispatch("workitem.list", Some(json!({ "goal_id": goal_id })), &session)
        .await
        .unwrap();
    assert_eq!(items["work_items"].as_array().unwrap().len(), 1);
    assert_eq!(items["work_items"][0]["title"], "t");

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event.payload.event_type().to_string());
    }
    assert!(events.contains(&"goal.created".to_string()));
    assert!(events.contains(&"workitem.created".to_string()));
}

#[tokio::test]
async fn goal_submit_twice_creates_distinct_goals() {
    let rig = rig();
    let session = admin_session();
    let params = json!({ "title": "same", "description": "same" });

    let first = rig
        .router
        .dispatch("goal.submit", Some(params.clone()), &session)
        .await
        .unwrap();
    let second = rig
        .router
        .dispatch("goal.submit", Some(params), &session)
        .await
        .unwrap();
    assert_ne!(first["id"], second["id"]);

    let listed = rig
        .router
        .dispatch("goal.list", None, &session)
        .await
        .unwrap();
    assert_eq!(listed["total"], 2);
}

#[tokio::test]
async fn goal_get_unknown_is_not_found() {
    let rig = rig();
    let err = rig
        .router
        .dispatch(
            "goal.get",
            Some(json!({ "goal_id": Uuid::new_v4() })),
            &admin_session(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ERR_NOT_FOUND);
}

#[tokio::test]
async fn goal_cancel_twice_is_conflict() {
    let rig = rig();
    let session = admin_session();
    let goal = rig
        .router
        .dispatch("goal.submit", Some(json!({ "title": "t" })), &session)
        .await
        .unwrap();
    let params = json!({ "goal_id": goal["id"] });

    let ok = rig
        .router
        .dispatch("goal.cancel", Some(params.clone()), &session)
        .await
        .unwrap();
    assert_eq!(ok["success"], true);

    let err = rig
        .router
        .dispatch("goal.cancel", Some(params), &session)
        .await
        .unwrap_err();
    assert_eq!(err.code, ERR_CONFLICT);
}

// ----------------------------------------------------------------------------
// Permissions and routing errors
// ----------------------------------------------------------------------------

#[tokio::test]
async fn write_methods_reject_read_only_sessions() {
    let rig = rig();
    let err = rig
        .router
        .dispatch(
            "goal.submit",
            Some(json!({ "title": "t" })),
            &reader_session(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ERR_UNAUTHORIZED);

    let err = rig
        .router
        .dispatch("system.stats", None, &reader_session())
        .await
        .unwrap_err();
    assert_eq!(err.code, ERR_UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_method_is_reported() {
    let rig = rig();
    let err = rig
        .router
        .dispatch("goal.frobnicate", None, &admin_session())
        .await
        .unwrap_err();
    assert_eq!(err.code, ERR_METHOD_NOT_FOUND);
}

// ----------------------------------------------------------------------------
// escalation.respond
// ----------------------------------------------------------------------------

#[tokio::test]
async fn escalation_resolve_emits_event_and_unblocks() {
    let rig = rig();
    let session = admin_session();
    let goal = rig
        .router
        .dispatch("goal.submit", Some(json!({ "title": "t" })), &session)
        .await
        .unwrap();
    let goal_id: Uuid = serde_json::from_value(goal["id"].clone()).unwrap();

    let escalation = Escalation::new(
        Uuid::new_v4(),
        goal_id,
        EscalationKind::Stuck,
        EscalationSeverity::High,
        "stuck",
        "",
    );
    rig.context
        .escalations
        .create_escalation(escalation.clone())
        .await
        .unwrap();
    assert!(rig
        .context
        .escalations
        .has_blocking_escalations(goal_id)
        .await
        .unwrap());

    let mut rx = rig.context.event_bus.subscribe();
    rig.router
        .dispatch(
            "escalation.respond",
            Some(json!({ "escalation_id": escalation.id, "action": "resolve" })),
            &session,
        )
        .await
        .unwrap();

    let stored = rig
        .context
        .repository
        .get_escalation(escalation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, EscalationStatus::Resolved);
    assert!(!rig
        .context
        .escalations
        .has_blocking_escalations(goal_id)
        .await
        .unwrap());

    let event = rx.try_recv().unwrap();
    assert!(matches!(
        event.payload,
        EventPayload::EscalationResolved { .. }
    ));
}

#[tokio::test]
async fn escalation_respond_unknown_action_is_invalid() {
    let rig = rig();
    let err = rig
        .router
        .dispatch(
            "escalation.respond",
            Some(json!({ "escalation_id": Uuid::new_v4(), "action": "shrug" })),
            &admin_session(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, foreman::gateway::wire::ERR_INVALID_PARAMS);
}

// ----------------------------------------------------------------------------
// approval.*
// ----------------------------------------------------------------------------

#[tokio::test]
async fn approval_lifecycle_and_double_decision_conflict() {
    let rig = rig();
    let session = admin_session();

    let approval = rig
        .router
        .dispatch(
            "approval.create",
            Some(json!({ "title": "deploy", "description": "to prod" })),
            &session,
        )
        .await
        .unwrap();
    let id = approval["id"].clone();

    let pending = rig
        .router
        .dispatch("approval.pending", None, &session)
        .await
        .unwrap();
    assert_eq!(pending["approvals"].as_array().unwrap().len(), 1);

    let granted = rig
        .router
        .dispatch("approval.grant", Some(json!({ "approval_id": id })), &session)
        .await
        .unwrap();
    assert_eq!(granted["status"], "granted");

    let err = rig
        .router
        .dispatch("approval.deny", Some(json!({ "approval_id": id })), &session)
        .await
        .unwrap_err();
    assert_eq!(err.code, ERR_CONFLICT);
}

// ----------------------------------------------------------------------------
// subscribe + broadcast delivery
// ----------------------------------------------------------------------------

#[tokio::test]
async fn broadcast_delivers_matching_events_in_order() {
    let rig = rig();

    // Fake an authenticated connection.
    let addr: SocketAddr = "127.0.0.1:51000".parse().unwrap();
    let handle = ConnectionHandle::new(addr, 32);
    let connection_id = handle.id;
    rig.context
        .connections
        .add_pending_connection(handle.clone())
        .await;
    let session = Session::local(addr);
    let session_id = session.id.clone();
    rig.context
        .connections
        .promote_connection(connection_id, session.clone())
        .await
        .unwrap();

    BroadcastManager::new(rig.context.connections.clone(), rig.context.event_bus.clone()).spawn();

    // Subscribe to goal.* only.
    rig.router
        .dispatch(
            "subscribe",
            Some(json!({ "types": ["goal."] })),
            &Session {
                id: session_id,
                ..session
            },
        )
        .await
        .unwrap();
    let stored = handle.session().await.unwrap();
    assert_eq!(
        stored.subscription,
        Some(Subscription {
            goal_id: None,
            types: Some(vec!["goal.".to_string()]),
        })
    );

    let goal_a = Uuid::new_v4();
    let goal_b = Uuid::new_v4();
    rig.context.event_bus.publish(EventPayload::RunStarted {
        run_id: Uuid::new_v4(),
        work_item_id: Uuid::new_v4(),
        goal_id: goal_a,
        run_sequence: 1,
        lane: "main".into(),
        model: "m".into(),
    });
    rig.context
        .event_bus
        .publish(EventPayload::GoalCompleted { goal_id: goal_a });
    rig.context
        .event_bus
        .publish(EventPayload::GoalCancelled { goal_id: goal_b });

    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut delivered = Vec::new();
    while !handle.outbound.is_empty() {
        if let Some(Outbound::Frame(json)) = handle.outbound.pop().await {
            let value: serde_json::Value = serde_json::from_str(&json).unwrap();
            delivered.push(value["event"].as_str().unwrap().to_string());
        }
    }
    // Only goal.* events, in bus order.
    assert_eq!(delivered, vec!["goal.completed", "goal.cancelled"]);
}
