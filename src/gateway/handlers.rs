//! Default RPC surface.
//!
//! Every handler decodes its params into a typed record, calls into the
//! services, and returns a JSON result. Domain errors map onto wire errors
//! via `From<DomainError>`; nothing here formats stack traces or internal
//! state for the client.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::models::{
    EscalationStatus, EstimatedEffort, EventPayload, Goal, GoalBudgets, GoalStatus, Permission,
    SuccessCriterion, VerificationPlan, WorkItem, WorkItemType,
};
use crate::domain::ports::{GoalFilter, WorkOrderRepository};
use crate::gateway::connection::ConnectionManager;
use crate::gateway::router::{decode_params, RpcRouter};
use crate::gateway::wire::RpcError;
use crate::services::approval_service::ApprovalService;
use crate::services::escalation_handler::EscalationHandler;
use crate::services::event_bus::EventBus;
use crate::services::scheduler::SchedulerCore;

/// Shared dependencies for RPC handlers.
pub struct GatewayContext {
    pub repository: Arc<dyn WorkOrderRepository>,
    pub event_bus: Arc<EventBus>,
    pub scheduler: Arc<SchedulerCore>,
    pub approvals: Arc<ApprovalService>,
    pub escalations: Arc<EscalationHandler>,
    pub connections: Arc<ConnectionManager>,
    pub auth: Arc<crate::gateway::auth::AuthManager>,
}

#[derive(Debug, Deserialize)]
struct WorkItemSpec {
    title: String,
    #[serde(default)]
    description: String,
    item_type: Option<WorkItemType>,
    #[serde(default)]
    priority: i32,
    estimated_effort: Option<EstimatedEffort>,
    max_retries: Option<u32>,
    assigned_agent: Option<String>,
    verification_plan: Option<VerificationPlan>,
    /// Indices into this submission's `work_items` array.
    #[serde(default)]
    depends_on: Vec<usize>,
    #[serde(default)]
    context: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct GoalSubmitParams {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    success_criteria: Vec<SuccessCriterion>,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    budgets: GoalBudgets,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    context: HashMap<String, Value>,
    /// Optional explicit decomposition; one mirror item when absent.
    #[serde(default)]
    work_items: Vec<WorkItemSpec>,
}

#[derive(Debug, Deserialize)]
struct GoalListParams {
    status: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct GoalIdParams {
    goal_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct WorkItemIdParams {
    work_item_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct EscalationListParams {
    goal_id: Option<Uuid>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EscalationRespondParams {
    escalation_id: Uuid,
    action: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ApprovalListParams {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApprovalIdParams {
    approval_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct ApprovalCreateParams {
    title: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct SubscribeParams {
    goal_id: Option<Uuid>,
    types: Option<Vec<String>>,
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|_| RpcError::internal())
}

/// Register the full default RPC surface on a router.
#[allow(clippy::too_many_lines)]
pub fn register_default_handlers(router: &mut RpcRouter, ctx: &Arc<GatewayContext>) {
    // ---------------------------------------------------------------------
    // system.*
    // ---------------------------------------------------------------------
    router.register("system.ping", Vec::<Permission>::new(), |_, _| async move {
        Ok(json!({ "pong": chrono::Utc::now().timestamp_millis() }))
    });

    let context = ctx.clone();
    router.register("system.stats", [Permission::Admin], move |_, _| {
        let ctx = context.clone();
        async move {
            let stats = ctx.scheduler.stats().await;
            let lanes = ctx.scheduler.lane_snapshots().await;
            let (pending, authenticated) = ctx.connections.counts().await;
            Ok(json!({
                "scheduler": to_value(&stats)?,
                "lanes": to_value(&lanes)?,
                "connections": { "pending": pending, "authenticated": authenticated },
                "event_sequence": ctx.event_bus.current_sequence(),
            }))
        }
    });

    // ---------------------------------------------------------------------
    // goal.*
    // ---------------------------------------------------------------------
    let context = ctx.clone();
    router.register("goal.submit", [Permission::Write], move |params, _| {
        let ctx = context.clone();
        async move {
            let params: GoalSubmitParams = decode_params(params)?;
            if params.title.trim().is_empty() {
                return Err(RpcError::invalid_params("title must not be empty"));
            }

            let mut goal = Goal::new(params.title, params.description)
                .with_priority(params.priority)
                .with_budgets(params.budgets);
            goal.success_criteria = params.success_criteria;
            goal.tags = params.tags;
            goal.context = params.context;
            goal.validate().map_err(RpcError::invalid_params)?;

            ctx.repository.create_goal(&goal).await.map_err(RpcError::from)?;
            ctx.event_bus
                .publish(EventPayload::GoalCreated { goal: goal.clone() });

            let items = build_work_items(&goal, params.work_items)?;
            for item in &items {
                ctx.repository
                    .create_work_item(item)
                    .await
                    .map_err(RpcError::from)?;
                ctx.event_bus.publish(EventPayload::WorkItemCreated {
                    work_item: item.clone(),
                });
            }

            ctx.scheduler.ensure_started();
            to_value(&goal)
        }
    });

    let context = ctx.clone();
    router.register("goal.list", [Permission::Read], move |params, _| {
        let ctx = context.clone();
        async move {
            let params: GoalListParams = decode_params(params)?;
            let status = match params.status.as_deref() {
                None => None,
                Some(s) => Some(
                    GoalStatus::from_str(s)
                        .ok_or_else(|| RpcError::invalid_params(format!("unknown status '{s}'")))?,
                ),
            };
            let page = ctx
                .repository
                .list_goals(GoalFilter {
                    status,
                    limit: params.limit,
                    offset: params.offset,
                })
                .await
                .map_err(RpcError::from)?;
            Ok(json!({ "goals": to_value(&page.goals)?, "total": page.total }))
        }
    });

    let context = ctx.clone();
    router.register("goal.get", [Permission::Read], move |params, _| {
        let ctx = context.clone();
        async move {
            let params: GoalIdParams = decode_params(params)?;
            let goal = ctx
                .repository
                .get_goal(params.goal_id)
                .await
                .map_err(RpcError::from)?
                .ok_or_else(|| RpcError::not_found(format!("goal {}", params.goal_id)))?;
            to_value(&goal)
        }
    });

    let context = ctx.clone();
    router.register("goal.cancel", [Permission::Write], move |params, _| {
        let ctx = context.clone();
        async move {
            let params: GoalIdParams = decode_params(params)?;
            ctx.scheduler
                .cancel_goal(params.goal_id)
                .await
                .map_err(RpcError::from)?;
            Ok(json!({ "success": true }))
        }
    });

    // ---------------------------------------------------------------------
    // workitem.*
    // ---------------------------------------------------------------------
    let context = ctx.clone();
    router.register("workitem.list", [Permission::Read], move |params, _| {
        let ctx = context.clone();
        async move {
            let params: GoalIdParams = decode_params(params)?;
            let items = ctx
                .repository
                .get_work_items_by_goal(params.goal_id)
                .await
                .map_err(RpcError::from)?;
            Ok(json!({ "work_items": to_value(&items)? }))
        }
    });

    let context = ctx.clone();
    router.register("workitem.cancel", [Permission::Write], move |params, _| {
        let ctx = context.clone();
        async move {
            let params: WorkItemIdParams = decode_params(params)?;
            ctx.scheduler
                .cancel_work_item(params.work_item_id)
                .await
                .map_err(RpcError::from)?;
            Ok(json!({ "success": true }))
        }
    });

    // ---------------------------------------------------------------------
    // escalation.*
    // ---------------------------------------------------------------------
    let context = ctx.clone();
    router.register("escalation.list", [Permission::Read], move |params, _| {
        let ctx = context.clone();
        async move {
            let params: EscalationListParams = decode_params(params)?;
            let status = match params.status.as_deref() {
                None => None,
                Some("open") => Some(EscalationStatus::Open),
                Some("acknowledged") => Some(EscalationStatus::Acknowledged),
                Some("resolved") => Some(EscalationStatus::Resolved),
                Some("dismissed") => Some(EscalationStatus::Dismissed),
                Some(other) => {
                    return Err(RpcError::invalid_params(format!("unknown status '{other}'")))
                }
            };
            let escalations = ctx
                .repository
                .list_escalations(params.goal_id, status)
                .await
                .map_err(RpcError::from)?;
            Ok(json!({ "escalations": to_value(&escalations)? }))
        }
    });

    let context = ctx.clone();
    router.register("escalation.respond", [Permission::Write], move |params, _| {
        let ctx = context.clone();
        async move {
            let params: EscalationRespondParams = decode_params(params)?;
            let _ = params.data;
            let escalation = match params.action.as_str() {
                "acknowledge" => {
                    let escalation = ctx
                        .repository
                        .update_escalation_status(params.escalation_id, EscalationStatus::Acknowledged)
                        .await
                        .map_err(RpcError::from)?;
                    // Keep the sweep from re-raising the same item meanwhile.
                    ctx.escalations
                        .acknowledge_stuck(escalation.work_item_id, None)
                        .await;
                    escalation
                }
                "resolve" => {
                    let escalation = ctx
                        .repository
                        .resolve_escalation(params.escalation_id)
                        .await
                        .map_err(RpcError::from)?;
                    ctx.event_bus.publish(EventPayload::EscalationResolved {
                        escalation_id: escalation.id,
                        goal_id: escalation.goal_id,
                    });
                    escalation
                }
                "dismiss" => {
                    let escalation = ctx
                        .repository
                        .update_escalation_status(params.escalation_id, EscalationStatus::Dismissed)
                        .await
                        .map_err(RpcError::from)?;
                    ctx.event_bus.publish(EventPayload::EscalationResolved {
                        escalation_id: escalation.id,
                        goal_id: escalation.goal_id,
                    });
                    escalation
                }
                other => {
                    return Err(RpcError::invalid_params(format!("unknown action '{other}'")))
                }
            };
            let _ = escalation;
            Ok(json!({ "success": true }))
        }
    });

    // ---------------------------------------------------------------------
    // approval.*
    // ---------------------------------------------------------------------
    let context = ctx.clone();
    router.register("approval.list", [Permission::Read], move |params, _| {
        let ctx = context.clone();
        async move {
            let params: ApprovalListParams = decode_params(params)?;
            let status = match params.status.as_deref() {
                None => None,
                Some("pending") => Some(crate::domain::models::ApprovalStatus::Pending),
                Some("granted") => Some(crate::domain::models::ApprovalStatus::Granted),
                Some("denied") => Some(crate::domain::models::ApprovalStatus::Denied),
                Some(other) => {
                    return Err(RpcError::invalid_params(format!("unknown status '{other}'")))
                }
            };
            let approvals = ctx.approvals.list(status).await.map_err(RpcError::from)?;
            Ok(json!({ "approvals": to_value(&approvals)? }))
        }
    });

    let context = ctx.clone();
    router.register("approval.get", [Permission::Read], move |params, _| {
        let ctx = context.clone();
        async move {
            let params: ApprovalIdParams = decode_params(params)?;
            let approval = ctx
                .approvals
                .get(params.approval_id)
                .await
                .map_err(RpcError::from)?;
            to_value(&approval)
        }
    });

    let context = ctx.clone();
    router.register("approval.pending", [Permission::Read], move |_, _| {
        let ctx = context.clone();
        async move {
            let approvals = ctx.approvals.pending().await.map_err(RpcError::from)?;
            Ok(json!({ "approvals": to_value(&approvals)? }))
        }
    });

    let context = ctx.clone();
    router.register("approval.create", [Permission::Admin], move |params, session| {
        let ctx = context.clone();
        async move {
            let params: ApprovalCreateParams = decode_params(params)?;
            let approval = ctx
                .approvals
                .create(params.title, params.description, session.id)
                .await
                .map_err(RpcError::from)?;
            to_value(&approval)
        }
    });

    let context = ctx.clone();
    router.register("approval.grant", [Permission::Admin], move |params, session| {
        let ctx = context.clone();
        async move {
            let params: ApprovalIdParams = decode_params(params)?;
            let approval = ctx
                .approvals
                .grant(params.approval_id, session.id)
                .await
                .map_err(RpcError::from)?;
            to_value(&approval)
        }
    });

    let context = ctx.clone();
    router.register("approval.deny", [Permission::Admin], move |params, session| {
        let ctx = context.clone();
        async move {
            let params: ApprovalIdParams = decode_params(params)?;
            let approval = ctx
                .approvals
                .deny(params.approval_id, session.id)
                .await
                .map_err(RpcError::from)?;
            to_value(&approval)
        }
    });

    // ---------------------------------------------------------------------
    // auth.token.* (admin maintenance)
    // ---------------------------------------------------------------------
    let context = ctx.clone();
    router.register("auth.token.create", [Permission::Admin], move |params, _| {
        let ctx = context.clone();
        async move {
            #[derive(Deserialize)]
            struct TokenCreateParams {
                #[serde(default)]
                permissions: Vec<String>,
                expires_in_ms: Option<u64>,
            }
            let params: TokenCreateParams = decode_params(params)?;
            let permissions = if params.permissions.is_empty() {
                [Permission::Read, Permission::Write].into_iter().collect()
            } else {
                params
                    .permissions
                    .iter()
                    .map(|p| {
                        Permission::from_str(p)
                            .ok_or_else(|| RpcError::invalid_params(format!("unknown permission '{p}'")))
                    })
                    .collect::<Result<_, _>>()?
            };
            let issued = ctx
                .auth
                .create_token(
                    permissions,
                    params.expires_in_ms.map(std::time::Duration::from_millis),
                )
                .await;
            // The cleartext token appears exactly once, here.
            Ok(json!({ "id": issued.id, "token": issued.token }))
        }
    });

    let context = ctx.clone();
    router.register("auth.token.revoke", [Permission::Admin], move |params, _| {
        let ctx = context.clone();
        async move {
            #[derive(Deserialize)]
            struct TokenRevokeParams {
                token_id: Uuid,
            }
            let params: TokenRevokeParams = decode_params(params)?;
            ctx.auth
                .revoke_token(params.token_id)
                .await
                .map_err(RpcError::from)?;
            Ok(json!({ "success": true }))
        }
    });

    // ---------------------------------------------------------------------
    // subscribe / unsubscribe
    // ---------------------------------------------------------------------
    let context = ctx.clone();
    router.register("subscribe", [Permission::Read], move |params, session| {
        let ctx = context.clone();
        async move {
            let params: SubscribeParams = decode_params(params)?;
            let Some(handle) = ctx.connections.find_by_session(&session.id).await else {
                return Err(RpcError::internal());
            };
            handle
                .set_subscription(Some(crate::domain::models::Subscription {
                    goal_id: params.goal_id,
                    types: params.types,
                }))
                .await;
            Ok(json!({ "success": true }))
        }
    });

    let context = ctx.clone();
    router.register("unsubscribe", [Permission::Read], move |_, session| {
        let ctx = context.clone();
        async move {
            let Some(handle) = ctx.connections.find_by_session(&session.id).await else {
                return Err(RpcError::internal());
            };
            handle.set_subscription(None).await;
            Ok(json!({ "success": true }))
        }
    });
}

/// Materialize the submitted decomposition, defaulting to one mirror item.
fn build_work_items(goal: &Goal, specs: Vec<WorkItemSpec>) -> Result<Vec<WorkItem>, RpcError> {
    if specs.is_empty() {
        let item = WorkItem::new(goal.id, goal.title.clone(), goal.description.clone(), WorkItemType::Code)
            .with_priority(goal.priority);
        return Ok(vec![item]);
    }

    let mut items: Vec<WorkItem> = Vec::with_capacity(specs.len());
    for (index, spec) in specs.into_iter().enumerate() {
        if spec.title.trim().is_empty() {
            return Err(RpcError::invalid_params(format!(
                "work_items[{index}].title must not be empty"
            )));
        }
        let mut item = WorkItem::new(
            goal.id,
            spec.title,
            spec.description,
            spec.item_type.unwrap_or(WorkItemType::Code),
        )
        .with_priority(spec.priority);
        if let Some(effort) = spec.estimated_effort {
            item.estimated_effort = effort;
        }
        if let Some(max_retries) = spec.max_retries {
            item.max_retries = max_retries;
        }
        item.assigned_agent = spec.assigned_agent;
        item.verification_plan = spec.verification_plan;
        item.context = spec.context;

        for dep_index in spec.depends_on {
            let Some(dep) = items.get(dep_index) else {
                return Err(RpcError::invalid_params(format!(
                    "work_items[{index}] depends on undefined index {dep_index}"
                )));
            };
            item.dependencies.push(dep.id);
        }
        // Maintain inverse edges for clients that render the DAG.
        let item_id = item.id;
        let deps = item.dependencies.clone();
        items.push(item);
        for dep_id in deps {
            if let Some(parent) = items.iter_mut().find(|i| i.id == dep_id) {
                parent.blocks.push(item_id);
            }
        }
    }
    Ok(items)
}
