//! Method dispatch table: translates RPC calls into `LoopScheduler` calls and
//! `SchedulerError`s into JSON-RPC error codes. The table is closed — methods
//! outside it fall through to `METHOD_NOT_FOUND`.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::scheduler::{LoopScheduler, SchedulerError, StartLoopParams};

use super::messages::*;

pub async fn dispatch(scheduler: &Arc<LoopScheduler>, method: &str, params: Value) -> Result<Value, RpcErrorObject> {
    match method {
        "start_loop" => handle_start_loop(scheduler, params).await,
        "stop_loop" => handle_stop_loop(scheduler, params).await,
        "list_loops" => Ok(handle_list_loops(scheduler).await),
        "get_health" => Ok(handle_get_health(scheduler).await),
        "get_agents" => Ok(handle_get_agents(scheduler).await),
        other => Err(RpcErrorObject::new(METHOD_NOT_FOUND, format!("Method not found: {other}"))),
    }
}

async fn handle_start_loop(scheduler: &Arc<LoopScheduler>, params: Value) -> Result<Value, RpcErrorObject> {
    let params: StartLoopParams = serde_json::from_value(params)
        .map_err(|e| RpcErrorObject::new(INVALID_PARAMS, format!("Invalid parameters: {e}")))?;

    match scheduler.start_loop(params).await {
        Ok(info) => Ok(json!({
            "loop_id": info.loop_id,
            "status": info.status,
            "task_name": info.task_name,
            "branch": info.branch,
            "agent": info.agent,
            "max_iterations": info.max_iterations,
            "worktree_path": info.worktree_path,
        })),
        Err(e) => Err(scheduler_error_to_rpc(e)),
    }
}

async fn handle_stop_loop(scheduler: &Arc<LoopScheduler>, params: Value) -> Result<Value, RpcErrorObject> {
    let loop_id = params
        .get("loop_id")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcErrorObject::new(INVALID_PARAMS, "Missing required parameter: loop_id"))?;

    match scheduler.stop_loop(loop_id).await {
        Ok(info) => Ok(json!({
            "loop_id": info.loop_id,
            "status": info.status,
            "task_name": info.task_name,
        })),
        Err(e) => Err(scheduler_error_to_rpc(e)),
    }
}

async fn handle_list_loops(scheduler: &Arc<LoopScheduler>) -> Value {
    let loops = scheduler.list_loops().await;
    json!({ "count": loops.len(), "loops": loops })
}

async fn handle_get_health(scheduler: &Arc<LoopScheduler>) -> Value {
    let health = scheduler.get_health().await;
    json!({
        "hostname": health.hostname,
        "started_at": health.started_at,
        "uptime_seconds": health.uptime_seconds,
        "active_loops": health.active_loops,
        "max_concurrent_loops": health.max_concurrent_loops,
        "workspace_dir": health.workspace_dir,
        "ziti_status": health.overlay_status,
        "control_service": Value::Null,
        "system": system_info(),
    })
}

async fn handle_get_agents(scheduler: &Arc<LoopScheduler>) -> Value {
    json!({ "agents": scheduler.get_agents().await })
}

fn scheduler_error_to_rpc(err: SchedulerError) -> RpcErrorObject {
    match err {
        SchedulerError::InvalidParams(missing) => {
            RpcErrorObject::new(INVALID_PARAMS, format!("Missing required parameter(s): {missing}"))
        }
        SchedulerError::MaxLoopsExceeded(max) => RpcErrorObject::with_data(
            MAX_LOOPS_EXCEEDED,
            format!("Maximum concurrent loops reached ({max})"),
            json!({ "max_concurrent_loops": max }),
        ),
        SchedulerError::AgentNotFound(agent, detail) => RpcErrorObject::with_data(
            AGENT_NOT_FOUND,
            format!("Agent '{agent}' is not available: {detail}"),
            json!({ "agent": agent }),
        ),
        SchedulerError::LoopNotFound(loop_id) => RpcErrorObject::with_data(
            LOOP_NOT_FOUND,
            format!("Loop not found: {loop_id}"),
            json!({ "loop_id": loop_id }),
        ),
        SchedulerError::Workspace(e) => workspace_error_to_rpc(e),
        SchedulerError::Agent(e) => RpcErrorObject::new(GIT_ERROR, format!("Agent server error: {e}")),
    }
}

fn workspace_error_to_rpc(e: crate::workspace::WorkspaceError) -> RpcErrorObject {
    use crate::workspace::WorkspaceError::*;
    match e {
        BranchNotFound(detail) => RpcErrorObject::new(BRANCH_NOT_FOUND, format!("Branch not found: {detail}")),
        OriginMismatch(detail) => RpcErrorObject::new(ORIGIN_MISMATCH, format!("Origin URL mismatch: {detail}")),
        DiskFull(detail) => RpcErrorObject::new(DISK_FULL, format!("Insufficient disk space: {detail}")),
        OriginUnreachable(detail) => {
            RpcErrorObject::new(GIT_ERROR, format!("Cannot reach origin repository: {detail}"))
        }
        InvalidOrigin(detail) | Other(detail) => RpcErrorObject::new(GIT_ERROR, format!("Workspace error: {detail}")),
        Io(e) => RpcErrorObject::new(GIT_ERROR, format!("Workspace I/O error: {e}")),
    }
}

/// Best-effort system resource info (Linux `/proc`), matching a pattern used
/// elsewhere for graceful degradation when platform data isn't available.
fn system_info() -> Value {
    let mut info = json!({ "platform": std::env::consts::OS });

    if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") {
        for line in meminfo.lines() {
            if let Some(kb) = line.strip_prefix("MemTotal:") {
                if let Some(n) = parse_kb(kb) {
                    info["memory_total_kb"] = json!(n);
                }
            } else if let Some(kb) = line.strip_prefix("MemAvailable:")
                && let Some(n) = parse_kb(kb)
            {
                info["memory_available_kb"] = json!(n);
            }
        }
    }

    if let Ok(loadavg) = std::fs::read_to_string("/proc/loadavg") {
        let fields: Vec<&str> = loadavg.split_whitespace().collect();
        if fields.len() >= 3
            && let (Ok(l1), Ok(l5), Ok(l15)) = (fields[0].parse::<f64>(), fields[1].parse::<f64>(), fields[2].parse::<f64>())
        {
            info["load_avg_1m"] = json!(l1);
            info["load_avg_5m"] = json!(l5);
            info["load_avg_15m"] = json!(l15);
        }
    }

    info
}

fn parse_kb(field: &str) -> Option<u64> {
    field.trim().trim_end_matches("kB").trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_kb_strips_unit() {
        assert_eq!(parse_kb(" 16384000 kB"), Some(16384000));
    }

    #[test]
    fn system_info_always_reports_platform() {
        let info = system_info();
        assert!(info.get("platform").is_some());
    }
}
