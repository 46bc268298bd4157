//! Tool Dispatcher — turns a parsed function call (or a same-turn batch
//! of them) into executed [`ToolResult`]s, routing locally or through the
//! sandbox tool-server and classifying work into waves so
//! independent invocations run concurrently.
//!
//! Concurrency is bounded with a [`Semaphore`] and fanned out with a
//! [`JoinSet`], capping how many tool tasks run at once the same way the
//! agent layer caps concurrent subagent loops.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::agent::function_call::FunctionCall;
use crate::agent::state::AgentState;
use crate::config::SandboxMode;
use crate::sandbox::{SandboxError, SandboxToolClient};
use crate::tools::registry::ToolRegistry;
use crate::tools::traits::{ToolContext, ToolResult, ToolSpec};

const MAX_RESULT_CHARS: usize = 10_000;
const TRUNCATE_HEAD: usize = 4_000;
const TRUNCATE_TAIL: usize = 4_000;

/// Outcome of dispatching one invocation.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub agent_id: String,
    pub tool_name: String,
    pub result: ToolResult,
}

/// Result of classifying and running one turn's worth of invocations.
pub struct DispatchReport {
    /// One outcome per invocation, in the original invocation order
    /// regardless of which wave (or in what order) each actually ran.
    pub outcomes: Vec<DispatchOutcome>,
    /// Set when the finish wave ran a terminal tool (`finish_scan` /
    /// `agent_finish`) and that tool accepted the call. A denied finish
    /// (e.g. the root gate while findings are pending) leaves this false
    /// and the agent keeps iterating.
    pub should_finish: bool,
    /// Set when a `wait_for_message` call succeeded; the loop parks the
    /// agent in the waiting state after appending the observation.
    pub should_wait: bool,
    /// Reason supplied to `wait_for_message`, if any.
    pub wait_reason: Option<String>,
}

/// The three execution waves, as index lists into the original invocation
/// slice: parallelizable non-terminal calls, everything else non-terminal,
/// and the terminal calls, which always run last no matter where in the
/// list the model emitted them.
pub struct WavePlan {
    pub parallel: Vec<usize>,
    pub sequential: Vec<usize>,
    pub finish: Vec<usize>,
}

pub fn classify_waves(registry: &ToolRegistry, calls: &[FunctionCall]) -> WavePlan {
    let mut plan = WavePlan { parallel: Vec::new(), sequential: Vec::new(), finish: Vec::new() };
    for (idx, call) in calls.iter().enumerate() {
        let tool = registry.get(&call.name);
        let (parallelizable, terminal) = match &tool {
            Some(t) => (t.parallelizable(), t.is_terminal()),
            None => (false, false),
        };
        if terminal {
            plan.finish.push(idx);
        } else if parallelizable {
            plan.parallel.push(idx);
        } else {
            plan.sequential.push(idx);
        }
    }
    plan
}

pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    sandbox_client: Arc<SandboxToolClient>,
    sandbox_mode: SandboxMode,
    concurrency: Arc<Semaphore>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, sandbox_client: Arc<SandboxToolClient>, sandbox_mode: SandboxMode, parallel_wave_cap: usize) -> Self {
        Self { registry, sandbox_client, sandbox_mode, concurrency: Arc::new(Semaphore::new(parallel_wave_cap.max(1))) }
    }

    /// Runs one turn's invocations for a single agent: the parallel wave
    /// concurrently (bounded by the cap), the sequential wave in list order,
    /// and the finish wave last. A failing invocation becomes that slot's
    /// error result; it never halts its wave.
    pub async fn dispatch_turn(&self, state: &AgentState, calls: Vec<FunctionCall>) -> DispatchReport {
        let plan = classify_waves(&self.registry, &calls);
        let mut outcomes: Vec<Option<DispatchOutcome>> = calls.iter().map(|_| None).collect();
        let mut should_finish = false;
        let mut should_wait = false;
        let mut wait_reason = None;

        if !plan.parallel.is_empty() {
            let mut joinset: JoinSet<(usize, DispatchOutcome)> = JoinSet::new();
            for idx in plan.parallel {
                let call = calls[idx].clone();
                // Each parallel task gets its own snapshot of the caller's
                // state; the wave must not alias the live record.
                let state = state.clone();
                let registry = Arc::clone(&self.registry);
                let sandbox_client = Arc::clone(&self.sandbox_client);
                let sandbox_mode = self.sandbox_mode;
                let permit = Arc::clone(&self.concurrency);
                joinset.spawn(async move {
                    let _permit = permit.acquire_owned().await.ok();
                    let outcome = execute_one(&registry, &sandbox_client, sandbox_mode, &state, call).await;
                    (idx, outcome)
                });
            }
            while let Some(joined) = joinset.join_next().await {
                match joined {
                    Ok((idx, outcome)) => outcomes[idx] = Some(outcome),
                    // A panicked task still yields an error result for its
                    // slot; siblings keep running.
                    Err(join_err) => {
                        tracing::warn!(agent_id = %state.agent_id, error = %join_err, "parallel tool task aborted");
                    }
                }
            }
        }

        for idx in plan.sequential.into_iter().chain(plan.finish) {
            let call = calls[idx].clone();
            let tool = self.registry.get(&call.name);
            let outcome = execute_one(&self.registry, &self.sandbox_client, self.sandbox_mode, state, call).await;
            if let Some(tool) = &tool {
                if tool.is_terminal() && outcome.result.success {
                    should_finish = true;
                }
                if tool.is_wait() && outcome.result.success {
                    should_wait = true;
                    wait_reason = wait_reason_of(&outcome);
                }
            }
            outcomes[idx] = Some(outcome);
        }

        // Slots whose task was lost to a panic get a synthesized error so the
        // report still lines up one outcome per invocation.
        let outcomes = outcomes
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.unwrap_or_else(|| DispatchOutcome {
                    agent_id: state.agent_id.clone(),
                    tool_name: calls[idx].name.clone(),
                    result: ToolResult::err("tool task aborted before producing a result"),
                })
            })
            .collect();

        DispatchReport { outcomes, should_finish, should_wait, wait_reason }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

fn wait_reason_of(outcome: &DispatchOutcome) -> Option<String> {
    outcome.result.metadata.as_ref().and_then(|m| m.get("reason")).and_then(|v| v.as_str()).map(str::to_string)
}

async fn execute_one(
    registry: &ToolRegistry,
    sandbox_client: &SandboxToolClient,
    sandbox_mode: SandboxMode,
    state: &AgentState,
    call: FunctionCall,
) -> DispatchOutcome {
    let tool_name = call.name.clone();
    let Some(tool) = registry.get(&call.name) else {
        return DispatchOutcome {
            agent_id: state.agent_id.clone(),
            tool_name,
            result: ToolResult::err(format!("unknown tool: {}", call.name)),
        };
    };

    tracing::debug!(agent_id = %state.agent_id, tool = %tool_name, "dispatching tool invocation");

    let result = match (tool.spec(), sandbox_mode) {
        (ToolSpec::SandboxProxied, SandboxMode::Proxied) => match &state.sandbox_handle {
            Some(handle) => match sandbox_client.execute(handle, &call.name, call.args.clone()).await {
                Ok(value) => sandbox_value_to_result(value),
                Err(err) => ToolResult::err(sandbox_error_message(&err)),
            },
            None => ToolResult::err(format!("{} requires an active sandbox and none is attached", call.name)),
        },
        // Sandbox mode off: the flagged tool runs its in-process
        // implementation, the same path it takes when already executing
        // inside the sandbox.
        (ToolSpec::SandboxProxied, SandboxMode::Off) | (ToolSpec::WithState | ToolSpec::NoArg, _) => {
            let ctx = ToolContext { agent_state: Some(state) };
            match tool.execute(call.args.clone(), &ctx).await {
                Ok(result) => result,
                Err(message) => ToolResult::err(truncate_error(message)),
            }
        }
    };

    DispatchOutcome { agent_id: state.agent_id.clone(), tool_name, result: truncate_result(result) }
}

/// Renders a sandbox `/execute` response into a [`ToolResult`], lifting any
/// `screenshot` attachment out of the payload into the image list and
/// leaving a placeholder in the textual result.
fn sandbox_value_to_result(value: Value) -> ToolResult {
    let (value, images) = lift_screenshots(value);
    let output = match value {
        Value::String(s) => s,
        other => other.to_string(),
    };
    ToolResult::ok(output).with_images(images)
}

fn lift_screenshots(mut value: Value) -> (Value, Vec<String>) {
    let mut images = Vec::new();
    if let Value::Object(map) = &mut value {
        if let Some(Value::String(data)) = map.get("screenshot") {
            images.push(data.clone());
            map.insert("screenshot".to_string(), Value::String("[screenshot attached as image]".to_string()));
        }
    }
    (value, images)
}

fn sandbox_error_message(err: &SandboxError) -> String {
    match err {
        SandboxError::AuthFailed => "sandbox authentication failed".to_string(),
        SandboxError::Unreachable(msg) => format!("sandbox unreachable: {msg}"),
        SandboxError::ExecutionError(msg) => format!("sandbox execution error: {msg}"),
        SandboxError::InvalidEndpoint(msg) => format!("invalid sandbox endpoint: {msg}"),
    }
}

/// Tool runtime errors are capped at 500 chars before they reach the
/// observation.
fn truncate_error(message: String) -> String {
    if message.chars().count() <= 500 {
        return message;
    }
    message.chars().take(500).collect()
}

/// Caps a tool's output at [`MAX_RESULT_CHARS`], keeping a head/tail snippet
/// with an omission marker in between — the same shape the history
/// compressor uses, so a long tool result doesn't dominate the context on
/// its own before compression ever runs.
fn truncate_result(mut result: ToolResult) -> ToolResult {
    if result.output.chars().count() <= MAX_RESULT_CHARS {
        return result;
    }
    let chars: Vec<char> = result.output.chars().collect();
    let head: String = chars[..TRUNCATE_HEAD].iter().collect();
    let tail: String = chars[chars.len() - TRUNCATE_TAIL..].iter().collect();
    let omitted = chars.len() - TRUNCATE_HEAD - TRUNCATE_TAIL;
    result.output = format!("{head}\n... [truncated, {omitted} chars omitted] ...\n{tail}");
    result
}

/// Renders a tool outcome as the `<tool_result>` block fed back to the model.
pub fn render_tool_result_block(outcome: &DispatchOutcome) -> String {
    format!(
        "<tool_result name=\"{}\" success=\"{}\">\n{}\n</tool_result>",
        outcome.tool_name, outcome.result.success, outcome.result.output
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::tools::traits::Tool;

    struct ParallelTool {
        name: &'static str,
        delay: Duration,
        fail: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Tool for ParallelTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "x"
        }
        fn parameters_schema(&self) -> Value {
            json!({})
        }
        fn parallelizable(&self) -> bool {
            true
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext<'_>) -> Result<ToolResult, String> {
            self.log.lock().unwrap().push(format!("start:{}", self.name));
            tokio::time::sleep(self.delay).await;
            self.log.lock().unwrap().push(format!("end:{}", self.name));
            if self.fail {
                Err(format!("{} blew up", self.name))
            } else {
                Ok(ToolResult::ok(format!("{} ok", self.name)))
            }
        }
    }

    struct SequentialTool {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Tool for SequentialTool {
        fn name(&self) -> &str {
            "sequential_tool"
        }
        fn description(&self) -> &str {
            "x"
        }
        fn parameters_schema(&self) -> Value {
            json!({})
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext<'_>) -> Result<ToolResult, String> {
            self.log.lock().unwrap().push("run:sequential_tool".to_string());
            Ok(ToolResult::ok("seq ok"))
        }
    }

    struct TerminalTool {
        accept: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Tool for TerminalTool {
        fn name(&self) -> &str {
            "finish_scan"
        }
        fn description(&self) -> &str {
            "x"
        }
        fn parameters_schema(&self) -> Value {
            json!({})
        }
        fn is_terminal(&self) -> bool {
            true
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext<'_>) -> Result<ToolResult, String> {
            self.log.lock().unwrap().push("run:finish_scan".to_string());
            if self.accept {
                Ok(ToolResult::ok("done"))
            } else {
                Ok(ToolResult::err("finish blocked: 1 finding pending verification"))
            }
        }
    }

    fn call(name: &str) -> FunctionCall {
        FunctionCall { name: name.to_string(), args: json!({}) }
    }

    fn dispatcher_with(tools: Vec<Arc<dyn Tool>>) -> ToolDispatcher {
        let mut reg = ToolRegistry::new();
        for tool in tools {
            reg.register(tool);
        }
        ToolDispatcher::new(
            Arc::new(reg),
            Arc::new(SandboxToolClient::new(Duration::from_secs(1), Duration::from_secs(1))),
            SandboxMode::Off,
            4,
        )
    }

    #[test]
    fn classify_puts_terminal_in_finish_wave_regardless_of_position() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(ParallelTool { name: "p", delay: Duration::ZERO, fail: false, log: Arc::clone(&log) }));
        reg.register(Arc::new(SequentialTool { log: Arc::clone(&log) }));
        reg.register(Arc::new(TerminalTool { accept: true, log }));

        let calls = vec![call("p"), call("finish_scan"), call("sequential_tool"), call("p")];
        let plan = classify_waves(&reg, &calls);
        assert_eq!(plan.parallel, vec![0, 3]);
        assert_eq!(plan.sequential, vec![2]);
        assert_eq!(plan.finish, vec![1]);
    }

    #[test]
    fn unknown_tool_classifies_sequential() {
        let reg = ToolRegistry::new();
        let plan = classify_waves(&reg, &[call("nope")]);
        assert_eq!(plan.sequential, vec![0]);
    }

    #[test]
    fn truncates_long_output() {
        let long = "a".repeat(MAX_RESULT_CHARS + 500);
        let result = truncate_result(ToolResult::ok(long));
        assert!(result.output.contains("truncated"));
        assert!(result.output.chars().count() < MAX_RESULT_CHARS + 200);
    }

    #[test]
    fn lifts_screenshot_field_into_images() {
        let value = json!({"status": "ok", "screenshot": "aGVsbG8="});
        let (value, images) = lift_screenshots(value);
        assert_eq!(images, vec!["aGVsbG8=".to_string()]);
        assert_eq!(value["screenshot"], "[screenshot attached as image]");
    }

    #[tokio::test]
    async fn finish_runs_last_even_when_issued_mid_list() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = dispatcher_with(vec![
            Arc::new(SequentialTool { log: Arc::clone(&log) }),
            Arc::new(TerminalTool { accept: true, log: Arc::clone(&log) }),
        ]);
        let state = AgentState::new("a1", "root", None, 10);
        let report = dispatcher.dispatch_turn(&state, vec![call("finish_scan"), call("sequential_tool")]).await;

        assert!(report.should_finish);
        // Results come back in invocation order even though execution order
        // put the finish wave last.
        assert_eq!(report.outcomes[0].tool_name, "finish_scan");
        assert_eq!(report.outcomes[1].tool_name, "sequential_tool");
        let log = log.lock().unwrap();
        assert_eq!(*log, vec!["run:sequential_tool".to_string(), "run:finish_scan".to_string()]);
    }

    #[tokio::test]
    async fn denied_finish_does_not_signal_should_finish() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = dispatcher_with(vec![Arc::new(TerminalTool { accept: false, log })]);
        let state = AgentState::new("a1", "root", None, 10);
        let report = dispatcher.dispatch_turn(&state, vec![call("finish_scan")]).await;
        assert!(!report.should_finish);
        assert!(!report.outcomes[0].result.success);
    }

    #[tokio::test]
    async fn parallel_results_keep_invocation_order_and_errors_do_not_cancel_siblings() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = dispatcher_with(vec![
            Arc::new(ParallelTool { name: "slow_fail", delay: Duration::from_millis(60), fail: true, log: Arc::clone(&log) }),
            Arc::new(ParallelTool { name: "fast_ok", delay: Duration::from_millis(10), fail: false, log: Arc::clone(&log) }),
        ]);
        let state = AgentState::new("a1", "root", None, 10);
        let report = dispatcher.dispatch_turn(&state, vec![call("slow_fail"), call("fast_ok")]).await;

        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.outcomes[0].tool_name, "slow_fail");
        assert!(!report.outcomes[0].result.success);
        assert_eq!(report.outcomes[1].tool_name, "fast_ok");
        assert!(report.outcomes[1].result.success);

        // Both tasks started before either finished: the wave is concurrent.
        let log = log.lock().unwrap();
        let starts: Vec<usize> = log.iter().enumerate().filter(|(_, l)| l.starts_with("start:")).map(|(i, _)| i).collect();
        assert_eq!(starts, vec![0, 1]);
    }
}
