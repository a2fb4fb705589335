//! Master Orchestrator: drives the seven-phase request lifecycle
//! (spec.md §4.8) for a single `stream(query, session_id)` call, merging
//! planning-phase status, per-node events, and a terminal synthesized
//! response onto one outgoing stream.

use crate::a2a::{A2aClient, A2aError, Event};
use crate::agent_card::SharedAgentCardRegistry;
use crate::formatter::{Envelope, ResponseFormatter};
use crate::graph::{NodeState, WorkflowGraph, WorkflowNode};
use crate::planner::{Plan, PlanRequest, Planner, PlanningMode};
use crate::pool::ConnectionPool;
use crate::quality::SharedQualityFramework;
use crate::runner::{Dispatcher, NodeEvent, ParallelRunner, RunnerConfig, RunOutcome};
use crate::session::{Phase, SessionContext, SessionManager};
use crate::{OrchestratorError, Result};
use async_stream::stream;
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Bounded: the Orchestrator requests at most one re-plan when the
/// Planner's self-quality-score is low (spec.md §4.7, §4.8).
const MIN_ACCEPTABLE_PLAN_SCORE: f64 = 0.5;
/// Bounded: at most one full re-plan (discarding the current graph and
/// building a fresh one from the Planner) when a node's result fails
/// quality validation during EXECUTION (spec.md §4.8 EXECUTION item 5,
/// §8 scenario 4, §9: retry is at the planner level, not an in-place
/// node retry).
const MAX_QUALITY_REPLAN_ATTEMPTS: u32 = 1;

/// Dispatches a node by acquiring a pooled [`A2aClient`] for its agent's
/// endpoint and opening a streaming call.
pub struct PoolDispatcher {
    pool: Arc<ConnectionPool>,
    agent_cards: SharedAgentCardRegistry,
}

#[async_trait::async_trait]
impl Dispatcher for PoolDispatcher {
    async fn dispatch(
        &self,
        _node_id: &str,
        agent_id: &str,
        input: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Result<Event, A2aError>>> {
        let card = self
            .agent_cards
            .get(agent_id)
            .ok_or_else(|| OrchestratorError::NotFound(agent_id.to_string()))?;
        let session = self.pool.acquire(&card.endpoint()).await;
        let message = crate::a2a::protocol::Message::user_text(input.to_string());
        let mut inner = session
            .client
            .stream(message, cancel)
            .await
            .map_err(OrchestratorError::A2a)?;

        // Hold a concurrency permit (spec.md §4.1 "max concurrent
        // connections per host") for the lifetime of the stream, not just
        // the initial request, by forwarding onto a second channel from a
        // task that owns the permit until the source closes.
        let (tx, rx) = mpsc::channel(32);
        let permit_session = session.clone();
        tokio::spawn(async move {
            let _permit = permit_session.acquire_permit().await;
            while let Some(event) = inner.recv().await {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

/// A session suspended on `InputRequired`, kept alive so a follow-up
/// `resume` call can continue the same graph rather than re-planning from
/// scratch (spec.md §4.6 step 5, §4.8: the graph is not rebuilt across a
/// pause/resume, only across a `QualityFailure` re-plan per §9). `request`
/// is retained so a `QualityFailure` discovered after resuming can still
/// drive a full re-plan.
struct PendingExecution {
    graph: Arc<Mutex<WorkflowGraph>>,
    runner: Arc<ParallelRunner<PoolDispatcher>>,
    domain: String,
    request: PlanRequest,
}

pub struct MasterOrchestrator {
    agent_cards: SharedAgentCardRegistry,
    quality: SharedQualityFramework,
    pool: Arc<ConnectionPool>,
    sessions: Arc<SessionManager>,
    planner: Arc<Planner>,
    runner_config: RunnerConfig,
    formatter: ResponseFormatter,
    pending: Mutex<HashMap<String, PendingExecution>>,
}

impl MasterOrchestrator {
    pub fn new(
        agent_cards: SharedAgentCardRegistry,
        quality: SharedQualityFramework,
        pool: Arc<ConnectionPool>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        let planner = Arc::new(Planner::new(agent_cards.clone()));
        Self {
            agent_cards,
            quality,
            pool,
            sessions,
            planner,
            runner_config: RunnerConfig::default(),
            formatter: ResponseFormatter,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Drives the full seven-phase lifecycle for one query, yielding
    /// [`Envelope`]s as they become available. The stream's last item
    /// always has `final: true`.
    pub fn stream(
        self: Arc<Self>,
        query: String,
        domain: String,
        external_plan: Option<serde_json::Value>,
    ) -> impl Stream<Item = Envelope> {
        stream! {
            let session = self.sessions.create().await;
            let session_id = session.read().await.id.clone();
            let cancel = session.read().await.cancel.clone();
            info!(session_id = %session_id, "starting orchestrator lifecycle");

            // 1. PRE_ANALYSIS
            session.write().await.phase = Phase::PreAnalysis;
            let mode = classify_complexity(&query);
            session.write().await.record(format!("pre-analysis: mode={:?}", mode));
            yield self.formatter.format(
                &Event::StatusUpdate {
                    task_id: session_id.clone(),
                    state: "planning".to_string(),
                    message: Some("analyzing request".to_string()),
                    is_final: false,
                },
                None,
                Some("PRE_ANALYSIS"),
                Some(&session_id),
            );

            // 2. PLANNING
            session.write().await.phase = Phase::Planning;
            let available_specialists: Vec<String> =
                self.agent_cards.all().map(|c| c.agent_id.clone()).collect();
            let request = PlanRequest {
                query: query.clone(),
                domain: domain.clone(),
                available_specialists,
                mode,
            };

            // An upstream LLM-backed planning agent (out of scope per
            // spec.md §1) may supply its own plan JSON; validate it against
            // the plan schema before trusting it, falling back to the
            // in-process heuristic planner on any rejection.
            let mut plan = match external_plan.as_ref().map(|raw| self.planner.parse_external(raw)) {
                Some(Ok(plan)) => {
                    info!(session_id = %session_id, "accepted plan from external planning agent");
                    plan
                }
                Some(Err(reason)) => {
                    warn!(session_id = %session_id, %reason, "external plan rejected; falling back to heuristic planner");
                    self.planner.plan_heuristically(&request)
                }
                None => self.planner.plan_heuristically(&request),
            };
            if let Err(reason) = self.planner.validate(&plan) {
                warn!(session_id = %session_id, %reason, "plan failed validation; falling back");
                plan = self.planner.fallback_plan(&request);
            } else if plan.quality_score < MIN_ACCEPTABLE_PLAN_SCORE {
                info!(session_id = %session_id, score = plan.quality_score, "low plan quality, re-planning once");
                let replanned = self.planner.plan_heuristically(&request);
                if self.planner.validate(&replanned).is_ok() && replanned.quality_score >= plan.quality_score {
                    plan = replanned;
                }
            }
            session.write().await.plan = Some(plan.clone());

            // spec.md §8 boundary case: a plan with zero tasks skips
            // QUALITY_PREDICTION and EXECUTION entirely and resolves to a
            // single final envelope with an empty result.
            if plan.tasks.is_empty() {
                info!(session_id = %session_id, "empty plan, returning immediately");
                session.write().await.record("empty plan: no tasks to execute");
                yield self.formatter.format(
                    &Event::StreamingResponse {
                        task_id: session_id.clone(),
                        parts: vec![],
                        is_final: true,
                    },
                    None,
                    Some("SYNTHESIS"),
                    Some(&session_id),
                );
                self.sessions.remove(&session_id).await;
                return;
            }

            // 3. QUALITY_PREDICTION
            session.write().await.phase = Phase::QualityPrediction;
            let plan_outcome = self.quality.validate(
                &domain,
                None,
                &serde_json::json!({ "metrics": { "confidence": plan.quality_score } }),
            );
            if !plan_outcome.passed {
                warn!(session_id = %session_id, ?plan_outcome.failing, "plan rejected by quality prediction");
                yield self.formatter.format(
                    &Event::Error {
                        task_id: session_id.clone(),
                        kind: "QualityFailure".to_string(),
                        detail: format!("plan failed quality prediction: {:?}", plan_outcome.failing),
                        recoverable: false,
                    },
                    None,
                    Some("QUALITY_PREDICTION"),
                    Some(&session_id),
                );
                self.sessions.remove(&session_id).await;
                return;
            }

            // 4. EXECUTION — materialize the Workflow Graph from the plan.
            session.write().await.phase = Phase::Execution;
            let (mut graph, mut runner) = self.materialize_graph(&plan);

            let mut replans_remaining = MAX_QUALITY_REPLAN_ATTEMPTS;
            let mut awaiting_nodes = Vec::new();
            loop {
                let awaiting = Arc::new(Mutex::new(Vec::new()));
                let mut drained = Box::pin(self.drain_runner(
                    runner.clone(),
                    session.clone(),
                    session_id.clone(),
                    domain.clone(),
                    cancel.clone(),
                    awaiting.clone(),
                ));
                while let Some(envelope) = drained.next().await {
                    yield envelope;
                }
                drop(drained);

                if cancel.is_cancelled() {
                    self.sessions.remove(&session_id).await;
                    return;
                }

                awaiting_nodes = awaiting.lock().await.clone();
                if !awaiting_nodes.is_empty() {
                    break;
                }

                let failing = self.detect_quality_failed_nodes(&graph, &domain).await;
                if failing.is_empty() {
                    break;
                }
                if replans_remaining == 0 {
                    warn!(session_id = %session_id, ?failing, "exhausted quality re-plan budget; proceeding with failed results");
                    break;
                }
                replans_remaining -= 1;
                session.write().await.metrics.retries_issued += 1;
                warn!(session_id = %session_id, ?failing, "node result(s) failed quality validation; re-planning");
                yield self.replanning_envelope(&failing, &session_id);

                let replanned = self.planner.plan_heuristically(&request);
                session.write().await.plan = Some(replanned.clone());
                session.write().await.record("quality failure: discarded graph and re-planned");
                let (new_graph, new_runner) = self.materialize_graph(&replanned);
                graph = new_graph;
                runner = new_runner;
            }

            if !awaiting_nodes.is_empty() {
                // spec.md §4.6 step 5 / §4.8 EXECUTION: suspend this session
                // rather than proceeding to DYNAMIC_ADJUSTMENT; a follow-up
                // `resume` call re-enters at this same graph.
                info!(session_id = %session_id, ?awaiting_nodes, "session paused awaiting input");
                session.write().await.record(format!("paused awaiting input: {awaiting_nodes:?}"));
                self.pending.lock().await.insert(
                    session_id.clone(),
                    PendingExecution {
                        graph: graph.clone(),
                        runner: runner.clone(),
                        domain: domain.clone(),
                        request: request.clone(),
                    },
                );
                return;
            }

            let mut tail = Box::pin(self.finish_session(session.clone(), session_id.clone(), domain.clone(), graph.clone()));
            while let Some(envelope) = tail.next().await {
                yield envelope;
            }
        }
    }

    /// Cancels an in-flight session (spec.md §5 "Cancellation"): the
    /// session's token is shared by its Orchestrator task, Runner, and
    /// every in-flight Client call, so cancelling it here is sufficient to
    /// unwind the whole tree. The caller-facing `stream`/`resume` future
    /// observes this on its next scheduling tick and yields a single
    /// `Cancelled` envelope before returning.
    pub async fn cancel(&self, session_id: &str) -> Result<()> {
        let session = self.sessions.get(session_id).await?;
        session.read().await.cancel.cancel();
        Ok(())
    }

    /// Resumes a session that paused on `InputRequired` (spec.md §4.6 step
    /// 5, end-to-end scenario 3): re-dispatches `node_id` with `input`
    /// appended to its message, then continues draining the same graph
    /// from wherever it left off, through to synthesis.
    pub fn resume(
        self: Arc<Self>,
        session_id: String,
        node_id: String,
        input: serde_json::Value,
    ) -> impl Stream<Item = Envelope> {
        stream! {
            let Some(pending) = self.pending.lock().await.remove(&session_id) else {
                yield self.formatter.format(
                    &Event::Error {
                        task_id: session_id.clone(),
                        kind: "NotFound".to_string(),
                        detail: format!("no session paused awaiting input: {session_id}"),
                        recoverable: false,
                    },
                    Some(&node_id),
                    None,
                    Some(&session_id),
                );
                return;
            };
            let Ok(session) = self.sessions.get(&session_id).await else {
                yield self.formatter.format(
                    &Event::Error {
                        task_id: session_id.clone(),
                        kind: "NotFound".to_string(),
                        detail: format!("session expired: {session_id}"),
                        recoverable: false,
                    },
                    Some(&node_id),
                    None,
                    Some(&session_id),
                );
                return;
            };
            let cancel = session.read().await.cancel.clone();

            let (resume_tx, mut resume_rx) = mpsc::channel(32);
            let resume_runner = pending.runner.clone();
            let resume_node = node_id.clone();
            let resume_cancel = cancel.clone();
            let resume_handle = tokio::spawn(async move {
                resume_runner.resume(&resume_node, input, resume_tx, resume_cancel).await
            });
            while let Some(node_event) = resume_rx.recv().await {
                self.handle_node_event(&session, &session_id, &pending.domain, &node_event).await;
                yield self.envelope_for(&node_event, &session_id);
            }
            let _ = resume_handle.await;

            let mut graph = pending.graph;
            let mut runner = pending.runner;
            let domain = pending.domain;
            let request = pending.request;
            let mut replans_remaining = MAX_QUALITY_REPLAN_ATTEMPTS;
            let mut awaiting_nodes = Vec::new();
            loop {
                let awaiting = Arc::new(Mutex::new(Vec::new()));
                let mut drained = Box::pin(self.drain_runner(
                    runner.clone(),
                    session.clone(),
                    session_id.clone(),
                    domain.clone(),
                    cancel.clone(),
                    awaiting.clone(),
                ));
                while let Some(envelope) = drained.next().await {
                    yield envelope;
                }
                drop(drained);

                if cancel.is_cancelled() {
                    self.sessions.remove(&session_id).await;
                    return;
                }

                awaiting_nodes = awaiting.lock().await.clone();
                if !awaiting_nodes.is_empty() {
                    break;
                }

                let failing = self.detect_quality_failed_nodes(&graph, &domain).await;
                if failing.is_empty() {
                    break;
                }
                if replans_remaining == 0 {
                    warn!(session_id = %session_id, ?failing, "exhausted quality re-plan budget; proceeding with failed results");
                    break;
                }
                replans_remaining -= 1;
                session.write().await.metrics.retries_issued += 1;
                warn!(session_id = %session_id, ?failing, "node result(s) failed quality validation; re-planning");
                yield self.replanning_envelope(&failing, &session_id);

                let replanned = self.planner.plan_heuristically(&request);
                session.write().await.plan = Some(replanned.clone());
                session.write().await.record("quality failure: discarded graph and re-planned");
                let (new_graph, new_runner) = self.materialize_graph(&replanned);
                graph = new_graph;
                runner = new_runner;
            }

            if !awaiting_nodes.is_empty() {
                info!(session_id = %session_id, ?awaiting_nodes, "session paused again awaiting input");
                self.pending.lock().await.insert(
                    session_id.clone(),
                    PendingExecution { graph, runner, domain: domain.clone(), request: request.clone() },
                );
                return;
            }

            let mut tail = Box::pin(self.finish_session(
                session.clone(),
                session_id.clone(),
                domain,
                graph,
            ));
            while let Some(envelope) = tail.next().await {
                yield envelope;
            }
        }
    }

    /// Formats one [`NodeEvent`], turning a transport-level `Err` into an
    /// `Error` envelope the same way the main execution loop does.
    fn envelope_for(&self, node_event: &NodeEvent, session_id: &str) -> Envelope {
        match &node_event.event {
            Ok(event) => self.formatter.format(
                event,
                Some(&node_event.node_id),
                Some("EXECUTION"),
                Some(session_id),
            ),
            Err(e) => self.formatter.format(
                &Event::Error {
                    task_id: node_event.node_id.clone(),
                    kind: "Transport".to_string(),
                    detail: e.to_string(),
                    recoverable: false,
                },
                Some(&node_event.node_id),
                Some("EXECUTION"),
                Some(session_id),
            ),
        }
    }

    /// Drives a [`ParallelRunner`] through every level it can currently
    /// run, yielding one envelope per node event. If the runner suspends on
    /// `InputRequired`, the suspended node ids are written to `awaiting`
    /// for the caller to inspect once the stream is exhausted — shared by
    /// both the initial dispatch in [`Self::stream`] and the continuation
    /// in [`Self::resume`].
    fn drain_runner(
        &self,
        runner: Arc<ParallelRunner<PoolDispatcher>>,
        session: Arc<tokio::sync::RwLock<SessionContext>>,
        session_id: String,
        domain: String,
        cancel: CancellationToken,
        awaiting: Arc<Mutex<Vec<String>>>,
    ) -> impl Stream<Item = Envelope> + '_ {
        stream! {
            let (node_tx, mut node_rx) = mpsc::channel(128);
            let run_cancel = cancel.clone();
            let run_handle = tokio::spawn(async move { runner.run(node_tx, run_cancel).await });

            let mut dispatched = std::collections::HashSet::new();
            while let Some(node_event) = node_rx.recv().await {
                if dispatched.insert(node_event.node_id.clone()) {
                    session.write().await.metrics.nodes_dispatched += 1;
                }
                self.handle_node_event(&session, &session_id, &domain, &node_event).await;
                yield self.envelope_for(&node_event, &session_id);
            }

            match run_handle.await {
                Ok(Ok(RunOutcome::AwaitingInput { node_ids })) => {
                    for node_id in &node_ids {
                        yield self.formatter.format(
                            &Event::InputRequired {
                                task_id: node_id.clone(),
                                prompt: "additional input required".to_string(),
                            },
                            Some(node_id),
                            Some("EXECUTION"),
                            Some(&session_id),
                        );
                    }
                    *awaiting.lock().await = node_ids;
                }
                Ok(Err(OrchestratorError::Cancelled)) => {
                    // spec.md §5/§7/§8 scenario 6: the stream ends here
                    // with exactly one Cancelled envelope; no further
                    // events, no synthesis, no retry.
                    info!(session_id = %session_id, "session cancelled mid-execution");
                    yield self.formatter.format(
                        &Event::Error {
                            task_id: session_id.clone(),
                            kind: "Cancelled".to_string(),
                            detail: "session cancelled".to_string(),
                            recoverable: false,
                        },
                        None,
                        Some("EXECUTION"),
                        Some(&session_id),
                    );
                }
                Ok(Ok(RunOutcome::Drained)) | Ok(Err(_)) | Err(_) => {}
            }
        }
    }

    /// Phases 5-7 (spec.md §4.8 DYNAMIC_ADJUSTMENT, SYNTHESIS, LEARNING),
    /// run once the graph has no more nodes awaiting input. Shared by the
    /// initial [`Self::stream`] call and [`Self::resume`].
    fn finish_session(
        &self,
        session: Arc<tokio::sync::RwLock<SessionContext>>,
        session_id: String,
        domain: String,
        graph: Arc<Mutex<WorkflowGraph>>,
    ) -> impl Stream<Item = Envelope> + '_ {
        stream! {
            // 5. DYNAMIC_ADJUSTMENT — quality-failed nodes get one retry
            // with an alternate specialist before being marked terminal.
            session.write().await.phase = Phase::DynamicAdjustment;
            self.adjust_failed_nodes(&graph, &domain).await;

            // 6. SYNTHESIS
            session.write().await.phase = Phase::Synthesis;
            let synthesized = self.synthesize(&graph).await;
            let synthesis_outcome = self.quality.validate(&domain, None, &synthesized);
            let final_envelope_event = if synthesis_outcome.passed {
                Event::StreamingResponse {
                    task_id: session_id.clone(),
                    parts: vec![crate::a2a::MessagePart::data(synthesized.clone())],
                    is_final: true,
                }
            } else {
                Event::Error {
                    task_id: session_id.clone(),
                    kind: "QualityFailure".to_string(),
                    detail: format!("synthesis failed quality validation: {:?}", synthesis_outcome.failing),
                    recoverable: false,
                }
            };
            yield self.formatter.format(&final_envelope_event, None, Some("SYNTHESIS"), Some(&session_id));

            // 7. LEARNING
            session.write().await.phase = Phase::Learning;
            session.write().await.record("session complete");
            self.sessions.remove(&session_id).await;
        }
    }

    async fn handle_node_event(
        &self,
        session: &Arc<tokio::sync::RwLock<SessionContext>>,
        session_id: &str,
        domain: &str,
        node_event: &NodeEvent,
    ) {
        if node_event.event.is_err() || matches!(node_event.event, Ok(Event::Error { .. })) {
            session.write().await.metrics.nodes_failed += 1;
        }
        if let Ok(Event::StreamingResponse { parts, is_final: true, .. }) = &node_event.event {
            let result = serde_json::json!({
                "text": parts.iter().map(|p| p.as_text()).collect::<Vec<_>>().join(" ")
            });
            let outcome = self.quality.validate(domain, Some(&node_event.node_id), &result);
            if !outcome.passed {
                warn!(
                    session_id,
                    node_id = %node_event.node_id,
                    failing = ?outcome.failing,
                    "node result failed quality validation"
                );
            }
        }
    }

    /// Builds a fresh [`WorkflowGraph`] and [`ParallelRunner`] from a plan
    /// (spec.md §4.8 EXECUTION item 1). Used both for the initial
    /// materialization and to discard-and-rebuild on a quality-driven
    /// re-plan (spec.md §9).
    fn materialize_graph(&self, plan: &Plan) -> (Arc<Mutex<WorkflowGraph>>, Arc<ParallelRunner<PoolDispatcher>>) {
        let mut graph = WorkflowGraph::new();
        for task in &plan.tasks {
            graph.add_node(WorkflowNode::new(
                task.id.clone(),
                task.id.clone(),
                task.agent_id.clone(),
                serde_json::json!({ "description": task.description }),
            ));
        }
        for task in &plan.tasks {
            for dep in &task.dependencies {
                if let Err(e) = graph.add_edge(dep, &task.id) {
                    warn!(error = %e, "dropping cyclic edge from plan");
                }
            }
        }
        let graph = Arc::new(Mutex::new(graph));
        let dispatcher = Arc::new(PoolDispatcher {
            pool: self.pool.clone(),
            agent_cards: self.agent_cards.clone(),
        });
        let runner = Arc::new(ParallelRunner::new(graph.clone(), dispatcher, RunnerConfig {
            min_parallel_nodes: self.runner_config.min_parallel_nodes,
        }));
        (graph, runner)
    }

    /// Scans COMPLETED nodes for a `QualityFailure`, between full execution
    /// passes (spec.md §4.8 EXECUTION item 5). Read-only: every terminal
    /// node stays terminal here, since the only sanctioned response to a
    /// failing result is a full re-plan (spec.md §9, §8's unconditional
    /// "no node transitions from a terminal state" invariant), not an
    /// in-place requeue. Returns the ids of nodes whose result failed
    /// validation, so the caller can decide whether to spend its
    /// re-plan budget.
    async fn detect_quality_failed_nodes(
        &self,
        graph: &Arc<Mutex<WorkflowGraph>>,
        domain: &str,
    ) -> Vec<String> {
        let graph_guard = graph.lock().await;
        let completed_ids: Vec<String> = graph_guard
            .get_execution_plan()
            .into_iter()
            .flatten()
            .filter(|id| graph_guard.get(id).map(|n| n.state == NodeState::Completed).unwrap_or(false))
            .collect();

        let mut failing = Vec::new();
        for id in completed_ids {
            let Some(result) = graph_guard.get(&id).and_then(|n| n.result.clone()) else {
                continue;
            };
            let text = result
                .get("parts")
                .and_then(|p| p.as_array())
                .map(|parts| parts.iter().filter_map(|p| p.as_str()).collect::<Vec<_>>().join(" "))
                .unwrap_or_default();
            let outcome = self.quality.validate(domain, Some(&id), &serde_json::json!({ "text": text }));
            if !outcome.passed {
                failing.push(id);
            }
        }
        failing
    }

    /// The envelope yielded when a `QualityFailure` triggers a full
    /// re-plan, naming the node(s) whose result prompted it.
    fn replanning_envelope(&self, failing_node_ids: &[String], session_id: &str) -> Envelope {
        self.formatter.format(
            &Event::StatusUpdate {
                task_id: session_id.to_string(),
                state: "replanning".to_string(),
                message: Some(format!(
                    "result(s) failed quality validation: {failing_node_ids:?}; discarding graph and re-planning"
                )),
                is_final: false,
            },
            None,
            Some("EXECUTION"),
            Some(session_id),
        )
    }

    /// Reassigns terminally FAILED nodes to an alternate specialist once,
    /// dispatching them directly rather than re-running a whole level
    /// (spec.md §4.8 DYNAMIC_ADJUSTMENT item (b)).
    async fn adjust_failed_nodes(&self, graph: &Arc<Mutex<WorkflowGraph>>, _domain: &str) {
        let mut graph_guard = graph.lock().await;
        let ids: Vec<String> = graph_guard
            .get_execution_plan()
            .into_iter()
            .flatten()
            .filter(|id| graph_guard.get(id).map(|n| n.state == NodeState::Failed).unwrap_or(false))
            .collect();

        for id in ids {
            let current_agent = graph_guard.get(&id).map(|n| n.agent_id.clone()).unwrap_or_default();
            if let Some(alternate) = self
                .agent_cards
                .all()
                .find(|c| c.agent_id != current_agent && c.quality_domain == _domain)
            {
                info!(node_id = %id, from = %current_agent, to = %alternate.agent_id, "reassigning failed node");
                if let Some(node) = graph_guard.get_mut(&id) {
                    node.agent_id = alternate.agent_id.clone();
                }
            }
        }
    }

    /// Concatenates ordered node outputs into a synthesized response
    /// payload (spec.md §4.8 SYNTHESIS).
    async fn synthesize(&self, graph: &Arc<Mutex<WorkflowGraph>>) -> serde_json::Value {
        let graph = graph.lock().await;
        let order: Vec<String> = graph.get_execution_plan().into_iter().flatten().collect();
        let mut texts = Vec::new();
        for id in &order {
            if let Some(node) = graph.get(id) {
                if let Some(result) = &node.result {
                    if let Some(parts) = result.get("parts").and_then(|p| p.as_array()) {
                        for part in parts {
                            if let Some(text) = part.as_str() {
                                texts.push(text.to_string());
                            }
                        }
                    }
                }
            }
        }
        serde_json::json!({
            "text": texts.join("\n"),
            "metrics": { "confidence": if texts.is_empty() { 0.0 } else { 1.0 } },
        })
    }
}

/// Heuristic request-complexity classifier (spec.md §4.8 PRE_ANALYSIS):
/// queries with multiple clauses or long length are routed to
/// `sophisticated` planning.
fn classify_complexity(query: &str) -> PlanningMode {
    let clause_count = query.split(|c| c == '.' || c == ';' || c == ',').count();
    if clause_count > 1 || query.split_whitespace().count() > 40 {
        PlanningMode::Sophisticated
    } else {
        PlanningMode::Simple
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_single_clause_query_is_simple() {
        assert_eq!(classify_complexity("summarize this"), PlanningMode::Simple);
    }

    #[test]
    fn multi_clause_query_is_sophisticated() {
        assert_eq!(
            classify_complexity("translate the document, then summarize it, then email it"),
            PlanningMode::Sophisticated
        );
    }
}
