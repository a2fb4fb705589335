//! Planner: turns `{query, domain, available_specialists, mode}` into a
//! [`Plan`] of [`TaskDescriptor`]s (spec.md §4.7).
//!
//! The planner's task selection is typically delegated to an agent that
//! emits structured JSON; this module owns only the schema, validation, and
//! fallback-on-malformed-output behavior, in the same spirit as the
//! reference service's `Router` (`router/supervisor.rs`): priority rule
//! evaluation there, best-capability-match task assignment here.

use crate::agent_card::AgentCardRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;
use uuid::Uuid;

/// JSON Schema for a plan emitted by an upstream LLM-backed planning agent
/// (spec.md §4.7: "the core's Planner component owns only the schema,
/// validation, and fallback-on-malformed-output behavior"). Structurally
/// narrower than [`Plan`] itself — it only constrains the shape the
/// Planner requires to proceed; [`Plan`]'s own `Deserialize` fills in the
/// rest once the schema has passed.
const PLAN_SCHEMA: &str = r#"{
    "type": "object",
    "required": ["tasks", "coordination"],
    "properties": {
        "tasks": {
            "type": "array",
            "items": {
                "type": "object",
                "required": ["id", "description", "agent_id", "dependencies"],
                "properties": {
                    "id": { "type": "string", "minLength": 1 },
                    "description": { "type": "string" },
                    "agent_id": { "type": "string" },
                    "dependencies": {
                        "type": "array",
                        "items": { "type": "string" }
                    }
                }
            }
        },
        "coordination": {
            "type": "string",
            "enum": ["sequential", "parallel", "hybrid"]
        },
        "quality_score": { "type": "number" }
    }
}"#;

fn plan_schema() -> &'static jsonschema::JSONSchema {
    static COMPILED: OnceLock<jsonschema::JSONSchema> = OnceLock::new();
    COMPILED.get_or_init(|| {
        let schema: Value = serde_json::from_str(PLAN_SCHEMA).expect("PLAN_SCHEMA is valid JSON");
        jsonschema::JSONSchema::compile(&schema).expect("PLAN_SCHEMA is a valid JSON Schema")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanningMode {
    Simple,
    Sophisticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coordination {
    Sequential,
    Parallel,
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub id: String,
    pub description: String,
    pub agent_id: String,
    /// Empty for a parallelizable task (sophisticated mode) or simple-mode
    /// sequential chaining via the previous task's id.
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Risk {
    pub description: String,
    pub severity: String,
    pub mitigation: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Estimates {
    #[serde(default)]
    pub time_s: f64,
    #[serde(default)]
    pub cost_units: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub tasks: Vec<TaskDescriptor>,
    pub coordination: Coordination,
    #[serde(default)]
    pub critical_path: Vec<String>,
    #[serde(default)]
    pub estimates: Estimates,
    #[serde(default)]
    pub risks: Vec<Risk>,
    #[serde(default)]
    pub quality_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRequest {
    pub query: String,
    pub domain: String,
    pub available_specialists: Vec<String>,
    pub mode: PlanningMode,
}

/// Schema, validation, and fallback owner for plans. The actual task
/// breakdown in non-test deployments comes from an LLM-backed planning
/// agent's structured output; [`Planner::plan_heuristically`] is the
/// capability-matching fallback used when that agent is unavailable or
/// its output fails validation.
pub struct Planner {
    registry: std::sync::Arc<AgentCardRegistry>,
}

impl Planner {
    pub fn new(registry: std::sync::Arc<AgentCardRegistry>) -> Self {
        Self { registry }
    }

    /// Validates an externally-produced plan against the structural
    /// invariants spec.md §4.7 requires: every dependency id refers to
    /// another task in the plan, no self-dependency. A plan with zero tasks
    /// is structurally valid (spec.md §8 "empty plan" boundary case) — the
    /// Orchestrator short-circuits it before EXECUTION rather than rejecting
    /// it here.
    pub fn validate(&self, plan: &Plan) -> Result<(), String> {
        let ids: std::collections::HashSet<&str> = plan.tasks.iter().map(|t| t.id.as_str()).collect();
        for task in &plan.tasks {
            for dep in &task.dependencies {
                if dep == &task.id {
                    return Err(format!("task {} depends on itself", task.id));
                }
                if !ids.contains(dep.as_str()) {
                    return Err(format!("task {} depends on unknown task {}", task.id, dep));
                }
            }
        }
        Ok(())
    }

    /// Parses and validates a plan emitted by an upstream LLM-backed
    /// planning agent (spec.md §4.7): the raw JSON is first checked against
    /// [`PLAN_SCHEMA`], then deserialized, then run through [`Self::validate`].
    /// Any failure at either stage is the "malformed output" condition that
    /// triggers [`Self::fallback_plan`] (spec.md §4.8 PLANNING phase).
    pub fn parse_external(&self, raw: &Value) -> Result<Plan, String> {
        let schema = plan_schema();
        if let Err(errors) = schema.validate(raw) {
            let detail: Vec<String> = errors.map(|e| e.to_string()).collect();
            return Err(format!("plan failed schema validation: {}", detail.join("; ")));
        }
        let plan: Plan = serde_json::from_value(raw.clone()).map_err(|e| format!("plan deserialization failed: {e}"))?;
        self.validate(&plan)?;
        Ok(plan)
    }

    /// A single catch-all task assigned to a generic specialist, used when
    /// an upstream planning agent's output is malformed (spec.md §4.7).
    pub fn fallback_plan(&self, request: &PlanRequest) -> Plan {
        let agent_id = self
            .registry
            .best_match("generic")
            .map(|c| c.agent_id.clone())
            .or_else(|| request.available_specialists.first().cloned())
            .unwrap_or_else(|| "unassigned".to_string());

        Plan {
            tasks: vec![TaskDescriptor {
                id: Uuid::new_v4().to_string(),
                description: request.query.clone(),
                agent_id,
                dependencies: Vec::new(),
            }],
            coordination: Coordination::Sequential,
            critical_path: Vec::new(),
            estimates: Estimates {
                time_s: 0.0,
                cost_units: 0.0,
            },
            risks: Vec::new(),
            quality_score: 0.0,
        }
    }

    /// Local heuristic planner, used for `simple` mode and as the basis for
    /// `sophisticated` mode before stage-grouping and critical-path
    /// computation (spec.md §4.7).
    pub fn plan_heuristically(&self, request: &PlanRequest) -> Plan {
        let steps = split_into_steps(&request.query);
        let mut tasks = Vec::new();
        let mut previous_id: Option<String> = None;

        for step in &steps {
            let agent_id = self
                .registry
                .best_match(step)
                .map(|c| c.agent_id.clone())
                .unwrap_or_else(|| "unassigned".to_string());

            let id = Uuid::new_v4().to_string();
            let dependencies = match request.mode {
                PlanningMode::Simple => previous_id.clone().into_iter().collect(),
                PlanningMode::Sophisticated => Vec::new(),
            };

            tasks.push(TaskDescriptor {
                id: id.clone(),
                description: step.clone(),
                agent_id,
                dependencies,
            });
            previous_id = Some(id);
        }

        let coordination = match request.mode {
            PlanningMode::Simple => Coordination::Sequential,
            PlanningMode::Sophisticated => Coordination::Parallel,
        };

        let critical_path = longest_path(&tasks);

        let quality_score = self.self_quality_score(&tasks, request);

        Plan {
            tasks: tasks.clone(),
            coordination,
            critical_path,
            estimates: Estimates {
                time_s: tasks.len() as f64 * 5.0,
                cost_units: tasks.len() as f64,
            },
            risks: if tasks.iter().any(|t| t.agent_id == "unassigned") {
                vec![Risk {
                    description: "one or more tasks have no matching specialist".to_string(),
                    severity: "medium".to_string(),
                    mitigation: "fall back to a generic specialist or re-plan".to_string(),
                }]
            } else {
                Vec::new()
            },
            quality_score,
        }
    }

    /// Internal heuristic self-score (spec.md §4.7 "low scores trigger
    /// re-planning by the Orchestrator"): penalizes unassigned tasks and
    /// very long plans.
    fn self_quality_score(&self, tasks: &[TaskDescriptor], request: &PlanRequest) -> f64 {
        if tasks.is_empty() {
            return 0.0;
        }
        let assigned_ratio =
            tasks.iter().filter(|t| t.agent_id != "unassigned").count() as f64 / tasks.len() as f64;
        let size_penalty = if tasks.len() > request.available_specialists.len().max(1) * 3 {
            0.2
        } else {
            0.0
        };
        (assigned_ratio - size_penalty).clamp(0.0, 1.0)
    }
}

/// Splits a query into a crude sequence of steps on sentence-ish
/// boundaries; a stand-in for the upstream planning agent's decomposition
/// when running the local fallback path.
fn split_into_steps(query: &str) -> Vec<String> {
    let steps: Vec<String> = query
        .split(|c| c == '.' || c == ';')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if steps.is_empty() {
        vec![query.trim().to_string()]
    } else {
        steps
    }
}

/// Longest chain of task ids through the `dependencies` edges (spec.md
/// §4.7 "parallel groupings and a critical path using a straightforward
/// longest-path DAG walk"). A fully parallel task set (no dependencies)
/// has a critical path of length one — any single task — since no chain
/// of dependencies is longer than that; a strict sequential chain's
/// critical path is the whole chain. Assumes `tasks` is acyclic, which
/// holds for every plan this module builds itself.
fn longest_path(tasks: &[TaskDescriptor]) -> Vec<String> {
    use std::collections::HashMap;

    fn longest_to<'a>(
        id: &str,
        by_id: &HashMap<&str, &'a TaskDescriptor>,
        dist: &mut HashMap<String, usize>,
        best_pred: &mut HashMap<String, Option<String>>,
    ) -> usize {
        if let Some(&d) = dist.get(id) {
            return d;
        }
        // Mark in progress so a malformed cyclic input terminates instead
        // of recursing forever; a cycle member is simply treated as a leaf.
        dist.insert(id.to_string(), 1);
        best_pred.insert(id.to_string(), None);

        let Some(task) = by_id.get(id) else { return 1 };
        let mut max_dep_dist = 0;
        let mut pred = None;
        for dep in &task.dependencies {
            if by_id.contains_key(dep.as_str()) {
                let d = longest_to(dep, by_id, dist, best_pred);
                if d > max_dep_dist {
                    max_dep_dist = d;
                    pred = Some(dep.clone());
                }
            }
        }
        let d = max_dep_dist + 1;
        dist.insert(id.to_string(), d);
        best_pred.insert(id.to_string(), pred);
        d
    }

    let by_id: HashMap<&str, &TaskDescriptor> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut dist = HashMap::new();
    let mut best_pred = HashMap::new();
    for task in tasks {
        longest_to(&task.id, &by_id, &mut dist, &mut best_pred);
    }

    let Some(end) = tasks
        .iter()
        .max_by_key(|t| dist.get(&t.id).copied().unwrap_or(0))
        .map(|t| t.id.clone())
    else {
        return Vec::new();
    };

    let mut path = Vec::new();
    let mut current = Some(end);
    while let Some(id) = current {
        current = best_pred.get(&id).cloned().flatten();
        path.push(id);
    }
    path.reverse();
    path
}
