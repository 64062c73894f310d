//! Multi-agent workflow engine
//!
//! Builds workflows from configuration and runs them: sequential pipelines
//! where each agent's output seeds the next, and graphs whose transitions
//! are chosen by priority-ordered conditional edges evaluated against the
//! previous agent's output.

pub mod condition;

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use condition::ConditionEvaluator;

use crate::model::{ChatModel, ModelFactory, ModelRegistry, ProviderError};
use crate::responses::WorkflowStreamChunk;
use crate::types::Message;

/// Errors from workflow construction and execution
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("workflow '{0}' not found (available: {1})")]
    NotFound(String, String),

    #[error("workflow '{0}' requires a non-empty 'agents' list")]
    NoAgents(String),

    #[error("workflow '{0}' requires a 'start' agent name")]
    NoStart(String),

    #[error("workflow '{workflow}': agent '{agent}' not found")]
    UnknownAgent { workflow: String, agent: String },

    #[error("unknown workflow kind '{0}'")]
    UnknownKind(String),

    #[error("agent '{agent}' failed: {source}")]
    AgentFailed {
        agent: String,
        #[source]
        source: ProviderError,
    },
}

/// Workflow shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowKind {
    /// Participants run in declared order
    Sequential,
    /// Edge-routed agent graph. `custom` is accepted as a legacy alias.
    #[serde(alias = "custom")]
    Graph,
}

/// Configuration for one workflow agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowAgentConfig {
    pub name: String,
    #[serde(default = "default_instructions")]
    pub instructions: String,
    /// Optional model name for per-agent model selection
    #[serde(default)]
    pub model: Option<String>,
}

fn default_instructions() -> String {
    "You are a helpful assistant.".to_string()
}

/// Configuration for one workflow edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEdgeConfig {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub priority: i32,
}

/// Configuration for a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: WorkflowKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub agents: Vec<WorkflowAgentConfig>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdgeConfig>,
    #[serde(default)]
    pub start: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// A directed, optionally conditional transition between two agents
#[derive(Debug, Clone)]
pub struct WorkflowEdge {
    pub from: String,
    pub to: String,
    pub condition: Option<String>,
    pub priority: i32,
}

/// One agent participating in a workflow
pub struct WorkflowAgent {
    pub name: String,
    instructions: String,
    client: Arc<dyn ChatModel>,
}

impl WorkflowAgent {
    async fn run(&self, input: &str) -> Result<String, WorkflowError> {
        let messages = vec![Message::user(input)];
        let response = self
            .client
            .generate(messages, Vec::new(), Some(self.instructions.clone()))
            .await
            .map_err(|source| WorkflowError::AgentFailed {
                agent: self.name.clone(),
                source,
            })?;
        Ok(response.message.text())
    }
}

/// A constructed workflow
pub struct Workflow {
    pub name: String,
    pub kind: WorkflowKind,
    agents: HashMap<String, WorkflowAgent>,
    /// Declaration order, used by sequential workflows
    order: Vec<String>,
    /// Edges sorted by descending priority, declaration order on ties
    edges: Vec<WorkflowEdge>,
    start: Option<String>,
}

/// One executed step, for response reporting
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStep {
    pub agent: String,
    pub status: String,
}

/// Result of a non-streaming workflow run
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    /// Combined output with per-agent authorship annotations
    pub response: String,
    /// Name of the final responding agent
    pub author: Option<String>,
    pub steps: Vec<WorkflowStep>,
}

/// Summary of a workflow's structure
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowInfo {
    pub name: String,
    pub kind: WorkflowKind,
    pub agents: Vec<String>,
    pub start: Option<String>,
    pub edges: Vec<WorkflowEdgeInfo>,
    pub conditional_edge_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowEdgeInfo {
    pub from: String,
    pub to: String,
    pub condition: Option<String>,
    pub priority: i32,
}

/// Manages workflow construction and execution
///
/// Agents default to the manager's chat client; an agent config may name a
/// registered model to run on a different backend.
pub struct WorkflowManager {
    default_client: Arc<dyn ChatModel>,
    workflows: HashMap<String, Workflow>,
    evaluator: ConditionEvaluator,
}

impl WorkflowManager {
    pub fn new(default_client: Arc<dyn ChatModel>) -> Self {
        Self {
            default_client,
            workflows: HashMap::new(),
            evaluator: ConditionEvaluator::new(),
        }
    }

    /// Use a strict condition evaluator (no substring fallback)
    pub fn with_strict_conditions(mut self) -> Self {
        self.evaluator = ConditionEvaluator::strict();
        self
    }

    /// Load workflows from configuration
    ///
    /// Disabled workflows are skipped; invalid ones are logged and skipped
    /// so a bad config entry cannot take down the rest. Returns the number
    /// of workflows loaded.
    pub fn load(
        &mut self,
        configs: &[WorkflowConfig],
        registry: Option<&ModelRegistry>,
        factory: Option<&ModelFactory>,
    ) -> usize {
        for config in configs {
            if !config.enabled {
                tracing::debug!(name = %config.name, "skipping disabled workflow");
                continue;
            }
            match self.build_workflow(config, registry, factory) {
                Ok(workflow) => {
                    tracing::info!(
                        name = %workflow.name,
                        kind = ?workflow.kind,
                        agents = workflow.agents.len(),
                        edges = workflow.edges.len(),
                        "loaded workflow"
                    );
                    self.workflows.insert(workflow.name.clone(), workflow);
                }
                Err(err) => {
                    tracing::error!(name = %config.name, error = %err, "failed to load workflow");
                }
            }
        }
        self.workflows.len()
    }

    /// Build one workflow, validating its structure
    pub fn build_workflow(
        &self,
        config: &WorkflowConfig,
        registry: Option<&ModelRegistry>,
        factory: Option<&ModelFactory>,
    ) -> Result<Workflow, WorkflowError> {
        if config.agents.is_empty() {
            return Err(WorkflowError::NoAgents(config.name.clone()));
        }

        let mut agents = HashMap::new();
        let mut order = Vec::new();
        for agent_config in &config.agents {
            let client = self.client_for_agent(agent_config, registry, factory);
            agents.insert(
                agent_config.name.clone(),
                WorkflowAgent {
                    name: agent_config.name.clone(),
                    instructions: agent_config.instructions.clone(),
                    client,
                },
            );
            order.push(agent_config.name.clone());
        }

        let (edges, start) = match config.kind {
            WorkflowKind::Sequential => (Vec::new(), None),
            WorkflowKind::Graph => {
                let start = config
                    .start
                    .clone()
                    .ok_or_else(|| WorkflowError::NoStart(config.name.clone()))?;
                if !agents.contains_key(&start) {
                    return Err(WorkflowError::UnknownAgent {
                        workflow: config.name.clone(),
                        agent: start,
                    });
                }

                let mut edges = Vec::with_capacity(config.edges.len());
                for edge in &config.edges {
                    for endpoint in [&edge.from, &edge.to] {
                        if !agents.contains_key(endpoint) {
                            return Err(WorkflowError::UnknownAgent {
                                workflow: config.name.clone(),
                                agent: endpoint.clone(),
                            });
                        }
                    }
                    edges.push(WorkflowEdge {
                        from: edge.from.clone(),
                        to: edge.to.clone(),
                        condition: edge.condition.clone(),
                        priority: edge.priority,
                    });
                }
                // Stable sort: ties keep declaration order.
                edges.sort_by_key(|e| std::cmp::Reverse(e.priority));
                (edges, Some(start))
            }
        };

        Ok(Workflow {
            name: config.name.clone(),
            kind: config.kind,
            agents,
            order,
            edges,
            start,
        })
    }

    fn client_for_agent(
        &self,
        agent_config: &WorkflowAgentConfig,
        registry: Option<&ModelRegistry>,
        factory: Option<&ModelFactory>,
    ) -> Arc<dyn ChatModel> {
        if let (Some(model), Some(registry), Some(factory)) =
            (agent_config.model.as_deref(), registry, factory)
        {
            match registry
                .get_provider(model)
                .map_err(|e| e.to_string())
                .and_then(|cfg| factory.create_client(cfg).map_err(|e| e.to_string()))
            {
                Ok(client) => {
                    tracing::debug!(
                        agent = %agent_config.name,
                        model,
                        "created per-agent model client"
                    );
                    return client;
                }
                Err(err) => {
                    tracing::warn!(
                        agent = %agent_config.name,
                        model,
                        error = %err,
                        "model not available, using default"
                    );
                }
            }
        }
        self.default_client.clone()
    }

    /// Names of loaded workflows
    pub fn workflow_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workflows.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Whether a workflow is loaded
    pub fn contains(&self, name: &str) -> bool {
        self.workflows.contains_key(name)
    }

    /// Structural summary of a loaded workflow
    pub fn workflow_info(&self, name: &str) -> Option<WorkflowInfo> {
        let workflow = self.workflows.get(name)?;
        Some(WorkflowInfo {
            name: workflow.name.clone(),
            kind: workflow.kind,
            agents: workflow.order.clone(),
            start: workflow.start.clone(),
            edges: workflow
                .edges
                .iter()
                .map(|e| WorkflowEdgeInfo {
                    from: e.from.clone(),
                    to: e.to.clone(),
                    condition: e.condition.clone(),
                    priority: e.priority,
                })
                .collect(),
            conditional_edge_count: workflow
                .edges
                .iter()
                .filter(|e| e.condition.is_some())
                .count(),
        })
    }

    /// Decide which agent runs next after `current` produced `output`
    ///
    /// Edges are consulted in priority order. Conditional edges whose
    /// condition evaluates true win; an unconditioned edge is recorded as
    /// the default and taken only when no condition fires. Returns `None`
    /// when the agent is terminal.
    pub fn evaluate_next_agent(
        &self,
        workflow_name: &str,
        current: &str,
        output: &Value,
    ) -> Option<String> {
        let workflow = self.workflows.get(workflow_name)?;
        let outgoing: Vec<&WorkflowEdge> = workflow
            .edges
            .iter()
            .filter(|e| e.from == current)
            .collect();

        if outgoing.is_empty() {
            tracing::debug!(agent = current, "no outgoing edges");
            return None;
        }

        let mut default_edge: Option<&WorkflowEdge> = None;
        for edge in &outgoing {
            match &edge.condition {
                None => {
                    if default_edge.is_none() {
                        default_edge = Some(edge);
                    }
                }
                Some(condition) => {
                    if self.evaluator.evaluate(condition, output) {
                        tracing::info!(
                            from = current,
                            to = %edge.to,
                            condition = %condition,
                            "condition matched, routing to agent"
                        );
                        return Some(edge.to.clone());
                    }
                }
            }
        }

        if let Some(edge) = default_edge {
            tracing::debug!(from = current, to = %edge.to, "taking default edge");
            return Some(edge.to.clone());
        }

        tracing::warn!(
            workflow = workflow_name,
            agent = current,
            "no matching edge found"
        );
        None
    }

    /// Run a workflow to completion
    pub async fn run(&self, name: &str, message: &str) -> Result<WorkflowRun, WorkflowError> {
        let workflow = self.get(name)?;

        match workflow.kind {
            WorkflowKind::Sequential => self.run_sequential(workflow, message).await,
            WorkflowKind::Graph => self.run_graph(workflow, message).await,
        }
    }

    fn get(&self, name: &str) -> Result<&Workflow, WorkflowError> {
        self.workflows.get(name).ok_or_else(|| {
            WorkflowError::NotFound(name.to_string(), self.workflow_names().join(", "))
        })
    }

    async fn run_sequential(
        &self,
        workflow: &Workflow,
        message: &str,
    ) -> Result<WorkflowRun, WorkflowError> {
        let mut input = message.to_string();
        let mut sections = Vec::new();
        let mut steps = Vec::new();
        let mut author = None;

        for agent_name in &workflow.order {
            let agent = &workflow.agents[agent_name];
            let output = agent.run(&input).await?;
            sections.push(format!("**{}:**\n{}", agent_name, output));
            steps.push(WorkflowStep {
                agent: agent_name.clone(),
                status: "completed".to_string(),
            });
            author = Some(agent_name.clone());
            input = output;
        }

        Ok(WorkflowRun {
            response: sections.join("\n\n"),
            author,
            steps,
        })
    }

    async fn run_graph(
        &self,
        workflow: &Workflow,
        message: &str,
    ) -> Result<WorkflowRun, WorkflowError> {
        // Cyclic edge sets are legal; the step cap keeps execution bounded.
        let max_steps = workflow.agents.len() * 4;
        let mut current = workflow.start.clone();
        let mut input = message.to_string();
        let mut sections = Vec::new();
        let mut steps = Vec::new();
        let mut author = None;

        while let Some(agent_name) = current {
            if steps.len() >= max_steps {
                tracing::warn!(
                    workflow = %workflow.name,
                    max_steps,
                    "workflow step cap reached, terminating"
                );
                break;
            }

            let agent =
                workflow
                    .agents
                    .get(&agent_name)
                    .ok_or_else(|| WorkflowError::UnknownAgent {
                        workflow: workflow.name.clone(),
                        agent: agent_name.clone(),
                    })?;

            let output = agent.run(&input).await?;
            sections.push(format!("**{}:**\n{}", agent_name, output));
            steps.push(WorkflowStep {
                agent: agent_name.clone(),
                status: "completed".to_string(),
            });
            author = Some(agent_name.clone());

            let output_value = Value::String(output.clone());
            current = self.evaluate_next_agent(&workflow.name, &agent_name, &output_value);
            input = output;
        }

        Ok(WorkflowRun {
            response: sections.join("\n\n"),
            author,
            steps,
        })
    }

    /// Run a workflow, streaming one chunk per agent output
    ///
    /// The sequence ends with exactly one `done=true` chunk; agent
    /// failures surface as a terminal chunk with `error` set.
    pub fn run_stream(
        self: &Arc<Self>,
        name: String,
        message: String,
    ) -> BoxStream<'static, WorkflowStreamChunk> {
        let manager = Arc::clone(self);
        Box::pin(async_stream::stream! {
            let workflow = match manager.get(&name) {
                Ok(w) => w,
                Err(err) => {
                    yield WorkflowStreamChunk::error(err.to_string());
                    return;
                }
            };

            let max_steps = workflow.agents.len() * 4;
            let mut executed = 0usize;
            let mut input = message;
            let mut current = match workflow.kind {
                WorkflowKind::Sequential => workflow.order.first().cloned(),
                WorkflowKind::Graph => workflow.start.clone(),
            };
            let mut sequential_index = 0usize;

            while let Some(agent_name) = current {
                if executed >= max_steps {
                    break;
                }
                let agent = match workflow.agents.get(&agent_name) {
                    Some(agent) => agent,
                    None => break,
                };

                match agent.run(&input).await {
                    Ok(output) => {
                        yield WorkflowStreamChunk::text(output.clone(), agent_name.clone());
                        executed += 1;

                        current = match workflow.kind {
                            WorkflowKind::Sequential => {
                                sequential_index += 1;
                                workflow.order.get(sequential_index).cloned()
                            }
                            WorkflowKind::Graph => {
                                let output_value = Value::String(output.clone());
                                manager.evaluate_next_agent(
                                    &workflow.name,
                                    &agent_name,
                                    &output_value,
                                )
                            }
                        };
                        input = output;
                    }
                    Err(err) => {
                        yield WorkflowStreamChunk::error(err.to_string());
                        return;
                    }
                }
            }

            yield WorkflowStreamChunk::done();
        })
    }
}
