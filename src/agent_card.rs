//! Agent Card: the immutable static descriptor of one agent's identity,
//! endpoint, tier, and capabilities (spec.md §3, §6).
//!
//! Cards are loaded once at startup from a directory of `*.card.json` files
//! and never mutated afterwards; the registry is a process-wide read-only
//! singleton, mirroring the reference service's convention of loading
//! configuration/registry data from disk once and sharing it by `Arc`.

use crate::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Architectural rank of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Top-level orchestrator.
    Orchestrator = 1,
    /// Domain specialist.
    Specialist = 2,
    /// Supporting service (e.g. a retrieval or formatting helper).
    Service = 3,
}

/// Operational status reported in the on-disk card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardStatus {
    Active,
    Disabled,
}

/// Immutable descriptor of one agent (spec.md §3, on-disk format in §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCard {
    pub agent_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub tier: Tier,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub quality_domain: String,
    #[serde(default = "default_status")]
    pub status: CardStatus,
}

fn default_status() -> CardStatus {
    CardStatus::Active
}

impl AgentCard {
    /// The endpoint URL this card's agent is reachable at.
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Health-probe path per spec.md §6.
    pub fn health_check_url(&self) -> String {
        format!("{}/.well-known/agent-card", self.endpoint())
    }

    /// Cheap heuristic capability match used by the Planner (spec.md §4.7):
    /// fraction of the requested capability's words found in this card's
    /// capability tags, case-insensitively.
    pub fn capability_score(&self, requested: &str) -> f64 {
        let requested = requested.to_lowercase();
        let words: Vec<&str> = requested.split_whitespace().collect();
        if words.is_empty() {
            return 0.0;
        }
        let tags: Vec<String> = self.capabilities.iter().map(|c| c.to_lowercase()).collect();
        let hits = words
            .iter()
            .filter(|w| tags.iter().any(|t| t.contains(**w) || w.contains(t.as_str())))
            .count();
        hits as f64 / words.len() as f64
    }
}

/// Read-only, process-wide registry of loaded Agent Cards.
#[derive(Debug, Default)]
pub struct AgentCardRegistry {
    cards: HashMap<String, AgentCard>,
}

impl AgentCardRegistry {
    /// Load every `*.card.json` file in `dir` into a registry.
    ///
    /// Malformed files are reported with their path in the error; a missing
    /// directory is not an error (an empty registry is returned), since a
    /// test harness may run without any configured agents.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut cards = HashMap::new();

        if !dir.exists() {
            return Ok(Self { cards });
        }

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(".card.json"))
                .unwrap_or(false)
            {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            let card: AgentCard = serde_json::from_str(&content).map_err(|e| {
                OrchestratorError::Config(format!("invalid agent card {:?}: {}", path, e))
            })?;
            cards.insert(card.agent_id.clone(), card);
        }

        Ok(Self { cards })
    }

    pub fn get(&self, agent_id: &str) -> Option<&AgentCard> {
        self.cards.get(agent_id)
    }

    pub fn all(&self) -> impl Iterator<Item = &AgentCard> {
        self.cards.values()
    }

    pub fn by_tier(&self, tier: Tier) -> impl Iterator<Item = &AgentCard> {
        self.cards.values().filter(move |c| c.tier == tier)
    }

    /// Best capability match among active cards, used by the Planner.
    pub fn best_match(&self, requested_capability: &str) -> Option<&AgentCard> {
        self.cards
            .values()
            .filter(|c| c.status == CardStatus::Active)
            .map(|c| (c, c.capability_score(requested_capability)))
            .filter(|(_, score)| *score > 0.0)
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(c, _)| c)
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

/// Shared handle to the registry, as passed to pool/client/planner.
pub type SharedAgentCardRegistry = Arc<AgentCardRegistry>;
