//! Plan and apply reporting for attachment changes

use crate::diff::DiffResult;
use crate::model::{ListenerRef, Member};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happens to one member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Release,
    Update,
    Allocate,
    Keep,
}

impl ActionKind {
    fn marker(&self) -> char {
        match self {
            Self::Release => '-',
            Self::Update => '~',
            Self::Allocate => '+',
            Self::Keep => ' ',
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Release => "release",
            Self::Update => "update",
            Self::Allocate => "allocate",
            Self::Keep => "keep",
        };
        f.write_str(name)
    }
}

/// Planned step for one member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    pub member: Member,
    /// Member as currently attached, for updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<Member>,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |m: &Member| if m.enabled { "" } else { " (disabled)" };
        match &self.previous {
            Some(before) => write!(
                f,
                "{} {}:{}{} -> {}{}",
                self.kind.marker(),
                before.id,
                before.port,
                flag(before),
                self.member.port,
                flag(&self.member)
            ),
            None => write!(
                f,
                "{} {}:{}{}",
                self.kind.marker(),
                self.member.id,
                self.member.port,
                flag(&self.member)
            ),
        }
    }
}

/// Steps needed to bring one listener to a declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub listener: ListenerRef,
    /// In execution order: releases, updates, allocations, then kept members
    pub actions: Vec<Action>,
}

impl Plan {
    pub fn from_diff(listener: ListenerRef, diff: &DiffResult) -> Self {
        let single = |kind, m: &Member| Action {
            kind,
            member: m.clone(),
            previous: None,
        };

        let actions = diff
            .removed
            .iter()
            .map(|m| single(ActionKind::Release, m))
            .chain(diff.changed.iter().map(|c| Action {
                kind: ActionKind::Update,
                member: c.after.clone(),
                previous: Some(c.before.clone()),
            }))
            .chain(diff.added.iter().map(|m| single(ActionKind::Allocate, m)))
            .chain(diff.unchanged.iter().map(|m| single(ActionKind::Keep, m)))
            .collect();

        Self { listener, actions }
    }

    pub fn has_changes(&self) -> bool {
        self.actions.iter().any(|a| a.kind != ActionKind::Keep)
    }

    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions.iter().filter(|a| a.kind == kind).count()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            allocate: self.count(ActionKind::Allocate),
            update: self.count(ActionKind::Update),
            release: self.count(ActionKind::Release),
            keep: self.count(ActionKind::Keep),
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.listener)?;
        for action in self.actions.iter().filter(|a| a.kind != ActionKind::Keep) {
            writeln!(f, "  {}", action)?;
        }
        write!(f, "{}", self.summary())
    }
}

/// Counts per action kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanSummary {
    pub allocate: usize,
    pub update: usize,
    pub release: usize,
    pub keep: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to allocate, {} to update, {} to release, {} unchanged",
            self.allocate, self.update, self.release, self.keep
        )
    }
}

/// Remote call that went through during an apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedStep {
    pub kind: ActionKind,
    /// Member ids the call covered
    pub targets: Vec<String>,
    /// Backend ids released, updated or allocated
    pub backend_ids: Vec<String>,
}

impl fmt::Display for AppliedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} as {}",
            self.kind,
            self.targets.join(","),
            self.backend_ids.join(",")
        )
    }
}

/// What an apply did, in order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub steps: Vec<AppliedStep>,
    pub duration_ms: u64,
}

impl ApplyReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, kind: ActionKind, targets: Vec<String>, backend_ids: Vec<String>) {
        self.steps.push(AppliedStep {
            kind,
            targets,
            backend_ids,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Backend ids touched by steps of `kind`
    pub fn backend_ids(&self, kind: ActionKind) -> Vec<String> {
        self.steps
            .iter()
            .filter(|s| s.kind == kind)
            .flat_map(|s| s.backend_ids.iter().cloned())
            .collect()
    }

    pub fn allocated(&self) -> Vec<String> {
        self.backend_ids(ActionKind::Allocate)
    }

    /// One line per completed step, for reporting a partial apply
    pub fn completed(&self) -> Vec<String> {
        self.steps.iter().map(ToString::to_string).collect()
    }
}
