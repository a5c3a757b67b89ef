//! The per-user document and its parts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use timetrack_util::SessionId;

/// Color given to projects that arrive without one
pub const DEFAULT_PROJECT_COLOR: &str = "#3B82F6";

fn default_project_color() -> String {
    DEFAULT_PROJECT_COLOR.to_string()
}

/// A project sessions are booked against. Unique by name within a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ProjectRepr")]
pub struct Project {
    pub name: String,
    pub color: String,
}

impl Project {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
        }
    }
}

/// Older clients stored projects as bare names.
#[derive(Deserialize)]
#[serde(untagged)]
enum ProjectRepr {
    Name(String),
    Full {
        name: String,
        #[serde(default = "default_project_color")]
        color: String,
    },
}

impl From<ProjectRepr> for Project {
    fn from(repr: ProjectRepr) -> Self {
        match repr {
            ProjectRepr::Name(name) => Project::new(name, default_project_color()),
            ProjectRepr::Full { name, color } => Project::new(name, color),
        }
    }
}

/// One tracked stretch of time.
///
/// `project` is a weak reference by name: removing a project leaves
/// sessions pointing at it untouched unless the caller cascades.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    pub project: String,
    #[serde(default)]
    pub description: String,
    /// Whether the session has been settled/cashed out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cashed_out: Option<bool>,
}

impl Session {
    /// Start a new running session
    pub fn start(project: impl Into<String>, description: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            start: at,
            end: None,
            project: project.into(),
            description: description.into(),
            cashed_out: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.end.is_none()
    }

    /// Stop the session. Has no effect on an already stopped session.
    pub fn stop(&mut self, at: DateTime<Utc>) {
        if self.end.is_none() {
            self.end = Some(at);
        }
    }

    /// Elapsed time, measured up to `now` while running
    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        let end = self.end.unwrap_or(now);
        end.signed_duration_since(self.start)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_cashed_out(&self) -> bool {
        self.cashed_out.unwrap_or(false)
    }
}

/// Everything one user has tracked.
///
/// `sessions` keeps insertion order (newest first by convention) and is
/// never required to be sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(default)]
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_session: Option<Session>,
}

impl Default for Document {
    fn default() -> Self {
        Self::starter()
    }
}

impl Document {
    /// Document handed out for users that have never saved anything
    pub fn starter() -> Self {
        Self {
            sessions: Vec::new(),
            projects: vec![
                Project::new("General", "#3B82F6"),
                Project::new("Development", "#10B981"),
                Project::new("Meeting", "#F59E0B"),
            ],
            current_session: None,
        }
    }

    /// A document without sessions or projects
    pub fn empty() -> Self {
        Self {
            sessions: Vec::new(),
            projects: Vec::new(),
            current_session: None,
        }
    }

    pub fn project(&self, name: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.name == name)
    }

    /// Add a project, or recolor it if the name already exists
    pub fn upsert_project(&mut self, project: Project) {
        match self.projects.iter_mut().find(|p| p.name == project.name) {
            Some(existing) => existing.color = project.color,
            None => self.projects.push(project),
        }
    }

    /// Remove a project by name. Sessions referencing it are only dropped
    /// when `cascade` is set. Returns whether the project existed.
    pub fn remove_project(&mut self, name: &str, cascade: bool) -> bool {
        let before = self.projects.len();
        self.projects.retain(|p| p.name != name);
        let removed = self.projects.len() != before;

        if cascade {
            self.sessions.retain(|s| s.project != name);
        }

        removed
    }

    pub fn sessions_for_project<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Session> + 'a {
        self.sessions.iter().filter(move |s| s.project == name)
    }

    /// Sessions ordered newest start first
    pub fn sessions_newest_first(&self) -> Vec<&Session> {
        let mut sorted: Vec<&Session> = self.sessions.iter().collect();
        sorted.sort_by(|a, b| b.start.cmp(&a.start));
        sorted
    }

    /// Total time tracked against a project, running sessions measured to `now`
    pub fn total_for_project(&self, name: &str, now: DateTime<Utc>) -> Duration {
        self.sessions_for_project(name)
            .map(|s| s.duration(now))
            .sum()
    }

    /// Check structural consistency. Empty means the document is sound.
    pub fn validate(&self) -> Vec<DocumentProblem> {
        let mut problems = Vec::new();

        let mut names = HashSet::new();
        for project in &self.projects {
            if project.name.trim().is_empty() {
                problems.push(DocumentProblem::EmptyProjectName);
            } else if !names.insert(project.name.as_str()) {
                problems.push(DocumentProblem::DuplicateProject(project.name.clone()));
            }
        }

        let mut ids = HashSet::new();
        for session in self.sessions.iter().chain(self.current_session.iter()) {
            if !ids.insert(session.id.as_str()) {
                problems.push(DocumentProblem::DuplicateSessionId(session.id.clone()));
            }
            if let Some(end) = session.end
                && end < session.start
            {
                problems.push(DocumentProblem::EndsBeforeStart(session.id.clone()));
            }
        }

        if let Some(current) = &self.current_session
            && !current.is_running()
        {
            problems.push(DocumentProblem::CurrentSessionStopped(current.id.clone()));
        }

        problems
    }
}

/// Structural problems found by [`Document::validate`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentProblem {
    #[error("Project name cannot be empty")]
    EmptyProjectName,

    #[error("Duplicate project: {0}")]
    DuplicateProject(String),

    #[error("Duplicate session id: {0}")]
    DuplicateSessionId(SessionId),

    #[error("Session {0} ends before it starts")]
    EndsBeforeStart(SessionId),

    #[error("Current session {0} already has an end time")]
    CurrentSessionStopped(SessionId),
}

/// A document together with the version it was read at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedDocument {
    #[serde(flatten)]
    pub document: Document,
    #[serde(rename = "_version", default)]
    pub version: u64,
}

impl VersionedDocument {
    pub fn new(document: Document, version: u64) -> Self {
        Self { document, version }
    }

    /// What a user without a stored document sees
    pub fn starter() -> Self {
        Self::new(Document::starter(), 0)
    }
}
