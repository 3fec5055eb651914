use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(ProjectId);
id_newtype!(MilestoneId);
id_newtype!(MemberId);

/// Stable subject id issued by the identity provider (`sub` claim).
/// Opaque to the engine, only ever compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectId(pub String);

impl SubjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Effective role of a caller for one request. Resolved once, before
/// dispatch, so the Authorization Gate can match exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Teacher,
    Student,
}

impl RoleKind {
    /// Collapses an open set of realm roles into the closed variant.
    /// Teacher takes precedence if a subject somehow carries both claims.
    pub fn resolve<'a>(roles: impl IntoIterator<Item = &'a str>) -> Option<RoleKind> {
        let mut student = false;
        for role in roles {
            match role.trim() {
                "teacher" => return Some(RoleKind::Teacher),
                "student" => student = true,
                _ => {}
            }
        }
        student.then_some(RoleKind::Student)
    }
}

/// Student account mode. `Participant -> Lead` is the only legal edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Participant,
    Lead,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Participant => "participant",
            Mode::Lead => "lead",
        }
    }

    pub fn parse(value: &str) -> Option<Mode> {
        match value {
            "participant" => Some(Mode::Participant),
            "lead" => Some(Mode::Lead),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Presentation,
    Report,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Presentation => "presentation",
            ArtifactKind::Report => "report",
        }
    }

    pub fn parse(value: &str) -> Option<ArtifactKind> {
        match value {
            "presentation" => Some(ArtifactKind::Presentation),
            "report" => Some(ArtifactKind::Report),
            _ => None,
        }
    }
}

/// Caller identity as resolved by the upstream gateway: who is acting,
/// and with which effective role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub subject: SubjectId,
    pub role: RoleKind,
    pub full_name: Option<String>,
    pub email: Option<String>,
}

impl Identity {
    pub fn is_teacher(&self) -> bool {
        self.role == RoleKind::Teacher
    }
}
