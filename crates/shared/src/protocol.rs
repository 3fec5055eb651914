use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{MemberId, MilestoneId, Mode, ProjectId, RoleKind, SubjectId};

/// Maximum team size, lead included.
pub const TEAM_SIZE_CAP: usize = 5;

/// Upper bound on the free-text project description.
pub const DESCRIPTION_MAX_CHARS: usize = 3000;

/// Literal a teacher must echo back to authorize the administrative wipe.
pub const WIPE_CONFIRMATION_PHRASE: &str = "ERASE ALL COURSE DATA";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileOut {
    pub subject: SubjectId,
    pub role: RoleKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_corp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_no: Option<String>,
}

/// Partial self-edit of a profile. Fields a role may not touch are
/// stripped by the gate, not rejected.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProfilePatch {
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub telegram: Option<String>,
    #[serde(default)]
    pub group_no: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProjectCreate {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub tracker_url: Option<String>,
    #[serde(default)]
    pub mobile_repo_url: Option<String>,
}

/// Metadata edit. `None` leaves a field untouched, `Some("")` clears it.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProjectPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub tracker_url: Option<String>,
    #[serde(default)]
    pub mobile_repo_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectOut {
    pub id: ProjectId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracker_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile_repo_url: Option<String>,
    pub lead_sub: SubjectId,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemberAdd {
    pub member_sub: SubjectId,
    #[serde(default)]
    pub role_in_team: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberOut {
    pub id: MemberId,
    pub project_id: ProjectId,
    pub member_sub: SubjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_in_team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MilestoneCreate {
    pub title: String,
    /// Optional `YYYY-MM-DD` calendar date.
    #[serde(default)]
    pub deadline: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneOut {
    pub id: MilestoneId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GradeSet {
    pub grade: i64,
}

/// Per-(project, milestone) submission state: uploaded artifact refs and
/// the grade, any of which may still be absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionOut {
    pub project_id: ProjectId,
    pub milestone_id: MilestoneId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presentation_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graded_by: Option<SubjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingRow {
    pub project_id: ProjectId,
    pub project_name: String,
    pub team_size: usize,
    /// Recorded grades in milestone publication order.
    pub grades: Vec<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_grade: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WipeRequest {
    pub confirmation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WipeSummary {
    pub submissions: u64,
    pub members: u64,
    pub projects: u64,
    pub milestones: u64,
    pub student_profiles: u64,
}
