use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::{
    domain::{ArtifactKind, MemberId, MilestoneId, Mode, ProjectId, SubjectId},
    protocol::TEAM_SIZE_CAP,
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredProfile {
    pub sub: SubjectId,
    pub is_teacher: bool,
    pub mode: Option<Mode>,
    pub full_name: Option<String>,
    pub email_corp: Option<String>,
    pub telegram: Option<String>,
    pub group_no: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoredProject {
    pub id: ProjectId,
    pub name: String,
    pub description: Option<String>,
    pub repo_url: Option<String>,
    pub tracker_url: Option<String>,
    pub mobile_repo_url: Option<String>,
    pub lead_sub: SubjectId,
}

#[derive(Debug, Clone)]
pub struct StoredMember {
    pub id: MemberId,
    pub project_id: ProjectId,
    pub member_sub: SubjectId,
    pub role_in_team: Option<String>,
    pub full_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoredMilestone {
    pub id: MilestoneId,
    pub title: String,
    pub deadline: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredSubmission {
    pub project_id: ProjectId,
    pub milestone_id: MilestoneId,
    pub grade: Option<i64>,
    pub presentation_ref: Option<String>,
    pub report_ref: Option<String>,
    pub graded_by: Option<SubjectId>,
    pub graded_at: Option<DateTime<Utc>>,
}

/// Raw per-project material for the rating view, read in one transaction
/// so team size and grades come from the same logical point in time.
#[derive(Debug, Clone)]
pub struct RatingSource {
    pub project_id: ProjectId,
    pub project_name: String,
    pub team_size: i64,
    pub grades: Vec<i64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WipeCounts {
    pub submissions: u64,
    pub members: u64,
    pub projects: u64,
    pub milestones: u64,
    pub student_profiles: u64,
}

/// Partial project metadata edit. `None` leaves a column untouched, an
/// empty string clears it to NULL.
#[derive(Debug, Clone, Default)]
pub struct ProjectChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub repo_url: Option<String>,
    pub tracker_url: Option<String>,
    pub mobile_repo_url: Option<String>,
}

#[derive(Debug)]
pub enum CreateProjectOutcome {
    Created(StoredProject),
    LeadHasProject,
    AlreadyInTeam,
}

#[derive(Debug)]
pub enum AddMemberOutcome {
    Added(StoredMember),
    ProjectMissing,
    AlreadyInTeam,
    CapacityExceeded,
    MobileRepoRequired,
}

#[derive(Debug)]
pub enum UpdateProjectOutcome {
    Updated(StoredProject),
    Missing,
    MobileRepoRequired,
}

const PROFILE_COLUMNS: &str =
    "sub, is_teacher, mode, full_name, email_corp, telegram, group_no";
const PROJECT_COLUMNS: &str =
    "id, name, description, repo_url, tracker_url, mobile_repo_url, lead_sub";
const SUBMISSION_COLUMNS: &str =
    "project_id, milestone_id, grade, presentation_ref, report_ref, graded_by_sub, graded_at";

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    // ---- profiles ----

    /// Creates the profile on first access, or refreshes the claim-sourced
    /// fields on a later one. `mode` is never touched on conflict, so the
    /// participant/lead transition survives re-login.
    pub async fn upsert_profile_claims(
        &self,
        sub: &SubjectId,
        is_teacher: bool,
        full_name: Option<&str>,
        email_corp: Option<&str>,
    ) -> Result<StoredProfile> {
        let initial_mode = if is_teacher {
            None
        } else {
            Some(Mode::Participant.as_str())
        };
        let row = sqlx::query(&format!(
            "INSERT INTO profiles (sub, is_teacher, mode, full_name, email_corp)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(sub) DO UPDATE SET
                is_teacher = excluded.is_teacher,
                full_name = COALESCE(excluded.full_name, profiles.full_name),
                email_corp = COALESCE(excluded.email_corp, profiles.email_corp)
             RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(sub.as_str())
        .bind(is_teacher)
        .bind(initial_mode)
        .bind(full_name)
        .bind(email_corp)
        .fetch_one(&self.pool)
        .await?;
        Ok(profile_from_row(&row))
    }

    pub async fn profile(&self, sub: &SubjectId) -> Result<Option<StoredProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE sub = ?"
        ))
        .bind(sub.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| profile_from_row(&r)))
    }

    pub async fn update_contact_fields(
        &self,
        sub: &SubjectId,
        telegram: Option<&str>,
        group_no: Option<&str>,
    ) -> Result<Option<StoredProfile>> {
        let row = sqlx::query(&format!(
            "UPDATE profiles
             SET telegram = COALESCE(?, telegram),
                 group_no = COALESCE(?, group_no)
             WHERE sub = ?
             RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(telegram)
        .bind(group_no)
        .bind(sub.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| profile_from_row(&r)))
    }

    /// Sets `mode = lead`. Legality of the edge is the engine's job.
    pub async fn promote_to_lead(&self, sub: &SubjectId) -> Result<Option<StoredProfile>> {
        let row = sqlx::query(&format!(
            "UPDATE profiles SET mode = ? WHERE sub = ? RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(Mode::Lead.as_str())
        .bind(sub.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| profile_from_row(&r)))
    }

    // ---- projects ----

    /// One transaction: one-project-per-lead and one-team-per-subject
    /// checks, the project insert, and the lead's synthetic membership row.
    pub async fn create_project(
        &self,
        lead_sub: &SubjectId,
        name: &str,
        description: Option<&str>,
        repo_url: Option<&str>,
        tracker_url: Option<&str>,
        mobile_repo_url: Option<&str>,
    ) -> Result<CreateProjectOutcome> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT id FROM projects WHERE lead_sub = ?")
            .bind(lead_sub.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() {
            return Ok(CreateProjectOutcome::LeadHasProject);
        }

        let member_elsewhere = sqlx::query("SELECT id FROM team_members WHERE member_sub = ?")
            .bind(lead_sub.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        if member_elsewhere.is_some() {
            return Ok(CreateProjectOutcome::AlreadyInTeam);
        }

        let row = sqlx::query(&format!(
            "INSERT INTO projects (name, description, repo_url, tracker_url, mobile_repo_url, lead_sub)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING {PROJECT_COLUMNS}"
        ))
        .bind(name)
        .bind(description)
        .bind(repo_url)
        .bind(tracker_url)
        .bind(mobile_repo_url)
        .bind(lead_sub.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let project = project_from_row(&row);

        sqlx::query("INSERT INTO team_members (project_id, member_sub, role_in_team) VALUES (?, ?, ?)")
            .bind(project.id.0)
            .bind(lead_sub.as_str())
            .bind("lead")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(CreateProjectOutcome::Created(project))
    }

    pub async fn project(&self, project_id: ProjectId) -> Result<Option<StoredProject>> {
        let row = sqlx::query(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?"
        ))
        .bind(project_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| project_from_row(&r)))
    }

    pub async fn list_projects(&self) -> Result<Vec<StoredProject>> {
        let rows = sqlx::query(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects ORDER BY id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(project_from_row).collect())
    }

    /// Projects the subject belongs to. The lead's synthetic membership row
    /// makes one query cover both owning and plain membership.
    pub async fn list_projects_for_subject(&self, sub: &SubjectId) -> Result<Vec<StoredProject>> {
        let rows = sqlx::query(&format!(
            "SELECT p.{} FROM projects p
             INNER JOIN team_members m ON m.project_id = p.id
             WHERE m.member_sub = ?
             ORDER BY p.id DESC",
            PROJECT_COLUMNS.replace(", ", ", p.")
        ))
        .bind(sub.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(project_from_row).collect())
    }

    /// Atomic conditional edit: the 5-member team keeps a non-empty
    /// `mobile_repo_url` no matter how the edit races with `add_member`.
    pub async fn update_project(
        &self,
        project_id: ProjectId,
        changes: &ProjectChanges,
    ) -> Result<UpdateProjectOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?"
        ))
        .bind(project_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(UpdateProjectOutcome::Missing);
        };
        let current = project_from_row(&row);

        let team_size: i64 =
            sqlx::query_scalar("SELECT COUNT(id) FROM team_members WHERE project_id = ?")
                .bind(project_id.0)
                .fetch_one(&mut *tx)
                .await?;

        let resulting_mobile = match changes.mobile_repo_url.as_deref() {
            Some(value) => non_empty(value).map(str::to_string),
            None => current.mobile_repo_url.clone(),
        };
        if team_size >= TEAM_SIZE_CAP as i64 && resulting_mobile.is_none() {
            return Ok(UpdateProjectOutcome::MobileRepoRequired);
        }

        let row = sqlx::query(&format!(
            "UPDATE projects SET
                name = ?,
                description = ?,
                repo_url = ?,
                tracker_url = ?,
                mobile_repo_url = ?
             WHERE id = ?
             RETURNING {PROJECT_COLUMNS}"
        ))
        .bind(changes.name.as_deref().unwrap_or(&current.name))
        .bind(apply_optional(&changes.description, &current.description))
        .bind(apply_optional(&changes.repo_url, &current.repo_url))
        .bind(apply_optional(&changes.tracker_url, &current.tracker_url))
        .bind(resulting_mobile)
        .bind(project_id.0)
        .fetch_one(&mut *tx)
        .await?;
        let updated = project_from_row(&row);

        tx.commit().await?;
        Ok(UpdateProjectOutcome::Updated(updated))
    }

    // ---- memberships ----

    /// Check-then-insert inside one transaction: the 5-member cap and the
    /// 5th-member mobile repo requirement cannot be oversubscribed by
    /// concurrent adds.
    pub async fn add_member(
        &self,
        project_id: ProjectId,
        member_sub: &SubjectId,
        role_in_team: Option<&str>,
    ) -> Result<AddMemberOutcome> {
        let mut tx = self.pool.begin().await?;

        let project = sqlx::query("SELECT mobile_repo_url FROM projects WHERE id = ?")
            .bind(project_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(project) = project else {
            return Ok(AddMemberOutcome::ProjectMissing);
        };

        let elsewhere = sqlx::query("SELECT id FROM team_members WHERE member_sub = ?")
            .bind(member_sub.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        if elsewhere.is_some() {
            return Ok(AddMemberOutcome::AlreadyInTeam);
        }

        let team_size: i64 =
            sqlx::query_scalar("SELECT COUNT(id) FROM team_members WHERE project_id = ?")
                .bind(project_id.0)
                .fetch_one(&mut *tx)
                .await?;
        if team_size >= TEAM_SIZE_CAP as i64 {
            return Ok(AddMemberOutcome::CapacityExceeded);
        }
        let mobile_repo = project
            .get::<Option<String>, _>(0)
            .filter(|url| !url.trim().is_empty());
        if team_size + 1 == TEAM_SIZE_CAP as i64 && mobile_repo.is_none() {
            return Ok(AddMemberOutcome::MobileRepoRequired);
        }

        let row = sqlx::query(
            "INSERT INTO team_members (project_id, member_sub, role_in_team)
             VALUES (?, ?, ?)
             RETURNING id, project_id, member_sub, role_in_team",
        )
        .bind(project_id.0)
        .bind(member_sub.as_str())
        .bind(role_in_team)
        .fetch_one(&mut *tx)
        .await?;
        let member = StoredMember {
            id: MemberId(row.get::<i64, _>(0)),
            project_id: ProjectId(row.get::<i64, _>(1)),
            member_sub: SubjectId(row.get::<String, _>(2)),
            role_in_team: row.get::<Option<String>, _>(3),
            full_name: None,
        };

        tx.commit().await?;
        Ok(AddMemberOutcome::Added(member))
    }

    /// Team roster in insertion order, display names joined in.
    pub async fn members_of(&self, project_id: ProjectId) -> Result<Vec<StoredMember>> {
        let rows = sqlx::query(
            "SELECT m.id, m.project_id, m.member_sub, m.role_in_team, p.full_name
             FROM team_members m
             LEFT JOIN profiles p ON p.sub = m.member_sub
             WHERE m.project_id = ?
             ORDER BY m.id ASC",
        )
        .bind(project_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| StoredMember {
                id: MemberId(r.get::<i64, _>(0)),
                project_id: ProjectId(r.get::<i64, _>(1)),
                member_sub: SubjectId(r.get::<String, _>(2)),
                role_in_team: r.get::<Option<String>, _>(3),
                full_name: r.get::<Option<String>, _>(4),
            })
            .collect())
    }

    pub async fn is_team_member(&self, project_id: ProjectId, sub: &SubjectId) -> Result<bool> {
        let row = sqlx::query("SELECT id FROM team_members WHERE project_id = ? AND member_sub = ?")
            .bind(project_id.0)
            .bind(sub.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn team_size(&self, project_id: ProjectId) -> Result<i64> {
        let size: i64 = sqlx::query_scalar("SELECT COUNT(id) FROM team_members WHERE project_id = ?")
            .bind(project_id.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(size)
    }

    // ---- milestones ----

    pub async fn create_milestone(
        &self,
        title: &str,
        deadline: Option<&str>,
    ) -> Result<StoredMilestone> {
        let row = sqlx::query(
            "INSERT INTO milestones (title, deadline) VALUES (?, ?)
             RETURNING id, title, deadline, created_at",
        )
        .bind(title)
        .bind(deadline)
        .fetch_one(&self.pool)
        .await?;
        Ok(milestone_from_row(&row))
    }

    pub async fn list_milestones(&self) -> Result<Vec<StoredMilestone>> {
        let rows = sqlx::query(
            "SELECT id, title, deadline, created_at FROM milestones ORDER BY id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(milestone_from_row).collect())
    }

    /// Publication order, oldest first. Feeds the joined milestone/state
    /// view and the rating grade sequence.
    pub async fn list_milestones_oldest_first(&self) -> Result<Vec<StoredMilestone>> {
        let rows = sqlx::query(
            "SELECT id, title, deadline, created_at FROM milestones ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(milestone_from_row).collect())
    }

    pub async fn milestone(&self, milestone_id: MilestoneId) -> Result<Option<StoredMilestone>> {
        let row = sqlx::query("SELECT id, title, deadline, created_at FROM milestones WHERE id = ?")
            .bind(milestone_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| milestone_from_row(&r)))
    }

    // ---- submissions ----

    /// Last-write-wins replace of one artifact reference, creating the
    /// submission row on first upload.
    pub async fn set_artifact_ref(
        &self,
        project_id: ProjectId,
        milestone_id: MilestoneId,
        kind: ArtifactKind,
        reference: &str,
    ) -> Result<StoredSubmission> {
        let sql = match kind {
            ArtifactKind::Presentation => format!(
                "INSERT INTO submissions (project_id, milestone_id, presentation_ref)
                 VALUES (?, ?, ?)
                 ON CONFLICT(project_id, milestone_id) DO UPDATE SET
                    presentation_ref = excluded.presentation_ref
                 RETURNING {SUBMISSION_COLUMNS}"
            ),
            ArtifactKind::Report => format!(
                "INSERT INTO submissions (project_id, milestone_id, report_ref)
                 VALUES (?, ?, ?)
                 ON CONFLICT(project_id, milestone_id) DO UPDATE SET
                    report_ref = excluded.report_ref
                 RETURNING {SUBMISSION_COLUMNS}"
            ),
        };
        let row = sqlx::query(&sql)
            .bind(project_id.0)
            .bind(milestone_id.0)
            .bind(reference)
            .fetch_one(&self.pool)
            .await?;
        Ok(submission_from_row(&row))
    }

    /// Creates the submission row if absent, overwrites any prior grade.
    pub async fn set_grade(
        &self,
        project_id: ProjectId,
        milestone_id: MilestoneId,
        grade: i64,
        graded_by: &SubjectId,
    ) -> Result<StoredSubmission> {
        let row = sqlx::query(&format!(
            "INSERT INTO submissions (project_id, milestone_id, grade, graded_by_sub, graded_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(project_id, milestone_id) DO UPDATE SET
                grade = excluded.grade,
                graded_by_sub = excluded.graded_by_sub,
                graded_at = excluded.graded_at
             RETURNING {SUBMISSION_COLUMNS}"
        ))
        .bind(project_id.0)
        .bind(milestone_id.0)
        .bind(grade)
        .bind(graded_by.as_str())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(submission_from_row(&row))
    }

    pub async fn submission(
        &self,
        project_id: ProjectId,
        milestone_id: MilestoneId,
    ) -> Result<Option<StoredSubmission>> {
        let row = sqlx::query(&format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions
             WHERE project_id = ? AND milestone_id = ?"
        ))
        .bind(project_id.0)
        .bind(milestone_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| submission_from_row(&r)))
    }

    pub async fn submissions_for_project(
        &self,
        project_id: ProjectId,
    ) -> Result<Vec<StoredSubmission>> {
        let rows = sqlx::query(&format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions
             WHERE project_id = ?
             ORDER BY milestone_id ASC"
        ))
        .bind(project_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(submission_from_row).collect())
    }

    // ---- rating ----

    /// Single-transaction snapshot of everything the rating view needs:
    /// each project's team size and grades come from the same read.
    pub async fn rating_snapshot(&self) -> Result<Vec<RatingSource>> {
        let mut tx = self.pool.begin().await?;

        let projects = sqlx::query("SELECT id, name FROM projects ORDER BY id ASC")
            .fetch_all(&mut *tx)
            .await?;

        let size_rows = sqlx::query(
            "SELECT project_id, COUNT(id) FROM team_members GROUP BY project_id",
        )
        .fetch_all(&mut *tx)
        .await?;
        let mut sizes: HashMap<i64, i64> = HashMap::new();
        for row in size_rows {
            sizes.insert(row.get::<i64, _>(0), row.get::<i64, _>(1));
        }

        let grade_rows = sqlx::query(
            "SELECT project_id, grade FROM submissions
             WHERE grade IS NOT NULL
             ORDER BY project_id ASC, milestone_id ASC",
        )
        .fetch_all(&mut *tx)
        .await?;
        let mut grades: HashMap<i64, Vec<i64>> = HashMap::new();
        for row in grade_rows {
            grades
                .entry(row.get::<i64, _>(0))
                .or_default()
                .push(row.get::<i64, _>(1));
        }

        tx.commit().await?;

        Ok(projects
            .into_iter()
            .map(|row| {
                let id = row.get::<i64, _>(0);
                RatingSource {
                    project_id: ProjectId(id),
                    project_name: row.get::<String, _>(1),
                    team_size: sizes.get(&id).copied().unwrap_or(0),
                    grades: grades.remove(&id).unwrap_or_default(),
                }
            })
            .collect())
    }

    // ---- administrative wipe ----

    /// Deletes all course data in one transaction, keeping only teacher
    /// profiles. Either everything goes or nothing does.
    pub async fn wipe_all(&self) -> Result<WipeCounts> {
        let mut tx = self.pool.begin().await?;

        let submissions = sqlx::query("DELETE FROM submissions")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let members = sqlx::query("DELETE FROM team_members")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let projects = sqlx::query("DELETE FROM projects")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let milestones = sqlx::query("DELETE FROM milestones")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let student_profiles = sqlx::query("DELETE FROM profiles WHERE is_teacher = 0")
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(WipeCounts {
            submissions,
            members,
            projects,
            milestones,
            student_profiles,
        })
    }
}

fn profile_from_row(row: &SqliteRow) -> StoredProfile {
    StoredProfile {
        sub: SubjectId(row.get::<String, _>(0)),
        is_teacher: row.get::<bool, _>(1),
        mode: row
            .get::<Option<String>, _>(2)
            .as_deref()
            .and_then(Mode::parse),
        full_name: row.get::<Option<String>, _>(3),
        email_corp: row.get::<Option<String>, _>(4),
        telegram: row.get::<Option<String>, _>(5),
        group_no: row.get::<Option<String>, _>(6),
    }
}

fn project_from_row(row: &SqliteRow) -> StoredProject {
    StoredProject {
        id: ProjectId(row.get::<i64, _>(0)),
        name: row.get::<String, _>(1),
        description: row.get::<Option<String>, _>(2),
        repo_url: row.get::<Option<String>, _>(3),
        tracker_url: row.get::<Option<String>, _>(4),
        mobile_repo_url: row.get::<Option<String>, _>(5),
        lead_sub: SubjectId(row.get::<String, _>(6)),
    }
}

fn milestone_from_row(row: &SqliteRow) -> StoredMilestone {
    StoredMilestone {
        id: MilestoneId(row.get::<i64, _>(0)),
        title: row.get::<String, _>(1),
        deadline: row.get::<Option<String>, _>(2),
        created_at: row.get::<DateTime<Utc>, _>(3),
    }
}

fn submission_from_row(row: &SqliteRow) -> StoredSubmission {
    StoredSubmission {
        project_id: ProjectId(row.get::<i64, _>(0)),
        milestone_id: MilestoneId(row.get::<i64, _>(1)),
        grade: row.get::<Option<i64>, _>(2),
        presentation_ref: row.get::<Option<String>, _>(3),
        report_ref: row.get::<Option<String>, _>(4),
        graded_by: row.get::<Option<String>, _>(5).map(SubjectId),
        graded_at: row.get::<Option<DateTime<Utc>>, _>(6),
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Patch semantics for nullable text columns: `None` keeps the current
/// value, an empty patch string clears the column.
fn apply_optional(patch: &Option<String>, current: &Option<String>) -> Option<String> {
    match patch.as_deref() {
        Some(value) => non_empty(value).map(str::to_string),
        None => current.clone(),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
