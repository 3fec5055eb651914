use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use chrono::NaiveDate;
use shared::{
    domain::{ArtifactKind, Identity, MilestoneId, Mode, ProjectId, RoleKind},
    error::{ApiError, ErrorCode},
    protocol::{
        GradeSet, MemberAdd, MemberOut, MilestoneCreate, MilestoneOut, ProfileOut, ProfilePatch,
        ProjectCreate, ProjectOut, ProjectPatch, RatingRow, SubmissionOut, WipeSummary,
        DESCRIPTION_MAX_CHARS, WIPE_CONFIRMATION_PHRASE,
    },
};
use storage::{
    AddMemberOutcome, CreateProjectOutcome, ProjectChanges, Storage, StoredMilestone,
    StoredProfile, StoredProject, StoredSubmission, UpdateProjectOutcome,
};
use tokio::sync::RwLock;
use tracing::info;

/// Shared engine state. `maintenance` is the stop-the-world guard for the
/// administrative wipe: every command holds it for read, the wipe holds it
/// for write.
#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    maintenance: Arc<RwLock<()>>,
}

impl ApiContext {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            maintenance: Arc::new(RwLock::new(())),
        }
    }
}

// ---- profile aggregate ----

/// Reads the caller's own profile, creating it lazily from identity claims.
pub async fn get_profile(ctx: &ApiContext, identity: &Identity) -> Result<ProfileOut, ApiError> {
    let _guard = ctx.maintenance.read().await;
    let profile = sync_profile_from_claims(ctx, identity).await?;
    Ok(profile_out(identity, profile))
}

/// Self-edit. Fields the caller's role may not touch (`mode`, `group_no`
/// for teachers) are stripped silently so the rest of the patch still
/// applies. `lead -> participant` is the one illegal mode edge.
pub async fn update_profile(
    ctx: &ApiContext,
    identity: &Identity,
    patch: &ProfilePatch,
) -> Result<ProfileOut, ApiError> {
    let _guard = ctx.maintenance.read().await;
    let current = sync_profile_from_claims(ctx, identity).await?;

    if !identity.is_teacher() {
        if let Some(requested) = patch.mode {
            match (current.mode, requested) {
                (Some(Mode::Lead), Mode::Participant) => {
                    return Err(ApiError::new(
                        ErrorCode::InvalidTransition,
                        "lead mode cannot be reverted to participant",
                    ));
                }
                (Some(Mode::Participant), Mode::Lead) => {
                    ctx.storage
                        .promote_to_lead(&identity.subject)
                        .await
                        .map_err(internal)?;
                }
                _ => {}
            }
        }
    }

    let group_no = if identity.is_teacher() {
        None
    } else {
        patch.group_no.as_deref()
    };
    let updated = ctx
        .storage
        .update_contact_fields(&identity.subject, patch.telegram.as_deref(), group_no)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "profile not found"))?;

    Ok(profile_out(identity, updated))
}

// ---- project/team aggregate ----

pub async fn create_project(
    ctx: &ApiContext,
    identity: &Identity,
    payload: &ProjectCreate,
) -> Result<ProjectOut, ApiError> {
    let _guard = ctx.maintenance.read().await;
    let profile = sync_profile_from_claims(ctx, identity).await?;
    if identity.is_teacher() || profile.mode != Some(Mode::Lead) {
        return Err(forbidden());
    }

    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "name must not be empty"));
    }
    check_description(payload.description.as_deref())?;

    let outcome = ctx
        .storage
        .create_project(
            &identity.subject,
            name,
            payload.description.as_deref(),
            payload.repo_url.as_deref(),
            payload.tracker_url.as_deref(),
            payload.mobile_repo_url.as_deref(),
        )
        .await
        .map_err(internal)?;

    match outcome {
        CreateProjectOutcome::Created(project) => Ok(project_out(project)),
        CreateProjectOutcome::LeadHasProject => Err(ApiError::new(
            ErrorCode::Conflict,
            "lead already owns a project",
        )),
        CreateProjectOutcome::AlreadyInTeam => Err(ApiError::new(
            ErrorCode::Conflict,
            "subject already belongs to a team",
        )),
    }
}

/// Teacher sees every project, a student only the team they belong to.
pub async fn list_projects(
    ctx: &ApiContext,
    identity: &Identity,
) -> Result<Vec<ProjectOut>, ApiError> {
    let _guard = ctx.maintenance.read().await;
    let projects = match identity.role {
        RoleKind::Teacher => ctx.storage.list_projects().await.map_err(internal)?,
        RoleKind::Student => ctx
            .storage
            .list_projects_for_subject(&identity.subject)
            .await
            .map_err(internal)?,
    };
    Ok(projects.into_iter().map(project_out).collect())
}

pub async fn get_project(
    ctx: &ApiContext,
    identity: &Identity,
    project_id: ProjectId,
) -> Result<ProjectOut, ApiError> {
    let _guard = ctx.maintenance.read().await;
    let project = visible_project(ctx, identity, project_id).await?;
    Ok(project_out(project))
}

pub async fn update_project(
    ctx: &ApiContext,
    identity: &Identity,
    project_id: ProjectId,
    patch: &ProjectPatch,
) -> Result<ProjectOut, ApiError> {
    let _guard = ctx.maintenance.read().await;
    owned_project(ctx, identity, project_id).await?;

    if let Some(name) = patch.name.as_deref() {
        if name.trim().is_empty() {
            return Err(ApiError::new(ErrorCode::Validation, "name must not be empty"));
        }
    }
    check_description(patch.description.as_deref())?;

    let changes = ProjectChanges {
        name: patch.name.clone(),
        description: patch.description.clone(),
        repo_url: patch.repo_url.clone(),
        tracker_url: patch.tracker_url.clone(),
        mobile_repo_url: patch.mobile_repo_url.clone(),
    };
    match ctx
        .storage
        .update_project(project_id, &changes)
        .await
        .map_err(internal)?
    {
        UpdateProjectOutcome::Updated(project) => Ok(project_out(project)),
        UpdateProjectOutcome::Missing => Err(not_found("project not found")),
        UpdateProjectOutcome::MobileRepoRequired => Err(ApiError::new(
            ErrorCode::Validation,
            "a team of five requires mobile_repo_url",
        )),
    }
}

pub async fn add_member(
    ctx: &ApiContext,
    identity: &Identity,
    project_id: ProjectId,
    payload: &MemberAdd,
) -> Result<MemberOut, ApiError> {
    let _guard = ctx.maintenance.read().await;
    owned_project(ctx, identity, project_id).await?;

    let member_profile = ctx
        .storage
        .profile(&payload.member_sub)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Validation, "no such student"))?;
    if member_profile.is_teacher {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "only students can join a team",
        ));
    }

    let outcome = ctx
        .storage
        .add_member(project_id, &payload.member_sub, payload.role_in_team.as_deref())
        .await
        .map_err(internal)?;

    match outcome {
        AddMemberOutcome::Added(member) => Ok(MemberOut {
            id: member.id,
            project_id: member.project_id,
            member_sub: member.member_sub,
            role_in_team: member.role_in_team,
            full_name: member_profile.full_name,
        }),
        AddMemberOutcome::ProjectMissing => Err(not_found("project not found")),
        AddMemberOutcome::AlreadyInTeam => Err(ApiError::new(
            ErrorCode::Conflict,
            "subject already belongs to a team",
        )),
        AddMemberOutcome::CapacityExceeded => Err(ApiError::new(
            ErrorCode::CapacityExceeded,
            "team is full",
        )),
        AddMemberOutcome::MobileRepoRequired => Err(ApiError::new(
            ErrorCode::Validation,
            "a team of five requires mobile_repo_url",
        )),
    }
}

pub async fn list_members(
    ctx: &ApiContext,
    identity: &Identity,
    project_id: ProjectId,
) -> Result<Vec<MemberOut>, ApiError> {
    let _guard = ctx.maintenance.read().await;
    visible_project(ctx, identity, project_id).await?;
    let members = ctx.storage.members_of(project_id).await.map_err(internal)?;
    Ok(members
        .into_iter()
        .map(|member| MemberOut {
            id: member.id,
            project_id: member.project_id,
            member_sub: member.member_sub,
            role_in_team: member.role_in_team,
            full_name: member.full_name,
        })
        .collect())
}

// ---- milestone catalog ----

pub async fn publish_milestone(
    ctx: &ApiContext,
    identity: &Identity,
    payload: &MilestoneCreate,
) -> Result<MilestoneOut, ApiError> {
    let _guard = ctx.maintenance.read().await;
    ensure_teacher(identity)?;

    let title = payload.title.trim();
    if title.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "title must not be empty"));
    }
    if let Some(deadline) = payload.deadline.as_deref() {
        NaiveDate::parse_from_str(deadline, "%Y-%m-%d").map_err(|_| {
            ApiError::new(ErrorCode::Validation, "deadline must be YYYY-MM-DD")
        })?;
    }

    let milestone = ctx
        .storage
        .create_milestone(title, payload.deadline.as_deref())
        .await
        .map_err(internal)?;
    Ok(milestone_out(milestone))
}

pub async fn list_milestones(ctx: &ApiContext) -> Result<Vec<MilestoneOut>, ApiError> {
    let _guard = ctx.maintenance.read().await;
    let milestones = ctx.storage.list_milestones().await.map_err(internal)?;
    Ok(milestones.into_iter().map(milestone_out).collect())
}

/// Joined view: every published milestone, oldest first, with this
/// project's submission state (or an empty row where nothing happened yet).
pub async fn milestones_with_state(
    ctx: &ApiContext,
    identity: &Identity,
    project_id: ProjectId,
) -> Result<Vec<SubmissionOut>, ApiError> {
    let _guard = ctx.maintenance.read().await;
    visible_project(ctx, identity, project_id).await?;

    let milestones = ctx
        .storage
        .list_milestones_oldest_first()
        .await
        .map_err(internal)?;
    let submissions = ctx
        .storage
        .submissions_for_project(project_id)
        .await
        .map_err(internal)?;
    let mut by_milestone: HashMap<MilestoneId, StoredSubmission> = submissions
        .into_iter()
        .map(|s| (s.milestone_id, s))
        .collect();

    Ok(milestones
        .into_iter()
        .map(|milestone| match by_milestone.remove(&milestone.id) {
            Some(submission) => submission_out(submission),
            None => SubmissionOut {
                project_id,
                milestone_id: milestone.id,
                grade: None,
                presentation_ref: None,
                report_ref: None,
                graded_by: None,
                graded_at: None,
            },
        })
        .collect())
}

// ---- submissions & grading ----

/// Records an uploaded artifact reference. Any current member of the team
/// or the teacher may upload; the reference itself is opaque here.
pub async fn record_artifact(
    ctx: &ApiContext,
    identity: &Identity,
    project_id: ProjectId,
    milestone_id: MilestoneId,
    kind: ArtifactKind,
    artifact_ref: &str,
) -> Result<SubmissionOut, ApiError> {
    let _guard = ctx.maintenance.read().await;
    visible_project(ctx, identity, project_id).await?;
    ensure_milestone(ctx, milestone_id).await?;

    let submission = ctx
        .storage
        .set_artifact_ref(project_id, milestone_id, kind, artifact_ref)
        .await
        .map_err(internal)?;
    Ok(submission_out(submission))
}

/// Resolves a previously recorded artifact reference for download.
pub async fn artifact_ref(
    ctx: &ApiContext,
    identity: &Identity,
    project_id: ProjectId,
    milestone_id: MilestoneId,
    kind: ArtifactKind,
) -> Result<String, ApiError> {
    let _guard = ctx.maintenance.read().await;
    visible_project(ctx, identity, project_id).await?;

    let submission = ctx
        .storage
        .submission(project_id, milestone_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("nothing submitted"))?;
    let reference = match kind {
        ArtifactKind::Presentation => submission.presentation_ref,
        ArtifactKind::Report => submission.report_ref,
    };
    reference.ok_or_else(|| not_found("artifact not uploaded"))
}

pub async fn set_grade(
    ctx: &ApiContext,
    identity: &Identity,
    project_id: ProjectId,
    milestone_id: MilestoneId,
    payload: &GradeSet,
) -> Result<SubmissionOut, ApiError> {
    let _guard = ctx.maintenance.read().await;
    ensure_teacher(identity)?;
    if ctx
        .storage
        .project(project_id)
        .await
        .map_err(internal)?
        .is_none()
    {
        return Err(not_found("project not found"));
    }
    ensure_milestone(ctx, milestone_id).await?;
    if !(0..=5).contains(&payload.grade) {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "grade must be an integer between 0 and 5",
        ));
    }

    let submission = ctx
        .storage
        .set_grade(project_id, milestone_id, payload.grade, &identity.subject)
        .await
        .map_err(internal)?;
    Ok(submission_out(submission))
}

// ---- rating ----

/// Derived, side-effect free view: per-project grade sequence and mean,
/// sorted by mean descending then project id.
pub async fn compute_rating(
    ctx: &ApiContext,
    identity: &Identity,
) -> Result<Vec<RatingRow>, ApiError> {
    let _guard = ctx.maintenance.read().await;
    ensure_teacher(identity)?;

    let mut rows: Vec<RatingRow> = ctx
        .storage
        .rating_snapshot()
        .await
        .map_err(internal)?
        .into_iter()
        .map(|source| {
            let avg_grade = (!source.grades.is_empty()).then(|| {
                source.grades.iter().sum::<i64>() as f64 / source.grades.len() as f64
            });
            RatingRow {
                project_id: source.project_id,
                project_name: source.project_name,
                team_size: source.team_size as usize,
                grades: source.grades,
                avg_grade,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        let a_avg = a.avg_grade.unwrap_or(f64::NEG_INFINITY);
        let b_avg = b.avg_grade.unwrap_or(f64::NEG_INFINITY);
        b_avg
            .partial_cmp(&a_avg)
            .unwrap_or(Ordering::Equal)
            .then(a.project_id.0.cmp(&b.project_id.0))
    });
    Ok(rows)
}

// ---- administrative wipe ----

/// Deletes every project, membership, milestone, submission, and
/// non-teacher profile. Exclusive against all other commands while in
/// flight; irreversible.
pub async fn wipe_all(
    ctx: &ApiContext,
    identity: &Identity,
    confirmation: &str,
) -> Result<WipeSummary, ApiError> {
    ensure_teacher(identity)?;
    if confirmation != WIPE_CONFIRMATION_PHRASE {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "confirmation phrase does not match",
        ));
    }

    let _guard = ctx.maintenance.write().await;
    let counts = ctx.storage.wipe_all().await.map_err(internal)?;
    info!(
        subject = %identity.subject,
        projects = counts.projects,
        profiles = counts.student_profiles,
        "administrative wipe executed"
    );
    Ok(WipeSummary {
        submissions: counts.submissions,
        members: counts.members,
        projects: counts.projects,
        milestones: counts.milestones,
        student_profiles: counts.student_profiles,
    })
}

// ---- authorization gate helpers ----

fn ensure_teacher(identity: &Identity) -> Result<(), ApiError> {
    if identity.is_teacher() {
        Ok(())
    } else {
        Err(forbidden())
    }
}

/// Visibility rule for project reads: the teacher sees everything, a team
/// member sees their own project, everyone else gets `NotFound` so the
/// project's existence does not leak.
async fn visible_project(
    ctx: &ApiContext,
    identity: &Identity,
    project_id: ProjectId,
) -> Result<StoredProject, ApiError> {
    let project = ctx
        .storage
        .project(project_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("project not found"))?;
    if identity.is_teacher() || project.lead_sub == identity.subject {
        return Ok(project);
    }
    if ctx
        .storage
        .is_team_member(project_id, &identity.subject)
        .await
        .map_err(internal)?
    {
        return Ok(project);
    }
    Err(not_found("project not found"))
}

/// Write rule for project mutations: only the lead. Members get
/// `Forbidden` (they can see the project), outsiders keep getting
/// `NotFound`.
async fn owned_project(
    ctx: &ApiContext,
    identity: &Identity,
    project_id: ProjectId,
) -> Result<StoredProject, ApiError> {
    let project = ctx
        .storage
        .project(project_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("project not found"))?;
    if project.lead_sub == identity.subject {
        return Ok(project);
    }
    if identity.is_teacher()
        || ctx
            .storage
            .is_team_member(project_id, &identity.subject)
            .await
            .map_err(internal)?
    {
        return Err(forbidden());
    }
    Err(not_found("project not found"))
}

async fn ensure_milestone(ctx: &ApiContext, milestone_id: MilestoneId) -> Result<(), ApiError> {
    ctx.storage
        .milestone(milestone_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("milestone not found"))?;
    Ok(())
}

async fn sync_profile_from_claims(
    ctx: &ApiContext,
    identity: &Identity,
) -> Result<StoredProfile, ApiError> {
    ctx.storage
        .upsert_profile_claims(
            &identity.subject,
            identity.is_teacher(),
            identity.full_name.as_deref(),
            identity.email.as_deref(),
        )
        .await
        .map_err(internal)
}

// ---- mapping helpers ----

fn profile_out(identity: &Identity, profile: StoredProfile) -> ProfileOut {
    ProfileOut {
        subject: profile.sub,
        role: identity.role,
        mode: profile.mode,
        full_name: profile.full_name,
        email_corp: profile.email_corp,
        telegram: profile.telegram,
        group_no: profile.group_no,
    }
}

fn project_out(project: StoredProject) -> ProjectOut {
    ProjectOut {
        id: project.id,
        name: project.name,
        description: project.description,
        repo_url: project.repo_url,
        tracker_url: project.tracker_url,
        mobile_repo_url: project.mobile_repo_url,
        lead_sub: project.lead_sub,
    }
}

fn milestone_out(milestone: StoredMilestone) -> MilestoneOut {
    MilestoneOut {
        id: milestone.id,
        title: milestone.title,
        deadline: milestone.deadline,
        created_at: milestone.created_at,
    }
}

fn submission_out(submission: StoredSubmission) -> SubmissionOut {
    SubmissionOut {
        project_id: submission.project_id,
        milestone_id: submission.milestone_id,
        grade: submission.grade,
        presentation_ref: submission.presentation_ref,
        report_ref: submission.report_ref,
        graded_by: submission.graded_by,
        graded_at: submission.graded_at,
    }
}

fn check_description(description: Option<&str>) -> Result<(), ApiError> {
    if let Some(description) = description {
        if description.chars().count() > DESCRIPTION_MAX_CHARS {
            return Err(ApiError::new(
                ErrorCode::Validation,
                "description exceeds 3000 characters",
            ));
        }
    }
    Ok(())
}

fn forbidden() -> ApiError {
    ApiError::new(ErrorCode::Forbidden, "not allowed")
}

fn not_found(message: &str) -> ApiError {
    ApiError::new(ErrorCode::NotFound, message)
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
