use super::*;

async fn mem() -> Storage {
    Storage::new("sqlite::memory:").await.expect("db")
}

fn sub(s: &str) -> SubjectId {
    SubjectId(s.to_string())
}

async fn lead_with_project(storage: &Storage, who: &str, mobile: Option<&str>) -> StoredProject {
    let lead = sub(who);
    storage
        .upsert_profile_claims(&lead, false, Some("Lead"), None)
        .await
        .expect("profile");
    storage.promote_to_lead(&lead).await.expect("promote");
    match storage
        .create_project(&lead, "proj", None, None, None, mobile)
        .await
        .expect("create")
    {
        CreateProjectOutcome::Created(project) => project,
        other => panic!("expected created project, got {other:?}"),
    }
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = mem().await;
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = std::env::temp_dir().join(format!("tracker_storage_test_{suffix}"));
    let db_path = temp_root.join("nested").join("storage.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );

    std::fs::remove_dir_all(temp_root).expect("cleanup");
}

#[tokio::test]
async fn profile_upsert_keeps_mode_across_resync() {
    let storage = mem().await;
    let alice = sub("alice");

    let created = storage
        .upsert_profile_claims(&alice, false, Some("Alice A"), Some("alice@corp"))
        .await
        .expect("create");
    assert_eq!(created.mode, Some(Mode::Participant));

    storage.promote_to_lead(&alice).await.expect("promote");
    let resynced = storage
        .upsert_profile_claims(&alice, false, Some("Alice A"), None)
        .await
        .expect("resync");
    assert_eq!(resynced.mode, Some(Mode::Lead));
    assert_eq!(resynced.email_corp.as_deref(), Some("alice@corp"));
}

#[tokio::test]
async fn teacher_profile_has_no_mode() {
    let storage = mem().await;
    let prof = storage
        .upsert_profile_claims(&sub("prof"), true, Some("Prof"), None)
        .await
        .expect("profile");
    assert!(prof.is_teacher);
    assert_eq!(prof.mode, None);
}

#[tokio::test]
async fn create_project_inserts_lead_membership_row() {
    let storage = mem().await;
    let project = lead_with_project(&storage, "alice", None).await;

    let members = storage.members_of(project.id).await.expect("members");
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].member_sub, sub("alice"));
    assert_eq!(members[0].role_in_team.as_deref(), Some("lead"));

    let visible = storage
        .list_projects_for_subject(&sub("alice"))
        .await
        .expect("list");
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id, project.id);
}

#[tokio::test]
async fn lead_cannot_create_second_project() {
    let storage = mem().await;
    lead_with_project(&storage, "alice", None).await;

    let second = storage
        .create_project(&sub("alice"), "again", None, None, None, None)
        .await
        .expect("outcome");
    assert!(matches!(second, CreateProjectOutcome::LeadHasProject));
}

#[tokio::test]
async fn member_belongs_to_at_most_one_project() {
    let storage = mem().await;
    let first = lead_with_project(&storage, "alice", None).await;
    let second = lead_with_project(&storage, "carol", None).await;

    let added = storage
        .add_member(first.id, &sub("bob"), None)
        .await
        .expect("add");
    assert!(matches!(added, AddMemberOutcome::Added(_)));

    let rejected = storage
        .add_member(second.id, &sub("bob"), Some("qa"))
        .await
        .expect("add");
    assert!(matches!(rejected, AddMemberOutcome::AlreadyInTeam));
}

#[tokio::test]
async fn fifth_member_requires_mobile_repo_url() {
    let storage = mem().await;
    let project = lead_with_project(&storage, "alice", None).await;

    for name in ["bob", "carol", "dave"] {
        let added = storage
            .add_member(project.id, &sub(name), None)
            .await
            .expect("add");
        assert!(matches!(added, AddMemberOutcome::Added(_)));
    }
    assert_eq!(storage.team_size(project.id).await.expect("size"), 4);

    let blocked = storage
        .add_member(project.id, &sub("erin"), None)
        .await
        .expect("add");
    assert!(matches!(blocked, AddMemberOutcome::MobileRepoRequired));

    let changes = ProjectChanges {
        mobile_repo_url: Some("https://github.com/team/mobile".into()),
        ..ProjectChanges::default()
    };
    let updated = storage
        .update_project(project.id, &changes)
        .await
        .expect("update");
    assert!(matches!(updated, UpdateProjectOutcome::Updated(_)));

    let fifth = storage
        .add_member(project.id, &sub("erin"), None)
        .await
        .expect("add");
    assert!(matches!(fifth, AddMemberOutcome::Added(_)));

    let sixth = storage
        .add_member(project.id, &sub("frank"), None)
        .await
        .expect("add");
    assert!(matches!(sixth, AddMemberOutcome::CapacityExceeded));
}

#[tokio::test]
async fn full_team_cannot_clear_mobile_repo_url() {
    let storage = mem().await;
    let project = lead_with_project(&storage, "alice", Some("https://mobile")).await;
    for name in ["bob", "carol", "dave", "erin"] {
        let added = storage
            .add_member(project.id, &sub(name), None)
            .await
            .expect("add");
        assert!(matches!(added, AddMemberOutcome::Added(_)));
    }

    let changes = ProjectChanges {
        mobile_repo_url: Some(String::new()),
        ..ProjectChanges::default()
    };
    let blocked = storage
        .update_project(project.id, &changes)
        .await
        .expect("update");
    assert!(matches!(blocked, UpdateProjectOutcome::MobileRepoRequired));

    let current = storage
        .project(project.id)
        .await
        .expect("project")
        .expect("exists");
    assert_eq!(current.mobile_repo_url.as_deref(), Some("https://mobile"));
}

#[tokio::test]
async fn update_project_patches_only_named_fields() {
    let storage = mem().await;
    let project = lead_with_project(&storage, "alice", None).await;

    let changes = ProjectChanges {
        description: Some("new description".into()),
        ..ProjectChanges::default()
    };
    let outcome = storage
        .update_project(project.id, &changes)
        .await
        .expect("update");
    let UpdateProjectOutcome::Updated(updated) = outcome else {
        panic!("expected update");
    };
    assert_eq!(updated.name, "proj");
    assert_eq!(updated.description.as_deref(), Some("new description"));
}

#[tokio::test]
async fn grade_upsert_is_last_write_wins() {
    let storage = mem().await;
    let project = lead_with_project(&storage, "alice", None).await;
    let milestone = storage
        .create_milestone("MVP", Some("2025-05-01"))
        .await
        .expect("milestone");

    let first = storage
        .set_grade(project.id, milestone.id, 3, &sub("prof"))
        .await
        .expect("grade");
    assert_eq!(first.grade, Some(3));

    let second = storage
        .set_grade(project.id, milestone.id, 5, &sub("prof"))
        .await
        .expect("grade");
    assert_eq!(second.grade, Some(5));
    assert_eq!(second.graded_by, Some(sub("prof")));
    assert!(second.graded_at.is_some());

    let rows = storage
        .submissions_for_project(project.id)
        .await
        .expect("rows");
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn artifact_ref_replaces_named_slot_only() {
    let storage = mem().await;
    let project = lead_with_project(&storage, "alice", None).await;
    let milestone = storage
        .create_milestone("MVP", None)
        .await
        .expect("milestone");

    storage
        .set_artifact_ref(project.id, milestone.id, ArtifactKind::Report, "r1.pdf")
        .await
        .expect("report");
    let state = storage
        .set_artifact_ref(
            project.id,
            milestone.id,
            ArtifactKind::Presentation,
            "slides.pdf",
        )
        .await
        .expect("presentation");
    assert_eq!(state.report_ref.as_deref(), Some("r1.pdf"));
    assert_eq!(state.presentation_ref.as_deref(), Some("slides.pdf"));

    let replaced = storage
        .set_artifact_ref(project.id, milestone.id, ArtifactKind::Report, "r2.pdf")
        .await
        .expect("report");
    assert_eq!(replaced.report_ref.as_deref(), Some("r2.pdf"));
    assert_eq!(replaced.presentation_ref.as_deref(), Some("slides.pdf"));
}

#[tokio::test]
async fn rating_snapshot_groups_grades_by_project() {
    let storage = mem().await;
    let project = lead_with_project(&storage, "alice", None).await;
    storage
        .add_member(project.id, &sub("bob"), None)
        .await
        .expect("add");
    let m1 = storage.create_milestone("m1", None).await.expect("m1");
    let m2 = storage.create_milestone("m2", None).await.expect("m2");

    storage
        .set_grade(project.id, m2.id, 5, &sub("prof"))
        .await
        .expect("grade");
    storage
        .set_grade(project.id, m1.id, 3, &sub("prof"))
        .await
        .expect("grade");
    // artifact-only submission contributes no grade
    let ungraded = lead_with_project(&storage, "carol", None).await;
    storage
        .set_artifact_ref(ungraded.id, m1.id, ArtifactKind::Report, "r.pdf")
        .await
        .expect("artifact");

    let snapshot = storage.rating_snapshot().await.expect("snapshot");
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].project_id, project.id);
    assert_eq!(snapshot[0].team_size, 2);
    assert_eq!(snapshot[0].grades, vec![3, 5]);
    assert!(snapshot[1].grades.is_empty());
}

#[tokio::test]
async fn wipe_all_spares_teacher_profiles() {
    let storage = mem().await;
    storage
        .upsert_profile_claims(&sub("prof"), true, Some("Prof"), None)
        .await
        .expect("teacher");
    let project = lead_with_project(&storage, "alice", None).await;
    let milestone = storage.create_milestone("m1", None).await.expect("m1");
    storage
        .set_grade(project.id, milestone.id, 4, &sub("prof"))
        .await
        .expect("grade");

    let counts = storage.wipe_all().await.expect("wipe");
    assert_eq!(counts.projects, 1);
    assert_eq!(counts.members, 1);
    assert_eq!(counts.milestones, 1);
    assert_eq!(counts.submissions, 1);
    assert_eq!(counts.student_profiles, 1);

    assert!(storage.project(project.id).await.expect("read").is_none());
    assert!(storage.profile(&sub("alice")).await.expect("read").is_none());
    assert!(storage.profile(&sub("prof")).await.expect("read").is_some());
}
