use std::sync::{Arc, Barrier};
use std::thread;

use super::common::*;
use crate::workflows::access::{AccessDenied, Caller, Role};
use crate::workflows::ids::{SchoolId, UserId};
use crate::workflows::notify::RecordingNotifier;
use crate::workflows::promotion::domain::{
    EnrollmentRequest, EssayReviewRequest, EssaySubmission, NewBelt, NewProgram,
    ProgramOwnership, ProgramQuery, ProgressUpdate, PromotionRequest, RequirementKind,
};
use crate::workflows::promotion::repository::{
    PromotionReader, PromotionRepository, RepositoryError,
};
use crate::workflows::promotion::{
    InMemoryPromotionStore, PromotionService, PromotionServiceError,
};

#[test]
fn fresh_enrollment_targets_white_and_is_not_ready() {
    let dojo = KarateDojo::open();

    let status = dojo
        .service
        .evaluate(&instructor(), &dojo.enrollment.id)
        .expect("evaluates");

    assert_eq!(status.next_belt, Some(dojo.white.clone()));
    assert!(!status.ready_for_promotion);
    assert_eq!(status.requirements.len(), 1);
    assert_eq!(status.requirements[0].requirement.id, dojo.attendance.id);
}

#[test]
fn promotion_moves_one_belt_and_writes_exactly_one_history_row() {
    let dojo = KarateDojo::open();

    let entry = dojo.earn_white();

    assert_eq!(entry.from_belt_id, None);
    assert_eq!(entry.to_belt_id, dojo.white.id);
    assert_eq!(entry.promoted_by, instructor().user_id);

    let stored = dojo
        .store
        .enrollment(&dojo.enrollment.id)
        .expect("read")
        .expect("present");
    assert_eq!(stored.current_belt_id, Some(dojo.white.id.clone()));

    let history = dojo
        .service
        .promotion_history(&instructor(), &dojo.enrollment.id)
        .expect("history");
    assert_eq!(history, vec![entry]);
    assert_eq!(dojo.notifier.templates(), vec!["belt_promoted".to_string()]);
}

#[test]
fn promotion_is_refused_until_required_items_are_done() {
    let dojo = KarateDojo::open();

    let err = dojo
        .service
        .promote(
            &instructor(),
            &dojo.enrollment.id,
            PromotionRequest::to(dojo.white.id.clone()),
            at(3),
        )
        .expect_err("not ready");

    match err {
        PromotionServiceError::NotReady { belt, missing } => {
            assert_eq!(belt, "White");
            assert_eq!(missing, vec!["Attend 10 classes".to_string()]);
        }
        other => panic!("expected NotReady, got {other:?}"),
    }
    assert!(dojo
        .store
        .history(&dojo.enrollment.id)
        .expect("history")
        .is_empty());
    assert!(dojo.notifier.events().is_empty());
}

#[test]
fn retrying_a_promotion_for_the_same_belt_reports_already_promoted() {
    let dojo = KarateDojo::open();
    dojo.earn_white();

    let retry = dojo.service.promote(
        &instructor(),
        &dojo.enrollment.id,
        PromotionRequest::to(dojo.white.id.clone()),
        at(3),
    );

    assert!(matches!(
        retry,
        Err(PromotionServiceError::AlreadyPromoted { ref belt }) if belt == "White"
    ));
    assert_eq!(
        dojo.store
            .history(&dojo.enrollment.id)
            .expect("history")
            .len(),
        1
    );
}

#[test]
fn racing_promotions_grant_the_belt_once() {
    let dojo = KarateDojo::open();
    dojo.complete(&dojo.attendance, 10);
    let gate = Barrier::new(2);
    let (dojo_ref, gate_ref) = (&dojo, &gate);

    let outcomes: Vec<_> = thread::scope(|scope| {
        let desks: Vec<_> = (0..2)
            .map(|_| {
                scope.spawn(move || {
                    gate_ref.wait();
                    dojo_ref.service.promote(
                        &instructor(),
                        &dojo_ref.enrollment.id,
                        PromotionRequest::to(dojo_ref.white.id.clone()),
                        at(3),
                    )
                })
            })
            .collect();
        desks
            .into_iter()
            .map(|desk| desk.join().expect("promotion thread"))
            .collect()
    });

    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
    assert!(outcomes.iter().any(|outcome| matches!(
        outcome,
        Err(PromotionServiceError::AlreadyPromoted { belt }) if belt == "White"
    )));

    let stored = dojo
        .store
        .enrollment(&dojo.enrollment.id)
        .expect("read")
        .expect("present");
    assert_eq!(stored.current_belt_id, Some(dojo.white.id.clone()));
    assert_eq!(
        dojo.store
            .history(&dojo.enrollment.id)
            .expect("history")
            .len(),
        1
    );
    assert_eq!(dojo.notifier.templates().len(), 1);
}

#[test]
fn back_to_back_promotions_do_not_skip_past_an_open_belt() {
    let dojo = KarateDojo::open();
    dojo.earn_white();

    // Yellow has no required items, so only the named target keeps this from advancing.
    let repeat = dojo.service.promote(
        &instructor(),
        &dojo.enrollment.id,
        PromotionRequest::to(dojo.white.id.clone()).with_notes("second desk"),
        at(3),
    );

    assert!(matches!(
        repeat,
        Err(PromotionServiceError::AlreadyPromoted { .. })
    ));
    let status = dojo
        .service
        .evaluate(&instructor(), &dojo.enrollment.id)
        .expect("evaluates");
    assert_eq!(status.next_belt, Some(dojo.yellow.clone()));
    assert!(status.ready_for_promotion);
}

#[test]
fn promotions_cannot_skip_a_rank() {
    let dojo = KarateDojo::open();
    dojo.complete(&dojo.attendance, 10);

    let skip = dojo.service.promote(
        &instructor(),
        &dojo.enrollment.id,
        PromotionRequest::to(dojo.green.id.clone()),
        at(3),
    );

    assert!(matches!(skip, Err(PromotionServiceError::Validation(_))));
}

#[test]
fn climbing_past_the_top_belt_fails() {
    let dojo = KarateDojo::open();
    dojo.earn_white();
    for belt in [&dojo.yellow, &dojo.green] {
        let entry = dojo
            .service
            .promote(
                &instructor(),
                &dojo.enrollment.id,
                PromotionRequest::to(belt.id.clone())
                    .with_notes(format!("Earned {}", belt.name)),
                at(4),
            )
            .expect("promotes");
        assert_eq!(entry.to_belt_id, belt.id);
    }

    let status = dojo
        .service
        .evaluate(&student(), &dojo.enrollment.id)
        .expect("student views own progress");
    assert!(status.highest_rank_achieved);

    let err = dojo
        .service
        .promote(
            &instructor(),
            &dojo.enrollment.id,
            PromotionRequest::to(dojo.yellow.id.clone()),
            at(5),
        )
        .expect_err("no belt above green");
    assert!(matches!(err, PromotionServiceError::HighestRankAchieved));
    assert_eq!(err.status_code(), axum::http::StatusCode::CONFLICT);

    let late_retry = dojo
        .service
        .promote(
            &instructor(),
            &dojo.enrollment.id,
            PromotionRequest::to(dojo.green.id.clone()),
            at(5),
        )
        .expect_err("green already granted");
    assert!(matches!(
        late_retry,
        PromotionServiceError::AlreadyPromoted { ref belt } if belt == "Green"
    ));
}

#[test]
fn failed_history_write_rolls_back_the_belt_change() {
    let inner = Arc::new(InMemoryPromotionStore::default());
    let dojo = KarateDojo::open_with(inner.clone(), Arc::new(RecordingNotifier::default()));
    dojo.complete(&dojo.attendance, 10);

    let outage = Arc::new(HistoryOutageStore {
        inner: inner.clone(),
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let service = PromotionService::new(outage, dojo.roster.clone(), notifier.clone());

    let err = service
        .promote(
            &instructor(),
            &dojo.enrollment.id,
            PromotionRequest::to(dojo.white.id.clone()),
            at(3),
        )
        .expect_err("history write fails");

    assert!(matches!(
        err,
        PromotionServiceError::Repository(RepositoryError::Unavailable(_))
    ));
    let stored = inner
        .enrollment(&dojo.enrollment.id)
        .expect("read")
        .expect("present");
    assert_eq!(stored.current_belt_id, None);
    assert!(inner.history(&dojo.enrollment.id).expect("history").is_empty());
    assert!(notifier.events().is_empty());
}

#[test]
fn essay_requirement_completes_after_review() {
    let dojo = KarateDojo::open();
    add_requirement(
        &dojo.service,
        &dojo.yellow.id,
        RequirementKind::Essay,
        "Essay on the dojo kun",
        None,
        true,
    );
    dojo.earn_white();

    let essay = dojo
        .service
        .submit_essay(
            &student(),
            &dojo.enrollment.id,
            EssaySubmission {
                title: "Character".to_string(),
                content: "Seek perfection of character.".to_string(),
                test_id: None,
            },
            at(4),
        )
        .expect("student submits");
    assert_eq!(essay.target_belt_id, Some(dojo.yellow.id.clone()));

    let before = dojo
        .service
        .evaluate(&instructor(), &dojo.enrollment.id)
        .expect("evaluates");
    assert!(!before.ready_for_promotion);

    dojo.service
        .review_essay(
            &instructor(),
            &essay.id,
            EssayReviewRequest {
                score: 91,
                feedback: Some("Thoughtful".to_string()),
            },
            at(5),
        )
        .expect("reviewed");

    let after = dojo
        .service
        .evaluate(&instructor(), &dojo.enrollment.id)
        .expect("evaluates");
    assert!(after.ready_for_promotion);
    assert_eq!(after.requirements[0].current_value, 91);
}

#[test]
fn re_reviews_overwrite_the_score_and_keep_the_log() {
    let dojo = KarateDojo::open();
    let essay = dojo
        .service
        .submit_essay(
            &instructor(),
            &dojo.enrollment.id,
            EssaySubmission {
                title: "Why I train".to_string(),
                content: "Discipline.".to_string(),
                test_id: None,
            },
            at(4),
        )
        .expect("submitted");

    for (score, day) in [(55, 5), (80, 6)] {
        dojo.service
            .review_essay(
                &instructor(),
                &essay.id,
                EssayReviewRequest {
                    score,
                    feedback: None,
                },
                at(day),
            )
            .expect("reviewed");
    }

    let stored = dojo.store.essay(&essay.id).expect("read").expect("present");
    assert_eq!(stored.score, Some(80));
    assert_eq!(stored.reviewed_at, Some(at(6)));

    let reviews = dojo
        .service
        .essay_reviews(&instructor(), &essay.id)
        .expect("reviews");
    let scores: Vec<_> = reviews.iter().map(|review| review.score).collect();
    assert_eq!(scores, vec![55, 80]);
}

#[test]
fn essay_scores_outside_the_scale_are_rejected() {
    let dojo = KarateDojo::open();
    let essay = dojo
        .service
        .submit_essay(
            &student(),
            &dojo.enrollment.id,
            EssaySubmission {
                title: "Respect".to_string(),
                content: "Bow in, bow out.".to_string(),
                test_id: None,
            },
            at(4),
        )
        .expect("submitted");

    for score in [-1, 101] {
        let err = dojo
            .service
            .review_essay(
                &instructor(),
                &essay.id,
                EssayReviewRequest {
                    score,
                    feedback: None,
                },
                at(5),
            )
            .expect_err("out of range");
        assert!(matches!(err, PromotionServiceError::Validation(_)));
    }
}

#[test]
fn progress_updates_are_validated_against_the_next_belt() {
    let dojo = KarateDojo::open();
    let essay_requirement = add_requirement(
        &dojo.service,
        &dojo.white.id,
        RequirementKind::Essay,
        "White belt reflection",
        None,
        true,
    );
    let green_kata = add_requirement(
        &dojo.service,
        &dojo.green.id,
        RequirementKind::Technique,
        "Heian Sandan",
        None,
        true,
    );
    let update = ProgressUpdate {
        current_value: 1,
        is_complete: true,
    };

    let cases = [
        (&essay_requirement.id, update),
        (&green_kata.id, update),
        (
            &dojo.attendance.id,
            ProgressUpdate {
                current_value: -3,
                is_complete: false,
            },
        ),
    ];
    for (requirement_id, update) in cases {
        let err = dojo
            .service
            .update_progress(
                &instructor(),
                &dojo.enrollment.id,
                requirement_id,
                update,
                at(2),
            )
            .expect_err("rejected");
        assert!(matches!(err, PromotionServiceError::Validation(_)));
    }
}

#[test]
fn progress_upserts_keep_a_single_row() {
    let dojo = KarateDojo::open();
    let update = |value: i32| ProgressUpdate {
        current_value: value,
        is_complete: value >= 10,
    };

    let first = dojo
        .service
        .update_progress(
            &instructor(),
            &dojo.enrollment.id,
            &dojo.attendance.id,
            update(4),
            at(2),
        )
        .expect("recorded");
    let second = dojo
        .service
        .update_progress(
            &instructor(),
            &dojo.enrollment.id,
            &dojo.attendance.id,
            update(12),
            at(3),
        )
        .expect("recorded");

    assert_eq!(first.id, second.id);
    let rows = dojo.store.progress(&dojo.enrollment.id).expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].current_value, 12);
    assert!(rows[0].is_complete);
}

#[test]
fn other_schools_and_students_are_kept_out() {
    let dojo = KarateDojo::open();
    dojo.complete(&dojo.attendance, 10);

    let rival = dojo
        .service
        .evaluate(&rival_instructor(), &dojo.enrollment.id)
        .expect_err("other school");
    assert!(matches!(
        rival,
        PromotionServiceError::Forbidden(AccessDenied::Forbidden { .. })
    ));

    let self_promotion = dojo
        .service
        .promote(
            &student(),
            &dojo.enrollment.id,
            PromotionRequest::to(dojo.white.id.clone()),
            at(3),
        )
        .expect_err("students cannot promote");
    assert_eq!(
        self_promotion.status_code(),
        axum::http::StatusCode::FORBIDDEN
    );
}

#[test]
fn duplicate_enrollment_and_belt_order_are_rejected() {
    let dojo = KarateDojo::open();

    let again = dojo
        .service
        .enroll(
            &instructor(),
            EnrollmentRequest {
                student_id: student_id(),
                program_id: dojo.program.id.clone(),
            },
            at(2),
        )
        .expect_err("already enrolled");
    assert!(matches!(again, PromotionServiceError::Validation(_)));

    let clash = dojo
        .service
        .add_belt(
            &owner(),
            &dojo.program.id,
            NewBelt {
                name: "Orange".to_string(),
                display_order: 2,
                color: None,
                description: None,
            },
        )
        .expect_err("order taken");
    assert!(matches!(clash, PromotionServiceError::Validation(_)));
}

#[test]
fn withdrawing_removes_dependent_rows() {
    let dojo = KarateDojo::open();
    dojo.earn_white();

    dojo.service
        .withdraw(&owner(), &dojo.enrollment.id)
        .expect("withdrawn");

    assert!(dojo
        .store
        .enrollment(&dojo.enrollment.id)
        .expect("read")
        .is_none());
    assert!(dojo.store.history(&dojo.enrollment.id).expect("read").is_empty());
    assert!(dojo.store.progress(&dojo.enrollment.id).expect("read").is_empty());
    let err = dojo
        .service
        .evaluate(&instructor(), &dojo.enrollment.id)
        .expect_err("gone");
    assert!(matches!(err, PromotionServiceError::NotFound("enrollment")));
}

#[test]
fn global_programs_are_shared_but_only_authored_by_super_admins() {
    let dojo = KarateDojo::open();
    let request = NewProgram {
        name: "Little Dragons".to_string(),
        description: None,
        global: true,
        has_rank_structure: true,
        school_id: None,
    };

    let denied = dojo
        .service
        .create_program(&owner(), request.clone())
        .expect_err("owners cannot author global programs");
    assert!(matches!(denied, PromotionServiceError::Forbidden(_)));

    let global = dojo
        .service
        .create_program(&Caller::super_admin(UserId::new("user-root")), request)
        .expect("super admin creates");
    assert_eq!(global.ownership, ProgramOwnership::Global);

    let south_owner = Caller::staff(
        UserId::new("user-south"),
        Role::Owner,
        SchoolId::new("school-south"),
    );
    let south_programs = dojo
        .service
        .programs_for(&south_owner, ProgramQuery::default())
        .expect("lists");
    assert_eq!(south_programs, vec![global.clone()]);

    let north_programs = dojo
        .service
        .programs_for(&owner(), ProgramQuery::default())
        .expect("lists");
    assert_eq!(north_programs.len(), 2);
}

#[test]
fn super_admins_manage_a_named_school_catalog() {
    let dojo = KarateDojo::open();
    let root = Caller::super_admin(UserId::new("user-root"));

    let judo = dojo
        .service
        .create_program(
            &root,
            NewProgram {
                name: "Judo".to_string(),
                description: None,
                global: false,
                has_rank_structure: true,
                school_id: Some(school()),
            },
        )
        .expect("super admin creates for a named school");
    assert_eq!(judo.ownership, ProgramOwnership::School(school()));

    let listed = dojo
        .service
        .programs_for(
            &root,
            ProgramQuery {
                school_id: Some(school()),
            },
        )
        .expect("super admin lists a named school");
    assert_eq!(listed.len(), 2);

    let unnamed = dojo
        .service
        .programs_for(&root, ProgramQuery::default())
        .expect_err("no school to list");
    assert!(matches!(unnamed, PromotionServiceError::Validation(_)));

    let trespass = dojo
        .service
        .create_program(
            &rival_instructor(),
            NewProgram {
                name: "Aikido".to_string(),
                description: None,
                global: false,
                has_rank_structure: true,
                school_id: Some(school()),
            },
        )
        .expect_err("other schools cannot author here");
    assert!(matches!(trespass, PromotionServiceError::Forbidden(_)));
}
