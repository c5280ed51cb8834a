//! Resume-policy scenarios: FromVolume restart and LongRunning.

mod common;

use common::{make_experiment, Harness, NS};
use tunelab::adapters::algorithms::MockAlgorithmClient;
use tunelab::domain::models::{ExperimentConditionType, ResumePolicy};

#[tokio::test]
async fn test_from_volume_restart_continues_search() {
    let h = Harness::new(MockAlgorithmClient::new()).await;
    let exp = make_experiment("tune", |spec| {
        spec.parallel_trial_count = 2;
        spec.max_trial_count = Some(2);
        spec.resume_policy = ResumePolicy::FromVolume;
    });
    h.experiments.create(&exp).await.unwrap();

    // Run the first two trials to completion.
    h.settle("tune").await;
    for name in h.trial_names("tune").await {
        h.finish_trial(&name, 0.5).await;
    }
    h.settle("tune").await;

    let exp = h.experiment("tune").await;
    assert!(exp.is_succeeded());
    // FromVolume parks the worker but keeps the state volume.
    assert!(!h.workers.is_deployed("tune-random"));
    assert!(h.workers.has_volume("tune-random-default"));
    assert!(h
        .workers
        .scaled_to_zero()
        .contains(&"tune-random".to_string()));

    // The user raises the budget; the experiment restarts.
    let mut stored = h.experiment("tune").await;
    stored.spec.max_trial_count = Some(5);
    h.experiments.update(&stored).await.unwrap();

    h.reconcile_experiment("tune").await.unwrap();
    let exp = h.experiment("tune").await;
    assert!(exp.is_restarting());
    assert!(!exp.is_succeeded());
    assert!(exp.status.completion_time.is_none());
    let suggestion = h.suggestion("tune").await;
    assert!(!suggestion.is_succeeded());

    // The worker scales back up and three more trials run.
    h.settle("tune").await;
    assert!(h.workers.is_deployed("tune-random"));
    for name in h.trial_names("tune").await {
        h.finish_trial(&name, 0.5).await;
    }
    h.settle("tune").await;
    // A second round may still be minting the last trial.
    for name in h.trial_names("tune").await {
        h.finish_trial(&name, 0.5).await;
    }
    h.settle("tune").await;

    let exp = h.experiment("tune").await;
    assert!(exp.is_succeeded());
    assert_eq!(exp.status.trial_counts.trials, 5);
    assert_eq!(exp.status.trial_counts.succeeded, 5);
}

#[tokio::test]
async fn test_never_resume_stays_terminal_when_budget_raised() {
    let h = Harness::new(MockAlgorithmClient::new()).await;
    let exp = make_experiment("tune", |spec| {
        spec.parallel_trial_count = 2;
        spec.max_trial_count = Some(2);
        spec.resume_policy = ResumePolicy::NeverResume;
    });
    h.experiments.create(&exp).await.unwrap();
    h.settle("tune").await;
    for name in h.trial_names("tune").await {
        h.finish_trial(&name, 0.5).await;
    }
    h.settle("tune").await;
    assert!(h.experiment("tune").await.is_succeeded());

    let mut stored = h.experiment("tune").await;
    stored.spec.max_trial_count = Some(5);
    h.experiments.update(&stored).await.unwrap();
    h.settle("tune").await;

    let exp = h.experiment("tune").await;
    assert!(exp.is_succeeded());
    assert!(!exp.is_restarting());
    assert_eq!(exp.status.trial_counts.trials, 2);
}

#[tokio::test]
async fn test_long_running_keeps_worker_alive_and_resumes() {
    let h = Harness::new(MockAlgorithmClient::new()).await;
    let exp = make_experiment("tune", |spec| {
        spec.parallel_trial_count = 2;
        spec.max_trial_count = Some(2);
        spec.resume_policy = ResumePolicy::LongRunning;
    });
    h.experiments.create(&exp).await.unwrap();
    h.settle("tune").await;
    for name in h.trial_names("tune").await {
        h.finish_trial(&name, 0.5).await;
    }
    h.settle("tune").await;

    let exp = h.experiment("tune").await;
    assert!(exp.is_succeeded());
    // The suggestion stays open and the worker stays live.
    let suggestion = h.suggestion("tune").await;
    assert!(!suggestion.is_succeeded());
    assert!(h.workers.is_deployed("tune-random"));

    // Raising the cap continues the search without a Restarting detour.
    let mut stored = h.experiment("tune").await;
    stored.spec.max_trial_count = Some(3);
    h.experiments.update(&stored).await.unwrap();
    h.reconcile_experiment("tune").await.unwrap();
    let exp = h.experiment("tune").await;
    assert!(!exp.is_succeeded());
    assert!(!exp
        .status
        .conditions
        .is_true(ExperimentConditionType::Restarting));

    h.settle("tune").await;
    for name in h.trial_names("tune").await {
        h.finish_trial(&name, 0.5).await;
    }
    h.settle("tune").await;

    let exp = h.experiment("tune").await;
    assert!(exp.is_succeeded());
    assert_eq!(exp.status.trial_counts.succeeded, 3);
    assert_eq!(
        h.trials.list_by_owner(NS, "tune").await.unwrap().len(),
        3
    );
}
