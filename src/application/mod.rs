//! Application layer: the reconcile engine, the three controllers and
//! admission validation.

pub mod experiment_controller;
pub mod manager;
pub mod reconciler;
pub mod suggestion_controller;
pub mod trial_controller;
pub mod validation;

pub use experiment_controller::{ExperimentController, EXPERIMENT_FINALIZER};
pub use manager::ControllerManager;
pub use reconciler::{
    BackoffPolicy, ControllerRunner, Reconcile, ReconcileOutcome, ResourceKey, WorkQueue,
};
pub use suggestion_controller::SuggestionController;
pub use trial_controller::TrialController;
pub use validation::ExperimentValidator;
