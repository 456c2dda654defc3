use crate::controller::Phase;
use crate::model::Category;
use thiserror::Error;

/// Everything the lifecycle controller can refuse or fail with. None of these
/// leave the persisted pet half-written.
#[derive(Debug, Error)]
pub enum PetError {
    #[error("{0} must not be empty")]
    EmptyInput(&'static str),

    #[error("no pet has been created")]
    NoPet,

    #[error("a pet already exists; release it first")]
    AlreadyExists,

    #[error("busy: pet is {0}")]
    Busy(Phase),

    #[error("the pet is still finishing the previous conversation")]
    ChatInFlight,

    #[error("wait for {0} to finish first")]
    Pending(&'static str),

    #[error("not ready to evolve")]
    NotEligible,

    #[error("no evolution in progress")]
    NotEvolving,

    #[error("evolution was discarded before it finished")]
    EvolutionDiscarded,

    #[error("no minigame is running")]
    NoMinigame,

    #[error("unknown care item {0:?}")]
    UnknownCareItem(String),

    #[error("{item} is not a {category} item")]
    WrongCategory { item: String, category: Category },

    #[error("unknown accessory {0:?}")]
    UnknownAccessory(String),

    #[error("release must be confirmed")]
    ReleaseNotConfirmed,

    #[error("generation failed: {0:#}")]
    Gateway(anyhow::Error),

    #[error("storage failed: {0:#}")]
    Storage(anyhow::Error),
}
