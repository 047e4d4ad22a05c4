pub mod answer;
pub mod credential;
pub mod error;
pub mod models;
pub mod policy;

pub use answer::AnswerAccumulator;
pub use credential::ApiCredential;
pub use error::CheckError;
pub use models::*;
pub use policy::{PolicyProfile, ProfileLink, PromptEnvelope};
