use std::fmt;

use crate::error::CheckError;

pub const CREDENTIAL_PREFIX: &str = "r8_";
pub const CREDENTIAL_LENGTH: usize = 40;

pub const CREDENTIAL_CONFIGURED_MESSAGE: &str = "API key already provided!";
pub const CREDENTIAL_ACCEPTED_MESSAGE: &str = "Proceed to entering your prompt message!";
pub const CREDENTIAL_MISSING_WARNING: &str = "Please enter your credentials!";

/// A Replicate API token that has passed the local shape check.
///
/// Holding one does not mean the endpoint will accept it, only that the
/// request is worth attempting.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiCredential(String);

impl ApiCredential {
    /// The shape check runs on `raw` as given; surrounding whitespace
    /// makes a token malformed.
    pub fn parse(raw: &str) -> Result<Self, CheckError> {
        if raw.trim().is_empty() {
            return Err(CheckError::Authentication(
                "no API token was provided".to_string(),
            ));
        }
        if !is_well_formed(raw) {
            return Err(CheckError::Authentication(format!(
                "API token must start with `{CREDENTIAL_PREFIX}` and be {CREDENTIAL_LENGTH} characters long"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ApiCredential")
            .field(&format_args!("{CREDENTIAL_PREFIX}***"))
            .finish()
    }
}

pub fn is_well_formed(token: &str) -> bool {
    token.starts_with(CREDENTIAL_PREFIX) && token.chars().count() == CREDENTIAL_LENGTH
}
