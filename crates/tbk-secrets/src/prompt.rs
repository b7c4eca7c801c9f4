//! Password and recovery-phrase prompts

use secrecy::{ExposeSecret, SecretString};
use tbk_core::{VaultError, VaultResult};

/// Environment variable read by [`EnvPrompt`] for the vault password
pub const PASSWORD_ENV: &str = "TBK_PASSWORD";
/// Environment variable read by [`EnvPrompt`] for the recovery phrase
pub const PHRASE_ENV: &str = "TBK_RECOVERY_PHRASE";

/// Synchronous source of secrets. Nothing returned here is persisted.
pub trait Prompt {
    fn password(&self, prompt: &str) -> VaultResult<SecretString>;

    /// Ask twice and require both answers to match.
    fn new_password(&self) -> VaultResult<SecretString> {
        let first = self.password("New vault password: ")?;
        let second = self.password("Confirm password: ")?;
        if first.expose_secret() != second.expose_secret() {
            return Err(VaultError::WeakPassword("passwords do not match".into()));
        }
        Ok(first)
    }

    fn recovery_phrase(&self) -> VaultResult<SecretString>;
}

/// Reads from the controlling terminal without echo.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn password(&self, prompt: &str) -> VaultResult<SecretString> {
        Ok(SecretString::from(rpassword::prompt_password(prompt)?))
    }

    fn recovery_phrase(&self) -> VaultResult<SecretString> {
        Ok(SecretString::from(rpassword::prompt_password(
            "Recovery phrase (24 words): ",
        )?))
    }
}

/// Reads `TBK_PASSWORD` / `TBK_RECOVERY_PHRASE` for unattended runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvPrompt;

impl EnvPrompt {
    /// Whether unattended credentials are present.
    pub fn available() -> bool {
        std::env::var_os(PASSWORD_ENV).is_some() || std::env::var_os(PHRASE_ENV).is_some()
    }

    fn read(var: &str) -> VaultResult<SecretString> {
        std::env::var(var)
            .map(SecretString::from)
            .map_err(|_| VaultError::Config(format!("{var} is not set")))
    }
}

impl Prompt for EnvPrompt {
    fn password(&self, _prompt: &str) -> VaultResult<SecretString> {
        Self::read(PASSWORD_ENV)
    }

    fn new_password(&self) -> VaultResult<SecretString> {
        Self::read(PASSWORD_ENV)
    }

    fn recovery_phrase(&self) -> VaultResult<SecretString> {
        Self::read(PHRASE_ENV)
    }
}
