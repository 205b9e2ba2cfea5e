//! GetRandomPassword generation

use rand::seq::SliceRandom;
use rand::Rng;

use crate::storage::SecretsManagerError;

pub const DEFAULT_PASSWORD_LENGTH: usize = 32;
pub const MAX_PASSWORD_LENGTH: usize = 4096;

const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";
const PUNCTUATION: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// Character rules for a generated password
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub length: usize,
    pub exclude_characters: String,
    pub exclude_numbers: bool,
    pub exclude_punctuation: bool,
    pub exclude_uppercase: bool,
    pub exclude_lowercase: bool,
    pub include_space: bool,
    /// At least one character of every included class
    pub require_each_included_type: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            length: DEFAULT_PASSWORD_LENGTH,
            exclude_characters: String::new(),
            exclude_numbers: false,
            exclude_punctuation: false,
            exclude_uppercase: false,
            exclude_lowercase: false,
            include_space: false,
            require_each_included_type: true,
        }
    }
}

impl PasswordPolicy {
    /// Character classes left after applying the exclusions. Empty classes are dropped.
    fn classes(&self) -> Vec<Vec<char>> {
        let mut classes = Vec::new();
        if !self.exclude_lowercase {
            classes.push(LOWERCASE);
        }
        if !self.exclude_uppercase {
            classes.push(UPPERCASE);
        }
        if !self.exclude_numbers {
            classes.push(DIGITS);
        }
        if !self.exclude_punctuation {
            classes.push(PUNCTUATION);
        }
        if self.include_space {
            classes.push(" ");
        }

        classes
            .into_iter()
            .map(|class| {
                class
                    .chars()
                    .filter(|c| !self.exclude_characters.contains(*c))
                    .collect::<Vec<char>>()
            })
            .filter(|class| !class.is_empty())
            .collect()
    }

    pub fn generate(&self) -> Result<String, SecretsManagerError> {
        self.generate_with(&mut rand::thread_rng())
    }

    pub fn generate_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<String, SecretsManagerError> {
        if self.length == 0 || self.length > MAX_PASSWORD_LENGTH {
            return Err(SecretsManagerError::InvalidParameter(format!(
                "PasswordLength must be between 1 and {}",
                MAX_PASSWORD_LENGTH
            )));
        }

        let classes = self.classes();
        if classes.is_empty() {
            return Err(SecretsManagerError::InvalidParameter(
                "The password policy excludes every character".to_string(),
            ));
        }
        if self.require_each_included_type && self.length < classes.len() {
            return Err(SecretsManagerError::InvalidParameter(format!(
                "PasswordLength must be at least {} to include every character type",
                classes.len()
            )));
        }

        let mut password: Vec<char> = Vec::with_capacity(self.length);
        if self.require_each_included_type {
            for class in &classes {
                if let Some(c) = class.choose(rng) {
                    password.push(*c);
                }
            }
        }

        let pool: Vec<char> = classes.concat();
        while password.len() < self.length {
            if let Some(c) = pool.choose(rng) {
                password.push(*c);
            }
        }

        password.shuffle(rng);
        Ok(password.into_iter().collect())
    }
}
