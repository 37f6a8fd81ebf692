// Activation codes and their single-use tokens

use crate::config::TokenConfig;
use crate::reservation::UserId;
use chrono::{Duration, NaiveDateTime, Utc};
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum TokenError {
    #[error("Token not found")]
    NotFound,

    #[error("Token expired at {0}")]
    Expired(NaiveDateTime),

    #[error("Could not generate a unique code after {0} attempts")]
    CodeSpaceExhausted(usize),
}

const MAX_ISSUE_ATTEMPTS: usize = 16;

// Generates codes made of ASCII letters and digits only, so they can be
// embedded in links without URL encoding.
#[derive(Debug, Clone)]
pub struct CodeGenerator {
    length: usize,
}

impl CodeGenerator {
    pub fn new(length: usize) -> Self {
        Self { length }
    }

    pub fn generate_code(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.length)
            .map(char::from)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub value: String,
    pub user_id: UserId,
    pub expires_at: NaiveDateTime,
}

impl Token {
    pub fn is_expired_at(&self, now: NaiveDateTime) -> bool {
        now >= self.expires_at
    }
}

pub struct TokenRegistry {
    generator: CodeGenerator,
    ttl: Duration,
    tokens: DashMap<String, Token>,
}

impl TokenRegistry {
    pub fn new(config: &TokenConfig) -> Self {
        Self {
            generator: CodeGenerator::new(config.code_length),
            ttl: config.ttl(),
            tokens: DashMap::new(),
        }
    }

    pub fn issue(&self, user_id: UserId) -> Result<Token, TokenError> {
        self.issue_at(user_id, now())
    }

    fn issue_at(&self, user_id: UserId, issued_at: NaiveDateTime) -> Result<Token, TokenError> {
        for _ in 0..MAX_ISSUE_ATTEMPTS {
            let token = Token {
                value: self.generator.generate_code(),
                user_id,
                expires_at: issued_at + self.ttl,
            };
            // Retry on the (unlikely) collision with a live code
            if let dashmap::mapref::entry::Entry::Vacant(entry) =
                self.tokens.entry(token.value.clone())
            {
                entry.insert(token.clone());
                tracing::debug!(user_id, expires_at = %token.expires_at, "token issued");
                return Ok(token);
            }
        }
        Err(TokenError::CodeSpaceExhausted(MAX_ISSUE_ATTEMPTS))
    }

    // Consumes a token, returning the user it was issued for.
    pub fn redeem(&self, value: &str) -> Result<UserId, TokenError> {
        self.redeem_at(value, now())
    }

    fn redeem_at(&self, value: &str, at: NaiveDateTime) -> Result<UserId, TokenError> {
        let (_, token) = self.tokens.remove(value).ok_or(TokenError::NotFound)?;
        if token.is_expired_at(at) {
            tracing::debug!(user_id = token.user_id, "expired token presented");
            return Err(TokenError::Expired(token.expires_at));
        }
        Ok(token.user_id)
    }

    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(now())
    }

    fn purge_expired_at(&self, at: NaiveDateTime) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(|_, token| !token.is_expired_at(at));
        before - self.tokens.len()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}
