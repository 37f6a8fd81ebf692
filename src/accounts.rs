// Account activation, password restore and error reports by email

use crate::config::EmailConfig;
use crate::email::{DeliveryHandle, Email, EmailDispatcher, EmailError};
use crate::reservation::UserId;
use crate::token::{TokenError, TokenRegistry};
use std::fmt::Display;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AccountError {
    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Email(#[from] EmailError),
}

pub struct AccountNotifier {
    tokens: TokenRegistry,
    dispatcher: EmailDispatcher,
    developers: String,
}

impl AccountNotifier {
    pub fn new(tokens: TokenRegistry, dispatcher: EmailDispatcher, config: &EmailConfig) -> Self {
        Self {
            tokens,
            dispatcher,
            developers: config.developers.clone(),
        }
    }

    pub fn send_activation(
        &self,
        user_id: UserId,
        email: &str,
    ) -> Result<DeliveryHandle, AccountError> {
        let token = self.tokens.issue(user_id)?;
        tracing::info!(user_id, "sending account activation email");
        Ok(self.dispatcher.send(Email::account_activation(&token, email))?)
    }

    pub fn send_password_reset(
        &self,
        user_id: UserId,
        email: &str,
    ) -> Result<DeliveryHandle, AccountError> {
        let token = self.tokens.issue(user_id)?;
        tracing::info!(user_id, "sending password changing email");
        Ok(self.dispatcher.send(Email::password_changing(&token, email))?)
    }

    // Redeems an activation or password code and returns its user.
    pub fn activate(&self, token_value: &str) -> Result<UserId, AccountError> {
        Ok(self.tokens.redeem(token_value)?)
    }

    // Mails an internal error to the developers, if any are configured.
    pub fn report_error(&self, error: &dyn Display) -> Option<DeliveryHandle> {
        if self.developers.trim().is_empty() {
            tracing::warn!(error = %error, "no developers configured for error reports");
            return None;
        }
        match self
            .dispatcher
            .send(Email::exception_report(&self.developers, error))
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!(error = %e, "could not queue error report");
                None
            }
        }
    }

    pub async fn shutdown(self) {
        self.dispatcher.shutdown().await;
    }
}
