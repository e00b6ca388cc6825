use std::collections::HashSet;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

use crate::model::Actor;

/// Shared-secret password check for every login.
#[derive(Debug)]
pub struct AllocdAuthSource {
    password: String,
}

impl AllocdAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for AllocdAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

/// Resolves an authenticated login name to an [`Actor`]. Names on the
/// roster are administrators; everyone else is a member.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    admins: HashSet<String>,
}

impl Roster {
    pub fn new<I, S>(admins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            admins: admins.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_admin(&self, user: &str) -> bool {
        self.admins.contains(user)
    }

    pub fn resolve(&self, user: &str) -> Actor {
        if self.is_admin(user) {
            Actor::admin(user)
        } else {
            Actor::member(user)
        }
    }
}
