use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use orderledger_core::{LedgerError, LedgerResult, UserId};

/// A customer account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    id: UserId,
    email: String,
    username: String,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl User {
    /// Register a new, active account. The email is stored lower-cased.
    pub fn register(
        id: UserId,
        email: impl Into<String>,
        username: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        let email = email.into().trim().to_lowercase();
        let username = username.into().trim().to_string();

        let valid_email = email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
        if !valid_email {
            return Err(LedgerError::validation(format!("invalid email '{email}'")));
        }
        if username.is_empty() {
            return Err(LedgerError::validation("username cannot be empty"));
        }

        Ok(Self {
            id,
            email,
            username,
            is_active: true,
            created_at,
        })
    }

    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
    }

    pub fn activate(&mut self) {
        self.is_active = true;
    }
}

/// Personal details, exactly one per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
}

impl Profile {
    pub fn new(
        user_id: UserId,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            first_name: first_name.into(),
            last_name: last_name.into(),
            phone: None,
            date_of_birth: None,
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}
