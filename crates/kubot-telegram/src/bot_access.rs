use std::collections::BTreeSet;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorizedUsersError {
    #[error("invalid user id '{0}': expected a comma-separated list of numeric ids")]
    InvalidId(String),
    #[error("at least one authorized user id is required")]
    Empty,
}

/// Allow-list of Telegram user ids permitted to issue commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizedUsers {
    ids: BTreeSet<i64>,
}

impl AuthorizedUsers {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Parses `"123, 456"`; blank entries are skipped, an empty result is an error.
    pub fn parse(raw: &str) -> Result<Self, AuthorizedUsersError> {
        let mut ids = BTreeSet::new();
        for token in raw.split(',').map(str::trim).filter(|token| !token.is_empty()) {
            let id = token
                .parse::<i64>()
                .map_err(|_| AuthorizedUsersError::InvalidId(token.to_string()))?;
            ids.insert(id);
        }
        if ids.is_empty() {
            return Err(AuthorizedUsersError::Empty);
        }
        Ok(Self { ids })
    }

    pub fn is_authorized(&self, user_id: i64) -> bool {
        self.ids.contains(&user_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
