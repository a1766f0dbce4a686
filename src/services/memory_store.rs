use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::models::{NewUser, UserChanges, UserId, UserView};
use crate::services::query::{ListQuery, Page};
use crate::services::user_store::{StoreError, UserStore};

struct StoredUser {
    view: UserView,
    password_hash: String,
}

struct MemoryState {
    next_id: UserId,
    users: BTreeMap<UserId, StoredUser>,
}

/// Process-local user store with the same contract as the Postgres one.
/// Used with `USER_STORE=memory` and by the HTTP tests.
pub struct InMemoryUserStore {
    state: RwLock<MemoryState>,
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Store whose first created user gets `next_id`.
    pub fn starting_at(next_id: UserId) -> Self {
        Self {
            state: RwLock::new(MemoryState {
                next_id,
                users: BTreeMap::new(),
            }),
        }
    }

    pub async fn password_hash(&self, id: UserId) -> Option<String> {
        let state = self.state.read().await;
        state.users.get(&id).map(|u| u.password_hash.clone())
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.users.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl MemoryState {
    fn email_taken(&self, email: &str, except: Option<UserId>) -> bool {
        self.users
            .values()
            .any(|u| u.view.email == email && Some(u.view.id) != except)
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn list(&self, query: &ListQuery) -> Result<Page<UserView>, StoreError> {
        let state = self.state.read().await;
        let mut matching: Vec<UserView> = state
            .users
            .values()
            .map(|u| &u.view)
            .filter(|u| query.matches(u))
            .cloned()
            .collect();
        matching.sort_by(|a, b| query.compare(a, b));

        let total = matching.len() as u64;
        let data = matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.per_page as usize)
            .collect();
        Ok(Page::new(data, total, query))
    }

    async fn find(&self, id: UserId) -> Result<Option<UserView>, StoreError> {
        let state = self.state.read().await;
        Ok(state.users.get(&id).map(|u| u.view.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserView>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .find(|u| u.view.email == email)
            .map(|u| u.view.clone()))
    }

    async fn create(&self, user: NewUser) -> Result<UserView, StoreError> {
        let mut state = self.state.write().await;
        if state.email_taken(&user.email, None) {
            return Err(StoreError::DuplicateEmail);
        }

        let id = state.next_id;
        state.next_id += 1;
        let now = Utc::now();
        let view = UserView {
            id,
            name: user.name,
            email: user.email,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(
            id,
            StoredUser {
                view: view.clone(),
                password_hash: user.password_hash,
            },
        );
        Ok(view)
    }

    async fn update(&self, id: UserId, changes: UserChanges) -> Result<Option<UserView>, StoreError> {
        let mut state = self.state.write().await;
        if let Some(email) = &changes.email {
            if state.users.contains_key(&id) && state.email_taken(email, Some(id)) {
                return Err(StoreError::DuplicateEmail);
            }
        }

        let Some(stored) = state.users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = changes.name {
            stored.view.name = name;
        }
        if let Some(email) = changes.email {
            stored.view.email = email;
        }
        if let Some(password_hash) = changes.password_hash {
            stored.password_hash = password_hash;
        }
        stored.view.updated_at = Utc::now();
        Ok(Some(stored.view.clone()))
    }

    async fn delete(&self, id: UserId) -> Result<Option<UserView>, StoreError> {
        let mut state = self.state.write().await;
        Ok(state.users.remove(&id).map(|u| u.view))
    }

    async fn ping(&self) -> bool {
        true
    }
}
