use std::collections::HashMap;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Serialize;

use crate::error::{ApiError, ValidationErrors};
use crate::models::{ids::parse_user_id, NewUser, UserChanges, UserId, UserInput, UserView};
use crate::services::mutation_hook::MutationKind;
use crate::services::query::{ListQuery, Page, SearchRequest};
use crate::services::user_store::hash_password;
use crate::AppState;

const MAX_LENGTH: usize = 255;

/// Single-resource body: `{"data": ...}`.
#[derive(Debug, Serialize)]
pub struct Resource<T> {
    pub data: T,
}

impl<T> Resource<T> {
    pub fn new(data: T) -> Json<Self> {
        Json(Self { data })
    }
}

fn user_id(raw: &str) -> Result<UserId, ApiError> {
    parse_user_id(raw).map_err(|_| ApiError::user_not_found(raw))
}

/// Trim strings and treat blank ones as absent.
fn normalize(input: UserInput) -> UserInput {
    fn clean(value: Option<String>) -> Option<String> {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
    UserInput {
        name: clean(input.name),
        email: clean(input.email),
        password: input.password.filter(|p| !p.is_empty()),
    }
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain.contains('.')
        && domain.split('.').all(|label| !label.is_empty())
}

/// Format rules for whichever fields are present.
fn check_fields(errors: &mut ValidationErrors, input: &UserInput) {
    if let Some(name) = &input.name {
        if name.chars().count() > MAX_LENGTH {
            errors.add("name", format!("The name may not be greater than {} characters.", MAX_LENGTH));
        }
    }
    if let Some(email) = &input.email {
        if !is_valid_email(email) {
            errors.add("email", "The email must be a valid email address.");
        }
        if email.chars().count() > MAX_LENGTH {
            errors.add("email", format!("The email may not be greater than {} characters.", MAX_LENGTH));
        }
    }
}

fn validate_create(input: &UserInput) -> Result<(), ApiError> {
    let mut errors = ValidationErrors::new();
    for (field, value) in [
        ("name", &input.name),
        ("email", &input.email),
        ("password", &input.password),
    ] {
        if value.is_none() {
            errors.add(field, format!("The {} field is required.", field));
        }
    }
    check_fields(&mut errors, input);
    errors.into_result()
}

fn validate_update(input: &UserInput) -> Result<(), ApiError> {
    let mut errors = ValidationErrors::new();
    check_fields(&mut errors, input);
    errors.into_result()
}

// GET /api/users
pub async fn index(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Page<UserView>>, ApiError> {
    let query = ListQuery::from_params(&params)?;
    let page = state.store.list(&query).await?;
    Ok(Json(page))
}

// POST /api/users/search
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<Page<UserView>>, ApiError> {
    let Json(request) = body?;
    let query = ListQuery::from_search(request, &params)?;
    let page = state.store.list(&query).await?;
    Ok(Json(page))
}

// GET /api/users/:id
pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Resource<UserView>>, ApiError> {
    let id = user_id(&id)?;
    let user = state
        .store
        .find(id)
        .await?
        .ok_or_else(|| ApiError::user_not_found(id))?;
    Ok(Resource::new(user))
}

// POST /api/users
pub async fn store(
    State(state): State<AppState>,
    body: Result<Json<UserInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Resource<UserView>>), ApiError> {
    let Json(input) = body?;
    let input = normalize(input);
    validate_create(&input)?;

    let (Some(name), Some(email), Some(password)) =
        (input.name.clone(), input.email.clone(), input.password.clone())
    else {
        return Err(ApiError::BadRequest("name, email and password are required".to_string()));
    };

    let password_hash = hash_password(password, state.config.bcrypt_cost).await?;
    let user = state
        .store
        .create(NewUser {
            name,
            email,
            password_hash,
        })
        .await?;

    tracing::info!(user_id = user.id, "User created");
    state
        .hook
        .after_mutation(MutationKind::Created, &user, Some(&input))
        .await;

    Ok((StatusCode::CREATED, Resource::new(user)))
}

// PUT|PATCH /api/users/:id
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<UserInput>, JsonRejection>,
) -> Result<Json<Resource<UserView>>, ApiError> {
    let id = user_id(&id)?;
    let Json(input) = body?;
    let input = normalize(input);
    validate_update(&input)?;

    if state.store.find(id).await?.is_none() {
        return Err(ApiError::user_not_found(id));
    }

    let password_hash = match input.password.clone() {
        Some(password) => Some(hash_password(password, state.config.bcrypt_cost).await?),
        None => None,
    };
    let changes = UserChanges {
        name: input.name.clone(),
        email: input.email.clone(),
        password_hash,
    };

    let user = state
        .store
        .update(id, changes)
        .await?
        .ok_or_else(|| ApiError::user_not_found(id))?;

    tracing::info!(user_id = user.id, "User updated");
    state
        .hook
        .after_mutation(MutationKind::Updated, &user, Some(&input))
        .await;

    Ok(Resource::new(user))
}

// DELETE /api/users/:id
pub async fn destroy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Resource<UserView>>, ApiError> {
    let id = user_id(&id)?;
    let user = state
        .store
        .delete(id)
        .await?
        .ok_or_else(|| ApiError::user_not_found(id))?;

    tracing::info!(user_id = user.id, "User deleted");
    state
        .hook
        .after_mutation(MutationKind::Deleted, &user, None)
        .await;

    Ok(Resource::new(user))
}
