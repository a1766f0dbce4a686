use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};

use super::DatabasePool;
use crate::models::{NewUser, UserChanges, UserId, UserView};
use crate::services::query::{FieldValue, FilterOp, ListQuery, Page, UserField};
use crate::services::user_store::{StoreError, UserStore};

const USER_COLUMNS: &str = "id, name, email, created_at, updated_at";

/// Postgres SQLSTATE for unique_violation.
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct PgUserStore {
    pool: DatabasePool,
}

impl PgUserStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn map_write_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            StoreError::DuplicateEmail
        }
        _ => StoreError::Database(err),
    }
}

/// Escape `%`, `_` and `\` so user search terms match literally inside ILIKE.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn push_value(builder: &mut QueryBuilder<'_, Postgres>, value: &FieldValue) {
    match value {
        FieldValue::Int(i) => builder.push_bind(*i),
        FieldValue::Text(s) => builder.push_bind(s.clone()),
        FieldValue::Time(t) => builder.push_bind(*t),
    };
}

/// WHERE clause shared by the count and the page query. Column names come from `UserField` only.
fn push_conditions(builder: &mut QueryBuilder<'_, Postgres>, query: &ListQuery) {
    builder.push(" WHERE TRUE");

    if let Some(term) = &query.search {
        let pattern = format!("%{}%", escape_like(term));
        builder
            .push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR email ILIKE ")
            .push_bind(pattern)
            .push(")");
    }

    for filter in &query.filters {
        if filter.op.is_list() && filter.values.is_empty() {
            // IN () matches nothing, NOT IN () matches everything.
            if filter.op == FilterOp::In {
                builder.push(" AND FALSE");
            }
            continue;
        }

        builder
            .push(" AND ")
            .push(filter.field.as_str())
            .push(" ")
            .push(filter.op.sql())
            .push(" ");

        if filter.op.is_list() {
            builder.push("(");
            for (i, value) in filter.values.iter().enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                push_value(builder, value);
            }
            builder.push(")");
        } else if let Some(value) = filter.values.first() {
            push_value(builder, value);
        }
    }
}

fn push_order(builder: &mut QueryBuilder<'_, Postgres>, query: &ListQuery) {
    builder.push(" ORDER BY ");
    for key in &query.sort {
        builder
            .push(key.field.as_str())
            .push(if key.descending { " DESC, " } else { " ASC, " });
    }
    builder.push(UserField::Id.as_str()).push(" ASC");
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn list(&self, query: &ListQuery) -> Result<Page<UserView>, StoreError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        push_conditions(&mut count, query);
        let (total,) = count.build_query_as::<(i64,)>().fetch_one(&*self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM users", USER_COLUMNS));
        push_conditions(&mut select, query);
        push_order(&mut select, query);
        select
            .push(" LIMIT ")
            .push_bind(i64::from(query.per_page))
            .push(" OFFSET ")
            .push_bind(query.offset() as i64);

        let users = select.build_query_as::<UserView>().fetch_all(&*self.pool).await?;

        Ok(Page::new(users, total.max(0) as u64, query))
    }

    async fn find(&self, id: UserId) -> Result<Option<UserView>, StoreError> {
        let user = sqlx::query_as::<_, UserView>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserView>, StoreError> {
        let user = sqlx::query_as::<_, UserView>(&format!(
            "SELECT {} FROM users WHERE email = $1",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&*self.pool)
        .await?;
        Ok(user)
    }

    async fn create(&self, user: NewUser) -> Result<UserView, StoreError> {
        sqlx::query_as::<_, UserView>(&format!(
            r#"
            INSERT INTO users (name, email, password_hash, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&*self.pool)
        .await
        .map_err(map_write_error)
    }

    async fn update(&self, id: UserId, changes: UserChanges) -> Result<Option<UserView>, StoreError> {
        sqlx::query_as::<_, UserView>(&format!(
            r#"
            UPDATE users
            SET name = COALESCE($1, name),
                email = COALESCE($2, email),
                password_hash = COALESCE($3, password_hash),
                updated_at = NOW()
            WHERE id = $4
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(changes.name.as_deref())
        .bind(changes.email.as_deref())
        .bind(changes.password_hash.as_deref())
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(map_write_error)
    }

    async fn delete(&self, id: UserId) -> Result<Option<UserView>, StoreError> {
        let user = sqlx::query_as::<_, UserView>(&format!(
            "DELETE FROM users WHERE id = $1 RETURNING {}",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;
        Ok(user)
    }

    async fn ping(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&*self.pool).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Database ping failed");
                false
            }
        }
    }
}
