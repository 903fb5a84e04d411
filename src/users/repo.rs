use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::crud::Repository;
use crate::error::HttpError;
use crate::users::dto::{UserCreateDto, UserUpdateDto};
use crate::users::model::{Meet, MeetKind, User, UserSummary, UserWithFriends, UserWithMeets};

const USER_COLUMNS: &str =
    "id, username, email, password_hash, avatar, location, birth_date, bio, role, created_at";

/// Which column a login lookup matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginKey {
    Email,
    Username,
}

impl LoginKey {
    pub fn parse(key: &str) -> Result<Self, HttpError> {
        match key {
            "email" => Ok(Self::Email),
            "username" => Ok(Self::Username),
            _ => Err(HttpError::bad_request("Invalid query parameters")),
        }
    }

    fn column(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Username => "username",
        }
    }
}

#[derive(Clone)]
pub struct UsersRepo {
    db: PgPool,
}

impl UsersRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    fn not_found(id: Uuid) -> HttpError {
        HttpError::not_found(format!("User {} not found", id))
    }

    async fn fetch_by_id(&self, id: Uuid) -> Result<User, HttpError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| Self::not_found(id))
    }

    /// Lookup for the login flow. An unknown key answers 400; a miss answers
    /// a deliberately vague 400 that does not reveal which field was wrong.
    pub async fn search_for_login(&self, key: &str, value: &str) -> Result<User, HttpError> {
        let key = LoginKey::parse(key)?;
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {} = $1", key.column());
        sqlx::query_as::<_, User>(&sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| HttpError::bad_request("Invalid email or password"))
    }

    /// Connect or disconnect a meet edge, then answer with the user and the
    /// touched relation populated. Both directions are idempotent at the
    /// store (ON CONFLICT DO NOTHING / plain DELETE).
    pub async fn manage_meet(
        &self,
        user_id: Uuid,
        meet_id: Uuid,
        method: &str,
        kind: MeetKind,
    ) -> Result<UserWithMeets, HttpError> {
        let edge = kind.edge_table();
        match method {
            "POST" => {
                let sql = format!(
                    "INSERT INTO {edge} (user_id, meet_id) VALUES ($1, $2) ON CONFLICT DO NOTHING"
                );
                sqlx::query(&sql)
                    .bind(user_id)
                    .bind(meet_id)
                    .execute(&self.db)
                    .await?;
            }
            "DELETE" => {
                let sql = format!("DELETE FROM {edge} WHERE user_id = $1 AND meet_id = $2");
                sqlx::query(&sql)
                    .bind(user_id)
                    .bind(meet_id)
                    .execute(&self.db)
                    .await?;
            }
            _ => return Err(HttpError::bad_request("Operation unknown")),
        }
        debug!(%user_id, %meet_id, method, ?kind, "meet edge updated");

        let user = self.fetch_by_id(user_id).await?;
        let sql = format!(
            "SELECT m.id, m.title, m.created_at FROM meets m \
             JOIN {edge} e ON e.meet_id = m.id WHERE e.user_id = $1 \
             ORDER BY m.created_at"
        );
        let meets = sqlx::query_as::<_, Meet>(&sql)
            .bind(user_id)
            .fetch_all(&self.db)
            .await?;
        Ok(UserWithMeets::new(user, kind, meets))
    }

    pub async fn add_friend(
        &self,
        user_id: Uuid,
        friend_id: Uuid,
    ) -> Result<UserWithFriends, HttpError> {
        sqlx::query(
            "INSERT INTO user_friends (user_id, friend_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(friend_id)
        .execute(&self.db)
        .await?;
        debug!(%user_id, %friend_id, "friend connected");
        self.with_friends(user_id).await
    }

    pub async fn delete_friend(
        &self,
        user_id: Uuid,
        friend_id: Uuid,
    ) -> Result<UserWithFriends, HttpError> {
        sqlx::query("DELETE FROM user_friends WHERE user_id = $1 AND friend_id = $2")
            .bind(user_id)
            .bind(friend_id)
            .execute(&self.db)
            .await?;
        debug!(%user_id, %friend_id, "friend disconnected");
        self.with_friends(user_id).await
    }

    pub async fn get_friends(&self, user_id: Uuid) -> Result<Vec<UserSummary>, HttpError> {
        // The 404 is for the user row itself; an empty friends list is fine.
        self.fetch_by_id(user_id).await?;
        self.friends_of(user_id).await
    }

    /// Case-insensitive substring match on username, minimal projection.
    pub async fn search_by_username(&self, fragment: &str) -> Result<Vec<UserSummary>, HttpError> {
        let users = sqlx::query_as::<_, UserSummary>(
            "SELECT id, username, avatar FROM users \
             WHERE username ILIKE '%' || $1 || '%' ORDER BY username",
        )
        .bind(fragment)
        .fetch_all(&self.db)
        .await?;
        Ok(users)
    }

    async fn with_friends(&self, user_id: Uuid) -> Result<UserWithFriends, HttpError> {
        let user = self.fetch_by_id(user_id).await?;
        let friends = self.friends_of(user_id).await?;
        Ok(UserWithFriends { user, friends })
    }

    async fn friends_of(&self, user_id: Uuid) -> Result<Vec<UserSummary>, HttpError> {
        let friends = sqlx::query_as::<_, UserSummary>(
            "SELECT u.id, u.username, u.avatar FROM users u \
             JOIN user_friends f ON f.friend_id = u.id \
             WHERE f.user_id = $1 ORDER BY u.username",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(friends)
    }
}

#[async_trait]
impl Repository for UsersRepo {
    type Entity = User;
    type Create = UserCreateDto;
    type Update = UserUpdateDto;

    async fn read_all(&self) -> Result<Vec<User>, HttpError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at");
        Ok(sqlx::query_as::<_, User>(&sql).fetch_all(&self.db).await?)
    }

    async fn read_by_id(&self, id: Uuid) -> Result<User, HttpError> {
        self.fetch_by_id(id).await
    }

    async fn create(&self, data: UserCreateDto) -> Result<User, HttpError> {
        let sql = format!(
            "INSERT INTO users (username, email, password_hash, avatar, location, birth_date, bio) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(data.username)
            .bind(data.email)
            .bind(data.password)
            .bind(data.avatar)
            .bind(data.location)
            .bind(data.birth_date)
            .bind(data.bio)
            .fetch_one(&self.db)
            .await?;
        Ok(user)
    }

    async fn update(&self, id: Uuid, data: UserUpdateDto) -> Result<User, HttpError> {
        // Existence first so an unknown id answers 404, not a silent no-op.
        self.fetch_by_id(id).await?;
        let sql = format!(
            "UPDATE users SET \
               username = COALESCE($2, username), \
               email = COALESCE($3, email), \
               password_hash = COALESCE($4, password_hash), \
               avatar = COALESCE($5, avatar), \
               location = COALESCE($6, location), \
               birth_date = COALESCE($7, birth_date), \
               bio = COALESCE($8, bio) \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(data.username)
            .bind(data.email)
            .bind(data.password)
            .bind(data.avatar)
            .bind(data.location)
            .bind(data.birth_date)
            .bind(data.bio)
            .fetch_one(&self.db)
            .await?;
        Ok(user)
    }

    async fn delete(&self, id: Uuid) -> Result<User, HttpError> {
        let snapshot = self.fetch_by_id(id).await?;
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_key_accepts_only_email_and_username() {
        assert_eq!(LoginKey::parse("email").unwrap(), LoginKey::Email);
        assert_eq!(LoginKey::parse("username").unwrap(), LoginKey::Username);

        let err = LoginKey::parse("role").unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Invalid query parameters");
    }

    #[test]
    fn not_found_message_names_the_id() {
        let id = Uuid::nil();
        let err = UsersRepo::not_found(id);
        assert_eq!(err.status, axum::http::StatusCode::NOT_FOUND);
        assert_eq!(
            err.message,
            "User 00000000-0000-0000-0000-000000000000 not found"
        );
    }

    #[tokio::test]
    async fn manage_meet_rejects_unknown_operations() {
        let state = crate::state::AppState::fake();
        let err = state
            .users
            .manage_meet(Uuid::new_v4(), Uuid::new_v4(), "PATCH", MeetKind::Saved)
            .await
            .unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Operation unknown");
    }
}
