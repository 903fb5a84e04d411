use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User row. The password hash never serializes into responses.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub avatar: Option<String>,
    pub location: Option<String>,
    pub birth_date: Option<String>,
    pub bio: Option<String>,
    pub role: String,
    pub created_at: OffsetDateTime,
}

/// Meet as carried inside user relation responses; its full schema lives
/// elsewhere.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Meet {
    pub id: Uuid,
    pub title: String,
    pub created_at: OffsetDateTime,
}

/// Minimal projection used for friends lists and username search.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub avatar: Option<String>,
}

/// User with one meet relation populated, mirroring a store fetch that
/// includes the touched relation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserWithMeets {
    #[serde(flatten)]
    pub user: User,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_meets: Option<Vec<Meet>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub joined_meets: Option<Vec<Meet>>,
}

impl UserWithMeets {
    pub fn new(user: User, kind: MeetKind, meets: Vec<Meet>) -> Self {
        let (saved_meets, joined_meets) = match kind {
            MeetKind::Saved => (Some(meets), None),
            MeetKind::Joined => (None, Some(meets)),
        };
        Self {
            user,
            saved_meets,
            joined_meets,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserWithFriends {
    #[serde(flatten)]
    pub user: User,
    pub friends: Vec<UserSummary>,
}

/// Which user↔meet relation an endpoint touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeetKind {
    Saved,
    Joined,
}

impl MeetKind {
    /// Derives the relation from the request path. `None` when the path
    /// names neither relation.
    pub fn from_path(path: &str) -> Option<Self> {
        lazy_static! {
            static ref MEET_KIND_RE: Regex = Regex::new(r"/(saved|joined)-meets/").unwrap();
        }
        match MEET_KIND_RE.captures(path)?.get(1)?.as_str() {
            "saved" => Some(Self::Saved),
            "joined" => Some(Self::Joined),
            _ => None,
        }
    }

    /// Join table backing the relation.
    pub fn edge_table(self) -> &'static str {
        match self {
            Self::Saved => "user_saved_meets",
            Self::Joined => "user_joined_meets",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meet_kind_parses_from_path() {
        assert_eq!(
            MeetKind::from_path("/users/1/saved-meets/2"),
            Some(MeetKind::Saved)
        );
        assert_eq!(
            MeetKind::from_path("/users/1/joined-meets/2"),
            Some(MeetKind::Joined)
        );
        assert_eq!(MeetKind::from_path("/users/1/add-friend/2"), None);
        assert_eq!(MeetKind::from_path("/users/1/saved-meets"), None);
    }

    #[test]
    fn user_serialization_hides_password_and_uses_camel_case() {
        let user = User {
            id: Uuid::new_v4(),
            username: "ann".into(),
            email: "ann@example.com".into(),
            password_hash: "$argon2id$secret".into(),
            avatar: None,
            location: None,
            birth_date: Some("1990-05-01".into()),
            bio: None,
            role: "user".into(),
            created_at: OffsetDateTime::UNIX_EPOCH,
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("password"));
        assert!(!json.contains("argon2id"));
        assert!(json.contains("birthDate"));
        assert!(json.contains("createdAt"));
    }

    #[test]
    fn relation_response_only_carries_the_touched_relation() {
        let user = User {
            id: Uuid::new_v4(),
            username: "ann".into(),
            email: "ann@example.com".into(),
            password_hash: "h".into(),
            avatar: None,
            location: None,
            birth_date: None,
            bio: None,
            role: "user".into(),
            created_at: OffsetDateTime::UNIX_EPOCH,
        };
        let json = serde_json::to_string(&UserWithMeets::new(user, MeetKind::Saved, vec![]))
            .unwrap();
        assert!(json.contains("savedMeets"));
        assert!(!json.contains("joinedMeets"));
    }
}
