use async_trait::async_trait;
use axum::{http::StatusCode, Json};
use uuid::Uuid;
use validator::Validate;

use crate::error::HttpError;

/// Capability set a data-access layer exposes per entity: `Entity` is the
/// stored row, `Create` the creation payload, `Update` the partial-update
/// payload. Handlers compose over a value of this trait instead of
/// subclassing anything.
#[async_trait]
pub trait Repository: Send + Sync {
    type Entity: Send;
    type Create: Send;
    type Update: Send;

    async fn read_all(&self) -> Result<Vec<Self::Entity>, HttpError>;
    async fn read_by_id(&self, id: Uuid) -> Result<Self::Entity, HttpError>;
    async fn create(&self, data: Self::Create) -> Result<Self::Entity, HttpError>;
    async fn update(&self, id: Uuid, data: Self::Update) -> Result<Self::Entity, HttpError>;
    async fn delete(&self, id: Uuid) -> Result<Self::Entity, HttpError>;
}

/// Schema validation with every failure collected, not just the first.
/// Failures answer 406 Not Acceptable with the joined messages.
pub fn validate_schema<D: Validate>(data: &D) -> Result<(), HttpError> {
    data.validate().map_err(|errs| {
        let mut messages: Vec<String> = errs
            .field_errors()
            .into_iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| match &e.message {
                    Some(m) => format!("\"{}\" {}", field, m),
                    None => format!("\"{}\" failed rule \"{}\"", field, e.code),
                })
            })
            .collect();
        messages.sort();
        HttpError::not_acceptable(messages.join(". "))
    })
}

pub async fn get_all<R>(repo: &R) -> Result<Json<Vec<R::Entity>>, HttpError>
where
    R: Repository + ?Sized,
{
    Ok(Json(repo.read_all().await?))
}

/// The repository raises not-found; no existence check happens here.
pub async fn get_by_id<R>(repo: &R, id: Uuid) -> Result<Json<R::Entity>, HttpError>
where
    R: Repository + ?Sized,
{
    Ok(Json(repo.read_by_id(id).await?))
}

pub async fn create<R>(repo: &R, data: R::Create) -> Result<(StatusCode, Json<R::Entity>), HttpError>
where
    R: Repository + ?Sized,
    R::Create: Validate,
{
    validate_schema(&data)?;
    let created = repo.create(data).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update<R>(repo: &R, id: Uuid, data: R::Update) -> Result<Json<R::Entity>, HttpError>
where
    R: Repository + ?Sized,
    R::Update: Validate,
{
    validate_schema(&data)?;
    Ok(Json(repo.update(id, data).await?))
}

/// Answers with the pre-deletion snapshot; repository failures forward as-is.
pub async fn delete<R>(repo: &R, id: Uuid) -> Result<Json<R::Entity>, HttpError>
where
    R: Repository + ?Sized,
{
    Ok(Json(repo.delete(id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Validate)]
    struct Dto {
        #[validate(length(min = 2, message = "must be at least 2 characters"))]
        username: String,
        #[validate(email(message = "must be a valid email"))]
        email: String,
    }

    #[test]
    fn valid_payload_passes() {
        let dto = Dto {
            username: "ann".into(),
            email: "ann@example.com".into(),
        };
        assert!(validate_schema(&dto).is_ok());
    }

    #[test]
    fn all_failures_are_collected_into_one_message() {
        let dto = Dto {
            username: "a".into(),
            email: "nope".into(),
        };
        let err = validate_schema(&dto).unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::NOT_ACCEPTABLE);
        assert!(err.message.contains("\"username\" must be at least 2 characters"));
        assert!(err.message.contains("\"email\" must be a valid email"));
    }
}
