use crate::{
    entities::coupon,
    errors::ServiceError,
    events::{Event, EventSender},
    sessions::{SessionStore, SESSION_KEY_COUPON_ID},
};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

/// Why a coupon code did not apply. Callers decide whether to surface or
/// swallow these; database failures are kept separate so they always
/// propagate.
#[derive(Debug, Error)]
pub enum CouponError {
    #[error("Coupon code not found")]
    NotFound,
    #[error("Coupon is not active")]
    Inactive,
    #[error("Coupon is not valid yet")]
    NotYetValid,
    #[error("Coupon has expired")]
    Expired,
    #[error("Database error: {0}")]
    Db(#[from] sea_orm::error::DbErr),
}

impl CouponError {
    /// True for business rejections, false for infrastructure failures.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, CouponError::Db(_))
    }
}

/// Coupon resolution and per-session attachment.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
    sessions: Arc<dyn SessionStore>,
    event_sender: Arc<EventSender>,
}

impl CouponService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        sessions: Arc<dyn SessionStore>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            sessions,
            event_sender,
        }
    }

    fn check_validity(coupon: coupon::Model, now: DateTime<Utc>) -> Result<coupon::Model, CouponError> {
        if !coupon.active {
            return Err(CouponError::Inactive);
        }
        if now < coupon.valid_from {
            return Err(CouponError::NotYetValid);
        }
        if now > coupon.valid_to {
            return Err(CouponError::Expired);
        }
        Ok(coupon)
    }

    /// Resolves a code (case-insensitively) and validates its window at
    /// `now`. Returns a typed rejection rather than silently yielding None.
    #[instrument(skip(self))]
    pub async fn resolve(&self, code: &str, now: DateTime<Utc>) -> Result<coupon::Model, CouponError> {
        let found = coupon::Entity::find()
            .filter(
                Expr::expr(Func::lower(Expr::col(coupon::Column::Code)))
                    .eq(code.to_lowercase()),
            )
            .one(&*self.db)
            .await?
            .ok_or(CouponError::NotFound)?;

        Self::check_validity(found, now)
    }

    /// Re-resolves a coupon by id, validating the window on every read.
    pub async fn resolve_by_id(
        &self,
        coupon_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<coupon::Model, CouponError> {
        let found = coupon::Entity::find_by_id(coupon_id)
            .one(&*self.db)
            .await?
            .ok_or(CouponError::NotFound)?;

        Self::check_validity(found, now)
    }

    /// Applies a code to a session. On success the coupon id is stored; on
    /// rejection any previously stored coupon is cleared and `None` is
    /// returned. Database errors propagate.
    #[instrument(skip(self))]
    pub async fn apply(
        &self,
        session_id: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<coupon::Model>, ServiceError> {
        match self.resolve(code, now).await {
            Ok(coupon) => {
                self.sessions
                    .put(session_id, SESSION_KEY_COUPON_ID, &coupon.id.to_string())
                    .await
                    .map_err(|e| ServiceError::SessionError(e.to_string()))?;
                self.event_sender
                    .send_or_log(Event::CouponApplied {
                        session_id: session_id.to_string(),
                        coupon_id: coupon.id,
                    })
                    .await;
                info!(session_id, code, "Coupon applied");
                Ok(Some(coupon))
            }
            Err(e) if e.is_rejection() => {
                info!(session_id, code, reason = %e, "Coupon rejected");
                self.clear(session_id).await?;
                Ok(None)
            }
            Err(CouponError::Db(e)) => Err(ServiceError::DatabaseError(e)),
            Err(_) => unreachable!("non-db errors are rejections"),
        }
    }

    /// The coupon currently attached to the session, if it still resolves
    /// and is valid at `now`. Never cached by value.
    #[instrument(skip(self))]
    pub async fn current(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<coupon::Model>, ServiceError> {
        let stored = self
            .sessions
            .get(session_id, SESSION_KEY_COUPON_ID)
            .await
            .map_err(|e| ServiceError::SessionError(e.to_string()))?;

        let Some(raw) = stored else { return Ok(None) };
        let Ok(coupon_id) = Uuid::parse_str(&raw) else {
            return Ok(None);
        };

        match self.resolve_by_id(coupon_id, now).await {
            Ok(coupon) => Ok(Some(coupon)),
            Err(e) if e.is_rejection() => Ok(None),
            Err(CouponError::Db(e)) => Err(ServiceError::DatabaseError(e)),
            Err(_) => unreachable!("non-db errors are rejections"),
        }
    }

    /// Detaches any coupon from the session.
    pub async fn clear(&self, session_id: &str) -> Result<(), ServiceError> {
        self.sessions
            .remove(session_id, SESSION_KEY_COUPON_ID)
            .await
            .map_err(|e| ServiceError::SessionError(e.to_string()))?;
        self.event_sender
            .send_or_log(Event::CouponRemoved {
                session_id: session_id.to_string(),
            })
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn coupon_fixture(now: DateTime<Utc>) -> coupon::Model {
        coupon::Model {
            id: Uuid::new_v4(),
            code: "SUMMER".to_string(),
            discount_percent: 10,
            valid_from: now - Duration::days(1),
            valid_to: now + Duration::days(1),
            active: true,
            created_at: now,
        }
    }

    #[test]
    fn validity_window_is_inclusive() {
        let now = Utc::now();
        let mut c = coupon_fixture(now);
        c.valid_from = now;
        c.valid_to = now;
        assert!(CouponService::check_validity(c, now).is_ok());
    }

    #[test]
    fn inactive_coupon_is_rejected() {
        let now = Utc::now();
        let mut c = coupon_fixture(now);
        c.active = false;
        let err = CouponService::check_validity(c, now).unwrap_err();
        assert!(matches!(err, CouponError::Inactive));
        assert!(err.is_rejection());
    }

    #[test]
    fn window_edges_reject_correctly() {
        let now = Utc::now();
        let c = coupon_fixture(now);

        let err = CouponService::check_validity(c.clone(), now - Duration::days(2)).unwrap_err();
        assert!(matches!(err, CouponError::NotYetValid));

        let err = CouponService::check_validity(c, now + Duration::days(2)).unwrap_err();
        assert!(matches!(err, CouponError::Expired));
    }
}
