use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// Free-form per-event configuration stored as JSON. Only the fields the
/// checkout core needs are modeled; everything else in the blob is opaque
/// to this service and reached through the accessors on [`Event`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    pub registration_open: bool,
    pub registration_deadline: Option<DateTime<Utc>>,
    pub badges_enabled: bool,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            registration_open: true,
            registration_deadline: None,
            badges_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub ticket_price: Decimal,
    pub currency: String,
    /// `None` means unlimited.
    pub capacity: Option<i32>,
    pub settings: Json<EventSettings>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn is_registration_open(&self, now: DateTime<Utc>) -> bool {
        if !self.settings.registration_open {
            return false;
        }
        match self.settings.registration_deadline {
            Some(deadline) => now <= deadline,
            None => true,
        }
    }

    pub fn badges_enabled(&self) -> bool {
        self.settings.badges_enabled
    }

    pub fn is_sold_out(&self, confirmed_count: i64) -> bool {
        match self.capacity {
            Some(capacity) => confirmed_count >= i64::from(capacity),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn event(settings: EventSettings, capacity: Option<i32>) -> Event {
        let now = Utc::now();
        Event {
            id: Uuid::new_v4(),
            slug: "rustconf-2026".into(),
            name: "RustConf 2026".into(),
            ticket_price: dec!(100),
            currency: "eur".into(),
            capacity,
            settings: Json(settings),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn registration_closed_flag_wins() {
        let e = event(
            EventSettings {
                registration_open: false,
                ..Default::default()
            },
            None,
        );
        assert!(!e.is_registration_open(Utc::now()));
    }

    #[test]
    fn deadline_closes_registration() {
        let now = Utc::now();
        let e = event(
            EventSettings {
                registration_deadline: Some(now - Duration::hours(1)),
                ..Default::default()
            },
            None,
        );
        assert!(!e.is_registration_open(now));
    }

    #[test]
    fn capacity_bounds_sold_out() {
        let e = event(EventSettings::default(), Some(2));
        assert!(!e.is_sold_out(1));
        assert!(e.is_sold_out(2));
        let unlimited = event(EventSettings::default(), None);
        assert!(!unlimited.is_sold_out(1_000_000));
    }
}
