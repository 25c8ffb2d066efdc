pub mod coupon;
pub mod event;
pub mod registration;
pub mod reservation;

pub use coupon::{Coupon, CouponRejection, DiscountKind};
pub use event::{Event, EventSettings};
pub use registration::{PaymentStatus, Registration, RegistrationStatus};
pub use reservation::{CouponReservation, ReservationStatus};
