pub mod payment;
pub mod subscription;
pub mod tariff;
pub mod user;
pub mod vpn_config;

pub use payment::PaymentStatus;
pub use subscription::{SubscriptionKind, SubscriptionStatus};
