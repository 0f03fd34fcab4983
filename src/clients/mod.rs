// Outbound HTTP clients: AH retailer API and the Mealie recipe manager.

pub mod ah;
pub mod mealie;

pub use ah::AhClient;
pub use mealie::MealieClient;
