pub mod api;
pub mod cart;
pub mod clients;
pub mod logging;
pub mod store;
pub mod suggest;
pub mod util;
