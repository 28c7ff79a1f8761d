pub mod api;
pub mod dispatch;
pub mod station;
pub mod stream;
