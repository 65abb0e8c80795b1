pub mod error;
pub mod geo;
pub mod jobs;
pub mod lifecycle;
pub mod model;
pub mod notify;
pub mod otp;
pub mod patch;
pub mod store;
