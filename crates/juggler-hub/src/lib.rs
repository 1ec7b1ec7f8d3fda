pub mod actor;
pub mod bridge;
pub mod controller;
pub mod listener;
pub mod registry;
