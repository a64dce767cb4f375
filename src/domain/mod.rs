pub mod buttons;
pub mod calibration;
pub mod controller;
pub mod gestures;
pub mod imu;
pub mod mapping;
pub mod models;
pub mod settings;
