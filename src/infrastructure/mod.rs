pub mod bluetooth;
pub mod logging;
pub mod settings_file;
