pub mod types;
pub mod logger;
pub mod control;
pub mod sleep;
pub mod settings;
pub mod click;
pub mod hint;
pub mod matcher;
pub mod ocr;
pub mod progress;
pub mod detect;
pub mod engine;
pub mod orchestrator;
pub mod platform;
