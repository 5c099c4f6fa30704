pub mod key;
pub mod output;
pub mod pitch;
pub mod render;
pub mod song;
pub mod voicebank;
