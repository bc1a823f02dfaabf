//! egui shell: navigation, review form, results, history, and dialogs.

pub mod app;

pub use app::CouncilApp;
