pub mod dialog;

pub use dialog::MessageDialog;
